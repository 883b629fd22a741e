//! Per-run experiment directory

use crate::config::SimulatorConfig;
use crate::dataset::stamped_name;
use crate::error::{PolicySimError, Result};
use crate::report::Report;
use crate::scheduler::StopReason;
use crate::workspace::WorkspaceHandle;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const PROMPT_FILE: &str = "prompt.txt";
pub const CONFIG_FILE: &str = "config.yaml";
pub const RESULTS_FILE: &str = "results.csv";
pub const SUMMARY_FILE: &str = "summary.json";
pub const LOG_FILE: &str = "experiment.log";

/// Outcome of a simulation run, persisted as `summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// `{dataset}__{DD_MM_YYYY_HH_MM_SS}`
    pub experiment_id: String,
    pub experiment_dir: PathBuf,
    pub dataset: String,
    pub batches_planned: usize,
    pub batches_run: usize,
    pub dropped_records: usize,
    pub stop_reason: StopReason,
    pub total_cost: f64,
    pub cost_limit: f64,
    pub rows: usize,
    pub passed: usize,
    pub pass_rate: f64,
}

/// The isolated output area of one run
#[derive(Debug, Clone)]
pub struct ExperimentRun {
    id: String,
    dir: PathBuf,
}

impl ExperimentRun {
    /// Create the directory of a new run of `dataset_name` started at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`PolicySimError::ExperimentExists`] if a run with the same id
    /// was already created; nothing in it is touched.
    pub fn create(
        workspace: &WorkspaceHandle,
        dataset_name: &str,
        now: NaiveDateTime,
    ) -> Result<Self> {
        let id = stamped_name(dataset_name, now);
        let dir = workspace.experiments_dir().join(&id);

        match std::fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(PolicySimError::ExperimentExists(dir));
            }
            Err(e) => return Err(PolicySimError::workspace(&dir, e)),
        }

        tracing::info!(experiment = %id, dir = %dir.display(), "Experiment created");
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    /// Snapshot the agent prompt
    pub fn write_prompt(&self, prompt: &str) -> Result<()> {
        self.write(PROMPT_FILE, prompt.as_bytes())
    }

    /// Snapshot the effective configuration
    pub fn write_config(&self, config: &SimulatorConfig) -> Result<()> {
        self.write(CONFIG_FILE, config.to_yaml()?.as_bytes())
    }

    pub fn write_report(&self, report: &Report) -> Result<()> {
        report.write_csv(self.results_path())
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        self.write(SUMMARY_FILE, &serde_json::to_vec_pretty(summary)?)
    }

    fn write(&self, file: &str, contents: &[u8]) -> Result<()> {
        let path = self.dir.join(file);
        std::fs::write(&path, contents).map_err(|e| PolicySimError::workspace(&path, e))
    }
}
