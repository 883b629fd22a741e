//! Simulation executor
//!
//! Wires the stages of a run together:
//!
//! 1. ensure the workspace and obtain the policy catalogue
//! 2. resolve and load (or synthesize) the dataset
//! 3. create the experiment directory and snapshot prompt and configuration
//! 4. run the batch scheduler against the dialogue driver
//! 5. aggregate the results into `results.csv` and `summary.json`
//!
//! Any collaborator error aborts the run before a report is written.
//!
//! # Example
//!
//! ```rust,no_run
//! use policysim_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let config = SimulatorConfig::from_file("policysim.toml")?;
//! let collaborators = Collaborators {
//!     catalogue: Arc::new(StaticCatalogueGenerator::from_file("policies.json")?),
//!     dataset: Arc::new(RecordFileDatasetGenerator::from_file("scenarios.json")?),
//!     dialog: Arc::new(ScriptedDialogDriver::from_file("transcripts.json")?),
//! };
//!
//! let mut executor =
//!     SimulatorExecutor::new(config, "output", collaborators, RunLog::new()).await?;
//! let summary = executor.run_simulation().await?;
//! println!("pass rate: {:.2}", summary.pass_rate);
//! # Ok(())
//! # }
//! ```

use crate::catalogue::{CatalogueArtifact, CatalogueBuilder, CatalogueGenerator};
use crate::config::SimulatorConfig;
use crate::dataset::{Dataset, DatasetGenerator, DatasetManager, DatasetSelector};
use crate::environment::Environment;
use crate::error::{PolicySimError, Result};
use crate::experiment::{ExperimentRun, RunSummary};
use crate::logging::RunLog;
use crate::report::Report;
use crate::scheduler::{BatchScheduler, DialogDriver};
use crate::workspace::{Workspace, WorkspaceHandle};
use chrono::{Local, NaiveDateTime};
use std::path::Path;
use std::sync::Arc;

/// External services a run depends on
#[derive(Clone)]
pub struct Collaborators {
    pub catalogue: Arc<dyn CatalogueGenerator>,
    pub dataset: Arc<dyn DatasetGenerator>,
    pub dialog: Arc<dyn DialogDriver>,
}

/// Runs simulations against one workspace
pub struct SimulatorExecutor {
    config: SimulatorConfig,
    environment: Environment,
    workspace: WorkspaceHandle,
    catalogue: CatalogueArtifact,
    datasets: DatasetManager,
    dataset: Option<Dataset>,
    collaborators: Collaborators,
    run_log: RunLog,
}

impl SimulatorExecutor {
    /// Prepare the workspace under `output_root` and obtain its catalogue.
    ///
    /// The catalogue is generated only when the workspace holds none yet.
    pub async fn new(
        config: SimulatorConfig,
        output_root: impl AsRef<Path>,
        collaborators: Collaborators,
        run_log: RunLog,
    ) -> Result<Self> {
        config.validate()?;
        let environment = Environment::from_config(&config.environment)?;
        let workspace = Workspace::ensure(output_root)?;

        run_log.redirect(workspace.catalogue_log_path())?;
        let catalogue = CatalogueBuilder::new(Arc::new(workspace.catalogue_store()))
            .obtain(
                &workspace,
                &environment,
                &config.catalogue,
                collaborators.catalogue.as_ref(),
            )
            .await?;

        let datasets =
            DatasetManager::for_workspace(&workspace, config.dataset.name_prefix.clone());

        Ok(Self {
            config,
            environment,
            workspace,
            catalogue,
            datasets,
            dataset: None,
            collaborators,
            run_log,
        })
    }

    pub fn workspace(&self) -> &WorkspaceHandle {
        &self.workspace
    }

    pub fn catalogue(&self) -> &CatalogueArtifact {
        &self.catalogue
    }

    /// Currently loaded dataset
    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    /// Resolve `selector` and load the dataset, synthesizing it when the
    /// dataset area has nothing to offer.
    pub async fn load_dataset(&mut self, selector: &DatasetSelector) -> Result<&Dataset> {
        let handle = self.datasets.resolve(selector).await?;
        let dataset = self
            .datasets
            .load_or_generate(
                &handle,
                &self.environment,
                &self.catalogue,
                &self.config.dataset,
                self.collaborators.dataset.as_ref(),
                &self.run_log,
            )
            .await?;

        Ok(self.dataset.insert(dataset))
    }

    /// Run the simulation on the loaded dataset, loading the configured one
    /// first if none is loaded.
    pub async fn run_simulation(&mut self) -> Result<RunSummary> {
        self.run_simulation_at(Local::now().naive_local()).await
    }

    /// Same as [`Self::run_simulation`] with an explicit experiment timestamp
    pub async fn run_simulation_at(&mut self, now: NaiveDateTime) -> Result<RunSummary> {
        if self.dataset.is_none() {
            tracing::info!("No dataset loaded, loading the configured dataset");
            let selector = self.config.dataset.selector();
            self.load_dataset(&selector).await?;
        }
        let dataset = self
            .dataset
            .as_ref()
            .ok_or_else(|| PolicySimError::Other("No dataset loaded".to_string()))?;

        let experiment = ExperimentRun::create(&self.workspace, dataset.name(), now)?;
        self.run_log.redirect(experiment.log_path())?;
        experiment.write_prompt(&self.environment.prompt)?;
        experiment.write_config(&self.config)?;

        let driver = self.collaborators.dialog.as_ref();
        driver.init(experiment.dir()).await?;

        let outcome = BatchScheduler::from_config(&self.config.dialog)?
            .run(dataset.records(), driver)
            .await?;

        let report = Report::from_results(&outcome.results, dataset)?;
        experiment.write_report(&report)?;

        let counts = report.summary();
        let summary = RunSummary {
            experiment_id: experiment.id().to_string(),
            experiment_dir: experiment.dir().to_path_buf(),
            dataset: dataset.name().to_string(),
            batches_planned: outcome.batches_planned,
            batches_run: outcome.batches_run,
            dropped_records: outcome.dropped_records,
            stop_reason: outcome.stop_reason,
            total_cost: outcome.total_cost,
            cost_limit: self.config.dialog.cost_limit,
            rows: counts.rows,
            passed: counts.passed,
            pass_rate: counts.pass_rate,
        };
        experiment.write_summary(&summary)?;

        tracing::info!(
            experiment = %summary.experiment_id,
            rows = summary.rows,
            passed = summary.passed,
            total_cost = summary.total_cost,
            "Experiment finished"
        );
        Ok(summary)
    }
}
