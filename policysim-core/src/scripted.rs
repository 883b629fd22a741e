//! File-backed collaborators
//!
//! Deterministic implementations of the collaborator traits that replay
//! prepared data instead of calling a model. They back the CLI and offline
//! evaluation runs: a catalogue read from a file, scenarios read from a file,
//! and conversations replayed from recorded transcripts.
//!
//! Files are JSON unless the extension is `.yaml` or `.yml`.

use crate::catalogue::{CatalogueArtifact, CatalogueGenerator, Policy, PolicyEdge};
use crate::config::{CatalogueConfig, DatasetConfig};
use crate::dataset::{DatasetGenerator, ScenarioRecord};
use crate::environment::Environment;
use crate::error::{PolicySimError, Result};
use crate::scheduler::{BatchResult, BatchRun, DialogDriver};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

fn read_structured<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read(path).map_err(|e| PolicySimError::workspace(path, e))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_slice(&contents)?),
        _ => Ok(serde_json::from_slice(&contents)?),
    }
}

/// Policy graph as written by hand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogueFile {
    #[serde(default)]
    pub policies: Vec<Policy>,
    #[serde(default)]
    pub edges: Vec<PolicyEdge>,
}

/// Catalogue generator returning a fixed policy graph
#[derive(Debug, Clone, Default)]
pub struct StaticCatalogueGenerator {
    graph: CatalogueFile,
}

impl StaticCatalogueGenerator {
    pub fn new(graph: CatalogueFile) -> Self {
        Self { graph }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(read_structured(path.as_ref())?))
    }
}

#[async_trait]
impl CatalogueGenerator for StaticCatalogueGenerator {
    async fn generate(
        &self,
        environment: &Environment,
        _config: &CatalogueConfig,
    ) -> Result<CatalogueArtifact> {
        if self.graph.policies.is_empty() {
            return Err(PolicySimError::collaborator(
                "policy graph is empty; nothing to build a catalogue from",
            ));
        }

        let mut artifact = CatalogueArtifact::new(environment.name.clone());
        artifact.policies = self.graph.policies.clone();
        artifact.edges = self.graph.edges.clone();
        Ok(artifact)
    }
}

/// A scenario before it is numbered into a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub scenario: String,
    pub expected_behaviour: String,
    #[serde(default)]
    pub challenge_level: u32,
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Dataset generator drawing scenarios from a prepared list
#[derive(Debug, Clone, Default)]
pub struct RecordFileDatasetGenerator {
    scenarios: Vec<ScenarioSpec>,
}

impl RecordFileDatasetGenerator {
    pub fn new(scenarios: Vec<ScenarioSpec>) -> Self {
        Self { scenarios }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(read_structured(path.as_ref())?))
    }
}

#[async_trait]
impl DatasetGenerator for RecordFileDatasetGenerator {
    /// Takes the first `num_samples` scenarios and numbers them from 1
    async fn generate(
        &self,
        _environment: &Environment,
        catalogue: &CatalogueArtifact,
        config: &DatasetConfig,
    ) -> Result<Vec<ScenarioRecord>> {
        if self.scenarios.is_empty() {
            return Err(PolicySimError::collaborator(
                "no scenarios available to synthesize a dataset",
            ));
        }

        let records: Vec<ScenarioRecord> = self
            .scenarios
            .iter()
            .take(config.num_samples)
            .enumerate()
            .map(|(index, spec)| {
                ScenarioRecord::new(
                    index + 1,
                    spec.scenario.clone(),
                    spec.expected_behaviour.clone(),
                    spec.challenge_level,
                    spec.policies.clone(),
                )
            })
            .collect();

        if !catalogue.policies.is_empty() {
            for record in &records {
                for policy in &record.description.policies {
                    if catalogue.policy(policy).is_none() {
                        tracing::warn!(
                            event_id = record.event_id,
                            policy = %policy,
                            "Scenario references a policy missing from the catalogue"
                        );
                    }
                }
            }
        }

        if records.len() < config.num_samples {
            tracing::warn!(
                requested = config.num_samples,
                available = records.len(),
                "Fewer scenarios available than requested"
            );
        }
        Ok(records)
    }
}

/// A recorded conversation for one scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub event_id: usize,
    #[serde(default)]
    pub thread_id: Option<String>,
    pub user_messages: Vec<String>,
    #[serde(default)]
    pub user_thoughts: Vec<String>,
    #[serde(default)]
    pub cost: f64,
}

/// Dialogue driver replaying recorded transcripts keyed by event id
#[derive(Debug, Clone, Default)]
pub struct ScriptedDialogDriver {
    transcripts: HashMap<usize, Transcript>,
}

impl ScriptedDialogDriver {
    /// Later transcripts for the same event id replace earlier ones
    pub fn new(transcripts: impl IntoIterator<Item = Transcript>) -> Self {
        Self {
            transcripts: transcripts.into_iter().map(|t| (t.event_id, t)).collect(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let transcripts: Vec<Transcript> = read_structured(path.as_ref())?;
        Ok(Self::new(transcripts))
    }

    pub fn len(&self) -> usize {
        self.transcripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcripts.is_empty()
    }
}

#[async_trait]
impl DialogDriver for ScriptedDialogDriver {
    async fn init(&self, experiment_dir: &Path) -> Result<()> {
        tracing::debug!(
            dir = %experiment_dir.display(),
            transcripts = self.transcripts.len(),
            "Scripted dialogue ready"
        );
        Ok(())
    }

    async fn run_batch(&self, records: &[ScenarioRecord]) -> Result<BatchRun> {
        let mut run = BatchRun::default();
        for record in records {
            let transcript = self.transcripts.get(&record.event_id).ok_or_else(|| {
                PolicySimError::collaborator(format!(
                    "no transcript recorded for event {}",
                    record.event_id
                ))
            })?;

            run.cost += transcript.cost;
            run.results.push(BatchResult {
                event_id: record.event_id,
                thread_id: transcript
                    .thread_id
                    .clone()
                    .unwrap_or_else(|| format!("thread-{}", record.event_id)),
                user_messages: transcript.user_messages.clone(),
                user_thoughts: transcript.user_thoughts.clone(),
                cost: transcript.cost,
            });
        }
        Ok(run)
    }
}
