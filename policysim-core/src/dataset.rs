//! Scenario datasets and their lifecycle
//!
//! Datasets are stored in the workspace dataset area under names of the form
//! `<prefix>__<DD_MM_YYYY_HH_MM_SS>`. Resolving `latest` picks the name whose
//! embedded timestamp is greatest in calendar order; when the area holds no
//! dataset a new name is reserved and the dataset is synthesized by a
//! [`DatasetGenerator`] on load.

use crate::catalogue::CatalogueArtifact;
use crate::config::DatasetConfig;
use crate::environment::Environment;
use crate::error::{PolicySimError, Result};
use crate::logging::RunLog;
use crate::store::ArtifactStore;
use crate::workspace::WorkspaceHandle;
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Current dataset format version
pub const DATASET_SCHEMA_VERSION: u32 = 1;

/// Timestamp layout embedded in dataset and experiment names
pub const TIMESTAMP_FORMAT: &str = "%d_%m_%Y_%H_%M_%S";

/// Selector value meaning "most recent dataset"
pub const LATEST: &str = "latest";

static STAMPED_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>.+)__(?P<stamp>\d{2}_\d{2}_\d{4}_\d{2}_\d{2}_\d{2})$")
        .expect("valid dataset name pattern")
});

/// Format a timestamp the way run and dataset names embed it
pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `<prefix>__<DD_MM_YYYY_HH_MM_SS>`
pub fn stamped_name(prefix: &str, at: NaiveDateTime) -> String {
    format!("{}__{}", prefix, format_timestamp(at))
}

/// Extract the creation timestamp embedded in a name, if it has one
pub fn parse_stamped_name(name: &str) -> Option<NaiveDateTime> {
    let captures = STAMPED_NAME.captures(name)?;
    NaiveDateTime::parse_from_str(&captures["stamp"], TIMESTAMP_FORMAT).ok()
}

/// What a scenario is meant to exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioDescription {
    /// How the agent is expected to behave
    pub expected_behaviour: String,

    /// Difficulty of the scenario
    pub challenge_level: u32,

    /// Policies the scenario exercises
    #[serde(default)]
    pub policies: Vec<String>,
}

/// One test scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    /// 1-based position in the dataset
    pub event_id: usize,

    /// Scenario given to the simulated user
    pub scenario: String,

    /// Expectations for the scenario
    pub description: ScenarioDescription,
}

impl ScenarioRecord {
    pub fn new(
        event_id: usize,
        scenario: impl Into<String>,
        expected_behaviour: impl Into<String>,
        challenge_level: u32,
        policies: Vec<String>,
    ) -> Self {
        Self {
            event_id,
            scenario: scenario.into(),
            description: ScenarioDescription {
                expected_behaviour: expected_behaviour.into(),
                challenge_level,
                policies,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DatasetArtifact {
    schema_version: u32,
    name: String,
    records: Vec<ScenarioRecord>,
}

/// An ordered, immutable collection of scenario records
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    name: String,
    records: Vec<ScenarioRecord>,
}

impl Dataset {
    /// Create a dataset, checking that event ids are dense and 1-based
    pub fn new(name: impl Into<String>, records: Vec<ScenarioRecord>) -> Result<Self> {
        let name = name.into();
        if let Some((index, record)) = records
            .iter()
            .enumerate()
            .find(|(index, record)| record.event_id != index + 1)
        {
            return Err(PolicySimError::InvalidDataset {
                reason: format!(
                    "record at position {} has event_id {}",
                    index + 1,
                    record.event_id
                ),
                name,
            });
        }
        Ok(Self { name, records })
    }

    /// A named dataset with no records yet
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn records(&self) -> &[ScenarioRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record for a 1-based event id
    pub fn record(&self, event_id: usize) -> Result<&ScenarioRecord> {
        event_id
            .checked_sub(1)
            .and_then(|index| self.records.get(index))
            .ok_or(PolicySimError::ScenarioOutOfRange {
                event_id,
                len: self.records.len(),
            })
    }

    /// Serialize for persistence
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let artifact = DatasetArtifact {
            schema_version: DATASET_SCHEMA_VERSION,
            name: self.name.clone(),
            records: self.records.clone(),
        };
        Ok(serde_json::to_vec_pretty(&artifact)?)
    }

    /// Deserialize a persisted dataset. The stored name is replaced by the
    /// name the artifact was looked up under.
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self> {
        let artifact: DatasetArtifact = serde_json::from_slice(bytes)?;
        if artifact.schema_version != DATASET_SCHEMA_VERSION {
            return Err(PolicySimError::UnsupportedSchema {
                artifact: "dataset",
                found: artifact.schema_version,
                expected: DATASET_SCHEMA_VERSION,
            });
        }
        Self::new(name, artifact.records)
    }
}

/// Which dataset a run should use
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetSelector {
    /// A dataset name, used verbatim
    Named(String),
    /// The most recent dataset, or a fresh one if none exists
    Latest,
    /// No preference; resolved like [`DatasetSelector::Latest`]
    Absent,
}

impl DatasetSelector {
    /// Interpret a configured or command-line selector
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None => DatasetSelector::Absent,
            Some(v) if v == LATEST => DatasetSelector::Latest,
            Some(v) => DatasetSelector::Named(v.to_string()),
        }
    }
}

/// A resolved dataset name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    name: String,
    fresh: bool,
}

impl DatasetHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the name was just reserved and nothing is stored under it
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

/// Dataset listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    pub name: String,
    pub created_at: Option<NaiveDateTime>,
}

/// Synthesizes scenario records against a catalogue
#[async_trait]
pub trait DatasetGenerator: Send + Sync {
    async fn generate(
        &self,
        environment: &Environment,
        catalogue: &CatalogueArtifact,
        config: &DatasetConfig,
    ) -> Result<Vec<ScenarioRecord>>;
}

/// Resolves, loads and synthesizes datasets
pub struct DatasetManager {
    store: Arc<dyn ArtifactStore>,
    log_path: PathBuf,
    name_prefix: String,
}

impl DatasetManager {
    /// Create a manager over a dataset store
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        log_path: impl Into<PathBuf>,
        name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            log_path: log_path.into(),
            name_prefix: name_prefix.into(),
        }
    }

    /// Manager over the dataset area of a workspace
    pub fn for_workspace(workspace: &WorkspaceHandle, name_prefix: impl Into<String>) -> Self {
        Self::new(
            Arc::new(workspace.dataset_store()),
            workspace.dataset_log_path(),
            name_prefix,
        )
    }

    /// Resolve a selector against the current time
    pub async fn resolve(&self, selector: &DatasetSelector) -> Result<DatasetHandle> {
        self.resolve_at(selector, Local::now().naive_local()).await
    }

    /// Resolve a selector, reserving a name stamped with `now` if needed
    pub async fn resolve_at(
        &self,
        selector: &DatasetSelector,
        now: NaiveDateTime,
    ) -> Result<DatasetHandle> {
        match selector {
            DatasetSelector::Named(name) => Ok(DatasetHandle {
                name: name.clone(),
                fresh: false,
            }),
            DatasetSelector::Latest | DatasetSelector::Absent => {
                match self.list().await?.into_iter().find(|e| e.created_at.is_some()) {
                    Some(entry) => {
                        tracing::info!(dataset = %entry.name, "Resolved latest dataset");
                        Ok(DatasetHandle {
                            name: entry.name,
                            fresh: false,
                        })
                    }
                    None => {
                        let name = stamped_name(&self.name_prefix, now);
                        tracing::info!(dataset = %name, "No dataset found, reserving a new name");
                        Ok(DatasetHandle { name, fresh: true })
                    }
                }
            }
        }
    }

    /// All stored datasets, newest first; names without a timestamp last
    pub async fn list(&self) -> Result<Vec<DatasetEntry>> {
        let mut entries: Vec<DatasetEntry> = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|name| DatasetEntry {
                created_at: parse_stamped_name(&name),
                name,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });
        Ok(entries)
    }

    /// Load a resolved dataset.
    ///
    /// Redirects the run log to the dataset log first. A freshly reserved
    /// name yields an empty dataset.
    ///
    /// # Errors
    ///
    /// Returns [`PolicySimError::DatasetNotFound`] if nothing is stored under
    /// a non-fresh name.
    pub async fn load(&self, handle: &DatasetHandle, run_log: &RunLog) -> Result<Dataset> {
        run_log.redirect(&self.log_path)?;

        if handle.fresh && !self.store.has(&handle.name).await? {
            return Ok(Dataset::empty(&handle.name));
        }

        let bytes = self
            .store
            .get(&handle.name)
            .await?
            .ok_or_else(|| PolicySimError::DatasetNotFound(handle.name.clone()))?;
        let dataset = Dataset::from_bytes(&handle.name, &bytes)?;

        tracing::info!(dataset = %dataset.name(), records = dataset.len(), "Loaded dataset");
        Ok(dataset)
    }

    /// Load a dataset, synthesizing and persisting it first when the handle
    /// is a fresh reservation.
    pub async fn load_or_generate(
        &self,
        handle: &DatasetHandle,
        environment: &Environment,
        catalogue: &CatalogueArtifact,
        config: &DatasetConfig,
        generator: &dyn DatasetGenerator,
        run_log: &RunLog,
    ) -> Result<Dataset> {
        let dataset = self.load(handle, run_log).await?;
        if !handle.fresh || !dataset.is_empty() {
            return Ok(dataset);
        }

        tracing::info!(
            dataset = %handle.name,
            num_samples = config.num_samples,
            "Generating dataset"
        );
        let records = generator.generate(environment, catalogue, config).await?;
        let dataset = Dataset::new(&handle.name, records).map_err(|e| {
            PolicySimError::collaborator(format!("Invalid generated dataset: {}", e))
        })?;

        self.store.put(&handle.name, &dataset.to_bytes()?).await?;
        tracing::info!(dataset = %dataset.name(), records = dataset.len(), "Dataset saved");
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryArtifactStore;
    use crate::workspace::Workspace;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn at(day: u32, month: u32, year: i32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn records(n: usize) -> Vec<ScenarioRecord> {
        (1..=n)
            .map(|i| {
                ScenarioRecord::new(
                    i,
                    format!("scenario {}", i),
                    "agent follows policy",
                    (i % 3) as u32,
                    vec!["refund".to_string()],
                )
            })
            .collect()
    }

    async fn seeded(names: &[&str]) -> (TempDir, Arc<InMemoryArtifactStore>, DatasetManager) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryArtifactStore::new());
        for name in names {
            let dataset = Dataset::new(*name, records(2)).unwrap();
            store.put(name, &dataset.to_bytes().unwrap()).await.unwrap();
        }
        let manager = DatasetManager::new(store.clone(), dir.path().join("dataset.log"), "dataset");
        (dir, store, manager)
    }

    struct StaticGenerator {
        calls: AtomicUsize,
        records: Vec<ScenarioRecord>,
    }

    #[async_trait]
    impl DatasetGenerator for StaticGenerator {
        async fn generate(
            &self,
            _: &Environment,
            _: &CatalogueArtifact,
            _: &DatasetConfig,
        ) -> Result<Vec<ScenarioRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.records.clone())
        }
    }

    #[test]
    fn test_parse_stamped_name() {
        assert_eq!(
            parse_stamped_name("d__02_01_2024_09_00_00"),
            Some(at(2, 1, 2024, 9, 0, 0))
        );
        assert_eq!(
            parse_stamped_name("retail__v2__31_12_2023_23_59_59"),
            Some(at(31, 12, 2023, 23, 59, 59))
        );
        assert_eq!(parse_stamped_name("dataset"), None);
        assert_eq!(parse_stamped_name("d__32_01_2024_09_00_00"), None);
        assert_eq!(
            stamped_name("dataset", at(5, 3, 2024, 7, 8, 9)),
            "dataset__05_03_2024_07_08_09"
        );
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(DatasetSelector::parse(None), DatasetSelector::Absent);
        assert_eq!(DatasetSelector::parse(Some(" latest ")), DatasetSelector::Latest);
        assert_eq!(
            DatasetSelector::parse(Some("LATEST")),
            DatasetSelector::Named("LATEST".to_string())
        );
        assert_eq!(
            DatasetSelector::parse(Some("d__01_01_2024_10_00_00")),
            DatasetSelector::Named("d__01_01_2024_10_00_00".to_string())
        );
    }

    #[tokio::test]
    async fn test_latest_uses_calendar_order() {
        let (_dir, _, manager) =
            seeded(&["d__01_01_2024_10_00_00", "d__02_01_2024_09_00_00"]).await;

        let handle = manager.resolve(&DatasetSelector::Latest).await.unwrap();

        assert_eq!(handle.name(), "d__02_01_2024_09_00_00");
        assert!(!handle.is_fresh());
    }

    #[tokio::test]
    async fn test_latest_across_years() {
        let (_dir, _, manager) =
            seeded(&["d__31_12_2023_23_00_00", "d__01_01_2024_00_00_01"]).await;
        let handle = manager.resolve(&DatasetSelector::Absent).await.unwrap();
        assert_eq!(handle.name(), "d__01_01_2024_00_00_01");
    }

    #[tokio::test]
    async fn test_empty_area_reserves_name() {
        let (_dir, store, manager) = seeded(&[]).await;
        let now = at(9, 10, 2024, 14, 30, 0);

        let handle = manager
            .resolve_at(&DatasetSelector::Latest, now)
            .await
            .unwrap();

        assert_eq!(handle.name(), "dataset__09_10_2024_14_30_00");
        assert!(handle.is_fresh());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unstamped_names_are_not_latest() {
        let (_dir, _, manager) = seeded(&["handmade"]).await;
        let handle = manager.resolve(&DatasetSelector::Latest).await.unwrap();
        assert!(handle.is_fresh());

        let listed = manager.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].created_at, None);
    }

    #[tokio::test]
    async fn test_named_used_verbatim_and_missing_is_error() {
        let (_dir, _, manager) = seeded(&["d__01_01_2024_10_00_00"]).await;
        let handle = manager
            .resolve(&DatasetSelector::Named("nope".to_string()))
            .await
            .unwrap();
        assert_eq!(handle.name(), "nope");

        let err = manager.load(&handle, &RunLog::new()).await.unwrap_err();
        assert!(matches!(err, PolicySimError::DatasetNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_load_redirects_run_log() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::ensure(dir.path()).unwrap();
        let manager = DatasetManager::for_workspace(&workspace, "dataset");
        let run_log = RunLog::new();

        let handle = manager.resolve(&DatasetSelector::Latest).await.unwrap();
        let dataset = manager.load(&handle, &run_log).await.unwrap();

        assert!(dataset.is_empty());
        assert_eq!(run_log.current_path(), Some(workspace.dataset_log_path()));
        assert!(workspace.dataset_log_path().is_file());
    }

    #[tokio::test]
    async fn test_load_or_generate_persists_fresh_dataset() {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::ensure(dir.path()).unwrap();
        let manager = DatasetManager::for_workspace(&workspace, "retail");
        let generator = StaticGenerator {
            calls: AtomicUsize::new(0),
            records: records(3),
        };
        let env = Environment::new("retail", "prompt");
        let catalogue = CatalogueArtifact::new("retail");
        let config = DatasetConfig::default();

        let handle = manager.resolve(&DatasetSelector::Latest).await.unwrap();
        let dataset = manager
            .load_or_generate(&handle, &env, &catalogue, &config, &generator, &RunLog::new())
            .await
            .unwrap();
        assert_eq!(dataset.len(), 3);
        assert!(workspace.dataset_store().path_for(handle.name()).is_file());

        let again = manager.resolve(&DatasetSelector::Latest).await.unwrap();
        assert_eq!(again.name(), handle.name());
        let reloaded = manager
            .load_or_generate(&again, &env, &catalogue, &config, &generator, &RunLog::new())
            .await
            .unwrap();
        assert_eq!(reloaded, dataset);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generated_ids_must_be_dense() {
        let (_dir, store, manager) = seeded(&[]).await;
        let mut bad = records(2);
        bad[1].event_id = 5;
        let generator = StaticGenerator {
            calls: AtomicUsize::new(0),
            records: bad,
        };

        let handle = manager.resolve(&DatasetSelector::Latest).await.unwrap();
        let err = manager
            .load_or_generate(
                &handle,
                &Environment::new("retail", "p"),
                &CatalogueArtifact::new("retail"),
                &DatasetConfig::default(),
                &generator,
                &RunLog::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PolicySimError::Collaborator(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_non_dense_ids_are_invalid() {
        let mut gapped = records(3);
        gapped.remove(1);
        let err = Dataset::new("d", gapped.clone()).unwrap_err();
        assert!(matches!(
            err,
            PolicySimError::InvalidDataset { ref name, ref reason }
                if name == "d" && reason.contains("position 2 has event_id 3")
        ));

        let bytes = Dataset {
            name: "d".to_string(),
            records: gapped,
        }
        .to_bytes()
        .unwrap();
        assert!(matches!(
            Dataset::from_bytes("d", &bytes),
            Err(PolicySimError::InvalidDataset { .. })
        ));
    }

    #[test]
    fn test_record_lookup_is_one_based() {
        let dataset = Dataset::new("d", records(2)).unwrap();
        assert_eq!(dataset.record(1).unwrap().scenario, "scenario 1");
        assert!(matches!(
            dataset.record(0),
            Err(PolicySimError::ScenarioOutOfRange { event_id: 0, len: 2 })
        ));
        assert!(dataset.record(3).is_err());
    }
}
