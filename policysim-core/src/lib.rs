//! # policysim - Policy-driven simulation for conversational agents
//!
//! policysim evaluates a conversational agent by replaying synthesized
//! scenarios against it and scoring each conversation:
//! - Checkpointed policy catalogue, built once per workspace
//! - Timestamped scenario datasets with "latest" resolution
//! - Cost-bounded, batched execution of dialogues
//! - Flat CSV report per experiment
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use policysim_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = SimulatorConfig::load()?;
//!     let collaborators = Collaborators {
//!         catalogue: Arc::new(StaticCatalogueGenerator::from_file("policies.json")?),
//!         dataset: Arc::new(RecordFileDatasetGenerator::from_file("scenarios.json")?),
//!         dialog: Arc::new(ScriptedDialogDriver::from_file("transcripts.json")?),
//!     };
//!
//!     let mut executor =
//!         SimulatorExecutor::new(config, "output", collaborators, RunLog::new()).await?;
//!     let summary = executor.run_simulation().await?;
//!     println!("{} rows, {} passed", summary.rows, summary.passed);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! The pipeline delegates every model-backed step to a collaborator trait:
//! - [`catalogue::CatalogueGenerator`] derives the policy graph
//! - [`dataset::DatasetGenerator`] synthesizes scenario records
//! - [`scheduler::DialogDriver`] runs the conversations
//!
//! The [`scripted`] module provides file-backed implementations of all three.

pub mod catalogue;
pub mod config;
pub mod dataset;
pub mod environment;
pub mod error;
pub mod executor;
pub mod experiment;
pub mod logging;
pub mod report;
pub mod scheduler;
pub mod scripted;
pub mod store;
pub mod workspace;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::catalogue::{
        CatalogueArtifact, CatalogueBuilder, CatalogueGenerator, Policy, PolicyEdge,
    };
    pub use crate::config::{
        CatalogueConfig, DatasetConfig, DialogConfig, EnvironmentConfig, SimulatorConfig,
    };
    pub use crate::dataset::{
        Dataset, DatasetEntry, DatasetGenerator, DatasetHandle, DatasetManager, DatasetSelector,
        ScenarioDescription, ScenarioRecord,
    };
    pub use crate::environment::Environment;
    pub use crate::error::{PolicySimError, Result};
    pub use crate::executor::{Collaborators, SimulatorExecutor};
    pub use crate::experiment::{ExperimentRun, RunSummary};
    pub use crate::logging::RunLog;
    pub use crate::report::{Report, ReportRow, ReportSummary, analyze};
    pub use crate::scheduler::{
        BatchResult, BatchRun, BatchScheduler, DialogDriver, ScheduleOutcome, StopReason,
    };
    pub use crate::scripted::{
        RecordFileDatasetGenerator, ScriptedDialogDriver, StaticCatalogueGenerator,
    };
    pub use crate::store::{ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
    pub use crate::workspace::{Workspace, WorkspaceHandle};
}
