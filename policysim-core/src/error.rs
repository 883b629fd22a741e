//! Error types for policysim operations

use std::path::PathBuf;

/// Result type for policysim operations
pub type Result<T> = std::result::Result<T, PolicySimError>;

/// Error types for the simulation pipeline
#[derive(Debug, thiserror::Error)]
pub enum PolicySimError {
    /// Workspace area could not be created or inspected
    #[error("Workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Named dataset does not exist in the dataset area
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    /// An external collaborator (generator or dialogue driver) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Experiment directory already exists
    #[error("Experiment already exists: {}", .0.display())]
    ExperimentExists(PathBuf),

    /// Result references a scenario id outside the dataset
    #[error("Scenario id {event_id} out of range for dataset of {len} records")]
    ScenarioOutOfRange { event_id: usize, len: usize },

    /// Result carries no user messages to score
    #[error("Conversation for scenario {event_id} has no user messages")]
    EmptyConversation { event_id: usize },

    /// Persisted artifact was written with an unknown schema version
    #[error("Unsupported {artifact} schema version {found} (expected {expected})")]
    UnsupportedSchema {
        artifact: &'static str,
        found: u32,
        expected: u32,
    },

    /// Dataset records do not form a dense, 1-based id sequence
    #[error("Invalid dataset '{name}': {reason}")]
    InvalidDataset { name: String, reason: String },

    /// Build lock was not released in time
    #[error("Timed out waiting for build lock: {0}")]
    LockTimeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PolicySimError {
    /// Wrap an IO error with the workspace path it occurred on
    pub fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PolicySimError::Workspace {
            path: path.into(),
            source,
        }
    }

    /// Convenience constructor for collaborator failures
    pub fn collaborator(message: impl std::fmt::Display) -> Self {
        PolicySimError::Collaborator(message.to_string())
    }
}
