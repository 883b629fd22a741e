//! On-disk layout of a simulation workspace
//!
//! ```text
//! <root>/
//!   catalogue/      catalogue.json, catalogue.log
//!   datasets/       <name>__<DD_MM_YYYY_HH_MM_SS>.json, dataset.log
//!   experiments/    <dataset>__<DD_MM_YYYY_HH_MM_SS>/
//! ```

use crate::error::{PolicySimError, Result};
use crate::store::FsArtifactStore;
use std::path::{Path, PathBuf};

/// Catalogue sub-area
pub const CATALOGUE_DIR: &str = "catalogue";

/// Dataset sub-area
pub const DATASETS_DIR: &str = "datasets";

/// Experiments sub-area
pub const EXPERIMENTS_DIR: &str = "experiments";

/// Well-known name of the catalogue artifact
pub const CATALOGUE_KEY: &str = "catalogue";

/// File extension of persisted catalogue and dataset artifacts
pub const ARTIFACT_EXTENSION: &str = "json";

/// Workspace manager
pub struct Workspace;

impl Workspace {
    /// Make sure the root and its three sub-areas exist.
    ///
    /// Existing directories are left untouched, so calling this repeatedly
    /// performs no writes after the first call.
    ///
    /// # Errors
    ///
    /// Returns [`PolicySimError::Workspace`] if a directory cannot be
    /// created, e.g. because of permissions or a file in the way.
    pub fn ensure(root: impl AsRef<Path>) -> Result<WorkspaceHandle> {
        let root = root.as_ref().to_path_buf();
        let handle = WorkspaceHandle {
            catalogue_dir: root.join(CATALOGUE_DIR),
            datasets_dir: root.join(DATASETS_DIR),
            experiments_dir: root.join(EXPERIMENTS_DIR),
            root,
            catalogue_cached: false,
        };

        for dir in [
            &handle.root,
            &handle.catalogue_dir,
            &handle.datasets_dir,
            &handle.experiments_dir,
        ] {
            ensure_dir(dir)?;
        }

        let catalogue_path = handle.catalogue_store().path_for(CATALOGUE_KEY);
        let catalogue_cached = catalogue_path.is_file();

        tracing::debug!(
            root = %handle.root.display(),
            catalogue_cached,
            "Workspace ready"
        );

        Ok(WorkspaceHandle {
            catalogue_cached,
            ..handle
        })
    }
}

fn ensure_dir(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| PolicySimError::workspace(dir, e))
}

/// Resolved workspace layout
#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    root: PathBuf,
    catalogue_dir: PathBuf,
    datasets_dir: PathBuf,
    experiments_dir: PathBuf,
    catalogue_cached: bool,
}

impl WorkspaceHandle {
    /// Workspace root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Catalogue area
    pub fn catalogue_dir(&self) -> &Path {
        &self.catalogue_dir
    }

    /// Dataset area
    pub fn datasets_dir(&self) -> &Path {
        &self.datasets_dir
    }

    /// Experiments area
    pub fn experiments_dir(&self) -> &Path {
        &self.experiments_dir
    }

    /// Whether a catalogue artifact was present when the workspace was ensured
    pub fn catalogue_cached(&self) -> bool {
        self.catalogue_cached
    }

    /// Store over the catalogue area
    pub fn catalogue_store(&self) -> FsArtifactStore {
        FsArtifactStore::new(&self.catalogue_dir, ARTIFACT_EXTENSION)
    }

    /// Store over the dataset area
    pub fn dataset_store(&self) -> FsArtifactStore {
        FsArtifactStore::new(&self.datasets_dir, ARTIFACT_EXTENSION)
    }

    /// Log file used while building or loading the catalogue
    pub fn catalogue_log_path(&self) -> PathBuf {
        self.catalogue_dir.join("catalogue.log")
    }

    /// Log file used while resolving and loading datasets
    pub fn dataset_log_path(&self) -> PathBuf {
        self.datasets_dir.join("dataset.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_creates_layout() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("out");

        let handle = Workspace::ensure(&root).unwrap();

        assert!(root.join(CATALOGUE_DIR).is_dir());
        assert!(root.join(DATASETS_DIR).is_dir());
        assert!(root.join(EXPERIMENTS_DIR).is_dir());
        assert!(!handle.catalogue_cached());
        assert_eq!(handle.root(), root.as_path());
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let first = Workspace::ensure(dir.path()).unwrap();
        let modified = std::fs::metadata(first.datasets_dir())
            .unwrap()
            .modified()
            .unwrap();

        let second = Workspace::ensure(dir.path()).unwrap();

        assert_eq!(first.catalogue_cached(), second.catalogue_cached());
        assert_eq!(
            std::fs::metadata(second.datasets_dir())
                .unwrap()
                .modified()
                .unwrap(),
            modified
        );
    }

    #[test]
    fn test_reports_existing_catalogue() {
        let dir = TempDir::new().unwrap();
        let handle = Workspace::ensure(dir.path()).unwrap();
        std::fs::write(handle.catalogue_dir().join("catalogue.json"), "{}").unwrap();

        let handle = Workspace::ensure(dir.path()).unwrap();
        assert!(handle.catalogue_cached());
        assert!(Workspace::ensure(dir.path()).unwrap().catalogue_cached());
    }

    #[test]
    fn test_file_in_the_way_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(DATASETS_DIR), "not a dir").unwrap();

        let err = Workspace::ensure(dir.path()).unwrap_err();
        assert!(matches!(err, PolicySimError::Workspace { .. }));
    }
}
