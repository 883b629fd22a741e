//! Run log sink
//!
//! Each pipeline stage writes its log to a stage-scoped file (the catalogue
//! area while building, the dataset area while loading, the experiment
//! directory while running). Rather than mutating a process-wide logger,
//! stages receive a [`RunLog`] handle and call [`RunLog::redirect`].
//!
//! `RunLog` implements [`MakeWriter`], so it can back a `tracing_subscriber`
//! fmt layer:
//!
//! ```rust,no_run
//! use policysim_core::logging::RunLog;
//! use tracing_subscriber::prelude::*;
//!
//! let run_log = RunLog::new();
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer())
//!     .with(
//!         tracing_subscriber::fmt::layer()
//!             .with_ansi(false)
//!             .with_writer(run_log.clone()),
//!     )
//!     .init();
//! ```

use crate::error::{PolicySimError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Default)]
struct Target {
    path: Option<PathBuf>,
    file: Option<File>,
}

/// Cloneable handle to the current log file of a run
#[derive(Clone, Default)]
pub struct RunLog {
    target: Arc<Mutex<Target>>,
}

impl RunLog {
    /// Create a sink with no file attached; writes are discarded until the
    /// first redirect.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the sink at `path`, creating parent directories and appending
    /// to an existing file.
    pub fn redirect(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PolicySimError::workspace(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PolicySimError::workspace(path, e))?;

        let mut target = self.lock();
        if let Some(previous) = target.file.as_mut() {
            let _ = previous.flush();
        }
        target.path = Some(path.to_path_buf());
        target.file = Some(file);
        drop(target);

        tracing::debug!(path = %path.display(), "Run log redirected");
        Ok(())
    }

    /// Current log file, if any
    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Target> {
        // A panic while holding the lock leaves a valid target behind.
        self.target.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("path", &self.current_path())
            .finish()
    }
}

/// Writer handed out to `tracing_subscriber` for each event
pub struct RunLogWriter {
    target: Arc<Mutex<Target>>,
}

impl Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut target = self
            .target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match target.file.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut target = self
            .target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match target.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for RunLog {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter {
            target: Arc::clone(&self.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writes_discarded_without_target() {
        let log = RunLog::new();
        let mut writer = log.make_writer();
        assert_eq!(writer.write(b"dropped").unwrap(), 7);
        assert!(log.current_path().is_none());
    }

    #[test]
    fn test_redirect_switches_file() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("a").join("first.log");
        let second = dir.path().join("second.log");

        let log = RunLog::new();
        log.redirect(&first).unwrap();
        log.make_writer().write_all(b"one\n").unwrap();

        log.redirect(&second).unwrap();
        log.make_writer().write_all(b"two\n").unwrap();

        assert_eq!(log.current_path(), Some(second.clone()));
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "one\n");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "two\n");
    }

    #[test]
    fn test_redirect_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, "existing\n").unwrap();

        let log = RunLog::new();
        log.redirect(&path).unwrap();
        log.make_writer().write_all(b"more\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "existing\nmore\n");
    }

    #[test]
    fn test_clones_share_target() {
        let dir = TempDir::new().unwrap();
        let log = RunLog::new();
        let clone = log.clone();
        log.redirect(dir.path().join("shared.log")).unwrap();
        assert_eq!(clone.current_path(), log.current_path());
    }
}
