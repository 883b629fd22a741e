//! Name-addressed artifact storage
//!
//! Catalogues and datasets are persisted through the [`ArtifactStore`]
//! capability so that checkpointing can be exercised against an in-memory
//! store in tests and a directory on disk in real runs.

use crate::error::{PolicySimError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Interval between attempts to take a held file lock
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Payload of a lock file, naming the process that holds it
#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// Whether a process is still running, `None` where that cannot be told
#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> Option<bool> {
    if pid == std::process::id() {
        return Some(true);
    }
    Some(Path::new("/proc").join(pid.to_string()).exists())
}

#[cfg(not(target_os = "linux"))]
fn process_alive(pid: u32) -> Option<bool> {
    (pid == std::process::id()).then_some(true)
}

fn older_than(age: chrono::TimeDelta, limit: Duration) -> bool {
    age.to_std().is_ok_and(|age| age > limit)
}

/// Contents of a lock file whose owner no longer holds it.
///
/// A lock is stale when its owning process has exited or, where liveness is
/// unknown, when it was acquired more than `timeout` ago. A lock file without
/// a readable payload is stale once it is older than `timeout`.
async fn stale_lock_contents(path: &Path, timeout: Duration) -> Option<Vec<u8>> {
    let contents = tokio::fs::read(path).await.ok()?;
    let stale = match serde_json::from_slice::<LockOwner>(&contents) {
        Ok(owner) => match process_alive(owner.pid) {
            Some(alive) => !alive,
            None => older_than(Utc::now() - owner.acquired_at, timeout),
        },
        Err(_) => {
            let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
            modified.elapsed().is_ok_and(|age| age > timeout)
        }
    };
    stale.then_some(contents)
}

/// Trait for artifact storage backends
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether an artifact with this name exists
    async fn has(&self, key: &str) -> Result<bool>;

    /// Read an artifact, `None` if absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an artifact, replacing any previous content atomically
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Names of all stored artifacts, sorted
    async fn list(&self) -> Result<Vec<String>>;

    /// Take the exclusive build lock for `key`, waiting at most `timeout`
    async fn lock(&self, key: &str, timeout: Duration) -> Result<BuildLock>;
}

/// Exclusive build lock, released on drop
#[derive(Debug)]
pub struct BuildLock {
    path: Option<PathBuf>,
    _guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key == "."
        || key == ".."
        || key.starts_with('.')
        || key.contains(['/', '\\'])
    {
        return Err(PolicySimError::Configuration(format!(
            "Invalid artifact name: '{}'",
            key
        )));
    }
    Ok(())
}

/// Directory-backed store: each artifact is `<dir>/<key>.<extension>`
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
    extension: String,
}

impl FsArtifactStore {
    /// Create a store over an existing directory
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    /// Directory holding the artifacts
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path an artifact is stored at
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, self.extension))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!(".{}.lock", key))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn has(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp.{}.{}",
            key,
            self.extension,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));

        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let suffix = format!(".{}", self.extension);
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if let Some(stem) = file_name.strip_suffix(&suffix) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn lock(&self, key: &str, timeout: Duration) -> Result<BuildLock> {
        validate_key(key)?;
        let path = self.lock_path(key);
        let started = Instant::now();

        loop {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let payload = serde_json::to_vec(&LockOwner::current())?;
                    let _ = file.write_all(&payload).await;
                    let _ = file.sync_all().await;
                    return Ok(BuildLock {
                        path: Some(path),
                        _guard: None,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(contents) = stale_lock_contents(&path, timeout).await {
                        // Only remove the lock that was judged stale, not one
                        // another waiter has taken since.
                        let unchanged = tokio::fs::read(&path)
                            .await
                            .is_ok_and(|current| current == contents);
                        if unchanged && tokio::fs::remove_file(&path).await.is_ok() {
                            tracing::warn!(
                                lock = %path.display(),
                                "Removed stale build lock left by an interrupted run"
                            );
                            continue;
                        }
                    }
                    if started.elapsed() >= timeout {
                        return Err(PolicySimError::LockTimeout(path.display().to_string()));
                    }
                    tracing::debug!(lock = %path.display(), "Build lock held, waiting");
                    tokio::time::sleep(LOCK_POLL_INTERVAL.min(timeout)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// In-memory store for tests and ephemeral runs
#[derive(Default)]
pub struct InMemoryArtifactStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl InMemoryArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn has(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.entries.read().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.entries.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn lock(&self, key: &str, timeout: Duration) -> Result<BuildLock> {
        validate_key(key)?;
        let mutex = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };

        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| PolicySimError::LockTimeout(key.to_string()))?;

        Ok(BuildLock {
            path: None,
            _guard: Some(guard),
        })
    }
}
