//! Durable run checkpoints
//!
//! A checkpoint is written after every applied transition. Stores refuse writes
//! whose sequence is not newer than what they hold, which keeps a run's history
//! free of lost or reordered updates.

use crate::config::EngineConfig;
use crate::error::StorageError;
use crate::workflow::{RunId, RunState};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Snapshot of a run at one sequence number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Run the snapshot belongs to
    pub run_id: RunId,
    /// Strictly increasing per run
    pub sequence: u64,
    /// When the snapshot was taken
    pub saved_at: chrono::DateTime<chrono::Utc>,
    /// Full run state
    pub state: RunState,
}

impl Checkpoint {
    /// Snapshot `state` at `sequence`
    pub fn new(sequence: u64, state: RunState) -> Self {
        Self {
            run_id: state.id,
            sequence,
            saved_at: chrono::Utc::now(),
            state,
        }
    }
}

/// Persistence for run checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync + std::fmt::Debug {
    /// Persist a checkpoint, rejecting sequences that are not newer than the stored one
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    /// Latest checkpoint for a run
    async fn load(&self, run_id: &RunId) -> Result<Checkpoint, StorageError>;

    /// Latest checkpoint of every run, oldest run first
    async fn list(&self) -> Result<Vec<Checkpoint>, StorageError>;

    /// Delete a run's checkpoint
    async fn remove(&self, run_id: &RunId) -> Result<(), StorageError>;

    /// Whether a checkpoint exists for the run
    async fn exists(&self, run_id: &RunId) -> Result<bool, StorageError> {
        match self.load(run_id).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove checkpoints last saved more than `days` days ago, returning how many went
    async fn cleanup_older_than(&self, days: u32) -> Result<u32, StorageError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days as i64);
        let mut removed = 0;
        for checkpoint in self.list().await? {
            if checkpoint.saved_at < cutoff {
                self.remove(&checkpoint.run_id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn check_sequence(stored: &Checkpoint, attempted: &Checkpoint) -> Result<(), StorageError> {
    if attempted.sequence <= stored.sequence {
        return Err(StorageError::StaleCheckpoint {
            run_id: attempted.run_id,
            stored: stored.sequence,
            attempted: attempted.sequence,
        });
    }
    Ok(())
}

fn sorted(mut checkpoints: Vec<Checkpoint>) -> Vec<Checkpoint> {
    checkpoints.sort_by_key(|c| c.run_id);
    checkpoints
}

/// In-memory checkpoint store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: DashMap<RunId, Checkpoint>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        match self.checkpoints.entry(checkpoint.run_id) {
            Entry::Occupied(mut entry) => {
                check_sequence(entry.get(), checkpoint)?;
                entry.insert(checkpoint.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(checkpoint.clone());
            }
        }
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Checkpoint, StorageError> {
        self.checkpoints
            .get(run_id)
            .map(|entry| entry.value().clone())
            .ok_or(StorageError::NotFound { run_id: *run_id })
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, StorageError> {
        Ok(sorted(
            self.checkpoints
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
        ))
    }

    async fn remove(&self, run_id: &RunId) -> Result<(), StorageError> {
        self.checkpoints
            .remove(run_id)
            .map(|_| ())
            .ok_or(StorageError::NotFound { run_id: *run_id })
    }
}

/// Checkpoint store writing `<base>/runs/<run_id>/checkpoint.json`
#[derive(Debug)]
pub struct FileSystemCheckpointStore {
    base_path: PathBuf,
    cache: DashMap<RunId, Checkpoint>,
}

impl FileSystemCheckpointStore {
    /// Open a store rooted at `base_path`, creating it if needed
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        if base_path.exists() && !base_path.is_dir() {
            return Err(StorageError::InvalidPath { path: base_path });
        }
        std::fs::create_dir_all(base_path.join("runs"))?;

        let store = Self {
            base_path,
            cache: DashMap::new(),
        };
        store.reload_cache()?;
        Ok(store)
    }

    /// Reload the cache from disk
    ///
    /// Files that cannot be parsed are skipped with a warning.
    pub fn reload_cache(&self) -> Result<(), StorageError> {
        self.cache.clear();

        let runs_dir = self.base_path.join("runs");
        if !runs_dir.exists() {
            std::fs::create_dir_all(&runs_dir)?;
        }

        for entry in walkdir::WalkDir::new(&runs_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.file_name().and_then(|s| s.to_str()) != Some(CHECKPOINT_FILE)
            {
                continue;
            }
            let parsed = std::fs::read_to_string(path)
                .map_err(StorageError::from)
                .and_then(|content| Ok(serde_json::from_str::<Checkpoint>(&content)?));
            match parsed {
                Ok(checkpoint) => {
                    self.cache.insert(checkpoint.run_id, checkpoint);
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable checkpoint {}: {}", path.display(), e)
                }
            }
        }

        tracing::debug!("Loaded {} checkpoints from {}", self.cache.len(), runs_dir.display());
        Ok(())
    }

    /// Root directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn run_dir(&self, id: &RunId) -> PathBuf {
        self.base_path.join("runs").join(id.to_string())
    }

    fn checkpoint_path(&self, id: &RunId) -> PathBuf {
        self.run_dir(id).join(CHECKPOINT_FILE)
    }
}

#[async_trait]
impl CheckpointStore for FileSystemCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        if let Some(stored) = self.cache.get(&checkpoint.run_id) {
            check_sequence(stored.value(), checkpoint)?;
        }

        let run_dir = self.run_dir(&checkpoint.run_id);
        tokio::fs::create_dir_all(&run_dir).await?;

        let path = self.checkpoint_path(&checkpoint.run_id);
        let tmp_path = run_dir.join(format!("{}.tmp", CHECKPOINT_FILE));
        let content = serde_json::to_string_pretty(checkpoint)?;
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        self.cache.insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    async fn load(&self, run_id: &RunId) -> Result<Checkpoint, StorageError> {
        if let Some(checkpoint) = self.cache.get(run_id) {
            return Ok(checkpoint.clone());
        }

        let path = self.checkpoint_path(run_id);
        if !path.exists() {
            return Err(StorageError::NotFound { run_id: *run_id });
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let checkpoint: Checkpoint = serde_json::from_str(&content)?;
        self.cache.insert(*run_id, checkpoint.clone());
        Ok(checkpoint)
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, StorageError> {
        Ok(sorted(
            self.cache
                .iter()
                .map(|entry| entry.value().clone())
                .collect(),
        ))
    }

    async fn remove(&self, run_id: &RunId) -> Result<(), StorageError> {
        let run_dir = self.run_dir(run_id);
        if !run_dir.exists() {
            return Err(StorageError::NotFound { run_id: *run_id });
        }

        tokio::fs::remove_dir_all(&run_dir).await?;
        self.cache.remove(run_id);
        Ok(())
    }
}

/// Store selected by configuration: on disk when `checkpoint_dir` is set, in memory otherwise
pub fn store_from_config(config: &EngineConfig) -> Result<Arc<dyn CheckpointStore>, StorageError> {
    match &config.checkpoint_dir {
        Some(dir) => {
            tracing::info!("Using checkpoint directory {}", dir.display());
            Ok(Arc::new(FileSystemCheckpointStore::new(dir)?))
        }
        None => Ok(Arc::new(MemoryCheckpointStore::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn checkpoint(sequence: u64) -> Checkpoint {
        let mut state = RunState::new(RunId::new());
        state.task = "find targets for disease X".to_string();
        Checkpoint::new(sequence, state)
    }

    fn next(previous: &Checkpoint) -> Checkpoint {
        Checkpoint::new(previous.sequence + 1, previous.state.clone())
    }

    #[tokio::test]
    async fn test_memory_store_rejects_stale_sequence() {
        let store = MemoryCheckpointStore::new();
        let first = checkpoint(1);
        store.save(&first).await.unwrap();
        store.save(&next(&first)).await.unwrap();

        let err = store.save(&first).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::StaleCheckpoint {
                stored: 2,
                attempted: 1,
                ..
            }
        ));
        assert_eq!(store.load(&first.run_id).await.unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_memory_store_not_found_and_remove() {
        let store = MemoryCheckpointStore::new();
        let missing = RunId::new();
        assert!(matches!(
            store.load(&missing).await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(!store.exists(&missing).await.unwrap());

        let cp = checkpoint(1);
        store.save(&cp).await.unwrap();
        assert!(store.exists(&cp.run_id).await.unwrap());
        store.remove(&cp.run_id).await.unwrap();
        assert!(store.remove(&cp.run_id).await.is_err());
    }

    #[tokio::test]
    async fn test_independent_runs_do_not_collide() {
        let store = MemoryCheckpointStore::new();
        let a = checkpoint(1);
        let b = checkpoint(1);
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].run_id < listed[1].run_id);
    }

    #[tokio::test]
    async fn test_filesystem_store_round_trip_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let cp = checkpoint(1);
        {
            let store = FileSystemCheckpointStore::new(temp_dir.path()).unwrap();
            store.save(&cp).await.unwrap();
            store.save(&next(&cp)).await.unwrap();

            let path = temp_dir
                .path()
                .join("runs")
                .join(cp.run_id.to_string())
                .join("checkpoint.json");
            assert!(path.exists());
            assert!(!path.with_extension("json.tmp").exists());
        }

        let reopened = FileSystemCheckpointStore::new(temp_dir.path()).unwrap();
        let loaded = reopened.load(&cp.run_id).await.unwrap();
        assert_eq!(loaded.sequence, 2);
        assert_eq!(loaded.state, cp.state);

        let err = reopened.save(&cp).await.unwrap_err();
        assert!(matches!(err, StorageError::StaleCheckpoint { .. }));
    }

    #[tokio::test]
    async fn test_filesystem_store_skips_corrupt_files() {
        let temp_dir = TempDir::new().unwrap();
        let bad_dir = temp_dir.path().join("runs").join("garbage");
        std::fs::create_dir_all(&bad_dir).unwrap();
        std::fs::write(bad_dir.join("checkpoint.json"), "{ not json").unwrap();

        let store = FileSystemCheckpointStore::new(temp_dir.path()).unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_filesystem_store_remove() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemCheckpointStore::new(temp_dir.path()).unwrap();
        let cp = checkpoint(1);
        store.save(&cp).await.unwrap();

        store.remove(&cp.run_id).await.unwrap();
        assert!(!store.exists(&cp.run_id).await.unwrap());
        assert!(matches!(
            store.remove(&cp.run_id).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[test]
    fn test_filesystem_store_rejects_file_as_base() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        assert!(matches!(
            FileSystemCheckpointStore::new(&file),
            Err(StorageError::InvalidPath { .. })
        ));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_old_checkpoints() {
        let store = MemoryCheckpointStore::new();
        let mut old = checkpoint(1);
        old.saved_at = chrono::Utc::now() - chrono::Duration::days(45);
        let fresh = checkpoint(1);
        store.save(&old).await.unwrap();
        store.save(&fresh).await.unwrap();

        assert_eq!(store.cleanup_older_than(30).await.unwrap(), 1);
        assert!(!store.exists(&old.run_id).await.unwrap());
        assert!(store.exists(&fresh.run_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_from_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = EngineConfig {
            checkpoint_dir: Some(temp_dir.path().to_path_buf()),
            ..EngineConfig::default()
        };
        let store = store_from_config(&config).unwrap();
        let cp = checkpoint(1);
        store.save(&cp).await.unwrap();
        assert!(temp_dir.path().join("runs").join(cp.run_id.to_string()).exists());
    }
}
