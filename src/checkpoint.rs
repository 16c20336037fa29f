//! Durable per-stream checkpoints.
//!
//! The store keeps the whole mapping in memory and persists it as a single
//! human-editable JSON object (`streamId -> checkpoint`). Writes go to a
//! sibling temp file that is fsynced and renamed over the snapshot, so a
//! crash mid-write leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::model::Checkpoint;

pub type CheckpointMap = BTreeMap<String, Checkpoint>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode checkpoints: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    entries: CheckpointMap,
}

impl CheckpointStore {
    /// Store backed by `path` with no checkpoints loaded yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: CheckpointMap::new(),
        }
    }

    /// Open the store and load whatever snapshot is on disk.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(path);
        store.entries = store.load().await;
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot file. A missing or unparsable file yields an empty
    /// mapping. A single unreadable entry is dropped on its own, so only that
    /// stream re-bootstraps.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn load(&self) -> CheckpointMap {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!("no checkpoint file yet; starting empty");
                return CheckpointMap::new();
            }
            Err(err) => {
                warn!(?err, kind = "load_error", "could not read checkpoint file; starting empty");
                return CheckpointMap::new();
            }
        };
        let raw_entries = match serde_json::from_slice::<BTreeMap<String, Value>>(&raw) {
            Ok(raw_entries) => raw_entries,
            Err(err) => {
                warn!(?err, kind = "load_error", "checkpoint file is not valid; starting empty");
                return CheckpointMap::new();
            }
        };
        let mut map = CheckpointMap::new();
        for (stream_id, value) in raw_entries {
            match serde_json::from_value::<Checkpoint>(value) {
                Ok(cp) => {
                    map.insert(stream_id, cp);
                }
                Err(err) => {
                    warn!(%stream_id, %err, kind = "load_error", "dropping unreadable checkpoint; stream will bootstrap");
                }
            }
        }
        info!(streams = map.len(), "loaded checkpoints");
        map
    }

    /// Atomically persist the current in-memory mapping.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn save(&self) -> Result<(), StoreError> {
        write_atomic(&self.path, &self.entries).await?;
        debug!(streams = self.entries.len(), "checkpoints flushed");
        Ok(())
    }

    pub fn get(&self, stream_id: &str) -> Option<&Checkpoint> {
        self.entries.get(stream_id)
    }

    pub fn put(&mut self, stream_id: impl Into<String>, checkpoint: Checkpoint) {
        self.entries.insert(stream_id.into(), checkpoint);
    }

    /// Forget one stream so its next observation bootstraps again.
    pub fn remove(&mut self, stream_id: &str) -> Option<Checkpoint> {
        self.entries.remove(stream_id)
    }

    pub fn entries(&self) -> &CheckpointMap {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Delete the snapshot file if present. Used by the operator reset flag.
pub async fn reset(path: &Path) -> Result<bool, StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "checkpoints".into());
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_atomic(path: &Path, entries: &CheckpointMap) -> Result<(), StoreError> {
    let body = serde_json::to_vec_pretty(entries)?;
    let io_err = |source: std::io::Error| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp).await.map_err(io_err)?;
    file.write_all(&body).await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);
    fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::text_hash;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn checkpoint(id: u64) -> Checkpoint {
        Checkpoint {
            last_seen_id: id,
            last_seen_text_hash: text_hash("x"),
            last_seen_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 5).unwrap(),
        }
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let td = tempdir().unwrap();
        let store = CheckpointStore::open(td.path().join("state.json")).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn garbage_file_loads_empty() {
        let td = tempdir().unwrap();
        let path = td.path().join("state.json");
        std::fs::write(&path, b"{not json").unwrap();
        let store = CheckpointStore::open(&path).await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn save_then_open_reproduces_mapping() {
        let td = tempdir().unwrap();
        let path = td.path().join("nested").join("state.json");
        let mut store = CheckpointStore::new(&path);
        store.put("100", checkpoint(7));
        store.put("200", checkpoint(9));
        store.save().await.unwrap();

        let reopened = CheckpointStore::open(&path).await;
        assert_eq!(reopened.entries(), store.entries());
        assert!(!temp_path(&path).exists());
    }

    #[tokio::test]
    async fn file_is_a_plain_json_object_keyed_by_stream() {
        let td = tempdir().unwrap();
        let path = td.path().join("state.json");
        let mut store = CheckpointStore::new(&path);
        store.put("abc", checkpoint(50));
        store.save().await.unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["abc"]["lastSeenId"], 50);
        assert!(value["abc"]["lastSeenTextHash"].is_string());
        assert!(value["abc"]["lastSeenAt"].is_string());
        assert!(value["abc"]["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn hand_removed_key_is_absent_after_reload() {
        let td = tempdir().unwrap();
        let path = td.path().join("state.json");
        let mut store = CheckpointStore::new(&path);
        store.put("a", checkpoint(1));
        store.put("b", checkpoint(2));
        store.save().await.unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("a");
        std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let reopened = CheckpointStore::open(&path).await;
        assert!(reopened.get("a").is_none());
        assert_eq!(reopened.get("b").map(|c| c.last_seen_id), Some(2));
    }

    #[tokio::test]
    async fn broken_entry_drops_only_that_stream() {
        let td = tempdir().unwrap();
        let path = td.path().join("state.json");
        let mut store = CheckpointStore::new(&path);
        store.put("a", checkpoint(1));
        store.put("b", checkpoint(2));
        store.save().await.unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["a"]["lastSeenId"] = serde_json::json!("seven");
        std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        let reopened = CheckpointStore::open(&path).await;
        assert!(reopened.get("a").is_none());
        assert_eq!(reopened.get("b").map(|c| c.last_seen_id), Some(2));
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test]
    async fn save_overwrites_previous_snapshot() {
        let td = tempdir().unwrap();
        let path = td.path().join("state.json");
        let mut store = CheckpointStore::new(&path);
        store.put("a", checkpoint(1));
        store.save().await.unwrap();
        store.put("a", checkpoint(5));
        store.remove("missing");
        store.save().await.unwrap();

        let reopened = CheckpointStore::open(&path).await;
        assert_eq!(reopened.get("a").map(|c| c.last_seen_id), Some(5));
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test]
    async fn save_into_unwritable_location_reports_io_error() {
        let td = tempdir().unwrap();
        let blocker = td.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = CheckpointStore::new(blocker.join("state.json"));
        let err = store.save().await.unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[tokio::test]
    async fn reset_removes_file_once() {
        let td = tempdir().unwrap();
        let path = td.path().join("state.json");
        std::fs::write(&path, b"{}").unwrap();
        assert!(reset(&path).await.unwrap());
        assert!(!path.exists());
        assert!(!reset(&path).await.unwrap());
    }
}
