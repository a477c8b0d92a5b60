//! JSON-file snapshot store.
//!
//! The snapshot is written to a temporary sibling and renamed over the
//! target, so the file on disk is always either the previous snapshot or the
//! new one. On open the last committed snapshot is loaded back, which keeps
//! the timestamp ordering intact across restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvester_scraper_models::Item;

use crate::{Snapshot, SnapshotCell, SnapshotError, SnapshotStore};

/// Persists the snapshot as a JSON file.
#[derive(Debug)]
pub struct FileSnapshotStore {
    path: PathBuf,
    cell: SnapshotCell,
}

impl FileSnapshotStore {
    /// Opens the store at `path`, loading the snapshot already there.
    ///
    /// A missing file means no snapshot yet.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Io`] if the file exists but cannot be read, or
    /// [`SnapshotError::Json`] if it is not a valid snapshot.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let path = path.into();
        let existing = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                log::info!(
                    "Loaded snapshot with {} items from {}",
                    snapshot.items.len(),
                    path.display()
                );
                Some(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            cell: SnapshotCell::with_snapshot(existing),
        })
    }

    /// Location of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("snapshot");
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

async fn write_atomic(path: &Path, tmp_path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(tmp_path, bytes).await?;
    tokio::fs::rename(tmp_path, path).await?;
    Ok(())
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn put(
        &self,
        items: Vec<Item>,
        completed_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Arc<Snapshot>, SnapshotError> {
        let snapshot = Snapshot {
            items,
            completed_at,
            next_run_at,
        };
        let path = self.path.clone();
        let tmp_path = self.tmp_path();

        self.cell
            .commit(snapshot, |snapshot| async move {
                let bytes = serde_json::to_vec_pretty(&*snapshot)?;
                write_atomic(&path, &tmp_path, &bytes).await
            })
            .await
    }

    fn get(&self) -> Option<Arc<Snapshot>> {
        self.cell.get()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;
    use serde_json::json;

    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn missing_file_means_no_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path().join("snap.json"))
            .await
            .unwrap();
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snap.json");

        let store = FileSnapshotStore::open(&path).await.unwrap();
        store
            .put(
                vec![Item::new("a", "1", json!({ "title": "hello" }))],
                at(1),
                Some(at(2)),
            )
            .await
            .unwrap();

        let reopened = FileSnapshotStore::open(&path).await.unwrap();
        let snapshot = reopened.get().unwrap();
        assert_eq!(snapshot.items[0].payload["title"], "hello");
        assert_eq!(snapshot.completed_at, at(1));
        assert_eq!(snapshot.next_run_at, Some(at(2)));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(raw.get("completedAt").is_some());
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn stale_put_is_rejected_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");

        let store = FileSnapshotStore::open(&path).await.unwrap();
        store.put(Vec::new(), at(10), None).await.unwrap();
        drop(store);

        let reopened = FileSnapshotStore::open(&path).await.unwrap();
        let err = reopened.put(Vec::new(), at(9), None).await.unwrap_err();
        assert!(matches!(err, SnapshotError::Stale { .. }));

        let on_disk: Snapshot = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.completed_at, at(10));
    }

    #[tokio::test]
    async fn corrupt_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            FileSnapshotStore::open(&path).await,
            Err(SnapshotError::Json(_))
        ));
    }
}
