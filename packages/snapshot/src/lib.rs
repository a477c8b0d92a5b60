#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Storage for the latest aggregated item set.
//!
//! A [`Snapshot`] is never mutated in place: every [`SnapshotStore::put`]
//! builds a new one and swaps it in, so readers holding the previous
//! `Arc<Snapshot>` keep a complete view. Puts are serialized by a commit
//! lock and must not move `completed_at` backwards.

pub mod file;

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use harvester_scraper_models::Item;

pub use file::FileSnapshotStore;
pub use harvester_orchestrator_models::Snapshot;

/// Errors from committing or loading a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// The put is older than the stored snapshot and was not applied.
    #[error("snapshot from {attempted} is older than the stored one from {current}")]
    Stale {
        /// `completed_at` of the stored snapshot.
        current: DateTime<Utc>,
        /// `completed_at` of the rejected put.
        attempted: DateTime<Utc>,
    },

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Latest-snapshot storage.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Atomically replaces the stored snapshot and returns the new one.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Stale`] if `completed_at` is earlier than the
    /// stored snapshot's, leaving the stored snapshot unchanged, or a backend
    /// error if the snapshot could not be persisted.
    async fn put(
        &self,
        items: Vec<Item>,
        completed_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<Arc<Snapshot>, SnapshotError>;

    /// Returns the current snapshot, if any has been stored.
    fn get(&self) -> Option<Arc<Snapshot>>;
}

/// The in-memory half shared by every store: the current snapshot plus the
/// commit lock.
#[derive(Debug, Default)]
pub(crate) struct SnapshotCell {
    current: RwLock<Option<Arc<Snapshot>>>,
    commit: tokio::sync::Mutex<()>,
}

impl SnapshotCell {
    pub(crate) fn with_snapshot(snapshot: Option<Snapshot>) -> Self {
        Self {
            current: RwLock::new(snapshot.map(Arc::new)),
            commit: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn get(&self) -> Option<Arc<Snapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs `persist` under the commit lock and swaps the snapshot in once it
    /// succeeds.
    pub(crate) async fn commit<F, Fut>(
        &self,
        snapshot: Snapshot,
        persist: F,
    ) -> Result<Arc<Snapshot>, SnapshotError>
    where
        F: FnOnce(Arc<Snapshot>) -> Fut + Send,
        Fut: Future<Output = Result<(), SnapshotError>> + Send,
    {
        let _commit = self.commit.lock().await;

        if let Some(current) = self
            .get()
            .filter(|current| snapshot.completed_at < current.completed_at)
        {
            log::warn!(
                "Rejecting stale snapshot from {} (stored: {})",
                snapshot.completed_at,
                current.completed_at
            );
            return Err(SnapshotError::Stale {
                current: current.completed_at,
                attempted: snapshot.completed_at,
            });
        }

        let snapshot = Arc::new(snapshot);
        persist(Arc::clone(&snapshot)).await?;

        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));

        log::info!(
            "Committed snapshot with {} items from {}",
            snapshot.items.len(),
            snapshot.completed_at
        );
        Ok(snapshot)
    }
}

/// Keeps the snapshot in memory only.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    cell: SnapshotCell,
}

impl MemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
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
        self.cell.commit(snapshot, |_| async { Ok::<_, SnapshotError>(()) }).await
    }

    fn get(&self) -> Option<Arc<Snapshot>> {
        self.cell.get()
    }
}
