//! Persistence for run checkpoints and the detail log.
//!
//! Two backends ship with the crate: [`memory`] for tests and embedding, and
//! [`postgres`] for durable deployments.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::time::Duration;

use crate::detail::{DetailLogEntry, LogQuery, NewLogEntry};
use crate::error::{StoreError, StoreResult};
use crate::ids::{EntryId, SyncId};
use crate::state::{SyncState, SYNC_STATE_SCHEMA_VERSION};

pub use memory::{MemoryCheckpointStore, MemoryDetailLog};
pub use postgres::{PgCheckpointStore, PgDetailLog};

/// Reject run documents written by a newer build.
pub(crate) fn check_schema_version(syncid: SyncId, found: u32) -> StoreResult<()> {
    if found > SYNC_STATE_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            syncid,
            found,
            supported: SYNC_STATE_SCHEMA_VERSION,
        });
    }
    Ok(())
}

/// Durable storage for [`SyncState`] documents and the per-run lease.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a new run. Fails with `AlreadyExists` if the syncid is taken.
    async fn create(&self, state: &SyncState) -> StoreResult<()>;

    /// Load a run, or `None` if the syncid is unknown.
    ///
    /// Documents written with a newer schema version are rejected.
    async fn load(&self, syncid: SyncId) -> StoreResult<Option<SyncState>>;

    /// Overwrite the stored state of an existing run.
    async fn save(&self, state: &SyncState) -> StoreResult<()>;

    /// Set or clear the active flag unconditionally.
    async fn set_active(&self, syncid: SyncId, active: bool) -> StoreResult<()>;

    /// Whether a live lease is held on the run.
    async fn is_active(&self, syncid: SyncId) -> StoreResult<bool>;

    /// Atomically take the run's lease for `holder`.
    ///
    /// Returns `false` when another holder owns an unexpired lease.
    async fn try_acquire(&self, syncid: SyncId, holder: &str, ttl: Duration) -> StoreResult<bool>;

    /// Drop the lease if `holder` owns it.
    async fn release(&self, syncid: SyncId, holder: &str) -> StoreResult<()>;
}

/// Append-mostly log of per-user outcomes.
#[async_trait]
pub trait DetailLog: Send + Sync {
    /// Append an entry and return its assigned id.
    async fn append(&self, entry: NewLogEntry) -> StoreResult<EntryId>;

    /// Fetch one entry of a run.
    async fn get(&self, syncid: SyncId, id: EntryId) -> StoreResult<Option<DetailLogEntry>>;

    /// Entries of a run matching `query`.
    async fn query(&self, syncid: SyncId, query: &LogQuery) -> StoreResult<Vec<DetailLogEntry>>;

    /// Number of entries matching `query`, ignoring its window.
    async fn count(&self, syncid: SyncId, query: &LogQuery) -> StoreResult<u64>;

    /// Flip an entry to `resolved`. Repeating the call is a no-op.
    async fn mark_resolved(&self, syncid: SyncId, id: EntryId) -> StoreResult<()>;
}
