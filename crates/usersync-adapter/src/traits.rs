//! Identity adapter trait
//!
//! Capability contract every synchronized identity system must satisfy.

use async_trait::async_trait;

use crate::diagnostics::{Diagnostics, UpsertOutcome};
use crate::error::AdapterResult;
use crate::record::{UserDescriptor, UserKey, UserRecord};

/// Per-call options for [`IdentityAdapter::remove`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveContext {
    /// When set, the adapter must delete the user from its own system only and
    /// must not propagate the deletion to other linked systems, even when it
    /// considers itself authoritative.
    pub suppress_cascade: bool,
}

impl RemoveContext {
    /// Removal that stays inside the adapter's own system.
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            suppress_cascade: true,
        }
    }
}

/// Connector to one identity system (the master or a slave).
///
/// Failures may be reported either as `Err(AdapterError)` or as `error`
/// severity entries in the returned diagnostics; callers treat both the same way.
#[async_trait]
pub trait IdentityAdapter: Send + Sync {
    /// Name of the system this adapter serves.
    fn system_name(&self) -> &str;

    /// Number of users a full listing would return.
    async fn count_users(&self) -> AdapterResult<usize>;

    /// List users starting at `offset`, returning at most `limit` items.
    ///
    /// Adapters may filter (e.g. skip users already linked) and so return fewer
    /// items than requested even when more remain.
    async fn list_users(&self, offset: usize, limit: usize)
        -> AdapterResult<Vec<UserDescriptor>>;

    /// Load the full record for `key`, or `None` when the user does not exist.
    async fn fetch(&self, key: &UserKey) -> AdapterResult<Option<UserRecord>>;

    /// Write `record` into this system.
    ///
    /// With `create_if_missing` unset the adapter must only update an existing user.
    async fn upsert(
        &self,
        record: &UserRecord,
        create_if_missing: bool,
    ) -> AdapterResult<UpsertOutcome>;

    /// Delete `record` from this system.
    async fn remove(&self, record: &UserRecord, context: RemoveContext)
        -> AdapterResult<Diagnostics>;

    /// Link `local` (a record of this system) with `remote` from `remote_system`.
    async fn update_lookup(
        &self,
        local: &UserRecord,
        remote: &UserRecord,
        remote_system: &str,
    ) -> AdapterResult<()>;

    /// Drop every link held for `record`.
    async fn remove_lookup(&self, record: &UserRecord) -> AdapterResult<()>;
}
