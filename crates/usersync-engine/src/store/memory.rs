//! In-memory store backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use super::{check_schema_version, CheckpointStore, DetailLog};
use crate::detail::{DetailLogEntry, LogAction, LogQuery, LogSortField, NewLogEntry, SortDirection};
use crate::error::{StoreError, StoreResult};
use crate::ids::{EntryId, SyncId};
use crate::state::SyncState;

#[derive(Debug, Clone)]
struct Lease {
    holder: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Lease {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Runs {
    states: HashMap<SyncId, SyncState>,
    leases: HashMap<SyncId, Lease>,
}

fn lock<T>(mutex: &Mutex<T>) -> StoreResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::backend("in-memory store lock poisoned"))
}

/// Checkpoint store backed by a process-local map.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    runs: Mutex<Runs>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(lock(&self.runs)?.states.len())
    }

    /// Whether no runs are stored.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn create(&self, state: &SyncState) -> StoreResult<()> {
        let mut runs = lock(&self.runs)?;
        if runs.states.contains_key(&state.syncid) {
            return Err(StoreError::already_exists("sync run", state.syncid));
        }
        runs.states.insert(state.syncid, state.clone());
        Ok(())
    }

    async fn load(&self, syncid: SyncId) -> StoreResult<Option<SyncState>> {
        let runs = lock(&self.runs)?;
        match runs.states.get(&syncid) {
            Some(state) => {
                check_schema_version(syncid, state.schema_version)?;
                Ok(Some(state.clone()))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, state: &SyncState) -> StoreResult<()> {
        let mut runs = lock(&self.runs)?;
        let stored = runs
            .states
            .get_mut(&state.syncid)
            .ok_or_else(|| StoreError::not_found("sync run", state.syncid))?;
        let mut updated = state.clone();
        updated.updated_at = Utc::now();
        *stored = updated;
        Ok(())
    }

    async fn set_active(&self, syncid: SyncId, active: bool) -> StoreResult<()> {
        let mut runs = lock(&self.runs)?;
        if !runs.states.contains_key(&syncid) {
            return Err(StoreError::not_found("sync run", syncid));
        }
        if active {
            runs.leases.insert(
                syncid,
                Lease {
                    holder: None,
                    expires_at: None,
                },
            );
        } else {
            runs.leases.remove(&syncid);
        }
        Ok(())
    }

    async fn is_active(&self, syncid: SyncId) -> StoreResult<bool> {
        let runs = lock(&self.runs)?;
        let now = Utc::now();
        Ok(runs.leases.get(&syncid).is_some_and(|l| l.is_live(now)))
    }

    async fn try_acquire(&self, syncid: SyncId, holder: &str, ttl: Duration) -> StoreResult<bool> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::backend(format!("lease ttl out of range: {e}")))?;
        let mut runs = lock(&self.runs)?;
        if !runs.states.contains_key(&syncid) {
            return Err(StoreError::not_found("sync run", syncid));
        }

        let now = Utc::now();
        if let Some(existing) = runs.leases.get(&syncid) {
            let same_holder = existing.holder.as_deref() == Some(holder);
            if existing.is_live(now) && !same_holder {
                debug!(%syncid, holder, "Lease held by another invocation");
                return Ok(false);
            }
        }

        runs.leases.insert(
            syncid,
            Lease {
                holder: Some(holder.to_string()),
                expires_at: Some(now + ttl),
            },
        );
        Ok(true)
    }

    async fn release(&self, syncid: SyncId, holder: &str) -> StoreResult<()> {
        let mut runs = lock(&self.runs)?;
        let owned = runs
            .leases
            .get(&syncid)
            .is_some_and(|l| l.holder.as_deref() == Some(holder));
        if owned {
            runs.leases.remove(&syncid);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Entries {
    next_id: EntryId,
    rows: Vec<DetailLogEntry>,
}

/// Detail log backed by a process-local vector.
#[derive(Debug, Default)]
pub struct MemoryDetailLog {
    entries: Mutex<Entries>,
}

impl MemoryDetailLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn matching(entries: &Entries, syncid: SyncId, action: Option<LogAction>) -> Vec<DetailLogEntry> {
        entries
            .rows
            .iter()
            .filter(|e| e.syncid == syncid)
            .filter(|e| action.map_or(true, |a| e.action == a))
            .cloned()
            .collect()
    }
}

fn compare(a: &DetailLogEntry, b: &DetailLogEntry, field: LogSortField) -> Ordering {
    let primary = match field {
        LogSortField::Id => a.id.cmp(&b.id),
        LogSortField::SystemName => a.system_name.cmp(&b.system_name),
        LogSortField::Username => a.username.cmp(&b.username),
        LogSortField::Email => a.email.cmp(&b.email),
        LogSortField::Action => a.action.as_str().cmp(b.action.as_str()),
        LogSortField::Message => a.message.cmp(&b.message),
        LogSortField::CreatedAt => a.created_at.cmp(&b.created_at),
    };
    primary.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl DetailLog for MemoryDetailLog {
    async fn append(&self, entry: NewLogEntry) -> StoreResult<EntryId> {
        let mut entries = lock(&self.entries)?;
        entries.next_id += 1;
        let id = entries.next_id;
        entries.rows.push(entry.into_entry(id, Utc::now()));
        Ok(id)
    }

    async fn get(&self, syncid: SyncId, id: EntryId) -> StoreResult<Option<DetailLogEntry>> {
        let entries = lock(&self.entries)?;
        Ok(entries
            .rows
            .iter()
            .find(|e| e.id == id && e.syncid == syncid)
            .cloned())
    }

    async fn query(&self, syncid: SyncId, query: &LogQuery) -> StoreResult<Vec<DetailLogEntry>> {
        let entries = lock(&self.entries)?;
        let mut rows = Self::matching(&entries, syncid, query.action);
        rows.sort_by(|a, b| {
            let ord = compare(a, b, query.sort);
            match query.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });

        let rows = rows.into_iter().skip(query.page.offset);
        Ok(match query.page.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&self, syncid: SyncId, query: &LogQuery) -> StoreResult<u64> {
        let entries = lock(&self.entries)?;
        Ok(Self::matching(&entries, syncid, query.action).len() as u64)
    }

    async fn mark_resolved(&self, syncid: SyncId, id: EntryId) -> StoreResult<()> {
        let mut entries = lock(&self.entries)?;
        let entry = entries
            .rows
            .iter_mut()
            .find(|e| e.id == id && e.syncid == syncid)
            .ok_or_else(|| StoreError::not_found("detail log entry", id))?;
        entry.action = LogAction::Resolved;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detail::Pagination;
    use crate::state::{SlaveDescriptor, SyncDirection, SYNC_STATE_SCHEMA_VERSION};
    use std::sync::Arc;
    use usersync_adapter::UserRecord;

    fn state() -> SyncState {
        SyncState::new(
            "master",
            SyncDirection::ToSlaves,
            vec![SlaveDescriptor::new("forumA", 2)],
            10,
        )
    }

    fn entry(syncid: SyncId, username: &str, action: LogAction) -> NewLogEntry {
        let record = UserRecord::new(username, format!("{username}@example.com"));
        NewLogEntry::success(syncid, "forumA", &record, action, "")
    }

    #[tokio::test]
    async fn test_create_and_load() {
        let store = MemoryCheckpointStore::new();
        let state = state();
        store.create(&state).await.unwrap();

        let loaded = store.load(state.syncid).await.unwrap().unwrap();
        assert_eq!(loaded.syncid, state.syncid);
        assert!(store.load(SyncId::new()).await.unwrap().is_none());

        let err = store.create(&state).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_poisoned_lock_is_reported() {
        let store = Arc::new(MemoryCheckpointStore::new());
        store.create(&state()).await.unwrap();
        assert_eq!(store.len().unwrap(), 1);

        let poisoner = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.runs.lock().unwrap();
            panic!("poison the run map");
        })
        .join();

        assert!(matches!(store.len(), Err(StoreError::Backend { .. })));
        assert!(store.is_empty().is_err());
    }

    #[tokio::test]
    async fn test_save_unknown_run_fails() {
        let store = MemoryCheckpointStore::new();
        assert!(store.save(&state()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_newer_schema_is_rejected() {
        let store = MemoryCheckpointStore::new();
        let mut state = state();
        state.schema_version = SYNC_STATE_SCHEMA_VERSION + 1;
        store.create(&state).await.unwrap();

        let err = store.load(state.syncid).await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchemaVersion { .. }));
    }

    #[tokio::test]
    async fn test_lease_excludes_other_holders() {
        let store = MemoryCheckpointStore::new();
        let state = state();
        store.create(&state).await.unwrap();
        let ttl = Duration::from_secs(60);

        assert!(store.try_acquire(state.syncid, "a", ttl).await.unwrap());
        assert!(store.is_active(state.syncid).await.unwrap());
        assert!(!store.try_acquire(state.syncid, "b", ttl).await.unwrap());

        // Releasing someone else's lease does nothing.
        store.release(state.syncid, "b").await.unwrap();
        assert!(store.is_active(state.syncid).await.unwrap());

        store.release(state.syncid, "a").await.unwrap();
        assert!(!store.is_active(state.syncid).await.unwrap());
        assert!(store.try_acquire(state.syncid, "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken() {
        let store = MemoryCheckpointStore::new();
        let state = state();
        store.create(&state).await.unwrap();

        assert!(store
            .try_acquire(state.syncid, "a", Duration::ZERO)
            .await
            .unwrap());
        assert!(!store.is_active(state.syncid).await.unwrap());
        assert!(store
            .try_acquire(state.syncid, "b", Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_set_active_blocks_acquire() {
        let store = MemoryCheckpointStore::new();
        let state = state();
        store.create(&state).await.unwrap();

        store.set_active(state.syncid, true).await.unwrap();
        assert!(!store
            .try_acquire(state.syncid, "a", Duration::from_secs(60))
            .await
            .unwrap());
        store.set_active(state.syncid, false).await.unwrap();
        assert!(!store.is_active(state.syncid).await.unwrap());
    }

    #[tokio::test]
    async fn test_query_filters_sorts_and_pages() {
        let log = MemoryDetailLog::new();
        let syncid = SyncId::new();
        log.append(entry(syncid, "carol", LogAction::Created)).await.unwrap();
        log.append(entry(syncid, "alice", LogAction::Error)).await.unwrap();
        log.append(entry(syncid, "bob", LogAction::Error)).await.unwrap();
        log.append(entry(SyncId::new(), "dave", LogAction::Error)).await.unwrap();

        let errors = LogQuery::all().with_action(LogAction::Error);
        assert_eq!(log.count(syncid, &errors).await.unwrap(), 2);

        let by_name = LogQuery::all().sorted_by(LogSortField::Username, SortDirection::Desc);
        let names: Vec<_> = log
            .query(syncid, &by_name)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.username)
            .collect();
        assert_eq!(names, ["carol", "bob", "alice"]);

        let page = log
            .query(syncid, &by_name.paged(Pagination::new(1, 1)))
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].username, "bob");
    }

    #[tokio::test]
    async fn test_mark_resolved_is_idempotent() {
        let log = MemoryDetailLog::new();
        let syncid = SyncId::new();
        let id = log.append(entry(syncid, "alice", LogAction::Error)).await.unwrap();

        log.mark_resolved(syncid, id).await.unwrap();
        log.mark_resolved(syncid, id).await.unwrap();
        let stored = log.get(syncid, id).await.unwrap().unwrap();
        assert_eq!(stored.action, LogAction::Resolved);

        assert!(log.mark_resolved(syncid, 999).await.unwrap_err().is_not_found());
    }
}
