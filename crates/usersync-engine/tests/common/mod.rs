//! Integration test helpers for usersync-engine.
//!
//! Provides an in-memory identity adapter with scripted failures and call
//! tracking, plus a harness wiring engine, resolver and memory stores.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use usersync_adapter::{
    async_trait, AdapterError, AdapterRegistry, AdapterResult, BoxedAdapter, Diagnostics,
    IdentityAdapter, RecordAction, RemoveContext, UpsertOutcome, UserDescriptor, UserKey,
    UserRecord,
};
use usersync_engine::store::{CheckpointStore, DetailLog};
use usersync_engine::{
    ConflictResolver, DetailLogEntry, EngineConfig, LogQuery, MemoryCheckpointStore,
    MemoryDetailLog, StoreResult, SyncEngine, SyncId, SyncState,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Record used for `username` throughout the tests.
pub fn user(username: &str) -> UserRecord {
    UserRecord::new(username, format!("{username}@example.com"))
}

/// How [`MockAdapter::list_users`] pages through users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listing {
    /// Honors offset and limit over the users in username order.
    Positional,
    /// Ignores the offset and returns at most `cap` users not fetched yet.
    Unvisited { cap: usize },
}

/// Lookup update observed by a mock adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupCall {
    pub local: UserRecord,
    pub remote: UserRecord,
    pub remote_system: String,
}

/// In-memory identity system.
pub struct MockAdapter {
    name: String,
    users: Mutex<BTreeMap<String, UserRecord>>,
    listing: Mutex<Listing>,
    visited: Mutex<HashSet<String>>,
    upsert_errors: Mutex<HashMap<String, String>>,
    upsert_failures: Mutex<HashSet<String>>,
    remove_errors: Mutex<HashMap<String, String>>,
    return_records: AtomicBool,
    fail_listing: AtomicBool,
    fail_lookups: AtomicBool,
    fetch_calls: AtomicUsize,
    list_calls: Mutex<Vec<(usize, usize)>>,
    upserts: Mutex<Vec<(String, bool)>>,
    lookups: Mutex<Vec<LookupCall>>,
    removed_lookups: Mutex<Vec<String>>,
    removals: Mutex<Vec<(String, RemoveContext)>>,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            users: Mutex::new(BTreeMap::new()),
            listing: Mutex::new(Listing::Positional),
            visited: Mutex::new(HashSet::new()),
            upsert_errors: Mutex::new(HashMap::new()),
            upsert_failures: Mutex::new(HashSet::new()),
            remove_errors: Mutex::new(HashMap::new()),
            return_records: AtomicBool::new(true),
            fail_listing: AtomicBool::new(false),
            fail_lookups: AtomicBool::new(false),
            fetch_calls: AtomicUsize::new(0),
            list_calls: Mutex::new(Vec::new()),
            upserts: Mutex::new(Vec::new()),
            lookups: Mutex::new(Vec::new()),
            removed_lookups: Mutex::new(Vec::new()),
            removals: Mutex::new(Vec::new()),
        }
    }

    /// Adapter pre-populated with `usernames`.
    pub fn with_users(name: &str, usernames: &[&str]) -> Arc<Self> {
        let adapter = Self::new(name);
        for username in usernames {
            adapter.insert(user(username));
        }
        Arc::new(adapter)
    }

    pub fn insert(&self, record: UserRecord) {
        let native_id = format!("{}:{}", self.name, record.username);
        let record = record.with_native_id(native_id);
        self.users
            .lock()
            .unwrap()
            .insert(record.username.clone(), record);
    }

    pub fn user(&self, username: &str) -> Option<UserRecord> {
        self.users.lock().unwrap().get(username).cloned()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.users.lock().unwrap().keys().cloned().collect()
    }

    pub fn set_listing(&self, listing: Listing) {
        *self.listing.lock().unwrap() = listing;
    }

    /// Make upserts of `username` report an error diagnostic.
    pub fn set_upsert_error(&self, username: &str, message: &str) {
        self.upsert_errors
            .lock()
            .unwrap()
            .insert(username.to_string(), message.to_string());
    }

    pub fn clear_upsert_error(&self, username: &str) {
        self.upsert_errors.lock().unwrap().remove(username);
    }

    /// Make upserts of `username` return `Err`.
    pub fn set_upsert_failure(&self, username: &str) {
        self.upsert_failures
            .lock()
            .unwrap()
            .insert(username.to_string());
    }

    pub fn set_remove_error(&self, username: &str, message: &str) {
        self.remove_errors
            .lock()
            .unwrap()
            .insert(username.to_string(), message.to_string());
    }

    pub fn set_return_records(&self, enabled: bool) {
        self.return_records.store(enabled, Ordering::SeqCst);
    }

    pub fn set_fail_listing(&self, enabled: bool) {
        self.fail_listing.store(enabled, Ordering::SeqCst);
    }

    pub fn set_fail_lookups(&self, enabled: bool) {
        self.fail_lookups.store(enabled, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// `(offset, limit)` of every listing call.
    pub fn list_calls(&self) -> Vec<(usize, usize)> {
        self.list_calls.lock().unwrap().clone()
    }

    /// `(username, create_if_missing)` of every upsert call.
    pub fn upserts(&self) -> Vec<(String, bool)> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn lookups(&self) -> Vec<LookupCall> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn removed_lookups(&self) -> Vec<String> {
        self.removed_lookups.lock().unwrap().clone()
    }

    pub fn removals(&self) -> Vec<(String, RemoveContext)> {
        self.removals.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityAdapter for MockAdapter {
    fn system_name(&self) -> &str {
        &self.name
    }

    async fn count_users(&self) -> AdapterResult<usize> {
        Ok(self.users.lock().unwrap().len())
    }

    async fn list_users(&self, offset: usize, limit: usize) -> AdapterResult<Vec<UserDescriptor>> {
        self.list_calls.lock().unwrap().push((offset, limit));
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AdapterError::connection(format!("{} is unreachable", self.name)));
        }

        let users = self.users.lock().unwrap();
        let listing = *self.listing.lock().unwrap();
        let descriptors = match listing {
            Listing::Positional => users
                .values()
                .skip(offset)
                .take(limit)
                .map(UserRecord::descriptor)
                .collect(),
            Listing::Unvisited { cap } => {
                let visited = self.visited.lock().unwrap();
                users
                    .values()
                    .filter(|u| !visited.contains(&u.username))
                    .take(limit.min(cap))
                    .map(UserRecord::descriptor)
                    .collect()
            }
        };
        Ok(descriptors)
    }

    async fn fetch(&self, key: &UserKey) -> AdapterResult<Option<UserRecord>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.visited.lock().unwrap().insert(key.username.clone());
        Ok(self.users.lock().unwrap().get(&key.username).cloned())
    }

    async fn upsert(
        &self,
        record: &UserRecord,
        create_if_missing: bool,
    ) -> AdapterResult<UpsertOutcome> {
        self.upserts
            .lock()
            .unwrap()
            .push((record.username.clone(), create_if_missing));

        if self.upsert_failures.lock().unwrap().contains(&record.username) {
            return Err(AdapterError::operation(format!(
                "{} rejected {}",
                self.name, record.username
            )));
        }
        if let Some(message) = self.upsert_errors.lock().unwrap().get(&record.username) {
            return Ok(UpsertOutcome::failed(message.clone()));
        }

        let exists = self.user(&record.username).is_some();
        if !exists && !create_if_missing {
            return Ok(UpsertOutcome::failed(format!(
                "user '{}' does not exist",
                record.username
            )));
        }

        let mut written = record.clone();
        written.native_id = None;
        self.insert(written);
        let stored = self.user(&record.username);
        let action = if exists {
            RecordAction::Updated
        } else {
            RecordAction::Created
        };

        match stored {
            Some(stored) if self.return_records.load(Ordering::SeqCst) => {
                Ok(UpsertOutcome::applied(stored, action))
            }
            _ => Ok(UpsertOutcome::without_record(action)),
        }
    }

    async fn remove(&self, record: &UserRecord, context: RemoveContext) -> AdapterResult<Diagnostics> {
        self.removals
            .lock()
            .unwrap()
            .push((record.username.clone(), context));

        if let Some(message) = self.remove_errors.lock().unwrap().get(&record.username) {
            return Ok(Diagnostics::from_error(message.clone()));
        }
        self.users.lock().unwrap().remove(&record.username);
        Ok(Diagnostics::new())
    }

    async fn update_lookup(
        &self,
        local: &UserRecord,
        remote: &UserRecord,
        remote_system: &str,
    ) -> AdapterResult<()> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(AdapterError::operation("lookup table locked"));
        }
        self.lookups.lock().unwrap().push(LookupCall {
            local: local.clone(),
            remote: remote.clone(),
            remote_system: remote_system.to_string(),
        });
        Ok(())
    }

    async fn remove_lookup(&self, record: &UserRecord) -> AdapterResult<()> {
        self.removed_lookups
            .lock()
            .unwrap()
            .push(record.username.clone());
        Ok(())
    }
}

/// Lease holder used when [`InstrumentedStore`] takes over a run.
pub const INTRUDER: &str = "intruder";

/// Batch size written by the intruder so its checkpoint is recognizable.
pub const INTRUDER_BATCH_SIZE: usize = 99;

/// Checkpoint store wrapper that records saves and can simulate contention.
pub struct InstrumentedStore {
    inner: Arc<MemoryCheckpointStore>,
    yield_on_load: AtomicBool,
    takeover_after: Mutex<Option<usize>>,
    saves: Mutex<Vec<u64>>,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<MemoryCheckpointStore>) -> Self {
        Self {
            inner,
            yield_on_load: AtomicBool::new(false),
            takeover_after: Mutex::new(None),
            saves: Mutex::new(Vec::new()),
        }
    }

    /// Yield to the runtime before every load.
    pub fn yielding(self) -> Self {
        self.yield_on_load.store(true, Ordering::SeqCst);
        self
    }

    /// After the `saves`-th save, hand the lease to [`INTRUDER`], which then
    /// writes its own checkpoint.
    pub fn taken_over_after(self, saves: usize) -> Self {
        *self.takeover_after.lock().unwrap() = Some(saves);
        self
    }

    /// `synced_users` of every save made through this wrapper.
    pub fn saves(&self) -> Vec<u64> {
        self.saves.lock().unwrap().clone()
    }

    async fn take_over(&self, state: &SyncState) -> StoreResult<()> {
        self.inner.set_active(state.syncid, false).await?;
        self.inner
            .try_acquire(state.syncid, INTRUDER, Duration::from_secs(60))
            .await?;
        let mut theirs = state.clone();
        theirs.user_batch_size = INTRUDER_BATCH_SIZE;
        self.inner.save(&theirs).await
    }
}

#[async_trait]
impl CheckpointStore for InstrumentedStore {
    async fn create(&self, state: &SyncState) -> StoreResult<()> {
        self.inner.create(state).await
    }

    async fn load(&self, syncid: SyncId) -> StoreResult<Option<SyncState>> {
        if self.yield_on_load.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.load(syncid).await
    }

    async fn save(&self, state: &SyncState) -> StoreResult<()> {
        self.inner.save(state).await?;
        let count = {
            let mut saves = self.saves.lock().unwrap();
            saves.push(state.synced_users);
            saves.len()
        };
        let takeover = *self.takeover_after.lock().unwrap();
        if takeover == Some(count) {
            self.take_over(state).await?;
        }
        Ok(())
    }

    async fn set_active(&self, syncid: SyncId, active: bool) -> StoreResult<()> {
        self.inner.set_active(syncid, active).await
    }

    async fn is_active(&self, syncid: SyncId) -> StoreResult<bool> {
        self.inner.is_active(syncid).await
    }

    async fn try_acquire(&self, syncid: SyncId, holder: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.try_acquire(syncid, holder, ttl).await
    }

    async fn release(&self, syncid: SyncId, holder: &str) -> StoreResult<()> {
        self.inner.release(syncid, holder).await
    }
}

/// Engine, resolver and memory stores over a set of mock adapters.
pub struct Harness {
    pub engine: SyncEngine,
    pub resolver: ConflictResolver,
    pub checkpoints: Arc<MemoryCheckpointStore>,
    pub details: Arc<MemoryDetailLog>,
}

impl Harness {
    pub fn new(adapters: &[&Arc<MockAdapter>]) -> Self {
        Self::with_config(adapters, EngineConfig::default())
    }

    pub fn with_config(adapters: &[&Arc<MockAdapter>], config: EngineConfig) -> Self {
        Self::wrapped(adapters, config, |store| store as Arc<dyn CheckpointStore>)
    }

    /// Harness whose engine reaches the checkpoint store through `wrap`.
    ///
    /// `checkpoints` stays the unwrapped memory store.
    pub fn wrapped(
        adapters: &[&Arc<MockAdapter>],
        config: EngineConfig,
        wrap: impl FnOnce(Arc<MemoryCheckpointStore>) -> Arc<dyn CheckpointStore>,
    ) -> Self {
        init_test_logging();

        let mut registry = AdapterRegistry::new();
        for adapter in adapters {
            let boxed: BoxedAdapter = Arc::clone(adapter) as BoxedAdapter;
            registry.register(boxed);
        }

        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let details = Arc::new(MemoryDetailLog::new());
        let engine = SyncEngine::new(
            registry.clone(),
            wrap(Arc::clone(&checkpoints)),
            details.clone() as Arc<dyn DetailLog>,
        )
        .with_config(config);
        let resolver = ConflictResolver::new(registry, details.clone() as Arc<dyn DetailLog>);

        Self {
            engine,
            resolver,
            checkpoints,
            details,
        }
    }

    /// Persisted state of `syncid`.
    pub async fn stored(&self, syncid: SyncId) -> SyncState {
        self.checkpoints.load(syncid).await.unwrap().unwrap()
    }

    /// Every entry of `syncid` in id order.
    pub async fn entries(&self, syncid: SyncId) -> Vec<DetailLogEntry> {
        self.details.query(syncid, &LogQuery::all()).await.unwrap()
    }
}
