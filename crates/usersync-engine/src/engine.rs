//! Sync engine.
//!
//! Walks the slaves of a run one user at a time, writes each user into the
//! target system, records one detail log entry per user and checkpoints the
//! run so a later invocation can resume where this one stopped.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use usersync_adapter::{
    AdapterRegistry, BoxedAdapter, Diagnostics, Severity, UserDescriptor, UserRecord,
};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::detail::{ConflictPayload, ConflictSide, LogAction, LogQuery, NewLogEntry};
use crate::error::{StoreError, SyncError, SyncResult};
use crate::ids::SyncId;
use crate::state::{RunStatus, SlaveDescriptor, SyncDirection, SyncState};
use crate::store::{CheckpointStore, DetailLog};

/// How many users one invocation may process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "users")]
pub enum InvocationBudget {
    /// Run until the run completes or a slave is finished.
    #[default]
    Unlimited,
    /// Stop after this many users.
    Users(u64),
}

impl InvocationBudget {
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, InvocationBudget::Users(0))
    }

    fn consume(&mut self) {
        if let InvocationBudget::Users(remaining) = self {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

/// Result of one invocation of [`SyncEngine::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The run had already finished; nothing was done.
    AlreadyCompleted,
    /// Another invocation holds the run's lease; nothing was done.
    Busy,
    /// Progress was checkpointed; invoke again to continue.
    Paused,
    /// Every slave has been walked.
    Completed,
}

impl RunOutcome {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, RunOutcome::AlreadyCompleted | RunOutcome::Completed)
    }
}

/// Parameters for [`SyncEngine::start_run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSyncRun {
    pub master: String,
    pub direction: SyncDirection,
    /// Slave systems in processing order.
    pub slaves: Vec<String>,
    /// Users per listing call; the engine default applies when unset.
    #[serde(default)]
    pub user_batch_size: Option<usize>,
    /// Caller-chosen run id; a random one is generated when unset.
    #[serde(default)]
    pub syncid: Option<SyncId>,
}

impl NewSyncRun {
    pub fn new(
        master: impl Into<String>,
        direction: SyncDirection,
        slaves: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            master: master.into(),
            direction,
            slaves: slaves.into_iter().map(Into::into).collect(),
            user_batch_size: None,
            syncid: None,
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, user_batch_size: usize) -> Self {
        self.user_batch_size = Some(user_batch_size);
        self
    }

    #[must_use]
    pub fn with_syncid(mut self, syncid: SyncId) -> Self {
        self.syncid = Some(syncid);
        self
    }
}

/// Snapshot of a run for operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub state: SyncState,
    pub status: RunStatus,
    /// Whether an invocation currently holds the lease.
    pub active: bool,
    pub progress_percentage: f64,
    /// Entries still awaiting resolution.
    pub error_count: u64,
}

/// Drives sync runs against registered adapters.
pub struct SyncEngine {
    adapters: AdapterRegistry,
    checkpoints: Arc<dyn CheckpointStore>,
    details: Arc<dyn DetailLog>,
    config: EngineConfig,
}

/// Source and target of the current slave.
struct Route {
    slave: String,
    source: BoxedAdapter,
    target: BoxedAdapter,
}

/// How an invocation left the user loop.
enum Stop {
    AlreadyCompleted,
    Completed,
    Paused,
}

impl SyncEngine {
    /// Create an engine with the default configuration.
    pub fn new(
        adapters: AdapterRegistry,
        checkpoints: Arc<dyn CheckpointStore>,
        details: Arc<dyn DetailLog>,
    ) -> Self {
        Self {
            adapters,
            checkpoints,
            details,
            config: EngineConfig::default(),
        }
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    /// Create and persist a new run.
    ///
    /// Each slave is sized by counting users on the side users are read from:
    /// the master for [`SyncDirection::ToSlaves`], the slave itself otherwise.
    #[instrument(skip(self, run), fields(master = %run.master, direction = %run.direction))]
    pub async fn start_run(&self, run: NewSyncRun) -> SyncResult<SyncState> {
        if run.slaves.is_empty() {
            return Err(SyncError::configuration("a run needs at least one slave"));
        }
        let mut seen = HashSet::new();
        for slave in &run.slaves {
            if *slave == run.master {
                return Err(SyncError::configuration(format!(
                    "system '{slave}' cannot be both master and slave"
                )));
            }
            if !seen.insert(slave.as_str()) {
                return Err(SyncError::configuration(format!(
                    "slave '{slave}' is listed more than once"
                )));
            }
        }

        let master = self.adapter(&run.master)?;
        let master_total = match run.direction {
            SyncDirection::ToSlaves => Some(count_users(&master).await?),
            SyncDirection::ToMaster => None,
        };

        let mut slaves = Vec::with_capacity(run.slaves.len());
        for name in &run.slaves {
            let adapter = self.adapter(name)?;
            let total = match master_total {
                Some(total) => total,
                None => count_users(&adapter).await?,
            };
            slaves.push(SlaveDescriptor::new(name.clone(), total));
        }

        let batch = run.user_batch_size.unwrap_or(self.config.default_user_batch);
        let mut state = SyncState::new(run.master, run.direction, slaves, batch);
        if let Some(syncid) = run.syncid {
            state = state.with_syncid(syncid);
        }

        self.checkpoints.create(&state).await?;
        info!(
            syncid = %state.syncid,
            slaves = state.slaves.len(),
            total_to_sync = state.total_to_sync,
            "Sync run created"
        );
        Ok(state)
    }

    /// Invoke [`run`](Self::run) on the stored state of `syncid`.
    pub async fn run_by_id(&self, syncid: SyncId, budget: InvocationBudget) -> SyncResult<RunOutcome> {
        let mut state = self.load(syncid).await?;
        self.run(&mut state, budget).await
    }

    /// Advance a run by at most `budget` users.
    ///
    /// Once the lease is held, `state` is replaced by the stored checkpoint, so
    /// a stale copy never repeats users another invocation already processed.
    /// It is then updated in place with the progress made. Per-user failures
    /// become `error` entries in the detail log; any other failure is logged,
    /// leaves the run resumable from its last checkpoint, and is returned.
    #[instrument(skip(self, state), fields(syncid = %state.syncid))]
    pub async fn run(&self, state: &mut SyncState, budget: InvocationBudget) -> SyncResult<RunOutcome> {
        if state.completed {
            debug!("Run already completed");
            return Ok(RunOutcome::AlreadyCompleted);
        }

        let syncid = state.syncid;
        let holder = Uuid::new_v4().to_string();
        if !self
            .checkpoints
            .try_acquire(syncid, &holder, self.config.lease_ttl())
            .await?
        {
            info!("Run is held by another invocation");
            return Ok(RunOutcome::Busy);
        }

        let result = match self.resume(state).await {
            Ok(()) if state.completed => Ok(Stop::AlreadyCompleted),
            Ok(()) => {
                info!(
                    plugin_offset = state.plugin_offset,
                    user_offset = state.user_offset,
                    synced_users = state.synced_users,
                    "Sync invocation started"
                );
                let result = self.drive(state, budget, &holder).await;
                if let Err(err) = &result {
                    self.save_after_failure(state, &holder, err).await;
                }
                result
            }
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            error!(error = %err, "Sync invocation failed; run stays resumable");
        }
        if let Err(release_err) = self.checkpoints.release(syncid, &holder).await {
            warn!(error = %release_err, "Could not release run lease");
        }

        let outcome = match result? {
            Stop::AlreadyCompleted => {
                debug!("Run was completed by another invocation");
                RunOutcome::AlreadyCompleted
            }
            Stop::Completed => {
                info!(
                    synced_users = state.synced_users,
                    sync_errors = state.sync_errors,
                    "Sync run completed"
                );
                RunOutcome::Completed
            }
            Stop::Paused => {
                info!(
                    synced_users = state.synced_users,
                    total_to_sync = state.total_to_sync,
                    plugin_offset = state.plugin_offset,
                    "Sync run paused"
                );
                RunOutcome::Paused
            }
        };
        Ok(outcome)
    }

    /// Current state of a run with its lease flag and open error count.
    pub async fn status(&self, syncid: SyncId) -> SyncResult<RunSummary> {
        let state = self.load(syncid).await?;
        let active = self.checkpoints.is_active(syncid).await?;
        let error_count = self
            .details
            .count(syncid, &LogQuery::all().with_action(LogAction::Error))
            .await?;

        Ok(RunSummary {
            status: state.status(active),
            progress_percentage: state.progress_percentage(),
            active,
            error_count,
            state,
        })
    }

    async fn load(&self, syncid: SyncId) -> SyncResult<SyncState> {
        self.checkpoints
            .load(syncid)
            .await?
            .ok_or_else(|| StoreError::not_found("sync run", syncid).into())
    }

    fn adapter(&self, system: &str) -> SyncResult<BoxedAdapter> {
        self.adapters
            .get(system)
            .map_err(|e| SyncError::adapter(system, e))
    }

    fn route(&self, state: &SyncState, slave: &str) -> SyncResult<Route> {
        let master = self.adapter(&state.master)?;
        let other = self.adapter(slave)?;
        let (source, target) = match state.direction {
            SyncDirection::ToSlaves => (master, other),
            SyncDirection::ToMaster => (other, master),
        };
        Ok(Route {
            slave: slave.to_string(),
            source,
            target,
        })
    }

    /// Replace `state` with the stored checkpoint of the run.
    async fn resume(&self, state: &mut SyncState) -> SyncResult<()> {
        let stored = self.load(state.syncid).await?;
        stored
            .check_invariants()
            .map_err(|message| SyncError::invalid_state(stored.syncid, message))?;
        *state = stored;
        Ok(())
    }

    async fn finish(&self, state: &mut SyncState, holder: &str) -> SyncResult<Stop> {
        state.complete();
        self.commit(state, holder).await?;
        Ok(Stop::Completed)
    }

    async fn pause(&self, state: &SyncState, holder: &str) -> SyncResult<Stop> {
        self.commit(state, holder).await?;
        Ok(Stop::Paused)
    }

    /// Renew the lease and persist progress.
    ///
    /// Nothing is written once another holder owns the run.
    async fn commit(&self, state: &SyncState, holder: &str) -> SyncResult<()> {
        state
            .check_invariants()
            .map_err(|message| SyncError::invalid_state(state.syncid, message))?;
        let renewed = self
            .checkpoints
            .try_acquire(state.syncid, holder, self.config.lease_ttl())
            .await?;
        if !renewed {
            return Err(SyncError::LeaseLost {
                syncid: state.syncid,
            });
        }
        self.checkpoints.save(state).await?;
        debug!(synced_users = state.synced_users, "Checkpoint saved");
        Ok(())
    }

    async fn save_after_failure(&self, state: &SyncState, holder: &str, err: &SyncError) {
        if matches!(err, SyncError::LeaseLost { .. } | SyncError::InvalidState { .. }) {
            return;
        }
        if let Err(save_err) = self.commit(state, holder).await {
            warn!(error = %save_err, "Could not checkpoint after failure");
        }
    }

    async fn drive(
        &self,
        state: &mut SyncState,
        mut budget: InvocationBudget,
        holder: &str,
    ) -> SyncResult<Stop> {
        let interval = self.config.checkpoint_interval.max(1);
        let mut since_checkpoint = 0usize;

        loop {
            if state.all_users_synced() {
                return self.finish(state, holder).await;
            }
            let Some(slave) = state.current_slave().cloned() else {
                return self.finish(state, holder).await;
            };
            if budget.is_exhausted() {
                return self.pause(state, holder).await;
            }
            if slave.is_exhausted() {
                state.advance_slave();
                continue;
            }

            let route = self.route(state, &slave.system_name)?;
            let batch = state.user_batch_size.max(1);
            let expected = slave.total_remaining.min(batch as u64) as usize;
            let offset = if slave.positional_listing {
                state.user_offset
            } else {
                0
            };

            let listing = route
                .source
                .list_users(offset, batch)
                .await
                .map_err(|e| SyncError::adapter(route.source.system_name(), e))?;

            if listing.is_empty() {
                warn!(
                    system = %route.slave,
                    offset,
                    total_remaining = slave.total_remaining,
                    "Listing returned no users; ending slave early"
                );
                state.advance_slave();
                self.commit(state, holder).await?;
                continue;
            }

            if listing.len() != expected && slave.positional_listing {
                warn!(
                    system = %route.slave,
                    expected,
                    returned = listing.len(),
                    "Listing size differs from expected; listing from offset 0 from now on"
                );
                let current = &mut state.slaves[state.plugin_offset];
                current.positional_listing = false;
                state.user_offset = 0;
            }

            for descriptor in &listing {
                let action = self.sync_user(state.syncid, &route, descriptor).await?;

                let current = &mut state.slaves[state.plugin_offset];
                current.record(action);
                let positional = current.positional_listing;
                let slave_done = current.is_exhausted();

                state.synced_users += 1;
                if action == LogAction::Error {
                    state.sync_errors += 1;
                }
                if positional {
                    state.user_offset += 1;
                }
                budget.consume();

                since_checkpoint += 1;
                if since_checkpoint >= interval {
                    self.commit(state, holder).await?;
                    since_checkpoint = 0;
                }

                if state.all_users_synced() {
                    return self.finish(state, holder).await;
                }
                if slave_done {
                    info!(system = %route.slave, "Slave finished");
                    state.advance_slave();
                    if state.slaves_exhausted() {
                        return self.finish(state, holder).await;
                    }
                    return self.pause(state, holder).await;
                }
                if budget.is_exhausted() {
                    return self.pause(state, holder).await;
                }
            }
        }
    }

    /// Sync one listed user and append its detail entry.
    async fn sync_user(
        &self,
        syncid: SyncId,
        route: &Route,
        descriptor: &UserDescriptor,
    ) -> SyncResult<LogAction> {
        let source_name = route.source.system_name();
        let target_name = route.target.system_name();

        let source_record = match route.source.fetch(&descriptor.key()).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let diagnostics = Diagnostics::from_error(format!(
                    "user '{}' not found in {source_name}",
                    descriptor.username
                ));
                return self
                    .record_failure(syncid, route, descriptor, None, None, diagnostics)
                    .await;
            }
            Err(e) => {
                return self
                    .record_failure(syncid, route, descriptor, None, None, Diagnostics::from_error(e.to_string()))
                    .await;
            }
        };

        let counterpart = match route.target.fetch(&source_record.key()).await {
            Ok(counterpart) => counterpart,
            Err(e) => {
                return self
                    .record_failure(
                        syncid,
                        route,
                        descriptor,
                        Some(source_record),
                        None,
                        Diagnostics::from_error(e.to_string()),
                    )
                    .await;
            }
        };
        let create_if_missing = counterpart.is_none();

        let outcome = match route.target.upsert(&source_record, create_if_missing).await {
            Ok(outcome) => outcome,
            Err(e) => {
                return self
                    .record_failure(
                        syncid,
                        route,
                        descriptor,
                        Some(source_record),
                        counterpart,
                        Diagnostics::from_error(e.to_string()),
                    )
                    .await;
            }
        };

        if outcome.is_error() {
            let conflict = outcome.record.or(counterpart);
            return self
                .record_failure(
                    syncid,
                    route,
                    descriptor,
                    Some(source_record),
                    conflict,
                    outcome.diagnostics,
                )
                .await;
        }

        let confirmed = match outcome.record {
            Some(record) => record,
            None => match route.target.fetch(&source_record.key()).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    let diagnostics = Diagnostics::from_error(format!(
                        "user '{}' not found in {target_name} after upsert",
                        source_record.username
                    ));
                    return self
                        .record_failure(syncid, route, descriptor, Some(source_record), None, diagnostics)
                        .await;
                }
                Err(e) => {
                    return self
                        .record_failure(
                            syncid,
                            route,
                            descriptor,
                            Some(source_record),
                            None,
                            Diagnostics::from_error(e.to_string()),
                        )
                        .await;
                }
            },
        };

        if let Err(e) = route
            .target
            .update_lookup(&confirmed, &source_record, source_name)
            .await
        {
            warn!(
                system = %target_name,
                username = %source_record.username,
                error = %e,
                "Lookup update failed"
            );
        }

        let action = LogAction::from(outcome.action);
        let entry = NewLogEntry::success(
            syncid,
            &route.slave,
            &source_record,
            action,
            outcome.diagnostics.joined(Severity::Info),
        );
        self.details.append(entry).await?;
        debug!(system = %route.slave, username = %source_record.username, %action, "User synced");
        Ok(action)
    }

    async fn record_failure(
        &self,
        syncid: SyncId,
        route: &Route,
        descriptor: &UserDescriptor,
        source_record: Option<UserRecord>,
        conflict_record: Option<UserRecord>,
        diagnostics: Diagnostics,
    ) -> SyncResult<LogAction> {
        let message = diagnostics.error_text();
        let payload = ConflictPayload {
            user: ConflictSide::new(route.source.system_name(), source_record)
                .with_descriptor(descriptor.clone()),
            conflict: ConflictSide::new(route.target.system_name(), conflict_record)
                .with_diagnostics(&diagnostics),
        };
        let entry = NewLogEntry::error(syncid, &route.slave, descriptor, message.as_str(), payload);
        let id = self.details.append(entry).await?;
        debug!(
            system = %route.slave,
            username = %descriptor.username,
            entry_id = id,
            message = %message,
            "User sync failed"
        );
        Ok(LogAction::Error)
    }
}

async fn count_users(adapter: &BoxedAdapter) -> SyncResult<u64> {
    adapter
        .count_users()
        .await
        .map(|n| n as u64)
        .map_err(|e| SyncError::adapter(adapter.system_name(), e))
}
