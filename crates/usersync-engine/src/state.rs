//! Persisted run state.
//!
//! One [`SyncState`] exists per run and is the checkpoint the engine resumes
//! from. It is stored as a versioned JSON document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detail::LogAction;
use crate::ids::SyncId;

/// Schema version written by this build.
pub const SYNC_STATE_SCHEMA_VERSION: u32 = 1;

/// Which way users flow in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    /// Slave users are written into the master.
    ToMaster,
    /// Master users are written into every slave.
    ToSlaves,
}

impl SyncDirection {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::ToMaster => "to_master",
            SyncDirection::ToSlaves => "to_slaves",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "to_master" | "master" => Ok(SyncDirection::ToMaster),
            "to_slaves" | "slave" | "slaves" => Ok(SyncDirection::ToSlaves),
            _ => Err(format!("Unknown sync direction: {s}")),
        }
    }
}

/// Lifecycle of a run as seen by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No user processed yet.
    NotStarted,
    /// An invocation currently holds the run lease.
    Active,
    /// Some users processed, waiting for the next invocation.
    Paused,
    /// Terminal.
    Completed,
}

impl RunStatus {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotStarted => "not_started",
            RunStatus::Active => "active",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
        }
    }

    /// Check if this is a terminal status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of one slave system within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveDescriptor {
    /// Name of the slave system.
    pub system_name: String,
    /// Users expected to be synchronized for this slave.
    pub total_to_sync: u64,
    /// Users created in the target.
    #[serde(default)]
    pub created: u64,
    /// Users updated in the target.
    #[serde(default)]
    pub updated: u64,
    /// Users deleted in the target.
    #[serde(default)]
    pub deleted: u64,
    /// Users that ended in an error entry.
    #[serde(default)]
    pub errors: u64,
    /// Users still to be processed.
    pub total_remaining: u64,
    /// Whether listing offsets can be trusted. Cleared once the adapter returns
    /// a listing of unexpected length; from then on every listing starts at 0.
    #[serde(default = "default_positional_listing")]
    pub positional_listing: bool,
}

fn default_positional_listing() -> bool {
    true
}

impl SlaveDescriptor {
    /// Create a descriptor for `total_to_sync` users.
    pub fn new(system_name: impl Into<String>, total_to_sync: u64) -> Self {
        Self {
            system_name: system_name.into(),
            total_to_sync,
            created: 0,
            updated: 0,
            deleted: 0,
            errors: 0,
            total_remaining: total_to_sync,
            positional_listing: true,
        }
    }

    /// Count one processed user under `action`.
    pub fn record(&mut self, action: LogAction) {
        match action {
            LogAction::Created => self.created += 1,
            LogAction::Updated => self.updated += 1,
            LogAction::Deleted => self.deleted += 1,
            LogAction::Error => self.errors += 1,
            LogAction::Resolved => {}
        }
        self.total_remaining = self.total_remaining.saturating_sub(1);
    }

    /// Whether every expected user has been processed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.total_remaining == 0
    }

    /// Successful outcomes so far.
    #[must_use]
    pub fn succeeded(&self) -> u64 {
        self.created + self.updated + self.deleted
    }
}

/// Checkpointed state of one synchronization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Version of this document's schema.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Run identifier.
    pub syncid: SyncId,
    /// Name of the master system.
    pub master: String,
    /// Direction users flow.
    pub direction: SyncDirection,
    /// Slaves in processing order.
    pub slaves: Vec<SlaveDescriptor>,
    /// Index of the slave currently being processed.
    #[serde(default)]
    pub plugin_offset: usize,
    /// Listing offset within the current slave.
    #[serde(default)]
    pub user_offset: usize,
    /// Users fetched per listing call.
    pub user_batch_size: usize,
    /// Users processed across all slaves.
    #[serde(default)]
    pub synced_users: u64,
    /// Users to process across all slaves.
    pub total_to_sync: u64,
    /// Users that ended in an error entry.
    #[serde(default)]
    pub sync_errors: u64,
    /// Terminal marker.
    #[serde(default)]
    pub completed: bool,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// When the run completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Last checkpoint time.
    pub updated_at: DateTime<Utc>,
}

fn default_schema_version() -> u32 {
    SYNC_STATE_SCHEMA_VERSION
}

impl SyncState {
    /// Create a fresh run. `total_to_sync` is the sum of the slaves' totals.
    pub fn new(
        master: impl Into<String>,
        direction: SyncDirection,
        slaves: Vec<SlaveDescriptor>,
        user_batch_size: usize,
    ) -> Self {
        let now = Utc::now();
        let total_to_sync = slaves.iter().map(|s| s.total_to_sync).sum();
        Self {
            schema_version: SYNC_STATE_SCHEMA_VERSION,
            syncid: SyncId::new(),
            master: master.into(),
            direction,
            slaves,
            plugin_offset: 0,
            user_offset: 0,
            user_batch_size: user_batch_size.max(1),
            synced_users: 0,
            total_to_sync,
            sync_errors: 0,
            completed: false,
            started_at: now,
            finished_at: None,
            updated_at: now,
        }
    }

    /// Use a caller-chosen run identifier.
    #[must_use]
    pub fn with_syncid(mut self, syncid: SyncId) -> Self {
        self.syncid = syncid;
        self
    }

    /// Slave currently being processed, if any remain.
    #[must_use]
    pub fn current_slave(&self) -> Option<&SlaveDescriptor> {
        self.slaves.get(self.plugin_offset)
    }

    /// Whether every slave has been walked.
    #[must_use]
    pub fn slaves_exhausted(&self) -> bool {
        self.plugin_offset >= self.slaves.len()
    }

    /// Move to the first user of the next slave.
    pub fn advance_slave(&mut self) {
        self.plugin_offset += 1;
        self.user_offset = 0;
    }

    /// Mark the run finished.
    pub fn complete(&mut self) {
        let now = Utc::now();
        self.plugin_offset = self.plugin_offset.max(self.slaves.len());
        self.user_offset = 0;
        self.completed = true;
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Whether every expected user has been processed.
    #[must_use]
    pub fn all_users_synced(&self) -> bool {
        self.synced_users >= self.total_to_sync
    }

    /// Processed share of the run in percent.
    #[must_use]
    pub fn progress_percentage(&self) -> f64 {
        if self.total_to_sync == 0 {
            if self.completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.synced_users as f64 / self.total_to_sync as f64) * 100.0
        }
    }

    /// Status derived from the persisted counters and the lease flag.
    #[must_use]
    pub fn status(&self, active: bool) -> RunStatus {
        if self.completed {
            RunStatus::Completed
        } else if active {
            RunStatus::Active
        } else if self.synced_users == 0 && self.plugin_offset == 0 {
            RunStatus::NotStarted
        } else {
            RunStatus::Paused
        }
    }

    /// Check the counter invariants that must hold at every checkpoint.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.synced_users > self.total_to_sync {
            return Err(format!(
                "synced_users ({}) exceeds total_to_sync ({})",
                self.synced_users, self.total_to_sync
            ));
        }
        if self.completed && !self.slaves_exhausted() {
            return Err(format!(
                "run is completed but plugin_offset {} has not passed {} slaves",
                self.plugin_offset,
                self.slaves.len()
            ));
        }
        Ok(())
    }
}
