//! # User Sync Engine
//!
//! Checkpointed, resumable synchronization of user accounts between one master
//! identity system and any number of slaves.
//!
//! This crate provides:
//! - Batched, budgeted sync runs that resume from a persisted checkpoint
//! - One detail log entry per processed user
//! - Deferred, operator-driven resolution of failed syncs
//! - In-memory and PostgreSQL stores
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  list/fetch  ┌──────────────┐  upsert  ┌──────────────┐
//! │    Source    │─────────────►│  SyncEngine  │─────────►│    Target    │
//! │   adapter    │              │              │          │   adapter    │
//! └──────────────┘              └──────┬───────┘          └──────────────┘
//!                                      │
//!                     ┌────────────────┼────────────────┐
//!                     ▼                                 ▼
//!             ┌───────────────┐                 ┌───────────────┐
//!             │CheckpointStore│                 │   DetailLog   │◄──── ConflictResolver
//!             └───────────────┘                 └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use usersync_engine::prelude::*;
//!
//! let engine = SyncEngine::new(
//!     adapters,
//!     Arc::new(MemoryCheckpointStore::new()),
//!     Arc::new(MemoryDetailLog::new()),
//! );
//!
//! let state = engine
//!     .start_run(NewSyncRun::new("master", SyncDirection::ToSlaves, ["forumA"]))
//!     .await?;
//!
//! while !engine
//!     .run_by_id(state.syncid, InvocationBudget::Users(100))
//!     .await?
//!     .is_finished()
//! {}
//! ```

pub mod config;
pub mod detail;
pub mod engine;
pub mod error;
pub mod ids;
pub mod resolver;
pub mod state;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::detail::{
        ConflictPayload, ConflictSide, DetailLogEntry, LogAction, LogQuery, LogSortField,
        NewLogEntry, Pagination, SortDirection,
    };
    pub use crate::engine::{InvocationBudget, NewSyncRun, RunOutcome, RunSummary, SyncEngine};
    pub use crate::error::{StoreError, StoreResult, SyncError, SyncResult};
    pub use crate::ids::{EntryId, SyncId};
    pub use crate::resolver::{
        ConflictResolver, ResolutionAction, ResolutionOutcome, ResolutionReport, ResolutionStatus,
    };
    pub use crate::state::{
        RunStatus, SlaveDescriptor, SyncDirection, SyncState, SYNC_STATE_SCHEMA_VERSION,
    };
    pub use crate::store::{
        CheckpointStore, DetailLog, MemoryCheckpointStore, MemoryDetailLog, PgCheckpointStore,
        PgDetailLog,
    };
}

pub use prelude::*;
