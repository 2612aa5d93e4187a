//! # Identity Adapter Contract
//!
//! Abstractions for connecting the user synchronizer to identity systems.
//!
//! One system acts as the master and any number of others as slaves; each is
//! reached through an [`IdentityAdapter`]:
//!
//! - `count_users` / `list_users` - enumerate users in bounded pages
//! - `fetch` - load a full [`UserRecord`]
//! - `upsert` / `remove` - write to the system, reporting [`Diagnostics`]
//! - `update_lookup` / `remove_lookup` - maintain master/slave identity links
//!
//! ## Crate Organization
//!
//! - [`record`] - `UserRecord`, `UserDescriptor`, `UserKey`
//! - [`diagnostics`] - severities, diagnostics and upsert outcomes
//! - [`error`] - `AdapterError` with transient/permanent classification
//! - [`traits`] - the adapter trait and `RemoveContext`
//! - [`registry`] - name to adapter lookup

pub mod diagnostics;
pub mod error;
pub mod record;
pub mod registry;
pub mod traits;

/// Prelude module for convenient imports.
///
/// ```
/// use usersync_adapter::prelude::*;
/// ```
pub mod prelude {
    pub use crate::diagnostics::{Diagnostics, RecordAction, Severity, UpsertOutcome};
    pub use crate::error::{AdapterError, AdapterResult};
    pub use crate::record::{UserDescriptor, UserKey, UserRecord};
    pub use crate::registry::{AdapterRegistry, BoxedAdapter};
    pub use crate::traits::{IdentityAdapter, RemoveContext};
}

// Re-export async_trait for adapter implementors
pub use async_trait::async_trait;

pub use prelude::*;
