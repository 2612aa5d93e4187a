//! Detail log entries.
//!
//! Every processed user produces exactly one entry. Entries written with
//! [`LogAction::Error`] carry a [`ConflictPayload`] the operator later resolves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use usersync_adapter::{Diagnostics, RecordAction, Severity, UserDescriptor, UserRecord};

use crate::ids::{EntryId, SyncId};

/// Outcome recorded for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Created,
    Updated,
    Deleted,
    /// Awaiting operator resolution.
    Error,
    /// Terminal; set only by the conflict resolver.
    Resolved,
}

impl LogAction {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Created => "created",
            LogAction::Updated => "updated",
            LogAction::Deleted => "deleted",
            LogAction::Error => "error",
            LogAction::Resolved => "resolved",
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LogAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(LogAction::Created),
            "updated" => Ok(LogAction::Updated),
            "deleted" => Ok(LogAction::Deleted),
            "error" => Ok(LogAction::Error),
            "resolved" => Ok(LogAction::Resolved),
            _ => Err(format!("Unknown log action: {s}")),
        }
    }
}

impl From<RecordAction> for LogAction {
    fn from(action: RecordAction) -> Self {
        match action {
            RecordAction::Created => LogAction::Created,
            RecordAction::Updated => LogAction::Updated,
            RecordAction::Deleted => LogAction::Deleted,
        }
    }
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSide {
    /// System the record belongs to.
    pub system_name: String,
    /// Record as last seen, if it could be loaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<UserRecord>,
    /// Listing item the sync started from (source side only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<UserDescriptor>,
    /// Error messages raised while writing to this side.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Debug messages raised while writing to this side.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub debug: Vec<String>,
}

impl ConflictSide {
    /// Side for `system_name` holding `record`.
    pub fn new(system_name: impl Into<String>, record: Option<UserRecord>) -> Self {
        Self {
            system_name: system_name.into(),
            record,
            descriptor: None,
            errors: Vec::new(),
            debug: Vec::new(),
        }
    }

    /// Attach the listing descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: UserDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Copy error and debug messages out of `diagnostics`.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: &Diagnostics) -> Self {
        self.errors = diagnostics.get(Severity::Error).to_vec();
        self.debug = diagnostics.get(Severity::Debug).to_vec();
        self
    }

    /// Record if present and well formed.
    #[must_use]
    pub fn valid_record(&self) -> Option<&UserRecord> {
        self.record.as_ref().filter(|r| r.is_well_formed())
    }
}

/// Both records of a failed sync: `user` is the side the user was read from,
/// `conflict` the side the write was rejected by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictPayload {
    pub user: ConflictSide,
    pub conflict: ConflictSide,
}

impl ConflictPayload {
    /// Both records, when both are present and well formed.
    pub fn records(&self) -> Result<(&UserRecord, &UserRecord), String> {
        match (self.user.valid_record(), self.conflict.valid_record()) {
            (Some(user), Some(conflict)) => Ok((user, conflict)),
            (None, Some(_)) => Err(format!(
                "user side ({}) does not hold a valid user record",
                self.user.system_name
            )),
            (Some(_), None) => Err(format!(
                "conflict side ({}) does not hold a valid user record",
                self.conflict.system_name
            )),
            (None, None) => Err("neither side holds a valid user record".to_string()),
        }
    }
}

/// Entry to append; the log assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLogEntry {
    pub syncid: SyncId,
    /// Slave system the entry belongs to.
    pub system_name: String,
    pub username: String,
    pub email: String,
    pub action: LogAction,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_payload: Option<ConflictPayload>,
}

impl NewLogEntry {
    /// Successful outcome.
    pub fn success(
        syncid: SyncId,
        system_name: impl Into<String>,
        record: &UserRecord,
        action: LogAction,
        message: impl Into<String>,
    ) -> Self {
        Self {
            syncid,
            system_name: system_name.into(),
            username: record.username.clone(),
            email: record.email.clone(),
            action,
            message: message.into(),
            conflict_payload: None,
        }
    }

    /// Failed outcome awaiting resolution.
    pub fn error(
        syncid: SyncId,
        system_name: impl Into<String>,
        descriptor: &UserDescriptor,
        message: impl Into<String>,
        payload: ConflictPayload,
    ) -> Self {
        Self {
            syncid,
            system_name: system_name.into(),
            username: descriptor.username.clone(),
            email: descriptor.email.clone(),
            action: LogAction::Error,
            message: message.into(),
            conflict_payload: Some(payload),
        }
    }

    /// Stored form of this entry.
    #[must_use]
    pub fn into_entry(self, id: EntryId, created_at: DateTime<Utc>) -> DetailLogEntry {
        DetailLogEntry {
            id,
            syncid: self.syncid,
            system_name: self.system_name,
            username: self.username,
            email: self.email,
            action: self.action,
            message: self.message,
            conflict_payload: self.conflict_payload,
            created_at,
        }
    }
}

/// Stored per-user outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailLogEntry {
    pub id: EntryId,
    pub syncid: SyncId,
    pub system_name: String,
    pub username: String,
    pub email: String,
    pub action: LogAction,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_payload: Option<ConflictPayload>,
    pub created_at: DateTime<Utc>,
}

/// Field to order log queries by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSortField {
    #[default]
    Id,
    SystemName,
    Username,
    Email,
    Action,
    Message,
    CreatedAt,
}

impl LogSortField {
    /// Column name in the detail table.
    #[must_use]
    pub fn column(&self) -> &'static str {
        match self {
            LogSortField::Id => "id",
            LogSortField::SystemName => "system_name",
            LogSortField::Username => "username",
            LogSortField::Email => "email",
            LogSortField::Action => "action",
            LogSortField::Message => "message",
            LogSortField::CreatedAt => "created_at",
        }
    }
}

impl std::str::FromStr for LogSortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "id" => Ok(LogSortField::Id),
            "system_name" => Ok(LogSortField::SystemName),
            "username" => Ok(LogSortField::Username),
            "email" => Ok(LogSortField::Email),
            "action" => Ok(LogSortField::Action),
            "message" => Ok(LogSortField::Message),
            "created_at" => Ok(LogSortField::CreatedAt),
            _ => Err(format!("Unknown sort field: {s}")),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// SQL keyword.
    #[must_use]
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Offset/limit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub offset: usize,
    /// `None` returns everything after `offset`.
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Pagination {
    /// Window of `limit` entries starting at `offset`.
    #[must_use]
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    /// Every entry.
    #[must_use]
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: None,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::all()
    }
}

/// Filter, ordering and window for [`DetailLog::query`](crate::store::DetailLog::query).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogQuery {
    /// Restrict to one action; `None` means all actions.
    #[serde(default)]
    pub action: Option<LogAction>,
    #[serde(default)]
    pub sort: LogSortField,
    #[serde(default)]
    pub direction: SortDirection,
    #[serde(default)]
    pub page: Pagination,
}

impl LogQuery {
    /// Every entry in id order.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restrict to `action`.
    #[must_use]
    pub fn with_action(mut self, action: LogAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Order by `field` in `direction`.
    #[must_use]
    pub fn sorted_by(mut self, field: LogSortField, direction: SortDirection) -> Self {
        self.sort = field;
        self.direction = direction;
        self
    }

    /// Apply an offset/limit window.
    #[must_use]
    pub fn paged(mut self, page: Pagination) -> Self {
        self.page = page;
        self
    }
}
