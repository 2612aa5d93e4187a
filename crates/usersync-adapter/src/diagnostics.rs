//! Diagnostics reported by adapter operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::record::UserRecord;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Debug,
}

impl Severity {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Messages collected during one adapter call, grouped by severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    messages: BTreeMap<Severity, Vec<String>>,
}

impl Diagnostics {
    /// Create an empty set of diagnostics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostics holding a single error message.
    pub fn from_error(message: impl Into<String>) -> Self {
        let mut diagnostics = Self::new();
        diagnostics.push(Severity::Error, message);
        diagnostics
    }

    /// Record a message.
    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.messages
            .entry(severity)
            .or_default()
            .push(message.into());
    }

    /// Record a message using builder pattern.
    #[must_use]
    pub fn with(mut self, severity: Severity, message: impl Into<String>) -> Self {
        self.push(severity, message);
        self
    }

    /// Messages of the given severity.
    pub fn get(&self, severity: Severity) -> &[String] {
        self.messages
            .get(&severity)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Whether any error-severity message was recorded.
    pub fn has_errors(&self) -> bool {
        !self.get(Severity::Error).is_empty()
    }

    /// Messages of the given severity joined with `"; "`.
    pub fn joined(&self, severity: Severity) -> String {
        self.get(severity).join("; ")
    }

    /// Error messages joined with `"; "`.
    pub fn error_text(&self) -> String {
        self.joined(Severity::Error)
    }

    /// Append every message of `other`.
    pub fn extend(&mut self, other: Diagnostics) {
        for (severity, messages) in other.messages {
            self.messages.entry(severity).or_default().extend(messages);
        }
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.messages.values().all(Vec::is_empty)
    }
}

/// What an upsert did to the target system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordAction {
    /// A new user was created.
    Created,
    /// An existing user was updated.
    Updated,
    /// The user was removed (e.g. the source marks it as deleted).
    Deleted,
}

impl RecordAction {
    /// Convert to string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordAction::Created => "created",
            RecordAction::Updated => "updated",
            RecordAction::Deleted => "deleted",
        }
    }
}

impl fmt::Display for RecordAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of an upsert call.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// Canonical record after the write, when the adapter returns it.
    pub record: Option<UserRecord>,
    /// Action the adapter reports having taken.
    pub action: RecordAction,
    /// Messages emitted during the call.
    pub diagnostics: Diagnostics,
}

impl UpsertOutcome {
    /// Successful outcome with the written record.
    pub fn applied(record: UserRecord, action: RecordAction) -> Self {
        Self {
            record: Some(record),
            action,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Successful outcome where the adapter did not return the record.
    pub fn without_record(action: RecordAction) -> Self {
        Self {
            record: None,
            action,
            diagnostics: Diagnostics::new(),
        }
    }

    /// Failed outcome carrying an error diagnostic.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            record: None,
            action: RecordAction::Updated,
            diagnostics: Diagnostics::from_error(message),
        }
    }

    /// Attach diagnostics.
    #[must_use]
    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Whether the upsert reported an error.
    pub fn is_error(&self) -> bool {
        self.diagnostics.has_errors()
    }
}
