//! Operator-driven resolution of failed syncs.
//!
//! Each `error` entry in the detail log carries both records involved. An
//! operator picks a [`ResolutionAction`] per entry; the resolver applies it
//! and flips the entry to `resolved` once the adapter confirms.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use usersync_adapter::{AdapterRegistry, AdapterResult, BoxedAdapter, RemoveContext, UserRecord};

use crate::detail::{DetailLogEntry, LogAction, LogQuery};
use crate::error::{SyncError, SyncResult};
use crate::ids::{EntryId, SyncId};
use crate::store::DetailLog;

/// Operator decision for one failed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Copy the conflict-side record over the user side.
    ConflictWins = 1,
    /// Copy the user-side record over the conflict side.
    UserWins = 2,
    /// Delete the user-side record.
    DeleteUser = 3,
    /// Delete the conflict-side record.
    DeleteConflict = 4,
}

impl ResolutionAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionAction::ConflictWins => "conflict_wins",
            ResolutionAction::UserWins => "user_wins",
            ResolutionAction::DeleteUser => "delete_user",
            ResolutionAction::DeleteConflict => "delete_conflict",
        }
    }

    /// Numeric code used by operator tooling.
    #[must_use]
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ResolutionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<u8> for ResolutionAction {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ResolutionAction::ConflictWins),
            2 => Ok(ResolutionAction::UserWins),
            3 => Ok(ResolutionAction::DeleteUser),
            4 => Ok(ResolutionAction::DeleteConflict),
            _ => Err(format!("Unknown resolution action code: {code}")),
        }
    }
}

/// What happened to one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ResolutionStatus {
    Resolved,
    /// Adapter reported an error; the entry stays open.
    Failed { message: String },
    /// The entry does not hold two usable records.
    TypeMismatch { message: String },
    /// The entry is not among the loaded error entries.
    NotInPage,
}

/// Outcome of one decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOutcome {
    pub entry_id: EntryId,
    pub action: ResolutionAction,
    pub status: ResolutionStatus,
}

/// Outcomes of a [`ConflictResolver::resolve`] call, in entry id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub outcomes: Vec<ResolutionOutcome>,
}

impl ResolutionReport {
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.count(|s| matches!(s, ResolutionStatus::Resolved))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.resolved()
    }

    /// Outcome for `entry_id`, if a decision was submitted for it.
    #[must_use]
    pub fn outcome(&self, entry_id: EntryId) -> Option<&ResolutionOutcome> {
        self.outcomes.iter().find(|o| o.entry_id == entry_id)
    }

    fn count(&self, predicate: impl Fn(&ResolutionStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}

/// Applies operator decisions to failed entries.
pub struct ConflictResolver {
    adapters: AdapterRegistry,
    details: Arc<dyn DetailLog>,
}

impl ConflictResolver {
    pub fn new(adapters: AdapterRegistry, details: Arc<dyn DetailLog>) -> Self {
        Self { adapters, details }
    }

    /// Apply `decisions` to the `error` entries of `syncid` selected by `page`.
    ///
    /// The action filter of `page` is forced to `error`. A failure on one entry
    /// never stops the others; only a failure loading the page is returned.
    #[instrument(skip(self, decisions, page), fields(decisions = decisions.len()))]
    pub async fn resolve(
        &self,
        syncid: SyncId,
        decisions: &BTreeMap<EntryId, ResolutionAction>,
        page: &LogQuery,
    ) -> SyncResult<ResolutionReport> {
        let query = page.clone().with_action(LogAction::Error);
        let entries: HashMap<EntryId, DetailLogEntry> = self
            .details
            .query(syncid, &query)
            .await
            .map_err(|e| {
                error!(error = %e, "Could not load entries to resolve");
                SyncError::from(e)
            })?
            .into_iter()
            .map(|entry| (entry.id, entry))
            .collect();

        let mut report = ResolutionReport::default();
        for (&entry_id, &action) in decisions {
            let status = match entries.get(&entry_id) {
                Some(entry) => self.apply(syncid, entry, action).await,
                None => ResolutionStatus::NotInPage,
            };
            report.outcomes.push(ResolutionOutcome {
                entry_id,
                action,
                status,
            });
        }

        info!(
            resolved = report.resolved(),
            failed = report.failed(),
            "Resolution pass finished"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        syncid: SyncId,
        entry: &DetailLogEntry,
        action: ResolutionAction,
    ) -> ResolutionStatus {
        let Some(payload) = entry.conflict_payload.as_ref() else {
            return ResolutionStatus::TypeMismatch {
                message: "entry carries no conflict payload".to_string(),
            };
        };
        let (user, conflict) = match payload.records() {
            Ok(records) => records,
            Err(message) => {
                warn!(entry_id = entry.id, %message, "Conflict payload is unusable");
                return ResolutionStatus::TypeMismatch { message };
            }
        };

        let user_system = payload.user.system_name.as_str();
        let conflict_system = payload.conflict.system_name.as_str();
        let result = match action {
            ResolutionAction::ConflictWins => {
                self.overwrite(conflict_system, conflict, user_system).await
            }
            ResolutionAction::UserWins => self.overwrite(user_system, user, conflict_system).await,
            ResolutionAction::DeleteUser => self.delete(user_system, user).await,
            ResolutionAction::DeleteConflict => self.delete(conflict_system, conflict).await,
        };

        let follow_up = match result {
            Ok(follow_up) => follow_up,
            Err(message) => {
                warn!(entry_id = entry.id, %action, %message, "Resolution failed");
                return ResolutionStatus::Failed { message };
            }
        };

        if let Err(e) = self.details.mark_resolved(syncid, entry.id).await {
            return ResolutionStatus::Failed {
                message: e.to_string(),
            };
        }
        if let Err(e) = follow_up.run().await {
            warn!(entry_id = entry.id, error = %e, "Lookup maintenance failed");
        }

        info!(entry_id = entry.id, %action, "Entry resolved");
        ResolutionStatus::Resolved
    }

    fn adapter(&self, system: &str) -> Result<BoxedAdapter, String> {
        self.adapters.get(system).map_err(|e| e.to_string())
    }

    /// Re-read the winner from `from_system` and write it into `into_system`.
    async fn overwrite(
        &self,
        from_system: &str,
        winner: &UserRecord,
        into_system: &str,
    ) -> Result<FollowUp, String> {
        let from = self.adapter(from_system)?;
        let into = self.adapter(into_system)?;

        let fresh = match from.fetch(&winner.native_key()).await {
            Ok(Some(record)) => record,
            Ok(None) => match from.fetch(&winner.key()).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return Err(format!(
                        "user '{}' no longer exists in {from_system}",
                        winner.username
                    ))
                }
                Err(e) => return Err(e.to_string()),
            },
            Err(e) => return Err(e.to_string()),
        };

        let outcome = into.upsert(&fresh, true).await.map_err(|e| e.to_string())?;
        if outcome.is_error() {
            return Err(outcome.diagnostics.error_text());
        }
        let written = match outcome.record {
            Some(record) => record,
            None => into
                .fetch(&fresh.key())
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| {
                    format!("user '{}' not found in {into_system} after upsert", fresh.username)
                })?,
        };
        debug!(from = from_system, into = into_system, username = %fresh.username, "Record overwritten");

        Ok(FollowUp::UpdateLookup {
            adapter: into,
            local: written,
            remote: fresh,
            remote_system: from_system.to_string(),
        })
    }

    async fn delete(&self, system: &str, record: &UserRecord) -> Result<FollowUp, String> {
        let adapter = self.adapter(system)?;
        let diagnostics = adapter
            .remove(record, RemoveContext::isolated())
            .await
            .map_err(|e| e.to_string())?;
        if diagnostics.has_errors() {
            return Err(diagnostics.error_text());
        }
        debug!(system, username = %record.username, "Record removed");

        Ok(FollowUp::RemoveLookup {
            adapter,
            record: record.clone(),
        })
    }
}

/// Lookup maintenance performed once an entry is marked resolved.
enum FollowUp {
    UpdateLookup {
        adapter: BoxedAdapter,
        local: UserRecord,
        remote: UserRecord,
        remote_system: String,
    },
    RemoveLookup {
        adapter: BoxedAdapter,
        record: UserRecord,
    },
}

impl FollowUp {
    async fn run(self) -> AdapterResult<()> {
        match self {
            FollowUp::UpdateLookup {
                adapter,
                local,
                remote,
                remote_system,
            } => adapter.update_lookup(&local, &remote, &remote_system).await,
            FollowUp::RemoveLookup { adapter, record } => adapter.remove_lookup(&record).await,
        }
    }
}
