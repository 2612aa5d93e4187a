//! PostgreSQL store backends.
//!
//! Schema lives in `migrations/`; call [`migrate`] once at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{check_schema_version, CheckpointStore, DetailLog};
use crate::detail::{ConflictPayload, DetailLogEntry, LogQuery, NewLogEntry};
use crate::error::{StoreError, StoreResult};
use crate::ids::{EntryId, SyncId};
use crate::state::SyncState;

/// Apply pending migrations for the usersync tables.
///
/// # Errors
///
/// Returns `StoreError::Migration` if any migration fails to apply.
pub async fn migrate(pool: &PgPool) -> StoreResult<()> {
    info!("Running usersync migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Checkpoint store over the `usersync_runs` table.
#[derive(Debug, Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    /// Create a store using `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, syncid: SyncId) -> StoreResult<bool> {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT syncid FROM usersync_runs WHERE syncid = $1")
            .bind(syncid.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    #[instrument(skip(self, state), fields(syncid = %state.syncid))]
    async fn create(&self, state: &SyncState) -> StoreResult<()> {
        let document = serde_json::to_value(state)?;
        let inserted = sqlx::query(
            r"
            INSERT INTO usersync_runs (syncid, schema_version, state, completed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (syncid) DO NOTHING
            ",
        )
        .bind(state.syncid.as_uuid())
        .bind(state.schema_version as i32)
        .bind(&document)
        .bind(state.completed)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::already_exists("sync run", state.syncid));
        }
        Ok(())
    }

    async fn load(&self, syncid: SyncId) -> StoreResult<Option<SyncState>> {
        let row: Option<(i32, serde_json::Value)> =
            sqlx::query_as("SELECT schema_version, state FROM usersync_runs WHERE syncid = $1")
                .bind(syncid.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(schema_version, document)| decode_state(syncid, schema_version, document))
            .transpose()
    }

    #[instrument(skip(self, state), fields(syncid = %state.syncid))]
    async fn save(&self, state: &SyncState) -> StoreResult<()> {
        let mut state = state.clone();
        state.updated_at = Utc::now();
        let document = serde_json::to_value(&state)?;

        let updated = sqlx::query(
            r"
            UPDATE usersync_runs
            SET state = $2, schema_version = $3, completed = $4, updated_at = NOW()
            WHERE syncid = $1
            ",
        )
        .bind(state.syncid.as_uuid())
        .bind(&document)
        .bind(state.schema_version as i32)
        .bind(state.completed)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("sync run", state.syncid));
        }
        debug!(synced_users = state.synced_users, "Checkpoint saved");
        Ok(())
    }

    async fn set_active(&self, syncid: SyncId, active: bool) -> StoreResult<()> {
        let updated = sqlx::query(
            r"
            UPDATE usersync_runs
            SET active = $2, lease_holder = NULL, lease_expires_at = NULL, updated_at = NOW()
            WHERE syncid = $1
            ",
        )
        .bind(syncid.as_uuid())
        .bind(active)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("sync run", syncid));
        }
        Ok(())
    }

    async fn is_active(&self, syncid: SyncId) -> StoreResult<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            r"
            SELECT active AND (lease_expires_at IS NULL OR lease_expires_at > NOW())
            FROM usersync_runs
            WHERE syncid = $1
            ",
        )
        .bind(syncid.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.is_some_and(|(active,)| active))
    }

    #[instrument(skip(self))]
    async fn try_acquire(&self, syncid: SyncId, holder: &str, ttl: Duration) -> StoreResult<bool> {
        let acquired: Option<(Uuid,)> = sqlx::query_as(
            r"
            UPDATE usersync_runs
            SET active = TRUE,
                lease_holder = $2,
                lease_expires_at = NOW() + make_interval(secs => $3),
                updated_at = NOW()
            WHERE syncid = $1
              AND (NOT active
                   OR lease_holder = $2
                   OR (lease_expires_at IS NOT NULL AND lease_expires_at <= NOW()))
            RETURNING syncid
            ",
        )
        .bind(syncid.as_uuid())
        .bind(holder)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        if acquired.is_some() {
            return Ok(true);
        }
        if !self.exists(syncid).await? {
            return Err(StoreError::not_found("sync run", syncid));
        }
        Ok(false)
    }

    async fn release(&self, syncid: SyncId, holder: &str) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE usersync_runs
            SET active = FALSE, lease_holder = NULL, lease_expires_at = NULL, updated_at = NOW()
            WHERE syncid = $1 AND lease_holder = $2
            ",
        )
        .bind(syncid.as_uuid())
        .bind(holder)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Decode a stored run document, checking its version before its shape.
fn decode_state(
    syncid: SyncId,
    schema_version: i32,
    document: serde_json::Value,
) -> StoreResult<SyncState> {
    let column = u32::try_from(schema_version).unwrap_or(0);
    let embedded = document
        .get("schema_version")
        .and_then(serde_json::Value::as_u64)
        .map_or(0, |v| u32::try_from(v).unwrap_or(u32::MAX));
    check_schema_version(syncid, column.max(embedded))?;
    Ok(serde_json::from_value(document)?)
}

#[derive(Debug, sqlx::FromRow)]
struct DetailRow {
    id: i64,
    syncid: Uuid,
    system_name: String,
    username: String,
    email: String,
    action: String,
    message: String,
    conflict_payload: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<DetailRow> for DetailLogEntry {
    type Error = StoreError;

    fn try_from(row: DetailRow) -> Result<Self, Self::Error> {
        let conflict_payload = row
            .conflict_payload
            .map(serde_json::from_value::<ConflictPayload>)
            .transpose()?;
        Ok(Self {
            id: row.id,
            syncid: SyncId::from_uuid(row.syncid),
            system_name: row.system_name,
            username: row.username,
            email: row.email,
            action: row.action.parse().map_err(StoreError::backend)?,
            message: row.message,
            conflict_payload,
            created_at: row.created_at,
        })
    }
}

/// Detail log over the `usersync_details` table.
#[derive(Debug, Clone)]
pub struct PgDetailLog {
    pool: PgPool,
}

impl PgDetailLog {
    /// Create a log using `pool`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const DETAIL_COLUMNS: &str =
    "id, syncid, system_name, username, email, action, message, conflict_payload, created_at";

#[async_trait]
impl DetailLog for PgDetailLog {
    async fn append(&self, entry: NewLogEntry) -> StoreResult<EntryId> {
        let payload = entry
            .conflict_payload
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO usersync_details
                (syncid, system_name, username, email, action, message, conflict_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(entry.syncid.as_uuid())
        .bind(&entry.system_name)
        .bind(&entry.username)
        .bind(&entry.email)
        .bind(entry.action.as_str())
        .bind(&entry.message)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get(&self, syncid: SyncId, id: EntryId) -> StoreResult<Option<DetailLogEntry>> {
        let sql = format!("SELECT {DETAIL_COLUMNS} FROM usersync_details WHERE syncid = $1 AND id = $2");
        let row: Option<DetailRow> = sqlx::query_as(&sql)
            .bind(syncid.as_uuid())
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(DetailLogEntry::try_from).transpose()
    }

    async fn query(&self, syncid: SyncId, query: &LogQuery) -> StoreResult<Vec<DetailLogEntry>> {
        // Sort column comes from a closed enum, never from caller text.
        let sql = format!(
            r"
            SELECT {DETAIL_COLUMNS}
            FROM usersync_details
            WHERE syncid = $1 AND ($2::text IS NULL OR action = $2)
            ORDER BY {} {}, id ASC
            LIMIT $3 OFFSET $4
            ",
            query.sort.column(),
            query.direction.as_sql(),
        );

        let rows: Vec<DetailRow> = sqlx::query_as(&sql)
            .bind(syncid.as_uuid())
            .bind(query.action.map(|a| a.as_str()))
            .bind(query.page.limit.map(|l| l as i64))
            .bind(query.page.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(DetailLogEntry::try_from).collect()
    }

    async fn count(&self, syncid: SyncId, query: &LogQuery) -> StoreResult<u64> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM usersync_details
            WHERE syncid = $1 AND ($2::text IS NULL OR action = $2)
            ",
        )
        .bind(syncid.as_uuid())
        .bind(query.action.map(|a| a.as_str()))
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn mark_resolved(&self, syncid: SyncId, id: EntryId) -> StoreResult<()> {
        let updated = sqlx::query(
            "UPDATE usersync_details SET action = 'resolved' WHERE syncid = $1 AND id = $2",
        )
        .bind(syncid.as_uuid())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found("detail log entry", id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{SlaveDescriptor, SyncDirection, SYNC_STATE_SCHEMA_VERSION};
    use serde_json::json;

    #[test]
    fn test_decode_current_document() {
        let state = SyncState::new(
            "master",
            SyncDirection::ToSlaves,
            vec![SlaveDescriptor::new("forumA", 2)],
            10,
        );
        let document = serde_json::to_value(&state).unwrap();

        let decoded =
            decode_state(state.syncid, SYNC_STATE_SCHEMA_VERSION as i32, document).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn test_newer_document_is_rejected_before_decoding() {
        let syncid = SyncId::new();
        let newer = SYNC_STATE_SCHEMA_VERSION + 1;

        // Column carries the newer version, document has an unknown shape.
        let err = decode_state(syncid, newer as i32, json!({ "cursor": "opaque" })).unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnsupportedSchemaVersion { found, .. } if found == newer
        ));

        // Version only present inside the document.
        let document = json!({ "schema_version": newer, "progress": [1, 2, 3] });
        let err = decode_state(syncid, SYNC_STATE_SCHEMA_VERSION as i32, document).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchemaVersion { .. }));
    }

    #[test]
    fn test_malformed_current_document_is_a_serialization_error() {
        let err = decode_state(SyncId::new(), 1, json!({ "cursor": "opaque" })).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
