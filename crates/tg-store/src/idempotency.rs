// SPDX-License-Identifier: MIT OR Apache-2.0
//! Idempotency key records.
//!
//! A record is written once, on first terminal completion or failure of a
//! write tool, and never mutated afterwards. `check` only surfaces
//! non-expired records; a sweeper deletes rows whose `expires_at` has
//! passed.

use crate::store::{Store, StoreError, fmt_ts, parse_ts, parse_uuid};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, named_params};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default record lifetime.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Lifecycle state of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    /// The operation is still in flight (long operations only).
    Processing,
    /// The operation completed; `result` replays on every hit.
    Completed,
    /// The operation failed terminally; `error` replays on every hit.
    Failed,
}

impl IdempotencyStatus {
    /// Wire identifier for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a wire identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the record can never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A stored idempotency record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Operation name (`create_work_item`, …). The same key under a
    /// different operation is an independent record.
    pub operation: String,
    /// Client-supplied key.
    pub key: String,
    /// Lifecycle state.
    pub status: IdempotencyStatus,
    /// Stored result for completed records.
    pub result: Option<serde_json::Value>,
    /// Stored error for failed records.
    pub error: Option<serde_json::Value>,
    /// Request id of the invocation that wrote the record.
    pub request_id: Option<String>,
    /// When the record was written.
    pub created_at: DateTime<Utc>,
    /// When the record stops replaying.
    pub expires_at: DateTime<Utc>,
}

/// Parameters for persisting a record.
#[derive(Debug, Clone)]
pub struct IdempotencyWrite {
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Operation name.
    pub operation: String,
    /// Client-supplied key.
    pub key: String,
    /// Lifecycle state to store.
    pub status: IdempotencyStatus,
    /// Result payload for completed records.
    pub result: Option<serde_json::Value>,
    /// Error payload for failed records.
    pub error: Option<serde_json::Value>,
    /// Request id for tracing.
    pub request_id: Option<String>,
    /// Record lifetime from now.
    pub ttl: Duration,
}

impl IdempotencyWrite {
    /// A completed record with the default TTL.
    #[must_use]
    pub fn completed(
        tenant_id: Uuid,
        operation: &str,
        key: &str,
        result: serde_json::Value,
        request_id: &str,
    ) -> Self {
        Self {
            tenant_id,
            operation: operation.to_string(),
            key: key.to_string(),
            status: IdempotencyStatus::Completed,
            result: Some(result),
            error: None,
            request_id: Some(request_id.to_string()),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }

    /// A failed record with the default TTL.
    #[must_use]
    pub fn failed(
        tenant_id: Uuid,
        operation: &str,
        key: &str,
        error: serde_json::Value,
        request_id: &str,
    ) -> Self {
        Self {
            tenant_id,
            operation: operation.to_string(),
            key: key.to_string(),
            status: IdempotencyStatus::Failed,
            result: None,
            error: Some(error),
            request_id: Some(request_id.to_string()),
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
        }
    }
}

fn record_from_row(row: &Row<'_>) -> Result<IdempotencyRecord, rusqlite::Error> {
    let convert = |e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(e.to_string())),
        )
    };
    let tenant_id: String = row.get("tenant_id")?;
    let status: String = row.get("status")?;
    let result: Option<String> = row.get("result")?;
    let error: Option<String> = row.get("error")?;
    let created_at: String = row.get("created_at")?;
    let expires_at: String = row.get("expires_at")?;

    Ok(IdempotencyRecord {
        tenant_id: parse_uuid(&tenant_id).map_err(convert)?,
        operation: row.get("operation")?,
        key: row.get("key")?,
        status: IdempotencyStatus::parse(&status).ok_or_else(|| {
            convert(StoreError::Corrupt(format!(
                "unknown idempotency status {status:?}"
            )))
        })?,
        result: result
            .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
            .map_err(convert)?,
        error: error
            .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
            .map_err(convert)?,
        request_id: row.get("request_id")?,
        created_at: parse_ts(&created_at).map_err(convert)?,
        expires_at: parse_ts(&expires_at).map_err(convert)?,
    })
}

/// Insert a record inside an open transaction. A unique-constraint
/// violation bubbles up to the caller, which resolves the race.
pub(crate) fn insert_idempotency_tx(
    conn: &Connection,
    write: &IdempotencyWrite,
) -> Result<IdempotencyRecord, StoreError> {
    let now = Utc::now();
    let record = IdempotencyRecord {
        tenant_id: write.tenant_id,
        operation: write.operation.clone(),
        key: write.key.clone(),
        status: write.status,
        result: write.result.clone(),
        error: write.error.clone(),
        request_id: write.request_id.clone(),
        created_at: now,
        expires_at: now + write.ttl,
    };
    conn.execute(
        "INSERT INTO idempotency_keys
             (tenant_id, operation, key, status, result, error, request_id,
              created_at, expires_at)
         VALUES
             (:tenant_id, :operation, :key, :status, :result, :error,
              :request_id, :created_at, :expires_at)",
        named_params! {
            ":tenant_id": record.tenant_id.to_string(),
            ":operation": record.operation,
            ":key": record.key,
            ":status": record.status.as_str(),
            ":result": record
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            ":error": record
                .error
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            ":request_id": record.request_id,
            ":created_at": fmt_ts(record.created_at),
            ":expires_at": fmt_ts(record.expires_at),
        },
    )?;
    Ok(record)
}

impl Store {
    /// Return the non-expired record under `(tenant, operation, key)`.
    ///
    /// A record whose `expires_at` equals the current instant no longer
    /// replays.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn idempotency_check(
        &self,
        tenant_id: Uuid,
        operation: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM idempotency_keys
             WHERE tenant_id = :tenant_id AND operation = :operation
               AND key = :key AND expires_at > :now",
            named_params! {
                ":tenant_id": tenant_id.to_string(),
                ":operation": operation,
                ":key": key,
                ":now": fmt_ts(Utc::now()),
            },
            record_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Fetch a record regardless of expiry; used to read a race winner.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn idempotency_fetch(
        &self,
        tenant_id: Uuid,
        operation: &str,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM idempotency_keys
             WHERE tenant_id = :tenant_id AND operation = :operation AND key = :key",
            named_params! {
                ":tenant_id": tenant_id.to_string(),
                ":operation": operation,
                ":key": key,
            },
            record_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Persist a record outside the combined transaction (used for failed
    /// writes, which carry no audit row).
    ///
    /// # Errors
    ///
    /// Any SQLite failure, including the unique-constraint violation when
    /// a concurrent writer won.
    pub fn idempotency_store(
        &self,
        write: &IdempotencyWrite,
    ) -> Result<IdempotencyRecord, StoreError> {
        let conn = self.lock();
        insert_idempotency_tx(&conn, write)
    }

    /// Delete expired records; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Any SQLite failure.
    pub fn idempotency_cleanup_expired(&self) -> Result<usize, StoreError> {
        let conn = self.lock();
        let removed = conn.execute(
            "DELETE FROM idempotency_keys WHERE expires_at <= :now",
            named_params! { ":now": fmt_ts(Utc::now()) },
        )?;
        if removed > 0 {
            tracing::debug!(removed, "idempotency sweeper removed expired keys");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn completed_record_replays_its_result() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();
        store
            .idempotency_store(&IdempotencyWrite::completed(
                tenant,
                "create_work_item",
                "k-1",
                json!({"source_key": "DEMO-1"}),
                "req_1",
            ))
            .unwrap();

        let hit = store
            .idempotency_check(tenant, "create_work_item", "k-1")
            .unwrap()
            .unwrap();
        assert_eq!(hit.status, IdempotencyStatus::Completed);
        assert_eq!(hit.result.unwrap()["source_key"], json!("DEMO-1"));
    }

    #[test]
    fn failed_record_replays_its_error() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();
        store
            .idempotency_store(&IdempotencyWrite::failed(
                tenant,
                "create_work_item",
                "k-err",
                json!({"code": "upstream_4xx"}),
                "req_1",
            ))
            .unwrap();

        let hit = store
            .idempotency_check(tenant, "create_work_item", "k-err")
            .unwrap()
            .unwrap();
        assert_eq!(hit.status, IdempotencyStatus::Failed);
        assert_eq!(hit.error.unwrap()["code"], json!("upstream_4xx"));
    }

    #[test]
    fn keys_are_scoped_by_tenant_and_operation() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();
        store
            .idempotency_store(&IdempotencyWrite::completed(
                tenant,
                "create_work_item",
                "k-1",
                json!({}),
                "req_1",
            ))
            .unwrap();

        assert!(store
            .idempotency_check(tenant, "update_work_item", "k-1")
            .unwrap()
            .is_none());
        assert!(store
            .idempotency_check(Uuid::new_v4(), "create_work_item", "k-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn expired_records_do_not_replay_and_get_swept() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();
        let mut write = IdempotencyWrite::completed(
            tenant,
            "create_work_item",
            "k-old",
            json!({}),
            "req_1",
        );
        write.ttl = Duration::microseconds(-1);
        store.idempotency_store(&write).unwrap();

        assert!(store
            .idempotency_check(tenant, "create_work_item", "k-old")
            .unwrap()
            .is_none());
        assert_eq!(store.idempotency_cleanup_expired().unwrap(), 1);
        assert!(store
            .idempotency_fetch(tenant, "create_work_item", "k-old")
            .unwrap()
            .is_none());
    }

    #[test]
    fn duplicate_insert_violates_the_unique_constraint() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();
        let write =
            IdempotencyWrite::completed(tenant, "create_work_item", "k-1", json!({}), "req_1");
        store.idempotency_store(&write).unwrap();

        let err = store.idempotency_store(&write).unwrap_err();
        match err {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => {
                assert_eq!(e.code, rusqlite::ErrorCode::ConstraintViolation);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
