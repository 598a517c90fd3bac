// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection handling, schema bootstrap, and the combined write
//! transaction used by the tool dispatcher.

use crate::audit::AuditEntry;
use crate::cipher::{CredentialCipher, PassthroughCipher};
use crate::idempotency::{IdempotencyRecord, IdempotencyWrite};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tg_core::WorkItem;
use uuid::Uuid;

/// Store schema version, bumped on incompatible layout changes.
const SCHEMA_VERSION: i64 = 1;

/// Busy timeout applied to the connection.
const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS tenants (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS backend_instances (
    id                     TEXT NOT NULL,
    tenant_id              TEXT NOT NULL REFERENCES tenants(id),
    kind                   TEXT NOT NULL,
    base_url               TEXT NOT NULL,
    auth_kind              TEXT NOT NULL,
    credential_blob        BLOB NOT NULL,
    active                 INTEGER NOT NULL DEFAULT 1,
    last_synced_at         TEXT,
    rate_limit_per_window  INTEGER NOT NULL DEFAULT 100,
    created_at             TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id)
);

CREATE TABLE IF NOT EXISTS work_items (
    tenant_id      TEXT NOT NULL,
    instance_id    TEXT NOT NULL,
    source_id      TEXT NOT NULL,
    source_key     TEXT NOT NULL,
    source_kind    TEXT NOT NULL,
    title          TEXT NOT NULL,
    description    TEXT,
    status         TEXT NOT NULL,
    priority       TEXT NOT NULL,
    item_type      TEXT NOT NULL,
    parent_id      TEXT,
    project_id     TEXT,
    assignee_id    TEXT,
    reporter_id    TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    closed_at      TEXT,
    url            TEXT,
    raw            TEXT NOT NULL,
    custom_fields  TEXT NOT NULL,
    PRIMARY KEY (instance_id, source_id)
);
CREATE INDEX IF NOT EXISTS idx_work_items_tenant_key
    ON work_items(tenant_id, source_key);
CREATE INDEX IF NOT EXISTS idx_work_items_project
    ON work_items(tenant_id, project_id, updated_at);

CREATE TABLE IF NOT EXISTS comments (
    instance_id   TEXT NOT NULL,
    source_id     TEXT NOT NULL,
    tenant_id     TEXT NOT NULL,
    work_item_id  TEXT NOT NULL,
    author_id     TEXT NOT NULL,
    body          TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    raw           TEXT NOT NULL,
    PRIMARY KEY (instance_id, source_id)
);

CREATE TABLE IF NOT EXISTS transitions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id     TEXT NOT NULL,
    instance_id   TEXT NOT NULL,
    work_item_id  TEXT NOT NULL,
    from_status   TEXT NOT NULL,
    to_status     TEXT NOT NULL,
    actor_id      TEXT NOT NULL,
    timestamp     TEXT NOT NULL,
    raw           TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_transitions_item
    ON transitions(tenant_id, work_item_id, timestamp);

CREATE TABLE IF NOT EXISTS idempotency_keys (
    tenant_id   TEXT NOT NULL,
    operation   TEXT NOT NULL,
    key         TEXT NOT NULL,
    status      TEXT NOT NULL,
    result      TEXT,
    error       TEXT,
    request_id  TEXT,
    created_at  TEXT NOT NULL,
    expires_at  TEXT NOT NULL,
    PRIMARY KEY (tenant_id, operation, key)
);
CREATE INDEX IF NOT EXISTS idx_idempotency_expires
    ON idempotency_keys(expires_at);

CREATE TABLE IF NOT EXISTS audit_logs (
    id             TEXT PRIMARY KEY,
    tenant_id      TEXT NOT NULL,
    user_id        TEXT,
    action         TEXT NOT NULL,
    resource_type  TEXT NOT NULL,
    resource_id    TEXT NOT NULL,
    changes        TEXT NOT NULL,
    request_id     TEXT,
    ip_address     TEXT,
    user_agent     TEXT,
    metadata       TEXT NOT NULL,
    created_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_tenant_time
    ON audit_logs(tenant_id, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_resource
    ON audit_logs(tenant_id, resource_type, resource_id);

CREATE TABLE IF NOT EXISTS work_item_metrics_daily (
    tenant_id            TEXT NOT NULL,
    date                 TEXT NOT NULL,
    project_key          TEXT NOT NULL,
    team                 TEXT,
    created              INTEGER NOT NULL DEFAULT 0,
    closed               INTEGER NOT NULL DEFAULT 0,
    wip                  INTEGER NOT NULL DEFAULT 0,
    wip_no_assignee      INTEGER NOT NULL DEFAULT 0,
    stuck_gt_x_days      INTEGER NOT NULL DEFAULT 0,
    reopened             INTEGER NOT NULL DEFAULT 0,
    lead_time_p50_days   REAL,
    lead_time_p90_days   REAL,
    lead_time_avg_days   REAL,
    sla_at_risk          INTEGER NOT NULL DEFAULT 0,
    sla_breached         INTEGER NOT NULL DEFAULT 0,
    created_4w_avg       REAL,
    closed_4w_avg        REAL,
    created_delta_pct    REAL,
    closed_delta_pct     REAL,
    PRIMARY KEY (tenant_id, project_key, date)
);
";

// ── Errors ──────────────────────────────────────────────────────────────

/// Errors produced by the store layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored payload could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value violated a format expectation.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Credential sealing or opening failed.
    #[error("credential cipher error: {0}")]
    Cipher(String),
}

impl StoreError {
    /// Whether this failure is a unique-constraint violation, i.e. a
    /// lost insert race rather than a fault.
    #[must_use]
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl From<StoreError> for tg_core::GatewayError {
    fn from(err: StoreError) -> Self {
        // Store internals never reach the wire; the cause goes to the logs.
        tracing::error!(error = %err, "store failure");
        tg_core::GatewayError::internal()
    }
}

// ── Timestamp helpers ───────────────────────────────────────────────────

/// Fixed-width UTC timestamp so lexicographic order equals chronological
/// order in SQL comparisons.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("bad uuid {raw:?}: {e}")))
}

// ── Store ───────────────────────────────────────────────────────────────

/// The SQLite store. Cheap to clone via [`Arc`].
pub struct Store {
    conn: Mutex<Connection>,
    pub(crate) cipher: Arc<dyn CredentialCipher>,
}

impl Store {
    /// Open (creating if necessary) a store at `path` with WAL journaling.
    ///
    /// # Errors
    ///
    /// Any SQLite failure while opening or migrating.
    pub fn open(path: &Path, cipher: Arc<dyn CredentialCipher>) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.pragma_update(None, "journal_mode", "wal")?;
        Self::bootstrap(conn, cipher)
    }

    /// Open an in-memory store, used by tests and single-shot tooling.
    ///
    /// # Errors
    ///
    /// Any SQLite failure while opening or migrating.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn, Arc::new(PassthroughCipher))
    }

    fn bootstrap(conn: Connection, cipher: Arc<dyn CredentialCipher>) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.pragma_update(None, "foreign_keys", "on")?;
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Lock the connection. Callers must not await while holding the
    /// guard.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("store connection poisoned")
    }

    /// Run a read-only statement with named parameters, returning rows as
    /// JSON objects keyed by column name. This is the execution surface
    /// the whitelisted query templates run on.
    ///
    /// # Errors
    ///
    /// Any SQLite failure.
    pub fn select_rows(
        &self,
        sql: &str,
        params: &[(&str, rusqlite::types::Value)],
    ) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let bound: Vec<(&str, &dyn rusqlite::ToSql)> = params
            .iter()
            .map(|(name, value)| (*name, value as &dyn rusqlite::ToSql))
            .collect();

        let mut rows = stmt.query(&bound[..])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = serde_json::Map::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let value = match row.get_ref(index)? {
                    rusqlite::types::ValueRef::Null => serde_json::Value::Null,
                    rusqlite::types::ValueRef::Integer(i) => serde_json::Value::from(i),
                    rusqlite::types::ValueRef::Real(f) => serde_json::Value::from(f),
                    rusqlite::types::ValueRef::Text(t) => {
                        serde_json::Value::String(String::from_utf8_lossy(t).into_owned())
                    }
                    // No whitelisted query selects blob columns.
                    rusqlite::types::ValueRef::Blob(_) => serde_json::Value::Null,
                };
                object.insert(column.clone(), value);
            }
            out.push(object);
        }
        Ok(out)
    }

    // ── Combined write transaction ──────────────────────────────────

    /// Commit a write-tool outcome atomically: the optional warehouse
    /// after-image, the optional audit row, and the optional idempotency
    /// record land together or not at all.
    ///
    /// When the idempotency insert loses its unique-constraint race, the
    /// whole transaction rolls back and the winner's record is returned,
    /// so at most one audit row ever persists for a given key.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn commit_write(&self, commit: WriteCommit<'_>) -> Result<CommitOutcome, StoreError> {
        let mut guard = self.lock();
        let tx = guard.transaction()?;

        if let Some(item) = commit.work_item {
            crate::warehouse::upsert_work_item_tx(&tx, item)?;
        }
        if let Some(entry) = commit.audit {
            crate::audit::insert_audit_tx(&tx, entry)?;
        }
        if let Some(write) = commit.idempotency {
            match crate::idempotency::insert_idempotency_tx(&tx, &write) {
                Ok(record) => {
                    tx.commit()?;
                    return Ok(CommitOutcome::Committed(Some(record)));
                }
                Err(StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    drop(tx);
                    drop(guard);
                    let winner = self
                        .idempotency_fetch(write.tenant_id, &write.operation, &write.key)?
                        .ok_or_else(|| {
                            StoreError::Corrupt(
                                "idempotency conflict with no surviving row".into(),
                            )
                        })?;
                    return Ok(CommitOutcome::LostRace(winner));
                }
                Err(other) => return Err(other),
            }
        }

        tx.commit()?;
        Ok(CommitOutcome::Committed(None))
    }
}

/// Everything a write tool persists at commit time.
pub struct WriteCommit<'a> {
    /// After-image to upsert into the warehouse, if the tool produced one.
    pub work_item: Option<&'a WorkItem>,
    /// Audit entry for the committed mutation, absent for failed writes.
    pub audit: Option<AuditEntry>,
    /// Idempotency record to persist under the client key.
    pub idempotency: Option<IdempotencyWrite>,
}

/// Result of [`Store::commit_write`].
#[derive(Debug)]
pub enum CommitOutcome {
    /// The transaction committed; carries the stored idempotency record
    /// when one was written.
    Committed(Option<IdempotencyRecord>),
    /// A concurrent request already stored a record under the same key;
    /// nothing from this transaction persisted.
    LostRace(IdempotencyRecord),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAction, AuditEntry};
    use crate::idempotency::{IdempotencyStatus, IdempotencyWrite};
    use serde_json::json;

    fn write(tenant: Uuid, key: &str) -> IdempotencyWrite {
        IdempotencyWrite {
            tenant_id: tenant,
            operation: "create_work_item".into(),
            key: key.into(),
            status: IdempotencyStatus::Completed,
            result: Some(json!({"source_key": "DEMO-1"})),
            error: None,
            request_id: Some("req_1".into()),
            ttl: chrono::Duration::hours(24),
        }
    }

    fn audit(tenant: Uuid) -> AuditEntry {
        AuditEntry::create(
            tenant,
            "work_item",
            "DEMO-1",
            json!({"title": "hello"}),
        )
    }

    #[test]
    fn commit_lands_audit_and_idempotency_together() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();

        let outcome = store
            .commit_write(WriteCommit {
                work_item: None,
                audit: Some(audit(tenant)),
                idempotency: Some(write(tenant, "k-1")),
            })
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed(Some(_))));

        let rows = store.audit_for_resource(tenant, "work_item", "DEMO-1").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store
            .idempotency_check(tenant, "create_work_item", "k-1")
            .unwrap()
            .is_some());
    }

    #[test]
    fn losing_the_key_race_rolls_back_the_audit_row() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();

        store
            .commit_write(WriteCommit {
                work_item: None,
                audit: Some(audit(tenant)),
                idempotency: Some(write(tenant, "k-1")),
            })
            .unwrap();

        // Second commit under the same key must not add a second audit row.
        let outcome = store
            .commit_write(WriteCommit {
                work_item: None,
                audit: Some(audit(tenant)),
                idempotency: Some(write(tenant, "k-1")),
            })
            .unwrap();
        let CommitOutcome::LostRace(winner) = outcome else {
            panic!("expected lost race");
        };
        assert_eq!(winner.request_id.as_deref(), Some("req_1"));

        let rows = store.audit_for_resource(tenant, "work_item", "DEMO-1").unwrap();
        assert_eq!(rows.len(), 1, "exactly one audit row for the key pair");
    }

    #[test]
    fn same_key_different_operations_are_independent() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();

        store
            .commit_write(WriteCommit {
                work_item: None,
                audit: None,
                idempotency: Some(write(tenant, "k-1")),
            })
            .unwrap();

        let mut other = write(tenant, "k-1");
        other.operation = "update_work_item".into();
        let outcome = store
            .commit_write(WriteCommit {
                work_item: None,
                audit: None,
                idempotency: Some(other),
            })
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed(Some(_))));
    }

    #[test]
    fn audit_action_label_matches_entry() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();
        store
            .commit_write(WriteCommit {
                work_item: None,
                audit: Some(audit(tenant)),
                idempotency: None,
            })
            .unwrap();
        let rows = store.audit_for_resource(tenant, "work_item", "DEMO-1").unwrap();
        assert_eq!(rows[0].action, AuditAction::Create);
    }
}
