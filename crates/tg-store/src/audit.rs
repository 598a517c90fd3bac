// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only audit log.
//!
//! Rows are inserted in the same transaction as the business effect they
//! describe and are never updated or deleted. The `changes` diff passes
//! through redaction before it is serialized; leaking once is leaking
//! forever.

use crate::store::{Store, StoreError, fmt_ts, parse_ts, parse_uuid};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, named_params};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tg_core::redact_value;
use uuid::Uuid;

/// What a mutation did to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A resource was created.
    Create,
    /// Fields of a resource changed.
    Update,
    /// A resource was removed.
    Delete,
    /// A work item changed status.
    Transition,
    /// A comment was added.
    Comment,
    /// Two work items were linked.
    Link,
}

impl AuditAction {
    /// Wire identifier for this action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Transition => "transition",
            Self::Comment => "comment",
            Self::Link => "link",
        }
    }

    /// Parse a wire identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "transition" => Some(Self::Transition),
            "comment" => Some(Self::Comment),
            "link" => Some(Self::Link),
            _ => None,
        }
    }
}

/// A persisted audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Row id.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Acting user, when known.
    pub user_id: Option<String>,
    /// What happened.
    pub action: AuditAction,
    /// Resource type (`work_item`, `comment`, …).
    pub resource_type: String,
    /// Resource id or key.
    pub resource_id: String,
    /// `{before, after}` diff, redacted.
    pub changes: Value,
    /// Correlation id of the request.
    pub request_id: Option<String>,
    /// Client IP, when known.
    pub ip_address: Option<String>,
    /// Client user agent, when known.
    pub user_agent: Option<String>,
    /// Free-form metadata.
    pub metadata: Value,
    /// When the row was written.
    pub created_at: DateTime<Utc>,
}

/// Everything needed to write one audit row.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// What happened.
    pub action: AuditAction,
    /// Resource type.
    pub resource_type: String,
    /// Resource id or key.
    pub resource_id: String,
    /// `{before, after}` diff; redacted at insert time.
    pub changes: Value,
    /// Acting user.
    pub user_id: Option<String>,
    /// Correlation id.
    pub request_id: Option<String>,
    /// Client IP.
    pub ip_address: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Free-form metadata.
    pub metadata: Value,
}

impl AuditEntry {
    /// An entry with the given action and a raw `changes` diff.
    #[must_use]
    pub fn new(
        tenant_id: Uuid,
        action: AuditAction,
        resource_type: &str,
        resource_id: &str,
        changes: Value,
    ) -> Self {
        Self {
            tenant_id,
            action,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            changes,
            user_id: None,
            request_id: None,
            ip_address: None,
            user_agent: None,
            metadata: json!({}),
        }
    }

    /// A create: `{before: null, after: data}`.
    #[must_use]
    pub fn create(tenant_id: Uuid, resource_type: &str, resource_id: &str, data: Value) -> Self {
        Self::new(
            tenant_id,
            AuditAction::Create,
            resource_type,
            resource_id,
            json!({ "before": null, "after": data }),
        )
    }

    /// An update: `{before, after}`.
    #[must_use]
    pub fn update(
        tenant_id: Uuid,
        resource_type: &str,
        resource_id: &str,
        before: Value,
        after: Value,
    ) -> Self {
        Self::new(
            tenant_id,
            AuditAction::Update,
            resource_type,
            resource_id,
            json!({ "before": before, "after": after }),
        )
    }

    /// A delete: `{before: data, after: null}`.
    #[must_use]
    pub fn delete(tenant_id: Uuid, resource_type: &str, resource_id: &str, data: Value) -> Self {
        Self::new(
            tenant_id,
            AuditAction::Delete,
            resource_type,
            resource_id,
            json!({ "before": data, "after": null }),
        )
    }

    /// Override the action label, keeping the diff shape.
    #[must_use]
    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = action;
        self
    }

    /// Attach the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Attach the request correlation id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: &str) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }

    /// Attach transport metadata.
    #[must_use]
    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }
}

fn record_from_row(row: &Row<'_>) -> Result<AuditRecord, rusqlite::Error> {
    let convert = |e: StoreError| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::other(e.to_string())),
        )
    };
    let id: String = row.get("id")?;
    let tenant_id: String = row.get("tenant_id")?;
    let action: String = row.get("action")?;
    let changes: String = row.get("changes")?;
    let metadata: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;

    Ok(AuditRecord {
        id: parse_uuid(&id).map_err(convert)?,
        tenant_id: parse_uuid(&tenant_id).map_err(convert)?,
        user_id: row.get("user_id")?,
        action: AuditAction::parse(&action).ok_or_else(|| {
            convert(StoreError::Corrupt(format!("unknown audit action {action:?}")))
        })?,
        resource_type: row.get("resource_type")?,
        resource_id: row.get("resource_id")?,
        changes: serde_json::from_str(&changes)
            .map_err(StoreError::from)
            .map_err(convert)?,
        request_id: row.get("request_id")?,
        ip_address: row.get("ip_address")?,
        user_agent: row.get("user_agent")?,
        metadata: serde_json::from_str(&metadata)
            .map_err(StoreError::from)
            .map_err(convert)?,
        created_at: parse_ts(&created_at).map_err(convert)?,
    })
}

/// Insert an audit row inside an open transaction, redacting the diff
/// first.
pub(crate) fn insert_audit_tx(conn: &Connection, entry: AuditEntry) -> Result<Uuid, StoreError> {
    let id = Uuid::new_v4();
    let changes = redact_value(&entry.changes);
    let metadata = redact_value(&entry.metadata);
    conn.execute(
        "INSERT INTO audit_logs
             (id, tenant_id, user_id, action, resource_type, resource_id,
              changes, request_id, ip_address, user_agent, metadata, created_at)
         VALUES
             (:id, :tenant_id, :user_id, :action, :resource_type, :resource_id,
              :changes, :request_id, :ip_address, :user_agent, :metadata, :created_at)",
        named_params! {
            ":id": id.to_string(),
            ":tenant_id": entry.tenant_id.to_string(),
            ":user_id": entry.user_id,
            ":action": entry.action.as_str(),
            ":resource_type": entry.resource_type,
            ":resource_id": entry.resource_id,
            ":changes": serde_json::to_string(&changes)?,
            ":request_id": entry.request_id,
            ":ip_address": entry.ip_address,
            ":user_agent": entry.user_agent,
            ":metadata": serde_json::to_string(&metadata)?,
            ":created_at": fmt_ts(Utc::now()),
        },
    )?;
    Ok(id)
}

impl Store {
    /// Write one audit row outside a combined transaction.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn audit_log(&self, entry: AuditEntry) -> Result<Uuid, StoreError> {
        let conn = self.lock();
        insert_audit_tx(&conn, entry)
    }

    /// All audit rows for one resource, oldest first.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn audit_for_resource(
        &self,
        tenant_id: Uuid,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM audit_logs
             WHERE tenant_id = :tenant_id AND resource_type = :resource_type
               AND resource_id = :resource_id
             ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(
                named_params! {
                    ":tenant_id": tenant_id.to_string(),
                    ":resource_type": resource_type,
                    ":resource_id": resource_id,
                },
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recent audit rows for a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn audit_recent(
        &self,
        tenant_id: Uuid,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM audit_logs
             WHERE tenant_id = :tenant_id
             ORDER BY created_at DESC
             LIMIT :limit",
        )?;
        let rows = stmt
            .query_map(
                named_params! {
                    ":tenant_id": tenant_id.to_string(),
                    ":limit": limit as i64,
                },
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_update_delete_shape_the_diff() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();

        store
            .audit_log(AuditEntry::create(
                tenant,
                "work_item",
                "DEMO-1",
                json!({"title": "a"}),
            ))
            .unwrap();
        store
            .audit_log(AuditEntry::update(
                tenant,
                "work_item",
                "DEMO-1",
                json!({"title": "a"}),
                json!({"title": "b"}),
            ))
            .unwrap();
        store
            .audit_log(AuditEntry::delete(
                tenant,
                "work_item",
                "DEMO-1",
                json!({"title": "b"}),
            ))
            .unwrap();

        let rows = store
            .audit_for_resource(tenant, "work_item", "DEMO-1")
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].changes["before"], json!(null));
        assert_eq!(rows[1].changes["before"]["title"], json!("a"));
        assert_eq!(rows[1].changes["after"]["title"], json!("b"));
        assert_eq!(rows[2].changes["after"], json!(null));
    }

    #[test]
    fn diffs_are_redacted_before_persistence() {
        let store = Store::open_in_memory().unwrap();
        let tenant = Uuid::new_v4();

        store
            .audit_log(AuditEntry::create(
                tenant,
                "instance",
                "i-1",
                json!({
                    "base_url": "https://example.atlassian.net",
                    "auth": { "api_token": "t0ps3cret" }
                }),
            ))
            .unwrap();

        let rows = store.audit_for_resource(tenant, "instance", "i-1").unwrap();
        let rendered = rows[0].changes.to_string();
        assert!(!rendered.contains("t0ps3cret"));
        assert!(rendered.contains("***REDACTED***"));
    }

    #[test]
    fn rows_are_tenant_scoped() {
        let store = Store::open_in_memory().unwrap();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();

        store
            .audit_log(AuditEntry::create(t1, "work_item", "A-1", json!({})))
            .unwrap();

        assert!(store.audit_for_resource(t2, "work_item", "A-1").unwrap().is_empty());
        assert_eq!(store.audit_recent(t1, 10).unwrap().len(), 1);
    }
}
