// SPDX-License-Identifier: MIT OR Apache-2.0
//! Normalized warehouse tables the adapters populate and the read tools
//! serve from.

use crate::store::{Store, StoreError, fmt_ts, parse_ts, parse_uuid};
use rusqlite::{Connection, OptionalExtension, Row, named_params};
use tg_core::{
    BackendKind, Comment, Transition, WorkItem, WorkItemPriority, WorkItemStatus, WorkItemType,
};
use uuid::Uuid;

/// Filters for warehouse work-item search.
#[derive(Debug, Clone, Default)]
pub struct WorkItemFilter {
    /// Restrict to one project key.
    pub project: Option<String>,
    /// Restrict to one normalized status.
    pub status: Option<WorkItemStatus>,
    /// Substring match against the title.
    pub text: Option<String>,
    /// Maximum rows returned.
    pub limit: usize,
}

fn convert(e: StoreError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::other(e.to_string())),
    )
}

fn work_item_from_row(row: &Row<'_>) -> Result<WorkItem, rusqlite::Error> {
    let tenant_id: String = row.get("tenant_id")?;
    let instance_id: String = row.get("instance_id")?;
    let source_kind: String = row.get("source_kind")?;
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let item_type: String = row.get("item_type")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let closed_at: Option<String> = row.get("closed_at")?;
    let raw: String = row.get("raw")?;
    let custom_fields: String = row.get("custom_fields")?;

    Ok(WorkItem {
        source_id: row.get("source_id")?,
        source_key: row.get("source_key")?,
        source_kind: BackendKind::parse(&source_kind).ok_or_else(|| {
            convert(StoreError::Corrupt(format!("unknown kind {source_kind:?}")))
        })?,
        tenant_id: parse_uuid(&tenant_id).map_err(convert)?,
        instance_id: parse_uuid(&instance_id).map_err(convert)?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: WorkItemStatus::parse(&status)
            .ok_or_else(|| convert(StoreError::Corrupt(format!("unknown status {status:?}"))))?,
        priority: WorkItemPriority::parse(&priority).ok_or_else(|| {
            convert(StoreError::Corrupt(format!("unknown priority {priority:?}")))
        })?,
        item_type: WorkItemType::parse(&item_type).ok_or_else(|| {
            convert(StoreError::Corrupt(format!("unknown type {item_type:?}")))
        })?,
        parent_id: row.get("parent_id")?,
        project_id: row.get("project_id")?,
        assignee_id: row.get("assignee_id")?,
        reporter_id: row.get("reporter_id")?,
        created_at: parse_ts(&created_at).map_err(convert)?,
        updated_at: parse_ts(&updated_at).map_err(convert)?,
        closed_at: closed_at.map(|raw| parse_ts(&raw)).transpose().map_err(convert)?,
        url: row.get("url")?,
        raw: serde_json::from_str(&raw)
            .map_err(StoreError::from)
            .map_err(convert)?,
        custom_fields: serde_json::from_str(&custom_fields)
            .map_err(StoreError::from)
            .map_err(convert)?,
    })
}

/// Upsert one work item inside an open transaction, keyed by
/// `(instance_id, source_id)`.
pub(crate) fn upsert_work_item_tx(conn: &Connection, item: &WorkItem) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO work_items
             (tenant_id, instance_id, source_id, source_key, source_kind,
              title, description, status, priority, item_type, parent_id,
              project_id, assignee_id, reporter_id, created_at, updated_at,
              closed_at, url, raw, custom_fields)
         VALUES
             (:tenant_id, :instance_id, :source_id, :source_key, :source_kind,
              :title, :description, :status, :priority, :item_type, :parent_id,
              :project_id, :assignee_id, :reporter_id, :created_at, :updated_at,
              :closed_at, :url, :raw, :custom_fields)
         ON CONFLICT (instance_id, source_id) DO UPDATE SET
              source_key = excluded.source_key,
              title = excluded.title,
              description = excluded.description,
              status = excluded.status,
              priority = excluded.priority,
              item_type = excluded.item_type,
              parent_id = excluded.parent_id,
              project_id = excluded.project_id,
              assignee_id = excluded.assignee_id,
              reporter_id = excluded.reporter_id,
              updated_at = excluded.updated_at,
              closed_at = excluded.closed_at,
              url = excluded.url,
              raw = excluded.raw,
              custom_fields = excluded.custom_fields",
        named_params! {
            ":tenant_id": item.tenant_id.to_string(),
            ":instance_id": item.instance_id.to_string(),
            ":source_id": item.source_id,
            ":source_key": item.source_key,
            ":source_kind": item.source_kind.as_str(),
            ":title": item.title,
            ":description": item.description,
            ":status": item.status.as_str(),
            ":priority": item.priority.as_str(),
            ":item_type": item.item_type.as_str(),
            ":parent_id": item.parent_id,
            ":project_id": item.project_id,
            ":assignee_id": item.assignee_id,
            ":reporter_id": item.reporter_id,
            ":created_at": fmt_ts(item.created_at),
            ":updated_at": fmt_ts(item.updated_at),
            ":closed_at": item.closed_at.map(fmt_ts),
            ":url": item.url,
            ":raw": serde_json::to_string(&item.raw)?,
            ":custom_fields": serde_json::to_string(&item.custom_fields)?,
        },
    )?;
    Ok(())
}

impl Store {
    /// Upsert a work item outside a combined transaction.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn upsert_work_item(&self, item: &WorkItem) -> Result<(), StoreError> {
        let conn = self.lock();
        upsert_work_item_tx(&conn, item)
    }

    /// Fetch one work item by its human-readable key.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn work_item_by_key(
        &self,
        tenant_id: Uuid,
        instance_id: Uuid,
        source_key: &str,
    ) -> Result<Option<WorkItem>, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM work_items
             WHERE tenant_id = :tenant_id AND instance_id = :instance_id
               AND source_key = :source_key",
            named_params! {
                ":tenant_id": tenant_id.to_string(),
                ":instance_id": instance_id.to_string(),
                ":source_key": source_key,
            },
            work_item_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Search the warehouse with optional project / status / text filters,
    /// newest first.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn search_work_items(
        &self,
        tenant_id: Uuid,
        instance_id: Uuid,
        filter: &WorkItemFilter,
    ) -> Result<Vec<WorkItem>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT * FROM work_items
             WHERE tenant_id = :tenant_id AND instance_id = :instance_id
               AND (:project IS NULL OR project_id = :project)
               AND (:status IS NULL OR status = :status)
               AND (:text IS NULL OR title LIKE '%' || :text || '%')
             ORDER BY updated_at DESC
             LIMIT :limit",
        )?;
        let rows = stmt
            .query_map(
                named_params! {
                    ":tenant_id": tenant_id.to_string(),
                    ":instance_id": instance_id.to_string(),
                    ":project": filter.project,
                    ":status": filter.status.map(WorkItemStatus::as_str),
                    ":text": filter.text,
                    ":limit": filter.limit.max(1) as i64,
                },
                work_item_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Replace the stored comments for a work item.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn upsert_comments(
        &self,
        tenant_id: Uuid,
        instance_id: Uuid,
        comments: &[Comment],
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        for comment in comments {
            conn.execute(
                "INSERT INTO comments
                     (instance_id, source_id, tenant_id, work_item_id, author_id,
                      body, created_at, updated_at, raw)
                 VALUES
                     (:instance_id, :source_id, :tenant_id, :work_item_id, :author_id,
                      :body, :created_at, :updated_at, :raw)
                 ON CONFLICT (instance_id, source_id) DO UPDATE SET
                      body = excluded.body,
                      updated_at = excluded.updated_at,
                      raw = excluded.raw",
                named_params! {
                    ":instance_id": instance_id.to_string(),
                    ":source_id": comment.source_id,
                    ":tenant_id": tenant_id.to_string(),
                    ":work_item_id": comment.work_item_id,
                    ":author_id": comment.author_id,
                    ":body": comment.body,
                    ":created_at": fmt_ts(comment.created_at),
                    ":updated_at": fmt_ts(comment.updated_at),
                    ":raw": serde_json::to_string(&comment.raw)?,
                },
            )?;
        }
        Ok(())
    }

    /// Append transitions for a work item.
    ///
    /// # Errors
    ///
    /// Any SQLite or serialization failure.
    pub fn insert_transitions(
        &self,
        tenant_id: Uuid,
        instance_id: Uuid,
        transitions: &[Transition],
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        for transition in transitions {
            conn.execute(
                "INSERT INTO transitions
                     (tenant_id, instance_id, work_item_id, from_status,
                      to_status, actor_id, timestamp, raw)
                 VALUES
                     (:tenant_id, :instance_id, :work_item_id, :from_status,
                      :to_status, :actor_id, :timestamp, :raw)",
                named_params! {
                    ":tenant_id": tenant_id.to_string(),
                    ":instance_id": instance_id.to_string(),
                    ":work_item_id": transition.work_item_id,
                    ":from_status": transition.from_status.as_str(),
                    ":to_status": transition.to_status.as_str(),
                    ":actor_id": transition.actor_id,
                    ":timestamp": fmt_ts(transition.timestamp),
                    ":raw": serde_json::to_string(&transition.raw)?,
                },
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn item(tenant: Uuid, instance: Uuid, key: &str, title: &str) -> WorkItem {
        WorkItem {
            source_id: key.to_lowercase(),
            source_key: key.to_string(),
            source_kind: BackendKind::Jira,
            tenant_id: tenant,
            instance_id: instance,
            title: title.to_string(),
            description: None,
            status: WorkItemStatus::Todo,
            priority: WorkItemPriority::Medium,
            item_type: WorkItemType::Task,
            parent_id: None,
            project_id: Some("DEMO".into()),
            assignee_id: None,
            reporter_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            url: None,
            raw: json!({}),
            custom_fields: BTreeMap::new(),
        }
    }

    #[test]
    fn upsert_then_fetch_by_key() {
        let store = Store::open_in_memory().unwrap();
        let (tenant, instance) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .upsert_work_item(&item(tenant, instance, "DEMO-1", "hello"))
            .unwrap();

        let fetched = store
            .work_item_by_key(tenant, instance, "DEMO-1")
            .unwrap()
            .unwrap();
        assert_eq!(fetched.title, "hello");

        // Second upsert with the same identity updates in place.
        store
            .upsert_work_item(&item(tenant, instance, "DEMO-1", "renamed"))
            .unwrap();
        let fetched = store
            .work_item_by_key(tenant, instance, "DEMO-1")
            .unwrap()
            .unwrap();
        assert_eq!(fetched.title, "renamed");
    }

    #[test]
    fn search_filters_compose() {
        let store = Store::open_in_memory().unwrap();
        let (tenant, instance) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .upsert_work_item(&item(tenant, instance, "DEMO-1", "fix login"))
            .unwrap();
        store
            .upsert_work_item(&item(tenant, instance, "DEMO-2", "write docs"))
            .unwrap();

        let hits = store
            .search_work_items(
                tenant,
                instance,
                &WorkItemFilter {
                    text: Some("login".into()),
                    limit: 10,
                    ..WorkItemFilter::default()
                },
            )
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_key, "DEMO-1");

        let hits = store
            .search_work_items(
                tenant,
                instance,
                &WorkItemFilter {
                    project: Some("OTHER".into()),
                    limit: 10,
                    ..WorkItemFilter::default()
                },
            )
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_is_tenant_scoped() {
        let store = Store::open_in_memory().unwrap();
        let (tenant, instance) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .upsert_work_item(&item(tenant, instance, "DEMO-1", "hello"))
            .unwrap();

        let hits = store
            .search_work_items(
                Uuid::new_v4(),
                instance,
                &WorkItemFilter {
                    limit: 10,
                    ..WorkItemFilter::default()
                },
            )
            .unwrap();
        assert!(hits.is_empty());
    }
}
