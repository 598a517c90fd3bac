// SPDX-License-Identifier: MIT OR Apache-2.0
//! The compile-time template registry and per-template parameter
//! schemas.
//!
//! Each template declares a binder that validates the client-supplied
//! parameters and produces named bindings. The engine injects
//! `:tenant_id` from the authenticated context; a client-supplied
//! tenant id is ignored.

use rusqlite::types::Value as SqlValue;
use serde_json::{Map, Value, json};
use tg_core::{GatewayError, GatewayResult};

// ── Parameter validation helpers ────────────────────────────────────────

#[derive(Default)]
struct FieldErrors(Vec<Value>);

impl FieldErrors {
    fn push(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .push(json!({ "field": field, "message": message.into() }));
    }

    fn into_result(self) -> GatewayResult<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::validation("invalid parameters")
                .with_details(json!({ "errors": self.0 })))
        }
    }
}

fn is_project_key(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 50
        && s.chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

fn is_issue_key(s: &str) -> bool {
    let Some((prefix, number)) = s.split_once('-') else {
        return false;
    };
    !prefix.is_empty()
        && prefix.chars().all(|c| c.is_ascii_uppercase())
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

fn required_str(params: &Map<String, Value>, field: &str, errors: &mut FieldErrors) -> String {
    match params.get(field) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::String(_)) => {
            errors.push(field, "must not be empty");
            String::new()
        }
        Some(_) => {
            errors.push(field, "must be a string");
            String::new()
        }
        None => {
            errors.push(field, "is required");
            String::new()
        }
    }
}

fn optional_str(
    params: &Map<String, Value>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<String> {
    match params.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(field, "must be a string");
            None
        }
    }
}

fn int_in_range(
    params: &Map<String, Value>,
    field: &str,
    default: i64,
    min: i64,
    max: i64,
    errors: &mut FieldErrors,
) -> i64 {
    match params.get(field) {
        None | Some(Value::Null) => default,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(v) if (min..=max).contains(&v) => v,
            _ => {
                errors.push(field, format!("must be an integer in {min}..={max}"));
                default
            }
        },
        Some(_) => {
            errors.push(field, "must be an integer");
            default
        }
    }
}

fn opt_text(value: Option<String>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Text)
}

// ── The registry ────────────────────────────────────────────────────────

/// Binder: validate client parameters and produce named bindings.
pub type Binder = fn(&Map<String, Value>) -> GatewayResult<Vec<(&'static str, SqlValue)>>;

/// One whitelisted template.
pub struct QueryTemplate {
    /// Template name as addressed on the wire.
    pub name: &'static str,
    /// The SQL source, a compile-time constant.
    pub sql: &'static str,
    /// Parameter schema enforcement for this template.
    pub bind: Binder,
}

const SEARCH_ISSUES_BY_PROJECT: &str = "
    SELECT
        source_key,
        project_id AS project_key,
        title,
        item_type AS type,
        priority,
        status,
        assignee_id AS assignee,
        reporter_id AS reporter,
        created_at,
        updated_at,
        closed_at
    FROM work_items
    WHERE tenant_id = :tenant_id
      AND project_id = :project_key
      AND (:status IS NULL OR status = :status)
      AND (:assignee IS NULL OR assignee_id = :assignee)
      AND (:priority IS NULL OR priority = :priority)
    ORDER BY updated_at DESC
    LIMIT :limit
";

const GET_PROJECT_METRICS: &str = "
    SELECT
        date,
        created,
        closed,
        wip,
        wip_no_assignee,
        stuck_gt_x_days,
        reopened,
        lead_time_p50_days,
        lead_time_p90_days,
        lead_time_avg_days,
        sla_at_risk,
        sla_breached,
        created_4w_avg,
        closed_4w_avg,
        created_delta_pct,
        closed_delta_pct
    FROM work_item_metrics_daily
    WHERE tenant_id = :tenant_id
      AND project_key = :project_key
      AND date >= date('now', '-' || :days || ' days')
    ORDER BY date DESC
";

const SEARCH_ISSUES_BY_TEXT: &str = "
    SELECT
        source_key,
        project_id AS project_key,
        title,
        item_type AS type,
        status,
        assignee_id AS assignee,
        updated_at
    FROM work_items
    WHERE tenant_id = :tenant_id
      AND project_id IN (SELECT value FROM json_each(:project_keys))
      AND title LIKE '%' || :query || '%'
    ORDER BY updated_at DESC
    LIMIT :limit
";

const GET_ISSUE_HISTORY: &str = "
    SELECT
        id,
        from_status,
        to_status,
        timestamp,
        actor_id AS actor
    FROM transitions
    WHERE tenant_id = :tenant_id
      AND work_item_id = :issue_key
    ORDER BY timestamp DESC
    LIMIT :limit
";

const GET_USER_WORKLOAD: &str = "
    SELECT
        project_id AS project_key,
        COUNT(*) AS issue_count,
        SUM(CASE WHEN priority = 'critical' THEN 1 ELSE 0 END) AS critical_count,
        SUM(CASE WHEN priority = 'high' THEN 1 ELSE 0 END) AS high_count,
        SUM(CASE WHEN status = 'blocked' THEN 1 ELSE 0 END) AS blocked_count,
        AVG(julianday('now') - julianday(updated_at)) AS avg_days_since_update
    FROM work_items
    WHERE tenant_id = :tenant_id
      AND assignee_id = :assignee
      AND (:statuses IS NULL
           OR status IN (SELECT value FROM json_each(:statuses)))
    GROUP BY project_id
    ORDER BY issue_count DESC
";

const LEAD_TIME_METRICS: &str = "
    SELECT
        date,
        project_key,
        team,
        lead_time_p50_days,
        lead_time_p90_days,
        lead_time_avg_days,
        closed AS throughput
    FROM work_item_metrics_daily
    WHERE tenant_id = :tenant_id
      AND (:project_key IS NULL OR project_key = :project_key)
      AND (:team IS NULL OR team = :team)
      AND date >= date('now', '-' || :days || ' days')
    ORDER BY date DESC
";

fn bind_search_issues_by_project(
    params: &Map<String, Value>,
) -> GatewayResult<Vec<(&'static str, SqlValue)>> {
    let mut errors = FieldErrors::default();
    let project_key = required_str(params, "project_key", &mut errors);
    if !project_key.is_empty() && !is_project_key(&project_key) {
        errors.push("project_key", "must match ^[A-Z0-9-]+$");
    }
    let status = optional_str(params, "status", &mut errors);
    let assignee = optional_str(params, "assignee", &mut errors);
    let priority = optional_str(params, "priority", &mut errors);
    let limit = int_in_range(params, "limit", 50, 1, 100, &mut errors);
    errors.into_result()?;

    Ok(vec![
        (":project_key", SqlValue::Text(project_key)),
        (":status", opt_text(status)),
        (":assignee", opt_text(assignee)),
        (":priority", opt_text(priority)),
        (":limit", SqlValue::Integer(limit)),
    ])
}

fn bind_get_project_metrics(
    params: &Map<String, Value>,
) -> GatewayResult<Vec<(&'static str, SqlValue)>> {
    let mut errors = FieldErrors::default();
    let project_key = required_str(params, "project_key", &mut errors);
    if !project_key.is_empty() && !is_project_key(&project_key) {
        errors.push("project_key", "must match ^[A-Z0-9-]+$");
    }
    let days = int_in_range(params, "days", 30, 1, 365, &mut errors);
    errors.into_result()?;

    Ok(vec![
        (":project_key", SqlValue::Text(project_key)),
        (":days", SqlValue::Integer(days)),
    ])
}

fn bind_search_issues_by_text(
    params: &Map<String, Value>,
) -> GatewayResult<Vec<(&'static str, SqlValue)>> {
    let mut errors = FieldErrors::default();
    let query = required_str(params, "query", &mut errors);
    if query.len() > 200 {
        errors.push("query", "must be at most 200 characters");
    }
    let keys: Vec<String> = match params.get("project_keys") {
        Some(Value::Array(items)) if !items.is_empty() && items.len() <= 50 => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Some(Value::Array(_)) => {
            errors.push("project_keys", "must contain between 1 and 50 entries");
            Vec::new()
        }
        _ => {
            errors.push("project_keys", "is required and must be an array");
            Vec::new()
        }
    };
    for key in &keys {
        if !is_project_key(key) {
            errors.push("project_keys", format!("invalid project key: {key}"));
        }
    }
    let limit = int_in_range(params, "limit", 20, 1, 100, &mut errors);
    errors.into_result()?;

    Ok(vec![
        (":query", SqlValue::Text(query)),
        (
            ":project_keys",
            SqlValue::Text(serde_json::to_string(&keys).unwrap_or_else(|_| "[]".into())),
        ),
        (":limit", SqlValue::Integer(limit)),
    ])
}

fn bind_get_issue_history(
    params: &Map<String, Value>,
) -> GatewayResult<Vec<(&'static str, SqlValue)>> {
    let mut errors = FieldErrors::default();
    let issue_key = required_str(params, "issue_key", &mut errors);
    if !issue_key.is_empty() && !is_issue_key(&issue_key) {
        errors.push("issue_key", "must match ^[A-Z]+-\\d+$");
    }
    let limit = int_in_range(params, "limit", 100, 1, 500, &mut errors);
    errors.into_result()?;

    Ok(vec![
        (":issue_key", SqlValue::Text(issue_key)),
        (":limit", SqlValue::Integer(limit)),
    ])
}

fn bind_get_user_workload(
    params: &Map<String, Value>,
) -> GatewayResult<Vec<(&'static str, SqlValue)>> {
    let mut errors = FieldErrors::default();
    let assignee = required_str(params, "assignee", &mut errors);
    if assignee.len() > 255 {
        errors.push("assignee", "must be at most 255 characters");
    }
    let statuses: Option<Vec<String>> = match params.get("status") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) if items.len() <= 20 => Some(
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
        ),
        Some(_) => {
            errors.push("status", "must be an array of at most 20 statuses");
            None
        }
    };
    errors.into_result()?;

    Ok(vec![
        (":assignee", SqlValue::Text(assignee)),
        (
            ":statuses",
            statuses.map_or(SqlValue::Null, |s| {
                SqlValue::Text(serde_json::to_string(&s).unwrap_or_else(|_| "[]".into()))
            }),
        ),
    ])
}

fn bind_lead_time_metrics(
    params: &Map<String, Value>,
) -> GatewayResult<Vec<(&'static str, SqlValue)>> {
    let mut errors = FieldErrors::default();
    let project_key = optional_str(params, "project_key", &mut errors);
    if let Some(key) = &project_key {
        if !is_project_key(key) {
            errors.push("project_key", "must match ^[A-Z0-9-]+$");
        }
    }
    let team = optional_str(params, "team", &mut errors);
    let days = int_in_range(params, "days", 30, 1, 365, &mut errors);
    errors.into_result()?;

    Ok(vec![
        (":project_key", opt_text(project_key)),
        (":team", opt_text(team)),
        (":days", SqlValue::Integer(days)),
    ])
}

/// The whitelist. Fixed at compile time; nothing is registered at
/// runtime.
pub const TEMPLATES: &[QueryTemplate] = &[
    QueryTemplate {
        name: "search_issues_by_project",
        sql: SEARCH_ISSUES_BY_PROJECT,
        bind: bind_search_issues_by_project,
    },
    QueryTemplate {
        name: "get_project_metrics",
        sql: GET_PROJECT_METRICS,
        bind: bind_get_project_metrics,
    },
    QueryTemplate {
        name: "search_issues_by_text",
        sql: SEARCH_ISSUES_BY_TEXT,
        bind: bind_search_issues_by_text,
    },
    QueryTemplate {
        name: "get_issue_history",
        sql: GET_ISSUE_HISTORY,
        bind: bind_get_issue_history,
    },
    QueryTemplate {
        name: "get_user_workload",
        sql: GET_USER_WORKLOAD,
        bind: bind_get_user_workload,
    },
    QueryTemplate {
        name: "lead_time_metrics",
        sql: LEAD_TIME_METRICS,
        bind: bind_lead_time_metrics,
    },
];

/// Names of every whitelisted template, in registry order.
#[must_use]
pub fn template_names() -> Vec<&'static str> {
    TEMPLATES.iter().map(|t| t.name).collect()
}

/// Look up a template by name.
#[must_use]
pub fn find_template(name: &str) -> Option<&'static QueryTemplate> {
    TEMPLATES.iter().find(|t| t.name == name)
}
