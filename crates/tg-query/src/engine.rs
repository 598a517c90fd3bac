// SPDX-License-Identifier: MIT OR Apache-2.0
//! Template execution against the store.

use crate::templates::find_template;
use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Instant;
use tg_core::{GatewayError, GatewayResult};
use tg_store::Store;
use uuid::Uuid;

/// Result of a template execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Result rows as JSON objects.
    pub results: Vec<Value>,
    /// Number of rows returned.
    pub total: usize,
    /// Execution wall time in milliseconds.
    pub query_time_ms: u64,
    /// The template that ran.
    pub template_name: String,
}

/// Execute a whitelisted template for the authenticated tenant.
///
/// The tenant binding always comes from `tenant_id`; a client-supplied
/// `tenant_id` parameter is ignored.
///
/// # Errors
///
/// `validation_error` for an unknown template or invalid parameters;
/// internal errors for store failures.
pub fn execute_template(
    store: &Store,
    template_name: &str,
    params: &Map<String, Value>,
    tenant_id: Uuid,
) -> GatewayResult<QueryResponse> {
    let Some(template) = find_template(template_name) else {
        return Err(
            GatewayError::validation(format!("unknown template: {template_name}"))
                .with_details(serde_json::json!({
                    "available": crate::templates::template_names(),
                })),
        );
    };

    let mut bindings = (template.bind)(params)?;
    bindings.push((":tenant_id", SqlValue::Text(tenant_id.to_string())));

    let started = Instant::now();
    let rows = store.select_rows(template.sql, &bindings)?;
    let query_time_ms = started.elapsed().as_millis() as u64;

    tracing::debug!(
        template = template_name,
        rows = rows.len(),
        query_time_ms,
        "template executed"
    );

    Ok(QueryResponse {
        total: rows.len(),
        results: rows.into_iter().map(Value::Object).collect(),
        query_time_ms,
        template_name: template_name.to_string(),
    })
}
