// SPDX-License-Identifier: MIT OR Apache-2.0
//! The static tool registry.
//!
//! Tools are fixed at compile time; the registry is materialized once at
//! first use and never mutated afterwards.

use crate::params::{
    AddCommentParams, CreateWorkItemParams, GetWorkItemParams, LinkWorkItemsParams,
    ListTransitionsParams, SearchParams, TransitionWorkItemParams, UpdateWorkItemParams,
};
use serde_json::Value;
use std::sync::OnceLock;
use tg_core::{GatewayError, GatewayResult};

/// Whether a tool reads or mutates backend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// No side effects; no audit row, no idempotency record.
    Read,
    /// Mutates the backend; audited and deduplicated by key.
    Write,
}

/// One registered tool.
pub struct ToolDefinition {
    /// Tool name as addressed on the wire.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Read or write.
    pub kind: ToolKind,
    /// JSON Schema for the tool's arguments.
    pub schema: Value,
    validator: jsonschema::Validator,
}

impl ToolDefinition {
    fn new<P: schemars::JsonSchema>(
        name: &'static str,
        description: &'static str,
        kind: ToolKind,
    ) -> Self {
        let schema = serde_json::to_value(schemars::schema_for!(P))
            .expect("tool schema serializes");
        let validator = jsonschema::validator_for(&schema).expect("tool schema is valid");
        Self {
            name,
            description,
            kind,
            schema,
            validator,
        }
    }

    /// Validate raw arguments against this tool's schema.
    ///
    /// # Errors
    ///
    /// `validation_error` carrying one entry per failed field.
    pub fn validate(&self, arguments: &Value) -> GatewayResult<()> {
        let errors: Vec<Value> = self
            .validator
            .iter_errors(arguments)
            .map(|error| {
                serde_json::json!({
                    "path": error.instance_path.to_string(),
                    "message": error.to_string(),
                })
            })
            .collect();
        if errors.is_empty() {
            return Ok(());
        }
        Err(GatewayError::validation("invalid parameters")
            .with_details(serde_json::json!({ "errors": errors })))
    }
}

fn build_registry() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition::new::<SearchParams>(
            "search",
            "Search work items in the local warehouse",
            ToolKind::Read,
        ),
        ToolDefinition::new::<GetWorkItemParams>(
            "get_work_item",
            "Fetch one work item by key",
            ToolKind::Read,
        ),
        ToolDefinition::new::<CreateWorkItemParams>(
            "create_work_item",
            "Create a work item at the backend",
            ToolKind::Write,
        ),
        ToolDefinition::new::<UpdateWorkItemParams>(
            "update_work_item",
            "Partially update a work item at the backend",
            ToolKind::Write,
        ),
        ToolDefinition::new::<TransitionWorkItemParams>(
            "transition_work_item",
            "Move a work item to a new status",
            ToolKind::Write,
        ),
        ToolDefinition::new::<AddCommentParams>(
            "add_comment",
            "Add a comment to a work item",
            ToolKind::Write,
        ),
        ToolDefinition::new::<LinkWorkItemsParams>(
            "link_work_items",
            "Link two work items",
            ToolKind::Write,
        ),
        ToolDefinition::new::<ListTransitionsParams>(
            "list_transitions",
            "List status transitions of a work item",
            ToolKind::Read,
        ),
    ]
}

/// The process-global registry.
#[must_use]
pub fn registry() -> &'static [ToolDefinition] {
    static REGISTRY: OnceLock<Vec<ToolDefinition>> = OnceLock::new();
    REGISTRY.get_or_init(build_registry)
}

/// Look up one tool by name.
#[must_use]
pub fn find_tool(name: &str) -> Option<&'static ToolDefinition> {
    registry().iter().find(|tool| tool.name == name)
}

/// All registered tool names, in registry order.
#[must_use]
pub fn tool_names() -> Vec<&'static str> {
    registry().iter().map(|tool| tool.name).collect()
}
