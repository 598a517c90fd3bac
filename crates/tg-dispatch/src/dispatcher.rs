// SPDX-License-Identifier: MIT OR Apache-2.0
//! The tool-execution pipeline.

use crate::context::RequestContext;
use crate::params::{
    AddCommentParams, CreateWorkItemParams, GetWorkItemParams, LinkWorkItemsParams,
    ListTransitionsParams, SearchParams, TransitionWorkItemParams, UpdateWorkItemParams,
};
use crate::registry::{ToolKind, find_tool, tool_names};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tg_adapters::{NewWorkItem, SourceAdapter};
use tg_core::{
    AuthMaterial, BackendInstance, ErrorKind, GatewayError, GatewayResult, WorkItem,
};
use tg_ratelimit::RateLimiter;
use tg_store::{
    AuditAction, AuditEntry, CommitOutcome, IdempotencyRecord, IdempotencyStatus,
    IdempotencyWrite, Store, StoreError, WorkItemFilter, WriteCommit,
};
use tg_telemetry::global_metrics;
use tracing::{info, warn};

// ── Adapter construction seam ───────────────────────────────────────────

/// Produces the adapter for an instance. The seam exists so tests can
/// substitute a scripted adapter without an HTTP backend.
pub trait AdapterProvider: Send + Sync {
    /// Build (or fetch) the adapter for `instance`.
    ///
    /// # Errors
    ///
    /// `validation_error` when the credentials do not fit the backend.
    fn adapter(
        &self,
        instance: &BackendInstance,
        auth: &AuthMaterial,
    ) -> GatewayResult<Arc<dyn SourceAdapter>>;
}

/// The production provider, delegating to the adapter factory.
pub struct DefaultAdapterProvider;

impl AdapterProvider for DefaultAdapterProvider {
    fn adapter(
        &self,
        instance: &BackendInstance,
        auth: &AuthMaterial,
    ) -> GatewayResult<Arc<dyn SourceAdapter>> {
        tg_adapters::create_adapter(instance, auth)
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────────

/// Executes named tools through the full pipeline.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<Store>,
    limiter: RateLimiter,
    provider: Arc<dyn AdapterProvider>,
}

struct WriteOutcome {
    result: Value,
    work_item: Option<WorkItem>,
    audit: AuditEntry,
}

fn parse_params<T: DeserializeOwned>(arguments: &Value) -> GatewayResult<T> {
    serde_json::from_value(arguments.clone())
        .map_err(|e| GatewayError::validation(format!("invalid parameters: {e}")))
}

/// Replay a stored idempotency record as the pipeline's answer.
fn replay_record(record: &IdempotencyRecord) -> GatewayResult<Value> {
    match record.status {
        IdempotencyStatus::Completed => Ok(record.result.clone().unwrap_or(Value::Null)),
        IdempotencyStatus::Failed => {
            let err = record
                .error
                .clone()
                .and_then(|stored| serde_json::from_value::<GatewayError>(stored).ok())
                .unwrap_or_else(GatewayError::internal);
            Err(err)
        }
        // A record still in flight: the new request loses and learns who won.
        IdempotencyStatus::Processing => Err(GatewayError::conflict(
            "operation already in flight",
            record.request_id.as_deref().unwrap_or_default(),
        )),
    }
}

impl Dispatcher {
    /// Build a dispatcher over the given store, limiter, and adapter
    /// provider.
    #[must_use]
    pub fn new(store: Arc<Store>, limiter: RateLimiter, provider: Arc<dyn AdapterProvider>) -> Self {
        Self {
            store,
            limiter,
            provider,
        }
    }

    /// Execute one named tool invocation through the pipeline.
    ///
    /// # Errors
    ///
    /// Any taxonomy error: unknown tool, invalid arguments, missing
    /// instance, rate-limit overflow, adapter failure, or idempotency
    /// conflict.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        ctx: &RequestContext,
    ) -> GatewayResult<Value> {
        let metrics = global_metrics();
        metrics.increment("tools.invocations", 1, &[("tool", name)]);
        let started = Instant::now();

        let result = self.invoke_inner(name, arguments, ctx).await;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics.observe(
            "tools.duration_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            &[("tool", name), ("status", status)],
        );
        result
    }

    async fn invoke_inner(
        &self,
        name: &str,
        arguments: Value,
        ctx: &RequestContext,
    ) -> GatewayResult<Value> {
        // Resolve the tool and validate its arguments.
        let Some(tool) = find_tool(name) else {
            return Err(GatewayError::not_found(format!("tool '{name}' not found"))
                .with_details(json!({ "available": tool_names() })));
        };
        tool.validate(&arguments)?;

        // Resolve the instance and pass rate-limit admission.
        let instance_id = parse_instance_id(&arguments)?;
        let instance = self.store.resolve_instance(ctx.tenant_id, instance_id)?;
        self.limiter
            .check(instance.id, Some(instance.rate_limit_per_window), None)
            .await?;

        // Idempotency pre-check for write tools that carry a key.
        let key = arguments
            .get("idempotency_key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| ctx.idempotency_key.clone());
        if tool.kind == ToolKind::Write {
            if let Some(key) = &key {
                if let Some(record) = self.store.idempotency_check(ctx.tenant_id, name, key)? {
                    info!(
                        tool = name,
                        request_id = %ctx.request_id,
                        winner_request_id = record.request_id.as_deref().unwrap_or_default(),
                        "idempotency replay"
                    );
                    global_metrics().increment("tools.idempotent_replays", 1, &[("tool", name)]);
                    return replay_record(&record);
                }
            }
        }

        match tool.kind {
            ToolKind::Read => self.execute_read(name, &instance, &arguments).await,
            ToolKind::Write => self.execute_write(name, &instance, &arguments, ctx, key).await,
        }
    }

    fn adapter_for(&self, instance: &BackendInstance) -> GatewayResult<Arc<dyn SourceAdapter>> {
        let auth = self.store.credentials(instance)?;
        self.provider.adapter(instance, &auth)
    }

    // ── Read tools ──────────────────────────────────────────────────

    async fn execute_read(
        &self,
        name: &str,
        instance: &BackendInstance,
        arguments: &Value,
    ) -> GatewayResult<Value> {
        let started = Instant::now();
        match name {
            "search" => {
                let params: SearchParams = parse_params(arguments)?;
                let items = self.store.search_work_items(
                    instance.tenant_id,
                    instance.id,
                    &WorkItemFilter {
                        project: params.project,
                        status: params.status,
                        text: params.query,
                        limit: params.limit,
                    },
                )?;
                let rows: Vec<Value> = items
                    .iter()
                    .map(|item| {
                        json!({
                            "source_key": item.source_key,
                            "source_id": item.source_id,
                            "title": item.title,
                            "status": item.status,
                            "type": item.item_type,
                            "priority": item.priority,
                        })
                    })
                    .collect();
                Ok(json!({
                    "total": rows.len(),
                    "work_items": rows,
                    "instance_id": instance.id,
                    "query_time_ms": started.elapsed().as_millis() as u64,
                }))
            }
            "get_work_item" => {
                let params: GetWorkItemParams = parse_params(arguments)?;
                let cached = self.store.work_item_by_key(
                    instance.tenant_id,
                    instance.id,
                    &params.work_item_key,
                )?;
                let (item, source) = match cached {
                    Some(item) => (item, "warehouse"),
                    None => {
                        // Cache miss: go upstream and refresh the local copy.
                        let adapter = self.adapter_for(instance)?;
                        let item = adapter
                            .fetch_work_item(&params.work_item_key)
                            .await
                            .map_err(|mut err| {
                                if err.kind == ErrorKind::NotFound && err.details.is_none() {
                                    err.details = Some(json!({
                                        "work_item_key": params.work_item_key,
                                    }));
                                }
                                err
                            })?;
                        self.store.upsert_work_item(&item)?;
                        (item, "backend")
                    }
                };
                Ok(json!({
                    "work_item": item,
                    "source": source,
                    "instance_id": instance.id,
                    "query_time_ms": started.elapsed().as_millis() as u64,
                }))
            }
            "list_transitions" => {
                let params: ListTransitionsParams = parse_params(arguments)?;
                let adapter = self.adapter_for(instance)?;
                let transitions = adapter.fetch_transitions(&params.work_item_id).await?;
                Ok(json!({
                    "total": transitions.len(),
                    "transitions": transitions,
                    "instance_id": instance.id,
                }))
            }
            other => Err(GatewayError::not_found(format!("tool '{other}' not found"))),
        }
    }

    // ── Write tools ─────────────────────────────────────────────────

    async fn execute_write(
        &self,
        name: &str,
        instance: &BackendInstance,
        arguments: &Value,
        ctx: &RequestContext,
        key: Option<String>,
    ) -> GatewayResult<Value> {
        match self.run_write(name, instance, arguments, ctx).await {
            Ok(outcome) => {
                let idempotency = key.as_ref().map(|key| {
                    IdempotencyWrite::completed(
                        ctx.tenant_id,
                        name,
                        key,
                        outcome.result.clone(),
                        &ctx.request_id,
                    )
                });
                let committed = self.store.commit_write(WriteCommit {
                    work_item: outcome.work_item.as_ref(),
                    audit: Some(outcome.audit),
                    idempotency,
                })?;
                match committed {
                    CommitOutcome::Committed(_) => Ok(outcome.result),
                    // A concurrent duplicate won; answer with its result
                    // so both callers observe the same response.
                    CommitOutcome::LostRace(winner) => replay_record(&winner),
                }
            }
            Err(err) => {
                if let Some(key) = &key {
                    self.record_failure(name, ctx, key, &err)?;
                }
                Err(err)
            }
        }
    }

    /// Persist a terminal failure under the idempotency key so the
    /// client sees the same error on retry instead of a silent re-run.
    fn record_failure(
        &self,
        name: &str,
        ctx: &RequestContext,
        key: &str,
        err: &GatewayError,
    ) -> GatewayResult<()> {
        let stored = serde_json::to_value(err).unwrap_or_else(|_| {
            json!({ "kind": "upstream_5xx", "message": "internal error" })
        });
        let write = IdempotencyWrite::failed(ctx.tenant_id, name, key, stored, &ctx.request_id);
        match self.store.idempotency_store(&write) {
            Ok(_) => Ok(()),
            // A concurrent duplicate already recorded its outcome.
            Err(err) if err.is_constraint_violation() => Ok(()),
            Err(other) => {
                warn!(error = %other, tool = name, "failed to persist idempotency failure");
                Ok(())
            }
        }
    }

    async fn run_write(
        &self,
        name: &str,
        instance: &BackendInstance,
        arguments: &Value,
        ctx: &RequestContext,
    ) -> GatewayResult<WriteOutcome> {
        let adapter = self.adapter_for(instance)?;
        let tenant_id = ctx.tenant_id;

        let decorate = |entry: AuditEntry| {
            entry
                .with_user(ctx.user_id.clone())
                .with_request_id(&ctx.request_id)
                .with_client(ctx.ip_address.clone(), ctx.user_agent.clone())
        };

        match name {
            "create_work_item" => {
                let params: CreateWorkItemParams = parse_params(arguments)?;
                let new = NewWorkItem {
                    project_id: params.project,
                    title: params.title,
                    description: params.description,
                    item_type: params.item_type,
                    priority: params.priority,
                    assignee_id: params.assignee_id,
                    extras: params.extras,
                };
                let item = adapter.create_work_item(&new).await?;
                let result = serde_json::to_value(&item)
                    .map_err(StoreError::Serialization)
                    .map_err(GatewayError::from)?;
                let audit = decorate(AuditEntry::create(
                    tenant_id,
                    "work_item",
                    &item.source_key,
                    result.clone(),
                ));
                Ok(WriteOutcome {
                    result,
                    work_item: Some(item),
                    audit,
                })
            }
            "update_work_item" => {
                let params: UpdateWorkItemParams = parse_params(arguments)?;
                let before = self.store.work_item_by_key(
                    tenant_id,
                    instance.id,
                    &params.work_item_id,
                )?;
                let item = adapter
                    .update_work_item(&params.work_item_id, &params.fields)
                    .await?;
                let result = serde_json::to_value(&item)
                    .map_err(StoreError::Serialization)
                    .map_err(GatewayError::from)?;
                let before_value = before
                    .as_ref()
                    .and_then(|b| serde_json::to_value(b).ok())
                    .unwrap_or(Value::Null);
                let audit = decorate(AuditEntry::update(
                    tenant_id,
                    "work_item",
                    &item.source_key,
                    before_value,
                    result.clone(),
                ));
                Ok(WriteOutcome {
                    result,
                    work_item: Some(item),
                    audit,
                })
            }
            "transition_work_item" => {
                let params: TransitionWorkItemParams = parse_params(arguments)?;
                let before = self.store.work_item_by_key(
                    tenant_id,
                    instance.id,
                    &params.work_item_id,
                )?;
                let item = adapter
                    .transition_work_item(
                        &params.work_item_id,
                        params.to_status,
                        params.comment.as_deref(),
                    )
                    .await?;
                let result = serde_json::to_value(&item)
                    .map_err(StoreError::Serialization)
                    .map_err(GatewayError::from)?;
                let before_value = before
                    .as_ref()
                    .and_then(|b| serde_json::to_value(b).ok())
                    .unwrap_or(Value::Null);
                let audit = decorate(
                    AuditEntry::update(
                        tenant_id,
                        "work_item",
                        &item.source_key,
                        before_value,
                        result.clone(),
                    )
                    .with_action(AuditAction::Transition),
                );
                Ok(WriteOutcome {
                    result,
                    work_item: Some(item),
                    audit,
                })
            }
            "add_comment" => {
                let params: AddCommentParams = parse_params(arguments)?;
                let comment = adapter.add_comment(&params.work_item_id, &params.body).await?;
                let result = serde_json::to_value(&comment)
                    .map_err(StoreError::Serialization)
                    .map_err(GatewayError::from)?;
                let audit = decorate(
                    AuditEntry::create(tenant_id, "comment", &comment.source_id, result.clone())
                        .with_action(AuditAction::Comment),
                );
                Ok(WriteOutcome {
                    result,
                    work_item: None,
                    audit,
                })
            }
            "link_work_items" => {
                let params: LinkWorkItemsParams = parse_params(arguments)?;
                adapter
                    .link_work_items(&params.inward_id, &params.outward_id, &params.link_type)
                    .await?;
                let resource_id = format!("{}->{}", params.inward_id, params.outward_id);
                let result = json!({
                    "linked": true,
                    "inward_id": params.inward_id,
                    "outward_id": params.outward_id,
                    "link_type": params.link_type,
                });
                let audit = decorate(
                    AuditEntry::create(tenant_id, "work_item_link", &resource_id, result.clone())
                        .with_action(AuditAction::Link),
                );
                Ok(WriteOutcome {
                    result,
                    work_item: None,
                    audit,
                })
            }
            other => Err(GatewayError::not_found(format!("tool '{other}' not found"))),
        }
    }
}

fn parse_instance_id(arguments: &Value) -> GatewayResult<Option<uuid::Uuid>> {
    match arguments.get("instance_id") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => uuid::Uuid::parse_str(raw).map(Some).map_err(|_| {
            GatewayError::validation("instance_id must be a uuid")
                .with_details(json!({ "instance_id": raw }))
        }),
        Some(_) => Err(GatewayError::validation("instance_id must be a uuid string")),
    }
}

