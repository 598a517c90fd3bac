// SPDX-License-Identifier: MIT OR Apache-2.0
//! Handler registry and event dispatch.

use crate::events::WebhookEventType;
use crate::signature::verify_signature;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use tg_core::{GatewayError, GatewayResult};
use tracing::{error, info, warn};

/// An async webhook handler. Receives the parsed payload; an `Err` is
/// recorded in the dispatch results without stopping other handlers.
pub type Handler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Receiver for one backend's webhook endpoint.
///
/// Registration takes the write half of a lock the dispatch path reads,
/// so hooking handlers is race-free against incoming requests.
pub struct WebhookReceiver {
    secret: Option<String>,
    handlers: RwLock<HashMap<WebhookEventType, Vec<Handler>>>,
}

impl WebhookReceiver {
    /// A receiver verifying signatures with `secret`. Passing `None`
    /// disables verification (development only).
    #[must_use]
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for one event type.
    pub fn register<F>(&self, event: WebhookEventType, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().expect("webhook registry poisoned");
        handlers.entry(event).or_default().push(Arc::new(handler));
        info!(event = %event, "webhook handler registered");
    }

    /// Verify the `X-Hub-Signature` header against the raw body.
    ///
    /// # Errors
    ///
    /// `unauthorized` when a secret is configured and the signature is
    /// absent or does not match.
    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> GatewayResult<()> {
        let Some(secret) = &self.secret else {
            warn!("no webhook secret configured, skipping verification");
            return Ok(());
        };
        let Some(signature) = signature else {
            return Err(GatewayError::unauthorized("missing webhook signature"));
        };
        if !verify_signature(secret, body, signature) {
            return Err(GatewayError::unauthorized("invalid webhook signature"));
        }
        Ok(())
    }

    /// Verify, parse, and dispatch one webhook delivery.
    ///
    /// The response is always 200-shaped once the signature verifies:
    /// unknown events and events with no handlers are acknowledged as
    /// ignored, and handler failures are reported in `results`.
    ///
    /// # Errors
    ///
    /// `unauthorized` on signature failure; `validation_error` when the
    /// body is not JSON.
    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> GatewayResult<Value> {
        self.verify(body, signature)?;

        let payload: Value = serde_json::from_slice(body)
            .map_err(|e| GatewayError::validation(format!("webhook body is not JSON: {e}")))?;

        let Some(raw_event) = payload["webhookEvent"].as_str() else {
            warn!("webhook payload has no webhookEvent field");
            return Ok(json!({ "status": "error", "message": "Missing webhookEvent" }));
        };
        let Some(event) = WebhookEventType::parse(raw_event) else {
            info!(event = raw_event, "unknown webhook event ignored");
            return Ok(json!({
                "status": "ignored",
                "message": format!("Unknown event: {raw_event}"),
            }));
        };

        // Snapshot the handler list so dispatch never holds the lock
        // across an await.
        let handlers: Vec<Handler> = {
            let registry = self.handlers.read().expect("webhook registry poisoned");
            registry.get(&event).cloned().unwrap_or_default()
        };
        if handlers.is_empty() {
            info!(event = %event, "no handlers registered");
            return Ok(json!({
                "status": "ignored",
                "message": format!("No handlers for {event}"),
            }));
        }

        let mut results = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            match handler(payload.clone()).await {
                Ok(result) => results.push(result),
                Err(message) => {
                    error!(event = %event, error = %message, "webhook handler failed");
                    results.push(json!({ "error": message }));
                }
            }
        }

        Ok(json!({
            "status": "success",
            "event_type": event.as_str(),
            "handlers_executed": handlers.len(),
            "results": results,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sign_body;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "webhookEvent": "jira:issue_created",
            "issue": { "key": "PROJ-1" },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn bad_signature_runs_no_handlers() {
        let receiver = WebhookReceiver::new(Some("s3cret".into()));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);
        receiver.register(WebhookEventType::IssueCreated, move |_| {
            let ran = Arc::clone(&ran_clone);
            Box::pin(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(json!({}))
            })
        });

        let err = receiver
            .handle(&payload(), Some("sha256=deadbeef"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, tg_core::ErrorKind::Unauthorized);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let err = receiver.handle(&payload(), None).await.unwrap_err();
        assert_eq!(err.kind, tg_core::ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn a_failing_handler_does_not_stop_the_rest() {
        let receiver = WebhookReceiver::new(Some("s3cret".into()));
        receiver.register(WebhookEventType::IssueCreated, |payload| {
            Box::pin(async move {
                Ok(json!({ "issue_key": payload["issue"]["key"], "action": "created" }))
            })
        });
        receiver.register(WebhookEventType::IssueCreated, |_| {
            Box::pin(async move { Err("boom".to_string()) })
        });

        let body = payload();
        let signature = sign_body("s3cret", &body);
        let summary = receiver.handle(&body, Some(&signature)).await.unwrap();

        assert_eq!(summary["status"], json!("success"));
        assert_eq!(summary["handlers_executed"], json!(2));
        assert_eq!(summary["results"][0]["issue_key"], json!("PROJ-1"));
        assert_eq!(summary["results"][1]["error"], json!("boom"));
    }

    #[tokio::test]
    async fn unknown_and_unhandled_events_are_acknowledged() {
        let receiver = WebhookReceiver::new(Some("s3cret".into()));

        let body = serde_json::to_vec(&json!({ "webhookEvent": "jira:issue_created" })).unwrap();
        let signature = sign_body("s3cret", &body);
        let summary = receiver.handle(&body, Some(&signature)).await.unwrap();
        assert_eq!(summary["status"], json!("ignored"));

        let body = serde_json::to_vec(&json!({ "webhookEvent": "made_up" })).unwrap();
        let signature = sign_body("s3cret", &body);
        let summary = receiver.handle(&body, Some(&signature)).await.unwrap();
        assert_eq!(summary["status"], json!("ignored"));

        let body = serde_json::to_vec(&json!({ "noEvent": true })).unwrap();
        let signature = sign_body("s3cret", &body);
        let summary = receiver.handle(&body, Some(&signature)).await.unwrap();
        assert_eq!(summary["status"], json!("error"));
    }
}
