//! Tool dispatch
//!
//! Resolves each requested call against the registry, binds the acting
//! user to the session, validates arguments and invokes. Every request
//! yields exactly one result, panics included; nothing here aborts a turn.

use crate::models::{ToolCallRequest, ToolCallResult};
use crate::tools::validation::validate_arguments;
use crate::tools::{ToolContext, ToolRegistry};
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Run all calls concurrently. Results come back in request order.
    pub async fn dispatch(
        &self,
        session_id: &str,
        calls: &[ToolCallRequest],
    ) -> Vec<ToolCallResult> {
        join_all(calls.iter().map(|call| self.dispatch_one(session_id, call))).await
    }

    pub async fn dispatch_one(&self, session_id: &str, call: &ToolCallRequest) -> ToolCallResult {
        let Some(tool) = self.registry.get(&call.name) else {
            warn!(session_id, call_id = %call.call_id, tool_name = %call.name, "Unknown tool requested");
            return ToolCallResult::error(&call.call_id, format!("unknown tool '{}'", call.name));
        };

        let mut args = call.arguments.clone();
        if let Some(field) = tool.identity_field() {
            bind_identity(&mut args, field, session_id);
        }

        if let Err(reason) = validate_arguments(&args, &tool.parameters()) {
            debug!(session_id, call_id = %call.call_id, tool_name = %call.name, %reason, "Rejected tool arguments");
            return ToolCallResult::error(
                &call.call_id,
                format!("invalid arguments for {}: {}", call.name, reason),
            );
        }

        let ctx = ToolContext::new(session_id, &call.call_id);
        let started = Instant::now();

        let outcome = AssertUnwindSafe(tool.invoke(args, &ctx)).catch_unwind().await;

        match outcome {
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(session_id, call_id = %call.call_id, tool_name = %call.name, %reason, "Tool panicked");
                ToolCallResult::error(&call.call_id, format!("{} failed: {}", call.name, reason))
            }
            Ok(Ok(envelope)) => {
                info!(
                    session_id,
                    call_id = %call.call_id,
                    tool_name = %call.name,
                    status = ?envelope.status,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool completed"
                );
                ToolCallResult::from_envelope(&call.call_id, envelope)
            }
            Ok(Err(e)) => {
                warn!(session_id, call_id = %call.call_id, tool_name = %call.name, error = %e, "Tool failed");
                ToolCallResult::error(&call.call_id, format!("{} failed: {}", call.name, e))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "tool panicked".to_string()
    }
}

/// Overwrite the identity argument with the session id. Non-object
/// arguments are left alone and fail validation.
fn bind_identity(args: &mut Value, field: &str, session_id: &str) {
    if let Some(obj) = args.as_object_mut() {
        obj.insert(field.to_string(), Value::String(session_id.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::models::{ToolEnvelope, ToolStatus};
    use crate::tools::Tool;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Mutex;

    /// Echoes its arguments after an optional delay and records what it saw.
    struct EchoTool {
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "echo"
        }
        fn parameters(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "user_id": { "type": "string" },
                    "delay_ms": { "type": "integer" },
                },
                "required": ["user_id"],
            })
        }
        fn identity_field(&self) -> Option<&'static str> {
            Some("user_id")
        }
        async fn invoke(&self, args: Value, _ctx: &ToolContext) -> crate::Result<ToolEnvelope> {
            let delay = args["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.seen.lock().await.push(args.clone());
            Ok(ToolEnvelope::success(args, "ok"))
        }
    }

    struct BrokenTool;

    #[async_trait::async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn description(&self) -> &'static str {
            "always fails"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> crate::Result<ToolEnvelope> {
            Err(OrchestrationError::ToolError("backend down".into()))
        }
    }

    struct PanickingTool;

    #[async_trait::async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &'static str {
            "explode"
        }
        fn description(&self) -> &'static str {
            "panics"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }
        async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> crate::Result<ToolEnvelope> {
            panic!("window arithmetic overflowed");
        }
    }

    fn setup() -> (ToolDispatcher, Arc<EchoTool>) {
        let echo = Arc::new(EchoTool {
            seen: Mutex::new(Vec::new()),
        });
        let mut registry = ToolRegistry::new();
        registry.register(echo.clone());
        registry.register(Arc::new(BrokenTool));
        registry.register(Arc::new(PanickingTool));
        (ToolDispatcher::new(Arc::new(registry)), echo)
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            call_id: id.to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_identity_is_overwritten_with_session() {
        let (dispatcher, echo) = setup();

        let result = dispatcher
            .dispatch_one("u1", &call("c1", "echo", json!({"user_id": "someone_else"})))
            .await;

        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(echo.seen.lock().await[0]["user_id"], "u1");
    }

    #[tokio::test]
    async fn test_missing_identity_is_bound_before_validation() {
        let (dispatcher, echo) = setup();

        let result = dispatcher.dispatch_one("u1", &call("c1", "echo", json!({}))).await;

        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(echo.seen.lock().await[0]["user_id"], "u1");
    }

    #[tokio::test]
    async fn test_unknown_tool_and_failures_become_error_results() {
        let (dispatcher, echo) = setup();

        let results = dispatcher
            .dispatch(
                "u1",
                &[
                    call("a", "nope", json!({})),
                    call("b", "broken", json!({})),
                    call("c", "echo", json!("not an object")),
                ],
            )
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.status == ToolStatus::Error));
        assert_eq!(results[0].message, "unknown tool 'nope'");
        assert!(results[1].message.contains("backend down"));
        assert!(results[2].message.starts_with("invalid arguments for echo"));
        assert!(echo.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_tool_yields_error_result() {
        let (dispatcher, echo) = setup();

        let results = dispatcher
            .dispatch(
                "u1",
                &[call("boom", "explode", json!({})), call("fine", "echo", json!({}))],
            )
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].call_id, "boom");
        assert_eq!(results[0].status, ToolStatus::Error);
        assert_eq!(results[0].message, "explode failed: window arithmetic overflowed");
        assert_eq!(results[1].status, ToolStatus::Success);
        assert_eq!(echo.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_results_follow_request_order() {
        let (dispatcher, echo) = setup();

        let results = dispatcher
            .dispatch(
                "u1",
                &[
                    call("slow", "echo", json!({"delay_ms": 60})),
                    call("mid", "echo", json!({"delay_ms": 30})),
                    call("fast", "echo", json!({"delay_ms": 0})),
                ],
            )
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["slow", "mid", "fast"]);

        // Completion order was the reverse.
        let seen = echo.seen.lock().await;
        assert_eq!(seen[0]["delay_ms"], 0);
        assert_eq!(seen[2]["delay_ms"], 60);
    }
}
