//! In-process execution backend: resolves `handlerRef` against a registered
//! table of handlers in the current process, races the call against a
//! deadline, and honors cooperative cancellation (§4.7).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{ExecutionBackend, ExecutionRequest, ExecutionResult, InProcessHandler};
use crate::plugins::HandlerContext;

pub struct InProcessBackend {
    handlers: HashMap<String, InProcessHandler>,
    default_timeout_ms: u64,
}

impl InProcessBackend {
    pub fn new(default_timeout_ms: u64) -> Self {
        Self {
            handlers: HashMap::new(),
            default_timeout_ms,
        }
    }

    /// Register a handler under its `handlerRef` (`<file>#<export>`), as
    /// resolved relative to a plugin's root at load time.
    pub fn register(&mut self, handler_ref: impl Into<String>, handler: InProcessHandler) {
        self.handlers.insert(handler_ref.into(), handler);
    }
}

#[async_trait]
impl ExecutionBackend for InProcessBackend {
    async fn execute(&self, request: ExecutionRequest, cancel: CancellationToken) -> ExecutionResult {
        let started = Instant::now();

        let Some(handler) = self.handlers.get(&request.handler_ref) else {
            return ExecutionResult::err(
                "E_HANDLER_NOT_FOUND",
                format!("no in-process handler registered for {}", request.handler_ref),
                started.elapsed(),
            );
        };

        let context = HandlerContext {
            plugin_id: request.plugin_id.clone(),
            plugin_root: request.plugin_root.clone(),
            request_id: request.descriptor.request_id.clone(),
            tenant_id: request.descriptor.tenant_id.clone(),
        };

        let timeout_ms = request.timeout_ms.unwrap_or(self.default_timeout_ms);
        let call = handler(request.input, context);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                ExecutionResult::err("E_EXEC_TIMEOUT", "execution cancelled", started.elapsed())
            }
            outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), call) => {
                match outcome {
                    Ok(output) if output.ok => {
                        ExecutionResult::ok(output.data.unwrap_or(serde_json::Value::Null), started.elapsed())
                    }
                    Ok(output) => {
                        let error = output.error.unwrap_or_else(|| crate::plugins::HandlerErrorPayload {
                            code: "E_EXEC_FAILED".to_string(),
                            message: "handler returned ok=false without an error payload".to_string(),
                        });
                        ExecutionResult::err(error.code, error.message, started.elapsed())
                    }
                    Err(_) => {
                        cancel.cancel();
                        ExecutionResult::timed_out(started.elapsed())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{ExecutionDescriptor, ExecutionRequest};
    use crate::plugins::manifest::PermissionSpec;
    use crate::plugins::HandlerOutput;
    use std::path::PathBuf;

    fn request(handler_ref: &str, timeout_ms: Option<u64>) -> ExecutionRequest {
        ExecutionRequest {
            execution_id: "exec-1".to_string(),
            plugin_id: "@o/p".to_string(),
            plugin_version: "1.0.0".to_string(),
            plugin_root: PathBuf::from("/plugins/p"),
            handler_ref: handler_ref.to_string(),
            input: crate::plugins::HandlerInput {
                argv: vec![],
                flags: serde_json::json!({}),
            },
            descriptor: ExecutionDescriptor {
                permissions: PermissionSpec::default(),
                tenant_id: None,
                request_id: "req-1".to_string(),
            },
            timeout_ms,
        }
    }

    #[tokio::test]
    async fn unregistered_handler_ref_returns_handler_not_found() {
        let backend = InProcessBackend::new(30_000);
        let result = backend.execute(request("missing.js#run", None), CancellationToken::new()).await;
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, "E_HANDLER_NOT_FOUND");
    }

    #[tokio::test]
    async fn successful_handler_returns_ok() {
        let mut backend = InProcessBackend::new(30_000);
        backend.register(
            "index.js#run",
            std::sync::Arc::new(|_input, _ctx| {
                Box::pin(async { HandlerOutput::ok(serde_json::json!({"n": 1})) })
            }),
        );
        let result = backend.execute(request("index.js#run", None), CancellationToken::new()).await;
        assert!(result.ok);
        assert_eq!(result.data.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let mut backend = InProcessBackend::new(30_000);
        backend.register(
            "index.js#run",
            std::sync::Arc::new(|_input, _ctx| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    HandlerOutput::ok(serde_json::Value::Null)
                })
            }),
        );
        let result = backend
            .execute(request("index.js#run", Some(10)), CancellationToken::new())
            .await;
        assert!(!result.ok);
        assert_eq!(result.error.unwrap().code, "E_EXEC_TIMEOUT");
        assert_eq!(result.metadata.timed_out, Some(true));
    }
}
