//! Execution backends: in-process handler calls and subprocess IPC,
//! dispatched behind one `ExecutionBackend` trait (§4.7).

pub mod inprocess;
pub mod subprocess;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::plugins::manifest::PermissionSpec;
use crate::plugins::{HandlerErrorPayload, HandlerInput};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescriptor {
    pub permissions: PermissionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub execution_id: String,
    pub plugin_id: String,
    pub plugin_version: String,
    pub plugin_root: PathBuf,
    pub handler_ref: String,
    pub input: HandlerInput,
    pub descriptor: ExecutionDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMeta {
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HandlerErrorPayload>,
    pub metadata: ExecutionMeta,
}

impl ExecutionResult {
    pub fn ok(data: serde_json::Value, duration: Duration) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            metadata: ExecutionMeta {
                duration_ms: duration.as_millis() as u64,
                timed_out: None,
            },
        }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(HandlerErrorPayload {
                code: code.into(),
                message: message.into(),
            }),
            metadata: ExecutionMeta {
                duration_ms: duration.as_millis() as u64,
                timed_out: None,
            },
        }
    }

    pub fn timed_out(duration: Duration) -> Self {
        let mut result = Self::err("E_EXEC_TIMEOUT", "handler timed out", duration);
        result.metadata.timed_out = Some(true);
        result
    }
}

/// Default grace period before a subprocess is force-killed past
/// `timeoutMs` (§5): 2 seconds.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> ExecutionResult;
}

/// A registered handler in the in-process backend's resolution table:
/// `handlerRef` (`<file>#<export>`) mapped to a callable.
pub type InProcessHandler = std::sync::Arc<
    dyn Fn(HandlerInput, crate::plugins::HandlerContext) -> futures_handler::HandlerFuture
        + Send
        + Sync,
>;

/// A tiny local alias module so [`InProcessHandler`]'s future type doesn't
/// require pulling in the `futures` crate just for a boxed future alias.
mod futures_handler {
    use std::future::Future;
    use std::pin::Pin;

    use crate::plugins::HandlerOutput;

    pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerOutput> + Send>>;
}
