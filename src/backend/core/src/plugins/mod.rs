//! # Plugins
//!
//! Plugin-facing types: the manifest model (identity, commands, permissions,
//! handler refs) and the sandbox that enforces a manifest's permission spec
//! against an executing handler.
//!
//! Discovery, the in-memory registry, command dispatch, and the execution
//! backends that actually invoke a handler live in their own top-level
//! modules ([`crate::discovery`], [`crate::registry`], [`crate::command`],
//! [`crate::exec`]) and build on top of what's defined here.

pub mod manifest;
pub mod sandbox;

pub use manifest::{Manifest, ManifestError, ManifestErrorCode, SchemaVersion};
pub use sandbox::{SandboxContext, SandboxViolation};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The permitted surface exposed to an in-process handler: output, logging,
/// config, and working directory, each already scoped by the sandbox. A
/// handler never touches stdout or the filesystem directly — it goes
/// through this facade (§9: "Presenter dependency").
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub plugin_id: String,
    pub plugin_root: PathBuf,
    pub request_id: String,
    pub tenant_id: Option<String>,
}

/// Input handed to a handler, mirroring `ExecutionRequest.input`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerInput {
    pub argv: Vec<String>,
    pub flags: serde_json::Value,
}

/// Output returned by a handler, mirroring `ExecutionResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerOutput {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HandlerErrorPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerErrorPayload {
    pub code: String,
    pub message: String,
}

impl HandlerOutput {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(HandlerErrorPayload {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}
