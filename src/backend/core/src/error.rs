//! Error handling for the plugin host core.
//!
//! This module provides:
//! - A closed taxonomy of machine-readable error kinds (`HostErrorKind`)
//! - POSIX-style exit code mapping for the CLI boundary
//! - A builder-style `details` payload for structured diagnostics
//! - Error logging via `tracing`, at the boundary where an error is finally handled
//!
//! # Usage
//!
//! ```rust,ignore
//! use kbhost_core::error::{HostError, HostErrorKind, Result};
//!
//! fn load_manifest() -> Result<()> {
//!     std::fs::read_to_string("manifest.toml")
//!         .map_err(|e| HostError::new(HostErrorKind::IoRead, e.to_string()))?;
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// A specialized Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Kinds
// ═══════════════════════════════════════════════════════════════════════════════

/// The closed set of error kinds the host can produce.
///
/// Stable, machine-readable, and directly mapped to a POSIX-style exit code
/// by [`HostErrorKind::exit_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostErrorKind {
    EIoRead,
    EIoWrite,
    EEnvMissingVar,
    EDiscoveryConfig,
    ETelemetryEmit,
    EInvalidFlags,
    ECmdNotFound,
    EHandlerNotFound,
    EUnavailable,
    EManifestInvalid,
    EExecTimeout,
    EExecFailed,
    ESnapshotCorrupt,
}

/// A class of POSIX-style exit codes errors are grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Config,
    Io,
    Software,
    Unavailable,
    Generic,
}

impl ExitClass {
    pub fn code(self) -> i32 {
        match self {
            ExitClass::Config => 78,
            ExitClass::Io => 74,
            ExitClass::Software => 70,
            ExitClass::Unavailable => 2,
            ExitClass::Generic => 1,
        }
    }
}

impl HostErrorKind {
    /// The exit-code class this error kind belongs to, per the host's error
    /// handling design: CONFIG(78) / IO(74) / SOFTWARE(70) / 2 / 1.
    pub fn exit_class(self) -> ExitClass {
        use HostErrorKind::*;
        match self {
            EDiscoveryConfig | EEnvMissingVar | EInvalidFlags | EManifestInvalid => {
                ExitClass::Config
            }
            EIoRead | EIoWrite => ExitClass::Io,
            ETelemetryEmit | EExecFailed | ESnapshotCorrupt => ExitClass::Software,
            EUnavailable => ExitClass::Unavailable,
            ECmdNotFound | EHandlerNotFound | EExecTimeout => ExitClass::Generic,
        }
    }

    pub fn exit_code(self) -> i32 {
        self.exit_class().code()
    }

    /// The wire-format string for this kind, e.g. `E_IO_READ`.
    pub fn as_str(self) -> &'static str {
        use HostErrorKind::*;
        match self {
            EIoRead => "E_IO_READ",
            EIoWrite => "E_IO_WRITE",
            EEnvMissingVar => "E_ENV_MISSING_VAR",
            EDiscoveryConfig => "E_DISCOVERY_CONFIG",
            ETelemetryEmit => "E_TELEMETRY_EMIT",
            EInvalidFlags => "E_INVALID_FLAGS",
            ECmdNotFound => "E_CMD_NOT_FOUND",
            EHandlerNotFound => "E_HANDLER_NOT_FOUND",
            EUnavailable => "E_UNAVAILABLE",
            EManifestInvalid => "E_MANIFEST_INVALID",
            EExecTimeout => "E_EXEC_TIMEOUT",
            EExecFailed => "E_EXEC_FAILED",
            ESnapshotCorrupt => "E_SNAPSHOT_CORRUPT",
        }
    }
}

impl fmt::Display for HostErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Structured, arbitrary key/value diagnostics attached to a [`HostError`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails(HashMap<String, serde_json::Value>);

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.0.insert(key.into(), v);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HostError
// ═══════════════════════════════════════════════════════════════════════════════

/// The error type threaded through every core operation.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct HostError {
    pub kind: HostErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "ErrorDetails::is_empty")]
    pub details: ErrorDetails,
}

impl HostError {
    pub fn new(kind: HostErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: ErrorDetails::new(),
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    pub fn exit_code(&self) -> i32 {
        self.kind.exit_class().code()
    }

    /// Log this error once, at the boundary where it is finally handled.
    pub fn log(&self) {
        match self.kind.exit_class() {
            ExitClass::Config | ExitClass::Generic => {
                tracing::warn!(code = %self.kind, message = %self.message, "host error")
            }
            ExitClass::Io | ExitClass::Software | ExitClass::Unavailable => {
                tracing::error!(code = %self.kind, message = %self.message, "host error")
            }
        }
    }

    /// The JSON error envelope emitted on every error path in `--json` mode:
    /// `{ok:false, error:{code,message,details?}}`.
    pub fn to_envelope(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.kind.as_str(),
            "message": self.message,
        });
        if !self.details.is_empty() {
            if let Some(obj) = error.as_object_mut() {
                obj.insert(
                    "details".into(),
                    serde_json::to_value(&self.details).unwrap_or(serde_json::Value::Null),
                );
            }
        }
        serde_json::json!({ "ok": false, "error": error })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Conversions
// ═══════════════════════════════════════════════════════════════════════════════

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        HostError::new(HostErrorKind::EIoRead, e.to_string())
    }
}

impl From<serde_json::Error> for HostError {
    fn from(e: serde_json::Error) -> Self {
        HostError::new(HostErrorKind::EManifestInvalid, e.to_string())
    }
}

impl From<toml::de::Error> for HostError {
    fn from(e: toml::de::Error) -> Self {
        HostError::new(HostErrorKind::EManifestInvalid, e.to_string())
    }
}

impl From<notify::Error> for HostError {
    fn from(e: notify::Error) -> Self {
        HostError::new(HostErrorKind::EDiscoveryConfig, e.to_string())
    }
}

impl From<config::ConfigError> for HostError {
    fn from(e: config::ConfigError) -> Self {
        HostError::new(HostErrorKind::EDiscoveryConfig, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_mapping_table() {
        assert_eq!(HostErrorKind::EDiscoveryConfig.exit_code(), 78);
        assert_eq!(HostErrorKind::EEnvMissingVar.exit_code(), 78);
        assert_eq!(HostErrorKind::EInvalidFlags.exit_code(), 78);
        assert_eq!(HostErrorKind::EManifestInvalid.exit_code(), 78);
        assert_eq!(HostErrorKind::EIoRead.exit_code(), 74);
        assert_eq!(HostErrorKind::EIoWrite.exit_code(), 74);
        assert_eq!(HostErrorKind::ETelemetryEmit.exit_code(), 70);
        assert_eq!(HostErrorKind::EExecFailed.exit_code(), 70);
        assert_eq!(HostErrorKind::ESnapshotCorrupt.exit_code(), 70);
        assert_eq!(HostErrorKind::EUnavailable.exit_code(), 2);
        assert_eq!(HostErrorKind::ECmdNotFound.exit_code(), 1);
        assert_eq!(HostErrorKind::EHandlerNotFound.exit_code(), 1);
        assert_eq!(HostErrorKind::EExecTimeout.exit_code(), 1);
    }

    #[test]
    fn envelope_omits_empty_details() {
        let err = HostError::new(HostErrorKind::ECmdNotFound, "no such command");
        let env = err.to_envelope();
        assert_eq!(env["ok"], false);
        assert_eq!(env["error"]["code"], "E_CMD_NOT_FOUND");
        assert!(env["error"].get("details").is_none());
    }

    #[test]
    fn envelope_includes_details_when_present() {
        let err = HostError::new(HostErrorKind::EManifestInvalid, "bad id")
            .with_details(ErrorDetails::new().with("path", "/tmp/manifest.toml"));
        let env = err.to_envelope();
        assert_eq!(env["error"]["details"]["path"], "/tmp/manifest.toml");
    }
}
