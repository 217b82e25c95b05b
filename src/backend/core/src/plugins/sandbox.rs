//! Plugin execution sandbox.
//!
//! Enforces a manifest's [`PermissionSpec`] against the operations an
//! in-process handler attempts: filesystem access (glob allow/deny sets),
//! network access (host allow list), environment variable reads, and the
//! resource quotas declared in the manifest.

use std::time::Duration;

use glob::Pattern;

use super::manifest::{FsMode, NetPermission, PermissionSpec, ResourceQuotas};

// ═══════════════════════════════════════════════════════════════════════════════
// Sandbox Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime state tracked while a plugin handler is executing inside the
/// sandbox. Constructed fresh per [`crate::exec::ExecutionRequest`].
#[derive(Debug)]
pub struct SandboxContext {
    permissions: PermissionSpec,
    network_requests_made: u32,
    memory_allocated_mb: u64,
}

impl SandboxContext {
    pub fn new(permissions: PermissionSpec) -> Self {
        Self {
            permissions,
            network_requests_made: 0,
            memory_allocated_mb: 0,
        }
    }

    pub fn permissions(&self) -> &PermissionSpec {
        &self.permissions
    }

    pub fn quotas(&self) -> &ResourceQuotas {
        &self.permissions.quotas
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.permissions.quotas.timeout_ms.map(Duration::from_millis)
    }

    /// Check whether a file read at `path` is permitted by the fs allow/deny
    /// glob sets. Deny always wins over allow; an empty allow set means
    /// "everything not explicitly denied is allowed".
    pub fn check_file_read(&self, path: &str) -> Result<(), SandboxViolation> {
        self.check_fs(path, FsMode::Read)
    }

    pub fn check_file_write(&self, path: &str) -> Result<(), SandboxViolation> {
        self.check_fs(path, FsMode::ReadWrite)
    }

    fn check_fs(&self, path: &str, required: FsMode) -> Result<(), SandboxViolation> {
        let fs = &self.permissions.fs;
        if required == FsMode::ReadWrite && fs.mode != FsMode::ReadWrite {
            return Err(SandboxViolation::FsModeDenied {
                path: path.to_string(),
                granted: fs.mode,
            });
        }
        if glob_any_match(&fs.deny, path) {
            return Err(SandboxViolation::PathDenied(path.to_string()));
        }
        if !fs.allow.is_empty() && !glob_any_match(&fs.allow, path) {
            return Err(SandboxViolation::PathNotAllowed(path.to_string()));
        }
        Ok(())
    }

    /// Request permission to contact `host` over the network, counting
    /// against the quota if one is declared.
    pub fn request_network(&mut self, host: &str) -> Result<(), SandboxViolation> {
        match &self.permissions.net {
            NetPermission::None => Err(SandboxViolation::NetworkDenied),
            NetPermission::AllowHosts { allow_hosts } => {
                if !allow_hosts.is_empty() && !allow_hosts.iter().any(|h| h == host) {
                    return Err(SandboxViolation::HostNotAllowed(host.to_string()));
                }
                self.network_requests_made += 1;
                Ok(())
            }
        }
    }

    pub fn check_env_read(&self, var: &str) -> Result<(), SandboxViolation> {
        if self.permissions.env.iter().any(|v| v == var) {
            Ok(())
        } else {
            Err(SandboxViolation::EnvVarNotAllowed(var.to_string()))
        }
    }

    /// Account for a memory allocation against `quotas.memoryMb`.
    pub fn request_memory(&mut self, mb: u64) -> Result<(), SandboxViolation> {
        let Some(limit) = self.permissions.quotas.memory_mb else {
            return Ok(());
        };
        let new_total = self.memory_allocated_mb.saturating_add(mb);
        if new_total > limit {
            return Err(SandboxViolation::MemoryLimitExceeded {
                requested: mb,
                limit,
                current: self.memory_allocated_mb,
            });
        }
        self.memory_allocated_mb = new_total;
        Ok(())
    }
}

fn glob_any_match(patterns: &[String], path: &str) -> bool {
    patterns.iter().any(|p| {
        Pattern::new(p)
            .map(|pat| pat.matches(path))
            .unwrap_or(false)
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sandbox Violations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum SandboxViolation {
    #[error("path not allowed: {0}")]
    PathNotAllowed(String),

    #[error("path denied by manifest: {0}")]
    PathDenied(String),

    #[error("fs permission grants only {granted:?}, write attempted on: {path}")]
    FsModeDenied { path: String, granted: FsMode },

    #[error("network access not granted by manifest")]
    NetworkDenied,

    #[error("host not in permitted allow-list: {0}")]
    HostNotAllowed(String),

    #[error("environment variable not in permitted allow-list: {0}")]
    EnvVarNotAllowed(String),

    #[error("memory quota exceeded: requested {requested}MB, limit {limit}MB, current {current}MB")]
    MemoryLimitExceeded {
        requested: u64,
        limit: u64,
        current: u64,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::FsPermission;

    fn perms_with_fs(allow: Vec<&str>, deny: Vec<&str>, mode: FsMode) -> PermissionSpec {
        PermissionSpec {
            fs: FsPermission {
                allow: allow.into_iter().map(String::from).collect(),
                deny: deny.into_iter().map(String::from).collect(),
                mode,
            },
            ..Default::default()
        }
    }

    #[test]
    fn fs_read_requires_allow_match() {
        let ctx = SandboxContext::new(perms_with_fs(vec!["/data/**"], vec![], FsMode::Read));
        assert!(ctx.check_file_read("/data/file.txt").is_ok());
        assert!(ctx.check_file_read("/etc/passwd").is_err());
    }

    #[test]
    fn fs_deny_wins_over_allow() {
        let ctx = SandboxContext::new(perms_with_fs(
            vec!["/data/**"],
            vec!["/data/secret/**"],
            FsMode::Read,
        ));
        assert!(ctx.check_file_read("/data/public.txt").is_ok());
        assert!(ctx.check_file_read("/data/secret/key.pem").is_err());
    }

    #[test]
    fn write_requires_read_write_mode() {
        let ctx = SandboxContext::new(perms_with_fs(vec!["/data/**"], vec![], FsMode::Read));
        assert!(ctx.check_file_write("/data/file.txt").is_err());

        let ctx = SandboxContext::new(perms_with_fs(vec!["/data/**"], vec![], FsMode::ReadWrite));
        assert!(ctx.check_file_write("/data/file.txt").is_ok());
    }

    #[test]
    fn network_denied_by_default() {
        let mut ctx = SandboxContext::new(PermissionSpec::default());
        assert!(ctx.request_network("api.example.com").is_err());
    }

    #[test]
    fn network_allow_hosts_enforced() {
        let perms = PermissionSpec {
            net: NetPermission::AllowHosts {
                allow_hosts: vec!["api.example.com".into()],
            },
            ..Default::default()
        };
        let mut ctx = SandboxContext::new(perms);
        assert!(ctx.request_network("api.example.com").is_ok());
        assert!(ctx.request_network("evil.com").is_err());
    }

    #[test]
    fn env_allow_list_enforced() {
        let perms = PermissionSpec {
            env: vec!["PATH".into()],
            ..Default::default()
        };
        let ctx = SandboxContext::new(perms);
        assert!(ctx.check_env_read("PATH").is_ok());
        assert!(ctx.check_env_read("SECRET_TOKEN").is_err());
    }

    #[test]
    fn memory_quota_enforced() {
        let perms = PermissionSpec {
            quotas: ResourceQuotas {
                memory_mb: Some(64),
                ..Default::default()
            },
            ..Default::default()
        };
        let mut ctx = SandboxContext::new(perms);
        assert!(ctx.request_memory(32).is_ok());
        assert!(ctx.request_memory(32).is_ok());
        assert!(ctx.request_memory(1).is_err());
    }
}
