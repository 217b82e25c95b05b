//! Configuration management for the plugin host.
//!
//! Covers exactly the slice the registry pipeline needs: scan roots, enabled
//! discovery strategies, cache directives, and the handful of environment
//! variables the host consumes directly. End-user subcommand configuration is
//! out of scope — it is a consumer of this crate, not part of it.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::discovery::StrategyKind;
use crate::error::Result;

/// Root host configuration, loaded from defaults, an optional
/// `<root>/.kb/config.toml`, and `KB__`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Scan root. Defaults to the current working directory.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Discovery strategies enabled, in the order they should run.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyKind>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Default log level, overridden by `LOG_LEVEL` / `--log-level` / `--debug`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Disable colored presenter output.
    #[serde(default)]
    pub no_color: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Snapshot time-to-live, clamped to >= 1000ms by the snapshot store.
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Optional best-effort external cache mirror endpoint (§4.4, §9).
    #[serde(default)]
    pub external_endpoint: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            external_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

fn default_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_strategies() -> Vec<StrategyKind> {
    vec![
        StrategyKind::Workspace,
        StrategyKind::Package,
        StrategyKind::Directory,
    ]
}

fn default_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_grace_period_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl HostConfig {
    /// Load configuration layered: defaults -> `<root>/.kb/config.toml` (if
    /// present) -> `KB__`-prefixed environment variables.
    pub fn load(root: Option<&Path>) -> Result<Self> {
        let root = root
            .map(Path::to_path_buf)
            .unwrap_or_else(default_root);
        let config_file = root.join(".kb").join("config.toml");

        let mut builder = config::Config::builder()
            .set_default("root", root.display().to_string())?
            .set_default("strategies", vec!["workspace", "package", "directory"])?
            .set_default("cache.ttl_ms", default_ttl_ms())?
            .set_default("execution.default_timeout_ms", default_timeout_ms())?
            .set_default("execution.grace_period_ms", default_grace_period_ms())?
            .set_default("log_level", default_log_level())?
            .set_default("no_color", false)?;

        if config_file.exists() {
            builder = builder.add_source(config::File::from(config_file));
        }

        builder = builder.add_source(config::Environment::with_prefix("KB").separator("__"));

        let built = builder.build()?;
        let cfg: HostConfig = built.try_deserialize()?;
        Ok(cfg)
    }

    /// The `.kb` state directory under the scan root.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(".kb")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.state_dir().join("cache")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.state_dir().join("plugins")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_defaults_with_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let cfg = HostConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(cfg.cache.ttl_ms, default_ttl_ms());
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.no_color);
    }

    #[test]
    fn state_dir_layout_matches_spec() {
        let tmp = TempDir::new().unwrap();
        let cfg = HostConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(cfg.state_dir(), tmp.path().join(".kb"));
        assert_eq!(cfg.cache_dir(), tmp.path().join(".kb").join("cache"));
        assert_eq!(cfg.plugins_dir(), tmp.path().join(".kb").join("plugins"));
        assert_eq!(cfg.logs_dir(), tmp.path().join(".kb").join("logs"));
    }

    #[test]
    fn reads_config_file_override() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join(".kb")).unwrap();
        std::fs::write(
            tmp.path().join(".kb").join("config.toml"),
            "log_level = \"debug\"\n[cache]\nttl_ms = 9000\n",
        )
        .unwrap();
        let cfg = HostConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.cache.ttl_ms, 9000);
    }
}
