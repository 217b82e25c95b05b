//! `kb` - plugin-extensible command-line application host.
//!
//! A thin `clap` wrapper only: global flags before the command path, plus
//! `--version`/`--help`. The actual command space is discovered from plugin
//! manifests at startup and cannot be modeled as a static `clap` subcommand
//! enum, so everything after the global flags is captured verbatim and
//! handed to `kbhost_core::command` for parsing, resolution, and dispatch.

mod host_commands;
mod logging;
mod presenter;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kbhost_core::command::{parse, CommandOrigin, CommandTree, DispatchOutcome};
use kbhost_core::config::HostConfig;
use kbhost_core::error::{HostError, HostErrorKind, Result};
use kbhost_core::exec::inprocess::InProcessBackend;
use kbhost_core::exec::subprocess::SubprocessBackend;
use kbhost_core::exec::{ExecutionBackend, ExecutionDescriptor, ExecutionRequest};
use kbhost_core::plugins::HandlerInput;
use kbhost_core::registry::{InitializeOptions, PluginRegistry, RegistryMode};
use presenter::OutputFormat;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "kb",
    version,
    about = "kb - plugin-extensible command-line application host",
    disable_help_subcommand = true
)]
struct Cli {
    /// Scan root. Defaults to the current working directory.
    #[arg(long, global = true, value_name = "PATH")]
    root: Option<PathBuf>,

    /// Command path, flags, and positional arguments, forwarded to the
    /// dynamic dispatcher verbatim.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let parsed = parse(&cli.args);
    logging::init(&parsed.global);

    let format = OutputFormat::from_json_flag(parsed.global.json);
    let exit_code = match run(cli.root, &cli.args, format).await {
        Ok(code) => code,
        Err(err) => {
            err.log();
            presenter::print_error(format, &err);
            err.exit_code()
        }
    };
    std::process::exit(exit_code);
}

async fn run(root: Option<PathBuf>, argv: &[String], format: OutputFormat) -> Result<i32> {
    let config = Arc::new(HostConfig::load(root.as_deref())?);

    let registry = Arc::new(
        PluginRegistry::initialize(
            InitializeOptions {
                roots: vec![config.root.clone()],
                strategies: config.strategies.clone(),
                ttl_ms: config.cache.ttl_ms,
                mode: RegistryMode::Producer,
                cli_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            config.cache_dir(),
        )
        .await?,
    );

    let tree = build_command_tree(&registry).await;

    let mut in_process = InProcessBackend::new(config.execution.default_timeout_ms);
    host_commands::install(&mut in_process, registry.clone(), config.clone());
    let subprocess = SubprocessBackend::new(
        "node",
        config.execution.default_timeout_ms,
        config.execution.grace_period_ms,
    );

    match kbhost_core::command::dispatch(&tree, argv)? {
        DispatchOutcome::GroupHelp(children) => {
            let parsed = parse(argv);
            presenter::print_group_help(format, &parsed.cmd_path, &children);
            Ok(0)
        }
        DispatchOutcome::Invoke(invocation) => {
            let record = invocation.record;
            let entry = match &record.plugin_id {
                Some(id) => registry.get_entry(id).await,
                None => None,
            };

            let request = ExecutionRequest {
                execution_id: uuid::Uuid::new_v4().to_string(),
                plugin_id: record.plugin_id.clone().unwrap_or_else(|| "host".to_string()),
                plugin_version: entry
                    .as_ref()
                    .map(|e| e.manifest.version.clone())
                    .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
                plugin_root: entry
                    .as_ref()
                    .map(|e| e.plugin_root.clone())
                    .unwrap_or_else(|| config.root.clone()),
                handler_ref: record.handler_ref.clone(),
                input: HandlerInput {
                    argv: invocation.argv,
                    flags: serde_json::to_value(&invocation.global).unwrap_or(serde_json::Value::Null),
                },
                descriptor: ExecutionDescriptor {
                    permissions: entry
                        .as_ref()
                        .map(|e| e.manifest.permissions.clone())
                        .unwrap_or_default(),
                    tenant_id: None,
                    request_id: uuid::Uuid::new_v4().to_string(),
                },
                timeout_ms: Some(config.execution.default_timeout_ms),
            };

            let cancel = CancellationToken::new();
            let child_cancel = cancel.clone();
            let execute = async {
                match record.origin {
                    CommandOrigin::Host => in_process.execute(request, cancel).await,
                    CommandOrigin::Plugin => subprocess.execute(request, cancel).await,
                }
            };

            let result = tokio::select! {
                result = execute => result,
                _ = tokio::signal::ctrl_c() => {
                    child_cancel.cancel();
                    kbhost_core::exec::ExecutionResult::err("E_EXEC_TIMEOUT", "interrupted", std::time::Duration::default())
                }
            };

            if result.ok {
                let data = result.data.unwrap_or(serde_json::Value::Null);
                presenter::print_success(format, &data, &[]);
                Ok(0)
            } else {
                let error = result.error.unwrap_or_else(|| kbhost_core::plugins::HandlerErrorPayload {
                    code: "E_EXEC_FAILED".to_string(),
                    message: "handler failed without an error payload".to_string(),
                });
                let kind = error_kind_for_code(&error.code);
                let err = HostError::new(kind, error.message);
                err.log();
                presenter::print_error(format, &err);
                Ok(err.exit_code())
            }
        }
    }
}

/// Registers built-in host commands, then every command every discovered
/// plugin's manifest declares, letting host registrations shadow collisions.
async fn build_command_tree(registry: &PluginRegistry) -> CommandTree {
    let mut tree = CommandTree::new();
    host_commands::register(&mut tree);

    for brief in registry.list().await {
        if let Some(manifest) = registry.get_manifest(&brief.id).await {
            for command in &manifest.commands {
                tree.register_plugin(&brief.id, manifest.source_schema, command);
            }
        }
    }

    tree
}

fn error_kind_for_code(code: &str) -> HostErrorKind {
    match code {
        "E_IO_READ" => HostErrorKind::EIoRead,
        "E_IO_WRITE" => HostErrorKind::EIoWrite,
        "E_ENV_MISSING_VAR" => HostErrorKind::EEnvMissingVar,
        "E_DISCOVERY_CONFIG" => HostErrorKind::EDiscoveryConfig,
        "E_TELEMETRY_EMIT" => HostErrorKind::ETelemetryEmit,
        "E_INVALID_FLAGS" => HostErrorKind::EInvalidFlags,
        "E_CMD_NOT_FOUND" => HostErrorKind::ECmdNotFound,
        "E_HANDLER_NOT_FOUND" => HostErrorKind::EHandlerNotFound,
        "E_UNAVAILABLE" => HostErrorKind::EUnavailable,
        "E_MANIFEST_INVALID" => HostErrorKind::EManifestInvalid,
        "E_EXEC_TIMEOUT" => HostErrorKind::EExecTimeout,
        "E_SNAPSHOT_CORRUPT" => HostErrorKind::ESnapshotCorrupt,
        _ => HostErrorKind::EExecFailed,
    }
}
