//! Built-in host commands (§10.5): `explain`, `doctor`, and `plugin list`.
//! Registered into the command tree like any host command so they win over
//! a colliding plugin path, and implemented as in-process handlers since
//! they are the host's own logic, not externally-authored plugin code.

use std::sync::Arc;

use kbhost_core::command::CommandTree;
use kbhost_core::config::HostConfig;
use kbhost_core::exec::inprocess::InProcessBackend;
use kbhost_core::plugins::{HandlerContext, HandlerInput, HandlerOutput};
use kbhost_core::registry::PluginRegistry;

pub const EXPLAIN_REF: &str = "host#explain";
pub const DOCTOR_REF: &str = "host#doctor";
pub const PLUGIN_LIST_REF: &str = "host#plugin-list";

pub fn register(tree: &mut CommandTree) {
    tree.register_host(
        vec!["explain".to_string()],
        EXPLAIN_REF,
        "Show every candidate seen for a plugin id and which one won",
        vec![],
        vec![],
    );
    tree.register_host(
        vec!["doctor".to_string()],
        DOCTOR_REF,
        "Check the persisted-state layout and registry health",
        vec![],
        vec![],
    );
    tree.register_host(
        vec!["plugin".to_string(), "list".to_string()],
        PLUGIN_LIST_REF,
        "List every discovered plugin",
        vec![],
        vec![vec!["plugins".to_string()]],
    );
}

pub fn install(backend: &mut InProcessBackend, registry: Arc<PluginRegistry>, config: Arc<HostConfig>) {
    let explain_registry = registry.clone();
    backend.register(
        EXPLAIN_REF,
        Arc::new(move |input: HandlerInput, _ctx: HandlerContext| {
            let registry = explain_registry.clone();
            Box::pin(async move {
                let Some(id) = input.argv.first() else {
                    return HandlerOutput::err("E_INVALID_FLAGS", "usage: explain <plugin-id>");
                };
                let result = registry.explain(id).await;
                match serde_json::to_value(&result) {
                    Ok(data) => HandlerOutput::ok(data),
                    Err(e) => HandlerOutput::err("E_EXEC_FAILED", e.to_string()),
                }
            })
        }),
    );

    let list_registry = registry.clone();
    backend.register(
        PLUGIN_LIST_REF,
        Arc::new(move |_input: HandlerInput, _ctx: HandlerContext| {
            let registry = list_registry.clone();
            Box::pin(async move {
                let plugins = registry.list().await;
                match serde_json::to_value(&plugins) {
                    Ok(data) => HandlerOutput::ok(data),
                    Err(e) => HandlerOutput::err("E_EXEC_FAILED", e.to_string()),
                }
            })
        }),
    );

    backend.register(
        DOCTOR_REF,
        Arc::new(move |_input: HandlerInput, _ctx: HandlerContext| {
            let registry = registry.clone();
            let config = config.clone();
            Box::pin(async move { doctor_report(&registry, &config).await })
        }),
    );
}

async fn doctor_report(registry: &PluginRegistry, config: &HostConfig) -> HandlerOutput {
    let status = registry.status().await;

    let dirs = [
        ("root", config.root.clone()),
        ("cache", config.cache_dir()),
        ("plugins", config.plugins_dir()),
        ("logs", config.logs_dir()),
    ];
    let dir_checks: Vec<serde_json::Value> = dirs
        .iter()
        .map(|(name, path)| {
            let readable = std::fs::metadata(path).is_ok();
            serde_json::json!({ "name": name, "path": path, "readable": readable })
        })
        .collect();

    let healthy = !status.partial && !status.corrupted && dir_checks.iter().all(|c| c["readable"] == true);

    HandlerOutput::ok(serde_json::json!({
        "healthy": healthy,
        "registry": status,
        "directories": dir_checks,
    }))
}
