//! File-system watcher (§4.8): watches discovery roots for manifest,
//! package, and workspace-descriptor changes and triggers a debounced,
//! single-flight registry refresh.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::registry::PluginRegistry;

/// Debounce window applied after the last filesystem event before a refresh
/// is triggered (§4.8): 300-500 ms, defaulting to 400.
pub const DEFAULT_DEBOUNCE_MS: u64 = 400;

pub struct PluginWatcher {
    _watcher: RecommendedWatcher,
    refresh_task: tokio::task::JoinHandle<()>,
}

impl PluginWatcher {
    /// Start watching `roots` and driving `registry.refresh()` on change.
    pub fn start(
        registry: Arc<PluginRegistry>,
        roots: Vec<PathBuf>,
        debounce: Duration,
    ) -> notify::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event) => {
                let _ = tx.send(event);
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "watcher error"),
        })?;

        for root in &roots {
            if let Err(e) = watcher.watch(root, RecursiveMode::Recursive) {
                warn!(root = %root.display(), error = %e, "failed to watch root");
            }
        }

        let refresh_task = tokio::spawn(async move {
            let refreshing = Arc::new(AtomicBool::new(false));
            let needs_redo = Arc::new(AtomicBool::new(false));

            loop {
                if rx.recv().await.is_none() {
                    break;
                }

                // Drain everything else that arrives within the debounce
                // window before acting (§4.8 step 1).
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(_)) => continue,
                        Ok(None) => break,
                        Err(_) => break,
                    }
                }

                if refreshing.load(Ordering::SeqCst) {
                    needs_redo.store(true, Ordering::SeqCst);
                    continue;
                }

                refreshing.store(true, Ordering::SeqCst);
                run_refresh(&registry).await;
                refreshing.store(false, Ordering::SeqCst);

                if needs_redo.swap(false, Ordering::SeqCst) {
                    run_refresh(&registry).await;
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            refresh_task,
        })
    }

    pub fn stop(self) {
        self.refresh_task.abort();
    }
}

async fn run_refresh(registry: &PluginRegistry) {
    if let Err(e) = registry.refresh().await {
        error!(error = %e, "watcher-triggered refresh failed");
    }
}

/// Patterns watched (§4.8): manifest files, `package.json`, anything under
/// `.kb/plugins/**`, lockfiles, and workspace descriptors. Dotfiles (other
/// than `.kb`), `node_modules` (outside `.kb`), and common build output
/// directories are ignored.
fn is_relevant(event: &Event) -> bool {
    !matches!(event.kind, EventKind::Access(_)) && event.paths.iter().any(|p| is_watched_path(p))
}

fn is_watched_path(path: &Path) -> bool {
    if path_has_ignored_component(path) {
        return false;
    }

    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    let is_manifest = name.starts_with("manifest.")
        && (name.ends_with(".toml") || name.ends_with(".json"));
    let is_package_descriptor = name == "package.json";
    let is_workspace_descriptor = name == "pnpm-workspace.yaml";
    let is_lockfile = matches!(
        name,
        "pnpm-lock.yaml" | "package-lock.json" | "yarn.lock" | "Cargo.lock"
    );
    let is_under_kb_plugins = path.components().any(|c| c.as_os_str() == ".kb");

    is_manifest || is_package_descriptor || is_workspace_descriptor || is_lockfile || is_under_kb_plugins
}

fn path_has_ignored_component(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_str().unwrap_or("");
        if name == ".kb" {
            return false;
        }
        let is_dotfile = name.starts_with('.') && name.len() > 1;
        let is_build_output = matches!(name, "target" | "dist" | "build" | "out");
        let is_node_modules = name == "node_modules";
        is_dotfile || is_build_output || is_node_modules
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_manifest_files() {
        assert!(is_watched_path(Path::new("/root/plugins/p/manifest.v3.json")));
        assert!(is_watched_path(Path::new("/root/plugins/p/manifest.toml")));
    }

    #[test]
    fn matches_package_and_workspace_descriptors() {
        assert!(is_watched_path(Path::new("/root/package.json")));
        assert!(is_watched_path(Path::new("/root/pnpm-workspace.yaml")));
    }

    #[test]
    fn ignores_node_modules_outside_kb() {
        assert!(!is_watched_path(Path::new(
            "/root/node_modules/pkg/package.json"
        )));
    }

    #[test]
    fn matches_anything_under_kb_plugins() {
        assert!(is_watched_path(Path::new(
            "/root/.kb/plugins/p/manifest.json"
        )));
        assert!(is_watched_path(Path::new(
            "/root/.kb/plugins/p/node_modules/x.json"
        )));
    }

    #[test]
    fn ignores_dotfiles_other_than_kb() {
        assert!(!is_watched_path(Path::new("/root/.git/HEAD")));
    }

    #[test]
    fn ignores_build_output_dirs() {
        assert!(!is_watched_path(Path::new("/root/dist/package.json")));
    }
}
