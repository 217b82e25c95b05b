//! The in-memory plugin registry (§4.5): discovery + snapshot persistence
//! behind a single `Arc<RwLock<_>>`, with single-flight refresh and a diff
//! feed for subscribers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;

use crate::discovery::{DiscoveryManager, PluginBrief, SnapshotEntry, StrategyKind};
use crate::error::{HostError, HostErrorKind};
use crate::plugins::Manifest;
use crate::snapshot::{RegistrySnapshot, SnapshotStore};

/// Whether this process owns discovery (refreshing the shared snapshot) or
/// merely reads whatever the producer already wrote (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryMode {
    Producer,
    Consumer,
}

#[derive(Debug, Clone)]
pub struct InitializeOptions {
    pub roots: Vec<PathBuf>,
    pub strategies: Vec<StrategyKind>,
    pub ttl_ms: u64,
    pub mode: RegistryMode,
    pub cli_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedEntry {
    pub from: PluginBrief,
    pub to: PluginBrief,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<ChangedEntry>,
}

impl RegistryDiff {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Reported by [`PluginRegistry::status`] for the `doctor` host command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStatus {
    pub rev: u64,
    pub partial: bool,
    pub stale: bool,
    pub corrupted: bool,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub plugin_count: usize,
    pub error_count: usize,
}

/// The winner plus every candidate id saw across strategies, for
/// `explain()` (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainResult {
    pub plugin_id: String,
    pub winner: Option<PluginBrief>,
    pub candidates: Vec<PluginBrief>,
    pub rule: String,
}

struct RegistryState {
    snapshot: RegistrySnapshot,
    command_index: HashMap<String, SnapshotEntry>,
    last_diff: Option<RegistryDiff>,
}

impl RegistryState {
    fn rebuild_command_index(&mut self) {
        self.command_index = self
            .snapshot
            .manifests
            .iter()
            .map(|e| (e.plugin_id.clone(), e.clone()))
            .collect();
    }
}

pub struct PluginRegistry {
    root: PathBuf,
    mode: RegistryMode,
    cli_version: String,
    discovery: DiscoveryManager,
    store: SnapshotStore,
    roots: Vec<PathBuf>,
    ttl_ms: u64,
    state: Arc<RwLock<RegistryState>>,
    refresh_lock: Arc<Mutex<()>>,
    subscribers: Arc<RwLock<Vec<mpsc::UnboundedSender<RegistryDiff>>>>,
}

impl PluginRegistry {
    /// §4.5 `initialize`: consumer just loads whatever is on disk; producer
    /// loads and, if the snapshot is absent or stale, runs discovery once
    /// and persists the result.
    pub async fn initialize(opts: InitializeOptions, cache_dir: PathBuf) -> Result<Self, HostError> {
        let store = SnapshotStore::new(cache_dir);
        let discovery = DiscoveryManager::new(&opts.strategies);

        let mut snapshot = store.load().await.unwrap_or_else(|| {
            RegistrySnapshot::create_empty(&opts.roots.first().cloned().unwrap_or_default(), &opts.cli_version, opts.ttl_ms)
        });

        if opts.mode == RegistryMode::Producer && (snapshot.partial || snapshot.stale) {
            let outcome = discovery.run(&opts.roots).await;
            snapshot = build_snapshot(
                &opts,
                outcome.plugins,
                outcome.manifests,
                outcome.errors,
                outcome.partial,
                snapshot.rev,
                Some(snapshot.checksum.clone()),
            );
            store
                .persist(snapshot.clone())
                .await
                .map_err(|e| HostError::new(HostErrorKind::EIoWrite, e.to_string()))?;
        }

        let mut state = RegistryState {
            snapshot,
            command_index: HashMap::new(),
            last_diff: None,
        };
        state.rebuild_command_index();

        Ok(Self {
            root: opts.roots.first().cloned().unwrap_or_default(),
            mode: opts.mode,
            cli_version: opts.cli_version,
            discovery,
            store,
            roots: opts.roots,
            ttl_ms: opts.ttl_ms,
            state: Arc::new(RwLock::new(state)),
            refresh_lock: Arc::new(Mutex::new(())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        })
    }

    pub async fn list(&self) -> Vec<PluginBrief> {
        let state = self.state.read().await;
        let mut plugins = state.snapshot.plugins.clone();
        plugins.sort_by(|a, b| a.id.cmp(&b.id));
        plugins
    }

    pub async fn get_manifest(&self, id: &str) -> Option<Manifest> {
        let state = self.state.read().await;
        state.command_index.get(id).map(|e| e.manifest.clone())
    }

    /// The full snapshot entry for a plugin id, including its root path on
    /// disk — what the subprocess backend needs to resolve a `handlerRef`.
    pub async fn get_entry(&self, id: &str) -> Option<SnapshotEntry> {
        let state = self.state.read().await;
        state.command_index.get(id).cloned()
    }

    pub async fn current_rev(&self) -> u64 {
        self.state.read().await.snapshot.rev
    }

    /// A snapshot of the registry's own health, for the `doctor` host
    /// command (§10.5): whether the persisted view is partial, stale, or
    /// was recovered from a corrupted primary file.
    pub async fn status(&self) -> RegistryStatus {
        let state = self.state.read().await;
        RegistryStatus {
            rev: state.snapshot.rev,
            partial: state.snapshot.partial,
            stale: state.snapshot.stale,
            corrupted: state.snapshot.corrupted,
            generated_at: state.snapshot.generated_at,
            plugin_count: state.snapshot.plugins.len(),
            error_count: state.snapshot.errors.len(),
        }
    }

    /// §4.5 `refresh`: single-flight so concurrent callers observe the same
    /// outcome instead of each re-running discovery.
    pub async fn refresh(&self) -> Result<RegistryDiff, HostError> {
        let observed_rev = self.current_rev().await;
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have completed a refresh while we waited for
        // the lock; if so, hand back that result instead of redoing work.
        {
            let state = self.state.read().await;
            if state.snapshot.rev > observed_rev {
                return Ok(state.last_diff.clone().unwrap_or_default());
            }
        }

        let outcome = self.discovery.run(&self.roots).await;
        let (prior_plugins, prior_checksum, prior_rev) = {
            let state = self.state.read().await;
            (
                state.snapshot.plugins.clone(),
                state.snapshot.checksum.clone(),
                state.snapshot.rev,
            )
        };

        let diff = compute_diff(&prior_plugins, &outcome.plugins);

        let snapshot = build_snapshot(
            &InitializeOptions {
                roots: self.roots.clone(),
                strategies: Vec::new(),
                ttl_ms: self.ttl_ms,
                mode: self.mode,
                cli_version: self.cli_version.clone(),
            },
            outcome.plugins,
            outcome.manifests,
            outcome.errors,
            outcome.partial,
            prior_rev + 1,
            Some(prior_checksum),
        );

        if self.mode == RegistryMode::Producer {
            self.store
                .persist(snapshot.clone())
                .await
                .map_err(|e| HostError::new(HostErrorKind::EIoWrite, e.to_string()))?;
        }

        {
            let mut state = self.state.write().await;
            state.snapshot = snapshot;
            state.rebuild_command_index();
            state.last_diff = Some(diff.clone());
        }

        if !diff.is_empty() {
            let subscribers = self.subscribers.read().await;
            for tx in subscribers.iter() {
                let _ = tx.send(diff.clone());
            }
        }

        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            changed = diff.changed.len(),
            "registry refreshed"
        );

        Ok(diff)
    }

    /// §4.5 `explain`: every candidate id saw across strategies plus which
    /// one won and why.
    pub async fn explain(&self, id: &str) -> ExplainResult {
        let outcome = self.discovery.run(&self.roots).await;
        let candidates: Vec<PluginBrief> = outcome
            .candidates
            .into_iter()
            .filter(|c| c.id == id)
            .collect();
        let winner = outcome.plugins.into_iter().find(|p| p.id == id);

        let rule = if candidates.len() <= 1 {
            "only one candidate".to_string()
        } else {
            "lowest source-precedence rank wins; ties by higher semver, then path order".to_string()
        };

        ExplainResult {
            plugin_id: id.to_string(),
            winner,
            candidates,
            rule,
        }
    }

    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryDiff> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().await.push(tx);
        rx
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }
}

fn compute_diff(prior: &[PluginBrief], current: &[PluginBrief]) -> RegistryDiff {
    let prior_by_id: HashMap<&str, &PluginBrief> = prior.iter().map(|p| (p.id.as_str(), p)).collect();
    let current_by_id: HashMap<&str, &PluginBrief> =
        current.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut added = Vec::new();
    let mut changed = Vec::new();
    for brief in current {
        match prior_by_id.get(brief.id.as_str()) {
            None => added.push(brief.id.clone()),
            Some(prior_brief) => {
                if prior_brief.version != brief.version
                    || prior_brief.source.kind != brief.source.kind
                    || prior_brief.source.path != brief.source.path
                {
                    changed.push(ChangedEntry {
                        from: (*prior_brief).clone(),
                        to: brief.clone(),
                    });
                }
            }
        }
    }

    let removed = prior
        .iter()
        .filter(|p| !current_by_id.contains_key(p.id.as_str()))
        .map(|p| p.id.clone())
        .collect();

    added.sort();
    changed.sort_by(|a, b| a.to.id.cmp(&b.to.id));

    RegistryDiff {
        added,
        removed,
        changed,
    }
}

#[allow(clippy::too_many_arguments)]
fn build_snapshot(
    opts: &InitializeOptions,
    plugins: Vec<PluginBrief>,
    manifests: Vec<SnapshotEntry>,
    errors: Vec<crate::discovery::DiscoveryError>,
    partial: bool,
    rev: u64,
    previous_checksum: Option<String>,
) -> RegistrySnapshot {
    let now = chrono::Utc::now();
    let mut snapshot = RegistrySnapshot {
        schema: crate::snapshot::SNAPSHOT_SCHEMA.to_string(),
        rev,
        generated_at: now,
        expires_at: Some(now + chrono::Duration::milliseconds(opts.ttl_ms as i64)),
        ttl_ms: Some(opts.ttl_ms.max(1000)),
        partial,
        stale: false,
        corrupted: false,
        source: crate::snapshot::SnapshotSource {
            cli_version: opts.cli_version.clone(),
            cwd: opts.roots.first().cloned().unwrap_or_default(),
        },
        plugins,
        manifests,
        errors,
        checksum: String::new(),
        checksum_algorithm: "sha256".to_string(),
        previous_checksum,
    };
    snapshot.checksum = snapshot.compute_checksum();
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest_json(id: &str, version: &str) -> String {
        format!(
            r#"{{"schemaVersion":"v3","id":"{id}","version":"{version}","display":{{"name":"P"}},"commands":[{{"id":"run","describe":"d","handlerRef":"i.js#run"}}]}}"#
        )
    }

    #[tokio::test]
    async fn producer_discovers_and_persists_on_empty_cache() {
        let tmp = TempDir::new().unwrap();
        let plugin_dir = tmp.path().join(".kb").join("plugins").join("p");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("manifest.json"), manifest_json("@o/p", "1.0.0")).unwrap();

        let opts = InitializeOptions {
            roots: vec![tmp.path().to_path_buf()],
            strategies: vec![StrategyKind::Directory],
            ttl_ms: 300_000,
            mode: RegistryMode::Producer,
            cli_version: "0.1.0".to_string(),
        };
        let registry = PluginRegistry::initialize(opts, tmp.path().join(".kb").join("cache"))
            .await
            .unwrap();

        let plugins = registry.list().await;
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].id, "@o/p");
        assert!(tmp.path().join(".kb/cache/registry.json").is_file());
    }

    #[tokio::test]
    async fn refresh_reports_added_and_removed() {
        let tmp = TempDir::new().unwrap();
        let plugins_root = tmp.path().join(".kb").join("plugins");
        let p1 = plugins_root.join("p1");
        std::fs::create_dir_all(&p1).unwrap();
        std::fs::write(p1.join("manifest.json"), manifest_json("@o/p1", "1.0.0")).unwrap();

        let opts = InitializeOptions {
            roots: vec![tmp.path().to_path_buf()],
            strategies: vec![StrategyKind::Directory],
            ttl_ms: 300_000,
            mode: RegistryMode::Producer,
            cli_version: "0.1.0".to_string(),
        };
        let registry = PluginRegistry::initialize(opts, tmp.path().join(".kb").join("cache"))
            .await
            .unwrap();
        assert_eq!(registry.list().await.len(), 1);

        let p2 = plugins_root.join("p2");
        std::fs::create_dir_all(&p2).unwrap();
        std::fs::write(p2.join("manifest.json"), manifest_json("@o/p2", "1.0.0")).unwrap();

        let diff = registry.refresh().await.unwrap();
        assert_eq!(diff.added, vec!["@o/p2".to_string()]);
        assert!(diff.removed.is_empty());
        assert_eq!(registry.current_rev().await, 1);
    }

    #[tokio::test]
    async fn consumer_mode_does_not_persist() {
        let tmp = TempDir::new().unwrap();
        let opts = InitializeOptions {
            roots: vec![tmp.path().to_path_buf()],
            strategies: vec![StrategyKind::Directory],
            ttl_ms: 300_000,
            mode: RegistryMode::Consumer,
            cli_version: "0.1.0".to_string(),
        };
        let registry = PluginRegistry::initialize(opts, tmp.path().join(".kb").join("cache"))
            .await
            .unwrap();
        assert!(registry.list().await.is_empty());
        assert!(!tmp.path().join(".kb/cache/registry.json").is_file());
    }
}
