//! Discovery strategies and the manager that orchestrates them.
//!
//! Four strategies locate plugin manifests from a set of configured roots:
//! [`workspace`], [`package`], [`directory`], and [`file`]. Each has a fixed
//! precedence rank; [`DiscoveryManager`] runs the caller-enabled subset in
//! that order and resolves id collisions per the invariants in the data
//! model (§3).

pub mod directory;
pub mod file;
pub mod package;
pub mod workspace;

use std::cmp::Ordering;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::plugins::manifest::{Manifest, ManifestErrorCode, SchemaVersion};

// ═══════════════════════════════════════════════════════════════════════════════
// Strategy kind / source
// ═══════════════════════════════════════════════════════════════════════════════

/// One of the four discovery mechanisms, each with a static precedence rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Workspace,
    Package,
    Directory,
    File,
}

impl StrategyKind {
    /// Lower rank wins ties (§3 invariants): workspace(1) < pkg(2) < dir(3) < file(4).
    pub fn precedence_rank(self) -> u8 {
        match self {
            StrategyKind::Workspace => 1,
            StrategyKind::Package => 2,
            StrategyKind::Directory => 3,
            StrategyKind::File => 4,
        }
    }

    /// The wire value used in `PluginBrief.source.kind` (§3), which
    /// abbreviates `package`/`directory` to `pkg`/`dir`.
    pub fn wire_str(self) -> &'static str {
        match self {
            StrategyKind::Workspace => "workspace",
            StrategyKind::Package => "pkg",
            StrategyKind::Directory => "dir",
            StrategyKind::File => "file",
        }
    }
}

/// Where a discovered plugin came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSource {
    pub kind: StrategyKind,
    pub path: PathBuf,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PluginBrief / SnapshotEntry / DiscoveryError
// ═══════════════════════════════════════════════════════════════════════════════

/// The registry-visible view of a plugin: what listings and diffs compare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginBrief {
    pub id: String,
    pub version: String,
    pub kind: SchemaVersion,
    pub source: PluginSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<crate::plugins::manifest::ManifestDisplay>,
}

/// A full manifest embedded in the snapshot, so consumers can operate
/// without re-running discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub plugin_id: String,
    pub manifest: Manifest,
    pub plugin_root: PathBuf,
    pub source: PluginSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryError {
    pub plugin_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ManifestErrorCode>,
}

/// What a single strategy run produces before cross-strategy dedup.
#[derive(Debug, Default)]
pub struct StrategyResult {
    pub briefs: Vec<PluginBrief>,
    pub entries: Vec<SnapshotEntry>,
    pub errors: Vec<DiscoveryError>,
    /// Set when the strategy hit a fatal I/O error partway through.
    pub partial: bool,
}

/// What the manager returns after running every enabled strategy and
/// resolving collisions.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub plugins: Vec<PluginBrief>,
    pub manifests: Vec<SnapshotEntry>,
    pub errors: Vec<DiscoveryError>,
    pub partial: bool,
    /// Every candidate seen across all strategies before collision
    /// resolution, kept so `explain()` can report the full set and the rule
    /// that picked the winner (§4.5).
    pub candidates: Vec<PluginBrief>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Strategy trait
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn discover(&self, roots: &[PathBuf]) -> StrategyResult;
}

/// Default per-manifest-load timeout (§4.2, §5): 5 seconds.
pub const MANIFEST_LOAD_TIMEOUT_MS: u64 = 5_000;

/// Read and parse a manifest file, bounded by [`MANIFEST_LOAD_TIMEOUT_MS`].
/// "Loading a manifest file is dynamic import or parse JSON semantically" —
/// here it is always a parse, but the timeout guard is kept regardless,
/// since a manifest could live on a slow network filesystem.
pub async fn load_manifest_with_timeout(
    path: &std::path::Path,
) -> Result<Manifest, crate::plugins::manifest::ManifestError> {
    use crate::plugins::manifest::ManifestError;

    let path = path.to_path_buf();
    let load = async {
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ManifestError::Io(format!("{}: {e}", path.display())))?;
        let manifest = Manifest::parse(&content)?;
        manifest.validate()?;
        Ok(manifest)
    };

    match tokio::time::timeout(
        std::time::Duration::from_millis(MANIFEST_LOAD_TIMEOUT_MS),
        load,
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ManifestError::Io(format!(
            "timed out loading manifest after {MANIFEST_LOAD_TIMEOUT_MS}ms: {}",
            path.display()
        ))),
    }
}

pub fn brief_from(manifest: &Manifest, source: PluginSource) -> PluginBrief {
    PluginBrief {
        id: manifest.id.clone(),
        version: manifest.version.clone(),
        kind: manifest.source_schema,
        source,
        display: manifest.display.clone(),
    }
}

pub fn entry_from(manifest: Manifest, plugin_root: PathBuf, source: PluginSource) -> SnapshotEntry {
    SnapshotEntry {
        plugin_id: manifest.id.clone(),
        manifest,
        plugin_root,
        source,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Discovery manager
// ═══════════════════════════════════════════════════════════════════════════════

pub struct DiscoveryManager {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
}

impl DiscoveryManager {
    /// Build a manager running exactly the strategies named in `enabled`, in
    /// their given order. Order does not affect correctness (final ordering
    /// is by precedence rank regardless) but mirrors §4.3's "in precedence
    /// order" phrasing for readability of logs.
    pub fn new(enabled: &[StrategyKind]) -> Self {
        let mut strategies: Vec<Box<dyn DiscoveryStrategy>> = Vec::new();
        for kind in enabled {
            let strategy: Box<dyn DiscoveryStrategy> = match kind {
                StrategyKind::Workspace => Box::new(workspace::WorkspaceStrategy),
                StrategyKind::Package => Box::new(package::PackageStrategy),
                StrategyKind::Directory => Box::new(directory::DirectoryStrategy::default()),
                StrategyKind::File => Box::new(file::FileStrategy),
            };
            strategies.push(strategy);
        }
        strategies.sort_by_key(|s| s.kind().precedence_rank());
        Self { strategies }
    }

    pub async fn run(&self, roots: &[PathBuf]) -> DiscoveryOutcome {
        let mut partial = false;
        let mut errors = Vec::new();
        // (brief, entry, precedence_rank) — candidates keyed for dedup below.
        let mut candidates: Vec<(PluginBrief, SnapshotEntry, u8)> = Vec::new();

        for strategy in &self.strategies {
            let result = strategy.discover(roots).await;
            partial |= result.partial;
            errors.extend(result.errors);
            let rank = strategy.kind().precedence_rank();
            for (brief, entry) in result.briefs.into_iter().zip(result.entries.into_iter()) {
                candidates.push((brief, entry, rank));
            }
        }

        let all_candidates: Vec<PluginBrief> = candidates.iter().map(|(b, _, _)| b.clone()).collect();
        let (plugins, manifests) = resolve_collisions(candidates);

        DiscoveryOutcome {
            plugins,
            manifests,
            errors,
            partial,
            candidates: all_candidates,
        }
    }
}

/// Resolve same-id collisions per §3: lowest precedence rank wins; ties
/// broken by higher semver, then by deterministic (lexicographic) path
/// ordering. Returns both lists sorted by id (§4.3).
fn resolve_collisions(
    candidates: Vec<(PluginBrief, SnapshotEntry, u8)>,
) -> (Vec<PluginBrief>, Vec<SnapshotEntry>) {
    use std::collections::HashMap;

    let mut winners: HashMap<String, (PluginBrief, SnapshotEntry, u8)> = HashMap::new();

    for (brief, entry, rank) in candidates {
        match winners.get(&brief.id) {
            None => {
                winners.insert(brief.id.clone(), (brief, entry, rank));
            }
            Some((existing_brief, _, existing_rank)) => {
                if candidate_wins(&brief, rank, existing_brief, *existing_rank) {
                    winners.insert(brief.id.clone(), (brief, entry, rank));
                }
            }
        }
    }

    let mut winners: Vec<_> = winners.into_values().collect();
    winners.sort_by(|a, b| a.0.id.cmp(&b.0.id));

    let plugins = winners.iter().map(|(b, _, _)| b.clone()).collect();
    let manifests = winners.into_iter().map(|(_, e, _)| e).collect();
    (plugins, manifests)
}

fn candidate_wins(
    candidate: &PluginBrief,
    candidate_rank: u8,
    incumbent: &PluginBrief,
    incumbent_rank: u8,
) -> bool {
    match candidate_rank.cmp(&incumbent_rank) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => match compare_semver(&candidate.version, &incumbent.version) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => candidate.source.path < incumbent.source.path,
        },
    }
}

fn compare_semver(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief(id: &str, version: &str, path: &str) -> PluginBrief {
        PluginBrief {
            id: id.to_string(),
            version: version.to_string(),
            kind: SchemaVersion::V3,
            source: PluginSource {
                kind: StrategyKind::Workspace,
                path: PathBuf::from(path),
            },
            display: None,
        }
    }

    fn entry_for(b: &PluginBrief) -> SnapshotEntry {
        SnapshotEntry {
            plugin_id: b.id.clone(),
            manifest: Manifest {
                source_schema: SchemaVersion::V3,
                id: b.id.clone(),
                version: b.version.clone(),
                display: None,
                engine: Default::default(),
                permissions: Default::default(),
                commands: vec![],
                setup: None,
                artifacts: vec![],
                requires: vec![],
            },
            plugin_root: b.source.path.clone(),
            source: b.source.clone(),
        }
    }

    #[test]
    fn lower_precedence_rank_wins() {
        let a = brief("@o/p", "1.0.0", "/a");
        let b = brief("@o/p", "2.0.0", "/b");
        let ae = entry_for(&a);
        let be = entry_for(&b);
        let (plugins, _) = resolve_collisions(vec![(a, ae, 1), (b, be, 3)]);
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].source.path, PathBuf::from("/a"));
    }

    #[test]
    fn tie_broken_by_higher_semver() {
        let a = brief("@o/p", "1.0.0", "/a");
        let b = brief("@o/p", "1.1.0", "/b");
        let ae = entry_for(&a);
        let be = entry_for(&b);
        let (plugins, _) = resolve_collisions(vec![(a, ae, 2), (b, be, 2)]);
        assert_eq!(plugins[0].version, "1.1.0");
    }

    #[test]
    fn tie_broken_by_lexicographic_path() {
        let a = brief("@o/p", "1.0.0", "/a/z");
        let b = brief("@o/p", "1.0.0", "/a/b");
        let ae = entry_for(&a);
        let be = entry_for(&b);
        let (plugins, _) = resolve_collisions(vec![(a, ae, 2), (b, be, 2)]);
        assert_eq!(plugins[0].source.path, PathBuf::from("/a/b"));
    }

    #[test]
    fn results_sorted_by_id() {
        let a = brief("@o/zzz", "1.0.0", "/a");
        let b = brief("@o/aaa", "1.0.0", "/b");
        let ae = entry_for(&a);
        let be = entry_for(&b);
        let (plugins, _) = resolve_collisions(vec![(a, ae, 1), (b, be, 1)]);
        assert_eq!(plugins[0].id, "@o/aaa");
        assert_eq!(plugins[1].id, "@o/zzz");
    }
}
