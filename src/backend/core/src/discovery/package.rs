//! Package discovery strategy: honors the `kbLabs` field of a package
//! descriptor (`package.json`) found directly at a root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{DiscoveryError, DiscoveryStrategy, PluginSource, StrategyKind, StrategyResult};
use crate::plugins::manifest::ManifestErrorCode;

pub struct PackageStrategy;

#[async_trait]
impl DiscoveryStrategy for PackageStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Package
    }

    async fn discover(&self, roots: &[PathBuf]) -> StrategyResult {
        let mut result = StrategyResult::default();
        for root in roots {
            scan_root(root, &mut result).await;
        }
        result
    }
}

/// Read `<root>/package.json`'s `kbLabs.manifest` (string) and
/// `kbLabs.plugins` (array of strings), resolving each relative to `root`.
pub(super) async fn scan_root(root: &Path, result: &mut StrategyResult) {
    let descriptor_path = root.join("package.json");
    let Ok(content) = tokio::fs::read_to_string(&descriptor_path).await else {
        return;
    };
    let Ok(descriptor) = serde_json::from_str::<serde_json::Value>(&content) else {
        result.errors.push(DiscoveryError {
            plugin_path: descriptor_path.clone(),
            plugin_id: None,
            error: "package.json is not valid JSON".into(),
            code: Some(ManifestErrorCode::ParseError),
        });
        return;
    };

    let Some(kb_labs) = descriptor.get("kbLabs") else {
        return;
    };

    let mut manifest_paths: Vec<PathBuf> = Vec::new();
    if let Some(manifest) = kb_labs.get("manifest").and_then(|v| v.as_str()) {
        manifest_paths.push(root.join(manifest));
    }
    if let Some(plugins) = kb_labs.get("plugins").and_then(|v| v.as_array()) {
        for p in plugins {
            if let Some(s) = p.as_str() {
                manifest_paths.push(root.join(s));
            }
        }
    }

    for path in manifest_paths {
        load_one(&path, StrategyKind::Package, result).await;
    }
}

pub(super) async fn load_one(path: &Path, kind: StrategyKind, result: &mut StrategyResult) {
    match super::load_manifest_with_timeout(path).await {
        Ok(manifest) => {
            let source = PluginSource {
                kind,
                path: path.to_path_buf(),
            };
            result.briefs.push(super::brief_from(&manifest, source.clone()));
            result.entries.push(super::entry_from(
                manifest,
                path.parent().unwrap_or(path).to_path_buf(),
                source,
            ));
        }
        Err(e) => result.errors.push(DiscoveryError {
            plugin_path: path.to_path_buf(),
            plugin_id: None,
            error: e.to_string(),
            code: Some(e.code()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn discovers_plugin_via_kb_labs_manifest_field() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{"name":"@org/p","version":"1.0.0","kbLabs":{"manifest":"./m.json"}}"#,
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("m.json"),
            r#"{"schemaVersion":"v3","id":"@org/p","version":"1.0.0","display":{"name":"P"},"commands":[{"id":"run","describe":"d","handlerRef":"i.js#run"}]}"#,
        )
        .unwrap();

        let strategy = PackageStrategy;
        let outcome = strategy.discover(&[tmp.path().to_path_buf()]).await;
        assert_eq!(outcome.briefs.len(), 1);
        assert_eq!(outcome.briefs[0].id, "@org/p");
        assert_eq!(outcome.briefs[0].source.kind, StrategyKind::Package);
    }
}
