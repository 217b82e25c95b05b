//! Directory discovery strategy: recursively walks `<root>/.kb/plugins/**`
//! looking for standalone `manifest.toml`/`manifest.json` files. Manifests
//! are data, not loadable code, so unlike the original `.js`/`.mjs`/`.cjs`
//! module lookup this walks for the manifest file itself (see SPEC_FULL.md
//! §4.2).

use std::path::PathBuf;

use async_trait::async_trait;
use walkdir::WalkDir;

use super::{DiscoveryError, DiscoveryStrategy, PluginSource, StrategyKind, StrategyResult};

const MAX_DEPTH: usize = 6;

#[derive(Default)]
pub struct DirectoryStrategy;

#[async_trait]
impl DiscoveryStrategy for DirectoryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Directory
    }

    async fn discover(&self, roots: &[PathBuf]) -> StrategyResult {
        let mut result = StrategyResult::default();
        for root in roots {
            let plugins_dir = root.join(".kb").join("plugins");
            if !plugins_dir.is_dir() {
                continue;
            }

            let manifest_paths: Vec<PathBuf> = WalkDir::new(&plugins_dir)
                .max_depth(MAX_DEPTH)
                .into_iter()
                .filter_entry(|e| {
                    e.file_name()
                        .to_str()
                        .map(|n| !n.starts_with('.') || e.depth() == 0)
                        .unwrap_or(false)
                })
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| {
                    matches!(
                        e.file_name().to_str(),
                        Some("manifest.toml") | Some("manifest.json")
                    )
                })
                .map(|e| e.into_path())
                .collect();

            for path in manifest_paths {
                match super::load_manifest_with_timeout(&path).await {
                    Ok(manifest) => {
                        let source = PluginSource {
                            kind: StrategyKind::Directory,
                            path: path.clone(),
                        };
                        result.briefs.push(super::brief_from(&manifest, source.clone()));
                        result.entries.push(super::entry_from(
                            manifest,
                            path.parent().unwrap_or(&path).to_path_buf(),
                            source,
                        ));
                    }
                    Err(e) => result.errors.push(DiscoveryError {
                        plugin_path: path.clone(),
                        plugin_id: None,
                        error: e.to_string(),
                        code: Some(e.code()),
                    }),
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn discovers_manifest_under_kb_plugins() {
        let tmp = TempDir::new().unwrap();
        let plugin_dir = tmp.path().join(".kb").join("plugins").join("p");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("manifest.json"),
            r#"{"schemaVersion":"v3","id":"@org/p","version":"1.0.0","display":{"name":"P"},"commands":[{"id":"run","describe":"d","handlerRef":"i.js#run"}]}"#,
        )
        .unwrap();

        let strategy = DirectoryStrategy;
        let outcome = strategy.discover(&[tmp.path().to_path_buf()]).await;
        assert_eq!(outcome.briefs.len(), 1);
        assert_eq!(outcome.briefs[0].source.kind, StrategyKind::Directory);
    }

    #[tokio::test]
    async fn missing_kb_plugins_dir_yields_empty_result() {
        let tmp = TempDir::new().unwrap();
        let strategy = DirectoryStrategy;
        let outcome = strategy.discover(&[tmp.path().to_path_buf()]).await;
        assert!(outcome.briefs.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
