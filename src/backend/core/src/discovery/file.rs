//! File discovery strategy: loads an explicit manifest file path.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{DiscoveryError, DiscoveryStrategy, PluginSource, StrategyKind, StrategyResult};
use crate::plugins::manifest::Manifest;

/// Loads whatever manifest file paths the caller passes as `roots`. Unlike
/// the other three strategies, roots here are files, not directories.
pub struct FileStrategy;

#[async_trait]
impl DiscoveryStrategy for FileStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::File
    }

    async fn discover(&self, roots: &[PathBuf]) -> StrategyResult {
        let mut result = StrategyResult::default();

        for path in roots {
            if !path.is_file() {
                result.errors.push(DiscoveryError {
                    plugin_path: path.clone(),
                    plugin_id: None,
                    error: format!("no such manifest file: {}", path.display()),
                    code: Some(crate::plugins::manifest::ManifestErrorCode::ManifestNotFound),
                });
                continue;
            }

            match super::load_manifest_with_timeout(path).await {
                Ok(manifest) => {
                    let source = PluginSource {
                        kind: StrategyKind::File,
                        path: path.clone(),
                    };
                    result.briefs.push(super::brief_from(&manifest, source.clone()));
                    result.entries.push(super::entry_from(
                        manifest,
                        path.parent().unwrap_or(path).to_path_buf(),
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

        result
    }
}
