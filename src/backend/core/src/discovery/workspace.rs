//! Workspace discovery strategy: climbs from each root to find a workspace
//! descriptor (`pnpm-workspace.yaml` or a `package.json` with a `workspaces`
//! field), enumerates member packages, and loads any that declare `kbLabs`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{package, DiscoveryStrategy, StrategyKind, StrategyResult};

/// How many parent directories to climb looking for a workspace root before
/// giving up. Matches the bound used by the directory strategy's walk depth.
const MAX_CLIMB: u32 = 8;

pub struct WorkspaceStrategy;

#[async_trait]
impl DiscoveryStrategy for WorkspaceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Workspace
    }

    async fn discover(&self, roots: &[PathBuf]) -> StrategyResult {
        let mut result = StrategyResult::default();
        for root in roots {
            if let Some(ws_root) = find_workspace_root(root).await {
                if let Some(members) = workspace_members(&ws_root).await {
                    for member in members {
                        scan_member(&member, &mut result).await;
                    }
                }
            }
        }
        result
    }
}

async fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    for _ in 0..MAX_CLIMB {
        if current.join("pnpm-workspace.yaml").is_file() {
            return Some(current);
        }
        if let Ok(content) = tokio::fs::read_to_string(current.join("package.json")).await {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&content) {
                if v.get("workspaces").is_some() {
                    return Some(current);
                }
            }
        }
        match current.parent() {
            Some(p) => current = p.to_path_buf(),
            None => break,
        }
    }
    None
}

async fn workspace_members(ws_root: &Path) -> Option<Vec<PathBuf>> {
    if let Ok(content) = tokio::fs::read_to_string(ws_root.join("pnpm-workspace.yaml")).await {
        #[derive(serde::Deserialize)]
        struct PnpmWorkspace {
            #[serde(default)]
            packages: Vec<String>,
        }
        let parsed: PnpmWorkspace = serde_yaml::from_str(&content).ok()?;
        return Some(expand_globs(ws_root, &parsed.packages));
    }

    if let Ok(content) = tokio::fs::read_to_string(ws_root.join("package.json")).await {
        let v: serde_json::Value = serde_json::from_str(&content).ok()?;
        let patterns: Vec<String> = v
            .get("workspaces")
            .and_then(|w| {
                w.as_array()
                    .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                    .or_else(|| {
                        w.get("packages").and_then(|p| {
                            p.as_array()
                                .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                        })
                    })
            })
            .unwrap_or_default();
        if !patterns.is_empty() {
            return Some(expand_globs(ws_root, &patterns));
        }
    }

    None
}

fn expand_globs(ws_root: &Path, patterns: &[String]) -> Vec<PathBuf> {
    let mut members = Vec::new();
    for pattern in patterns {
        let full_pattern = ws_root.join(pattern).join("package.json");
        let Some(pattern_str) = full_pattern.to_str() else {
            continue;
        };
        if let Ok(paths) = glob::glob(pattern_str) {
            for entry in paths.flatten() {
                if let Some(dir) = entry.parent() {
                    members.push(dir.to_path_buf());
                }
            }
        }
    }
    members
}

async fn scan_member(member_dir: &Path, result: &mut StrategyResult) {
    let descriptor_path = member_dir.join("package.json");
    let Ok(content) = tokio::fs::read_to_string(&descriptor_path).await else {
        return;
    };
    let Ok(descriptor) = serde_json::from_str::<serde_json::Value>(&content) else {
        return;
    };
    let Some(kb_labs) = descriptor.get("kbLabs") else {
        return;
    };

    // Workspace members declare a single manifest via `kbLabs.manifest`
    // (§4.2); `kbLabs.plugins` is the Package strategy's field, not this one.
    let Some(manifest) = kb_labs.get("manifest").and_then(|v| v.as_str()) else {
        return;
    };

    let path = member_dir.join(manifest);
    package::load_one(&path, StrategyKind::Workspace, result).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn discovers_plugin_in_pnpm_workspace_member() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("pnpm-workspace.yaml"),
            "packages:\n  - 'packages/*'\n",
        )
        .unwrap();
        let member = tmp.path().join("packages").join("p");
        std::fs::create_dir_all(&member).unwrap();
        std::fs::write(
            member.join("package.json"),
            r#"{"name":"@org/p","version":"1.0.0","kbLabs":{"manifest":"./m.json"}}"#,
        )
        .unwrap();
        std::fs::write(
            member.join("m.json"),
            r#"{"schemaVersion":"v3","id":"@org/p","version":"1.0.0","display":{"name":"P"},"commands":[{"id":"run","describe":"d","handlerRef":"i.js#run"}]}"#,
        )
        .unwrap();

        let strategy = WorkspaceStrategy;
        let outcome = strategy.discover(&[member.clone()]).await;
        assert_eq!(outcome.briefs.len(), 1);
        assert_eq!(outcome.briefs[0].source.kind, StrategyKind::Workspace);
    }

    #[tokio::test]
    async fn no_workspace_root_found_yields_empty_result() {
        let tmp = TempDir::new().unwrap();
        let strategy = WorkspaceStrategy;
        let outcome = strategy.discover(&[tmp.path().to_path_buf()]).await;
        assert!(outcome.briefs.is_empty());
        assert!(outcome.errors.is_empty());
    }
}
