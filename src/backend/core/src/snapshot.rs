//! Registry snapshot persistence: the on-disk `RegistrySnapshot` under
//! `<root>/.kb/cache/`, its atomic write protocol, and checksum-verified load
//! with `.prev` backup recovery (§4.4).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::discovery::{DiscoveryError, PluginBrief, SnapshotEntry};

pub const SNAPSHOT_SCHEMA: &str = "kb.registry/1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSource {
    pub cli_version: String,
    pub cwd: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub schema: String,
    pub rev: u64,
    pub generated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    pub partial: bool,
    pub stale: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub corrupted: bool,
    pub source: SnapshotSource,
    pub plugins: Vec<PluginBrief>,
    pub manifests: Vec<SnapshotEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<DiscoveryError>,
    pub checksum: String,
    pub checksum_algorithm: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_checksum: Option<String>,
}

fn is_false(v: &bool) -> bool {
    !*v
}

impl RegistrySnapshot {
    /// A valid, empty snapshot to seed a first boot (§4.4): `rev=0`,
    /// `partial=true` since nothing has actually been discovered yet.
    pub fn create_empty(root: &Path, cli_version: &str, ttl_ms: u64) -> Self {
        let now = chrono::Utc::now();
        let mut snapshot = Self {
            schema: SNAPSHOT_SCHEMA.to_string(),
            rev: 0,
            generated_at: now,
            expires_at: Some(now + chrono::Duration::milliseconds(ttl_ms as i64)),
            ttl_ms: Some(ttl_ms.max(1000)),
            partial: true,
            stale: false,
            corrupted: false,
            source: SnapshotSource {
                cli_version: cli_version.to_string(),
                cwd: root.to_path_buf(),
            },
            plugins: Vec::new(),
            manifests: Vec::new(),
            errors: Vec::new(),
            checksum: String::new(),
            checksum_algorithm: "sha256".to_string(),
            previous_checksum: None,
        };
        snapshot.checksum = snapshot.compute_checksum();
        snapshot
    }

    /// Apply staleness per §4.4 step 3, mutating in place.
    pub fn apply_staleness(&mut self) {
        if let Some(expires_at) = self.expires_at {
            if chrono::Utc::now() > expires_at {
                self.stale = true;
                self.partial = true;
            }
        }
    }

    /// SHA-256 of the stable JSON serialization with integrity fields
    /// removed (§3 invariant), hex-encoded.
    pub fn compute_checksum(&self) -> String {
        let mut value = serde_json::to_value(self).expect("snapshot always serializes");
        if let Value::Object(map) = &mut value {
            map.remove("checksum");
            map.remove("previousChecksum");
        }
        let stable = stable_json(&value);
        let mut hasher = Sha256::new();
        hasher.update(stable.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Recursively sort object keys and elide `null`-equivalent absent fields,
/// then render as compact JSON. This is the "stable serialization" the
/// checksum is computed over (§4.4).
fn stable_json(value: &Value) -> String {
    serde_json::to_string(&sort_value(value)).expect("sorted value always serializes")
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_value(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

pub struct SnapshotStore {
    cache_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    fn current_path(&self) -> PathBuf {
        self.cache_dir.join("registry.json")
    }

    fn prev_path(&self) -> PathBuf {
        self.cache_dir.join("registry.prev.json")
    }

    /// Atomic persist per §4.4: checksum, best-effort `.prev` backup, write
    /// to a uuid-suffixed temp file, then rename over the canonical path.
    pub async fn persist(&self, mut snapshot: RegistrySnapshot) -> std::io::Result<()> {
        snapshot.previous_checksum = snapshot.previous_checksum.take();
        snapshot.checksum = snapshot.compute_checksum();

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let current = self.current_path();
        if current.is_file() {
            if let Err(e) = tokio::fs::copy(&current, self.prev_path()).await {
                tracing::warn!(error = %e, "failed to write registry.prev.json backup");
            }
        }

        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = self
            .cache_dir
            .join(format!("registry.tmp.{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp_path, &serialized).await?;
        tokio::fs::rename(&tmp_path, &current).await?;

        Ok(())
    }

    /// Load protocol per §4.4: read, parse, normalize, verify checksum;
    /// on mismatch or parse failure fall back to `.prev`; apply staleness.
    /// `corrupted` is only propagated when the current file actually existed
    /// and failed to load — falling back to `.prev` because `registry.json`
    /// was simply absent (first boot, cache wiped) is not corruption.
    pub async fn load(&self) -> Option<RegistrySnapshot> {
        if let Some(mut snapshot) = self.try_load(&self.current_path()).await {
            snapshot.apply_staleness();
            return Some(snapshot);
        }

        let current_was_present = self.current_path().is_file();
        if current_was_present {
            tracing::warn!("registry.json present but corrupted, attempting .prev recovery");
        } else {
            tracing::info!("registry.json missing, attempting .prev recovery");
        }

        if let Some(mut snapshot) = self.try_load(&self.prev_path()).await {
            snapshot.corrupted = current_was_present;
            snapshot.apply_staleness();
            return Some(snapshot);
        }

        None
    }

    async fn try_load(&self, path: &Path) -> Option<RegistrySnapshot> {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        let snapshot: RegistrySnapshot = serde_json::from_str(&content).ok()?;
        let recomputed = snapshot.compute_checksum();
        if recomputed != snapshot.checksum {
            tracing::warn!(path = %path.display(), "snapshot checksum mismatch");
            return None;
        }
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn empty_snapshot_has_valid_checksum() {
        let snapshot = RegistrySnapshot::create_empty(Path::new("/proj"), "0.1.0", 300_000);
        assert_eq!(snapshot.rev, 0);
        assert!(snapshot.partial);
        assert!(!snapshot.stale);
        assert_eq!(snapshot.checksum, snapshot.compute_checksum());
    }

    #[tokio::test]
    async fn persist_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf());
        let snapshot = RegistrySnapshot::create_empty(tmp.path(), "0.1.0", 300_000);
        store.persist(snapshot.clone()).await.unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.rev, snapshot.rev);
        assert_eq!(loaded.checksum, snapshot.checksum);
        assert!(!loaded.corrupted);
    }

    #[tokio::test]
    async fn corrupted_current_falls_back_to_prev() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf());
        let snapshot = RegistrySnapshot::create_empty(tmp.path(), "0.1.0", 300_000);
        store.persist(snapshot.clone()).await.unwrap();
        // A second persist copies the good snapshot to .prev.
        let mut snapshot2 = snapshot.clone();
        snapshot2.rev = 1;
        snapshot2.checksum = snapshot2.compute_checksum();
        store.persist(snapshot2).await.unwrap();

        // Corrupt the current file.
        tokio::fs::write(tmp.path().join("registry.json"), b"not json")
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert!(loaded.corrupted);
        assert_eq!(loaded.rev, 0);
    }

    #[tokio::test]
    async fn missing_files_yield_none() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf());
        assert!(store.load().await.is_none());
    }

    #[tokio::test]
    async fn missing_current_recovers_from_prev_without_corrupted() {
        let tmp = TempDir::new().unwrap();
        let store = SnapshotStore::new(tmp.path().to_path_buf());
        let snapshot = RegistrySnapshot::create_empty(tmp.path(), "0.1.0", 300_000);
        store.persist(snapshot.clone()).await.unwrap();
        // A second persist copies the first snapshot to .prev.
        let mut snapshot2 = snapshot.clone();
        snapshot2.rev = 1;
        snapshot2.checksum = snapshot2.compute_checksum();
        store.persist(snapshot2).await.unwrap();

        // A clean cache wipe: the current file is gone but .prev survives.
        tokio::fs::remove_file(tmp.path().join("registry.json"))
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert!(!loaded.corrupted);
        assert_eq!(loaded.rev, snapshot.rev);
    }
}
