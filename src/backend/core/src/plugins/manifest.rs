//! Plugin manifest model, parsing, and validation.
//!
//! A manifest is immutable once loaded. Two on-disk schema versions are
//! accepted, `v2` and `v3`; a `v2` manifest is migrated to `v3` in memory so
//! every other component only ever sees one shape.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Manifest
// ═══════════════════════════════════════════════════════════════════════════════

/// Normalized plugin manifest. Always `v3`-shaped after [`Manifest::parse`],
/// even when the source document was `v2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// The schema version the manifest declared on disk, before migration.
    #[serde(rename = "schemaVersion")]
    pub source_schema: SchemaVersion,

    /// Namespaced plugin id, e.g. `@org/name`.
    pub id: String,

    /// Semantic version string.
    pub version: String,

    #[serde(default)]
    pub display: Option<ManifestDisplay>,

    #[serde(default)]
    pub engine: EngineConstraints,

    #[serde(default)]
    pub permissions: PermissionSpec,

    #[serde(default)]
    pub commands: Vec<CommandDescriptor>,

    #[serde(default)]
    pub setup: Option<SetupHandler>,

    #[serde(default)]
    pub artifacts: Vec<Artifact>,

    #[serde(default)]
    pub requires: Vec<PeerRequirement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    V2,
    V3,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestDisplay {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConstraints {
    /// A semver range the host version must satisfy, e.g. ">=1.0.0 <2.0.0".
    #[serde(default)]
    pub host_range: Option<String>,
    #[serde(default)]
    pub module_kind: ModuleKind,
}

impl Default for EngineConstraints {
    fn default() -> Self {
        Self {
            host_range: None,
            module_kind: ModuleKind::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    #[default]
    Esm,
    Cjs,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Permission spec
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionSpec {
    #[serde(default)]
    pub fs: FsPermission,
    #[serde(default)]
    pub net: NetPermission,
    /// Allow-listed environment variable names.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub quotas: ResourceQuotas,
    /// Free-form capability tags, not enforced by the sandbox directly but
    /// surfaced to consumers (e.g. `--json` output, `explain`).
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsPermission {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub mode: FsMode,
}

impl Default for FsPermission {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            mode: FsMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FsMode {
    #[default]
    Read,
    ReadWrite,
}

/// `net: "none" | {allowHosts: [...]}`.
///
/// Represented as an enum rather than two optional fields so that "both
/// `net=none` and `net.allowHosts` set" — a case §4.1 validation must
/// reject — is unrepresentable by construction; the custom `Deserialize`
/// below is the single place that shape is interpreted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum NetPermission {
    None,
    AllowHosts { allow_hosts: Vec<String> },
}

impl Default for NetPermission {
    fn default() -> Self {
        NetPermission::None
    }
}

impl<'de> Deserialize<'de> for NetPermission {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) if s == "none" => Ok(NetPermission::None),
            serde_json::Value::Object(map) => {
                let hosts = map
                    .get("allowHosts")
                    .cloned()
                    .unwrap_or(serde_json::Value::Array(vec![]));
                let allow_hosts: Vec<String> =
                    serde_json::from_value(hosts).map_err(serde::de::Error::custom)?;
                Ok(NetPermission::AllowHosts { allow_hosts })
            }
            other => Err(serde::de::Error::custom(format!(
                "invalid `net` permission value: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotas {
    pub timeout_ms: Option<u64>,
    pub memory_mb: Option<u64>,
    pub cpu_ms: Option<u64>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Commands
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescriptor {
    pub id: String,
    #[serde(default)]
    pub group: Option<String>,
    pub describe: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub flags: Vec<FlagDescriptor>,
    pub handler_ref: String,
    #[serde(default)]
    pub long_description: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDescriptor {
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub flag_type: String,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub choices: Option<Vec<serde_json::Value>>,
}

pub const FLAG_TYPES: [&str; 4] = ["boolean", "string", "number", "array"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupHandler {
    pub handler_ref: String,
    #[serde(default)]
    pub permissions: PermissionSpec,
    pub describe: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub label: String,
    pub path_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRequirement {
    pub id: String,
    pub version_req: String,
}

/// A `v2` manifest, before migration. `v2` plugins describe a single
/// implicit command rather than a `commands` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestV2 {
    id: String,
    version: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    handler: String,
    #[serde(default)]
    permissions: PermissionSpec,
}

impl ManifestV2 {
    fn migrate(self) -> Manifest {
        let command_id = self
            .id
            .rsplit('/')
            .next()
            .unwrap_or(self.id.as_str())
            .to_string();
        Manifest {
            source_schema: SchemaVersion::V2,
            id: self.id,
            version: self.version,
            display: Some(ManifestDisplay {
                name: self.name,
                description: self.description.clone(),
            }),
            engine: EngineConstraints::default(),
            permissions: self.permissions,
            commands: vec![CommandDescriptor {
                id: command_id,
                group: None,
                describe: self.description.unwrap_or_default(),
                aliases: Vec::new(),
                flags: Vec::new(),
                handler_ref: self.handler,
                long_description: None,
                examples: Vec::new(),
            }],
            setup: None,
            artifacts: Vec::new(),
            requires: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManifestErrorCode {
    ManifestNotFound,
    ParseError,
    ValidationError,
    ResolveError,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest not found: {0}")]
    NotFound(String),

    #[error("failed to parse manifest: {0}")]
    Parse(String),

    #[error("manifest validation failed: {0}")]
    Validation(String),

    #[error("I/O error reading manifest: {0}")]
    Io(String),
}

impl ManifestError {
    pub fn code(&self) -> ManifestErrorCode {
        match self {
            ManifestError::NotFound(_) => ManifestErrorCode::ManifestNotFound,
            ManifestError::Parse(_) => ManifestErrorCode::ParseError,
            ManifestError::Validation(_) => ManifestErrorCode::ValidationError,
            ManifestError::Io(_) => ManifestErrorCode::ResolveError,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Parsing & validation
// ═══════════════════════════════════════════════════════════════════════════════

impl Manifest {
    /// Parse a manifest document. Supports JSON and TOML; both are accepted
    /// for either schema version. A `v2` document is migrated to `v3` shape.
    pub fn parse(raw: &str) -> Result<Manifest, ManifestError> {
        let looks_json = raw.trim_start().starts_with('{');

        let version_probe: serde_json::Value = if looks_json {
            serde_json::from_str(raw).map_err(|e| ManifestError::Parse(e.to_string()))?
        } else {
            let v: toml::Value =
                toml::from_str(raw).map_err(|e| ManifestError::Parse(e.to_string()))?;
            serde_json::to_value(v).map_err(|e| ManifestError::Parse(e.to_string()))?
        };

        let schema = version_probe
            .get("schemaVersion")
            .and_then(|v| v.as_str())
            .unwrap_or("v3");

        match schema {
            "v2" => {
                let v2: ManifestV2 = serde_json::from_value(version_probe)
                    .map_err(|e| ManifestError::Parse(e.to_string()))?;
                Ok(v2.migrate())
            }
            "v3" => {
                let manifest: Manifest = serde_json::from_value(version_probe)
                    .map_err(|e| ManifestError::Parse(e.to_string()))?;
                Ok(manifest)
            }
            other => Err(ManifestError::Parse(format!(
                "unsupported schemaVersion: {other}"
            ))),
        }
    }

    /// Load and parse a manifest file from disk.
    pub fn load_from_file(path: &Path) -> Result<Manifest, ManifestError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::Io(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Structural validation per §4.1. Rejects manifests with a missing or
    /// malformed id/version, unresolvable handler refs, unknown flag types,
    /// or duplicate/empty command ids.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.id.is_empty() {
            return Err(ManifestError::Validation("id must not be empty".into()));
        }
        if !is_namespaced_id(&self.id) {
            return Err(ManifestError::Validation(format!(
                "id '{}' must be namespaced, e.g. @org/name",
                self.id
            )));
        }
        if self.version.is_empty() {
            return Err(ManifestError::Validation("version must not be empty".into()));
        }
        if semver::Version::parse(&self.version).is_err() {
            return Err(ManifestError::Validation(format!(
                "version '{}' is not valid semver",
                self.version
            )));
        }

        if let Some(setup) = &self.setup {
            validate_handler_ref(&setup.handler_ref)?;
        }

        let mut seen_ids = HashSet::new();
        for cmd in &self.commands {
            if cmd.id.is_empty() {
                return Err(ManifestError::Validation(
                    "command descriptor id must not be empty".into(),
                ));
            }
            if !seen_ids.insert(cmd.id.clone()) {
                return Err(ManifestError::Validation(format!(
                    "duplicate command id '{}' within manifest",
                    cmd.id
                )));
            }
            validate_handler_ref(&cmd.handler_ref)?;
            for flag in &cmd.flags {
                if !FLAG_TYPES.contains(&flag.flag_type.as_str()) {
                    return Err(ManifestError::Validation(format!(
                        "command '{}' flag '{}' has unknown type '{}'",
                        cmd.id, flag.name, flag.flag_type
                    )));
                }
            }
        }

        Ok(())
    }
}

fn is_namespaced_id(id: &str) -> bool {
    match id.split_once('/') {
        Some((scope, name)) => !scope.is_empty() && !name.is_empty(),
        None => false,
    }
}

fn validate_handler_ref(handler_ref: &str) -> Result<(), ManifestError> {
    match handler_ref.split_once('#') {
        Some((_, export)) if !export.is_empty() => Ok(()),
        _ => Err(ManifestError::Validation(format!(
            "handlerRef '{handler_ref}' must be of the form '<file>#<export>'"
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_v3_json() -> &'static str {
        r#"{
            "schemaVersion": "v3",
            "id": "@org/p",
            "version": "1.0.0",
            "display": {"name": "P"},
            "commands": [
                {"id": "run", "describe": "run it", "handlerRef": "index.js#run"}
            ]
        }"#
    }

    #[test]
    fn parses_v3_json() {
        let m = Manifest::parse(valid_v3_json()).unwrap();
        assert_eq!(m.id, "@org/p");
        assert_eq!(m.commands.len(), 1);
        m.validate().unwrap();
    }

    #[test]
    fn parses_v3_toml() {
        let toml = r#"
schemaVersion = "v3"
id = "@org/p"
version = "1.0.0"

[[commands]]
id = "run"
describe = "run it"
handlerRef = "index.js#run"
"#;
        let m = Manifest::parse(toml).unwrap();
        assert_eq!(m.id, "@org/p");
        m.validate().unwrap();
    }

    #[test]
    fn migrates_v2_to_v3() {
        let v2 = r#"{
            "schemaVersion": "v2",
            "id": "@org/legacy",
            "version": "0.9.0",
            "name": "Legacy",
            "handler": "index.js#main"
        }"#;
        let m = Manifest::parse(v2).unwrap();
        assert_eq!(m.source_schema, SchemaVersion::V2);
        assert_eq!(m.commands.len(), 1);
        assert_eq!(m.commands[0].handler_ref, "index.js#main");
        assert_eq!(m.commands[0].id, "legacy");
        m.validate().unwrap();
    }

    #[test]
    fn rejects_non_namespaced_id() {
        let json = valid_v3_json().replace("@org/p", "plainname");
        let m = Manifest::parse(&json).unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_handler_ref_without_export() {
        let json = valid_v3_json().replace("index.js#run", "index.js");
        let m = Manifest::parse(&json).unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_command_ids() {
        let json = r#"{
            "schemaVersion": "v3",
            "id": "@org/p",
            "version": "1.0.0",
            "commands": [
                {"id": "run", "describe": "a", "handlerRef": "a.js#a"},
                {"id": "run", "describe": "b", "handlerRef": "b.js#b"}
            ]
        }"#;
        let m = Manifest::parse(json).unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn rejects_unknown_flag_type() {
        let json = r#"{
            "schemaVersion": "v3",
            "id": "@org/p",
            "version": "1.0.0",
            "commands": [
                {"id": "run", "describe": "a", "handlerRef": "a.js#a",
                 "flags": [{"name": "x", "type": "regexp"}]}
            ]
        }"#;
        let m = Manifest::parse(json).unwrap();
        assert!(m.validate().is_err());
    }

    #[test]
    fn net_none_parses() {
        let json = valid_v3_json().replace(
            "\"display\": {\"name\": \"P\"},",
            "\"display\": {\"name\": \"P\"}, \"permissions\": {\"net\": \"none\"},",
        );
        let m = Manifest::parse(&json).unwrap();
        assert!(matches!(m.permissions.net, NetPermission::None));
    }

    #[test]
    fn net_allow_hosts_parses() {
        let json = valid_v3_json().replace(
            "\"display\": {\"name\": \"P\"},",
            "\"display\": {\"name\": \"P\"}, \"permissions\": {\"net\": {\"allowHosts\": [\"api.example.com\"]}},",
        );
        let m = Manifest::parse(&json).unwrap();
        match m.permissions.net {
            NetPermission::AllowHosts { allow_hosts } => {
                assert_eq!(allow_hosts, vec!["api.example.com".to_string()])
            }
            _ => panic!("expected AllowHosts"),
        }
    }
}
