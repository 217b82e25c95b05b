//! The command tree: host and plugin commands registered under a shared
//! path namespace, with host-command shadowing of plugin paths (§4.6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::plugins::manifest::{CommandDescriptor, FlagDescriptor, SchemaVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOrigin {
    Host,
    Plugin,
}

/// A single dispatchable (or shadowed) path in the tree (§3 `CommandRecord`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_version: Option<SchemaVersion>,
    pub handler_ref: String,
    pub flags: Vec<FlagDescriptor>,
    pub origin: CommandOrigin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    pub shadowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unavailable_reason: Option<String>,
    pub describe: String,
    #[serde(default)]
    pub aliases: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
pub struct CommandTree {
    records: HashMap<Vec<String>, CommandRecord>,
    /// Plugin commands that collided with a host path or alias. Kept out of
    /// `records` so dispatch never resolves to one, but still enumerated by
    /// [`CommandTree::all`] and [`CommandTree::children_of`] so a shadowed
    /// command remains listed (§3's shadowing invariant).
    shadowed_records: Vec<CommandRecord>,
    host_paths: Vec<Vec<String>>,
}

impl CommandTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built-in host command. Host registrations always win: any
    /// plugin command later registered at the same path or alias is marked
    /// shadowed instead of overwriting this entry.
    pub fn register_host(
        &mut self,
        path: Vec<String>,
        handler_ref: impl Into<String>,
        describe: impl Into<String>,
        flags: Vec<FlagDescriptor>,
        aliases: Vec<Vec<String>>,
    ) {
        let record = CommandRecord {
            path: path.clone(),
            manifest_version: None,
            handler_ref: handler_ref.into(),
            flags,
            origin: CommandOrigin::Host,
            plugin_id: None,
            shadowed: false,
            unavailable_reason: None,
            describe: describe.into(),
            aliases: aliases.clone(),
        };
        self.host_paths.push(path.clone());
        self.host_paths.extend(aliases.iter().cloned());
        self.records.insert(path, record.clone());
        for alias in aliases {
            self.records.insert(alias, record.clone());
        }
    }

    /// Register every command a plugin's manifest declares, under
    /// `[pluginId-segment, commandId]` unless the descriptor names its own
    /// `group`, in which case the path is `[group, commandId]`.
    pub fn register_plugin(
        &mut self,
        plugin_id: &str,
        manifest_version: SchemaVersion,
        descriptor: &CommandDescriptor,
    ) {
        let mut path = Vec::new();
        if let Some(group) = &descriptor.group {
            path.push(group.clone());
        }
        path.push(descriptor.id.clone());

        let shadowed = self.host_paths.contains(&path);

        let record = CommandRecord {
            path: path.clone(),
            manifest_version: Some(manifest_version),
            handler_ref: descriptor.handler_ref.clone(),
            flags: descriptor.flags.clone(),
            origin: CommandOrigin::Plugin,
            plugin_id: Some(plugin_id.to_string()),
            shadowed,
            unavailable_reason: if shadowed {
                Some(format!("shadowed by host command at {}", path.join(" ")))
            } else {
                None
            },
            describe: descriptor.describe.clone(),
            aliases: descriptor
                .aliases
                .iter()
                .map(|a| vec![a.clone()])
                .collect(),
        };

        if shadowed {
            tracing::warn!(path = %path.join(" "), plugin = plugin_id, "plugin command shadowed by host command");
            self.shadowed_records.push(record);
        } else {
            self.records.insert(path, record);
        }
    }

    /// Resolves a path to the record that would actually be dispatched.
    /// Never returns a shadowed record — those aren't reachable.
    pub fn get(&self, path: &[String]) -> Option<&CommandRecord> {
        self.records.get(path)
    }

    /// Every registered record (dispatchable or shadowed) whose path has
    /// `prefix` as a strict, immediate parent (used to detect groups and
    /// render group help).
    pub fn children_of(&self, prefix: &[String]) -> Vec<&CommandRecord> {
        self.records
            .values()
            .chain(self.shadowed_records.iter())
            .filter(|r| r.path.len() > prefix.len() && r.path.starts_with(prefix))
            .collect()
    }

    /// Every registered record, dispatchable or shadowed, sorted by path.
    pub fn all(&self) -> Vec<&CommandRecord> {
        let mut records: Vec<&CommandRecord> = self
            .records
            .values()
            .chain(self.shadowed_records.iter())
            .collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flag_descriptor() -> FlagDescriptor {
        FlagDescriptor {
            name: "verbose".to_string(),
            alias: None,
            flag_type: "boolean".to_string(),
            description: "verbose output".to_string(),
            default: None,
            required: false,
            choices: None,
        }
    }

    #[test]
    fn plugin_command_shadowed_by_host_is_marked_but_kept() {
        let mut tree = CommandTree::new();
        tree.register_host(vec!["plugin".into()], "host#plugin", "manage plugins", vec![], vec![]);

        let descriptor = CommandDescriptor {
            id: "plugin".to_string(),
            group: None,
            describe: "plugin command from a plugin".to_string(),
            aliases: vec![],
            flags: vec![flag_descriptor()],
            handler_ref: "index.js#run".to_string(),
            long_description: None,
            examples: vec![],
        };
        tree.register_plugin("@org/p", SchemaVersion::V3, &descriptor);

        assert!(tree.get(&["plugin".to_string()]).is_some());
        assert_eq!(
            tree.get(&["plugin".to_string()]).unwrap().origin,
            CommandOrigin::Host
        );

        let shadowed = tree
            .all()
            .into_iter()
            .find(|r| r.origin == CommandOrigin::Plugin)
            .expect("shadowed plugin command still listed");
        assert!(shadowed.shadowed);
    }

    #[test]
    fn unshadowed_plugin_command_is_registered() {
        let mut tree = CommandTree::new();
        let descriptor = CommandDescriptor {
            id: "run".to_string(),
            group: Some("task".to_string()),
            describe: "run a task".to_string(),
            aliases: vec![],
            flags: vec![],
            handler_ref: "index.js#run".to_string(),
            long_description: None,
            examples: vec![],
        };
        tree.register_plugin("@org/p", SchemaVersion::V3, &descriptor);

        let record = tree.get(&["task".to_string(), "run".to_string()]).unwrap();
        assert!(!record.shadowed);
        assert_eq!(record.origin, CommandOrigin::Plugin);
    }

    #[test]
    fn children_of_detects_group_prefix() {
        let mut tree = CommandTree::new();
        let descriptor = CommandDescriptor {
            id: "run".to_string(),
            group: Some("task".to_string()),
            describe: "run a task".to_string(),
            aliases: vec![],
            flags: vec![],
            handler_ref: "index.js#run".to_string(),
            long_description: None,
            examples: vec![],
        };
        tree.register_plugin("@org/p", SchemaVersion::V3, &descriptor);

        let children = tree.children_of(&["task".to_string()]);
        assert_eq!(children.len(), 1);
    }
}
