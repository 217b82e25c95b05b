//! Argv parsing, the command tree, and path resolution (§4.6).

pub mod parser;
pub mod resolver;
pub mod tree;

pub use parser::{parse, GlobalFlags, ParsedArgs};
pub use resolver::Resolution;
pub use tree::{CommandOrigin, CommandRecord, CommandTree};

use crate::error::{HostError, HostErrorKind};

/// What dispatch needs to hand off to the execution backend: the matched
/// record, the flags collected by the parser merged with any positionals
/// peeled off during path shortening, and the raw argv tail.
#[derive(Debug, Clone)]
pub struct ResolvedInvocation {
    pub record: CommandRecord,
    pub argv: Vec<String>,
    pub global: GlobalFlags,
}

/// End-to-end parse + resolve, returning either a dispatchable invocation,
/// a signal to render group help, or `CMD_NOT_FOUND` (§4.6).
pub enum DispatchOutcome {
    Invoke(ResolvedInvocation),
    GroupHelp(Vec<CommandRecord>),
}

pub fn dispatch(tree: &CommandTree, argv: &[String]) -> Result<DispatchOutcome, HostError> {
    let parsed = parse(argv);

    match resolver::resolve(tree, &parsed.cmd_path) {
        Resolution::Command(record, mut peeled) => {
            peeled.extend(parsed.rest.clone());
            Ok(DispatchOutcome::Invoke(ResolvedInvocation {
                record: record.clone(),
                argv: peeled,
                global: parsed.global,
            }))
        }
        Resolution::Group(children) => Ok(DispatchOutcome::GroupHelp(
            children.into_iter().cloned().collect(),
        )),
        Resolution::NotFound => Err(HostError::new(
            HostErrorKind::ECmdNotFound,
            format!("no such command: {}", parsed.cmd_path.join(" "))
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::manifest::{CommandDescriptor, SchemaVersion};

    #[test]
    fn dispatch_resolves_registered_plugin_command() {
        let mut tree = CommandTree::new();
        tree.register_plugin(
            "@o/p",
            SchemaVersion::V3,
            &CommandDescriptor {
                id: "run".to_string(),
                group: Some("task".to_string()),
                describe: "d".to_string(),
                aliases: vec![],
                flags: vec![],
                handler_ref: "i.js#run".to_string(),
                long_description: None,
                examples: vec![],
            },
        );

        let argv = vec!["task".to_string(), "run".to_string(), "--json".to_string()];
        match dispatch(&tree, &argv).unwrap() {
            DispatchOutcome::Invoke(invocation) => {
                assert!(invocation.global.json);
                assert_eq!(invocation.record.path, vec!["task", "run"]);
            }
            _ => panic!("expected invoke"),
        }
    }

    #[test]
    fn dispatch_reports_cmd_not_found() {
        let tree = CommandTree::new();
        let argv = vec!["nope".to_string()];
        let err = dispatch(&tree, &argv).unwrap_err();
        assert_eq!(err.kind, HostErrorKind::ECmdNotFound);
    }
}
