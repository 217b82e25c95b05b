//! Path resolution (§4.6): exact match, group detection, and progressive
//! shortening fallback.

use super::tree::{CommandRecord, CommandTree};

pub enum Resolution<'a> {
    /// A dispatchable command, plus any path segments that were peeled off
    /// as positional args during progressive shortening.
    Command(&'a CommandRecord, Vec<String>),
    /// The path names a group (it prefixes other registered commands) but
    /// isn't itself dispatchable.
    Group(Vec<&'a CommandRecord>),
    NotFound,
}

/// Resolve a normalized command path against `tree`, per §4.6: try the full
/// path; if it names a group, stop there; otherwise progressively shorten,
/// treating each removed suffix segment as a positional, until a
/// non-shadowed command matches or the path is exhausted.
pub fn resolve<'a>(tree: &'a CommandTree, cmd_path: &[String]) -> Resolution<'a> {
    if cmd_path.is_empty() {
        return Resolution::NotFound;
    }

    let mut path = cmd_path.to_vec();
    let mut peeled: Vec<String> = Vec::new();

    loop {
        if let Some(record) = tree.get(&path) {
            if !record.shadowed {
                let mut extra = peeled.clone();
                extra.reverse();
                return Resolution::Command(record, extra);
            }
        }

        let children = tree.children_of(&path);
        if !children.is_empty() {
            return Resolution::Group(children);
        }

        if path.len() <= 1 {
            break;
        }
        peeled.push(path.pop().expect("len > 1 checked above"));
    }

    Resolution::NotFound
}
