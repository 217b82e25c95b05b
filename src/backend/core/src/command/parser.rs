//! Argv parser (§4.6): turns raw CLI arguments into a normalized command
//! path, positional args, global flags, and a flag map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flags recognized at every level and forwarded to every command (§4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFlags {
    pub help: bool,
    pub version: bool,
    pub json: bool,
    pub quiet: bool,
    pub debug: bool,
    pub verbose: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    pub no_color: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedArgs {
    pub cmd_path: Vec<String>,
    pub rest: Vec<String>,
    pub global: GlobalFlags,
    pub flags_obj: HashMap<String, Value>,
}

/// Parse a raw argv slice (already stripped of the program name).
///
/// Supports `--flag`, `--flag=value`, `--flag value`, `--no-flag` (only
/// meaningful for booleans defaulting false), and a `--` terminator after
/// which everything is positional and excluded from the command path. A
/// single pre-terminator positional with ≥3 colon-separated segments
/// (`a:b:c`) is split into path segments directly; otherwise every
/// pre-terminator positional becomes a path candidate, and the command
/// tree's progressive shortening (`resolver::resolve`) decides where the
/// path ends and the command's own positional arguments begin.
pub fn parse(argv: &[String]) -> ParsedArgs {
    let mut positionals: Vec<String> = Vec::new();
    let mut literal: Vec<String> = Vec::new();
    let mut flags_obj: HashMap<String, Value> = HashMap::new();
    let mut global = GlobalFlags::default();
    let mut terminated = false;

    let mut i = 0;
    while i < argv.len() {
        let arg = &argv[i];

        if terminated {
            literal.push(arg.clone());
            i += 1;
            continue;
        }

        if arg == "--" {
            terminated = true;
            i += 1;
            continue;
        }

        if let Some(body) = arg.strip_prefix("--") {
            let (name, inline_value) = match body.split_once('=') {
                Some((n, v)) => (n.to_string(), Some(v.to_string())),
                None => (body.to_string(), None),
            };

            let (name, value) = if is_literal_name(&name) {
                let (value, consumed) = resolve_value(inline_value, argv.get(i + 1));
                if consumed {
                    i += 1;
                }
                (name, value)
            } else if let Some(negated) = name.strip_prefix("no-") {
                (negated.to_string(), Value::Bool(false))
            } else {
                let (value, consumed) = resolve_value(inline_value, argv.get(i + 1));
                if consumed {
                    i += 1;
                }
                (name, value)
            };

            apply_global(&mut global, &name, &value);
            flags_obj.insert(name, value);
            i += 1;
            continue;
        }

        positionals.push(arg.clone());
        i += 1;
    }

    let cmd_path = split_path(&mut positionals);
    let mut rest = positionals;
    rest.extend(literal);

    ParsedArgs {
        cmd_path,
        rest,
        global,
        flags_obj,
    }
}

/// Flag names that are `no-`-prefixed in their own right rather than a
/// negation of a positive counterpart (there is no `--color` flag), so the
/// generic `no-`-prefix negation must not strip and relookup these.
fn is_literal_name(name: &str) -> bool {
    matches!(name, "no-color")
}

/// Determine a flag's value from an inline (`--flag=value`) form or the
/// next argv token, defaulting to `true` when neither is present. Returns
/// whether the next token was consumed as the value.
fn resolve_value(inline_value: Option<String>, next: Option<&String>) -> (Value, bool) {
    if let Some(v) = inline_value {
        return (coerce_scalar(&v), false);
    }
    match next {
        Some(n) if !n.starts_with("--") => (coerce_scalar(n), true),
        _ => (Value::Bool(true), false),
    }
}

/// Turn the collected pre-terminator positionals into path candidates: a
/// single `a:b:c` positional (≥3 segments) becomes `[a, b, c]`; otherwise
/// every positional is handed to the resolver as a path candidate and
/// progressively shortened there until a registered command matches.
fn split_path(positionals: &mut Vec<String>) -> Vec<String> {
    if let Some(first) = positionals.first() {
        let segments: Vec<&str> = first.split(':').collect();
        if segments.len() >= 3 {
            let path = segments.into_iter().map(String::from).collect();
            positionals.remove(0);
            return path;
        }
    }
    std::mem::take(positionals)
}

fn coerce_scalar(raw: &str) -> Value {
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::Number(n.into());
    }
    if let Ok(n) = raw.parse::<f64>() {
        if let Some(num) = serde_json::Number::from_f64(n) {
            return Value::Number(num);
        }
    }
    Value::String(raw.to_string())
}

fn apply_global(global: &mut GlobalFlags, name: &str, value: &Value) {
    let as_bool = || value.as_bool().unwrap_or(true);
    match name {
        "help" => global.help = as_bool(),
        "version" => global.version = as_bool(),
        "json" => global.json = as_bool(),
        "quiet" => global.quiet = as_bool(),
        "debug" => global.debug = as_bool(),
        "verbose" => global.verbose = as_bool(),
        "no-color" | "noColor" => global.no_color = as_bool(),
        "log-level" | "logLevel" => {
            global.log_level = value.as_str().map(String::from);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(words: &[&str]) -> Vec<String> {
        words.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plain_flag_sets_true() {
        let parsed = parse(&argv(&["plugin", "list", "--json"]));
        assert!(parsed.global.json);
        assert_eq!(parsed.cmd_path, vec!["plugin", "list"]);
        assert!(parsed.rest.is_empty());
    }

    #[test]
    fn flag_equals_value() {
        let parsed = parse(&argv(&["run", "--log-level=debug"]));
        assert_eq!(parsed.global.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn flag_space_value() {
        let parsed = parse(&argv(&["run", "--log-level", "debug"]));
        assert_eq!(parsed.global.log_level.as_deref(), Some("debug"));
        assert_eq!(parsed.flags_obj.get("log-level"), Some(&Value::String("debug".into())));
    }

    #[test]
    fn no_color_is_a_literal_flag_not_a_negation() {
        let parsed = parse(&argv(&["run", "--no-color"]));
        assert!(parsed.global.no_color);
    }

    #[test]
    fn no_prefix_negates_other_booleans() {
        let parsed = parse(&argv(&["run", "--verbose", "--no-verbose"]));
        assert!(!parsed.global.verbose);
        assert_eq!(parsed.flags_obj.get("verbose"), Some(&Value::Bool(false)));
    }

    #[test]
    fn terminator_stops_flag_parsing() {
        let parsed = parse(&argv(&["run", "--", "--json"]));
        assert_eq!(parsed.cmd_path, vec!["run"]);
        assert_eq!(parsed.rest, vec!["--json"]);
        assert!(!parsed.global.json);
    }

    #[test]
    fn three_segment_colon_path_splits() {
        let parsed = parse(&argv(&["a:b:c", "x"]));
        assert_eq!(parsed.cmd_path, vec!["a", "b", "c"]);
        assert_eq!(parsed.rest, vec!["x"]);
    }

    #[test]
    fn two_segment_colon_form_stays_atomic() {
        let parsed = parse(&argv(&["a:b"]));
        assert_eq!(parsed.cmd_path, vec!["a:b"]);
        assert!(parsed.rest.is_empty());
    }
}
