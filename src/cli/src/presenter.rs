//! Output rendering: the only place in the CLI that touches stdout/stderr
//! directly (§9 "Presenter dependency" — core never prints). Two formats:
//! a human table (default) and the `--json` structured envelope (§10.5),
//! which is used for both success and error paths.

use colored::*;
use kbhost_core::command::CommandRecord;
use kbhost_core::error::HostError;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        }
    }
}

/// `{ok:true, data, warnings?}` on success (§10.5), a rendered table otherwise.
pub fn print_success(format: OutputFormat, data: &Value, warnings: &[String]) {
    match format {
        OutputFormat::Json => {
            let mut envelope = serde_json::json!({ "ok": true, "data": data });
            if !warnings.is_empty() {
                envelope["warnings"] = serde_json::to_value(warnings).unwrap_or(Value::Null);
            }
            println!("{}", serde_json::to_string_pretty(&envelope).unwrap_or_default());
        }
        OutputFormat::Table => {
            for warning in warnings {
                eprintln!("{} {}", "[WARN]".yellow().bold(), warning);
            }
            println!("{}", render_table(data));
        }
    }
}

/// `{ok:false, error:{code,message,details?}}` (§7): every error path, in
/// either format, emits exactly one of these.
pub fn print_error(format: OutputFormat, err: &HostError) {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&err.to_envelope()).unwrap_or_default());
        }
        OutputFormat::Table => {
            eprintln!("{} {} {}", "[ERROR]".red().bold(), err.kind.as_str().dimmed(), err.message);
        }
    }
}

/// Rendered when a path resolves to a group rather than a command (§4.6).
pub fn print_group_help(format: OutputFormat, path: &[String], children: &[CommandRecord]) {
    match format {
        OutputFormat::Json => {
            let data = serde_json::json!({
                "group": path.join(" "),
                "commands": children,
            });
            print_success(format, &data, &[]);
        }
        OutputFormat::Table => {
            println!();
            println!("{}", format!("{} <command>", path.join(" ")).bold());
            println!();
            for child in children {
                let shadow = if child.shadowed { " (shadowed)".dimmed().to_string() } else { String::new() };
                println!("  {:<24} {}{}", child.path.join(" ").cyan(), child.describe, shadow);
            }
            println!();
        }
    }
}

fn render_table(value: &Value) -> String {
    match value {
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
            let headers: Vec<String> = items[0].as_object().unwrap().keys().cloned().collect();
            let mut builder = Builder::default();
            builder.push_record(headers.iter().cloned());
            for item in items {
                let obj = item.as_object().unwrap();
                let row: Vec<String> = headers.iter().map(|h| scalar(obj.get(h))).collect();
                builder.push_record(row);
            }
            builder.build().with(Style::rounded()).to_string()
        }
        Value::Array(items) if items.is_empty() => "No results found.".dimmed().to_string(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("  {}: {}", k.cyan(), scalar(Some(v))))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => scalar(Some(other)),
    }
}

fn scalar(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string(),
        Some(v) => serde_json::to_string(v).unwrap_or_default(),
    }
}
