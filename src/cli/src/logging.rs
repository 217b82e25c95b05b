//! Tracing subscriber bootstrap (§10.1): level from `LOG_LEVEL`/global flags,
//! compact line-oriented output when `--json` is set or stdout isn't a TTY so
//! log lines never corrupt machine-readable command output.

use std::io::IsTerminal;

use kbhost_core::command::GlobalFlags;

pub fn init(global: &GlobalFlags) {
    let level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| global.log_level.clone())
        .unwrap_or_else(|| {
            if global.debug || global.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let no_color = global.no_color || std::env::var("NO_COLOR").is_ok();
    if no_color {
        colored::control::set_override(false);
    }

    let machine_readable = global.json || !std::io::stdout().is_terminal();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!no_color)
        .with_target(false)
        .with_writer(std::io::stderr);

    if machine_readable {
        builder.compact().without_time().init();
    } else {
        builder.init();
    }
}
