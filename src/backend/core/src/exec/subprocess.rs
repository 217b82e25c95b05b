//! Subprocess execution backend: spawns a child bound to stdio, speaks the
//! newline-delimited JSON frame protocol of §6, and enforces `timeoutMs`
//! with a grace period before a forceful kill (§5).

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{ExecutionBackend, ExecutionRequest, ExecutionResult};

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum HostFrame<'a> {
    Invoke {
        descriptor: &'a super::ExecutionDescriptor,
        #[serde(rename = "handlerRef")]
        handler_ref: &'a str,
        input: &'a crate::plugins::HandlerInput,
        #[serde(rename = "pluginRoot")]
        plugin_root: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ChildFrame {
    Progress {
        #[serde(default)]
        stage: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        percent: Option<f64>,
    },
    Result {
        ok: bool,
        #[serde(default)]
        data: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<crate::plugins::HandlerErrorPayload>,
    },
}

pub struct SubprocessBackend {
    /// The interpreter/runtime invoked to run a plugin's entrypoint file,
    /// e.g. `node`. The plugin's `handlerRef` file is passed as the first
    /// argument and the manifest's runtime kind picked the interpreter.
    program: String,
    default_timeout_ms: u64,
    grace_period: std::time::Duration,
}

impl SubprocessBackend {
    pub fn new(program: impl Into<String>, default_timeout_ms: u64, grace_period_ms: u64) -> Self {
        Self {
            program: program.into(),
            default_timeout_ms,
            grace_period: std::time::Duration::from_millis(grace_period_ms),
        }
    }
}

#[async_trait]
impl ExecutionBackend for SubprocessBackend {
    async fn execute(&self, request: ExecutionRequest, cancel: CancellationToken) -> ExecutionResult {
        let started = Instant::now();
        let timeout_ms = request.timeout_ms.unwrap_or(self.default_timeout_ms);

        let entry_file = request.handler_ref.split('#').next().unwrap_or("");
        let mut child = match Command::new(&self.program)
            .arg(request.plugin_root.join(entry_file))
            .current_dir(&request.plugin_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::err("E_EXEC_FAILED", format!("failed to spawn subprocess: {e}"), started.elapsed());
            }
        };

        let Some(mut stdin) = child.stdin.take() else {
            return ExecutionResult::err("E_EXEC_FAILED", "subprocess stdin unavailable", started.elapsed());
        };
        let Some(stdout) = child.stdout.take() else {
            return ExecutionResult::err("E_EXEC_FAILED", "subprocess stdout unavailable", started.elapsed());
        };

        let frame = HostFrame::Invoke {
            descriptor: &request.descriptor,
            handler_ref: &request.handler_ref,
            input: &request.input,
            plugin_root: request.plugin_root.display().to_string(),
        };
        let Ok(mut line) = serde_json::to_string(&frame) else {
            return ExecutionResult::err("E_EXEC_FAILED", "failed to encode invoke frame", started.elapsed());
        };
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            return ExecutionResult::err("E_EXEC_FAILED", format!("failed to write invoke frame: {e}"), started.elapsed());
        }

        let mut reader = BufReader::new(stdout).lines();

        let read_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), read_until_result(&mut reader)) => {
                outcome.ok().flatten()
            }
        };

        match read_result {
            Some(ChildFrame::Result { ok: true, data, .. }) => {
                let _ = child.kill().await;
                ExecutionResult::ok(data.unwrap_or(serde_json::Value::Null), started.elapsed())
            }
            Some(ChildFrame::Result { ok: false, error, .. }) => {
                let _ = child.kill().await;
                let error = error.unwrap_or_else(|| crate::plugins::HandlerErrorPayload {
                    code: "E_EXEC_FAILED".to_string(),
                    message: "subprocess reported failure without an error payload".to_string(),
                });
                ExecutionResult::err(error.code, error.message, started.elapsed())
            }
            Some(ChildFrame::Progress { .. }) | None => {
                terminate_with_grace(&mut child, self.grace_period).await;
                ExecutionResult::timed_out(started.elapsed())
            }
        }
    }
}

async fn read_until_result(
    reader: &mut tokio::io::Lines<BufReader<tokio::process::ChildStdout>>,
) -> Option<ChildFrame> {
    loop {
        let line = reader.next_line().await.ok()??;
        match serde_json::from_str::<ChildFrame>(&line) {
            Ok(frame @ ChildFrame::Result { .. }) => return Some(frame),
            Ok(ChildFrame::Progress { .. }) => continue,
            Err(_) => continue,
        }
    }
}

/// Send the platform shutdown signal implicitly via `kill()` after waiting
/// out the grace period, matching §5's "forceful after a grace period".
async fn terminate_with_grace(child: &mut tokio::process::Child, grace_period: std::time::Duration) {
    tokio::select! {
        _ = tokio::time::sleep(grace_period) => {
            let _ = child.kill().await;
        }
        _ = child.wait() => {}
    }
}
