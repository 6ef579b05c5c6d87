//! Shared subprocess utilities for the conversion toolchain.
//!
//! Runs a tool to completion while streaming its stdout as JSON progress
//! lines and collecting stderr, then maps the exit into a structured result:
//! success with the final `complete` line, or a typed error carrying the
//! tool's own diagnostic.

use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::types::ScriptProgressLine;
use crate::{OnnxportError, Result};

/// Outcome of a tool run that exited cleanly.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// The last `complete` line, if the tool speaks the JSON protocol
    pub completion: Option<ScriptProgressLine>,
    pub stderr: String,
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

/// Spawn `command`, stream its output, and wait for it to exit.
///
/// Blocks (asynchronously) until the process exits; there is no timeout.
pub async fn run_tool(tool: &str, mut command: Command) -> Result<ToolOutput> {
    let program = command.as_std().get_program().to_string_lossy().to_string();

    let mut child = command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(&program, e))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| OnnxportError::Other(format!("{tool}: stdout was not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| OnnxportError::Other(format!("{tool}: stderr was not captured")))?;

    let (lines, stderr_text) = tokio::join!(
        stream_progress_lines(tool, stdout),
        collect_stderr(tool, stderr)
    );

    let status = child.wait().await.map_err(|e| OnnxportError::ExternalToolFailure {
        tool: tool.to_string(),
        diagnostic: format!("process error: {e}"),
    })?;

    interpret_exit(tool, status.success(), status.code(), lines, stderr_text)
}

fn spawn_error(program: &str, err: std::io::Error) -> OnnxportError {
    if err.kind() == std::io::ErrorKind::NotFound {
        OnnxportError::MissingDependency {
            dependency: program.to_string(),
            hint: "Install Python 3 or point --python / ONNXPORT_PYTHON at an interpreter."
                .to_string(),
        }
    } else {
        OnnxportError::Io {
            message: format!("failed to spawn {program}: {err}"),
            path: None,
            source: Some(err),
        }
    }
}

/// Read stdout lines, logging progress and keeping every parsed line.
async fn stream_progress_lines<R>(tool: &str, stdout: R) -> Vec<ScriptProgressLine>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stdout).lines();
    let mut parsed = Vec::new();

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<ScriptProgressLine>(&line) {
                Ok(progress) => {
                    if !progress.is_error() && !progress.is_complete() {
                        if let Some(message) = &progress.message {
                            info!("[{}] {}", tool, message);
                        }
                    }
                    parsed.push(progress);
                }
                Err(_) => debug!("[{}] {}", tool, line),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading {} stdout: {}", tool, e);
                break;
            }
        }
    }
    parsed
}

/// Drain stderr, logging each line at debug level.
async fn collect_stderr<R>(tool: &str, stderr: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr).lines();
    let mut collected = String::new();

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                debug!("[{}] stderr: {}", tool, line);
                collected.push_str(&line);
                collected.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading {} stderr: {}", tool, e);
                break;
            }
        }
    }
    collected
}

// ---------------------------------------------------------------------------
// Exit interpretation
// ---------------------------------------------------------------------------

/// Turn a finished process into a result.
///
/// An explicit `error` line wins over the exit status. Without one, a
/// non-zero exit surfaces stderr verbatim, except that a Python
/// `No module named` failure becomes `MissingDependency`.
pub(crate) fn interpret_exit(
    tool: &str,
    success: bool,
    code: Option<i32>,
    lines: Vec<ScriptProgressLine>,
    stderr: String,
) -> Result<ToolOutput> {
    if let Some(error_line) = lines.iter().rev().find(|l| l.is_error()) {
        return Err(error_from_line(tool, error_line, &stderr));
    }

    if !success {
        if let Some(module) = missing_module(&stderr) {
            return Err(OnnxportError::MissingDependency {
                hint: format!("Install with: pip install {module}"),
                dependency: module,
            });
        }
        let diagnostic = match stderr.trim() {
            "" => format!("exited with status {}", code.unwrap_or(-1)),
            text => text.to_string(),
        };
        return Err(OnnxportError::ExternalToolFailure {
            tool: tool.to_string(),
            diagnostic,
        });
    }

    let completion = lines.into_iter().rev().find(|l| l.is_complete());
    Ok(ToolOutput { completion, stderr })
}

fn error_from_line(tool: &str, line: &ScriptProgressLine, stderr: &str) -> OnnxportError {
    let message = line
        .message
        .clone()
        .unwrap_or_else(|| stderr.trim().to_string());

    match line.kind.as_deref() {
        Some("architecture_missing") => OnnxportError::ArchitectureMissing { message },
        Some("missing_dependency") => OnnxportError::MissingDependency {
            dependency: line
                .dependency
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            hint: message,
        },
        _ => OnnxportError::ExternalToolFailure {
            tool: tool.to_string(),
            diagnostic: message,
        },
    }
}

static MISSING_MODULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"No module named '([^'.]+)").expect("missing module regex must compile")
});

/// Extract the top-level package from a Python `ModuleNotFoundError`.
fn missing_module(stderr: &str) -> Option<String> {
    MISSING_MODULE
        .captures(stderr)
        .map(|caps| caps[1].to_string())
}
