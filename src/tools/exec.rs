//! Sandbox-backed tools: run_code and execute_command
//!
//! Both go through the sandbox's code-execution primitive. Shell commands are
//! wrapped in a small Python `subprocess.run` cell whose printed output is
//! parsed back into stdout, stderr and the exit status.

use serde::Serialize;
use tracing::debug;

use super::{ToolContext, ToolError};
use crate::sandbox::{CodeExecution, APP_ROOT};

pub(super) async fn run_code(ctx: &mut ToolContext<'_>, code: &str) -> Result<String, ToolError> {
    let sandbox = ctx.sandbox.acquire().await?;
    let execution = sandbox.run_code(code).await?;
    debug!(sandbox_id = %sandbox.id(), error = ?execution.error, "run_code finished");
    Ok(serde_json::to_string(&execution).unwrap_or_default())
}

pub(super) async fn execute_command(ctx: &mut ToolContext<'_>, command: &str) -> Result<String, ToolError> {
    let sandbox = ctx.sandbox.acquire().await?;
    let execution = sandbox.run_code(&command_snippet(command)).await?;
    let result = parse_command_output(&execution);
    debug!(sandbox_id = %sandbox.id(), command, exit_code = ?result.exit_code, "execute_command finished");
    Ok(serde_json::to_string(&result).unwrap_or_default())
}

/// Python cell that runs `command` in a shell and prints its captured output
///
/// The command is embedded as a JSON string literal, which Python parses as
/// the same string. It runs from the app root when that exists.
pub fn command_snippet(command: &str) -> String {
    let literal = serde_json::to_string(command).unwrap_or_else(|_| "\"\"".to_string());
    format!(
        "import os, subprocess\n\
         __cmd = {literal}\n\
         __cwd = \"{root}\" if os.path.isdir(\"{root}\") else None\n\
         __result = subprocess.run(__cmd, shell=True, capture_output=True, text=True, cwd=__cwd)\n\
         print(f\"STDOUT:\\n{{__result.stdout}}\")\n\
         print(f\"STDERR:\\n{{__result.stderr}}\")\n\
         print(f\"EXIT_CODE: {{__result.returncode}}\")\n",
        literal = literal,
        root = APP_ROOT,
    )
}

/// Parsed result of a wrapped shell command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the wrapper did not get as far as printing it
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// Split the wrapper's printed output back into its parts
pub fn parse_command_output(execution: &CodeExecution) -> CommandResult {
    let raw = execution.stdout.as_str();
    let parsed = raw.strip_prefix("STDOUT:\n").and_then(|body| {
        let exit_at = body.rfind("\nEXIT_CODE: ")?;
        let exit_code = body[exit_at + "\nEXIT_CODE: ".len()..].trim().parse::<i32>().ok()?;
        let streams = &body[..exit_at];
        let stderr_at = streams.rfind("\nSTDERR:\n")?;
        Some((
            streams[..stderr_at].to_string(),
            streams[stderr_at + "\nSTDERR:\n".len()..].to_string(),
            exit_code,
        ))
    });

    match parsed {
        Some((stdout, stderr, exit_code)) => CommandResult {
            stdout,
            stderr,
            exit_code: Some(exit_code),
            error: execution.error.clone(),
        },
        None => CommandResult {
            stdout: raw.to_string(),
            stderr: execution.stderr.clone(),
            exit_code: None,
            error: execution.error.clone(),
        },
    }
}
