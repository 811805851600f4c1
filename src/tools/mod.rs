//! Tool registry for the coding agent
//!
//! Tools form a closed set ([`ToolKind`]). A model tool call is parsed into a
//! typed [`ToolRequest`] and dispatched with a `match`, so adding a tool is a
//! compile error until every site handles it.
//!
//! Tool failures are never raised: every handler returns a string, and
//! failures start with `Error:` so the model can react to them in-band.

mod batch;
mod exec;
mod files;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::{FunctionCall, Tool};
use crate::sandbox::SandboxError;
use crate::store::{ProjectId, ProjectStore, StoreError};

pub use batch::BatchSandbox;
pub use exec::{command_snippet, parse_command_output, CommandResult};
pub use files::{format_search, matches_file_pattern, SearchMatch};

/// Every tool the agent can call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    ReadFile,
    WriteFile,
    ListFiles,
    DeleteFile,
    SearchFiles,
    PatchFile,
    RunCode,
    ExecuteCommand,
}

impl ToolKind {
    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::ReadFile,
            ToolKind::WriteFile,
            ToolKind::ListFiles,
            ToolKind::DeleteFile,
            ToolKind::RunCode,
            ToolKind::ExecuteCommand,
            ToolKind::SearchFiles,
            ToolKind::PatchFile,
        ]
    }

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::ReadFile => "read_file",
            ToolKind::WriteFile => "write_file",
            ToolKind::ListFiles => "list_files",
            ToolKind::DeleteFile => "delete_file",
            ToolKind::SearchFiles => "search_files",
            ToolKind::PatchFile => "patch_file",
            ToolKind::RunCode => "run_code",
            ToolKind::ExecuteCommand => "execute_command",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|kind| kind.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            ToolKind::ReadFile => {
                "Read the contents of a project file. Use this to examine existing code or configuration \
                 before changing it. List files first if unsure what exists."
            }
            ToolKind::WriteFile => {
                "Create a file or completely overwrite an existing one. Parent directories are created \
                 as needed."
            }
            ToolKind::ListFiles => {
                "List every file path in the project. Call this before making assumptions about the \
                 project structure."
            }
            ToolKind::DeleteFile => "Permanently delete a file from the project.",
            ToolKind::SearchFiles => {
                "Search all project files for a case-sensitive text pattern. Returns matching lines as \
                 path:line - content."
            }
            ToolKind::PatchFile => {
                "Replace the first exact occurrence of old_content with new_content in a file. Cheaper \
                 than write_file for small edits."
            }
            ToolKind::RunCode => {
                "Execute Python code in an isolated sandbox. State persists across calls in the same \
                 batch. Cannot see project files; use the file tools for those."
            }
            ToolKind::ExecuteCommand => {
                "Run a shell command in the project directory inside the sandbox, e.g. package installs, \
                 builds or tests."
            }
        }
    }

    fn parameters(self) -> Value {
        let string = |description: &str| json!({ "type": "string", "description": description });
        match self {
            ToolKind::ReadFile => json!({
                "type": "object",
                "properties": { "path": string("Relative path, e.g. 'src/App.tsx'") },
                "required": ["path"],
            }),
            ToolKind::WriteFile => json!({
                "type": "object",
                "properties": {
                    "path": string("Relative path to write, e.g. 'src/components/Button.tsx'"),
                    "content": string("Complete file content"),
                },
                "required": ["path", "content"],
            }),
            ToolKind::ListFiles => json!({ "type": "object", "properties": {} }),
            ToolKind::DeleteFile => json!({
                "type": "object",
                "properties": { "path": string("Relative path of the file to delete") },
                "required": ["path"],
            }),
            ToolKind::SearchFiles => json!({
                "type": "object",
                "properties": {
                    "pattern": string("Text to search for, e.g. 'useState'"),
                    "file_pattern": string("Optional path filter, e.g. '*.tsx'"),
                },
                "required": ["pattern"],
            }),
            ToolKind::PatchFile => json!({
                "type": "object",
                "properties": {
                    "path": string("Relative path of the file to patch"),
                    "old_content": string("Exact text to replace, including whitespace"),
                    "new_content": string("Replacement text"),
                },
                "required": ["path", "old_content", "new_content"],
            }),
            ToolKind::RunCode => json!({
                "type": "object",
                "properties": { "code": string("Python code to execute") },
                "required": ["code"],
            }),
            ToolKind::ExecuteCommand => json!({
                "type": "object",
                "properties": { "command": string("Shell command, e.g. 'npm install zustand'") },
                "required": ["command"],
            }),
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Schema of every tool, declared to the model on each turn
pub fn definitions() -> Vec<Tool> {
    ToolKind::all()
        .iter()
        .map(|kind| Tool::function(kind.name(), kind.description(), kind.parameters()))
        .collect()
}

/// A validated tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    ListFiles,
    DeleteFile { path: String },
    SearchFiles { pattern: String, file_pattern: Option<String> },
    PatchFile { path: String, old_content: String, new_content: String },
    RunCode { code: String },
    ExecuteCommand { command: String },
}

#[derive(Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[derive(Deserialize)]
struct SearchArgs {
    pattern: String,
    #[serde(default)]
    file_pattern: Option<String>,
}

#[derive(Deserialize)]
struct PatchArgs {
    path: String,
    old_content: String,
    new_content: String,
}

#[derive(Deserialize)]
struct CodeArgs {
    code: String,
}

#[derive(Deserialize)]
struct CommandArgs {
    command: String,
}

impl ToolRequest {
    /// Parse a model tool call; the error is an `Error:` string for the model
    pub fn parse(call: &FunctionCall) -> Result<Self, String> {
        let kind = ToolKind::from_name(&call.name).ok_or_else(|| format!("Error: Unknown tool '{}'", call.name))?;

        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let args: Value =
            serde_json::from_str(raw).map_err(|e| format!("Error: Invalid JSON arguments for {}: {}", kind, e))?;

        Self::from_args(kind, args).map_err(|e| format!("Error: Invalid arguments for {}: {}", kind, e))
    }

    fn from_args(kind: ToolKind, args: Value) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            ToolKind::ReadFile => {
                let a: PathArgs = serde_json::from_value(args)?;
                ToolRequest::ReadFile { path: a.path }
            }
            ToolKind::WriteFile => {
                let a: WriteArgs = serde_json::from_value(args)?;
                ToolRequest::WriteFile {
                    path: a.path,
                    content: a.content,
                }
            }
            ToolKind::ListFiles => ToolRequest::ListFiles,
            ToolKind::DeleteFile => {
                let a: PathArgs = serde_json::from_value(args)?;
                ToolRequest::DeleteFile { path: a.path }
            }
            ToolKind::SearchFiles => {
                let a: SearchArgs = serde_json::from_value(args)?;
                ToolRequest::SearchFiles {
                    pattern: a.pattern,
                    file_pattern: a.file_pattern.filter(|p| !p.is_empty()),
                }
            }
            ToolKind::PatchFile => {
                let a: PatchArgs = serde_json::from_value(args)?;
                ToolRequest::PatchFile {
                    path: a.path,
                    old_content: a.old_content,
                    new_content: a.new_content,
                }
            }
            ToolKind::RunCode => {
                let a: CodeArgs = serde_json::from_value(args)?;
                ToolRequest::RunCode { code: a.code }
            }
            ToolKind::ExecuteCommand => {
                let a: CommandArgs = serde_json::from_value(args)?;
                ToolRequest::ExecuteCommand { command: a.command }
            }
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolRequest::ReadFile { .. } => ToolKind::ReadFile,
            ToolRequest::WriteFile { .. } => ToolKind::WriteFile,
            ToolRequest::ListFiles => ToolKind::ListFiles,
            ToolRequest::DeleteFile { .. } => ToolKind::DeleteFile,
            ToolRequest::SearchFiles { .. } => ToolKind::SearchFiles,
            ToolRequest::PatchFile { .. } => ToolKind::PatchFile,
            ToolRequest::RunCode { .. } => ToolKind::RunCode,
            ToolRequest::ExecuteCommand { .. } => ToolKind::ExecuteCommand,
        }
    }
}

/// Failure inside a handler, rendered to the model as `Error: ...`
#[derive(Debug, thiserror::Error)]
pub(crate) enum ToolError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// What a tool handler may touch
pub struct ToolContext<'a> {
    pub project_id: &'a ProjectId,
    pub user_id: &'a str,
    pub store: &'a dyn ProjectStore,
    /// Sandbox shared by every call in the current batch
    pub sandbox: &'a mut BatchSandbox,
}

/// Run one tool, always producing a result string
pub async fn execute(ctx: &mut ToolContext<'_>, request: &ToolRequest) -> String {
    let result = match request {
        ToolRequest::ReadFile { path } => files::read_file(ctx, path).await,
        ToolRequest::WriteFile { path, content } => files::write_file(ctx, path, content).await,
        ToolRequest::ListFiles => files::list_files(ctx).await,
        ToolRequest::DeleteFile { path } => files::delete_file(ctx, path).await,
        ToolRequest::SearchFiles { pattern, file_pattern } => {
            files::search_files(ctx, pattern, file_pattern.as_deref()).await
        }
        ToolRequest::PatchFile {
            path,
            old_content,
            new_content,
        } => files::patch_file(ctx, path, old_content, new_content).await,
        ToolRequest::RunCode { code } => exec::run_code(ctx, code).await,
        ToolRequest::ExecuteCommand { command } => exec::execute_command(ctx, command).await,
    };
    result.unwrap_or_else(|e| format!("Error: {}", e))
}

/// Parse and run a raw model tool call
pub async fn dispatch(ctx: &mut ToolContext<'_>, call: &FunctionCall) -> String {
    match ToolRequest::parse(call) {
        Ok(request) => execute(ctx, &request).await,
        Err(message) => message,
    }
}
