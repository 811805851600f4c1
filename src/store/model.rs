//! Persisted entities: projects, files and transcript entries

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ProjectPath;

/// Project identifier (UUIDv7, time-sortable)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transcript entry identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scaffolded application type
///
/// Determines the system prompt phrasing and the dev-server port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    /// React + Vite
    #[default]
    React,
    /// Next.js (App Router)
    #[serde(rename = "nextjs")]
    NextJs,
}

impl TemplateKind {
    /// Port the dev server listens on inside the sandbox
    pub fn port(self) -> u16 {
        match self {
            TemplateKind::React => 5173,
            TemplateKind::NextJs => 3000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TemplateKind::React => "react",
            TemplateKind::NextJs => "nextjs",
        }
    }

    /// Human-readable framework label
    pub fn framework(self) -> &'static str {
        match self {
            TemplateKind::React => "React 19+ with Vite",
            TemplateKind::NextJs => "Next.js 16+ (App Router)",
        }
    }
}

impl std::str::FromStr for TemplateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "react" => Ok(TemplateKind::React),
            "nextjs" | "next" | "next.js" => Ok(TemplateKind::NextJs),
            other => Err(format!("unknown template kind '{}'", other)),
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-owned project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Owner identity (opaque user id from the auth collaborator)
    pub owner: String,
    pub title: String,
    pub created_at_ms: u64,
    /// Unset until the template has been chosen
    #[serde(default)]
    pub template: Option<TemplateKind>,
    /// Live environment is stale relative to the store
    #[serde(default)]
    pub needs_refresh: bool,
}

impl Project {
    pub fn new(owner: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: ProjectId::generate(),
            owner: owner.into(),
            title: title.into(),
            created_at_ms: now_ms(),
            template: None,
            needs_refresh: false,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner == user_id
    }

    /// Template kind, defaulting to React when unset
    pub fn template_kind(&self) -> TemplateKind {
        self.template.unwrap_or_default()
    }
}

/// One file of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: ProjectPath,
    pub content: String,
}

/// Transcript entry author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    /// Tool invocation log written by the agent loop
    SystemLog,
}

/// Lifecycle of a logged tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InvocationState {
    Pending,
    Completed { result: String },
}

/// Tool invocation attached to a system-log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(flatten)]
    pub state: InvocationState,
}

impl ToolInvocation {
    pub fn pending(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            state: InvocationState::Pending,
        }
    }

    pub fn result(&self) -> Option<&str> {
        match &self.state {
            InvocationState::Pending => None,
            InvocationState::Completed { result } => Some(result),
        }
    }
}

/// A transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub project_id: ProjectId,
    pub role: Role,
    /// User id the entry is attributed to
    pub author: String,
    pub content: String,
    pub created_at_ms: u64,
    /// Monotonic per-project sequence, defines transcript order
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolInvocation>,
}

/// Fields supplied when appending to the transcript
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub author: String,
    pub content: String,
    pub tool: Option<ToolInvocation>,
}

impl NewMessage {
    pub fn user(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            author: author.into(),
            content: content.into(),
            tool: None,
        }
    }

    pub fn assistant(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            author: author.into(),
            content: content.into(),
            tool: None,
        }
    }

    /// Pending tool log entry
    pub fn tool_log(author: impl Into<String>, name: &str, arguments: serde_json::Value) -> Self {
        Self {
            role: Role::SystemLog,
            author: author.into(),
            content: format!("Executing tool: {}", name),
            tool: Some(ToolInvocation::pending(name, arguments)),
        }
    }

    pub(crate) fn into_message(self, project_id: ProjectId, seq: u64) -> Message {
        Message {
            id: MessageId::generate(),
            project_id,
            role: self.role,
            author: self.author,
            content: self.content,
            created_at_ms: now_ms(),
            seq,
            tool: self.tool,
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
