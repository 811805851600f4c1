//! Persisted project store
//!
//! The store is the single source of truth for projects, their files and the
//! conversation transcript. Sandboxes are always rebuilt from it.
//!
//! # Backends
//!
//! - [`MemoryStore`] - in-process maps (`memory://`)
//! - [`JsonStore`] - one JSON document per project on disk (`file://<dir>`)

mod document;
pub mod import;
pub mod json;
pub mod memory;
pub mod model;
pub mod path;

use std::sync::Arc;

use async_trait::async_trait;

pub use import::import_dir;
pub use json::JsonStore;
pub use memory::MemoryStore;
pub use model::{
    FileEntry, InvocationState, Message, MessageId, NewMessage, Project, ProjectId, Role,
    TemplateKind, ToolInvocation,
};
pub use path::ProjectPath;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("message {0} not found")]
    MessageNotFound(MessageId),
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("tool invocation {0} is already completed")]
    InvalidTransition(MessageId),
    #[error("unsupported store url '{0}'")]
    UnsupportedUrl(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Durable storage for projects, files and transcripts
///
/// All file operations take a [`ProjectPath`], which is already normalized,
/// so two spellings of the same path can never be stored separately.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(&self, owner: &str, title: &str) -> Result<Project, StoreError>;

    async fn get_project(&self, id: &ProjectId) -> Result<Option<Project>, StoreError>;

    /// Projects owned by `owner`, newest first
    async fn list_projects(&self, owner: &str) -> Result<Vec<Project>, StoreError>;

    /// Delete a project together with its files and transcript
    async fn delete_project(&self, id: &ProjectId) -> Result<(), StoreError>;

    async fn set_template(&self, id: &ProjectId, template: TemplateKind) -> Result<(), StoreError>;

    async fn mark_needs_refresh(&self, id: &ProjectId) -> Result<(), StoreError>;

    /// Atomically clear the refresh flag, returning its previous value
    async fn take_needs_refresh(&self, id: &ProjectId) -> Result<bool, StoreError>;

    async fn read_file(&self, id: &ProjectId, path: &ProjectPath) -> Result<Option<String>, StoreError>;

    /// Insert or replace the whole content of a file
    async fn write_file(&self, id: &ProjectId, path: &ProjectPath, content: &str) -> Result<(), StoreError>;

    /// Remove a file; returns false when there was nothing to remove
    async fn delete_file(&self, id: &ProjectId, path: &ProjectPath) -> Result<bool, StoreError>;

    /// All files of the project, ordered by path
    async fn list_files(&self, id: &ProjectId) -> Result<Vec<FileEntry>, StoreError>;

    async fn append_message(&self, id: &ProjectId, message: NewMessage) -> Result<Message, StoreError>;

    /// Move a pending tool log entry to `Completed`
    async fn complete_tool_invocation(
        &self,
        id: &ProjectId,
        message_id: &MessageId,
        result: &str,
    ) -> Result<(), StoreError>;

    /// Transcript in creation order
    async fn list_messages(&self, id: &ProjectId) -> Result<Vec<Message>, StoreError>;
}

/// Open a store from its connection URL
///
/// `memory://` gives a fresh in-memory store; `file:///var/lib/codeagent` or a
/// bare directory path gives a [`JsonStore`].
pub fn open_store(url: &str) -> Result<Arc<dyn ProjectStore>, StoreError> {
    if url == "memory://" || url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if let Some(dir) = url.strip_prefix("file://") {
        return Ok(Arc::new(JsonStore::new(dir)?));
    }
    if url.contains("://") {
        return Err(StoreError::UnsupportedUrl(url.to_string()));
    }
    Ok(Arc::new(JsonStore::new(url)?))
}

/// Apply a pending → completed transition to a transcript entry
pub(crate) fn complete_in_place(message: &mut Message, result: &str) -> Result<(), StoreError> {
    match message.tool.as_mut() {
        Some(tool) if tool.state == InvocationState::Pending => {
            tool.state = InvocationState::Completed {
                result: result.to_string(),
            };
            Ok(())
        }
        _ => Err(StoreError::InvalidTransition(message.id.clone())),
    }
}
