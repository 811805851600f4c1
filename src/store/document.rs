//! Per-project document shared by the store backends
//!
//! A document holds everything that belongs to one project, so deleting the
//! document cascades to files and transcript.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{complete_in_place, FileEntry, Message, MessageId, NewMessage, Project, ProjectPath, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProjectDocument {
    pub project: Project,
    #[serde(default)]
    pub files: BTreeMap<ProjectPath, String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub next_seq: u64,
}

impl ProjectDocument {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            files: BTreeMap::new(),
            messages: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn file_entries(&self) -> Vec<FileEntry> {
        self.files
            .iter()
            .map(|(path, content)| FileEntry {
                path: path.clone(),
                content: content.clone(),
            })
            .collect()
    }

    pub fn append(&mut self, message: NewMessage) -> Message {
        let seq = self.next_seq;
        self.next_seq += 1;
        let message = message.into_message(self.project.id.clone(), seq);
        self.messages.push(message.clone());
        message
    }

    pub fn complete(&mut self, message_id: &MessageId, result: &str) -> Result<(), StoreError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| &m.id == message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.clone()))?;
        complete_in_place(message, result)
    }

    pub fn take_refresh(&mut self) -> bool {
        std::mem::replace(&mut self.project.needs_refresh, false)
    }
}
