//! Registry of projects that currently have a serving preview sandbox

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::store::ProjectId;

/// Shared map of project id → live sandbox id
///
/// Written by the preview supervisor, read by agent tool batches so that
/// commands run inside the same environment the user is previewing.
#[derive(Debug, Clone, Default)]
pub struct LiveSandboxes {
    inner: Arc<RwLock<HashMap<ProjectId, String>>>,
}

impl LiveSandboxes {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish(&self, project_id: &ProjectId, sandbox_id: &str) {
        self.inner
            .write()
            .await
            .insert(project_id.clone(), sandbox_id.to_string());
    }

    pub async fn remove(&self, project_id: &ProjectId) -> Option<String> {
        self.inner.write().await.remove(project_id)
    }

    pub async fn get(&self, project_id: &ProjectId) -> Option<String> {
        self.inner.read().await.get(project_id).cloned()
    }
}
