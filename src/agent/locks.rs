//! Per-project run locks
//!
//! One agent run per project at a time. Runs for different projects proceed
//! in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::ProjectId;

/// Mutex per project id, created on first use
#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    inner: Arc<Mutex<HashMap<ProjectId, Arc<Mutex<()>>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the project's lock; it is held until the guard is dropped
    pub async fn acquire(&self, project_id: &ProjectId) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .lock()
            .await
            .entry(project_id.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Whether a run currently holds the project's lock
    pub async fn is_locked(&self, project_id: &ProjectId) -> bool {
        match self.inner.lock().await.get(project_id) {
            Some(lock) => lock.try_lock().is_err(),
            None => false,
        }
    }
}
