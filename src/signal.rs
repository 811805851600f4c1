//! Restart signals between the agent and the preview supervisor
//!
//! The persisted per-project `needs_refresh` flag records that the store has
//! moved ahead of the live sandbox. The channel wakes the consumer, and the
//! consumer only acts after atomically clearing the flag, so several raises
//! collapse into one restart and a cleared flag is never acted on twice.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::{ProjectId, ProjectStore, StoreError};

/// Producer side, cheap to clone
#[derive(Clone)]
pub struct RestartSignals {
    store: Arc<dyn ProjectStore>,
    tx: mpsc::UnboundedSender<ProjectId>,
}

/// Consumer side
pub struct RestartReceiver {
    store: Arc<dyn ProjectStore>,
    rx: mpsc::UnboundedReceiver<ProjectId>,
}

/// Create a connected signal pair over `store`
pub fn channel(store: Arc<dyn ProjectStore>) -> (RestartSignals, RestartReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        RestartSignals {
            store: store.clone(),
            tx,
        },
        RestartReceiver { store, rx },
    )
}

impl RestartSignals {
    /// Mark the project stale and wake the consumer
    pub async fn raise(&self, project_id: &ProjectId) -> Result<(), StoreError> {
        self.store.mark_needs_refresh(project_id).await?;
        if self.tx.send(project_id.clone()).is_err() {
            debug!(project_id = %project_id, "No restart consumer; flag left for the next one");
        }
        Ok(())
    }
}

impl RestartReceiver {
    /// Next project that needs a restart
    ///
    /// The flag is already cleared when this returns. `None` once every
    /// producer has been dropped.
    pub async fn next(&mut self) -> Option<ProjectId> {
        while let Some(project_id) = self.rx.recv().await {
            match self.store.take_needs_refresh(&project_id).await {
                Ok(true) => return Some(project_id),
                Ok(false) => debug!(project_id = %project_id, "Restart already handled"),
                Err(e) => warn!(project_id = %project_id, error = %e, "Could not read restart flag"),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_duplicate_raises_collapse() {
        let store: Arc<dyn ProjectStore> = Arc::new(MemoryStore::new());
        let project = store.create_project("alice", "demo").await.unwrap();
        let (signals, mut receiver) = channel(store.clone());

        signals.raise(&project.id).await.unwrap();
        signals.raise(&project.id).await.unwrap();
        drop(signals);

        assert_eq!(receiver.next().await, Some(project.id.clone()));
        assert_eq!(receiver.next().await, None);
        assert!(!store.take_needs_refresh(&project.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_raise_unknown_project_fails() {
        let store: Arc<dyn ProjectStore> = Arc::new(MemoryStore::new());
        let (signals, _receiver) = channel(store);
        let result = signals.raise(&ProjectId::from("missing")).await;
        assert!(matches!(result, Err(StoreError::ProjectNotFound(_))));
    }
}
