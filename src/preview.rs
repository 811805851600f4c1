//! Preview supervisor
//!
//! Owns the live sandbox of every previewed project and keeps it in step with
//! the store: restart signals trigger a hot restart, and a failed or slow hot
//! restart falls back to stopping the sandbox and building a fresh one.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::metrics::RESTART_FALLBACKS;
use crate::sandbox::{preview_url, LiveSandboxes, SandboxError, SandboxHandle, SandboxManager, StopOutcome};
use crate::signal::RestartReceiver;
use crate::store::{ProjectId, ProjectPath, ProjectStore, StoreError, TemplateKind};

/// Error type for preview operations
#[derive(Debug, thiserror::Error)]
pub enum PreviewError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("user does not own project {0}")]
    Unauthorized(ProjectId),
    #[error("no live preview for project {0}")]
    NotRunning(ProjectId),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Timing for the restart path
#[derive(Debug, Clone)]
pub struct PreviewSettings {
    /// Budget for one hot restart before falling back
    pub restart_timeout: Duration,
    /// Pause between stopping a broken sandbox and creating its replacement
    pub fallback_delay: Duration,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            restart_timeout: Duration::from_secs(120),
            fallback_delay: Duration::from_secs(2),
        }
    }
}

/// Where a project's preview can be reached
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewInfo {
    pub sandbox_id: String,
    pub port: u16,
    pub url: String,
    pub template: TemplateKind,
}

/// Result of writing a user edit through to the live sandbox
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Stored and written into the live sandbox
    Synced,
    /// Stored; no live sandbox to update
    NotLive,
    /// Stored, but the live write failed
    SyncFailed(String),
}

type Slot = Arc<Mutex<Option<SandboxHandle>>>;

/// Keeps previewed projects' sandboxes serving the current store contents
pub struct PreviewSupervisor {
    manager: Arc<SandboxManager>,
    store: Arc<dyn ProjectStore>,
    live: LiveSandboxes,
    settings: PreviewSettings,
    slots: Mutex<HashMap<ProjectId, Slot>>,
}

impl PreviewSupervisor {
    pub fn new(
        manager: Arc<SandboxManager>,
        store: Arc<dyn ProjectStore>,
        live: LiveSandboxes,
        settings: PreviewSettings,
    ) -> Self {
        Self {
            manager,
            store,
            live,
            settings,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registry of live sandbox ids, shared with agent tool batches
    pub fn live(&self) -> &LiveSandboxes {
        &self.live
    }

    async fn slot(&self, project_id: &ProjectId) -> Slot {
        self.slots
            .lock()
            .await
            .entry(project_id.clone())
            .or_default()
            .clone()
    }

    fn info(&self, handle: &SandboxHandle) -> PreviewInfo {
        let template = handle.template.unwrap_or_default();
        let port = handle.port.unwrap_or_else(|| template.port());
        PreviewInfo {
            sandbox_id: handle.id.clone(),
            port,
            url: preview_url(&handle.id, port, self.manager.domain()),
            template,
        }
    }

    /// Current preview of a project, if one is serving
    pub async fn status(&self, project_id: &ProjectId) -> Option<PreviewInfo> {
        let slot = self.slot(project_id).await;
        let guard = slot.lock().await;
        guard.as_ref().filter(|h| h.is_serving()).map(|h| self.info(h))
    }

    /// Bring a project's preview up, reusing its sandbox when it is still reachable
    pub async fn start(&self, project_id: &ProjectId) -> Result<PreviewInfo, PreviewError> {
        let slot = self.slot(project_id).await;
        let mut guard = slot.lock().await;

        let known = guard.as_ref().map(|h| h.id.clone());
        let (mut handle, recreated) = self.manager.connect_or_recreate(known.as_deref()).await?;

        if !handle.is_serving() {
            if let Err(e) = self.manager.provision(&mut handle, project_id).await {
                if let Err(stop_err) = self.manager.stop(&mut handle).await {
                    warn!(sandbox_id = %handle.id, error = %stop_err, "Failed to stop sandbox after provisioning failure");
                }
                *guard = None;
                self.live.remove(project_id).await;
                return Err(e.into());
            }
        }

        let info = self.info(&handle);
        self.live.publish(project_id, &handle.id).await;
        info!(
            project_id = %project_id,
            sandbox_id = %info.sandbox_id,
            url = %info.url,
            recreated,
            "Preview serving"
        );
        *guard = Some(handle);
        Ok(info)
    }

    /// Resynchronize a live preview with the store
    ///
    /// Tries a hot restart first. On failure or timeout the sandbox is stopped
    /// and, after a short pause, rebuilt from scratch; if that also fails the
    /// project is left without a sandbox.
    pub async fn refresh(&self, project_id: &ProjectId) -> Result<PreviewInfo, PreviewError> {
        let slot = self.slot(project_id).await;
        let mut guard = slot.lock().await;
        let mut handle = guard.take().ok_or_else(|| PreviewError::NotRunning(project_id.clone()))?;

        let span = info_span!("preview_refresh", project_id = %project_id, sandbox_id = %handle.id);
        async {
            let hot = tokio::time::timeout(
                self.settings.restart_timeout,
                self.manager.restart(&mut handle, project_id),
            )
            .await;

            let failure = match hot {
                Ok(Ok(())) => {
                    let info = self.info(&handle);
                    *guard = Some(handle);
                    debug!("Hot restart succeeded");
                    return Ok(info);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.settings.restart_timeout),
            };

            warn!(error = %failure, "Hot restart failed, recreating sandbox");
            RESTART_FALLBACKS.inc();
            if let Err(e) = self.manager.stop(&mut handle).await {
                debug!(error = %e, "Ignoring stop failure during fallback");
            }
            self.live.remove(project_id).await;
            tokio::time::sleep(self.settings.fallback_delay).await;

            match self.manager.setup(project_id).await {
                Ok(fresh) => {
                    let info = self.info(&fresh);
                    self.live.publish(project_id, &fresh.id).await;
                    info!(sandbox_id = %fresh.id, "Preview recreated");
                    *guard = Some(fresh);
                    Ok(info)
                }
                Err(e) => {
                    error!(error = %e, "Preview recreate failed; project has no sandbox");
                    Err(e.into())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Destroy a project's preview sandbox
    pub async fn stop(&self, project_id: &ProjectId) -> Result<StopOutcome, PreviewError> {
        let slot = self.slot(project_id).await;
        let mut guard = slot.lock().await;
        self.live.remove(project_id).await;
        match guard.take() {
            Some(mut handle) => Ok(self.manager.stop(&mut handle).await?),
            None => Ok(StopOutcome::AlreadyGone),
        }
    }

    /// Drive `session` against a started preview, then stop the preview
    ///
    /// The sandbox is stopped whether the session succeeded or failed; the
    /// session's own output is returned alongside the stop result.
    pub async fn run_session<F, T>(&self, project_id: &ProjectId, session: F) -> (T, Result<StopOutcome, PreviewError>)
    where
        F: Future<Output = T>,
    {
        let output = session.await;
        let stopped = self.stop(project_id).await;
        if let Err(e) = &stopped {
            warn!(project_id = %project_id, error = %e, "Failed to stop preview after session");
        }
        (output, stopped)
    }

    /// Apply a direct user edit: store first, then best-effort into the live sandbox
    pub async fn save_and_sync(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        path: &str,
        content: &str,
    ) -> Result<SyncOutcome, PreviewError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| PreviewError::ProjectNotFound(project_id.clone()))?;
        if !project.is_owned_by(user_id) {
            return Err(PreviewError::Unauthorized(project_id.clone()));
        }

        let path = ProjectPath::new(path)?;
        self.store.write_file(project_id, &path, content).await?;

        let slot = self.slot(project_id).await;
        let guard = slot.lock().await;
        let Some(handle) = guard.as_ref() else {
            return Ok(SyncOutcome::NotLive);
        };
        match self.manager.sync_file(handle, &path, content).await {
            Ok(()) => Ok(SyncOutcome::Synced),
            Err(e) => {
                warn!(project_id = %project_id, path = %path, error = %e, "Saved but could not sync to sandbox");
                Ok(SyncOutcome::SyncFailed(e.to_string()))
            }
        }
    }

    /// Consume restart signals until every producer is gone
    pub async fn run(&self, mut receiver: RestartReceiver) {
        while let Some(project_id) = receiver.next().await {
            match self.refresh(&project_id).await {
                Ok(info) => info!(project_id = %project_id, url = %info.url, "Preview refreshed"),
                Err(PreviewError::NotRunning(_)) => {
                    debug!(project_id = %project_id, "Restart signal for project without a preview")
                }
                Err(e) => error!(project_id = %project_id, error = %e, "Preview refresh failed"),
            }
        }
    }
}
