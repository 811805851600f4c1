//! Sandbox shared by the tool calls of one completion turn

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::sandbox::{LiveSandboxes, Sandbox, SandboxError, SandboxProvider};
use crate::store::ProjectId;

struct Acquired {
    sandbox: Arc<dyn Sandbox>,
    /// Created for this batch and destroyed on release
    ephemeral: bool,
}

/// Lazily allocated sandbox for one tool batch
///
/// The first sandbox tool in a batch either connects to the project's live
/// preview sandbox or, when there is none, creates an ephemeral one. Later
/// calls in the batch reuse it. [`release`](Self::release) drops a live
/// connection but destroys an ephemeral sandbox.
pub struct BatchSandbox {
    provider: Option<Arc<dyn SandboxProvider>>,
    live: LiveSandboxes,
    project_id: ProjectId,
    current: Option<Acquired>,
}

impl BatchSandbox {
    pub fn new(provider: Option<Arc<dyn SandboxProvider>>, live: LiveSandboxes, project_id: ProjectId) -> Self {
        Self {
            provider,
            live,
            project_id,
            current: None,
        }
    }

    /// Whether a sandbox is currently held
    pub fn is_acquired(&self) -> bool {
        self.current.is_some()
    }

    pub async fn acquire(&mut self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if let Some(current) = &self.current {
            return Ok(current.sandbox.clone());
        }
        let provider = self
            .provider
            .clone()
            .ok_or(SandboxError::MissingCredential("SANDBOX_API_KEY"))?;

        if let Some(id) = self.live.get(&self.project_id).await {
            match provider.connect(&id).await {
                Ok(sandbox) => {
                    debug!(project_id = %self.project_id, sandbox_id = %id, "Tool batch using live sandbox");
                    self.current = Some(Acquired {
                        sandbox: sandbox.clone(),
                        ephemeral: false,
                    });
                    return Ok(sandbox);
                }
                Err(e) => {
                    warn!(project_id = %self.project_id, sandbox_id = %id, error = %e, "Live sandbox unreachable, creating ephemeral one");
                }
            }
        }

        let sandbox = provider.create().await?;
        info!(project_id = %self.project_id, sandbox_id = %sandbox.id(), "Tool batch created ephemeral sandbox");
        self.current = Some(Acquired {
            sandbox: sandbox.clone(),
            ephemeral: true,
        });
        Ok(sandbox)
    }

    /// Release whatever the batch acquired
    pub async fn release(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        if !current.ephemeral {
            return;
        }
        let id = current.sandbox.id().to_string();
        if let Some(provider) = &self.provider {
            match provider.kill(&id).await {
                Ok(_) => debug!(sandbox_id = %id, "Ephemeral sandbox destroyed"),
                Err(e) => warn!(sandbox_id = %id, error = %e, "Failed to destroy ephemeral sandbox"),
            }
        }
    }
}
