//! Sandbox lifecycle manager
//!
//! Drives a project's sandbox through create → hydrate → install → start and
//! the hot restart path. Every step validates the end state it needs instead
//! of trusting the order in which earlier writes landed.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, info_span, warn, Instrument};

use super::handle::{detect_template, SandboxHandle, SandboxState, StopOutcome};
use super::{CommandSpec, SandboxError, SandboxProvider};
use crate::metrics::observe_sandbox_op;
use crate::store::{ProjectId, ProjectPath, ProjectStore, TemplateKind};

/// Application root inside the sandbox
pub const APP_ROOT: &str = "/home/user/app";

/// Package descriptor that must exist at the application root
pub const MANIFEST: &str = "package.json";

/// Command-line fragments identifying a running dev server
const SERVER_PATTERNS: &[&str] = &["vite", "next dev", "next-server", "npm run dev"];

/// Absolute path of a project file inside the sandbox
pub fn app_path(path: &ProjectPath) -> String {
    format!("{}/{}", APP_ROOT, path)
}

fn dev_server_command(template: TemplateKind) -> String {
    match template {
        TemplateKind::React => format!("npm run dev -- --host 0.0.0.0 --port {}", template.port()),
        TemplateKind::NextJs => format!("npm run dev -- --hostname 0.0.0.0 --port {}", template.port()),
    }
}

/// Run a lifecycle step under a span, recording its outcome and duration
async fn timed<T, F>(op: &'static str, sandbox_id: &str, fut: F) -> Result<T, SandboxError>
where
    F: Future<Output = Result<T, SandboxError>>,
{
    let span = info_span!("sandbox_op", op, sandbox_id = %sandbox_id, otel.name = op);
    let start = Instant::now();
    let result = fut.instrument(span).await;
    observe_sandbox_op(op, result.is_ok(), start.elapsed());
    if let Err(e) = &result {
        warn!(op, sandbox_id = %sandbox_id, error = %e, "Sandbox operation failed");
    }
    result
}

/// Manages remote environments for projects, rebuilding them from the store
pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    store: Arc<dyn ProjectStore>,
    install_timeout: Duration,
}

impl SandboxManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, store: Arc<dyn ProjectStore>) -> Self {
        Self {
            provider,
            store,
            install_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Domain used for preview addressing
    pub fn domain(&self) -> &str {
        self.provider.domain()
    }

    /// Allocate a fresh environment
    pub async fn create(&self) -> Result<SandboxHandle, SandboxError> {
        let start = Instant::now();
        let result = self.provider.create().await;
        observe_sandbox_op("create", result.is_ok(), start.elapsed());
        let sandbox = result?;
        info!(sandbox_id = %sandbox.id(), "Sandbox allocated");
        Ok(SandboxHandle::new(sandbox))
    }

    /// Reattach to a known environment
    ///
    /// A dev server already running inside it is detected from the process
    /// list, so the handle comes back `Serving` rather than `Created`.
    pub async fn connect(&self, id: &str) -> Result<SandboxHandle, SandboxError> {
        let sandbox = timed("connect", id, self.provider.connect(id)).await?;
        let mut handle = SandboxHandle::new(sandbox);

        let server_pid = match handle.sandbox.list_processes().await {
            Ok(processes) => processes
                .into_iter()
                .find(|p| SERVER_PATTERNS.iter().any(|pattern| p.cmd.contains(pattern)))
                .map(|p| p.pid),
            Err(e) => {
                debug!(sandbox_id = %id, error = %e, "Could not list processes after connect");
                None
            }
        };
        if let Some(pid) = server_pid {
            let manifest = handle.sandbox.read_file(&format!("{}/{}", APP_ROOT, MANIFEST)).await?;
            let template = manifest.as_deref().map(detect_template).unwrap_or_default();
            handle.mark_serving(template, Some(pid));
        }
        Ok(handle)
    }

    /// Reattach to `known`, or allocate a new environment if that fails
    ///
    /// Returns the handle and whether it was recreated; callers must remember
    /// the new id in that case.
    pub async fn connect_or_recreate(&self, known: Option<&str>) -> Result<(SandboxHandle, bool), SandboxError> {
        if let Some(id) = known {
            match self.connect(id).await {
                Ok(handle) => return Ok((handle, false)),
                Err(e) => {
                    info!(sandbox_id = %id, error = %e, "Reconnect failed, creating a new sandbox");
                }
            }
        }
        Ok((self.create().await?, true))
    }

    /// Write every stored file of the project under [`APP_ROOT`]
    ///
    /// Returns the number of files written. After success the manifest is
    /// present inside the sandbox.
    pub async fn hydrate(&self, handle: &mut SandboxHandle, project_id: &ProjectId) -> Result<usize, SandboxError> {
        let id = handle.id.clone();
        let count = timed("hydrate", &id, async {
            let files = self.store.list_files(project_id).await?;
            if files.is_empty() {
                return Err(SandboxError::NoFiles);
            }
            for file in &files {
                handle.sandbox.write_file(&app_path(&file.path), &file.content).await?;
            }

            let manifest_path = format!("{}/{}", APP_ROOT, MANIFEST);
            if handle.sandbox.read_file(&manifest_path).await?.is_none() {
                return Err(SandboxError::ManifestMissing(manifest_path));
            }
            Ok(files.len())
        })
        .await?;

        if handle.state != SandboxState::Serving {
            handle.state = SandboxState::Hydrated;
        }
        debug!(sandbox_id = %id, files = count, "Sandbox hydrated");
        Ok(count)
    }

    /// Install dependencies; a non-zero exit or the install timeout aborts setup
    pub async fn install(&self, handle: &mut SandboxHandle) -> Result<(), SandboxError> {
        let limit = self.install_timeout;
        let spec = CommandSpec::new("npm install").cwd(APP_ROOT).timeout(limit);
        let sandbox = handle.sandbox.clone();
        timed("install", &handle.id, async move {
            let output = tokio::time::timeout(limit, sandbox.run_command(&spec))
                .await
                .map_err(|_| SandboxError::Timeout(limit))??;
            if output.exit_code != 0 {
                return Err(SandboxError::InstallFailed {
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                });
            }
            Ok(())
        })
        .await?;
        handle.state = SandboxState::Installed;
        Ok(())
    }

    /// Classify the project from its manifest and start the dev server in the background
    pub async fn detect_and_start(
        &self,
        handle: &mut SandboxHandle,
        project_id: &ProjectId,
    ) -> Result<TemplateKind, SandboxError> {
        let sandbox = handle.sandbox.clone();
        let (template, pid) = timed("start", &handle.id, async move {
            let manifest_path = format!("{}/{}", APP_ROOT, MANIFEST);
            let manifest = sandbox
                .read_file(&manifest_path)
                .await?
                .ok_or(SandboxError::ManifestMissing(manifest_path))?;
            let template = detect_template(&manifest);

            let spec = CommandSpec::new(dev_server_command(template))
                .cwd(APP_ROOT)
                .background();
            let output = sandbox.run_command(&spec).await?;
            if output.pid.is_none() && output.exit_code != 0 {
                return Err(SandboxError::StartFailed(output.stderr));
            }
            Ok((template, output.pid))
        })
        .await?;

        handle.mark_serving(template, pid);
        self.store.set_template(project_id, template).await?;
        info!(
            sandbox_id = %handle.id,
            template = %template,
            port = template.port(),
            pid = ?pid,
            "Dev server started"
        );
        Ok(template)
    }

    /// Kill every process that looks like a dev server; failures are ignored
    async fn kill_servers(&self, handle: &mut SandboxHandle) {
        let mut targets: HashSet<u32> = handle.server_pid.take().into_iter().collect();
        match handle.sandbox.list_processes().await {
            Ok(processes) => targets.extend(
                processes
                    .into_iter()
                    .filter(|p| SERVER_PATTERNS.iter().any(|pattern| p.cmd.contains(pattern)))
                    .map(|p| p.pid),
            ),
            Err(e) => debug!(sandbox_id = %handle.id, error = %e, "Could not list processes"),
        }
        for pid in targets {
            match handle.sandbox.kill_process(pid).await {
                Ok(killed) => debug!(sandbox_id = %handle.id, pid, killed, "Killed dev server process"),
                Err(e) => debug!(sandbox_id = %handle.id, pid, error = %e, "Ignoring kill failure"),
            }
        }
    }

    /// Hot restart: kill the dev server, re-hydrate, start again in the same sandbox
    ///
    /// Safe to repeat; killing a process that is already gone is not an error.
    /// Carries no timeout of its own.
    pub async fn restart(&self, handle: &mut SandboxHandle, project_id: &ProjectId) -> Result<(), SandboxError> {
        let span = info_span!("sandbox_restart", sandbox_id = %handle.id, project_id = %project_id);
        let start = Instant::now();
        let result = async {
            self.kill_servers(handle).await;
            self.hydrate(handle, project_id).await?;
            self.detect_and_start(handle, project_id).await?;
            Ok::<(), SandboxError>(())
        }
        .instrument(span)
        .await;
        observe_sandbox_op("restart", result.is_ok(), start.elapsed());
        result
    }

    /// Destroy the environment
    pub async fn stop(&self, handle: &mut SandboxHandle) -> Result<StopOutcome, SandboxError> {
        let killed = timed("stop", &handle.id, self.provider.kill(&handle.id)).await?;
        handle.mark_stopped();
        let outcome = if killed {
            StopOutcome::Stopped
        } else {
            StopOutcome::AlreadyGone
        };
        info!(sandbox_id = %handle.id, outcome = ?outcome, "Sandbox stopped");
        Ok(outcome)
    }

    /// Hydrate, install and start on an existing handle
    pub async fn provision(&self, handle: &mut SandboxHandle, project_id: &ProjectId) -> Result<(), SandboxError> {
        self.hydrate(handle, project_id).await?;
        self.install(handle).await?;
        self.detect_and_start(handle, project_id).await?;
        Ok(())
    }

    /// Full sequence from nothing to a serving sandbox
    ///
    /// A sandbox that fails part-way is destroyed before the error is returned.
    pub async fn setup(&self, project_id: &ProjectId) -> Result<SandboxHandle, SandboxError> {
        let mut handle = self.create().await?;
        if let Err(e) = self.provision(&mut handle, project_id).await {
            if let Err(kill_err) = self.provider.kill(&handle.id).await {
                warn!(sandbox_id = %handle.id, error = %kill_err, "Failed to clean up sandbox after setup failure");
            }
            return Err(e);
        }
        Ok(handle)
    }

    /// Write one file into a live sandbox
    pub async fn sync_file(&self, handle: &SandboxHandle, path: &ProjectPath, content: &str) -> Result<(), SandboxError> {
        handle.sandbox.write_file(&app_path(path), content).await
    }
}
