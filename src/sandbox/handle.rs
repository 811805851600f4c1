//! Sandbox handle - one project's remote environment and its lifecycle state
//!
//! Absent -> Created -> Hydrated -> Installed -> Serving -> Stopped

use std::sync::Arc;
use std::time::Instant;

use super::Sandbox;
use crate::store::TemplateKind;

/// Lifecycle state of a project's sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    /// No environment allocated (or the last one was lost)
    Absent,
    /// Allocated, filesystem not yet written
    Created,
    /// Project files written, manifest verified
    Hydrated,
    /// Dependencies installed
    Installed,
    /// Dev server running in the background
    Serving,
    /// Environment destroyed
    Stopped,
}

impl SandboxState {
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxState::Absent => "absent",
            SandboxState::Created => "created",
            SandboxState::Hydrated => "hydrated",
            SandboxState::Installed => "installed",
            SandboxState::Serving => "serving",
            SandboxState::Stopped => "stopped",
        }
    }
}

/// What `stop` found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyGone,
}

/// A live connection to a project's sandbox plus what we know about it
pub struct SandboxHandle {
    /// Provider-assigned sandbox id; callers persist this to reconnect later
    pub id: String,
    pub state: SandboxState,
    /// Template detected from the manifest at start
    pub template: Option<TemplateKind>,
    /// Dev server port, known once serving
    pub port: Option<u16>,
    /// Pid of the background dev server
    pub server_pid: Option<u32>,
    pub(crate) sandbox: Arc<dyn Sandbox>,
    created_at: Instant,
}

impl SandboxHandle {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            id: sandbox.id().to_string(),
            state: SandboxState::Created,
            template: None,
            port: None,
            server_pid: None,
            sandbox,
            created_at: Instant::now(),
        }
    }

    /// The live connection
    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    pub fn is_serving(&self) -> bool {
        self.state == SandboxState::Serving
    }

    /// Mark the dev server as running
    pub fn mark_serving(&mut self, template: TemplateKind, pid: Option<u32>) {
        self.template = Some(template);
        self.port = Some(template.port());
        self.server_pid = pid;
        self.state = SandboxState::Serving;
    }

    pub fn mark_stopped(&mut self) {
        self.server_pid = None;
        self.state = SandboxState::Stopped;
    }

    /// Preview URL, once the dev server port is known
    pub fn preview_url(&self, domain: &str) -> Option<String> {
        self.port.map(|port| preview_url(&self.id, port, domain))
    }

    /// Time since the connection was established
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHandle")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("template", &self.template)
            .field("port", &self.port)
            .field("server_pid", &self.server_pid)
            .field("age", &self.age())
            .finish()
    }
}

/// Routable hostname of a port inside a sandbox: `<port>-<id>.<domain>`
pub fn preview_host(sandbox_id: &str, port: u16, domain: &str) -> String {
    format!("{}-{}.{}", port, sandbox_id, domain)
}

pub fn preview_url(sandbox_id: &str, port: u16, domain: &str) -> String {
    format!("https://{}", preview_host(sandbox_id, port, domain))
}

/// Classify a project from its `package.json`
///
/// A `next` dependency (regular or dev) means Next.js; anything else,
/// including an unparseable manifest, is treated as React.
pub fn detect_template(manifest: &str) -> TemplateKind {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(manifest) else {
        return TemplateKind::React;
    };
    let has_next = ["dependencies", "devDependencies"]
        .iter()
        .any(|section| value.get(section).and_then(|deps| deps.get("next")).is_some());
    if has_next {
        TemplateKind::NextJs
    } else {
        TemplateKind::React
    }
}
