//! Remote sandbox environments
//!
//! A sandbox is a network-addressable remote machine with its own filesystem
//! and processes. It is always rebuilt from the project store, never the other
//! way around.
//!
//! # Lifecycle
//!
//! ```text
//! absent → created → hydrated → installed → serving ⇄ serving (restart)
//!                                               ↓
//!                                            stopped
//! ```
//!
//! - [`SandboxProvider`] / [`Sandbox`] - the provider seam (HTTP in production)
//! - [`SandboxManager`] - create, hydrate, install, start, restart, stop
//! - [`SandboxHandle`] - the state machine for one project's environment

pub mod handle;
pub mod http;
pub mod lifecycle;
pub mod live;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

pub use handle::{detect_template, preview_host, preview_url, SandboxHandle, SandboxState, StopOutcome};
pub use http::{HttpSandboxProvider, HttpSandboxSettings};
pub use lifecycle::{app_path, SandboxManager, APP_ROOT, MANIFEST};
pub use live::LiveSandboxes;

/// Error type for sandbox operations
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("missing sandbox credential: {0} is not set")]
    MissingCredential(&'static str),
    #[error("sandbox {0} not found")]
    NotFound(String),
    #[error("sandbox request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("sandbox API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid sandbox response: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("project has no files to hydrate; template was not applied")]
    NoFiles,
    #[error("manifest {0} missing after hydration")]
    ManifestMissing(String),
    #[error("dependency install failed with exit code {exit_code}: {stderr}")]
    InstallFailed { exit_code: i32, stderr: String },
    #[error("dev server failed to start: {0}")]
    StartFailed(String),
    #[error("sandbox operation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A shell command to run inside a sandbox
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    /// Return immediately with the process id instead of waiting for exit
    pub background: bool,
    #[serde(skip_serializing_if = "Option::is_none", rename = "timeout_ms", serialize_with = "as_millis")]
    pub timeout: Option<Duration>,
}

fn as_millis<S: serde::Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => s.serialize_u64(d.as_millis() as u64),
        None => s.serialize_none(),
    }
}

impl CommandSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cwd: None,
            background: false,
            timeout: None,
        }
    }

    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a foreground command (or the pid of a background one)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub exit_code: i32,
    #[serde(default)]
    pub pid: Option<u32>,
}

/// Result of running a code cell in the sandbox's interpreter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CodeExecution {
    /// Value of the last expression, if any
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Uncaught exception, rendered as `Name: message`
    #[serde(default)]
    pub error: Option<String>,
}

/// A process running inside a sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    #[serde(alias = "cmdline")]
    pub cmd: String,
}

/// A live connection to one remote environment
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn id(&self) -> &str;

    /// Write a file at an absolute path, creating parent directories
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    /// Read a file at an absolute path; `None` when it does not exist
    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError>;

    async fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput, SandboxError>;

    /// Run a Python cell in the sandbox's persistent interpreter
    async fn run_code(&self, code: &str) -> Result<CodeExecution, SandboxError>;

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, SandboxError>;

    /// Kill a process; false when it was already gone
    async fn kill_process(&self, pid: u32) -> Result<bool, SandboxError>;
}

/// Allocates and reattaches remote environments
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn Sandbox>, SandboxError>;

    /// Reattach to an existing environment by id
    async fn connect(&self, id: &str) -> Result<Arc<dyn Sandbox>, SandboxError>;

    /// Destroy an environment; false when it was already gone
    async fn kill(&self, id: &str) -> Result<bool, SandboxError>;

    /// Domain used to compose preview hostnames
    fn domain(&self) -> &str;
}
