//! codeagent - AI coding agent with live preview sandboxes
//!
//! The agent edits a project's files through tools, and a remote sandbox runs
//! the project's dev server so the result can be previewed. The project store
//! is always the source of truth; sandboxes are rebuilt from it.
//!
//! # Modules
//!
//! - `store` - projects, files and transcripts (memory or JSON on disk)
//! - `llm` - OpenAI-compatible completion client with tool calling
//! - `tools` - the agent's tool registry
//! - `agent` - the turn loop
//! - `sandbox` - remote environments and their lifecycle
//! - `signal` - restart signals from the agent to the preview
//! - `preview` - keeps live previews in step with the store
//! - `metrics` - Prometheus metrics
//! - `telemetry` - logging and OTLP tracing
//!
//! # Quick Start
//!
//! ```ignore
//! use codeagent::{agent::{AgentConfig, AgentController}, signal, store::open_store};
//!
//! let store = open_store("memory://")?;
//! let (signals, receiver) = signal::channel(store.clone());
//! let agent = AgentController::new(model, store.clone(), signals, AgentConfig::default());
//! let outcome = agent.run(&project_id, "alice", Some("Add a dark mode toggle")).await?;
//! ```

pub mod agent;
pub mod config;
pub mod llm;
pub mod metrics;
pub mod preview;
pub mod sandbox;
pub mod signal;
pub mod store;
pub mod telemetry;
pub mod tools;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentConfig, AgentController, AgentOutcome, Termination};
pub use preview::{PreviewInfo, PreviewSupervisor};
pub use sandbox::{SandboxManager, SandboxState};
pub use store::{open_store, ProjectId, ProjectStore};
