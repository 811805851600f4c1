//! Agent Controller - the tool-calling loop for one project conversation
//!
//! A run rebuilds the conversation from the stored transcript, then alternates
//! completion calls and tool batches until the model answers in plain text or
//! the turn budget runs out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::locks::ProjectLocks;
use crate::llm::{system_prompt, ChatMessage, CompletionModel, Tool, ToolCall};
use crate::metrics::{AGENT_RUNS, AGENT_TURNS, LLM_CALL_DURATION, TOOL_CALLS};
use crate::sandbox::{LiveSandboxes, SandboxProvider};
use crate::signal::RestartSignals;
use crate::store::{Message, NewMessage, Project, ProjectId, ProjectStore, Role, StoreError};
use crate::tools::{self, BatchSandbox, ToolContext};

/// Assistant message persisted when the completion API fails
pub const DEFAULT_FAILURE_MESSAGE: &str = "I encountered an error while processing your request.";

/// Configuration for the agent controller
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Completion model name (e.g., "deepseek/deepseek-chat")
    pub model: String,
    /// Completion calls allowed per run
    pub max_turns: usize,
    /// Bound on a single completion call
    pub completion_timeout: Duration,
    /// Bound on a single tool call
    pub tool_timeout: Duration,
    /// Wall-clock budget for the whole run, including in-flight completions and tool calls
    pub run_deadline: Duration,
    /// Text persisted when a run ends in a fatal completion error
    pub failure_message: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "deepseek/deepseek-chat".to_string(),
            max_turns: 5,
            completion_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(300),
            run_deadline: Duration::from_secs(900),
            failure_message: DEFAULT_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The model answered in text; the answer was persisted
    FinalResponse,
    /// Every turn asked for tools; nothing was persisted
    TurnBudgetExhausted,
    /// The run deadline passed; nothing further was persisted
    DeadlineExceeded,
    /// The completion call failed; one failure message was persisted
    FatalError,
}

impl Termination {
    pub fn as_str(self) -> &'static str {
        match self {
            Termination::FinalResponse => "final_response",
            Termination::TurnBudgetExhausted => "turn_budget_exhausted",
            Termination::DeadlineExceeded => "deadline_exceeded",
            Termination::FatalError => "fatal_error",
        }
    }
}

/// Result of an agent run
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Unique id of this run, recorded on every span
    pub run_id: String,
    pub termination: Termination,
    /// Completion calls made
    pub turns: usize,
    /// Tool calls executed
    pub tool_calls: usize,
    /// Persisted assistant text, if any
    pub final_response: Option<String>,
}

/// Error type for agent operations
///
/// Completion failures are not errors here: they end the run with
/// [`Termination::FatalError`].
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("user {user} does not own project {project}")]
    Unauthorized { project: ProjectId, user: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a completion produced no reply
enum CompletionFailure {
    Failed(String),
    /// The run deadline cut the call short
    DeadlineReached,
}

/// Orchestrates completion calls and tool execution for projects
#[derive(Clone)]
pub struct AgentController {
    model: Arc<dyn CompletionModel>,
    store: Arc<dyn ProjectStore>,
    signals: RestartSignals,
    sandboxes: Option<Arc<dyn SandboxProvider>>,
    live: LiveSandboxes,
    locks: ProjectLocks,
    config: AgentConfig,
}

impl AgentController {
    /// Create a new agent controller
    ///
    /// # Arguments
    /// * `model` - Completion model used for every turn
    /// * `store` - Project store holding files and transcripts
    /// * `signals` - Raised after every final response
    /// * `config` - Agent configuration
    pub fn new(
        model: Arc<dyn CompletionModel>,
        store: Arc<dyn ProjectStore>,
        signals: RestartSignals,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            store,
            signals,
            sandboxes: None,
            live: LiveSandboxes::new(),
            locks: ProjectLocks::new(),
            config,
        }
    }

    /// Enable `run_code` / `execute_command`, preferring the live preview sandbox
    pub fn with_sandboxes(mut self, provider: Arc<dyn SandboxProvider>, live: LiveSandboxes) -> Self {
        self.sandboxes = Some(provider);
        self.live = live;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn locks(&self) -> &ProjectLocks {
        &self.locks
    }

    async fn owned_project(&self, project_id: &ProjectId, user_id: &str) -> Result<Project, AgentError> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| AgentError::ProjectNotFound(project_id.clone()))?;
        if !project.is_owned_by(user_id) {
            return Err(AgentError::Unauthorized {
                project: project_id.clone(),
                user: user_id.to_string(),
            });
        }
        Ok(project)
    }

    /// Append a user message after checking ownership
    pub async fn send_user_message(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        text: &str,
    ) -> Result<Message, AgentError> {
        self.owned_project(project_id, user_id).await?;
        Ok(self.store.append_message(project_id, NewMessage::user(user_id, text)).await?)
    }

    /// Spawn a run in the background
    pub fn trigger(
        &self,
        project_id: ProjectId,
        user_id: String,
        latest_message: Option<String>,
    ) -> JoinHandle<Result<AgentOutcome, AgentError>> {
        let controller = self.clone();
        tokio::spawn(async move {
            let result = controller
                .run(&project_id, &user_id, latest_message.as_deref())
                .await;
            if let Err(e) = &result {
                error!(project_id = %project_id, error = %e, "Background agent run failed");
            }
            result
        })
    }

    /// Run the agent loop for a project
    ///
    /// # Arguments
    /// * `project_id` - Project whose transcript drives the run
    /// * `user_id` - Caller; must own the project
    /// * `latest_message` - Triggering text, used if it is not yet the tail of the transcript
    ///
    /// # Returns
    /// AgentOutcome describing how the run ended
    pub async fn run(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        latest_message: Option<&str>,
    ) -> Result<AgentOutcome, AgentError> {
        self.owned_project(project_id, user_id).await?;
        let run_id = Uuid::now_v7().to_string();

        let root_span = info_span!(
            "agent_run",
            run_id = %run_id,
            project_id = %project_id,
            model = %self.config.model,
            otel.name = "agent_run"
        );

        async {
            let _lock = self.locks.acquire(project_id).await;
            // The template may have been chosen while this run waited
            let project = self.owned_project(project_id, user_id).await?;
            info!(run_id = %run_id, template = %project.template_kind(), "Starting agent run");

            let transcript = self.store.list_messages(project_id).await?;
            let mut history = build_history(&project, &transcript, latest_message);
            let tools = tools::definitions();

            let outcome = self
                .turn_loop(project_id, user_id, &run_id, &mut history, &tools)
                .await?;

            AGENT_RUNS.with_label_values(&[outcome.termination.as_str()]).inc();
            AGENT_TURNS.observe(outcome.turns as f64);
            info!(
                run_id = %run_id,
                termination = outcome.termination.as_str(),
                turns = outcome.turns,
                tool_calls = outcome.tool_calls,
                "Agent run finished"
            );
            Ok(outcome)
        }
        .instrument(root_span)
        .await
    }

    async fn turn_loop(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        run_id: &str,
        history: &mut Vec<ChatMessage>,
        tools: &[Tool],
    ) -> Result<AgentOutcome, AgentError> {
        let deadline = Instant::now() + self.config.run_deadline;
        let mut outcome = AgentOutcome {
            run_id: run_id.to_string(),
            termination: Termination::TurnBudgetExhausted,
            turns: 0,
            tool_calls: 0,
            final_response: None,
        };

        while outcome.turns < self.config.max_turns {
            if Instant::now() >= deadline {
                warn!(run_id, turns = outcome.turns, "Run deadline passed, stopping");
                outcome.termination = Termination::DeadlineExceeded;
                return Ok(outcome);
            }
            outcome.turns += 1;

            let reply = match self.complete(run_id, outcome.turns, history, tools, deadline).await {
                Ok(reply) => reply,
                Err(CompletionFailure::DeadlineReached) => {
                    warn!(run_id, turn = outcome.turns, "Run deadline passed during completion");
                    outcome.termination = Termination::DeadlineExceeded;
                    return Ok(outcome);
                }
                Err(CompletionFailure::Failed(reason)) => {
                    error!(run_id, turn = outcome.turns, error = %reason, "Completion failed, ending run");
                    self.store
                        .append_message(
                            project_id,
                            NewMessage::assistant(user_id, self.config.failure_message.as_str()),
                        )
                        .await?;
                    outcome.termination = Termination::FatalError;
                    return Ok(outcome);
                }
            };

            if !reply.has_tool_calls() && reply.text().trim().is_empty() {
                debug!(run_id, turn = outcome.turns, "Empty reply without tool calls, continuing");
                history.push(reply);
                continue;
            }

            if !reply.has_tool_calls() {
                let text = reply.text().to_string();
                self.store
                    .append_message(project_id, NewMessage::assistant(user_id, text.as_str()))
                    .await?;
                self.signals.raise(project_id).await?;
                outcome.termination = Termination::FinalResponse;
                outcome.final_response = Some(text);
                return Ok(outcome);
            }

            let calls = reply.tool_calls.clone();
            history.push(reply);

            let mut batch = BatchSandbox::new(self.sandboxes.clone(), self.live.clone(), project_id.clone());
            let result = self
                .run_batch(project_id, user_id, run_id, &calls, &mut batch, history, deadline)
                .await;
            batch.release().await;
            outcome.tool_calls += result?;

            if Instant::now() >= deadline {
                warn!(run_id, turns = outcome.turns, "Run deadline passed during tool batch");
                outcome.termination = Termination::DeadlineExceeded;
                return Ok(outcome);
            }
        }

        warn!(run_id, turns = outcome.turns, "Turn budget exhausted without a final response");
        Ok(outcome)
    }

    /// One completion call, bounded by the completion timeout and the run deadline
    async fn complete(
        &self,
        run_id: &str,
        turn: usize,
        history: &[ChatMessage],
        tools: &[Tool],
        deadline: Instant,
    ) -> Result<ChatMessage, CompletionFailure> {
        let model = self.model.model_name();
        let remaining = deadline.saturating_duration_since(Instant::now());
        let bound = self.config.completion_timeout.min(remaining);

        let span = info_span!("llm_call", run_id, turn, model, otel.name = "llm_call");
        let started = Instant::now();
        let result = tokio::time::timeout(bound, self.model.complete(history, tools))
            .instrument(span)
            .await;
        let elapsed = started.elapsed();
        LLM_CALL_DURATION.with_label_values(&[model]).observe(elapsed.as_secs_f64());

        match result {
            Ok(Ok(reply)) => {
                debug!(
                    run_id,
                    turn,
                    duration_ms = elapsed.as_millis() as u64,
                    tool_calls = reply.tool_calls.len(),
                    "Completion received"
                );
                Ok(reply)
            }
            Ok(Err(e)) => Err(CompletionFailure::Failed(e.to_string())),
            Err(_) if bound < self.config.completion_timeout => Err(CompletionFailure::DeadlineReached),
            Err(_) => Err(CompletionFailure::Failed(format!(
                "completion timed out after {:?}",
                self.config.completion_timeout
            ))),
        }
    }

    /// Execute a batch of tool calls in order, returning how many ran
    ///
    /// Calls not yet started when the deadline passes are skipped.
    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        project_id: &ProjectId,
        user_id: &str,
        run_id: &str,
        calls: &[ToolCall],
        batch: &mut BatchSandbox,
        history: &mut Vec<ChatMessage>,
        deadline: Instant,
    ) -> Result<usize, AgentError> {
        let mut executed = 0;
        for call in calls {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(run_id, skipped = calls.len() - executed, "Run deadline passed, skipping remaining tool calls");
                break;
            }
            let bound = self.config.tool_timeout.min(remaining);

            let name = call.function.name.as_str();
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or_else(|_| serde_json::Value::String(call.function.arguments.clone()));

            let log = self
                .store
                .append_message(project_id, NewMessage::tool_log(user_id, name, arguments))
                .await?;

            let span = info_span!("tool_call", run_id, tool = name, call_id = %call.id, otel.name = "tool_call");
            let result = {
                let mut ctx = ToolContext {
                    project_id,
                    user_id,
                    store: self.store.as_ref(),
                    sandbox: &mut *batch,
                };
                match tokio::time::timeout(bound, tools::dispatch(&mut ctx, &call.function))
                    .instrument(span)
                    .await
                {
                    Ok(result) => result,
                    Err(_) => format!("Error: Tool {} timed out after {:?}", name, bound),
                }
            };

            let outcome = if result.starts_with("Error:") { "error" } else { "ok" };
            TOOL_CALLS.with_label_values(&[name, outcome]).inc();
            debug!(run_id, tool = name, outcome, result_len = result.len(), "Tool call finished");

            self.store
                .complete_tool_invocation(project_id, &log.id, &result)
                .await?;
            history.push(ChatMessage::tool(call.id.as_str(), result));
            executed += 1;
        }
        Ok(executed)
    }
}

/// Working history for a run: system prompt, then the user/assistant transcript
///
/// Tool log entries are UI records and are not replayed. `latest_message` is
/// appended in memory when it is not already the tail of the transcript.
pub fn build_history(project: &Project, transcript: &[Message], latest_message: Option<&str>) -> Vec<ChatMessage> {
    let mut history = vec![ChatMessage::system(system_prompt(project.template_kind()))];
    history.extend(transcript.iter().filter_map(|m| match m.role {
        Role::User => Some(ChatMessage::user(m.content.as_str())),
        Role::Assistant => Some(ChatMessage::assistant(m.content.as_str())),
        Role::SystemLog => None,
    }));

    if let Some(latest) = latest_message {
        let already_tail = transcript.last().map_or(false, |tail| tail.content == latest);
        if !already_tail {
            history.push(ChatMessage::user(latest));
        }
    }
    history
}
