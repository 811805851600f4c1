//! Shared fixtures: a scripted completion model and an in-memory sandbox provider

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use codeagent::llm::{ChatError, ChatMessage, CompletionModel, Tool, ToolCall};
use codeagent::sandbox::{
    CodeExecution, CommandOutput, CommandSpec, ProcessInfo, Sandbox, SandboxError, SandboxProvider,
};
use codeagent::store::{MemoryStore, Project, ProjectPath, ProjectStore};

// ─────────────────────────────────────────────────────────────────────────────
// Completion model
// ─────────────────────────────────────────────────────────────────────────────

/// One scripted completion
pub enum Step {
    Reply(ChatMessage),
    Fail,
    /// Never completes
    Hang,
}

/// Completion model that replays a script and records every request
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    /// Reply used once the script is exhausted
    fallback: Option<ChatMessage>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answer every request with the same reply
    pub fn always(reply: ChatMessage) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            fallback: Some(reply),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// History sent on the n-th call (0-based)
    pub fn request(&self, n: usize) -> Vec<ChatMessage> {
        self.requests.lock().unwrap()[n].clone()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, messages: &[ChatMessage], _tools: &[Tool]) -> Result<ChatMessage, ChatError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(reply)) => Ok(reply),
            Some(Step::Fail) => Err(ChatError::RateLimited),
            Some(Step::Hang) => std::future::pending().await,
            None => self.fallback.clone().ok_or(ChatError::EmptyResponse),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Assistant turn requesting the given tool calls, with ids `call_0`, `call_1`, ...
pub fn tool_calls(calls: &[(&str, Value)]) -> ChatMessage {
    let calls = calls
        .iter()
        .enumerate()
        .map(|(i, (name, args))| ToolCall::new(format!("call_{}", i), *name, args.clone()))
        .collect();
    ChatMessage::assistant_tool_calls(None, calls)
}

pub fn text(content: &str) -> Step {
    Step::Reply(ChatMessage::assistant(content))
}

pub fn tools(calls: &[(&str, Value)]) -> Step {
    Step::Reply(tool_calls(calls))
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

pub fn memory_store() -> Arc<dyn ProjectStore> {
    Arc::new(MemoryStore::new())
}

/// Create a project owned by `alice` holding `files`
pub async fn seed_project(store: &dyn ProjectStore, files: &[(&str, &str)]) -> Project {
    let project = store.create_project("alice", "demo").await.unwrap();
    for (path, content) in files {
        store
            .write_file(&project.id, &ProjectPath::new(path).unwrap(), content)
            .await
            .unwrap();
    }
    project
}

pub const REACT_MANIFEST: &str = r#"{"name":"app","dependencies":{"react":"19.0.0"},"devDependencies":{"vite":"6.0.0"}}"#;
pub const NEXT_MANIFEST: &str = r#"{"name":"app","dependencies":{"next":"16.0.0","react":"19.0.0"}}"#;

// ─────────────────────────────────────────────────────────────────────────────
// Sandbox provider
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct FakeEnv {
    files: HashMap<String, String>,
    processes: HashMap<u32, String>,
    next_pid: u32,
    code_runs: Vec<String>,
    commands: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    envs: HashMap<String, FakeEnv>,
    next_id: u32,
    created: usize,
    killed: Vec<String>,
    install_exit_code: i32,
    /// `npm install` never finishes
    install_hangs: bool,
    /// Sandboxes whose file writes fail
    broken: HashSet<String>,
    fail_create: bool,
}

/// In-memory sandbox service
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_install_exit_code(&self, code: i32) {
        self.state.lock().unwrap().install_exit_code = code;
    }

    pub fn set_install_hangs(&self, hangs: bool) {
        self.state.lock().unwrap().install_hangs = hangs;
    }

    /// Kill every background process in `id`, as if the dev server crashed
    pub fn crash_processes(&self, id: &str) {
        if let Some(env) = self.state.lock().unwrap().envs.get_mut(id) {
            env.processes.clear();
        }
    }

    /// Make every file write into `id` fail
    pub fn break_sandbox(&self, id: &str) {
        self.state.lock().unwrap().broken.insert(id.to_string());
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.state.lock().unwrap().fail_create = fail;
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn killed(&self) -> Vec<String> {
        self.state.lock().unwrap().killed.clone()
    }

    pub fn alive(&self, id: &str) -> bool {
        self.state.lock().unwrap().envs.contains_key(id)
    }

    pub fn file(&self, id: &str, path: &str) -> Option<String> {
        self.state.lock().unwrap().envs.get(id)?.files.get(path).cloned()
    }

    pub fn processes(&self, id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut cmds: Vec<String> = state
            .envs
            .get(id)
            .map(|env| env.processes.values().cloned().collect())
            .unwrap_or_default();
        cmds.sort();
        cmds
    }

    pub fn code_runs(&self, id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.envs.get(id).map(|env| env.code_runs.clone()).unwrap_or_default()
    }

    pub fn commands(&self, id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.envs.get(id).map(|env| env.commands.clone()).unwrap_or_default()
    }

    fn attach(&self, id: String) -> Arc<dyn Sandbox> {
        Arc::new(FakeSandbox {
            id,
            state: self.state.clone(),
        })
    }
}

#[async_trait]
impl SandboxProvider for FakeProvider {
    async fn create(&self) -> Result<Arc<dyn Sandbox>, SandboxError> {
        let id = {
            let mut state = self.state.lock().unwrap();
            if state.fail_create {
                return Err(SandboxError::Api {
                    status: 503,
                    body: "no capacity".into(),
                });
            }
            state.next_id += 1;
            state.created += 1;
            let id = format!("sbx-{}", state.next_id);
            state.envs.insert(
                id.clone(),
                FakeEnv {
                    next_pid: 100,
                    ..Default::default()
                },
            );
            id
        };
        Ok(self.attach(id))
    }

    async fn connect(&self, id: &str) -> Result<Arc<dyn Sandbox>, SandboxError> {
        if self.alive(id) {
            Ok(self.attach(id.to_string()))
        } else {
            Err(SandboxError::NotFound(id.to_string()))
        }
    }

    async fn kill(&self, id: &str) -> Result<bool, SandboxError> {
        let mut state = self.state.lock().unwrap();
        let existed = state.envs.remove(id).is_some();
        if existed {
            state.killed.push(id.to_string());
        }
        Ok(existed)
    }

    fn domain(&self) -> &str {
        "sandbox.test"
    }
}

struct FakeSandbox {
    id: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeSandbox {
    fn with_env<T>(&self, f: impl FnOnce(&mut FakeEnv, i32) -> T) -> Result<T, SandboxError> {
        let mut state = self.state.lock().unwrap();
        let install_exit_code = state.install_exit_code;
        let env = state
            .envs
            .get_mut(&self.id)
            .ok_or_else(|| SandboxError::NotFound(self.id.clone()))?;
        Ok(f(env, install_exit_code))
    }
}

/// Exit code and stdout of a simulated shell command
fn simulate(command: &str, install_exit_code: i32) -> (i32, String, String) {
    if command.starts_with("npm install") {
        if install_exit_code == 0 {
            (0, "added 42 packages\n".into(), String::new())
        } else {
            (install_exit_code, String::new(), "npm ERR! code ERESOLVE\n".into())
        }
    } else {
        (0, String::new(), String::new())
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        if self.state.lock().unwrap().broken.contains(&self.id) {
            return Err(SandboxError::Api {
                status: 502,
                body: "sandbox agent unreachable".into(),
            });
        }
        self.with_env(|env, _| {
            env.files.insert(path.to_string(), content.to_string());
        })
    }

    async fn read_file(&self, path: &str) -> Result<Option<String>, SandboxError> {
        self.with_env(|env, _| env.files.get(path).cloned())
    }

    async fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput, SandboxError> {
        let hangs = self.state.lock().unwrap().install_hangs;
        if hangs && spec.command.starts_with("npm install") {
            std::future::pending::<()>().await;
        }
        self.with_env(|env, install_exit_code| {
            env.commands.push(spec.command.clone());
            if spec.background {
                env.next_pid += 1;
                let pid = env.next_pid;
                env.processes.insert(pid, spec.command.clone());
                return CommandOutput {
                    pid: Some(pid),
                    ..Default::default()
                };
            }
            let (exit_code, stdout, stderr) = simulate(&spec.command, install_exit_code);
            CommandOutput {
                stdout,
                stderr,
                exit_code,
                pid: None,
            }
        })
    }

    async fn run_code(&self, code: &str) -> Result<CodeExecution, SandboxError> {
        self.with_env(|env, install_exit_code| {
            env.code_runs.push(code.to_string());
            let command = code
                .lines()
                .find_map(|line| line.strip_prefix("__cmd = "))
                .and_then(|literal| serde_json::from_str::<String>(literal).ok());
            match command {
                Some(command) => {
                    env.commands.push(command.clone());
                    let (exit_code, stdout, stderr) = simulate(&command, install_exit_code);
                    CodeExecution {
                        stdout: format!("STDOUT:\n{}\nSTDERR:\n{}\nEXIT_CODE: {}\n", stdout, stderr, exit_code),
                        ..Default::default()
                    }
                }
                None => CodeExecution {
                    text: Some("42".into()),
                    stdout: "ran\n".into(),
                    ..Default::default()
                },
            }
        })
    }

    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, SandboxError> {
        self.with_env(|env, _| {
            env.processes
                .iter()
                .map(|(pid, cmd)| ProcessInfo {
                    pid: *pid,
                    cmd: cmd.clone(),
                })
                .collect()
        })
    }

    async fn kill_process(&self, pid: u32) -> Result<bool, SandboxError> {
        self.with_env(|env, _| env.processes.remove(&pid).is_some())
    }
}
