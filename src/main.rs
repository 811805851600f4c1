//! codeagent CLI
//!
//! Commands:
//! - `project` - create, list, import into and delete projects
//! - `chat`    - send one message and run the agent to completion
//! - `edit`    - write a file directly, as a user edit
//! - `preview` - serve a live preview and chat against it until Ctrl-C
//! - `metrics` - print Prometheus metrics

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use codeagent::agent::{AgentController, AgentOutcome, Termination};
use codeagent::config::AppConfig;
use codeagent::llm::{classify_template, ChatClient, CompletionModel};
use codeagent::preview::{PreviewSettings, PreviewSupervisor, SyncOutcome};
use codeagent::sandbox::{HttpSandboxProvider, LiveSandboxes, SandboxManager, SandboxProvider};
use codeagent::signal::{self, RestartSignals};
use codeagent::store::{import_dir, open_store, ProjectId, ProjectStore, TemplateKind};
use codeagent::{metrics, telemetry};

#[derive(Parser)]
#[command(name = "codeagent", about = "AI coding agent with live preview sandboxes", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project store: memory://, file://<dir> or a directory path
    #[arg(long, env = "STORE_URL", global = true, default_value = "file://.codeagent")]
    store_url: String,

    /// Acting user id
    #[arg(long, env = "CODEAGENT_USER", global = true, default_value = "local")]
    user: String,

    /// OTLP collector endpoint for trace export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    otlp_endpoint: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectCommand,
    },

    /// Send a message to the agent and wait for the run to finish
    Chat {
        /// Project id
        project: String,
        /// Message text
        message: String,
    },

    /// Save a file as a direct user edit
    Edit {
        /// Project id
        project: String,
        /// Project-relative file path
        path: String,
        /// New content; read from --file when omitted
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        /// Local file to read the new content from
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Serve a live preview; each stdin line is sent to the agent
    Preview {
        /// Project id
        project: String,
    },

    /// Print Prometheus metrics
    Metrics,
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a project
    Create {
        title: String,
        /// react or nextjs; picked from the first chat message when omitted
        #[arg(long)]
        template: Option<TemplateKind>,
        /// Seed the project from a template directory
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// List your projects, newest first
    List,
    /// Copy a template directory into a project
    Import { project: String, dir: PathBuf },
    /// Delete a project with its files and transcript
    Delete { project: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing("codeagent", cli.otlp_endpoint.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    let result = run(cli).await;
    telemetry::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = open_store(&cli.store_url).context("failed to open project store")?;

    match cli.command {
        Commands::Project { action } => project_command(store.as_ref(), &cli.user, action).await,
        Commands::Chat { project, message } => chat(&cli.store_url, store, &cli.user, &project, &message).await,
        Commands::Edit {
            project,
            path,
            content,
            file,
        } => {
            let content = match (content, file) {
                (Some(content), _) => content,
                (None, Some(file)) => tokio::fs::read_to_string(&file)
                    .await
                    .with_context(|| format!("failed to read {}", file.display()))?,
                (None, None) => bail!("either --content or --file is required"),
            };
            edit(store, &cli.user, &project, &path, &content).await
        }
        Commands::Preview { project } => preview(&cli.store_url, store, &cli.user, &project).await,
        Commands::Metrics => {
            print!("{}", metrics::render());
            Ok(())
        }
    }
}

/// Environment config with the CLI's store URL taking precedence
fn load_config(store_url: &str) -> anyhow::Result<AppConfig> {
    let config = AppConfig::from_lookup(|name| match name {
        "STORE_URL" => Some(store_url.to_string()),
        _ => std::env::var(name).ok(),
    })?;
    Ok(config)
}

fn chat_model(config: &AppConfig) -> anyhow::Result<Arc<dyn CompletionModel>> {
    let client = ChatClient::new(
        config.llm_api_base.as_str(),
        config.llm_api_key.as_str(),
        config.llm_model.as_str(),
        config.completion_timeout(),
    )?;
    Ok(Arc::new(client))
}

fn sandbox_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn SandboxProvider>> {
    Ok(Arc::new(HttpSandboxProvider::new(config.sandbox_settings())?))
}

async fn project_command(store: &dyn ProjectStore, user: &str, action: ProjectCommand) -> anyhow::Result<()> {
    match action {
        ProjectCommand::Create { title, template, from } => {
            let project = store.create_project(user, &title).await?;
            if let Some(template) = template {
                store.set_template(&project.id, template).await?;
            }
            if let Some(dir) = from {
                let count = import_dir(store, &project.id, &dir).await?;
                println!("Imported {} files from {}", count, dir.display());
            }
            println!("{}", project.id);
        }
        ProjectCommand::List => {
            for project in store.list_projects(user).await? {
                let template = project.template.map(|t| t.as_str()).unwrap_or("-");
                println!("{}  {:<7} {}", project.id, template, project.title);
            }
        }
        ProjectCommand::Import { project, dir } => {
            let id = owned(store, user, &project).await?;
            let count = import_dir(store, &id, &dir).await?;
            println!("Imported {} files", count);
        }
        ProjectCommand::Delete { project } => {
            let id = owned(store, user, &project).await?;
            store.delete_project(&id).await?;
            println!("Deleted {}", id);
        }
    }
    Ok(())
}

async fn owned(store: &dyn ProjectStore, user: &str, project: &str) -> anyhow::Result<ProjectId> {
    let id = ProjectId::from(project);
    match store.get_project(&id).await? {
        Some(p) if p.is_owned_by(user) => Ok(id),
        Some(_) => bail!("you do not own project {}", id),
        None => bail!("project {} not found", id),
    }
}

/// Choose a template from the first message when the project has none yet
async fn ensure_template(store: &dyn ProjectStore, model: &dyn CompletionModel, id: &ProjectId, message: &str) -> anyhow::Result<()> {
    let project = store.get_project(id).await?.context("project not found")?;
    if project.template.is_none() {
        let template = classify_template(model, message).await;
        store.set_template(id, template).await?;
        info!(project_id = %id, template = %template, "Template selected");
    }
    Ok(())
}

async fn send_and_run(
    agent: &AgentController,
    store: &dyn ProjectStore,
    model: &dyn CompletionModel,
    user: &str,
    id: &ProjectId,
    message: &str,
) -> anyhow::Result<AgentOutcome> {
    agent.send_user_message(id, user, message).await?;
    ensure_template(store, model, id, message).await?;
    Ok(agent.run(id, user, Some(message)).await?)
}

fn print_outcome(outcome: &AgentOutcome, failure_message: &str) {
    match outcome.termination {
        Termination::FinalResponse => println!("{}", outcome.final_response.as_deref().unwrap_or("")),
        Termination::FatalError => println!("{}", failure_message),
        Termination::TurnBudgetExhausted | Termination::DeadlineExceeded => {
            println!("(agent stopped after {} turns without a reply)", outcome.turns)
        }
    }
    eprintln!(
        "[{}] turns={} tool_calls={} run_id={}",
        outcome.termination.as_str(),
        outcome.turns,
        outcome.tool_calls,
        outcome.run_id
    );
}

fn build_agent(
    config: &AppConfig,
    model: Arc<dyn CompletionModel>,
    store: Arc<dyn ProjectStore>,
    signals: RestartSignals,
    sandboxes: Option<(Arc<dyn SandboxProvider>, LiveSandboxes)>,
) -> AgentController {
    let agent = AgentController::new(model, store, signals, config.agent_config());
    match sandboxes {
        Some((provider, live)) => agent.with_sandboxes(provider, live),
        None => agent,
    }
}

async fn chat(store_url: &str, store: Arc<dyn ProjectStore>, user: &str, project: &str, message: &str) -> anyhow::Result<()> {
    let config = load_config(store_url)?;
    let model = chat_model(&config)?;
    let id = owned(store.as_ref(), user, project).await?;

    let sandboxes = match config.sandbox_api_key {
        Some(_) => Some((sandbox_provider(&config)?, LiveSandboxes::new())),
        None => None,
    };
    // No preview in this process; the flag stays set for the next `preview`
    let (signals, _receiver) = signal::channel(store.clone());
    let agent = build_agent(&config, model.clone(), store.clone(), signals, sandboxes);

    let outcome = send_and_run(&agent, store.as_ref(), model.as_ref(), user, &id, message).await?;
    print_outcome(&outcome, &agent.config().failure_message);
    Ok(())
}

async fn edit(store: Arc<dyn ProjectStore>, user: &str, project: &str, path: &str, content: &str) -> anyhow::Result<()> {
    let id = owned(store.as_ref(), user, project).await?;
    let path = codeagent::store::ProjectPath::new(path)?;
    store.write_file(&id, &path, content).await?;
    store.mark_needs_refresh(&id).await?;
    println!("Saved {}", path);
    Ok(())
}

async fn preview(store_url: &str, store: Arc<dyn ProjectStore>, user: &str, project: &str) -> anyhow::Result<()> {
    let config = load_config(store_url)?;
    let model = chat_model(&config)?;
    let provider = sandbox_provider(&config)?;
    let id = owned(store.as_ref(), user, project).await?;

    let live = LiveSandboxes::new();
    let manager = Arc::new(SandboxManager::new(provider.clone(), store.clone()));
    let supervisor = Arc::new(PreviewSupervisor::new(
        manager,
        store.clone(),
        live.clone(),
        PreviewSettings::default(),
    ));

    // A fresh start hydrates everything, so any stale flag is already satisfied
    store.take_needs_refresh(&id).await?;
    let info = supervisor.start(&id).await?;
    println!("Preview ({}) at {}", info.template, info.url);

    let (signals, receiver) = signal::channel(store.clone());
    let runner = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run(receiver).await })
    };
    let agent = build_agent(&config, model.clone(), store.clone(), signals, Some((provider, live)));

    println!("Type a message and press Enter; Ctrl-C to stop.");
    let session = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(rest) = line.strip_prefix(":edit ") {
                        // :edit <path> <content> writes a one-line file through the preview
                        let (path, content) = rest.split_once(' ').unwrap_or((rest, ""));
                        match supervisor.save_and_sync(&id, user, path, content).await {
                            Ok(SyncOutcome::Synced) => println!("Saved and synced {}", path),
                            Ok(SyncOutcome::NotLive) => println!("Saved {} (no live preview)", path),
                            Ok(SyncOutcome::SyncFailed(e)) => println!("Saved {}, sync failed: {}", path, e),
                            Err(e) => eprintln!("edit failed: {}", e),
                        }
                        continue;
                    }
                    match send_and_run(&agent, store.as_ref(), model.as_ref(), user, &id, line).await {
                        Ok(outcome) => print_outcome(&outcome, &agent.config().failure_message),
                        Err(e) => eprintln!("message failed: {:#}", e),
                    }
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    let (result, stopped) = supervisor.run_session(&id, session).await;
    drop(agent);
    runner.abort();
    match stopped {
        Ok(outcome) => println!("Preview stopped ({:?})", outcome),
        Err(e) => eprintln!("Preview stop failed: {}", e),
    }
    result
}
