//! agentloop - agentic workflow runtime
//!
//! Usage:
//!   agentloop demo                          → scripted "Send hello to Karen" run
//!   agentloop demo --goal "..." --confirm   → ask on stdin before each tool call
//!   agentloop config                        → print the effective config as TOML
//!   agentloop version                       → show version

use agentloop_agent::{Agent, AgentConfig, Event};
use agentloop_core::{Role, ToolCallRequest, ToolOutput};
use agentloop_llm::{ScriptedBehavior, ScriptedDecisionMaker};
use agentloop_tools::{
    AlwaysApprove, ArgumentSchema, Confirmation, ConfirmationHandler, ParamType, ToolArgs,
    ToolContext, ToolContract,
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agentloop",
    about = "Agentic workflow runtime: decision loop, tools, shared contexts",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (TOML)
    #[arg(long, global = true, default_value = "agentloop.toml")]
    config: PathBuf,

    /// Write logs to a file (in addition to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Override the step budget
    #[arg(long, global = true)]
    max_steps: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted scenario and print its events
    Demo {
        /// Goal handed to the agent
        #[arg(short, long, default_value = "Send hello to Karen")]
        goal: String,
        /// Ask for confirmation on stdin before each tool call
        #[arg(long, default_value_t = false)]
        confirm: bool,
        /// Print events as JSON lines
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the effective config
    Config,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("agentloop v{}", env!("CARGO_PKG_VERSION"));
        }

        Commands::Config => {
            print!("{}", load_config(&cli.config, cli.max_steps).to_toml());
        }

        Commands::Demo {
            ref goal,
            confirm,
            json,
        } => {
            let _guard = init_tracing(cli.log_file.as_deref())?;
            let config = load_config(&cli.config, cli.max_steps);
            run_demo(config, goal, confirm, json).await?;
        }
    }

    Ok(())
}

fn load_config(path: &Path, max_steps: Option<usize>) -> AgentConfig {
    let mut config = AgentConfig::load(path);
    if let Some(max_steps) = max_steps {
        config.run.max_steps = max_steps;
    }
    config
}

/// Returns the file writer's guard; logs are flushed when it drops.
fn init_tracing(
    log_file: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agentloop=info".into());
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("--log-file needs a file name: {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

/// Last word after " to ", e.g. "Send hello to Karen" → "Karen".
fn recipient(goal: &str) -> String {
    goal.rsplit_once(" to ")
        .map(|(_, rest)| rest.trim().trim_end_matches(['.', '!', '?']).to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "Karen".to_string())
}

fn send_hello() -> anyhow::Result<ToolContract> {
    Ok(ToolContract::builder("send_hello")
        .description("Send a hello message to a person")
        .schema(
            ArgumentSchema::new()
                .required("destination", ParamType::String, "Recipient name")
                .required("message", ParamType::String, "Message text"),
        )
        .sync_handler(|args| {
            let to = args.str("destination").unwrap_or_default();
            let message = args.str("message").unwrap_or_default();
            Ok(ToolOutput::text(format!("Sent \"{}\" to {}", message, to)))
        })
        .build()?)
}

/// Calls `send_hello` once, then answers with the tool's output.
fn scripted_decisions() -> ScriptedDecisionMaker {
    ScriptedDecisionMaker::constant(ScriptedBehavior::respond(|req| {
        match req.messages.last() {
            Some(last) if last.role == Role::Tool => {
                ScriptedBehavior::text(format!("Done. {}.", last.content))
            }
            _ => {
                let goal = req.last_user_message().unwrap_or_default();
                ScriptedBehavior::tool_call(
                    "send_hello",
                    json!({ "destination": recipient(goal), "message": "hello" }),
                )
            }
        }
    }))
}

/// Asks on the terminal before each tool call.
struct StdinConfirmation;

#[async_trait::async_trait]
impl ConfirmationHandler for StdinConfirmation {
    async fn before_call(
        &self,
        request: &ToolCallRequest,
        args: &ToolArgs,
        _ctx: &ToolContext,
    ) -> Confirmation {
        let prompt = format!(
            "Call {} with {}? [y/N] ",
            request.tool_name,
            serde_json::to_string(args).unwrap_or_default()
        );
        let answer = tokio::task::spawn_blocking(move || {
            let mut stdout = std::io::stdout();
            let _ = write!(stdout, "{}", prompt);
            let _ = stdout.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if matches!(line.trim(), "y" | "Y" | "yes") => Confirmation::Approve,
            _ => Confirmation::Veto(format!("The user declined the {} call.", request.tool_name)),
        }
    }
}

async fn run_demo(config: AgentConfig, goal: &str, confirm: bool, json: bool) -> anyhow::Result<()> {
    let handler: Arc<dyn ConfirmationHandler> = if confirm {
        Arc::new(StdinConfirmation)
    } else {
        Arc::new(AlwaysApprove)
    };
    let agent = Agent::builder(Arc::new(scripted_decisions()))
        .tool(send_hello()?)?
        .config(config)
        .confirmation(handler)
        .build();

    let context = agent.new_context();
    let mut run = agent.run(goal, Some(&context))?;
    let mut events = run.stream_events();

    while let Some(event) = events.next().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match &event {
            Event::Delta { text } => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            Event::ToolCallStarted { tool_name, arguments, .. } => {
                println!("→ {} {}", tool_name, arguments);
            }
            Event::ToolCallResult { result } => {
                let mark = if result.is_error() { "✗" } else { "✓" };
                println!("{} {}: {}", mark, result.tool_name, result.to_content_string());
            }
            Event::FinalAnswer { .. } => println!(),
            Event::Error { error } => eprintln!("error: {}", error),
        }
    }

    let outcome = run.await;
    tracing::info!(
        context = %context.id(),
        messages = context.message_count().await,
        "demo finished"
    );
    outcome.map(|_| ()).map_err(anyhow::Error::from)
}
