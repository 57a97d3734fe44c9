//! agentgraph - run LLM agents from the terminal

use agentgraph_cli::{AgentKind, AppConfig, Deps, Session, Terminal};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use utils::ValidateConfig;

#[derive(Parser)]
#[command(name = "agentgraph")]
#[command(about = "Run LLM agents built as state graphs", long_about = None)]
#[command(version)]
struct Cli {
    /// YAML or JSON configuration file
    #[arg(short, long, global = true, env = "AGENTGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask an agent questions; interrupts are answered on stdin
    Run {
        agent: AgentKind,

        /// Conversation thread, reused to continue an earlier exchange
        #[arg(short, long)]
        thread: Option<String>,

        /// Ask one question and exit instead of reading questions from stdin
        #[arg(short, long)]
        question: Option<String>,
    },

    /// Print an agent's graph as a Mermaid flowchart
    Graph { agent: AgentKind },

    /// Print the effective configuration
    Config {
        /// Validate it and exit non-zero when invalid
        #[arg(long)]
        check: bool,
    },
}

fn init_tracing(config: &AppConfig, verbose: bool) {
    let fallback = if verbose { "debug" } else { config.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("cannot load configuration")?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Run {
            agent,
            thread,
            question,
        } => run(config, agent, thread, question).await,
        Commands::Graph { agent } => {
            let session = Session::new(config);
            let compiled = session.compile(agent, Deps::offline().await?)?;
            println!("{}", compiled.draw_mermaid());
            Ok(())
        }
        Commands::Config { check } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if check {
                config.validate().context("configuration is invalid")?;
                let spec = config.model_spec()?;
                match spec.provider.api_key_env() {
                    Some(key) if std::env::var(key).is_err() => println!("\n{} is not set", key),
                    _ => {}
                }
                println!("\nconfiguration is valid");
            }
            Ok(())
        }
    }
}

async fn run(config: AppConfig, kind: AgentKind, thread: Option<String>, question: Option<String>) -> Result<()> {
    config.validate().context("configuration is invalid")?;
    let deps = Deps::load(kind, &config).await?;
    let session = Session::new(config);
    let agent = session.compile(kind, deps)?;

    let thread = thread.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let run_config = session.run_config(&thread);
    tracing::info!(agent = %kind, thread = %thread, "session started");
    let mut terminal = Terminal;

    if let Some(question) = question {
        let answer = agent.ask(&question, &run_config, &mut terminal).await?;
        println!("{}", answer);
        return Ok(());
    }

    println!("{} on thread {} (empty line or Ctrl-D to quit)", agent.name(), thread);
    while let Some(question) = terminal.read_line("\nyou> ")? {
        let question = question.trim();
        if question.is_empty() || question == "exit" {
            break;
        }
        match agent.ask(question, &run_config, &mut terminal).await {
            Ok(answer) => println!("\n{}", answer),
            Err(e) => {
                tracing::error!(error = %e, "run failed");
                eprintln!("error: {:#}", e);
            }
        }
    }
    Ok(())
}
