//! termagent - a terminal assistant

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use termagent_agent::AgentError;
use termagent_config::Config;

mod chat;
mod commands;
mod history;
mod memory;

use commands::{
    ask_command, chat_command, config_command, history_command, memory_command, task_command,
    tools_command, ConfigAction, MemoryAction, Target, ToolsAction,
};

/// termagent - answers terminal questions and runs tool-using tasks
#[derive(Parser)]
#[command(name = "termagent")]
#[command(about = "A terminal assistant backed by your choice of language model")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a single question
    Ask {
        /// Print the answer as it arrives
        #[arg(short, long)]
        stream: bool,
        /// Provider id, defaults to the configured one
        #[arg(short, long)]
        provider: Option<String>,
        /// Model id, defaults to the provider's configured model
        #[arg(short, long)]
        model: Option<String>,
        /// Put remembered facts in the system prompt
        #[arg(short = 'M', long)]
        memory: bool,
        /// The question
        #[arg(required = true, trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Continue a conversation that persists between calls
    Chat {
        /// Start a fresh conversation
        #[arg(short, long)]
        new: bool,
        #[arg(short, long)]
        stream: bool,
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        #[arg(short = 'M', long)]
        memory: bool,
        /// The message
        #[arg(required = true, trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Work on a task using tools
    Task {
        #[arg(short, long)]
        provider: Option<String>,
        #[arg(short, long)]
        model: Option<String>,
        /// The task
        #[arg(required = true, trailing_var_arg = true)]
        query: Vec<String>,
    },
    /// Inspect and run tools
    #[command(disable_help_subcommand = true)]
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },
    /// Remember facts for later prompts
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Show recent questions and tasks
    History {
        /// Number of entries
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Show or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

fn init_tracing(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// One line per failure, prefixed with its kind
fn describe(err: &anyhow::Error) -> String {
    match err.downcast_ref::<AgentError>() {
        Some(agent) => format!("{}: {}", agent.kind(), agent),
        None => format!("error: {:#}", err),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load().await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(cli.verbose, &config.log_level);

    let result = match cli.command {
        Commands::Ask {
            stream,
            provider,
            model,
            memory,
            query,
        } => {
            let target = Target {
                provider,
                model,
                memory,
            };
            ask_command(&config, target, query.join(" "), stream).await
        }
        Commands::Chat {
            new,
            stream,
            provider,
            model,
            memory,
            query,
        } => {
            let target = Target {
                provider,
                model,
                memory,
            };
            chat_command(&config, target, query.join(" "), stream, new).await
        }
        Commands::Task {
            provider,
            model,
            query,
        } => {
            let target = Target {
                provider,
                model,
                ..Default::default()
            };
            task_command(&config, target, query.join(" ")).await
        }
        Commands::Tools { action } => tools_command(&config, action).await,
        Commands::Memory { action } => memory_command(action).await,
        Commands::History { limit } => history_command(limit).await,
        Commands::Config { action } => config_command(config, action).await,
    };

    if let Err(e) = result {
        eprintln!("{}", describe(&e));
        std::process::exit(1);
    }
}
