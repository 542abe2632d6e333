//! # chatgate-cli
//!
//! Command-line interface for Chatgate.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use chatgate_core::error::format_error_with_suggestion;
use chatgate_core::{Config, StorageBackend};
use chatgate_providers::{OpenAIClient, TiktokenTokenizer};
use chatgate_session::{
    ConversationStore, MemoryConversationStore, SessionManager, SqliteConversationStore,
};

mod commands;

/// Application context containing shared state.
pub struct AppContext {
    pub manager: SessionManager,
}

impl AppContext {
    /// Wire the store, client and tokenizer described by `config`.
    fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn ConversationStore> = match config.storage.backend {
            StorageBackend::Sqlite => Arc::new(SqliteConversationStore::from_config(&config.storage)?),
            StorageBackend::Memory => Arc::new(MemoryConversationStore::new()),
        };
        let client = Arc::new(OpenAIClient::from_config(&config.provider));
        let tokenizer = Arc::new(TiktokenTokenizer::new());

        let manager = SessionManager::from_config(config, store, client, tokenizer);
        Ok(Self { manager })
    }
}

/// Chatgate - session-aware chat completions from the command line
#[derive(Parser)]
#[command(name = "chatgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message, continuing a session if one is given
    Ask(AskArgs),
    /// Session management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(clap::Args)]
struct AskArgs {
    /// Message to send
    #[arg(value_name = "PROMPT")]
    prompt: String,

    /// Session to continue (a new one is started if omitted)
    #[arg(short, long, value_name = "SESSION_ID")]
    session: Option<String>,

    /// Model to use (e.g., gpt-3.5-turbo, gpt-4o)
    #[arg(short, long)]
    model: Option<String>,

    /// Print the reply as it arrives
    #[arg(long)]
    stream: bool,

    /// Reply token budget
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// API key (overrides configuration)
    #[arg(long, env = "CHATGATE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show a session's conversation
    Show {
        /// Session ID
        id: String,
        /// Print the stored record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete session
    Delete {
        /// Session ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check configuration for problems
    Validate,
    /// Show configuration and data locations
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    if let Err(e) = run(cli.command, config).await {
        eprintln!("Error: {}", describe(&e));
        std::process::exit(1);
    }

    Ok(())
}

/// Render an error for the terminal, with a recovery hint when one is known.
fn describe(error: &anyhow::Error) -> String {
    match error.downcast_ref::<chatgate_core::Error>() {
        Some(e) => format_error_with_suggestion(e),
        None => format!("{:#}", error),
    }
}

async fn run(command: Commands, config: Config) -> anyhow::Result<()> {
    match command {
        Commands::Ask(args) => {
            let ctx = AppContext::from_config(&config.check()?)?;
            commands::ask::run(args, &ctx).await?;
        }
        Commands::Session { action } => {
            let ctx = AppContext::from_config(&config)?;
            commands::session::handle(action, &ctx).await?;
        }
        Commands::Config { action } => {
            commands::config::handle(action, &config)?;
        }
        Commands::Version => {
            println!("chatgate {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
