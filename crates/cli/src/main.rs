//! Talk2SQL CLI, the main entry point.
//!
//! Commands:
//! - `init`     Write the default config and data directories
//! - `serve`    Start the HTTP gateway
//! - `ask`      Ask one question about a conversation's database
//! - `history`  Show or delete a conversation

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "talk2sql",
    about = "Talk2SQL: ask questions about a SQLite database in plain language",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directories
    Init,

    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a question about a conversation's database
    Ask {
        /// Conversation id
        #[arg(short, long)]
        conversation: String,

        /// SQLite file to attach to the conversation first
        #[arg(long)]
        db: Option<std::path::PathBuf>,

        /// Print model output as it streams
        #[arg(long)]
        stream: bool,

        /// The question
        prompt: String,
    },

    /// Inspect or delete conversation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Print a conversation's messages
    Show { id: String },

    /// Delete a conversation's history and database
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging format comes from the config file when one loads
    let json = talk2sql_config::AppConfig::load()
        .map(|c| c.logging.json)
        .unwrap_or(false);

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask {
            conversation,
            db,
            stream,
            prompt,
        } => commands::ask::run(&conversation, db.as_deref(), stream, &prompt).await?,
        Commands::History { action } => match action {
            HistoryAction::Show { id } => commands::history::show(&id).await?,
            HistoryAction::Delete { id } => commands::history::delete(&id).await?,
        },
    }

    Ok(())
}
