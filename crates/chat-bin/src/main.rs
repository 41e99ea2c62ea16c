//! Club Chat - command-line client for the chat sync engine.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use chat_config_and_utils::{Config, Paths};

/// Club Chat command-line interface.
#[derive(Parser)]
#[command(name = "club-chat")]
#[command(about = "Read and send club chat messages from the terminal")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the config file value
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, cache and logs. Defaults to ~/.club-chat
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Supabase access token of the signed-in user
    #[arg(long, env = "CLUB_CHAT_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List conversations, most recent first
    Conversations,
    /// Show the messages of a conversation and mark it read
    Messages {
        /// Profile id of the other participant
        peer: String,
        /// Extra pages of older messages to load
        #[arg(long, default_value_t = 0)]
        more: usize,
    },
    /// Send a text message, or a file with an optional caption
    Send {
        peer: String,
        #[arg(default_value = "")]
        body: String,
        /// Attach this file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Upload an attachment and print its metadata
    Upload { path: PathBuf },
    /// Mark every message from a peer as read
    Read { peer: String },
    /// Delete one of your messages
    Delete { peer: String, message_id: String },
    /// Show the persisted open conversation without contacting the server
    Snapshot,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    app::init(&config, &paths, cli.log_level.as_deref())?;

    if let Commands::Snapshot = cli.command {
        return app::print_snapshot(&config, &paths);
    }

    let token = cli
        .access_token
        .ok_or_else(|| anyhow::anyhow!("no access token; set CLUB_CHAT_ACCESS_TOKEN"))?;
    let engine = app::start_engine(&config, &paths, token).await?;

    let result = match cli.command {
        Commands::Conversations => app::list_conversations(&engine).await,
        Commands::Messages { peer, more } => app::show_messages(&engine, &peer, more).await,
        Commands::Send { peer, body, file } => {
            app::send(&engine, &peer, &body, file.as_deref()).await
        }
        Commands::Upload { path } => app::upload(&engine, &path).await,
        Commands::Read { peer } => app::mark_read(&engine, &peer).await,
        Commands::Delete { peer, message_id } => {
            app::delete(&engine, &peer, &message_id).await
        }
        Commands::Snapshot => Ok(()),
    };

    engine.shutdown();
    result
}
