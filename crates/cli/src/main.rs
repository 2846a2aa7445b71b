//! Campusd CLI — the main entry point.
//!
//! Commands:
//! - `serve`   — Start the HTTP/WebSocket gateway
//! - `chat`    — Interactive chat or single-message mode
//! - `init`    — Write a default campusd.toml

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "campusd",
    about = "Campusd — campus administration agent backend",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to campusd.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with the campus agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Write a default campusd.toml to the current directory
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from("campusd.toml"));

    match cli.command {
        Commands::Serve { port } => commands::serve::run(&config_path, port).await?,
        Commands::Chat { message } => commands::chat::run(&config_path, message).await?,
        Commands::Init => commands::init::run(&config_path)?,
    }

    Ok(())
}
