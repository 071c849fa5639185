use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod common;
mod http;

#[derive(Parser)]
#[command(name = "rhythmguard", version, about = "Rhythm enforcement engine")]
struct Cli {
    /// Config file (default: config.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides server.db_path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server and the enforcement scheduler
    Serve(commands::serve::ServeArgs),
    /// Session control against the local store
    Session {
        #[command(subcommand)]
        action: commands::session::SessionAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Break and evening-mode state
    State {
        #[command(subcommand)]
        action: commands::state::StateAction,
    },
}

const SERVE_LOG_FILTER: &str = "rhythmguard=info,rhythmguard_core=info,tower_http=info";
const CLI_LOG_FILTER: &str = "rhythmguard=warn,rhythmguard_core=warn";

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let default_filter = match cli.command {
        Commands::Serve(_) => SERVE_LOG_FILTER,
        _ => CLI_LOG_FILTER,
    };
    init_tracing(default_filter);

    let ctx = match common::Context::new(cli.config, cli.db) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve(args) => commands::serve::run(&ctx, args).await,
        Commands::Session { action } => commands::session::run(&ctx, action).await,
        Commands::Config { action } => commands::config::run(&ctx, action),
        Commands::State { action } => commands::state::run(&ctx, action).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
