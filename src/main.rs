use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "cdw")]
#[command(about = "Terminal sessions with a local automation API")]
#[command(version)]
struct Cli {
    /// Directory for config, credentials and shell integration
    /// (defaults to the platform config directory)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run headless: sessions plus the automation API until Ctrl-C
    Serve {
        /// Shell for sessions opened through the API
        #[arg(long)]
        shell: Option<String>,
    },

    /// Manage the persisted automation API config
    Api {
        #[command(subcommand)]
        action: ApiAction,
    },

    /// Open an interactive session on this terminal
    Spawn {
        /// Working directory of the session
        #[arg(long)]
        cwd: PathBuf,

        /// Shell to launch (defaults to $SHELL)
        #[arg(long)]
        shell: Option<String>,
    },
}

#[derive(Subcommand)]
enum ApiAction {
    /// Enable the API, limited to the given directories
    Enable {
        /// Allowed root directory (repeatable)
        #[arg(long = "root", required = true)]
        roots: Vec<PathBuf>,
    },

    /// Disable the API
    Disable,

    /// Show config and whether a server is listening
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let state_dir = cli.state_dir.as_deref();

    match cli.command {
        Commands::Serve { shell } => {
            cli::serve::serve_command(state_dir, shell).await?;
        }
        Commands::Api { action } => match action {
            ApiAction::Enable { roots } => cli::api::enable_command(state_dir, &roots)?,
            ApiAction::Disable => cli::api::disable_command(state_dir)?,
            ApiAction::Status => cli::api::status_command(state_dir)?,
        },
        Commands::Spawn { cwd, shell } => {
            cli::spawn::spawn_command(state_dir, &cwd, shell).await?;
        }
    }

    Ok(())
}
