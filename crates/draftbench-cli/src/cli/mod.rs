//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use draftbench_core::config::Config;

mod commands;

#[derive(Parser)]
#[command(name = "draftbench")]
#[command(version)]
#[command(about = "Draftbench CAD workbench companion CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Log in with an API token
    Login {
        /// Token to store (reads from stdin when omitted)
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Log out and clear stored credentials
    Logout,
    /// Show the current session state
    Status,
    /// Show the authenticated user profile
    Whoami,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_tracing();

    // one tokio runtime for everything
    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config = Config::load().context("load config")?;
    tracing::debug!(
        api_base_url = %config.api_base_url,
        test_mode = config.test_mode,
        development = config.development,
        "config loaded"
    );

    match cli.command {
        Commands::Login { token } => commands::auth::login(&config, token).await,
        Commands::Logout => commands::auth::logout(),
        Commands::Status => commands::auth::status(&config).await,
        Commands::Whoami => commands::auth::whoami(&config).await,
        Commands::Config { command } => match command {
            ConfigCommands::Path => commands::config::path(),
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
