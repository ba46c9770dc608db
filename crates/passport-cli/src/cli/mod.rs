//! CLI entry and dispatch.

use anyhow::{Context, Result};
use clap::Parser;
use passport_core::{config, logging};

mod commands;

#[derive(Parser)]
#[command(name = "passport")]
#[command(version = "0.1")]
#[command(about = "Log in with a social identity provider")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Run a login handshake and print the result
    Login {
        /// Permission to request (repeatable; defaults to config scopes)
        #[arg(long = "scope", value_name = "PERMISSION")]
        scopes: Vec<String>,

        /// Loopback port for the redirect listener (0 = any free port)
        #[arg(long, env = "PASSPORT_CALLBACK_PORT")]
        port: Option<u16>,

        /// Print the login URL instead of opening a browser
        #[arg(long = "no-browser")]
        no_browser: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Correlation token for this handshake (default: random)
        #[arg(long, value_name = "ID")]
        correlation: Option<String>,
    },

    /// Show whether a cached credential is available
    Status,

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

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Login {
            scopes,
            port,
            no_browser,
            json,
            correlation,
        } => {
            let home = config::paths::passport_home();
            let config = config::Config::load().context("load config")?;
            // Held until exit so the file writer flushes.
            let _log_guard = logging::init(&config, &home).context("init logging")?;

            commands::login::run(
                &config,
                &home,
                commands::login::LoginOptions {
                    scopes,
                    port,
                    no_browser,
                    json,
                    correlation,
                },
            )
            .await
        }

        Commands::Status => {
            let config = config::Config::load().context("load config")?;
            commands::status::run(&config)
        }

        Commands::Config { command } => match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        },
    }
}
