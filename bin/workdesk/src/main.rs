mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "workdesk")]
#[command(about = "Talk to Calendar, Gmail, Drive and friends from one prompt", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the assistant (interactive unless a message is given)
    Agent {
        /// Handle one message and exit
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show token and per-service scope status (no network)
    Status,

    /// Run the consent flow and store a fresh token
    Login,

    /// Revoke the token and delete it locally
    Logout,

    /// List services, their operations and parameters
    Services,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration, secrets masked
    Show,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command.unwrap_or(Commands::Agent { message: None }) {
        Commands::Agent { message } => {
            commands::agent::run(message).await?;
        }
        Commands::Status => {
            commands::status::run().await?;
        }
        Commands::Login => {
            commands::auth::login().await?;
        }
        Commands::Logout => {
            commands::auth::logout().await?;
        }
        Commands::Services => {
            commands::services::run()?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                commands::config_cmd::show()?;
            }
            ConfigCommands::Init { force } => {
                commands::config_cmd::init(force)?;
            }
        },
    }

    Ok(())
}
