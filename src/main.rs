use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use xptrack::core::log::init_logging;
use xptrack::core::{AccountVariant, Period};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for xptrack::AppCommand {
    fn from(cmd: Commands) -> xptrack::AppCommand {
        match cmd {
            Commands::Add { player, variant } => xptrack::AppCommand::Add { player, variant },
            Commands::Remove { player } => xptrack::AppCommand::Remove { player },
            Commands::List => xptrack::AppCommand::List,
            Commands::Gains {
                player,
                period,
                day,
                refresh,
            } => xptrack::AppCommand::Gains {
                player,
                period,
                day,
                refresh,
            },
            Commands::Track { player } => xptrack::AppCommand::Track { player },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Fetch a player once and start tracking them
    Add {
        player: String,
        /// Account type: normal, ironman, hardcore or ultimate
        #[arg(long)]
        variant: Option<AccountVariant>,
    },
    /// Stop tracking a player and delete their history
    Remove { player: String },
    /// List tracked players
    List,
    /// Display gains for a player (defaults to the last one shown)
    Gains {
        player: Option<String>,
        /// Lookback window: today, week, month or year
        #[arg(short, long, default_value_t = Period::Today)]
        period: Period,
        /// Gains made during a single local day, N days ago
        #[arg(short, long, conflicts_with = "period")]
        day: Option<u32>,
        /// Fetch fresh hiscores before computing gains
        #[arg(short, long)]
        refresh: bool,
    },
    /// Keep every tracked player refreshed daily until interrupted
    Track {
        /// Player to refresh first
        #[arg(short, long)]
        player: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => xptrack::cli::setup::setup_at_path(path),
            None => xptrack::cli::setup::setup(),
        },
        Some(cmd) => xptrack::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
