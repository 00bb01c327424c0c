mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "serverpal",
    about = "Dedicated server manager: start, stop, update and back up a game server",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: ~/.serverpal/config.yaml)
    #[arg(long, global = true, env = "SERVERPAL_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server in its labelled session
    Start,

    /// Terminate the server session
    Stop,

    /// Stop the server session, then start it again
    Restart,

    /// Archive the source data directory into a timestamped backup
    Backup,

    /// Run one maintenance cycle: optional backup, update, restart if updated
    Update,

    /// Run the maintenance schedule with an interactive console
    Daemon {
        /// Don't read console commands from stdin; run until Ctrl-C
        #[arg(long)]
        no_console: bool,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Daemon { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let result = root::resolve_config_path(cli.config.as_deref()).and_then(|config| {
        match cli.command {
            Commands::Start => cmd::server::start(&config, cli.json),
            Commands::Stop => cmd::server::stop(&config, cli.json),
            Commands::Restart => cmd::server::restart(&config, cli.json),
            Commands::Backup => cmd::backup::run(&config, cli.json),
            Commands::Update => cmd::update::run(&config, cli.json),
            Commands::Daemon { no_console } => cmd::daemon::run(&config, no_console),
            Commands::Config { subcommand } => cmd::config::run(&config, subcommand, cli.json),
        }
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
