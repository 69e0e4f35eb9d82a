mod app;
mod builtin;
mod config_cmd;
mod console;
mod plugins_cmd;
mod terminal_output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use icy_config::{apply_all_defaults, config_dir, config_file_path, load_and_prepare, load_config};
use icy_logging::init_logger;
use tracing::{error, info, warn};

use app::App;

#[derive(Parser)]
#[command(name = "icy")]
#[command(about = "Icy plugin manager: discover, install, update and run plugins")]
#[command(version)]
struct Cli {
    /// Config file (defaults to config.yaml in ICY_CONFIG_DIR or ~/.icy)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed plugins and packages that failed to load
    List,
    /// List plugins offered by the enabled repositories
    Available {
        /// Fetch full descriptors (kind, author, description)
        #[arg(long)]
        details: bool,
    },
    /// Install plugins, with their dependencies, from the repositories
    Install {
        #[arg(required = true)]
        classes: Vec<String>,
    },
    /// Remove installed plugins
    Remove {
        #[arg(required = true)]
        classes: Vec<String>,
    },
    /// Reinstall missing, outdated or broken dependencies
    Check,
    /// Show plugins with a newer version in the repositories
    Updates {
        /// Install every update found
        #[arg(long)]
        apply: bool,
    },
    /// Run an installed plugin
    Run { class: String },
    /// Show the effective configuration
    Config {
        /// Write a config file with default values
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(|| config_file_path(&config_dir()));

    if let Commands::Config { init } = cli.command {
        let config = apply_all_defaults(load_config(&path).await?);
        return config_cmd::run(&path, &config, init).await;
    }

    let config = load_and_prepare(&path).await?;
    let _log_guard = init_logger(config.log_dir(), &config.log_level(), config.log_json())?;
    info!(config = %path.display(), "Icy starting");

    let app = App::new(config)?;
    app.start();
    if !matches!(cli.command, Commands::Check) {
        if let Err(e) = app.auto_check().await {
            warn!(error = format!("{e:#}"), "Automatic dependency check failed");
        }
    }

    let outcome = match &cli.command {
        Commands::List => plugins_cmd::list(&app, cli.json).await,
        Commands::Available { details } => plugins_cmd::available(&app, *details, cli.json).await,
        Commands::Install { classes } => plugins_cmd::install(&app, classes).await,
        Commands::Remove { classes } => plugins_cmd::remove(&app, classes).await,
        Commands::Check => plugins_cmd::check(&app).await,
        Commands::Updates { apply } => plugins_cmd::updates(&app, *apply, cli.json).await,
        Commands::Run { class } => plugins_cmd::run(&app, class).await,
        Commands::Config { .. } => Ok(()),
    };

    app.shutdown().await;
    if let Err(e) = &outcome {
        error!(error = format!("{e:#}"), "Command failed");
    }
    outcome
}
