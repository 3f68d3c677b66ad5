//! GeoCache CLI - Command-line interface
//!
//! Runs bounding-box queries through a [`geocache::DataCache`] backed by a
//! JSON file, lists tile grids and manages the configuration file.

mod commands;
mod error;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use console::style;
use geocache::config::ConfigFile;
use geocache::logging::{init_logging, LoggingGuard};

use commands::common::load_config;
use commands::config::ConfigCommands;
use commands::query::QueryArgs;
use commands::tiles::TilesArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "geocache", version, about = "Tile-based spatial data cache")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Query features in a bounding box
    Query(QueryArgs),

    /// List the tiles covering a bounding box
    Tiles(TilesArgs),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();

    match cli.command {
        // Runs before logging is set up
        Commands::Config(command) => commands::config::run(command, config_path),
        Commands::Query(args) => {
            let (config, _guard) = setup(config_path, cli.verbose)?;
            commands::query::run(args, config)
        }
        Commands::Tiles(args) => {
            let (config, _guard) = setup(config_path, cli.verbose)?;
            commands::tiles::run(args, config.cache.zoom)
        }
    }
}

/// Loads the configuration and starts logging.
fn setup(
    config_path: Option<&Path>,
    verbose: bool,
) -> Result<(ConfigFile, LoggingGuard), CliError> {
    let config = load_config(config_path)?;
    let guard = init_logging(&config.logging, verbose)?;
    Ok((config, guard))
}
