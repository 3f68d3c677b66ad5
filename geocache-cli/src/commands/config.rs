//! Configuration management CLI commands.
//!
//! Provides `config path`, `config show` and `config init`.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use console::style;
use geocache::config::{default_config_path, ConfigError, ConfigFile};

use super::common::load_config;
use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration
    Show,

    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, config_path: Option<&Path>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => run_path(config_path),
        ConfigCommands::Show => run_show(config_path),
        ConfigCommands::Init { force } => {
            let path = resolve_path(config_path)?;
            run_init(&path, force)?;
            println!("{} {}", style("Wrote").green().bold(), path.display());
            Ok(())
        }
    }
}

fn resolve_path(config_path: Option<&Path>) -> Result<PathBuf, CliError> {
    config_path
        .map(Path::to_path_buf)
        .or_else(default_config_path)
        .ok_or_else(|| {
            CliError::Config(ConfigError::Parse(
                "no configuration directory on this system; pass --config".to_string(),
            ))
        })
}

fn run_path(config_path: Option<&Path>) -> Result<(), CliError> {
    let path = resolve_path(config_path)?;
    let marker = if path.exists() {
        style("(exists)").green()
    } else {
        style("(not created)").dim()
    };
    println!("{} {}", path.display(), marker);
    Ok(())
}

fn run_show(config_path: Option<&Path>) -> Result<(), CliError> {
    let config = load_config(config_path)?;
    print!("{}", config.to_ini_string()?);
    Ok(())
}

/// Writes the default configuration to `path`.
fn run_init(path: &Path, force: bool) -> Result<(), CliError> {
    if path.exists() && !force {
        return Err(CliError::Config(ConfigError::InvalidValue {
            key: "path".to_string(),
            value: path.display().to_string(),
            reason: "file already exists (use --force to overwrite)".to_string(),
        }));
    }

    let io_error = |source: std::io::Error| ConfigError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_error)?;
    }
    let text = ConfigFile::default().to_ini_string()?;
    std::fs::write(path, text).map_err(io_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.ini");

        run_init(&path, false).unwrap();
        let loaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(loaded, ConfigFile::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[cache]\nzoom = 9\n").unwrap();

        assert!(run_init(&path, false).is_err());
        assert_eq!(ConfigFile::load_from(&path).unwrap().cache.zoom, 9);

        run_init(&path, true).unwrap();
        assert_eq!(ConfigFile::load_from(&path).unwrap(), ConfigFile::default());
    }
}
