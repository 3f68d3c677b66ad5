//! INI configuration file.
//!
//! ```ini
//! [cache]
//! zoom = 14
//! target_tiles = 50
//! evict_batch = 20
//! compaction_interval = 10
//! reload_interval_secs = 300
//! workers = 4
//!
//! [logging]
//! level = info
//! directory = /var/log/geocache
//! file_name = geocache.log
//! ```
//!
//! Missing sections and keys keep their defaults.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::{CacheConfig, ConfigError};

/// Default log file name when logging to a directory.
pub const DEFAULT_LOG_FILE_NAME: &str = "geocache.log";

const SECTION_CACHE: &str = "cache";
const SECTION_LOGGING: &str = "logging";

/// Default location of the configuration file.
///
/// `<config_dir>/geocache/config.ini`, e.g. `~/.config/geocache/config.ini`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("geocache").join("config.ini"))
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,

    /// Directory for daily-rolled log files. `None` logs to stderr.
    pub directory: Option<PathBuf>,

    /// Log file name prefix inside `directory`.
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_name: DEFAULT_LOG_FILE_NAME.to_string(),
        }
    }
}

/// Parsed configuration file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigFile {
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

impl ConfigFile {
    /// Loads the file at the default location, or defaults if there is none.
    pub fn load() -> Result<Self, ConfigError> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Loads and validates the file at `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_ini_str(&text)?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parses and validates INI text.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();

        if let Some(section) = ini.section(Some(SECTION_CACHE)) {
            let cache = &mut config.cache;
            read_value(section, SECTION_CACHE, "zoom", &mut cache.zoom)?;
            read_value(section, SECTION_CACHE, "target_tiles", &mut cache.target_tiles)?;
            read_value(section, SECTION_CACHE, "evict_batch", &mut cache.evict_batch)?;
            read_value(
                section,
                SECTION_CACHE,
                "compaction_interval",
                &mut cache.compaction_interval,
            )?;
            read_value(section, SECTION_CACHE, "workers", &mut cache.workers)?;

            let mut secs = cache.reload_interval.as_secs();
            read_value(section, SECTION_CACHE, "reload_interval_secs", &mut secs)?;
            cache.reload_interval = Duration::from_secs(secs);
        }

        if let Some(section) = ini.section(Some(SECTION_LOGGING)) {
            let logging = &mut config.logging;
            if let Some(level) = non_empty(section, "level") {
                logging.level = level.to_string();
            }
            if let Some(dir) = non_empty(section, "directory") {
                logging.directory = Some(PathBuf::from(dir));
            }
            if let Some(name) = non_empty(section, "file_name") {
                logging.file_name = name.to_string();
            }
        }

        config.cache.validate()?;
        Ok(config)
    }

    /// Renders the configuration as INI text.
    pub fn to_ini_string(&self) -> Result<String, ConfigError> {
        let mut ini = Ini::new();
        let cache = &self.cache;
        ini.with_section(Some(SECTION_CACHE))
            .set("zoom", cache.zoom.to_string())
            .set("target_tiles", cache.target_tiles.to_string())
            .set("evict_batch", cache.evict_batch.to_string())
            .set("compaction_interval", cache.compaction_interval.to_string())
            .set(
                "reload_interval_secs",
                cache.reload_interval.as_secs().to_string(),
            )
            .set("workers", cache.workers.to_string());

        let logging = &self.logging;
        let directory = logging
            .directory
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_default();
        ini.with_section(Some(SECTION_LOGGING))
            .set("level", logging.level.as_str())
            .set("directory", directory)
            .set("file_name", logging.file_name.as_str());

        let mut buf = Vec::new();
        ini.write_to(&mut buf)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

fn non_empty<'a>(section: &'a Properties, key: &str) -> Option<&'a str> {
    section.get(key).map(str::trim).filter(|v| !v.is_empty())
}

fn read_value<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = non_empty(section, key) {
        *target = raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: format!("{}.{}", section_name, key),
            value: raw.to_string(),
            reason: "not a valid number".to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_text_gives_defaults() {
        let config = ConfigFile::from_ini_str("").unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_parse_sections() {
        let text = "\
[cache]
zoom = 12
target_tiles = 10
reload_interval_secs = 0

[logging]
level = debug
directory = /tmp/geocache-logs
";
        let config = ConfigFile::from_ini_str(text).unwrap();
        assert_eq!(config.cache.zoom, 12);
        assert_eq!(config.cache.target_tiles, 10);
        assert_eq!(config.cache.evict_batch, 20);
        assert_eq!(config.cache.min_reload_interval(), None);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.directory,
            Some(PathBuf::from("/tmp/geocache-logs"))
        );
        assert_eq!(config.logging.file_name, DEFAULT_LOG_FILE_NAME);
    }

    #[test]
    fn test_invalid_number_reports_key() {
        let err = ConfigFile::from_ini_str("[cache]\nworkers = many\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, "cache.workers");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_out_of_range_zoom_rejected() {
        let err = ConfigFile::from_ini_str("[cache]\nzoom = 30\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_render_and_reload() {
        let mut config = ConfigFile::default();
        config.cache.zoom = 10;
        config.cache.reload_interval = Duration::from_secs(120);
        config.logging.directory = Some(PathBuf::from("/var/log/geocache"));

        let text = config.to_ini_string().unwrap();
        assert!(text.contains("[cache]"));
        assert!(text.contains("zoom=10"));

        let reloaded = ConfigFile::from_ini_str(&text).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nevict_batch = 5").unwrap();

        let config = ConfigFile::load_from(file.path()).unwrap();
        assert_eq!(config.cache.evict_batch, 5);
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigFile::load_from(&dir.path().join("absent.ini")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
