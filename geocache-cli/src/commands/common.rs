//! Argument parsing shared across CLI commands.

use std::path::Path;

use geocache::config::ConfigFile;
use geocache::coord::GeoBounds;

use crate::error::CliError;

/// Parses a bounding box given as `south,west,north,east` in degrees.
pub fn parse_bbox(s: &str) -> Result<GeoBounds, String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!(
            "expected south,west,north,east but got {} value(s)",
            parts.len()
        ));
    }

    let mut values = [0.0f64; 4];
    for (value, part) in values.iter_mut().zip(&parts) {
        *value = part
            .parse()
            .map_err(|_| format!("'{}' is not a number", part))?;
    }

    let [south, west, north, east] = values;
    GeoBounds::new(south, west, north, east).map_err(|e| e.to_string())
}

/// Parses a `key=value` filter parameter.
pub fn parse_param(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value but got '{}'", s)),
    }
}

/// Loads the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<ConfigFile, CliError> {
    let config = match path {
        Some(path) => ConfigFile::load_from(path)?,
        None => ConfigFile::load()?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        let bounds = parse_bbox("52.4, 13.3, 52.6, 13.5").unwrap();
        assert_eq!(bounds.south, 52.4);
        assert_eq!(bounds.west, 13.3);
        assert_eq!(bounds.north, 52.6);
        assert_eq!(bounds.east, 13.5);
    }

    #[test]
    fn test_parse_bbox_rejects_bad_input() {
        assert!(parse_bbox("52.4,13.3,52.6").is_err());
        assert!(parse_bbox("52.4,13.3,north,13.5").is_err());
        // South above north
        assert!(parse_bbox("52.6,13.3,52.4,13.5").is_err());
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(
            parse_param("kind=station").unwrap(),
            ("kind".to_string(), "station".to_string())
        );
        assert_eq!(
            parse_param("note=a=b").unwrap(),
            ("note".to_string(), "a=b".to_string())
        );
        assert!(parse_param("kind").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn test_load_config_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[cache]\nzoom = 12\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.cache.zoom, 12);
    }
}
