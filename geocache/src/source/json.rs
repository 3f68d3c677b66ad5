//! JSON file data source.
//!
//! Serves [`PointFeature`]s from a JSON document on disk. The file is re-read
//! on every fetch, so edits made while the cache is running show up on the
//! next refresh. Two layouts are accepted:
//!
//! ```text
//! [ {"id": "a", "lat": 52.5, "lon": 13.4, "properties": {...}}, ... ]
//! {"features": [ ... ]}
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::{DataSource, PointFeature, QueryFilter, SourceError, SpatialEntity};

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    List(Vec<PointFeature>),
    Collection { features: Vec<PointFeature> },
}

/// Data source reading point features from a JSON file.
pub struct JsonFileSource {
    path: PathBuf,
    name: String,
    latency: Option<Duration>,
}

impl JsonFileSource {
    /// Creates a source for the given file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = format!("json:{}", path.display());
        Self {
            path,
            name,
            latency: None,
        }
    }

    /// Adds an artificial delay to every fetch, to mimic a slow upstream.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<PointFeature>, SourceError> {
        let raw = std::fs::read_to_string(&self.path)?;
        let doc: Document = serde_json::from_str(&raw)
            .map_err(|e| SourceError::InvalidResponse(format!("{}: {}", self.name, e)))?;
        Ok(match doc {
            Document::List(features) => features,
            Document::Collection { features } => features,
        })
    }
}

/// True if every filter parameter matches the feature's property of that name.
fn matches_params(feature: &PointFeature, filter: &QueryFilter) -> bool {
    filter
        .params()
        .all(|(key, value)| feature.property_str(key).as_deref() == Some(value))
}

impl DataSource for JsonFileSource {
    type Entity = PointFeature;
    type Filter = QueryFilter;

    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, filter: &QueryFilter) -> Result<Vec<PointFeature>, SourceError> {
        if let Some(latency) = self.latency {
            std::thread::sleep(latency);
        }

        let features = self.load()?;
        let total = features.len();
        let selected: Vec<_> = features
            .into_iter()
            .filter(|f| match filter.envelope() {
                Some(env) => env.intersects(&f.envelope()),
                None => true,
            })
            .filter(|f| matches_params(f, filter))
            .collect();

        debug!(
            source = %self.name,
            total,
            selected = selected.len(),
            "Loaded features from file"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Tile;
    use crate::source::Filter;
    use std::io::Write;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const FEATURES: &str = r#"[
        {"id": "berlin", "lat": 52.52, "lon": 13.405, "properties": {"kind": "pm10"}},
        {"id": "potsdam", "lat": 52.39, "lon": 13.06, "properties": {"kind": "no2"}},
        {"id": "sydney", "lat": -33.86, "lon": 151.2, "properties": {"kind": "pm10"}}
    ]"#;

    #[test]
    fn test_fetch_all() {
        let file = write_file(FEATURES);
        let source = JsonFileSource::new(file.path());
        let features = source.fetch(&QueryFilter::new()).unwrap();
        assert_eq!(features.len(), 3);
    }

    #[test]
    fn test_fetch_scoped_to_envelope() {
        let file = write_file(FEATURES);
        let source = JsonFileSource::new(file.path());

        // Zoom 4 tile covering central Europe
        let tile = crate::coord::to_tile_coords(52.5, 13.4, 4).unwrap();
        let filter = QueryFilter::new().scoped(&tile.envelope());
        let mut ids: Vec<_> = source
            .fetch(&filter)
            .unwrap()
            .into_iter()
            .map(|f| f.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["berlin", "potsdam"]);

        let empty = QueryFilter::new().scoped(&Tile::new(0, 0, 4).envelope());
        assert!(source.fetch(&empty).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_with_params() {
        let file = write_file(FEATURES);
        let source = JsonFileSource::new(file.path());
        let filter = QueryFilter::new().with_param("kind", "pm10");
        let features = source.fetch(&filter).unwrap();
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn test_collection_layout() {
        let file = write_file(r#"{"features": [{"id": "a", "lat": 0.0, "lon": 0.0}]}"#);
        let source = JsonFileSource::new(file.path());
        assert_eq!(source.fetch(&QueryFilter::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let source = JsonFileSource::new("/nonexistent/geocache/features.json");
        let err = source.fetch(&QueryFilter::new()).unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[test]
    fn test_malformed_file_is_invalid_response() {
        let file = write_file("{ not json");
        let source = JsonFileSource::new(file.path());
        let err = source.fetch(&QueryFilter::new()).unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }
}
