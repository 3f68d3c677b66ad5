//! Point feature entity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::SpatialEntity;
use crate::coord::{project, Envelope};

/// A point record with free-form properties.
///
/// # Example
///
/// ```
/// use geocache::source::{PointFeature, SpatialEntity};
///
/// let feature = PointFeature::new("station-7", 52.52, 13.405);
/// assert_eq!(feature.key(), "station-7");
/// assert!(feature.envelope().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFeature {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl PointFeature {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            id: id.into(),
            lat,
            lon,
            properties: Map::new(),
        }
    }

    /// Adds a property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Property rendered as a string, if present.
    ///
    /// String values are returned without quotes; other JSON values use their
    /// compact JSON form.
    pub fn property_str(&self, key: &str) -> Option<String> {
        self.properties.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl SpatialEntity for PointFeature {
    type Key = String;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn envelope(&self) -> Envelope {
        let (x, y) = project(self.lat, self.lon);
        Envelope::point(x, y)
    }
}
