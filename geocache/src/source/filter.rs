//! Default filter implementation.

use std::collections::BTreeMap;

use super::Filter;
use crate::coord::Envelope;

/// Filter made of an optional spatial scope and source-specific parameters.
///
/// Parameters are opaque to the cache; sources decide how to interpret them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    envelope: Option<Envelope>,
    params: BTreeMap<String, String>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a source-specific parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Spatial scope, if the filter has been narrowed.
    pub fn envelope(&self) -> Option<&Envelope> {
        self.envelope.as_ref()
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Filter for QueryFilter {
    fn scoped(&self, envelope: &Envelope) -> Self {
        Self {
            envelope: Some(*envelope),
            params: self.params.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_keeps_params_and_sets_envelope() {
        let filter = QueryFilter::new().with_param("phenomenon", "pm10");
        let env = Envelope::new(0.0, 0.0, 1.0, 1.0);

        let scoped = filter.scoped(&env);
        assert_eq!(scoped.envelope(), Some(&env));
        assert_eq!(scoped.param("phenomenon"), Some("pm10"));

        // The original is untouched
        assert_eq!(filter.envelope(), None);
    }
}
