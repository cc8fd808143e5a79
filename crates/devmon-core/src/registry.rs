//! Telemetry data-point registry
//!
//! The registry is a plain list of [`DataPointSpec`] built once at startup and
//! handed to whoever needs it. Nothing looks it up globally.

use serde::{Deserialize, Serialize};

/// How values of a data point are encoded once normalized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Number,
    Boolean,
    /// Opaque structured payload, passed through untouched
    Array,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named telemetry channel on the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPointSpec {
    /// Platform identifier, used verbatim in queries
    pub name: String,
    pub display_name: String,
    pub unit: String,
    pub value_kind: ValueKind,
}

impl DataPointSpec {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        unit: impl Into<String>,
        value_kind: ValueKind,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            unit: unit.into(),
            value_kind,
        }
    }
}

/// The seven data points exposed by the monitored device model
pub fn default_registry() -> Vec<DataPointSpec> {
    vec![
        DataPointSpec::new("volume", "Noise", "dB", ValueKind::Number),
        DataPointSpec::new("shake", "Vibration", "g", ValueKind::Number),
        DataPointSpec::new("temperature", "Temperature", "°C", ValueKind::Number),
        DataPointSpec::new("feature_speed_1_speed", "Speed", "rpm", ValueKind::Number),
        DataPointSpec::new(
            "feature_hilbert_2_hb",
            "Hilbert Envelope",
            "",
            ValueKind::Array,
        ),
        DataPointSpec::new("controlledvariable", "Running", "", ValueKind::Boolean),
        DataPointSpec::new(
            "controlledvolume",
            "Volume Monitoring",
            "",
            ValueKind::Boolean,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_registry_shape() {
        let registry = default_registry();
        assert_eq!(registry.len(), 7);

        let names: HashSet<_> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names.len(), 7, "data point names must be unique");

        let arrays: Vec<_> = registry
            .iter()
            .filter(|s| s.value_kind == ValueKind::Array)
            .collect();
        assert_eq!(arrays.len(), 1);
        assert_eq!(arrays[0].name, "feature_hilbert_2_hb");

        let booleans = registry
            .iter()
            .filter(|s| s.value_kind == ValueKind::Boolean)
            .count();
        assert_eq!(booleans, 2);
    }

    #[test]
    fn test_spec_serializes_camel_case() {
        let spec = DataPointSpec::new("temperature", "Temperature", "°C", ValueKind::Number);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["displayName"], "Temperature");
        assert_eq!(json["valueKind"], "number");
    }
}
