use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Approximate position, either reported by the receiving gateway/hotspot or
/// produced by the position solver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Build from loose gateway metadata, where either coordinate may be missing
    pub fn from_parts(latitude: Option<f64>, longitude: Option<f64>) -> Option<Self> {
        match (latitude, longitude) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => {
                Some(Self::new(lat, lng))
            }
            _ => None,
        }
    }

    /// Extract numeric `latitude`/`longitude` fields from a solver result
    pub fn from_fields(fields: &Map<String, Value>) -> Option<Self> {
        Self::from_parts(
            fields.get("latitude").and_then(Value::as_f64),
            fields.get("longitude").and_then(Value::as_f64),
        )
    }
}
