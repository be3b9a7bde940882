use super::merge::merge_into;
use crate::error::{ReactorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-device state document.
///
/// Known fields are typed; everything the decoder or the solver produces lands
/// in `fields` and round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoded_data: Option<EncodedData>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gnss: Option<GnssState>,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Last raw uplink, overwritten on every uplink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedData {
    pub port: u8,
    pub hex_encoded: String,
    pub timestamp: DateTime<Utc>,
    // Serialized as null when absent so a merge clears a stale hint
    #[serde(default)]
    pub max_size: Option<usize>,
}

/// Satellite positioning assistance state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GnssState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistance_latitude: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistance_longitude: Option<f64>,

    #[serde(
        default,
        deserialize_with = "lenient_time::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_assistance_update_attempt: Option<DateTime<Utc>>,

    #[serde(
        default,
        deserialize_with = "lenient_time::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub almanac_timestamp: Option<DateTime<Utc>>,

    #[serde(
        default,
        deserialize_with = "lenient_time::deserialize_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_almanac_download_attempt: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeviceDocument {
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(fields))?)
    }

    pub fn to_fields(&self) -> Result<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(ReactorError::Storage(format!(
                "Device document serialized to non-object: {}",
                other
            ))),
        }
    }

    /// Partial update touching only `gnss` sub-fields
    pub fn gnss_update(gnss: GnssState) -> Self {
        Self {
            gnss: Some(gnss),
            ..Default::default()
        }
    }

    /// Deep-merge `update` on top of this document, see [`merge_into`]
    pub fn merge(&self, update: &DeviceDocument) -> Result<DeviceDocument> {
        self.merge_fields(update.to_fields()?)
    }

    /// Deep-merge an untyped fragment (decoder or solver output)
    pub fn merge_fields(&self, update: Map<String, Value>) -> Result<DeviceDocument> {
        let mut base = self.to_fields()?;
        merge_into(&mut base, update);
        DeviceDocument::from_fields(base)
    }
}

/// The decoder may report gnss timestamps either as RFC 3339 strings or as
/// integer epoch seconds.
mod lenient_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(serde::de::Error::custom),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid epoch seconds: {}", n))),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected timestamp, got {}",
                other
            ))),
        }
    }
}
