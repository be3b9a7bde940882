use super::common::{
    validate_payload_size, Downlink, NetworkServer, Uplink, MAX_MQTT_PAYLOAD_SIZE,
};
use crate::error::Result;
use crate::model::lorawan::{max_payload_for_spreading, DevEui};
use crate::model::position::Position;
use anyhow::Context;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const UPLINK_TOPIC_PREFIX: &str = "helium/vsm/rx";
const DOWNLINK_TOPIC_PREFIX: &str = "helium/vsm/tx";

/// Helium console MQTT integration
pub struct HeliumServer;

impl HeliumServer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HeliumServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct HeliumUplink {
    dev_eui: String,
    port: u8,
    #[serde(default)]
    payload: Option<String>,
    /// Milliseconds since the epoch
    #[serde(default)]
    reported_at: Option<i64>,
    #[serde(default)]
    hotspots: Vec<HeliumHotspot>,
}

#[derive(Debug, Deserialize)]
struct HeliumHotspot {
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    long: Option<f64>,
    #[serde(default)]
    spreading: Option<String>,
}

#[derive(Debug, Serialize)]
struct HeliumDownlink {
    confirmed: bool,
    port: u8,
    payload_raw: String,
}

impl NetworkServer for HeliumServer {
    fn name(&self) -> &'static str {
        "helium"
    }

    fn subscriptions(&self, devices: &[DevEui]) -> Vec<String> {
        if devices.is_empty() {
            return vec![format!("{}/#", UPLINK_TOPIC_PREFIX)];
        }
        devices
            .iter()
            .map(|eui| format!("{}/{}", UPLINK_TOPIC_PREFIX, eui.as_str().to_uppercase()))
            .collect()
    }

    fn parse_uplink(&self, topic: &str, payload: &[u8]) -> anyhow::Result<Option<Uplink>> {
        if !topic.starts_with(UPLINK_TOPIC_PREFIX) {
            return Ok(None);
        }

        validate_payload_size(payload, MAX_MQTT_PAYLOAD_SIZE)?;

        let msg: HeliumUplink =
            serde_json::from_slice(payload).context("Failed to parse Helium uplink JSON")?;

        let Some(data) = msg.payload else {
            return Ok(None);
        };

        let payload = base64::engine::general_purpose::STANDARD
            .decode(data)
            .context("Invalid base64 in Helium uplink payload")?;

        let received_at = msg.reported_at.and_then(DateTime::<Utc>::from_timestamp_millis);

        let hotspot = msg.hotspots.first();
        let gateway_position =
            hotspot.and_then(|h| Position::from_parts(h.lat, h.long));
        let max_downlink_size = hotspot
            .and_then(|h| h.spreading.as_deref())
            .and_then(max_payload_for_spreading);

        Ok(Some(Uplink {
            dev_eui: msg.dev_eui,
            port: msg.port,
            payload,
            received_at,
            gateway_position,
            max_downlink_size,
        }))
    }

    fn downlink_message(&self, dev_eui: &DevEui, downlink: &Downlink) -> Result<(String, Vec<u8>)> {
        let topic = format!("{}/{}", DOWNLINK_TOPIC_PREFIX, dev_eui.as_str().to_uppercase());
        let body = serde_json::to_vec(&HeliumDownlink {
            confirmed: downlink.confirmed,
            port: downlink.port,
            payload_raw: base64::engine::general_purpose::STANDARD.encode(&downlink.payload),
        })?;
        Ok((topic, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_helium_uplink() {
        let payload = json!({
            "dev_eui": "0123456789ABCDEF",
            "port": 3,
            "payload": "q80=",
            "reported_at": 1714564800000_i64,
            "hotspots": [{
                "name": "tiny-purple-fox",
                "lat": 59.33,
                "long": 18.07,
                "spreading": "SF9BW125"
            }]
        });

        let uplink = HeliumServer::new()
            .parse_uplink("helium/vsm/rx/0123456789ABCDEF", payload.to_string().as_bytes())
            .unwrap()
            .unwrap();

        assert_eq!(uplink.dev_eui, "0123456789ABCDEF");
        assert_eq!(uplink.port, 3);
        assert_eq!(uplink.payload, vec![0xab, 0xcd]);
        assert_eq!(
            uplink.received_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(uplink.gateway_position, Some(Position::new(59.33, 18.07)));
        assert_eq!(uplink.max_downlink_size, Some(115));
    }

    #[test]
    fn test_helium_uplink_without_hotspots() {
        let payload = json!({"dev_eui": "0123456789abcdef", "port": 1, "payload": "AA=="});
        let uplink = HeliumServer::new()
            .parse_uplink("helium/vsm/rx/0123456789ABCDEF", payload.to_string().as_bytes())
            .unwrap()
            .unwrap();

        assert_eq!(uplink.received_at, None);
        assert_eq!(uplink.gateway_position, None);
        assert_eq!(uplink.max_downlink_size, None);
    }

    #[test]
    fn test_subscriptions_use_upper_case() {
        let devices = vec![DevEui::new("0123456789abcdef".to_string()).unwrap()];
        assert_eq!(
            HeliumServer::new().subscriptions(&devices),
            vec!["helium/vsm/rx/0123456789ABCDEF".to_string()]
        );
        assert_eq!(
            HeliumServer::new().subscriptions(&[]),
            vec!["helium/vsm/rx/#".to_string()]
        );
    }

    #[test]
    fn test_downlink_message() {
        let dev_eui = DevEui::new("0123456789abcdef".to_string()).unwrap();
        let (topic, body) = HeliumServer::new()
            .downlink_message(&dev_eui, &Downlink::unconfirmed(21, vec![0x02, 0xff]))
            .unwrap();

        assert_eq!(topic, "helium/vsm/tx/0123456789ABCDEF");
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body, json!({"confirmed": false, "port": 21, "payload_raw": "Av8="}));
    }
}
