use super::common::{
    validate_payload_size, Downlink, NetworkServer, Uplink, MAX_MQTT_PAYLOAD_SIZE,
};
use crate::error::Result;
use crate::model::lorawan::{max_payload_for_dr, DevEui};
use crate::model::position::Position;
use anyhow::Context;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// ChirpStack v4 MQTT integration
pub struct ChirpStackServer {
    application_id: String,
}

impl ChirpStackServer {
    pub fn new(application_id: String) -> Self {
        Self { application_id }
    }
}

/// ChirpStack v4 uplink event format
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChirpStackUplink {
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    device_info: Option<ChirpStackDeviceInfo>,
    /// Pre-v4 payloads carried the EUI at top level
    #[serde(default, rename = "devEUI")]
    legacy_dev_eui: Option<String>,
    #[serde(default)]
    f_port: Option<u8>,
    #[serde(default)]
    dr: Option<u8>,
    #[serde(default)]
    rx_info: Vec<ChirpStackRxInfo>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChirpStackDeviceInfo {
    dev_eui: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChirpStackRxInfo {
    #[serde(default)]
    gw_time: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    location: Option<ChirpStackLocation>,
}

#[derive(Debug, Deserialize)]
struct ChirpStackLocation {
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChirpStackDownlink<'a> {
    dev_eui: &'a str,
    confirmed: bool,
    f_port: u8,
    data: String,
}

fn parse_time(text: Option<&str>) -> Option<chrono::DateTime<Utc>> {
    text.and_then(|t| chrono::DateTime::parse_from_rfc3339(t).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl NetworkServer for ChirpStackServer {
    fn name(&self) -> &'static str {
        "chirpstack"
    }

    fn subscriptions(&self, devices: &[DevEui]) -> Vec<String> {
        if devices.is_empty() {
            return vec![format!("application/{}/device/+/event/up", self.application_id)];
        }
        devices
            .iter()
            .map(|eui| {
                format!(
                    "application/{}/device/{}/event/up",
                    self.application_id,
                    eui.normalized()
                )
            })
            .collect()
    }

    fn parse_uplink(&self, topic: &str, payload: &[u8]) -> anyhow::Result<Option<Uplink>> {
        // application/{app_id}/device/{dev_eui}/event/up
        if !topic.ends_with("/event/up") {
            return Ok(None);
        }

        validate_payload_size(payload, MAX_MQTT_PAYLOAD_SIZE)?;

        let msg: ChirpStackUplink = serde_json::from_slice(payload)
            .context("Failed to parse ChirpStack uplink JSON")?;

        let Some(data) = msg.data else {
            // Uplinks without application payload (e.g. MAC-only) carry nothing to react to
            return Ok(None);
        };

        let dev_eui = msg
            .device_info
            .map(|info| info.dev_eui)
            .or(msg.legacy_dev_eui)
            .context("ChirpStack uplink has no device EUI")?;

        let port = msg.f_port.context("ChirpStack uplink has no fPort")?;

        let payload = base64::engine::general_purpose::STANDARD
            .decode(data)
            .context("Invalid base64 in ChirpStack uplink data")?;

        let first_rx = msg.rx_info.first();
        let received_at = parse_time(msg.time.as_deref()).or_else(|| {
            first_rx.and_then(|rx| parse_time(rx.gw_time.as_deref().or(rx.time.as_deref())))
        });

        // Any gateway that heard the device is likely within ~150 km of it
        let gateway_position = first_rx
            .and_then(|rx| rx.location.as_ref())
            .and_then(|loc| Position::from_parts(loc.latitude, loc.longitude));

        Ok(Some(Uplink {
            dev_eui,
            port,
            payload,
            received_at,
            gateway_position,
            max_downlink_size: Some(max_payload_for_dr(msg.dr)),
        }))
    }

    fn downlink_message(&self, dev_eui: &DevEui, downlink: &Downlink) -> Result<(String, Vec<u8>)> {
        let dev_eui = dev_eui.normalized();
        let topic = format!(
            "application/{}/device/{}/command/down",
            self.application_id, dev_eui
        );
        let body = serde_json::to_vec(&ChirpStackDownlink {
            dev_eui: &dev_eui,
            confirmed: downlink.confirmed,
            f_port: downlink.port,
            data: base64::engine::general_purpose::STANDARD.encode(&downlink.payload),
        })?;
        Ok((topic, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn server() -> ChirpStackServer {
        ChirpStackServer::new("app-1".to_string())
    }

    #[test]
    fn test_chirpstack_uplink() {
        let payload = json!({
            "deduplicationId": "3ac0ac9b",
            "time": "2024-05-01T12:00:00Z",
            "deviceInfo": {
                "tenantId": "t",
                "applicationId": "app-1",
                "devEui": "0123456789ABCDEF",
                "deviceName": "tracker"
            },
            "fPort": 2,
            "fCnt": 10,
            "dr": 3,
            "data": "q80=",
            "rxInfo": [{
                "gatewayId": "0016c001ff10a235",
                "rssi": -57,
                "location": {"latitude": 59.33, "longitude": 18.07}
            }]
        });

        let uplink = server()
            .parse_uplink(
                "application/app-1/device/0123456789abcdef/event/up",
                payload.to_string().as_bytes(),
            )
            .unwrap()
            .unwrap();

        assert_eq!(uplink.dev_eui, "0123456789ABCDEF");
        assert_eq!(uplink.port, 2);
        assert_eq!(uplink.payload, vec![0xab, 0xcd]);
        assert_eq!(
            uplink.received_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(uplink.gateway_position, Some(Position::new(59.33, 18.07)));
        assert_eq!(uplink.max_downlink_size, Some(115));
    }

    #[test]
    fn test_uplink_time_falls_back_to_gateway_time() {
        let payload = json!({
            "devEUI": "0123456789abcdef",
            "fPort": 1,
            "data": "AA==",
            "rxInfo": [{"gwTime": "2024-05-01T12:00:01Z"}]
        });

        let uplink = server()
            .parse_uplink("application/app-1/device/x/event/up", payload.to_string().as_bytes())
            .unwrap()
            .unwrap();

        assert_eq!(uplink.dev_eui, "0123456789abcdef");
        assert_eq!(
            uplink.received_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 1).unwrap())
        );
        assert_eq!(uplink.gateway_position, None);
        assert_eq!(uplink.max_downlink_size, Some(51));
    }

    #[test]
    fn test_ignores_non_uplink_and_empty_messages() {
        let s = server();
        assert!(s
            .parse_uplink("application/app-1/device/x/event/join", b"{}")
            .unwrap()
            .is_none());

        let no_data = json!({"deviceInfo": {"devEui": "0123456789abcdef"}, "fPort": 1});
        assert!(s
            .parse_uplink("application/app-1/device/x/event/up", no_data.to_string().as_bytes())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rejects_malformed_uplink() {
        let s = server();
        assert!(s
            .parse_uplink("application/app-1/device/x/event/up", b"not json")
            .is_err());

        let no_port = json!({"deviceInfo": {"devEui": "0123456789abcdef"}, "data": "AA=="});
        assert!(s
            .parse_uplink("application/app-1/device/x/event/up", no_port.to_string().as_bytes())
            .is_err());
    }

    #[test]
    fn test_subscriptions() {
        let s = server();
        assert_eq!(
            s.subscriptions(&[]),
            vec!["application/app-1/device/+/event/up".to_string()]
        );

        let devices = vec![DevEui::new("0123456789ABCDEF".to_string()).unwrap()];
        assert_eq!(
            s.subscriptions(&devices),
            vec!["application/app-1/device/0123456789abcdef/event/up".to_string()]
        );
    }

    #[test]
    fn test_downlink_message() {
        let dev_eui = DevEui::new("0123456789ABCDEF".to_string()).unwrap();
        let downlink = Downlink::unconfirmed(21, vec![0x01, 0x05, 0x46, 0x00, 0xce]);

        let (topic, body) = server().downlink_message(&dev_eui, &downlink).unwrap();
        assert_eq!(topic, "application/app-1/device/0123456789abcdef/command/down");

        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body,
            json!({
                "devEui": "0123456789abcdef",
                "confirmed": false,
                "fPort": 21,
                "data": "AQVGAM4="
            })
        );
    }
}
