use crate::error::{ReactorError, Result};
use crate::model::lorawan::DevEui;
use crate::model::position::Position;
use crate::util::hex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Uplink as delivered by a network server, before any validation of the
/// device identifier
#[derive(Debug, Clone, PartialEq)]
pub struct Uplink {
    pub dev_eui: String,
    pub port: u8,
    pub payload: Vec<u8>,
    /// Gateway-reported receive time, if the network server provides one
    pub received_at: Option<DateTime<Utc>>,
    /// Location of the first gateway/hotspot that heard the uplink
    pub gateway_position: Option<Position>,
    /// Max downlink payload at the uplink's data rate
    pub max_downlink_size: Option<usize>,
}

/// Downlink queued towards a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downlink {
    pub port: u8,
    pub payload: Vec<u8>,
    pub confirmed: bool,
}

impl Downlink {
    pub fn unconfirmed(port: u8, payload: Vec<u8>) -> Self {
        Self {
            port,
            payload,
            confirmed: false,
        }
    }

    pub fn hex_payload(&self) -> String {
        hex::encode(&self.payload)
    }
}

/// Vendor-specific topic layout and message format of a network server
pub trait NetworkServer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Topic filters to subscribe to; an empty device list means all devices
    fn subscriptions(&self, devices: &[DevEui]) -> Vec<String>;

    /// Parse an MQTT message into an uplink. `Ok(None)` for messages that
    /// aren't uplinks or carry no application payload.
    fn parse_uplink(&self, topic: &str, payload: &[u8]) -> anyhow::Result<Option<Uplink>>;

    /// Topic and body for enqueuing a downlink
    fn downlink_message(&self, dev_eui: &DevEui, downlink: &Downlink) -> Result<(String, Vec<u8>)>;
}

/// Handle used by the reaction engine to reach a device.
///
/// Passed explicitly into everything that sends; there is no ambient client.
#[async_trait]
pub trait DownlinkSender: Send + Sync {
    async fn send_downlink(&self, dev_eui: &DevEui, downlink: &Downlink) -> Result<()>;
}

/// Validate payload size to prevent DoS attacks
pub fn validate_payload_size(payload: &[u8], max_size: usize) -> Result<()> {
    if payload.len() > max_size {
        return Err(ReactorError::MqttParseError(format!(
            "Payload too large: {} bytes (max: {})",
            payload.len(),
            max_size
        )));
    }
    Ok(())
}

pub const MAX_MQTT_PAYLOAD_SIZE: usize = 1024 * 1024; // 1MB
