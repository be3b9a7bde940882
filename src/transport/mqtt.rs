use super::chirpstack::ChirpStackServer;
use super::common::{Downlink, DownlinkSender, NetworkServer, Uplink};
use super::helium::HeliumServer;
use crate::config::{MqttConfig, TransportKind};
use crate::error::{ReactorError, Result};
use crate::model::lorawan::DevEui;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, SubscribeFilter, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const MAX_MQTT_PACKET_SIZE: usize = 256 * 1024; // 256KB
const REQUEST_CHANNEL_CAPACITY: usize = 100;

/// Build the network server adapter selected in the configuration
pub fn network_server(kind: &TransportKind) -> Arc<dyn NetworkServer> {
    match kind {
        TransportKind::ChirpStack { application_id } => {
            Arc::new(ChirpStackServer::new(application_id.clone()))
        }
        TransportKind::Helium => Arc::new(HeliumServer::new()),
    }
}

/// Split a broker URL into host, port and whether TLS is required
pub fn parse_broker_url(broker_url: &str) -> anyhow::Result<(String, u16, bool)> {
    let use_tls = broker_url.starts_with("mqtts://") || broker_url.starts_with("ssl://");

    let broker_str = broker_url
        .trim_start_matches("mqtts://")
        .trim_start_matches("mqtt://")
        .trim_start_matches("ssl://")
        .trim_end_matches('/');

    let (host, port) = if let Some((h, p)) = broker_str.split_once(':') {
        (h.to_string(), p.parse::<u16>()?)
    } else {
        (broker_str.to_string(), if use_tls { 8883 } else { 1883 })
    };

    if host.is_empty() {
        return Err(
            ReactorError::MqttError(format!("MQTT broker URL '{}' has no host", broker_url)).into(),
        );
    }

    Ok((host, port, use_tls))
}

/// MQTT connection to a network server: forwards parsed uplinks to the
/// worker channel and hands out the downlink handle
pub struct MqttTransport {
    config: MqttConfig,
    server: Arc<dyn NetworkServer>,
    devices: Vec<DevEui>,
}

impl MqttTransport {
    pub fn new(config: MqttConfig, devices: Vec<DevEui>) -> Self {
        let server = network_server(&config.transport);
        Self {
            config,
            server,
            devices,
        }
    }

    /// Create the client and spawn the event loop. Subscriptions are issued
    /// on every (re)connect.
    pub fn connect_and_subscribe(
        self,
        uplink_tx: mpsc::Sender<Uplink>,
    ) -> anyhow::Result<(Arc<MqttDownlinkSender>, JoinHandle<()>)> {
        let (host, port, use_tls) = parse_broker_url(&self.config.broker_url)?;
        let name = self.server.name();

        info!(
            "Connecting to {} MQTT broker at {}:{} (TLS: {})",
            name, host, port, use_tls
        );

        let mut mqttoptions = MqttOptions::new(&self.config.client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        mqttoptions.set_max_packet_size(MAX_MQTT_PACKET_SIZE, MAX_MQTT_PACKET_SIZE);

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            mqttoptions.set_credentials(username, password);
        }

        if use_tls {
            // Use rustls transport (will load system certificates automatically)
            mqttoptions.set_transport(Transport::tls_with_default_config());
            info!("{} MQTT: TLS configured with system certificates", name);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, REQUEST_CHANNEL_CAPACITY);

        let filters: Vec<SubscribeFilter> = self
            .server
            .subscriptions(&self.devices)
            .into_iter()
            .map(|topic| SubscribeFilter::new(topic, QoS::AtLeastOnce))
            .collect();

        let sender = Arc::new(MqttDownlinkSender {
            client: client.clone(),
            server: self.server.clone(),
        });

        let reconnect_delay = Duration::from_secs(self.config.reconnect_delay_secs);
        let handle = tokio::spawn(run_event_loop(
            eventloop,
            client,
            self.server,
            filters,
            uplink_tx,
            reconnect_delay,
        ));

        Ok((sender, handle))
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    server: Arc<dyn NetworkServer>,
    filters: Vec<SubscribeFilter>,
    uplink_tx: mpsc::Sender<Uplink>,
    reconnect_delay: Duration,
) {
    let name = server.name();

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) => {
                debug!("{} MQTT: Received message on topic: {}", name, publish.topic);

                match server.parse_uplink(&publish.topic, &publish.payload) {
                    Ok(Some(uplink)) => {
                        debug!(
                            "{} MQTT: Parsed uplink for device {} on port {}",
                            name, uplink.dev_eui, uplink.port
                        );
                        if let Err(e) = uplink_tx.send(uplink).await {
                            error!("{} MQTT: Uplink worker is gone: {}", name, e);
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!("{} MQTT: Message filtered on topic '{}'", name, publish.topic);
                    }
                    Err(e) => {
                        let payload_preview = String::from_utf8_lossy(&publish.payload);
                        let preview: String = payload_preview.chars().take(500).collect();
                        warn!(
                            "{} MQTT: Failed to parse message on topic '{}': {} | Payload: {}",
                            name, publish.topic, e, preview
                        );
                    }
                }
            }
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                info!("{} MQTT: Connected successfully", name);
                // The event loop is this task, so a blocking subscribe could
                // deadlock on a full request channel
                match client.try_subscribe_many(filters.clone()) {
                    Ok(()) => info!("{} MQTT: Subscribing to {} topic(s)", name, filters.len()),
                    Err(e) => error!("{} MQTT: Subscribe failed: {}", name, e),
                }
            }
            Ok(Event::Incoming(Incoming::SubAck(_))) => {
                info!("{} MQTT: Subscription acknowledged", name);
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                warn!("{} MQTT: Disconnected by broker", name);
            }
            Ok(_) => {
                // Other events (PingResp, PubAck, etc.)
            }
            Err(e) => {
                error!(
                    "{} MQTT: Connection error: {}, reconnecting in {:?}",
                    name, e, reconnect_delay
                );
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

/// Downlink handle backed by the MQTT client
pub struct MqttDownlinkSender {
    client: AsyncClient,
    server: Arc<dyn NetworkServer>,
}

#[async_trait]
impl DownlinkSender for MqttDownlinkSender {
    async fn send_downlink(&self, dev_eui: &DevEui, downlink: &Downlink) -> Result<()> {
        let (topic, body) = self.server.downlink_message(dev_eui, downlink)?;
        // Enqueue only; a full request queue fails fast instead of stalling the worker
        self.client
            .try_publish(&topic, QoS::AtLeastOnce, false, body)
            .map_err(|e| ReactorError::Downlink(format!("Publish to {} failed: {}", topic, e)))?;

        info!(
            dev_eui = %dev_eui,
            port = downlink.port,
            payload = %downlink.hex_payload(),
            "Published downlink"
        );
        Ok(())
    }
}
