use anyhow::{Context, Result};
use lorareactor::config::Config;
use lorareactor::decoder::build_decoder;
use lorareactor::output::{build_decorator, build_publisher};
use lorareactor::reactor::{RuleEngine, UplinkCoordinator};
use lorareactor::solver::build_solver;
use lorareactor::storage::device_list::read_device_list;
use lorareactor::storage::StateStore;
use lorareactor::transport::mqtt::MqttTransport;
use lorareactor::transport::DownlinkSender;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

const UPLINK_CHANNEL_CAPACITY: usize = 1000;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lorareactor=info".parse()?),
        )
        .json()
        .init();

    info!("Starting LoRa Reactor v{}", lorareactor::VERSION);

    let config = Config::from_env()?;
    config.validate()?;

    info!("Configuration loaded successfully");

    let store = Arc::new(StateStore::new(config.storage.data_dir.clone()).await?);

    let devices = match &config.storage.device_list {
        Some(path) => read_device_list(path).await?,
        None => Vec::new(),
    };
    if devices.is_empty() {
        info!("No device list, subscribing to all devices");
    } else {
        info!("Reacting to {} device(s)", devices.len());
    }

    let timeout = config.http_timeout();
    let solver = build_solver(&config.solver, timeout)?;
    let decoder = build_decoder(&config.decoder, timeout)?;
    let decorator = build_decorator(config.output.decoration);
    let publisher = build_publisher(&config.output.publisher, timeout)?;
    info!(
        solver = solver.name(),
        decoder = decoder.name(),
        decoration = decorator.name(),
        publisher = publisher.name(),
        "Collaborators selected"
    );

    let rules = RuleEngine::new(config.reactor.clone(), solver, store.clone());
    let coordinator = Arc::new(UplinkCoordinator::new(
        store,
        decoder,
        rules,
        decorator,
        publisher,
    ));

    // Channel for MQTT -> uplink worker communication
    let (uplink_tx, uplink_rx) = mpsc::channel(UPLINK_CHANNEL_CAPACITY);

    let transport = MqttTransport::new(config.mqtt.clone(), devices);
    let (downlink_sender, mqtt_handle) = transport
        .connect_and_subscribe(uplink_tx)
        .context("Failed to start MQTT transport")?;
    let downlink_sender: Arc<dyn DownlinkSender> = downlink_sender;

    let worker_handle = tokio::spawn(coordinator.clone().run(downlink_sender, uplink_rx));

    info!("LoRa Reactor started successfully");

    // Wait for shutdown signal (SIGTERM or SIGINT)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("SIGINT received, shutting down gracefully...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("SIGTERM received, shutting down gracefully...");
        }
    }

    // Stop taking new uplinks first
    worker_handle.abort();

    // Almanac transfers still need the MQTT loop to flush their frames
    let pending = coordinator.rules().pending_transfers();
    if pending > 0 {
        info!("Waiting for {} almanac transfer(s) to finish", pending);
    }
    if !coordinator.rules().drain_transfers(config.shutdown_grace()).await {
        warn!(
            "Almanac transfers still running after {:?}, abandoning them",
            config.shutdown_grace()
        );
    }

    mqtt_handle.abort();

    info!("LoRa Reactor shutdown complete");

    Ok(())
}
