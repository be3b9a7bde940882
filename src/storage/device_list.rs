use crate::model::lorawan::DevEui;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// Read the list of devices to subscribe to: one DevEUI per line, blank
/// lines and `#` comments skipped, malformed entries warned about and dropped.
pub async fn read_device_list(path: &Path) -> Result<Vec<DevEui>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read device list {}", path.display()))?;

    let devices = parse_device_list(&content);
    info!("Device count: {} (from {})", devices.len(), path.display());
    Ok(devices)
}

pub fn parse_device_list(content: &str) -> Vec<DevEui> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match DevEui::new(line.to_string()) {
            Ok(eui) => Some(eui),
            Err(e) => {
                warn!("Skipping device list entry '{}': {}", line, e);
                None
            }
        })
        .collect()
}
