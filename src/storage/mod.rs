use crate::error::{ReactorError, Result};
use crate::model::document::DeviceDocument;
use crate::model::lorawan::DevEui;
use chrono::Utc;
use parking_lot::Mutex;
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub mod device_list;

const ERROR_LOG_FILE: &str = "errors.txt";

/// File-backed store holding one JSON document per device.
///
/// Read-modify-write without transactions: two processes handling the same
/// device (e.g. when it roams between network servers) are last-writer-wins.
pub struct StateStore {
    data_dir: PathBuf,
    error_log: Mutex<PathBuf>,
}

impl StateStore {
    /// Open the store, creating the data directory if it doesn't exist
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        info!("State store opened at {}", data_dir.display());

        let error_log = Mutex::new(data_dir.join(ERROR_LOG_FILE));
        Ok(Self {
            data_dir,
            error_log,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn document_path(&self, dev_eui: &DevEui) -> PathBuf {
        self.data_dir.join(format!("{}.json", dev_eui.normalized()))
    }

    /// Load the document for a device. A device that was never stored is
    /// `Ok(None)`, not an error.
    pub async fn get(&self, dev_eui: &DevEui) -> Result<Option<DeviceDocument>> {
        let path = self.document_path(dev_eui);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dev_eui = %dev_eui, "No stored document");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let document = serde_json::from_slice(&content).map_err(|e| {
            ReactorError::Storage(format!("Corrupt document {}: {}", path.display(), e))
        })?;
        Ok(Some(document))
    }

    /// Replace the whole document. Callers merge before calling this.
    pub async fn put(&self, dev_eui: &DevEui, document: &DeviceDocument) -> Result<()> {
        let path = self.document_path(dev_eui);
        let tmp_path = path.with_extension("json.tmp");

        let content = serde_json::to_vec(document)?;
        tokio::fs::write(&tmp_path, &content).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(dev_eui = %dev_eui, bytes = content.len(), "Stored document");
        Ok(())
    }

    /// Append a diagnostic line for a failure. Never fails.
    pub fn record_error(&self, dev_eui: &DevEui, error: &dyn Display) {
        let line = format!(
            "{} {} {}\n",
            Utc::now().to_rfc3339(),
            dev_eui.normalized(),
            error
        );

        let path = self.error_log.lock();
        let appended = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&*path)
            .and_then(|mut file| file.write_all(line.as_bytes()));

        if let Err(e) = appended {
            warn!(dev_eui = %dev_eui, "Failed to record error: {}", e);
        }
    }
}
