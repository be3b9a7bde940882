use crate::config::PublisherConfig;
use crate::error::{ReactorError, Result};
use crate::model::lorawan::DevEui;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Sink for decorated documents
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, dev_eui: &DevEui, value: &Value) -> Result<()>;
}

/// Writes every document to the log
pub struct ConsolePublisher;

#[async_trait]
impl Publisher for ConsolePublisher {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn publish(&self, dev_eui: &DevEui, value: &Value) -> Result<()> {
        info!(dev_eui = %dev_eui, document = %value, "Publish");
        Ok(())
    }
}

/// POSTs every document as JSON to a fixed URL
pub struct HttpsPublisher {
    client: reqwest::Client,
    url: String,
}

impl HttpsPublisher {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Publisher for HttpsPublisher {
    fn name(&self) -> &'static str {
        "https"
    }

    async fn publish(&self, dev_eui: &DevEui, value: &Value) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(value)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReactorError::Publish(format!(
                "{} answered {} for {}",
                self.url, status, dev_eui
            )));
        }

        debug!(dev_eui = %dev_eui, status = %status, "Published document to {}", self.url);
        Ok(())
    }
}

pub fn build_publisher(config: &PublisherConfig, timeout: Duration) -> Result<Arc<dyn Publisher>> {
    Ok(match config {
        PublisherConfig::Console => Arc::new(ConsolePublisher),
        PublisherConfig::Https { url } => Arc::new(HttpsPublisher::new(url.clone(), timeout)?),
    })
}
