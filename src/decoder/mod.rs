use crate::config::DecoderConfig;
use crate::error::Result;
use crate::model::document::DeviceDocument;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub mod http;

pub use http::HttpDecoder;

/// What a decoder made of the merged document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeOutput {
    /// Fragment to merge into the document. `None` tells the coordinator to
    /// drop the uplink without merging, persisting or publishing.
    pub result: Option<Map<String, Value>>,
    /// Time-series side channel, not stored
    pub timeseries: Option<Vec<Value>>,
}

impl DecodeOutput {
    pub fn empty() -> Self {
        Self {
            result: Some(Map::new()),
            timeseries: None,
        }
    }

    pub fn suppressed() -> Self {
        Self {
            result: None,
            timeseries: None,
        }
    }
}

/// Turns the raw `encodedData` of a device document into measurements
#[async_trait]
pub trait Decoder: Send + Sync {
    fn name(&self) -> &'static str;

    async fn decode(&self, document: &DeviceDocument) -> Result<DecodeOutput>;
}

/// Pass-through decoder: only the raw uplink is stored and published
pub struct NullDecoder;

#[async_trait]
impl Decoder for NullDecoder {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn decode(&self, _document: &DeviceDocument) -> Result<DecodeOutput> {
        Ok(DecodeOutput::empty())
    }
}

pub fn build_decoder(config: &DecoderConfig, timeout: Duration) -> Result<Arc<dyn Decoder>> {
    Ok(match config {
        DecoderConfig::None => Arc::new(NullDecoder),
        DecoderConfig::Http { url } => Arc::new(HttpDecoder::new(url.clone(), timeout)?),
    })
}
