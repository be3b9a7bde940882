//! In-process doubles for the reactor's collaborators.

use crate::decoder::{DecodeOutput, Decoder};
use crate::error::{ReactorError, Result};
use crate::model::document::DeviceDocument;
use crate::model::lorawan::DevEui;
use crate::output::Publisher;
use crate::solver::{AlmanacImage, Solver};
use crate::transport::{Downlink, DownlinkSender};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SentDownlink {
    pub dev_eui: DevEui,
    pub downlink: Downlink,
    pub at: Instant,
}

/// Records successful sends; optionally fails every send after the first `n`
#[derive(Default)]
pub struct RecordingSender {
    calls: Mutex<Vec<SentDownlink>>,
    fail_after: Option<usize>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(n: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_after: Some(n),
        }
    }

    pub fn calls(&self) -> Vec<SentDownlink> {
        self.calls.lock().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.downlink.hex_payload()).collect()
    }
}

#[async_trait]
impl DownlinkSender for RecordingSender {
    async fn send_downlink(&self, dev_eui: &DevEui, downlink: &Downlink) -> Result<()> {
        let mut calls = self.calls.lock();
        if self.fail_after.is_some_and(|n| calls.len() >= n) {
            return Err(ReactorError::Downlink("broker unavailable".to_string()));
        }
        calls.push(SentDownlink {
            dev_eui: dev_eui.clone(),
            downlink: downlink.clone(),
            at: Instant::now(),
        });
        Ok(())
    }
}

/// Solver answering from fixed values
#[derive(Default)]
pub struct StaticSolver {
    pub position: Option<Map<String, Value>>,
    pub fail_position: bool,
    pub almanac: Option<AlmanacImage>,
    solve_calls: Mutex<usize>,
}

impl StaticSolver {
    pub fn with_position(fields: Value) -> Self {
        Self {
            position: fields.as_object().cloned(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_position: true,
            ..Default::default()
        }
    }

    pub fn with_almanac(image: &str, compressed: bool) -> Self {
        Self {
            almanac: Some(AlmanacImage {
                image: image.to_string(),
                compressed,
            }),
            ..Default::default()
        }
    }

    pub fn solve_calls(&self) -> usize {
        *self.solve_calls.lock()
    }
}

#[async_trait]
impl Solver for StaticSolver {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn solve_position(&self, _decoded: &Map<String, Value>) -> Result<Option<Map<String, Value>>> {
        *self.solve_calls.lock() += 1;
        if self.fail_position {
            return Err(ReactorError::Solver("backend down".to_string()));
        }
        Ok(self.position.clone())
    }

    async fn load_almanac(&self) -> Result<Option<AlmanacImage>> {
        Ok(self.almanac.clone())
    }
}

/// Decoder returning a canned answer and remembering what it was given
pub struct StaticDecoder {
    output: std::result::Result<DecodeOutput, String>,
    seen: Mutex<Vec<DeviceDocument>>,
}

impl StaticDecoder {
    pub fn returning(result: Option<Value>) -> Self {
        Self {
            output: Ok(DecodeOutput {
                result: result.and_then(|v| v.as_object().cloned()),
                timeseries: None,
            }),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            output: Err("unknown payload".to_string()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<DeviceDocument> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Decoder for StaticDecoder {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn decode(&self, document: &DeviceDocument) -> Result<DecodeOutput> {
        self.seen.lock().push(document.clone());
        match &self.output {
            Ok(output) => Ok(output.clone()),
            Err(message) => Err(ReactorError::Decode(message.clone())),
        }
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(DevEui, Value)>>,
}

impl RecordingPublisher {
    pub fn published(&self) -> Vec<(DevEui, Value)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn publish(&self, dev_eui: &DevEui, value: &Value) -> Result<()> {
        self.published.lock().push((dev_eui.clone(), value.clone()));
        Ok(())
    }
}
