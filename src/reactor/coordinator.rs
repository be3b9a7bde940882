use super::rules::{RuleContext, RuleEngine};
use crate::decoder::Decoder;
use crate::error::Result;
use crate::model::document::{DeviceDocument, EncodedData};
use crate::model::lorawan::DevEui;
use crate::output::{Decorator, Publisher};
use crate::storage::StateStore;
use crate::transport::{DownlinkSender, Uplink};
use crate::util::hex;
use chrono::Utc;
use serde_json::Map;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What happened to an uplink
#[derive(Debug, Clone, PartialEq)]
pub enum UplinkOutcome {
    /// Document stored and published
    Processed(DeviceDocument),
    /// The decoder had nothing new; stored state was left untouched
    Suppressed,
}

/// Runs the per-uplink pipeline: load state, decode, merge, evaluate rules,
/// persist, publish.
pub struct UplinkCoordinator {
    store: Arc<StateStore>,
    decoder: Arc<dyn Decoder>,
    rules: RuleEngine,
    decorator: Box<dyn Decorator>,
    publisher: Arc<dyn Publisher>,
}

impl UplinkCoordinator {
    pub fn new(
        store: Arc<StateStore>,
        decoder: Arc<dyn Decoder>,
        rules: RuleEngine,
        decorator: Box<dyn Decorator>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            store,
            decoder,
            rules,
            decorator,
            publisher,
        }
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Handle one uplink. Only a malformed uplink is an error; every later
    /// failure is recorded against the device and the pipeline carries on.
    pub async fn on_uplink(
        &self,
        sender: &Arc<dyn DownlinkSender>,
        uplink: Uplink,
    ) -> Result<UplinkOutcome> {
        let dev_eui = DevEui::new(uplink.dev_eui)?;
        let event_time = uplink.received_at.unwrap_or_else(Utc::now);

        info!(
            dev_eui = %dev_eui,
            port = uplink.port,
            payload = %hex::encode(&uplink.payload),
            "Handling uplink"
        );

        let previous = match self.store.get(&dev_eui).await {
            Ok(Some(document)) => document,
            Ok(None) => DeviceDocument::default(),
            Err(e) => {
                warn!(dev_eui = %dev_eui, "Failed to load previous state: {}", e);
                self.store.record_error(&dev_eui, &e);
                DeviceDocument::default()
            }
        };

        let encoded = DeviceDocument {
            encoded_data: Some(EncodedData {
                port: uplink.port,
                hex_encoded: hex::encode(&uplink.payload),
                timestamp: event_time,
                max_size: uplink.max_downlink_size,
            }),
            ..Default::default()
        };
        let iotnode = previous.merge(&encoded)?;

        let result = match self.decoder.decode(&iotnode).await {
            Ok(output) => {
                if let Some(series) = &output.timeseries {
                    debug!(dev_eui = %dev_eui, entries = series.len(), "Ignoring timeseries");
                }
                output.result
            }
            Err(e) => {
                warn!(dev_eui = %dev_eui, "Decoding failed: {}", e);
                self.store.record_error(&dev_eui, &e);
                Some(Map::new())
            }
        };

        let Some(result) = result else {
            info!(dev_eui = %dev_eui, "No new result, uplink dropped");
            return Ok(UplinkOutcome::Suppressed);
        };

        let next = match iotnode.merge_fields(result.clone()) {
            Ok(next) => next,
            Err(e) => {
                warn!(dev_eui = %dev_eui, "Decoded result rejected: {}", e);
                self.store.record_error(&dev_eui, &e);
                iotnode
            }
        };

        let ctx = RuleContext {
            sender,
            dev_eui: &dev_eui,
            decoded: &result,
            event_time,
            gateway_position: uplink.gateway_position,
            max_downlink_size: uplink.max_downlink_size,
        };
        let next = self.rules.evaluate(&ctx, next).await;

        if let Err(e) = self.store.put(&dev_eui, &next).await {
            error!(dev_eui = %dev_eui, "Failed to store state: {}", e);
            self.store.record_error(&dev_eui, &e);
        }

        self.publish(&dev_eui, &next).await;
        Ok(UplinkOutcome::Processed(next))
    }

    async fn publish(&self, dev_eui: &DevEui, document: &DeviceDocument) {
        let fields = match document.to_fields() {
            Ok(fields) => fields,
            Err(e) => {
                warn!(dev_eui = %dev_eui, "Cannot publish document: {}", e);
                return;
            }
        };

        let decorated = self.decorator.decorate(&fields, dev_eui);
        if let Err(e) = self.publisher.publish(dev_eui, &decorated).await {
            warn!(
                dev_eui = %dev_eui,
                publisher = self.publisher.name(),
                "Publish failed: {}",
                e
            );
        }
    }

    /// Single worker: uplinks are handled one at a time in delivery order
    pub async fn run(self: Arc<Self>, sender: Arc<dyn DownlinkSender>, mut uplinks: mpsc::Receiver<Uplink>) {
        info!("Starting uplink worker");

        while let Some(uplink) = uplinks.recv().await {
            let dev_eui = uplink.dev_eui.clone();
            match self.on_uplink(&sender, uplink).await {
                Ok(UplinkOutcome::Processed(_)) => {
                    debug!("Processed uplink for device {}", dev_eui);
                }
                Ok(UplinkOutcome::Suppressed) => {
                    debug!("Suppressed uplink for device {}", dev_eui);
                }
                Err(e) => {
                    error!("Rejected uplink for device '{}': {}", dev_eui, e);
                }
            }
        }

        warn!("Uplink worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReactorConfig;
    use crate::error::ReactorError;
    use crate::model::position::Position;
    use crate::output::decorate::NoDecoration;
    use crate::reactor::testing::{RecordingPublisher, RecordingSender, StaticDecoder, StaticSolver};
    use chrono::{DateTime, TimeZone};
    use serde_json::json;
    use tempfile::TempDir;

    const DEV_EUI: &str = "0123456789ABCDEF";

    struct Harness {
        temp_dir: TempDir,
        store: Arc<StateStore>,
        decoder: Arc<StaticDecoder>,
        publisher: Arc<RecordingPublisher>,
        sender: Arc<RecordingSender>,
        coordinator: UplinkCoordinator,
    }

    impl Harness {
        async fn new(decoder: StaticDecoder) -> Self {
            let temp_dir = TempDir::new().unwrap();
            let store = Arc::new(StateStore::new(temp_dir.path()).await.unwrap());
            let decoder = Arc::new(decoder);
            let publisher = Arc::new(RecordingPublisher::default());
            let rules = RuleEngine::new(
                ReactorConfig::default(),
                Arc::new(StaticSolver::default()),
                Arc::clone(&store),
            );
            let coordinator = UplinkCoordinator::new(
                Arc::clone(&store),
                decoder.clone(),
                rules,
                Box::new(NoDecoration),
                publisher.clone(),
            );
            Self {
                temp_dir,
                store,
                decoder,
                publisher,
                sender: Arc::new(RecordingSender::new()),
                coordinator,
            }
        }

        async fn send(&self, uplink: Uplink) -> Result<UplinkOutcome> {
            let sender: Arc<dyn DownlinkSender> = self.sender.clone();
            self.coordinator.on_uplink(&sender, uplink).await
        }

        fn document_path(&self) -> std::path::PathBuf {
            self.temp_dir.path().join("0123456789abcdef.json")
        }
    }

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn uplink(payload: Vec<u8>) -> Uplink {
        Uplink {
            dev_eui: DEV_EUI.to_string(),
            port: 21,
            payload,
            received_at: Some(received_at()),
            gateway_position: Some(Position::new(59.33, 18.07)),
            max_downlink_size: None,
        }
    }

    fn eui() -> DevEui {
        DevEui::new(DEV_EUI.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_first_uplink_persists_encoded_data_and_result() {
        let harness =
            Harness::new(StaticDecoder::returning(Some(json!({"output": {"temperature": 21.5}})))).await;

        let outcome = harness.send(uplink(vec![0xab])).await.unwrap();

        let stored = harness.store.get(&eui()).await.unwrap().unwrap();
        assert_eq!(outcome, UplinkOutcome::Processed(stored.clone()));
        assert_eq!(
            stored.encoded_data,
            Some(EncodedData {
                port: 21,
                hex_encoded: "ab".to_string(),
                timestamp: received_at(),
                max_size: None,
            })
        );
        assert!(stored.gnss.is_none());
        assert_eq!(stored.fields.keys().collect::<Vec<_>>(), vec!["output"]);
        assert_eq!(stored.fields["output"], json!({"temperature": 21.5}));

        // No gnss section, so no rule reacts
        assert!(harness.sender.calls().is_empty());
        assert_eq!(harness.publisher.published().len(), 1);
    }

    #[tokio::test]
    async fn test_decoder_sees_merged_encoded_data() {
        let harness = Harness::new(StaticDecoder::returning(Some(json!({})))).await;
        let previous: DeviceDocument = serde_json::from_value(json!({"battery": 97})).unwrap();
        harness.store.put(&eui(), &previous).await.unwrap();

        harness.send(uplink(vec![0x01, 0x02])).await.unwrap();

        let seen = harness.decoder.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].fields.get("battery"), Some(&json!(97)));
        assert_eq!(seen[0].encoded_data.as_ref().unwrap().hex_encoded, "0102");
    }

    #[tokio::test]
    async fn test_null_result_leaves_store_untouched() {
        let harness = Harness::new(StaticDecoder::returning(None)).await;
        let previous: DeviceDocument =
            serde_json::from_value(json!({"battery": 97, "gnss": {}})).unwrap();
        harness.store.put(&eui(), &previous).await.unwrap();
        let before = std::fs::read(harness.document_path()).unwrap();

        let outcome = harness.send(uplink(vec![0xab])).await.unwrap();

        assert_eq!(outcome, UplinkOutcome::Suppressed);
        assert_eq!(std::fs::read(harness.document_path()).unwrap(), before);
        assert!(harness.sender.calls().is_empty());
        assert!(harness.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_decode_failure_still_persists_raw_uplink() {
        let harness = Harness::new(StaticDecoder::failing()).await;

        let outcome = harness.send(uplink(vec![0xff])).await.unwrap();

        assert!(matches!(outcome, UplinkOutcome::Processed(_)));
        let stored = harness.store.get(&eui()).await.unwrap().unwrap();
        assert_eq!(stored.encoded_data.unwrap().hex_encoded, "ff");

        let log = std::fs::read_to_string(harness.temp_dir.path().join("errors.txt")).unwrap();
        assert!(log.contains("0123456789abcdef Decode error: unknown payload"));
    }

    #[tokio::test]
    async fn test_gnss_device_gets_gateway_assistance() {
        let harness = Harness::new(StaticDecoder::returning(Some(json!({"gnss": {}})))).await;

        let outcome = harness.send(uplink(vec![0xab])).await.unwrap();

        let UplinkOutcome::Processed(document) = outcome else {
            panic!("uplink was suppressed");
        };
        assert_eq!(
            document.gnss.unwrap().last_assistance_update_attempt,
            Some(received_at())
        );
        assert_eq!(harness.sender.payloads(), vec!["01054600ce".to_string()]);

        // Same position again a minute later: throttled
        let mut again = uplink(vec![0xab]);
        again.received_at = Some(received_at() + chrono::Duration::seconds(60));
        harness.send(again).await.unwrap();
        assert_eq!(harness.sender.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_event_time_defaults_to_now() {
        let harness = Harness::new(StaticDecoder::returning(Some(json!({})))).await;
        let mut without_time = uplink(vec![0xab]);
        without_time.received_at = None;

        let before = Utc::now();
        harness.send(without_time).await.unwrap();

        let stored = harness.store.get(&eui()).await.unwrap().unwrap();
        assert!(stored.encoded_data.unwrap().timestamp >= before);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_recorded_and_replaced() {
        let harness = Harness::new(StaticDecoder::returning(Some(json!({})))).await;
        std::fs::write(harness.document_path(), "{truncated").unwrap();

        let outcome = harness.send(uplink(vec![0xab])).await.unwrap();

        assert!(matches!(outcome, UplinkOutcome::Processed(_)));
        assert!(harness.store.get(&eui()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_dev_eui_is_rejected() {
        let harness = Harness::new(StaticDecoder::returning(Some(json!({})))).await;
        let mut bad = uplink(vec![0xab]);
        bad.dev_eui = "".to_string();

        let result = harness.send(bad).await;
        assert!(matches!(result, Err(ReactorError::InvalidDevEui(_))));
        assert!(harness.decoder.seen().is_empty());
    }

    #[tokio::test]
    async fn test_worker_processes_channel_in_order() {
        let harness = Harness::new(StaticDecoder::returning(Some(json!({})))).await;
        let Harness {
            temp_dir: _temp_dir,
            store,
            coordinator,
            sender,
            ..
        } = harness;

        let (tx, rx) = mpsc::channel(10);
        let worker = tokio::spawn(Arc::new(coordinator).run(sender, rx));

        let mut bad = uplink(vec![0x00]);
        bad.dev_eui = "not-an-eui".to_string();
        tx.send(bad).await.unwrap();
        tx.send(uplink(vec![0x01])).await.unwrap();
        tx.send(uplink(vec![0x02])).await.unwrap();
        drop(tx);
        worker.await.unwrap();

        let stored = store.get(&eui()).await.unwrap().unwrap();
        assert_eq!(stored.encoded_data.unwrap().hex_encoded, "02");
    }
}
