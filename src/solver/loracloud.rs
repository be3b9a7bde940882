use super::{AlmanacImage, Solver};
use crate::error::{ReactorError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

const GNSS_SOLVE_PATH: &str = "/api/v1/solve/gnss_lr1110_singleframe";
const WIFI_SOLVE_PATH: &str = "/api/v2/loraWifi";
const ALMANAC_PATH: &str = "/api/v1/almanac/full";

/// Minimum number of access points the Wi-Fi solver can work with
const MIN_WIFI_ACCESS_POINTS: usize = 2;

/// LoRa Cloud modem & geolocation services
pub struct LoraCloudSolver {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct GnssSolution {
    llh: Vec<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    capture_time_utc: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WifiSolution {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct AlmanacResult {
    #[serde(default)]
    almanac_compressed: Option<String>,
    #[serde(default)]
    almanac_image: Option<String>,
}

/// What the decoder found in the uplink
#[derive(Debug, PartialEq)]
enum PositioningRequest {
    Gnss { payload: String, capture_time: Value },
    Wifi { access_points: Vec<Value> },
}

impl PositioningRequest {
    fn from_decoded(decoded: &Map<String, Value>) -> Result<Option<Self>> {
        let encoded = decoded
            .get("semtechEncoded")
            .or_else(|| decoded.get("semtechGpsEncoded"));
        let Some(encoded) = encoded else {
            return Ok(None);
        };

        if encoded.get("msgtype").and_then(Value::as_str) == Some("wifi") {
            let access_points = decoded
                .get("wifi")
                .and_then(|w| w.get("wifiAccessPoints"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if access_points.len() < MIN_WIFI_ACCESS_POINTS {
                return Err(ReactorError::Solver(
                    "Not enough access points to resolve wifi position".to_string(),
                ));
            }
            return Ok(Some(PositioningRequest::Wifi { access_points }));
        }

        let payload = encoded.get("payload").and_then(Value::as_str);
        let capture_time = encoded.get("gnss_capture_time");
        match (payload, capture_time) {
            (Some(payload), Some(capture_time)) => Ok(Some(PositioningRequest::Gnss {
                payload: payload.to_string(),
                capture_time: capture_time.clone(),
            })),
            _ => Err(ReactorError::Solver(
                "Not enough information to resolve GNSS position".to_string(),
            )),
        }
    }
}

impl LoraCloudSolver {
    pub fn new(base_url: String, token: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str, body: &Value) -> Result<Envelope<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!("LoRa Cloud request to {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", &self.token)
            .json(body)
            .send()
            .await?;

        Self::read_envelope(&url, response).await
    }

    async fn read_envelope<T: serde::de::DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<Envelope<T>> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReactorError::Solver(format!(
                "{} returned {}: {}",
                url, status, text
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ReactorError::Solver(format!("Unexpected response from {}: {}", url, e)))?;
        if !envelope.errors.is_empty() {
            debug!("LoRa Cloud reported errors: {:?}", envelope.errors);
        }
        Ok(envelope)
    }
}

#[async_trait]
impl Solver for LoraCloudSolver {
    fn name(&self) -> &'static str {
        "loracloud"
    }

    async fn solve_position(&self, decoded: &Map<String, Value>) -> Result<Option<Map<String, Value>>> {
        let Some(request) = PositioningRequest::from_decoded(decoded)? else {
            return Ok(None);
        };

        let solution = match request {
            PositioningRequest::Gnss {
                payload,
                capture_time,
            } => {
                let body = json!({"payload": payload, "gnss_capture_time": capture_time});
                let envelope: Envelope<GnssSolution> = self.post(GNSS_SOLVE_PATH, &body).await?;
                envelope.result.and_then(|r| {
                    let (lat, lng) = (*r.llh.first()?, *r.llh.get(1)?);
                    let mut fields = Map::new();
                    fields.insert("latitude".into(), json!(lat));
                    fields.insert("longitude".into(), json!(lng));
                    if let Some(alt) = r.llh.get(2) {
                        fields.insert("altitude".into(), json!(alt));
                    }
                    if let Some(accuracy) = r.accuracy {
                        fields.insert("accuracy".into(), json!(accuracy));
                    }
                    if let Some(t) = r.capture_time_utc {
                        fields.insert("positionTimestamp".into(), json!(t));
                    }
                    Some(fields)
                })
            }
            PositioningRequest::Wifi { access_points } => {
                let body = json!({"wifiAccessPoints": access_points});
                let envelope: Envelope<WifiSolution> = self.post(WIFI_SOLVE_PATH, &body).await?;
                envelope.result.map(|r| {
                    let mut fields = Map::new();
                    fields.insert("latitude".into(), json!(r.latitude));
                    fields.insert("longitude".into(), json!(r.longitude));
                    if let Some(accuracy) = r.accuracy {
                        fields.insert("accuracy".into(), json!(accuracy));
                    }
                    fields
                })
            }
        };

        if let Some(ref fields) = solution {
            info!(
                "LoRa Cloud solved position {:?}, {:?}",
                fields.get("latitude"),
                fields.get("longitude")
            );
        }
        Ok(solution)
    }

    async fn load_almanac(&self) -> Result<Option<AlmanacImage>> {
        let url = format!("{}{}", self.base_url, ALMANAC_PATH);
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.token)
            .send()
            .await?;
        let envelope: Envelope<AlmanacResult> = Self::read_envelope(&url, response).await?;

        let Some(result) = envelope.result else {
            return Ok(None);
        };
        let image = match (result.almanac_compressed, result.almanac_image) {
            (Some(image), _) if !image.is_empty() => AlmanacImage {
                image,
                compressed: true,
            },
            (_, Some(image)) if !image.is_empty() => AlmanacImage {
                image,
                compressed: false,
            },
            _ => return Ok(None),
        };
        Ok(Some(image))
    }
}
