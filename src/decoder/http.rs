use super::{DecodeOutput, Decoder};
use crate::error::{ReactorError, Result};
use crate::model::document::DeviceDocument;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Decoder backed by an external translator service.
///
/// The merged document is POSTed as JSON; the service answers with
/// `{"result": {...} | null, "timeseries": [...]}`.
pub struct HttpDecoder {
    client: reqwest::Client,
    url: String,
}

impl HttpDecoder {
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }

    fn parse_response(body: Value) -> Result<DecodeOutput> {
        let Value::Object(mut body) = body else {
            return Err(ReactorError::Decode(
                "Translator response is not a JSON object".to_string(),
            ));
        };

        let result = match body.remove("result") {
            Some(Value::Object(result)) => Some(result),
            Some(Value::Null) => None,
            Some(other) => {
                return Err(ReactorError::Decode(format!(
                    "Translator result must be an object or null, got {}",
                    other
                )))
            }
            None => {
                return Err(ReactorError::Decode(
                    "Translator response has no result".to_string(),
                ))
            }
        };

        let timeseries = match body.remove("timeseries") {
            Some(Value::Array(series)) => Some(series),
            _ => None,
        };

        Ok(DecodeOutput { result, timeseries })
    }
}

#[async_trait]
impl Decoder for HttpDecoder {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn decode(&self, document: &DeviceDocument) -> Result<DecodeOutput> {
        let response = self.client.post(&self.url).json(document).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ReactorError::Decode(format!(
                "Translator returned {}: {}",
                status, text
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ReactorError::Decode(format!("Invalid translator response: {}", e)))?;

        let output = Self::parse_response(body)?;
        if let Some(series) = &output.timeseries {
            debug!("Ignoring {} timeseries entries", series.len());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn document() -> DeviceDocument {
        serde_json::from_value(json!({
            "encodedData": {
                "port": 1,
                "hexEncoded": "ab",
                "timestamp": "2024-05-01T12:00:00Z",
                "maxSize": null
            }
        }))
        .unwrap()
    }

    async fn decoder_answering(body: Value) -> (MockServer, HttpDecoder) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .and(body_partial_json(json!({"encodedData": {"hexEncoded": "ab"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let decoder =
            HttpDecoder::new(format!("{}/translate", server.uri()), Duration::from_secs(5)).unwrap();
        (server, decoder)
    }

    #[tokio::test]
    async fn test_decode_result_and_timeseries() {
        let (_server, decoder) = decoder_answering(json!({
            "result": {"output": {"temperature": 21.5}},
            "timeseries": [{"temperature": 21.5}]
        }))
        .await;

        let output = decoder.decode(&document()).await.unwrap();
        let result = output.result.unwrap();
        assert_eq!(result.get("output"), Some(&json!({"temperature": 21.5})));
        assert_eq!(output.timeseries.map(|s| s.len()), Some(1));
    }

    #[tokio::test]
    async fn test_null_result_suppresses() {
        let (_server, decoder) = decoder_answering(json!({"result": null})).await;
        let output = decoder.decode(&document()).await.unwrap();
        assert_eq!(output, DecodeOutput::suppressed());
    }

    #[tokio::test]
    async fn test_missing_result_is_error() {
        let (_server, decoder) = decoder_answering(json!({"timeseries": []})).await;
        let result = decoder.decode(&document()).await;
        assert!(matches!(result, Err(ReactorError::Decode(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let decoder = HttpDecoder::new(server.uri(), Duration::from_secs(5)).unwrap();
        let result = decoder.decode(&document()).await;
        assert!(matches!(result, Err(ReactorError::Decode(_))));
    }

    #[test]
    fn test_parse_rejects_scalar_result() {
        assert!(HttpDecoder::parse_response(json!({"result": 3})).is_err());
        assert!(HttpDecoder::parse_response(json!([1, 2])).is_err());
    }
}
