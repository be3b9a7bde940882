use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReactorError {
    #[error("MQTT connection error: {0}")]
    MqttError(String),

    #[error("MQTT parsing error: {0}")]
    MqttParseError(String),

    #[error("Invalid uplink: {0}")]
    InvalidUplink(String),

    #[error("Invalid DevEUI: {0}")]
    InvalidDevEui(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Downlink error: {0}")]
    Downlink(String),

    #[error("Almanac error: {0}")]
    Almanac(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ReactorError {
    fn from(err: reqwest::Error) -> Self {
        ReactorError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ReactorError>;
