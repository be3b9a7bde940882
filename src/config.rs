use crate::error::ReactorError;
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "LORAREACTOR_";

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub storage: StorageConfig,
    pub reactor: ReactorConfig,
    pub solver: SolverConfig,
    pub decoder: DecoderConfig,
    pub output: OutputConfig,
    pub http_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

/// Which network server the MQTT broker belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    ChirpStack { application_id: String },
    Helium,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub transport: TransportKind,
    pub broker_url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub device_list: Option<PathBuf>,
}

/// Throttling and framing parameters of the assistance and almanac protocols
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Minimum time between two assistance position pushes. At 0.1 degree
    /// tolerance (~11 km) a vehicle at 130 km/h needs about five minutes to
    /// drift far enough to need a new one.
    pub assistance_interval_secs: u64,
    pub almanac_max_age_secs: u64,
    pub almanac_retry_cooldown_secs: u64,
    pub almanac_frame_delay_ms: u64,
    pub almanac_max_chunk_size: usize,
}

/// Largest whole number of seconds a `chrono::Duration` can hold
pub const MAX_DURATION_SECS: u64 = i64::MAX as u64 / 1000;

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

impl ReactorConfig {
    pub fn assistance_interval(&self) -> chrono::Duration {
        seconds(self.assistance_interval_secs)
    }

    pub fn almanac_max_age(&self) -> chrono::Duration {
        seconds(self.almanac_max_age_secs)
    }

    pub fn almanac_retry_cooldown(&self) -> chrono::Duration {
        seconds(self.almanac_retry_cooldown_secs)
    }

    pub fn almanac_frame_delay(&self) -> Duration {
        Duration::from_millis(self.almanac_frame_delay_ms)
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            assistance_interval_secs: 300,
            almanac_max_age_secs: 28 * 24 * 3600,
            almanac_retry_cooldown_secs: 6 * 3600,
            almanac_frame_delay_ms: 10_000,
            almanac_max_chunk_size: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverConfig {
    None,
    LoraCloud { base_url: String, token: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderConfig {
    None,
    Http { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecorationKind {
    None,
    Minimal,
    YggioPush,
}

impl FromStr for DecorationKind {
    type Err = ReactorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(DecorationKind::None),
            "minimal" => Ok(DecorationKind::Minimal),
            "yggio-push" => Ok(DecorationKind::YggioPush),
            other => Err(ReactorError::Config(format!(
                "Unknown decoration '{}' (expected none, minimal or yggio-push)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherConfig {
    Console,
    Https { url: String },
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub decoration: DecorationKind,
    pub publisher: PublisherConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let transport = match env_or("TRANSPORT", "chirpstack").to_ascii_lowercase().as_str() {
            "chirpstack" => TransportKind::ChirpStack {
                application_id: env_required("CHIRPSTACK_APPLICATION_ID")?,
            },
            "helium" => TransportKind::Helium,
            other => {
                return Err(ReactorError::Config(format!(
                    "Unknown transport '{}' (expected chirpstack or helium)",
                    other
                ))
                .into())
            }
        };

        let mqtt = MqttConfig {
            transport,
            broker_url: env_required("MQTT_BROKER")?,
            client_id: env_opt("MQTT_CLIENT_ID")
                .unwrap_or_else(|| format!("lorareactor-{}", uuid::Uuid::new_v4())),
            username: env_opt("MQTT_USERNAME"),
            password: env_opt("MQTT_PASSWORD"),
            keep_alive_secs: parse_env("MQTT_KEEP_ALIVE_SECS", 30)?,
            reconnect_delay_secs: parse_env("MQTT_RECONNECT_DELAY_SECS", 5)?,
        };

        let storage = StorageConfig {
            data_dir: PathBuf::from(env_or("DATA_DIR", "storage")),
            device_list: env_opt("DEVICE_LIST").map(PathBuf::from),
        };

        let defaults = ReactorConfig::default();
        let reactor = ReactorConfig {
            assistance_interval_secs: parse_env(
                "ASSISTANCE_INTERVAL_SECS",
                defaults.assistance_interval_secs,
            )?,
            almanac_max_age_secs: parse_env("ALMANAC_MAX_AGE_SECS", defaults.almanac_max_age_secs)?,
            almanac_retry_cooldown_secs: parse_env(
                "ALMANAC_RETRY_COOLDOWN_SECS",
                defaults.almanac_retry_cooldown_secs,
            )?,
            almanac_frame_delay_ms: parse_env(
                "ALMANAC_FRAME_DELAY_MS",
                defaults.almanac_frame_delay_ms,
            )?,
            almanac_max_chunk_size: parse_env(
                "ALMANAC_MAX_CHUNK_SIZE",
                defaults.almanac_max_chunk_size,
            )?,
        };

        let solver = match env_or("SOLVER", "none").to_ascii_lowercase().as_str() {
            "none" => SolverConfig::None,
            "loracloud" => SolverConfig::LoraCloud {
                base_url: env_or("LORACLOUD_URL", "https://mgs.loracloud.com"),
                token: env_required("LORACLOUD_TOKEN")?,
            },
            other => {
                return Err(ReactorError::Config(format!(
                    "Unknown solver '{}' (expected none or loracloud)",
                    other
                ))
                .into())
            }
        };

        let decoder = match env_or("DECODER", "none").to_ascii_lowercase().as_str() {
            "none" => DecoderConfig::None,
            "http" => DecoderConfig::Http {
                url: env_required("DECODER_URL")?,
            },
            other => {
                return Err(ReactorError::Config(format!(
                    "Unknown decoder '{}' (expected none or http)",
                    other
                ))
                .into())
            }
        };

        let publisher = match env_or("PUBLISHER", "console").to_ascii_lowercase().as_str() {
            "console" => PublisherConfig::Console,
            "https" => PublisherConfig::Https {
                url: env_required("PUBLISH_URL")?,
            },
            other => {
                return Err(ReactorError::Config(format!(
                    "Unknown publisher '{}' (expected console or https)",
                    other
                ))
                .into())
            }
        };

        let output = OutputConfig {
            decoration: env_or("DECORATION", "none").parse()?,
            publisher,
        };

        Ok(Config {
            mqtt,
            storage,
            reactor,
            solver,
            decoder,
            output,
            http_timeout_secs: parse_env("HTTP_TIMEOUT_SECS", 10)?,
            shutdown_grace_secs: parse_env("SHUTDOWN_GRACE_SECS", 30)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        let url = &self.mqtt.broker_url;
        if !(url.starts_with("mqtt://") || url.starts_with("mqtts://") || url.starts_with("ssl://")) {
            return Err(ReactorError::Config(format!(
                "MQTT broker URL must start with mqtt://, mqtts:// or ssl://, got '{}'",
                url
            ))
            .into());
        }

        if self.mqtt.username.is_some() != self.mqtt.password.is_some() {
            return Err(ReactorError::Config(
                "MQTT username and password must be set together".to_string(),
            )
            .into());
        }

        if let TransportKind::ChirpStack { application_id } = &self.mqtt.transport {
            if application_id.trim().is_empty() {
                return Err(ReactorError::Config(
                    "ChirpStack application id must not be empty".to_string(),
                )
                .into());
            }
        }

        if self.reactor.almanac_max_chunk_size == 0 {
            return Err(ReactorError::Config(
                "Almanac chunk size must be at least 1 byte".to_string(),
            )
            .into());
        }

        for (key, secs) in [
            ("ASSISTANCE_INTERVAL_SECS", self.reactor.assistance_interval_secs),
            ("ALMANAC_MAX_AGE_SECS", self.reactor.almanac_max_age_secs),
            ("ALMANAC_RETRY_COOLDOWN_SECS", self.reactor.almanac_retry_cooldown_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(ReactorError::Config(format!(
                    "{}{} must be at most {} seconds, got {}",
                    ENV_PREFIX, key, MAX_DURATION_SECS, secs
                ))
                .into());
            }
        }

        if let Some(ref list) = self.storage.device_list {
            if !list.exists() {
                return Err(ReactorError::Config(format!(
                    "Device list not found: {:?}",
                    list
                ))
                .into());
            }
        }

        for url in [
            match &self.decoder {
                DecoderConfig::Http { url } => Some(url),
                DecoderConfig::None => None,
            },
            match &self.output.publisher {
                PublisherConfig::Https { url } => Some(url),
                PublisherConfig::Console => None,
            },
        ]
        .into_iter()
        .flatten()
        {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ReactorError::Config(format!(
                    "HTTP endpoint must start with http:// or https://, got '{}'",
                    url
                ))
                .into());
            }
        }

        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, key))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    env_opt(key).with_context(|| format!("{}{} must be set", ENV_PREFIX, key))
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|s| {
            s.parse()
                .map_err(|e| anyhow::anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}
