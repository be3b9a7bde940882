use crate::error::ReactorError;
use serde::{Deserialize, Serialize};

/// LoRaWAN DevEUI (8 bytes, hex-encoded)
///
/// Network servers disagree on casing (ChirpStack topics are lower-case,
/// Helium topics upper-case), so every lookup goes through [`DevEui::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DevEui(pub String);

impl DevEui {
    pub fn new(dev_eui: String) -> Result<Self, ReactorError> {
        let eui = Self(dev_eui.trim().to_string());
        eui.validate()?;
        Ok(eui)
    }

    pub fn validate(&self) -> Result<(), ReactorError> {
        if self.0.is_empty() {
            return Err(ReactorError::InvalidDevEui(
                "DevEUI must not be empty".to_string(),
            ));
        }
        if self.0.len() != 16 {
            return Err(ReactorError::InvalidDevEui(format!(
                "DevEUI must be 16 hex characters, got '{}'",
                self.0
            )));
        }
        if !self.0.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ReactorError::InvalidDevEui(format!(
                "DevEUI must contain only hex characters, got '{}'",
                self.0
            )));
        }
        Ok(())
    }

    /// Returns the DevEUI as a normalized lowercase string
    pub fn normalized(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DevEui {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Application port used for every downlink the reaction engine emits
pub const REACTION_PORT: u8 = 21;

/// Max application payload for a ChirpStack data rate index (EU868 table).
/// An unknown data rate is assumed to be the slowest one.
pub fn max_payload_for_dr(dr: Option<u8>) -> usize {
    match dr {
        Some(0..=2) | None => 51,
        Some(3) => 115,
        Some(_) => 222,
    }
}

/// Max application payload for a Helium `SFxBWy` spreading descriptor
pub fn max_payload_for_spreading(spreading: &str) -> Option<usize> {
    match spreading {
        "SF12BW125" | "SF11BW125" | "SF10BW125" => Some(51),
        "SF9BW125" => Some(115),
        "SF8BW125" | "SF7BW125" | "SF8BW250" => Some(222),
        other => {
            tracing::warn!(spreading = other, "Unhandled Helium spreading factor");
            None
        }
    }
}
