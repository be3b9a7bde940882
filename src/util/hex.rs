use crate::error::ReactorError;

/// Lower-case hex encoding, two digits per byte
pub fn encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a hex string (either case); odd lengths and non-hex digits are rejected
pub fn decode(text: &str) -> Result<Vec<u8>, ReactorError> {
    let text = text.trim();
    if text.len() % 2 != 0 {
        return Err(ReactorError::InvalidUplink(format!(
            "Hex string has odd length {}",
            text.len()
        )));
    }
    if !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ReactorError::InvalidUplink(
            "Hex string contains non-hex characters".to_string(),
        ));
    }

    text.as_bytes()
        .chunks(2)
        .map(|pair| {
            let digits = std::str::from_utf8(pair)
                .map_err(|e| ReactorError::InvalidUplink(e.to_string()))?;
            u8::from_str_radix(digits, 16)
                .map_err(|e| ReactorError::InvalidUplink(format!("'{}': {}", digits, e)))
        })
        .collect()
}
