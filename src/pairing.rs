//! Parsing and validation of scanned QR pairing payloads.
//!
//! A payload identifies a remote device and how to reach it. It may arrive
//! in one of four shapes; the canonical one is plain JSON, the others exist
//! for legacy QR codes already printed/deployed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::base58;
use crate::error::PairingError;

const LEGACY_URI_PREFIXES: &[&str] = &["remoshell://connect/", "rs://"];
const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// A parsed, validated pairing payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingPayload {
    pub device_id: String,
    pub public_key: String,
    pub relay_url: String,
    pub expires: u64,
}

impl PairingPayload {
    /// Whether `expires` is in the past relative to `now` (unix seconds).
    pub fn is_expired_at(&self, now: u64) -> bool {
        now > self.expires
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }

    pub fn seconds_until_expiry_at(&self, now: u64) -> u64 {
        self.expires.saturating_sub(now)
    }

    pub fn seconds_until_expiry(&self) -> u64 {
        self.seconds_until_expiry_at(unix_now())
    }

    /// Encode back to the canonical wire form (plain JSON). Legacy
    /// encodings are accepted on parse but never produced here.
    pub fn encode(&self) -> Result<String, PairingError> {
        serde_json::to_string(self).map_err(|e| PairingError::InvalidJson(e.to_string()))
    }

    /// Decode and validate `public_key` as 32 raw Ed25519 key bytes.
    pub fn decode_public_key(&self) -> Result<Vec<u8>, PairingError> {
        let bytes = BASE64
            .decode(&self.public_key)
            .map_err(|e| PairingError::InvalidPublicKeyEncoding(e.to_string()))?;
        if bytes.len() != ED25519_PUBLIC_KEY_LEN {
            return Err(PairingError::InvalidPublicKeyLength(bytes.len()));
        }
        Ok(bytes)
    }

    /// A signaling room identifier derived from the device id, so the
    /// rendezvous server only ever sees a hash rather than the raw id.
    pub fn room_id(&self) -> String {
        let digest = Sha256::digest(self.device_id.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Parse a scanned QR payload in any of the accepted formats.
pub fn parse(text: &str) -> Result<PairingPayload, PairingError> {
    let text = text.trim();

    for prefix in LEGACY_URI_PREFIXES {
        if let Some(encoded) = text.strip_prefix(prefix) {
            return parse_base58_json(encoded);
        }
    }

    if text.starts_with('{') {
        return parse_json(text);
    }

    parse_base58_json(text)
}

fn parse_base58_json(encoded: &str) -> Result<PairingPayload, PairingError> {
    let bytes = base58::decode(encoded).map_err(|e| PairingError::InvalidBase58(e.to_string()))?;
    let json = String::from_utf8(bytes).map_err(|_| PairingError::InvalidUtf8)?;
    parse_json(&json)
}

fn parse_json(json: &str) -> Result<PairingPayload, PairingError> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| PairingError::InvalidJson(e.to_string()))?;

    let device_id = value
        .get("device_id")
        .and_then(|v| v.as_str())
        .ok_or(PairingError::MissingField("device_id"))?
        .to_string();
    let public_key = value
        .get("public_key")
        .and_then(|v| v.as_str())
        .ok_or(PairingError::MissingField("public_key"))?
        .to_string();
    let relay_url = value
        .get("relay_url")
        .and_then(|v| v.as_str())
        .ok_or(PairingError::MissingField("relay_url"))?
        .to_string();
    let expires = value
        .get("expires")
        .and_then(|v| v.as_u64())
        .ok_or(PairingError::MissingField("expires"))?;

    Ok(PairingPayload {
        device_id,
        public_key,
        relay_url,
        expires,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JSON: &str =
        r#"{"device_id":"d-1","public_key":"AA==","relay_url":"wss://r","expires":9999999999}"#;

    #[test]
    fn parses_canonical_json() {
        let payload = parse(SAMPLE_JSON).unwrap();
        assert_eq!(payload.device_id, "d-1");
        assert_eq!(payload.relay_url, "wss://r");
        assert_eq!(payload.expires, 9999999999);
    }

    #[test]
    fn parses_remoshell_uri_form() {
        let encoded = base58::encode(SAMPLE_JSON.as_bytes());
        let uri = format!("remoshell://connect/{encoded}");
        assert_eq!(parse(&uri).unwrap(), parse(SAMPLE_JSON).unwrap());
    }

    #[test]
    fn parses_short_rs_uri_form() {
        let encoded = base58::encode(SAMPLE_JSON.as_bytes());
        let uri = format!("rs://{encoded}");
        assert_eq!(parse(&uri).unwrap(), parse(SAMPLE_JSON).unwrap());
    }

    #[test]
    fn parses_bare_base58() {
        let encoded = base58::encode(SAMPLE_JSON.as_bytes());
        assert_eq!(parse(&encoded).unwrap(), parse(SAMPLE_JSON).unwrap());
    }

    #[test]
    fn rejects_missing_field() {
        let json = r#"{"device_id":"d-1"}"#;
        match parse(json) {
            Err(PairingError::MissingField("public_key")) => {}
            other => panic!("expected MissingField(public_key), got {other:?}"),
        }
    }

    #[test]
    fn expiry_helpers_report_past_deadline() {
        let payload = parse(SAMPLE_JSON).unwrap();
        assert!(!payload.is_expired_at(1_000));
        let expired = PairingPayload {
            expires: 100,
            ..payload
        };
        assert!(expired.is_expired_at(200));
        assert_eq!(expired.seconds_until_expiry_at(200), 0);
    }

    #[test]
    fn encode_round_trips_through_parse() {
        let payload = parse(SAMPLE_JSON).unwrap();
        let encoded = payload.encode().unwrap();
        assert_eq!(parse(&encoded).unwrap(), payload);
    }

    #[test]
    fn decode_public_key_accepts_32_bytes() {
        let key = [7u8; 32];
        let json = format!(
            r#"{{"device_id":"d-1","public_key":"{}","relay_url":"wss://r","expires":1}}"#,
            base64::engine::general_purpose::STANDARD.encode(key)
        );
        let payload = parse(&json).unwrap();
        assert_eq!(payload.decode_public_key().unwrap(), key.to_vec());
    }

    #[test]
    fn decode_public_key_rejects_wrong_length() {
        let payload = parse(SAMPLE_JSON).unwrap(); // "AA==" decodes to 1 byte
        match payload.decode_public_key() {
            Err(PairingError::InvalidPublicKeyLength(1)) => {}
            other => panic!("expected InvalidPublicKeyLength(1), got {other:?}"),
        }
    }

    #[test]
    fn room_id_is_deterministic_and_hex() {
        let payload = parse(SAMPLE_JSON).unwrap();
        let id = payload.room_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, payload.room_id());
    }

    #[test]
    fn strips_surrounding_whitespace() {
        let padded = format!("  {SAMPLE_JSON}  \n");
        assert_eq!(parse(&padded).unwrap(), parse(SAMPLE_JSON).unwrap());
    }
}
