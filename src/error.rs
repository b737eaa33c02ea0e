//! Per-component error taxonomy.
//!
//! Each fallible boundary gets its own enum rather than one crate-wide error
//! type, so callers can match on exactly the failures their component can
//! produce.

use thiserror::Error;

/// Errors from encoding/decoding the binary wire protocol.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed MessagePack payload: {0}")]
    InvalidFormat(String),

    #[error("unsupported envelope version: {0}")]
    VersionMismatch(u8),

    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Errors from parsing a scanned pairing payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("payload is not recognized as any known pairing format")]
    UnrecognizedFormat,

    #[error("base58 decode failed: {0}")]
    InvalidBase58(String),

    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),

    #[error("public_key is not valid base64: {0}")]
    InvalidPublicKeyEncoding(String),

    #[error("public_key must be 32 bytes (Ed25519), got {0}")]
    InvalidPublicKeyLength(usize),
}

/// Errors from the signaling client.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("failed to connect to signaling server: {0}")]
    ConnectFailed(String),

    #[error("signaling socket is not open")]
    NotConnected,

    #[error("maximum reconnection attempts reached")]
    MaxReconnectAttemptsReached,

    #[error("signaling client was destroyed")]
    Destroyed,
}

/// Errors from the peer connection manager.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("no connection for peer {0}")]
    UnknownPeer(String),

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),

    #[error("data channel {0} is not open")]
    ChannelNotOpen(&'static str),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid environment variable {name}: {value}")]
    InvalidEnv { name: String, value: String },
}
