//! Client-side connection and transport core for remoshell: a resilient
//! signaling client, a multi-peer WebRTC connection manager, a
//! cross-language binary wire protocol, and app lifecycle/backpressure
//! handling.
//!
//! This crate has no UI or host surface of its own — it is meant to be
//! embedded by a native shell, browser extension, or mobile app that owns
//! rendering, local storage, and camera access, and drives this crate
//! through plain async calls.

pub mod base58;
pub mod config;
pub mod error;
pub mod latency;
pub mod lifecycle;
pub mod pairing;
pub mod peer;
pub mod protocol;
pub mod signaling;

/// Initialize structured logging for an embedding application. Reads the
/// standard `RUST_LOG` filter if set, otherwise defaults to `info`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}
