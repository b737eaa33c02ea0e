//! Round-trip latency measurement over the control channel.
//!
//! A ping is a fixed 12-byte payload: a 4-byte big-endian id followed by an
//! 8-byte big-endian f64 timestamp (sender's local monotonic clock, in
//! milliseconds). The peer echoes the same bytes back as a pong.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

const PENDING_TTL: Duration = Duration::from_secs(30);
const PING_PAYLOAD_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub ping_id: u32,
    pub timestamp_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyResult {
    pub rtt_ms: f64,
    pub latency_ms: f64,
    pub timestamp_ms: f64,
}

/// Encode a ping payload: `[ping_id: u32 BE][timestamp_ms: f64 BE]`.
pub fn encode_ping(ping_id: u32, timestamp_ms: f64) -> [u8; PING_PAYLOAD_LEN] {
    let mut bytes = [0u8; PING_PAYLOAD_LEN];
    bytes[0..4].copy_from_slice(&ping_id.to_be_bytes());
    bytes[4..12].copy_from_slice(&timestamp_ms.to_be_bytes());
    bytes
}

/// Decode a ping/pong payload back into its id and timestamp.
pub fn decode_ping(bytes: &[u8]) -> Option<(u32, f64)> {
    if bytes.len() != PING_PAYLOAD_LEN {
        return None;
    }
    let ping_id = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
    let timestamp_ms = f64::from_be_bytes(bytes[4..12].try_into().ok()?);
    Some((ping_id, timestamp_ms))
}

struct Pending {
    sent_at: Instant,
    timestamp_ms: f64,
}

/// Tracks in-flight pings and a rolling window of completed RTT samples.
pub struct LatencyTracker {
    next_id: u32,
    pending: HashMap<u32, Pending>,
    samples: VecDeque<f64>,
    sample_cap: usize,
}

impl LatencyTracker {
    pub fn new(sample_cap: usize) -> Self {
        Self {
            next_id: 0,
            pending: HashMap::new(),
            samples: VecDeque::new(),
            sample_cap,
        }
    }

    /// Start a new ping measurement, garbage-collecting pings older than
    /// 30s along the way.
    pub fn start_measurement(&mut self, now_ms: f64) -> Measurement {
        self.gc();

        let ping_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        self.pending.insert(
            ping_id,
            Pending {
                sent_at: Instant::now(),
                timestamp_ms: now_ms,
            },
        );

        Measurement { ping_id, timestamp_ms: now_ms }
    }

    /// Complete a measurement on pong receipt. Returns `None` if the id is
    /// unknown (already GC'd, or never sent by this tracker).
    pub fn complete_measurement(&mut self, ping_id: u32) -> Option<LatencyResult> {
        let pending = self.pending.remove(&ping_id)?;
        let rtt_ms = pending.sent_at.elapsed().as_secs_f64() * 1000.0;

        if self.samples.len() >= self.sample_cap {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);

        Some(LatencyResult {
            rtt_ms,
            latency_ms: rtt_ms / 2.0,
            timestamp_ms: pending.timestamp_ms,
        })
    }

    fn gc(&mut self) {
        self.pending.retain(|_, p| p.sent_at.elapsed() < PENDING_TTL);
    }

    pub fn average_rtt_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// `target_ms` is a one-way budget; average RTT is compared against
    /// twice that.
    pub fn is_within_target(&self, target_ms: f64) -> bool {
        match self.average_rtt_ms() {
            Some(avg) => avg <= target_ms * 2.0,
            None => false,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_payload_round_trips() {
        let encoded = encode_ping(7, 12345.5);
        assert_eq!(encoded.len(), PING_PAYLOAD_LEN);
        assert_eq!(decode_ping(&encoded), Some((7, 12345.5)));
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert_eq!(decode_ping(&[0u8; 11]), None);
        assert_eq!(decode_ping(&[0u8; 13]), None);
    }

    #[test]
    fn complete_unknown_ping_returns_none() {
        let mut tracker = LatencyTracker::new(10);
        assert!(tracker.complete_measurement(999).is_none());
    }

    #[test]
    fn completed_measurement_feeds_average() {
        let mut tracker = LatencyTracker::new(10);
        let m = tracker.start_measurement(0.0);
        let result = tracker.complete_measurement(m.ping_id).unwrap();
        assert!(result.rtt_ms >= 0.0);
        assert_eq!(result.latency_ms, result.rtt_ms / 2.0);
        assert_eq!(tracker.sample_count(), 1);
    }

    #[test]
    fn sample_buffer_evicts_oldest_past_cap() {
        let mut tracker = LatencyTracker::new(2);
        for _ in 0..3 {
            let m = tracker.start_measurement(0.0);
            tracker.complete_measurement(m.ping_id);
        }
        assert_eq!(tracker.sample_count(), 2);
    }

    #[test]
    fn is_within_target_compares_against_double() {
        let mut tracker = LatencyTracker::new(10);
        assert!(!tracker.is_within_target(50.0)); // no samples yet
        let m = tracker.start_measurement(0.0);
        tracker.complete_measurement(m.ping_id);
        assert!(tracker.is_within_target(10_000.0));
    }

    #[test]
    fn ping_ids_do_not_repeat_within_a_session() {
        let mut tracker = LatencyTracker::new(10);
        let a = tracker.start_measurement(0.0);
        let b = tracker.start_measurement(0.0);
        assert_ne!(a.ping_id, b.ping_id);
    }
}
