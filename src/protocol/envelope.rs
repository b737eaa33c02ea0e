//! The outer wire frame: `[version, sequence, payload]`.

use serde::{Deserialize, Serialize};

use super::message::Message;
use crate::error::CodecError;

/// Current protocol version. Bumped when the wire format changes in a
/// non-backward-compatible way.
pub const PROTOCOL_VERSION: u8 = 1;

/// A single frame on the wire: a version tag, a per-endpoint monotonic
/// sequence number, and a tagged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    pub sequence: u32,
    pub payload: Message,
}

impl Envelope {
    pub fn new(sequence: u32, payload: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            sequence,
            payload,
        }
    }
}

/// Encode an envelope to its MessagePack wire form.
///
/// Uses array-mode encoding (`rmp_serde::to_vec`, not `to_vec_named`) so
/// `Envelope` and every message payload struct serialize positionally —
/// this is what makes the output byte-identical to a peer implementation
/// that expects plain arrays rather than maps.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec(envelope)?)
}

/// Decode a MessagePack wire frame into an [`Envelope`].
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let envelope: Envelope = rmp_serde::from_slice(bytes)?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(CodecError::VersionMismatch(envelope.version));
    }
    Ok(envelope)
}

/// Encode a bare message without the envelope wrapper.
pub fn encode_message(message: &Message) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec(message)?)
}

/// Decode a bare message without the envelope wrapper.
pub fn decode_message(bytes: &[u8]) -> Result<Message, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{DataStream, Message};

    // S1 from the wire format test vectors: Ping with an empty byte payload.
    const PING_VECTOR: &[u8] = &[
        0x93, 0x01, 0x01, 0x92, 0xa4, 0x50, 0x69, 0x6e, 0x67, 0x92, 0xcd, 0x30, 0x39, 0xc4, 0x00,
    ];

    // S2: SessionData carrying "Hello" on the Stdout stream.
    const SESSION_DATA_VECTOR: &[u8] = &[
        0x93, 0x01, 0x03, 0x92, 0xab, 0x53, 0x65, 0x73, 0x73, 0x69, 0x6f, 0x6e, 0x44, 0x61, 0x74,
        0x61, 0x93, 0xa6, 0x73, 0x65, 0x73, 0x73, 0x2d, 0x31, 0xa6, 0x53, 0x74, 0x64, 0x6f, 0x75,
        0x74, 0xc4, 0x05, 0x48, 0x65, 0x6c, 0x6c, 0x6f,
    ];

    #[test]
    fn ping_matches_wire_vector() {
        let envelope = Envelope::new(
            1,
            Message::Ping {
                timestamp: 12345,
                payload: vec![],
            },
        );
        assert_eq!(encode_envelope(&envelope).unwrap(), PING_VECTOR);

        let decoded = decode_envelope(PING_VECTOR).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn session_data_matches_wire_vector() {
        let envelope = Envelope::new(
            3,
            Message::SessionData {
                session_id: "sess-1".to_string(),
                stream: DataStream::Stdout,
                data: b"Hello".to_vec(),
            },
        );
        assert_eq!(encode_envelope(&envelope).unwrap(), SESSION_DATA_VECTOR);

        let decoded = decode_envelope(SESSION_DATA_VECTOR).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let envelope = Envelope::new(
            42,
            Message::Pong {
                timestamp: 99,
                payload: vec![1, 2, 3],
            },
        );
        let bytes = encode_envelope(&envelope).unwrap();
        assert_eq!(decode_envelope(&bytes).unwrap(), envelope);
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = encode_envelope(&Envelope::new(
            1,
            Message::Ping {
                timestamp: 1,
                payload: vec![],
            },
        ))
        .unwrap();
        bytes[1] = 99; // corrupt the version byte
        match decode_envelope(&bytes) {
            Err(CodecError::VersionMismatch(99)) => {}
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn payload_opens_with_fixarray_two() {
        let bytes = encode_envelope(&Envelope::new(
            1,
            Message::Ping {
                timestamp: 1,
                payload: vec![],
            },
        ))
        .unwrap();
        // [version, sequence, payload] -> payload starts at index 3.
        assert_eq!(bytes[3], 0x92);
    }
}
