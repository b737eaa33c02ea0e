//! Bitcoin-alphabet base58, used by legacy pairing payload encodings.
//!
//! Thin wrapper over `bs58` with explicit tests for leading-zero-byte
//! preservation, since that's the detail most base58 consumers get wrong.

pub fn encode(bytes: &[u8]) -> String {
    bs58::encode(bytes).into_string()
}

pub fn decode(text: &str) -> Result<Vec<u8>, bs58::decode::Error> {
    bs58::decode(text).into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_arbitrary_bytes() {
        let bytes = b"remoshell pairing payload".to_vec();
        let encoded = encode(&bytes);
        assert_eq!(decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn preserves_leading_zero_bytes() {
        let bytes = vec![0u8, 0u8, 1, 2, 3];
        let encoded = encode(&bytes);
        assert!(encoded.starts_with("11"));
        assert_eq!(decode(&encoded).unwrap(), bytes);
    }

    #[test]
    fn empty_input_round_trips() {
        assert_eq!(encode(&[]), "");
        assert_eq!(decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_invalid_characters() {
        // '0', 'O', 'I', 'l' are excluded from the Bitcoin alphabet.
        assert!(decode("0OIl").is_err());
    }
}
