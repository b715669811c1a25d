//! Binary waveform codecs.
//!
//! Two distinct encodings exist on purpose:
//!
//! - **On the wire**: channels arrive as base64 text wrapping big-endian
//!   IEEE-754 doubles, 8 bytes per value, most significant byte first. A
//!   trailing group shorter than 8 bytes is dropped.
//! - **At rest**: persisted channels are base64 text wrapping raw
//!   little-endian `f32` values, 4 bytes per value.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// Decode big-endian IEEE-754 doubles from raw bytes.
///
/// Every consecutive 8-byte group yields one value; a short trailing group is
/// dropped rather than failing the whole payload.
pub fn decode_be_f64(bytes: &[u8]) -> Vec<f64> {
    bytes
        .chunks_exact(8)
        .map(|group| f64::from_be_bytes(group.try_into().expect("chunks_exact yields 8 bytes")))
        .collect()
}

/// Encode values as big-endian IEEE-754 doubles.
pub fn encode_be_f64(values: &[f64]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 8);
    for value in values {
        bytes.extend_from_slice(&value.to_be_bytes());
    }
    bytes
}

/// Decode little-endian `f32` values from a persisted blob.
pub fn decode_le_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|group| f32::from_le_bytes(group.try_into().expect("chunks_exact yields 4 bytes")))
        .collect()
}

/// Encode `f32` values as a little-endian persisted blob.
pub fn encode_le_f32(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Base64-encode a payload (standard alphabet, padded, no line breaks).
pub fn base64_encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Base64-decode a payload. Returns `None` on malformed input; callers treat
/// that as an empty channel rather than a frame failure.
pub fn base64_decode(text: &str) -> Option<Vec<u8>> {
    BASE64.decode(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_known_big_endian_doubles() {
        // 1.0 is 0x3FF0000000000000 big-endian
        let bytes = [0x3F, 0xF0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decode_be_f64(&bytes), vec![1.0]);

        assert_eq!(decode_be_f64(&[0u8; 16]), vec![0.0, 0.0]);
    }

    #[test]
    fn short_trailing_group_is_dropped() {
        let mut bytes = encode_be_f64(&[2.5, -7.125]);
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE]);
        assert_eq!(decode_be_f64(&bytes), vec![2.5, -7.125]);

        // fewer than 8 bytes total decodes to nothing
        assert!(decode_be_f64(&[1, 2, 3, 4, 5, 6, 7]).is_empty());
    }

    #[test]
    fn malformed_base64_degrades_to_none() {
        assert!(base64_decode("not//valid!!base64").is_none());
        assert_eq!(base64_decode(""), Some(Vec::new()));
    }

    proptest! {
        // Chunk count is exact for aligned input; the remainder never leaks
        // into the decoded array.
        #[test]
        fn group_arithmetic_holds(values in prop::collection::vec(-1.0e12f64..1.0e12, 0..64),
                                  remainder in prop::collection::vec(any::<u8>(), 0..8)) {
            let mut bytes = encode_be_f64(&values);
            let aligned = bytes.len();
            bytes.extend_from_slice(&remainder);

            let decoded = decode_be_f64(&bytes);
            prop_assert_eq!(decoded.len(), aligned / 8);
        }

        // Bit-for-bit round trip through the wire codec, NaN payloads included.
        #[test]
        fn be_f64_round_trips_bit_exact(bits in prop::collection::vec(any::<u64>(), 0..64)) {
            let values: Vec<f64> = bits.into_iter().map(f64::from_bits).collect();
            let decoded = decode_be_f64(&encode_be_f64(&values));

            prop_assert_eq!(decoded.len(), values.len());
            for (a, b) in values.iter().zip(&decoded) {
                prop_assert_eq!(a.to_bits(), b.to_bits());
            }
        }

        #[test]
        fn le_f32_round_trips_bit_exact(bits in prop::collection::vec(any::<u32>(), 0..64)) {
            let values: Vec<f32> = bits.into_iter().map(f32::from_bits).collect();
            let decoded = decode_le_f32(&encode_le_f32(&values));

            prop_assert_eq!(decoded.len(), values.len());
            for (a, b) in values.iter().zip(&decoded) {
                prop_assert_eq!(a.to_bits(), b.to_bits());
            }
        }

        #[test]
        fn base64_round_trips(payload in prop::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(base64_decode(&base64_encode(&payload)), Some(payload));
        }
    }
}
