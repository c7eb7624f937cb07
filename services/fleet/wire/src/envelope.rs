//! HMAC envelope framing.
//!
//! Every payload exchanged with a device travels inside an envelope:
//!
//! ```text
//! +-----------------+-------------------+------------------+-----------+
//! | u16 length (BE) | u32 sequence (BE) | payload[length]  | hmac (8B) |
//! +-----------------+-------------------+------------------+-----------+
//! ```
//!
//! The trailer is the last eight bytes of HMAC-SHA256 computed over the
//! length, sequence and payload. A frame whose trailer does not match still
//! decodes structurally so diagnostic views can show it.

use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Length prefix plus sequence
pub const HEADER_SIZE: usize = 6;

/// Truncated HMAC trailer size
pub const HMAC_SIZE: usize = 8;

/// Smallest possible frame (empty payload)
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + HMAC_SIZE;

/// Largest payload the u16 length prefix can describe
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Factory key shipped on devices, hex encoded
pub const DEFAULT_KEY_HEX: &str =
    "0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF0123456789ABCDEF";

/// Shared secret used to authenticate envelopes
#[derive(Clone)]
pub struct HmacKey {
    raw: Bytes,
    mac: HmacSha256,
}

impl HmacKey {
    /// Wrap raw key bytes
    pub fn new(key: impl Into<Bytes>) -> Result<Self, WireError> {
        let raw = key.into();
        if raw.is_empty() {
            return Err(WireError::InvalidKey("empty key".to_string()));
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(&raw)
            .map_err(|e| WireError::InvalidKey(e.to_string()))?;
        Ok(Self { raw, mac })
    }

    /// Parse a hex encoded key
    pub fn from_hex(hex_key: &str) -> Result<Self, WireError> {
        let raw = hex::decode(hex_key.trim()).map_err(|e| WireError::InvalidKey(e.to_string()))?;
        Self::new(raw)
    }

    /// The factory key devices ship with
    pub fn factory() -> Result<Self, WireError> {
        Self::from_hex(DEFAULT_KEY_HEX)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    fn tag(&self, signed: &[u8]) -> [u8; HMAC_SIZE] {
        let mut mac = self.mac.clone();
        mac.update(signed);
        let digest = mac.finalize().into_bytes();

        // Devices keep the trailing bytes of the digest
        let mut tag = [0u8; HMAC_SIZE];
        tag.copy_from_slice(&digest[digest.len() - HMAC_SIZE..]);
        tag
    }
}

impl fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HmacKey({} bytes)", self.raw.len())
    }
}

/// Structurally decoded envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Declared payload length
    pub length: u16,
    /// Sender sequence number
    pub sequence: u32,
    /// Payload bytes
    pub payload: Bytes,
    /// Trailer as received
    pub hmac: [u8; HMAC_SIZE],
    /// Whether the trailer matches the recomputed HMAC
    pub valid: bool,
}

impl Envelope {
    /// Wrap a payload into a signed frame
    pub fn encode(payload: &[u8], sequence: u32, key: &HmacKey) -> Result<Bytes, WireError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }

        let mut buf = BytesMut::with_capacity(MIN_FRAME_SIZE + payload.len());
        buf.put_u16(payload.len() as u16);
        buf.put_u32(sequence);
        buf.put_slice(payload);

        let tag = key.tag(&buf);
        buf.put_slice(&tag);

        Ok(buf.freeze())
    }

    /// Parse a frame and verify its trailer
    ///
    /// A bad trailer yields `valid == false`; only structural problems are errors.
    pub fn decode(frame: &[u8], key: &HmacKey) -> Result<Self, WireError> {
        if frame.len() < MIN_FRAME_SIZE {
            return Err(WireError::FrameTooShort {
                needed: MIN_FRAME_SIZE,
                available: frame.len(),
            });
        }

        let mut cursor = frame;
        let length = cursor.get_u16();
        let sequence = cursor.get_u32();

        let signed_len = HEADER_SIZE + length as usize;
        let expected = signed_len + HMAC_SIZE;
        if frame.len() < expected {
            return Err(WireError::FrameTooShort {
                needed: expected,
                available: frame.len(),
            });
        }
        if frame.len() > expected {
            return Err(WireError::InvalidLength {
                declared: length as usize,
                actual: frame.len(),
            });
        }

        let mut hmac = [0u8; HMAC_SIZE];
        hmac.copy_from_slice(&frame[signed_len..expected]);

        let computed = key.tag(&frame[..signed_len]);
        let valid: bool = computed.ct_eq(&hmac).into();

        Ok(Self {
            length,
            sequence,
            payload: Bytes::copy_from_slice(&frame[HEADER_SIZE..signed_len]),
            hmac,
            valid,
        })
    }

    /// Summary suitable for diagnostics output
    pub fn info(&self) -> EnvelopeInfo {
        EnvelopeInfo {
            wrapped: true,
            valid: self.valid,
            sequence: self.sequence,
            payload_length: self.length,
            hmac: hex::encode(self.hmac),
        }
    }
}

/// Envelope details carried alongside decoded events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeInfo {
    /// Payload arrived HMAC-wrapped
    pub wrapped: bool,
    /// Trailer verified
    pub valid: bool,
    /// Sender sequence number
    pub sequence: u32,
    /// Declared payload length
    pub payload_length: u16,
    /// Received trailer, hex encoded
    pub hmac: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FRAME: &str = "00190000078308eec8c7c50650b2c003620d393839663938312d6469727479a53083f3fc3182e8";

    #[test]
    fn test_known_vector() {
        let key = HmacKey::factory().unwrap();
        let frame = Envelope::encode(b"hello", 42, &key).unwrap();
        assert_eq!(hex::encode(&frame), "00050000002a68656c6c6f35b57c43abf9278e");
    }

    #[test]
    fn test_round_trip_lengths() {
        let key = HmacKey::factory().unwrap();
        for len in [0usize, 1, 13, 255, 4096, MAX_PAYLOAD_SIZE] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let sequence = (len as u32).wrapping_mul(2_654_435_761);
            let frame = Envelope::encode(&payload, sequence, &key).unwrap();
            assert_eq!(frame.len(), MIN_FRAME_SIZE + len);

            let decoded = Envelope::decode(&frame, &key).unwrap();
            assert!(decoded.valid);
            assert_eq!(decoded.sequence, sequence);
            assert_eq!(decoded.length as usize, len);
            assert_eq!(&decoded.payload[..], &payload[..]);
        }
    }

    #[test]
    fn test_boundary_sequences() {
        let key = HmacKey::factory().unwrap();
        for sequence in [0u32, 1, u32::MAX] {
            let frame = Envelope::encode(b"seq", sequence, &key).unwrap();
            let decoded = Envelope::decode(&frame, &key).unwrap();
            assert!(decoded.valid);
            assert_eq!(decoded.sequence, sequence);
        }
    }

    #[test]
    fn test_single_bit_flip_invalidates() {
        let key = HmacKey::factory().unwrap();
        let frame = Envelope::encode(b"alarm payload", 7, &key).unwrap();

        // Every bit of payload and trailer
        for byte in HEADER_SIZE..frame.len() {
            for bit in 0..8 {
                let mut tampered = frame.to_vec();
                tampered[byte] ^= 1 << bit;
                let decoded = Envelope::decode(&tampered, &key).unwrap();
                assert!(!decoded.valid, "flip at byte {} bit {} went unnoticed", byte, bit);
            }
        }
    }

    #[test]
    fn test_wrong_key_is_invalid_not_error() {
        let frame = Envelope::encode(b"hello", 1, &HmacKey::factory().unwrap()).unwrap();
        let other = HmacKey::new(Bytes::from_static(b"another-secret")).unwrap();
        let decoded = Envelope::decode(&frame, &other).unwrap();
        assert!(!decoded.valid);
        assert_eq!(&decoded.payload[..], b"hello");
    }

    #[test]
    fn test_sample_frame_structure() {
        let frame = hex::decode(SAMPLE_FRAME).unwrap();
        assert_eq!(u16::from_be_bytes([frame[0], frame[1]]), 25);

        let decoded = Envelope::decode(&frame, &HmacKey::factory().unwrap()).unwrap();
        assert_eq!(decoded.length, 25);
        assert_eq!(decoded.sequence, 0x0783);
        assert_eq!(decoded.payload.len(), 25);
        assert_eq!(hex::encode(decoded.hmac), "a53083f3fc3182e8");
        // Captured with a provisioned key, so the factory key does not verify it
        assert!(!decoded.valid);
    }

    #[test]
    fn test_too_short() {
        let key = HmacKey::factory().unwrap();
        let err = Envelope::decode(&[0x00, 0x01, 0, 0], &key).unwrap_err();
        assert!(matches!(err, WireError::FrameTooShort { needed: MIN_FRAME_SIZE, available: 4 }));

        let frame = Envelope::encode(b"hello", 3, &key).unwrap();
        let err = Envelope::decode(&frame[..frame.len() - 1], &key).unwrap_err();
        assert!(matches!(err, WireError::FrameTooShort { .. }));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let key = HmacKey::factory().unwrap();
        let mut frame = Envelope::encode(b"hello", 3, &key).unwrap().to_vec();
        frame.push(0);
        let err = Envelope::decode(&frame, &key).unwrap_err();
        assert!(matches!(err, WireError::InvalidLength { declared: 5, .. }));
    }

    #[test]
    fn test_payload_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        let err = Envelope::encode(&payload, 0, &HmacKey::factory().unwrap()).unwrap_err();
        assert_eq!(err, WireError::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1));
    }

    #[test]
    fn test_key_from_hex() {
        assert!(HmacKey::from_hex("zz").is_err());
        assert!(HmacKey::from_hex("").is_err());
        assert_eq!(HmacKey::from_hex(DEFAULT_KEY_HEX).unwrap().as_bytes().len(), 32);
    }
}
