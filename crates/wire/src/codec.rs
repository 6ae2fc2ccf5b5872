//! Envelope codec.
//!
//! An envelope is a CBOR map carrying the schema version, the payload kind,
//! the sha256 of the body and the body itself. The body is the payload
//! encoded as CBOR and then zstd-compressed.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Current envelope schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    Object,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: u32,
    pub kind: PayloadKind,
    pub sha256: String,
    pub body: Vec<u8>,
}

/// Errors from encoding or decoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
    #[error("CBOR deserialization error: {0}")]
    CborDecode(String),
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
    #[error("schema version mismatch: payload has v{found}, expected v{expected}")]
    SchemaMismatch { found: u32, expected: u32 },
    #[error("payload kind mismatch: expected {expected:?}, got {found:?}")]
    KindMismatch {
        expected: PayloadKind,
        found: PayloadKind,
    },
}

pub fn encode<T: Serialize + ?Sized>(kind: PayloadKind, value: &T) -> Result<Vec<u8>, WireError> {
    let body = zstd_compress(&cbor_serialize(value)?)?;
    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        kind,
        sha256: sha256_hex(&body),
        body,
    };
    let bytes = cbor_serialize(&envelope)?;
    tracing::trace!(?kind, len = bytes.len(), "encoded envelope");
    Ok(bytes)
}

pub fn decode<T: for<'de> Deserialize<'de>>(kind: PayloadKind, bytes: &[u8]) -> Result<T, WireError> {
    let envelope: Envelope = cbor_deserialize(bytes)?;
    if envelope.schema_version != SCHEMA_VERSION {
        return Err(WireError::SchemaMismatch {
            found: envelope.schema_version,
            expected: SCHEMA_VERSION,
        });
    }
    if envelope.kind != kind {
        return Err(WireError::KindMismatch {
            expected: kind,
            found: envelope.kind,
        });
    }
    let actual = sha256_hex(&envelope.body);
    if actual != envelope.sha256 {
        return Err(WireError::IntegrityMismatch {
            expected: envelope.sha256,
            actual,
        });
    }
    cbor_deserialize(&zstd_decompress(&envelope.body)?)
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| WireError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(data).map_err(|e| WireError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, WireError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        values: Vec<u32>,
    }

    fn sample() -> Sample {
        Sample {
            name: "sample".into(),
            values: (0..64).collect(),
        }
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let bytes = encode(PayloadKind::Object, &sample()).unwrap();
        let err = decode::<Sample>(PayloadKind::Agent, &bytes).unwrap_err();
        assert!(matches!(
            err,
            WireError::KindMismatch {
                expected: PayloadKind::Agent,
                found: PayloadKind::Object
            }
        ));
        assert_eq!(decode::<Sample>(PayloadKind::Object, &bytes).unwrap(), sample());
    }

    #[test]
    fn tampered_body_fails_integrity() {
        let bytes = encode(PayloadKind::Object, &sample()).unwrap();
        let mut envelope: Envelope = cbor_deserialize(&bytes).unwrap();
        let last = envelope.body.len() - 1;
        envelope.body[last] ^= 0xff;
        let tampered = cbor_serialize(&envelope).unwrap();
        assert!(matches!(
            decode::<Sample>(PayloadKind::Object, &tampered),
            Err(WireError::IntegrityMismatch { .. })
        ));
    }

    #[test]
    fn future_schema_is_rejected() {
        let bytes = encode(PayloadKind::Agent, &sample()).unwrap();
        let mut envelope: Envelope = cbor_deserialize(&bytes).unwrap();
        envelope.schema_version = SCHEMA_VERSION + 1;
        let bumped = cbor_serialize(&envelope).unwrap();
        assert!(matches!(
            decode::<Sample>(PayloadKind::Agent, &bumped),
            Err(WireError::SchemaMismatch { found: 2, expected: 1 })
        ));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            decode::<Sample>(PayloadKind::Agent, &[0xff, 0x00, 0x13]),
            Err(WireError::CborDecode(_))
        ));
    }
}
