use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::QueueError;

/// An injection `(typed value) ↔ (byte sequence)` the queue uses to turn
/// elements into the opaque payload bytes it persists.
///
/// The queue never interprets payload bytes itself; a `Codec`
/// implementation must carry enough type tagging that `decode`, given the
/// expected `T`, fails fast on bytes that don't correspond to a `T` value.
pub trait Codec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, QueueError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, QueueError>;
}

/// Default codec: a `serde` + `bincode` body, prefixed with a type tag and
/// a `crc32fast` checksum.
///
/// Layout of the opaque payload this codec produces (not to be confused
/// with the record framing of the on-disk ring, which wraps this whole
/// blob in its own 4-byte length prefix):
///
/// ```text
/// +----------------+----------------+------------------+
/// | type_tag (u64) | checksum (u32) | bincode body (N)  |
/// +----------------+----------------+------------------+
/// ```
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Codec<T> for BincodeCodec<T> {
    fn encode(&self, value: &T) -> Result<Vec<u8>, QueueError> {
        let body = bincode::serialize(value)
            .map_err(|e| QueueError::IllegalState(format!("payload encode failed: {e}")))?;
        let checksum = crc32fast::hash(&body);
        let tag = type_tag::<T>();

        let mut out = Vec::with_capacity(12 + body.len());
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&checksum.to_be_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, QueueError> {
        if bytes.len() < 12 {
            return Err(QueueError::IllegalState(
                "payload shorter than codec envelope".to_string(),
            ));
        }
        let tag = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let checksum = u32::from_be_bytes(bytes[8..12].try_into().unwrap());
        let body = &bytes[12..];

        let expected_tag = type_tag::<T>();
        if tag != expected_tag {
            return Err(QueueError::IllegalState(format!(
                "type tag mismatch: expected {expected_tag}, got {tag} (wrong element type, or corrupt record)"
            )));
        }
        if crc32fast::hash(body) != checksum {
            return Err(QueueError::IllegalState(
                "payload checksum mismatch (corrupt record)".to_string(),
            ));
        }
        bincode::deserialize(body)
            .map_err(|e| QueueError::IllegalState(format!("payload decode failed: {e}")))
    }
}

/// A deterministic (not process-randomized) hash of `T`'s type name, used
/// to fail fast on payloads written for a different element type. Must be
/// stable across process restarts, since a record written before a
/// restart is decoded after one; `DefaultHasher` uses fixed keys, so this
/// holds.
fn type_tag<T>() -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    std::any::type_name::<T>().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn round_trips_a_value() {
        let codec = BincodeCodec::<Point>::new();
        let p = Point { x: 3, y: -4 };
        let bytes = codec.encode(&p).unwrap();
        let back = codec.decode(&bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn rejects_wrong_type_tag() {
        let string_codec = BincodeCodec::<String>::new();
        let bytes = string_codec.encode(&"hello".to_string()).unwrap();
        let int_codec = BincodeCodec::<i64>::new();
        assert!(int_codec.decode(&bytes).is_err());
    }

    #[test]
    fn rejects_corrupted_body() {
        let codec = BincodeCodec::<Point>::new();
        let mut bytes = codec.encode(&Point { x: 1, y: 2 }).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(codec.decode(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_envelope() {
        let codec = BincodeCodec::<Point>::new();
        assert!(codec.decode(&[0u8; 4]).is_err());
    }

    #[test]
    fn type_tag_is_stable_across_instances() {
        assert_eq!(type_tag::<String>(), type_tag::<String>());
        assert_ne!(type_tag::<String>(), type_tag::<i64>());
    }
}
