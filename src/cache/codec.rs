//! Payload encoding for stored entries.
//!
//! Values are JSON text. Large payloads may additionally be wrapped in a
//! marked, byte-safe transform; entries below the threshold are stored as-is
//! so that readers must check the marker rather than assume the transform.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Marks payloads that went through [`compress`].
pub const COMPRESSED_MARKER: &str = "b64:";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode cache value: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode cache value: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("compressed payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("compressed payload is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(CodecError::Encode)
}

pub fn decode_json<T: DeserializeOwned>(payload: &str) -> Result<T, CodecError> {
    serde_json::from_str(payload).map_err(CodecError::Decode)
}

/// Wrap `payload` when it is longer than `threshold` characters.
pub fn compress(payload: String, threshold: usize) -> String {
    if payload.chars().count() <= threshold {
        return payload;
    }
    let mut wrapped = String::with_capacity(COMPRESSED_MARKER.len() + payload.len() * 4 / 3 + 4);
    wrapped.push_str(COMPRESSED_MARKER);
    wrapped.push_str(&STANDARD.encode(payload.as_bytes()));
    wrapped
}

/// Undo [`compress`]; unmarked payloads pass through unchanged.
pub fn decompress(stored: String) -> Result<String, CodecError> {
    match stored.strip_prefix(COMPRESSED_MARKER) {
        Some(encoded) => {
            let bytes = STANDARD.decode(encoded)?;
            Ok(String::from_utf8(bytes)?)
        }
        None => Ok(stored),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Product {
        name: String,
        price_cents: u32,
    }

    #[test]
    fn small_payloads_stay_plain() {
        let payload = encode_json(&Product {
            name: "Robe".into(),
            price_cents: 4900,
        })
        .expect("encodes");
        assert_eq!(compress(payload.clone(), 1000), payload);
    }

    #[test]
    fn large_payloads_are_marked_and_reversible() {
        let description = "silk ".repeat(400);
        let payload = encode_json(&description).expect("encodes");
        let stored = compress(payload.clone(), 1000);

        assert!(stored.starts_with(COMPRESSED_MARKER));
        assert_eq!(decompress(stored).expect("decodes"), payload);
    }

    #[test]
    fn corrupt_compressed_payload_is_an_error() {
        let err = decompress(format!("{COMPRESSED_MARKER}@@not-base64@@")).unwrap_err();
        assert!(matches!(err, CodecError::Base64(_)));
    }

    #[test]
    fn decode_reports_shape_mismatch() {
        let err = decode_json::<Product>("{\"name\":1}").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
