//! # Outbox Codec
//!
//! Entity payloads and their CBOR encoding.
//!
//! Payloads are [`Document`]s: string-keyed maps of dynamic [`Value`]s. The
//! map is a `BTreeMap`, so field order is fixed and the CBOR produced for a
//! document is deterministic. That lets [`content_hash`] compare a locally
//! queued create against a row the server already holds.
//!
//! ## Usage
//!
//! ```
//! use outbox_codec::{content_hash, document, from_cbor, to_cbor, Document, Value};
//!
//! let doc = document([("title", Value::from("Fix roof")), ("priority", Value::from(2))]);
//! let bytes = to_cbor(&doc).unwrap();
//! let decoded: Document = from_cbor(&bytes).unwrap();
//! assert_eq!(doc, decoded);
//! assert_eq!(content_hash(&doc), content_hash(&decoded));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod value;

pub use error::{CodecError, CodecResult};
pub use value::{document, Document, Value};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Encodes any serializable value to CBOR bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR for `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

/// SHA-256 over the deterministic CBOR encoding of a document.
///
/// Two documents hash equal exactly when they hold the same fields with
/// the same values.
pub fn content_hash(doc: &Document) -> [u8; 32] {
    let mut hasher = Sha256::new();
    // Encoding a Document into a Vec cannot fail: every Value maps to CBOR.
    if let Ok(bytes) = to_cbor(doc) {
        hasher.update(&bytes);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_ignores_insertion_order() {
        let a = document([("a", Value::from(1)), ("b", Value::from("x"))]);
        let b = document([("b", Value::from("x")), ("a", Value::from(1))]);
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_sees_value_changes() {
        let a = document([("done", Value::from(false))]);
        let b = document([("done", Value::from(true))]);
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn nested_document_roundtrip() {
        let doc = document([
            ("name", Value::from("pump station")),
            ("tags", Value::Array(vec![Value::from("north"), Value::Null])),
            (
                "geo",
                Value::Map(document([("lat", Value::Float(-1.29)), ("lng", Value::Float(36.8))])),
            ),
            ("photo", Value::Bytes(vec![0xFF, 0xD8, 0xFF])),
        ]);
        let decoded: Document = from_cbor(&to_cbor(&doc).unwrap()).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let result: CodecResult<Document> = from_cbor(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn json_view_of_document() {
        let doc = document([("count", Value::from(3)), ("label", Value::from("a"))]);
        let json = serde_json::to_string(&doc).unwrap();
        assert_eq!(json, r#"{"count":3,"label":"a"}"#);
    }
}
