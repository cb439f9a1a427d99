//! Integrity envelope for persisted state documents.
//!
//! Every document the engine writes is wrapped as
//! `{"format": 1, "digest": "<sha256 hex>", "body": {...}}`, where the digest
//! covers the serialized body. A document that fails to parse, carries an
//! unknown format or whose digest does not match is reported as
//! [`SyncError::CheckpointCorruption`] and never silently replaced.

use crate::error::{SyncError, SyncResult};
use feedsync_storage::StateBackend;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: u16,
    digest: String,
    body: serde_json::Value,
}

fn digest(body: &serde_json::Value) -> SyncResult<String> {
    let bytes = serde_json::to_vec(body)
        .map_err(|e| SyncError::collaborator(format!("cannot serialize document: {e}")))?;
    Ok(Sha256::digest(&bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Serializes `value` into an enveloped document.
pub(crate) fn encode<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    let body = serde_json::to_value(value)
        .map_err(|e| SyncError::collaborator(format!("cannot serialize document: {e}")))?;
    let envelope = Envelope {
        format: FORMAT_VERSION,
        digest: digest(&body)?,
        body,
    };
    serde_json::to_vec_pretty(&envelope)
        .map_err(|e| SyncError::collaborator(format!("cannot serialize document: {e}")))
}

/// Parses and verifies an enveloped document stored under `key`.
pub(crate) fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> SyncResult<T> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| SyncError::corruption(key, e))?;
    if envelope.format != FORMAT_VERSION {
        return Err(SyncError::corruption(
            key,
            format!("unsupported format version {}", envelope.format),
        ));
    }
    if digest(&envelope.body)? != envelope.digest {
        return Err(SyncError::corruption(key, "digest mismatch"));
    }
    serde_json::from_value(envelope.body).map_err(|e| SyncError::corruption(key, e))
}

/// Reads and verifies a document, `None` when absent.
pub(crate) fn load<T, B>(backend: &B, key: &str) -> SyncResult<Option<T>>
where
    T: DeserializeOwned,
    B: StateBackend + ?Sized,
{
    match backend.read(key)? {
        Some(bytes) => decode(key, &bytes).map(Some),
        None => Ok(None),
    }
}

/// Writes a document atomically.
pub(crate) fn store<T, B>(backend: &B, key: &str, value: &T) -> SyncResult<()>
where
    T: Serialize,
    B: StateBackend + ?Sized,
{
    backend.write(key, &encode(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_storage::InMemoryBackend;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        counts: BTreeMap<String, u64>,
        ratio: f64,
    }

    fn sample() -> Doc {
        Doc {
            name: "feeds".into(),
            counts: [("US".to_string(), 3), ("CA".to_string(), 1)].into(),
            ratio: 0.1 + 0.2,
        }
    }

    #[test]
    fn store_then_load() {
        let backend = InMemoryBackend::new();
        store(&backend, "doc.json", &sample()).unwrap();
        let loaded: Option<Doc> = load(&backend, "doc.json").unwrap();
        assert_eq!(loaded, Some(sample()));
    }

    #[test]
    fn missing_document_is_none() {
        let backend = InMemoryBackend::new();
        let loaded: Option<Doc> = load(&backend, "doc.json").unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn tampered_body_is_corruption() {
        let bytes = encode(&sample()).unwrap();
        let tampered = String::from_utf8(bytes).unwrap().replace("feeds", "feedz");

        let err = decode::<Doc>("doc.json", tampered.as_bytes()).unwrap_err();
        match err {
            SyncError::CheckpointCorruption { key, message } => {
                assert_eq!(key, "doc.json");
                assert!(message.contains("digest"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn garbage_is_corruption() {
        let err = decode::<Doc>("doc.json", b"{\"format\":1,").unwrap_err();
        assert!(matches!(err, SyncError::CheckpointCorruption { .. }));
    }

    #[test]
    fn unknown_format_is_corruption() {
        let text = String::from_utf8(encode(&sample()).unwrap())
            .unwrap()
            .replace("\"format\": 1", "\"format\": 9");
        let err = decode::<Doc>("doc.json", text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("format version 9"));
    }

    #[test]
    fn wrong_shape_is_corruption() {
        let bytes = encode(&vec![1, 2, 3]).unwrap();
        let err = decode::<Doc>("doc.json", &bytes).unwrap_err();
        assert!(matches!(err, SyncError::CheckpointCorruption { .. }));
    }
}
