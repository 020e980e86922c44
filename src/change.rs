//! Content-hash change detection over fetched facility data.

use sha2::{Digest, Sha256};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PublishError;
use crate::publish::{ArtifactTarget, ObjectStore, PublishReceipt, Publisher};

/// Deterministic JSON text: object keys sorted, no insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hex-encoded SHA-256 of the bytes.
pub fn digest_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Digest of a fetched payload, independent of source key ordering.
pub fn digest_payload(payload: &Value) -> String {
    digest_bytes(canonical_json(payload).as_bytes())
}

/// True on first run (no stored digest) or when the content changed.
pub fn should_recompute(current: &str, stored: Option<&str>) -> bool {
    match stored {
        Some(previous) => previous.trim() != current,
        None => true,
    }
}

/// Owns the change record: a single text object holding the last digest.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    target: ArtifactTarget,
}

impl ChangeDetector {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            target: ArtifactTarget::new(key, "text/plain"),
        }
    }

    pub fn key(&self) -> &str {
        &self.target.key
    }

    /// Last committed digest. Read failures count as absent (full recompute).
    pub async fn stored_digest(&self, store: &dyn ObjectStore) -> Option<String> {
        let object = match store.find(&self.target.key, None).await {
            Ok(Some(object)) => object,
            Ok(None) => {
                debug!("No change record at '{}'", self.target.key);
                return None;
            }
            Err(e) => {
                warn!("Failed to look up change record: {}. Recomputing.", e);
                return None;
            }
        };

        match store.get(&object.reference).await {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).trim().to_string();
                if text.is_empty() {
                    None
                } else {
                    Some(text)
                }
            }
            Err(e) => {
                warn!("Failed to read change record: {}. Recomputing.", e);
                None
            }
        }
    }

    /// Overwrite the change record. Call only after the zones are published.
    pub async fn commit(
        &self,
        store: &dyn ObjectStore,
        digest: &str,
    ) -> Result<PublishReceipt, PublishError> {
        Publisher::publish(store, &self.target, digest.as_bytes().to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_canonical_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": "s"}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": "s", "y": [1, 2]}, "b": 1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":"s","y":[1,2]},"b":1}"#);
        assert_eq!(digest_payload(&a), digest_payload(&b));
    }

    #[test]
    fn test_array_order_matters() {
        let a = json!([1, 2]);
        let b = json!([2, 1]);
        assert_ne!(digest_payload(&a), digest_payload(&b));
    }

    #[test]
    fn test_digest_is_hex_sha256() {
        assert_eq!(
            digest_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_should_recompute() {
        assert!(should_recompute("abc", None));
        assert!(should_recompute("abc", Some("def")));
        assert!(!should_recompute("abc", Some("abc")));
        assert!(!should_recompute("abc", Some("abc\n")));
    }

    #[tokio::test]
    async fn test_commit_then_read_back() {
        let store = MemoryStore::new();
        let detector = ChangeDetector::new("hash.txt");
        assert_eq!(detector.stored_digest(&store).await, None);

        detector.commit(&store, "d1").await.unwrap();
        assert_eq!(detector.stored_digest(&store).await.as_deref(), Some("d1"));

        detector.commit(&store, "d2").await.unwrap();
        assert_eq!(detector.stored_digest(&store).await.as_deref(), Some("d2"));
        assert_eq!(store.count_named("hash.txt", None), 1);
    }
}
