//! Idempotent upsert of named artifacts into an object store.

use serde::Serialize;
use tracing::{info, warn};

use super::store::{ObjectRef, ObjectStore};
use crate::error::{GrantError, PublishError};

/// Where and how an artifact is stored.
#[derive(Debug, Clone)]
pub struct ArtifactTarget {
    pub key: String,
    pub parent: Option<String>,
    pub content_type: String,
    /// Attempt to make the object readable after the write.
    pub grant_read: bool,
}

impl ArtifactTarget {
    pub fn new(key: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            parent: None,
            content_type: content_type.into(),
            grant_read: false,
        }
    }

    pub fn in_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_read_grant(mut self, grant: bool) -> Self {
        self.grant_read = grant;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GrantStatus {
    NotRequested,
    Granted,
    Failed { message: String },
}

/// Outcome of a successful write.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReceipt {
    pub key: String,
    pub action: PublishAction,
    pub reference: ObjectRef,
    pub web_link: Option<String>,
    pub grant: GrantStatus,
}

pub struct Publisher;

impl Publisher {
    /// Create the object if no object with the key exists, otherwise overwrite
    /// the existing one. Running twice never yields two objects for one key.
    ///
    /// A failed access grant does not fail the publish; it is reported on the
    /// receipt and can be retried with [`Publisher::grant`].
    pub async fn publish(
        store: &dyn ObjectStore,
        target: &ArtifactTarget,
        bytes: Vec<u8>,
    ) -> Result<PublishReceipt, PublishError> {
        let parent = target.parent.as_deref();
        let existing = store
            .find(&target.key, parent)
            .await
            .map_err(|source| PublishError::Lookup {
                key: target.key.clone(),
                source,
            })?;

        let size = bytes.len();
        let (stored, action) = match existing {
            Some(object) => {
                let stored = store
                    .update(&object.reference, bytes, &target.content_type)
                    .await
                    .map_err(|source| PublishError::Write {
                        key: target.key.clone(),
                        source,
                    })?;
                (stored, PublishAction::Updated)
            }
            None => {
                let stored = store
                    .create(&target.key, parent, bytes, &target.content_type)
                    .await
                    .map_err(|source| PublishError::Write {
                        key: target.key.clone(),
                        source,
                    })?;
                (stored, PublishAction::Created)
            }
        };

        info!(
            "{:?} '{}' in {} ({} bytes)",
            action,
            target.key,
            store.name(),
            size
        );

        let grant = if target.grant_read {
            match Self::grant(store, &stored.reference).await {
                Ok(()) => GrantStatus::Granted,
                Err(e) => {
                    warn!("{}", e);
                    GrantStatus::Failed {
                        message: e.source.to_string(),
                    }
                }
            }
        } else {
            GrantStatus::NotRequested
        };

        Ok(PublishReceipt {
            key: target.key.clone(),
            action,
            web_link: store.web_link(&stored.reference),
            reference: stored.reference,
            grant,
        })
    }

    /// Grant read access to an already-published object.
    pub async fn grant(store: &dyn ObjectStore, reference: &ObjectRef) -> Result<(), GrantError> {
        store
            .grant_read_access(reference)
            .await
            .map_err(|source| GrantError {
                reference: reference.0.clone(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::MemoryStore;

    fn kml_target() -> ArtifactTarget {
        ArtifactTarget::new("zones.kml", "application/vnd.google-earth.kml+xml")
            .in_parent(Some("folder".to_string()))
            .with_read_grant(true)
    }

    #[tokio::test]
    async fn test_create_then_update_single_object() {
        let store = MemoryStore::new();
        let target = kml_target();

        let first = Publisher::publish(&store, &target, b"v1".to_vec()).await.unwrap();
        assert_eq!(first.action, PublishAction::Created);

        let second = Publisher::publish(&store, &target, b"v2".to_vec()).await.unwrap();
        assert_eq!(second.action, PublishAction::Updated);
        assert_eq!(first.reference, second.reference);

        assert_eq!(store.count_named("zones.kml", Some("folder")), 1);
        assert_eq!(store.read("zones.kml", Some("folder")).unwrap(), b"v2");
        assert_eq!(store.write_counts(), (1, 1));
        assert_eq!(
            store.content_type(&second.reference).as_deref(),
            Some("application/vnd.google-earth.kml+xml")
        );
    }

    #[tokio::test]
    async fn test_parent_scopes_are_distinct() {
        let store = MemoryStore::new();
        let a = ArtifactTarget::new("same.txt", "text/plain");
        let b = ArtifactTarget::new("same.txt", "text/plain").in_parent(Some("other".to_string()));

        Publisher::publish(&store, &a, b"a".to_vec()).await.unwrap();
        Publisher::publish(&store, &b, b"b".to_vec()).await.unwrap();
        assert_eq!(store.count_named("same.txt", None), 1);
        assert_eq!(store.count_named("same.txt", Some("other")), 1);
    }

    #[tokio::test]
    async fn test_grant_failure_is_not_fatal() {
        let store = MemoryStore::new();
        store.set_fail_grants(true);

        let receipt = Publisher::publish(&store, &kml_target(), b"v1".to_vec())
            .await
            .unwrap();
        assert!(matches!(receipt.grant, GrantStatus::Failed { .. }));
        assert!(!store.is_granted(&receipt.reference));
        assert!(receipt.web_link.is_some());

        store.set_fail_grants(false);
        Publisher::grant(&store, &receipt.reference).await.unwrap();
        assert!(store.is_granted(&receipt.reference));
    }

    #[tokio::test]
    async fn test_write_failure_propagates() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = Publisher::publish(&store, &kml_target(), b"v1".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Write { .. }));
        assert_eq!(store.count_named("zones.kml", Some("folder")), 0);
    }

    #[tokio::test]
    async fn test_no_grant_requested() {
        let store = MemoryStore::new();
        let target = ArtifactTarget::new("hash.txt", "text/plain");
        let receipt = Publisher::publish(&store, &target, b"x".to_vec()).await.unwrap();
        assert_eq!(receipt.grant, GrantStatus::NotRequested);
    }
}
