//! Object store abstraction over blob and document backends.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;

/// Backend-assigned identifier of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectRef(pub String);

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An object located by logical key within an optional parent scope.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub reference: ObjectRef,
    pub key: String,
    pub parent: Option<String>,
}

/// Key/value object store with list/get/put/update semantics.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Find the object with this logical key, if any.
    async fn find(&self, key: &str, parent: Option<&str>)
        -> Result<Option<StoredObject>, StoreError>;

    async fn get(&self, reference: &ObjectRef) -> Result<Vec<u8>, StoreError>;

    /// Create a new object at `key`.
    async fn create(
        &self,
        key: &str,
        parent: Option<&str>,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StoreError>;

    /// Overwrite an existing object's content in place.
    async fn update(
        &self,
        reference: &ObjectRef,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StoreError>;

    /// Make the object readable by its consumers. No-op unless the backend needs it.
    async fn grant_read_access(&self, _reference: &ObjectRef) -> Result<(), StoreError> {
        Ok(())
    }

    /// Consumer-facing link to the object, where the backend has one.
    fn web_link(&self, _reference: &ObjectRef) -> Option<String> {
        None
    }
}

/// Read an object by logical key. `Ok(None)` when it does not exist.
pub async fn read_object(
    store: &dyn ObjectStore,
    key: &str,
    parent: Option<&str>,
) -> Result<Option<Vec<u8>>, StoreError> {
    match store.find(key, parent).await? {
        Some(object) => store.get(&object.reference).await.map(Some),
        None => Ok(None),
    }
}
