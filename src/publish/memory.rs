//! In-process object store with failure injection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use uuid::Uuid;

use super::store::{ObjectRef, ObjectStore, StoredObject};
use crate::error::StoreError;

struct MemoryObject {
    key: String,
    parent: Option<String>,
    bytes: Vec<u8>,
    content_type: String,
}

#[derive(Default)]
struct MemoryInner {
    objects: HashMap<String, MemoryObject>,
    granted: HashSet<String>,
    creates: usize,
    updates: usize,
}

/// Object store held in memory; object ids are random UUIDs.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_writes: AtomicBool,
    fail_grants: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every create/update fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every access grant fail until reset.
    pub fn set_fail_grants(&self, fail: bool) {
        self.fail_grants.store(fail, Ordering::SeqCst);
    }

    /// Store an object directly, bypassing failure injection.
    pub fn insert(&self, key: &str, parent: Option<&str>, bytes: Vec<u8>) -> ObjectRef {
        let id = Uuid::new_v4().to_string();
        self.lock().objects.insert(
            id.clone(),
            MemoryObject {
                key: key.to_string(),
                parent: parent.map(str::to_string),
                bytes,
                content_type: "application/octet-stream".to_string(),
            },
        );
        ObjectRef(id)
    }

    /// Number of objects sharing this logical key.
    pub fn count_named(&self, key: &str, parent: Option<&str>) -> usize {
        self.lock()
            .objects
            .values()
            .filter(|o| o.key == key && o.parent.as_deref() == parent)
            .count()
    }

    /// Content of the first object with this logical key.
    pub fn read(&self, key: &str, parent: Option<&str>) -> Option<Vec<u8>> {
        self.lock()
            .objects
            .values()
            .find(|o| o.key == key && o.parent.as_deref() == parent)
            .map(|o| o.bytes.clone())
    }

    pub fn content_type(&self, reference: &ObjectRef) -> Option<String> {
        self.lock()
            .objects
            .get(&reference.0)
            .map(|o| o.content_type.clone())
    }

    pub fn is_granted(&self, reference: &ObjectRef) -> bool {
        self.lock().granted.contains(&reference.0)
    }

    /// (creates, updates) performed through the trait.
    pub fn write_counts(&self) -> (usize, usize) {
        let inner = self.lock();
        (inner.creates, inner.updates)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("write disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn find(
        &self,
        key: &str,
        parent: Option<&str>,
    ) -> Result<Option<StoredObject>, StoreError> {
        let inner = self.lock();
        // Deterministic pick if duplicates were seeded.
        let mut matches: Vec<(&String, &MemoryObject)> = inner
            .objects
            .iter()
            .filter(|(_, o)| o.key == key && o.parent.as_deref() == parent)
            .collect();
        matches.sort_by(|a, b| a.0.cmp(b.0));

        Ok(matches.first().map(|(id, o)| StoredObject {
            reference: ObjectRef((*id).clone()),
            key: o.key.clone(),
            parent: o.parent.clone(),
        }))
    }

    async fn get(&self, reference: &ObjectRef) -> Result<Vec<u8>, StoreError> {
        self.lock()
            .objects
            .get(&reference.0)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(reference.0.clone()))
    }

    async fn create(
        &self,
        key: &str,
        parent: Option<&str>,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StoreError> {
        self.check_writable()?;
        let id = Uuid::new_v4().to_string();
        let mut inner = self.lock();
        inner.objects.insert(
            id.clone(),
            MemoryObject {
                key: key.to_string(),
                parent: parent.map(str::to_string),
                bytes,
                content_type: content_type.to_string(),
            },
        );
        inner.creates += 1;

        Ok(StoredObject {
            reference: ObjectRef(id),
            key: key.to_string(),
            parent: parent.map(str::to_string),
        })
    }

    async fn update(
        &self,
        reference: &ObjectRef,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StoreError> {
        self.check_writable()?;
        let mut inner = self.lock();
        let object = inner
            .objects
            .get_mut(&reference.0)
            .ok_or_else(|| StoreError::NotFound(reference.0.clone()))?;
        object.bytes = bytes;
        object.content_type = content_type.to_string();
        let stored = StoredObject {
            reference: reference.clone(),
            key: object.key.clone(),
            parent: object.parent.clone(),
        };
        inner.updates += 1;
        Ok(stored)
    }

    async fn grant_read_access(&self, reference: &ObjectRef) -> Result<(), StoreError> {
        if self.fail_grants.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected("permission service unavailable".to_string()));
        }
        self.lock().granted.insert(reference.0.clone());
        Ok(())
    }

    fn web_link(&self, reference: &ObjectRef) -> Option<String> {
        Some(format!("memory://{}", reference.0))
    }
}
