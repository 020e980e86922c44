//! Directory-backed object store. Parent scope maps to a subdirectory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::store::{ObjectRef, ObjectStore, StoredObject};
use crate::error::StoreError;

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative reference for a key, rejecting paths that escape the root.
    fn reference_for(&self, key: &str, parent: Option<&str>) -> Result<ObjectRef, StoreError> {
        let relative = match parent {
            Some(p) => format!("{}/{}", p.trim_end_matches('/'), key),
            None => key.to_string(),
        };

        let escapes = Path::new(&relative)
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if relative.is_empty() || escapes {
            return Err(StoreError::Rejected(format!("invalid object key '{}'", relative)));
        }

        Ok(ObjectRef(relative))
    }

    fn path_of(&self, reference: &ObjectRef) -> PathBuf {
        self.root.join(&reference.0)
    }

    async fn write(&self, reference: &ObjectRef, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_of(reference);
        let io_err = |source| StoreError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
        }

        // Write-then-rename so readers never see a partial artifact.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)?;
        Ok(())
    }

    fn split(reference: &ObjectRef) -> (String, Option<String>) {
        match reference.0.rsplit_once('/') {
            Some((parent, key)) => (key.to_string(), Some(parent.to_string())),
            None => (reference.0.clone(), None),
        }
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn find(
        &self,
        key: &str,
        parent: Option<&str>,
    ) -> Result<Option<StoredObject>, StoreError> {
        let reference = self.reference_for(key, parent)?;
        let path = self.path_of(&reference);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })?;

        Ok(exists.then(|| StoredObject {
            reference,
            key: key.to_string(),
            parent: parent.map(str::to_string),
        }))
    }

    async fn get(&self, reference: &ObjectRef) -> Result<Vec<u8>, StoreError> {
        let path = self.path_of(reference);
        tokio::fs::read(&path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound(reference.0.clone())
            } else {
                StoreError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })
    }

    async fn create(
        &self,
        key: &str,
        parent: Option<&str>,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StoreError> {
        let reference = self.reference_for(key, parent)?;
        debug!("Creating {} ({}, {} bytes)", reference, content_type, bytes.len());
        self.write(&reference, &bytes).await?;

        Ok(StoredObject {
            reference,
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
        let path = self.path_of(reference);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(reference.0.clone()));
        }
        debug!("Updating {} ({}, {} bytes)", reference, content_type, bytes.len());
        self.write(reference, &bytes).await?;

        let (key, parent) = Self::split(reference);
        Ok(StoredObject {
            reference: reference.clone(),
            key,
            parent,
        })
    }

    #[cfg(unix)]
    async fn grant_read_access(&self, reference: &ObjectRef) -> Result<(), StoreError> {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path_of(reference);
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644))
            .await
            .map_err(|source| StoreError::Io {
                path: path.display().to_string(),
                source,
            })
    }

    fn web_link(&self, reference: &ObjectRef) -> Option<String> {
        Some(format!("file://{}", self.path_of(reference).display()))
    }
}
