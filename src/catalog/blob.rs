//! Directory-backed PDF storage.
//!
//! Blobs are stored under `<root>/<user_id>/<uuid>.pdf`; the key is the path
//! relative to the root.

use crate::error::Book2CourseError;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Create the store, creating `root` if it does not exist.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, Book2CourseError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| Book2CourseError::Storage {
                path: root.clone(),
                source,
            })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh key for a user's upload.
    pub fn new_key(user_id: &str) -> Result<String, Book2CourseError> {
        check_user_id(user_id)?;
        Ok(format!("{}/{}.pdf", user_id, Uuid::new_v4()))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, Book2CourseError> {
        let valid = key
            .split_once('/')
            .map(|(user, file)| check_user_id(user).is_ok() && is_blob_file(file))
            .unwrap_or(false);
        if !valid {
            return Err(Book2CourseError::InvalidInput {
                input: key.to_string(),
                reason: "not a blob key".to_string(),
            });
        }
        Ok(self.root.join(key))
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), Book2CourseError> {
        let path = self.path_for(key)?;
        let storage_err = |source: std::io::Error| Book2CourseError::Storage {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        tokio::fs::write(&path, bytes).await.map_err(storage_err)?;
        debug!("Stored {} ({} bytes)", key, bytes.len());
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, Book2CourseError> {
        let path = self.path_for(key)?;
        tokio::fs::read(&path)
            .await
            .map_err(|source| Book2CourseError::Storage { path, source })
    }

    /// Remove a blob. Missing blobs are not an error.
    pub async fn delete(&self, key: &str) -> Result<(), Book2CourseError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Book2CourseError::Storage { path, source }),
        }
    }
}

/// User ids become directory names, so only a conservative alphabet is allowed.
fn check_user_id(user_id: &str) -> Result<(), Book2CourseError> {
    let ok = !user_id.is_empty()
        && user_id.len() <= 128
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Book2CourseError::InvalidInput {
            input: user_id.to_string(),
            reason: "user id may only contain letters, digits, '-' and '_'".to_string(),
        })
    }
}

fn is_blob_file(name: &str) -> bool {
    name.strip_suffix(".pdf")
        .map(|stem| Uuid::parse_str(stem).is_ok())
        .unwrap_or(false)
}
