//! FileStore trait for the node's managed file directory.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `NativeStore` (in ring-daemon) - A directory on disk, via tokio::fs
//!
//! Files in the store are addressed by their catalog name. `import` and
//! `export` move whole files between the store and paths outside it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Reject names that could escape the store directory.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// The node's managed file directory.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Copy the file at `source` (outside the store) into the store as `name`.
    async fn import(&self, source: &str, name: &str) -> Result<()>;

    /// Copy stored file `name` to `dest` (outside the store).
    async fn export(&self, name: &str, dest: &str) -> Result<()>;

    /// Delete stored file `name`. Returns false if it was not there.
    async fn remove(&self, name: &str) -> Result<bool>;

    /// Check if `name` is in the store.
    async fn contains(&self, name: &str) -> Result<bool>;

    /// Names of all stored files.
    async fn list(&self) -> Result<Vec<String>>;

    /// Location of stored file `name`, as a file transport addresses it.
    fn path_of(&self, name: &str) -> String;
}

#[async_trait]
impl<T: FileStore + ?Sized> FileStore for Arc<T> {
    async fn import(&self, source: &str, name: &str) -> Result<()> {
        (**self).import(source, name).await
    }

    async fn export(&self, name: &str, dest: &str) -> Result<()> {
        (**self).export(name, dest).await
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        (**self).remove(name).await
    }

    async fn contains(&self, name: &str) -> Result<bool> {
        (**self).contains(name).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        (**self).list().await
    }

    fn path_of(&self, name: &str) -> String {
        (**self).path_of(name)
    }
}

/// Path prefix that addresses a stored file of an [`InMemoryStore`].
const STORE_PREFIX: &str = "store:";

/// In-memory store for testing.
///
/// Paths outside the store live in a separate "outside" map so tests can
/// stage source files and inspect exported ones. Paths returned by
/// `path_of` address the stored files themselves.
#[derive(Default)]
pub struct InMemoryStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
    outside: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file at an outside path, ready for `import`.
    pub fn stage(&self, path: &str, content: &[u8]) {
        if let Some(name) = path.strip_prefix(STORE_PREFIX) {
            self.write(name, content);
            return;
        }
        self.outside
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), content.to_vec());
    }

    /// Read a file at an outside path (e.g. after `export`).
    pub fn outside(&self, path: &str) -> Option<Vec<u8>> {
        if let Some(name) = path.strip_prefix(STORE_PREFIX) {
            return self.read(name);
        }
        self.outside
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    /// Read a stored file.
    pub fn read(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Write a stored file directly (what a remote copy does).
    pub fn write(&self, name: &str, content: &[u8]) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), content.to_vec());
    }
}

#[async_trait]
impl FileStore for InMemoryStore {
    async fn import(&self, source: &str, name: &str) -> Result<()> {
        validate_name(name)?;
        let content = self
            .outside(source)
            .ok_or_else(|| StoreError::NotFound(source.to_string()))?;
        self.write(name, &content);
        Ok(())
    }

    async fn export(&self, name: &str, dest: &str) -> Result<()> {
        let content = self
            .read(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        self.stage(dest, &content);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        Ok(files.remove(name).is_some())
    }

    async fn contains(&self, name: &str) -> Result<bool> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        Ok(files.contains_key(name))
    }

    async fn list(&self) -> Result<Vec<String>> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = files.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn path_of(&self, name: &str) -> String {
        format!("{}{}", STORE_PREFIX, name)
    }
}
