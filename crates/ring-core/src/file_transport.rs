//! FileTransport trait for moving whole files between nodes' stores.
//!
//! Implementations:
//! - `ScpTransport` (in ring-daemon) - Secure copy to/from the peer's store directory
//! - `MemoryFileTransport` - Copies between `InMemoryStore`s for tests

use crate::store::InMemoryStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileTransportError {
    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("File not found on {host}: {name}")]
    NotFound { host: String, name: String },

    #[error("Copy failed: {0}")]
    CopyFailed(String),
}

pub type Result<T> = std::result::Result<T, FileTransportError>;

/// Remote whole-file copy.
#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Push stored file `name` from this node's store into `target`'s store.
    async fn copy(&self, name: &str, target: &str) -> Result<()>;

    /// Pull stored file `name` from `source`'s store to local path `dest`.
    async fn fetch(&self, source: &str, name: &str, dest: &str) -> Result<()>;
}

#[async_trait]
impl<T: FileTransport + ?Sized> FileTransport for Arc<T> {
    async fn copy(&self, name: &str, target: &str) -> Result<()> {
        (**self).copy(name, target).await
    }

    async fn fetch(&self, source: &str, name: &str, dest: &str) -> Result<()> {
        (**self).fetch(source, name, dest).await
    }
}

/// A completed push or pull, recorded for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRecord {
    pub file: String,
    pub from: String,
    pub to: String,
}

/// Registry of in-memory stores reachable by file transport.
#[derive(Clone, Default)]
pub struct MemoryFileNetwork {
    stores: Arc<RwLock<HashMap<String, Arc<InMemoryStore>>>>,
    log: Arc<Mutex<Vec<CopyRecord>>>,
}

impl MemoryFileNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host's store and return its transport.
    pub fn attach(&self, host: impl Into<String>, store: Arc<InMemoryStore>) -> MemoryFileTransport {
        let host = host.into();
        self.stores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(host.clone(), store);
        MemoryFileTransport {
            host,
            network: self.clone(),
        }
    }

    /// Store registered for `host`.
    pub fn store(&self, host: &str) -> Option<Arc<InMemoryStore>> {
        self.stores
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(host)
            .cloned()
    }

    /// Every completed transfer so far, in order.
    pub fn copies(&self) -> Vec<CopyRecord> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, file: &str, from: &str, to: &str) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CopyRecord {
                file: file.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
    }

    fn lookup(&self, host: &str) -> Result<Arc<InMemoryStore>> {
        self.store(host)
            .ok_or_else(|| FileTransportError::UnknownHost(host.to_string()))
    }
}

/// One host's file transport on a [`MemoryFileNetwork`].
#[derive(Clone)]
pub struct MemoryFileTransport {
    host: String,
    network: MemoryFileNetwork,
}

#[async_trait]
impl FileTransport for MemoryFileTransport {
    async fn copy(&self, name: &str, target: &str) -> Result<()> {
        let local = self.network.lookup(&self.host)?;
        let remote = self.network.lookup(target)?;
        let content = local.read(name).ok_or_else(|| FileTransportError::NotFound {
            host: self.host.clone(),
            name: name.to_string(),
        })?;

        remote.write(name, &content);
        self.network.record(name, &self.host, target);
        Ok(())
    }

    async fn fetch(&self, source: &str, name: &str, dest: &str) -> Result<()> {
        let local = self.network.lookup(&self.host)?;
        let remote = self.network.lookup(source)?;
        let content = remote.read(name).ok_or_else(|| FileTransportError::NotFound {
            host: source.to_string(),
            name: name.to_string(),
        })?;

        local.stage(dest, &content);
        self.network.record(name, source, &self.host);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    #[tokio::test]
    async fn test_copy_between_stores() {
        let net = MemoryFileNetwork::new();
        let a_store = Arc::new(InMemoryStore::new());
        let b_store = Arc::new(InMemoryStore::new());
        let a = net.attach("a", Arc::clone(&a_store));
        net.attach("b", Arc::clone(&b_store));

        a_store.write("f1", b"data");
        a.copy("f1", "b").await.unwrap();

        assert_eq!(b_store.read("f1").unwrap(), b"data");
        assert_eq!(
            net.copies(),
            vec![CopyRecord {
                file: "f1".into(),
                from: "a".into(),
                to: "b".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_copy_missing_file() {
        let net = MemoryFileNetwork::new();
        let a = net.attach("a", Arc::new(InMemoryStore::new()));
        net.attach("b", Arc::new(InMemoryStore::new()));

        let err = a.copy("ghost", "b").await.unwrap_err();
        assert!(matches!(err, FileTransportError::NotFound { .. }));
        assert!(net.copies().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_into_store() {
        let net = MemoryFileNetwork::new();
        let a_store = Arc::new(InMemoryStore::new());
        let a = net.attach("a", Arc::clone(&a_store));
        let b_store = Arc::new(InMemoryStore::new());
        net.attach("b", Arc::clone(&b_store));
        b_store.write("f1", b"replica");

        a.fetch("b", "f1", &a_store.path_of("f1")).await.unwrap();
        assert_eq!(a_store.read("f1").unwrap(), b"replica");
    }

    #[tokio::test]
    async fn test_fetch_to_outside_path() {
        let net = MemoryFileNetwork::new();
        let a_store = Arc::new(InMemoryStore::new());
        let a = net.attach("a", Arc::clone(&a_store));
        let b_store = Arc::new(InMemoryStore::new());
        net.attach("b", Arc::clone(&b_store));
        b_store.write("f1", b"remote");

        a.fetch("b", "f1", "/tmp/f1").await.unwrap();
        assert_eq!(a_store.outside("/tmp/f1").unwrap(), b"remote");
        assert_eq!(
            net.copies(),
            vec![CopyRecord {
                file: "f1".into(),
                from: "b".into(),
                to: "a".into(),
            }]
        );

        let err = a.fetch("zz", "f1", "/tmp/f1").await.unwrap_err();
        assert!(matches!(err, FileTransportError::UnknownHost(_)));
    }
}
