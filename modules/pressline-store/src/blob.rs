//! Blob storage abstraction. The pipeline's only storage primitives are
//! unconditional overwrite, create-if-absent, and replace-if-etag-matches;
//! everything above (leases, dedup, idempotent stage outputs) is built on
//! those three.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("Etag mismatch for {0}")]
    EtagMismatch(String),

    #[error("Invalid blob key: {0}")]
    InvalidKey(String),

    #[error("Blob serialization error: {0}")]
    Serde(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Opaque version token returned by every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Etag(pub String);

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<(Bytes, Etag)>;

    /// Unconditional overwrite. Stage outputs are deterministic, so re-runs
    /// land byte-identical content here.
    async fn put(&self, key: &str, body: Bytes) -> Result<Etag>;

    /// Overwrite carrying a MIME type, for stores that serve content
    /// directly. Default implementations ignore the type.
    async fn put_typed(&self, key: &str, body: Bytes, _content_type: &str) -> Result<Etag> {
        self.put(key, body).await
    }

    /// If-none-match create. Fails with `AlreadyExists` when the key is
    /// present; this is the lease-acquisition primitive.
    async fn create_if_absent(&self, key: &str, body: Bytes) -> Result<Etag>;

    /// If-match replace. Fails with `EtagMismatch` when the blob changed (or
    /// vanished) since `etag` was observed.
    async fn replace_if_match(&self, key: &str, body: Bytes, etag: &Etag) -> Result<Etag>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Conditional delete; `EtagMismatch` when the blob changed underneath.
    async fn delete_if_match(&self, key: &str, etag: &Etag) -> Result<()>;

    /// All keys under a prefix, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Read a blob and deserialize it as JSON.
pub async fn get_json<T: DeserializeOwned>(store: &dyn BlobStore, key: &str) -> Result<(T, Etag)> {
    let (bytes, etag) = store.get(key).await?;
    let value = serde_json::from_slice(&bytes)
        .map_err(|e| StoreError::Serde(format!("{key}: {e}")))?;
    Ok((value, etag))
}

/// Serialize a value as pretty JSON and overwrite the blob. Pretty-printing
/// keeps audit blobs readable and is still deterministic for idempotence.
pub async fn put_json<T: Serialize>(store: &dyn BlobStore, key: &str, value: &T) -> Result<Etag> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::Serde(format!("{key}: {e}")))?;
    store.put(key, Bytes::from(bytes)).await
}

/// In-memory blob store. Backs tests and single-process runs; implements the
/// full conditional-write contract.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, (Bytes, Etag, Option<String>)>>,
    versions: AtomicU64,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> Etag {
        Etag(self.versions.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// Content type recorded by `put_typed`, for assertions in tests.
    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.blobs.read().await.get(key).and_then(|(_, _, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<(Bytes, Etag)> {
        self.blobs
            .read()
            .await
            .get(key)
            .map(|(b, e, _)| (b.clone(), e.clone()))
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<Etag> {
        let etag = self.next_etag();
        self.blobs
            .write()
            .await
            .insert(key.to_string(), (body, etag.clone(), None));
        Ok(etag)
    }

    async fn put_typed(&self, key: &str, body: Bytes, content_type: &str) -> Result<Etag> {
        let etag = self.next_etag();
        self.blobs.write().await.insert(
            key.to_string(),
            (body, etag.clone(), Some(content_type.to_string())),
        );
        Ok(etag)
    }

    async fn create_if_absent(&self, key: &str, body: Bytes) -> Result<Etag> {
        let mut blobs = self.blobs.write().await;
        if blobs.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let etag = self.next_etag();
        blobs.insert(key.to_string(), (body, etag.clone(), None));
        Ok(etag)
    }

    async fn replace_if_match(&self, key: &str, body: Bytes, etag: &Etag) -> Result<Etag> {
        let mut blobs = self.blobs.write().await;
        match blobs.get(key) {
            Some((_, current, _)) if current == etag => {
                let new_etag = self.next_etag();
                blobs.insert(key.to_string(), (body, new_etag.clone(), None));
                Ok(new_etag)
            }
            Some(_) => Err(StoreError::EtagMismatch(key.to_string())),
            None => Err(StoreError::EtagMismatch(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs
            .write()
            .await
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete_if_match(&self, key: &str, etag: &Etag) -> Result<()> {
        let mut blobs = self.blobs.write().await;
        match blobs.get(key) {
            Some((_, current, _)) if current == etag => {
                blobs.remove(key);
                Ok(())
            }
            Some(_) => Err(StoreError::EtagMismatch(key.to_string())),
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
