//! Filesystem-backed blob store. One file per blob under a root directory,
//! with a sidecar `.etag` version file. Plain writes are temp-file + atomic
//! rename; `create_if_absent` relies on `O_EXCL`. Conditional operations are
//! additionally serialized through an in-process mutex; cross-process
//! exclusivity comes from the `O_EXCL` create, which is the primitive leases
//! actually depend on.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::blob::{BlobStore, Etag, Result, StoreError};

const ETAG_SUFFIX: &str = ".etag";

pub struct FsBlobStore {
    root: PathBuf,
    cas_lock: Mutex<()>,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cas_lock: Mutex::new(()),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    async fn read_etag(&self, path: &Path) -> Result<Etag> {
        let sidecar = sidecar_path(path);
        match tokio::fs::read_to_string(&sidecar).await {
            Ok(v) => Ok(Etag(v.trim().to_string())),
            // Blob written out-of-band (or pre-dating the sidecar scheme):
            // treat as version zero.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Etag("0".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_body(&self, path: &Path, body: &Bytes) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension(format!("tmp.{}", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(body).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn bump_etag(&self, path: &Path, old: Option<&Etag>) -> Result<Etag> {
        let version: u64 = match old {
            Some(Etag(v)) => v.parse::<u64>().unwrap_or(0) + 1,
            None => 1,
        };
        let etag = Etag(version.to_string());
        tokio::fs::write(sidecar_path(path), etag.0.as_bytes()).await?;
        Ok(etag)
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(ETAG_SUFFIX);
    PathBuf::from(s)
}

/// Reject traversal, absolute paths, control characters, and reserved
/// suffixes before anything touches the filesystem.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 1024 {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    if key.starts_with('/') || key.ends_with('/') || key.ends_with(ETAG_SUFFIX) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
    }
    if key.chars().any(|c| c.is_control() || c == '\\') {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<(Bytes, Etag)> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => {
                let etag = self.read_etag(&path).await?;
                Ok((Bytes::from(body), etag))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<Etag> {
        let path = self.path_for(key)?;
        let _guard = self.cas_lock.lock().await;
        self.write_body(&path, &body).await?;
        let old = self.read_etag(&path).await.ok();
        self.bump_etag(&path, old.as_ref()).await
    }

    async fn create_if_absent(&self, key: &str, body: Bytes) -> Result<Etag> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // O_EXCL create is the cross-process exclusivity point.
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(&body).await?;
        file.sync_all().await?;
        self.bump_etag(&path, None).await
    }

    async fn replace_if_match(&self, key: &str, body: Bytes, etag: &Etag) -> Result<Etag> {
        let path = self.path_for(key)?;
        let _guard = self.cas_lock.lock().await;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::EtagMismatch(key.to_string()));
        }
        let current = self.read_etag(&path).await?;
        if &current != etag {
            return Err(StoreError::EtagMismatch(key.to_string()));
        }
        self.write_body(&path, &body).await?;
        self.bump_etag(&path, Some(&current)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                let _ = tokio::fs::remove_file(sidecar_path(&path)).await;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_if_match(&self, key: &str, etag: &Etag) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self.cas_lock.lock().await;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let current = self.read_etag(&path).await?;
        if &current != etag {
            return Err(StoreError::EtagMismatch(key.to_string()));
        }
        tokio::fs::remove_file(&path).await?;
        let _ = tokio::fs::remove_file(sidecar_path(&path)).await;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                    continue;
                }
                let name = path.to_string_lossy();
                if name.ends_with(ETAG_SUFFIX) || name.contains(".tmp.") {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let key = rel.to_string_lossy().replace('\\', "/");
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}
