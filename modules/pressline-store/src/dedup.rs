//! Content-hash dedup store: a single compacted index blob updated with a
//! CAS retry loop. Entries older than the sliding window are evicted lazily
//! on each write. The store fails open — a broken dedup index must never
//! stop collection.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::blob::{BlobStore, Etag, StoreError};

const INDEX_KEY: &str = "dedup/index.json";
const CAS_ATTEMPTS: usize = 16;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DedupIndex {
    /// content_hash -> first_seen_at
    entries: HashMap<String, DateTime<Utc>>,
}

pub struct DedupStore {
    store: Arc<dyn BlobStore>,
    window: Duration,
}

impl DedupStore {
    pub fn new(store: Arc<dyn BlobStore>, window_days: i64) -> Self {
        Self {
            store,
            window: Duration::days(window_days),
        }
    }

    /// Whether `content_hash` was seen within the window. Fail-open: a store
    /// error logs a warning and reports unseen.
    pub async fn seen(&self, content_hash: &str) -> bool {
        match self.load().await {
            Ok(Some((index, _))) => index
                .entries
                .get(content_hash)
                .map(|first_seen| Utc::now() - *first_seen < self.window)
                .unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                warn!(error = %e, "dedup index unreadable, proceeding without dedup");
                false
            }
        }
    }

    /// Record `content_hash`, evicting expired entries in the same write.
    /// Called after the topic message is enqueued. Fail-open on store errors.
    pub async fn insert(&self, content_hash: &str) {
        let now = Utc::now();
        for _ in 0..CAS_ATTEMPTS {
            let loaded = match self.load().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "dedup index unreadable, skipping insert");
                    return;
                }
            };

            let (mut index, etag) = match loaded {
                Some((index, etag)) => (index, Some(etag)),
                None => (DedupIndex::default(), None),
            };
            index
                .entries
                .retain(|_, first_seen| now - *first_seen < self.window);
            index.entries.insert(content_hash.to_string(), now);

            let body = match serde_json::to_vec(&index) {
                Ok(b) => Bytes::from(b),
                Err(e) => {
                    warn!(error = %e, "dedup index serialization failed");
                    return;
                }
            };

            let result = match etag {
                Some(etag) => self.store.replace_if_match(INDEX_KEY, body, &etag).await,
                None => self.store.create_if_absent(INDEX_KEY, body).await,
            };
            match result {
                Ok(_) => return,
                // Lost a CAS race with a concurrent collector; reload and retry.
                Err(StoreError::EtagMismatch(_)) | Err(StoreError::AlreadyExists(_)) => continue,
                Err(e) => {
                    warn!(error = %e, "dedup index write failed, proceeding without dedup");
                    return;
                }
            }
        }
        warn!(content_hash, "dedup insert gave up after CAS contention");
    }

    async fn load(&self) -> Result<Option<(DedupIndex, Etag)>, StoreError> {
        match self.store.get(INDEX_KEY).await {
            Ok((bytes, etag)) => {
                let index = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Serde(format!("{INDEX_KEY}: {e}")))?;
                Ok(Some((index, etag)))
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    #[tokio::test]
    async fn second_sight_within_window_is_seen() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let dedup = DedupStore::new(store, 14);

        assert!(!dedup.seen("h1").await);
        dedup.insert("h1").await;
        assert!(dedup.seen("h1").await);
        assert!(!dedup.seen("h2").await);
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_insert() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        // Zero-day window: everything expires immediately.
        let dedup = DedupStore::new(store.clone(), 0);

        dedup.insert("h1").await;
        assert!(!dedup.seen("h1").await);

        dedup.insert("h2").await;
        let (bytes, _) = store.get("dedup/index.json").await.unwrap();
        let index: DedupIndex = serde_json::from_slice(&bytes).unwrap();
        assert!(!index.entries.contains_key("h1"));
    }

    #[tokio::test]
    async fn concurrent_inserts_all_land() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let dedup = Arc::new(DedupStore::new(store, 14));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let dedup = dedup.clone();
                tokio::spawn(async move { dedup.insert(&format!("h{i}")).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        for i in 0..8 {
            assert!(dedup.seen(&format!("h{i}")).await, "h{i} lost");
        }
    }
}
