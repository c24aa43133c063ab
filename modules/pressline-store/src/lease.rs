//! Lease coordination over blob storage. A lease is a blob at
//! `leases/{topic_id}`; the state machine runs over the blob's existence and
//! its `expires_at` field:
//!
//!   Free (no blob) --acquire--> Held --renew--> Held --release--> Free
//!   Held --ttl elapses--> Expired --reclaim--> Held
//!
//! Acquisition uses create-if-absent; reclaim and renewal use
//! replace-if-match, so two workers can never both hold an unexpired lease
//! for the same topic.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::blob::{BlobStore, Etag, Result, StoreError};
use crate::layout;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub topic_id: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub attempt_number: u32,
}

pub struct LeaseManager {
    store: Arc<dyn BlobStore>,
    ttl: Duration,
    owner_id: String,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn BlobStore>, ttl: Duration, owner_id: &str) -> Self {
        Self {
            store,
            ttl,
            owner_id: owner_id.to_string(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to claim `topic_id`. Returns `None` when another worker holds an
    /// unexpired lease — not an error, the caller just walks away.
    pub async fn acquire(&self, topic_id: &str) -> Result<Option<LeaseGuard>> {
        let key = layout::lease_blob(topic_id);
        let record = self.fresh_record(topic_id, 1);

        match self
            .store
            .create_if_absent(&key, encode(&record)?)
            .await
        {
            Ok(etag) => {
                debug!(topic_id, owner = %self.owner_id, "lease acquired");
                return Ok(Some(self.guard(key, record, etag)));
            }
            Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }

        // Blob exists: held or expired.
        let (bytes, etag) = match self.store.get(&key).await {
            Ok(v) => v,
            // Holder released between our create and get; next delivery wins.
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let current: LeaseRecord = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serde(format!("{key}: {e}")))?;

        if current.expires_at > Utc::now() {
            debug!(topic_id, holder = %current.owner_id, "lease held, skipping");
            return Ok(None);
        }

        // Expired: any worker may reclaim, gated by the etag.
        let record = self.fresh_record(topic_id, current.attempt_number + 1);
        match self
            .store
            .replace_if_match(&key, encode(&record)?, &etag)
            .await
        {
            Ok(new_etag) => {
                debug!(topic_id, attempt = record.attempt_number, "expired lease reclaimed");
                Ok(Some(self.guard(key, record, new_etag)))
            }
            // Lost the reclaim race.
            Err(StoreError::EtagMismatch(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn fresh_record(&self, topic_id: &str, attempt_number: u32) -> LeaseRecord {
        let now = Utc::now();
        LeaseRecord {
            topic_id: topic_id.to_string(),
            owner_id: self.owner_id.clone(),
            acquired_at: now,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or_default(),
            attempt_number,
        }
    }

    fn guard(&self, key: String, record: LeaseRecord, etag: Etag) -> LeaseGuard {
        LeaseGuard {
            store: self.store.clone(),
            key,
            ttl: self.ttl,
            record,
            etag: Arc::new(Mutex::new(etag)),
            renewal: None,
        }
    }
}

/// An exclusively held lease. Call [`LeaseGuard::spawn_renewal`] before long
/// operations and [`LeaseGuard::release`] on completion. Dropping the guard
/// without releasing leaves the blob to expire on its own (the crash path).
pub struct LeaseGuard {
    store: Arc<dyn BlobStore>,
    key: String,
    ttl: Duration,
    record: LeaseRecord,
    etag: Arc<Mutex<Etag>>,
    renewal: Option<JoinHandle<()>>,
}

impl LeaseGuard {
    pub fn record(&self) -> &LeaseRecord {
        &self.record
    }

    pub fn attempt_number(&self) -> u32 {
        self.record.attempt_number
    }

    /// Renew at TTL/2 in the background until released. A failed renewal
    /// stops the task; the lease then expires on schedule and another worker
    /// may reclaim.
    pub fn spawn_renewal(&mut self) {
        if self.renewal.is_some() {
            return;
        }
        let store = self.store.clone();
        let key = self.key.clone();
        let etag = self.etag.clone();
        let ttl = self.ttl;
        let mut record = self.record.clone();

        self.renewal = Some(tokio::spawn(async move {
            let interval = ttl / 2;
            loop {
                tokio::time::sleep(interval).await;
                let now = Utc::now();
                record.expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_default();
                let body = match encode(&record) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(key, error = %e, "lease renewal encode failed");
                        return;
                    }
                };
                let mut current = etag.lock().await;
                match store.replace_if_match(&key, body, &current).await {
                    Ok(new_etag) => {
                        *current = new_etag;
                        debug!(key, "lease renewed");
                    }
                    Err(e) => {
                        warn!(key, error = %e, "lease renewal lost, stopping");
                        return;
                    }
                }
            }
        }));
    }

    /// Release on success: stop renewing and delete the lease blob. An etag
    /// mismatch here means the lease already expired and was reclaimed; that
    /// is not an error for the releasing worker.
    pub async fn release(mut self) -> Result<()> {
        if let Some(task) = self.renewal.take() {
            task.abort();
        }
        let etag = self.etag.lock().await.clone();
        match self.store.delete_if_match(&self.key, &etag).await {
            Ok(()) => Ok(()),
            Err(StoreError::EtagMismatch(_)) | Err(StoreError::NotFound(_)) => {
                warn!(key = %self.key, "lease already reclaimed at release");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(task) = self.renewal.take() {
            task.abort();
        }
    }
}

fn encode(record: &LeaseRecord) -> Result<Bytes> {
    serde_json::to_vec(record)
        .map(Bytes::from)
        .map_err(|e| StoreError::Serde(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;

    fn manager(store: &Arc<dyn BlobStore>, ttl: Duration, owner: &str) -> LeaseManager {
        LeaseManager::new(store.clone(), ttl, owner)
    }

    #[tokio::test]
    async fn second_acquire_fails_while_held() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let w1 = manager(&store, Duration::from_secs(900), "w1");
        let w2 = manager(&store, Duration::from_secs(900), "w2");

        let guard = w1.acquire("topic-a").await.unwrap();
        assert!(guard.is_some());
        assert!(w2.acquire("topic-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn released_lease_is_reacquirable() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let w1 = manager(&store, Duration::from_secs(900), "w1");
        let w2 = manager(&store, Duration::from_secs(900), "w2");

        let guard = w1.acquire("topic-a").await.unwrap().unwrap();
        guard.release().await.unwrap();

        let guard2 = w2.acquire("topic-a").await.unwrap().unwrap();
        assert_eq!(guard2.record().owner_id, "w2");
        assert_eq!(guard2.attempt_number(), 1);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_with_bumped_attempt() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let w1 = manager(&store, Duration::from_millis(1), "w1");
        let w2 = manager(&store, Duration::from_secs(900), "w2");

        let _abandoned = w1.acquire("topic-a").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let guard = w2.acquire("topic-a").await.unwrap().unwrap();
        assert_eq!(guard.record().owner_id, "w2");
        assert_eq!(guard.attempt_number(), 2);
    }

    #[tokio::test]
    async fn release_after_reclaim_is_not_an_error() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let w1 = manager(&store, Duration::from_millis(1), "w1");
        let w2 = manager(&store, Duration::from_secs(900), "w2");

        let stale = w1.acquire("topic-a").await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let fresh = w2.acquire("topic-a").await.unwrap().unwrap();

        // The crashed-then-resumed first worker releases late; the second
        // worker's lease must survive.
        stale.release().await.unwrap();
        assert!(store.get(&layout::lease_blob("topic-a")).await.is_ok());
        fresh.release().await.unwrap();
        assert!(store.get(&layout::lease_blob("topic-a")).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_extends_expiry() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let w1 = manager(&store, Duration::from_secs(10), "w1");

        let mut guard = w1.acquire("topic-a").await.unwrap().unwrap();
        let before = guard.record().expires_at;
        guard.spawn_renewal();

        tokio::time::advance(Duration::from_secs(6)).await;
        // Let the renewal task run to completion of one cycle.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let (bytes, _) = store.get(&layout::lease_blob("topic-a")).await.unwrap();
        let record: LeaseRecord = serde_json::from_slice(&bytes).unwrap();
        assert!(record.expires_at >= before);
        guard.release().await.unwrap();
    }
}
