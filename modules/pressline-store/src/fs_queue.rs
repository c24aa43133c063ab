//! Filesystem-backed queue for multi-process local deployments. A message is
//! a JSON file under `{root}/{queue}/ready/`; claiming renames it into
//! `inflight/` with its redelivery deadline encoded in the filename. Rename
//! is atomic on POSIX, so two workers cannot claim the same file.
//!
//! Filename scheme:
//!   ready/{dequeue_count}_{id}.json
//!   inflight/{deadline_unix_ms}_{dequeue_count}_{id}.json

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::blob::{Result, StoreError};
use crate::queue::{Delivery, Queue};

pub struct FsQueue {
    name: String,
    ready: PathBuf,
    inflight: PathBuf,
}

impl FsQueue {
    pub async fn open(root: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let dir = root.into().join(name);
        let ready = dir.join("ready");
        let inflight = dir.join("inflight");
        tokio::fs::create_dir_all(&ready).await?;
        tokio::fs::create_dir_all(&inflight).await?;
        Ok(Self {
            name: name.to_string(),
            ready,
            inflight,
        })
    }

    /// Move messages whose deadline has passed back into `ready/`.
    async fn requeue_expired(&self) -> Result<()> {
        let now = unix_ms();
        let mut entries = tokio::fs::read_dir(&self.inflight).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some((deadline, count, id)) = parse_inflight_name(&name) else {
                continue;
            };
            if deadline <= now {
                let target = self.ready.join(format!("{count}_{id}.json"));
                // A concurrent worker may requeue the same file; losing the
                // race is fine.
                let _ = tokio::fs::rename(entry.path(), target).await;
            }
        }
        Ok(())
    }

    async fn ready_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.ready).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl Queue for FsQueue {
    async fn send(&self, body: String) -> Result<()> {
        let id = Uuid::new_v4();
        let tmp = self.ready.join(format!(".tmp.{id}"));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(body.as_bytes()).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp, self.ready.join(format!("0_{id}.json"))).await?;
        Ok(())
    }

    async fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<Delivery>> {
        self.requeue_expired().await?;

        let deadline = unix_ms() + visibility.as_millis() as u64;
        let mut deliveries = Vec::new();
        for name in self.ready_names().await? {
            if deliveries.len() >= max {
                break;
            }
            let Some((count, id)) = parse_ready_name(&name) else {
                continue;
            };
            let claimed = self
                .inflight
                .join(format!("{deadline}_{}_{id}.json", count + 1));
            // Atomic claim; a concurrent worker that renamed first wins.
            if tokio::fs::rename(self.ready.join(&name), &claimed).await.is_err() {
                continue;
            }
            let body = tokio::fs::read_to_string(&claimed).await?;
            deliveries.push(Delivery {
                receipt: id,
                body,
                dequeue_count: count + 1,
            });
        }
        Ok(deliveries)
    }

    async fn delete(&self, receipt: Uuid) -> Result<()> {
        let suffix = format!("_{receipt}.json");
        let mut entries = tokio::fs::read_dir(&self.inflight).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.ends_with(&suffix) {
                tokio::fs::remove_file(entry.path()).await?;
                return Ok(());
            }
        }
        Err(StoreError::NotFound(format!("receipt {receipt}")))
    }

    async fn len(&self) -> Result<usize> {
        self.requeue_expired().await?;
        Ok(self.ready_names().await?.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn parse_ready_name(name: &str) -> Option<(u32, Uuid)> {
    let stem = name.strip_suffix(".json")?;
    let (count, id) = stem.split_once('_')?;
    Some((count.parse().ok()?, id.parse().ok()?))
}

fn parse_inflight_name(name: &str) -> Option<(u64, u32, Uuid)> {
    let stem = name.strip_suffix(".json")?;
    let mut parts = stem.splitn(3, '_');
    let deadline = parts.next()?.parse().ok()?;
    let count = parts.next()?.parse().ok()?;
    let id = parts.next()?.parse().ok()?;
    Some((deadline, count, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_receive_delete() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FsQueue::open(dir.path(), "content-processing-requests")
            .await
            .unwrap();
        queue.send("{\"x\":1}".into()).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);

        let deliveries = queue.receive(10, Duration::from_secs(30)).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].dequeue_count, 1);
        assert_eq!(queue.len().await.unwrap(), 0);

        queue.delete(deliveries[0].receipt).await.unwrap();
        assert!(queue
            .receive(10, Duration::from_secs(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn expired_claim_is_redelivered() {
        let dir = tempfile::tempdir().unwrap();
        let queue = FsQueue::open(dir.path(), "q").await.unwrap();
        queue.send("m".into()).await.unwrap();

        let first = queue.receive(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(first[0].dequeue_count, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = queue.receive(1, Duration::from_secs(30)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].dequeue_count, 2);
        assert_eq!(second[0].body, "m");
    }

    #[tokio::test]
    async fn two_handles_cannot_claim_the_same_message() {
        let dir = tempfile::tempdir().unwrap();
        let a = FsQueue::open(dir.path(), "q").await.unwrap();
        let b = FsQueue::open(dir.path(), "q").await.unwrap();
        a.send("only-one".into()).await.unwrap();

        let (ra, rb) = tokio::join!(
            a.receive(1, Duration::from_secs(30)),
            b.receive(1, Duration::from_secs(30)),
        );
        let total = ra.unwrap().len() + rb.unwrap().len();
        assert_eq!(total, 1);
    }
}
