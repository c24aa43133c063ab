//! Durable-queue abstraction: at-least-once delivery with visibility
//! timeouts. Received messages reappear unless deleted before the timeout
//! elapses; `dequeue_count` feeds the dead-letter cap.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::blob::{Result, StoreError};

/// One received message. The receipt is only valid until the visibility
/// timeout elapses.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Uuid,
    pub body: String,
    pub dequeue_count: u32,
}

#[async_trait]
pub trait Queue: Send + Sync {
    async fn send(&self, body: String) -> Result<()>;

    /// Receive up to `max` messages, hidden from other consumers for
    /// `visibility`. Expired in-flight messages are requeued first.
    async fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<Delivery>>;

    /// Acknowledge (permanently remove) a received message.
    async fn delete(&self, receipt: Uuid) -> Result<()>;

    /// Ready (visible) depth; what a scale controller would watch.
    async fn len(&self) -> Result<usize>;

    fn name(&self) -> &str;
}

struct QueuedMessage {
    id: Uuid,
    body: String,
    dequeue_count: u32,
}

#[derive(Default)]
struct MemoryQueueInner {
    ready: VecDeque<QueuedMessage>,
    inflight: HashMap<Uuid, (QueuedMessage, Instant)>,
}

/// In-process queue with full redelivery semantics. Backs tests and
/// single-process runs.
pub struct MemoryQueue {
    name: String,
    inner: Mutex<MemoryQueueInner>,
}

impl MemoryQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inner: Mutex::new(MemoryQueueInner::default()),
        }
    }

    fn requeue_expired(inner: &mut MemoryQueueInner, now: Instant) {
        let expired: Vec<Uuid> = inner
            .inflight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((msg, _)) = inner.inflight.remove(&id) {
                inner.ready.push_back(msg);
            }
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn send(&self, body: String) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.ready.push_back(QueuedMessage {
            id: Uuid::new_v4(),
            body,
            dequeue_count: 0,
        });
        Ok(())
    }

    async fn receive(&self, max: usize, visibility: Duration) -> Result<Vec<Delivery>> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        Self::requeue_expired(&mut inner, now);

        let mut deliveries = Vec::new();
        while deliveries.len() < max {
            let Some(mut msg) = inner.ready.pop_front() else {
                break;
            };
            msg.dequeue_count += 1;
            let receipt = Uuid::new_v4();
            deliveries.push(Delivery {
                receipt,
                body: msg.body.clone(),
                dequeue_count: msg.dequeue_count,
            });
            inner.inflight.insert(receipt, (msg, now + visibility));
        }
        Ok(deliveries)
    }

    async fn delete(&self, receipt: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .inflight
            .remove(&receipt)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("receipt {receipt}")))
    }

    async fn len(&self) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        Self::requeue_expired(&mut inner, Instant::now());
        Ok(inner.ready.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
