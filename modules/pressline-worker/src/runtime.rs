//! Shared consume loop for queue-driven workers: receive, dispatch, ack on
//! success, leave for redelivery on retryable failure, dead-letter once the
//! redelivery cap is hit. Idle workers exit 0 so the scaler can run the
//! fleet down to zero.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info, warn};

use pressline_common::{Config, PipelineError};
use pressline_store::blob::put_json;
use pressline_store::{layout, BlobStore, Delivery, Queue};

/// Per-worker counters surfaced on `/status`.
#[derive(Debug, Default)]
pub struct WorkerCounters {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub dead_lettered: AtomicU64,
}

#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one raw queue message body. The runtime maps the error kind
    /// onto queue semantics; handlers never ack or nack themselves.
    async fn handle(&self, body: &str) -> Result<(), PipelineError>;
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub visibility_timeout: Duration,
    pub max_deliveries: u32,
    pub idle_shutdown: Duration,
    pub disable_auto_shutdown: bool,
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Fan-in cap: stop after this many successful messages in one run.
    pub max_messages: Option<u64>,
}

impl RuntimeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            // Messages stay hidden for the lease TTL so a crashed worker's
            // message and its lease free up together.
            visibility_timeout: Duration::from_secs(config.lease_ttl_seconds),
            max_deliveries: config.max_deliveries,
            idle_shutdown: Duration::from_secs(config.idle_shutdown_seconds),
            disable_auto_shutdown: config.disable_auto_shutdown,
            poll_interval: Duration::from_secs(2),
            batch_size: 8,
            max_messages: None,
        }
    }

    pub fn with_max_messages(mut self, max: u64) -> Self {
        self.max_messages = Some(max);
        self
    }
}

#[derive(Serialize)]
struct DeadLetterRecord<'a> {
    queue: &'a str,
    body: &'a str,
    failed_at: DateTime<Utc>,
    dequeue_count: u32,
    last_error: &'a str,
}

pub struct WorkerRuntime {
    queue: Arc<dyn Queue>,
    store: Arc<dyn BlobStore>,
    config: RuntimeConfig,
    counters: Arc<WorkerCounters>,
}

impl WorkerRuntime {
    pub fn new(
        queue: Arc<dyn Queue>,
        store: Arc<dyn BlobStore>,
        config: RuntimeConfig,
        counters: Arc<WorkerCounters>,
    ) -> Self {
        Self {
            queue,
            store,
            config,
            counters,
        }
    }

    /// Consume until the queue stays empty past the idle window. Returns the
    /// number of messages successfully processed.
    pub async fn run(&self, handler: Arc<dyn Handler>) -> anyhow::Result<u64> {
        let mut idle_since = Instant::now();
        info!(queue = self.queue.name(), "worker consuming");

        loop {
            if let Some(max) = self.config.max_messages {
                if self.counters.processed.load(Ordering::Relaxed) >= max {
                    info!(queue = self.queue.name(), max, "fan-in cap reached");
                    return Ok(self.counters.processed.load(Ordering::Relaxed));
                }
            }
            let deliveries = self
                .queue
                .receive(self.config.batch_size, self.config.visibility_timeout)
                .await?;

            if deliveries.is_empty() {
                if !self.config.disable_auto_shutdown
                    && idle_since.elapsed() >= self.config.idle_shutdown
                {
                    info!(
                        queue = self.queue.name(),
                        processed = self.counters.processed.load(Ordering::Relaxed),
                        "queue idle, shutting down"
                    );
                    return Ok(self.counters.processed.load(Ordering::Relaxed));
                }
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }
            idle_since = Instant::now();

            for delivery in deliveries {
                self.dispatch(handler.as_ref(), delivery).await;
            }
        }
    }

    async fn dispatch(&self, handler: &dyn Handler, delivery: Delivery) {
        if delivery.dequeue_count > self.config.max_deliveries {
            self.dead_letter(&delivery, "redelivery cap exceeded").await;
            return;
        }

        match handler.handle(&delivery.body).await {
            Ok(()) => {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = self.queue.delete(delivery.receipt).await {
                    warn!(error = %e, "ack failed; message will be redelivered");
                }
            }
            Err(e) if e.is_retryable() => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue = self.queue.name(),
                    dequeue_count = delivery.dequeue_count,
                    error = %e,
                    "handler failed, leaving message for redelivery"
                );
                // No ack: the visibility timeout returns the message.
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if delivery.dequeue_count >= self.config.max_deliveries {
                    self.dead_letter(&delivery, &e.to_string()).await;
                } else {
                    error!(
                        queue = self.queue.name(),
                        dequeue_count = delivery.dequeue_count,
                        error = %e,
                        "non-retryable handler failure"
                    );
                }
            }
        }
    }

    /// Preserve the poisoned message for replay, then consume it.
    async fn dead_letter(&self, delivery: &Delivery, last_error: &str) {
        let message_id = extract_message_id(&delivery.body)
            .unwrap_or_else(|| delivery.receipt.to_string());
        let key = layout::dead_letter_blob(self.queue.name(), &message_id);
        let record = DeadLetterRecord {
            queue: self.queue.name(),
            body: &delivery.body,
            failed_at: Utc::now(),
            dequeue_count: delivery.dequeue_count,
            last_error,
        };
        if let Err(e) = put_json(self.store.as_ref(), &key, &record).await {
            error!(error = %e, key, "failed to write dead-letter record");
            // Leave the message in the queue rather than dropping it silently.
            return;
        }
        self.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        error!(
            queue = self.queue.name(),
            message_id,
            dequeue_count = delivery.dequeue_count,
            "message dead-lettered"
        );
        if let Err(e) = self.queue.delete(delivery.receipt).await {
            warn!(error = %e, "failed to ack dead-lettered message");
        }
    }
}

fn extract_message_id(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("message_id")?.as_str().map(String::from)
}
