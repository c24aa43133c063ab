//! Collector driver: fan sources out under a concurrency cap, gate on
//! quality, dedup by content hash, persist the collection record, then emit
//! one `process_topic` message per accepted item.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use pressline_common::{
    content_hash, CollectionRecord, Config, Envelope, NormalizedItem, Operation,
    ProcessTopicPayload, QualitySpec, SourceOutcome,
};
use pressline_store::blob::put_json;
use pressline_store::{layout, BlobStore, DedupStore, Queue, RateLimiter};

use crate::sources::{adapter_for, SourceAdapter, SourceKind, SourceSpec};
use crate::stats::CollectStats;

/// Parallel source fetches per run. Each source kind still honors its own
/// rate limiter underneath.
const SOURCE_CONCURRENCY: usize = 3;

/// One source plus everything needed to gate its items.
pub struct ConfiguredSource {
    pub spec: SourceSpec,
    pub adapter: Arc<dyn SourceAdapter>,
    pub quality: QualitySpec,
}

pub struct Collector {
    sources: Vec<ConfiguredSource>,
    store: Arc<dyn BlobStore>,
    processing_queue: Arc<dyn Queue>,
    dedup: DedupStore,
    service_name: String,
}

impl Collector {
    /// Wire up adapters from configuration. One rate limiter per source kind,
    /// shared across that kind's targets.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn BlobStore>,
        processing_queue: Arc<dyn Queue>,
    ) -> Self {
        let max_backoff = std::time::Duration::from_secs(config.max_backoff_seconds);
        let reddit_limiter = Arc::new(RateLimiter::per_minute(
            "reddit",
            config.reddit_qpm,
            max_backoff,
        ));
        let mastodon_limiter = Arc::new(RateLimiter::per_minute(
            "mastodon",
            config.mastodon_qpm,
            max_backoff,
        ));
        // Feeds are self-hosted and cheap; reuse the mastodon budget rather
        // than inventing a separate knob.
        let rss_limiter = Arc::new(RateLimiter::per_minute(
            "rss",
            config.mastodon_qpm,
            max_backoff,
        ));

        let keywords = |min_score: u32| QualitySpec {
            min_score,
            min_comments: config.min_comments,
            include_keywords: config.include_keywords.clone(),
            exclude_keywords: config.exclude_keywords.clone(),
        };

        let mut sources = Vec::new();
        let reddit = adapter_for(SourceKind::Reddit, reddit_limiter);
        for subreddit in &config.reddit_subreddits {
            sources.push(ConfiguredSource {
                spec: SourceSpec {
                    kind: SourceKind::Reddit,
                    target: subreddit.clone(),
                    sort: config.reddit_sort.clone(),
                    max_items: config.max_items_per_source,
                },
                adapter: reddit.clone(),
                quality: keywords(config.min_score_reddit),
            });
        }
        let mastodon = adapter_for(SourceKind::Mastodon, mastodon_limiter);
        for instance in &config.mastodon_instances {
            sources.push(ConfiguredSource {
                spec: SourceSpec {
                    kind: SourceKind::Mastodon,
                    target: instance.clone(),
                    sort: String::new(),
                    max_items: config.max_items_per_source,
                },
                adapter: mastodon.clone(),
                quality: keywords(config.min_boosts_mastodon),
            });
        }
        let rss = adapter_for(SourceKind::Rss, rss_limiter);
        for feed in &config.rss_feeds {
            sources.push(ConfiguredSource {
                spec: SourceSpec {
                    kind: SourceKind::Rss,
                    target: feed.clone(),
                    sort: String::new(),
                    max_items: config.max_items_per_source,
                },
                adapter: rss.clone(),
                quality: keywords(0),
            });
        }

        Self::new(
            sources,
            store.clone(),
            processing_queue,
            DedupStore::new(store, config.dedup_window_days),
            &config.service_name,
        )
    }

    /// Direct constructor for tests and custom wiring.
    pub fn new(
        sources: Vec<ConfiguredSource>,
        store: Arc<dyn BlobStore>,
        processing_queue: Arc<dyn Queue>,
        dedup: DedupStore,
        service_name: &str,
    ) -> Self {
        Self {
            sources,
            store,
            processing_queue,
            dedup,
            service_name: service_name.to_string(),
        }
    }

    /// One collection run: fetch, gate, dedup, persist the audit record,
    /// fan out. A failing source is recorded and skipped, never fatal.
    pub async fn collect(&self) -> anyhow::Result<CollectStats> {
        let collection_id = Uuid::new_v4();
        let collected_at = Utc::now();
        let mut stats = CollectStats::default();

        // Fetch all sources with bounded parallelism, isolating failures.
        let fetched: Vec<(String, Result<Vec<NormalizedItem>, String>, usize)> =
            stream::iter(self.sources.iter().enumerate())
                .map(|(index, source)| async move {
                    let label = format!("{}:{}", source.spec.kind, source.spec.target);
                    let result = source
                        .adapter
                        .fetch(&source.spec)
                        .await
                        .map_err(|e| e.to_string());
                    (label, result, index)
                })
                .buffer_unordered(SOURCE_CONCURRENCY)
                .collect()
                .await;

        let mut outcomes = Vec::new();
        let mut accepted: Vec<NormalizedItem> = Vec::new();
        let mut hashes: Vec<String> = Vec::new();
        let mut seen_this_run: HashSet<String> = HashSet::new();

        for (label, result, index) in fetched {
            let source = &self.sources[index];
            let kind = source.spec.kind.to_string();
            match result {
                Err(error) => {
                    warn!(source = %label, error = %error, "source failed, continuing");
                    stats.sources_failed += 1;
                    outcomes.push(SourceOutcome {
                        kind,
                        ok: false,
                        items: 0,
                        error: Some(error),
                    });
                }
                Ok(items) => {
                    stats.sources_ok += 1;
                    let mut kept = 0u32;
                    for item in items {
                        stats.collected += 1;
                        if source.quality.evaluate(&item).is_err() {
                            stats.rejected_quality += 1;
                            continue;
                        }
                        let hash = content_hash(&item.title, &item.content);
                        // Cross-source duplicates within the run dedup by
                        // content hash, not by id.
                        if seen_this_run.contains(&hash) || self.dedup.seen(&hash).await {
                            stats.rejected_dedup += 1;
                            continue;
                        }
                        seen_this_run.insert(hash.clone());
                        hashes.push(hash);
                        accepted.push(item);
                        kept += 1;
                    }
                    outcomes.push(SourceOutcome {
                        kind,
                        ok: true,
                        items: kept,
                        error: None,
                    });
                }
            }
        }

        // Persist the audit record before fan-out; an interrupted fan-out
        // must still leave the collection on record.
        let record = CollectionRecord {
            collection_id,
            collected_at,
            sources: outcomes,
            items: accepted.clone(),
        };
        let collection_blob = layout::collection_blob(collected_at, collection_id);
        put_json(self.store.as_ref(), &collection_blob, &record).await?;
        info!(collection_blob, items = accepted.len(), "collection record written");

        // Fan out one message per item; mark the hash only after the message
        // is durably enqueued.
        for (item, hash) in accepted.iter().zip(&hashes) {
            let payload = ProcessTopicPayload {
                topic_id: item.id.clone(),
                title: item.title.clone(),
                source: item.source.clone(),
                url: item.url.clone(),
                upvotes: Some(item.native_score),
                comments: Some(item.comments),
                subreddit: item.subreddit.clone(),
                collected_at: item.collected_at,
                priority_score: priority_score(item),
                collection_id,
                collection_blob: collection_blob.clone(),
            };
            let envelope = Envelope::new(Operation::ProcessTopic, &self.service_name, payload);
            self.processing_queue.send(envelope.to_json()?).await?;
            self.dedup.insert(hash).await;
            stats.published += 1;
        }

        info!(
            published = stats.published,
            rejected_quality = stats.rejected_quality,
            rejected_dedup = stats.rejected_dedup,
            "collection run finished"
        );
        Ok(stats)
    }
}

/// Engagement-weighted priority used by the processor to order its fan-in.
fn priority_score(item: &NormalizedItem) -> f64 {
    f64::from(item.native_score) + 2.0 * f64::from(item.comments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pressline_common::Result;
    use pressline_store::{MemoryBlobStore, MemoryQueue};

    struct FakeSource {
        items: Vec<NormalizedItem>,
        fail: bool,
    }

    #[async_trait]
    impl SourceAdapter for FakeSource {
        async fn fetch(&self, _spec: &SourceSpec) -> Result<Vec<NormalizedItem>> {
            if self.fail {
                return Err(pressline_common::PipelineError::transient("outage"));
            }
            Ok(self.items.clone())
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Reddit
        }
    }

    fn item(id: &str, title: &str, score: u32) -> NormalizedItem {
        NormalizedItem {
            id: id.to_string(),
            title: title.to_string(),
            content: format!("body of {title}"),
            source: "reddit".to_string(),
            url: None,
            author: None,
            subreddit: Some("rust".to_string()),
            native_score: score,
            comments: 5,
            collected_at: Utc::now(),
            source_metadata: serde_json::Value::Null,
        }
    }

    fn configured(adapter: Arc<dyn SourceAdapter>, min_score: u32) -> ConfiguredSource {
        ConfiguredSource {
            spec: SourceSpec {
                kind: SourceKind::Reddit,
                target: "rust".to_string(),
                sort: "hot".to_string(),
                max_items: 25,
            },
            adapter,
            quality: QualitySpec {
                min_score,
                ..Default::default()
            },
        }
    }

    fn collector(
        sources: Vec<ConfiguredSource>,
        store: Arc<dyn BlobStore>,
        queue: Arc<dyn Queue>,
    ) -> Collector {
        let dedup = DedupStore::new(store.clone(), 14);
        Collector::new(sources, store, queue, dedup, "collector")
    }

    #[tokio::test]
    async fn emits_one_message_per_accepted_item() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(MemoryQueue::new("content-processing-requests"));
        let source = Arc::new(FakeSource {
            items: vec![item("reddit_a", "First story", 50), item("reddit_b", "Second story", 60)],
            fail: false,
        });
        let collector = collector(vec![configured(source, 25)], store.clone(), queue.clone());

        let stats = collector.collect().await.unwrap();
        assert_eq!(stats.published, 2);
        assert_eq!(queue.len().await.unwrap(), 2);

        // Audit record exists and references both items.
        let keys = store.list("collected-content/").await.unwrap();
        assert_eq!(keys.len(), 1);
        let (bytes, _) = store.get(&keys[0]).await.unwrap();
        let record: CollectionRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.items.len(), 2);

        // Messages parse as process_topic envelopes referencing the blob.
        let delivery = queue
            .receive(1, std::time::Duration::from_secs(5))
            .await
            .unwrap()
            .remove(0);
        let envelope = Envelope::<ProcessTopicPayload>::from_json(
            &delivery.body,
            Operation::ProcessTopic,
        )
        .unwrap();
        assert_eq!(envelope.payload.collection_blob, keys[0]);
    }

    #[tokio::test]
    async fn duplicate_across_runs_is_rejected() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(MemoryQueue::new("q"));
        let source = Arc::new(FakeSource {
            items: vec![item("reddit_a", "Same story", 50)],
            fail: false,
        });

        let first = collector(
            vec![configured(source.clone(), 25)],
            store.clone(),
            queue.clone(),
        );
        assert_eq!(first.collect().await.unwrap().published, 1);

        // Two hours later, another run sees the same content.
        let second = collector(vec![configured(source, 25)], store.clone(), queue.clone());
        let stats = second.collect().await.unwrap();
        assert_eq!(stats.published, 0);
        assert_eq!(stats.rejected_dedup, 1);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_within_run_across_sources_is_rejected() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(MemoryQueue::new("q"));
        // Same content, different native ids.
        let a = Arc::new(FakeSource {
            items: vec![item("reddit_a", "Same story", 50)],
            fail: false,
        });
        let b = Arc::new(FakeSource {
            items: vec![item("reddit_b", "Same story", 60)],
            fail: false,
        });
        let collector = collector(
            vec![configured(a, 25), configured(b, 25)],
            store,
            queue.clone(),
        );

        let stats = collector.collect().await.unwrap();
        assert_eq!(stats.published, 1);
        assert_eq!(stats.rejected_dedup, 1);
    }

    #[tokio::test]
    async fn source_outage_fails_only_that_source() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(MemoryQueue::new("q"));
        let healthy = Arc::new(FakeSource {
            items: vec![item("reddit_a", "Healthy source story", 50)],
            fail: false,
        });
        let broken = Arc::new(FakeSource {
            items: vec![],
            fail: true,
        });
        let collector = collector(
            vec![configured(broken, 25), configured(healthy, 25)],
            store.clone(),
            queue,
        );

        let stats = collector.collect().await.unwrap();
        assert_eq!(stats.sources_failed, 1);
        assert_eq!(stats.sources_ok, 1);
        assert_eq!(stats.published, 1);

        let keys = store.list("collected-content/").await.unwrap();
        let (bytes, _) = store.get(&keys[0]).await.unwrap();
        let record: CollectionRecord = serde_json::from_slice(&bytes).unwrap();
        assert!(record.sources.iter().any(|s| !s.ok && s.error.is_some()));
    }

    #[tokio::test]
    async fn quality_rejections_are_counted_not_errors() {
        let store: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(MemoryQueue::new("q"));
        let source = Arc::new(FakeSource {
            items: vec![item("reddit_a", "Low score story", 3)],
            fail: false,
        });
        let collector = collector(vec![configured(source, 25)], store, queue.clone());

        let stats = collector.collect().await.unwrap();
        assert_eq!(stats.rejected_quality, 1);
        assert_eq!(stats.published, 0);
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
