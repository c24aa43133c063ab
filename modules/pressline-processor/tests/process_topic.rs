//! End-to-end topic processing over the in-memory backends with a scripted
//! model.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use ai_client::{AiError, GenerationRequest, GenerationResponse, TextGenerator};
use pressline_common::{
    CollectionRecord, Config, Envelope, GenerateMarkdownPayload, NormalizedItem, Operation,
    ProcessTopicPayload, ProcessedArticle, SourceOutcome,
};
use pressline_processor::Processor;
use pressline_store::blob::put_json;
use pressline_store::{layout, BlobStore, LeaseManager, MemoryBlobStore, MemoryQueue, Queue};

/// Scripted model: answers by prompt kind, counts article generations, and
/// can force the first N drafts to come out short.
struct FakeModel {
    article_calls: AtomicU32,
    short_drafts_first: u32,
    translation: &'static str,
}

impl FakeModel {
    fn new() -> Self {
        Self {
            article_calls: AtomicU32::new(0),
            short_drafts_first: 0,
            translation: "US Administration Hawks on China Show Concern",
        }
    }

    fn with_short_drafts(short_drafts_first: u32) -> Self {
        Self {
            short_drafts_first,
            ..Self::new()
        }
    }

    fn long_article() -> String {
        let mut out = String::from("# Overview\n\n");
        for section in 0..8 {
            out.push_str(&format!("## Part {section}\n\n"));
            out.push_str(&"substantive reporting sentence words here ".repeat(30));
            out.push_str("\n\n");
        }
        out
    }
}

#[async_trait]
impl TextGenerator for FakeModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AiError> {
        let text = if request.system.contains("translate") {
            self.translation.to_string()
        } else if request.system.contains("SEO") {
            "Concise SEO Title\nA meta description for search engines.".to_string()
        } else {
            let call = self.article_calls.fetch_add(1, Ordering::SeqCst);
            if call < self.short_drafts_first {
                "A draft that is far too short.".to_string()
            } else {
                Self::long_article()
            }
        };
        Ok(GenerationResponse {
            text,
            model: "gpt-4o-mini".to_string(),
            prompt_tokens: 500,
            completion_tokens: 1500,
        })
    }

    fn model(&self) -> &str {
        "gpt-4o-mini"
    }
}

fn test_config() -> Config {
    // Env-free construction for tests.
    let mut config = Config::markdown_from_env();
    config.service_name = "processor".into();
    config.openai_qpm = 6000;
    config.min_word_count = 600;
    config.min_quality_score = 0.55;
    config.lease_ttl_seconds = 900;
    config
}

struct Harness {
    store: Arc<MemoryBlobStore>,
    markdown_queue: Arc<MemoryQueue>,
    processor: Processor,
}

fn harness(model: FakeModel) -> Harness {
    let store = Arc::new(MemoryBlobStore::new());
    let markdown_queue = Arc::new(MemoryQueue::new("markdown-generation-requests"));
    let processor = Processor::new(
        &test_config(),
        store.clone(),
        markdown_queue.clone(),
        Arc::new(model),
    );
    Harness {
        store,
        markdown_queue,
        processor,
    }
}

async fn seed_topic(store: &dyn BlobStore, topic_id: &str, title: &str) -> ProcessTopicPayload {
    let collection_id = Uuid::new_v4();
    let collected_at = Utc::now();
    let item = NormalizedItem {
        id: topic_id.to_string(),
        title: title.to_string(),
        content: "Original post body with source details.".to_string(),
        source: "reddit".to_string(),
        url: Some("https://www.reddit.com/r/technology/abc".to_string()),
        author: Some("poster".to_string()),
        subreddit: Some("technology".to_string()),
        native_score: 120,
        comments: 40,
        collected_at,
        source_metadata: serde_json::Value::Null,
    };
    let record = CollectionRecord {
        collection_id,
        collected_at,
        sources: vec![SourceOutcome {
            kind: "reddit".into(),
            ok: true,
            items: 1,
            error: None,
        }],
        items: vec![item],
    };
    let collection_blob = layout::collection_blob(collected_at, collection_id);
    put_json(store, &collection_blob, &record).await.unwrap();

    ProcessTopicPayload {
        topic_id: topic_id.to_string(),
        title: title.to_string(),
        source: "reddit".to_string(),
        url: Some("https://www.reddit.com/r/technology/abc".to_string()),
        upvotes: Some(120),
        comments: Some(40),
        subreddit: Some("technology".to_string()),
        collected_at,
        priority_score: 200.0,
        collection_id,
        collection_blob,
    }
}

#[tokio::test]
async fn happy_path_derives_consistent_names_and_emits_trigger() {
    let h = harness(FakeModel::new());
    let payload = seed_topic(h.store.as_ref(), "reddit_abc", "AI Breakthrough").await;

    let outcome = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap();
    assert!(outcome.success);
    let filename = outcome.filename.unwrap();

    // Filename matches the grammar and the URL derives from the same string.
    assert!(pressline_common::is_valid_filename(&filename));
    assert!(filename.ends_with("-ai-breakthrough.html"));

    let article_keys = h.store.list("processed-content/").await.unwrap();
    assert_eq!(article_keys.len(), 1);
    let (bytes, _) = h.store.get(&article_keys[0]).await.unwrap();
    let article: ProcessedArticle = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(article.filename, filename);
    assert_eq!(article.url, format!("/articles/{filename}"));
    assert!(article.word_count >= 600);
    assert!(article.seo_title.chars().count() <= 60);
    assert!(article.meta_description.chars().count() <= 160);
    assert!(article.costs.usd > 0.0);

    // Downstream message references the committed blob and carries the
    // filename verbatim.
    let delivery = h
        .markdown_queue
        .receive(1, Duration::from_secs(5))
        .await
        .unwrap()
        .remove(0);
    let envelope =
        Envelope::<GenerateMarkdownPayload>::from_json(&delivery.body, Operation::GenerateMarkdown)
            .unwrap();
    assert_eq!(envelope.payload.article_blob, article_keys[0]);
    assert_eq!(envelope.payload.filename, filename);

    // Lease is gone after completion.
    assert!(h.store.get(&layout::lease_blob("reddit_abc")).await.is_err());
}

#[tokio::test]
async fn replay_is_idempotent_and_byte_identical() {
    let h = harness(FakeModel::new());
    let payload = seed_topic(h.store.as_ref(), "reddit_abc", "AI Breakthrough").await;

    h.processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap();
    let keys = h.store.list("processed-content/").await.unwrap();
    let (before, _) = h.store.get(&keys[0]).await.unwrap();

    // Replay the same message.
    let outcome = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.cost_usd, 0.0);

    let keys_after = h.store.list("processed-content/").await.unwrap();
    assert_eq!(keys_after.len(), 1, "replay must not add articles");
    let (after, _) = h.store.get(&keys_after[0]).await.unwrap();
    assert_eq!(before, after, "replay must leave the blob byte-identical");

    // Both runs emitted a trigger; duplicates are benign downstream.
    assert_eq!(h.markdown_queue.len().await.unwrap(), 2);
}

#[tokio::test]
async fn held_lease_defers_processing() {
    let h = harness(FakeModel::new());
    let payload = seed_topic(h.store.as_ref(), "reddit_abc", "AI Breakthrough").await;

    // Another worker holds the lease.
    let other: Arc<dyn BlobStore> = h.store.clone();
    let foreign = LeaseManager::new(other, Duration::from_secs(900), "other-worker");
    let guard = foreign.acquire("reddit_abc").await.unwrap().unwrap();

    let err = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.markdown_queue.len().await.unwrap(), 0);

    guard.release().await.unwrap();

    // After release the redelivered message goes through.
    let outcome = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn non_ascii_title_is_translated_before_slugging() {
    let h = harness(FakeModel::new());
    let payload = seed_topic(h.store.as_ref(), "rss_jp1", "米政権内の対中強硬派に焦り").await;

    let outcome = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap();
    let filename = outcome.filename.unwrap();
    assert!(filename.ends_with("-us-administration-hawks-on-china-show-concern.html"));
    assert!(pressline_common::is_valid_filename(&filename));
}

#[tokio::test]
async fn below_quality_draft_is_retried_with_prior_draft_preserved() {
    let h = harness(FakeModel::with_short_drafts(1));
    let payload = seed_topic(h.store.as_ref(), "reddit_abc", "AI Breakthrough").await;

    // First pass: short draft, released without completion.
    let err = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.markdown_queue.len().await.unwrap(), 0);

    // The attempt record preserved the draft.
    let attempt_keys = h.store.list("topics/reddit_abc/attempts/").await.unwrap();
    assert_eq!(attempt_keys.len(), 1);

    // Redelivery: second draft passes and the article ships.
    let outcome = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap();
    assert!(outcome.success);
    assert_eq!(h.markdown_queue.len().await.unwrap(), 1);

    // Both attempts are on record now.
    let attempt_keys = h.store.list("topics/reddit_abc/attempts/").await.unwrap();
    assert_eq!(attempt_keys.len(), 2);
}

#[tokio::test]
async fn missing_topic_in_collection_is_terminal() {
    let h = harness(FakeModel::new());
    let mut payload = seed_topic(h.store.as_ref(), "reddit_abc", "AI Breakthrough").await;
    payload.topic_id = "reddit_missing".to_string();

    let outcome = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert!(outcome.error.is_some());

    // Terminal marker written; downstream never notified; replay consumes.
    assert_eq!(h.markdown_queue.len().await.unwrap(), 0);
    let outcome = h
        .processor
        .process_topic(&payload, Uuid::new_v4())
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(h.store.list("processed-content/").await.unwrap().len(), 0);
}
