//! Topic processing: the lease-guarded heart of the pipeline. One topic in,
//! one processed-article blob and one markdown-generation message out, with
//! at-most-one concurrent processor per topic and idempotent re-execution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use ai_client::{cost, prompts, TextGenerator};
use pressline_common::{
    ArticleCosts, ArticleMetadata, AttemptOutcome, CollectionRecord, Config, Envelope,
    GenerateMarkdownPayload, NormalizedItem, Operation, PipelineError, ProcessTopicPayload,
    ProcessedArticle, Provenance, Result, METADATA_CONTRACT_VERSION,
};
use pressline_store::blob::{get_json, put_json};
use pressline_store::{layout, BlobStore, LeaseGuard, LeaseManager, Queue, RateLimiter};

use crate::assess;
use crate::attempts;
use crate::metadata::MetadataGenerator;

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub success: bool,
    pub article_id: Option<Uuid>,
    pub filename: Option<String>,
    pub cost_usd: f64,
    pub error: Option<String>,
}

impl ProcessOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            success: false,
            article_id: None,
            filename: None,
            cost_usd: 0.0,
            error: Some(reason.to_string()),
        }
    }
}

pub struct Processor {
    store: Arc<dyn BlobStore>,
    markdown_queue: Arc<dyn Queue>,
    leases: LeaseManager,
    generator: Arc<dyn TextGenerator>,
    limiter: Arc<RateLimiter>,
    metadata: MetadataGenerator,
    deadline: Duration,
    min_word_count: u32,
    min_quality_score: f32,
    service_name: String,
}

impl Processor {
    pub fn new(
        config: &Config,
        store: Arc<dyn BlobStore>,
        markdown_queue: Arc<dyn Queue>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        let owner_id = format!("{}-{}", config.service_name, Uuid::new_v4());
        let limiter = Arc::new(RateLimiter::per_minute(
            "openai",
            config.openai_qpm,
            Duration::from_secs(config.max_backoff_seconds),
        ));
        let deadline = Duration::from_secs(config.openai_deadline_seconds);
        Self {
            leases: LeaseManager::new(
                store.clone(),
                Duration::from_secs(config.lease_ttl_seconds),
                &owner_id,
            ),
            metadata: MetadataGenerator::new(generator.clone(), limiter.clone(), deadline),
            store,
            markdown_queue,
            generator,
            limiter,
            deadline,
            min_word_count: config.min_word_count,
            min_quality_score: config.min_quality_score,
            service_name: config.service_name.clone(),
        }
    }

    /// Process one topic message. Error semantics:
    /// retryable errors leave the message for redelivery; terminal topic
    /// failures write a marker, consume the message, and never notify
    /// downstream.
    pub async fn process_topic(
        &self,
        payload: &ProcessTopicPayload,
        correlation_id: Uuid,
    ) -> Result<ProcessOutcome> {
        let topic_id = &payload.topic_id;

        let Some(mut lease) = self
            .leases
            .acquire(topic_id)
            .await
            .map_err(|e| PipelineError::transient(format!("lease acquire: {e}")))?
        else {
            // Another worker owns the topic; the redelivered message will
            // find either a released lease or a committed article.
            return Err(PipelineError::transient("lease held by another worker"));
        };
        lease.spawn_renewal();

        let mut state = attempts::load_state(self.store.as_ref(), topic_id).await?;

        if let Some(reason) = &state.terminal {
            info!(topic_id, reason, "topic is terminal, consuming message");
            let outcome = ProcessOutcome::skipped(reason);
            lease.release().await.ok();
            return Ok(outcome);
        }

        // Idempotent replay: the article is already committed, so re-emit the
        // downstream trigger and leave the blob untouched.
        if let (Some(article_blob), Some(filename)) = (&state.article_blob, &state.filename) {
            if self.store.get(article_blob).await.is_ok() {
                info!(topic_id, article_blob, "article already processed, re-emitting trigger");
                self.emit_markdown(article_blob, topic_id, filename, correlation_id)
                    .await?;
                lease.release().await.ok();
                return Ok(ProcessOutcome {
                    success: true,
                    article_id: None,
                    filename: Some(filename.clone()),
                    cost_usd: 0.0,
                    error: None,
                });
            }
        }

        let result = self
            .run_attempt(payload, correlation_id, &mut state)
            .await;

        match result {
            Ok(outcome) => {
                lease.release().await.ok();
                Ok(outcome)
            }
            Err(e) if e.is_retryable() => {
                // Release so the next delivery retries promptly instead of
                // waiting out the TTL.
                lease.release().await.ok();
                Err(e)
            }
            Err(e) => {
                self.mark_terminal(&mut state, &e, lease).await;
                Ok(ProcessOutcome::skipped(&e.to_string()))
            }
        }
    }

    async fn run_attempt(
        &self,
        payload: &ProcessTopicPayload,
        correlation_id: Uuid,
        state: &mut pressline_common::TopicState,
    ) -> Result<ProcessOutcome> {
        let topic_id = &payload.topic_id;

        let prior = attempts::load_attempts(self.store.as_ref(), topic_id).await?;
        let prior_draft = attempts::latest_draft(&prior).map(String::from);

        let item = self.load_source_item(payload).await?;
        let source_context = source_context(&item);

        // Generate the draft.
        let request = prompts::article_request(&payload.title, &source_context, prior_draft.as_deref());
        let response = self.call_model(&request).await?;
        let tokens = response.total_tokens();
        let cost_usd = cost::cost_usd(&response.model, response.prompt_tokens, response.completion_tokens);
        let content = response.text;

        // Pin the naming date on the first successful generation, before any
        // name is derived, so retries after midnight cannot drift.
        let processed_at = match state.first_processed_at {
            Some(at) => at,
            None => {
                let now = Utc::now();
                state.first_processed_at = Some(now);
                attempts::save_state(self.store.as_ref(), state).await?;
                now
            }
        };

        // Quality gate: record the attempt and go around again.
        let word_count = assess::word_count(&content);
        let quality_score = assess::assess(&content);
        if word_count < self.min_word_count || quality_score < self.min_quality_score {
            info!(
                topic_id,
                word_count, quality_score, "draft below quality, releasing for another pass"
            );
            let attempt = attempts::new_attempt(
                Some(content),
                tokens,
                cost_usd,
                AttemptOutcome::BelowQuality,
            );
            attempts::record_attempt(self.store.as_ref(), topic_id, &attempt).await?;
            state.attempt_count += 1;
            state.total_cost_usd += cost_usd;
            attempts::save_state(self.store.as_ref(), state).await?;
            return Err(PipelineError::transient("draft below quality threshold"));
        }

        let excerpt: String = content.chars().take(600).collect();
        let naming = self
            .metadata
            .generate(&payload.title, &excerpt, processed_at)
            .await?;

        let article = ProcessedArticle {
            article_id: Uuid::new_v4(),
            original_topic_id: topic_id.clone(),
            title: naming.display_title.clone(),
            seo_title: naming.seo_title,
            meta_description: naming.meta_description,
            slug: naming.slug.clone(),
            filename: naming.filename.clone(),
            url: naming.url,
            content,
            word_count,
            quality_score,
            metadata: ArticleMetadata {
                source: payload.source.clone(),
                subreddit: payload.subreddit.clone(),
                processed_at,
                contract_version: METADATA_CONTRACT_VERSION.to_string(),
            },
            provenance: vec![Provenance {
                author: item.author.clone(),
                published_at: Some(item.collected_at.to_rfc3339()),
                source_url: item.url.clone(),
                source_name: item.source.clone(),
            }],
            costs: ArticleCosts {
                usd: state.total_cost_usd + cost_usd,
                model: self.generator.model().to_string(),
                tokens,
            },
        };

        let article_blob = layout::processed_blob(processed_at, &naming.slug);
        put_json(self.store.as_ref(), &article_blob, &article)
            .await
            .map_err(|e| PipelineError::transient(format!("article write: {e}")))?;

        // Commit the state pointer before signalling downstream: a crash
        // between the two replays into the idempotent shortcut instead of a
        // second generation.
        let attempt = attempts::new_attempt(None, tokens, cost_usd, AttemptOutcome::Completed);
        attempts::record_attempt(self.store.as_ref(), topic_id, &attempt).await?;
        state.attempt_count += 1;
        state.total_cost_usd += cost_usd;
        state.slug = Some(naming.slug);
        state.filename = Some(naming.filename.clone());
        state.article_blob = Some(article_blob.clone());
        attempts::save_state(self.store.as_ref(), state).await?;

        self.emit_markdown(&article_blob, topic_id, &naming.filename, correlation_id)
            .await?;

        info!(
            topic_id,
            article_blob,
            filename = %naming.filename,
            word_count,
            cost_usd,
            "topic processed"
        );

        Ok(ProcessOutcome {
            success: true,
            article_id: Some(article.article_id),
            filename: Some(naming.filename),
            cost_usd,
            error: None,
        })
    }

    async fn load_source_item(&self, payload: &ProcessTopicPayload) -> Result<NormalizedItem> {
        let (record, _) = get_json::<CollectionRecord>(self.store.as_ref(), &payload.collection_blob)
            .await
            .map_err(|e| match e {
                pressline_store::StoreError::NotFound(k) => {
                    PipelineError::NotFound(format!("collection blob {k}"))
                }
                other => PipelineError::transient(format!("collection read: {other}")),
            })?;
        record
            .items
            .into_iter()
            .find(|item| item.id == payload.topic_id)
            .ok_or_else(|| {
                PipelineError::validation(format!(
                    "topic {} not present in {}",
                    payload.topic_id, payload.collection_blob
                ))
            })
    }

    async fn call_model(
        &self,
        request: &ai_client::GenerationRequest,
    ) -> Result<ai_client::GenerationResponse> {
        self.limiter.acquire(self.deadline).await?;
        let result = tokio::time::timeout(self.deadline, self.generator.generate(request)).await;
        match result {
            Ok(Ok(response)) => {
                self.limiter.on_success().await;
                Ok(response)
            }
            Ok(Err(ai_client::AiError::RateLimited { retry_after })) => {
                self.limiter.on_failure(retry_after).await;
                Err(PipelineError::rate_limited("article generation", retry_after))
            }
            Ok(Err(e)) if e.is_retryable() => {
                self.limiter.on_failure(None).await;
                Err(PipelineError::transient(format!("article generation: {e}")))
            }
            Ok(Err(e)) => Err(PipelineError::Fatal(format!("article generation: {e}"))),
            Err(_) => {
                self.limiter.on_failure(None).await;
                Err(PipelineError::transient(format!(
                    "article generation exceeded {}s deadline",
                    self.deadline.as_secs()
                )))
            }
        }
    }

    async fn emit_markdown(
        &self,
        article_blob: &str,
        topic_id: &str,
        filename: &str,
        correlation_id: Uuid,
    ) -> Result<()> {
        let envelope = Envelope::new(
            Operation::GenerateMarkdown,
            &self.service_name,
            GenerateMarkdownPayload {
                article_blob: article_blob.to_string(),
                topic_id: topic_id.to_string(),
                filename: filename.to_string(),
            },
        )
        .with_correlation(correlation_id);
        self.markdown_queue
            .send(envelope.to_json()?)
            .await
            .map_err(|e| PipelineError::transient(format!("markdown enqueue: {e}")))?;
        Ok(())
    }

    /// Terminal failure: audit record in the topic state, lease released,
    /// message consumed, downstream silent.
    async fn mark_terminal(
        &self,
        state: &mut pressline_common::TopicState,
        error: &PipelineError,
        lease: LeaseGuard,
    ) {
        warn!(topic_id = %state.topic_id, error = %error, "topic failed terminally");
        state.terminal = Some(error.to_string());
        if let Err(e) = attempts::save_state(self.store.as_ref(), state).await {
            warn!(error = %e, "failed to persist terminal marker");
        }
        lease.release().await.ok();
    }
}

fn source_context(item: &NormalizedItem) -> String {
    let mut context = format!("Source: {}\n", item.source);
    if let Some(subreddit) = &item.subreddit {
        context.push_str(&format!("Subreddit: r/{subreddit}\n"));
    }
    if let Some(url) = &item.url {
        context.push_str(&format!("Link: {url}\n"));
    }
    context.push_str(&format!(
        "Score: {} | Comments: {}\n\n{}",
        item.native_score, item.comments, item.content
    ));
    context
}

/// Queue-facing adapter: parses the envelope and maps outcomes onto the
/// worker runtime's ack/redeliver/dead-letter semantics.
pub struct ProcessorHandler {
    pub processor: Processor,
}

#[async_trait]
impl pressline_worker::Handler for ProcessorHandler {
    async fn handle(&self, body: &str) -> Result<()> {
        let envelope = Envelope::<ProcessTopicPayload>::from_json(body, Operation::ProcessTopic)?;
        self.processor
            .process_topic(&envelope.payload, envelope.correlation_id)
            .await
            .map(|_| ())
    }
}
