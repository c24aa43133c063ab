//! Render a processed article into Markdown with YAML front-matter. The
//! output filename is the article's `filename` field with the extension
//! swapped to `.md`; any divergence is a contract violation and fails the
//! message before anything is written.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use pressline_common::naming;
use pressline_common::{
    Envelope, GenerateMarkdownPayload, Operation, PipelineError, ProcessedArticle,
    PublishSitePayload, Result,
};
use pressline_store::blob::get_json;
use pressline_store::{layout, BlobStore, Queue};

#[derive(Debug, Serialize)]
struct FrontMatter<'a> {
    title: &'a str,
    date: String,
    slug: &'a str,
    url: &'a str,
    source: &'a str,
    description: &'a str,
    tags: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cost_usd: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct RenderResult {
    pub success: bool,
    pub markdown_blob_path: String,
    pub filename: String,
}

pub struct MarkdownGenerator {
    store: Arc<dyn BlobStore>,
    publishing_queue: Arc<dyn Queue>,
    service_name: String,
    include_costs: bool,
}

impl MarkdownGenerator {
    pub fn new(
        store: Arc<dyn BlobStore>,
        publishing_queue: Arc<dyn Queue>,
        service_name: &str,
    ) -> Self {
        Self {
            store,
            publishing_queue,
            service_name: service_name.to_string(),
            include_costs: true,
        }
    }

    /// Render one article blob to markdown and signal the publisher. The
    /// publisher's scaler coalesces the resulting trigger storm; duplicate
    /// triggers are benign.
    pub async fn render_markdown(
        &self,
        payload: &GenerateMarkdownPayload,
        correlation_id: uuid::Uuid,
    ) -> Result<RenderResult> {
        let (article, _) = get_json::<ProcessedArticle>(self.store.as_ref(), &payload.article_blob)
            .await
            .map_err(|e| match e {
                pressline_store::StoreError::NotFound(k) => {
                    PipelineError::NotFound(format!("article blob {k}"))
                }
                other => PipelineError::transient(format!("article read: {other}")),
            })?;

        // Filename equality with the article record, and with the message
        // that carried it, is enforced rather than assumed.
        if article.filename != payload.filename {
            return Err(PipelineError::validation(format!(
                "filename drift: article has {:?}, message has {:?}",
                article.filename, payload.filename
            )));
        }
        let stem = naming::stem(&article.filename);
        let markdown_name = format!("{stem}.md");
        if !naming::is_valid_filename(&markdown_name) {
            return Err(PipelineError::validation(format!(
                "markdown filename violates grammar: {markdown_name:?}"
            )));
        }

        let document = render_document(&article, self.include_costs)?;
        let markdown_blob = layout::markdown_blob(article.metadata.processed_at, stem);
        self.store
            .put(&markdown_blob, document.into())
            .await
            .map_err(|e| PipelineError::transient(format!("markdown write: {e}")))?;

        let envelope = Envelope::new(
            Operation::PublishSite,
            &self.service_name,
            PublishSitePayload {
                trigger: "markdown_complete".to_string(),
                timestamp: Utc::now(),
            },
        )
        .with_correlation(correlation_id);
        self.publishing_queue
            .send(envelope.to_json()?)
            .await
            .map_err(|e| PipelineError::transient(format!("publish enqueue: {e}")))?;

        info!(markdown_blob, filename = %markdown_name, "markdown rendered");
        Ok(RenderResult {
            success: true,
            markdown_blob_path: markdown_blob,
            filename: markdown_name,
        })
    }
}

fn render_document(article: &ProcessedArticle, include_costs: bool) -> Result<String> {
    let front = FrontMatter {
        title: &article.title,
        date: article.metadata.processed_at.format("%Y-%m-%d").to_string(),
        slug: &article.slug,
        url: &article.url,
        source: &article.metadata.source,
        description: &article.meta_description,
        tags: article
            .metadata
            .subreddit
            .as_deref()
            .into_iter()
            .chain(std::iter::once(article.metadata.source.as_str()))
            .collect(),
        cost_usd: include_costs.then_some(article.costs.usd),
    };
    let yaml = serde_yaml::to_string(&front)
        .map_err(|e| PipelineError::validation(format!("front-matter serialization: {e}")))?;
    // Body is the article text verbatim.
    Ok(format!("---\n{yaml}---\n\n{}\n", article.content))
}

/// Queue-facing adapter.
pub struct MarkdownHandler {
    pub generator: MarkdownGenerator,
}

#[async_trait]
impl pressline_worker::Handler for MarkdownHandler {
    async fn handle(&self, body: &str) -> Result<()> {
        let envelope =
            Envelope::<GenerateMarkdownPayload>::from_json(body, Operation::GenerateMarkdown)?;
        self.generator
            .render_markdown(&envelope.payload, envelope.correlation_id)
            .await
            .map(|_| ())
    }
}
