//! SEO metadata generation: the one place slug, filename, and url are
//! derived. Non-English titles go through a short translation prompt first;
//! the derived names must pass the filename grammar or the topic fails.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use ai_client::{prompts, TextGenerator};
use pressline_common::naming;
use pressline_common::{PipelineError, Result};
use pressline_store::RateLimiter;

pub const MAX_SEO_TITLE: usize = 60;
pub const MAX_META_DESCRIPTION: usize = 160;

/// A slug shorter than this means the title did not survive ASCII folding
/// and needs translation.
const MIN_USABLE_SLUG: usize = 3;

#[derive(Debug, Clone)]
pub struct ArticleNaming {
    pub display_title: String,
    pub slug: String,
    pub filename: String,
    pub url: String,
    pub seo_title: String,
    pub meta_description: String,
}

pub struct MetadataGenerator {
    generator: Arc<dyn TextGenerator>,
    limiter: Arc<RateLimiter>,
    deadline: Duration,
}

impl MetadataGenerator {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        limiter: Arc<RateLimiter>,
        deadline: Duration,
    ) -> Self {
        Self {
            generator,
            limiter,
            deadline,
        }
    }

    /// Derive the full naming set. `processed_at` is the topic's pinned
    /// first-success timestamp, so the result is stable across retries.
    pub async fn generate(
        &self,
        title: &str,
        article_excerpt: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<ArticleNaming> {
        let display_title = if naming::slugify(title).len() < MIN_USABLE_SLUG {
            let translated = self.call(prompts::translate_request(title)).await?;
            let translated = translated.trim().trim_matches('"').to_string();
            debug!(original = title, translated, "title translated");
            translated
        } else {
            title.to_string()
        };

        let slug = naming::slugify(&display_title);
        if slug.len() < MIN_USABLE_SLUG {
            return Err(PipelineError::validation(format!(
                "title does not reduce to a usable slug: {title:?}"
            )));
        }

        let filename = naming::filename_for(processed_at.date_naive(), &slug, "html");
        if !naming::is_valid_filename(&filename) {
            // Self-produced name outside the grammar is a contract bug worth
            // an audit record, not a retry.
            return Err(PipelineError::validation(format!(
                "derived filename violates grammar: {filename:?}"
            )));
        }
        let url = naming::article_url(&filename);

        let (seo_title, meta_description) = match self
            .call(prompts::seo_request(&display_title, article_excerpt))
            .await
        {
            Ok(text) => parse_seo(&text, &display_title, article_excerpt),
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(error = %e, "SEO prompt failed, falling back to derived metadata");
                fallback_seo(&display_title, article_excerpt)
            }
        };

        Ok(ArticleNaming {
            display_title,
            slug,
            filename,
            url,
            seo_title,
            meta_description,
        })
    }

    async fn call(&self, request: ai_client::GenerationRequest) -> Result<String> {
        self.limiter.acquire(self.deadline).await?;
        let result = tokio::time::timeout(self.deadline, self.generator.generate(&request)).await;
        match result {
            Ok(Ok(response)) => {
                self.limiter.on_success().await;
                Ok(response.text)
            }
            Ok(Err(ai_client::AiError::RateLimited { retry_after })) => {
                self.limiter.on_failure(retry_after).await;
                Err(PipelineError::rate_limited("metadata generation", retry_after))
            }
            Ok(Err(e)) if e.is_retryable() => {
                self.limiter.on_failure(None).await;
                Err(PipelineError::transient(format!("metadata generation: {e}")))
            }
            Ok(Err(e)) => Err(PipelineError::Fatal(format!("metadata generation: {e}"))),
            Err(_) => {
                self.limiter.on_failure(None).await;
                Err(PipelineError::transient("metadata generation deadline"))
            }
        }
    }
}

/// Expect "title\ndescription"; tolerate anything else by falling back.
fn parse_seo(text: &str, title: &str, excerpt: &str) -> (String, String) {
    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(t), Some(d)) => (
            truncate_chars(t, MAX_SEO_TITLE),
            truncate_chars(d, MAX_META_DESCRIPTION),
        ),
        _ => fallback_seo(title, excerpt),
    }
}

fn fallback_seo(title: &str, excerpt: &str) -> (String, String) {
    (
        truncate_chars(title, MAX_SEO_TITLE),
        truncate_chars(&excerpt.split_whitespace().collect::<Vec<_>>().join(" "), MAX_META_DESCRIPTION),
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}
