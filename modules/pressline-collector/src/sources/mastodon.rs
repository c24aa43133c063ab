// Mastodon source: public trends API per instance, no auth. Status bodies
// arrive as HTML; tags are stripped before normalization.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use pressline_common::{NormalizedItem, PipelineError, Result};
use pressline_store::RateLimiter;

use super::reddit::retry_after_header;
use super::{SourceAdapter, SourceKind, SourceSpec};

const USER_AGENT: &str = "pressline-collector/0.1";
const FETCH_DEADLINE: Duration = Duration::from_secs(60);

pub struct MastodonSource {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl MastodonSource {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to build mastodon HTTP client");
        Self { client, limiter }
    }
}

#[async_trait]
impl SourceAdapter for MastodonSource {
    async fn fetch(&self, spec: &SourceSpec) -> Result<Vec<NormalizedItem>> {
        let base = spec.target.trim_end_matches('/');
        let url = format!("{base}/api/v1/trends/statuses?limit={}", spec.max_items);
        info!(instance = %spec.target, "mastodon: fetching trending statuses");

        self.limiter.acquire(FETCH_DEADLINE).await?;
        let response = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| PipelineError::transient(format!("mastodon fetch: {e}")))?;

        if response.status().as_u16() == 429 {
            let retry_after = retry_after_header(&response);
            self.limiter.on_failure(retry_after).await;
            return Err(PipelineError::rate_limited("mastodon trends", retry_after));
        }
        if !response.status().is_success() {
            self.limiter.on_failure(None).await;
            return Err(PipelineError::transient(format!(
                "mastodon trends returned {}",
                response.status()
            )));
        }
        self.limiter.on_success().await;

        let statuses: Vec<Status> = response
            .json()
            .await
            .map_err(|e| PipelineError::transient(format!("mastodon trends body: {e}")))?;

        let instance_host = host_of(base);
        let now = Utc::now();
        let items = statuses
            .into_iter()
            .filter_map(|status| {
                let text = strip_html(&status.content);
                if text.trim().is_empty() {
                    return None;
                }
                // Statuses have no separate title; the first sentence stands in.
                let title = first_sentence(&text);
                Some(NormalizedItem {
                    id: format!("mastodon_{instance_host}_{}", status.id),
                    title,
                    content: text,
                    source: "mastodon".to_string(),
                    url: status.url,
                    author: status.account.map(|a| a.acct),
                    subreddit: None,
                    native_score: status.reblogs_count,
                    comments: status.replies_count,
                    collected_at: now,
                    source_metadata: serde_json::json!({
                        "instance": instance_host,
                        "favourites": status.favourites_count,
                        "created_at": status.created_at,
                    }),
                })
            })
            .take(spec.max_items as usize)
            .collect();

        Ok(items)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Mastodon
    }
}

fn host_of(base: &str) -> String {
    url::Url::parse(base)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
        .unwrap_or_else(|| base.to_string())
}

/// Drop tags, decode the handful of entities Mastodon emits, collapse the
/// paragraph breaks `<p>`/`<br>` imply.
fn strip_html(html: &str) -> String {
    let with_breaks = html
        .replace("</p>", "\n")
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");
    let tag_re = regex::Regex::new(r"<[^>]+>").expect("Invalid HTML tag regex");
    let stripped = tag_re.replace_all(&with_breaks, "");
    stripped
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn first_sentence(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    let sentence = first_line
        .split_inclusive(['.', '!', '?'])
        .next()
        .unwrap_or(first_line);
    let trimmed = sentence.trim().trim_end_matches(['.', '!', '?']);
    if trimmed.chars().count() > 100 {
        let cut: String = trimmed.chars().take(100).collect();
        match cut.rfind(' ') {
            Some(i) => cut[..i].to_string(),
            None => cut,
        }
    } else {
        trimmed.to_string()
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    content: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    account: Option<Account>,
    #[serde(default)]
    reblogs_count: u32,
    #[serde(default)]
    replies_count: u32,
    #[serde(default)]
    favourites_count: u32,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Account {
    acct: String,
}
