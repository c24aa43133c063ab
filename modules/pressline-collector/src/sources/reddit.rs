// Reddit source: public listing API, no auth. One request per subreddit,
// filtered down to text-bearing posts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use pressline_common::{NormalizedItem, PipelineError, Result};
use pressline_store::RateLimiter;

use super::{SourceAdapter, SourceKind, SourceSpec};

const USER_AGENT: &str = "pressline-collector/0.1";
const FETCH_DEADLINE: Duration = Duration::from_secs(60);

pub struct RedditSource {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
}

impl RedditSource {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to build reddit HTTP client");
        Self { client, limiter }
    }
}

#[async_trait]
impl SourceAdapter for RedditSource {
    async fn fetch(&self, spec: &SourceSpec) -> Result<Vec<NormalizedItem>> {
        let url = format!(
            "https://www.reddit.com/r/{}/{}.json?limit={}",
            spec.target, spec.sort, spec.max_items
        );
        info!(subreddit = %spec.target, sort = %spec.sort, "reddit: fetching listing");

        self.limiter.acquire(FETCH_DEADLINE).await?;
        let response = self
            .client
            .get(&url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .map_err(|e| PipelineError::transient(format!("reddit fetch: {e}")))?;

        if response.status().as_u16() == 429 {
            let retry_after = retry_after_header(&response);
            self.limiter.on_failure(retry_after).await;
            return Err(PipelineError::rate_limited("reddit listing", retry_after));
        }
        if !response.status().is_success() {
            self.limiter.on_failure(None).await;
            return Err(PipelineError::transient(format!(
                "reddit listing returned {}",
                response.status()
            )));
        }
        self.limiter.on_success().await;

        let listing: Listing = response
            .json()
            .await
            .map_err(|e| PipelineError::transient(format!("reddit listing body: {e}")))?;

        let now = Utc::now();
        let items = listing
            .data
            .children
            .into_iter()
            .filter_map(|child| {
                let post = child.data;
                let body = post.selftext.unwrap_or_default();
                if post.title.trim().is_empty() {
                    return None;
                }
                Some(NormalizedItem {
                    id: format!("reddit_{}", post.id),
                    title: post.title,
                    content: body,
                    source: "reddit".to_string(),
                    url: post
                        .permalink
                        .map(|p| format!("https://www.reddit.com{p}")),
                    author: post.author,
                    subreddit: Some(spec.target.clone()),
                    native_score: post.score.max(0) as u32,
                    comments: post.num_comments.max(0) as u32,
                    collected_at: now,
                    source_metadata: serde_json::json!({
                        "created_utc": post.created_utc,
                        "over_18": post.over_18,
                    }),
                })
            })
            .take(spec.max_items as usize)
            .collect();

        Ok(items)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Reddit
    }
}

pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

// --- Wire types (listing API) ---

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: Post,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: String,
    title: String,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    created_utc: Option<f64>,
    #[serde(default)]
    over_18: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_parses_reddit_shape() {
        let json = r#"{
            "data": {"children": [
                {"data": {"id": "abc", "title": "AI Breakthrough",
                          "selftext": "Details inside", "author": "u1",
                          "permalink": "/r/rust/comments/abc/ai/",
                          "score": 120, "num_comments": 34,
                          "created_utc": 1760954400.0, "over_18": false}}
            ]}
        }"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.data.children.len(), 1);
        assert_eq!(listing.data.children[0].data.score, 120);
    }

    #[test]
    fn negative_scores_clamp_to_zero() {
        let json = r#"{"data": {"children": [
            {"data": {"id": "x", "title": "t", "score": -5, "num_comments": 0}}
        ]}}"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.data.children[0].data.score.max(0) as u32, 0);
    }
}
