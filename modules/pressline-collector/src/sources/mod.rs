//! Source adapters. Each adapter turns one external API into a bounded,
//! finite batch of normalized items; dispatch over [`SourceKind`] is a match,
//! not a hierarchy. Adapters own their HTTP details but share the caller's
//! rate limiter so per-source QPM holds across concurrent fetches.

pub mod feed;
pub mod mastodon;
pub mod reddit;

use std::sync::Arc;

use async_trait::async_trait;

use pressline_common::{NormalizedItem, Result};
use pressline_store::RateLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Reddit,
    Mastodon,
    Rss,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Reddit => write!(f, "reddit"),
            SourceKind::Mastodon => write!(f, "mastodon"),
            SourceKind::Rss => write!(f, "rss"),
        }
    }
}

/// One fetch target: a subreddit, an instance, or a feed URL.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    pub kind: SourceKind,
    /// Subreddit name, instance base URL, or feed URL.
    pub target: String,
    /// Listing sort for sources that support one (reddit).
    pub sort: String,
    pub max_items: u32,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch and normalize up to `spec.max_items` items. Implementations wait
    /// on the shared rate limiter before every outbound request.
    async fn fetch(&self, spec: &SourceSpec) -> Result<Vec<NormalizedItem>>;

    fn kind(&self) -> SourceKind;
}

/// Build the adapter for a source kind, sharing that kind's rate limiter.
pub fn adapter_for(kind: SourceKind, limiter: Arc<RateLimiter>) -> Arc<dyn SourceAdapter> {
    match kind {
        SourceKind::Reddit => Arc::new(reddit::RedditSource::new(limiter)),
        SourceKind::Mastodon => Arc::new(mastodon::MastodonSource::new(limiter)),
        SourceKind::Rss => Arc::new(feed::FeedSource::new(limiter)),
    }
}
