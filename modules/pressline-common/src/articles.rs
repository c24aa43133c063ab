use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version stamped into article metadata so downstream consumers can detect
/// contract changes.
pub const METADATA_CONTRACT_VERSION: &str = "1.0";

/// A source item after normalization: the uniform record every adapter maps
/// its wire format into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedItem {
    /// Globally unique, stable: `{source}_{native_id}`. The idempotency key
    /// for all downstream processing.
    pub id: String,
    pub title: String,
    pub content: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    pub native_score: u32,
    pub comments: u32,
    pub collected_at: DateTime<Utc>,
    #[serde(default)]
    pub source_metadata: serde_json::Value,
}

/// Per-source outcome recorded in the collection blob. A failed source does
/// not abort the run; it is recorded here for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub kind: String,
    pub ok: bool,
    pub items: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Audit artifact for one collector run: written once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub collection_id: Uuid,
    pub collected_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    pub items: Vec<NormalizedItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleCosts {
    pub usd: f64,
    pub model: String,
    pub tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleMetadata {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    pub processed_at: DateTime<Utc>,
    pub contract_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub source_name: String,
}

/// Output of the processor. `slug`, `filename`, and `url` are derived once by
/// the metadata step and are the single source of truth downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedArticle {
    pub article_id: Uuid,
    pub original_topic_id: String,
    pub title: String,
    pub seo_title: String,
    pub meta_description: String,
    pub slug: String,
    pub filename: String,
    pub url: String,
    pub content: String,
    pub word_count: u32,
    pub quality_score: f32,
    pub metadata: ArticleMetadata,
    pub provenance: Vec<Provenance>,
    pub costs: ArticleCosts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Completed,
    BelowQuality,
    Failed,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Completed => write!(f, "completed"),
            AttemptOutcome::BelowQuality => write!(f, "below_quality"),
            AttemptOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// One processing attempt for a topic. Stored under the topic's attempts
/// prefix so a reclaimed lease holder starts with the research in hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub research_notes: Option<String>,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub outcome: AttemptOutcome,
}

/// Durable per-topic state. `first_processed_at` pins the filename date so
/// retries spanning midnight UTC cannot drift the name; `slug`, `filename`,
/// and `article_blob` are recorded on first success so a replayed message
/// short-circuits to the already-committed output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicState {
    pub topic_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_processed_at: Option<DateTime<Utc>>,
    pub attempt_count: u32,
    pub total_cost_usd: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_blob: Option<String>,
    /// Set when the topic failed non-retryably; downstream is never notified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<String>,
}

impl TopicState {
    pub fn new(topic_id: &str) -> Self {
        Self {
            topic_id: topic_id.to_string(),
            first_processed_at: None,
            attempt_count: 0,
            total_cost_usd: 0.0,
            slug: None,
            filename: None,
            article_blob: None,
            terminal: None,
        }
    }
}
