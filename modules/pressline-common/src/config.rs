use std::env;
use std::path::PathBuf;

use crate::quality::{
    DEFAULT_MIN_BOOSTS_MASTODON, DEFAULT_MIN_QUALITY_SCORE, DEFAULT_MIN_SCORE_REDDIT,
    DEFAULT_MIN_WORD_COUNT,
};

/// Application configuration loaded from environment variables. Constructed
/// once at process startup and passed into every operation; no hidden
/// singletons.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name this worker stamps into queue envelopes.
    pub service_name: String,

    // Storage roots
    pub blob_root: PathBuf,
    pub queue_root: PathBuf,

    // Worker trigger surface
    pub http_port: u16,

    // OpenAI
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_qpm: u32,
    pub openai_deadline_seconds: u64,

    // Collector sources
    pub reddit_subreddits: Vec<String>,
    pub reddit_sort: String,
    pub mastodon_instances: Vec<String>,
    pub rss_feeds: Vec<String>,
    pub max_items_per_source: u32,
    pub reddit_qpm: u32,
    pub mastodon_qpm: u32,

    // Quality gates
    pub min_score_reddit: u32,
    pub min_boosts_mastodon: u32,
    pub min_comments: u32,
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,

    // Dedup
    pub dedup_window_days: i64,

    // Leases
    pub lease_ttl_seconds: u64,

    // Rate-limit backoff ceiling
    pub max_backoff_seconds: u64,

    // Processor
    pub max_articles_per_run: u32,
    pub min_word_count: u32,
    pub min_quality_score: f32,

    // Publisher
    pub build_timeout_seconds: u64,
    pub site_builder_bin: String,
    pub site_skeleton: Option<PathBuf>,

    // Worker runtime
    pub max_deliveries: u32,
    pub idle_shutdown_seconds: u64,
    pub disable_auto_shutdown: bool,
}

impl Config {
    /// Shared defaults for every worker. Worker-specific constructors layer
    /// their required variables on top.
    fn base(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            blob_root: PathBuf::from(env::var("BLOB_ROOT").unwrap_or_else(|_| "data/blobs".into())),
            queue_root: PathBuf::from(
                env::var("QUEUE_ROOT").unwrap_or_else(|_| "data/queues".into()),
            ),
            http_port: parsed_env("HTTP_PORT", 8080),
            openai_api_key: String::new(),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            openai_qpm: parsed_env("OPENAI_QPM", 60),
            openai_deadline_seconds: parsed_env("OPENAI_DEADLINE_SECONDS", 120),
            reddit_subreddits: csv_env("REDDIT_SUBREDDITS"),
            reddit_sort: env::var("REDDIT_SORT").unwrap_or_else(|_| "hot".to_string()),
            mastodon_instances: csv_env("MASTODON_INSTANCES"),
            rss_feeds: csv_env("RSS_FEEDS"),
            max_items_per_source: parsed_env("MAX_ITEMS_PER_SOURCE", 25),
            reddit_qpm: parsed_env("REDDIT_QPM", 60),
            mastodon_qpm: parsed_env("MASTODON_QPM", 60),
            min_score_reddit: parsed_env("MIN_SCORE_REDDIT", DEFAULT_MIN_SCORE_REDDIT),
            min_boosts_mastodon: parsed_env("MIN_BOOSTS_MASTODON", DEFAULT_MIN_BOOSTS_MASTODON),
            min_comments: parsed_env("MIN_COMMENTS", 0),
            include_keywords: csv_env("INCLUDE_KEYWORDS"),
            exclude_keywords: csv_env("EXCLUDE_KEYWORDS"),
            dedup_window_days: parsed_env("DEDUP_WINDOW_DAYS", 14),
            lease_ttl_seconds: parsed_env("LEASE_TTL_SECONDS", 900),
            max_backoff_seconds: parsed_env("MAX_BACKOFF_SECONDS", 300),
            max_articles_per_run: parsed_env("MAX_ARTICLES_PER_RUN", 100),
            min_word_count: parsed_env("MIN_WORD_COUNT", DEFAULT_MIN_WORD_COUNT),
            min_quality_score: parsed_env("MIN_QUALITY_SCORE", DEFAULT_MIN_QUALITY_SCORE),
            build_timeout_seconds: parsed_env("BUILD_TIMEOUT_SECONDS", 300),
            site_builder_bin: env::var("SITE_BUILDER_BIN").unwrap_or_else(|_| "hugo".to_string()),
            site_skeleton: env::var("SITE_SKELETON").ok().map(PathBuf::from),
            max_deliveries: parsed_env("MAX_DELIVERIES", 5),
            idle_shutdown_seconds: parsed_env("IDLE_SHUTDOWN_SECONDS", 60),
            disable_auto_shutdown: env::var("DISABLE_AUTO_SHUTDOWN")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Load config for the collector. Sources come from env; at least one
    /// source kind must be configured.
    pub fn collector_from_env() -> Self {
        let config = Self::base("collector");
        if config.reddit_subreddits.is_empty()
            && config.mastodon_instances.is_empty()
            && config.rss_feeds.is_empty()
        {
            panic!("At least one of REDDIT_SUBREDDITS, MASTODON_INSTANCES, RSS_FEEDS is required");
        }
        config
    }

    /// Load config for the processor (lease-guarded article generation).
    pub fn processor_from_env() -> Self {
        let mut config = Self::base("processor");
        config.openai_api_key = required_env("OPENAI_API_KEY");
        config
    }

    /// Load config for the markdown generator.
    pub fn markdown_from_env() -> Self {
        Self::base("markdown-generator")
    }

    /// Load config for the site publisher.
    pub fn publisher_from_env() -> Self {
        Self::base("site-publisher")
    }

    /// Log each sensitive variable's presence without its value.
    pub fn log_redacted(&self) {
        if self.openai_api_key.is_empty() {
            tracing::info!("OPENAI_API_KEY = (empty)");
        } else {
            tracing::info!("OPENAI_API_KEY = ({} chars)", self.openai_api_key.len());
        }
        tracing::info!(blob_root = %self.blob_root.display(), queue_root = %self.queue_root.display(), "storage roots");
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn csv_env(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
