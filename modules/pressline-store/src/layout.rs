//! Deterministic blob key layout. Every stage's output key is a pure
//! function of its inputs, so re-execution overwrites the same blob.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const WEB_PREFIX: &str = "$web";
pub const BACKUP_PREFIX: &str = "backup";
pub const MARKDOWN_PREFIX: &str = "markdown-content";

/// `collected-content/{YYYY}/{MM}/{DD}/{collection_id}.json`
pub fn collection_blob(collected_at: DateTime<Utc>, collection_id: Uuid) -> String {
    format!(
        "collected-content/{}/{collection_id}.json",
        collected_at.format("%Y/%m/%d")
    )
}

/// `processed-content/{YYYY}/{MM}/{DD}/{YYYYMMDD-HHMMSS}-{slug}.json`
///
/// The timestamp is the topic's pinned `first_processed_at`, so the key is
/// stable across retries.
pub fn processed_blob(processed_at: DateTime<Utc>, slug: &str) -> String {
    format!(
        "processed-content/{}/{}-{slug}.json",
        processed_at.format("%Y/%m/%d"),
        processed_at.format("%Y%m%d-%H%M%S")
    )
}

/// `markdown-content/{YYYY}/{MM}/{DD}/{filename}` where `filename` is the
/// article's canonical `{YYYY-MM-DD}-{slug}.md`.
pub fn markdown_blob(processed_at: DateTime<Utc>, filename_stem: &str) -> String {
    format!(
        "{MARKDOWN_PREFIX}/{}/{filename_stem}.md",
        processed_at.format("%Y/%m/%d")
    )
}

/// `leases/{topic_id}`
pub fn lease_blob(topic_id: &str) -> String {
    format!("leases/{topic_id}")
}

/// `topics/{topic_id}/state.json`
pub fn topic_state_blob(topic_id: &str) -> String {
    format!("topics/{topic_id}/state.json")
}

/// `topics/{topic_id}/attempts/` prefix; individual attempts append
/// `{attempt_id}.json`.
pub fn attempts_prefix(topic_id: &str) -> String {
    format!("topics/{topic_id}/attempts/")
}

pub fn attempt_blob(topic_id: &str, attempt_id: Uuid) -> String {
    format!("topics/{topic_id}/attempts/{attempt_id}.json")
}

/// `dead-letter/{queue}/{message_id}.json`
pub fn dead_letter_blob(queue: &str, message_id: &str) -> String {
    format!("dead-letter/{queue}/{message_id}.json")
}

/// `backup/{iso8601}/` prefix for one publisher snapshot.
pub fn backup_prefix(taken_at: DateTime<Utc>) -> String {
    format!("{BACKUP_PREFIX}/{}/", taken_at.format("%Y-%m-%dT%H-%M-%SZ"))
}

/// `$web/{relative_path}`
pub fn web_blob(relative_path: &str) -> String {
    format!("{WEB_PREFIX}/{relative_path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keys_are_deterministic() {
        let at = Utc.with_ymd_and_hms(2025, 10, 20, 10, 0, 12).unwrap();
        let id = Uuid::nil();
        assert_eq!(
            collection_blob(at, id),
            "collected-content/2025/10/20/00000000-0000-0000-0000-000000000000.json"
        );
        assert_eq!(
            processed_blob(at, "ai-breakthrough"),
            "processed-content/2025/10/20/20251020-100012-ai-breakthrough.json"
        );
        assert_eq!(
            markdown_blob(at, "2025-10-20-ai-breakthrough"),
            "markdown-content/2025/10/20/2025-10-20-ai-breakthrough.md"
        );
        assert_eq!(lease_blob("reddit_abc"), "leases/reddit_abc");
    }
}
