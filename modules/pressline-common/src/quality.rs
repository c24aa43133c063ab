use serde::{Deserialize, Serialize};

use crate::articles::NormalizedItem;

/// Default minimum Reddit score for a topic to enter the pipeline.
pub const DEFAULT_MIN_SCORE_REDDIT: u32 = 25;

/// Default minimum Mastodon boost count.
pub const DEFAULT_MIN_BOOSTS_MASTODON: u32 = 5;

/// Default minimum article length (words) the processor will publish.
pub const DEFAULT_MIN_WORD_COUNT: u32 = 600;

/// Default quality score below which a draft is recorded and retried.
pub const DEFAULT_MIN_QUALITY_SCORE: f32 = 0.55;

/// Why the quality gate rejected an item. Rejection is bookkeeping, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    EmptyFields,
    LowScore,
    KeywordExcluded,
    KeywordMissing,
}

/// Pure quality gate applied by the collector before dedup. No I/O.
#[derive(Debug, Clone, Default)]
pub struct QualitySpec {
    pub min_score: u32,
    pub min_comments: u32,
    /// Case-insensitive substring match over title+body. Empty = no constraint.
    pub include_keywords: Vec<String>,
    pub exclude_keywords: Vec<String>,
}

impl QualitySpec {
    pub fn evaluate(&self, item: &NormalizedItem) -> Result<(), Rejection> {
        if item.title.trim().is_empty() || item.content.trim().is_empty() {
            return Err(Rejection::EmptyFields);
        }
        if item.native_score < self.min_score || item.comments < self.min_comments {
            return Err(Rejection::LowScore);
        }
        let haystack = format!("{}\n{}", item.title, item.content).to_lowercase();
        for kw in &self.exclude_keywords {
            if haystack.contains(&kw.to_lowercase()) {
                return Err(Rejection::KeywordExcluded);
            }
        }
        if !self.include_keywords.is_empty()
            && !self
                .include_keywords
                .iter()
                .any(|kw| haystack.contains(&kw.to_lowercase()))
        {
            return Err(Rejection::KeywordMissing);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(title: &str, content: &str, score: u32) -> NormalizedItem {
        NormalizedItem {
            id: "reddit_t3_abc".into(),
            title: title.into(),
            content: content.into(),
            source: "reddit".into(),
            url: None,
            author: None,
            subreddit: Some("rust".into()),
            native_score: score,
            comments: 10,
            collected_at: Utc::now(),
            source_metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn accepts_item_above_threshold() {
        let spec = QualitySpec {
            min_score: 25,
            ..Default::default()
        };
        assert!(spec.evaluate(&item("Big news", "body text", 30)).is_ok());
    }

    #[test]
    fn rejects_low_score_and_empty_fields() {
        let spec = QualitySpec {
            min_score: 25,
            ..Default::default()
        };
        assert_eq!(
            spec.evaluate(&item("Big news", "body", 10)),
            Err(Rejection::LowScore)
        );
        assert_eq!(
            spec.evaluate(&item("", "body", 100)),
            Err(Rejection::EmptyFields)
        );
    }

    #[test]
    fn keyword_filters_are_case_insensitive() {
        let spec = QualitySpec {
            exclude_keywords: vec!["Giveaway".into()],
            include_keywords: vec!["rust".into()],
            ..Default::default()
        };
        assert_eq!(
            spec.evaluate(&item("Free GIVEAWAY inside", "rust stuff", 50)),
            Err(Rejection::KeywordExcluded)
        );
        assert_eq!(
            spec.evaluate(&item("Python news", "nothing relevant", 50)),
            Err(Rejection::KeywordMissing)
        );
        assert!(spec.evaluate(&item("Rust 1.80 released", "details", 50)).is_ok());
    }
}
