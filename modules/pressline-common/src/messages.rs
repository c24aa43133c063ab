use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Queue names. Each queue carries exactly one operation kind.
pub const PROCESSING_QUEUE: &str = "content-processing-requests";
pub const MARKDOWN_QUEUE: &str = "markdown-generation-requests";
pub const PUBLISHING_QUEUE: &str = "site-publishing-requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ProcessTopic,
    GenerateMarkdown,
    PublishSite,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::ProcessTopic => write!(f, "process_topic"),
            Operation::GenerateMarkdown => write!(f, "generate_markdown"),
            Operation::PublishSite => write!(f, "publish_site"),
        }
    }
}

impl std::str::FromStr for Operation {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "process_topic" => Ok(Self::ProcessTopic),
            "generate_markdown" => Ok(Self::GenerateMarkdown),
            "publish_site" => Ok(Self::PublishSite),
            other => Err(format!("unknown Operation: {other}")),
        }
    }
}

/// Wire envelope shared by every queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<P> {
    pub message_id: Uuid,
    pub operation: Operation,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub payload: P,
}

impl<P: Serialize + DeserializeOwned> Envelope<P> {
    pub fn new(operation: Operation, service_name: &str, payload: P) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            operation,
            service_name: service_name.to_string(),
            timestamp: Utc::now(),
            correlation_id: Uuid::new_v4(),
            payload,
        }
    }

    /// Keep a correlation id across stage boundaries.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| PipelineError::validation(format!("envelope serialization: {e}")))
    }

    /// Parse and check the envelope carries the operation this queue expects.
    pub fn from_json(body: &str, expected: Operation) -> crate::error::Result<Self> {
        let envelope: Self = serde_json::from_str(body)
            .map_err(|e| PipelineError::validation(format!("malformed envelope: {e}")))?;
        if envelope.operation != expected {
            return Err(PipelineError::validation(format!(
                "operation mismatch: expected {expected}, got {}",
                envelope.operation
            )));
        }
        Ok(envelope)
    }
}

/// Payload for `process_topic`: one collected item, referenced back to the
/// collection blob it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTopicPayload {
    pub topic_id: String,
    pub title: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upvotes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    pub collected_at: DateTime<Utc>,
    pub priority_score: f64,
    pub collection_id: Uuid,
    /// Blob key of the collection record this topic was accepted in.
    pub collection_blob: String,
}

/// Payload for `generate_markdown`: the processed-article blob plus the
/// canonical filename (carried verbatim, never re-derived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateMarkdownPayload {
    pub article_blob: String,
    pub topic_id: String,
    pub filename: String,
}

/// Payload for `publish_site`. Content-agnostic: the publisher enumerates
/// current markdown state itself, so duplicate triggers coalesce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSitePayload {
    pub trigger: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let envelope = Envelope::new(
            Operation::PublishSite,
            "markdown-generator",
            PublishSitePayload {
                trigger: "markdown_complete".into(),
                timestamp: Utc::now(),
            },
        );
        let json = envelope.to_json().unwrap();
        let parsed =
            Envelope::<PublishSitePayload>::from_json(&json, Operation::PublishSite).unwrap();
        assert_eq!(parsed.message_id, envelope.message_id);
        assert_eq!(parsed.payload.trigger, "markdown_complete");
    }

    #[test]
    fn envelope_rejects_operation_mismatch() {
        let envelope = Envelope::new(
            Operation::PublishSite,
            "test",
            PublishSitePayload {
                trigger: "t".into(),
                timestamp: Utc::now(),
            },
        );
        let json = envelope.to_json().unwrap();
        let err = Envelope::<PublishSitePayload>::from_json(&json, Operation::ProcessTopic)
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn operation_serializes_snake_case() {
        let json = serde_json::to_string(&Operation::GenerateMarkdown).unwrap();
        assert_eq!(json, "\"generate_markdown\"");
    }
}
