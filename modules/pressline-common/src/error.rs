use std::time::Duration;

use thiserror::Error;

/// Error taxonomy shared by every pipeline stage. Stage boundaries are queue
/// boundaries: a handler surfaces one of these, and the worker runtime decides
/// whether the message is redelivered, dead-lettered, or consumed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-provided Retry-After, when the upstream sent one.
        retry_after: Option<Duration>,
    },

    #[error("Validation failure: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn rate_limited(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: msg.into(),
            retry_after,
        }
    }

    /// Whether a redelivery of the triggering message can be expected to
    /// succeed. `Anyhow` wraps unclassified I/O context and is treated as
    /// transient rather than poisoning the message.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Transient(_)
                | PipelineError::RateLimited { .. }
                | PipelineError::Anyhow(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_rate_limited_are_retryable() {
        assert!(PipelineError::transient("503").is_retryable());
        assert!(PipelineError::rate_limited("429", None).is_retryable());
    }

    #[test]
    fn validation_and_fatal_are_not_retryable() {
        assert!(!PipelineError::validation("bad payload").is_retryable());
        assert!(!PipelineError::Fatal("no credentials".into()).is_retryable());
        assert!(!PipelineError::NotFound("blob".into()).is_retryable());
    }
}
