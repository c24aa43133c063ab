//! Attempt history and topic state persistence. Everything here lives under
//! `topics/{topic_id}/`, which the lease holder owns exclusively; partial
//! writes after a lost lease land here and nowhere else.

use chrono::Utc;
use uuid::Uuid;

use pressline_common::{AttemptOutcome, AttemptRecord, PipelineError, TopicState};
use pressline_store::blob::{get_json, put_json};
use pressline_store::{layout, BlobStore, StoreError};

pub async fn load_state(
    store: &dyn BlobStore,
    topic_id: &str,
) -> Result<TopicState, PipelineError> {
    match get_json::<TopicState>(store, &layout::topic_state_blob(topic_id)).await {
        Ok((state, _)) => Ok(state),
        Err(StoreError::NotFound(_)) => Ok(TopicState::new(topic_id)),
        Err(e) => Err(PipelineError::transient(format!("topic state read: {e}"))),
    }
}

pub async fn save_state(store: &dyn BlobStore, state: &TopicState) -> Result<(), PipelineError> {
    put_json(store, &layout::topic_state_blob(&state.topic_id), state)
        .await
        .map_err(|e| PipelineError::transient(format!("topic state write: {e}")))?;
    Ok(())
}

/// All prior attempts, oldest first.
pub async fn load_attempts(
    store: &dyn BlobStore,
    topic_id: &str,
) -> Result<Vec<AttemptRecord>, PipelineError> {
    let keys = store
        .list(&layout::attempts_prefix(topic_id))
        .await
        .map_err(|e| PipelineError::transient(format!("attempts list: {e}")))?;
    let mut attempts = Vec::with_capacity(keys.len());
    for key in keys {
        match get_json::<AttemptRecord>(store, &key).await {
            Ok((attempt, _)) => attempts.push(attempt),
            // A torn attempt blob is history, not a blocker.
            Err(e) => tracing::warn!(key, error = %e, "skipping unreadable attempt record"),
        }
    }
    attempts.sort_by_key(|a| a.started_at);
    Ok(attempts)
}

/// The most recent draft worth continuing from.
pub fn latest_draft(attempts: &[AttemptRecord]) -> Option<&str> {
    attempts
        .iter()
        .rev()
        .find(|a| a.draft.is_some() && a.outcome != AttemptOutcome::Completed)
        .and_then(|a| a.draft.as_deref())
}

pub async fn record_attempt(
    store: &dyn BlobStore,
    topic_id: &str,
    attempt: &AttemptRecord,
) -> Result<(), PipelineError> {
    put_json(store, &layout::attempt_blob(topic_id, attempt.attempt_id), attempt)
        .await
        .map_err(|e| PipelineError::transient(format!("attempt write: {e}")))?;
    Ok(())
}

pub fn new_attempt(
    draft: Option<String>,
    tokens_used: u64,
    cost_usd: f64,
    outcome: AttemptOutcome,
) -> AttemptRecord {
    AttemptRecord {
        attempt_id: Uuid::new_v4(),
        started_at: Utc::now(),
        draft,
        research_notes: None,
        tokens_used,
        cost_usd,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressline_store::MemoryBlobStore;

    #[tokio::test]
    async fn state_round_trips_and_defaults_when_missing() {
        let store = MemoryBlobStore::new();
        let state = load_state(&store, "t1").await.unwrap();
        assert_eq!(state.attempt_count, 0);

        let mut state = state;
        state.attempt_count = 2;
        state.total_cost_usd = 0.05;
        save_state(&store, &state).await.unwrap();

        let reloaded = load_state(&store, "t1").await.unwrap();
        assert_eq!(reloaded.attempt_count, 2);
    }

    #[tokio::test]
    async fn latest_draft_prefers_most_recent_incomplete() {
        let store = MemoryBlobStore::new();
        let first = new_attempt(Some("draft one".into()), 10, 0.0, AttemptOutcome::BelowQuality);
        record_attempt(&store, "t1", &first).await.unwrap();
        // Slightly later timestamp.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = new_attempt(Some("draft two".into()), 10, 0.0, AttemptOutcome::BelowQuality);
        record_attempt(&store, "t1", &second).await.unwrap();

        let attempts = load_attempts(&store, "t1").await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(latest_draft(&attempts), Some("draft two"));
    }

    #[tokio::test]
    async fn completed_attempts_are_not_resumed() {
        let done = new_attempt(Some("final".into()), 10, 0.0, AttemptOutcome::Completed);
        assert_eq!(latest_draft(&[done]), None);
    }
}
