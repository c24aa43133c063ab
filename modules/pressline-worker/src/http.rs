//! Minimal trigger surface every worker exposes: `GET /health`,
//! `GET /status`, `POST /wake`. Wake injects a synthetic message so deployed
//! workers can be exercised without touching the real queue producers.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use pressline_store::Queue;

use crate::runtime::WorkerCounters;

/// What `POST /wake` does with the injected payload. Queue-driven workers
/// enqueue an envelope; the collector triggers a run directly.
#[async_trait]
pub trait WakeAction: Send + Sync {
    async fn wake(&self, payload: serde_json::Value) -> anyhow::Result<String>;
}

/// Enqueue the wake payload as a raw message on the worker's own queue.
pub struct EnqueueWake {
    pub queue: Arc<dyn Queue>,
}

#[async_trait]
impl WakeAction for EnqueueWake {
    async fn wake(&self, payload: serde_json::Value) -> anyhow::Result<String> {
        self.queue.send(payload.to_string()).await?;
        Ok(format!("enqueued on {}", self.queue.name()))
    }
}

pub struct HttpState {
    pub service_name: String,
    pub started_at: DateTime<Utc>,
    pub counters: Arc<WorkerCounters>,
    pub queue: Option<Arc<dyn Queue>>,
    pub wake: Arc<dyn WakeAction>,
}

pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/wake", post(wake))
        .with_state(state)
}

/// Bind and serve in a background task. The surface is best-effort: a bind
/// failure is logged, not fatal, so a port collision cannot stop the worker.
pub async fn serve(state: Arc<HttpState>, port: u16) {
    let app = router(state);
    let addr = format!("0.0.0.0:{port}");
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => {
            info!(addr, "trigger surface listening");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    warn!(error = %e, "trigger surface stopped");
                }
            });
        }
        Err(e) => warn!(addr, error = %e, "failed to bind trigger surface"),
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let queue_depth = match &state.queue {
        Some(queue) => queue.len().await.ok(),
        None => None,
    };
    Json(serde_json::json!({
        "service": state.service_name,
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds(),
        "processed": state.counters.processed.load(Ordering::Relaxed),
        "failed": state.counters.failed.load(Ordering::Relaxed),
        "dead_lettered": state.counters.dead_lettered.load(Ordering::Relaxed),
        "queue_depth": queue_depth,
    }))
}

#[derive(Deserialize)]
struct WakeRequest {
    #[serde(default)]
    payload: serde_json::Value,
}

async fn wake(
    State(state): State<Arc<HttpState>>,
    Json(request): Json<WakeRequest>,
) -> impl IntoResponse {
    match state.wake.wake(request.payload).await {
        Ok(detail) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "accepted", "detail": detail })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "wake rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "status": "error", "detail": e.to_string() })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pressline_store::MemoryQueue;

    #[tokio::test]
    async fn wake_enqueues_on_worker_queue() {
        let queue: Arc<dyn Queue> = Arc::new(MemoryQueue::new("q"));
        let action = EnqueueWake {
            queue: queue.clone(),
        };
        action
            .wake(serde_json::json!({"operation": "publish_site"}))
            .await
            .unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
    }
}
