use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pressline_common::{Config, MARKDOWN_QUEUE, PUBLISHING_QUEUE};
use pressline_markdown::{MarkdownGenerator, MarkdownHandler};
use pressline_store::{FsBlobStore, FsQueue};
use pressline_worker::http::{serve, EnqueueWake, HttpState};
use pressline_worker::runtime::{RuntimeConfig, WorkerCounters, WorkerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pressline=info".parse()?))
        .init();

    info!("Pressline markdown generator starting...");

    let config = Config::markdown_from_env();
    config.log_redacted();

    let store = Arc::new(FsBlobStore::new(&config.blob_root));
    let markdown_queue = Arc::new(FsQueue::open(&config.queue_root, MARKDOWN_QUEUE).await?);
    let publishing_queue = Arc::new(FsQueue::open(&config.queue_root, PUBLISHING_QUEUE).await?);

    let generator = MarkdownGenerator::new(store.clone(), publishing_queue, &config.service_name);

    let counters = Arc::new(WorkerCounters::default());
    let state = Arc::new(HttpState {
        service_name: config.service_name.clone(),
        started_at: Utc::now(),
        counters: counters.clone(),
        queue: Some(markdown_queue.clone()),
        wake: Arc::new(EnqueueWake {
            queue: markdown_queue.clone(),
        }),
    });
    serve(state, config.http_port).await;

    let runtime = WorkerRuntime::new(
        markdown_queue,
        store,
        RuntimeConfig::from_config(&config),
        counters,
    );
    let processed = runtime.run(Arc::new(MarkdownHandler { generator })).await?;

    info!(processed, "markdown generator run complete");
    Ok(())
}
