use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ai_client::OpenAi;
use pressline_common::{Config, MARKDOWN_QUEUE, PROCESSING_QUEUE};
use pressline_processor::{Processor, ProcessorHandler};
use pressline_store::{FsBlobStore, FsQueue};
use pressline_worker::http::{serve, EnqueueWake, HttpState};
use pressline_worker::runtime::{RuntimeConfig, WorkerCounters, WorkerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pressline=info".parse()?))
        .init();

    info!("Pressline processor starting...");

    let config = Config::processor_from_env();
    config.log_redacted();

    let store = Arc::new(FsBlobStore::new(&config.blob_root));
    let processing_queue = Arc::new(FsQueue::open(&config.queue_root, PROCESSING_QUEUE).await?);
    let markdown_queue = Arc::new(FsQueue::open(&config.queue_root, MARKDOWN_QUEUE).await?);

    let generator = Arc::new(OpenAi::new(&config.openai_api_key, &config.openai_model));
    let processor = Processor::new(&config, store.clone(), markdown_queue, generator);

    let counters = Arc::new(WorkerCounters::default());
    let state = Arc::new(HttpState {
        service_name: config.service_name.clone(),
        started_at: Utc::now(),
        counters: counters.clone(),
        queue: Some(processing_queue.clone()),
        wake: Arc::new(EnqueueWake {
            queue: processing_queue.clone(),
        }),
    });
    serve(state, config.http_port).await;

    let runtime = WorkerRuntime::new(
        processing_queue,
        store,
        RuntimeConfig::from_config(&config)
            .with_max_messages(u64::from(config.max_articles_per_run)),
        counters,
    );
    let processed = runtime
        .run(Arc::new(ProcessorHandler { processor }))
        .await?;

    info!(processed, "processor run complete");
    Ok(())
}
