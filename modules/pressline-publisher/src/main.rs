use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pressline_common::{Config, PUBLISHING_QUEUE};
use pressline_publisher::{PublisherHandler, SitePublisher};
use pressline_store::{FsBlobStore, FsQueue};
use pressline_worker::http::{serve, EnqueueWake, HttpState};
use pressline_worker::runtime::{RuntimeConfig, WorkerCounters, WorkerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pressline=info".parse()?))
        .init();

    info!("Pressline site publisher starting...");

    let config = Config::publisher_from_env();
    config.log_redacted();

    let store = Arc::new(FsBlobStore::new(&config.blob_root));
    let publishing_queue = Arc::new(FsQueue::open(&config.queue_root, PUBLISHING_QUEUE).await?);

    let publisher = SitePublisher::from_config(&config, store.clone());

    let counters = Arc::new(WorkerCounters::default());
    let state = Arc::new(HttpState {
        service_name: config.service_name.clone(),
        started_at: Utc::now(),
        counters: counters.clone(),
        queue: Some(publishing_queue.clone()),
        wake: Arc::new(EnqueueWake {
            queue: publishing_queue.clone(),
        }),
    });
    serve(state, config.http_port).await;

    // Many markdown completions coalesce into few publisher runs: drain the
    // whole trigger batch, build once per message, converge on identical
    // bytes. External scaling caps this worker at one instance.
    let runtime = WorkerRuntime::new(
        publishing_queue,
        store,
        RuntimeConfig::from_config(&config),
        counters,
    );
    let processed = runtime.run(Arc::new(PublisherHandler { publisher })).await?;

    info!(processed, "site publisher run complete");
    Ok(())
}
