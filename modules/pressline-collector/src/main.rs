use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pressline_common::{Config, PROCESSING_QUEUE};
use pressline_collector::Collector;
use pressline_store::{FsBlobStore, FsQueue};
use pressline_worker::http::{serve, HttpState, WakeAction};
use pressline_worker::runtime::WorkerCounters;

#[derive(Parser)]
#[command(about = "Pressline collector: social/RSS items in, topic messages out")]
struct Args {
    /// Stay alive after the first run and collect again on POST /wake.
    #[arg(long)]
    serve: bool,
}

struct TriggerWake {
    tx: mpsc::Sender<()>,
}

#[async_trait]
impl WakeAction for TriggerWake {
    async fn wake(&self, _payload: serde_json::Value) -> Result<String> {
        self.tx
            .send(())
            .await
            .map_err(|_| anyhow::anyhow!("collector is shutting down"))?;
        Ok("collection run triggered".to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pressline=info".parse()?))
        .init();

    info!("Pressline collector starting...");

    let args = Args::parse();
    let config = Config::collector_from_env();
    config.log_redacted();

    let store = Arc::new(FsBlobStore::new(&config.blob_root));
    let queue = Arc::new(FsQueue::open(&config.queue_root, PROCESSING_QUEUE).await?);

    let collector = Collector::from_config(&config, store, queue.clone());

    let (tx, mut rx) = mpsc::channel(4);
    let state = Arc::new(HttpState {
        service_name: config.service_name.clone(),
        started_at: Utc::now(),
        counters: Arc::new(WorkerCounters::default()),
        queue: Some(queue),
        wake: Arc::new(TriggerWake { tx }),
    });
    serve(state, config.http_port).await;

    let stats = collector.collect().await?;
    info!("Collection run complete. {stats}");

    if args.serve || config.disable_auto_shutdown {
        info!("staying warm; POST /wake triggers another run");
        while rx.recv().await.is_some() {
            match collector.collect().await {
                Ok(stats) => info!("Collection run complete. {stats}"),
                Err(e) => warn!(error = %e, "collection run failed"),
            }
        }
    }

    Ok(())
}
