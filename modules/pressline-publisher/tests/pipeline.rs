//! Whole-pipeline flow over the in-memory backends: collect one reddit item,
//! process it into an article, render markdown, publish, and fetch the page
//! at its canonical URL.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use ai_client::{AiError, GenerationRequest, GenerationResponse, TextGenerator};
use pressline_common::{
    naming, Envelope, GenerateMarkdownPayload, NormalizedItem, Operation, ProcessTopicPayload,
    PublishSitePayload, QualitySpec,
};
use pressline_collector::collector::{Collector, ConfiguredSource};
use pressline_collector::sources::{SourceAdapter, SourceKind, SourceSpec};
use pressline_markdown::MarkdownGenerator;
use pressline_processor::Processor;
use pressline_publisher::SitePublisher;
use pressline_store::{BlobStore, DedupStore, MemoryBlobStore, MemoryQueue, Queue};

struct OneItemSource;

#[async_trait]
impl SourceAdapter for OneItemSource {
    async fn fetch(
        &self,
        _spec: &SourceSpec,
    ) -> Result<Vec<NormalizedItem>, pressline_common::PipelineError> {
        Ok(vec![NormalizedItem {
            id: "reddit_abc".into(),
            title: "AI Breakthrough".into(),
            content: "A lab announced a significant advance in reasoning models.".into(),
            source: "reddit".into(),
            url: Some("https://www.reddit.com/r/technology/abc".into()),
            author: Some("poster".into()),
            subreddit: Some("technology".into()),
            native_score: 120,
            comments: 40,
            collected_at: Utc::now(),
            source_metadata: serde_json::Value::Null,
        }])
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Reddit
    }
}

struct Model;

#[async_trait]
impl TextGenerator for Model {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AiError> {
        let text = if request.system.contains("SEO") {
            "AI Breakthrough Explained\nWhat the new reasoning advance means.".to_string()
        } else {
            let mut out = String::from("# What Happened\n\n");
            for section in 0..8 {
                out.push_str(&format!("## Angle {section}\n\n"));
                out.push_str(&"carefully reported analysis sentence words ".repeat(30));
                out.push_str("\n\n");
            }
            out
        };
        Ok(GenerationResponse {
            text,
            model: "gpt-4o-mini".into(),
            prompt_tokens: 400,
            completion_tokens: 1200,
        })
    }

    fn model(&self) -> &str {
        "gpt-4o-mini"
    }
}

const BUILDER_SCRIPT: &str = r#"#!/bin/sh
ws="$2"
dest="$4"
mkdir -p "$dest/articles"
echo "<html>home</html>" > "$dest/index.html"
for f in "$ws"/content/articles/*.md; do
  [ -e "$f" ] || continue
  base=$(basename "$f" .md)
  echo "<html>$base</html>" > "$dest/articles/$base.html"
done
"#;

fn write_builder(dir: &Path) -> String {
    let path = dir.join("fake-builder.sh");
    std::fs::write(&path, BUILDER_SCRIPT).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.to_string_lossy().to_string()
}

#[tokio::test]
async fn collected_item_becomes_a_published_page() {
    let store = Arc::new(MemoryBlobStore::new());
    let processing_queue = Arc::new(MemoryQueue::new("content-processing-requests"));
    let markdown_queue = Arc::new(MemoryQueue::new("markdown-generation-requests"));
    let publishing_queue = Arc::new(MemoryQueue::new("site-publishing-requests"));

    // Collect.
    let collector = Collector::new(
        vec![ConfiguredSource {
            spec: SourceSpec {
                kind: SourceKind::Reddit,
                target: "technology".into(),
                sort: "hot".into(),
                max_items: 25,
            },
            adapter: Arc::new(OneItemSource),
            quality: QualitySpec {
                min_score: 25,
                ..Default::default()
            },
        }],
        store.clone(),
        processing_queue.clone(),
        DedupStore::new(store.clone(), 14),
        "collector",
    );
    let stats = collector.collect().await.unwrap();
    assert_eq!(stats.published, 1);

    // Process.
    let mut config = pressline_common::Config::markdown_from_env();
    config.service_name = "processor".into();
    config.openai_qpm = 6000;
    let processor = Processor::new(&config, store.clone(), markdown_queue.clone(), Arc::new(Model));
    let delivery = processing_queue
        .receive(1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);
    let envelope =
        Envelope::<ProcessTopicPayload>::from_json(&delivery.body, Operation::ProcessTopic).unwrap();
    let outcome = processor
        .process_topic(&envelope.payload, envelope.correlation_id)
        .await
        .unwrap();
    let filename = outcome.filename.unwrap();

    // Render markdown.
    let generator = MarkdownGenerator::new(store.clone(), publishing_queue.clone(), "markdown-generator");
    let delivery = markdown_queue
        .receive(1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);
    let envelope =
        Envelope::<GenerateMarkdownPayload>::from_json(&delivery.body, Operation::GenerateMarkdown)
            .unwrap();
    let rendered = generator
        .render_markdown(&envelope.payload, envelope.correlation_id)
        .await
        .unwrap();
    assert_eq!(rendered.filename, format!("{}.md", naming::stem(&filename)));

    // Publish.
    let scripts = tempfile::tempdir().unwrap();
    let builder = write_builder(scripts.path());
    let publisher = SitePublisher::new(store.clone(), &builder, Duration::from_secs(30), None);
    let delivery = publishing_queue
        .receive(1, Duration::from_secs(60))
        .await
        .unwrap()
        .remove(0);
    Envelope::<PublishSitePayload>::from_json(&delivery.body, Operation::PublishSite).unwrap();
    let published = publisher.publish_site().await.unwrap();
    assert!(published.success);

    // The page is reachable exactly at the article's canonical URL.
    let web_key = format!("$web{}", naming::article_url(&filename));
    let (bytes, _) = store.get(&web_key).await.unwrap();
    assert!(!bytes.is_empty());
}
