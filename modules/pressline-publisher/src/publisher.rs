//! Site publishing: download the markdown set, build with the static-site
//! generator as a bounded subprocess, snapshot the live site, deploy, and
//! roll back on any upload failure. Readers only ever see a prior consistent
//! build or the new one.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, warn};

use pressline_common::{
    Config, Envelope, Operation, PipelineError, PublishSitePayload, Result,
};
use pressline_store::{layout, BlobStore, StoreError};

use crate::mime::content_type_for;
use crate::validate::{self, MAX_FILES, MAX_FILE_BYTES};

#[derive(Debug, Clone)]
pub struct PublishStats {
    pub success: bool,
    pub files_deployed: u32,
    pub backup_path: String,
}

pub struct SitePublisher {
    store: Arc<dyn BlobStore>,
    builder_bin: String,
    build_timeout: Duration,
    site_skeleton: Option<PathBuf>,
}

impl SitePublisher {
    pub fn new(
        store: Arc<dyn BlobStore>,
        builder_bin: &str,
        build_timeout: Duration,
        site_skeleton: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            builder_bin: builder_bin.to_string(),
            build_timeout,
            site_skeleton,
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn BlobStore>) -> Self {
        Self::new(
            store,
            &config.site_builder_bin,
            Duration::from_secs(config.build_timeout_seconds),
            config.site_skeleton.clone(),
        )
    }

    /// One full build-and-swap. Duplicate triggers re-run this and converge
    /// on the same bytes; concurrency is capped at one instance externally.
    pub async fn publish_site(&self) -> Result<PublishStats> {
        let workspace = tempfile::tempdir()
            .map_err(|e| PipelineError::transient(format!("workspace tempdir: {e}")))?;
        let content_dir = workspace.path().join("content").join("articles");
        let public_dir = workspace.path().join("public");

        let downloaded = self.download_markdown(&content_dir).await?;
        if downloaded == 0 {
            info!("no markdown content yet, nothing to publish");
            return Ok(PublishStats {
                success: true,
                files_deployed: 0,
                backup_path: String::new(),
            });
        }

        self.prepare_skeleton(workspace.path()).await?;
        self.build(workspace.path(), &public_dir).await?;
        let total_bytes = validate::validate_output(&public_dir)?;
        info!(downloaded, total_bytes, "build output validated");

        let backup_prefix = layout::backup_prefix(Utc::now());
        let snapshot = self.snapshot_current(&backup_prefix).await?;

        match self.deploy(&public_dir).await {
            Ok(uploaded) => {
                // Remove files the new build no longer produces, so readers
                // never see a mixture of builds.
                self.prune_stale(&snapshot, &uploaded).await;
                info!(deployed = uploaded.len(), backup = %backup_prefix, "site deployed");
                Ok(PublishStats {
                    success: true,
                    files_deployed: uploaded.len() as u32,
                    backup_path: backup_prefix,
                })
            }
            Err((uploaded, e)) => {
                error!(error = %e, uploaded = uploaded.len(), "deploy failed, rolling back");
                self.rollback(&backup_prefix, &snapshot, &uploaded).await;
                Err(e)
            }
        }
    }

    /// Download every markdown blob into the build workspace, enforcing the
    /// count and per-file size bounds.
    async fn download_markdown(&self, content_dir: &Path) -> Result<u32> {
        let keys = self
            .store
            .list(&format!("{}/", layout::MARKDOWN_PREFIX))
            .await
            .map_err(|e| PipelineError::transient(format!("markdown list: {e}")))?;

        if keys.len() > MAX_FILES {
            return Err(PipelineError::validation(format!(
                "markdown set exceeds the {MAX_FILES}-file cap: {}",
                keys.len()
            )));
        }

        tokio::fs::create_dir_all(content_dir)
            .await
            .map_err(|e| PipelineError::transient(format!("content dir: {e}")))?;

        let mut downloaded = 0u32;
        for key in keys {
            let basename = key.rsplit('/').next().unwrap_or(&key);
            validate::validate_markdown_name(basename)?;

            let (bytes, _) = self
                .store
                .get(&key)
                .await
                .map_err(|e| PipelineError::transient(format!("markdown get {key}: {e}")))?;
            if bytes.len() > MAX_FILE_BYTES {
                return Err(PipelineError::validation(format!(
                    "markdown blob {key} exceeds the per-file size cap"
                )));
            }
            tokio::fs::write(content_dir.join(basename), &bytes)
                .await
                .map_err(|e| PipelineError::transient(format!("markdown stage {key}: {e}")))?;
            downloaded += 1;
        }
        Ok(downloaded)
    }

    /// Copy the configured site skeleton (config, themes, layouts) into the
    /// workspace; without one, the generator runs on its defaults.
    async fn prepare_skeleton(&self, workspace: &Path) -> Result<()> {
        let Some(skeleton) = &self.site_skeleton else {
            return Ok(());
        };
        copy_tree(skeleton, workspace)
            .await
            .map_err(|e| PipelineError::transient(format!("skeleton copy: {e}")))
    }

    /// Run the generator as a child process with captured output and a hard
    /// wall-clock timeout. Any non-zero exit aborts the run.
    async fn build(&self, workspace: &Path, public_dir: &Path) -> Result<()> {
        info!(builder = %self.builder_bin, "running site build");
        let result = tokio::time::timeout(
            self.build_timeout,
            tokio::process::Command::new(&self.builder_bin)
                .arg("--source")
                .arg(workspace)
                .arg("--destination")
                .arg(public_dir)
                .arg("--quiet")
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!(code = ?output.status.code(), stderr = %stderr, "site build failed");
                Err(PipelineError::validation(format!(
                    "site build exited with {:?}",
                    output.status.code()
                )))
            }
            Ok(Err(e)) => Err(PipelineError::transient(format!(
                "failed to launch {}: {e}",
                self.builder_bin
            ))),
            Err(_) => Err(PipelineError::transient(format!(
                "site build exceeded {}s timeout",
                self.build_timeout.as_secs()
            ))),
        }
    }

    /// Copy the live site into `backup/{timestamp}/`. Returns the snapshotted
    /// relative paths.
    async fn snapshot_current(&self, backup_prefix: &str) -> Result<Vec<String>> {
        let keys = self
            .store
            .list(&format!("{}/", layout::WEB_PREFIX))
            .await
            .map_err(|e| PipelineError::transient(format!("web list: {e}")))?;

        let mut snapshot = Vec::with_capacity(keys.len());
        for key in keys {
            let rel = key
                .strip_prefix(&format!("{}/", layout::WEB_PREFIX))
                .unwrap_or(&key)
                .to_string();
            let (bytes, _) = self
                .store
                .get(&key)
                .await
                .map_err(|e| PipelineError::transient(format!("snapshot read {key}: {e}")))?;
            self.store
                .put(&format!("{backup_prefix}{rel}"), bytes)
                .await
                .map_err(|e| PipelineError::transient(format!("snapshot write {rel}: {e}")))?;
            snapshot.push(rel);
        }
        info!(files = snapshot.len(), backup = %backup_prefix, "snapshot taken");
        Ok(snapshot)
    }

    /// Upload the built tree into `$web/` with correct MIME types. On error,
    /// returns what was already uploaded so the caller can roll back.
    async fn deploy(
        &self,
        public_dir: &Path,
    ) -> std::result::Result<Vec<String>, (Vec<String>, PipelineError)> {
        let files = walk_files(public_dir)
            .await
            .map_err(|e| (Vec::new(), PipelineError::transient(format!("output walk: {e}"))))?;

        let mut uploaded: Vec<String> = Vec::new();
        for path in files {
            let rel = path
                .strip_prefix(public_dir)
                .expect("walked file outside public dir")
                .to_string_lossy()
                .replace('\\', "/");
            let bytes = match tokio::fs::read(&path).await {
                Ok(b) => b,
                Err(e) => {
                    return Err((
                        uploaded,
                        PipelineError::transient(format!("read {rel}: {e}")),
                    ))
                }
            };
            let key = layout::web_blob(&rel);
            if let Err(e) = self
                .store
                .put_typed(&key, bytes.into(), content_type_for(&rel))
                .await
            {
                return Err((
                    uploaded,
                    PipelineError::transient(format!("upload {rel}: {e}")),
                ));
            }
            uploaded.push(rel);
        }
        Ok(uploaded)
    }

    /// Delete `$web/` entries the previous build had and the new one lacks.
    async fn prune_stale(&self, snapshot: &[String], uploaded: &[String]) {
        for rel in snapshot {
            if uploaded.contains(rel) {
                continue;
            }
            match self.store.delete(&layout::web_blob(rel)).await {
                Ok(()) | Err(StoreError::NotFound(_)) => {}
                Err(e) => warn!(rel, error = %e, "stale file prune failed"),
            }
        }
    }

    /// Restore `$web/` to the snapshot: overwrite what the snapshot had,
    /// delete what this run added on top.
    async fn rollback(&self, backup_prefix: &str, snapshot: &[String], uploaded: &[String]) {
        for rel in uploaded {
            let web_key = layout::web_blob(rel);
            if snapshot.contains(rel) {
                match self.store.get(&format!("{backup_prefix}{rel}")).await {
                    Ok((bytes, _)) => {
                        if let Err(e) = self
                            .store
                            .put_typed(&web_key, bytes, content_type_for(rel))
                            .await
                        {
                            error!(rel, error = %e, "rollback restore failed");
                        }
                    }
                    Err(e) => error!(rel, error = %e, "rollback snapshot read failed"),
                }
            } else {
                match self.store.delete(&web_key).await {
                    Ok(()) | Err(StoreError::NotFound(_)) => {}
                    Err(e) => error!(rel, error = %e, "rollback delete failed"),
                }
            }
        }
        warn!(backup = %backup_prefix, restored = uploaded.len(), "rollback complete");
    }
}

async fn walk_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                stack.push(entry.path());
            } else {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    Ok(files)
}

async fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    let mut stack = vec![from.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let rel = entry.path();
            let rel = rel.strip_prefix(from).expect("entry outside copy root");
            let target = to.join(rel);
            if entry.file_type().await?.is_dir() {
                tokio::fs::create_dir_all(&target).await?;
                stack.push(entry.path());
            } else {
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

/// Queue-facing adapter. The payload is content-agnostic; the publisher
/// enumerates current markdown state itself, which is what makes duplicate
/// triggers coalesce into byte-identical deploys.
pub struct PublisherHandler {
    pub publisher: SitePublisher,
}

#[async_trait]
impl pressline_worker::Handler for PublisherHandler {
    async fn handle(&self, body: &str) -> Result<()> {
        let envelope = Envelope::<PublishSitePayload>::from_json(body, Operation::PublishSite)?;
        info!(trigger = %envelope.payload.trigger, "publish requested");
        self.publisher.publish_site().await.map(|_| ())
    }
}
