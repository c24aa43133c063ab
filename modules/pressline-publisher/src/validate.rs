//! Pre-build and post-build validation. Everything that touches the build
//! workspace or the public site goes through a strict allow-list first;
//! violations abort the run rather than degrade it.

use std::path::Path;

use pressline_common::{PipelineError, Result};

/// Hard bound on markdown inputs per run.
pub const MAX_FILES: usize = 10_000;

/// Hard bound on a single markdown file.
pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

/// Hard bound on the built site.
pub const MAX_OUTPUT_BYTES: u64 = 1024 * 1024 * 1024;

/// Validate a markdown blob basename against the filename grammar. Path
/// traversal, absolute paths, and control characters never reach the
/// filesystem.
pub fn validate_markdown_name(basename: &str) -> Result<()> {
    if basename.contains('/') || basename.contains('\\') || basename.contains("..") {
        return Err(PipelineError::validation(format!(
            "markdown name contains path components: {basename:?}"
        )));
    }
    if basename.chars().any(|c| c.is_control()) {
        return Err(PipelineError::validation(format!(
            "markdown name contains control characters: {basename:?}"
        )));
    }
    if !pressline_common::is_valid_filename(basename) || !basename.ends_with(".md") {
        return Err(PipelineError::validation(format!(
            "markdown name outside allow-list: {basename:?}"
        )));
    }
    Ok(())
}

/// Output-tree invariants: the expected entry point exists, nothing is a
/// symlink, and the total size is bounded.
pub fn validate_output(public_dir: &Path) -> Result<u64> {
    if !public_dir.join("index.html").is_file() {
        return Err(PipelineError::validation(
            "build output is missing index.html",
        ));
    }

    let mut total: u64 = 0;
    let mut stack = vec![public_dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .map_err(|e| PipelineError::transient(format!("output walk: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| PipelineError::transient(format!("output walk: {e}")))?;
            let meta = entry
                .path()
                .symlink_metadata()
                .map_err(|e| PipelineError::transient(format!("output stat: {e}")))?;
            if meta.file_type().is_symlink() {
                return Err(PipelineError::validation(format!(
                    "build output contains a symlink: {:?}",
                    entry.path()
                )));
            }
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
                if total > MAX_OUTPUT_BYTES {
                    return Err(PipelineError::validation(
                        "build output exceeds the size bound",
                    ));
                }
            }
        }
    }
    Ok(total)
}
