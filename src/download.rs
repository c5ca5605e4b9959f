//! Model downloads from Hugging Face Hub with byte-level progress.
//!
//! Downloads run synchronously: the host protocol is strictly serial, so a
//! blocking transfer with inline progress events is the simplest correct
//! shape. Files land in the hub cache first and are then copied into the
//! caller's destination directory.

use crate::config::DownloadConfig;
use crate::error::{Result, SidecarError};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::api::Progress;
use std::path::{Path, PathBuf};

const MB: f64 = 1024.0 * 1024.0;

/// Minimum advance between progress emissions.
const EMIT_STEP_BYTES: u64 = 8 * 1024 * 1024;

/// Summary of a completed repository download.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    pub files: usize,
    pub bytes: u64,
    pub destination: PathBuf,
}

/// Forwards byte deltas from the hub client to a caller closure.
struct ByteForwarder<'a> {
    on_delta: &'a mut dyn FnMut(u64),
}

impl Progress for ByteForwarder<'_> {
    fn init(&mut self, _size: usize, _filename: &str) {}

    fn update(&mut self, size: usize) {
        (self.on_delta)(size as u64);
    }

    fn finish(&mut self) {}
}

/// Download every file of `repo_id` into `destination`.
///
/// `on_progress` receives `(percent, downloaded_mb)`; percent is `None`
/// when file sizes could not be determined up front. Emissions are
/// throttled to meaningful advances.
///
/// # Errors
///
/// Returns an error if the repository cannot be listed, a file transfer
/// fails, or the destination cannot be written.
pub fn download_repo(
    repo_id: &str,
    destination: &Path,
    config: &DownloadConfig,
    mut on_progress: impl FnMut(Option<f64>, f64),
) -> Result<DownloadReport> {
    let api = ApiBuilder::new()
        .with_progress(false)
        .build()
        .map_err(|e| SidecarError::Download(format!("Hub client init failed: {e}")))?;
    let repo = api.model(repo_id.to_owned());

    let info = repo
        .info()
        .map_err(|e| SidecarError::Download(format!("Failed to list {repo_id}: {e}")))?;
    let filenames: Vec<String> = info.siblings.into_iter().map(|s| s.rfilename).collect();
    if filenames.is_empty() {
        return Err(SidecarError::Download(format!(
            "Repository {repo_id} contains no files"
        )));
    }

    let total_bytes = if config.query_sizes {
        query_total_bytes(repo_id, &filenames)
    } else {
        None
    };

    std::fs::create_dir_all(destination)?;

    let mut downloaded: u64 = 0;
    let mut last_emitted: u64 = 0;
    for filename in &filenames {
        tracing::info!(repo = repo_id, file = %filename, "downloading");
        let mut on_delta = |delta: u64| {
            downloaded += delta;
            if downloaded - last_emitted >= EMIT_STEP_BYTES {
                last_emitted = downloaded;
                let percent = total_bytes
                    .map(|total| (downloaded as f64 / total as f64 * 100.0).min(100.0));
                on_progress(percent, downloaded as f64 / MB);
            }
        };
        let cached = repo
            .download_with_progress(
                filename,
                ByteForwarder {
                    on_delta: &mut on_delta,
                },
            )
            .map_err(|e| SidecarError::Download(format!("Failed to download {filename}: {e}")))?;

        let target = destination.join(filename);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(&cached, &target)?;
    }

    on_progress(total_bytes.map(|_| 100.0), downloaded as f64 / MB);

    Ok(DownloadReport {
        files: filenames.len(),
        bytes: downloaded,
        destination: destination.to_owned(),
    })
}

/// Sum file sizes via HEAD requests; `None` if any size is unavailable.
fn query_total_bytes(repo_id: &str, filenames: &[String]) -> Option<u64> {
    let mut total: u64 = 0;
    for filename in filenames {
        let url = format!("https://huggingface.co/{repo_id}/resolve/main/{filename}");
        let size = ureq::head(&url)
            .call()
            .ok()
            .and_then(|resp| resp.header("content-length").map(str::to_owned))
            .and_then(|v| v.parse::<u64>().ok())?;
        total += size;
    }
    Some(total)
}
