//! Merge Engine: turns a batch's segment URLs into one video.

use crate::domain::av::probe::{container_extension, MediaInfo};
use crate::domain::av::MediaError;
use crate::domain::progress::{MergeProgress, MergeStage};
use crate::ports::media::MediaToolkit;
use crate::ports::pipeline::MergePort;
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const KNOWN_EXTENSIONS: [&str; 6] = ["mp4", "webm", "mov", "mkv", "ts", "avi"];
pub const DEFAULT_EXTENSION: &str = "mp4";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum MediaSource {
    Remote(String),
    Local(PathBuf),
}

impl MediaSource {
    pub fn locator(&self) -> String {
        match self {
            MediaSource::Remote(url) => url.clone(),
            MediaSource::Local(path) => path.display().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedVideo {
    pub source: MediaSource,
    pub extension: String,
    pub duration_secs: Option<f64>,
    pub segment_count: usize,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Nothing to merge")]
    Empty,

    #[error("Failed to download segment {index} ({url}): {reason}")]
    Download {
        index: usize,
        url: String,
        reason: String,
    },

    #[error("Failed to read segment {index}: {source}")]
    Probe {
        index: usize,
        #[source]
        source: MediaError,
    },

    #[error("Failed to join segments: {0}")]
    Concat(#[source] MediaError),

    #[error("Merge cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Extension of the file a URL or path points at, if it is a video container
/// we recognise.
pub fn extension_from_locator(locator: &str) -> Option<&'static str> {
    let path = locator.split(['?', '#']).next().unwrap_or(locator);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    KNOWN_EXTENSIONS.iter().copied().find(|known| *known == ext)
}

/// Sum of the known durations, or an estimate from their mean when some are missing.
pub fn total_duration(durations: &[Option<f64>]) -> Option<f64> {
    let known: Vec<f64> = durations.iter().flatten().copied().collect();
    if known.is_empty() {
        return None;
    }
    let sum: f64 = known.iter().sum();
    if known.len() == durations.len() {
        Some(sum)
    } else {
        Some(sum / known.len() as f64 * durations.len() as f64)
    }
}

pub struct MergeEngine<S, M> {
    storage: S,
    media: M,
    work_dir: PathBuf,
}

impl<S, M> MergeEngine<S, M>
where
    S: StoragePort,
    M: MediaToolkit,
{
    pub fn new(storage: S, media: M, work_dir: PathBuf) -> Self {
        Self {
            storage,
            media,
            work_dir,
        }
    }

    pub async fn merge_urls(
        &self,
        batch_id: &str,
        urls: &[String],
        progress: &UnboundedSender<MergeProgress>,
        cancel: &CancellationToken,
    ) -> Result<MergedVideo, MergeError> {
        let report = |event: MergeProgress| {
            let _ = progress.send(event);
        };

        match urls {
            [] => return Err(MergeError::Empty),
            [only] => {
                debug!(batch_id, url = %only, "single segment, no merge needed");
                report(MergeProgress::new(MergeStage::Finalizing, 100).with_message("single segment, no merge needed"));
                return Ok(MergedVideo {
                    source: MediaSource::Remote(only.clone()),
                    extension: extension_from_locator(only)
                        .unwrap_or(DEFAULT_EXTENSION)
                        .to_string(),
                    duration_secs: None,
                    segment_count: 1,
                });
            }
            _ => {}
        }

        tokio::fs::create_dir_all(&self.work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("merge-")
            .tempdir_in(&self.work_dir)?;

        let inputs = self.download_all(urls, scratch.path(), &report, cancel).await?;

        report(MergeProgress::new(MergeStage::Merging, 0).with_message("probing segments"));
        let mut infos = Vec::with_capacity(inputs.len());
        for (position, input) in inputs.iter().enumerate() {
            let info = self
                .media
                .probe(input)
                .await
                .map_err(|source| MergeError::Probe {
                    index: position + 1,
                    source,
                })?;
            infos.push(info);
        }

        let layout = infos[0].clone();
        let mismatch = infos
            .iter()
            .skip(1)
            .find_map(|info| layout.is_concat_compatible(info).err());

        let extension = match mismatch {
            None => container_extension(&layout.format_name),
            Some(_) => DEFAULT_EXTENSION,
        };
        let output = self
            .work_dir
            .join(format!("merged-{}-{}.{}", batch_id, Uuid::new_v4(), extension));

        let joined = self
            .join(inputs, output.clone(), layout, mismatch, progress, &report, cancel)
            .await;
        if let Err(e) = joined {
            // No partial artifact survives a failed merge.
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }

        report(MergeProgress::new(MergeStage::Finalizing, 0));
        let durations: Vec<Option<f64>> = infos.iter().map(|info| info.duration_secs).collect();
        let merged = MergedVideo {
            source: MediaSource::Local(output),
            extension: extension.to_string(),
            duration_secs: total_duration(&durations),
            segment_count: urls.len(),
        };
        report(MergeProgress::new(MergeStage::Finalizing, 100));

        info!(
            batch_id,
            segments = urls.len(),
            duration = ?merged.duration_secs,
            output = %merged.source.locator(),
            "merged batch"
        );
        Ok(merged)
    }

    async fn download_all(
        &self,
        urls: &[String],
        scratch: &Path,
        report: &impl Fn(MergeProgress),
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>, MergeError> {
        report(MergeProgress::new(MergeStage::Downloading, 0));
        let mut inputs = Vec::with_capacity(urls.len());

        for (position, url) in urls.iter().enumerate() {
            let extension = extension_from_locator(url).unwrap_or(DEFAULT_EXTENSION);
            let local = scratch.join(format!("segment-{:03}.{}", position + 1, extension));

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MergeError::Cancelled),
                fetched = self.storage.download(url, &local) => {
                    fetched.map_err(|e| MergeError::Download {
                        index: position + 1,
                        url: url.clone(),
                        reason: e.to_string(),
                    })?;
                }
            }

            inputs.push(local);
            report(MergeProgress::fraction(MergeStage::Downloading, position + 1, urls.len()));
        }
        Ok(inputs)
    }

    /// Runs the toolkit to completion. Cancellation is handed to the toolkit
    /// rather than dropping its future, so once this returns nothing is
    /// still writing to `output`.
    #[allow(clippy::too_many_arguments)]
    async fn join(
        &self,
        inputs: Vec<PathBuf>,
        output: PathBuf,
        layout: MediaInfo,
        mismatch: Option<String>,
        progress: &UnboundedSender<MergeProgress>,
        report: &impl Fn(MergeProgress),
        cancel: &CancellationToken,
    ) -> Result<(), MergeError> {
        if cancel.is_cancelled() {
            return Err(MergeError::Cancelled);
        }
        match mismatch {
            None => {
                self.media
                    .concat_copy(inputs, output, progress.clone(), cancel.clone())
                    .await
                    .map_err(concat_error)?;
                report(MergeProgress::new(MergeStage::Merging, 100));
                report(MergeProgress::new(MergeStage::Encoding, 100).with_message("stream copy, no re-encode"));
            }
            Some(reason) => {
                warn!(%reason, "segments differ, re-encoding");
                report(MergeProgress::new(MergeStage::Merging, 100).with_message(reason));
                report(MergeProgress::new(MergeStage::Encoding, 0).with_message("re-encoding"));
                self.media
                    .concat_reencode(inputs, output, layout, cancel.clone())
                    .await
                    .map_err(concat_error)?;
                report(MergeProgress::new(MergeStage::Encoding, 100));
            }
        }
        Ok(())
    }
}

fn concat_error(error: MediaError) -> MergeError {
    match error {
        MediaError::Cancelled => MergeError::Cancelled,
        other => MergeError::Concat(other),
    }
}

#[async_trait]
impl<S, M> MergePort for MergeEngine<S, M>
where
    S: StoragePort,
    M: MediaToolkit,
{
    async fn merge(
        &self,
        batch_id: &str,
        urls: Vec<String>,
        progress: UnboundedSender<MergeProgress>,
        cancel: CancellationToken,
    ) -> Result<MergedVideo, MergeError> {
        self.merge_urls(batch_id, &urls, &progress, &cancel).await
    }
}
