//! Result Sink: puts the merged video in front of the user.

use crate::application::merge::{MediaSource, MergedVideo, DEFAULT_EXTENSION};
use crate::ports::document::DocumentPort;
use crate::ports::pipeline::ResultPort;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SinkOutcome {
    #[serde(rename_all = "camelCase")]
    Inserted {
        element_id: String,
        segment_count: usize,
    },
    /// Merged fine, but the document refused it; the user got a download instead.
    #[serde(rename_all = "camelCase")]
    DownloadedInstead {
        filename: String,
        path: PathBuf,
        insert_error: String,
    },
}

impl SinkOutcome {
    pub fn message(&self) -> String {
        match self {
            SinkOutcome::Inserted { segment_count, .. } => {
                format!("{} videos merged and inserted", segment_count)
            }
            SinkOutcome::DownloadedInstead { filename, .. } => {
                format!("Merged but insertion failed, downloaded instead as {}", filename)
            }
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(self, SinkOutcome::DownloadedInstead { .. })
    }
}

#[derive(Debug, Error)]
#[error("Could not insert ({insert}) or download ({download}) the merged video")]
pub struct SinkError {
    pub insert: String,
    pub download: String,
}

/// `merged-video-<unix millis>.<ext>`
pub fn download_filename(extension: &str, now: DateTime<Utc>) -> String {
    let extension = extension.trim_start_matches('.');
    let extension = if extension.is_empty() {
        DEFAULT_EXTENSION
    } else {
        extension
    };
    format!("merged-video-{}.{}", now.timestamp_millis(), extension)
}

pub struct ResultSink<D> {
    document: D,
}

impl<D> ResultSink<D>
where
    D: DocumentPort,
{
    pub fn new(document: D) -> Self {
        Self { document }
    }

    /// Insert the video, or fall back to a download. A local merge output is
    /// removed once either path has taken its own copy, and kept when both fail.
    pub async fn deliver_video(&self, video: &MergedVideo) -> Result<SinkOutcome, SinkError> {
        let insert_error = match self.document.insert_media(video).await {
            Ok(element_id) => {
                info!(element_id = %element_id, source = %video.source.locator(), "inserted merged video");
                discard_local(&video.source).await;
                return Ok(SinkOutcome::Inserted {
                    element_id,
                    segment_count: video.segment_count,
                });
            }
            Err(e) => e.to_string(),
        };

        warn!(error = %insert_error, "insertion failed, falling back to download");
        let filename = download_filename(&video.extension, Utc::now());
        match self.document.trigger_download(video, &filename).await {
            Ok(path) => {
                discard_local(&video.source).await;
                Ok(SinkOutcome::DownloadedInstead {
                    filename,
                    path,
                    insert_error,
                })
            }
            Err(e) => Err(SinkError {
                insert: insert_error,
                download: e.to_string(),
            }),
        }
    }
}

async fn discard_local(source: &MediaSource) {
    let MediaSource::Local(path) = source else {
        return;
    };
    remove_merged(path).await;
}

async fn remove_merged(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed merged output"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove merged output"),
    }
}

#[async_trait]
impl<D> ResultPort for ResultSink<D>
where
    D: DocumentPort,
{
    async fn deliver(&self, video: MergedVideo) -> Result<SinkOutcome, SinkError> {
        self.deliver_video(&video).await
    }
}
