use crate::domain::av::frame::{ExtractedFrame, FramePosition};
use crate::domain::av::MediaError;
use crate::ports::media::MediaToolkit;
use crate::ports::pipeline::FrameSource;
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to decode {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: MediaError,
    },

    #[error("Timed out after {0:?} waiting for the decoder")]
    Timeout(Duration),

    #[error("Extraction cancelled")]
    Cancelled,

    #[error("Scratch file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fetches a video and pulls one still out of it.
pub struct FrameExtractor<S, M> {
    storage: S,
    media: M,
    work_dir: PathBuf,
    timeout: Duration,
}

impl<S, M> FrameExtractor<S, M>
where
    S: StoragePort,
    M: MediaToolkit,
{
    pub fn new(storage: S, media: M, work_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            storage,
            media,
            work_dir,
            timeout,
        }
    }

    pub async fn extract_frame(
        &self,
        url: &str,
        position: FramePosition,
        cancel: &CancellationToken,
    ) -> Result<ExtractedFrame, ExtractError> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        // Removed on drop, whichever way this function returns.
        let scratch = NamedTempFile::new_in(&self.work_dir)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
            fetched = self.storage.download(url, scratch.path()) => {
                fetched.map_err(|e| ExtractError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            }
        }

        // Cancelled on every return so an abandoned decode stops reading the scratch file.
        let stop = cancel.child_token();
        let _stop_on_exit = stop.clone().drop_guard();

        let decode = tokio::time::timeout(self.timeout, self.media.extract_frame(scratch.path(), position, stop));
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
            decoded = decode => match decoded {
                Err(_) => return Err(ExtractError::Timeout(self.timeout)),
                Ok(Err(MediaError::Cancelled)) => return Err(ExtractError::Cancelled),
                Ok(result) => result.map_err(|source| ExtractError::Decode {
                    url: url.to_string(),
                    source,
                })?,
            },
        };

        debug!(
            url,
            timestamp = frame.timestamp_secs,
            width = frame.width,
            height = frame.height,
            "extracted frame"
        );
        Ok(frame)
    }
}

#[async_trait]
impl<S, M> FrameSource for FrameExtractor<S, M>
where
    S: StoragePort,
    M: MediaToolkit,
{
    async fn extract(
        &self,
        url: &str,
        position: FramePosition,
        cancel: CancellationToken,
    ) -> Result<ExtractedFrame, ExtractError> {
        self.extract_frame(url, position, &cancel).await
    }
}
