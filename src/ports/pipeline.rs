//! Contracts the orchestrator drives; the application services implement them.

use crate::application::frames::ExtractError;
use crate::application::merge::{MergeError, MergedVideo};
use crate::application::sink::{SinkError, SinkOutcome};
use crate::domain::av::frame::{ExtractedFrame, FramePosition};
use crate::domain::progress::MergeProgress;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn extract(
        &self,
        url: &str,
        position: FramePosition,
        cancel: CancellationToken,
    ) -> Result<ExtractedFrame, ExtractError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MergePort: Send + Sync {
    /// Merge `urls`, which are in segment order, into one video.
    async fn merge(
        &self,
        batch_id: &str,
        urls: Vec<String>,
        progress: UnboundedSender<MergeProgress>,
        cancel: CancellationToken,
    ) -> Result<MergedVideo, MergeError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultPort: Send + Sync {
    async fn deliver(&self, video: MergedVideo) -> Result<SinkOutcome, SinkError>;
}
