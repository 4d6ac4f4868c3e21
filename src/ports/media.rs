use crate::domain::av::frame::{ExtractedFrame, FramePosition};
use crate::domain::av::probe::MediaInfo;
use crate::domain::av::MediaError;
use crate::domain::progress::MergeProgress;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Local media operations on files already on disk.
///
/// The long-running operations take a `stop` token. Implementations return
/// `MediaError::Cancelled` once it fires and must not touch their output
/// after returning.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError>;

    async fn extract_frame(
        &self,
        path: &Path,
        position: FramePosition,
        stop: CancellationToken,
    ) -> Result<ExtractedFrame, MediaError>;

    /// Join `inputs` in order without re-encoding, reporting `Merging` progress.
    async fn concat_copy(
        &self,
        inputs: Vec<PathBuf>,
        output: PathBuf,
        progress: UnboundedSender<MergeProgress>,
        stop: CancellationToken,
    ) -> Result<(), MediaError>;

    /// Join `inputs` in order, re-encoding to `layout`'s dimensions.
    async fn concat_reencode(
        &self,
        inputs: Vec<PathBuf>,
        output: PathBuf,
        layout: MediaInfo,
        stop: CancellationToken,
    ) -> Result<(), MediaError>;
}
