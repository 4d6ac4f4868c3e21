use crate::domain::av::frame::{self, ExtractedFrame, FramePosition};
use crate::domain::av::probe::{self, MediaInfo};
use crate::domain::av::{concat, MediaError};
use crate::domain::progress::{MergeProgress, MergeStage};
use crate::ports::media::MediaToolkit;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task;
use tokio_util::sync::CancellationToken;

/// `MediaToolkit` over libav through ffmpeg-next, with the `ffmpeg` CLI for re-encodes.
#[derive(Clone, Copy, Default)]
pub struct FfmpegToolkit;

impl FfmpegToolkit {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, MediaError> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || probe::probe(&path)).await?
    }

    async fn extract_frame(
        &self,
        path: &Path,
        position: FramePosition,
        stop: CancellationToken,
    ) -> Result<ExtractedFrame, MediaError> {
        let path = path.to_path_buf();
        task::spawn_blocking(move || frame::extract_frame(&path, position, &stop)).await?
    }

    async fn concat_copy(
        &self,
        inputs: Vec<PathBuf>,
        output: PathBuf,
        progress: UnboundedSender<MergeProgress>,
        stop: CancellationToken,
    ) -> Result<(), MediaError> {
        task::spawn_blocking(move || {
            let total = inputs.len();
            concat::concat_stream_copy(&inputs, &output, &stop, |done| {
                let _ = progress.send(MergeProgress::fraction(MergeStage::Merging, done, total));
            })
        })
        .await?
    }

    async fn concat_reencode(
        &self,
        inputs: Vec<PathBuf>,
        output: PathBuf,
        layout: MediaInfo,
        stop: CancellationToken,
    ) -> Result<(), MediaError> {
        let with_audio = layout.has_audio();
        concat::concat_reencode(&inputs, &output, &layout, with_audio, &stop).await
    }
}
