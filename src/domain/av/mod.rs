//! Audio/Video domain modules.
//!
//! Everything in here is blocking ffmpeg work; callers run it on the
//! blocking pool.

use thiserror::Error;

pub mod concat;
pub mod frame;
pub mod probe;

/// Failure inside an ffmpeg-backed media operation.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("No video stream found in {0}")]
    NoVideoStream(String),

    #[error("Failed to decode: {0}")]
    Decode(String),

    #[error("Failed to encode: {0}")]
    Encode(String),

    #[error("Inputs cannot be stream-copied together: {0}")]
    Incompatible(String),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Background task failed: {0}")]
    Join(String),

    #[error("Stopped before completion")]
    Cancelled,
}

impl From<ffmpeg_next::Error> for MediaError {
    fn from(error: ffmpeg_next::Error) -> Self {
        MediaError::Ffmpeg(error.to_string())
    }
}

impl From<tokio::task::JoinError> for MediaError {
    fn from(error: tokio::task::JoinError) -> Self {
        MediaError::Join(error.to_string())
    }
}
