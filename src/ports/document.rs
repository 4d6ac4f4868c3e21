use crate::application::merge::MergedVideo;
use async_trait::async_trait;
use std::error::Error;
use std::path::PathBuf;

/// The host document the merged video ends up in.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentPort: Send + Sync {
    /// Insert the video at the document's default location; returns the new element id.
    async fn insert_media(&self, video: &MergedVideo) -> Result<String, Box<dyn Error + Send + Sync>>;

    /// Hand the video to the user as a file download named `filename`.
    async fn trigger_download(
        &self,
        video: &MergedVideo,
        filename: &str,
    ) -> Result<PathBuf, Box<dyn Error + Send + Sync>>;
}
