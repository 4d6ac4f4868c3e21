use async_trait::async_trait;
use std::error::Error;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Fetch the resource at `url` into `local_path`
    async fn download(&self, url: &str, local_path: &Path)
        -> Result<(), Box<dyn Error + Send + Sync>>;
}
