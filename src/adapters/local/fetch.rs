use super::fs::FsAdapter;
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::error::Error;
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::debug;

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Fetches segment results: `http(s)` over the network, anything else from disk.
#[derive(Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
    fs: FsAdapter,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            fs: FsAdapter::new(),
        }
    }

    async fn stream_to_file(&self, url: &str, path: &Path) -> Result<u64, Box<dyn Error + Send + Sync>> {
        let response = self.client.get(url).send().await?.error_for_status()?;

        let body = response
            .bytes_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        let body_reader = StreamReader::new(body);
        futures::pin_mut!(body_reader);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = BufWriter::new(File::create(path).await?);
        let written = tokio::io::copy(&mut body_reader, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl StoragePort for HttpFetcher {
    async fn download(
        &self,
        url: &str,
        local_path: &Path,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        if !is_remote(url) {
            return self.fs.download(url, local_path).await;
        }
        let written = self.stream_to_file(url, local_path).await?;
        debug!(url, bytes = written, path = %local_path.display(), "fetched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://cdn.example.com/seg1.mp4"));
        assert!(is_remote("http://localhost/seg1.mp4"));
        assert!(!is_remote("file:///tmp/seg1.mp4"));
        assert!(!is_remote("/tmp/seg1.mp4"));
    }

    #[tokio::test]
    async fn test_local_paths_go_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("seg.mp4");
        std::fs::write(&source, b"bytes").unwrap();
        let target = dir.path().join("out.mp4");

        HttpFetcher::default()
            .download(source.to_str().unwrap(), &target)
            .await
            .unwrap();
        assert_eq!(std::fs::read(target).unwrap(), b"bytes");
    }
}
