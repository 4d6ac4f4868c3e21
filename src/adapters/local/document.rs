//! A host document kept on disk: a JSON manifest of placed elements next to
//! the media files they reference.

use crate::application::merge::MergedVideo;
use crate::ports::document::DocumentPort;
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

pub const MANIFEST: &str = "document.json";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub src: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub elements: Vec<Element>,
}

pub async fn read_manifest(path: &Path) -> Result<Manifest, Box<dyn Error + Send + Sync>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Manifest::default()),
        Err(e) => Err(e.into()),
    }
}

pub struct FsDocument<S> {
    storage: S,
    root: PathBuf,
    download_dir: PathBuf,
    // Serialises manifest read-modify-write.
    manifest_lock: Mutex<()>,
}

impl<S> FsDocument<S>
where
    S: StoragePort,
{
    pub fn new(storage: S, root: PathBuf, download_dir: PathBuf) -> Self {
        Self {
            storage,
            root,
            download_dir,
            manifest_lock: Mutex::new(()),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST)
    }
}

#[async_trait]
impl<S> DocumentPort for FsDocument<S>
where
    S: StoragePort,
{
    async fn insert_media(&self, video: &MergedVideo) -> Result<String, Box<dyn Error + Send + Sync>> {
        let id = Uuid::new_v4().to_string();
        let media_dir = self.root.join("media");
        tokio::fs::create_dir_all(&media_dir).await?;

        let file_name = format!("{}.{}", id, video.extension);
        let target = media_dir.join(&file_name);
        self.storage.download(&video.source.locator(), &target).await?;

        let _guard = self.manifest_lock.lock().await;
        let manifest_path = self.manifest_path();
        let mut manifest = read_manifest(&manifest_path).await?;
        manifest.elements.push(Element {
            id: id.clone(),
            kind: "video".into(),
            src: format!("media/{}", file_name),
            x: 0,
            y: 0,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        });

        let staged = manifest_path.with_extension("json.tmp");
        tokio::fs::write(&staged, serde_json::to_vec_pretty(&manifest)?).await?;
        tokio::fs::rename(&staged, &manifest_path).await?;

        info!(element_id = %id, src = %target.display(), "video placed in document");
        Ok(id)
    }

    async fn trigger_download(
        &self,
        video: &MergedVideo,
        filename: &str,
    ) -> Result<PathBuf, Box<dyn Error + Send + Sync>> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let target = self.download_dir.join(filename);
        self.storage.download(&video.source.locator(), &target).await?;
        info!(path = %target.display(), "video saved for download");
        Ok(target)
    }
}
