use std::path::{Path, PathBuf};

use anyhow::Context;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tempdir::TempDir;
use tokio::fs as async_fs;
use uuid::Uuid;

use crate::config::StorageConfig;

/// A stored image: its file name inside the vault and the URL it is served under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub file_name: String,
    pub url: String,
}

/// Directory of uploaded, clean and annotated images.
///
/// Without a configured directory the images live in a temporary directory that is removed
/// together with the vault.
pub struct ImageVault {
    root: PathBuf,
    url_prefix: String,
    _temp_dir: Option<TempDir>,
}

impl std::fmt::Debug for ImageVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageVault")
            .field("root", &self.root)
            .field("url_prefix", &self.url_prefix)
            .field("temporary", &self._temp_dir.is_some())
            .finish()
    }
}

impl ImageVault {
    pub fn new<P: AsRef<Path>>(dir: P, url_prefix: &str) -> anyhow::Result<Self> {
        let root = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create image directory {:?}", root))?;
        Ok(Self {
            root,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            _temp_dir: None,
        })
    }

    pub fn temporary(url_prefix: &str) -> anyhow::Result<Self> {
        let temp_dir = TempDir::new("palmread-images")
            .context("Failed to create temporary image directory")?;
        Ok(Self {
            root: temp_dir.path().to_path_buf(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            _temp_dir: Some(temp_dir),
        })
    }

    pub fn from_config(config: &StorageConfig) -> anyhow::Result<Self> {
        match &config.image_dir {
            Some(dir) => Self::new(dir, config.url_prefix()),
            None => Self::temporary(config.url_prefix()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.url_prefix, file_name)
    }

    /// Path of a stored file. Rejects names that would escape the vault.
    pub fn path_for(&self, file_name: &str) -> anyhow::Result<PathBuf> {
        let valid = !file_name.is_empty()
            && !file_name.contains(['/', '\\'])
            && file_name != "."
            && file_name != "..";
        if !valid {
            anyhow::bail!("Invalid image name {:?}", file_name);
        }
        Ok(self.root.join(file_name))
    }

    fn new_ref(&self, suffix: &str, extension: &str) -> anyhow::Result<(ImageRef, PathBuf)> {
        let file_name = format!("{}{}.{}", Uuid::new_v4(), suffix, extension);
        let path = self.path_for(&file_name)?;
        let url = self.url_for(&file_name);
        Ok((ImageRef { file_name, url }, path))
    }

    /// Save raw upload bytes, keeping their format.
    pub fn store_bytes(&self, bytes: &[u8]) -> anyhow::Result<ImageRef> {
        let extension = image::guess_format(bytes)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("bin");
        let (image_ref, path) = self.new_ref("", extension)?;
        std::fs::write(&path, bytes)
            .with_context(|| format!("Failed to write image {:?}", path))?;
        Ok(image_ref)
    }

    /// Save an image as PNG. `suffix` is appended to the uuid, e.g. `_annotated`.
    pub fn store_image(&self, img: &DynamicImage, suffix: &str) -> anyhow::Result<ImageRef> {
        let (image_ref, path) = self.new_ref(suffix, "png")?;
        img.save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("Failed to save image {:?}", path))?;
        Ok(image_ref)
    }

    pub async fn load(&self, file_name: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.path_for(file_name)?;
        async_fs::read(&path)
            .await
            .with_context(|| format!("Failed to read image {:?}", path))
    }
}
