//! Renderer and object-storage clients plus image dimension probing.
//!
//! - [`HttpRenderer`] posts an excerpt to a code-image service and returns the image bytes.
//! - [`FsObjectStorage`] writes images under a local directory and hands back `file://` URLs.
//! - [`image_dimensions`] reads width/height from PNG or JPEG headers.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::config::{RendererConfig, StorageConfig};
use crate::models::RenderOptions;
use crate::traits::{ObjectStorage, Renderer, UploadTarget};

/// Client for an HTTP code-to-image service.
///
/// Sends `POST {renderer.url}` with a JSON body
/// `{code, language, filePath, theme, showLineNumbers, fontSize}` and
/// expects raw image bytes back.
pub struct HttpRenderer {
    client: reqwest::Client,
    url: String,
}

impl HttpRenderer {
    pub fn new(config: &RendererConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(
        &self,
        code: &str,
        language: &str,
        file_path: &str,
        options: &RenderOptions,
    ) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "code": code,
            "language": language,
            "filePath": file_path,
            "theme": options.theme,
            "showLineNumbers": options.show_line_numbers,
            "fontSize": options.font_size,
        });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Renderer unreachable at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Renderer error {}: {}", status, body_text);
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            bail!("Renderer returned an empty image for {}", file_path);
        }
        Ok(bytes.to_vec())
    }
}

/// Stores images as `{dir}/{user_id}/{repository_id}/{uuid}.png`.
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: config.dir.clone(),
        }
    }

    fn path_from_url(&self, url: &str) -> Result<PathBuf> {
        let path = Path::new(
            url.strip_prefix("file://")
                .ok_or_else(|| anyhow::anyhow!("Not a file URL: {}", url))?,
        );
        // starts_with compares components, so `..` must be rejected first
        let escapes = path.components().any(|c| c == Component::ParentDir);
        if escapes || !path.starts_with(&self.root) {
            bail!("Refusing to delete outside storage root: {}", url);
        }
        Ok(path.to_path_buf())
    }
}

/// Keep path components to a safe character set.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn upload(&self, bytes: &[u8], target: &UploadTarget) -> Result<String> {
        let dir = self
            .root
            .join(sanitize(&target.user_id))
            .join(sanitize(&target.repository_id));
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;

        let path = dir.join(format!("{}.png", Uuid::new_v4()));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write image: {}", path.display()))?;

        Ok(format!("file://{}", path.display()))
    }

    async fn delete(&self, url: &str) -> Result<()> {
        let path = self.path_from_url(url)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete image: {}", path.display())),
        }
    }
}

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Width and height from a PNG or JPEG header, if recognizable.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.starts_with(PNG_SIGNATURE) {
        // IHDR is always the first chunk: length(4) type(4) width(4) height(4)
        if bytes.len() < 24 || &bytes[12..16] != b"IHDR" {
            return None;
        }
        let width = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
        let height = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
        return (width > 0 && height > 0).then_some((width, height));
    }

    if bytes.starts_with(&[0xff, 0xd8]) {
        return jpeg_dimensions(bytes);
    }

    None
}

fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 9 < bytes.len() {
        if bytes[i] != 0xff {
            return None;
        }
        let marker = bytes[i + 1];
        let len = u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]) as usize;
        // SOF0..SOF15 except DHT (C4), JPG (C8), DAC (CC)
        if (0xc0..=0xcf).contains(&marker) && ![0xc4, 0xc8, 0xcc].contains(&marker) {
            let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]) as u32;
            let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]) as u32;
            return (width > 0 && height > 0).then_some((width, height));
        }
        i += 2 + len;
    }
    None
}
