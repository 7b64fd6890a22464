//! Model downloading from `HuggingFace` repositories
//!
//! Files are fetched into a temporary directory and moved into the cache in
//! one rename, so a failed download never leaves a half-populated model behind.

use crate::cache::ModelCache;
use crate::error::{BgRemovalError, Result};
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Files that need to be downloaded for a `HuggingFace` model
const REQUIRED_FILES: &[&str] = &["config.json", "preprocessor_config.json"];

/// ONNX model files to attempt downloading
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Model downloader backed by a [`ModelCache`]
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| BgRemovalError::network_error("Failed to create HTTP client", e))?;

        Ok(Self { client, cache })
    }

    /// Download a model from a URL to the cache and return its model id
    ///
    /// Already cached models are not fetched again.
    ///
    /// # Errors
    /// - Unsupported URL format
    /// - Network errors during download
    /// - File system errors during caching
    pub async fn download_model(&self, url: &str) -> Result<String> {
        validate_model_url(url)?;
        let model_id = ModelCache::url_to_model_id(url);

        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {}", model_id);
            return Ok(model_id);
        }

        log::info!("⬇️  Downloading model {} from {}", model_id, url);
        let temp_dir = Self::create_temp_download_dir(&model_id)?;
        let final_dir = self.cache.get_model_path(&model_id);

        match self.download_model_files(url, &temp_dir).await {
            Ok(()) => {
                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir).map_err(|e| {
                        BgRemovalError::file_io_error(
                            "remove existing model directory",
                            &final_dir,
                            &e,
                        )
                    })?;
                }

                // rename fails across filesystems; fall back to copying the tree
                if let Err(rename_err) = fs::rename(&temp_dir, &final_dir) {
                    log::debug!("Rename into cache failed ({}), copying instead", rename_err);
                    copy_dir_all(&temp_dir, &final_dir).map_err(|e| {
                        BgRemovalError::file_io_error("move downloaded model to cache", &final_dir, &e)
                    })?;
                    if let Err(e) = fs::remove_dir_all(&temp_dir) {
                        log::warn!("Failed to cleanup temp directory: {}", e);
                    }
                }

                log::info!("✅ Downloaded model: {}", model_id);
                Ok(model_id)
            },
            Err(e) => {
                if temp_dir.exists() {
                    if let Err(cleanup_err) = fs::remove_dir_all(&temp_dir) {
                        log::warn!("Failed to cleanup temp directory: {}", cleanup_err);
                    }
                }
                Err(e)
            },
        }
    }

    fn create_temp_download_dir(model_id: &str) -> Result<PathBuf> {
        let temp_dir = std::env::temp_dir().join(format!("bgremove-server-{}", model_id));

        if temp_dir.exists() {
            fs::remove_dir_all(&temp_dir).map_err(|e| {
                BgRemovalError::file_io_error("remove existing temp directory", &temp_dir, &e)
            })?;
        }

        fs::create_dir_all(&temp_dir)
            .map_err(|e| BgRemovalError::file_io_error("create temp directory", &temp_dir, &e))?;

        Ok(temp_dir)
    }

    async fn download_model_files(&self, base_url: &str, download_dir: &Path) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", base_url.trim_end_matches('/'));

        for file_name in REQUIRED_FILES {
            let file_url = format!("{}{}", raw_base, file_name);
            self.download_file(&file_url, &download_dir.join(file_name))
                .await?;
        }

        // At least one variant must succeed
        let mut downloaded_models = 0;
        for (file_path, variant) in ONNX_FILES {
            let file_url = format!("{}{}", raw_base, file_path);
            match self
                .download_file(&file_url, &download_dir.join(file_path))
                .await
            {
                Ok(()) => {
                    downloaded_models += 1;
                    log::info!("Downloaded {} model variant", variant);
                },
                Err(e) => {
                    log::warn!("Failed to download {} variant: {}", variant, e);
                },
            }
        }

        if downloaded_models == 0 {
            return Err(BgRemovalError::network_error(
                "Failed to download any ONNX model variants",
                "no model files found",
            ));
        }

        Ok(())
    }

    async fn download_file(&self, url: &str, local_path: &Path) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BgRemovalError::file_io_error("create directory", parent, &e))?;
        }

        let response =
            self.client.get(url).send().await.map_err(|e| {
                BgRemovalError::network_error(format!("Failed to download {}", url), e)
            })?;

        if !response.status().is_success() {
            return Err(BgRemovalError::network_error(
                format!("HTTP error for {}", url),
                response.status(),
            ));
        }

        let total_size = response.content_length();
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| BgRemovalError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let downloaded = tokio::io::copy(&mut stream, &mut file)
            .await
            .map_err(|e| BgRemovalError::network_error("Failed to read download stream", e))?;

        file.flush()
            .await
            .map_err(|e| BgRemovalError::file_io_error("flush file", local_path, &e))?;

        log::debug!(
            "Downloaded {} of {} bytes to {}",
            downloaded,
            total_size.map_or_else(|| "?".to_string(), |t| t.to_string()),
            local_path.display()
        );
        Ok(())
    }

    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Only `HuggingFace` repository URLs are supported
///
/// # Errors
/// - URL is not an `https://huggingface.co/<org>/<repo>` URL
pub fn validate_model_url(url: &str) -> Result<()> {
    let repo = url
        .strip_prefix("https://huggingface.co/")
        .ok_or_else(|| {
            BgRemovalError::invalid_config(format!(
                "Unsupported URL format: {}. Only HuggingFace repositories are supported.",
                url
            ))
        })?
        .trim_end_matches('/');

    if repo.split('/').filter(|s| !s.is_empty()).count() != 2 {
        return Err(BgRemovalError::invalid_config(format!(
            "Expected https://huggingface.co/<org>/<repo>, got {}",
            url
        )));
    }
    Ok(())
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx").is_ok());
        assert!(validate_model_url("https://huggingface.co/imgly/isnet-general-onnx/").is_ok());
        assert!(validate_model_url("https://huggingface.co/imgly").is_err());
        assert!(validate_model_url("http://example.com/model.onnx").is_err());
    }

    #[tokio::test]
    async fn test_cached_model_is_not_downloaded_again() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = ModelCache::with_dir(dir.path()).unwrap();
        let model_dir = cache.get_model_path("imgly--isnet-general-onnx");
        fs::create_dir_all(model_dir.join("onnx")).unwrap();
        fs::write(model_dir.join("preprocessor_config.json"), "{}").unwrap();
        fs::write(model_dir.join("onnx/model.onnx"), b"x").unwrap();

        let downloader = ModelDownloader::new(cache).unwrap();
        let id = downloader
            .download_model("https://huggingface.co/imgly/isnet-general-onnx")
            .await
            .unwrap();
        assert_eq!(id, "imgly--isnet-general-onnx");
    }
}
