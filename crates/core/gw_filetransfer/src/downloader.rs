//! The URL downloader: no partial-range resume since nothing here resumes a
//! download across process restarts, only a single in-memory attempt per
//! `url_download_initiate`.

use crate::error::FileTransferError;
use async_trait::async_trait;
use std::path::Path;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Fetches a URL into `download_directory`, naming the file after the URL's
/// last path segment. A trait so tests can substitute a fake without a live
/// HTTP server.
#[async_trait]
pub trait UrlDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<PathBuf, FileTransferError>;
}

pub struct ReqwestDownloader {
    client: reqwest::Client,
    download_directory: PathBuf,
}

impl ReqwestDownloader {
    pub fn new(download_directory: impl Into<PathBuf>) -> Self {
        ReqwestDownloader {
            client: reqwest::Client::new(),
            download_directory: download_directory.into(),
        }
    }

    fn file_name_for(url: &str) -> Result<String, FileTransferError> {
        let parsed = url::Url::parse(url).map_err(|_| FileTransferError::MalformedUrl(url.to_string()))?;
        parsed
            .path_segments()
            .and_then(|segments| segments.last())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| FileTransferError::MalformedUrl(url.to_string()))
    }
}

#[async_trait]
impl UrlDownloader for ReqwestDownloader {
    async fn download(&self, url: &str) -> Result<PathBuf, FileTransferError> {
        let file_name = Self::file_name_for(url)?;
        let target_path = self.download_directory.join(&file_name);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut file = File::create(&target_path).await.map_err(|source| FileTransferError::Io {
            path: target_path.display().to_string(),
            source,
        })?;

        let bytes = response.bytes().await?;
        file.write_all(&bytes).await.map_err(|source| FileTransferError::Io {
            path: target_path.display().to_string(),
            source,
        })?;

        Ok(target_path)
    }
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name().and_then(|name| name.to_str()).unwrap_or_default().to_string()
}
