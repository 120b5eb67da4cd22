use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use url::Url;

use super::error::DownloadError;
use crate::retry::{self, RetryAction, RetryConfig};

/// Last path segment of a media URL, ignoring the query string.
pub fn filename_for(url: &str) -> Result<String, DownloadError> {
    let invalid = |reason: &str| DownloadError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };
    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    let name = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .ok_or_else(|| invalid("no file name in path"))?;
    Ok(name.to_string())
}

/// `<name>.part` next to the destination.
fn part_path(download_path: &Path) -> PathBuf {
    let mut name = download_path
        .file_name()
        .map(OsString::from)
        .unwrap_or_default();
    name.push(".part");
    download_path.with_file_name(name)
}

/// Download `url` to `download_path` through a `.part` file.
///
/// Each attempt starts the `.part` file from scratch and renames it into
/// place once the body is complete. Transient failures are retried with
/// backoff.
pub async fn download_file(
    client: &Client,
    url: &str,
    download_path: &Path,
    retry_config: &RetryConfig,
) -> Result<u64, DownloadError> {
    let part = part_path(download_path);

    retry::retry_with_backoff(
        retry_config,
        |e: &DownloadError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || async {
            let _ = fs::remove_file(&part).await;
            attempt_download(client, url, download_path, &part).await
        },
    )
    .await
}

async fn attempt_download(
    client: &Client,
    url: &str,
    download_path: &Path,
    part_path: &Path,
) -> Result<u64, DownloadError> {
    let http_error = |source, bytes_written| DownloadError::Http {
        source,
        url: url.to_string(),
        bytes_written,
    };

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| http_error(e, 0))?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part_path)
        .await?;

    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| http_error(e, bytes_written))?;
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    fs::rename(part_path, download_path).await?;
    Ok(bytes_written)
}
