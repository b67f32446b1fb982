//! HTTP downloads.
//!
//! Files are streamed to disk chunk by chunk; JSON documents are buffered and
//! parsed separately so a bad body is distinguishable from a failed transfer.

use std::path::Path;

use futures::StreamExt;
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stream `url` into `dest`, returning the number of bytes written.
///
/// A partially written file is removed on failure.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<u64, DownloadError> {
    tracing::debug!(url, dest = %dest.display(), "Downloading");

    let result = stream_to(client, url, dest).await;
    if result.is_err() {
        tokio::fs::remove_file(dest).await.ok();
    }
    result
}

async fn stream_to(client: &Client, url: &str, dest: &Path) -> Result<u64, DownloadError> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?
        .error_for_status()?;

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        downloaded += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(downloaded)
}

/// GET `url` and deserialize the body as JSON. Non-2xx responses are errors.
pub async fn fetch_json<T: DeserializeOwned>(client: &Client, url: &str) -> Result<T, DownloadError> {
    let body = client
        .get(url)
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .send()
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    Ok(serde_json::from_slice(&body)?)
}
