use std::path::Path;
use std::time::Duration;
use async_trait::async_trait;
use log::debug;
use reqwest::Url;
use tokio::io::AsyncWriteExt;
use crate::error::FetchError;

/// Longest response body quoted back in an HTTP error
const MAX_ERROR_BODY: usize = 2000;

/// Source of attachment bytes
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stream the resource at `url` into `dest`, returning the number of bytes written
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, FetchError>;
}

/// Fetches `http(s)://` URLs with reqwest and copies `file://` URLs locally
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(HttpFetcher { client })
    }

    async fn fetch_http(&self, url: Url, dest: &Path) -> Result<u64, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: truncate(body.trim(), MAX_ERROR_BODY),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_to(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::Transport(format!("invalid URL {}: {}", url, e)))?;
        debug!("Fetching {} -> {}", parsed, dest.display());

        match parsed.scheme() {
            "http" | "https" => self.fetch_http(parsed, dest).await,
            "file" => {
                let source = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::Transport(format!("invalid file URL: {}", url)))?;
                Ok(tokio::fs::copy(&source, dest).await?)
            }
            other => Err(FetchError::Transport(format!("unsupported URL scheme: {}", other))),
        }
    }
}

/// `file://` URL for an absolute local path
pub fn file_url(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(String::from)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
