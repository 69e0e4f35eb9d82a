//! Resource fetching for repositories and downloads.
//!
//! `http(s)://` goes through reqwest with optional basic auth; `file://`
//! reads from disk, which serves local mirrors.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use icy_core::{Credentials, IcyError, ResourceFetcher};
use icy_logging::redact_sensitive_data;
use reqwest::{Client, Url};
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("icy/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    async fn fetch_http(&self, url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>, reqwest::Error> {
        let mut request = self.client.get(url);
        if let Some(creds) = credentials.filter(|c| !c.login.is_empty()) {
            request = request.basic_auth(&creds.login, Some(&creds.password));
        }
        let bytes = request.send().await?.error_for_status()?.bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
        debug!(url = %redact_sensitive_data(url), "Fetching resource");
        let download_error = |message: String| IcyError::Download {
            url: redact_sensitive_data(url),
            message,
        };

        if url.starts_with("file://") {
            let path = Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| download_error("not a local file url".into()))?;
            return tokio::fs::read(&path)
                .await
                .map_err(|e| download_error(e.to_string()).into());
        }

        self.fetch_http(url, credentials)
            .await
            .map_err(|e| download_error(e.to_string()).into())
    }
}

/// Appends query parameters to an http(s) url; other schemes are returned unchanged.
pub fn with_query(url: &str, params: &[(&str, String)]) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if matches!(parsed.scheme(), "http" | "https") => {
            {
                let mut pairs = parsed.query_pairs_mut();
                for (key, value) in params {
                    pairs.append_pair(key, value);
                }
            }
            parsed.into()
        }
        _ => url.to_string(),
    }
}

/// `file://` url of a local path.
pub fn file_url(path: &Path) -> String {
    match Url::from_file_path(path) {
        Ok(url) => url.into(),
        Err(()) => format!("file://{}", path.display()),
    }
}
