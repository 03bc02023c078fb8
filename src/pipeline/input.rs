//! Input resolution: turn a user-supplied path or URL into raw page HTML.
//!
//! This is the Content Provider seam. A browser host hands the library
//! `(url, html)` directly; the CLI reads a saved page from disk or downloads
//! it, attaching the configured cookie / authorization so pages behind a
//! login can be fetched.

use crate::config::ConversionConfig;
use crate::error::Wiki2MdError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE, USER_AGENT};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// A page as supplied by the Content Provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    /// Where the page came from; used as the origin for relative URLs.
    pub url: String,
    pub html: String,
}

impl RawPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to page HTML.
///
/// If the input is a URL, download it. Otherwise read it as a local file.
pub async fn resolve_input(
    input: &str,
    config: &ConversionConfig,
) -> Result<RawPage, Wiki2MdError> {
    if input.trim().is_empty() {
        return Err(Wiki2MdError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, config).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<RawPage, Wiki2MdError> {
    let path: PathBuf = path.to_path_buf();
    let html = match tokio::fs::read(&path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Wiki2MdError::PermissionDenied { path });
        }
        Err(_) => return Err(Wiki2MdError::FileNotFound { path }),
    };

    let url = std::fs::canonicalize(&path)
        .ok()
        .and_then(|abs| reqwest::Url::from_file_path(abs).ok())
        .map(|u| u.to_string())
        .unwrap_or_else(|| path.display().to_string());

    debug!("Read local page: {} ({} bytes)", path.display(), html.len());
    Ok(RawPage { url, html })
}

/// Default headers for every request made on behalf of `config`.
///
/// Credentials are included only when `with_credentials` is set; the image
/// fallback fetches anonymously.
pub(crate) fn request_headers(config: &ConversionConfig, with_credentials: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(&config.user_agent) {
        headers.insert(USER_AGENT, v);
    }
    if with_credentials {
        if let Some(v) = config
            .cookie
            .as_deref()
            .and_then(|c| HeaderValue::from_str(c).ok())
        {
            headers.insert(COOKIE, v);
        }
        if let Some(v) = config
            .authorization
            .as_deref()
            .and_then(|a| HeaderValue::from_str(a).ok())
        {
            headers.insert(AUTHORIZATION, v);
        }
    }
    headers
}

async fn download_url(url: &str, config: &ConversionConfig) -> Result<RawPage, Wiki2MdError> {
    info!("Downloading page from: {}", url);
    let timeout_secs = config.download_timeout_secs;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .default_headers(request_headers(config, true))
        .build()
        .map_err(|e| Wiki2MdError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Wiki2MdError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Wiki2MdError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Wiki2MdError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    // Redirects (e.g. short links) change the effective origin.
    let final_url = response.url().to_string();
    let html = response
        .text()
        .await
        .map_err(|e| Wiki2MdError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes from {}", html.len(), final_url);
    Ok(RawPage {
        url: final_url,
        html,
    })
}
