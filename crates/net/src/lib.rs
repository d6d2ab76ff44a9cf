#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Network operations for vessel
//!
//! This crate handles every HTTP interaction: recipe and car lookups,
//! input downloads into the content cache, and HEAD requests, all through a
//! pooled client that retries transient failures with exponential backoff.

mod client;
mod download;
pub mod vanity;

pub use client::{ensure_success, NetClient, NetConfig};
pub use download::{cache_key, download_verified, fetch_to_cache, sum_file, DownloadResult};
pub use vanity::{discover, parse_meta_imports, MetaImport};

use vessel_errors::{Error, NetworkError};
use vessel_events::{EventEmitter, EventSender};
use url::Url;

/// Fetch text content from a URL
///
/// # Errors
///
/// Returns an error if the HTTP request fails, the server returns an error status,
/// or the response body cannot be decoded as text.
pub async fn fetch_text(client: &NetClient, url: &str, tx: &EventSender) -> Result<String, Error> {
    tx.emit_debug(format!("Fetching text from {url}"));

    let response = client.get(url).await?;
    ensure_success(&response)?;

    response
        .text()
        .await
        .map_err(|e| NetworkError::DownloadFailed(e.to_string()).into())
}

/// Fetch text content, returning `None` on 404
///
/// Lookups try several candidate layouts; a missing file is not an error there.
///
/// # Errors
///
/// Returns an error for any failure other than a 404 response.
pub async fn fetch_text_optional(
    client: &NetClient,
    url: &str,
    tx: &EventSender,
) -> Result<Option<String>, Error> {
    tx.emit_debug(format!("Checking {url}"));

    let response = client.get(url).await?;
    if response.status() == reqwest::StatusCode::NOT_FOUND {
        return Ok(None);
    }
    ensure_success(&response)?;

    response
        .text()
        .await
        .map(Some)
        .map_err(|e| NetworkError::DownloadFailed(e.to_string()).into())
}

/// Fetch binary content from a URL
///
/// # Errors
///
/// Returns an error if the HTTP request fails, the server returns an error status,
/// or the response body cannot be read as bytes.
pub async fn fetch_bytes(
    client: &NetClient,
    url: &str,
    tx: &EventSender,
) -> Result<Vec<u8>, Error> {
    tx.emit_debug(format!("Fetching bytes from {url}"));

    let response = client.get(url).await?;
    ensure_success(&response)?;

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| NetworkError::DownloadFailed(e.to_string()).into())
}

/// Strong `ETag` reported by a HEAD request, if the server sends a quoted one
///
/// # Errors
///
/// Returns an error if the request fails or the server returns an error status.
pub async fn head_etag(client: &NetClient, url: &str) -> Result<Option<String>, Error> {
    let response = client.head(url).await?;
    ensure_success(&response)?;

    Ok(response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .filter(|v| v.starts_with('"') && v.ends_with('"') && v.len() >= 2)
        .map(str::to_string))
}

/// Upload `body` to `url`, returning the `ETag` the server assigned
///
/// # Errors
///
/// Returns an error if the request fails or the server returns an error status.
pub async fn put_bytes(
    client: &NetClient,
    url: &str,
    body: bytes::Bytes,
    content_type: &str,
    token: Option<&str>,
    tx: &EventSender,
) -> Result<Option<String>, Error> {
    tx.emit_debug(format!("Uploading {} bytes to {url}", body.len()));

    let response = client.put(url, body, content_type, token).await?;
    ensure_success(&response)?;

    Ok(response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string))
}

/// Check if a URL is accessible
///
/// # Errors
///
/// Returns an error if there are network issues preventing the HEAD request.
/// Note: This function returns `Ok(false)` for inaccessible URLs rather than errors.
pub async fn check_url(client: &NetClient, url: &str) -> Result<bool, Error> {
    match client.head(url).await {
        Ok(response) => Ok(response.status().is_success()),
        Err(_) => Ok(false),
    }
}

/// Parse and validate a URL
///
/// # Errors
///
/// Returns an error if the URL string is malformed or invalid according to RFC 3986.
pub fn parse_url(url: &str) -> Result<Url, Error> {
    Url::parse(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_url() {
        assert!(parse_url("https://example.com").is_ok());
        assert!(parse_url("not a url").is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let client = NetClient::new(NetConfig {
            retry_delay: Duration::from_millis(500),
            ..NetConfig::default()
        })
        .unwrap();
        assert_eq!(client.backoff(1), Duration::from_millis(500));
        assert_eq!(client.backoff(2), Duration::from_millis(1000));
        assert_eq!(client.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_cache_key_is_stable_base58() {
        let key = cache_key("https://example.com/a.tar.gz");
        assert_eq!(key, cache_key("https://example.com/a.tar.gz"));
        assert!(key.bytes().all(vessel_hash::is_base58_byte));
    }
}
