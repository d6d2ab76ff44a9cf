//! Verified downloads into the input cache

use crate::client::{ensure_success, NetClient};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use vessel_errors::{Error, NetworkError};
use vessel_events::{AppEvent, DownloadEvent, EventEmitter, EventSender};
use vessel_hash::{Hash, Sum, SumAlgo, SumHasher};

/// Outcome of a verified transfer
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Final location of the bytes
    pub path: PathBuf,
    pub size: u64,
    /// Content sum computed while streaming (B2 unless the expected sum names another algorithm)
    pub sum: Option<Sum>,
    /// `ETag` response header, if the server sent one
    pub etag: Option<String>,
    /// True when an existing cache entry was reused
    pub cached: bool,
}

/// Cache file name for `url`: base58 BLAKE2b of the URL text
#[must_use]
pub fn cache_key(url: &str) -> String {
    Hash::from_data(url.as_bytes()).to_base58()
}

/// Download `url` to `dest`, verifying against `expected`
///
/// Bytes land in a temporary file beside `dest` and are renamed into place
/// only after verification, so a failed transfer never leaves a partial file.
///
/// # Errors
///
/// Returns `NetworkError::HashMismatch` when the bytes or `ETag` disagree
/// with `expected`, or any transport or I/O error.
pub async fn download_verified(
    client: &NetClient,
    url: &str,
    dest: &Path,
    expected: Option<&Sum>,
    tx: &EventSender,
) -> Result<DownloadResult, Error> {
    let response = client.get(url).await?;
    ensure_success(&response)?;

    let etag = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(sum) = expected.filter(|s| s.algo == SumAlgo::Etag) {
        let actual = etag.clone().unwrap_or_default();
        if !sum.matches_etag(&actual) {
            return Err(mismatch(url, &sum.value, &actual));
        }
    }

    tx.emit(AppEvent::Download(DownloadEvent::Started {
        url: url.to_string(),
        total_size: response.content_length(),
    }));

    let algo = expected
        .filter(|s| s.is_content_digest())
        .map_or(SumAlgo::B2, |s| s.algo);
    let mut hasher = SumHasher::for_algo(algo);

    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| Error::io_with_path(&e, parent))?;
    let temp = tempfile::Builder::new()
        .prefix(".download-")
        .tempfile_in(parent)
        .map_err(|e| Error::io_with_path(&e, parent))?;
    let (std_file, temp_path) = temp.into_parts();
    let mut file = tokio::fs::File::from_std(std_file);

    let mut stream = response.bytes_stream();
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| NetworkError::DownloadFailed(e.to_string()))?;
        if let Some(h) = hasher.as_mut() {
            h.update(&chunk);
        }
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    let sum = hasher.map(SumHasher::finalize);
    if let (Some(expected), Some(actual)) = (expected.filter(|s| s.is_content_digest()), &sum) {
        if expected.value != actual.value {
            // temp_path is removed on drop
            return Err(mismatch(url, &expected.value, &actual.value));
        }
    }

    temp_path
        .persist(dest)
        .map_err(|e| Error::io_with_path(&e.error, dest))?;

    tx.emit(AppEvent::Download(DownloadEvent::Completed {
        url: url.to_string(),
        final_size: size,
    }));

    Ok(DownloadResult {
        path: dest.to_path_buf(),
        size,
        sum,
        etag,
        cached: false,
    })
}

/// Fetch `url` into `cache_dir/<cache_key(url)>`
///
/// An existing entry is reused when it still matches a content sum, or when
/// only an `ETag` (or nothing) is recorded. A hash mismatch deletes the copy
/// and retries the transfer once before surfacing.
///
/// # Errors
///
/// Returns an error if the transfer fails or the bytes disagree with `expected` twice.
pub async fn fetch_to_cache(
    client: &NetClient,
    cache_dir: &Path,
    url: &str,
    expected: Option<&Sum>,
    tx: &EventSender,
) -> Result<DownloadResult, Error> {
    let dest = cache_dir.join(cache_key(url));

    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        if let Some(result) = reuse_cached(&dest, expected).await? {
            tx.emit(AppEvent::Download(DownloadEvent::CacheHit {
                url: url.to_string(),
            }));
            return Ok(result);
        }
        remove_quietly(&dest).await;
    }

    match download_verified(client, url, &dest, expected, tx).await {
        Err(Error::Network(NetworkError::HashMismatch {
            expected: want,
            actual,
            ..
        })) => {
            tx.emit(AppEvent::Download(DownloadEvent::HashMismatch {
                url: url.to_string(),
                expected: want,
                actual,
            }));
            remove_quietly(&dest).await;
            download_verified(client, url, &dest, expected, tx).await
        }
        other => other,
    }
}

async fn reuse_cached(path: &Path, expected: Option<&Sum>) -> Result<Option<DownloadResult>, Error> {
    let size = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?
        .len();

    let sum = match expected.filter(|s| s.is_content_digest()) {
        Some(want) => {
            let actual = sum_file(path, want.algo).await?;
            if actual.value != want.value {
                return Ok(None);
            }
            Some(actual)
        }
        None => None,
    };

    Ok(Some(DownloadResult {
        path: path.to_path_buf(),
        size,
        sum,
        etag: None,
        cached: true,
    }))
}

/// Compute a content sum of a local file
///
/// # Errors
///
/// Returns an error if the file cannot be read or `algo` is header-only.
pub async fn sum_file(path: &Path, algo: SumAlgo) -> Result<Sum, Error> {
    let mut hasher = SumHasher::for_algo(algo).ok_or_else(|| {
        Error::internal(format!("cannot compute {algo} sum of {}", path.display()))
    })?;
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "failed to remove cache entry");
    }
}

fn mismatch(url: &str, expected: &str, actual: &str) -> Error {
    NetworkError::HashMismatch {
        url: url.to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
    .into()
}
