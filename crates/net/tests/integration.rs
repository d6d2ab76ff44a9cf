//! Integration tests for net crate

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use httpmock::Method::HEAD;
    use std::time::Duration;
    use tempfile::tempdir;
    use vessel_errors::{Error, NetworkError};
    use vessel_events::{channel, AppEvent, DownloadEvent};
    use vessel_hash::{Sum, SumAlgo};
    use vessel_net::*;

    fn fast_client() -> NetClient {
        NetClient::new(NetConfig {
            retry_delay: Duration::from_millis(5),
            ..NetConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_download_verified_b2() {
        let server = MockServer::start();
        let (tx, mut rx) = channel();

        let content = b"test file content";
        let mock = server.mock(|when, then| {
            when.method(GET).path("/test.tar.gz");
            then.status(200)
                .header("content-length", content.len().to_string())
                .body(content);
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("downloaded");
        let client = fast_client();
        let expected = Sum::b2_of(content);

        let result = download_verified(
            &client,
            &server.url("/test.tar.gz"),
            &dest,
            Some(&expected),
            &tx,
        )
        .await
        .unwrap();

        mock.assert();
        assert_eq!(result.size, content.len() as u64);
        assert_eq!(result.sum, Some(expected));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), content);

        let mut saw_start = false;
        let mut saw_complete = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::Download(DownloadEvent::Started { .. }) => saw_start = true,
                AppEvent::Download(DownloadEvent::Completed { .. }) => saw_complete = true,
                _ => {}
            }
        }
        assert!(saw_start);
        assert!(saw_complete);
    }

    #[tokio::test]
    async fn test_put_bytes_sends_token_and_returns_etag() {
        let server = MockServer::start();
        let (tx, _rx) = channel();

        let mock = server.mock(|when, then| {
            when.method(PUT)
                .path("/cars/a.car")
                .header("authorization", "Bearer secret")
                .header("content-type", "application/x-vessel-car")
                .body("car bytes");
            then.status(200).header("etag", "\"abc\"");
        });

        let etag = put_bytes(
            &fast_client(),
            &server.url("/cars/a.car"),
            bytes::Bytes::from_static(b"car bytes"),
            "application/x-vessel-car",
            Some("secret"),
            &tx,
        )
        .await
        .unwrap();

        mock.assert();
        assert_eq!(etag.as_deref(), Some("\"abc\""));
    }

    #[tokio::test]
    async fn test_put_bytes_rejected() {
        let server = MockServer::start();
        let (tx, _rx) = channel();

        server.mock(|when, then| {
            when.method(PUT).path("/denied");
            then.status(403);
        });

        let err = put_bytes(
            &fast_client(),
            &server.url("/denied"),
            bytes::Bytes::new(),
            "application/octet-stream",
            None,
            &tx,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Network(NetworkError::HttpError { status: 403, .. })
        ));
    }

    #[tokio::test]
    async fn test_sha256_mismatch_leaves_no_file() {
        let server = MockServer::start();
        let (tx, _rx) = channel();

        server.mock(|when, then| {
            when.method(GET).path("/a");
            then.status(200).body("actual bytes");
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("a");
        let wrong = Sum::new(SumAlgo::Sha256, "00".repeat(32));

        let error = download_verified(&fast_client(), &server.url("/a"), &dest, Some(&wrong), &tx)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Network(NetworkError::HashMismatch { .. })
        ));
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_etag_compares_header() {
        let server = MockServer::start();
        let (tx, _rx) = channel();

        server.mock(|when, then| {
            when.method(GET).path("/tagged");
            then.status(200).header("etag", "\"abc123\"").body("x");
        });

        let temp = tempdir().unwrap();
        let client = fast_client();
        let url = server.url("/tagged");

        let ok = Sum::new(SumAlgo::Etag, "\"abc123\"");
        let result = download_verified(&client, &url, &temp.path().join("ok"), Some(&ok), &tx)
            .await
            .unwrap();
        assert_eq!(result.etag.as_deref(), Some("\"abc123\""));

        let bad = Sum::new(SumAlgo::Etag, "\"other\"");
        assert!(
            download_verified(&client, &url, &temp.path().join("bad"), Some(&bad), &tx)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_cache_reuses_matching_entry() {
        let server = MockServer::start();
        let (tx, mut rx) = channel();

        let content = b"cached input";
        let mock = server.mock(|when, then| {
            when.method(GET).path("/input.tar.gz");
            then.status(200).body(content);
        });

        let cache = tempdir().unwrap();
        let client = fast_client();
        let url = server.url("/input.tar.gz");
        let sum = Sum::b2_of(content);

        let first = fetch_to_cache(&client, cache.path(), &url, Some(&sum), &tx)
            .await
            .unwrap();
        assert!(!first.cached);
        assert_eq!(first.path, cache.path().join(cache_key(&url)));

        let second = fetch_to_cache(&client, cache.path(), &url, Some(&sum), &tx)
            .await
            .unwrap();
        assert!(second.cached);
        mock.assert_hits(1);

        let mut saw_hit = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, AppEvent::Download(DownloadEvent::CacheHit { .. })) {
                saw_hit = true;
            }
        }
        assert!(saw_hit);
    }

    #[tokio::test]
    async fn test_hash_mismatch_retried_exactly_once() {
        let server = MockServer::start();
        let (tx, mut rx) = channel();

        let mock = server.mock(|when, then| {
            when.method(GET).path("/corrupt");
            then.status(200).body("corrupted");
        });

        let cache = tempdir().unwrap();
        let url = server.url("/corrupt");
        let expected = Sum::b2_of(b"pristine");

        let error = fetch_to_cache(&fast_client(), cache.path(), &url, Some(&expected), &tx)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Network(NetworkError::HashMismatch { .. })
        ));
        mock.assert_hits(2);
        assert!(!cache.path().join(cache_key(&url)).exists());

        let mismatches = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, AppEvent::Download(DownloadEvent::HashMismatch { .. })))
            .count();
        assert_eq!(mismatches, 1);
    }

    #[tokio::test]
    async fn test_stale_cache_entry_is_refetched() {
        let server = MockServer::start();
        let (tx, _rx) = channel();

        let mock = server.mock(|when, then| {
            when.method(GET).path("/fresh");
            then.status(200).body("fresh");
        });

        let cache = tempdir().unwrap();
        let url = server.url("/fresh");
        std::fs::write(cache.path().join(cache_key(&url)), "stale").unwrap();

        let result = fetch_to_cache(&fast_client(), cache.path(), &url, Some(&Sum::b2_of(b"fresh")), &tx)
            .await
            .unwrap();

        assert!(!result.cached);
        mock.assert_hits(1);
        assert_eq!(std::fs::read(&result.path).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_server_errors_are_retried_with_backoff() {
        let server = MockServer::start();
        let (tx, mut rx) = channel();

        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503);
        });

        let client = fast_client().with_events(tx.clone());
        let error = fetch_text(&client, &server.url("/flaky"), &tx)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Network(NetworkError::HttpError { status: 503, .. })
        ));
        mock.assert_hits(4);

        let delays: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|e| match e {
                AppEvent::Download(DownloadEvent::Retrying { delay_ms, .. }) => Some(delay_ms),
                _ => None,
            })
            .collect();
        assert_eq!(delays, vec![5, 10, 20]);
    }

    #[tokio::test]
    async fn test_fetch_text() {
        let server = MockServer::start();
        let (tx, _rx) = channel();

        let content = "Hello, world!";
        server.mock(|when, then| {
            when.method(GET).path("/text");
            then.status(200)
                .header("content-type", "text/plain")
                .body(content);
        });

        let text = fetch_text(&fast_client(), &server.url("/text"), &tx)
            .await
            .unwrap();
        assert_eq!(text, content);
    }

    #[tokio::test]
    async fn test_http_error_handling() {
        let server = MockServer::start();
        let (tx, _rx) = channel();

        let mock = server.mock(|when, then| {
            when.method(GET).path("/404");
            then.status(404).body("Not Found");
        });

        let client = fast_client();
        let url = server.url("/404");

        let error = fetch_text(&client, &url, &tx).await.unwrap_err();
        assert!(matches!(
            error,
            Error::Network(NetworkError::HttpError { status: 404, .. })
        ));
        assert_eq!(fetch_text_optional(&client, &url, &tx).await.unwrap(), None);
        mock.assert_hits(2);
    }

    #[tokio::test]
    async fn test_head_etag_requires_quotes() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(HEAD).path("/strong");
            then.status(200).header("etag", "\"v1\"");
        });
        server.mock(|when, then| {
            when.method(HEAD).path("/weak");
            then.status(200).header("etag", "W/\"v1\"");
        });

        let client = fast_client();
        assert_eq!(
            head_etag(&client, &server.url("/strong")).await.unwrap(),
            Some("\"v1\"".to_string())
        );
        assert_eq!(head_etag(&client, &server.url("/weak")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_check_url() {
        let server = MockServer::start();

        server.mock(|when, then| {
            when.method(HEAD).path("/exists");
            then.status(200);
        });

        server.mock(|when, then| {
            when.method(HEAD).path("/missing");
            then.status(404);
        });

        let client = fast_client();

        assert!(check_url(&client, &server.url("/exists")).await.unwrap());
        assert!(!check_url(&client, &server.url("/missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_vanity_discovery() {
        let server = MockServer::start();
        let repo = format!("{}/pkgs", server.address());

        let body = format!(
            r#"<html><head><meta name="vessel-import" content="{repo} git github.com/example/pkgs"></head></html>"#
        );
        let mock = server.mock(|when, then| {
            when.method(GET).path("/pkgs").query_param("vessel-get", "1");
            then.status(200).body(body);
        });

        let (tx, _rx) = channel();
        let client = fast_client();
        let found = discover(&client, "http", &repo, &tx).await.unwrap();

        mock.assert();
        assert_eq!(found.as_deref(), Some("github.com/example/pkgs"));
    }
}
