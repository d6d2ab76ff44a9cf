//! Integration tests for error types

#[cfg(test)]
mod tests {
    use vessel_errors::*;

    #[test]
    fn test_error_conversion() {
        let net_err = NetworkError::Timeout {
            url: "https://example.com".into(),
        };
        let err: Error = net_err.into();
        assert!(matches!(err, Error::Network(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::DiskFull {
            path: "/var/lib/vessel".into(),
        };
        assert_eq!(err.to_string(), "disk full: /var/lib/vessel");
    }

    #[test]
    fn test_error_clone() {
        let err = RecipeError::NotFound {
            name: "zlib".into(),
        };
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "test");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::PermissionDenied { .. }));
    }

    #[test]
    fn test_full_disk_maps_to_disk_full() {
        let io_err = std::io::Error::from(std::io::ErrorKind::StorageFull);
        let err = StorageError::from_io_with_path(&io_err, std::path::Path::new("/data/store/x"));
        assert!(matches!(err, StorageError::DiskFull { ref path } if path == "/data/store/x"));
        assert_eq!(err.user_code(), Some("storage.disk_full"));
        assert!(err.user_hint().is_some());
    }

    #[test]
    fn test_missing_sum_hint_mentions_sum_command() {
        let err: Error = RecipeError::MissingSum {
            name: "zlib".into(),
            path: "https://zlib.net/zlib.tar.gz".into(),
        }
        .into();
        assert_eq!(err.user_code(), Some("recipe.missing_sum"));
        assert!(err.user_hint().is_some_and(|h| h.contains("vessel sum")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_hash_mismatch_is_not_transient() {
        let err: Error = NetworkError::HashMismatch {
            url: "https://example.com/a.tar.gz".into(),
            expected: "abc".into(),
            actual: "def".into(),
        }
        .into();
        assert!(!err.is_transient());
        assert_eq!(err.user_code(), Some("network.hash_mismatch"));
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let err = NetworkError::HttpError {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_retryable());
        let err = NetworkError::HttpError {
            status: 404,
            message: "missing".into(),
        };
        assert!(!err.is_retryable());
    }
}
