//! Integration tests for signing

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use vessel_errors::{Error, SigningError};
    use vessel_hash::Hash;
    use vessel_signing::*;

    #[test]
    fn test_sign_and_verify() {
        let key = Keypair::from_seed(&[7u8; 32]);
        let digest = Hash::from_data(b"car bytes");
        let sig = key.sign_digest(&digest);
        verify_digest(&key.signer(), &digest, &sig).unwrap();
    }

    #[test]
    fn test_wrong_signer_fails() {
        let k1 = Keypair::from_seed(&[1u8; 32]);
        let k2 = Keypair::from_seed(&[2u8; 32]);
        let digest = Hash::from_data(b"car bytes");
        let sig = k1.sign_digest(&digest);
        let err = verify_digest(&k2.signer(), &digest, &sig).unwrap_err();
        assert!(matches!(
            err,
            Error::Signing(SigningError::VerificationFailed { .. })
        ));
    }

    #[test]
    fn test_tampered_digest_fails() {
        let key = Keypair::generate();
        let sig = key.sign_digest(&Hash::from_data(b"a"));
        assert!(verify_digest(&key.signer(), &Hash::from_data(b"b"), &sig).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys/signing.key");
        let key = Keypair::load_or_generate(&path).unwrap();
        let loaded = Keypair::load(&path).unwrap();
        assert_eq!(key.signer(), loaded.signer());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_missing_key() {
        let dir = tempdir().unwrap();
        let err = Keypair::load(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::Signing(SigningError::KeyNotFound { .. })));
    }

    #[test]
    fn test_trust_list() {
        assert!(ensure_trusted("abc", &[]).is_ok());
        assert!(ensure_trusted("abc", &["abc".to_string()]).is_ok());
        assert!(ensure_trusted("abc", &["def".to_string()]).is_err());
    }
}
