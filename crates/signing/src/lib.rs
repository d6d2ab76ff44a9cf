#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Ed25519 signing of car archives
//!
//! A car is signed by signing the BLAKE2b-256 digest of its bytes. Signers
//! are identified by the base58 encoding of their public key; signatures are
//! carried base58-encoded in the car's info record.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::fs;
use std::path::Path;
use vessel_errors::{Error, SigningError};
use vessel_hash::{decode_base58, encode_base58, Hash};

/// A private signing key
pub struct Keypair {
    key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair
    #[must_use]
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self::from_seed(&seed)
    }

    #[must_use]
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair whose seed is stored base58-encoded in `path`
    ///
    /// # Errors
    /// Returns `KeyNotFound` if the file is missing, `InvalidPrivateKey` if it
    /// does not hold a 32-byte base58 seed.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::from(SigningError::KeyNotFound {
                    path: path.display().to_string(),
                })
            } else {
                Error::io_with_path(&e, path)
            }
        })?;

        let bytes = decode_base58(text.trim()).map_err(|e| SigningError::InvalidPrivateKey {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let seed: [u8; 32] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| SigningError::InvalidPrivateKey {
                    path: path.display().to_string(),
                    message: format!("expected 32 bytes, got {}", bytes.len()),
                })?;
        Ok(Self::from_seed(&seed))
    }

    /// Write the seed to `path` readable only by the owner
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io_with_path(&e, parent))?;
        }
        fs::write(path, encode_base58(self.key.as_bytes()))
            .map_err(|e| Error::io_with_path(&e, path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::io_with_path(&e, path))?;
        }
        tracing::debug!(path = %path.display(), signer = %self.signer(), "saved signing key");
        Ok(())
    }

    /// Load the key at `path`, generating and saving one if absent
    ///
    /// # Errors
    /// Returns an error if an existing key is malformed or a new key cannot be saved.
    pub fn load_or_generate(path: &Path) -> Result<Self, Error> {
        match Self::load(path) {
            Ok(key) => Ok(key),
            Err(Error::Signing(SigningError::KeyNotFound { .. })) => {
                let key = Self::generate();
                key.save(path)?;
                Ok(key)
            }
            Err(e) => Err(e),
        }
    }

    /// The signer id: base58 of the public key
    #[must_use]
    pub fn signer(&self) -> String {
        encode_base58(self.key.verifying_key().as_bytes())
    }

    /// Sign a digest, returning the base58 signature
    #[must_use]
    pub fn sign_digest(&self, digest: &Hash) -> String {
        let signature = self.key.sign(digest.as_bytes());
        encode_base58(&signature.to_bytes())
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("signer", &self.signer())
            .finish_non_exhaustive()
    }
}

fn parse_verifying_key(signer: &str) -> Result<VerifyingKey, SigningError> {
    let bytes =
        decode_base58(signer).map_err(|e| SigningError::InvalidPublicKey(e.to_string()))?;
    let array: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SigningError::InvalidPublicKey(format!("{} bytes", bytes.len())))?;
    VerifyingKey::from_bytes(&array).map_err(|e| SigningError::InvalidPublicKey(e.to_string()))
}

/// Verify a base58 signature over `digest` against the base58 `signer`
///
/// # Errors
/// Returns `VerificationFailed` if the signature does not verify, or a
/// format error if the key or signature cannot be decoded.
pub fn verify_digest(signer: &str, digest: &Hash, signature: &str) -> Result<(), Error> {
    let key = parse_verifying_key(signer)?;
    let bytes = decode_base58(signature)
        .map_err(|e| SigningError::InvalidSignatureFormat(e.to_string()))?;
    let array: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SigningError::InvalidSignatureFormat(format!("{} bytes", bytes.len())))?;
    let signature = Signature::from_bytes(&array);

    key.verify(digest.as_bytes(), &signature).map_err(|e| {
        SigningError::VerificationFailed {
            reason: e.to_string(),
        }
        .into()
    })
}

/// Check `signer` against a trust list; an empty list trusts any signer
///
/// # Errors
/// Returns `UntrustedSigner` if the list is non-empty and lacks `signer`.
pub fn ensure_trusted(signer: &str, trusted: &[String]) -> Result<(), Error> {
    if trusted.is_empty() || trusted.iter().any(|t| t == signer) {
        Ok(())
    } else {
        Err(SigningError::UntrustedSigner {
            signer: signer.to_string(),
        }
        .into())
    }
}
