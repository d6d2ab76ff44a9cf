//! Signing error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum SigningError {
    #[error("signature verification failed: {reason}")]
    VerificationFailed { reason: String },

    #[error("signer is not trusted: {signer}")]
    UntrustedSigner { signer: String },

    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("invalid public key format: {0}")]
    InvalidPublicKey(String),

    #[error("invalid private key at {path}: {message}")]
    InvalidPrivateKey { path: String, message: String },

    #[error("signing key not found: {path}")]
    KeyNotFound { path: String },
}

impl UserFacingError for SigningError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::KeyNotFound { .. } => Some("Run `vessel keygen` to create a signing key."),
            Self::UntrustedSigner { .. } => {
                Some("Add the signer to `security.trusted_signers` if you trust it.")
            }
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::VerificationFailed { .. } => "signing.verification_failed",
            Self::UntrustedSigner { .. } => "signing.untrusted_signer",
            Self::InvalidSignatureFormat(_) => "signing.invalid_signature",
            Self::InvalidPublicKey(_) => "signing.invalid_public_key",
            Self::InvalidPrivateKey { .. } => "signing.invalid_private_key",
            Self::KeyNotFound { .. } => "signing.key_not_found",
        };
        Some(code)
    }
}
