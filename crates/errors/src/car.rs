//! Car archive error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum CarError {
    #[error("no car data for {id} in {repo}")]
    NoCarData { repo: String, id: String },

    #[error("invalid link {path} -> {target}: target escapes the artifact")]
    InvalidLink { path: String, target: String },

    #[error("wrong signature on car {id}")]
    WrongSignature { id: String },

    #[error("not a car archive: {message}")]
    BadMagic { message: String },

    #[error("invalid car info for {id}: {message}")]
    InvalidInfo { id: String, message: String },

    #[error("unresolved dependency hash {hash} in {id}")]
    UnresolvedDependency { id: String, hash: String },

    #[error("car entry {path} rejected: {message}")]
    InvalidEntry { path: String, message: String },

    #[error("failed to pack {id}: {message}")]
    PackFailed { id: String, message: String },
}

impl UserFacingError for CarError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::WrongSignature { .. } => {
                Some("The car was not signed by its declared signer; do not trust its source.")
            }
            Self::InvalidLink { .. } => {
                Some("Artifacts may only contain symlinks that stay inside the artifact.")
            }
            Self::NoCarData { .. } => Some("The package will be built from its recipe instead."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NoCarData { .. } => "car.no_data",
            Self::InvalidLink { .. } => "car.invalid_link",
            Self::WrongSignature { .. } => "car.wrong_signature",
            Self::BadMagic { .. } => "car.bad_magic",
            Self::InvalidInfo { .. } => "car.invalid_info",
            Self::UnresolvedDependency { .. } => "car.unresolved_dependency",
            Self::InvalidEntry { .. } => "car.invalid_entry",
            Self::PackFailed { .. } => "car.pack_failed",
        };
        Some(code)
    }
}
