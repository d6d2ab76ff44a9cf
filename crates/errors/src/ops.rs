//! Operation orchestration error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum OpsError {
    #[error("operation failed: {message}")]
    OperationFailed { message: String },

    #[error("no packages specified")]
    NoPackagesSpecified,

    #[error("package not installed in profile {profile}: {id}")]
    NotInProfile { profile: String, id: String },

    #[error("missing component: {component}")]
    MissingComponent { component: String },
}

impl UserFacingError for OpsError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoPackagesSpecified => Some("Pass at least one recipe name."),
            Self::MissingComponent { .. } => Some("Check the operation context configuration."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::OperationFailed { .. } => "ops.operation_failed",
            Self::NoPackagesSpecified => "ops.no_packages_specified",
            Self::NotInProfile { .. } => "ops.not_in_profile",
            Self::MissingComponent { .. } => "ops.missing_component",
        };
        Some(code)
    }
}
