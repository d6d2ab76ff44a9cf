//! Recipe lookup, evaluation and signature errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum RecipeError {
    #[error("recipe not found: {name}")]
    NotFound { name: String },

    #[error("bad script {name}: {message}")]
    BadScript { name: String, message: String },

    #[error("missing sum for input {path} of {name}")]
    MissingSum { name: String, path: String },

    #[error("circular dependency detected: {chain}")]
    CircularDependency { chain: String },

    #[error("asset not found: {name}")]
    AssetNotFound { name: String },

    #[error("invalid path in recipe: {path}")]
    InvalidPath { path: String },

    #[error("evaluation failed for {name}: {message}")]
    EvalFailed { name: String, message: String },

    #[error("lookup failed for {name}: {message}")]
    LookupFailed { name: String, message: String },
}

impl UserFacingError for RecipeError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { .. } => {
                Some("Check the recipe name and the configured recipe directory and repos.")
            }
            Self::MissingSum { .. } => {
                Some("Run `vessel sum <recipe>` to record sums for the recipe's inputs.")
            }
            Self::BadScript { .. } => {
                Some("A recipe must end with a call to `pkg(...)` naming the package.")
            }
            Self::CircularDependency { .. } => {
                Some("Remove the dependency cycle between the listed recipes.")
            }
            Self::InvalidPath { .. } => Some("Recipe paths may not contain `..`."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NotFound { .. } => "recipe.not_found",
            Self::BadScript { .. } => "recipe.bad_script",
            Self::MissingSum { .. } => "recipe.missing_sum",
            Self::CircularDependency { .. } => "recipe.circular_dependency",
            Self::AssetNotFound { .. } => "recipe.asset_not_found",
            Self::InvalidPath { .. } => "recipe.invalid_path",
            Self::EvalFailed { .. } => "recipe.eval_failed",
            Self::LookupFailed { .. } => "recipe.lookup_failed",
        };
        Some(code)
    }
}
