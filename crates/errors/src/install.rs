//! Installation planning and execution errors

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum InstallError {
    #[error("command failed in {id}: {command} exited with {status}")]
    CommandFailed {
        id: String,
        command: String,
        status: i32,
    },

    #[error("installation of {id} failed: {message}")]
    Failed { id: String, message: String },

    #[error("{id} skipped: dependency {dependency} failed")]
    Skipped { id: String, dependency: String },

    #[error("circular dependency in install plan: {ids}")]
    CircularDependency { ids: String },

    #[error("input staging failed for {id}: {message}")]
    StagingFailed { id: String, message: String },

    #[error("post-processing failed for {id}: {message}")]
    PostProcessFailed { id: String, message: String },

    #[error("extraction failed: {message}")]
    ExtractionFailed { message: String },

    #[error("installation cancelled by user")]
    Cancelled,

    #[error("task execution failed: {message}")]
    TaskError { message: String },
}

impl UserFacingError for InstallError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::CommandFailed { .. } => {
                Some("Re-run with --debug to see the build output of the failing command.")
            }
            Self::Skipped { .. } => Some("Fix the failed dependency first."),
            Self::Cancelled => Some("Re-run the command to resume; completed packages are kept."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::TaskError { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::CommandFailed { .. } => "install.command_failed",
            Self::Failed { .. } => "install.failed",
            Self::Skipped { .. } => "install.skipped",
            Self::CircularDependency { .. } => "install.circular_dependency",
            Self::StagingFailed { .. } => "install.staging_failed",
            Self::PostProcessFailed { .. } => "install.post_process_failed",
            Self::ExtractionFailed { .. } => "install.extraction_failed",
            Self::Cancelled => "install.cancelled",
            Self::TaskError { .. } => "install.task_error",
        };
        Some(code)
    }
}
