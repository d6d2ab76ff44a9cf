use serde::{Deserialize, Serialize};

use vessel_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    /// Construct a new failure context.
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod car;
pub mod download;
pub mod general;
pub mod install;
pub mod recipe;
pub mod store;

pub use car::*;
pub use download::*;
pub use general::*;
pub use install::*;
pub use recipe::*;
pub use store::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// General utility events (warnings, errors, operations)
    General(GeneralEvent),

    /// Recipe lookup and evaluation
    Recipe(RecipeEvent),

    /// Planning and per-id install lifecycle
    Install(InstallEvent),

    /// Input and car transfers
    Download(DownloadEvent),

    /// Car pack/unpack/lookup
    Car(CarEvent),

    /// Store maintenance and profiles
    Store(StoreEvent),
}

impl AppEvent {
    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. })
            | Self::Install(InstallEvent::Failed { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. })
            | Self::Install(InstallEvent::Skipped { .. })
            | Self::Download(DownloadEvent::Retrying { .. } | DownloadEvent::HashMismatch { .. })
            | Self::Store(StoreEvent::ProfileConflict { .. }) => Level::WARN,

            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Install(InstallEvent::StateChanged { .. } | InstallEvent::HookApplied { .. })
            | Self::Download(DownloadEvent::CacheHit { .. })
            | Self::Car(CarEvent::NotFound { .. } | CarEvent::Found { .. })
            | Self::Recipe(RecipeEvent::Located { .. })
            | Self::Store(StoreEvent::GcRemoved { .. }) => Level::DEBUG,

            Self::Install(InstallEvent::CommandOutput { .. }) => Level::TRACE,

            _ => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "vessel::events::general",
            Self::Recipe(_) => "vessel::events::recipe",
            Self::Install(_) => "vessel::events::install",
            Self::Download(_) => "vessel::events::download",
            Self::Car(_) => "vessel::events::car",
            Self::Store(_) => "vessel::events::store",
        }
    }
}
