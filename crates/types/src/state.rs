//! Per-package install lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;

/// State machine of one id inside an install plan
///
/// `Pending → Staging → Building → PostProcessing → Frozen`, with `Failed`
/// reachable from every active state and `Skipped` from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    Pending,
    Staging,
    Building,
    PostProcessing,
    Frozen,
    Failed,
    Skipped,
}

impl InstallState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Frozen | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Staging => "staging",
            Self::Building => "building",
            Self::PostProcessing => "post-processing",
            Self::Frozen => "frozen",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}
