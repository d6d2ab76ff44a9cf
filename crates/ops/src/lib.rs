#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! High-level operations for vessel
//!
//! This crate sits between the CLI and the specialized crates: it wires
//! configuration into a context once and exposes one async function per
//! user-facing operation.

mod context;
mod install;
mod keys;
mod maintenance;
mod pack;
mod shell;
mod sums;
mod types;

pub use context::{OpsContextBuilder, OpsCtx};
pub use install::{build, calc, install, install_car};
pub use keys::{export_key, keygen};
pub use maintenance::{gc, link, list, unlink};
pub use pack::{pack, upload};
pub use shell::shell_env;
pub use sums::{record_sums, sum_path};
pub use types::{
    BuildOutcome, CalcReport, KeyReport, LinkReport, PlannedInstall, ShellEnv, SumsReport,
};

use vessel_errors::Error;
use vessel_types::{GcReport, InstallReport, PackReport, PackageId, UploadReport};

/// Operation result that can be serialized for CLI output
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OperationResult {
    InstallReport(InstallReport),
    Build(BuildOutcome),
    Calc(CalcReport),
    Pack(PackReport),
    Upload(UploadReport),
    Shell(ShellEnv),
    Gc(GcReport),
    Link(LinkReport),
    /// Ids linked into a profile
    PackageList(Vec<PackageId>),
    Sums(SumsReport),
    Key(KeyReport),
    /// Generic success message
    Success(String),
}

impl OperationResult {
    /// Convert to JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be serialized.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| {
            vessel_errors::OpsError::OperationFailed {
                message: format!("serialize result: {e}"),
            }
            .into()
        })
    }

    /// Whether every id of the operation made it into the store
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            OperationResult::InstallReport(report) | OperationResult::Build(BuildOutcome { report, .. }) => {
                report.is_success()
            }
            OperationResult::Shell(env) => env.report.is_success(),
            OperationResult::Calc(_)
            | OperationResult::Pack(_)
            | OperationResult::Upload(_)
            | OperationResult::Gc(_)
            | OperationResult::Link(_)
            | OperationResult::PackageList(_)
            | OperationResult::Sums(_)
            | OperationResult::Key(_)
            | OperationResult::Success(_) => true,
        }
    }

    /// Failed ids with their messages, for `failed: <id>: <message>` lines
    #[must_use]
    pub fn failures(&self) -> &[(PackageId, String)] {
        match self {
            OperationResult::InstallReport(report) | OperationResult::Build(BuildOutcome { report, .. }) => {
                &report.failed
            }
            _ => &[],
        }
    }
}
