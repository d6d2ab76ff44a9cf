//! Types for operations and results

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vessel_hash::Sum;
use vessel_types::{InstallReport, PackageId};

/// One planned id and how it will be installed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedInstall {
    pub id: PackageId,
    /// `script` or `car`
    pub installer: String,
    /// Planned ids this one waits for
    pub dependencies: Vec<PackageId>,
}

/// What `calc` reports without executing anything
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalcReport {
    pub id: PackageId,
    /// Ids to install, dependencies first
    pub install_order: Vec<PlannedInstall>,
    /// Ids already present in the store
    pub installed: Vec<PackageId>,
}

/// Outcome of building one recipe
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub id: PackageId,
    pub report: InstallReport,
}

/// Environment prepared by `shell`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShellEnv {
    /// Roots followed by their dependencies
    pub ids: Vec<PackageId>,
    /// `PATH` for the shell
    pub path: String,
    pub report: InstallReport,
}

/// Profile change made by `link` or `unlink`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkReport {
    pub profile: String,
    pub id: PackageId,
    /// Symlinks created or removed
    pub links: usize,
}

/// Sums written by `record_sums`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SumsReport {
    /// The sums record that was written
    pub file: PathBuf,
    /// Sums resolved during this run
    pub recorded: BTreeMap<String, Sum>,
    /// Entries in the record after the run
    pub total: usize,
}

/// Key written by `keygen`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyReport {
    pub path: PathBuf,
    pub signer: String,
    /// False when an existing key was kept
    pub generated: bool,
}
