//! Report type definitions for operations

use crate::PackageId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of executing an install plan
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstallReport {
    /// Ids built from recipes
    pub built: Vec<PackageId>,
    /// Ids restored from cars
    pub from_car: Vec<PackageId>,
    /// Ids already present in the store
    pub already_installed: Vec<PackageId>,
    /// Ids whose installer failed, with the error message
    pub failed: Vec<(PackageId, String)>,
    /// Ids not attempted because a dependency failed
    pub skipped: Vec<PackageId>,
    /// Total execution time
    pub duration_ms: u64,
}

impl InstallReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Outcome of a garbage collection sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Ids that were deleted
    pub removed: Vec<PackageId>,
    /// Files, directories and symlinks deleted
    pub entries_removed: u64,
    /// Bytes of regular file content recovered
    pub bytes_recovered: u64,
}

/// Result of packing an artifact
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackReport {
    pub id: PackageId,
    pub car_path: PathBuf,
    pub info_path: PathBuf,
    pub dependencies: Vec<PackageId>,
    pub size: u64,
}

/// One car pushed to a remote store
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedCar {
    pub id: PackageId,
    pub url: String,
    /// `ETag` the server assigned to the car, if any
    pub etag: Option<String>,
}

/// Result of uploading cars, in push order
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UploadReport {
    pub base: String,
    pub uploaded: Vec<UploadedCar>,
}
