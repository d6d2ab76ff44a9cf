//! Car sidecar records

use crate::{Constraints, InputRecord, PackageId};
use serde::{Deserialize, Serialize};

/// A dependency reference carried by a car
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarDependency {
    pub id: PackageId,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub signer: String,
}

/// The info record stored as `<id>.car-info.json` beside a car
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarInfo {
    pub id: PackageId,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub repo: String,
    /// base58 Ed25519 public key of the signer
    pub signer: String,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub inputs: Vec<InputRecord>,
    #[serde(default)]
    pub dependencies: Vec<CarDependency>,
    /// base58 Ed25519 signature over `blake2b-256(car-bytes)`
    #[serde(default)]
    pub signature: String,
}

impl CarInfo {
    /// Ids of every dependency declared by the car
    pub fn dependency_ids(&self) -> impl Iterator<Item = &PackageId> {
        self.dependencies.iter().map(|d| &d.id)
    }
}
