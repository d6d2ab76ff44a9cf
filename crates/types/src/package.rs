//! Package identity and metadata records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use vessel_hash::{Hash, Sum, SumAlgo};

/// Content-addressed package identifier: `<base58(hash)>-<name>-<version>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Assemble an id from its signature hash and human-readable suffix
    #[must_use]
    pub fn new(signature: &Hash, name: &str, version: &str) -> Self {
        Self(format!("{}-{name}-{version}", signature.to_base58()))
    }

    /// Wrap an id string read from disk or the wire
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The base58 signature prefix (everything before the first `-`)
    #[must_use]
    pub fn hash_part(&self) -> &str {
        self.0.split_once('-').map_or(self.0.as_str(), |(h, _)| h)
    }

    /// The trailing version token (everything after the last `-`)
    #[must_use]
    pub fn version(&self) -> &str {
        self.0.rsplit_once('-').map_or("", |(_, v)| v)
    }

    /// Whether this id's signature prefix equals `hash`
    #[must_use]
    pub fn has_hash(&self, hash: &str) -> bool {
        self.hash_part() == hash
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Platform constraints recorded for a build (`os`, `arch`)
pub type Constraints = BTreeMap<String, String>;

/// Constraints describing the current host
#[must_use]
pub fn host_constraints() -> Constraints {
    let mut constraints = Constraints::new();
    constraints.insert("os".to_string(), std::env::consts::OS.to_string());
    constraints.insert("arch".to_string(), std::env::consts::ARCH.to_string());
    constraints
}

/// One input as recorded in package metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum_type: Option<SumAlgo>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl InputRecord {
    /// Record for a fetched file or asset input
    #[must_use]
    pub fn file(name: &str, path: &str, sum: Option<&Sum>) -> Self {
        Self {
            name: name.to_string(),
            sum_type: sum.map(|s| s.algo),
            sum: sum.map(|s| s.value.clone()).unwrap_or_default(),
            path: Some(path.to_string()),
            dir: None,
        }
    }

    /// Record for a local directory input
    #[must_use]
    pub fn dir(name: &str, dir: &str) -> Self {
        Self {
            name: name.to_string(),
            sum_type: None,
            sum: String::new(),
            path: None,
            dir: Some(dir.to_string()),
        }
    }
}

/// Metadata written next to every artifact as `<id>.pkg-info.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub id: PackageId,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub repo: String,
    #[serde(default)]
    pub runtime_deps: Vec<PackageId>,
    #[serde(default)]
    pub build_deps: Vec<PackageId>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub inputs: Vec<InputRecord>,
}

impl PackageInfo {
    /// Every dependency GC must keep alive for this package
    pub fn retained_deps(&self) -> impl Iterator<Item = &PackageId> {
        self.runtime_deps.iter().chain(self.build_deps.iter())
    }
}
