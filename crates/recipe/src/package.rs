//! Evaluated recipe records

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use vessel_hash::Sum;
use vessel_types::{Constraints, InputRecord, PackageId};

use crate::statement::Statement;

/// An input as written in a recipe, before its digest is resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSpec {
    /// URL or recipe-relative asset path (`./…`), already selected for the host OS
    pub path: Option<String>,
    /// Local directory, relative to the recipe
    pub dir: Option<String>,
    pub sum: Option<Sum>,
    /// Stage the input at this subpath without unpacking
    pub into: Option<String>,
    /// Use this input as the build working directory
    pub chdir: bool,
    /// Symlink a directory input instead of copying it
    pub linked: bool,
}

impl InputSpec {
    /// Whether the input is fetched over the network
    #[must_use]
    pub fn is_url(&self) -> bool {
        self.path
            .as_deref()
            .is_some_and(|p| p.starts_with("http://") || p.starts_with("https://"))
    }
}

/// Where a resolved input comes from
#[derive(Debug, Clone)]
pub enum InputSource {
    Url { url: String },
    Asset { path: String, data: Arc<[u8]> },
    Dir { path: PathBuf, linked: bool },
}

/// A resolved input with its digest
#[derive(Debug, Clone)]
pub struct Input {
    /// Logical input name (`source` for a single input)
    pub name: String,
    pub source: InputSource,
    pub sum: Sum,
    pub into: Option<String>,
    pub chdir: bool,
}

impl Input {
    /// Path or URL exactly as the recipe named it
    #[must_use]
    pub fn location(&self) -> String {
        match &self.source {
            InputSource::Url { url } => url.clone(),
            InputSource::Asset { path, .. } => path.clone(),
            InputSource::Dir { path, .. } => path.display().to_string(),
        }
    }

    /// Record of this input for package metadata
    #[must_use]
    pub fn record(&self) -> InputRecord {
        match &self.source {
            InputSource::Dir { path, .. } => InputRecord::dir(&self.name, &path.display().to_string()),
            _ => InputRecord::file(&self.name, &self.location(), Some(&self.sum)),
        }
    }
}

/// A fully evaluated recipe with its assigned id
#[derive(Debug, Clone)]
pub struct ScriptPackage {
    pub id: PackageId,
    pub name: String,
    pub version: String,
    pub repo: String,
    pub inputs: Vec<Input>,
    pub dependencies: Vec<Arc<ScriptPackage>>,
    /// Synthetic packages created with `instance(...)`
    pub instances: Vec<Arc<ScriptPackage>>,
    pub install: Option<Vec<Statement>>,
    pub hook: Option<Vec<Statement>>,
    pub constraints: Constraints,
}

impl ScriptPackage {
    /// Declared dependencies followed by instances
    pub fn all_dependencies(&self) -> impl Iterator<Item = &Arc<ScriptPackage>> {
        self.dependencies.iter().chain(self.instances.iter())
    }

    /// Every package reachable through dependencies, in dependency-first order
    #[must_use]
    pub fn transitive_dependencies(&self) -> Vec<Arc<ScriptPackage>> {
        fn visit(
            pkg: &ScriptPackage,
            seen: &mut HashSet<PackageId>,
            out: &mut Vec<Arc<ScriptPackage>>,
        ) {
            for dep in pkg.all_dependencies() {
                if seen.insert(dep.id.clone()) {
                    visit(dep, seen, out);
                    out.push(Arc::clone(dep));
                }
            }
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        visit(self, &mut seen, &mut out);
        out
    }

    #[must_use]
    pub fn input_records(&self) -> Vec<InputRecord> {
        self.inputs.iter().map(Input::record).collect()
    }
}

/// Contents of a `<name>.sums.json` asset, keyed by input path or URL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SumsFile(pub BTreeMap<String, Sum>);

impl SumsFile {
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Sum> {
        self.0.get(path)
    }

    pub fn insert(&mut self, path: impl Into<String>, sum: Sum) {
        self.0.insert(path.into(), sum);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_hash::SumAlgo;

    fn synthetic(id: &str, deps: Vec<Arc<ScriptPackage>>) -> Arc<ScriptPackage> {
        Arc::new(ScriptPackage {
            id: PackageId::from(id),
            name: id.to_string(),
            version: "1".to_string(),
            repo: String::new(),
            inputs: Vec::new(),
            dependencies: deps,
            instances: Vec::new(),
            install: None,
            hook: None,
            constraints: Constraints::new(),
        })
    }

    #[test]
    fn test_transitive_dependencies_are_deduplicated() {
        let a = synthetic("a", vec![]);
        let b = synthetic("b", vec![a.clone()]);
        let c = synthetic("c", vec![a.clone(), b.clone()]);

        let ids: Vec<_> = c
            .transitive_dependencies()
            .iter()
            .map(|p| p.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_sums_file_format() {
        let json = r#"{"https://x/y.tar.gz":{"algo":"sha256","value":"ab"}}"#;
        let sums: SumsFile = serde_json::from_str(json).unwrap();
        assert_eq!(
            sums.get("https://x/y.tar.gz"),
            Some(&Sum::new(SumAlgo::Sha256, "ab"))
        );
    }
}
