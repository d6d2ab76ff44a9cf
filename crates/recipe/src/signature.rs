//! Package signature calculation
//!
//! The id of a package is `<base58(hash)>-<name>-<version>` where the hash is
//! BLAKE2b-256 over, in order: the name, the version, every input (sorted by
//! logical name) with its digest, the install code hash, and the ids of all
//! dependencies sorted lexically.

use std::path::Path;

use vessel_errors::Error;
use vessel_hash::{Hash, Hasher};
use vessel_types::PackageId;
use walkdir::WalkDir;

/// Version used when a recipe does not declare one
pub const UNKNOWN_VERSION: &str = "unknown";

/// Logical name of an input that was not given one
pub const DEFAULT_INPUT: &str = "source";

/// One input as it contributes to a signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDigest {
    pub name: String,
    pub path: String,
    pub algo: String,
    pub digest: Vec<u8>,
}

/// Everything that identifies a build
#[derive(Debug, Default)]
pub struct SignatureInput<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub inputs: Vec<InputDigest>,
    pub install: Option<Hash>,
    pub dependencies: Vec<&'a PackageId>,
}

impl SignatureInput<'_> {
    /// Compute the package id
    #[must_use]
    pub fn calculate(&self) -> PackageId {
        let version = if self.version.is_empty() {
            UNKNOWN_VERSION
        } else {
            self.version
        };

        let mut h = Hasher::new();
        h.update(format!("name: {}\n", self.name).as_bytes());
        h.update(format!("version: {version}\n").as_bytes());

        let mut inputs: Vec<&InputDigest> = self.inputs.iter().collect();
        inputs.sort_by(|a, b| logical_name(a).cmp(logical_name(b)));
        for input in inputs {
            h.update(format!("path: {}\nalgo: {}\n", input.path, input.algo).as_bytes());
            h.update(&input.digest);
        }

        if let Some(install) = &self.install {
            h.update(install.as_bytes());
        }

        let mut deps: Vec<&str> = self.dependencies.iter().map(|d| d.as_str()).collect();
        deps.sort_unstable();
        for dep in deps {
            h.update(format!("dep: {dep}\n").as_bytes());
        }

        let signature = h.finalize();
        tracing::trace!(name = self.name, %signature, "calculated signature");
        PackageId::new(&signature, self.name, version)
    }
}

fn logical_name(input: &InputDigest) -> &str {
    if input.name.is_empty() {
        DEFAULT_INPUT
    } else {
        &input.name
    }
}

/// Digest of a directory input's tree
///
/// Entries are visited in sorted order and named relative to `root` so the
/// digest does not depend on where the recipe is checked out.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or a file cannot be read.
pub fn hash_dir(root: &Path) -> Result<Hash, Error> {
    use std::os::unix::fs::PermissionsExt;

    let mut h = Hasher::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::internal(format!("walk {}: {e}", root.display())))?;
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let file_type = entry.file_type();

        if file_type.is_dir() {
            h.update(format!("dir: {}\n", rel.display()).as_bytes());
        } else if file_type.is_file() {
            let meta = entry
                .metadata()
                .map_err(|e| Error::internal(format!("stat {}: {e}", entry.path().display())))?;
            h.update(
                format!("file: {} {:o}\n", rel.display(), meta.permissions().mode() & 0o777)
                    .as_bytes(),
            );
            let data = std::fs::read(entry.path())
                .map_err(|e| Error::io_with_path(&e, entry.path()))?;
            h.update(&data);
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())
                .map_err(|e| Error::io_with_path(&e, entry.path()))?;
            h.update(format!("link: {} {}\n", rel.display(), target.display()).as_bytes());
        }
    }
    Ok(h.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(version: &str) -> SignatureInput<'_> {
        SignatureInput {
            name: "p1",
            version,
            ..SignatureInput::default()
        }
    }

    #[test]
    fn test_id_shape() {
        let id = minimal("0.1").calculate();
        let (hash, rest) = id.as_str().split_once('-').unwrap();
        assert_eq!(rest, "p1-0.1");
        assert!((43..=44).contains(&hash.len()));
        assert!(hash.bytes().all(vessel_hash::is_base58_byte));
    }

    #[test]
    fn test_missing_version_is_unknown() {
        let id = minimal("").calculate();
        assert!(id.as_str().ends_with("-p1-unknown"));
        assert_eq!(id, minimal(UNKNOWN_VERSION).calculate());
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let a = InputDigest {
            name: "a".into(),
            path: "https://x/a.tgz".into(),
            algo: "b2".into(),
            digest: vec![1, 2, 3],
        };
        let b = InputDigest {
            name: "b".into(),
            path: "./b.patch".into(),
            algo: "b2".into(),
            digest: vec![4, 5, 6],
        };

        let mut first = minimal("1");
        first.inputs = vec![a.clone(), b.clone()];
        let mut second = minimal("1");
        second.inputs = vec![b, a];
        assert_eq!(first.calculate(), second.calculate());
    }

    #[test]
    fn test_dependency_order_does_not_matter() {
        let d1 = PackageId::from("AAA-d1-1");
        let d2 = PackageId::from("BBB-d2-1");

        let mut first = minimal("1");
        first.dependencies = vec![&d1, &d2];
        let mut second = minimal("1");
        second.dependencies = vec![&d2, &d1];
        assert_eq!(first.calculate(), second.calculate());

        let mut fewer = minimal("1");
        fewer.dependencies = vec![&d1];
        assert_ne!(first.calculate(), fewer.calculate());
    }

    #[test]
    fn test_install_hash_changes_id() {
        let mut with = minimal("1");
        with.install = Some(Hash::from_data(b"make"));
        assert_ne!(with.calculate(), minimal("1").calculate());
    }

    #[test]
    fn test_hash_dir_is_location_independent() {
        let one = tempfile::tempdir().unwrap();
        let two = tempfile::tempdir().unwrap();
        for root in [one.path(), two.path()] {
            std::fs::create_dir(root.join("src")).unwrap();
            std::fs::write(root.join("src/main.c"), b"int main;").unwrap();
        }
        assert_eq!(hash_dir(one.path()).unwrap(), hash_dir(two.path()).unwrap());

        std::fs::write(two.path().join("src/main.c"), b"int main();").unwrap();
        assert_ne!(hash_dir(one.path()).unwrap(), hash_dir(two.path()).unwrap());
    }
}
