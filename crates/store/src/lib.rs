#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Content-addressed storage for vessel
//!
//! This crate manages the `store/` directory where every artifact lives under
//! its package id, next to a `<id>.pkg-info.json` metadata file and an
//! optional cached `<id>.car-info.json`. Artifacts are immutable once frozen;
//! profiles compose them into symlink forests and GC sweeps the ones no
//! profile reaches.

mod gc;
mod profile;
mod resolve;
pub mod scan;

pub use gc::GarbageCollector;
pub use profile::{Profile, LINK_MARKERS};
pub use resolve::ResolveDb;
pub use scan::{replace_all, scan_tree, ReferenceScanner, Replacer};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use vessel_errors::{Error, StorageError};
use vessel_platform::fs as pfs;
use vessel_types::{CarDependency, CarInfo, PackageId, PackageInfo};

const PKG_INFO_SUFFIX: &str = ".pkg-info.json";
const CAR_INFO_SUFFIX: &str = ".car-info.json";

/// Handle on a store directory
#[derive(Clone, Debug)]
pub struct Store {
    base_path: PathBuf,
}

impl Store {
    #[must_use]
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.base_path
    }

    /// Directory of an artifact
    #[must_use]
    pub fn artifact_path(&self, id: &PackageId) -> PathBuf {
        self.base_path.join(id.as_str())
    }

    #[must_use]
    pub fn info_path(&self, id: &PackageId) -> PathBuf {
        self.base_path.join(format!("{id}{PKG_INFO_SUFFIX}"))
    }

    #[must_use]
    pub fn car_info_path(&self, id: &PackageId) -> PathBuf {
        self.base_path.join(format!("{id}{CAR_INFO_SUFFIX}"))
    }

    /// Create the store directory if needed
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn ensure(&self) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.base_path)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &self.base_path).into())
    }

    /// Whether an artifact is present
    ///
    /// A directory without its metadata file still counts as present.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::CorruptStore` if the path exists but is not a
    /// directory.
    pub async fn contains(&self, id: &PackageId) -> Result<bool, Error> {
        let path = self.artifact_path(id);
        match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(true),
            Ok(_) => Err(StorageError::CorruptStore {
                path: path.display().to_string(),
                message: "artifact path is not a directory".to_string(),
            }
            .into()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::from_io_with_path(&e, &path).into()),
        }
    }

    /// Ids of every artifact directory in the store
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub async fn list(&self) -> Result<Vec<PackageId>, Error> {
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(StorageError::from_io_with_path(&e, &self.base_path).into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.contains('-') && !name.starts_with('.') {
                    ids.push(PackageId::from(name));
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Find the artifact whose signature is `hash`
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<PackageId>, Error> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|id| id.has_hash(hash)))
    }

    /// Create an empty, writable artifact directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory already exists or cannot be created.
    pub async fn create_artifact(&self, id: &PackageId) -> Result<PathBuf, Error> {
        self.ensure().await?;
        let path = self.artifact_path(id);
        tokio::fs::create_dir(&path)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, &path))?;
        Ok(path)
    }

    /// Delete an artifact along with its metadata files
    ///
    /// # Errors
    ///
    /// Returns an error if any part cannot be removed.
    pub async fn remove(&self, id: &PackageId) -> Result<(), Error> {
        pfs::remove_dir_all(&self.artifact_path(id)).await?;
        for sidecar in [self.info_path(id), self.car_info_path(id)] {
            match tokio::fs::remove_file(&sidecar).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::from_io_with_path(&e, &sidecar).into()),
            }
        }
        tracing::debug!(%id, "removed artifact");
        Ok(())
    }

    /// Clear every write bit in an artifact
    ///
    /// # Errors
    ///
    /// Returns an error if permissions cannot be changed.
    pub async fn freeze(&self, id: &PackageId) -> Result<(), Error> {
        pfs::freeze_tree(&self.artifact_path(id)).await
    }

    /// Read an artifact's metadata, `None` when it has none
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidPackageInfo` if the file does not parse.
    pub async fn read_info(&self, id: &PackageId) -> Result<Option<PackageInfo>, Error> {
        read_json(&self.info_path(id)).await
    }

    /// Write an artifact's metadata
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write_info(&self, info: &PackageInfo) -> Result<(), Error> {
        write_json(&self.info_path(&info.id), info).await
    }

    /// Read the cached car info of an artifact
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but does not parse.
    pub async fn read_car_info(&self, id: &PackageId) -> Result<Option<CarInfo>, Error> {
        read_json(&self.car_info_path(id)).await
    }

    /// Cache the car info of an artifact
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write_car_info(&self, info: &CarInfo) -> Result<(), Error> {
        write_json(&self.car_info_path(&info.id), info).await
    }

    /// Hashes of every store reference inside an artifact
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be read.
    pub async fn scan(&self, id: &PackageId) -> Result<BTreeSet<String>, Error> {
        scan_tree(&self.artifact_path(id), &self.base_path).await
    }

    /// Resolve a scanned hash to the artifact and its origin
    ///
    /// Cached car info supplies the repo and signer; otherwise the artifact
    /// was built here and `local_signer` is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the store or a metadata file cannot be read.
    pub async fn map_dependency(
        &self,
        hash: &str,
        local_signer: &str,
    ) -> Result<Option<CarDependency>, Error> {
        let Some(id) = self.find_by_hash(hash).await? else {
            return Ok(None);
        };

        if let Some(car) = self.read_car_info(&id).await? {
            return Ok(Some(CarDependency {
                id,
                repo: car.repo,
                signer: car.signer,
            }));
        }

        let repo = self
            .read_info(&id)
            .await?
            .map(|info| info.repo)
            .unwrap_or_default();
        Ok(Some(CarDependency {
            id,
            repo,
            signer: local_signer.to_string(),
        }))
    }
}

/// Keep only the declared dependencies whose hash was found in the artifact
#[must_use]
pub fn prune_runtime_deps(declared: &[PackageId], scanned: &BTreeSet<String>) -> Vec<PackageId> {
    declared
        .iter()
        .filter(|id| scanned.contains(id.hash_part()))
        .cloned()
        .collect()
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, Error> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::from_io_with_path(&e, path).into()),
    };
    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        StorageError::InvalidPackageInfo {
            path: path.display().to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Write JSON through a temporary sibling and rename it into place
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &data)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, &tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, path).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vessel_types::host_constraints;

    const HASH: &str = "3X64Dqnoxy5ihmfCdqP25q6QmjMKjTKVSaX6vUEbthqR";

    fn info(id: &PackageId) -> PackageInfo {
        PackageInfo {
            id: id.clone(),
            name: "zlib".into(),
            version: "1.3".into(),
            repo: "github.com/example/pkgs".into(),
            runtime_deps: vec![],
            build_deps: vec![],
            constraints: host_constraints(),
            inputs: vec![],
        }
    }

    #[tokio::test]
    async fn test_contains_and_corrupt_entries() {
        let temp = tempdir().unwrap();
        let store = Store::new(temp.path().join("store"));
        let id = PackageId::from_string(format!("{HASH}-zlib-1.3"));

        assert!(!store.contains(&id).await.unwrap());
        store.create_artifact(&id).await.unwrap();
        assert!(store.contains(&id).await.unwrap());

        let bogus = PackageId::from("bogus-x-1");
        std::fs::write(store.artifact_path(&bogus), b"not a dir").unwrap();
        let err = store.contains(&bogus).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Storage(StorageError::CorruptStore { .. })
        ));
    }

    #[tokio::test]
    async fn test_info_round_trip_and_listing() {
        let temp = tempdir().unwrap();
        let store = Store::new(temp.path().to_path_buf());
        let id = PackageId::from_string(format!("{HASH}-zlib-1.3"));
        store.create_artifact(&id).await.unwrap();

        assert!(store.read_info(&id).await.unwrap().is_none());
        store.write_info(&info(&id)).await.unwrap();
        assert_eq!(store.read_info(&id).await.unwrap(), Some(info(&id)));

        // Sidecar files are not artifacts
        assert_eq!(store.list().await.unwrap(), vec![id.clone()]);
        assert_eq!(store.find_by_hash(HASH).await.unwrap(), Some(id.clone()));

        let dep = store.map_dependency(HASH, "LOCALKEY").await.unwrap().unwrap();
        assert_eq!(dep.repo, "github.com/example/pkgs");
        assert_eq!(dep.signer, "LOCALKEY");

        store.remove(&id).await.unwrap();
        assert!(!store.contains(&id).await.unwrap());
        assert!(!store.info_path(&id).exists());
    }

    #[test]
    fn test_prune_keeps_only_scanned() {
        let a = PackageId::from_string(format!("{HASH}-a-1"));
        let b = PackageId::from("Other-b-1");
        let scanned: BTreeSet<String> = [HASH.to_string()].into();
        assert_eq!(prune_runtime_deps(&[a.clone(), b], &scanned), vec![a]);
    }
}
