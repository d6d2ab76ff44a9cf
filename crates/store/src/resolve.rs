//! Name to id resolver database (`store/resolve.json`)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fslock::LockFile;
use serde::{Deserialize, Serialize};
use vessel_errors::{Error, StorageError};
use vessel_types::PackageId;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Mappings {
    #[serde(default)]
    mappings: BTreeMap<String, PackageId>,
}

/// Records the last installed id for each package name
///
/// Every read-modify-write holds an exclusive lock on `resolve.lock`, since
/// several vessel processes may share one store.
#[derive(Debug, Clone)]
pub struct ResolveDb {
    path: PathBuf,
}

impl ResolveDb {
    #[must_use]
    pub fn new(store: &Path) -> Self {
        Self {
            path: store.join("resolve.json"),
        }
    }

    /// Record `id` as the current build of `name`
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or the file cannot be
    /// read or written.
    pub async fn record(&self, name: &str, id: &PackageId) -> Result<(), Error> {
        let path = self.path.clone();
        let name = name.to_string();
        let id = id.clone();
        run_locked(path, move |path| {
            let mut db = read(path)?;
            db.mappings.insert(name, id);
            write(path, &db)
        })
        .await
    }

    /// Last recorded id for `name`
    ///
    /// # Errors
    ///
    /// Returns an error if the lock cannot be taken or the file is invalid.
    pub async fn resolve(&self, name: &str) -> Result<Option<PackageId>, Error> {
        let path = self.path.clone();
        let name = name.to_string();
        run_locked(path, move |path| Ok(read(path)?.mappings.remove(&name))).await
    }
}

async fn run_locked<T, F>(path: PathBuf, f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(&e, parent))?;
        }
        let lock_path = path.with_extension("lock");
        let lock_failed = |e: std::io::Error| {
            tracing::debug!(error = %e, "resolver lock failed");
            Error::from(StorageError::LockFailed {
                path: lock_path.display().to_string(),
            })
        };
        let mut lock = LockFile::open(&lock_path).map_err(lock_failed)?;
        lock.lock().map_err(lock_failed)?;
        let result = f(&path);
        lock.unlock().map_err(lock_failed)?;
        result
    })
    .await
    .map_err(|e| Error::internal(format!("resolver task failed: {e}")))?
}

fn read(path: &Path) -> Result<Mappings, Error> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
            StorageError::InvalidPackageInfo {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Mappings::default()),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

fn write(path: &Path, db: &Mappings) -> Result<(), Error> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(db)?).map_err(|e| Error::io_with_path(&e, &tmp))?;
    std::fs::rename(&tmp, path).map_err(|e| Error::io_with_path(&e, path))
}
