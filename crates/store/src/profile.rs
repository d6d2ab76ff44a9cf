//! Profiles: symlink forests composed from artifacts
//!
//! Directories are folded where possible: an artifact's `bin/` is linked as a
//! single symlink until a second artifact also provides `bin/`, at which point
//! the link is materialized into a real directory and both are merged.

use std::path::{Path, PathBuf};

use vessel_errors::{Error, StorageError};
use vessel_events::{AppEvent, EventEmitter, EventSender, StoreEvent};
use vessel_hash::Hash;
use vessel_types::PackageId;
use walkdir::WalkDir;

use crate::Store;

/// Directory inside a profile holding one marker link per installed artifact
pub const LINK_MARKERS: &str = ".packages";

/// A named profile below the profiles directory
#[derive(Debug, Clone)]
pub struct Profile {
    store: Store,
    name: String,
    path: PathBuf,
    roots: PathBuf,
    tx: Option<EventSender>,
}

#[derive(Default)]
struct LinkStats {
    links: usize,
    conflicts: Vec<(PathBuf, PathBuf)>,
}

impl Profile {
    #[must_use]
    pub fn new(store: Store, profiles: &Path, roots: PathBuf, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
            path: profiles.join(name),
            roots,
            tx: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// GC root link registered for this profile
    #[must_use]
    pub fn root_link(&self) -> PathBuf {
        let key = Hash::from_data(self.path.as_os_str().as_encoded_bytes());
        self.roots.join(key.to_base58())
    }

    /// Merge an artifact into the profile and register the profile as a root
    ///
    /// Returns the number of links created.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::PackageNotFound` if the artifact is not in the
    /// store, or an error if the forest cannot be written.
    pub async fn link(&self, id: &PackageId) -> Result<usize, Error> {
        if !self.store.contains(id).await? {
            return Err(StorageError::PackageNotFound { id: id.to_string() }.into());
        }

        let artifact = self.store.artifact_path(id);
        let profile = self.path.clone();
        let stats = tokio::task::spawn_blocking(move || {
            let mut stats = LinkStats::default();
            std::fs::create_dir_all(&profile).map_err(|e| Error::io_with_path(&e, &profile))?;
            merge(&artifact, &profile, &mut stats)?;
            Ok::<_, Error>(stats)
        })
        .await
        .map_err(|e| Error::internal(format!("profile link task failed: {e}")))??;

        for (path, existing) in &stats.conflicts {
            tracing::warn!(
                profile = %self.name,
                path = %path.display(),
                existing = %existing.display(),
                "profile conflict, keeping existing entry"
            );
            self.tx.emit(AppEvent::Store(StoreEvent::ProfileConflict {
                profile: self.name.clone(),
                path: path.display().to_string(),
                existing: existing.display().to_string(),
            }));
        }

        let markers = self.path.join(LINK_MARKERS);
        tokio::fs::create_dir_all(&markers)
            .await
            .map_err(|e| Error::io_with_path(&e, &markers))?;
        vessel_platform::fs::replace_symlink(&self.store.artifact_path(id), &markers.join(id.as_str()))
            .await?;
        self.register_root().await?;

        tracing::info!(profile = %self.name, %id, links = stats.links, "linked artifact");
        self.tx.emit(AppEvent::Store(StoreEvent::ProfileLinked {
            profile: self.name.clone(),
            id: id.to_string(),
            links: stats.links,
        }));
        Ok(stats.links)
    }

    /// Remove every link into an artifact, then prune empty directories
    ///
    /// # Errors
    ///
    /// Returns an error if the profile cannot be walked or modified.
    pub async fn unlink(&self, id: &PackageId) -> Result<usize, Error> {
        let artifact = self.store.artifact_path(id);
        let profile = self.path.clone();

        let removed = tokio::task::spawn_blocking(move || {
            if !profile.exists() {
                return Ok(0);
            }
            let mut removed = 0;
            for entry in WalkDir::new(&profile).follow_links(false) {
                let entry = entry.map_err(|e| Error::internal(format!("walk profile: {e}")))?;
                if !entry.path_is_symlink() {
                    continue;
                }
                let target = std::fs::read_link(entry.path())
                    .map_err(|e| Error::io_with_path(&e, entry.path()))?;
                if target.starts_with(&artifact) {
                    std::fs::remove_file(entry.path())
                        .map_err(|e| Error::io_with_path(&e, entry.path()))?;
                    removed += 1;
                }
            }
            prune_empty_dirs(&profile)?;
            Ok::<_, Error>(removed)
        })
        .await
        .map_err(|e| Error::internal(format!("profile unlink task failed: {e}")))??;

        tracing::info!(profile = %self.name, %id, removed, "unlinked artifact");
        self.tx.emit(AppEvent::Store(StoreEvent::ProfileUnlinked {
            profile: self.name.clone(),
            id: id.to_string(),
            links: removed,
        }));
        Ok(removed)
    }

    /// Ids currently linked into the profile
    ///
    /// # Errors
    ///
    /// Returns an error if the marker directory cannot be read.
    pub async fn installed(&self) -> Result<Vec<PackageId>, Error> {
        let markers = self.path.join(LINK_MARKERS);
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&markers).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(Error::io_with_path(&e, &markers)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(PackageId::from(name));
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn register_root(&self) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.roots)
            .await
            .map_err(|e| Error::io_with_path(&e, &self.roots))?;
        vessel_platform::fs::replace_symlink(&self.path.join(LINK_MARKERS), &self.root_link()).await
    }
}

fn symlink(target: &Path, link: &Path) -> Result<(), Error> {
    std::os::unix::fs::symlink(target, link).map_err(|e| Error::io_with_path(&e, link))
}

/// Replace a folded directory link with a real directory of per-child links
fn materialize(link: &Path, target: &Path) -> Result<(), Error> {
    std::fs::remove_file(link).map_err(|e| Error::io_with_path(&e, link))?;
    std::fs::create_dir(link).map_err(|e| Error::io_with_path(&e, link))?;
    let entries = std::fs::read_dir(target).map_err(|e| Error::io_with_path(&e, target))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io_with_path(&e, target))?;
        symlink(&entry.path(), &link.join(entry.file_name()))?;
    }
    Ok(())
}

fn merge(src: &Path, dst: &Path, stats: &mut LinkStats) -> Result<(), Error> {
    let mut entries: Vec<_> = std::fs::read_dir(src)
        .map_err(|e| Error::io_with_path(&e, src))?
        .collect::<Result<_, _>>()
        .map_err(|e| Error::io_with_path(&e, src))?;
    entries.sort_by_key(std::fs::DirEntry::file_name);

    for entry in entries {
        let source = entry.path();
        let target = dst.join(entry.file_name());
        let is_dir = entry
            .file_type()
            .map_err(|e| Error::io_with_path(&e, &source))?
            .is_dir();

        let existing = match std::fs::symlink_metadata(&target) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                symlink(&source, &target)?;
                stats.links += 1;
                continue;
            }
            Err(e) => return Err(Error::io_with_path(&e, &target)),
        };

        if existing.file_type().is_symlink() {
            let current = std::fs::read_link(&target).map_err(|e| Error::io_with_path(&e, &target))?;
            if current == source {
                continue;
            }
            if is_dir && current.is_dir() {
                materialize(&target, &current)?;
                merge(&source, &target, stats)?;
                continue;
            }
            stats.conflicts.push((target, current));
        } else if existing.is_dir() && is_dir {
            merge(&source, &target, stats)?;
        } else {
            stats.conflicts.push((target.clone(), target));
        }
    }
    Ok(())
}

fn prune_empty_dirs(root: &Path) -> Result<(), Error> {
    for entry in WalkDir::new(root).contents_first(true).follow_links(false) {
        let entry = entry.map_err(|e| Error::internal(format!("walk profile: {e}")))?;
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            continue;
        }
        let empty = std::fs::read_dir(entry.path())
            .map(|mut d| d.next().is_none())
            .unwrap_or(false);
        if empty {
            std::fs::remove_dir(entry.path()).map_err(|e| Error::io_with_path(&e, entry.path()))?;
        }
    }
    Ok(())
}
