//! Mark and sweep over the store

use std::collections::{BTreeSet, VecDeque};
use std::path::{Component, Path, PathBuf};

use vessel_errors::Error;
use vessel_events::{AppEvent, EventEmitter, EventSender, StoreEvent};
use vessel_platform::fs as pfs;
use vessel_types::{GcReport, PackageId};
use walkdir::WalkDir;

use crate::Store;

/// Garbage collector rooted at the `roots/` directory
#[derive(Debug, Clone)]
pub struct GarbageCollector {
    store: Store,
    roots: PathBuf,
    tx: Option<EventSender>,
}

impl GarbageCollector {
    #[must_use]
    pub fn new(store: Store, roots: PathBuf) -> Self {
        Self {
            store,
            roots,
            tx: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Compute the live set
    ///
    /// Every symlink below a root that points into the store keeps its
    /// artifact alive, together with the runtime and build dependencies
    /// recorded in that artifact's metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if a root cannot be walked or metadata cannot be read.
    pub async fn mark(&self) -> Result<BTreeSet<PackageId>, Error> {
        let roots = self.root_dirs().await?;
        let store = self.store.path().to_path_buf();
        let root_count = roots.len();

        let direct = tokio::task::spawn_blocking(move || {
            let mut found = BTreeSet::new();
            for root in roots {
                for entry in WalkDir::new(&root).follow_links(false) {
                    let Ok(entry) = entry else { continue };
                    if !entry.path_is_symlink() {
                        continue;
                    }
                    let Ok(target) = std::fs::read_link(entry.path()) else {
                        continue;
                    };
                    let target = if target.is_absolute() {
                        target
                    } else {
                        entry.path().parent().unwrap_or(&root).join(target)
                    };
                    if let Some(id) = store_id(&store, &target) {
                        found.insert(id);
                    }
                }
            }
            found
        })
        .await
        .map_err(|e| Error::internal(format!("gc mark task failed: {e}")))?;

        let mut live = BTreeSet::new();
        let mut queue: VecDeque<PackageId> = direct.into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if !live.insert(id.clone()) {
                continue;
            }
            if let Some(info) = self.store.read_info(&id).await? {
                queue.extend(info.retained_deps().cloned());
            }
        }

        tracing::debug!(live = live.len(), roots = root_count, "gc mark complete");
        self.tx.emit(AppEvent::Store(StoreEvent::GcMarked {
            live: live.len(),
            roots: root_count,
        }));
        Ok(live)
    }

    /// Delete every artifact outside `live`
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed or an artifact cannot
    /// be removed.
    pub async fn sweep(&self, live: &BTreeSet<PackageId>) -> Result<GcReport, Error> {
        let mut report = GcReport::default();

        for id in self.store.list().await? {
            if live.contains(&id) {
                continue;
            }
            let path = self.store.artifact_path(&id);
            let bytes = pfs::size(&path).await?;
            let entries = count_entries(&path).await?;

            self.store.remove(&id).await?;
            tracing::info!(%id, bytes, "removed unreachable artifact");
            self.tx.emit(AppEvent::Store(StoreEvent::GcRemoved {
                id: id.to_string(),
                bytes,
            }));

            report.bytes_recovered += bytes;
            report.entries_removed += entries;
            report.removed.push(id);
        }

        self.tx.emit(AppEvent::Store(StoreEvent::GcCompleted {
            removed: report.removed.len(),
            entries_removed: report.entries_removed,
            bytes_recovered: report.bytes_recovered,
        }));
        Ok(report)
    }

    /// Mark, then sweep
    ///
    /// # Errors
    ///
    /// Returns an error if either phase fails.
    pub async fn sweep_and_remove(&self) -> Result<GcReport, Error> {
        let live = self.mark().await?;
        self.sweep(&live).await
    }

    async fn root_dirs(&self) -> Result<Vec<PathBuf>, Error> {
        let mut dirs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.roots).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(Error::io_with_path(&e, &self.roots)),
        };
        while let Some(entry) = entries.next_entry().await? {
            // Dangling roots belong to deleted profiles
            match tokio::fs::canonicalize(entry.path()).await {
                Ok(dir) => dirs.push(dir),
                Err(_) => tracing::debug!(root = %entry.path().display(), "skipping dangling root"),
            }
        }
        Ok(dirs)
    }
}

/// The artifact id a path inside the store belongs to
fn store_id(store: &Path, target: &Path) -> Option<PackageId> {
    let rel = target.strip_prefix(store).ok()?;
    match rel.components().next()? {
        Component::Normal(name) => {
            let name = name.to_str()?;
            // Sidecar metadata is never a link target worth keeping
            (!name.ends_with(".json")).then(|| PackageId::from(name))
        }
        _ => None,
    }
}

async fn count_entries(path: &Path) -> Result<u64, Error> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || WalkDir::new(&path).into_iter().filter_map(Result::ok).count() as u64)
        .await
        .map_err(|e| Error::internal(format!("count task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_id_extraction() {
        let store = Path::new("/data/store");
        assert_eq!(
            store_id(store, Path::new("/data/store/abc-p1-1/bin/tool")),
            Some(PackageId::from("abc-p1-1"))
        );
        assert_eq!(store_id(store, Path::new("/data/store/abc-p1-1")), Some(PackageId::from("abc-p1-1")));
        assert_eq!(store_id(store, Path::new("/usr/bin/env")), None);
        assert_eq!(store_id(store, Path::new("/data/store/abc-p1-1.pkg-info.json")), None);
    }
}
