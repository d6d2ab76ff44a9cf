//! Filesystem helpers for store trees.
//!
//! Artifacts are frozen read-only once built, so removal and patching have to
//! restore write permission first. Recursive walks run on the blocking pool.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use vessel_errors::{Error, StorageError};
use walkdir::WalkDir;

/// Result type for filesystem operations
pub type Result<T> = std::result::Result<T, Error>;

const WRITE_BITS: u32 = 0o222;

/// Add owner write permission to `path`, returning the previous mode if it changed
///
/// # Errors
///
/// Returns an error if metadata cannot be read or permissions cannot be set.
pub async fn ensure_writable(path: &Path) -> io::Result<Option<u32>> {
    let mode = tokio::fs::metadata(path).await?.permissions().mode();
    if mode & 0o200 != 0 {
        return Ok(None);
    }
    set_mode(path, mode | 0o200).await?;
    Ok(Some(mode))
}

/// Set the permission bits of `path`
///
/// # Errors
///
/// Returns an error if permissions cannot be set.
pub async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

/// Clear every write bit below and including `root`; symlinks are left alone
///
/// # Errors
///
/// Returns an error if any entry cannot be read or changed.
pub async fn freeze_tree(root: &Path) -> Result<()> {
    let root = root.to_path_buf();
    run_blocking("freeze", move || {
        // Children first so directories stay writable while we descend
        for entry in WalkDir::new(&root).contents_first(true) {
            let entry = entry.map_err(walk_error)?;
            if entry.path_is_symlink() {
                continue;
            }
            let mode = entry.metadata().map_err(walk_error)?.permissions().mode();
            std::fs::set_permissions(entry.path(), std::fs::Permissions::from_mode(mode & !WRITE_BITS))
                .map_err(|e| Error::io_with_path(&e, entry.path()))?;
        }
        Ok(())
    })
    .await
}

/// Whether no file or directory below `root` carries a write bit
///
/// # Errors
///
/// Returns an error if the tree cannot be walked.
pub async fn is_frozen(root: &Path) -> Result<bool> {
    let root = root.to_path_buf();
    run_blocking("inspect", move || {
        for entry in WalkDir::new(&root) {
            let entry = entry.map_err(walk_error)?;
            if entry.path_is_symlink() {
                continue;
            }
            if entry.metadata().map_err(walk_error)?.permissions().mode() & WRITE_BITS != 0 {
                return Ok(false);
            }
        }
        Ok(true)
    })
    .await
}

/// Remove a directory tree, restoring owner write permission where needed
///
/// A missing `path` is not an error.
///
/// # Errors
///
/// Returns an error if any entry cannot be made writable or removed.
pub async fn remove_dir_all(path: &Path) -> Result<()> {
    let path = path.to_path_buf();
    run_blocking("remove", move || {
        if std::fs::symlink_metadata(&path).is_err() {
            return Ok(());
        }
        for entry in WalkDir::new(&path) {
            let Ok(entry) = entry else { continue };
            if entry.file_type().is_dir() {
                if let Ok(meta) = entry.metadata() {
                    let mode = meta.permissions().mode();
                    if mode & 0o200 == 0 {
                        let _ = std::fs::set_permissions(
                            entry.path(),
                            std::fs::Permissions::from_mode(mode | 0o700),
                        );
                    }
                }
            }
        }
        std::fs::remove_dir_all(&path).map_err(|e| Error::io_with_path(&e, &path))
    })
    .await
}

/// Mirror a directory tree, preserving modes and symlinks
///
/// # Errors
///
/// Returns an error if reading the source or writing the destination fails.
pub async fn copy_directory(src: &Path, dst: &Path) -> Result<()> {
    let src = src.to_path_buf();
    let dst = dst.to_path_buf();
    run_blocking("copy", move || {
        for entry in WalkDir::new(&src).sort_by_file_name() {
            let entry = entry.map_err(walk_error)?;
            let rel = entry
                .path()
                .strip_prefix(&src)
                .map_err(|e| Error::internal(e.to_string()))?;
            let target = dst.join(rel);
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let link = std::fs::read_link(entry.path())
                    .map_err(|e| Error::io_with_path(&e, entry.path()))?;
                std::os::unix::fs::symlink(&link, &target)
                    .map_err(|e| Error::io_with_path(&e, &target))?;
            } else if file_type.is_dir() {
                std::fs::create_dir_all(&target).map_err(|e| Error::io_with_path(&e, &target))?;
            } else {
                std::fs::copy(entry.path(), &target)
                    .map_err(|e| Error::io_with_path(&e, &target))?;
            }
        }
        Ok(())
    })
    .await
}

/// Total size in bytes of regular files below `path`
///
/// # Errors
///
/// Returns an error if the walk task fails.
pub async fn size(path: &Path) -> Result<u64> {
    let path = path.to_path_buf();
    run_blocking("size", move || {
        Ok(WalkDir::new(&path)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum())
    })
    .await
}

/// Create a symlink at `link` pointing to `target`, replacing an existing link
///
/// # Errors
///
/// Returns an error if `link` exists and is not a symlink, or creation fails.
pub async fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Ok(meta) = tokio::fs::symlink_metadata(link).await {
        if !meta.file_type().is_symlink() {
            return Err(StorageError::AlreadyExists {
                path: link.display().to_string(),
            }
            .into());
        }
        tokio::fs::remove_file(link)
            .await
            .map_err(|e| Error::io_with_path(&e, link))?;
    }
    tokio::fs::symlink(target, link)
        .await
        .map_err(|e| Error::io_with_path(&e, link))
}

/// Check if a path exists without following a final symlink
pub async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

/// Remove a scratch file, logging instead of failing
pub async fn remove_file_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::debug!(path = %path.display(), error = %e, "failed to remove file"),
    }
}

fn walk_error(e: walkdir::Error) -> Error {
    let path = e.path().map(Path::to_path_buf).unwrap_or_else(PathBuf::new);
    match e.into_io_error() {
        Some(io) => Error::io_with_path(&io, path),
        None => StorageError::IoError {
            message: format!("filesystem loop at {}", path.display()),
        }
        .into(),
    }
}

async fn run_blocking<T, F>(what: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::internal(format!("{what} task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remove_file_quietly() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("scratch");
        std::fs::write(&file, b"x").unwrap();

        remove_file_quietly(&file).await;
        assert!(!exists(&file).await);
        // Missing files and directories are tolerated
        remove_file_quietly(&file).await;
        remove_file_quietly(temp.path()).await;
        assert!(exists(temp.path()).await);
    }

    #[tokio::test]
    async fn test_freeze_then_remove() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("artifact");
        std::fs::create_dir_all(root.join("bin")).unwrap();
        std::fs::write(root.join("bin/tool"), b"#!/bin/sh\n").unwrap();
        std::os::unix::fs::symlink("tool", root.join("bin/alias")).unwrap();

        assert!(!is_frozen(&root).await.unwrap());
        freeze_tree(&root).await.unwrap();
        assert!(is_frozen(&root).await.unwrap());

        remove_dir_all(&root).await.unwrap();
        assert!(!exists(&root).await);
        remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn test_copy_preserves_mode_and_links() {
        let temp = tempfile::tempdir().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("sub")).unwrap();
        std::fs::write(src.join("sub/run"), b"x").unwrap();
        std::fs::set_permissions(src.join("sub/run"), std::fs::Permissions::from_mode(0o755))
            .unwrap();
        std::os::unix::fs::symlink("sub/run", src.join("link")).unwrap();

        let dst = temp.path().join("dst");
        copy_directory(&src, &dst).await.unwrap();

        let mode = std::fs::metadata(dst.join("sub/run")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(std::fs::read_link(dst.join("link")).unwrap(), Path::new("sub/run"));
        assert_eq!(size(&dst).await.unwrap(), 1);
    }
}
