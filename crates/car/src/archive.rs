//! The car container
//!
//! A car is a gzip stream whose header `Extra` field carries [`MAGIC`],
//! wrapping a USTAR archive of one artifact. Entries are written in sorted
//! order with owner, group and timestamps zeroed, so packing the same tree
//! twice yields the same bytes. Store paths inside file contents are folded
//! into [`PLACEHOLDER`] on the way in and expanded against the destination
//! store on the way out.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use vessel_errors::{CarError, Error};
use vessel_store::{ReferenceScanner, Replacer};
use walkdir::WalkDir;

/// Stands in for the absolute store path inside packed files
pub const PLACEHOLDER: &str = "@@VESSEL_PATH@@";

/// Gzip `Extra` payload identifying a car
pub const MAGIC: &[u8] = b"vsl1";

const CHUNK: usize = 64 * 1024;

fn with_slash(path: &[u8]) -> Vec<u8> {
    let mut out = path.to_vec();
    if out.last() != Some(&b'/') {
        out.push(b'/');
    }
    out
}

fn entry_error(path: &Path, message: impl Into<String>) -> Error {
    CarError::InvalidEntry {
        path: path.display().to_string(),
        message: message.into(),
    }
    .into()
}

/// Write the artifact at `artifact` as a car into `out`
///
/// Returns the writer and the set of hashes referenced below `store`.
///
/// # Errors
///
/// Returns `CarError::InvalidLink` for an absolute symlink leaving the
/// artifact, or an I/O error if the tree cannot be read or `out` written.
pub fn write_car<W: Write>(
    artifact: &Path,
    store: &Path,
    out: W,
) -> Result<(W, BTreeSet<String>), Error> {
    let store_bytes = store.as_os_str().as_encoded_bytes();
    let from = with_slash(store_bytes);
    let to = with_slash(PLACEHOLDER.as_bytes());
    let mut found = BTreeSet::new();

    let gz = GzBuilder::new()
        .extra(MAGIC.to_vec())
        .mtime(0)
        .write(out, Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    let mut chunk = vec![0u8; CHUNK];
    for entry in WalkDir::new(artifact)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| Error::internal(format!("walk artifact: {e}")))?;
        let path = entry.path();
        let rel = path
            .strip_prefix(artifact)
            .map_err(|e| entry_error(path, e.to_string()))?;
        let meta = std::fs::symlink_metadata(path).map_err(|e| Error::io_with_path(&e, path))?;

        let mut header = tar::Header::new_ustar();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_username("")?;
        header.set_groupname("")?;
        header.set_mode(meta.permissions().mode() & 0o7777);

        let kind = meta.file_type();
        if kind.is_symlink() {
            let target = std::fs::read_link(path).map_err(|e| Error::io_with_path(&e, path))?;
            let target = portable_target(artifact, path, &target)?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, rel, &target)
                .map_err(|e| Error::io_with_path(&e, path))?;
        } else if kind.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, rel, std::io::empty())
                .map_err(|e| Error::io_with_path(&e, path))?;
        } else if kind.is_file() {
            let mut file = File::open(path).map_err(|e| Error::io_with_path(&e, path))?;
            let mut scanner = ReferenceScanner::new(store_bytes);
            let mut replacer = Replacer::new(&from, &to);
            let mut data = Vec::with_capacity(usize::try_from(meta.len()).unwrap_or(0));
            loop {
                let n = file
                    .read(&mut chunk)
                    .map_err(|e| Error::io_with_path(&e, path))?;
                if n == 0 {
                    break;
                }
                scanner.feed(&chunk[..n]);
                replacer.feed(&chunk[..n], &mut data);
            }
            let folded = replacer.finish(&mut data);
            found.extend(scanner.finish());
            if folded > 0 {
                tracing::debug!(path = %rel.display(), folded, "folded store references");
            }

            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            builder
                .append_data(&mut header, rel, data.as_slice())
                .map_err(|e| Error::io_with_path(&e, path))?;
        } else {
            return Err(entry_error(path, "unsupported file type"));
        }
    }

    let gz = builder.into_inner()?;
    let out = gz.finish()?;
    Ok((out, found))
}

/// Express a symlink target relative to the link, rejecting escapes
fn portable_target(root: &Path, link: &Path, target: &Path) -> Result<PathBuf, Error> {
    if target.is_relative() {
        return Ok(target.to_path_buf());
    }
    if !target.starts_with(root) {
        return Err(CarError::InvalidLink {
            path: link.display().to_string(),
            target: target.display().to_string(),
        }
        .into());
    }
    let base = link.parent().unwrap_or(root);
    Ok(relative_path(base, target))
}

/// Path from directory `from` to `to`, both absolute
fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for part in &to[common..] {
        out.push(part.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Check a car's gzip header for [`MAGIC`]
///
/// # Errors
///
/// Returns `CarError::BadMagic` if `data` is not a car.
pub fn check_magic(data: &[u8]) -> Result<(), Error> {
    let decoder = GzDecoder::new(data);
    match decoder.header() {
        Some(header) if header.extra() == Some(MAGIC) => Ok(()),
        Some(_) => Err(CarError::BadMagic {
            message: "gzip extra field does not identify a car".to_string(),
        }
        .into()),
        None => Err(CarError::BadMagic {
            message: "not a gzip stream".to_string(),
        }
        .into()),
    }
}

/// Extract a car into `dest`, expanding the placeholder to `store`
///
/// `dest` must exist. Modes are restored as recorded; the caller freezes.
///
/// # Errors
///
/// Returns `CarError::BadMagic` for a foreign stream, `CarError::InvalidEntry`
/// for entries escaping `dest`, or an I/O error.
pub fn read_car(data: &[u8], dest: &Path, store: &Path) -> Result<usize, Error> {
    check_magic(data)?;

    let from = with_slash(PLACEHOLDER.as_bytes());
    let to = with_slash(store.as_os_str().as_encoded_bytes());
    let mut archive = tar::Archive::new(GzDecoder::new(data));
    let mut chunk = vec![0u8; CHUNK];
    let mut out = Vec::with_capacity(CHUNK);
    let mut count = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel = entry.path()?.into_owned();
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(entry_error(&rel, "path leaves the destination"));
        }
        let target = dest.join(&rel);
        let mode = entry.header().mode()? & 0o7777;

        match entry.header().entry_type() {
            tar::EntryType::Directory => {
                std::fs::create_dir_all(&target).map_err(|e| Error::io_with_path(&e, &target))?;
            }
            tar::EntryType::Symlink => {
                let link = entry
                    .link_name()?
                    .ok_or_else(|| entry_error(&rel, "symlink without target"))?
                    .into_owned();
                ensure_parent(&target)?;
                std::os::unix::fs::symlink(&link, &target)
                    .map_err(|e| Error::io_with_path(&e, &target))?;
            }
            tar::EntryType::Regular => {
                ensure_parent(&target)?;
                let mut file =
                    File::create(&target).map_err(|e| Error::io_with_path(&e, &target))?;
                let mut replacer = Replacer::new(&from, &to);
                loop {
                    let n = entry
                        .read(&mut chunk)
                        .map_err(|e| Error::io_with_path(&e, &target))?;
                    if n == 0 {
                        break;
                    }
                    replacer.feed(&chunk[..n], &mut out);
                    file.write_all(&out)
                        .map_err(|e| Error::io_with_path(&e, &target))?;
                    out.clear();
                }
                replacer.finish(&mut out);
                file.write_all(&out)
                    .map_err(|e| Error::io_with_path(&e, &target))?;
                out.clear();
                drop(file);
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))
                    .map_err(|e| Error::io_with_path(&e, &target))?;
            }
            other => {
                return Err(entry_error(&rel, format!("unsupported entry type {other:?}")));
            }
        }
        count += 1;
    }

    Ok(count)
}

fn ensure_parent(path: &Path) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(&e, parent))?;
    }
    Ok(())
}
