//! Source archive extraction

use std::path::{Component, Path, PathBuf};

use async_compression::tokio::bufread::{BzDecoder, GzipDecoder, XzDecoder};
use tokio::io::{AsyncRead, BufReader};
use vessel_errors::{Error, InstallError};
use vessel_platform::fs as pfs;

/// Compression wrapped around a tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

const SUFFIXES: &[(&str, ArchiveKind)] = &[
    (".tar.gz", ArchiveKind::TarGz),
    (".tgz", ArchiveKind::TarGz),
    (".tar.bz2", ArchiveKind::TarBz2),
    (".tbz2", ArchiveKind::TarBz2),
    (".tbz", ArchiveKind::TarBz2),
    (".tar.xz", ArchiveKind::TarXz),
    (".txz", ArchiveKind::TarXz),
    (".tar", ArchiveKind::Tar),
];

impl ArchiveKind {
    /// Detect an archive by the suffix of a path or URL
    #[must_use]
    pub fn detect(name: &str) -> Option<Self> {
        let name = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, kind)| *kind)
    }
}

fn failed(message: impl Into<String>) -> Error {
    InstallError::ExtractionFailed {
        message: message.into(),
    }
    .into()
}

/// Extract `archive` into `dest`, dropping the first `strip` path components
///
/// Returns the number of entries written.
///
/// # Errors
///
/// Returns `InstallError::ExtractionFailed` if the stream is corrupt or an
/// entry would land outside `dest`.
pub async fn extract(
    archive: &Path,
    kind: ArchiveKind,
    dest: &Path,
    strip: usize,
) -> Result<usize, Error> {
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| Error::io_with_path(&e, dest))?;

    let tar_path = if kind == ArchiveKind::Tar {
        archive.to_path_buf()
    } else {
        let out = archive.with_extension("untar");
        decompress(archive, kind, &out).await?;
        out
    };

    let dest_owned = dest.to_path_buf();
    let reader = tar_path.clone();
    let result = tokio::task::spawn_blocking(move || unpack_tar(&reader, &dest_owned, strip))
        .await
        .map_err(|e| Error::internal(format!("extract task failed: {e}")))?;

    if kind != ArchiveKind::Tar {
        pfs::remove_file_quietly(&tar_path).await;
    }
    let count = result?;
    tracing::debug!(archive = %archive.display(), dest = %dest.display(), count, "extracted");
    Ok(count)
}

async fn decompress(archive: &Path, kind: ArchiveKind, out: &Path) -> Result<(), Error> {
    let file = tokio::fs::File::open(archive)
        .await
        .map_err(|e| Error::io_with_path(&e, archive))?;
    let input = BufReader::new(file);
    let mut decoder: Box<dyn AsyncRead + Unpin + Send> = match kind {
        ArchiveKind::TarGz => {
            let mut d = GzipDecoder::new(input);
            d.multiple_members(true);
            Box::new(d)
        }
        ArchiveKind::TarBz2 => Box::new(BzDecoder::new(input)),
        ArchiveKind::TarXz => Box::new(XzDecoder::new(input)),
        ArchiveKind::Tar => Box::new(input),
    };
    let mut output = tokio::fs::File::create(out)
        .await
        .map_err(|e| Error::io_with_path(&e, out))?;
    tokio::io::copy(&mut decoder, &mut output)
        .await
        .map_err(|e| failed(format!("{}: {e}", archive.display())))?;
    Ok(())
}

/// Remaining path after `strip` leading components; `None` when nothing is left
fn stripped(path: &Path, strip: usize) -> Result<Option<PathBuf>, Error> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return Err(failed(format!("entry leaves the destination: {}", path.display()))),
        }
    }
    let rest: PathBuf = out.components().skip(strip).collect();
    Ok((!rest.as_os_str().is_empty()).then_some(rest))
}

fn unpack_tar(tar_path: &Path, dest: &Path, strip: usize) -> Result<usize, Error> {
    let file = std::fs::File::open(tar_path).map_err(|e| Error::io_with_path(&e, tar_path))?;
    let mut archive = tar::Archive::new(std::io::BufReader::new(file));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut count = 0;
    for entry in archive
        .entries()
        .map_err(|e| failed(format!("{}: {e}", tar_path.display())))?
    {
        let mut entry = entry.map_err(|e| failed(e.to_string()))?;
        let kind = entry.header().entry_type();
        if matches!(
            kind,
            tar::EntryType::XGlobalHeader | tar::EntryType::XHeader | tar::EntryType::GNULongName
        ) {
            continue;
        }

        let path = entry.path().map_err(|e| failed(e.to_string()))?.into_owned();
        let Some(rel) = stripped(&path, strip)? else {
            continue;
        };
        let target = dest.join(&rel);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io_with_path(&e, parent))?;
        }

        if kind == tar::EntryType::Link {
            let link = entry
                .link_name()
                .map_err(|e| failed(e.to_string()))?
                .ok_or_else(|| failed(format!("hard link without target: {}", path.display())))?;
            let Some(link_rel) = stripped(&link, strip)? else {
                return Err(failed(format!("hard link to archive root: {}", path.display())));
            };
            if let Err(e) = std::fs::remove_file(&target) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %target.display(), error = %e, "failed to remove file");
                }
            }
            std::fs::hard_link(dest.join(link_rel), &target)
                .map_err(|e| Error::io_with_path(&e, &target))?;
        } else {
            entry
                .unpack(&target)
                .map_err(|e| failed(format!("{}: {e}", rel.display())))?;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_suffix() {
        assert_eq!(ArchiveKind::detect("x-1.0.tar.gz"), Some(ArchiveKind::TarGz));
        assert_eq!(
            ArchiveKind::detect("https://h/x-1.0.TAR.XZ?download=1"),
            Some(ArchiveKind::TarXz)
        );
        assert_eq!(ArchiveKind::detect("x.tbz2"), Some(ArchiveKind::TarBz2));
        assert_eq!(ArchiveKind::detect("x.tar"), Some(ArchiveKind::Tar));
        assert_eq!(ArchiveKind::detect("x.patch"), None);
    }

    #[test]
    fn test_strip_components() {
        assert_eq!(
            stripped(Path::new("pkg-1.0/src/main.c"), 1).unwrap(),
            Some(PathBuf::from("src/main.c"))
        );
        assert_eq!(stripped(Path::new("pkg-1.0/"), 1).unwrap(), None);
        assert_eq!(
            stripped(Path::new("./a/b"), 0).unwrap(),
            Some(PathBuf::from("a/b"))
        );
        assert!(stripped(Path::new("../escape"), 0).is_err());
    }

    #[tokio::test]
    async fn test_extract_plain_tar_with_strip() {
        let temp = tempfile::tempdir().unwrap();
        let tar_path = temp.path().join("src.tar");
        {
            let file = std::fs::File::create(&tar_path).unwrap();
            let mut builder = tar::Builder::new(file);
            let data = b"int main() { return 0; }\n";
            let mut header = tar::Header::new_ustar();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, "pkg-1.0/main.c", &data[..])
                .unwrap();
            builder.finish().unwrap();
        }

        let dest = temp.path().join("out");
        let count = extract(&tar_path, ArchiveKind::Tar, &dest, 1).await.unwrap();
        assert_eq!(count, 1);
        assert!(dest.join("main.c").is_file());
    }
}
