//! Binary format detection and dynamic-library name patching

mod macho;

pub use macho::{read_dylib_refs, DylibRefs};

use async_trait::async_trait;
use std::path::Path;
use vessel_errors::PlatformError;

use crate::core::PlatformContext;

/// Executable container formats recognised by magic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    MachO,
    Elf,
    Other,
}

/// Classify `data` by its leading magic
#[must_use]
pub fn detect_format(data: &[u8]) -> BinaryFormat {
    use object::FileKind;

    match FileKind::parse(data) {
        Ok(FileKind::MachO32 | FileKind::MachO64 | FileKind::MachOFat32 | FileKind::MachOFat64) => {
            BinaryFormat::MachO
        }
        Ok(FileKind::Elf32 | FileKind::Elf64) => BinaryFormat::Elf,
        _ => BinaryFormat::Other,
    }
}

/// The executable format of the running host
#[must_use]
pub fn host_format() -> BinaryFormat {
    if cfg!(target_os = "macos") {
        BinaryFormat::MachO
    } else if cfg!(target_os = "linux") {
        BinaryFormat::Elf
    } else {
        BinaryFormat::Other
    }
}

/// Whether the file at `path` is an executable or library in the host format
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn is_host_binary(path: &Path) -> Result<bool, PlatformError> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| invalid(path, &e.to_string()))?;
    let mut header = vec![0u8; 4096];
    let mut filled = 0;
    while filled < header.len() {
        let n = file
            .read(&mut header[filled..])
            .await
            .map_err(|e| invalid(path, &e.to_string()))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    header.truncate(filled);

    let format = detect_format(&header);
    Ok(format != BinaryFormat::Other && format == host_format())
}

fn invalid(path: &Path, message: &str) -> PlatformError {
    PlatformError::InvalidBinaryFormat {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// Trait for dynamic-library reference manipulation
#[async_trait]
pub trait BinaryOperations: Send + Sync {
    /// Read the self install name and dependent-library references
    async fn read_references(
        &self,
        ctx: &PlatformContext,
        binary: &Path,
    ) -> Result<DylibRefs, PlatformError>;

    /// Set the install name of a binary (`install_name_tool -id`)
    async fn set_install_name(
        &self,
        ctx: &PlatformContext,
        binary: &Path,
        name: &str,
    ) -> Result<(), PlatformError>;

    /// Change a dependency reference (`install_name_tool -change`)
    async fn change_dependency(
        &self,
        ctx: &PlatformContext,
        binary: &Path,
        old: &str,
        new: &str,
    ) -> Result<(), PlatformError>;
}

/// Make a freshly built binary relocatable within `store_root`
///
/// The self install name becomes the file's basename. Dependent-library
/// references that reach the store through a symlink chain are rewritten to
/// the canonical store path, so the packer's store-prefix rewrite turns every
/// store reference into the placeholder form. Returns a description of each
/// change made.
///
/// # Errors
///
/// Returns an error if the binary cannot be parsed or a patch command fails.
pub async fn relocate_references(
    ops: &dyn BinaryOperations,
    ctx: &PlatformContext,
    binary: &Path,
    store_root: &Path,
) -> Result<Vec<String>, PlatformError> {
    let refs = ops.read_references(ctx, binary).await?;
    let mut changes = Vec::new();

    if refs.install_name.is_none() && refs.dependencies.is_empty() {
        return Ok(changes);
    }

    let restore = crate::fs::ensure_writable(binary)
        .await
        .map_err(|e| invalid(binary, &e.to_string()))?;

    let result = async {
        if let Some(current) = &refs.install_name {
            let basename = binary
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if *current != basename {
                ops.set_install_name(ctx, binary, &basename).await?;
                changes.push(format!("id {current} -> {basename}"));
            }
        }

        for dep in &refs.dependencies {
            if Path::new(dep).starts_with(store_root) {
                continue;
            }
            if let Some(resolved) = resolve_into_store(Path::new(dep), store_root) {
                let new = resolved.to_string_lossy();
                ops.change_dependency(ctx, binary, dep, &new).await?;
                changes.push(format!("{dep} -> {new}"));
            }
        }
        Ok::<(), PlatformError>(())
    }
    .await;

    if let Some(mode) = restore {
        crate::fs::set_mode(binary, mode)
            .await
            .map_err(|e| invalid(binary, &e.to_string()))?;
    }

    result.map(|()| changes)
}

/// Follow a symlink chain starting at `path`; return the final target when it lies in `store_root`
fn resolve_into_store(path: &Path, store_root: &Path) -> Option<std::path::PathBuf> {
    let meta = std::fs::symlink_metadata(path).ok()?;
    if !meta.file_type().is_symlink() {
        return None;
    }
    let resolved = std::fs::canonicalize(path).ok()?;
    let store = std::fs::canonicalize(store_root).unwrap_or_else(|_| store_root.to_path_buf());
    resolved.starts_with(&store).then_some(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format_by_magic() {
        let mut macho = vec![0u8; 64];
        macho[..4].copy_from_slice(&[0xcf, 0xfa, 0xed, 0xfe]);
        assert_eq!(detect_format(&macho), BinaryFormat::MachO);

        let mut elf = vec![0u8; 64];
        elf[..4].copy_from_slice(b"\x7fELF");
        elf[4] = 2;
        assert_eq!(detect_format(&elf), BinaryFormat::Elf);

        assert_eq!(detect_format(b"#!/bin/sh\necho hi\n"), BinaryFormat::Other);
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_symlink_chain_into_store() {
        let temp = tempfile::tempdir().unwrap();
        let store = temp.path().join("store");
        let lib = store.join("abc-z-1").join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        std::fs::write(lib.join("libz.1.dylib"), b"x").unwrap();

        let outside = temp.path().join("usr-lib");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(lib.join("libz.1.dylib"), outside.join("libz.dylib")).unwrap();
        std::os::unix::fs::symlink(outside.join("libz.dylib"), outside.join("libz.so")).unwrap();

        let resolved = resolve_into_store(&outside.join("libz.so"), &store).unwrap();
        assert!(resolved.ends_with("abc-z-1/lib/libz.1.dylib"));

        std::fs::write(outside.join("plain"), b"x").unwrap();
        assert!(resolve_into_store(&outside.join("plain"), &store).is_none());
    }
}
