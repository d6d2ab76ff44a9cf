//! Mach-O load command reading

use object::macho::{MachHeader32, MachHeader64};
use object::read::macho::{FatArch, LoadCommandVariant, MachHeader, MachOFatFile32, MachOFatFile64};
use object::{Endianness, FileKind};

/// Dynamic-library names recorded in a binary's load commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DylibRefs {
    /// `LC_ID_DYLIB`, present for dynamic libraries only
    pub install_name: Option<String>,
    /// `LC_LOAD_DYLIB` and its weak/reexport/lazy/upward variants
    pub dependencies: Vec<String>,
}

/// Read the dylib references of a Mach-O (thin or fat) image
///
/// Non-Mach-O input yields empty references. For fat images the first
/// architecture is read; `install_name_tool` patches every slice alike.
///
/// # Errors
///
/// Returns an error if the Mach-O structures are malformed.
pub fn read_dylib_refs(data: &[u8]) -> object::Result<DylibRefs> {
    match FileKind::parse(data)? {
        FileKind::MachO64 => collect::<MachHeader64<Endianness>>(data),
        FileKind::MachO32 => collect::<MachHeader32<Endianness>>(data),
        FileKind::MachOFat32 => match MachOFatFile32::parse(data)?.arches().first() {
            Some(arch) => read_dylib_refs(arch.data(data)?),
            None => Ok(DylibRefs::default()),
        },
        FileKind::MachOFat64 => match MachOFatFile64::parse(data)?.arches().first() {
            Some(arch) => read_dylib_refs(arch.data(data)?),
            None => Ok(DylibRefs::default()),
        },
        _ => Ok(DylibRefs::default()),
    }
}

fn collect<Mach: MachHeader<Endian = Endianness>>(data: &[u8]) -> object::Result<DylibRefs> {
    let header = Mach::parse(data, 0)?;
    let endian = header.endian()?;
    let mut commands = header.load_commands(endian, data, 0)?;
    let mut refs = DylibRefs::default();

    while let Some(command) = commands.next()? {
        match command.variant()? {
            LoadCommandVariant::IdDylib(dylib) => {
                let name = command.string(endian, dylib.dylib.name)?;
                refs.install_name = Some(String::from_utf8_lossy(name).into_owned());
            }
            LoadCommandVariant::Dylib(dylib) => {
                let name = command.string(endian, dylib.dylib.name)?;
                refs.dependencies
                    .push(String::from_utf8_lossy(name).into_owned());
            }
            _ => {}
        }
    }

    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_macho_has_no_refs() {
        let refs = read_dylib_refs(b"#!/bin/sh\nexit 0\n").unwrap_or_default();
        assert_eq!(refs, DylibRefs::default());
    }

    /// Minimal 64-bit little-endian image with one `LC_ID_DYLIB` and one `LC_LOAD_DYLIB`
    fn tiny_dylib() -> Vec<u8> {
        fn dylib_cmd(cmd: u32, name: &str) -> Vec<u8> {
            let mut name_bytes = name.as_bytes().to_vec();
            name_bytes.push(0);
            while (24 + name_bytes.len()) % 8 != 0 {
                name_bytes.push(0);
            }
            let size = u32::try_from(24 + name_bytes.len()).unwrap();
            let mut out = Vec::new();
            out.extend_from_slice(&cmd.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&24u32.to_le_bytes()); // name offset
            out.extend_from_slice(&0u32.to_le_bytes()); // timestamp
            out.extend_from_slice(&0u32.to_le_bytes()); // current version
            out.extend_from_slice(&0u32.to_le_bytes()); // compat version
            out.extend_from_slice(&name_bytes);
            out
        }

        let id = dylib_cmd(0xd, "/store/abc-z-1/lib/libz.dylib");
        let load = dylib_cmd(0xc, "/usr/lib/libSystem.B.dylib");
        let sizeofcmds = u32::try_from(id.len() + load.len()).unwrap();

        let mut data = Vec::new();
        data.extend_from_slice(&0xfeed_facf_u32.to_le_bytes());
        data.extend_from_slice(&0x0100_000c_u32.to_le_bytes()); // arm64
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&6u32.to_le_bytes()); // MH_DYLIB
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&sizeofcmds.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&id);
        data.extend_from_slice(&load);
        data
    }

    #[test]
    fn test_reads_id_and_dependencies() {
        let refs = read_dylib_refs(&tiny_dylib()).unwrap();
        assert_eq!(
            refs.install_name.as_deref(),
            Some("/store/abc-z-1/lib/libz.dylib")
        );
        assert_eq!(refs.dependencies, vec!["/usr/lib/libSystem.B.dylib"]);
    }
}
