//! Minimal ELF64 section-header walk.
//!
//! Reads the on-disk image backing a loaded module and rebases each
//! allocated section to the module's load address. Only the handful of
//! header fields needed for the section map are decoded.

use crate::{AssemblyError, Section};
use std::path::Path;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    data.get(offset..offset + 8)
        .map(|b| u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
}

fn truncated(what: &str) -> AssemblyError {
    AssemblyError::Platform(format!("Truncated ELF image: {}", what))
}

/// Enumerate the allocated sections of the ELF file at `path`, with bases
/// relative to `load_base`.
pub fn enumerate_sections(path: &Path, load_base: usize) -> Result<Vec<Section>, AssemblyError> {
    let data = std::fs::read(path)
        .map_err(|e| AssemblyError::Platform(format!("Failed to read {}: {}", path.display(), e)))?;

    if data.len() < 64 || data[..4] != ELF_MAGIC {
        return Err(AssemblyError::Platform(format!(
            "Not an ELF image: {}",
            path.display()
        )));
    }
    if data[4] != ELFCLASS64 {
        return Err(AssemblyError::Platform(format!(
            "Not a 64-bit ELF image: {}",
            path.display()
        )));
    }

    // ELF64 header fields
    let sh_off = read_u64(&data, 0x28).ok_or_else(|| truncated("e_shoff"))? as usize;
    let sh_entsize = read_u16(&data, 0x3A).ok_or_else(|| truncated("e_shentsize"))? as usize;
    let sh_num = read_u16(&data, 0x3C).ok_or_else(|| truncated("e_shnum"))? as usize;
    let sh_strndx = read_u16(&data, 0x3E).ok_or_else(|| truncated("e_shstrndx"))? as usize;

    if sh_entsize < 64 || sh_strndx >= sh_num {
        return Err(truncated("section header table"));
    }

    let header = |index: usize| -> Option<(u32, u64, u64, u64)> {
        let base = sh_off + index * sh_entsize;
        Some((
            read_u32(&data, base)?,        // sh_name
            read_u64(&data, base + 0x10)?, // sh_addr
            read_u64(&data, base + 0x18)?, // sh_offset
            read_u64(&data, base + 0x20)?, // sh_size
        ))
    };

    let (_, _, strtab_off, strtab_size) =
        header(sh_strndx).ok_or_else(|| truncated("string table header"))?;
    let strtab = data
        .get(strtab_off as usize..(strtab_off + strtab_size) as usize)
        .ok_or_else(|| truncated("string table"))?;

    let section_name = |name_off: u32| -> &str {
        let tail = strtab.get(name_off as usize..).unwrap_or(&[]);
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end]).unwrap_or("")
    };

    let mut sections = Vec::with_capacity(sh_num);
    for i in 0..sh_num {
        let (name_off, addr, _, size) = header(i).ok_or_else(|| truncated("section header"))?;
        let name = section_name(name_off);
        // Unallocated sections (symtab, debug info) are not mapped
        if name.is_empty() || addr == 0 {
            continue;
        }
        sections.push(Section::new(name, load_base + addr as usize, size as usize));
    }

    Ok(sections)
}
