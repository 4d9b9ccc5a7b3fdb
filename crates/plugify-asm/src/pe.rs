//! PE section-table walk over the mapped image (Windows).

use crate::{AssemblyError, Section};

/// Enumerate sections from the in-memory PE image at `base` (the HMODULE).
pub fn enumerate_sections(base: usize) -> Result<Vec<Section>, AssemblyError> {
    if base == 0 {
        return Err(AssemblyError::Platform("Null module base".into()));
    }

    unsafe {
        let image = base as *const u8;

        // IMAGE_DOS_HEADER: e_magic at 0, e_lfanew at 0x3C
        let e_magic = *(image as *const u16);
        if e_magic != 0x5A4D {
            return Err(AssemblyError::Platform("Missing DOS signature".into()));
        }
        let e_lfanew = *(image.add(0x3C) as *const i32) as usize;

        // IMAGE_NT_HEADERS: Signature, then IMAGE_FILE_HEADER
        let nt = image.add(e_lfanew);
        let signature = *(nt as *const u32);
        if signature != 0x0000_4550 {
            return Err(AssemblyError::Platform("Missing PE signature".into()));
        }
        let number_of_sections = *(nt.add(4 + 2) as *const u16) as usize;
        let size_of_optional_header = *(nt.add(4 + 16) as *const u16) as usize;

        // First IMAGE_SECTION_HEADER follows the optional header
        let first_section = nt.add(4 + 20 + size_of_optional_header);

        let mut sections = Vec::with_capacity(number_of_sections);
        for i in 0..number_of_sections {
            // IMAGE_SECTION_HEADER: Name[8], VirtualSize, VirtualAddress,
            // SizeOfRawData
            let header = first_section.add(i * 40);
            let name_bytes = std::slice::from_raw_parts(header, 8);
            let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(8);
            let name = match std::str::from_utf8(&name_bytes[..end]) {
                Ok(name) if !name.is_empty() => name,
                _ => continue,
            };
            let virtual_address = *(header.add(12) as *const u32) as usize;
            let size_of_raw_data = *(header.add(16) as *const u32) as usize;
            sections.push(Section::new(name, base + virtual_address, size_of_raw_data));
        }

        Ok(sections)
    }
}
