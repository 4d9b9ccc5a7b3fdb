//! C++ virtual-table discovery in loaded modules.
//!
//! Works backwards from the compiler-emitted type metadata: find the
//! mangled type name in read-only data, find the typeinfo that references
//! it, then find the vtable slot that points at the typeinfo.

use crate::Assembly;

/// Read a native word at an absolute address.
///
/// Callers only pass addresses inside enumerated sections of a loaded
/// module.
#[cfg(target_os = "linux")]
unsafe fn read_word(addr: usize) -> usize {
    std::ptr::read_unaligned(addr as *const usize)
}

#[cfg(target_os = "linux")]
pub fn find(assembly: &Assembly, name: &str, decorated: bool) -> Option<usize> {
    let read_only = assembly.section(".rodata")?.clone();
    let relocations = assembly.section(".data.rel.ro")?.clone();

    // Itanium typeinfo names carry a length prefix: "7MyClass"
    let decorated_name = if decorated {
        name.to_string()
    } else {
        format!("{}{}", name.len(), name)
    };
    let mut pattern = decorated_name.into_bytes();
    pattern.push(0);
    let mask = "x".repeat(pattern.len());

    let type_name = assembly.find_pattern(&pattern, &mask, None, Some(&read_only))?;

    // The typeinfo stores a pointer to its name one word in
    let name_ref = assembly.find_pattern(
        &type_name.to_ne_bytes(),
        "xxxxxxxx",
        None,
        Some(&relocations),
    )?;
    let type_info = name_ref - 8;

    for section_name in [".data.rel.ro", ".data.rel.ro.local"] {
        let Some(section) = assembly.section(section_name).cloned() else {
            continue;
        };

        let mut cursor = None;
        while let Some(reference) = assembly.find_pattern(
            &type_info.to_ne_bytes(),
            "xxxxxxxx",
            cursor,
            Some(&section),
        ) {
            // A vtable's typeinfo slot is preceded by a zero offset-to-top
            if unsafe { read_word(reference - 8) } == 0 {
                return Some(reference + 8);
            }
            cursor = Some(reference + 8);
        }
    }

    None
}

#[cfg(windows)]
pub fn find(assembly: &Assembly, name: &str, decorated: bool) -> Option<usize> {
    let runtime_data = assembly.section(".data")?.clone();
    let read_only = assembly.section(".rdata")?.clone();

    // MSVC type descriptors carry ".?AV<name>@@"
    let decorated_name = if decorated {
        name.to_string()
    } else {
        format!(".?AV{}@@", name)
    };
    let mut pattern = decorated_name.into_bytes();
    pattern.push(0);
    let mask = "x".repeat(pattern.len());

    let descriptor_name = assembly.find_pattern(&pattern, &mask, None, Some(&runtime_data))?;
    let type_descriptor = descriptor_name - 0x10;

    // RTTI references the descriptor by a 4-byte RVA
    let rva = ((type_descriptor - assembly.base()) as u32).to_ne_bytes();

    let mut cursor = None;
    while let Some(reference) =
        assembly.find_pattern(&rva, "xxxx", cursor, Some(&read_only))
    {
        // Complete object locator: signature == 1 on x64, vtable offset == 0
        let signature = unsafe { std::ptr::read_unaligned((reference - 0xC) as *const i32) };
        let offset = unsafe { std::ptr::read_unaligned((reference - 0x8) as *const i32) };
        if signature == 1 && offset == 0 {
            let locator = (reference - 0xC).to_ne_bytes();
            if let Some(locator_ref) =
                assembly.find_pattern(&locator, "xxxxxxxx", None, Some(&read_only))
            {
                return Some(locator_ref + 8);
            }
        }
        cursor = Some(reference + 4);
    }

    None
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn find(_assembly: &Assembly, _name: &str, _decorated: bool) -> Option<usize> {
    None
}
