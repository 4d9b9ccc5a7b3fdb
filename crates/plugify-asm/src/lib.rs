//! Dynamic library handle with section enumeration, symbol lookup, AOB
//! pattern scanning and C++ virtual-table discovery.
//!
//! Cross-platform: `dlopen` on unix, `LoadLibraryExW` on Windows. Section
//! maps come from the ELF section headers (Linux) or the PE section table
//! (Windows); platforms without an implemented walk simply report no
//! sections and section-based lookups return `None`.

mod section;
mod vtable;

#[cfg(target_os = "linux")]
mod elf;
#[cfg(windows)]
mod pe;

pub use section::{pattern_to_masked_bytes, scan, Section};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or querying an assembly
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Library file not found or could not be loaded
    #[error("Library not found: {path}")]
    NotFound {
        /// Path that was attempted, with the loader's message appended
        path: String,
    },

    /// Symbol not found in library
    #[error("Symbol not found: {symbol} in {library}")]
    SymbolNotFound {
        /// Symbol name that was not found
        symbol: String,
        /// Library path
        library: String,
    },

    /// No module contains the given name or address
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Invalid path encoding
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Platform-specific error
    #[error("Platform error: {0}")]
    Platform(String),
}

/// Portable library load flags, mapped to `RTLD_*` / `LOAD_LIBRARY_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags(u32);

impl LoadFlags {
    /// Resolve symbols lazily (`RTLD_LAZY`)
    pub const LAZY: LoadFlags = LoadFlags(1 << 0);
    /// Resolve all symbols immediately (`RTLD_NOW`)
    pub const NOW: LoadFlags = LoadFlags(1 << 1);
    /// Make symbols available to later loads (`RTLD_GLOBAL`)
    pub const GLOBAL: LoadFlags = LoadFlags(1 << 2);
    /// Keep symbols private (`RTLD_LOCAL`)
    pub const LOCAL: LoadFlags = LoadFlags(1 << 3);
    /// Never unload (`RTLD_NODELETE`)
    pub const NODELETE: LoadFlags = LoadFlags(1 << 4);
    /// Only succeed if already resident (`RTLD_NOLOAD`)
    pub const NOLOAD: LoadFlags = LoadFlags(1 << 5);
    /// Prefer own symbols over global scope (`RTLD_DEEPBIND`, Linux)
    pub const DEEPBIND: LoadFlags = LoadFlags(1 << 6);
    /// Map as datafile (`LOAD_LIBRARY_AS_DATAFILE`, Windows)
    pub const DATAFILE: LoadFlags = LoadFlags(1 << 7);
    /// Map as image resource (`LOAD_LIBRARY_AS_IMAGE_RESOURCE`, Windows)
    pub const IMAGE_RESOURCE: LoadFlags = LoadFlags(1 << 8);
    /// `LOAD_WITH_ALTERED_SEARCH_PATH` (Windows)
    pub const ALTERED_SEARCH_PATH: LoadFlags = LoadFlags(1 << 9);
    /// `LOAD_LIBRARY_SEARCH_SYSTEM32` (Windows)
    pub const SEARCH_SYSTEM32: LoadFlags = LoadFlags(1 << 10);

    pub fn contains(self, other: LoadFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for LoadFlags {
    type Output = LoadFlags;

    fn bitor(self, rhs: LoadFlags) -> LoadFlags {
        LoadFlags(self.0 | rhs.0)
    }
}

/// A loaded dynamic library.
///
/// Owns the OS handle exclusively; dropping unloads the library. Loading
/// the same path twice yields two handles with independent OS refcounts.
pub struct Assembly {
    handle: PlatformHandle,
    path: PathBuf,
    base: usize,
    sections: Vec<Section>,
    executable: Option<Section>,
}

impl Assembly {
    /// Load a dynamic library from a path.
    ///
    /// With `sections` set, the module's section map is enumerated at load
    /// time; without it, section and vtable queries return `None`.
    pub fn load(
        path: impl AsRef<Path>,
        flags: LoadFlags,
        sections: bool,
    ) -> Result<Self, AssemblyError> {
        let path = path.as_ref().to_path_buf();
        let handle = PlatformHandle::open(&path, flags)?;
        let base = handle.base_address(&path);

        let mut assembly = Assembly {
            handle,
            path,
            base,
            sections: Vec::new(),
            executable: None,
        };

        if sections {
            assembly.sections = assembly.enumerate_sections()?;
            assembly.executable = assembly.section(".text").cloned();
        }

        Ok(assembly)
    }

    /// Resolve an already-loaded module by name and wrap it.
    ///
    /// The platform library suffix is appended when `name` has no
    /// extension. Fails if no loaded module matches.
    pub fn from_name(
        name: &str,
        flags: LoadFlags,
        sections: bool,
    ) -> Result<Self, AssemblyError> {
        if name.is_empty() {
            return Err(AssemblyError::ModuleNotFound(String::new()));
        }
        let path = PlatformHandle::resolve_name(name)?;
        Self::load(path, flags | LoadFlags::NOLOAD, sections)
    }

    /// Locate the module containing a live address and wrap it.
    pub fn from_memory(
        address: usize,
        flags: LoadFlags,
        sections: bool,
    ) -> Result<Self, AssemblyError> {
        if address == 0 {
            return Err(AssemblyError::ModuleNotFound("null address".into()));
        }
        let path = PlatformHandle::resolve_address(address)?;
        Self::load(path, flags | LoadFlags::NOLOAD, sections)
    }

    /// Wrap an existing OS handle in a fresh, independently-refcounted
    /// `Assembly`. The original handle remains the caller's to close.
    pub fn from_handle(
        handle: *mut std::ffi::c_void,
        flags: LoadFlags,
        sections: bool,
    ) -> Result<Self, AssemblyError> {
        if handle.is_null() {
            return Err(AssemblyError::ModuleNotFound("null handle".into()));
        }
        let path = PlatformHandle::resolve_handle(handle)?;
        Self::load(path, flags | LoadFlags::NOLOAD, sections)
    }

    /// Direct linker lookup of an exported symbol, as an address.
    pub fn symbol_addr(&self, name: &str) -> Result<usize, AssemblyError> {
        self.handle.symbol(name, &self.path)
    }

    /// Direct linker lookup of an exported symbol, cast to `T`.
    ///
    /// # Safety
    ///
    /// `T` must match the symbol's actual type and the assembly must
    /// outlive every use of the returned value.
    pub unsafe fn symbol<T: Copy>(&self, name: &str) -> Result<T, AssemblyError> {
        debug_assert_eq!(std::mem::size_of::<T>(), std::mem::size_of::<usize>());
        let addr = self.symbol_addr(name)?;
        Ok(std::mem::transmute_copy(&addr))
    }

    /// Section by name, if enumerated at load time.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// All enumerated sections.
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Scan for a masked byte pattern (`'x'` = match, `'?'` = ignore).
    ///
    /// Defaults to the executable section when `section` is `None`.
    /// `start` resumes a previous scan.
    pub fn find_pattern(
        &self,
        pattern: &[u8],
        mask: &str,
        start: Option<usize>,
        section: Option<&Section>,
    ) -> Option<usize> {
        let section = section.or(self.executable.as_ref())?;
        unsafe { section.find_pattern(pattern, mask, start) }
    }

    /// Scan for an IDA-style string pattern (`"48 89 ? ? 08"`).
    pub fn find_pattern_str(
        &self,
        pattern: &str,
        start: Option<usize>,
        section: Option<&Section>,
    ) -> Option<usize> {
        let (bytes, mask) = pattern_to_masked_bytes(pattern);
        self.find_pattern(&bytes, &mask, start, section)
    }

    /// Locate a C++ virtual table by class name.
    ///
    /// `decorated` means `name` is already in the platform's mangled
    /// typeinfo spelling; otherwise the prefix is applied here.
    pub fn virtual_table(&self, name: &str, decorated: bool) -> Option<usize> {
        if name.is_empty() {
            return None;
        }
        vtable::find(self, name, decorated)
    }

    /// Module load base.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Path the library was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name component of the path.
    pub fn name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Raw OS handle.
    pub fn handle(&self) -> *mut std::ffi::c_void {
        self.handle.raw()
    }

    fn enumerate_sections(&self) -> Result<Vec<Section>, AssemblyError> {
        #[cfg(target_os = "linux")]
        {
            elf::enumerate_sections(&self.path, self.base)
        }
        #[cfg(windows)]
        {
            pe::enumerate_sections(self.base)
        }
        #[cfg(not(any(target_os = "linux", windows)))]
        {
            Ok(Vec::new())
        }
    }
}

// The handle is owned exclusively and all queries are reads.
unsafe impl Send for Assembly {}
unsafe impl Sync for Assembly {}

// Platform handle implementations

#[cfg(unix)]
type PlatformHandle = unix_impl::UnixHandle;

#[cfg(windows)]
type PlatformHandle = windows_impl::WindowsHandle;

#[cfg(unix)]
mod unix_impl {
    use super::{AssemblyError, LoadFlags};
    use std::ffi::{CStr, CString};
    use std::path::{Path, PathBuf};

    pub struct UnixHandle {
        handle: *mut std::ffi::c_void,
    }

    fn translate_flags(flags: LoadFlags) -> i32 {
        if flags.is_empty() {
            return libc::RTLD_LAZY | libc::RTLD_LOCAL;
        }
        let mut out = 0;
        if flags.contains(LoadFlags::LAZY) {
            out |= libc::RTLD_LAZY;
        }
        if flags.contains(LoadFlags::NOW) {
            out |= libc::RTLD_NOW;
        }
        if flags.contains(LoadFlags::GLOBAL) {
            out |= libc::RTLD_GLOBAL;
        }
        if flags.contains(LoadFlags::LOCAL) {
            out |= libc::RTLD_LOCAL;
        }
        if flags.contains(LoadFlags::NODELETE) {
            out |= libc::RTLD_NODELETE;
        }
        if flags.contains(LoadFlags::NOLOAD) {
            out |= libc::RTLD_NOLOAD;
        }
        #[cfg(target_os = "linux")]
        if flags.contains(LoadFlags::DEEPBIND) {
            out |= libc::RTLD_DEEPBIND;
        }
        // RTLD_LAZY or RTLD_NOW is mandatory
        if out & (libc::RTLD_LAZY | libc::RTLD_NOW) == 0 {
            out |= libc::RTLD_LAZY;
        }
        out
    }

    fn last_dl_error() -> String {
        unsafe {
            let err = libc::dlerror();
            if err.is_null() {
                "Unknown error".to_string()
            } else {
                CStr::from_ptr(err).to_string_lossy().into_owned()
            }
        }
    }

    impl UnixHandle {
        pub fn open(path: &Path, flags: LoadFlags) -> Result<Self, AssemblyError> {
            let path_str = path
                .to_str()
                .ok_or_else(|| AssemblyError::InvalidPath(format!("{:?}", path)))?;
            let c_path = CString::new(path_str)
                .map_err(|e| AssemblyError::InvalidPath(e.to_string()))?;

            let handle = unsafe { libc::dlopen(c_path.as_ptr(), translate_flags(flags)) };
            if handle.is_null() {
                return Err(AssemblyError::NotFound {
                    path: format!("{}: {}", path_str, last_dl_error()),
                });
            }

            Ok(UnixHandle { handle })
        }

        pub fn symbol(&self, name: &str, lib_path: &Path) -> Result<usize, AssemblyError> {
            let c_name = CString::new(name)
                .map_err(|e| AssemblyError::Platform(format!("Invalid symbol name: {}", e)))?;

            unsafe {
                // Clear any stale error state first
                libc::dlerror();
                let symbol = libc::dlsym(self.handle, c_name.as_ptr());
                let err = libc::dlerror();
                if symbol.is_null() || !err.is_null() {
                    return Err(AssemblyError::SymbolNotFound {
                        symbol: name.to_string(),
                        library: lib_path.display().to_string(),
                    });
                }
                Ok(symbol as usize)
            }
        }

        pub fn raw(&self) -> *mut std::ffi::c_void {
            self.handle
        }

        /// Load base of the module backing `path`, via `dl_iterate_phdr`.
        #[cfg(target_os = "linux")]
        pub fn base_address(&self, path: &Path) -> usize {
            super::linux_phdr::find_module(|name| {
                !name.is_empty() && Path::new(name).file_name() == path.file_name()
            })
            .map(|(base, _)| base)
            .unwrap_or(0)
        }

        #[cfg(not(target_os = "linux"))]
        pub fn base_address(&self, _path: &Path) -> usize {
            0
        }

        /// Path of an already-resident module matching `name`.
        #[cfg(target_os = "linux")]
        pub fn resolve_name(name: &str) -> Result<PathBuf, AssemblyError> {
            let mut file = name.to_string();
            if !file.contains('.') {
                file.push_str(".so");
            }
            super::linux_phdr::find_module(|module| module.contains(&file))
                .map(|(_, path)| PathBuf::from(path))
                .ok_or_else(|| AssemblyError::ModuleNotFound(name.to_string()))
        }

        #[cfg(not(target_os = "linux"))]
        pub fn resolve_name(name: &str) -> Result<PathBuf, AssemblyError> {
            Err(AssemblyError::ModuleNotFound(name.to_string()))
        }

        /// Path of the module containing `address`, via `dladdr`.
        pub fn resolve_address(address: usize) -> Result<PathBuf, AssemblyError> {
            let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
            let ok = unsafe { libc::dladdr(address as *const std::ffi::c_void, &mut info) };
            if ok == 0 || info.dli_fname.is_null() {
                return Err(AssemblyError::ModuleNotFound(format!("{:#x}", address)));
            }
            let name = unsafe { CStr::from_ptr(info.dli_fname) };
            Ok(PathBuf::from(name.to_string_lossy().into_owned()))
        }

        /// Path of the module behind an existing `dlopen` handle, found by
        /// re-opening each resident module with `RTLD_NOLOAD` and comparing
        /// handles.
        #[cfg(target_os = "linux")]
        pub fn resolve_handle(handle: *mut std::ffi::c_void) -> Result<PathBuf, AssemblyError> {
            // Collect first: dlopen must not run under the loader lock
            // dl_iterate_phdr holds
            let mut names = Vec::new();
            super::linux_phdr::each_module(|name| {
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            });

            for name in names {
                let Ok(c_name) = CString::new(name.as_str()) else {
                    continue;
                };
                let probe = unsafe {
                    libc::dlopen(c_name.as_ptr(), libc::RTLD_LAZY | libc::RTLD_NOLOAD)
                };
                if probe.is_null() {
                    continue;
                }
                let matched = probe == handle;
                unsafe { libc::dlclose(probe) };
                if matched {
                    return Ok(PathBuf::from(name));
                }
            }

            Err(AssemblyError::ModuleNotFound(format!("{:p}", handle)))
        }

        #[cfg(not(target_os = "linux"))]
        pub fn resolve_handle(handle: *mut std::ffi::c_void) -> Result<PathBuf, AssemblyError> {
            Err(AssemblyError::ModuleNotFound(format!("{:p}", handle)))
        }
    }

    impl Drop for UnixHandle {
        fn drop(&mut self) {
            // Unload errors are not actionable at this point
            unsafe {
                libc::dlclose(self.handle);
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod linux_phdr {
    //! `dl_iterate_phdr` helpers for locating loaded modules.

    use std::ffi::CStr;
    use std::os::raw::{c_int, c_void};

    struct Search<'a> {
        matches: &'a dyn Fn(&str) -> bool,
        found: Option<(usize, String)>,
    }

    unsafe extern "C" fn callback(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut c_void,
    ) -> c_int {
        let search = &mut *(data as *mut Search<'_>);
        let name_ptr = (*info).dlpi_name;
        if name_ptr.is_null() {
            return 0;
        }
        let name = CStr::from_ptr(name_ptr).to_string_lossy();
        if (search.matches)(&name) {
            search.found = Some(((*info).dlpi_addr as usize, name.into_owned()));
            return 1;
        }
        0
    }

    /// Find a loaded module whose path satisfies `matches`.
    /// Returns `(load_base, path)`.
    pub fn find_module(matches: impl Fn(&str) -> bool) -> Option<(usize, String)> {
        let mut search = Search {
            matches: &matches,
            found: None,
        };
        unsafe {
            libc::dl_iterate_phdr(
                Some(callback),
                &mut search as *mut Search<'_> as *mut c_void,
            );
        }
        search.found
    }

    struct Visit<'a> {
        visit: &'a mut dyn FnMut(&str),
    }

    unsafe extern "C" fn visit_callback(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut c_void,
    ) -> c_int {
        let visit = &mut *(data as *mut Visit<'_>);
        let name_ptr = (*info).dlpi_name;
        if !name_ptr.is_null() {
            (visit.visit)(&CStr::from_ptr(name_ptr).to_string_lossy());
        }
        0
    }

    /// Call `visit` with the path of every resident module.
    pub fn each_module(mut visit: impl FnMut(&str)) {
        let mut state = Visit { visit: &mut visit };
        unsafe {
            libc::dl_iterate_phdr(
                Some(visit_callback),
                &mut state as *mut Visit<'_> as *mut c_void,
            );
        }
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::{AssemblyError, LoadFlags};
    use std::ffi::CString;
    use std::os::windows::ffi::{OsStrExt, OsStringExt};
    use std::path::{Path, PathBuf};

    const LOAD_WITH_ALTERED_SEARCH_PATH: u32 = 0x0000_0008;
    const LOAD_LIBRARY_AS_DATAFILE: u32 = 0x0000_0002;
    const LOAD_LIBRARY_AS_IMAGE_RESOURCE: u32 = 0x0000_0020;
    const LOAD_LIBRARY_SEARCH_SYSTEM32: u32 = 0x0000_0800;
    const GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS: u32 = 0x0000_0004;
    const GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT: u32 = 0x0000_0002;

    pub struct WindowsHandle {
        handle: *mut std::ffi::c_void,
    }

    fn translate_flags(flags: LoadFlags) -> u32 {
        let mut out = 0;
        if flags.contains(LoadFlags::DATAFILE) {
            out |= LOAD_LIBRARY_AS_DATAFILE;
        }
        if flags.contains(LoadFlags::IMAGE_RESOURCE) {
            out |= LOAD_LIBRARY_AS_IMAGE_RESOURCE;
        }
        if flags.contains(LoadFlags::ALTERED_SEARCH_PATH) {
            out |= LOAD_WITH_ALTERED_SEARCH_PATH;
        }
        if flags.contains(LoadFlags::SEARCH_SYSTEM32) {
            out |= LOAD_LIBRARY_SEARCH_SYSTEM32;
        }
        out
    }

    fn wide(path: &Path) -> Vec<u16> {
        path.as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }

    fn module_path(handle: *mut std::ffi::c_void) -> Option<PathBuf> {
        let mut buffer = vec![0u16; 260];
        loop {
            let len = unsafe {
                GetModuleFileNameW(handle, buffer.as_mut_ptr(), buffer.len() as u32)
            };
            if len == 0 {
                return None;
            }
            if (len as usize) < buffer.len() {
                buffer.truncate(len as usize);
                return Some(PathBuf::from(std::ffi::OsString::from_wide(&buffer)));
            }
            buffer.resize(buffer.len() * 2, 0);
        }
    }

    impl WindowsHandle {
        pub fn open(path: &Path, flags: LoadFlags) -> Result<Self, AssemblyError> {
            let wide_path = wide(path);
            let handle = unsafe {
                LoadLibraryExW(wide_path.as_ptr(), std::ptr::null_mut(), translate_flags(flags))
            };
            if handle.is_null() {
                let code = unsafe { GetLastError() };
                return Err(AssemblyError::NotFound {
                    path: format!("{} (error code: {})", path.display(), code),
                });
            }
            Ok(WindowsHandle { handle })
        }

        pub fn symbol(&self, name: &str, lib_path: &Path) -> Result<usize, AssemblyError> {
            let c_name = CString::new(name)
                .map_err(|e| AssemblyError::Platform(format!("Invalid symbol name: {}", e)))?;
            let symbol = unsafe { GetProcAddress(self.handle, c_name.as_ptr()) };
            if symbol.is_null() {
                return Err(AssemblyError::SymbolNotFound {
                    symbol: name.to_string(),
                    library: lib_path.display().to_string(),
                });
            }
            Ok(symbol as usize)
        }

        pub fn raw(&self) -> *mut std::ffi::c_void {
            self.handle
        }

        pub fn base_address(&self, _path: &Path) -> usize {
            // HMODULE is the image base
            self.handle as usize
        }

        pub fn resolve_name(name: &str) -> Result<PathBuf, AssemblyError> {
            let mut file = name.to_string();
            if !file.contains('.') {
                file.push_str(".dll");
            }
            let wide_name = wide(Path::new(&file));
            let handle = unsafe { GetModuleHandleW(wide_name.as_ptr()) };
            if handle.is_null() {
                return Err(AssemblyError::ModuleNotFound(name.to_string()));
            }
            module_path(handle).ok_or_else(|| AssemblyError::ModuleNotFound(name.to_string()))
        }

        pub fn resolve_address(address: usize) -> Result<PathBuf, AssemblyError> {
            let mut handle: *mut std::ffi::c_void = std::ptr::null_mut();
            let ok = unsafe {
                GetModuleHandleExW(
                    GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS
                        | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
                    address as *const u16,
                    &mut handle,
                )
            };
            if ok == 0 || handle.is_null() {
                return Err(AssemblyError::ModuleNotFound(format!("{:#x}", address)));
            }
            module_path(handle).ok_or_else(|| AssemblyError::ModuleNotFound(format!("{:#x}", address)))
        }

        pub fn resolve_handle(handle: *mut std::ffi::c_void) -> Result<PathBuf, AssemblyError> {
            module_path(handle)
                .ok_or_else(|| AssemblyError::ModuleNotFound(format!("{:p}", handle)))
        }
    }

    impl Drop for WindowsHandle {
        fn drop(&mut self) {
            unsafe {
                FreeLibrary(self.handle);
            }
        }
    }

    extern "system" {
        fn LoadLibraryExW(
            filename: *const u16,
            file: *mut std::ffi::c_void,
            flags: u32,
        ) -> *mut std::ffi::c_void;
        fn GetModuleHandleW(filename: *const u16) -> *mut std::ffi::c_void;
        fn GetModuleHandleExW(
            flags: u32,
            name: *const u16,
            module: *mut *mut std::ffi::c_void,
        ) -> i32;
        fn GetModuleFileNameW(
            module: *mut std::ffi::c_void,
            filename: *mut u16,
            size: u32,
        ) -> u32;
        fn GetProcAddress(
            module: *mut std::ffi::c_void,
            procname: *const i8,
        ) -> *mut std::ffi::c_void;
        fn FreeLibrary(module: *mut std::ffi::c_void) -> i32;
        fn GetLastError() -> u32;
    }
}
