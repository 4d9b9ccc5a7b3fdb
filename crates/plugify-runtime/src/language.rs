//! Language-module adapter: the trait the core drives a language runtime
//! through, plus the native (dynamic-library) implementation of it.

use crate::extension::Extension;
use crate::provider::Provider;
use plugify_asm::{Assembly, AssemblyError, LoadFlags};
use plugify_core::{ErrorKind, Method, PlugifyError};
use std::ffi::{c_char, c_void, CString};
use std::path::Path;
use std::time::Duration;

/// Which lifecycle hooks a loaded plugin provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodTable {
    pub has_start: bool,
    pub has_update: bool,
    pub has_end: bool,
    pub has_export: bool,
}

/// Native entrypoint of one exported method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodData {
    pub name: String,
    pub address: usize,
}

/// What a language module reports after loading a plugin.
#[derive(Debug, Clone, Default)]
pub struct LoadResult {
    pub table: MethodTable,
    pub methods: Vec<MethodData>,
}

/// The surface through which the manager drives a language runtime.
///
/// Implementations embed an interpreter or VM; a native-plugin module may
/// embed nothing at all. Called only from the manager's thread.
pub trait LanguageModule: Send {
    fn initialize(&mut self, provider: &Provider) -> Result<(), PlugifyError>;

    fn terminate(&mut self);

    /// Load a plugin and report its hook table plus per-method native
    /// entrypoints.
    fn load_plugin(&mut self, extension: &Extension) -> Result<LoadResult, PlugifyError>;

    fn start_plugin(&mut self, extension: &Extension) -> Result<(), PlugifyError>;

    fn end_plugin(&mut self, extension: &Extension);

    fn update_plugin(&mut self, _extension: &Extension, _dt: Duration) {}

    /// Per-tick pump for the runtime itself.
    fn update(&mut self, _dt: Duration) {}

    /// Make a foreign method callable from this runtime. `thunk` is the
    /// native-ABI entry produced by the export pass.
    fn bind_external_method(&mut self, method: &Method, thunk: usize) -> Result<(), PlugifyError>;
}

// Native ABI

/// Exported symbol a native language module must provide.
pub const GET_LANGUAGE_MODULE_FN: &str = "get_language_module";

/// Version tag expected at offset zero of the vtable.
pub const LANGUAGE_MODULE_ABI_VERSION: u32 = 1;

/// Hook bits across the C boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawMethodTable {
    pub has_start: u8,
    pub has_update: u8,
    pub has_end: u8,
    pub has_export: u8,
}

/// Fixed function-pointer table returned by [`GET_LANGUAGE_MODULE_FN`].
///
/// The version tag sits at a stable offset so the host can reject
/// incompatible modules without calling anything. Nonzero returns mean
/// failure.
#[repr(C)]
pub struct LanguageModuleVtbl {
    pub abi_version: u32,
    pub initialize: unsafe extern "C" fn(base_dir: *const c_char) -> i32,
    pub terminate: unsafe extern "C" fn(),
    pub load_plugin:
        unsafe extern "C" fn(entry: *const c_char, table: *mut RawMethodTable) -> i32,
    pub method_address: unsafe extern "C" fn(func_name: *const c_char) -> *const c_void,
    pub start_plugin: unsafe extern "C" fn(name: *const c_char) -> i32,
    pub end_plugin: unsafe extern "C" fn(name: *const c_char),
    pub update_plugin: unsafe extern "C" fn(name: *const c_char, dt: f64),
    pub update: unsafe extern "C" fn(dt: f64),
    pub bind_external_method:
        unsafe extern "C" fn(name: *const c_char, thunk: *const c_void) -> i32,
}

type GetLanguageModuleFn = unsafe extern "C" fn() -> *const LanguageModuleVtbl;

/// A language module backed by a dynamic library.
pub struct NativeLanguageModule {
    // Field order keeps the vtable dropped before its backing library
    vtbl: *const LanguageModuleVtbl,
    _assembly: Assembly,
}

// The assembly stays loaded as long as the vtable pointer is held.
unsafe impl Send for NativeLanguageModule {}

impl NativeLanguageModule {
    /// Load a module runtime and fetch its adapter vtable.
    pub fn load(runtime_path: &Path) -> Result<Self, PlugifyError> {
        let assembly = Assembly::load(runtime_path, LoadFlags::NOW, false)
            .map_err(assembly_error)?;

        let get_module: GetLanguageModuleFn = unsafe {
            assembly
                .symbol(GET_LANGUAGE_MODULE_FN)
                .map_err(assembly_error)?
        };

        let vtbl = unsafe { get_module() };
        if vtbl.is_null() {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                format!("{} returned null", GET_LANGUAGE_MODULE_FN),
            ));
        }

        let version = unsafe { (*vtbl).abi_version };
        if version != LANGUAGE_MODULE_ABI_VERSION {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                format!(
                    "Language module ABI mismatch: got {}, expected {}",
                    version, LANGUAGE_MODULE_ABI_VERSION
                ),
            ));
        }

        Ok(NativeLanguageModule {
            vtbl,
            _assembly: assembly,
        })
    }

    fn vtbl(&self) -> &LanguageModuleVtbl {
        unsafe { &*self.vtbl }
    }
}

fn assembly_error(err: AssemblyError) -> PlugifyError {
    PlugifyError::new(ErrorKind::LoadFailed, err.to_string())
}

fn c_string(value: &str, what: &str) -> Result<CString, PlugifyError> {
    CString::new(value)
        .map_err(|_| PlugifyError::new(ErrorKind::LoadFailed, format!("Embedded NUL in {}", what)))
}

impl LanguageModule for NativeLanguageModule {
    fn initialize(&mut self, provider: &Provider) -> Result<(), PlugifyError> {
        let base_dir = c_string(&provider.base_dir().display().to_string(), "base dir")?;
        let rc = unsafe { (self.vtbl().initialize)(base_dir.as_ptr()) };
        if rc != 0 {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                format!("Module initialize returned {}", rc),
            ));
        }
        Ok(())
    }

    fn terminate(&mut self) {
        unsafe { (self.vtbl().terminate)() }
    }

    fn load_plugin(&mut self, extension: &Extension) -> Result<LoadResult, PlugifyError> {
        let entry = extension
            .manifest()
            .and_then(|m| m.entry.as_deref())
            .unwrap_or_default();
        let entry = c_string(entry, "entry")?;

        let mut raw = RawMethodTable::default();
        let rc = unsafe { (self.vtbl().load_plugin)(entry.as_ptr(), &mut raw) };
        if rc != 0 {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                format!("Module failed to load '{}': {}", extension.name(), rc),
            ));
        }

        let mut methods = Vec::with_capacity(extension.methods().len());
        for method in extension.methods() {
            let func_name = c_string(&method.func_name, "funcName")?;
            let address = unsafe { (self.vtbl().method_address)(func_name.as_ptr()) };
            if address.is_null() {
                return Err(PlugifyError::new(
                    ErrorKind::LoadFailed,
                    format!("Missing entry symbol: {}", method.func_name),
                ));
            }
            methods.push(MethodData {
                name: method.name.clone(),
                address: address as usize,
            });
        }

        Ok(LoadResult {
            table: MethodTable {
                has_start: raw.has_start != 0,
                has_update: raw.has_update != 0,
                has_end: raw.has_end != 0,
                has_export: raw.has_export != 0,
            },
            methods,
        })
    }

    fn start_plugin(&mut self, extension: &Extension) -> Result<(), PlugifyError> {
        let name = c_string(extension.name(), "plugin name")?;
        let rc = unsafe { (self.vtbl().start_plugin)(name.as_ptr()) };
        if rc != 0 {
            return Err(PlugifyError::new(
                ErrorKind::RuntimeStartFailed,
                format!("Start hook of '{}' returned {}", extension.name(), rc),
            ));
        }
        Ok(())
    }

    fn end_plugin(&mut self, extension: &Extension) {
        if let Ok(name) = c_string(extension.name(), "plugin name") {
            unsafe { (self.vtbl().end_plugin)(name.as_ptr()) }
        }
    }

    fn update_plugin(&mut self, extension: &Extension, dt: Duration) {
        if let Ok(name) = c_string(extension.name(), "plugin name") {
            unsafe { (self.vtbl().update_plugin)(name.as_ptr(), dt.as_secs_f64()) }
        }
    }

    fn update(&mut self, dt: Duration) {
        unsafe { (self.vtbl().update)(dt.as_secs_f64()) }
    }

    fn bind_external_method(&mut self, method: &Method, thunk: usize) -> Result<(), PlugifyError> {
        let name = c_string(&method.name, "method name")?;
        let rc = unsafe {
            (self.vtbl().bind_external_method)(name.as_ptr(), thunk as *const c_void)
        };
        if rc != 0 {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                format!("Binding '{}' rejected: {}", method.name, rc),
            ));
        }
        Ok(())
    }
}

/// Produces a [`LanguageModule`] for a resolvable module extension.
///
/// The default implementation loads the manifest's `runtime` library and
/// asks it for its vtable; tests substitute in-process modules.
pub trait ModuleLoader: Send + Sync {
    fn load(&self, extension: &Extension) -> Result<Box<dyn LanguageModule>, PlugifyError>;
}

/// [`ModuleLoader`] over [`NativeLanguageModule`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleLoader;

impl ModuleLoader for NativeModuleLoader {
    fn load(&self, extension: &Extension) -> Result<Box<dyn LanguageModule>, PlugifyError> {
        let manifest = extension.manifest().ok_or_else(|| {
            PlugifyError::new(ErrorKind::LoadFailed, "Module has no parsed manifest")
        })?;
        let runtime = manifest.runtime.as_ref().ok_or_else(|| {
            PlugifyError::new(ErrorKind::LoadFailed, "Module manifest has no runtime")
        })?;

        // Runtime paths are relative to the manifest's directory
        let base = extension.location().parent().unwrap_or(Path::new("."));
        let module = NativeLanguageModule::load(&base.join(runtime))?;
        Ok(Box::new(module))
    }
}
