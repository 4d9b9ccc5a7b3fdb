//! The manager: discovery, resolution, loading, method export, the update
//! pump, and teardown.

use crate::config::Config;
use crate::extension::{Extension, ExtensionState};
use crate::filesystem::{EnumerateOptions, FileSystem, StdFileSystem};
use crate::language::{LanguageModule, ModuleLoader, NativeModuleLoader};
use crate::logger::{ConsoleLogger, Logger, Severity};
use crate::progress::{NullProgressReporter, ProgressReporter};
use crate::provider::Provider;
use crate::resolver::{
    DefaultDependencyResolver, DependencyResolution, DependencyResolver, IssueKind,
    ResolveCandidate,
};
use crate::services::ServiceLocator;
use plugify_core::{
    ErrorKind, ManifestError, ManifestKind, ManifestParser, Method, ParseMode, PlugifyError,
    UniqueId,
};
use plugify_jit::{JitCall, JitCallback, WaitType};
use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One exported method made callable across language boundaries.
///
/// Owns both halves of the bridge: the out-thunk into the plugin's native
/// entrypoint and the native-ABI in-thunk handed to every language module.
pub struct ExportedMethod {
    plugin: UniqueId,
    method: Arc<Method>,
    // Boxed so the bridge callback's baked pointer stays stable
    call: Box<JitCall>,
    callback: JitCallback,
}

impl ExportedMethod {
    pub fn plugin(&self) -> UniqueId {
        self.plugin
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The native-ABI entry foreign code calls.
    pub fn thunk(&self) -> usize {
        self.callback.address()
    }

    /// The plugin's own entrypoint behind the bridge.
    pub fn target(&self) -> usize {
        self.call.target()
    }
}

/// Host hook baked into every export thunk: forward the uniform call into
/// the plugin's out-thunk.
unsafe extern "C" fn export_bridge(
    _method: *const Method,
    user_data: *mut c_void,
    args: *const u64,
    _count: usize,
    ret: *mut u64,
) {
    let call = &*(user_data as *const JitCall);
    call.invoke(args, ret);
}

/// Aggregate state counts for reporting.
#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub total: usize,
    pub by_state: HashMap<ExtensionState, usize>,
    pub errors: Vec<(String, String)>,
    pub warnings: Vec<(String, String)>,
}

impl HealthReport {
    pub fn count(&self, state: ExtensionState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

struct Slot {
    generation: u32,
    extension: Extension,
}

/// Owns every extension and drives the lifecycle pipeline. All operations
/// run on the caller's thread; partial success is the norm, not the
/// exception.
pub struct Manager {
    logger: Arc<dyn Logger>,
    filesystem: Arc<dyn FileSystem>,
    parser: Arc<ManifestParser>,
    resolver: Arc<dyn DependencyResolver>,
    module_loader: Arc<dyn ModuleLoader>,
    progress: Arc<dyn ProgressReporter>,
    config: Config,

    epoch: u32,
    slots: Vec<Slot>,
    order: Vec<UniqueId>,
    modules: HashMap<UniqueId, Box<dyn LanguageModule>>,
    exports: Vec<ExportedMethod>,
    initialized: bool,
}

impl Manager {
    /// Build a manager over the given services, falling back to the
    /// defaults for anything not registered.
    pub fn new(services: &ServiceLocator, config: Config) -> Self {
        Manager {
            logger: services
                .get::<Arc<dyn Logger>>()
                .unwrap_or_else(|| Arc::new(ConsoleLogger::default())),
            filesystem: services
                .get::<Arc<dyn FileSystem>>()
                .unwrap_or_else(|| Arc::new(StdFileSystem)),
            parser: services
                .get::<Arc<ManifestParser>>()
                .unwrap_or_else(|| Arc::new(ManifestParser::new(ParseMode::Lenient))),
            resolver: services
                .get::<Arc<dyn DependencyResolver>>()
                .unwrap_or_else(|| Arc::new(DefaultDependencyResolver)),
            module_loader: services
                .get::<Arc<dyn ModuleLoader>>()
                .unwrap_or_else(|| Arc::new(NativeModuleLoader)),
            progress: services
                .get::<Arc<dyn ProgressReporter>>()
                .unwrap_or_else(|| Arc::new(NullProgressReporter)),
            config,
            epoch: 0,
            slots: Vec::new(),
            order: Vec::new(),
            modules: HashMap::new(),
            exports: Vec::new(),
            initialized: false,
        }
    }

    /// Discover, parse, resolve, load, export and start everything under
    /// the configured base directory.
    ///
    /// Individual extension failures are recorded on the extensions and
    /// do not fail the call; consult [`Manager::health`] afterwards.
    pub fn initialize(&mut self) -> Result<(), PlugifyError> {
        if self.initialized {
            return Err(PlugifyError::new(
                ErrorKind::LoadFailed,
                "Already initialized",
            ));
        }

        self.epoch += 1;
        self.slots.clear();
        self.order.clear();
        self.modules.clear();
        self.exports.clear();

        self.discover();
        self.parse_all();
        self.resolve_all();
        self.load_all();
        self.export_all();
        self.start_all();

        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// End and terminate everything in reverse load order, then unload the
    /// language modules. Idempotent.
    pub fn terminate(&mut self) {
        if !self.initialized {
            return;
        }

        let order = self.order.clone();

        for &id in order.iter().rev() {
            let running = self
                .ext(id)
                .is_some_and(|e| e.is_plugin() && e.state() == ExtensionState::Running);
            if !running {
                continue;
            }
            if let Some(ext) = self.ext_mut(id) {
                ext.set_state(ExtensionState::Ending);
            }
            self.with_module_of(id, |module, ext| module.end_plugin(ext));
            if let Some(ext) = self.ext_mut(id) {
                ext.set_state(ExtensionState::Ended);
            }
        }

        // Thunks go away before anything they point into can unload
        self.exports.clear();

        for &id in order.iter().rev() {
            let terminable = self
                .ext(id)
                .is_some_and(|e| e.is_plugin() && !e.state().is_failure());
            if terminable {
                if let Some(ext) = self.ext_mut(id) {
                    ext.set_state(ExtensionState::Terminating);
                    ext.set_state(ExtensionState::Terminated);
                }
            }
        }

        for &id in order.iter().rev() {
            if let Some(mut module) = self.modules.remove(&id) {
                if let Some(ext) = self.ext_mut(id) {
                    ext.set_state(ExtensionState::Terminating);
                }
                module.terminate();
                if let Some(ext) = self.ext_mut(id) {
                    ext.set_state(ExtensionState::Terminated);
                }
            }
        }

        self.modules.clear();
        self.initialized = false;
    }

    /// Tick every language module, then every running plugin that
    /// declared an update hook.
    pub fn update(&mut self, dt: Duration) {
        if !self.initialized {
            return;
        }

        for module in self.modules.values_mut() {
            module.update(dt);
        }

        let order = self.order.clone();
        for id in order {
            let ticking = self.ext(id).is_some_and(|e| {
                e.is_plugin()
                    && e.state() == ExtensionState::Running
                    && e.method_table().has_update
            });
            if ticking {
                self.with_module_of(id, |module, ext| module.update_plugin(ext, dt));
            }
        }
    }

    pub fn find_extension(&self, name: &str) -> Option<&Extension> {
        self.extensions().find(|e| e.name() == name)
    }

    /// Handle lookup; stale handles from a previous session fail.
    pub fn find_extension_by_id(&self, id: UniqueId) -> Option<&Extension> {
        self.ext(id)
    }

    pub fn extensions(&self) -> impl Iterator<Item = &Extension> {
        self.slots.iter().map(|s| &s.extension)
    }

    pub fn extensions_by_type(&self, kind: ManifestKind) -> Vec<&Extension> {
        self.extensions().filter(|e| e.kind() == kind).collect()
    }

    /// Resolver order of the current session.
    pub fn load_order(&self) -> &[UniqueId] {
        &self.order
    }

    /// Methods currently bridged across languages.
    pub fn exported_methods(&self) -> &[ExportedMethod] {
        &self.exports
    }

    pub fn health(&self) -> HealthReport {
        let mut report = HealthReport::default();
        for ext in self.extensions() {
            report.total += 1;
            *report.by_state.entry(ext.state()).or_insert(0) += 1;
            for error in ext.errors() {
                report.errors.push((ext.name().to_string(), error.to_string()));
            }
            for warning in ext.warnings() {
                report
                    .warnings
                    .push((ext.name().to_string(), warning.clone()));
            }
        }
        report
    }

    // Pipeline stages

    fn discover(&mut self) {
        let module_root = self.config.base_dir.join(&self.config.modules_dir);
        let plugin_root = self.config.base_dir.join(&self.config.plugins_dir);
        self.discover_kind(module_root, ManifestKind::Module, "pmodule");
        self.discover_kind(plugin_root, ManifestKind::Plugin, "pplugin");
    }

    fn discover_kind(&mut self, root: PathBuf, kind: ManifestKind, extension: &str) {
        if !self.filesystem.is_directory(&root) {
            self.log(
                &format!("No {} directory at '{}'", extension, root.display()),
                Severity::Verbose,
            );
            return;
        }

        let options = EnumerateOptions {
            recursive: true,
            max_depth: Some(2),
            extension: Some(extension),
            filter: None,
        };
        match self.filesystem.enumerate(&root, &options) {
            Ok(paths) => {
                for path in paths {
                    self.insert_extension(kind, path);
                }
            }
            Err(err) => self.log(
                &format!("Failed to scan '{}': {}", root.display(), err),
                Severity::Warning,
            ),
        }
    }

    fn insert_extension(&mut self, kind: ManifestKind, location: PathBuf) {
        let id = UniqueId::new(self.slots.len() as u32, self.epoch);
        let mut extension = Extension::new(id, kind, location);
        if self
            .config
            .disabled
            .iter()
            .any(|name| name == extension.name())
        {
            extension.set_state(ExtensionState::Disabled);
        }
        self.slots.push(Slot {
            generation: self.epoch,
            extension,
        });
    }

    fn parse_all(&mut self) {
        let total = self.slots.len();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            let ext = &mut slot.extension;
            if ext.state() != ExtensionState::Discovered {
                continue;
            }
            self.progress.report("parse", i + 1, total);
            ext.set_state(ExtensionState::Parsing);

            let text = match self.filesystem.read_text(ext.location()) {
                Ok(text) => text,
                Err(err) => {
                    ext.fail(
                        ExtensionState::Corrupted,
                        PlugifyError::new(ErrorKind::ManifestMalformed, err.to_string()),
                    );
                    continue;
                }
            };

            match self.parser.parse(&text, ext.kind()) {
                Ok(parsed) => {
                    for warning in parsed.warnings {
                        ext.warn(warning);
                    }
                    ext.set_manifest(parsed.manifest);
                    ext.set_state(ExtensionState::Parsed);
                }
                Err(ManifestError::Parse(err)) => ext.fail(
                    ExtensionState::Corrupted,
                    PlugifyError::new(ErrorKind::ManifestMalformed, err.to_string()),
                ),
                Err(ManifestError::Validation(message)) => ext.fail(
                    ExtensionState::Corrupted,
                    PlugifyError::new(ErrorKind::ManifestInvalid, message),
                ),
            }
        }
    }

    fn resolve_all(&mut self) {
        for slot in &mut self.slots {
            if slot.extension.state() == ExtensionState::Parsed {
                slot.extension.set_state(ExtensionState::Resolving);
            }
        }

        let resolution = {
            let candidates: Vec<ResolveCandidate<'_>> = self
                .slots
                .iter()
                .filter(|s| s.extension.state() == ExtensionState::Resolving)
                .map(|s| ResolveCandidate {
                    id: s.extension.id(),
                    kind: s.extension.kind(),
                    manifest: s.extension.manifest().expect("resolving implies parsed"),
                })
                .collect();
            self.resolver.resolve(&candidates)
        };

        let DependencyResolution { order, diagnostics } = resolution;

        let mut cycle = None;
        for issue in diagnostics {
            match issue.id {
                Some(id) => {
                    let Some(ext) = self.ext_mut(id) else { continue };
                    match issue.kind {
                        IssueKind::Obsoleted => {
                            ext.warn(issue.message);
                            ext.set_state(ExtensionState::Skipped);
                        }
                        IssueKind::Unresolvable | IssueKind::Cycle => ext.fail(
                            ExtensionState::Unresolved,
                            PlugifyError::new(ErrorKind::Unresolved, issue.message),
                        ),
                        IssueKind::Warning => ext.warn(issue.message),
                    }
                }
                None => {
                    if issue.kind == IssueKind::Cycle {
                        cycle = Some(issue.message);
                    }
                }
            }
        }

        if let Some(message) = cycle {
            self.log(&message, Severity::Error);
            for slot in &mut self.slots {
                if slot.extension.state() == ExtensionState::Resolving {
                    slot.extension.fail(
                        ExtensionState::Unresolved,
                        PlugifyError::new(ErrorKind::Unresolved, message.clone()),
                    );
                }
            }
            self.order = Vec::new();
            return;
        }

        for &id in &order {
            if let Some(ext) = self.ext_mut(id) {
                ext.set_state(ExtensionState::Resolved);
            }
        }
        self.order = order;

        // Wire each resolved plugin to its language module
        let module_by_language: HashMap<String, UniqueId> = self
            .extensions()
            .filter(|e| !e.is_plugin() && e.state() == ExtensionState::Resolved)
            .map(|e| (e.language().to_string(), e.id()))
            .collect();
        for slot in &mut self.slots {
            let ext = &mut slot.extension;
            if ext.is_plugin() && ext.state() == ExtensionState::Resolved {
                if let Some(&module_id) = module_by_language.get(ext.language()) {
                    ext.set_module(module_id);
                }
            }
        }
    }

    fn load_all(&mut self) {
        let order = self.order.clone();
        let total = order.len();
        for (i, id) in order.into_iter().enumerate() {
            let Some(ext) = self.ext(id) else { continue };
            if ext.state() != ExtensionState::Resolved {
                continue;
            }
            self.progress.report("load", i + 1, total);
            if ext.is_plugin() {
                self.load_plugin(id);
            } else {
                self.load_module(id);
            }
        }
    }

    fn load_module(&mut self, id: UniqueId) {
        if let Some(ext) = self.ext_mut(id) {
            ext.set_state(ExtensionState::Loading);
        }

        let loaded = {
            let Some(ext) = self.ext(id) else { return };
            self.module_loader.load(ext)
        };

        match loaded {
            Ok(mut module) => {
                let provider = Provider::new(self.logger.clone(), self.config.base_dir.clone());
                match module.initialize(&provider) {
                    Ok(()) => {
                        self.modules.insert(id, module);
                        if let Some(ext) = self.ext_mut(id) {
                            ext.set_state(ExtensionState::Loaded);
                        }
                    }
                    Err(err) => {
                        if let Some(ext) = self.ext_mut(id) {
                            ext.fail(ExtensionState::Failed, err);
                        }
                    }
                }
            }
            Err(err) => {
                if let Some(ext) = self.ext_mut(id) {
                    ext.fail(ExtensionState::Failed, err);
                }
            }
        }
    }

    fn load_plugin(&mut self, id: UniqueId) {
        // Everything this plugin needs must already be in Loaded state
        let (module_ok, language, missing) = {
            let Some(ext) = self.ext(id) else { return };
            let module_ok = ext
                .module()
                .is_some_and(|mid| self.modules.contains_key(&mid));
            let mut missing = Vec::new();
            if let Some(manifest) = ext.manifest() {
                for dep in manifest.dependencies() {
                    if dep.is_optional() {
                        continue;
                    }
                    let loaded = self
                        .extensions()
                        .any(|d| d.name() == dep.name && d.state() == ExtensionState::Loaded);
                    if !loaded {
                        missing.push(dep.name.clone());
                    }
                }
            }
            (module_ok, ext.language().to_string(), missing)
        };

        if !module_ok {
            if let Some(ext) = self.ext_mut(id) {
                ext.fail(
                    ExtensionState::Unresolved,
                    PlugifyError::new(
                        ErrorKind::Unresolved,
                        format!("Language module '{}' missing", language),
                    ),
                );
            }
            return;
        }

        if !missing.is_empty() {
            if let Some(ext) = self.ext_mut(id) {
                ext.fail(
                    ExtensionState::Unresolved,
                    PlugifyError::new(
                        ErrorKind::Unresolved,
                        format!(
                            "Not loaded {} dependency plugin(s): {}",
                            missing.len(),
                            missing.join(", ")
                        ),
                    ),
                );
            }
            return;
        }

        if let Some(ext) = self.ext_mut(id) {
            ext.set_state(ExtensionState::Loading);
        }

        let result = {
            let module_id = self.slots[id.index() as usize].extension.module();
            let ext = &self.slots[id.index() as usize].extension;
            let module = module_id.and_then(|mid| self.modules.get_mut(&mid));
            match module {
                Some(module) => module.load_plugin(ext),
                None => return,
            }
        };

        match result {
            Ok(load) => {
                if let Some(ext) = self.ext_mut(id) {
                    ext.set_method_table(load.table);
                    ext.set_method_data(load.methods);
                    ext.set_state(ExtensionState::Loaded);
                }
            }
            Err(err) => {
                if let Some(ext) = self.ext_mut(id) {
                    ext.fail(ExtensionState::Failed, err);
                }
            }
        }
    }

    /// Second pass over loaded plugins: wrap every exported method in a
    /// bridge and hand the native pointer to every language module.
    fn export_all(&mut self) {
        let order = self.order.clone();
        for id in order {
            let exportable = self
                .ext(id)
                .is_some_and(|e| e.is_plugin() && e.state() == ExtensionState::Loaded);
            if !exportable {
                continue;
            }

            if let Some(ext) = self.ext_mut(id) {
                ext.set_state(ExtensionState::Exporting);
            }

            let methods: Vec<(Arc<Method>, Option<usize>)> = {
                let Some(ext) = self.ext(id) else { continue };
                ext.methods()
                    .iter()
                    .map(|m| (m.clone(), ext.method_address(&m.name)))
                    .collect()
            };

            for (method, address) in methods {
                let Some(address) = address else {
                    if let Some(ext) = self.ext_mut(id) {
                        ext.warn(format!("No entrypoint reported for method '{}'", method.name));
                    }
                    continue;
                };

                let call = match JitCall::for_method(&method, address, WaitType::None) {
                    Ok(call) => Box::new(call),
                    Err(err) => {
                        if let Some(ext) = self.ext_mut(id) {
                            ext.warn(format!("Method '{}' not exported: {}", method.name, err));
                        }
                        continue;
                    }
                };

                let callback = match JitCallback::for_method(
                    Arc::as_ptr(&method),
                    export_bridge,
                    &*call as *const JitCall as *mut c_void,
                ) {
                    Ok(callback) => callback,
                    Err(err) => {
                        if let Some(ext) = self.ext_mut(id) {
                            ext.warn(format!("Method '{}' not exported: {}", method.name, err));
                        }
                        continue;
                    }
                };

                let thunk = callback.address();
                for module in self.modules.values_mut() {
                    if let Err(err) = module.bind_external_method(&method, thunk) {
                        self.logger.log(
                            &format!("Failed to bind '{}': {}", method.name, err),
                            Severity::Warning,
                        );
                    }
                }

                self.exports.push(ExportedMethod {
                    plugin: id,
                    method,
                    call,
                    callback,
                });
            }

            if let Some(ext) = self.ext_mut(id) {
                ext.set_state(ExtensionState::Exported);
            }
        }
    }

    fn start_all(&mut self) {
        let order = self.order.clone();
        let mut failed: HashSet<String> = HashSet::new();

        for id in order {
            let startable = self
                .ext(id)
                .is_some_and(|e| e.is_plugin() && e.state() == ExtensionState::Exported);
            if !startable {
                continue;
            }

            // A dependency that failed its own start blocks this plugin
            let blocked: Vec<String> = {
                let Some(ext) = self.ext(id) else { continue };
                ext.manifest()
                    .map(|m| {
                        m.dependencies()
                            .iter()
                            .filter(|d| !d.is_optional() && failed.contains(&d.name))
                            .map(|d| d.name.clone())
                            .collect()
                    })
                    .unwrap_or_default()
            };
            if !blocked.is_empty() {
                if let Some(ext) = self.ext_mut(id) {
                    ext.fail(
                        ExtensionState::Unresolved,
                        PlugifyError::new(
                            ErrorKind::Unresolved,
                            format!("Dependency failed to start: {}", blocked.join(", ")),
                        ),
                    );
                }
                continue;
            }

            if let Some(ext) = self.ext_mut(id) {
                ext.set_state(ExtensionState::Starting);
            }

            let result = {
                let ext = &self.slots[id.index() as usize].extension;
                match ext.module().and_then(|mid| self.modules.get_mut(&mid)) {
                    Some(module) => module.start_plugin(ext),
                    None => Ok(()),
                }
            };

            match result {
                Ok(()) => {
                    if let Some(ext) = self.ext_mut(id) {
                        ext.set_state(ExtensionState::Running);
                    }
                }
                Err(err) => {
                    if let Some(ext) = self.ext_mut(id) {
                        failed.insert(ext.name().to_string());
                        ext.fail(ExtensionState::Failed, err);
                    }
                }
            }
        }
    }

    // Helpers

    fn ext(&self, id: UniqueId) -> Option<&Extension> {
        let slot = self.slots.get(id.index() as usize)?;
        (slot.generation == id.generation()).then_some(&slot.extension)
    }

    fn ext_mut(&mut self, id: UniqueId) -> Option<&mut Extension> {
        let slot = self.slots.get_mut(id.index() as usize)?;
        (slot.generation == id.generation()).then_some(&mut slot.extension)
    }

    /// Run `f` with the plugin's language module and the plugin itself,
    /// skipping silently if either side is gone.
    fn with_module_of(
        &mut self,
        id: UniqueId,
        f: impl FnOnce(&mut Box<dyn LanguageModule>, &Extension),
    ) {
        let Some(slot) = self.slots.get(id.index() as usize) else {
            return;
        };
        if slot.generation != id.generation() {
            return;
        }
        let ext = &slot.extension;
        if let Some(module) = ext.module().and_then(|mid| self.modules.get_mut(&mid)) {
            f(module, ext);
        }
    }

    fn log(&self, message: &str, severity: Severity) {
        self.logger.log(message, severity);
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.terminate();
    }
}
