//! End-to-end manager scenarios over a real on-disk layout and an
//! in-process language module.
//!
//! Covers the dependency chain, version mismatch, missing language module,
//! obsoletion, start/teardown ordering, and the cross-language call
//! through generated thunks.

use parking_lot::Mutex;
use plugify_core::{ManifestKind, PlugifyError, UniqueId};
use plugify_runtime::{
    Config, Extension, ExtensionState, LanguageModule, LoadResult, Manager, MethodData,
    MethodTable, ModuleLoader, Provider, ServiceLocator,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Fake language module
// ============================================================================

extern "C" fn fake_add(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

type Events = Arc<Mutex<Vec<String>>>;

struct FakeLanguageModule {
    language: String,
    events: Events,
    entrypoints: HashMap<&'static str, usize>,
}

impl FakeLanguageModule {
    fn new(language: &str, events: Events) -> Self {
        let mut entrypoints = HashMap::new();
        entrypoints.insert("ext_add", fake_add as usize);
        FakeLanguageModule {
            language: language.to_string(),
            events,
            entrypoints,
        }
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl LanguageModule for FakeLanguageModule {
    fn initialize(&mut self, _provider: &Provider) -> Result<(), PlugifyError> {
        self.record(format!("init {}", self.language));
        Ok(())
    }

    fn terminate(&mut self) {
        self.record(format!("term {}", self.language));
    }

    fn load_plugin(&mut self, extension: &Extension) -> Result<LoadResult, PlugifyError> {
        if extension.name() == "Faulty" {
            return Err(PlugifyError::new(
                plugify_core::ErrorKind::LoadFailed,
                "entry refused to load",
            ));
        }
        self.record(format!("load {}", extension.name()));

        let mut methods = Vec::new();
        for method in extension.methods() {
            let address = self
                .entrypoints
                .get(method.func_name.as_str())
                .copied()
                .ok_or_else(|| {
                    PlugifyError::new(
                        plugify_core::ErrorKind::LoadFailed,
                        format!("Missing entry symbol: {}", method.func_name),
                    )
                })?;
            methods.push(MethodData {
                name: method.name.clone(),
                address,
            });
        }

        Ok(LoadResult {
            table: MethodTable {
                has_start: true,
                has_update: true,
                has_end: true,
                has_export: !methods.is_empty(),
            },
            methods,
        })
    }

    fn start_plugin(&mut self, extension: &Extension) -> Result<(), PlugifyError> {
        if extension.name() == "BadStart" {
            return Err(PlugifyError::new(
                plugify_core::ErrorKind::RuntimeStartFailed,
                "start hook panicked",
            ));
        }
        self.record(format!("start {}", extension.name()));
        Ok(())
    }

    fn end_plugin(&mut self, extension: &Extension) {
        self.record(format!("end {}", extension.name()));
    }

    fn update_plugin(&mut self, extension: &Extension, _dt: Duration) {
        self.record(format!("update {}", extension.name()));
    }

    fn bind_external_method(
        &mut self,
        method: &plugify_core::Method,
        thunk: usize,
    ) -> Result<(), PlugifyError> {
        assert_ne!(thunk, 0);
        self.record(format!("bind {}", method.name));
        Ok(())
    }
}

struct FakeModuleLoader {
    events: Events,
}

impl ModuleLoader for FakeModuleLoader {
    fn load(&self, extension: &Extension) -> Result<Box<dyn LanguageModule>, PlugifyError> {
        Ok(Box::new(FakeLanguageModule::new(
            extension.language(),
            self.events.clone(),
        )))
    }
}

// ============================================================================
// Fixture helpers
// ============================================================================

fn write_module(base: &Path, name: &str, language: &str) {
    let dir = base.join("modules").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let manifest = format!(
        r#"{{
            "name": "{name}",
            "version": "1.0.0",
            "language": "{language}",
            "runtime": "bin/lib{name}.so",
            "directories": ["api"]
        }}"#
    );
    std::fs::write(dir.join(format!("{name}.pmodule")), manifest).unwrap();
}

fn write_plugin(base: &Path, dir_name: &str, body: &str) {
    let dir = base.join("plugins").join(dir_name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{dir_name}.pplugin")), body).unwrap();
}

fn simple_plugin(name: &str, version: &str, language: &str, deps: &str) -> String {
    format!(
        r#"{{
            // generated test fixture
            "name": "{name}",
            "version": "{version}",
            "language": "{language}",
            "entry": "bin/{name}",
            "dependencies": [{deps}]
        }}"#
    )
}

fn manager_for(base: &Path, events: Events) -> Manager {
    let mut services = ServiceLocator::new();
    let loader: Arc<dyn ModuleLoader> = Arc::new(FakeModuleLoader { events });
    services.register(loader);
    let logger: Arc<dyn plugify_runtime::Logger> = Arc::new(plugify_runtime::NullLogger);
    services.register(logger);

    let config = Config {
        base_dir: base.to_path_buf(),
        ..Config::default()
    };
    Manager::new(&services, config)
}

fn state_of(manager: &Manager, name: &str) -> ExtensionState {
    manager.find_extension(name).unwrap().state()
}

fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_resolvable_chain_reaches_running_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));
    write_plugin(
        dir.path(),
        "B",
        &simple_plugin("B", "1.0.0", "cpp", r#"{ "name": "A", "constraints": ">=1.0.0" }"#),
    );
    write_plugin(
        dir.path(),
        "C",
        &simple_plugin("C", "1.0.0", "cpp", r#"{ "name": "B", "constraints": "=1.0.0" }"#),
    );

    let log = events();
    let mut manager = manager_for(dir.path(), log.clone());
    manager.initialize().unwrap();

    for name in ["A", "B", "C"] {
        assert_eq!(state_of(&manager, name), ExtensionState::Running, "{}", name);
    }

    // Load order respects every dependency edge
    let order: Vec<String> = manager
        .load_order()
        .iter()
        .map(|&id| manager.find_extension_by_id(id).unwrap().name().to_string())
        .collect();
    assert_eq!(order, vec!["lang_cpp", "A", "B", "C"]);

    // Starts happen strictly after every load
    let log = log.lock();
    let last_load = log.iter().rposition(|e| e.starts_with("load")).unwrap();
    let first_start = log.iter().position(|e| e.starts_with("start")).unwrap();
    assert!(last_load < first_start);
}

#[test]
fn test_version_mismatch_cascades_and_names_version() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));
    write_plugin(
        dir.path(),
        "B",
        &simple_plugin("B", "1.0.0", "cpp", r#"{ "name": "A", "constraints": ">=2.0.0" }"#),
    );
    write_plugin(
        dir.path(),
        "C",
        &simple_plugin("C", "1.0.0", "cpp", r#"{ "name": "B" }"#),
    );

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    assert_eq!(state_of(&manager, "A"), ExtensionState::Running);
    assert_eq!(state_of(&manager, "B"), ExtensionState::Unresolved);
    assert_eq!(state_of(&manager, "C"), ExtensionState::Unresolved);

    // The diagnostic names the version actually found
    let b = manager.find_extension("B").unwrap();
    assert!(b.errors().iter().any(|e| e.message.contains("1.0.0")));

    // Failed extensions carry errors
    for name in ["B", "C"] {
        assert!(!manager.find_extension(name).unwrap().errors().is_empty());
    }
}

#[test]
fn test_missing_language_module_is_localized() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "P", &simple_plugin("P", "1.0.0", "lua", ""));
    write_plugin(dir.path(), "Q", &simple_plugin("Q", "1.0.0", "cpp", ""));

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    assert_eq!(state_of(&manager, "P"), ExtensionState::Unresolved);
    assert_eq!(state_of(&manager, "Q"), ExtensionState::Running);

    let p = manager.find_extension("P").unwrap();
    assert!(p.errors().iter().any(|e| e.message.contains("lua")));
}

#[test]
fn test_obsoletion_skips_old_version() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");

    let old = r#"{
        "name": "Z",
        "version": "1.0.0",
        "language": "cpp",
        "obsoletes": ["Z"],
        "entry": "bin/Z"
    }"#;
    write_plugin(dir.path(), "Z_old", old);

    let new = r#"{
        "name": "Z",
        "version": "2.0.0",
        "language": "cpp",
        "obsoletes": ["Z"],
        "entry": "bin/Z"
    }"#;
    write_plugin(dir.path(), "Z_new", new);

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    let by_version: HashMap<String, ExtensionState> = manager
        .extensions_by_type(ManifestKind::Plugin)
        .iter()
        .map(|e| (e.version().unwrap().to_string(), e.state()))
        .collect();

    assert_eq!(by_version["2.0.0"], ExtensionState::Running);
    assert_eq!(by_version["1.0.0"], ExtensionState::Skipped);
}

#[test]
fn test_corrupted_manifest() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "Broken", "{ this is not json");

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    let broken = manager.find_extension("Broken").unwrap();
    assert_eq!(broken.state(), ExtensionState::Corrupted);
    assert!(!broken.errors().is_empty());
}

#[test]
fn test_disabled_short_circuits_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));

    let log = events();
    let mut services = ServiceLocator::new();
    let loader: Arc<dyn ModuleLoader> = Arc::new(FakeModuleLoader { events: log });
    services.register(loader);
    let logger: Arc<dyn plugify_runtime::Logger> = Arc::new(plugify_runtime::NullLogger);
    services.register(logger);

    let config = Config {
        base_dir: dir.path().to_path_buf(),
        disabled: vec!["A".into()],
        ..Config::default()
    };
    let mut manager = Manager::new(&services, config);
    manager.initialize().unwrap();

    assert_eq!(state_of(&manager, "A"), ExtensionState::Disabled);
}

#[test]
fn test_load_failure_cascades_to_dependents() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "Faulty", &simple_plugin("Faulty", "1.0.0", "cpp", ""));
    write_plugin(
        dir.path(),
        "User",
        &simple_plugin("User", "1.0.0", "cpp", r#"{ "name": "Faulty" }"#),
    );

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    assert_eq!(state_of(&manager, "Faulty"), ExtensionState::Failed);
    assert_eq!(state_of(&manager, "User"), ExtensionState::Unresolved);
}

#[test]
fn test_start_failure_leaves_siblings_running() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "BadStart", &simple_plugin("BadStart", "1.0.0", "cpp", ""));
    write_plugin(dir.path(), "Good", &simple_plugin("Good", "1.0.0", "cpp", ""));

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    assert_eq!(state_of(&manager, "BadStart"), ExtensionState::Failed);
    assert_eq!(state_of(&manager, "Good"), ExtensionState::Running);
}

#[test]
fn test_cross_language_call_through_thunks() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");

    let exporter = r#"{
        "name": "A",
        "version": "1.0.0",
        "language": "cpp",
        "entry": "bin/A",
        "methods": [{
            "name": "Add",
            "funcName": "ext_add",
            "paramTypes": [
                { "type": "int32" },
                { "type": "int32" }
            ],
            "retType": { "type": "int32" }
        }]
    }"#;
    write_plugin(dir.path(), "A", exporter);

    let log = events();
    let mut manager = manager_for(dir.path(), log.clone());
    manager.initialize().unwrap();

    assert_eq!(state_of(&manager, "A"), ExtensionState::Running);

    // The export pass offered the binding to the language module
    assert!(log.lock().iter().any(|e| e == "bind Add"));

    // A foreign caller goes through the generated native-ABI thunk
    let exports = manager.exported_methods();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0].method().name, "Add");
    assert_eq!(exports[0].target(), fake_add as usize);

    let add: extern "C" fn(i32, i32) -> i32 =
        unsafe { std::mem::transmute(exports[0].thunk()) };
    assert_eq!(add(2, 3), 5);
}

#[test]
fn test_no_exports_for_non_running_plugins() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");

    // Unresolved: depends on nothing that exists
    let body = r#"{
        "name": "Lonely",
        "version": "1.0.0",
        "language": "cpp",
        "entry": "bin/Lonely",
        "dependencies": [{ "name": "Ghost" }],
        "methods": [{
            "name": "Add",
            "funcName": "ext_add",
            "paramTypes": [{ "type": "int32" }, { "type": "int32" }],
            "retType": { "type": "int32" }
        }]
    }"#;
    write_plugin(dir.path(), "Lonely", body);

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    assert_eq!(state_of(&manager, "Lonely"), ExtensionState::Unresolved);
    assert!(manager.exported_methods().is_empty());
}

#[test]
fn test_update_ticks_running_plugins() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));

    let log = events();
    let mut manager = manager_for(dir.path(), log.clone());
    manager.initialize().unwrap();

    manager.update(Duration::from_millis(16));
    assert!(log.lock().iter().any(|e| e == "update A"));
}

#[test]
fn test_terminate_runs_in_reverse_order() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));
    write_plugin(
        dir.path(),
        "B",
        &simple_plugin("B", "1.0.0", "cpp", r#"{ "name": "A" }"#),
    );

    let log = events();
    let mut manager = manager_for(dir.path(), log.clone());
    manager.initialize().unwrap();
    manager.terminate();

    let log = log.lock();
    let end_b = log.iter().position(|e| e == "end B").unwrap();
    let end_a = log.iter().position(|e| e == "end A").unwrap();
    assert!(end_b < end_a, "dependents end before dependencies");
    assert!(log.iter().any(|e| e == "term cpp"));
}

#[test]
fn test_discovery_is_deterministic_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));
    write_plugin(
        dir.path(),
        "B",
        &simple_plugin("B", "1.0.0", "cpp", r#"{ "name": "A" }"#),
    );

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    let names = |manager: &Manager| -> Vec<String> {
        manager
            .load_order()
            .iter()
            .map(|&id| manager.find_extension_by_id(id).unwrap().name().to_string())
            .collect()
    };
    let first = names(&manager);

    manager.terminate();
    manager.initialize().unwrap();
    let second = names(&manager);

    assert_eq!(first, second);
}

#[test]
fn test_stale_handles_fail_after_reinitialize() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();
    let stale: UniqueId = manager.find_extension("A").unwrap().id();

    manager.terminate();
    manager.initialize().unwrap();

    assert!(manager.find_extension_by_id(stale).is_none());
    let fresh = manager.find_extension("A").unwrap().id();
    assert_ne!(stale, fresh);
    assert!(manager.find_extension_by_id(fresh).is_some());
}

#[test]
fn test_health_report_aggregates() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));
    write_plugin(dir.path(), "P", &simple_plugin("P", "1.0.0", "lua", ""));

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    let health = manager.health();
    assert_eq!(health.total, 3);
    assert_eq!(health.count(ExtensionState::Running), 2);
    assert_eq!(health.count(ExtensionState::Unresolved), 1);
    assert!(health.errors.iter().any(|(name, _)| name == "P"));
}

#[test]
fn test_phase_times_recorded() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "lang_cpp", "cpp");
    write_plugin(dir.path(), "A", &simple_plugin("A", "1.0.0", "cpp", ""));

    let mut manager = manager_for(dir.path(), events());
    manager.initialize().unwrap();

    let a = manager.find_extension("A").unwrap();
    assert!(a.phase_time(ExtensionState::Parsing).is_some());
    assert!(a.phase_time(ExtensionState::Loading).is_some());
    assert!(a.phase_time(ExtensionState::Ending).is_none());
}
