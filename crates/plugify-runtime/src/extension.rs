//! The runtime object owning one plugin or language module through its
//! lifecycle.

use crate::language::{MethodData, MethodTable};
use plugify_core::{Manifest, ManifestKind, Method, PlugifyError, UniqueId, Version};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle states. The happy path is linear; the bottom row absorbs
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionState {
    Discovered,
    Parsing,
    Parsed,
    Resolving,
    Resolved,
    Loading,
    Loaded,
    Exporting,
    Exported,
    Starting,
    Running,
    Ending,
    Ended,
    Terminating,
    Terminated,

    // Absorbing failure states
    Failed,
    Corrupted,
    Unresolved,
    Skipped,
    Disabled,
}

impl ExtensionState {
    /// Terminal states that stop the pipeline but keep the record around
    /// for introspection.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ExtensionState::Failed
                | ExtensionState::Corrupted
                | ExtensionState::Unresolved
                | ExtensionState::Skipped
                | ExtensionState::Disabled
        )
    }
}

/// One discovered extension and everything the manager knows about it.
pub struct Extension {
    id: UniqueId,
    kind: ManifestKind,
    location: PathBuf,
    manifest: Option<Manifest>,
    state: ExtensionState,
    entered_at: Instant,
    phase_times: HashMap<ExtensionState, Duration>,
    errors: Vec<PlugifyError>,
    warnings: Vec<String>,

    /// Exported methods, pinned so thunk generation can bake stable
    /// pointers
    methods: Vec<Arc<Method>>,

    /// Hook presence bits reported by the language module at load
    method_table: MethodTable,

    /// Per-method native entrypoints reported by the language module
    method_data: Vec<MethodData>,

    /// The language module extension serving this plugin
    module: Option<UniqueId>,
}

impl Extension {
    pub fn new(id: UniqueId, kind: ManifestKind, location: PathBuf) -> Self {
        Extension {
            id,
            kind,
            location,
            manifest: None,
            state: ExtensionState::Discovered,
            entered_at: Instant::now(),
            phase_times: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            methods: Vec::new(),
            method_table: MethodTable::default(),
            method_data: Vec::new(),
            module: None,
        }
    }

    pub fn id(&self) -> UniqueId {
        self.id
    }

    pub fn kind(&self) -> ManifestKind {
        self.kind
    }

    pub fn is_plugin(&self) -> bool {
        self.kind == ManifestKind::Plugin
    }

    /// Manifest path on disk.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Name from the manifest, or the file stem before parsing succeeds.
    pub fn name(&self) -> &str {
        match &self.manifest {
            Some(manifest) => &manifest.name,
            None => self
                .location
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default(),
        }
    }

    pub fn version(&self) -> Option<&Version> {
        self.manifest.as_ref().map(|m| &m.version)
    }

    pub fn language(&self) -> &str {
        self.manifest.as_ref().map_or("", |m| m.language.as_str())
    }

    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    pub fn set_manifest(&mut self, manifest: Manifest) {
        self.methods = manifest.methods().iter().cloned().map(Arc::new).collect();
        self.manifest = Some(manifest);
    }

    pub fn state(&self) -> ExtensionState {
        self.state
    }

    /// Transition to `state`, attributing the elapsed time to the state
    /// being left.
    pub fn set_state(&mut self, state: ExtensionState) {
        let now = Instant::now();
        self.phase_times
            .entry(self.state)
            .or_insert_with(|| now - self.entered_at);
        self.state = state;
        self.entered_at = now;
    }

    /// How long the extension spent in `state`, if it passed through it.
    pub fn phase_time(&self, state: ExtensionState) -> Option<Duration> {
        self.phase_times.get(&state).copied()
    }

    pub fn errors(&self) -> &[PlugifyError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Record an error and move to the matching failure state.
    pub fn fail(&mut self, state: ExtensionState, error: PlugifyError) {
        debug_assert!(state.is_failure());
        self.errors.push(error);
        self.set_state(state);
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// Exported methods (plugins only; empty before parse).
    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    pub fn method_table(&self) -> MethodTable {
        self.method_table
    }

    pub fn set_method_table(&mut self, table: MethodTable) {
        self.method_table = table;
    }

    pub fn method_data(&self) -> &[MethodData] {
        &self.method_data
    }

    pub fn set_method_data(&mut self, data: Vec<MethodData>) {
        self.method_data = data;
    }

    /// Native entrypoint for an exported method, by name.
    pub fn method_address(&self, name: &str) -> Option<usize> {
        self.method_data
            .iter()
            .find(|m| m.name == name)
            .map(|m| m.address)
    }

    pub fn module(&self) -> Option<UniqueId> {
        self.module
    }

    pub fn set_module(&mut self, module: UniqueId) {
        self.module = Some(module);
    }
}
