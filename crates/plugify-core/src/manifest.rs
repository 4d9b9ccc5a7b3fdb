//! Typed representation of extension manifests.
//!
//! A manifest is either a *plugin* (has `entry`, optionally exports
//! `methods`) or a *module* (has `runtime` and `directories`); mixing the
//! two is a validation error. Field names mirror the on-disk JSON
//! (`funcName`, `paramTypes`, ...). Unknown keys such as `$schema` and
//! `metadata` are accepted and ignored.

use crate::constraint::Constraint;
use crate::value_type::ValueType;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while reading or validating a manifest
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Failed to parse JSON
    #[error("Failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    /// Parsed but semantically invalid
    #[error("Invalid manifest: {0}")]
    Validation(String),
}

/// Which kind of extension a manifest describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManifestKind {
    /// User code exporting methods (`.pplugin`)
    Plugin,

    /// Language runtime embedder (`.pmodule`)
    Module,
}

/// Declared dependency on another extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl Dependency {
    /// Missing optional dependencies warn instead of failing resolution
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }

    /// Whether a candidate version satisfies the declared constraints
    pub fn accepts(&self, version: &Version) -> bool {
        match &self.constraints {
            Some(c) => c.satisfied_by(version),
            None => true,
        }
    }
}

/// Declared conflict with another extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Constraint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Conflict {
    /// Whether a present candidate version triggers this conflict
    pub fn applies_to(&self, version: &Version) -> bool {
        match &self.constraints {
            Some(c) => c.satisfied_by(version),
            None => true,
        }
    }
}

/// One named value of an enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub value: i64,
}

/// Enumeration attached to an enum-typed property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumObject {
    pub name: String,

    #[serde(default)]
    pub values: Vec<EnumValue>,
}

/// Parameter or return descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "type")]
    pub ty: ValueType,

    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub is_ref: Option<bool>,

    /// Nested signature; only meaningful for `function`-typed properties
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype: Option<Box<Method>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumerate: Option<EnumObject>,
}

impl Property {
    /// Plain value property of the given type
    pub fn plain(ty: ValueType) -> Self {
        Property {
            ty,
            is_ref: None,
            prototype: None,
            enumerate: None,
        }
    }

    /// Reference semantics: pass by pointer-to
    pub fn is_ref(&self) -> bool {
        self.is_ref.unwrap_or(false)
    }
}

/// Exported method descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,

    #[serde(rename = "funcName", default)]
    pub func_name: String,

    #[serde(rename = "callConv", default, skip_serializing_if = "Option::is_none")]
    pub call_conv: Option<String>,

    #[serde(rename = "paramTypes", default)]
    pub param_types: Vec<Property>,

    #[serde(rename = "retType")]
    pub ret_type: Property,

    /// Index of the first variadic argument; absent means fixed arity
    #[serde(rename = "varIndex", default, skip_serializing_if = "Option::is_none")]
    pub var_index: Option<u8>,
}

impl Method {
    /// Search this method's nested prototypes for one with the given name
    pub fn find_prototype(&self, name: &str) -> Option<&Method> {
        for param in &self.param_types {
            if let Some(proto) = &param.prototype {
                if proto.name == name {
                    return Some(proto);
                }
                if let Some(found) = proto.find_prototype(name) {
                    return Some(found);
                }
            }
        }
        if let Some(proto) = &self.ret_type.prototype {
            if proto.name == name {
                return Some(proto);
            }
            return proto.find_prototype(name);
        }
        None
    }
}

/// Parsed extension manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub version: Version,
    pub language: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platforms: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<Dependency>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<Conflict>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obsoletes: Option<Vec<String>>,

    // Plugin-only fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<Method>>,

    // Module-only fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<PathBuf>>,
}

impl Manifest {
    /// Kind inferred from which fields are present, if unambiguous
    pub fn inferred_kind(&self) -> Option<ManifestKind> {
        let plugin = self.entry.is_some() || self.methods.is_some();
        let module = self.runtime.is_some() || self.directories.is_some();
        match (plugin, module) {
            (true, false) => Some(ManifestKind::Plugin),
            (false, true) => Some(ManifestKind::Module),
            _ => None,
        }
    }

    /// Dependencies slice, empty when the field is absent
    pub fn dependencies(&self) -> &[Dependency] {
        self.dependencies.as_deref().unwrap_or(&[])
    }

    /// Conflicts slice, empty when the field is absent
    pub fn conflicts(&self) -> &[Conflict] {
        self.conflicts.as_deref().unwrap_or(&[])
    }

    /// Obsoleted names, empty when the field is absent
    pub fn obsoletes(&self) -> &[String] {
        self.obsoletes.as_deref().unwrap_or(&[])
    }

    /// Exported methods, empty when the field is absent
    pub fn methods(&self) -> &[Method] {
        self.methods.as_deref().unwrap_or(&[])
    }

    /// Validate the manifest against the declared kind.
    ///
    /// Returns the first violation found; ordering follows field order so
    /// diagnostics are stable.
    pub fn validate(&self, kind: ManifestKind) -> Result<(), ManifestError> {
        if self.name.is_empty() {
            return Err(invalid("Manifest name is required"));
        }
        if !is_valid_extended_name(&self.name) {
            return Err(invalid(format!("Invalid manifest name: {}", self.name)));
        }

        if self.language.is_empty() {
            return Err(invalid("Language cannot be empty"));
        }
        if !is_valid_name(&self.language) {
            return Err(invalid(format!("Invalid language name: {}", self.language)));
        }

        if matches!(&self.author, Some(a) if a.is_empty()) {
            return Err(invalid("Author cannot be empty if specified"));
        }
        if let Some(website) = &self.website {
            if !is_valid_url(website) {
                return Err(invalid(format!("Invalid website URL: {}", website)));
            }
        }
        if matches!(&self.license, Some(l) if l.is_empty()) {
            return Err(invalid("License cannot be empty if specified"));
        }

        if let Some(platforms) = &self.platforms {
            for platform in platforms {
                if !is_valid_platform(platform) {
                    return Err(invalid(format!("Invalid platform: {}", platform)));
                }
            }
        }

        for dep in self.dependencies() {
            if dep.name.is_empty() {
                return Err(invalid("Dependency name cannot be empty"));
            }
            if !is_valid_name(&dep.name) {
                return Err(invalid(format!("Invalid dependency name: {}", dep.name)));
            }
        }

        for conflict in self.conflicts() {
            if conflict.name.is_empty() {
                return Err(invalid("Conflict name cannot be empty"));
            }
            if !is_valid_name(&conflict.name) {
                return Err(invalid(format!("Invalid conflict name: {}", conflict.name)));
            }
        }

        for obsolete in self.obsoletes() {
            if obsolete.is_empty() {
                return Err(invalid("Obsolete name cannot be empty"));
            }
            if !is_valid_name(obsolete) {
                return Err(invalid(format!("Invalid obsolete name: {}", obsolete)));
            }
        }

        let has_plugin_fields = self.entry.is_some() || self.methods.is_some();
        let has_module_fields = self.runtime.is_some() || self.directories.is_some();
        if has_plugin_fields && has_module_fields {
            return Err(invalid("Manifest cannot have both plugin and module fields"));
        }

        match kind {
            ManifestKind::Plugin => {
                if has_module_fields {
                    return Err(invalid("Plugin manifest carries module fields"));
                }
                self.validate_plugin()
            }
            ManifestKind::Module => {
                if has_plugin_fields {
                    return Err(invalid("Module manifest carries plugin fields"));
                }
                self.validate_module()
            }
        }
    }

    fn validate_plugin(&self) -> Result<(), ManifestError> {
        match &self.entry {
            Some(entry) if !entry.is_empty() => {}
            _ => return Err(invalid("Plugin entry point cannot be empty")),
        }

        if let Some(methods) = &self.methods {
            let mut method_names = HashSet::with_capacity(methods.len());
            let mut function_names = HashSet::with_capacity(methods.len());

            for method in methods {
                if !method_names.insert(method.name.as_str()) {
                    return Err(invalid(format!("Duplicate method name: {}", method.name)));
                }
                if !function_names.insert(method.func_name.as_str()) {
                    return Err(invalid(format!(
                        "Duplicate function name: {}",
                        method.func_name
                    )));
                }
                validate_method(method, "Method", true)?;
            }
        }

        Ok(())
    }

    fn validate_module(&self) -> Result<(), ManifestError> {
        match &self.runtime {
            Some(runtime) if !runtime.as_os_str().is_empty() => {}
            _ => return Err(invalid("Module runtime path cannot be empty")),
        }

        match &self.directories {
            Some(directories) if !directories.is_empty() => {
                for dir in directories {
                    if dir.as_os_str().is_empty() {
                        return Err(invalid("Directory path cannot be empty"));
                    }
                }
            }
            _ => return Err(invalid("Module directories cannot be empty")),
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ManifestError {
    ManifestError::Validation(msg.into())
}

/// Alphanumeric plus underscore
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Alphanumeric plus underscore, dot, dash
fn is_valid_extended_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}

fn is_valid_url(url: &str) -> bool {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let host = rest.split('/').next().unwrap_or("");
    host.contains('.')
        && !host.starts_with('.')
        && !host.ends_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// `<os>_<arch>` with a known architecture suffix
fn is_valid_platform(platform: &str) -> bool {
    const ARCHES: &[&str] = &["x64", "arm64", "x86", "arm32", "riscv32", "riscv64"];
    match platform.rsplit_once('_') {
        Some((os, arch)) => {
            !os.is_empty()
                && os
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                && ARCHES.contains(&arch)
        }
        None => false,
    }
}

/// Which explicit calling-convention names the host accepts.
fn is_valid_call_conv(conv: &str) -> bool {
    #[cfg(all(windows, target_arch = "x86_64"))]
    {
        conv == "vectorcall"
    }
    #[cfg(all(unix, target_arch = "x86"))]
    {
        matches!(conv, "cdecl" | "stdcall" | "fastcall" | "thiscall" | "vectorcall")
    }
    #[cfg(not(any(
        all(windows, target_arch = "x86_64"),
        all(unix, target_arch = "x86")
    )))]
    {
        let _ = conv;
        true
    }
}

fn validate_method(method: &Method, prefix: &str, top_level: bool) -> Result<(), ManifestError> {
    if method.name.is_empty() {
        return Err(invalid(format!("{}: name cannot be empty", prefix)));
    }
    if !is_valid_name(&method.name) {
        return Err(invalid(format!(
            "{}: invalid name '{}'",
            prefix, method.name
        )));
    }

    // Prototypes have no exported symbol, so funcName only matters at the top
    if top_level {
        if method.func_name.is_empty() {
            return Err(invalid(format!(
                "{} '{}': funcName cannot be empty",
                prefix, method.name
            )));
        }
        if !is_valid_extended_name(&method.func_name) {
            return Err(invalid(format!(
                "{} '{}': invalid funcName '{}'",
                prefix, method.name, method.func_name
            )));
        }
    }

    if let Some(conv) = &method.call_conv {
        if !conv.is_empty() && !is_valid_call_conv(conv) {
            return Err(invalid(format!(
                "{} '{}': invalid calling convention '{}'",
                prefix, method.name, conv
            )));
        }
    }

    if let Some(var_index) = method.var_index {
        if usize::from(var_index) >= method.param_types.len() {
            return Err(invalid(format!(
                "{} '{}': varIndex out of range",
                prefix, method.name
            )));
        }
    }

    for (i, param) in method.param_types.iter().enumerate() {
        let context = format!("{} '{}' param[{}]", prefix, method.name, i);
        validate_property(param, &context, true)?;
    }

    let ret_context = format!("{} '{}' return type", prefix, method.name);
    if method.ret_type.is_ref() {
        return Err(invalid(format!("{}: return cannot be reference", ret_context)));
    }
    validate_property(&method.ret_type, &ret_context, false)?;

    Ok(())
}

fn validate_property(prop: &Property, context: &str, param: bool) -> Result<(), ManifestError> {
    if param && prop.ty == ValueType::Void {
        return Err(invalid(format!("{}: parameter cannot be void type", context)));
    }

    if prop.ty == ValueType::Function {
        if prop.is_ref() {
            return Err(invalid(format!(
                "{}: function type cannot be reference",
                context
            )));
        }
        if prop.prototype.is_none() {
            return Err(invalid(format!(
                "{}: function type requires prototype",
                context
            )));
        }
    }

    if let Some(enumerate) = &prop.enumerate {
        validate_enum(enumerate, context)?;
    }

    if let Some(prototype) = &prop.prototype {
        validate_method(prototype, &format!("{}.prototype", context), false)?;
    }

    Ok(())
}

fn validate_enum(enumerate: &EnumObject, context: &str) -> Result<(), ManifestError> {
    if enumerate.name.is_empty() {
        return Err(invalid(format!("{}: enum name cannot be empty", context)));
    }
    if !is_valid_name(&enumerate.name) {
        return Err(invalid(format!(
            "{}: invalid enum name '{}'",
            context, enumerate.name
        )));
    }

    let mut names = HashSet::with_capacity(enumerate.values.len());
    for value in &enumerate.values {
        if value.name.is_empty() {
            return Err(invalid(format!(
                "{}: enum value name cannot be empty in '{}'",
                context, enumerate.name
            )));
        }
        if !is_valid_name(&value.name) {
            return Err(invalid(format!(
                "{}: invalid enum value name '{}' in '{}'",
                context, value.name, enumerate.name
            )));
        }
        if !names.insert(value.name.as_str()) {
            return Err(invalid(format!(
                "{}: duplicate enum value name '{}' in '{}'",
                context, value.name, enumerate.name
            )));
        }
    }

    Ok(())
}
