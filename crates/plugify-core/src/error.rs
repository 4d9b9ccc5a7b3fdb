//! Shared error taxonomy.
//!
//! Subsystems keep their own error enums; anything that crosses a subsystem
//! boundary (manager, extension records, reports) is converted into a
//! [`PlugifyError`] carrying one of the closed [`ErrorKind`]s.

use std::fmt;
use thiserror::Error;

/// Closed classification of everything that can go wrong in the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Manifest could not be read as JSON at all
    ManifestMalformed,

    /// Manifest parsed but failed validation
    ManifestInvalid,

    /// Dependency, conflict, or language-module resolution failure
    Unresolved,

    /// OS-level load failure or missing entry symbol
    LoadFailed,

    /// A language module's start hook reported an error
    RuntimeStartFailed,

    /// The JIT could not generate a thunk for a method
    ThunkGenerationFailed,

    /// Symbol or section lookup failure in a loaded assembly
    AssemblyError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ManifestMalformed => "manifest malformed",
            ErrorKind::ManifestInvalid => "manifest invalid",
            ErrorKind::Unresolved => "unresolved",
            ErrorKind::LoadFailed => "load failed",
            ErrorKind::RuntimeStartFailed => "runtime start failed",
            ErrorKind::ThunkGenerationFailed => "thunk generation failed",
            ErrorKind::AssemblyError => "assembly error",
        };
        f.write_str(name)
    }
}

/// An error with its classification and a human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct PlugifyError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PlugifyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        PlugifyError {
            kind,
            message: message.into(),
        }
    }
}

/// Result alias used across the core.
pub type Result<T, E = PlugifyError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlugifyError::new(ErrorKind::Unresolved, "missing dependency 'A'");
        assert_eq!(err.to_string(), "unresolved: missing dependency 'A'");
    }
}
