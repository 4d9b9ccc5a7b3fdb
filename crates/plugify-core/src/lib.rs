//! Core data model for the Plugify host runtime.
//!
//! Everything a manifest can express lives here: the closed value-type
//! enumeration, semantic versions and constraints over them, the manifest
//! model with its validation rules, and the shared error taxonomy. This
//! crate is pure data; it never touches the filesystem or loads code.

pub mod constraint;
pub mod error;
pub mod id;
pub mod manifest;
pub mod parser;
pub mod value_type;
pub mod version;

pub use constraint::Constraint;
pub use error::{ErrorKind, PlugifyError, Result};
pub use id::UniqueId;
pub use manifest::{
    Conflict, Dependency, EnumObject, EnumValue, Manifest, ManifestError, ManifestKind, Method,
    Property,
};
pub use parser::{ManifestParser, ParseMode, ParsedManifest};
pub use value_type::ValueType;
pub use version::Version;
