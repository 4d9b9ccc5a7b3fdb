//! Manifest parsing: JSON with comments in, validated [`Manifest`] out.

use crate::manifest::{Manifest, ManifestError, ManifestKind};
use std::collections::HashSet;

/// How the parser treats recoverable problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Any problem is an error
    #[default]
    Strict,

    /// Duplicate methods and dependencies are dropped with a warning
    Lenient,
}

/// A successfully parsed manifest plus any warnings collected on the way
#[derive(Debug, Clone)]
pub struct ParsedManifest {
    pub manifest: Manifest,
    pub warnings: Vec<String>,
}

/// Reads manifest text into the typed model and validates it.
#[derive(Debug, Clone, Default)]
pub struct ManifestParser {
    mode: ParseMode,
}

impl ManifestParser {
    pub fn new(mode: ParseMode) -> Self {
        ManifestParser { mode }
    }

    /// Parse and validate a manifest of the declared kind.
    pub fn parse(&self, text: &str, kind: ManifestKind) -> Result<ParsedManifest, ManifestError> {
        let stripped = strip_comments(text);
        let mut manifest: Manifest = serde_json::from_str(&stripped)?;

        let mut warnings = Vec::new();
        if self.mode == ParseMode::Lenient {
            drop_duplicates(&mut manifest, &mut warnings);
        }

        manifest.validate(kind)?;

        Ok(ParsedManifest { manifest, warnings })
    }
}

/// Drop duplicate methods and dependencies, keeping the first occurrence.
fn drop_duplicates(manifest: &mut Manifest, warnings: &mut Vec<String>) {
    if let Some(methods) = &mut manifest.methods {
        let mut names = HashSet::new();
        let mut funcs = HashSet::new();
        methods.retain(|m| {
            // Single & so both sets always record the occurrence
            let fresh = names.insert(m.name.clone()) & funcs.insert(m.func_name.clone());
            if !fresh {
                warnings.push(format!("Dropped duplicate method: {}", m.name));
            }
            fresh
        });
    }

    if let Some(dependencies) = &mut manifest.dependencies {
        let mut seen = HashSet::new();
        dependencies.retain(|d| {
            let fresh = seen.insert(d.name.clone());
            if !fresh {
                warnings.push(format!("Dropped duplicate dependency: {}", d.name));
            }
            fresh
        });
    }
}

/// Blank out `//` line comments and `/* */` block comments outside string
/// literals. Newlines are preserved so serde_json error positions stay
/// meaningful.
fn strip_comments(text: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        InString,
        Escape,
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '"' => {
                    state = State::InString;
                    out.push(c);
                }
                '/' => match chars.peek() {
                    Some('/') => {
                        chars.next();
                        state = State::LineComment;
                        out.push_str("  ");
                    }
                    Some('*') => {
                        chars.next();
                        state = State::BlockComment;
                        out.push_str("  ");
                    }
                    _ => out.push(c),
                },
                _ => out.push(c),
            },
            State::InString => {
                out.push(c);
                match c {
                    '\\' => state = State::Escape,
                    '"' => state = State::Code,
                    _ => {}
                }
            }
            State::Escape => {
                out.push(c);
                state = State::InString;
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push(c);
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                    out.push_str("  ");
                } else if c == '\n' {
                    out.push(c);
                } else {
                    out.push(' ');
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_type::ValueType;

    const PLUGIN_JSON: &str = r#"{
        // sample plugin manifest
        "name": "sample",
        "version": "1.0.0",
        "language": "cpp",
        "entry": "bin/sample",
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

    #[test]
    fn test_parse_plugin_with_comments() {
        let parser = ManifestParser::default();
        let parsed = parser.parse(PLUGIN_JSON, ManifestKind::Plugin).unwrap();
        assert_eq!(parsed.manifest.name, "sample");
        assert_eq!(parsed.manifest.methods().len(), 1);
        assert_eq!(parsed.manifest.methods()[0].param_types.len(), 2);
        assert_eq!(parsed.manifest.methods()[0].ret_type.ty, ValueType::Int32);
        assert!(parsed.warnings.is_empty());
    }

    #[test]
    fn test_parse_module() {
        let json = r#"{
            "name": "lang_lua",
            "version": "2.1.0",
            "language": "lua",
            "runtime": "bin/liblua_module.so", /* host runtime */
            "directories": ["scripts"]
        }"#;
        let parser = ManifestParser::default();
        let parsed = parser.parse(json, ManifestKind::Module).unwrap();
        assert_eq!(parsed.manifest.language, "lua");
        assert_eq!(
            parsed.manifest.inferred_kind(),
            Some(ManifestKind::Module)
        );
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let json = r#"{
            "$schema": "https://example.com/plugin.schema.json",
            "metadata": { "anything": 1 },
            "name": "sample",
            "version": "1.0.0",
            "language": "cpp",
            "entry": "bin/sample"
        }"#;
        let parser = ManifestParser::default();
        assert!(parser.parse(json, ManifestKind::Plugin).is_ok());
    }

    #[test]
    fn test_bad_json_is_malformed() {
        let parser = ManifestParser::default();
        let err = parser.parse("{ not json", ManifestKind::Plugin).unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }

    #[test]
    fn test_mixed_kind_rejected() {
        let json = r#"{
            "name": "confused",
            "version": "1.0.0",
            "language": "cpp",
            "entry": "bin/x",
            "runtime": "bin/y"
        }"#;
        let parser = ManifestParser::default();
        let err = parser.parse(json, ManifestKind::Plugin).unwrap_err();
        assert!(matches!(err, ManifestError::Validation(_)));
    }

    #[test]
    fn test_lenient_drops_duplicate_dependency() {
        let json = r#"{
            "name": "sample",
            "version": "1.0.0",
            "language": "cpp",
            "entry": "bin/sample",
            "dependencies": [
                { "name": "base" },
                { "name": "base" }
            ]
        }"#;
        let strict = ManifestParser::new(ParseMode::Strict);
        // Strict mode passes duplicates through to validation; dependencies
        // are not name-unique-checked there, so both survive.
        let parsed = strict.parse(json, ManifestKind::Plugin).unwrap();
        assert_eq!(parsed.manifest.dependencies().len(), 2);

        let lenient = ManifestParser::new(ParseMode::Lenient);
        let parsed = lenient.parse(json, ManifestKind::Plugin).unwrap();
        assert_eq!(parsed.manifest.dependencies().len(), 1);
        assert_eq!(parsed.warnings.len(), 1);
    }

    #[test]
    fn test_comment_inside_string_preserved() {
        let json = r#"{
            "name": "sample",
            "version": "1.0.0",
            "language": "cpp",
            "entry": "bin/sample",
            "description": "slashes // are not comments here"
        }"#;
        let parser = ManifestParser::default();
        let parsed = parser.parse(json, ManifestKind::Plugin).unwrap();
        assert_eq!(
            parsed.manifest.description.as_deref(),
            Some("slashes // are not comments here")
        );
    }

    #[test]
    fn test_strip_comments_preserves_layout() {
        let stripped = strip_comments("{\n// hi\n\"a\": 1 /* x */\n}");
        assert_eq!(stripped.lines().count(), 4);
        assert!(stripped.contains("\"a\": 1"));
        assert!(!stripped.contains("hi"));
        assert!(!stripped.contains("x */"));
    }

    #[test]
    fn test_constraint_in_dependency_parses() {
        let json = r#"{
            "name": "sample",
            "version": "1.0.0",
            "language": "cpp",
            "entry": "bin/sample",
            "dependencies": [
                { "name": "base", "constraints": ">=1.2.0 <2.0.0", "optional": false }
            ]
        }"#;
        let parser = ManifestParser::default();
        let parsed = parser.parse(json, ManifestKind::Plugin).unwrap();
        let dep = &parsed.manifest.dependencies()[0];
        assert!(dep.accepts(&crate::version::Version::new(1, 5, 0)));
        assert!(!dep.accepts(&crate::version::Version::new(2, 0, 0)));
    }

    #[test]
    fn test_manifest_serialize_parse_round_trip() {
        let parser = ManifestParser::default();
        let parsed = parser.parse(PLUGIN_JSON, ManifestKind::Plugin).unwrap();
        let serialized = serde_json::to_string_pretty(&parsed.manifest).unwrap();
        let reparsed = parser.parse(&serialized, ManifestKind::Plugin).unwrap();
        assert_eq!(parsed.manifest, reparsed.manifest);
    }
}
