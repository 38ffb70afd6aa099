//! Error types for annotation parsing, schema building, flattening and gates.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::types::{TargetKind, TypeIdent};

/// A single problem found while parsing one annotation line.
///
/// `offset` is the byte position of the offending token within the line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{marker}: {message} (at offset {offset})")]
pub struct MarkerError {
    pub marker: String,
    pub offset: usize,
    pub message: String,
}

/// All problems found in one annotation line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct MarkerErrors(pub Vec<MarkerError>);

impl fmt::Display for MarkerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

/// Errors while registering marker definitions.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("marker \"{name}\" is already registered for {target} targets")]
    DuplicateDefinition { name: String, target: TargetKind },

    #[error("invalid marker name \"{name}\": expected colon-separated alphanumeric segments")]
    InvalidName { name: String },
}

/// Errors while building a schema for one declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Marker(#[from] MarkerError),

    #[error("marker {marker} can only be applied to {expected} schemas, got {actual}")]
    MisappliedMarker {
        marker: String,
        expected: &'static str,
        actual: String,
    },

    #[error("invalid value for marker {marker}: {message}")]
    InvalidMarkerValue { marker: String, message: String },

    #[error("map keys must be strings, got {key}")]
    UnsupportedMapKey { key: String },

    #[error("unknown declaration {ident}")]
    UnknownType { ident: TypeIdent },

    #[error("field \"{field}\" is marked required but belongs to a one-of group")]
    RequiredInGroup { field: String },

    #[error("one-of group member \"{member}\" must be a direct field name")]
    NestedGroupMember { member: String },

    #[error("one-of group member \"{member}\" is not a field of this type")]
    UnknownGroupMember { member: String },

    #[error("field \"{field}\" is claimed by both an exactly-one-of and an at-most-one-of group")]
    ConflictingGroups { field: String },
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Marker(_) => ErrorKind::AnnotationSyntax,
            BuildError::MisappliedMarker { .. } | BuildError::InvalidMarkerValue { .. } => {
                ErrorKind::AnnotationSemantic
            }
            _ => ErrorKind::BuildStructural,
        }
    }
}

/// Errors while flattening references and `allOf` branches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlattenError {
    #[error("conflicting types in allOf branches at {path}: {first} vs {second}")]
    TypeConflict {
        path: String,
        first: String,
        second: String,
    },

    #[error("no schema was built for {ident}")]
    MissingSchema { ident: TypeIdent },
}

impl FlattenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlattenError::TypeConflict { .. } => ErrorKind::MergeConflict,
            FlattenError::MissingSchema { .. } => ErrorKind::BuildStructural,
        }
    }
}

/// Errors in feature-gate expressions and configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("invalid character '{ch}' at offset {offset} in gate expression \"{expr}\"")]
    InvalidCharacter { expr: String, ch: char, offset: usize },

    #[error("unbalanced parentheses in gate expression \"{expr}\"")]
    UnbalancedParentheses { expr: String },

    #[error("empty operand in gate expression \"{expr}\"")]
    EmptyOperand { expr: String },

    #[error("unknown feature gate \"{gate}\" in expression \"{expr}\"")]
    UnknownGate { expr: String, gate: String },

    #[error("malformed feature gate setting \"{pair}\": expected name=true|false")]
    MalformedPair { pair: String },

    #[error("invalid value \"{value}\" for feature gate \"{gate}\": expected true or false")]
    InvalidValue { gate: String, value: String },
}

/// Errors loading a declaration model.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid declaration model: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },
}

impl LoadError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadError::FileNotFound { .. } | LoadError::ReadError { .. } => 3,
            LoadError::InvalidJson { .. } => 2,
        }
    }
}

/// Errors that abort a whole generation run.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("unknown root declaration {ident}")]
    UnknownRoot { ident: TypeIdent },
}

impl GenerateError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        2
    }
}

/// Category of a per-declaration problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    AnnotationSyntax,
    AnnotationSemantic,
    BuildStructural,
    MergeConflict,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::AnnotationSyntax => "annotation-syntax",
            ErrorKind::AnnotationSemantic => "annotation-semantic",
            ErrorKind::BuildStructural => "build-structural",
            ErrorKind::MergeConflict => "merge-conflict",
        };
        f.write_str(label)
    }
}

/// A problem attached to the declaration (and member) that caused it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub declaration: TypeIdent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        kind: ErrorKind,
        declaration: &TypeIdent,
        member: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            declaration: declaration.clone(),
            member: member.map(String::from),
            message: message.into(),
        }
    }

    pub fn from_build(declaration: &TypeIdent, member: Option<&str>, err: &BuildError) -> Self {
        Self::new(err.kind(), declaration, member, err.to_string())
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(f, "{}.{}: {}", self.declaration, member, self.message),
            None => write!(f, "{}: {}", self.declaration, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_exit_codes() {
        let err = LoadError::FileNotFound {
            path: PathBuf::from("decls.json"),
        };
        assert_eq!(err.exit_code(), 3);

        let source = serde_json::from_str::<serde_json::Value>("nope").unwrap_err();
        let err = LoadError::InvalidJson { source };
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn build_error_kinds() {
        let err = BuildError::Marker(MarkerError {
            marker: "+validation:MinLength=x".into(),
            offset: 22,
            message: "expected integer, got \"x\"".into(),
        });
        assert_eq!(err.kind(), ErrorKind::AnnotationSyntax);

        let err = BuildError::MisappliedMarker {
            marker: "validation:items:MinLength".into(),
            expected: "array",
            actual: "string".into(),
        };
        assert_eq!(err.kind(), ErrorKind::AnnotationSemantic);

        let err = BuildError::UnsupportedMapKey { key: "integer".into() };
        assert_eq!(err.kind(), ErrorKind::BuildStructural);
    }

    #[test]
    fn diagnostic_display() {
        let ident = TypeIdent::new("api.v1", "Widget");
        let diag = Diagnostic::new(ErrorKind::BuildStructural, &ident, Some("spec"), "boom");
        assert_eq!(diag.to_string(), "api.v1.Widget.spec: boom");

        let diag = Diagnostic::new(ErrorKind::MergeConflict, &ident, None, "boom");
        assert_eq!(diag.to_string(), "api.v1.Widget: boom");
    }

    #[test]
    fn marker_errors_display_joins_all() {
        let errs = MarkerErrors(vec![
            MarkerError {
                marker: "+m".into(),
                offset: 3,
                message: "first".into(),
            },
            MarkerError {
                marker: "+m".into(),
                offset: 7,
                message: "second".into(),
            },
        ]);
        assert_eq!(
            errs.to_string(),
            "+m: first (at offset 3); +m: second (at offset 7)"
        );
    }
}
