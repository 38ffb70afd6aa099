//! Core types shared by the parser, builder and flattener.
//!
//! The declaration model (`Declarations` and friends) is produced by an external
//! loader/type-checker and consumed here as plain data.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::gates::FeatureGateMap;

/// Kind of declaration an annotation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Package,
    Type,
    Field,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TargetKind::Package => "package",
            TargetKind::Type => "type",
            TargetKind::Field => "field",
        };
        f.write_str(name)
    }
}

/// Identity of a declaration: its name plus the module that owns it.
///
/// Used as the key for memoization, caching and cycle detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeIdent {
    pub name: String,
    pub module: String,
}

impl TypeIdent {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
        }
    }

    /// Parse the `module.Name` form used on the command line.
    ///
    /// The last `.` separates the name, so module paths may contain dots.
    pub fn parse(s: &str) -> Option<Self> {
        let (module, name) = s.rsplit_once('.')?;
        if module.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(module, name))
    }
}

impl fmt::Display for TypeIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// Primitive member kinds understood by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Primitive {
    String,
    Bool,
    Int,
    Int32,
    Int64,
    Uint,
    Float32,
    Float64,
    Bytes,
    DateTime,
}

impl Primitive {
    /// Schema `(type, format)` pair for this primitive.
    pub fn type_and_format(self) -> (&'static str, Option<&'static str>) {
        match self {
            Primitive::String => ("string", None),
            Primitive::Bool => ("boolean", None),
            Primitive::Int | Primitive::Int32 => ("integer", Some("int32")),
            Primitive::Int64 | Primitive::Uint => ("integer", Some("int64")),
            Primitive::Float32 => ("number", Some("float")),
            Primitive::Float64 => ("number", Some("double")),
            Primitive::Bytes => ("string", Some("byte")),
            Primitive::DateTime => ("string", Some("date-time")),
        }
    }
}

/// Shape of a declaration or member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    Primitive(Primitive),
    Array(Box<Shape>),
    Map { key: Box<Shape>, value: Box<Shape> },
    Reference(TypeIdent),
    Composite(Vec<FieldInfo>),
}

/// A member of a composite declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    /// Serialization name; `-` excludes the member.
    pub json_name: String,
    #[serde(default)]
    pub inline: bool,
    #[serde(default)]
    pub omit_empty: bool,
    /// Raw comment lines, annotations included.
    #[serde(default)]
    pub comments: Vec<String>,
    pub shape: Shape,
}

/// A named declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    #[serde(default)]
    pub comments: Vec<String>,
    pub shape: Shape,
}

/// One module of the declaration model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub module: String,
    #[serde(default)]
    pub comments: Vec<String>,
    #[serde(default)]
    pub types: Vec<TypeInfo>,
}

/// The full declaration model handed over by the loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Declarations {
    #[serde(default)]
    pub packages: Vec<PackageInfo>,
}

impl Declarations {
    pub fn package(&self, module: &str) -> Option<&PackageInfo> {
        self.packages.iter().find(|p| p.module == module)
    }

    /// Find a declaration together with its owning package.
    pub fn lookup(&self, ident: &TypeIdent) -> Option<(&PackageInfo, &TypeInfo)> {
        let package = self.package(&ident.module)?;
        let info = package.types.iter().find(|t| t.name == ident.name)?;
        Some((package, info))
    }

    /// Every declaration, in package then declaration order.
    pub fn idents(&self) -> Vec<TypeIdent> {
        self.packages
            .iter()
            .flat_map(|p| p.types.iter().map(|t| TypeIdent::new(&p.module, &t.name)))
            .collect()
    }
}

/// Options for one generation run.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Enabled/disabled feature gates.
    pub gates: FeatureGateMap,
    /// Gate names that expressions may mention.
    pub known_gates: Option<BTreeSet<String>>,
    /// When true, expressions naming gates outside `known_gates` are rejected.
    pub strict_gates: bool,
}

impl GenerateOptions {
    pub fn new(gates: FeatureGateMap) -> Self {
        Self {
            gates,
            ..Self::default()
        }
    }

    /// Restrict gate expressions to these names (checked in strict mode).
    pub fn known_gates<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_gates = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Set strict gate-name checking.
    pub fn strict_gates(mut self, strict: bool) -> Self {
        self.strict_gates = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ident_equality_needs_both_fields() {
        assert_eq!(TypeIdent::new("a", "T"), TypeIdent::new("a", "T"));
        assert_ne!(TypeIdent::new("a", "T"), TypeIdent::new("b", "T"));
        assert_ne!(TypeIdent::new("a", "T"), TypeIdent::new("a", "U"));
    }

    #[test]
    fn type_ident_parse_uses_last_dot() {
        let ident = TypeIdent::parse("example.com/api.v1.Widget").unwrap();
        assert_eq!(ident.module, "example.com/api.v1");
        assert_eq!(ident.name, "Widget");
        assert_eq!(ident.to_string(), "example.com/api.v1.Widget");

        assert!(TypeIdent::parse("Widget").is_none());
        assert!(TypeIdent::parse(".Widget").is_none());
    }

    #[test]
    fn shape_deserializes_from_json() {
        let shape: Shape = serde_json::from_str(
            r#"{"map": {"key": {"primitive": "string"}, "value": {"array": {"primitive": "int64"}}}}"#,
        )
        .unwrap();
        assert_eq!(
            shape,
            Shape::Map {
                key: Box::new(Shape::Primitive(Primitive::String)),
                value: Box::new(Shape::Array(Box::new(Shape::Primitive(Primitive::Int64)))),
            }
        );
    }

    #[test]
    fn options_builder() {
        let opts = GenerateOptions::default()
            .known_gates(["alpha", "beta"])
            .strict_gates(true);
        assert!(opts.strict_gates);
        assert_eq!(opts.known_gates.unwrap().len(), 2);
    }
}
