//! The schema tree produced by the builder and consumed by the flattener.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::types::TypeIdent;

/// A custom validation rule attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationRule {
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Link to external documentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalDocs {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `additionalProperties`: either just a flag or a nested schema.
#[derive(Debug, Clone, PartialEq)]
pub struct AdditionalProperties {
    pub allowed: bool,
    pub schema: Option<Box<SchemaNode>>,
}

impl AdditionalProperties {
    pub fn schema(node: SchemaNode) -> Self {
        Self {
            allowed: true,
            schema: Some(Box::new(node)),
        }
    }

    pub fn flag(allowed: bool) -> Self {
        Self {
            allowed,
            schema: None,
        }
    }
}

impl Serialize for AdditionalProperties {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.schema {
            Some(schema) => schema.serialize(serializer),
            None => serializer.serialize_bool(self.allowed),
        }
    }
}

/// One node of a schema tree.
///
/// A node is a plain leaf/composite, a reference (`reference` set, present
/// only before flattening, except at cut cycles) or a branch set (`all_of`
/// non-empty, with the direct fields applying on top).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaNode {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_items: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_properties: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_properties: Option<i64>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,

    /// In member declaration order.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, SchemaNode>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub required: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<AdditionalProperties>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<SchemaNode>,
    #[serde(
        rename = "$ref",
        serialize_with = "serialize_reference",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference: Option<TypeIdent>,
    /// Set on a reference left in place because its target encloses it.
    #[serde(skip)]
    pub cyclic: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_docs: Option<ExternalDocs>,
    #[serde(
        rename = "x-validations",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub validations: Vec<ValidationRule>,
}

fn serialize_reference<S: Serializer>(
    reference: &Option<TypeIdent>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match reference {
        Some(ident) => serializer.collect_str(&format_args!("#/definitions/{}", ident)),
        None => serializer.serialize_none(),
    }
}

/// Coarse classification of a node, used in error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Reference,
    Branches,
    Array,
    Map,
    Object,
    Scalar(String),
    Untyped,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Reference => f.write_str("reference"),
            NodeKind::Branches => f.write_str("allOf branch set"),
            NodeKind::Array => f.write_str("array"),
            NodeKind::Map => f.write_str("map"),
            NodeKind::Object => f.write_str("object"),
            NodeKind::Scalar(t) => f.write_str(t),
            NodeKind::Untyped => f.write_str("untyped"),
        }
    }
}

impl SchemaNode {
    pub fn typed(type_: &str) -> Self {
        Self {
            type_: Some(type_.to_string()),
            ..Self::default()
        }
    }

    pub fn reference(ident: TypeIdent) -> Self {
        Self {
            reference: Some(ident),
            ..Self::default()
        }
    }

    pub fn array(items: SchemaNode) -> Self {
        Self {
            type_: Some("array".to_string()),
            items: Some(Box::new(items)),
            ..Self::default()
        }
    }

    pub fn map(values: SchemaNode) -> Self {
        Self {
            type_: Some("object".to_string()),
            additional_properties: Some(AdditionalProperties::schema(values)),
            ..Self::default()
        }
    }

    pub fn kind(&self) -> NodeKind {
        if self.reference.is_some() {
            return NodeKind::Reference;
        }
        match self.type_.as_deref() {
            Some("array") => NodeKind::Array,
            Some("object") if self.properties.is_empty() && self.additional_properties.is_some() => {
                NodeKind::Map
            }
            Some("object") => NodeKind::Object,
            Some(other) => NodeKind::Scalar(other.to_string()),
            None if !self.all_of.is_empty() => NodeKind::Branches,
            None => NodeKind::Untyped,
        }
    }

    /// Whether the node carries no constraints, structure or docs at all.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// The node with documentation fields cleared.
    pub fn without_docs(mut self) -> Self {
        self.title = None;
        self.description = None;
        self.example = None;
        self.external_docs = None;
        self
    }

    /// Whether any node in the tree still carries a reference.
    pub fn has_references(&self) -> bool {
        self.reference.is_some()
            || self.properties.values().any(SchemaNode::has_references)
            || self.items.as_deref().is_some_and(SchemaNode::has_references)
            || self
                .additional_properties
                .as_ref()
                .and_then(|ap| ap.schema.as_deref())
                .is_some_and(SchemaNode::has_references)
            || self.all_of.iter().any(SchemaNode::has_references)
    }
}
