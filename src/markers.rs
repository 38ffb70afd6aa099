//! Built-in marker catalog and schema-mutating markers.
//!
//! Markers that change a node (`validation:*`, `schema:title` and friends)
//! become [`SchemaMarker`] values and are applied in a fixed order: apply-first
//! markers, then the pairwise `applies_before` relation, then numeric priority,
//! then encounter order. `validation:items:*` markers target the `items` node
//! of an array and are applied after the node's own markers.

use serde_json::Value;

use crate::argument::{ArgValue, ArgumentSpec};
use crate::error::{BuildError, RegistryError};
use crate::registry::{ApplyOrder, Definition, MarkerArgs, MarkerSet, MarkerValue, Registry};
use crate::schema::{ExternalDocs, NodeKind, SchemaNode, ValidationRule};
use crate::types::TargetKind;

pub const OPTIONAL: &str = "optional";
pub const REQUIRED: &str = "required";
pub const FEATURE_GATE: &str = "featureGate";
pub const EXACTLY_ONE_OF: &str = "schema:exactlyOneOf";
pub const AT_MOST_ONE_OF: &str = "schema:atMostOneOf";

const VALIDATION_PREFIX: &str = "validation:";
const ITEMS_PREFIX: &str = "validation:items:";
const DOCS_PREFIX: &str = "schema:";

const DOCS_PRIORITY: u16 = 1;
const RULE_PRIORITY: u16 = 20;

const INT_CONSTRAINTS: &[&str] = &[
    "Minimum",
    "Maximum",
    "MultipleOf",
    "MinLength",
    "MaxLength",
    "MinItems",
    "MaxItems",
    "MinProperties",
    "MaxProperties",
];
const BOOL_CONSTRAINTS: &[&str] = &["ExclusiveMinimum", "ExclusiveMaximum", "UniqueItems"];
const STRING_CONSTRAINTS: &[&str] = &["Pattern", "Format"];
const ITEM_CONSTRAINTS: &[&str] = &[
    "Minimum",
    "Maximum",
    "MinLength",
    "MaxLength",
    "Pattern",
    "Format",
    "Enum",
    "MinItems",
    "MaxItems",
    "UniqueItems",
    "XValidation",
];

/// Definitions for one constraint name under a prefix.
fn constraint_definition(name: &str, target: TargetKind) -> Definition {
    let constraint = name.rsplit(':').next().unwrap_or(name);
    if INT_CONSTRAINTS.contains(&constraint) {
        return Definition::anonymous(name, target, ArgumentSpec::int());
    }
    if BOOL_CONSTRAINTS.contains(&constraint) {
        return Definition::anonymous(name, target, ArgumentSpec::bool());
    }
    if STRING_CONSTRAINTS.contains(&constraint) {
        return Definition::anonymous(name, target, ArgumentSpec::string());
    }
    match constraint {
        "Enum" => Definition::anonymous(name, target, ArgumentSpec::slice_of(ArgumentSpec::any())),
        "Type" => Definition::anonymous(name, target, ArgumentSpec::string()).apply_first(),
        "Nullable" => Definition::flag(name, target),
        _ => Definition::record(
            name,
            target,
            [
                ("rule", ArgumentSpec::string()),
                ("message", ArgumentSpec::string().optional()),
            ],
        )
        .strict(true)
        .priority(RULE_PRIORITY),
    }
}

/// A registry holding every built-in marker.
pub fn builtin_registry() -> Result<Registry, RegistryError> {
    let mut reg = Registry::new();

    let all_constraints = INT_CONSTRAINTS
        .iter()
        .chain(BOOL_CONSTRAINTS)
        .chain(STRING_CONSTRAINTS)
        .chain(&["Enum", "Type", "Nullable", "XValidation"]);

    for target in [TargetKind::Field, TargetKind::Type] {
        for constraint in all_constraints.clone() {
            let name = format!("{}{}", VALIDATION_PREFIX, constraint);
            reg.register(constraint_definition(&name, target))?;
        }
        for constraint in ITEM_CONSTRAINTS {
            let name = format!("{}{}", ITEMS_PREFIX, constraint);
            reg.register(constraint_definition(&name, target))?;
        }

        reg.register(
            Definition::anonymous("schema:title", target, ArgumentSpec::string())
                .priority(DOCS_PRIORITY),
        )?;
        reg.register(
            Definition::anonymous("schema:example", target, ArgumentSpec::any())
                .priority(DOCS_PRIORITY),
        )?;
        reg.register(
            Definition::record(
                "schema:externalDocs",
                target,
                [
                    ("url", ArgumentSpec::string()),
                    ("description", ArgumentSpec::string().optional()),
                ],
            )
            .strict(true)
            .priority(DOCS_PRIORITY),
        )?;
    }

    reg.register(Definition::flag(OPTIONAL, TargetKind::Field))?;
    reg.register(Definition::flag(REQUIRED, TargetKind::Field))?;
    reg.register(Definition::anonymous(
        FEATURE_GATE,
        TargetKind::Field,
        ArgumentSpec::string(),
    ))?;

    let names = ArgumentSpec::slice_of(ArgumentSpec::string());
    reg.register(Definition::anonymous(EXACTLY_ONE_OF, TargetKind::Type, names.clone()))?;
    reg.register(Definition::anonymous(AT_MOST_ONE_OF, TargetKind::Type, names))?;

    reg.register(Definition::flag(OPTIONAL, TargetKind::Package))?;
    reg.register(Definition::flag(REQUIRED, TargetKind::Package))?;

    Ok(reg)
}

/// A marker that mutates a schema node.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaMarker {
    Minimum(i64),
    Maximum(i64),
    ExclusiveMinimum(bool),
    ExclusiveMaximum(bool),
    MultipleOf(i64),
    MinLength(i64),
    MaxLength(i64),
    Pattern(String),
    Format(String),
    MinItems(i64),
    MaxItems(i64),
    UniqueItems(bool),
    MinProperties(i64),
    MaxProperties(i64),
    Enum(Vec<Value>),
    Type(String),
    Nullable,
    XValidation(ValidationRule),
    Title(String),
    Example(Value),
    ExternalDocs(ExternalDocs),
}

/// A schema marker ready to be ordered and applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMarker {
    pub name: String,
    pub marker: SchemaMarker,
    pub order: ApplyOrder,
    /// Applies to the `items` node instead of the node itself.
    pub items: bool,
}

fn invalid(value: &MarkerValue, message: &str) -> BuildError {
    BuildError::InvalidMarkerValue {
        marker: value.name.clone(),
        message: message.to_string(),
    }
}

fn single_int(value: &MarkerValue) -> Result<i64, BuildError> {
    value
        .single()
        .and_then(ArgValue::as_int)
        .ok_or_else(|| invalid(value, "expected an integer"))
}

fn single_bool(value: &MarkerValue) -> Result<bool, BuildError> {
    value
        .single()
        .and_then(ArgValue::as_bool)
        .ok_or_else(|| invalid(value, "expected a boolean"))
}

fn single_string(value: &MarkerValue) -> Result<String, BuildError> {
    value
        .single()
        .and_then(ArgValue::as_str)
        .map(String::from)
        .ok_or_else(|| invalid(value, "expected a string"))
}

fn record_string(value: &MarkerValue, arg: &str) -> Option<String> {
    value.arg(arg).and_then(ArgValue::as_str).map(String::from)
}

const SCHEMA_TYPES: &[&str] = &["string", "integer", "number", "boolean", "object", "array"];

impl SchemaMarker {
    /// Convert a parsed marker. `None` for markers that don't touch nodes.
    pub fn from_value(value: &MarkerValue) -> Option<Result<PlannedMarker, BuildError>> {
        let (constraint, items) = match value.name.strip_prefix(ITEMS_PREFIX) {
            Some(rest) => (rest, true),
            None => (
                value
                    .name
                    .strip_prefix(VALIDATION_PREFIX)
                    .or_else(|| value.name.strip_prefix(DOCS_PREFIX))?,
                false,
            ),
        };

        let marker = match constraint {
            "Minimum" => single_int(value).map(SchemaMarker::Minimum),
            "Maximum" => single_int(value).map(SchemaMarker::Maximum),
            "ExclusiveMinimum" => single_bool(value).map(SchemaMarker::ExclusiveMinimum),
            "ExclusiveMaximum" => single_bool(value).map(SchemaMarker::ExclusiveMaximum),
            "MultipleOf" => single_int(value).map(SchemaMarker::MultipleOf),
            "MinLength" => single_int(value).map(SchemaMarker::MinLength),
            "MaxLength" => single_int(value).map(SchemaMarker::MaxLength),
            "Pattern" => single_string(value).map(SchemaMarker::Pattern),
            "Format" => single_string(value).map(SchemaMarker::Format),
            "MinItems" => single_int(value).map(SchemaMarker::MinItems),
            "MaxItems" => single_int(value).map(SchemaMarker::MaxItems),
            "UniqueItems" => single_bool(value).map(SchemaMarker::UniqueItems),
            "MinProperties" => single_int(value).map(SchemaMarker::MinProperties),
            "MaxProperties" => single_int(value).map(SchemaMarker::MaxProperties),
            "Enum" => value
                .single()
                .and_then(ArgValue::as_slice)
                .map(|items| SchemaMarker::Enum(items.iter().map(ArgValue::to_json).collect()))
                .ok_or_else(|| invalid(value, "expected a list of values")),
            "Type" => single_string(value).and_then(|t| {
                if SCHEMA_TYPES.contains(&t.as_str()) {
                    Ok(SchemaMarker::Type(t))
                } else {
                    Err(invalid(
                        value,
                        &format!("unknown type \"{}\", expected one of {}", t, SCHEMA_TYPES.join(", ")),
                    ))
                }
            }),
            "Nullable" => Ok(SchemaMarker::Nullable),
            "XValidation" => record_string(value, "rule")
                .map(|rule| {
                    SchemaMarker::XValidation(ValidationRule {
                        rule,
                        message: record_string(value, "message"),
                    })
                })
                .ok_or_else(|| invalid(value, "missing rule")),
            "title" => single_string(value).map(SchemaMarker::Title),
            "example" => match &value.args {
                MarkerArgs::Single(v) => Ok(SchemaMarker::Example(v.to_json())),
                _ => Err(invalid(value, "expected a value")),
            },
            "externalDocs" => record_string(value, "url")
                .map(|url| {
                    SchemaMarker::ExternalDocs(ExternalDocs {
                        url,
                        description: record_string(value, "description"),
                    })
                })
                .ok_or_else(|| invalid(value, "missing url")),
            _ => return None,
        };

        Some(marker.map(|marker| PlannedMarker {
            name: value.name.clone(),
            marker,
            order: value.order,
            items,
        }))
    }

    /// Pairwise ordering: `self` must run before `other`.
    pub fn applies_before(&self, other: &SchemaMarker) -> bool {
        // nullable adds null to an existing enum
        matches!((self, other), (SchemaMarker::Enum(_), SchemaMarker::Nullable))
    }

    /// Apply to `node`. `name` is the marker name used in errors.
    pub fn apply(&self, name: &str, node: &mut SchemaNode) -> Result<(), BuildError> {
        match self {
            SchemaMarker::Minimum(v) => {
                expect_type(name, node, "numeric", is_numeric)?;
                node.minimum = Some(*v);
            }
            SchemaMarker::Maximum(v) => {
                expect_type(name, node, "numeric", is_numeric)?;
                node.maximum = Some(*v);
            }
            SchemaMarker::ExclusiveMinimum(v) => {
                expect_type(name, node, "numeric", is_numeric)?;
                node.exclusive_minimum = Some(*v);
            }
            SchemaMarker::ExclusiveMaximum(v) => {
                expect_type(name, node, "numeric", is_numeric)?;
                node.exclusive_maximum = Some(*v);
            }
            SchemaMarker::MultipleOf(v) => {
                expect_type(name, node, "numeric", is_numeric)?;
                node.multiple_of = Some(*v);
            }
            SchemaMarker::MinLength(v) => {
                expect_type(name, node, "string", |t| t == "string")?;
                node.min_length = Some(*v);
            }
            SchemaMarker::MaxLength(v) => {
                expect_type(name, node, "string", |t| t == "string")?;
                node.max_length = Some(*v);
            }
            SchemaMarker::Pattern(p) => {
                expect_type(name, node, "string", |t| t == "string")?;
                node.pattern = Some(p.clone());
            }
            SchemaMarker::Format(f) => node.format = Some(f.clone()),
            SchemaMarker::MinItems(v) => {
                expect_type(name, node, "array", |t| t == "array")?;
                node.min_items = Some(*v);
            }
            SchemaMarker::MaxItems(v) => {
                expect_type(name, node, "array", |t| t == "array")?;
                node.max_items = Some(*v);
            }
            SchemaMarker::UniqueItems(v) => {
                expect_type(name, node, "array", |t| t == "array")?;
                node.unique_items = Some(*v);
            }
            SchemaMarker::MinProperties(v) => {
                expect_type(name, node, "object", |t| t == "object")?;
                node.min_properties = Some(*v);
            }
            SchemaMarker::MaxProperties(v) => {
                expect_type(name, node, "object", |t| t == "object")?;
                node.max_properties = Some(*v);
            }
            SchemaMarker::Enum(values) => node.enum_values = Some(values.clone()),
            SchemaMarker::Type(t) => {
                if node.type_.as_deref() != Some(t.as_str()) {
                    node.format = None;
                }
                node.type_ = Some(t.clone());
            }
            SchemaMarker::Nullable => {
                node.nullable = true;
                if let Some(values) = &mut node.enum_values {
                    if !values.contains(&Value::Null) {
                        values.push(Value::Null);
                    }
                }
            }
            SchemaMarker::XValidation(rule) => node.validations.push(rule.clone()),
            SchemaMarker::Title(t) => node.title = Some(t.clone()),
            SchemaMarker::Example(v) => node.example = Some(v.clone()),
            SchemaMarker::ExternalDocs(docs) => node.external_docs = Some(docs.clone()),
        }
        Ok(())
    }
}

fn is_numeric(t: &str) -> bool {
    t == "integer" || t == "number"
}

/// References and untyped nodes can't be checked until they're flattened.
fn expect_type(
    name: &str,
    node: &SchemaNode,
    expected: &'static str,
    accepts: impl Fn(&str) -> bool,
) -> Result<(), BuildError> {
    if node.reference.is_some() {
        return Ok(());
    }
    match node.type_.as_deref() {
        Some(t) if !accepts(t) => Err(BuildError::MisappliedMarker {
            marker: name.to_string(),
            expected,
            actual: node.kind().to_string(),
        }),
        _ => Ok(()),
    }
}

/// Sort markers into application order.
///
/// Candidates are ranked by (apply-first, priority, encounter). At each step
/// the best-ranked candidate that no remaining marker must precede is taken.
pub fn order_markers(planned: Vec<PlannedMarker>) -> Vec<PlannedMarker> {
    let mut pending: Vec<(usize, PlannedMarker)> = planned.into_iter().enumerate().collect();
    pending.sort_by_key(|(i, p)| (!p.order.first, p.order.priority, *i));

    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let pick = (0..pending.len())
            .find(|&i| {
                let candidate = &pending[i].1;
                !pending.iter().enumerate().any(|(j, (_, other))| {
                    j != i
                        && other.order.first == candidate.order.first
                        && other.marker.applies_before(&candidate.marker)
                })
            })
            .unwrap_or(0);
        ordered.push(pending.remove(pick).1);
    }
    ordered
}

/// Apply every schema marker in `markers` to `node`, returning all problems.
pub fn apply_markers(markers: &MarkerSet, node: &mut SchemaNode) -> Vec<BuildError> {
    let mut errors = Vec::new();
    let mut own = Vec::new();
    let mut items = Vec::new();

    for value in markers.iter() {
        match SchemaMarker::from_value(value) {
            Some(Ok(planned)) if planned.items => items.push(planned),
            Some(Ok(planned)) => own.push(planned),
            Some(Err(e)) => errors.push(e),
            None => {}
        }
    }

    for planned in order_markers(own) {
        tracing::trace!(marker = %planned.name, "applying marker");
        if let Err(e) = planned.marker.apply(&planned.name, node) {
            errors.push(e);
        }
    }

    let kind = node.kind();
    for planned in order_markers(items) {
        match node.items.as_deref_mut() {
            Some(item_node) if kind == NodeKind::Array => {
                tracing::trace!(marker = %planned.name, "applying item marker");
                if let Err(e) = planned.marker.apply(&planned.name, item_node) {
                    errors.push(e);
                }
            }
            _ => errors.push(BuildError::MisappliedMarker {
                marker: planned.name.clone(),
                expected: "array",
                actual: kind.to_string(),
            }),
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn markers(lines: &[&str], target: TargetKind) -> MarkerSet {
        let reg = builtin_registry().unwrap();
        let comments: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        let annotations = reg.collect(&comments, target);
        assert!(annotations.errors.is_empty(), "{:?}", annotations.errors);
        annotations.markers
    }

    #[test]
    fn builtin_registry_builds() {
        let reg = builtin_registry().unwrap();
        assert!(reg.lookup("+validation:MinLength=1", TargetKind::Field).is_some());
        assert!(reg.lookup("+validation:items:MinLength=1", TargetKind::Type).is_some());
        assert!(reg.lookup("+optional", TargetKind::Package).is_some());
        assert!(reg.lookup("+featureGate=a", TargetKind::Type).is_none());
    }

    #[test]
    fn applies_string_constraints() {
        let set = markers(
            &[
                "+validation:MinLength=1",
                "+validation:MaxLength=10",
                "+validation:Pattern=`^[a-z]+$`",
            ],
            TargetKind::Field,
        );
        let mut node = SchemaNode::typed("string");
        assert!(apply_markers(&set, &mut node).is_empty());
        assert_eq!(node.min_length, Some(1));
        assert_eq!(node.max_length, Some(10));
        assert_eq!(node.pattern.as_deref(), Some("^[a-z]+$"));
    }

    #[test]
    fn type_applies_first() {
        // Pattern needs a string; Type comes later in the text but runs first.
        let set = markers(
            &["+validation:Pattern=abc", "+validation:Type=string"],
            TargetKind::Field,
        );
        let mut node = SchemaNode {
            format: Some("int64".into()),
            ..SchemaNode::typed("integer")
        };
        assert!(apply_markers(&set, &mut node).is_empty());
        assert_eq!(node.type_.as_deref(), Some("string"));
        assert_eq!(node.format, None);
        assert_eq!(node.pattern.as_deref(), Some("abc"));
    }

    #[test]
    fn enum_applies_before_nullable() {
        let set = markers(
            &["+validation:Nullable", "+validation:Enum={a,b}"],
            TargetKind::Field,
        );
        let mut node = SchemaNode::typed("string");
        assert!(apply_markers(&set, &mut node).is_empty());
        assert!(node.nullable);
        assert_eq!(node.enum_values, Some(vec![json!("a"), json!("b"), Value::Null]));
    }

    #[test]
    fn enum_legacy_and_delimited_forms_agree() {
        for line in ["+validation:Enum=a;b;c", "+validation:Enum={a,b,c}"] {
            let set = markers(&[line], TargetKind::Field);
            let mut node = SchemaNode::typed("string");
            assert!(apply_markers(&set, &mut node).is_empty());
            assert_eq!(
                node.enum_values,
                Some(vec![json!("a"), json!("b"), json!("c")]),
                "{line}"
            );
        }

        let set = markers(&["+validation:items:Enum=1;2"], TargetKind::Field);
        let mut node = SchemaNode::array(SchemaNode::typed("integer"));
        assert!(apply_markers(&set, &mut node).is_empty());
        assert_eq!(
            node.items.unwrap().enum_values,
            Some(vec![json!(1), json!(2)])
        );
    }

    #[test]
    fn priority_then_encounter_order() {
        let set = markers(
            &[
                r#"+validation:XValidation:rule="second""#,
                r#"+validation:XValidation:rule="third""#,
                "+validation:Minimum=0",
                "+schema:title=Count",
            ],
            TargetKind::Field,
        );
        let planned: Vec<PlannedMarker> = set
            .iter()
            .filter_map(|v| SchemaMarker::from_value(v).map(Result::unwrap))
            .collect();
        let names: Vec<String> = order_markers(planned).into_iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                "schema:title",
                "validation:Minimum",
                "validation:XValidation",
                "validation:XValidation"
            ]
        );

        let mut node = SchemaNode::typed("integer");
        assert!(apply_markers(&set, &mut node).is_empty());
        let rules: Vec<&str> = node.validations.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(rules, vec!["second", "third"]);
    }

    #[test]
    fn misapplied_constraint_names_actual_kind() {
        let set = markers(&["+validation:MinItems=1"], TargetKind::Field);
        let mut node = SchemaNode::typed("string");
        let errors = apply_markers(&set, &mut node);
        assert_eq!(
            errors,
            vec![BuildError::MisappliedMarker {
                marker: "validation:MinItems".into(),
                expected: "array",
                actual: "string".into(),
            }]
        );
    }

    #[test]
    fn item_markers_need_an_array() {
        let set = markers(&["+validation:items:MaxLength=5"], TargetKind::Field);

        let mut array = SchemaNode::array(SchemaNode::typed("string"));
        assert!(apply_markers(&set, &mut array).is_empty());
        assert_eq!(array.items.unwrap().max_length, Some(5));

        let mut object = SchemaNode::typed("object");
        let errors = apply_markers(&set, &mut object);
        assert_eq!(
            errors,
            vec![BuildError::MisappliedMarker {
                marker: "validation:items:MaxLength".into(),
                expected: "array",
                actual: "object".into(),
            }]
        );
    }

    #[test]
    fn references_defer_type_checks() {
        let set = markers(&["+validation:MinLength=3"], TargetKind::Field);
        let mut node = SchemaNode::reference(crate::types::TypeIdent::new("m", "Name"));
        assert!(apply_markers(&set, &mut node).is_empty());
        assert_eq!(node.min_length, Some(3));
    }

    #[test]
    fn unknown_type_value() {
        let set = markers(&["+validation:Type=decimal"], TargetKind::Field);
        let mut node = SchemaNode::typed("string");
        let errors = apply_markers(&set, &mut node);
        assert!(matches!(&errors[..], [BuildError::InvalidMarkerValue { .. }]));
    }

    #[test]
    fn docs_markers() {
        let set = markers(
            &[
                "+schema:title=Widget",
                "+schema:example={1,2}",
                r#"+schema:externalDocs:url="https://example.com/widget",description="Widget docs""#,
            ],
            TargetKind::Type,
        );
        let mut node = SchemaNode::typed("array");
        assert!(apply_markers(&set, &mut node).is_empty());
        assert_eq!(node.title.as_deref(), Some("Widget"));
        assert_eq!(node.example, Some(json!([1, 2])));
        assert_eq!(
            node.external_docs,
            Some(ExternalDocs {
                url: "https://example.com/widget".into(),
                description: Some("Widget docs".into()),
            })
        );
    }

    #[test]
    fn non_schema_markers_are_skipped() {
        let set = markers(&["+optional", "+featureGate=alpha"], TargetKind::Field);
        for value in set.iter() {
            assert!(SchemaMarker::from_value(value).is_none());
        }
    }
}
