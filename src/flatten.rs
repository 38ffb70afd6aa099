//! Flattening: inline references and collapse `allOf` branches.
//!
//! References are replaced by a copy of their target's flattened schema, with
//! the use-site constraints merged on top. A reference to a declaration that
//! is already being resolved further up is left in place, so recursive types
//! stay representable. Flattening a root starts with the root on the path,
//! which makes flattening the output again a no-op.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::FlattenError;
use crate::schema::{AdditionalProperties, SchemaNode};
use crate::types::TypeIdent;

pub struct Flattener<'s> {
    schemas: &'s HashMap<TypeIdent, SchemaNode>,
    resolved: HashMap<TypeIdent, SchemaNode>,
    path: Vec<TypeIdent>,
    cycle_cuts: usize,
}

impl<'s> Flattener<'s> {
    pub fn new(schemas: &'s HashMap<TypeIdent, SchemaNode>) -> Self {
        Self {
            schemas,
            resolved: HashMap::new(),
            path: Vec::new(),
            cycle_cuts: 0,
        }
    }

    /// Flatten the built schema of a declaration.
    ///
    /// # Errors
    ///
    /// Returns `FlattenError::TypeConflict` when branches disagree on a type,
    /// or `FlattenError::MissingSchema` when a referenced declaration was
    /// never built.
    pub fn flatten(&mut self, ident: &TypeIdent) -> Result<SchemaNode, FlattenError> {
        self.resolve_target(ident)
    }

    /// Flatten an arbitrary node. With `root` set, references back to `root`
    /// are treated as cycles, as they are while flattening `root` itself.
    pub fn flatten_node(
        &mut self,
        node: &SchemaNode,
        root: Option<&TypeIdent>,
    ) -> Result<SchemaNode, FlattenError> {
        let at = root.map_or_else(|| "#".to_string(), ToString::to_string);
        if let Some(root) = root {
            self.path.push(root.clone());
        }
        let result = self.resolve(node.clone(), &at);
        if root.is_some() {
            self.path.pop();
        }
        result
    }

    /// Cached flattened schema of a declaration, if it has one.
    pub fn cached(&self, ident: &TypeIdent) -> Option<&SchemaNode> {
        self.resolved.get(ident)
    }

    /// Flattened copy of a declaration's schema. Results that cut a cycle
    /// depend on the current path and are not cached.
    fn resolve_target(&mut self, target: &TypeIdent) -> Result<SchemaNode, FlattenError> {
        if let Some(hit) = self.resolved.get(target) {
            debug!(%target, "flattened schema cache hit");
            return Ok(hit.clone());
        }
        let node = self
            .schemas
            .get(target)
            .cloned()
            .ok_or_else(|| FlattenError::MissingSchema {
                ident: target.clone(),
            })?;

        let cuts = self.cycle_cuts;
        self.path.push(target.clone());
        let result = self.resolve(node, &target.to_string());
        self.path.pop();
        let resolved = result?;

        if self.cycle_cuts == cuts {
            self.resolved.insert(target.clone(), resolved.clone());
        }
        Ok(resolved)
    }

    fn resolve(&mut self, mut node: SchemaNode, at: &str) -> Result<SchemaNode, FlattenError> {
        for (name, child) in std::mem::take(&mut node.properties) {
            let child = self.resolve(child, &format!("{}/properties/{}", at, name))?;
            node.properties.insert(name, child);
        }
        if let Some(items) = node.items.take() {
            node.items = Some(Box::new(self.resolve(*items, &format!("{}/items", at))?));
        }
        if let Some(extra) = &mut node.additional_properties {
            if let Some(schema) = extra.schema.take() {
                let path = format!("{}/additionalProperties", at);
                extra.schema = Some(Box::new(self.resolve(*schema, &path)?));
            }
        }
        for (i, branch) in std::mem::take(&mut node.all_of).into_iter().enumerate() {
            let branch = self.resolve(branch, &format!("{}/allOf/{}", at, i))?;
            node.all_of.push(branch);
        }

        if let Some(target) = node.reference.take() {
            if !node.cyclic && self.path.contains(&target) {
                debug!(%target, at, "leaving cyclic reference unresolved");
                self.cycle_cuts += 1;
                node.cyclic = true;
            }
            if node.cyclic {
                node.reference = Some(target);
                return Ok(node);
            }

            let mut resolved = self.resolve_target(&target)?;
            // use-site docs win; the target's fill the gaps
            if node.title.is_none() {
                node.title = resolved.title.take();
            }
            if node.description.is_none() {
                node.description = resolved.description.take();
            }
            if node.example.is_none() {
                node.example = resolved.example.take();
            }
            if node.external_docs.is_none() {
                node.external_docs = resolved.external_docs.take();
            }
            node.all_of.insert(0, resolved.without_docs());
        }

        collapse(node, at)
    }
}

/// Merge a node's branches into it, leaving only what can't be merged.
pub fn collapse(node: SchemaNode, at: &str) -> Result<SchemaNode, FlattenError> {
    if node.all_of.is_empty() {
        return Ok(node);
    }
    merge_nodes(vec![node], at)
}

/// Split nodes into mergeable pieces and residual (unresolved) references.
fn explode(mut node: SchemaNode, pieces: &mut Vec<SchemaNode>, residual: &mut Vec<SchemaNode>) {
    if node.reference.is_some() {
        residual.push(node);
        return;
    }
    let branches = std::mem::take(&mut node.all_of);
    pieces.push(node);
    for branch in branches {
        explode(branch, pieces, residual);
    }
}

fn merge_nodes(nodes: Vec<SchemaNode>, at: &str) -> Result<SchemaNode, FlattenError> {
    let mut pieces = Vec::new();
    let mut residual = Vec::new();
    for node in nodes {
        explode(node, &mut pieces, &mut residual);
    }
    let mut merged = merge_pieces(&pieces, at)?;
    merged.all_of.extend(residual);
    Ok(merged)
}

fn single_or_merge(nodes: Vec<SchemaNode>, at: &str) -> Result<SchemaNode, FlattenError> {
    match <[SchemaNode; 1]>::try_from(nodes) {
        Ok([only]) => Ok(only),
        Err(nodes) => merge_nodes(nodes, at),
    }
}

/// Merge flat pieces; `pieces[0]` is the original node and the only source
/// of documentation.
fn merge_pieces(pieces: &[SchemaNode], at: &str) -> Result<SchemaNode, FlattenError> {
    let Some(base) = pieces.first() else {
        return Ok(SchemaNode::default());
    };
    let mut out = SchemaNode {
        title: base.title.clone(),
        description: base.description.clone(),
        example: base.example.clone(),
        external_docs: base.external_docs.clone(),
        ..SchemaNode::default()
    };

    for piece in pieces {
        let Some(t) = &piece.type_ else { continue };
        if let Some(first) = &out.type_ {
            if first != t {
                return Err(FlattenError::TypeConflict {
                    path: at.to_string(),
                    first: first.clone(),
                    second: t.clone(),
                });
            }
        } else {
            out.type_ = Some(t.clone());
        }
    }

    out.nullable = pieces.iter().any(|p| p.nullable);
    out.required = pieces.iter().flat_map(|p| p.required.iter().cloned()).collect();
    out.validations = pieces
        .iter()
        .flat_map(|p| p.validations.iter().cloned())
        .collect();

    // A scalar set to one value passes through; differing values stay apart,
    // one residual branch per piece that set it.
    let mut hoisted = vec![SchemaNode::default(); pieces.len()];
    macro_rules! merge_scalar {
        ($($field:ident),* $(,)?) => {$(
            let set: Vec<(usize, _)> = pieces
                .iter()
                .enumerate()
                .filter_map(|(i, p)| p.$field.as_ref().map(|v| (i, v)))
                .collect();
            let first = set.first().map(|(_, v)| *v);
            if set.iter().all(|(_, v)| Some(*v) == first) {
                out.$field = first.cloned();
            } else {
                for (i, v) in set {
                    hoisted[i].$field = Some(v.clone());
                }
            }
        )*};
    }
    merge_scalar!(
        format,
        pattern,
        minimum,
        maximum,
        exclusive_minimum,
        exclusive_maximum,
        multiple_of,
        min_length,
        max_length,
        min_items,
        max_items,
        unique_items,
        min_properties,
        max_properties,
        enum_values,
    );

    let mut by_name: IndexMap<&String, Vec<SchemaNode>> = IndexMap::new();
    for piece in pieces {
        for (name, node) in &piece.properties {
            by_name.entry(name).or_default().push(node.clone());
        }
    }
    for (name, nodes) in by_name {
        let merged = single_or_merge(nodes, &format!("{}/properties/{}", at, name))?;
        out.properties.insert(name.clone(), merged);
    }

    let items: Vec<SchemaNode> = pieces
        .iter()
        .filter_map(|p| p.items.as_deref().cloned())
        .collect();
    if !items.is_empty() {
        out.items = Some(Box::new(single_or_merge(items, &format!("{}/items", at))?));
    }

    let extra: Vec<&AdditionalProperties> = pieces
        .iter()
        .filter_map(|p| p.additional_properties.as_ref())
        .collect();
    let extra_schemas: Vec<SchemaNode> = extra
        .iter()
        .filter_map(|ap| ap.schema.as_deref().cloned())
        .collect();
    if !extra_schemas.is_empty() {
        let path = format!("{}/additionalProperties", at);
        out.additional_properties = Some(AdditionalProperties::schema(single_or_merge(
            extra_schemas,
            &path,
        )?));
    } else if !extra.is_empty() {
        out.additional_properties = Some(AdditionalProperties::flag(
            extra.iter().all(|ap| ap.allowed),
        ));
    }

    out.all_of = hoisted.into_iter().filter(|h| !h.is_empty()).collect();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ValidationRule;
    use serde_json::json;

    fn ident(name: &str) -> TypeIdent {
        TypeIdent::new("api", name)
    }

    fn cut(name: &str) -> SchemaNode {
        SchemaNode {
            cyclic: true,
            ..SchemaNode::reference(ident(name))
        }
    }

    fn branches(nodes: Vec<SchemaNode>) -> SchemaNode {
        SchemaNode {
            all_of: nodes,
            ..SchemaNode::default()
        }
    }

    fn required(names: &[&str]) -> SchemaNode {
        SchemaNode {
            required: names.iter().map(|s| s.to_string()).collect(),
            ..SchemaNode::default()
        }
    }

    fn object(props: &[(&str, SchemaNode)]) -> SchemaNode {
        let mut node = SchemaNode::typed("object");
        for (name, prop) in props {
            node.properties.insert(name.to_string(), prop.clone());
        }
        node
    }

    fn flatten_alone(node: SchemaNode) -> Result<SchemaNode, FlattenError> {
        let schemas = HashMap::new();
        Flattener::new(&schemas).flatten_node(&node, None)
    }

    #[test]
    fn required_is_a_union() {
        let merged =
            flatten_alone(branches(vec![required(&["foo", "bar"]), required(&["bar", "baz"])]))
                .unwrap();
        let names: Vec<&str> = merged.required.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["bar", "baz", "foo"]);
        assert!(merged.all_of.is_empty());
    }

    #[test]
    fn nullable_if_any_branch_is() {
        let nullable = SchemaNode {
            nullable: true,
            ..SchemaNode::default()
        };
        let merged = flatten_alone(branches(vec![nullable, SchemaNode::default()])).unwrap();
        assert!(merged.nullable);
    }

    #[test]
    fn conflicting_types_fail() {
        let err = flatten_alone(branches(vec![
            SchemaNode::typed("string"),
            SchemaNode::typed("integer"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            FlattenError::TypeConflict {
                path: "#".into(),
                first: "string".into(),
                second: "integer".into(),
            }
        );
    }

    #[test]
    fn nested_type_conflict_reports_path() {
        let left = object(&[("name", SchemaNode::typed("string"))]);
        let right = object(&[("name", SchemaNode::typed("boolean"))]);
        let err = flatten_alone(branches(vec![left, right])).unwrap_err();
        assert!(matches!(
            err,
            FlattenError::TypeConflict { ref path, .. } if path == "#/properties/name"
        ));
    }

    #[test]
    fn differing_scalars_stay_as_branches() {
        let a = SchemaNode {
            max_length: Some(5),
            ..SchemaNode::typed("string")
        };
        let b = SchemaNode {
            max_length: Some(10),
            min_length: Some(1),
            ..SchemaNode::typed("string")
        };
        let merged = flatten_alone(branches(vec![a, b])).unwrap();
        assert_eq!(merged.type_.as_deref(), Some("string"));
        assert_eq!(merged.min_length, Some(1));
        assert_eq!(merged.max_length, None);
        assert_eq!(
            merged.all_of,
            vec![
                SchemaNode {
                    max_length: Some(5),
                    ..SchemaNode::default()
                },
                SchemaNode {
                    max_length: Some(10),
                    ..SchemaNode::default()
                },
            ]
        );
    }

    #[test]
    fn properties_merge_recursively() {
        let left = object(&[(
            "name",
            SchemaNode {
                min_length: Some(1),
                ..SchemaNode::typed("string")
            },
        )]);
        let right = object(&[
            (
                "name",
                SchemaNode {
                    pattern: Some("^a".into()),
                    ..SchemaNode::typed("string")
                },
            ),
            ("age", SchemaNode::typed("integer")),
        ]);
        let merged = flatten_alone(branches(vec![left, right])).unwrap();
        let name = &merged.properties["name"];
        assert_eq!(name.min_length, Some(1));
        assert_eq!(name.pattern.as_deref(), Some("^a"));
        assert!(merged.properties.contains_key("age"));
    }

    #[test]
    fn additional_properties_prefer_schemas_and_deny_on_conflict() {
        let flag = |allowed| SchemaNode {
            additional_properties: Some(AdditionalProperties::flag(allowed)),
            ..SchemaNode::typed("object")
        };
        let merged = flatten_alone(branches(vec![
            flag(false),
            SchemaNode::map(SchemaNode::typed("string")),
        ]))
        .unwrap();
        assert_eq!(
            merged.additional_properties,
            Some(AdditionalProperties::schema(SchemaNode::typed("string")))
        );

        let merged = flatten_alone(branches(vec![flag(true), flag(false)])).unwrap();
        assert_eq!(
            merged.additional_properties,
            Some(AdditionalProperties::flag(false))
        );
    }

    #[test]
    fn docs_come_from_the_base_and_rules_concatenate() {
        let rule = |r: &str| ValidationRule {
            rule: r.to_string(),
            message: None,
        };
        let node = SchemaNode {
            description: Some("base".into()),
            validations: vec![rule("base")],
            all_of: vec![
                SchemaNode {
                    description: Some("first".into()),
                    title: Some("ignored".into()),
                    validations: vec![rule("a1"), rule("a2")],
                    ..SchemaNode::default()
                },
                SchemaNode {
                    example: Some(json!("x")),
                    validations: vec![rule("b1")],
                    ..SchemaNode::default()
                },
            ],
            ..SchemaNode::default()
        };
        let merged = flatten_alone(node).unwrap();
        assert_eq!(merged.description.as_deref(), Some("base"));
        assert_eq!(merged.title, None);
        assert_eq!(merged.example, None);
        let rules: Vec<&str> = merged.validations.iter().map(|r| r.rule.as_str()).collect();
        assert_eq!(rules, vec!["base", "a1", "a2", "b1"]);
    }

    #[test]
    fn references_are_inlined_with_use_site_docs() {
        let mut schemas = HashMap::new();
        schemas.insert(
            ident("Name"),
            SchemaNode {
                description: Some("A name.".into()),
                max_length: Some(63),
                ..SchemaNode::typed("string")
            },
        );
        let documented = SchemaNode {
            description: Some("Owner name.".into()),
            ..SchemaNode::reference(ident("Name"))
        };
        schemas.insert(
            ident("Root"),
            object(&[
                ("plain", SchemaNode::reference(ident("Name"))),
                ("owner", documented),
            ]),
        );

        let mut flattener = Flattener::new(&schemas);
        let root = flattener.flatten(&ident("Root")).unwrap();
        assert!(!root.has_references());
        assert_eq!(
            root.properties["plain"],
            SchemaNode {
                description: Some("A name.".into()),
                max_length: Some(63),
                ..SchemaNode::typed("string")
            }
        );
        assert_eq!(root.properties["owner"].description.as_deref(), Some("Owner name."));
        assert_eq!(root.properties["owner"].max_length, Some(63));
    }

    #[test]
    fn use_site_overrides_do_not_leak() {
        let mut schemas = HashMap::new();
        schemas.insert(ident("Name"), SchemaNode::typed("string"));
        let narrowed_min = SchemaNode {
            min_length: Some(3),
            ..SchemaNode::reference(ident("Name"))
        };
        let narrowed_max = SchemaNode {
            max_length: Some(8),
            ..SchemaNode::reference(ident("Name"))
        };
        schemas.insert(
            ident("Root"),
            object(&[("short", narrowed_max), ("long", narrowed_min)]),
        );

        let mut flattener = Flattener::new(&schemas);
        let root = flattener.flatten(&ident("Root")).unwrap();
        let short = &root.properties["short"];
        let long = &root.properties["long"];
        assert_eq!((short.min_length, short.max_length), (None, Some(8)));
        assert_eq!((long.min_length, long.max_length), (Some(3), None));
        assert_eq!(flattener.cached(&ident("Name")), Some(&SchemaNode::typed("string")));
    }

    fn cyclic() -> HashMap<TypeIdent, SchemaNode> {
        let mut schemas = HashMap::new();
        schemas.insert(
            ident("A"),
            object(&[
                ("b", SchemaNode::reference(ident("B"))),
                ("id", SchemaNode::typed("string")),
            ]),
        );
        schemas.insert(
            ident("B"),
            object(&[("a", SchemaNode::reference(ident("A")))]),
        );
        schemas
    }

    #[test]
    fn cycles_are_left_unresolved() {
        let schemas = cyclic();
        let mut flattener = Flattener::new(&schemas);
        let a = flattener.flatten(&ident("A")).unwrap();
        let b = &a.properties["b"];
        assert_eq!(b.type_.as_deref(), Some("object"));
        assert_eq!(b.properties["a"], cut("A"));
        // B's flattened form depended on A being on the path
        assert!(flattener.cached(&ident("B")).is_none());

        let b = flattener.flatten(&ident("B")).unwrap();
        assert_eq!(b.properties["a"].properties["b"], cut("B"));
    }

    #[test]
    fn self_reference() {
        let mut schemas = HashMap::new();
        schemas.insert(
            ident("List"),
            object(&[("next", SchemaNode::reference(ident("List")))]),
        );
        let mut flattener = Flattener::new(&schemas);
        let list = flattener.flatten(&ident("List")).unwrap();
        assert_eq!(list.properties["next"], cut("List"));
    }

    #[test]
    fn flattening_is_idempotent() {
        let mut schemas = cyclic();
        schemas.insert(
            ident("Name"),
            SchemaNode {
                max_length: Some(63),
                ..SchemaNode::typed("string")
            },
        );
        let conflicting = SchemaNode {
            max_length: Some(10),
            ..SchemaNode::reference(ident("Name"))
        };
        let mut root = object(&[
            ("a", SchemaNode::reference(ident("A"))),
            ("label", conflicting),
        ]);
        root.all_of.push(required(&["label"]));
        root.all_of.push(SchemaNode::reference(ident("Root")));
        schemas.insert(ident("Root"), root);

        let mut flattener = Flattener::new(&schemas);
        let once = flattener.flatten(&ident("Root")).unwrap();
        let twice = flattener.flatten_node(&once, Some(&ident("Root"))).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.all_of, vec![cut("Root")]);
        assert_eq!(once.properties["label"].all_of.len(), 2);

        for name in ["A", "B"] {
            let once = flattener.flatten(&ident(name)).unwrap();
            let twice = flattener.flatten_node(&once, Some(&ident(name))).unwrap();
            assert_eq!(once, twice, "{name}");
        }
    }

    #[test]
    fn missing_target_is_an_error() {
        let mut schemas = HashMap::new();
        schemas.insert(
            ident("Root"),
            object(&[("x", SchemaNode::reference(ident("Gone")))]),
        );
        let mut flattener = Flattener::new(&schemas);
        assert_eq!(
            flattener.flatten(&ident("Root")).unwrap_err(),
            FlattenError::MissingSchema { ident: ident("Gone") }
        );
    }
}
