//! Schema builder: declarations in, schema trees (with references) out.
//!
//! Building is demand-driven. A root is requested, and every declaration it
//! references is queued and built once. Per-declaration problems become
//! [`Diagnostic`]s; an invalid feature-gate expression aborts the run.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::error::{BuildError, Diagnostic, GateError};
use crate::gates;
use crate::markers::{self, apply_markers};
use crate::registry::{MarkerSet, Registry};
use crate::schema::{SchemaNode, ValidationRule};
use crate::types::{
    Declarations, FieldInfo, GenerateOptions, PackageInfo, Primitive, Shape, TargetKind, TypeIdent,
};

/// Why a member could not be built.
enum MemberError {
    Build(BuildError),
    Gate(GateError),
}

impl From<BuildError> for MemberError {
    fn from(e: BuildError) -> Self {
        MemberError::Build(e)
    }
}

impl From<GateError> for MemberError {
    fn from(e: GateError) -> Self {
        MemberError::Gate(e)
    }
}

/// One-of constraint groups declared on a composite.
#[derive(Debug, Default)]
struct Groups {
    exactly_one: Vec<Vec<String>>,
    at_most_one: Vec<Vec<String>>,
}

impl Groups {
    fn contains(&self, json_name: &str) -> bool {
        self.exactly_one
            .iter()
            .chain(&self.at_most_one)
            .any(|g| g.iter().any(|m| m == json_name))
    }
}

/// Declaration being built, for diagnostics.
struct Context<'c> {
    ident: &'c TypeIdent,
    package_optional: bool,
}

pub struct SchemaBuilder<'a> {
    registry: &'a Registry,
    decls: &'a Declarations,
    options: &'a GenerateOptions,
    schemas: HashMap<TypeIdent, SchemaNode>,
    queue: VecDeque<TypeIdent>,
    queued: HashSet<TypeIdent>,
    package_defaults: HashMap<String, bool>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(registry: &'a Registry, decls: &'a Declarations, options: &'a GenerateOptions) -> Self {
        Self {
            registry,
            decls,
            options,
            schemas: HashMap::new(),
            queue: VecDeque::new(),
            queued: HashSet::new(),
            package_defaults: HashMap::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Queue a declaration. Each declaration is built at most once per run.
    pub fn request(&mut self, ident: &TypeIdent) {
        if self.schemas.contains_key(ident) || !self.queued.insert(ident.clone()) {
            return;
        }
        debug!(%ident, "queued declaration");
        self.queue.push_back(ident.clone());
    }

    /// Build every queued declaration, including ones discovered on the way.
    ///
    /// # Errors
    ///
    /// Returns the first invalid feature-gate expression encountered.
    pub fn build_all(&mut self) -> Result<(), GateError> {
        while let Some(ident) = self.queue.pop_front() {
            if !self.schemas.contains_key(&ident) {
                self.build_type(&ident)?;
            }
        }
        Ok(())
    }

    pub fn schema(&self, ident: &TypeIdent) -> Option<&SchemaNode> {
        self.schemas.get(ident)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_parts(self) -> (HashMap<TypeIdent, SchemaNode>, Vec<Diagnostic>) {
        (self.schemas, self.diagnostics)
    }

    fn report(&mut self, ident: &TypeIdent, member: Option<&str>, err: &BuildError) {
        debug!(%ident, member, error = %err, "build problem");
        self.diagnostics.push(Diagnostic::from_build(ident, member, err));
    }

    fn build_type(&mut self, ident: &TypeIdent) -> Result<(), GateError> {
        let decls = self.decls;
        let Some((package, info)) = decls.lookup(ident) else {
            self.report(ident, None, &BuildError::UnknownType { ident: ident.clone() });
            return Ok(());
        };
        debug!(%ident, "building declaration");

        let ctx = Context {
            ident,
            package_optional: self.package_optional(ident, package),
        };

        let annotations = self.registry.collect(&info.comments, TargetKind::Type);
        for err in annotations.errors {
            self.report(ident, None, &err.into());
        }

        let mut node = match &info.shape {
            Shape::Composite(fields) => self.build_object(&ctx, fields, &annotations.markers)?,
            shape => match self.build_shape(&ctx, shape) {
                Ok(node) => node,
                Err(MemberError::Build(err)) => {
                    self.report(ident, None, &err);
                    SchemaNode::default()
                }
                Err(MemberError::Gate(err)) => return Err(err),
            },
        };

        for err in apply_markers(&annotations.markers, &mut node) {
            self.report(ident, None, &err);
        }
        if !annotations.doc.is_empty() {
            node.description = Some(annotations.doc);
        }

        self.schemas.insert(ident.clone(), node);
        Ok(())
    }

    /// Whether members of `package` default to optional. Package annotation
    /// problems are reported once, against the first declaration that asks.
    fn package_optional(&mut self, ident: &TypeIdent, package: &PackageInfo) -> bool {
        if let Some(optional) = self.package_defaults.get(&package.module) {
            return *optional;
        }
        let annotations = self.registry.collect(&package.comments, TargetKind::Package);
        for err in annotations.errors {
            self.report(ident, None, &err.into());
        }
        let optional = annotations.markers.contains(markers::OPTIONAL);
        self.package_defaults.insert(package.module.clone(), optional);
        optional
    }

    fn build_shape(&mut self, ctx: &Context<'_>, shape: &Shape) -> Result<SchemaNode, MemberError> {
        match shape {
            Shape::Primitive(p) => {
                let (type_, format) = p.type_and_format();
                Ok(SchemaNode {
                    format: format.map(String::from),
                    ..SchemaNode::typed(type_)
                })
            }
            Shape::Array(item) => Ok(SchemaNode::array(self.build_shape(ctx, item)?)),
            Shape::Map { key, value } => {
                self.check_map_key(key)?;
                Ok(SchemaNode::map(self.build_shape(ctx, value)?))
            }
            Shape::Reference(target) => {
                if self.decls.lookup(target).is_none() {
                    return Err(BuildError::UnknownType {
                        ident: target.clone(),
                    }
                    .into());
                }
                self.request(target);
                Ok(SchemaNode::reference(target.clone()))
            }
            Shape::Composite(fields) => Ok(self.build_object(ctx, fields, &MarkerSet::default())?),
        }
    }

    /// Map keys must be strings, directly or through a chain of aliases.
    fn check_map_key(&self, key: &Shape) -> Result<(), BuildError> {
        let mut current = key;
        let mut seen = HashSet::new();
        loop {
            match current {
                Shape::Primitive(Primitive::String) => return Ok(()),
                Shape::Reference(ident) if seen.insert(ident) => {
                    match self.decls.lookup(ident) {
                        Some((_, info)) => current = &info.shape,
                        None => break,
                    }
                }
                _ => break,
            }
        }
        Err(BuildError::UnsupportedMapKey {
            key: shape_name(key),
        })
    }

    fn build_object(
        &mut self,
        ctx: &Context<'_>,
        fields: &[FieldInfo],
        type_markers: &MarkerSet,
    ) -> Result<SchemaNode, GateError> {
        let mut node = SchemaNode::typed("object");
        let groups = self.collect_groups(ctx, fields, type_markers);
        let mut present = BTreeSet::new();

        for field in fields {
            if field.json_name == "-" {
                continue;
            }
            let member = Some(field.name.as_str());

            let annotations = self.registry.collect(&field.comments, TargetKind::Field);
            for err in annotations.errors {
                self.report(ctx.ident, member, &err.into());
            }

            if let Some(expr) = annotations
                .markers
                .get(markers::FEATURE_GATE)
                .and_then(|m| m.single())
                .and_then(|v| v.as_str())
            {
                gates::validate(
                    expr,
                    self.options.known_gates.as_ref(),
                    self.options.strict_gates,
                )?;
                if !gates::evaluate(expr, &self.options.gates)? {
                    debug!(ident = %ctx.ident, field = %field.name, expr, "field gated out");
                    continue;
                }
            }

            let mut prop = match self.build_shape(ctx, &field.shape) {
                Ok(prop) => prop,
                Err(MemberError::Build(err)) => {
                    self.report(ctx.ident, member, &err);
                    continue;
                }
                Err(MemberError::Gate(err)) => return Err(err),
            };
            for err in apply_markers(&annotations.markers, &mut prop) {
                self.report(ctx.ident, member, &err);
            }

            if field.inline {
                node.all_of.push(prop);
                continue;
            }
            if !annotations.doc.is_empty() {
                prop.description = Some(annotations.doc);
            }

            let in_group = groups.contains(&field.json_name);
            let required = if annotations.markers.contains(markers::OPTIONAL) {
                false
            } else if annotations.markers.contains(markers::REQUIRED) {
                if in_group {
                    self.report(
                        ctx.ident,
                        member,
                        &BuildError::RequiredInGroup {
                            field: field.json_name.clone(),
                        },
                    );
                }
                !in_group
            } else if in_group {
                false
            } else {
                !ctx.package_optional && !field.omit_empty
            };

            if required {
                node.required.insert(field.json_name.clone());
            }
            node.properties.insert(field.json_name.clone(), prop);
            present.insert(field.json_name.as_str());
        }

        for members in &groups.exactly_one {
            if let Some(rule) = group_rule(members, &present, "==", "exactly one of the fields in", "must be set") {
                node.validations.push(rule);
            }
        }
        for members in &groups.at_most_one {
            if let Some(rule) = group_rule(members, &present, "<=", "at most one of the fields in", "may be set") {
                node.validations.push(rule);
            }
        }

        Ok(node)
    }

    /// Read and check the one-of groups of a composite.
    fn collect_groups(
        &mut self,
        ctx: &Context<'_>,
        fields: &[FieldInfo],
        type_markers: &MarkerSet,
    ) -> Groups {
        let names: HashSet<&str> = fields
            .iter()
            .filter(|f| f.json_name != "-")
            .map(|f| f.json_name.as_str())
            .collect();

        let mut groups = Groups::default();
        for (marker, exact) in [(markers::EXACTLY_ONE_OF, true), (markers::AT_MOST_ONE_OF, false)] {
            for value in type_markers.all(marker) {
                let Some(items) = value.single().and_then(|v| v.as_slice()) else {
                    continue;
                };
                let mut members = Vec::new();
                for item in items.iter().filter_map(|v| v.as_str()) {
                    let err = if item.contains('.') {
                        BuildError::NestedGroupMember {
                            member: item.to_string(),
                        }
                    } else if !names.contains(item) {
                        BuildError::UnknownGroupMember {
                            member: item.to_string(),
                        }
                    } else {
                        members.push(item.to_string());
                        continue;
                    };
                    self.report(ctx.ident, None, &err);
                }
                if exact {
                    groups.exactly_one.push(members);
                } else {
                    groups.at_most_one.push(members);
                }
            }
        }

        let exact: BTreeSet<&String> = groups.exactly_one.iter().flatten().collect();
        let at_most: BTreeSet<&String> = groups.at_most_one.iter().flatten().collect();
        let conflicts: Vec<String> = exact.intersection(&at_most).map(|s| s.to_string()).collect();
        for field in conflicts {
            self.report(
                ctx.ident,
                Some(field.as_str()),
                &BuildError::ConflictingGroups { field: field.clone() },
            );
            for group in groups.at_most_one.iter_mut() {
                group.retain(|m| *m != field);
            }
        }

        groups
    }
}

/// Validation rule for one group, over the members that survived gating.
fn group_rule(
    members: &[String],
    present: &BTreeSet<&str>,
    op: &str,
    lead: &str,
    tail: &str,
) -> Option<ValidationRule> {
    let live: Vec<&str> = members
        .iter()
        .map(String::as_str)
        .filter(|m| present.contains(m))
        .collect();
    if live.is_empty() {
        return None;
    }
    let checks: Vec<String> = live.iter().map(|m| format!("has(self.{})", m)).collect();
    Some(ValidationRule {
        rule: format!("[{}].filter(x,x==true).size() {} 1", checks.join(","), op),
        message: Some(format!("{} [{}] {}", lead, live.join(" "), tail)),
    })
}

fn shape_name(shape: &Shape) -> String {
    match shape {
        Shape::Primitive(p) => format!("{:?}", p).to_lowercase(),
        Shape::Array(_) => "array".to_string(),
        Shape::Map { .. } => "map".to_string(),
        Shape::Reference(ident) => ident.to_string(),
        Shape::Composite(_) => "struct".to_string(),
    }
}
