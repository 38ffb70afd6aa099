//! Marker definitions, the definition registry and annotation extraction.
//!
//! An annotation line looks like `+name:sub=value` or
//! `+name:first=value,second=value`. The registry maps `(name, target)` to the
//! [`Definition`] that says how to read the text after `=`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use crate::argument::{parse_value, ArgKind, ArgValue, ArgumentSpec};
use crate::error::{MarkerError, MarkerErrors, RegistryError};
use crate::scanner::{ScanError, Scanner};
use crate::types::TargetKind;

static ANNOTATION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[A-Za-z0-9:]+(=.*)?$").expect("valid annotation regex"));

static MARKER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+(:[A-Za-z0-9]+)*$").expect("valid name regex"));

/// Default numeric apply priority.
pub const DEFAULT_PRIORITY: u16 = 10;

/// When a marker is applied relative to others on the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOrder {
    /// Applied before every marker without this flag.
    pub first: bool,
    /// Lower runs earlier.
    pub priority: u16,
}

impl Default for ApplyOrder {
    fn default() -> Self {
        Self {
            first: false,
            priority: DEFAULT_PRIORITY,
        }
    }
}

/// How the text after `=` is structured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionShape {
    /// No arguments: `+name`.
    Flag,
    /// A single bare value: `+name=value`.
    Anonymous(ArgumentSpec),
    /// Named arguments: `+name:first=value,second=value`.
    Record(BTreeMap<String, ArgumentSpec>),
}

/// Expected shape of one marker at one target kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub target: TargetKind,
    pub shape: DefinitionShape,
    /// Fail when a mandatory record argument is never supplied.
    pub strict: bool,
    pub order: ApplyOrder,
}

impl Definition {
    fn with_shape(name: &str, target: TargetKind, shape: DefinitionShape) -> Self {
        Self {
            name: name.to_string(),
            target,
            shape,
            strict: false,
            order: ApplyOrder::default(),
        }
    }

    pub fn flag(name: &str, target: TargetKind) -> Self {
        Self::with_shape(name, target, DefinitionShape::Flag)
    }

    pub fn anonymous(name: &str, target: TargetKind, spec: ArgumentSpec) -> Self {
        Self::with_shape(name, target, DefinitionShape::Anonymous(spec))
    }

    pub fn record<'a, I>(name: &str, target: TargetKind, fields: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, ArgumentSpec)>,
    {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        Self::with_shape(name, target, DefinitionShape::Record(fields))
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn apply_first(mut self) -> Self {
        self.order.first = true;
        self
    }

    pub fn priority(mut self, priority: u16) -> Self {
        self.order.priority = priority;
        self
    }

    /// Parse one annotation line against this definition.
    ///
    /// Every problem in the line is reported, each tied to its offset.
    pub fn parse(&self, line: &str) -> Result<MarkerValue, MarkerErrors> {
        let line = line.trim();
        let parts = split_marker(line).ok_or_else(|| {
            MarkerErrors(vec![MarkerError {
                marker: line.to_string(),
                offset: 0,
                message: "annotations must start with '+'".to_string(),
            }])
        })?;

        // A record matched through its reduced name: the trailing segment is
        // the first argument's name, so the body starts at that segment.
        let (body, base) = match &self.shape {
            DefinitionShape::Record(_) if parts.full != self.name => {
                let start = 1 + self.name.len() + 1;
                (line.get(start..).unwrap_or(""), start)
            }
            _ => (parts.body, parts.body_offset),
        };

        let mut sc = Scanner::new(body, base);
        let mut errors = Vec::new();

        // Only records take an argument name in the marker name itself.
        if !matches!(self.shape, DefinitionShape::Record(_)) && parts.full != self.name {
            let extra = parts.full.get(self.name.len() + 1..).unwrap_or(parts.full);
            errors.push(ScanError::new(
                1 + self.name.len() + 1,
                format!("unexpected argument \"{}\"", extra),
            ));
        }

        let args = match &self.shape {
            DefinitionShape::Flag => {
                if !sc.at_end() {
                    errors.push(ScanError::new(sc.offset(), "marker takes no arguments"));
                }
                MarkerArgs::Flag
            }
            DefinitionShape::Anonymous(spec) => parse_anonymous(spec, &mut sc, &mut errors),
            DefinitionShape::Record(fields) => {
                MarkerArgs::Record(self.parse_record(fields, &mut sc, line.len(), &mut errors))
            }
        };

        if errors.is_empty() {
            Ok(MarkerValue {
                name: self.name.clone(),
                target: self.target,
                args,
                order: self.order,
            })
        } else {
            Err(MarkerErrors(
                errors
                    .into_iter()
                    .map(|e| MarkerError {
                        marker: line.to_string(),
                        offset: e.offset,
                        message: e.message,
                    })
                    .collect(),
            ))
        }
    }

    fn parse_record(
        &self,
        fields: &BTreeMap<String, ArgumentSpec>,
        sc: &mut Scanner<'_>,
        line_len: usize,
        errors: &mut Vec<ScanError>,
    ) -> BTreeMap<String, ArgValue> {
        let mut values = BTreeMap::new();

        while !sc.at_end() {
            let start = sc.offset();
            let Some(name) = sc.ident() else {
                errors.push(ScanError::new(start, "expected argument name"));
                sc.skip_value();
                if sc.eat(',') {
                    continue;
                }
                break;
            };

            if !sc.eat('=') {
                errors.push(ScanError::new(
                    sc.offset(),
                    format!("expected '=' after argument \"{}\"", name),
                ));
                sc.skip_value();
                if sc.eat(',') {
                    continue;
                }
                break;
            }

            match fields.get(name) {
                None => {
                    errors.push(ScanError::new(start, format!("unknown argument \"{}\"", name)));
                    sc.skip_value();
                }
                Some(_) if values.contains_key(name) => {
                    errors.push(ScanError::new(start, format!("duplicate argument \"{}\"", name)));
                    sc.skip_value();
                }
                Some(spec) => {
                    if let Some(value) = parse_value(spec, sc, errors) {
                        values.insert(name.to_string(), value);
                    }
                }
            }

            if sc.at_end() {
                break;
            }
            if !sc.eat(',') {
                let found = sc.peek().unwrap_or(' ');
                errors.push(ScanError::new(
                    sc.offset(),
                    format!("expected ',' after argument \"{}\", got '{}'", name, found),
                ));
                sc.skip_value();
                if !sc.eat(',') {
                    break;
                }
            }
        }

        if self.strict {
            for (name, spec) in fields {
                if spec.is_mandatory() && !values.contains_key(name) {
                    errors.push(ScanError::new(
                        line_len,
                        format!("missing argument \"{}\"", name),
                    ));
                }
            }
        }

        values
    }
}

fn parse_anonymous(
    spec: &ArgumentSpec,
    sc: &mut Scanner<'_>,
    errors: &mut Vec<ScanError>,
) -> MarkerArgs {
    // `+flag` on a bool marker means true
    if spec.kind == ArgKind::Bool && sc.at_end() {
        return MarkerArgs::Single(ArgValue::Bool(true));
    }

    let value = parse_value(spec, sc, errors);
    if !sc.at_end() {
        errors.push(ScanError::new(
            sc.offset(),
            format!("unexpected trailing input {:?}", sc.rest().trim()),
        ));
    }
    match value {
        Some(v) => MarkerArgs::Single(v),
        None => MarkerArgs::Flag,
    }
}

/// The pieces of an annotation line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerParts<'a> {
    /// Full colon-joined name before `=`.
    pub full: &'a str,
    /// Name with the last segment removed (equal to `full` without `=`).
    pub reduced: &'a str,
    /// Text after `=`.
    pub body: &'a str,
    /// Offset of `body` within the line.
    pub body_offset: usize,
}

/// Split `+a:b:c=body` into its name forms and body.
pub fn split_marker(line: &str) -> Option<MarkerParts<'_>> {
    let raw = line.strip_prefix('+')?;
    let Some(eq) = raw.find('=') else {
        return Some(MarkerParts {
            full: raw,
            reduced: raw,
            body: "",
            body_offset: line.len(),
        });
    };
    let full = &raw[..eq];
    let reduced = full.rsplit_once(':').map_or(full, |(head, _)| head);
    Some(MarkerParts {
        full,
        reduced,
        body: &raw[eq + 1..],
        body_offset: eq + 2,
    })
}

/// Parsed arguments of one marker occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerArgs {
    Flag,
    Single(ArgValue),
    Record(BTreeMap<String, ArgValue>),
}

/// One annotation occurrence, parsed against its definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerValue {
    pub name: String,
    pub target: TargetKind,
    pub args: MarkerArgs,
    pub order: ApplyOrder,
}

impl MarkerValue {
    /// The value of an anonymous marker.
    pub fn single(&self) -> Option<&ArgValue> {
        match &self.args {
            MarkerArgs::Single(v) => Some(v),
            _ => None,
        }
    }

    /// A named argument of a record marker.
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        match &self.args {
            MarkerArgs::Record(values) => values.get(name),
            _ => None,
        }
    }

    /// Annotation text that parses back to this value.
    pub fn render(&self) -> String {
        match &self.args {
            MarkerArgs::Flag => format!("+{}", self.name),
            MarkerArgs::Single(v) => format!("+{}={}", self.name, v.render()),
            MarkerArgs::Record(values) => {
                let mut iter = values.iter();
                let Some((first, value)) = iter.next() else {
                    return format!("+{}", self.name);
                };
                let mut out = format!("+{}:{}={}", self.name, first, value.render());
                for (key, value) in iter {
                    out.push(',');
                    out.push_str(key);
                    out.push('=');
                    out.push_str(&value.render());
                }
                out
            }
        }
    }
}

/// Marker values for one declaration, in encounter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerSet {
    values: Vec<MarkerValue>,
}

impl MarkerSet {
    pub fn push(&mut self, value: MarkerValue) {
        self.values.push(value);
    }

    pub fn get(&self, name: &str) -> Option<&MarkerValue> {
        self.values.iter().find(|v| v.name == name)
    }

    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MarkerValue> + 'a {
        self.values.iter().filter(move |v| v.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MarkerValue> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Result of reading one comment block.
#[derive(Debug, Clone, Default)]
pub struct Annotations {
    pub markers: MarkerSet,
    /// Non-annotation lines joined with spaces.
    pub doc: String,
    pub errors: Vec<MarkerError>,
}

/// Whether a (comment-stripped) line is an annotation.
pub fn is_annotation(line: &str) -> bool {
    ANNOTATION_LINE.is_match(line)
}

fn strip_comment(line: &str) -> &str {
    let line = line.trim();
    line.strip_prefix("//").map_or(line, str::trim)
}

/// Known marker definitions, keyed by target kind and name.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    defs: HashMap<TargetKind, HashMap<String, Definition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Names may repeat across target kinds only.
    pub fn register(&mut self, def: Definition) -> Result<(), RegistryError> {
        if !MARKER_NAME.is_match(&def.name) {
            return Err(RegistryError::InvalidName { name: def.name });
        }
        let by_name = self.defs.entry(def.target).or_default();
        if by_name.contains_key(&def.name) {
            return Err(RegistryError::DuplicateDefinition {
                name: def.name,
                target: def.target,
            });
        }
        by_name.insert(def.name.clone(), def);
        Ok(())
    }

    /// Find the definition for an annotation line.
    ///
    /// The full name is tried first, so namespaced single-value markers
    /// (`+x:y:z=value`) win over a record `x:y` with argument `z`.
    pub fn lookup(&self, line: &str, target: TargetKind) -> Option<&Definition> {
        let parts = split_marker(line.trim())?;
        let by_name = self.defs.get(&target)?;
        by_name
            .get(parts.full)
            .or_else(|| by_name.get(parts.reduced))
    }

    /// Parse a line; `None` when no definition matches.
    pub fn parse(&self, line: &str, target: TargetKind) -> Option<Result<MarkerValue, MarkerErrors>> {
        self.lookup(line, target).map(|def| def.parse(line))
    }

    /// Read a comment block: parse registered annotations, keep the rest as
    /// documentation. Annotations nobody registered are ignored.
    pub fn collect(&self, comments: &[String], target: TargetKind) -> Annotations {
        let mut out = Annotations::default();
        let mut doc_lines = Vec::new();

        for raw in comments {
            let line = strip_comment(raw);
            if !is_annotation(line) {
                if !line.is_empty() {
                    doc_lines.push(line);
                }
                continue;
            }
            match self.parse(line, target) {
                Some(Ok(value)) => out.markers.push(value),
                Some(Err(MarkerErrors(errs))) => out.errors.extend(errs),
                None => tracing::trace!(annotation = line, %target, "ignoring unregistered annotation"),
            }
        }

        out.doc = doc_lines.join(" ");
        out
    }

    /// Names registered for a target kind.
    pub fn names(&self, target: TargetKind) -> BTreeSet<&str> {
        self.defs
            .get(&target)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}
