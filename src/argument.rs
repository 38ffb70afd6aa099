//! Argument shapes and the type-directed argument parser.
//!
//! An [`ArgumentSpec`] describes what a marker argument should look like; the
//! parser uses it to decide how to read the text that follows `=`.

use serde_json::Value;

use crate::scanner::{ScanError, Scanner};

/// The expected kind of an argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    String,
    Bool,
    /// Shape is guessed from the text.
    Any,
    Slice(Box<ArgumentSpec>),
    /// The rest of the annotation, verbatim.
    Raw,
}

/// Expected shape of one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentSpec {
    pub kind: ArgKind,
    pub optional: bool,
    /// Nullable argument; never mandatory.
    pub pointer: bool,
}

impl ArgumentSpec {
    pub fn new(kind: ArgKind) -> Self {
        Self {
            kind,
            optional: false,
            pointer: false,
        }
    }

    pub fn int() -> Self {
        Self::new(ArgKind::Int)
    }

    pub fn string() -> Self {
        Self::new(ArgKind::String)
    }

    pub fn bool() -> Self {
        Self::new(ArgKind::Bool)
    }

    pub fn any() -> Self {
        Self::new(ArgKind::Any)
    }

    pub fn raw() -> Self {
        Self::new(ArgKind::Raw)
    }

    pub fn slice_of(item: ArgumentSpec) -> Self {
        Self::new(ArgKind::Slice(Box::new(item)))
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn pointer(mut self) -> Self {
        self.pointer = true;
        self
    }

    /// Whether a strict definition must see this argument.
    pub fn is_mandatory(&self) -> bool {
        !self.optional && !self.pointer
    }
}

/// A parsed argument value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
    Int(i64),
    String(String),
    Bool(bool),
    Slice(Vec<ArgValue>),
    Raw(String),
}

impl ArgValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::String(s) | ArgValue::Raw(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_slice(&self) -> Option<&[ArgValue]> {
        match self {
            ArgValue::Slice(items) => Some(items),
            _ => None,
        }
    }

    /// JSON form, used for enum and example values.
    pub fn to_json(&self) -> Value {
        match self {
            ArgValue::Int(i) => Value::from(*i),
            ArgValue::String(s) | ArgValue::Raw(s) => Value::String(s.clone()),
            ArgValue::Bool(b) => Value::Bool(*b),
            ArgValue::Slice(items) => Value::Array(items.iter().map(ArgValue::to_json).collect()),
        }
    }

    /// Annotation text that parses back to this value.
    pub fn render(&self) -> String {
        match self {
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::String(s) => quote(s),
            ArgValue::Slice(items) => {
                let rendered: Vec<String> = items.iter().map(ArgValue::render).collect();
                format!("{{{}}}", rendered.join(","))
            }
            ArgValue::Raw(s) => s.clone(),
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Parse one value of the given shape. Errors are pushed onto `errors`;
/// `None` means nothing usable was read.
pub(crate) fn parse_value(
    spec: &ArgumentSpec,
    sc: &mut Scanner<'_>,
    errors: &mut Vec<ScanError>,
) -> Option<ArgValue> {
    match &spec.kind {
        ArgKind::Int => {
            sc.skip_ws();
            let start = sc.offset();
            let token = sc.bare_token();
            match token.parse::<i64>() {
                Ok(i) => Some(ArgValue::Int(i)),
                Err(_) => {
                    errors.push(ScanError::new(
                        start,
                        format!("expected integer, got {:?}", token),
                    ));
                    None
                }
            }
        }
        ArgKind::Bool => {
            sc.skip_ws();
            let start = sc.offset();
            match sc.bare_token() {
                "true" => Some(ArgValue::Bool(true)),
                "false" => Some(ArgValue::Bool(false)),
                other => {
                    errors.push(ScanError::new(
                        start,
                        format!("expected true or false, got {:?}", other),
                    ));
                    None
                }
            }
        }
        ArgKind::String => match sc.quoted() {
            Ok(Some(s)) => Some(ArgValue::String(s)),
            Ok(None) => Some(ArgValue::String(sc.bare_string())),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        ArgKind::Raw => Some(ArgValue::Raw(sc.take_rest().to_string())),
        ArgKind::Slice(item) => parse_slice(item, sc, errors),
        ArgKind::Any => {
            let guessed = guess_spec(sc, true);
            parse_value(&guessed, sc, errors)
        }
    }
}

/// One slice item. An `Any` item is guessed on its own: a `;` after it
/// separates items of this slice rather than starting a nested one.
fn parse_item(
    item: &ArgumentSpec,
    sc: &mut Scanner<'_>,
    errors: &mut Vec<ScanError>,
) -> Option<ArgValue> {
    if item.kind == ArgKind::Any {
        let guessed = guess_spec(sc, false);
        return parse_value(&guessed, sc, errors);
    }
    parse_value(item, sc, errors)
}

fn parse_slice(
    item: &ArgumentSpec,
    sc: &mut Scanner<'_>,
    errors: &mut Vec<ScanError>,
) -> Option<ArgValue> {
    let mut items = Vec::new();

    if sc.peek_non_ws() == Some('{') {
        let open = sc.offset();
        sc.bump();
        if sc.eat('}') {
            return Some(ArgValue::Slice(items));
        }
        loop {
            if let Some(value) = parse_item(item, sc, errors) {
                items.push(value);
            }
            match sc.peek_non_ws() {
                Some(',') => {
                    sc.bump();
                }
                Some('}') => {
                    sc.bump();
                    break;
                }
                None => {
                    errors.push(ScanError::new(open, "unterminated slice, expected '}'"));
                    break;
                }
                Some(other) => {
                    errors.push(ScanError::new(
                        sc.offset(),
                        format!("expected ',' or '}}' in slice, got '{}'", other),
                    ));
                    sc.skip_value();
                    if !sc.eat(',') {
                        break;
                    }
                }
            }
        }
        return Some(ArgValue::Slice(items));
    }

    // legacy form: a;b;c
    loop {
        if let Some(value) = parse_item(item, sc, errors) {
            items.push(value);
        }
        if !sc.eat(';') {
            break;
        }
    }
    Some(ArgValue::Slice(items))
}

/// Guess the shape of the value at the cursor without consuming it.
///
/// With `allow_slice`, a top-level `;` after the first item turns the guess
/// into a legacy slice of the first item's shape.
fn guess_spec(sc: &Scanner<'_>, allow_slice: bool) -> ArgumentSpec {
    let mut ahead = sc.clone();

    if allow_slice {
        let item = guess_spec(sc, false);
        if ahead.skip_value() == Some(';') {
            return ArgumentSpec::slice_of(item);
        }
        return item;
    }

    match ahead.peek_non_ws() {
        Some('"' | '\'' | '`') => return ArgumentSpec::string(),
        Some('{') => return ArgumentSpec::slice_of(ArgumentSpec::any()),
        _ => {}
    }

    let token = ahead.bare_token();
    match token {
        "true" | "false" => ArgumentSpec::bool(),
        _ if token.parse::<i64>().is_ok() => ArgumentSpec::int(),
        _ => ArgumentSpec::string(),
    }
}
