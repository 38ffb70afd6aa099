//! Feature gates: the enabled-gate map, expression validation and evaluation.
//!
//! Expressions combine gate names with `&`, `|` and parentheses. `&` binds
//! tighter than `|`, so `a&b|c` reads as `(a&b)|c`. An empty expression means
//! "not gated" and is always true.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::GateError;

/// Gate name → enabled. Names missing from the map are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureGateMap {
    gates: BTreeMap<String, bool>,
}

impl FeatureGateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `gate1=true,gate2=false`.
    ///
    /// In strict mode malformed pairs and non-boolean values are errors;
    /// otherwise malformed pairs are skipped and odd values count as disabled.
    pub fn parse(text: &str, strict: bool) -> Result<Self, GateError> {
        let mut map = Self::new();
        for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((name, value)) = pair.split_once('=') else {
                if strict {
                    return Err(GateError::MalformedPair {
                        pair: pair.to_string(),
                    });
                }
                tracing::warn!(pair, "skipping malformed feature gate setting");
                continue;
            };
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() {
                if strict {
                    return Err(GateError::MalformedPair {
                        pair: pair.to_string(),
                    });
                }
                continue;
            }
            let enabled = match value {
                "true" => true,
                "false" => false,
                other => {
                    if strict {
                        return Err(GateError::InvalidValue {
                            gate: name.to_string(),
                            value: other.to_string(),
                        });
                    }
                    tracing::warn!(gate = name, value = other, "treating feature gate as disabled");
                    false
                }
            };
            map.set(name, enabled);
        }
        Ok(map)
    }

    pub fn set(&mut self, name: impl Into<String>, enabled: bool) {
        self.gates.insert(name.into(), enabled);
    }

    pub fn with(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.set(name, enabled);
        self
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.gates.get(name).copied().unwrap_or(false)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.gates.keys().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<(S, bool)> for FeatureGateMap {
    fn from_iter<I: IntoIterator<Item = (S, bool)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, enabled) in iter {
            map.set(name, enabled);
        }
        map
    }
}

fn is_gate_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Gate names mentioned in an expression.
pub fn gate_names(expr: &str) -> BTreeSet<String> {
    expr.split(['&', '|', '(', ')'])
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "true" && *s != "false")
        .map(String::from)
        .collect()
}

/// Check an expression before it is evaluated.
///
/// With `known` set and `strict` on, every gate name must be known;
/// unknown names are ignored otherwise.
pub fn validate(
    expr: &str,
    known: Option<&BTreeSet<String>>,
    strict: bool,
) -> Result<(), GateError> {
    let compact: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Ok(());
    }

    let mut depth = 0usize;
    for (offset, c) in expr.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| GateError::UnbalancedParentheses {
                    expr: expr.to_string(),
                })?
            }
            '&' | '|' => {}
            c if is_gate_char(c) || c.is_whitespace() => {}
            ch => {
                return Err(GateError::InvalidCharacter {
                    expr: expr.to_string(),
                    ch,
                    offset,
                })
            }
        }
    }
    if depth != 0 {
        return Err(GateError::UnbalancedParentheses {
            expr: expr.to_string(),
        });
    }

    check_operands(&compact, expr)?;

    if strict {
        if let Some(known) = known {
            if let Some(gate) = gate_names(expr).into_iter().find(|g| !known.contains(g)) {
                return Err(GateError::UnknownGate {
                    expr: expr.to_string(),
                    gate,
                });
            }
        }
    }
    Ok(())
}

/// Every operator needs an operand on both sides, and groups can't be empty.
fn check_operands(compact: &str, expr: &str) -> Result<(), GateError> {
    let empty = || GateError::EmptyOperand {
        expr: expr.to_string(),
    };
    let mut prev: Option<char> = None;
    for c in compact.chars() {
        let prev_is_open = matches!(prev, None | Some('(' | '&' | '|'));
        match c {
            '&' | '|' | ')' if prev_is_open => return Err(empty()),
            '(' if matches!(prev, Some(p) if is_gate_char(p) || p == ')') => return Err(empty()),
            c if is_gate_char(c) && prev == Some(')') => return Err(empty()),
            _ => {}
        }
        prev = Some(c);
    }
    if matches!(prev, Some('&' | '|')) {
        return Err(empty());
    }
    Ok(())
}

/// Evaluate an expression against the enabled gates.
///
/// Innermost parenthesised groups are replaced by their `true`/`false`
/// result until none remain; the flat remainder is then an OR of ANDs.
pub fn evaluate(expr: &str, gates: &FeatureGateMap) -> Result<bool, GateError> {
    let mut flat: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if flat.is_empty() {
        return Ok(true);
    }

    while let Some(close) = flat.find(')') {
        let open = flat[..close]
            .rfind('(')
            .ok_or_else(|| GateError::UnbalancedParentheses {
                expr: expr.to_string(),
            })?;
        let value = evaluate_flat(&flat[open + 1..close], gates);
        flat.replace_range(open..=close, if value { "true" } else { "false" });
    }
    if flat.contains('(') {
        return Err(GateError::UnbalancedParentheses {
            expr: expr.to_string(),
        });
    }

    Ok(evaluate_flat(&flat, gates))
}

fn evaluate_flat(expr: &str, gates: &FeatureGateMap) -> bool {
    expr.split('|')
        .any(|conj| conj.split('&').all(|term| evaluate_term(term, gates)))
}

fn evaluate_term(term: &str, gates: &FeatureGateMap) -> bool {
    match term {
        "true" => true,
        "false" => false,
        name => gates.is_enabled(name),
    }
}
