//! Character scanner for annotation argument bodies.
//!
//! Offsets reported by the scanner are relative to the whole annotation line,
//! so errors can point at the offending token.

/// A scan failure at a specific line offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScanError {
    pub offset: usize,
    pub message: String,
}

impl ScanError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Separators that end a bare (unquoted) token.
fn is_separator(c: char) -> bool {
    matches!(c, ',' | ';' | '}')
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[derive(Debug, Clone)]
pub(crate) struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    base: usize,
}

impl<'a> Scanner<'a> {
    /// Scan `src`, which starts at byte `base` of the annotation line.
    pub fn new(src: &'a str, base: usize) -> Self {
        Self { src, pos: 0, base }
    }

    /// Offset of the cursor within the annotation line.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Next non-whitespace character, consuming the whitespace.
    pub fn peek_non_ws(&mut self) -> Option<char> {
        self.skip_ws();
        self.peek()
    }

    pub fn at_end(&mut self) -> bool {
        self.peek_non_ws().is_none()
    }

    /// Consume `expected` if it is the next non-whitespace character.
    pub fn eat(&mut self, expected: char) -> bool {
        if self.peek_non_ws() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Consume everything that is left.
    pub fn take_rest(&mut self) -> &'a str {
        let rest = self.rest();
        self.pos = self.src.len();
        rest
    }

    /// An argument name: a run of alphanumerics and underscores.
    pub fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| !is_ident_char(*c))
            .map_or(rest.len(), |(i, _)| i);
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    /// A bare token up to the next separator, without escape processing.
    pub fn bare_token(&mut self) -> &'a str {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|(_, c)| is_separator(*c))
            .map_or(rest.len(), |(i, _)| i);
        self.pos += len;
        rest[..len].trim_end()
    }

    /// A bare string up to the next unescaped separator.
    ///
    /// A backslash makes the following character literal.
    pub fn bare_string(&mut self) -> String {
        self.skip_ws();
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if is_separator(c) {
                break;
            }
            self.bump();
            if c == '\\' {
                if let Some(escaped) = self.bump() {
                    out.push(escaped);
                }
                continue;
            }
            out.push(c);
        }
        out.trim_end().to_string()
    }

    /// A quoted string: `"…"` or `'…'` with escapes, or a raw `` `…` ``.
    ///
    /// Returns `Ok(None)` when the next token is not quoted.
    pub fn quoted(&mut self) -> Result<Option<String>, ScanError> {
        let quote = match self.peek_non_ws() {
            Some(q @ ('"' | '\'' | '`')) => q,
            _ => return Ok(None),
        };
        let start = self.offset();
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(ScanError::new(start, "unterminated quoted string")),
                Some(c) if c == quote => return Ok(Some(out)),
                Some('\\') if quote != '`' => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(other) => out.push(other),
                    None => return Err(ScanError::new(start, "unterminated quoted string")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    /// Skip one value without interpreting it, stopping before the next
    /// top-level `,` or `;`. Quotes and braces are honoured.
    pub fn skip_value(&mut self) -> Option<char> {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '"' | '\'' | '`' => {
                    if self.quoted().is_err() {
                        self.take_rest();
                    }
                    continue;
                }
                '{' => depth += 1,
                '}' if depth > 0 => depth -= 1,
                ',' | ';' if depth == 0 => return Some(c),
                _ => {}
            }
            self.bump();
        }
        None
    }
}
