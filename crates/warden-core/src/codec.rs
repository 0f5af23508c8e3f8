//! Scanner and quoting helpers for the textual rule encodings.
//!
//! Quoted strings escape `"`, `\`, newline and carriage return, so every
//! encoded value fits on one line.

use crate::errors::SpecError;

pub(crate) struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn error(&self, reason: impl Into<String>) -> SpecError {
        SpecError {
            input: self.input.to_string(),
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub(crate) fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    pub(crate) fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    pub(crate) fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, c: char) -> Result<(), SpecError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    /// An unquoted token: everything up to whitespace or a delimiter.
    pub(crate) fn word(&mut self) -> Result<&'a str, SpecError> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || "()[]{}\"".contains(c))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a word"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    pub(crate) fn quoted(&mut self) -> Result<String, SpecError> {
        self.expect('"')?;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, other)) => out.push(other),
                    None => break,
                },
                _ => out.push(c),
            }
        }
        self.pos = self.input.len();
        Err(self.error("unterminated quoted string"))
    }

    pub(crate) fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.pos == self.input.len()
    }

    pub(crate) fn finish(&mut self) -> Result<(), SpecError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing characters"))
        }
    }
}

pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
