//! String templates for flags and environment values.
//!
//! A pattern is literal text with `%{name}` variable references; `%%` escapes
//! a literal percent. Patterns are compiled once into a [`Template`] and
//! expanded many times against different scopes.

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::{Scope, VarError};

/// Error from compiling a template pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason} at position {position} while parsing '{pattern}'")]
pub struct TemplateError {
    /// The pattern that failed to compile.
    pub pattern: String,
    /// Byte offset the parser stopped at.
    pub position: usize,
    /// What the parser expected.
    pub reason: &'static str,
}

/// One piece of a [`Template`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Literal text, emitted as-is.
    Literal(CompactString),
    /// A `%{name}` reference, resolved against the scope at expansion time.
    /// The name may carry a dotted path into structure fields.
    Variable(CompactString),
}

/// A compiled flag or environment value pattern.
///
/// Templates compare equal by chunk list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    chunks: SmallVec<[Chunk; 2]>,
}

impl Template {
    /// Compile `pattern` into a chunk list.
    ///
    /// # Errors
    ///
    /// * If a `%` is not followed by `{` or another `%`.
    /// * If a variable reference is empty or unterminated.
    pub fn parse(pattern: &str) -> Result<Template, TemplateError> {
        let mut parser = Parser {
            pattern,
            current: 0,
            chunks: SmallVec::new(),
        };
        while parser.current < parser.pattern.len() {
            if parser.at_variable_start() {
                parser.parse_variable_chunk()?;
            } else {
                parser.parse_literal_chunk();
            }
        }
        Ok(Template {
            chunks: parser.chunks,
        })
    }

    /// The compiled chunks, in order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Expand this template to a single string.
    pub fn expand(&self, scope: &Scope<'_>) -> Result<String, VarError> {
        let mut out = String::new();
        self.expand_into(scope, &mut out)?;
        Ok(out)
    }

    /// Expand this template, appending to `out`.
    ///
    /// # Errors
    ///
    /// * [`VarError`] if a referenced variable is unavailable or not
    ///   representable as a string.
    pub fn expand_into(&self, scope: &Scope<'_>, out: &mut String) -> Result<(), VarError> {
        for chunk in &self.chunks {
            match chunk {
                Chunk::Literal(text) => out.push_str(text),
                Chunk::Variable(name) => out.push_str(&scope.get_string(name)?),
            }
        }
        Ok(())
    }
}

struct Parser<'p> {
    pattern: &'p str,
    current: usize,
    chunks: SmallVec<[Chunk; 2]>,
}

impl Parser<'_> {
    /// A variable reference starts at `%` unless doubled to `%%`.
    fn at_variable_start(&self) -> bool {
        let bytes = self.pattern.as_bytes();
        bytes[self.current] == b'%' && bytes.get(self.current + 1).copied() != Some(b'%')
    }

    fn parse_literal_chunk(&mut self) {
        let bytes = self.pattern.as_bytes();
        let mut start = self.current;
        // A literal starting with '%' is the '%%' escape: keep the second
        // percent, skip the first.
        if bytes[self.current] == b'%' {
            self.current += 1;
            start = self.current;
        }
        // The first char belongs to this literal; scan for the next '%'
        // after it, stepping a full char so multibyte text stays intact.
        let first = self.pattern[self.current..]
            .chars()
            .next()
            .map_or(1, char::len_utf8);
        let end = self.pattern[self.current + first..]
            .find('%')
            .map(|offset| self.current + first + offset)
            .unwrap_or(self.pattern.len());
        self.chunks
            .push(Chunk::Literal(CompactString::new(&self.pattern[start..end])));
        self.current = end;
    }

    fn parse_variable_chunk(&mut self) -> Result<(), TemplateError> {
        self.current += 1;
        if self.pattern.as_bytes().get(self.current).copied() != Some(b'{') {
            return Err(self.abort("expected '{'"));
        }
        self.current += 1;
        match self.pattern.as_bytes().get(self.current).copied() {
            None | Some(b'}') => return Err(self.abort("expected variable name")),
            Some(_) => {}
        }
        let Some(end) = self.pattern[self.current..]
            .find('}')
            .map(|offset| self.current + offset)
        else {
            return Err(self.abort("expected '}'"));
        };
        self.chunks.push(Chunk::Variable(CompactString::new(
            &self.pattern[self.current..end],
        )));
        self.current = end + 1;
        Ok(())
    }

    fn abort(&self, reason: &'static str) -> TemplateError {
        TemplateError {
            pattern: self.pattern.to_string(),
            position: self.current,
            reason,
        }
    }
}
