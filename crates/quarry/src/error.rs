//! Error model: crate-internal failures with position frames, and the
//! public error type surfaced through the embedding API.
//!
//! Every failure originates as a [`RunError`] somewhere inside the lexer,
//! parser or evaluator. As control flow exits statement and call boundaries
//! the evaluator annotates the error with `(filename, span)` frames; at the
//! embedding API boundary the frames are resolved against retained source
//! text into line/column [`StackFrame`]s on the public [`Error`].

use std::fmt;
use std::sync::Arc;

use strum::{Display, EnumString, IntoStaticStr};

use crate::token::{Pos, Span};

/// Result type alias used end-to-end inside the interpreter.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// The closed set of error kinds surfaced to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    /// Indentation, unknown symbols, bad literals.
    Lexical,
    /// Unexpected tokens, malformed constructs.
    Syntax,
    /// Undefined names, reserved-keyword targets, repeated arguments.
    Name,
    /// Wrong type for an operator, argument, index, unpack or iterable.
    Type,
    /// Out-of-range values, empty required globs, failed assertions.
    Value,
    /// Unknown or ill-typed configuration keys.
    Config,
    /// Build-domain failures: duplicate targets, `fail()`, calling a
    /// non-callable.
    Domain,
}

/// One source position on an error's frame stack.
#[derive(Debug, Clone)]
pub(crate) struct FrameRec {
    pub filename: Arc<str>,
    pub span: Span,
}

/// A failure inside a single lex/parse/evaluate pass.
///
/// The message is the innermost description; `frames` grows from innermost
/// to outermost as the error bubbles out of the evaluator.
#[derive(Debug, Clone)]
pub(crate) struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    pub frames: Vec<FrameRec>,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            frames: Vec::new(),
        }
    }

    pub fn lexical(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lexical, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, message)
    }

    pub fn typ(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn domain(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Domain, message)
    }

    /// Annotates the error with a stack frame, skipping exact duplicates of
    /// the innermost frame so tight expression nesting does not repeat
    /// itself in diagnostics.
    #[must_use]
    pub fn with_frame(mut self, filename: &Arc<str>, span: Span) -> Self {
        let duplicate = self
            .frames
            .last()
            .is_some_and(|f| f.span == span && f.filename == *filename);
        if !duplicate {
            self.frames.push(FrameRec {
                filename: Arc::clone(filename),
                span,
            });
        }
        self
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

/// A resolved source position in a rendered error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub filename: String,
    /// 1-based line number.
    pub line: u32,
    /// 1-based column number.
    pub column: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.column)
    }
}

/// The public error type returned by the embedding API.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    frames: Vec<StackFrame>,
    /// The offending source line, attached when the innermost frame lies in
    /// a file registered through `load_builtins`.
    snippet: Option<String>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: String, frames: Vec<StackFrame>, snippet: Option<String>) -> Self {
        Self {
            kind,
            message,
            frames,
            snippet,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Stack frames from innermost to outermost.
    #[must_use]
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    #[must_use]
    pub fn snippet(&self) -> Option<&str> {
        self.snippet.as_deref()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)?;
        for frame in &self.frames {
            write!(f, "\n    at {frame}")?;
        }
        if let Some(snippet) = &self.snippet {
            write!(f, "\n    {snippet}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Resolves a byte offset to a 1-based (line, column) pair.
///
/// Columns count bytes from the line start; positions beyond the end of the
/// source saturate to its last line.
pub(crate) fn line_column(source: &str, pos: Pos) -> (u32, u32) {
    let offset = pos.offset().min(source.len());
    let mut line = 1u32;
    let mut line_start = 0usize;
    for (i, b) in source.bytes().enumerate() {
        if i >= offset {
            break;
        }
        if b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    (line, (offset - line_start) as u32 + 1)
}

/// Extracts the full text of the line containing `pos`.
pub(crate) fn source_line(source: &str, pos: Pos) -> String {
    let offset = pos.offset().min(source.len());
    let start = source[..offset].rfind('\n').map_or(0, |i| i + 1);
    let end = source[offset..].find('\n').map_or(source.len(), |i| offset + i);
    source[start..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_column_resolution() {
        let src = "a = 1\nbb = 2\n";
        assert_eq!(line_column(src, Pos(0)), (1, 1));
        assert_eq!(line_column(src, Pos(4)), (1, 5));
        assert_eq!(line_column(src, Pos(6)), (2, 1));
        assert_eq!(line_column(src, Pos(11)), (2, 6));
        // past the end saturates
        assert_eq!(line_column(src, Pos(100)), (3, 1));
    }

    #[test]
    fn source_line_extraction() {
        let src = "a = 1\nbb = 2\nc = 3";
        assert_eq!(source_line(src, Pos(7)), "bb = 2");
        assert_eq!(source_line(src, Pos(0)), "a = 1");
        assert_eq!(source_line(src, Pos(14)), "c = 3");
    }

    #[test]
    fn frames_deduplicate_consecutive_spans() {
        let file: Arc<str> = Arc::from("BUILD");
        let span = Span::new(Pos(1), Pos(5));
        let err = RunError::typ("bad operand")
            .with_frame(&file, span)
            .with_frame(&file, span)
            .with_frame(&file, Span::new(Pos(0), Pos(9)));
        assert_eq!(err.frames.len(), 2);
        assert_eq!(err.to_string(), "type error: bad operand");
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Lexical.to_string(), "lexical");
        assert_eq!(ErrorKind::Domain.to_string(), "domain");
    }
}
