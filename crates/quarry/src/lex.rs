//! Hand-written lexer over a source buffer.
//!
//! Emits a one-token lookahead stream. Significant whitespace is handled
//! with a stack of indentation columns: closing an indentation level emits
//! one [`TokenKind::Unindent`] per level, and logical lines end with
//! [`TokenKind::Eol`]. Inside any `( [ {` nesting, newlines and indentation
//! produce no tokens at all.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{RunError, RunResult};
use crate::token::{Pos, Span, Token, TokenKind};

/// Longest accepted integer literal (digits after the optional sign); the
/// text of any literal this long still parses as an `i64`.
const MAX_INT_DIGITS: usize = 18;

pub(crate) struct Lexer<'a> {
    src: &'a str,
    filename: Arc<str>,
    pos: usize,
    /// Stack of open indentation columns; starts as `[0]`.
    indents: Vec<usize>,
    /// Open `( [ {` count. Nonzero suppresses EOL/indent handling.
    brackets: u32,
    /// Lookahead queue; also buffers runs of Unindent tokens.
    pending: VecDeque<Token>,
    /// True when the next scan must first process line indentation.
    at_line_start: bool,
    /// True when content has been emitted since the last EOL, so the end of
    /// the current line owes an EOL token.
    need_eol: bool,
    /// Set once the end-of-file EOL/Unindent flush has run.
    eof_flushed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, filename: Arc<str>) -> Self {
        Self {
            src,
            filename,
            pos: 0,
            indents: vec![0],
            brackets: 0,
            pending: VecDeque::new(),
            at_line_start: true,
            need_eol: false,
            eof_flushed: false,
        }
    }

    pub fn filename(&self) -> &Arc<str> {
        &self.filename
    }

    /// Number of open indentation levels, counting the base level. The
    /// parser compares this across a block header to require that a block
    /// body actually indented.
    pub fn indent_level(&self) -> usize {
        self.indents.len()
    }

    /// Returns the next token without consuming it.
    pub fn peek(&mut self) -> RunResult<&Token> {
        if self.pending.is_empty() {
            let tok = self.scan()?;
            self.pending.push_back(tok);
        }
        Ok(self.pending.front().expect("lookahead queue populated above"))
    }

    /// Consumes and returns the next token.
    pub fn next(&mut self) -> RunResult<Token> {
        if let Some(tok) = self.pending.pop_front() {
            return Ok(tok);
        }
        self.scan()
    }

    /// Looks past the current (identifier) token and any horizontal
    /// whitespace for a `=` that is not part of `==`. Used by the parser to
    /// disambiguate named call arguments from positional expressions.
    pub fn assign_follows(&mut self) -> RunResult<bool> {
        let after = {
            let tok = self.peek()?;
            if tok.kind != TokenKind::Ident {
                return Ok(false);
            }
            tok.span.end.offset()
        };
        let bytes = self.src.as_bytes();
        let mut i = after;
        while matches!(bytes.get(i), Some(b' ' | b'\t')) {
            i += 1;
        }
        Ok(bytes.get(i) == Some(&b'=') && bytes.get(i + 1) != Some(&b'='))
    }

    fn error(&self, message: impl Into<String>) -> RunError {
        let here = Span::new(Pos(self.pos as u32), Pos(self.pos as u32));
        RunError::lexical(message).with_frame(&self.filename, here)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn current(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.current()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn token(&mut self, kind: TokenKind, value: impl Into<String>, start: usize) -> Token {
        if !matches!(kind, TokenKind::Eol | TokenKind::Unindent | TokenKind::Eof) {
            self.need_eol = true;
        }
        Token::new(kind, value, Span::new(Pos(start as u32), Pos(self.pos as u32)))
    }

    /// Produces exactly one token; extra Unindents are buffered in
    /// `pending` (only called when the queue is empty).
    fn scan(&mut self) -> RunResult<Token> {
        loop {
            if self.at_line_start && self.brackets == 0 {
                if let Some(tok) = self.handle_indent()? {
                    return Ok(tok);
                }
                if let Some(tok) = self.pending.pop_front() {
                    return Ok(tok);
                }
                continue;
            }

            // Skip horizontal whitespace between tokens. Tabs are only an
            // error in indentation, which handle_indent checks.
            while matches!(self.current(), Some(' ' | '\t')) {
                self.pos += 1;
            }

            let start = self.pos;
            let Some(c) = self.current() else {
                return Ok(self.flush_eof());
            };

            match c {
                '\n' => {
                    self.pos += 1;
                    if self.brackets > 0 {
                        continue;
                    }
                    self.at_line_start = true;
                    if self.need_eol {
                        self.need_eol = false;
                        return Ok(Token::new(
                            TokenKind::Eol,
                            "",
                            Span::new(Pos(start as u32), Pos(self.pos as u32)),
                        ));
                    }
                }
                '#' => {
                    while !matches!(self.current(), None | Some('\n')) {
                        self.bump();
                    }
                }
                '(' | '[' | '{' => {
                    self.pos += 1;
                    self.brackets += 1;
                    return Ok(self.token(TokenKind::Char(c), c, start));
                }
                ')' | ']' | '}' => {
                    self.pos += 1;
                    self.brackets = self.brackets.saturating_sub(1);
                    return Ok(self.token(TokenKind::Char(c), c, start));
                }
                ':' | ',' | '.' | '|' | '&' | '*' => {
                    self.pos += 1;
                    return Ok(self.token(TokenKind::Char(c), c, start));
                }
                '"' | '\'' => return self.lex_string(start, false, false),
                '=' => {
                    self.pos += 1;
                    if self.current() == Some('=') {
                        self.pos += 1;
                        return Ok(self.token(TokenKind::Operator, "==", start));
                    }
                    return Ok(self.token(TokenKind::Operator, "=", start));
                }
                '!' => {
                    self.pos += 1;
                    if self.current() == Some('=') {
                        self.pos += 1;
                        return Ok(self.token(TokenKind::Operator, "!=", start));
                    }
                    return Err(self.error("Unknown symbol '!'"));
                }
                '<' | '>' => {
                    self.pos += 1;
                    if self.current() == Some('=') {
                        self.pos += 1;
                        let text = if c == '<' { "<=" } else { ">=" };
                        return Ok(self.token(TokenKind::Operator, text, start));
                    }
                    return Ok(self.token(TokenKind::Operator, c, start));
                }
                '+' | '%' => {
                    self.pos += 1;
                    return Ok(self.token(TokenKind::Operator, c, start));
                }
                '-' => {
                    self.pos += 1;
                    match self.current() {
                        // Unary minus is absorbed into an adjacent integer
                        // literal.
                        Some('0'..='9') => return self.lex_int(start),
                        Some('>') => {
                            self.pos += 1;
                            return Ok(self.token(TokenKind::Operator, "->", start));
                        }
                        _ => return Ok(self.token(TokenKind::Operator, "-", start)),
                    }
                }
                '0'..='9' => {
                    self.pos += 1;
                    return self.lex_int(start);
                }
                'r' | 'f' if matches!(self.rest().chars().nth(1), Some('"' | '\'')) => {
                    self.pos += 1;
                    return self.lex_string(start, c == 'r', c == 'f');
                }
                c if c.is_alphabetic() || c == '_' => return Ok(self.lex_ident(start)),
                other => return Err(self.error(format!("Unknown symbol '{other}'"))),
            }
        }
    }

    /// Measures the indentation of the line beginning at `self.pos`,
    /// adjusting the indent stack. Blank and comment-only lines are
    /// skipped without touching the stack. Returns the first queued token
    /// if the adjustment produced any.
    fn handle_indent(&mut self) -> RunResult<Option<Token>> {
        loop {
            let line_start = self.pos;
            let mut indent = 0usize;
            loop {
                match self.current() {
                    Some(' ') => {
                        indent += 1;
                        self.pos += 1;
                    }
                    Some('\t') => return Err(self.error("Tabs are not permitted for indentation")),
                    _ => break,
                }
            }
            match self.current() {
                // Blank line: no effect on the stack.
                Some('\n') => {
                    self.pos += 1;
                    continue;
                }
                // Comment-only line: skip it entirely.
                Some('#') => {
                    while !matches!(self.current(), None | Some('\n')) {
                        self.bump();
                    }
                    continue;
                }
                // EOF handled by the main scan loop.
                None => {
                    self.pos = line_start;
                    self.at_line_start = false;
                    return Ok(None);
                }
                Some(_) => {
                    self.at_line_start = false;
                    let top = *self.indents.last().expect("indent stack is never empty");
                    if indent > top {
                        self.indents.push(indent);
                    } else if indent < top {
                        let here = Span::new(Pos(self.pos as u32), Pos(self.pos as u32));
                        while *self.indents.last().expect("indent stack is never empty") > indent {
                            self.indents.pop();
                            self.pending.push_back(Token::new(TokenKind::Unindent, "", here));
                        }
                        if *self.indents.last().expect("indent stack is never empty") != indent {
                            return Err(self.error("Unexpected indent"));
                        }
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// At end of input: emit a final EOL if a line is open, then one
    /// Unindent per remaining indentation level, then EOF forever.
    fn flush_eof(&mut self) -> Token {
        let here = Span::new(Pos(self.pos as u32), Pos(self.pos as u32));
        if !self.eof_flushed {
            self.eof_flushed = true;
            if self.need_eol {
                self.need_eol = false;
                while self.indents.len() > 1 {
                    self.indents.pop();
                    self.pending.push_back(Token::new(TokenKind::Unindent, "", here));
                }
                self.pending.push_back(Token::new(TokenKind::Eof, "", here));
                return Token::new(TokenKind::Eol, "", here);
            }
            if self.indents.len() > 1 {
                while self.indents.len() > 2 {
                    self.indents.pop();
                    self.pending.push_back(Token::new(TokenKind::Unindent, "", here));
                }
                self.indents.pop();
                self.pending.push_back(Token::new(TokenKind::Eof, "", here));
                return Token::new(TokenKind::Unindent, "", here);
            }
        }
        Token::new(TokenKind::Eof, "", here)
    }

    fn lex_ident(&mut self, start: usize) -> Token {
        while let Some(c) = self.current() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let text = &self.src[start..self.pos];
        self.token(TokenKind::Ident, text, start)
    }

    /// Continues an integer literal; the sign and first digit are already
    /// consumed.
    fn lex_int(&mut self, start: usize) -> RunResult<Token> {
        while matches!(self.current(), Some('0'..='9')) {
            self.pos += 1;
        }
        let text = &self.src[start..self.pos];
        let digits = text.strip_prefix('-').unwrap_or(text).len();
        if digits > MAX_INT_DIGITS {
            return Err(self.error(format!("Invalid integer literal {text}: too long")));
        }
        Ok(self.token(TokenKind::Int, text, start))
    }

    /// Lexes a string literal. `self.pos` is at the opening quote; any
    /// `r`/`f` prefix has been consumed.
    ///
    /// The token value is normalized: surrounded by a single `"` pair
    /// (prefixed with `f` for f-strings), with escapes already applied for
    /// non-raw strings.
    fn lex_string(&mut self, start: usize, raw: bool, fstring: bool) -> RunResult<Token> {
        let quote = self.bump().expect("caller saw the opening quote");
        let triple = self.rest().starts_with([quote, quote].iter().collect::<String>().as_str());
        if triple {
            self.pos += 2;
        }
        let mut content = String::new();
        loop {
            let Some(c) = self.current() else {
                return Err(self.error("Unterminated string literal"));
            };
            if c == quote {
                if triple {
                    let close: String = [quote, quote, quote].iter().collect();
                    if self.rest().starts_with(close.as_str()) {
                        self.pos += 3;
                        break;
                    }
                    self.pos += 1;
                    content.push(c);
                    continue;
                }
                self.pos += 1;
                break;
            }
            if c == '\n' && !triple {
                return Err(self.error("Unterminated string literal"));
            }
            if c == '\\' && !raw {
                self.pos += 1;
                match self.current() {
                    Some('n') => {
                        self.pos += 1;
                        content.push('\n');
                    }
                    Some('\\') => {
                        self.pos += 1;
                        content.push('\\');
                    }
                    Some('\'') => {
                        self.pos += 1;
                        content.push('\'');
                    }
                    Some('"') => {
                        self.pos += 1;
                        content.push('"');
                    }
                    // Unknown escapes keep their backslash.
                    Some(other) => {
                        self.pos += other.len_utf8();
                        content.push('\\');
                        content.push(other);
                    }
                    None => return Err(self.error("Unterminated string literal")),
                }
                continue;
            }
            self.pos += c.len_utf8();
            content.push(c);
        }
        let value = if fstring {
            format!("f\"{content}\"")
        } else {
            format!("\"{content}\"")
        };
        Ok(self.token(TokenKind::Str, value, start))
    }
}
