//! Recursive-descent parser producing the AST in [`crate::ast`].
//!
//! The grammar is owned by this hand-coded parser; there is no generated
//! table. Each production is one method. The parser consumes the lexer's
//! one-token lookahead stream and reports failures as syntax errors carrying
//! the offending span.

use std::sync::Arc;

use crate::ast::{
    ArgDef, Call, CallArgument, Comprehension, DictLit, ExprList, Expression, FString, FStringVar, FileInput,
    ForStatement, FuncDef, IdentAction, IdentExpr, IdentExprAction, IdentStatement, IfStatement, Lambda, OpExpression,
    Operator, SliceExpr, Statement, StatementKind, Ternary, Type, UnaryOp, ValueExpression, ValueKind,
};
use crate::error::{RunError, RunResult};
use crate::lex::Lexer;
use crate::token::{Pos, Span, Token, TokenKind, is_reserved_keyword};

/// Parses in-memory source into a file's statement list.
pub(crate) fn parse_data(src: &str, filename: &Arc<str>) -> RunResult<FileInput> {
    let mut parser = Parser {
        lex: Lexer::new(src, Arc::clone(filename)),
        last_span: Span::default(),
    };
    parser.parse_file_input()
}

struct Parser<'a> {
    lex: Lexer<'a>,
    /// Span of the most recently consumed token, used to close node spans.
    last_span: Span,
}

/// Identifier keywords that begin an expression rather than a statement.
fn starts_expression(name: &str) -> bool {
    matches!(name, "True" | "False" | "None" | "not" | "lambda")
}

impl Parser<'_> {
    fn peek(&mut self) -> RunResult<&Token> {
        self.lex.peek()
    }

    fn next(&mut self) -> RunResult<Token> {
        let tok = self.lex.next()?;
        self.last_span = tok.span;
        Ok(tok)
    }

    fn error(&self, span: Span, message: impl Into<String>) -> RunError {
        RunError::syntax(message).with_frame(self.lex.filename(), span)
    }

    fn start(&mut self) -> RunResult<Pos> {
        Ok(self.peek()?.span.start)
    }

    fn span_from(&self, start: Pos) -> Span {
        Span::new(start, self.last_span.end)
    }

    fn accept_char(&mut self, c: char) -> RunResult<bool> {
        if self.peek()?.is_char(c) {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn accept_ident(&mut self, name: &str) -> RunResult<bool> {
        if self.peek()?.is_ident(name) {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn accept_operator(&mut self, op: &str) -> RunResult<bool> {
        if self.peek()?.is_operator(op) {
            self.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect_char(&mut self, c: char) -> RunResult<()> {
        let tok = self.next()?;
        if !tok.is_char(c) {
            return Err(self.error(tok.span, format!("Expected '{c}', found {tok}")));
        }
        Ok(())
    }

    fn expect_operator(&mut self, op: &str) -> RunResult<()> {
        let tok = self.next()?;
        if !tok.is_operator(op) {
            return Err(self.error(tok.span, format!("Expected '{op}', found {tok}")));
        }
        Ok(())
    }

    fn expect_keyword(&mut self, name: &str) -> RunResult<()> {
        let tok = self.next()?;
        if !tok.is_ident(name) {
            return Err(self.error(tok.span, format!("Expected '{name}', found {tok}")));
        }
        Ok(())
    }

    fn expect_eol(&mut self) -> RunResult<()> {
        let tok = self.next()?;
        if !matches!(tok.kind, TokenKind::Eol | TokenKind::Eof) {
            return Err(self.error(tok.span, format!("Expected end of line, found {tok}")));
        }
        Ok(())
    }

    fn expect_ident(&mut self) -> RunResult<Token> {
        let tok = self.next()?;
        if tok.kind != TokenKind::Ident {
            return Err(self.error(tok.span, format!("Expected identifier, found {tok}")));
        }
        Ok(tok)
    }

    /// An identifier used as a binding target: reserved keywords are
    /// rejected with a name error.
    fn expect_target_ident(&mut self) -> RunResult<Token> {
        let tok = self.expect_ident()?;
        if is_reserved_keyword(&tok.value) {
            return Err(RunError::name(format!("cannot assign to reserved keyword '{}'", tok.value))
                .with_frame(self.lex.filename(), tok.span));
        }
        Ok(tok)
    }

    fn parse_file_input(&mut self) -> RunResult<FileInput> {
        let mut statements = Vec::new();
        loop {
            while matches!(self.peek()?.kind, TokenKind::Eol) {
                self.next()?;
            }
            if self.peek()?.kind == TokenKind::Eof {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
        }
    }

    fn parse_statement(&mut self) -> RunResult<Statement> {
        let start = self.start()?;
        let tok = self.peek()?.clone();
        let kind = match tok.kind {
            TokenKind::Ident => match tok.value.as_str() {
                "def" => self.parse_func_def()?,
                "if" => self.parse_if()?,
                "for" => self.parse_for()?,
                "return" => {
                    self.next()?;
                    let value = if matches!(self.peek()?.kind, TokenKind::Eol | TokenKind::Eof) {
                        None
                    } else {
                        Some(self.parse_expression()?)
                    };
                    self.expect_eol()?;
                    StatementKind::Return(value)
                }
                "raise" => {
                    self.next()?;
                    let expr = self.parse_expression()?;
                    self.expect_eol()?;
                    StatementKind::Raise(expr)
                }
                "assert" => {
                    self.next()?;
                    let condition = self.parse_expression()?;
                    let message = if self.accept_char(',')? {
                        Some(self.parse_expression()?)
                    } else {
                        None
                    };
                    self.expect_eol()?;
                    StatementKind::Assert { condition, message }
                }
                "pass" => {
                    self.next()?;
                    self.expect_eol()?;
                    StatementKind::Pass
                }
                "continue" => {
                    self.next()?;
                    self.expect_eol()?;
                    StatementKind::Continue
                }
                "break" => {
                    self.next()?;
                    self.expect_eol()?;
                    StatementKind::Break
                }
                name if is_reserved_keyword(name) && !starts_expression(name) => {
                    self.next()?;
                    if self.peek()?.is_operator("=") {
                        return Err(RunError::name(format!("cannot assign to reserved keyword '{name}'"))
                            .with_frame(self.lex.filename(), tok.span));
                    }
                    return Err(self.error(tok.span, format!("Unexpected keyword '{name}'")));
                }
                _ if starts_expression(&tok.value) => {
                    let expr = self.parse_expression()?;
                    self.expect_eol()?;
                    StatementKind::Literal(expr)
                }
                _ => {
                    let ident = self.next()?;
                    self.parse_ident_statement(ident)?
                }
            },
            _ => {
                let expr = self.parse_expression()?;
                self.expect_eol()?;
                StatementKind::Literal(expr)
            }
        };
        Ok(Statement {
            span: self.span_from(start),
            kind,
        })
    }

    /// A statement beginning with a non-keyword identifier: call, property
    /// action, assignment, augmented assignment, index assignment,
    /// destructuring unpack, or a bare expression.
    fn parse_ident_statement(&mut self, ident: Token) -> RunResult<StatementKind> {
        let name = ident.value.clone();
        let tok = self.peek()?.clone();
        let kind = match tok.kind {
            TokenKind::Char(',') => {
                let mut names = Vec::new();
                while self.accept_char(',')? {
                    names.push(self.expect_target_ident()?.value);
                }
                self.expect_operator("=")?;
                let expr = self.parse_expression()?;
                self.expect_eol()?;
                IdentAction::Unpack {
                    names,
                    expr: Box::new(expr),
                }
            }
            TokenKind::Char('[') => {
                self.next()?;
                let index = self.parse_expression()?;
                self.expect_char(']')?;
                if self.accept_operator("=")? {
                    let value = self.parse_expression()?;
                    self.expect_eol()?;
                    IdentAction::IndexAssign {
                        index: Box::new(index),
                        augmented: false,
                        value: Box::new(value),
                    }
                } else if self.accept_operator("+")? {
                    self.expect_operator("=")?;
                    let value = self.parse_expression()?;
                    self.expect_eol()?;
                    IdentAction::IndexAssign {
                        index: Box::new(index),
                        augmented: true,
                        value: Box::new(value),
                    }
                } else {
                    // Bare indexing expression used as a statement.
                    let mut val = ValueExpression::plain(
                        ident.span,
                        ValueKind::Ident(IdentExpr {
                            span: ident.span,
                            name,
                            actions: Vec::new(),
                        }),
                    );
                    val.slices.push(SliceExpr::Index(Box::new(index)));
                    self.continue_value_tail(&mut val)?;
                    let expr = self.finish_expression(ident.span.start, None, val, true)?;
                    self.expect_eol()?;
                    return Ok(StatementKind::Literal(expr));
                }
            }
            TokenKind::Char('.') => {
                self.next()?;
                let inner = self.expect_ident()?;
                let chain = self.parse_ident_expr_tail(inner)?;
                if !ident_expr_ends_in_call(&chain) {
                    return Err(self.error(tok.span, format!("Expected a call on '{name}'")));
                }
                self.expect_eol()?;
                IdentAction::Property(Box::new(chain))
            }
            TokenKind::Char('(') => {
                self.next()?;
                let call = self.parse_call_args()?;
                if matches!(self.peek()?.kind, TokenKind::Eol | TokenKind::Eof) {
                    self.expect_eol()?;
                    IdentAction::Call(call)
                } else {
                    // The call is the head of a larger bare expression.
                    let val = ValueExpression::plain(
                        ident.span,
                        ValueKind::Ident(IdentExpr {
                            span: ident.span,
                            name,
                            actions: vec![IdentExprAction::Call(call)],
                        }),
                    );
                    let expr = self.finish_expression(ident.span.start, None, val, true)?;
                    self.expect_eol()?;
                    return Ok(StatementKind::Literal(expr));
                }
            }
            TokenKind::Operator => match tok.value.as_str() {
                "=" => {
                    self.reject_reserved(&ident)?;
                    self.next()?;
                    let expr = self.parse_expression()?;
                    self.expect_eol()?;
                    IdentAction::Assign(expr)
                }
                "+" => {
                    self.next()?;
                    if self.accept_operator("=")? {
                        self.reject_reserved(&ident)?;
                        let expr = self.parse_expression()?;
                        self.expect_eol()?;
                        IdentAction::AugAssign(expr)
                    } else {
                        // `x + …` as a bare expression statement.
                        return self.bare_expression_from_op(ident, Operator::Add);
                    }
                }
                _ => return self.bare_expression_from_ident(ident),
            },
            _ => return self.bare_expression_from_ident(ident),
        };
        Ok(StatementKind::Ident(IdentStatement {
            name: ident.value,
            span: ident.span,
            action: kind,
        }))
    }

    fn reject_reserved(&self, ident: &Token) -> RunResult<()> {
        if is_reserved_keyword(&ident.value) {
            return Err(
                RunError::name(format!("cannot assign to reserved keyword '{}'", ident.value))
                    .with_frame(self.lex.filename(), ident.span),
            );
        }
        Ok(())
    }

    /// Finishes a bare expression statement whose head identifier was
    /// already consumed.
    fn bare_expression_from_ident(&mut self, ident: Token) -> RunResult<StatementKind> {
        let span = ident.span;
        let chain = self.parse_ident_expr_tail(ident)?;
        let mut val = ValueExpression::plain(span, ValueKind::Ident(chain));
        self.continue_value_tail(&mut val)?;
        let expr = self.finish_expression(span.start, None, val, true)?;
        self.expect_eol()?;
        Ok(StatementKind::Literal(expr))
    }

    /// Finishes a bare expression statement `IDENT op …` where `op` was
    /// already consumed.
    fn bare_expression_from_op(&mut self, ident: Token, op: Operator) -> RunResult<StatementKind> {
        let span = ident.span;
        let val = ValueExpression::plain(
            span,
            ValueKind::Ident(IdentExpr {
                span,
                name: ident.value,
                actions: Vec::new(),
            }),
        );
        let mut expr = Expression {
            span,
            unary: None,
            val,
            ops: Vec::new(),
            ternary: None,
            optimized: None,
        };
        let op_start = self.start()?;
        let (unary, rhs) = self.parse_unary_value()?;
        let rhs_span = self.span_from(op_start);
        expr.ops.push(OpExpression {
            span: rhs_span,
            op,
            expr: Box::new(Expression {
                span: rhs_span,
                unary,
                val: rhs,
                ops: Vec::new(),
                ternary: None,
                optimized: None,
            }),
        });
        let expr = self.finish_expression_ops(span.start, expr, true)?;
        self.expect_eol()?;
        Ok(StatementKind::Literal(expr))
    }

    fn parse_func_def(&mut self) -> RunResult<StatementKind> {
        self.expect_keyword("def")?;
        let name = self.expect_target_ident()?;
        self.expect_char('(')?;
        let mut args: Vec<ArgDef> = Vec::new();
        let mut varargs = None;
        let mut kwargs = None;
        let mut keywords_only = false;
        if !self.accept_char(')')? {
            loop {
                if self.accept_char('*')? {
                    if self.accept_char('*')? {
                        kwargs = Some(self.expect_target_ident()?.value);
                    } else if self.peek()?.kind == TokenKind::Ident {
                        varargs = Some(self.expect_target_ident()?.value);
                    } else {
                        keywords_only = true;
                    }
                } else {
                    let arg = self.parse_arg_def(true)?;
                    if args.iter().any(|a| a.name == arg.name) {
                        return Err(RunError::name(format!("duplicate argument '{}'", arg.name))
                            .with_frame(self.lex.filename(), self.last_span));
                    }
                    args.push(arg);
                }
                if self.accept_char(',')? {
                    if self.accept_char(')')? {
                        break;
                    }
                    continue;
                }
                self.expect_char(')')?;
                break;
            }
        }
        let return_type = if self.accept_operator("->")? {
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect_char(':')?;
        self.expect_eol()?;
        let statements = self.parse_block()?;
        let docstring = block_docstring(&statements);
        Ok(StatementKind::FuncDef(FuncDef {
            name: name.value,
            args,
            varargs,
            kwargs,
            keywords_only,
            return_type,
            docstring,
            statements: Arc::new(statements),
        }))
    }

    /// One declared parameter: `name [: type {| type}] {& alias} [= default]`.
    fn parse_arg_def(&mut self, allow_annotations: bool) -> RunResult<ArgDef> {
        let name = self.expect_target_ident()?;
        let mut types = Vec::new();
        let mut aliases = Vec::new();
        if allow_annotations {
            if self.accept_char(':')? {
                types.push(self.parse_type()?);
                while self.accept_char('|')? {
                    types.push(self.parse_type()?);
                }
            }
            while self.accept_char('&')? {
                aliases.push(self.expect_ident()?.value);
            }
        }
        let default = if self.accept_operator("=")? {
            Some(self.parse_expression()?)
        } else {
            None
        };
        Ok(ArgDef {
            name: name.value,
            types,
            aliases,
            default,
            folded_default: None,
        })
    }

    fn parse_type(&mut self) -> RunResult<Type> {
        let tok = self.expect_ident()?;
        tok.value
            .parse::<Type>()
            .map_err(|_| self.error(tok.span, format!("Unknown type '{}'", tok.value)))
    }

    fn parse_if(&mut self) -> RunResult<StatementKind> {
        self.expect_keyword("if")?;
        let condition = self.parse_expression()?;
        self.expect_char(':')?;
        self.expect_eol()?;
        let statements = self.parse_block()?;
        let mut elifs = Vec::new();
        while self.accept_ident("elif")? {
            let cond = self.parse_expression()?;
            self.expect_char(':')?;
            self.expect_eol()?;
            elifs.push((cond, self.parse_block()?));
        }
        let else_statements = if self.accept_ident("else")? {
            self.expect_char(':')?;
            self.expect_eol()?;
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(StatementKind::If(IfStatement {
            condition,
            statements,
            elifs,
            else_statements,
        }))
    }

    fn parse_for(&mut self) -> RunResult<StatementKind> {
        self.expect_keyword("for")?;
        let mut names = vec![self.expect_target_ident()?.value];
        while self.accept_char(',')? {
            names.push(self.expect_target_ident()?.value);
        }
        self.expect_keyword("in")?;
        let iterable = self.parse_expression()?;
        self.expect_char(':')?;
        self.expect_eol()?;
        let statements = self.parse_block()?;
        Ok(StatementKind::For(ForStatement {
            names,
            iterable,
            statements,
        }))
    }

    /// Parses an indented block. The next content line must open a new
    /// indentation level; the block runs until the matching Unindent.
    fn parse_block(&mut self) -> RunResult<Vec<Statement>> {
        let level = self.lex.indent_level();
        let kind = self.peek()?.kind;
        if matches!(kind, TokenKind::Eof | TokenKind::Unindent) || self.lex.indent_level() <= level {
            let span = self.last_span;
            return Err(self.error(span, "Expected an indented block"));
        }
        let mut statements = Vec::new();
        loop {
            match self.peek()?.kind {
                TokenKind::Unindent => {
                    self.next()?;
                    return Ok(statements);
                }
                TokenKind::Eof => return Ok(statements),
                TokenKind::Eol => {
                    self.next()?;
                }
                _ => statements.push(self.parse_statement()?),
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> RunResult<Expression> {
        let start = self.start()?;
        let (unary, val) = self.parse_unary_value()?;
        self.finish_expression(start, unary, val, true)
    }

    /// An expression with no trailing inline-if; used for comprehension
    /// clauses where `if` introduces the filter.
    fn parse_unconditional(&mut self) -> RunResult<Expression> {
        let start = self.start()?;
        let (unary, val) = self.parse_unary_value()?;
        self.finish_expression(start, unary, val, false)
    }

    fn finish_expression(
        &mut self,
        start: Pos,
        unary: Option<UnaryOp>,
        val: ValueExpression,
        allow_ternary: bool,
    ) -> RunResult<Expression> {
        let expr = Expression {
            span: self.span_from(start),
            unary,
            val,
            ops: Vec::new(),
            ternary: None,
            optimized: None,
        };
        self.finish_expression_ops(start, expr, allow_ternary)
    }

    fn finish_expression_ops(&mut self, start: Pos, mut expr: Expression, allow_ternary: bool) -> RunResult<Expression> {
        while let Some(op) = self.peek_operator()? {
            let op_start = self.start()?;
            let (unary, val) = self.parse_unary_value()?;
            let span = self.span_from(op_start);
            expr.ops.push(OpExpression {
                span,
                op,
                expr: Box::new(Expression {
                    span,
                    unary,
                    val,
                    ops: Vec::new(),
                    ternary: None,
                    optimized: None,
                }),
            });
        }
        if allow_ternary && self.accept_ident("if")? {
            let condition = self.parse_unconditional()?;
            self.expect_keyword("else")?;
            let else_value = self.parse_expression()?;
            expr.ternary = Some(Box::new(Ternary { condition, else_value }));
        }
        expr.span = self.span_from(start);
        Ok(expr)
    }

    /// Consumes and returns the next binary operator, merging the
    /// two-token forms `not in` and `is not`. Leaves the stream untouched
    /// when no operator follows.
    fn peek_operator(&mut self) -> RunResult<Option<Operator>> {
        let tok = self.peek()?.clone();
        let op = match tok.kind {
            TokenKind::Operator => match tok.value.as_str() {
                "+" => Operator::Add,
                "-" => Operator::Subtract,
                "%" => Operator::Modulo,
                "<" => Operator::LessThan,
                ">" => Operator::GreaterThan,
                "<=" => Operator::LessOrEqual,
                ">=" => Operator::GreaterOrEqual,
                "==" => Operator::Equal,
                "!=" => Operator::NotEqual,
                _ => return Ok(None),
            },
            TokenKind::Ident => match tok.value.as_str() {
                "and" => Operator::And,
                "or" => Operator::Or,
                "in" => Operator::In,
                "is" => {
                    self.next()?;
                    if self.accept_ident("not")? {
                        return Ok(Some(Operator::IsNot));
                    }
                    return Ok(Some(Operator::Is));
                }
                "not" => {
                    self.next()?;
                    self.expect_keyword("in")?;
                    return Ok(Some(Operator::NotIn));
                }
                _ => return Ok(None),
            },
            _ => return Ok(None),
        };
        self.next()?;
        Ok(Some(op))
    }

    fn parse_unary_value(&mut self) -> RunResult<(Option<UnaryOp>, ValueExpression)> {
        let unary = if self.accept_operator("-")? {
            Some(UnaryOp::Negate)
        } else if self.accept_ident("not")? {
            Some(UnaryOp::Not)
        } else {
            None
        };
        let val = self.parse_value_expression()?;
        Ok((unary, val))
    }

    fn parse_value_expression(&mut self) -> RunResult<ValueExpression> {
        let start = self.start()?;
        let tok = self.peek()?.clone();
        let kind = match tok.kind {
            TokenKind::Str => self.parse_string_primary()?,
            TokenKind::Int => {
                self.next()?;
                let n = tok
                    .value
                    .parse::<i64>()
                    .map_err(|_| RunError::value(format!("Invalid integer literal {}", tok.value))
                        .with_frame(self.lex.filename(), tok.span))?;
                ValueKind::Int(n)
            }
            TokenKind::Ident => match tok.value.as_str() {
                "True" => {
                    self.next()?;
                    ValueKind::True
                }
                "False" => {
                    self.next()?;
                    ValueKind::False
                }
                "None" => {
                    self.next()?;
                    ValueKind::None
                }
                "lambda" => {
                    self.next()?;
                    ValueKind::Lambda(Box::new(self.parse_lambda()?))
                }
                name if is_reserved_keyword(name) => {
                    return Err(self.error(tok.span, format!("Unexpected keyword '{name}'")));
                }
                _ => {
                    let ident = self.next()?;
                    ValueKind::Ident(self.parse_ident_expr_tail(ident)?)
                }
            },
            TokenKind::Char('[') => {
                self.next()?;
                ValueKind::List(self.parse_expr_list(']')?)
            }
            TokenKind::Char('(') => {
                self.next()?;
                self.parse_tuple_or_paren()?
            }
            TokenKind::Char('{') => {
                self.next()?;
                ValueKind::Dict(self.parse_dict_lit()?)
            }
            _ => return Err(self.error(tok.span, format!("Unexpected {tok}"))),
        };
        let mut val = ValueExpression::plain(self.span_from(start), kind);
        self.continue_value_tail(&mut val)?;
        val.span = self.span_from(start);
        Ok(val)
    }

    /// Applies the slice/property/call tail to a parsed primary: zero or
    /// more `[…]` operations followed by at most one `.property` or call.
    fn continue_value_tail(&mut self, val: &mut ValueExpression) -> RunResult<()> {
        while self.accept_char('[')? {
            if self.accept_char(':')? {
                let end = if self.peek()?.is_char(']') {
                    None
                } else {
                    Some(Box::new(self.parse_expression()?))
                };
                self.expect_char(']')?;
                val.slices.push(SliceExpr::Range { start: None, end });
                continue;
            }
            let first = self.parse_expression()?;
            if self.accept_char(':')? {
                let end = if self.peek()?.is_char(']') {
                    None
                } else {
                    Some(Box::new(self.parse_expression()?))
                };
                self.expect_char(']')?;
                val.slices.push(SliceExpr::Range {
                    start: Some(Box::new(first)),
                    end,
                });
            } else {
                self.expect_char(']')?;
                val.slices.push(SliceExpr::Index(Box::new(first)));
            }
        }
        if self.accept_char('.')? {
            let ident = self.expect_ident()?;
            val.property = Some(Box::new(self.parse_ident_expr_tail(ident)?));
        } else if self.accept_char('(')? {
            val.call = Some(Box::new(self.parse_call_args()?));
        }
        Ok(())
    }

    /// Parses the dotted/call tail of an identifier reference. The head
    /// identifier token is already consumed.
    fn parse_ident_expr_tail(&mut self, ident: Token) -> RunResult<IdentExpr> {
        let start = ident.span.start;
        let mut actions = Vec::new();
        loop {
            if self.accept_char('.')? {
                let inner = self.expect_ident()?;
                actions.push(IdentExprAction::Property(Box::new(self.parse_ident_expr_tail(inner)?)));
                break;
            }
            if self.accept_char('(')? {
                actions.push(IdentExprAction::Call(self.parse_call_args()?));
                continue;
            }
            break;
        }
        Ok(IdentExpr {
            span: self.span_from(start),
            name: ident.value,
            actions,
        })
    }

    /// Parses call arguments; the opening parenthesis is already consumed.
    fn parse_call_args(&mut self) -> RunResult<Call> {
        let mut args: Vec<CallArgument> = Vec::new();
        if self.accept_char(')')? {
            return Ok(Call { args });
        }
        loop {
            let start = self.start()?;
            let name = if self.peek()?.kind == TokenKind::Ident && self.lex.assign_follows()? {
                let tok = self.next()?;
                self.expect_operator("=")?;
                if args.iter().any(|a| a.name.as_deref() == Some(tok.value.as_str())) {
                    return Err(RunError::name(format!("repeated argument '{}'", tok.value))
                        .with_frame(self.lex.filename(), tok.span));
                }
                Some(tok.value)
            } else {
                None
            };
            let value = self.parse_expression()?;
            args.push(CallArgument {
                span: self.span_from(start),
                name,
                value,
            });
            if self.accept_char(',')? {
                if self.accept_char(')')? {
                    break;
                }
                continue;
            }
            self.expect_char(')')?;
            break;
        }
        Ok(Call { args })
    }

    /// Parses a bracketed expression list; the opening bracket is already
    /// consumed. Handles the trailing-comprehension form.
    fn parse_expr_list(&mut self, close: char) -> RunResult<ExprList> {
        let mut values = Vec::new();
        if self.accept_char(close)? {
            return Ok(ExprList {
                values,
                comprehension: None,
            });
        }
        values.push(self.parse_expression()?);
        if self.peek()?.is_ident("for") {
            let comprehension = Some(Box::new(self.parse_comprehension()?));
            self.expect_char(close)?;
            return Ok(ExprList { values, comprehension });
        }
        loop {
            if self.accept_char(',')? {
                if self.accept_char(close)? {
                    break;
                }
                values.push(self.parse_expression()?);
                if self.peek()?.is_ident("for") {
                    let span = self.peek()?.span;
                    return Err(self.error(span, "Comprehension must have exactly one head expression"));
                }
                continue;
            }
            self.expect_char(close)?;
            break;
        }
        Ok(ExprList {
            values,
            comprehension: None,
        })
    }

    fn parse_tuple_or_paren(&mut self) -> RunResult<ValueKind> {
        if self.accept_char(')')? {
            return Ok(ValueKind::Tuple(ExprList {
                values: Vec::new(),
                comprehension: None,
            }));
        }
        let first = self.parse_expression()?;
        if self.peek()?.is_ident("for") {
            let comprehension = Some(Box::new(self.parse_comprehension()?));
            self.expect_char(')')?;
            return Ok(ValueKind::Tuple(ExprList {
                values: vec![first],
                comprehension,
            }));
        }
        if self.peek()?.is_char(',') {
            let mut values = vec![first];
            while self.accept_char(',')? {
                if self.peek()?.is_char(')') {
                    break;
                }
                values.push(self.parse_expression()?);
            }
            self.expect_char(')')?;
            return Ok(ValueKind::Tuple(ExprList {
                values,
                comprehension: None,
            }));
        }
        self.expect_char(')')?;
        Ok(ValueKind::Paren(Box::new(first)))
    }

    fn parse_dict_lit(&mut self) -> RunResult<DictLit> {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        if self.accept_char('}')? {
            return Ok(DictLit {
                keys,
                values,
                comprehension: None,
            });
        }
        keys.push(self.parse_expression()?);
        self.expect_char(':')?;
        values.push(self.parse_expression()?);
        if self.peek()?.is_ident("for") {
            let comprehension = Some(Box::new(self.parse_comprehension()?));
            self.expect_char('}')?;
            return Ok(DictLit {
                keys,
                values,
                comprehension,
            });
        }
        loop {
            if self.accept_char(',')? {
                if self.accept_char('}')? {
                    break;
                }
                keys.push(self.parse_expression()?);
                self.expect_char(':')?;
                values.push(self.parse_expression()?);
                if self.peek()?.is_ident("for") {
                    let span = self.peek()?.span;
                    return Err(self.error(span, "Dict comprehension must have exactly one key:value pair"));
                }
                continue;
            }
            self.expect_char('}')?;
            break;
        }
        Ok(DictLit {
            keys,
            values,
            comprehension: None,
        })
    }

    /// `for names in expr [for names in expr] [if condition]`; the caller
    /// has seen (not consumed) the first `for`.
    fn parse_comprehension(&mut self) -> RunResult<Comprehension> {
        self.expect_keyword("for")?;
        let mut names = vec![self.expect_target_ident()?.value];
        while self.accept_char(',')? {
            names.push(self.expect_target_ident()?.value);
        }
        self.expect_keyword("in")?;
        let iterable = Box::new(self.parse_unconditional()?);
        let second = if self.peek()?.is_ident("for") {
            self.next()?;
            let mut names2 = vec![self.expect_target_ident()?.value];
            while self.accept_char(',')? {
                names2.push(self.expect_target_ident()?.value);
            }
            self.expect_keyword("in")?;
            let iter2 = Box::new(self.parse_unconditional()?);
            Some((names2, iter2))
        } else {
            None
        };
        let condition = if self.accept_ident("if")? {
            Some(Box::new(self.parse_unconditional()?))
        } else {
            None
        };
        Ok(Comprehension {
            names,
            iterable,
            second,
            condition,
        })
    }

    /// `lambda a, b=1: expr` — the `lambda` keyword is already consumed.
    fn parse_lambda(&mut self) -> RunResult<Lambda> {
        let mut args = Vec::new();
        if !self.peek()?.is_char(':') {
            loop {
                args.push(self.parse_arg_def(false)?);
                if self.accept_char(',')? {
                    continue;
                }
                break;
            }
        }
        self.expect_char(':')?;
        let body = self.parse_expression()?;
        Ok(Lambda { args, body })
    }

    /// Parses one or more adjacent string-literal tokens into a single
    /// string or f-string node, applying the concatenation rules.
    fn parse_string_primary(&mut self) -> RunResult<ValueKind> {
        let tok = self.next()?;
        let mut fs = self.fstring_from_token(&tok)?;
        while self.peek()?.kind == TokenKind::Str {
            let next = self.next()?;
            let other = self.fstring_from_token(&next)?;
            fs = concat_strings(fs, other);
        }
        if fs.vars.is_empty() {
            Ok(ValueKind::Str(fs.suffix))
        } else {
            Ok(ValueKind::FString(fs))
        }
    }

    /// Converts a normalized string token into the f-string structure. A
    /// plain string becomes the degenerate form with no vars.
    fn fstring_from_token(&self, tok: &Token) -> RunResult<FString> {
        if let Some(body) = tok.value.strip_prefix("f\"") {
            let body = body.strip_suffix('"').unwrap_or(body);
            return self.split_fstring(body, tok.span);
        }
        // Strip exactly the normalizing quote pair; embedded quotes stay.
        let body = tok
            .value
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(&tok.value)
            .to_owned();
        Ok(FString {
            vars: Vec::new(),
            suffix: body,
        })
    }

    fn split_fstring(&self, body: &str, span: Span) -> RunResult<FString> {
        let mut vars = Vec::new();
        let mut prefix = String::new();
        let mut chars = body.chars();
        while let Some(c) = chars.next() {
            if c != '{' {
                prefix.push(c);
                continue;
            }
            let mut path_text = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                path_text.push(c);
            }
            if !closed {
                return Err(self.error(span, "Unterminated expression in f-string"));
            }
            let path: Vec<String> = path_text.split('.').map(str::to_owned).collect();
            let valid = !path.is_empty()
                && path.iter().all(|seg| {
                    let mut cs = seg.chars();
                    cs.next().is_some_and(|c| c.is_alphabetic() || c == '_')
                        && cs.all(|c| c.is_alphanumeric() || c == '_')
                });
            if !valid {
                return Err(self.error(span, format!("Invalid expression '{path_text}' in f-string")));
            }
            vars.push(FStringVar {
                prefix: std::mem::take(&mut prefix),
                path,
            });
        }
        Ok(FString { vars, suffix: prefix })
    }
}

/// Concatenates two adjacent string literals in their f-string form,
/// merging the boundary text per the language rules. Plain strings are the
/// var-less degenerate form, so all four plain/f combinations reduce to
/// this one merge.
fn concat_strings(mut a: FString, mut b: FString) -> FString {
    if b.vars.is_empty() {
        a.suffix.push_str(&b.suffix);
        return a;
    }
    b.vars[0].prefix = format!("{}{}", a.suffix, b.vars[0].prefix);
    a.vars.append(&mut b.vars);
    FString {
        vars: a.vars,
        suffix: b.suffix,
    }
}

/// True when the last action in a dotted chain is a call.
fn ident_expr_ends_in_call(expr: &IdentExpr) -> bool {
    match expr.actions.last() {
        Some(IdentExprAction::Call(_)) => true,
        Some(IdentExprAction::Property(inner)) => ident_expr_ends_in_call(inner),
        None => false,
    }
}

/// Extracts a docstring: a leading bare string-literal statement.
fn block_docstring(statements: &[Statement]) -> Option<String> {
    if let Some(Statement {
        kind: StatementKind::Literal(expr),
        ..
    }) = statements.first()
        && expr.ops.is_empty()
        && expr.unary.is_none()
        && expr.ternary.is_none()
        && expr.val.slices.is_empty()
        && expr.val.property.is_none()
        && expr.val.call.is_none()
        && let ValueKind::Str(s) = &expr.val.kind
    {
        return Some(s.clone());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> RunResult<FileInput> {
        parse_data(src, &Arc::from("test/BUILD"))
    }

    fn parse_ok(src: &str) -> FileInput {
        parse(src).expect("source should parse")
    }

    #[test]
    fn parses_assignment_and_call() {
        let file = parse_ok("x = 1 + 2\nf(x, name = \"y\")\n");
        assert_eq!(file.len(), 2);
        match &file[0].kind {
            StatementKind::Ident(stmt) => {
                assert_eq!(stmt.name, "x");
                assert!(matches!(stmt.action, IdentAction::Assign(_)));
            }
            other => panic!("unexpected statement {other:?}"),
        }
        match &file[1].kind {
            StatementKind::Ident(stmt) => match &stmt.action {
                IdentAction::Call(call) => {
                    assert_eq!(call.args.len(), 2);
                    assert_eq!(call.args[1].name.as_deref(), Some("name"));
                }
                other => panic!("unexpected action {other:?}"),
            },
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn spans_lie_within_the_file() {
        let src = "x = [1, 2]\ndef f(a):\n    return a\n";
        let file = parse_ok(src);
        for stmt in &file {
            assert!(stmt.span.end >= stmt.span.start);
            assert!(stmt.span.end.offset() <= src.len());
        }
    }

    #[test]
    fn rejects_repeated_named_arguments() {
        let err = parse("f(a = 1, a = 2)\n").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Name);
        assert!(err.message.contains("repeated argument"));
    }

    #[test]
    fn rejects_reserved_keyword_assignment() {
        let err = parse("class = 1\n").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Name);
        let err = parse("for class in x:\n    pass\n").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Name);
    }

    #[test]
    fn rejects_multi_head_list_comprehension() {
        let err = parse("x = [a, b for a in c]\n").unwrap_err();
        assert!(err.message.contains("exactly one head expression"));
    }

    #[test]
    fn rejects_multi_pair_dict_comprehension() {
        let err = parse("x = {1: 2, 3: 4 for a in c}\n").unwrap_err();
        assert!(err.message.contains("exactly one key:value"));
    }

    #[test]
    fn rejects_unindented_block() {
        let err = parse("if x:\npass\n").unwrap_err();
        assert!(err.message.contains("indented block"));
    }

    #[test]
    fn parses_def_with_annotations_aliases_and_markers() {
        let file = parse_ok("def f(a: int | str = 1, b & b_alias = None, *args, **kwargs) -> str:\n    return \"x\"\n");
        match &file[0].kind {
            StatementKind::FuncDef(def) => {
                assert_eq!(def.args.len(), 2);
                assert_eq!(def.args[0].types, vec![Type::Int, Type::Str]);
                assert_eq!(def.args[1].aliases, vec!["b_alias".to_owned()]);
                assert_eq!(def.varargs.as_deref(), Some("args"));
                assert_eq!(def.kwargs.as_deref(), Some("kwargs"));
                assert_eq!(def.return_type, Some(Type::Str));
            }
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn extracts_docstring() {
        let file = parse_ok("def f():\n    \"does things\"\n    pass\n");
        match &file[0].kind {
            StatementKind::FuncDef(def) => assert_eq!(def.docstring.as_deref(), Some("does things")),
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn merges_not_in_and_is_not() {
        let file = parse_ok("x = a not in b\ny = c is not None\n");
        for (stmt, want) in file.iter().zip([Operator::NotIn, Operator::IsNot]) {
            match &stmt.kind {
                StatementKind::Ident(s) => match &s.action {
                    IdentAction::Assign(expr) => assert_eq!(expr.ops[0].op, want),
                    other => panic!("unexpected action {other:?}"),
                },
                other => panic!("unexpected statement {other:?}"),
            }
        }
    }

    #[test]
    fn property_statement_requires_call() {
        assert!(parse("x.y()\n").is_ok());
        let err = parse("x.y\n").unwrap_err();
        assert!(err.message.contains("Expected a call"));
    }

    #[test]
    fn concat_plain_plain() {
        let a = FString {
            vars: vec![],
            suffix: "ab".into(),
        };
        let b = FString {
            vars: vec![],
            suffix: "cd".into(),
        };
        let merged = concat_strings(a, b);
        assert!(merged.vars.is_empty());
        assert_eq!(merged.suffix, "abcd");
    }

    #[test]
    fn concat_plain_then_fstring_merges_into_first_prefix() {
        let a = FString {
            vars: vec![],
            suffix: "pre ".into(),
        };
        let b = FString {
            vars: vec![FStringVar {
                prefix: "v=".into(),
                path: vec!["x".into()],
            }],
            suffix: " post".into(),
        };
        let merged = concat_strings(a, b);
        assert_eq!(merged.vars.len(), 1);
        assert_eq!(merged.vars[0].prefix, "pre v=");
        assert_eq!(merged.suffix, " post");
    }

    #[test]
    fn concat_fstring_then_plain_extends_suffix() {
        let a = FString {
            vars: vec![FStringVar {
                prefix: String::new(),
                path: vec!["x".into()],
            }],
            suffix: " mid".into(),
        };
        let b = FString {
            vars: vec![],
            suffix: " tail".into(),
        };
        let merged = concat_strings(a, b);
        assert_eq!(merged.suffix, " mid tail");
    }

    #[test]
    fn concat_two_fstrings_merges_boundary() {
        let a = FString {
            vars: vec![FStringVar {
                prefix: "a".into(),
                path: vec!["x".into()],
            }],
            suffix: "-".into(),
        };
        let b = FString {
            vars: vec![FStringVar {
                prefix: "b".into(),
                path: vec!["y".into()],
            }],
            suffix: "!".into(),
        };
        let merged = concat_strings(a, b);
        assert_eq!(merged.vars.len(), 2);
        assert_eq!(merged.vars[1].prefix, "-b");
        assert_eq!(merged.suffix, "!");
    }

    #[test]
    fn adjacent_string_tokens_fold_in_expressions() {
        let file = parse_ok("x = \"a\" \"b\"\n");
        match &file[0].kind {
            StatementKind::Ident(s) => match &s.action {
                IdentAction::Assign(expr) => match &expr.val.kind {
                    ValueKind::Str(s) => assert_eq!(s, "ab"),
                    other => panic!("unexpected value {other:?}"),
                },
                other => panic!("unexpected action {other:?}"),
            },
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn fstring_structure() {
        let file = parse_ok("x = f\"a {b.c} d\"\n");
        match &file[0].kind {
            StatementKind::Ident(s) => match &s.action {
                IdentAction::Assign(expr) => match &expr.val.kind {
                    ValueKind::FString(fs) => {
                        assert_eq!(fs.vars.len(), 1);
                        assert_eq!(fs.vars[0].prefix, "a ");
                        assert_eq!(fs.vars[0].path, vec!["b".to_owned(), "c".to_owned()]);
                        assert_eq!(fs.suffix, " d");
                    }
                    other => panic!("unexpected value {other:?}"),
                },
                other => panic!("unexpected action {other:?}"),
            },
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn parses_comprehensions() {
        assert!(parse("x = [i for i in y]\n").is_ok());
        assert!(parse("x = [i for i in y if i]\n").is_ok());
        assert!(parse("x = [i for i in y for j in i]\n").is_ok());
        assert!(parse("x = {k: v for k in y}\n").is_ok());
    }

    #[test]
    fn parses_slices() {
        assert!(parse("x = a[1]\n").is_ok());
        assert!(parse("x = a[1:2]\n").is_ok());
        assert!(parse("x = a[:2]\n").is_ok());
        assert!(parse("x = a[1:]\n").is_ok());
        assert!(parse("x = a[:]\n").is_ok());
    }

    #[test]
    fn parses_ternary_and_lambda() {
        assert!(parse("x = a if b else c\n").is_ok());
        assert!(parse("x = lambda y: y\n").is_ok());
        assert!(parse("x = lambda y, z = 1: z\n").is_ok());
    }
}
