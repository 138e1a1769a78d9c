//! The embedding API.
//!
//! A [`Parser`] wraps one interpreter instance: the host constructs it
//! with its collaborator and base configuration, optionally loads builtin
//! definitions and preloads, then parses packages — potentially from many
//! threads at once, bounded by the parse-parallelism limit.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use crate::ast::FileInput;
use crate::cache::PermitGuard;
use crate::config::ConfigValue;
use crate::error::{Error, RunError, line_column, source_line};
use crate::host::{BuildHost, Package};
use crate::interp::Interp;
use crate::label::BuildLabel;
use crate::object::Object;
use crate::scope::{ParseMode, Scope};
use crate::value::Value;

/// Construction options.
#[derive(Debug, Clone)]
pub struct ParserOptions {
    /// Number of file parses allowed to run concurrently.
    pub parallelism: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self { parallelism: 8 }
    }
}

/// A parsed file's AST, opaque to hosts.
#[derive(Debug, Clone)]
pub struct FileAst {
    ast: Arc<FileInput>,
}

impl FileAst {
    /// Number of top-level statements; handy for host diagnostics.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.ast.len()
    }
}

/// A function definition discovered in a parsed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub params: Vec<String>,
    pub docstring: Option<String>,
    pub is_private: bool,
}

/// The BUILD-language interpreter as embedded by a host build system.
pub struct Parser {
    interp: Arc<Interp>,
}

impl Parser {
    /// Creates a parser around a host collaborator. `config` becomes the
    /// shared immutable configuration base; keys are conventionally
    /// ALL_CAPS reflections of the host's structured configuration.
    #[must_use]
    pub fn new(host: Arc<dyn BuildHost>, config: BTreeMap<String, Object>, options: &ParserOptions) -> Self {
        let base = config.into_iter().map(|(k, v)| (k, v.to_value())).collect();
        Self {
            interp: Arc::new(Interp::new(host, base, options.parallelism)),
        }
    }

    /// Registers source as preloaded builtins: the file is evaluated once
    /// and its public names enter every subsequent evaluation. The source
    /// text is retained so later errors inside it can render snippets.
    pub fn load_builtins(&self, filename: &str, contents: &str) -> Result<(), Error> {
        let _permit = PermitGuard::acquire(&self.interp.limiter);
        self.run_builtins(filename, contents).map_err(|e| self.to_error(e))
    }

    fn run_builtins(&self, filename: &str, contents: &str) -> Result<(), RunError> {
        let ast = self.interp.parse_only(contents, filename, true)?;
        let mut scope = Scope::file_scope(&self.interp.root, Arc::from(filename), None, ParseMode::Normal, None);
        scope.builtin_defs = true;
        let scope = Arc::new(scope);
        scope.set(
            "CONFIG",
            Value::Config(Arc::new(ConfigValue::new(Arc::clone(&self.interp.base_config)))),
        );
        self.interp.evaluate(&scope, &ast)?;
        for (name, value) in scope.public_bindings() {
            if name == "CONFIG" {
                continue;
            }
            self.interp.root.set(name, value.freeze());
        }
        Ok(())
    }

    /// Lexes, parses, optimizes and evaluates a BUILD file against the
    /// given package. `dependent` is the label whose build required this
    /// parse, when known.
    pub fn parse_file(
        &self,
        package: Arc<Package>,
        label: &BuildLabel,
        dependent: Option<&BuildLabel>,
        mode: ParseMode,
        filename: &str,
    ) -> Result<(), Error> {
        let _permit = PermitGuard::acquire(&self.interp.limiter);
        let result = (|| {
            let ast = self.interp.parse_file_cached(filename)?;
            let parsing_for = dependent.or(Some(label)).cloned();
            let scope = self
                .interp
                .new_file_scope(Arc::from(filename), Some(package), mode, parsing_for);
            self.interp.evaluate(&scope, &ast)?;
            Ok(())
        })();
        result.map_err(|e| self.to_error(e))
    }

    /// As [`Parser::parse_file`], reading source from a byte stream.
    pub fn parse_reader(
        &self,
        package: Arc<Package>,
        label: &BuildLabel,
        dependent: Option<&BuildLabel>,
        mode: ParseMode,
        mut reader: impl Read,
        filename: &str,
    ) -> Result<(), Error> {
        let mut contents = String::new();
        reader
            .read_to_string(&mut contents)
            .map_err(|e| self.to_error(RunError::value(format!("cannot read {filename}: {e}"))))?;
        let _permit = PermitGuard::acquire(&self.interp.limiter);
        let result = (|| {
            let ast = self.interp.parse_only(&contents, filename, false)?;
            let parsing_for = dependent.or(Some(label)).cloned();
            let scope = self
                .interp
                .new_file_scope(Arc::from(filename), Some(package), mode, parsing_for);
            self.interp.evaluate(&scope, &ast)?;
            Ok(())
        })();
        result.map_err(|e| self.to_error(e))
    }

    /// Produces a file's AST without evaluating it.
    pub fn parse_file_only(&self, filename: &str) -> Result<FileAst, Error> {
        self.interp
            .parse_file_cached(filename)
            .map(|ast| FileAst { ast })
            .map_err(|e| self.to_error(e))
    }

    /// As [`Parser::parse_file_only`], for in-memory input.
    pub fn parse_data(&self, data: &[u8], filename: &str) -> Result<FileAst, Error> {
        let text = std::str::from_utf8(data)
            .map_err(|e| self.to_error(RunError::value(format!("{filename} is not valid UTF-8: {e}"))))?;
        self.interp
            .parse_only(text, filename, false)
            .map(|ast| FileAst { ast })
            .map_err(|e| self.to_error(e))
    }

    /// Pre-evaluates a subinclude target so its names are available to
    /// every later evaluation.
    pub fn register_preload(&self, label: &str) -> Result<(), Error> {
        let _permit = PermitGuard::acquire(&self.interp.limiter);
        self.interp.register_preload(label).map_err(|e| self.to_error(e))
    }

    /// Function definitions per parsed source file, for host tooling.
    #[must_use]
    pub fn all_functions_by_file(&self) -> BTreeMap<String, Vec<FunctionInfo>> {
        self.interp.functions_by_file()
    }

    /// Parses and evaluates in-memory source, returning the file's
    /// top-level `return` value. This is the programmatic entry hosts and
    /// tests use to run fragments outside a real package tree.
    pub fn eval_data(&self, package: Option<Arc<Package>>, data: &str, filename: &str) -> Result<Object, Error> {
        let _permit = PermitGuard::acquire(&self.interp.limiter);
        let result = (|| {
            let ast = self.interp.parse_only(data, filename, false)?;
            let scope = self
                .interp
                .new_file_scope(Arc::from(filename), package, ParseMode::Normal, None);
            self.interp.evaluate(&scope, &ast)
        })();
        result.map(|v| Object::from_value(&v)).map_err(|e| self.to_error(e))
    }

    /// Renders an internal failure into the public error type, resolving
    /// frame offsets against retained sources.
    fn to_error(&self, err: RunError) -> Error {
        let mut frames = Vec::with_capacity(err.frames.len());
        let mut snippet = None;
        for frame in &err.frames {
            let entry = self.interp.source(frame.filename.as_ref());
            let (line, column) = entry
                .as_ref()
                .map_or((0, 0), |s| line_column(&s.text, frame.span.start));
            if snippet.is_none() {
                if let Some(entry) = entry.as_ref().filter(|s| s.is_builtin) {
                    snippet = Some(source_line(&entry.text, frame.span.start));
                }
            }
            frames.push(crate::error::StackFrame {
                filename: frame.filename.to_string(),
                line,
                column,
            });
        }
        Error::new(err.kind, err.message, frames, snippet)
    }
}
