//! The BUILD-language parsing and evaluation core of the quarry build
//! system.
//!
//! Build files are written in a restricted, statically-evaluatable dialect
//! of a Python-like language. This crate lexes, parses, optimizes and
//! evaluates them: side effects are the registration of build targets
//! against a host collaborator (the [`BuildHost`] trait) and the
//! production of immutable namespaces that later evaluations can
//! subinclude.
//!
//! The host embeds the crate through [`Parser`]:
//!
//! ```
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//! use quarry::{BuildHost, BuildLabel, GlobRequest, Object, Parser, ParserOptions};
//!
//! struct Host;
//! impl BuildHost for Host {
//!     fn wait_until_built(&self, label: &BuildLabel) -> Result<Vec<String>, String> {
//!         Err(format!("no graph in this example: {label}"))
//!     }
//!     fn glob(&self, _dir: &str, _request: &GlobRequest) -> Vec<String> {
//!         Vec::new()
//!     }
//! }
//!
//! let parser = Parser::new(Arc::new(Host), BTreeMap::new(), &ParserOptions::default());
//! let result = parser.eval_data(None, "x = 1 + 2\nreturn x\n", "example.build").unwrap();
//! assert_eq!(result, Object::Int(3));
//! ```

mod args;
mod ast;
mod builtins;
mod cache;
mod config;
mod error;
mod host;
mod interp;
mod label;
mod lex;
mod object;
mod parse;
mod prepare;
mod run;
mod scope;
mod token;
mod value;

pub use crate::{
    error::{Error, ErrorKind, StackFrame},
    host::{BuildHost, GlobRequest, Package, SubrepoSpec, Target},
    label::BuildLabel,
    object::Object,
    run::{FileAst, FunctionInfo, Parser, ParserOptions},
    scope::ParseMode,
};
