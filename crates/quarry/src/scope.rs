//! Lexical scopes for evaluation.
//!
//! A scope owns a local name map and links to its parent; lookup walks the
//! chain. The root of every chain is the interpreter's builtin scope.
//! Scopes carry the evaluation context that natives need: the current file,
//! the package being parsed, the parse mode and any subinclude labels.

use std::sync::{Arc, RwLock};

use ahash::AHashMap;

use crate::host::Package;
use crate::label::BuildLabel;
use crate::value::{Value, read_lock, write_lock};

/// How a file is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Normal,
    /// Pre-evaluation of shared helpers before any package parse.
    Preload,
    /// Evaluation of a subincluded file.
    Subinclude,
}

#[derive(Debug)]
pub(crate) struct Scope {
    parent: Option<Arc<Scope>>,
    locals: RwLock<AHashMap<String, Value>>,
    pub file: Arc<str>,
    pub pkg: Option<Arc<Package>>,
    pub mode: ParseMode,
    /// The label being subincluded, when mode is Subinclude.
    pub subinclude_label: Option<BuildLabel>,
    /// The label whose parse triggered this evaluation, if any.
    pub parsing_for: Option<BuildLabel>,
    /// True while evaluating a file registered through `load_builtins`;
    /// functions defined here are flagged as builtins.
    pub builtin_defs: bool,
}

impl Scope {
    /// The root scope holding registered natives and preloaded builtins.
    pub fn root(file: Arc<str>) -> Self {
        Self {
            parent: None,
            locals: RwLock::new(AHashMap::new()),
            file,
            pkg: None,
            mode: ParseMode::Normal,
            subinclude_label: None,
            parsing_for: None,
            builtin_defs: false,
        }
    }

    /// A fresh file-evaluation scope beneath `parent`.
    pub fn file_scope(
        parent: &Arc<Self>,
        file: Arc<str>,
        pkg: Option<Arc<Package>>,
        mode: ParseMode,
        parsing_for: Option<BuildLabel>,
    ) -> Self {
        Self {
            parent: Some(Arc::clone(parent)),
            locals: RwLock::new(AHashMap::new()),
            file,
            pkg,
            mode,
            subinclude_label: None,
            parsing_for,
            builtin_defs: false,
        }
    }

    /// A child scope inheriting the evaluation context (blocks,
    /// comprehensions).
    pub fn child(self: &Arc<Self>) -> Self {
        Self {
            parent: Some(Arc::clone(self)),
            locals: RwLock::new(AHashMap::new()),
            file: Arc::clone(&self.file),
            pkg: self.pkg.clone(),
            mode: self.mode,
            subinclude_label: self.subinclude_label.clone(),
            parsing_for: self.parsing_for.clone(),
            builtin_defs: self.builtin_defs,
        }
    }

    /// The scope a function body runs in: names resolve through the
    /// defining scope (closure semantics) while the package and mode come
    /// from the call site.
    pub fn call_scope(defining: &Arc<Self>, caller: &Arc<Self>, file: Arc<str>) -> Self {
        Self {
            parent: Some(Arc::clone(defining)),
            locals: RwLock::new(AHashMap::new()),
            file,
            pkg: caller.pkg.clone(),
            mode: caller.mode,
            subinclude_label: caller.subinclude_label.clone(),
            parsing_for: caller.parsing_for.clone(),
            builtin_defs: defining.builtin_defs,
        }
    }

    /// Walks the parent chain.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = read_lock(&self.locals).get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Local-only lookup; does not consult parents.
    pub fn lookup_local(&self, name: &str) -> Option<Value> {
        read_lock(&self.locals).get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        write_lock(&self.locals).insert(name.into(), value);
    }

    /// The current configuration object, bound as `CONFIG`.
    pub fn config(&self) -> Option<Arc<crate::config::ConfigValue>> {
        match self.lookup("CONFIG") {
            Some(Value::Config(c)) => Some(c),
            _ => None,
        }
    }

    /// Snapshot of local bindings whose names do not start with `_`,
    /// sorted by name.
    pub fn public_bindings(&self) -> Vec<(String, Value)> {
        let locals = read_lock(&self.locals);
        let mut out: Vec<(String, Value)> = locals
            .iter()
            .filter(|(name, _)| !name.starts_with('_'))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parents_but_local_lookup_does_not() {
        let root = Arc::new(Scope::root(Arc::from("<builtin>")));
        root.set("outer", Value::Int(1));
        let child = Arc::new(root.child());
        child.set("inner", Value::Int(2));
        assert!(child.lookup("outer").unwrap().equals(&Value::Int(1)));
        assert!(child.lookup("inner").unwrap().equals(&Value::Int(2)));
        assert!(child.lookup_local("outer").is_none());
        assert!(root.lookup("inner").is_none());
    }

    #[test]
    fn inner_bindings_shadow_outer() {
        let root = Arc::new(Scope::root(Arc::from("<builtin>")));
        root.set("x", Value::Int(1));
        let child = Arc::new(root.child());
        child.set("x", Value::Int(2));
        assert!(child.lookup("x").unwrap().equals(&Value::Int(2)));
        assert!(root.lookup("x").unwrap().equals(&Value::Int(1)));
    }

    #[test]
    fn public_bindings_hide_underscore_names() {
        let root = Arc::new(Scope::root(Arc::from("f")));
        root.set("b", Value::Int(1));
        root.set("_private", Value::Int(2));
        root.set("a", Value::Int(3));
        let names: Vec<String> = root.public_bindings().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a".to_owned(), "b".to_owned()]);
    }
}
