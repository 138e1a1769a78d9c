//! The runtime value model.
//!
//! A single tagged enum with inline scalars and `Arc` handles for the
//! aggregate values. Lists and dicts are shared mutable state behind an
//! `RwLock`; the soft-freeze is modeled as a distinct frozen variant that
//! wraps the *same* allocation, so freezing never clones and holders of the
//! original handle can still mutate. Values cross threads through the
//! subinclude cache, hence `Arc`/`RwLock` rather than `Rc`/`RefCell`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};

use smallvec::SmallVec;

use crate::ast::{Constant, Expression, Statement, Type};
use crate::config::ConfigValue;
use crate::error::{RunError, RunResult};
use crate::interp::Interp;
use crate::scope::Scope;

pub(crate) type ListRef = Arc<RwLock<Vec<Value>>>;
pub(crate) type DictRef = Arc<RwLock<BTreeMap<String, Value>>>;

/// A runtime value.
///
/// Dict contents use a `BTreeMap` so iteration is always in lexicographic
/// key order, which the language guarantees.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    List(ListRef),
    /// A read-only view over a (possibly still mutable) list.
    FrozenList(ListRef),
    Dict(DictRef),
    /// A read-only view over a (possibly still mutable) dict.
    FrozenDict(DictRef),
    Func(Arc<FuncValue>),
    Config(Arc<ConfigValue>),
}

/// A function value: user-defined, lambda, or native.
#[derive(Debug)]
pub(crate) struct FuncValue {
    pub name: String,
    /// File the function was defined in; used in error frames and repr.
    pub def_file: Arc<str>,
    pub params: Vec<ParamSpec>,
    /// Name binding extra positional arguments, when declared.
    pub varargs: Option<String>,
    /// Name binding unknown named arguments, when declared.
    pub kwargs: Option<String>,
    /// Rejects all positional arguments.
    pub keywords_only: bool,
    pub is_builtin: bool,
    pub is_private: bool,
    pub return_type: Option<Type>,
    pub docstring: Option<String>,
    /// The defining scope; defaults and the body evaluate against it.
    /// None for natives, which need no captured environment.
    pub scope: Option<Arc<Scope>>,
    pub code: FuncCode,
    /// Receiver of a bound method, passed as implicit first argument.
    pub bound_self: Option<Value>,
}

#[derive(Debug)]
pub(crate) enum FuncCode {
    Statements(Arc<Vec<Statement>>),
    Lambda(Arc<Expression>),
    Native(NativeFunc),
}

/// Native functions receive the interpreter and their bound arguments.
pub(crate) type NativeFunc = fn(&Interp, &crate::args::NativeCtx<'_>) -> RunResult<Value>;

/// One declared parameter of a function value.
#[derive(Debug, Clone)]
pub(crate) struct ParamSpec {
    pub name: String,
    /// Accepted types; empty accepts anything.
    pub types: SmallVec<[Type; 2]>,
    pub aliases: Vec<String>,
    pub default: Option<ParamDefault>,
}

#[derive(Debug, Clone)]
pub(crate) enum ParamDefault {
    /// Folded at optimization time or declared by a native.
    Constant(Constant),
    /// Evaluated lazily per call, in the defining scope.
    Expr(Arc<Expression>),
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().expect("value lock poisoned")
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().expect("value lock poisoned")
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Arc::new(RwLock::new(items)))
    }

    pub fn dict(map: BTreeMap<String, Self>) -> Self {
        Self::Dict(Arc::new(RwLock::new(map)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::List(_) | Self::FrozenList(_) => "list",
            Self::Dict(_) | Self::FrozenDict(_) => "dict",
            Self::Func(_) => "function",
            Self::Config(_) => "config",
        }
    }

    /// Truthiness: None and False are false, numbers are nonzero,
    /// aggregates are nonempty, functions and configs are always true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None | Self::Bool(false) => false,
            Self::Bool(true) => true,
            Self::Int(n) => *n != 0,
            Self::Str(s) => !s.is_empty(),
            Self::List(l) | Self::FrozenList(l) => !read_lock(l).is_empty(),
            Self::Dict(d) | Self::FrozenDict(d) => !read_lock(d).is_empty(),
            Self::Func(_) | Self::Config(_) => true,
        }
    }

    /// Whether the value satisfies a parameter type annotation. Booleans
    /// satisfy `int` (the historical `isinstance` rule carries over to
    /// argument checks).
    pub fn matches_type(&self, t: Type) -> bool {
        match t {
            Type::Bool => matches!(self, Self::Bool(_)),
            Type::Int => matches!(self, Self::Int(_) | Self::Bool(_)),
            Type::Str => matches!(self, Self::Str(_)),
            Type::List => matches!(self, Self::List(_) | Self::FrozenList(_)),
            Type::Dict => matches!(self, Self::Dict(_) | Self::FrozenDict(_)),
            Type::Function => matches!(self, Self::Func(_)),
            Type::Config => matches!(self, Self::Config(_)),
        }
    }

    /// Re-tags the handle as a read-only view. No data is cloned; the
    /// original handle keeps its mutability.
    pub fn freeze(&self) -> Self {
        match self {
            Self::List(l) => Self::FrozenList(Arc::clone(l)),
            Self::Dict(d) => Self::FrozenDict(Arc::clone(d)),
            Self::Config(c) => Self::Config(Arc::new(c.frozen_view())),
            other => other.clone(),
        }
    }

    /// Deep structural equality. Never fails: mismatched types are simply
    /// unequal.
    pub fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a) | Self::FrozenList(a), Self::List(b) | Self::FrozenList(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = read_lock(a);
                let b = read_lock(b);
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Self::Dict(a) | Self::FrozenDict(a), Self::Dict(b) | Self::FrozenDict(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let a = read_lock(a);
                let b = read_lock(b);
                a.len() == b.len() && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| ka == kb && va.equals(vb))
            }
            (Self::Func(a), Self::Func(b)) => Arc::ptr_eq(a, b),
            (Self::Config(a), Self::Config(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Ordering for `< > <= >=`: defined on ints, strings and lists
    /// (lexicographic).
    pub fn compare(&self, other: &Self) -> RunResult<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(b)),
            (Self::Str(a), Self::Str(b)) => Ok(a.as_ref().cmp(b.as_ref())),
            (Self::List(a) | Self::FrozenList(a), Self::List(b) | Self::FrozenList(b)) => {
                let a = read_lock(a).clone();
                let b = read_lock(b).clone();
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.compare(y)? {
                        Ordering::Equal => {}
                        other => return Ok(other),
                    }
                }
                Ok(a.len().cmp(&b.len()))
            }
            _ => Err(RunError::typ(format!(
                "'{}' and '{}' are not orderable",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// `+`: integer addition, string concatenation, list concatenation
    /// (producing a new list).
    pub fn add(&self, other: &Self) -> RunResult<Self> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(*b)
                .map(Self::Int)
                .ok_or_else(|| RunError::value("integer overflow")),
            (Self::Str(a), Self::Str(b)) => {
                let mut s = String::with_capacity(a.len() + b.len());
                s.push_str(a);
                s.push_str(b);
                Ok(Self::str(s))
            }
            (Self::List(a) | Self::FrozenList(a), Self::List(b) | Self::FrozenList(b)) => {
                let mut items = read_lock(a).clone();
                items.extend(read_lock(b).iter().cloned());
                Ok(Self::list(items))
            }
            _ => Err(RunError::typ(format!(
                "unsupported operand types for +: '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    pub fn subtract(&self, other: &Self) -> RunResult<Self> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_sub(*b)
                .map(Self::Int)
                .ok_or_else(|| RunError::value("integer overflow")),
            _ => Err(RunError::typ(format!(
                "unsupported operand types for -: '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// `%`: integer modulo, or printf-style string interpolation.
    pub fn modulo(&self, other: &Self) -> RunResult<Self> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => {
                if *b == 0 {
                    return Err(RunError::value("modulo by zero"));
                }
                Ok(Self::Int(a.rem_euclid(*b)))
            }
            (Self::Str(template), rhs) => format_percent(template, rhs).map(Self::str),
            _ => Err(RunError::typ(format!(
                "unsupported operand types for %: '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Membership, defined by the right-hand side (`self`): lists search
    /// element-wise, strings test substring containment, dicts test key
    /// presence.
    pub fn contains(&self, needle: &Self) -> RunResult<bool> {
        match self {
            Self::List(l) | Self::FrozenList(l) => Ok(read_lock(l).iter().any(|v| v.equals(needle))),
            Self::Str(s) => match needle {
                Self::Str(sub) => Ok(s.contains(sub.as_ref())),
                other => Err(RunError::typ(format!(
                    "'in <str>' requires a string, not '{}'",
                    other.type_name()
                ))),
            },
            Self::Dict(d) | Self::FrozenDict(d) => match needle {
                Self::Str(key) => Ok(read_lock(d).contains_key(key.as_ref())),
                other => Err(RunError::typ(format!(
                    "'in <dict>' requires a string key, not '{}'",
                    other.type_name()
                ))),
            },
            _ => Err(RunError::typ(format!(
                "'{}' does not support membership tests",
                self.type_name()
            ))),
        }
    }

    /// Single-element indexing: `a[i]`.
    pub fn index(&self, index: &Self) -> RunResult<Self> {
        match self {
            Self::List(l) | Self::FrozenList(l) => {
                let items = read_lock(l);
                let i = resolve_index(items.len(), index.expect_int()?, "list")?;
                Ok(items[i].clone())
            }
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let i = resolve_index(chars.len(), index.expect_int()?, "string")?;
                Ok(Self::str(chars[i].to_string()))
            }
            Self::Dict(d) | Self::FrozenDict(d) => {
                let key = index.expect_str()?;
                read_lock(d)
                    .get(key.as_ref())
                    .cloned()
                    .ok_or_else(|| RunError::value(format!("unknown dict key '{key}'")))
            }
            Self::Config(c) => {
                let key = index.expect_str()?;
                c.get(key.as_ref())
                    .ok_or_else(|| RunError::config(format!("unknown config key '{key}'")))
            }
            _ => Err(RunError::typ(format!("'{}' is not indexable", self.type_name()))),
        }
    }

    /// Index assignment: `a[i] = v`. Strings are immutable and frozen
    /// views deny mutation.
    pub fn set_index(&self, index: &Self, value: Self) -> RunResult<()> {
        match self {
            Self::List(l) => {
                let mut items = write_lock(l);
                let i = resolve_index(items.len(), index.expect_int()?, "list")?;
                items[i] = value;
                Ok(())
            }
            Self::Dict(d) => {
                let key = index.expect_str()?;
                write_lock(d).insert(key.to_string(), value);
                Ok(())
            }
            Self::Config(c) => c.set(index.expect_str()?.as_ref(), value),
            Self::FrozenList(_) => Err(RunError::value("cannot assign to a frozen list")),
            Self::FrozenDict(_) => Err(RunError::value("cannot assign to a frozen dict")),
            _ => Err(RunError::typ(format!(
                "'{}' does not support item assignment",
                self.type_name()
            ))),
        }
    }

    /// Slicing `a[i:j]` on lists and strings with the usual negative-index
    /// wrapping; out-of-range slice bounds saturate.
    pub fn slice(&self, start: Option<i64>, end: Option<i64>) -> RunResult<Self> {
        match self {
            Self::List(l) | Self::FrozenList(l) => {
                let items = read_lock(l);
                let (lo, hi) = slice_bounds(items.len(), start, end);
                Ok(Self::list(items[lo..hi].to_vec()))
            }
            Self::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let (lo, hi) = slice_bounds(chars.len(), start, end);
                Ok(Self::str(chars[lo..hi].iter().collect::<String>()))
            }
            _ => Err(RunError::typ(format!("'{}' cannot be sliced", self.type_name()))),
        }
    }

    pub fn expect_int(&self) -> RunResult<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            _ => Err(RunError::typ(format!("expected an int, not '{}'", self.type_name()))),
        }
    }

    pub fn expect_str(&self) -> RunResult<Arc<str>> {
        match self {
            Self::Str(s) => Ok(Arc::clone(s)),
            _ => Err(RunError::typ(format!("expected a string, not '{}'", self.type_name()))),
        }
    }

    pub fn expect_bool(&self) -> RunResult<bool> {
        match self {
            Self::Bool(b) => Ok(*b),
            _ => Err(RunError::typ(format!("expected a bool, not '{}'", self.type_name()))),
        }
    }

    /// Snapshot of list contents; accepts both mutable and frozen lists.
    pub fn expect_list_items(&self) -> RunResult<Vec<Self>> {
        match self {
            Self::List(l) | Self::FrozenList(l) => Ok(read_lock(l).clone()),
            _ => Err(RunError::typ(format!("expected a list, not '{}'", self.type_name()))),
        }
    }

    pub fn expect_func(&self) -> RunResult<Arc<FuncValue>> {
        match self {
            Self::Func(f) => Ok(Arc::clone(f)),
            _ => Err(RunError::domain(format!("'{}' is not callable", self.type_name()))),
        }
    }

    /// Python-style repr, used by `str()` on aggregates, `%r`, and error
    /// messages.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        self.write_repr(&mut out);
        out
    }

    fn write_repr(&self, out: &mut String) {
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Self::Str(s) => {
                out.push('"');
                for c in s.chars() {
                    match c {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            Self::List(l) | Self::FrozenList(l) => {
                out.push('[');
                for (i, item) in read_lock(l).iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out);
                }
                out.push(']');
            }
            Self::Dict(d) | Self::FrozenDict(d) => {
                out.push('{');
                for (i, (k, v)) in read_lock(d).iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "\"{k}\": ");
                    v.write_repr(out);
                }
                out.push('}');
            }
            Self::Func(f) => {
                let _ = write!(out, "<function {}>", f.name);
            }
            Self::Config(_) => out.push_str("<config>"),
        }
    }

    /// Human-readable form: strings render without quotes, everything else
    /// as its repr. Used by `str()`, f-strings and `%s`.
    pub fn display_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            other => other.repr(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Constant {
    /// Instantiates the constant as a fresh runtime value. Folded list
    /// literals produce a new mutable list per call.
    pub fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::Int(*n),
            Self::Str(s) => Value::Str(Arc::clone(s)),
            Self::List(items) => Value::list(items.iter().map(Self::to_value).collect()),
        }
    }
}

/// Resolves a possibly-negative index against a length; out of range is an
/// error.
fn resolve_index(len: usize, index: i64, what: &str) -> RunResult<usize> {
    let len = len as i64;
    let resolved = if index < 0 { index + len } else { index };
    if resolved < 0 || resolved >= len {
        return Err(RunError::value(format!("{what} index {index} out of range")));
    }
    Ok(resolved as usize)
}

/// Resolves slice bounds with Python semantics: negative indices wrap,
/// out-of-range bounds saturate, and an empty range is produced when the
/// bounds cross.
fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |idx: i64| -> i64 {
        let idx = if idx < 0 { idx + len } else { idx };
        idx.clamp(0, len)
    };
    let lo = clamp(start.unwrap_or(0));
    let hi = clamp(end.unwrap_or(len));
    (lo as usize, lo.max(hi) as usize)
}

/// Printf-style `%` formatting on strings. Supports `%s`, `%d`/`%i`, `%r`
/// and `%%`; a list on the right-hand side is splatted across the verbs.
pub(crate) fn format_percent(template: &str, rhs: &Value) -> RunResult<String> {
    let args: Vec<Value> = match rhs {
        Value::List(l) | Value::FrozenList(l) => read_lock(l).clone(),
        other => vec![other.clone()],
    };
    let mut out = String::with_capacity(template.len());
    let mut next = 0usize;
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s') => {
                let arg = args
                    .get(next)
                    .ok_or_else(|| RunError::value("not enough arguments for format string"))?;
                out.push_str(&arg.display_str());
                next += 1;
            }
            Some('d' | 'i') => {
                let arg = args
                    .get(next)
                    .ok_or_else(|| RunError::value("not enough arguments for format string"))?;
                let _ = write!(out, "{}", arg.expect_int()?);
                next += 1;
            }
            Some('r') => {
                let arg = args
                    .get(next)
                    .ok_or_else(|| RunError::value("not enough arguments for format string"))?;
                out.push_str(&arg.repr());
                next += 1;
            }
            Some(other) => {
                return Err(RunError::value(format!("unsupported format character '{other}'")));
            }
            None => return Err(RunError::value("incomplete format")),
        }
    }
    if next < args.len() && matches!(rhs, Value::List(_) | Value::FrozenList(_)) {
        return Err(RunError::value("not all arguments converted during string formatting"));
    }
    Ok(out)
}
