//! Call argument binding.
//!
//! Positional arguments bind to parameters in declaration order; named
//! arguments bind by name or alias; `*args`/`**kwargs` parameters collect
//! the overflow; keywords-only functions reject positionals outright.
//! Defaults are evaluated lazily per call in the defining scope (unless
//! folded to constants), which is what makes mutable defaults safe.
//! Explicitly passed values are checked against each parameter's type set.

use std::collections::BTreeMap;
use std::sync::Arc;

use ahash::AHashMap;

use crate::ast::Type;
use crate::error::{RunError, RunResult};
use crate::interp::Interp;
use crate::scope::Scope;
use crate::value::{FuncValue, ParamDefault, ParamSpec, Value};

/// Arguments as evaluated at a call site.
#[derive(Debug, Default)]
pub(crate) struct CallArgs {
    pub pos: Vec<Value>,
    pub named: Vec<(String, Value)>,
}

/// Arguments after binding: every declared parameter has a value, plus the
/// extra named arguments a `**kwargs` function received.
#[derive(Debug, Default)]
pub(crate) struct BoundArgs {
    values: AHashMap<String, Value>,
    pub extras: Vec<(String, Value)>,
}

impl BoundArgs {
    /// The bound value of a declared parameter.
    pub fn get(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or(Value::None)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn expect_str(&self, name: &str) -> RunResult<Arc<str>> {
        self.get(name)
            .expect_str()
            .map_err(|e| RunError::new(e.kind, format!("argument '{name}': {}", e.message)))
    }

    pub fn opt_str(&self, name: &str) -> RunResult<Option<Arc<str>>> {
        match self.get(name) {
            Value::None => Ok(None),
            other => other.expect_str().map(Some),
        }
    }

    pub fn expect_bool(&self, name: &str) -> RunResult<bool> {
        match self.get(name) {
            Value::None => Ok(false),
            other => other.expect_bool(),
        }
    }

    pub fn opt_bool(&self, name: &str) -> RunResult<Option<bool>> {
        match self.get(name) {
            Value::None => Ok(None),
            other => other.expect_bool().map(Some),
        }
    }

    pub fn opt_int(&self, name: &str) -> RunResult<Option<i64>> {
        match self.get(name) {
            Value::None => Ok(None),
            other => other.expect_int().map(Some),
        }
    }

    /// A list of strings; a bare string is accepted as a singleton, and
    /// None as empty. This is the shape most `build_rule` arguments take.
    pub fn str_list(&self, name: &str) -> RunResult<Vec<String>> {
        match self.get(name) {
            Value::None => Ok(Vec::new()),
            Value::Str(s) => Ok(vec![s.to_string()]),
            other => other
                .expect_list_items()?
                .iter()
                .map(|v| v.expect_str().map(|s| s.to_string()))
                .collect::<RunResult<Vec<String>>>()
                .map_err(|e| RunError::new(e.kind, format!("argument '{name}': {}", e.message))),
        }
    }

    /// A dict of string keys to strings; None binds as empty.
    pub fn str_dict(&self, name: &str) -> RunResult<BTreeMap<String, String>> {
        match self.get(name) {
            Value::None => Ok(BTreeMap::new()),
            Value::Dict(d) | Value::FrozenDict(d) => crate::value::read_lock(&d)
                .iter()
                .map(|(k, v)| v.expect_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            other => Err(RunError::typ(format!(
                "argument '{name}': expected a dict, not '{}'",
                other.type_name()
            ))),
        }
    }
}

/// Context handed to native functions: the caller's scope (for package,
/// config and name binding) and the bound arguments.
pub(crate) struct NativeCtx<'a> {
    pub scope: &'a Arc<Scope>,
    pub args: BoundArgs,
}

/// Binds call-site arguments against a function's signature.
pub(crate) fn bind_call_args(interp: &Interp, func: &FuncValue, args: CallArgs) -> RunResult<BoundArgs> {
    let mut bound = BoundArgs::default();
    let mut pos = args.pos;
    if let Some(receiver) = &func.bound_self {
        pos.insert(0, receiver.clone());
    }
    if func.keywords_only && !pos.is_empty() {
        return Err(RunError::typ(format!(
            "{}() accepts only keyword arguments",
            func.name
        )));
    }

    let mut extra_pos = Vec::new();
    for (i, value) in pos.into_iter().enumerate() {
        match func.params.get(i) {
            Some(param) => {
                check_type(func, param, &value)?;
                bound.values.insert(param.name.clone(), value);
            }
            None if func.varargs.is_some() => extra_pos.push(value),
            None => {
                return Err(RunError::typ(format!(
                    "too many arguments to {}(): accepts at most {}",
                    func.name,
                    func.params.len()
                )));
            }
        }
    }

    for (name, value) in args.named {
        let param = func
            .params
            .iter()
            .find(|p| p.name == name || p.aliases.iter().any(|a| a == &name));
        match param {
            Some(param) => {
                if bound.values.contains_key(&param.name) {
                    return Err(RunError::typ(format!(
                        "{}() got multiple values for argument '{}'",
                        func.name, param.name
                    )));
                }
                check_type(func, param, &value)?;
                bound.values.insert(param.name.clone(), value);
            }
            None if func.kwargs.is_some() => {
                // Unknown names are set directly in the callee's scope
                // and additionally collected under the kwargs name.
                bound.extras.push((name.clone(), value.clone()));
                bound.values.insert(name, value);
            }
            None => {
                return Err(RunError::typ(format!(
                    "unexpected argument '{name}' to {}()",
                    func.name
                )));
            }
        }
    }

    for param in &func.params {
        if bound.values.contains_key(&param.name) {
            continue;
        }
        let value = match &param.default {
            Some(ParamDefault::Constant(c)) => c.to_value(),
            Some(ParamDefault::Expr(expr)) => {
                let defining = func
                    .scope
                    .as_ref()
                    .ok_or_else(|| RunError::typ(format!("{}() has no defining scope for defaults", func.name)))?;
                interp.eval_expression(defining, expr)?
            }
            None => {
                return Err(RunError::typ(format!(
                    "missing required argument '{}' to {}()",
                    param.name, func.name
                )));
            }
        };
        bound.values.insert(param.name.clone(), value);
    }

    if let Some(varargs) = &func.varargs {
        bound.values.insert(varargs.clone(), Value::list(extra_pos));
    }
    if let Some(kwargs) = &func.kwargs {
        let map: BTreeMap<String, Value> = bound.extras.iter().cloned().collect();
        bound.values.insert(kwargs.clone(), Value::dict(map));
    }
    Ok(bound)
}

/// Type-checks an explicitly passed argument. None passes whenever the
/// parameter has a default; booleans satisfy `int` type sets.
fn check_type(func: &FuncValue, param: &ParamSpec, value: &Value) -> RunResult<()> {
    if param.types.is_empty() {
        return Ok(());
    }
    if matches!(value, Value::None) {
        if param.default.is_some() {
            return Ok(());
        }
        return Err(RunError::typ(format!(
            "invalid type for argument '{}' to {}(): None is not allowed",
            param.name, func.name
        )));
    }
    if param.types.iter().any(|t| value.matches_type(*t)) {
        return Ok(());
    }
    let expected: Vec<String> = param.types.iter().map(|t| t.to_string()).collect();
    Err(RunError::typ(format!(
        "invalid type for argument '{}' to {}(): expected {}, was {}",
        param.name,
        func.name,
        expected.join("|"),
        value.type_name()
    )))
}

/// Builder helpers for declaring native signatures.
pub(crate) fn param(name: &str) -> ParamSpec {
    ParamSpec {
        name: name.to_owned(),
        types: smallvec::SmallVec::new(),
        aliases: Vec::new(),
        default: None,
    }
}

impl ParamSpec {
    pub fn typed(mut self, types: &[Type]) -> Self {
        self.types = types.iter().copied().collect();
        self
    }

    pub fn aliased(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_owned());
        self
    }

    pub fn with_default(mut self, default: crate::ast::Constant) -> Self {
        self.default = Some(ParamDefault::Constant(default));
        self
    }
}
