//! Native builtin functions registered into the root scope.
//!
//! Each native is a plain `fn` receiving the interpreter and a bound
//! argument set; string/dict/config methods live in their own modules and
//! are bound to their receiver on property access.

mod dicts;
mod strings;
mod targets;

use std::cmp::Ordering;
use std::sync::Arc;

use crate::args::{NativeCtx, param};
use crate::ast::{Constant, Type};
use crate::error::{RunError, RunResult};
use crate::interp::Interp;
use crate::scope::Scope;
use crate::value::{FuncCode, FuncValue, NativeFunc, ParamSpec, Value, format_percent};

pub(crate) use dicts::{config_method, dict_method};
pub(crate) use strings::str_method;

/// Builder for native function values.
struct Native {
    func: FuncValue,
}

fn native(name: &str, f: NativeFunc) -> Native {
    Native {
        func: FuncValue {
            name: name.to_owned(),
            def_file: Arc::from("<builtin>"),
            params: Vec::new(),
            varargs: None,
            kwargs: None,
            keywords_only: false,
            is_builtin: true,
            is_private: false,
            return_type: None,
            docstring: None,
            scope: None,
            code: FuncCode::Native(f),
            bound_self: None,
        },
    }
}

impl Native {
    fn params(mut self, params: Vec<ParamSpec>) -> Self {
        self.func.params = params;
        self
    }

    fn varargs(mut self, name: &str) -> Self {
        self.func.varargs = Some(name.to_owned());
        self
    }

    fn kwargs(mut self, name: &str) -> Self {
        self.func.kwargs = Some(name.to_owned());
        self
    }

    fn keywords_only(mut self) -> Self {
        self.func.keywords_only = true;
        self
    }

    fn build(self) -> Value {
        Value::Func(Arc::new(self.func))
    }
}

/// A method bound to its receiver: the receiver rides along as the
/// implicit first argument `self`.
pub(crate) fn bound_method(name: &str, receiver: &Value, params: Vec<ParamSpec>, f: NativeFunc) -> Value {
    bound_method_with(name, receiver, params, None, None, f)
}

/// As [`bound_method`], for methods that also take `*args`/`**kwargs`.
pub(crate) fn bound_method_with(
    name: &str,
    receiver: &Value,
    params: Vec<ParamSpec>,
    varargs: Option<&str>,
    kwargs: Option<&str>,
    f: NativeFunc,
) -> Value {
    let mut all_params = vec![param("self")];
    all_params.extend(params);
    let mut method = native(name, f);
    method.func.params = all_params;
    method.func.bound_self = Some(receiver.clone());
    method.func.varargs = varargs.map(str::to_owned);
    method.func.kwargs = kwargs.map(str::to_owned);
    method.build()
}

/// Registers every builtin into the given (root) scope.
pub(crate) fn register(scope: &Scope) {
    scope.set("len", native("len", builtin_len).params(vec![param("obj")]).build());
    scope.set(
        "bool",
        native("bool", builtin_bool)
            .params(vec![param("x").with_default(Constant::Bool(false))])
            .build(),
    );
    scope.set("int", native("int", builtin_int).params(vec![param("x")]).build());
    scope.set(
        "str",
        native("str", builtin_str)
            .params(vec![param("x").with_default(Constant::Str(Arc::from("")))])
            .build(),
    );
    // `list` and `dict` exist both as conversions and as the type
    // functions isinstance() recognizes.
    scope.set(
        "list",
        native("list", builtin_list)
            .params(vec![param("x").with_default(Constant::None)])
            .build(),
    );
    scope.set(
        "dict",
        native("dict", builtin_dict)
            .params(vec![param("x").with_default(Constant::None)])
            .build(),
    );
    scope.set(
        "isinstance",
        native("isinstance", builtin_isinstance)
            .params(vec![param("obj"), param("types")])
            .build(),
    );
    scope.set(
        "range",
        native("range", builtin_range)
            .params(vec![
                param("start").typed(&[Type::Int]),
                param("stop").typed(&[Type::Int]).with_default(Constant::None),
                param("step").typed(&[Type::Int]).with_default(Constant::None),
            ])
            .build(),
    );
    scope.set(
        "enumerate",
        native("enumerate", builtin_enumerate)
            .params(vec![
                param("seq").typed(&[Type::List]),
                param("start").typed(&[Type::Int]).with_default(Constant::Int(0)),
            ])
            .build(),
    );
    scope.set("zip", native("zip", builtin_zip).varargs("seqs").build());
    scope.set(
        "any",
        native("any", builtin_any).params(vec![param("seq").typed(&[Type::List])]).build(),
    );
    scope.set(
        "all",
        native("all", builtin_all).params(vec![param("seq").typed(&[Type::List])]).build(),
    );
    scope.set("min", native("min", builtin_min).varargs("args").build());
    scope.set("max", native("max", builtin_max).varargs("args").build());
    scope.set(
        "sorted",
        native("sorted", builtin_sorted)
            .params(vec![
                param("seq").typed(&[Type::List]),
                param("reverse").typed(&[Type::Bool]).with_default(Constant::Bool(false)),
            ])
            .build(),
    );
    scope.set(
        "reversed",
        native("reversed", builtin_reversed)
            .params(vec![param("seq").typed(&[Type::List])])
            .build(),
    );
    scope.set("fail", native("fail", builtin_fail).params(vec![param("msg")]).build());
    scope.set(
        "select",
        native("select", builtin_select)
            .params(vec![param("conditions").typed(&[Type::Dict])])
            .build(),
    );
    scope.set(
        "subinclude",
        native("subinclude", builtin_subinclude).varargs("targets").build(),
    );
    scope.set(
        "load",
        native("load", builtin_load)
            .params(vec![param("target").typed(&[Type::Str])])
            .varargs("symbols")
            .build(),
    );
    for (name, f) in LOG_LEVELS {
        scope.set(
            *name,
            native(name, *f)
                .params(vec![param("msg").typed(&[Type::Str])])
                .varargs("args")
                .build(),
        );
    }
    targets::register(scope);
}

// ----------------------------------------------------------------------
// General-purpose builtins
// ----------------------------------------------------------------------

fn builtin_len(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let obj = ctx.args.get("obj");
    let len = match &obj {
        Value::Str(s) => s.chars().count(),
        Value::List(l) | Value::FrozenList(l) => crate::value::read_lock(l).len(),
        Value::Dict(d) | Value::FrozenDict(d) => crate::value::read_lock(d).len(),
        other => {
            return Err(RunError::typ(format!("'{}' has no len()", other.type_name())));
        }
    };
    Ok(Value::Int(len as i64))
}

fn builtin_bool(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    Ok(Value::Bool(ctx.args.get("x").is_truthy()))
}

fn builtin_int(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    match ctx.args.get("x") {
        Value::Int(n) => Ok(Value::Int(n)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| RunError::value(format!("invalid literal for int(): '{s}'"))),
        other => Err(RunError::typ(format!(
            "int() argument must be an int, bool or str, not '{}'",
            other.type_name()
        ))),
    }
}

fn builtin_str(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    Ok(Value::str(ctx.args.get("x").display_str()))
}

fn builtin_list(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    match ctx.args.get("x") {
        Value::None => Ok(Value::list(Vec::new())),
        list @ (Value::List(_) | Value::FrozenList(_)) => Ok(Value::list(list.expect_list_items()?)),
        other => Err(RunError::typ(format!(
            "list() argument must be a list, not '{}'",
            other.type_name()
        ))),
    }
}

fn builtin_dict(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    match ctx.args.get("x") {
        Value::None => Ok(Value::dict(std::collections::BTreeMap::new())),
        Value::Dict(d) | Value::FrozenDict(d) => Ok(Value::dict(crate::value::read_lock(&d).clone())),
        other => Err(RunError::typ(format!(
            "dict() argument must be a dict, not '{}'",
            other.type_name()
        ))),
    }
}

/// `isinstance(x, t)` where `t` is one of the type functions (`bool`,
/// `int`, `str`, `list`, `dict`) or a list of them. Booleans count as
/// ints for historical reasons.
fn builtin_isinstance(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let obj = ctx.args.get("obj");
    let types = ctx.args.get("types");
    let candidates = match &types {
        Value::List(_) | Value::FrozenList(_) => types.expect_list_items()?,
        other => vec![other.clone()],
    };
    for candidate in candidates {
        let func = candidate.expect_func().map_err(|_| {
            RunError::typ("isinstance() arg 2 must be a type function or a list of type functions")
        })?;
        let t = match func.name.as_str() {
            "bool" => Type::Bool,
            "int" => Type::Int,
            "str" => Type::Str,
            "list" => Type::List,
            "dict" => Type::Dict,
            "config" => Type::Config,
            other => {
                return Err(RunError::typ(format!("isinstance() does not recognize type '{other}'")));
            }
        };
        if obj.matches_type(t) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn builtin_range(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let first = ctx.args.get("start").expect_int()?;
    let (start, stop) = match ctx.args.opt_int("stop")? {
        Some(stop) => (first, stop),
        None => (0, first),
    };
    let step = ctx.args.opt_int("step")?.unwrap_or(1);
    if step == 0 {
        return Err(RunError::value("range() step must not be zero"));
    }
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::Int(i));
        i += step;
    }
    Ok(Value::list(items))
}

fn builtin_enumerate(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let items = ctx.args.get("seq").expect_list_items()?;
    let start = ctx.args.get("start").expect_int()?;
    let out = items
        .into_iter()
        .enumerate()
        .map(|(i, v)| Value::list(vec![Value::Int(start + i as i64), v]))
        .collect();
    Ok(Value::list(out))
}

fn builtin_zip(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let seqs = ctx.args.get("seqs").expect_list_items()?;
    let lists: Vec<Vec<Value>> = seqs
        .iter()
        .map(Value::expect_list_items)
        .collect::<RunResult<_>>()?;
    let len = lists.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(len);
    for i in 0..len {
        out.push(Value::list(lists.iter().map(|l| l[i].clone()).collect()));
    }
    Ok(Value::list(out))
}

fn builtin_any(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let items = ctx.args.get("seq").expect_list_items()?;
    Ok(Value::Bool(items.iter().any(Value::is_truthy)))
}

fn builtin_all(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let items = ctx.args.get("seq").expect_list_items()?;
    Ok(Value::Bool(items.iter().all(Value::is_truthy)))
}

fn builtin_min(interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    extremum(interp, ctx, Ordering::Less)
}

fn builtin_max(interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    extremum(interp, ctx, Ordering::Greater)
}

/// `min`/`max` over either a single list argument or the arguments
/// themselves.
fn extremum(_interp: &Interp, ctx: &NativeCtx<'_>, keep: Ordering) -> RunResult<Value> {
    let args = ctx.args.get("args").expect_list_items()?;
    let single_list = args.len() == 1 && matches!(args[0], Value::List(_) | Value::FrozenList(_));
    let items = if single_list { args[0].expect_list_items()? } else { args };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| RunError::value("min()/max() of an empty sequence"))?;
    for item in iter {
        if item.compare(&best)? == keep {
            best = item;
        }
    }
    Ok(best)
}

fn builtin_sorted(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let mut items = ctx.args.get("seq").expect_list_items()?;
    let reverse = ctx.args.expect_bool("reverse")?;
    let mut failure: Option<RunError> = None;
    items.sort_by(|a, b| match a.compare(b) {
        Ok(ord) => ord,
        Err(e) => {
            failure.get_or_insert(e);
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if reverse {
        items.reverse();
    }
    Ok(Value::list(items))
}

fn builtin_reversed(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let mut items = ctx.args.get("seq").expect_list_items()?;
    items.reverse();
    Ok(Value::list(items))
}

fn builtin_fail(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    Err(RunError::domain(ctx.args.get("msg").display_str()))
}

/// `select()` resolves its dict against configuration keys: the first key
/// (in sorted order) whose config value is truthy wins, with
/// `//conditions:default` as fallback.
fn builtin_select(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    const DEFAULT_KEY: &str = "//conditions:default";
    let conditions = ctx.args.get("conditions");
    let config = ctx
        .scope
        .config()
        .ok_or_else(|| RunError::config("CONFIG is not defined in this scope"))?;
    let map = match &conditions {
        Value::Dict(d) | Value::FrozenDict(d) => crate::value::read_lock(d).clone(),
        other => {
            return Err(RunError::typ(format!(
                "select() requires a dict, not '{}'",
                other.type_name()
            )));
        }
    };
    let mut default = None;
    for (key, value) in &map {
        if key == DEFAULT_KEY {
            default = Some(value.clone());
            continue;
        }
        if config.get(key).is_some_and(|v| v.is_truthy()) {
            return Ok(value.clone());
        }
    }
    default.ok_or_else(|| RunError::value("no matching condition in select()"))
}

fn builtin_subinclude(interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let targets = ctx.args.get("targets").expect_list_items()?;
    if targets.is_empty() {
        return Err(RunError::typ("subinclude() requires at least one target"));
    }
    for target in targets {
        let label = target.expect_str()?;
        merge_subinclude(interp, ctx, label.as_ref())?;
    }
    Ok(Value::None)
}

/// `load()` is subinclude under its external-dialect name; the symbol
/// arguments are accepted and ignored.
fn builtin_load(interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let label = ctx.args.expect_str("target")?;
    merge_subinclude(interp, ctx, label.as_ref())?;
    Ok(Value::None)
}

fn merge_subinclude(interp: &Interp, ctx: &NativeCtx<'_>, label: &str) -> RunResult<()> {
    for ns in interp.subinclude(ctx.scope, label)? {
        for (name, value) in ns.iter() {
            ctx.scope.set(name.clone(), value.clone());
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Logging
// ----------------------------------------------------------------------

const LOG_LEVELS: &[(&str, NativeFunc)] = &[
    ("debug", log_debug),
    ("info", log_info),
    ("notice", log_notice),
    ("warning", log_warning),
    ("error", log_error),
    ("fatal", log_fatal),
];

/// Formats a logging call's message and prepends the current file.
fn log_message(ctx: &NativeCtx<'_>) -> RunResult<String> {
    let msg = ctx.args.expect_str("msg")?;
    let args = ctx.args.get("args");
    let items = args.expect_list_items()?;
    let text = if items.is_empty() {
        msg.to_string()
    } else {
        format_percent(&msg, &args)?
    };
    Ok(format!("{}: {text}", ctx.scope.file))
}

fn log_debug(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    log::debug!("{}", log_message(ctx)?);
    Ok(Value::None)
}

fn log_info(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    log::info!("{}", log_message(ctx)?);
    Ok(Value::None)
}

fn log_notice(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    log::info!("{}", log_message(ctx)?);
    Ok(Value::None)
}

fn log_warning(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    log::warn!("{}", log_message(ctx)?);
    Ok(Value::None)
}

fn log_error(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    log::error!("{}", log_message(ctx)?);
    Ok(Value::None)
}

/// `fatal` both logs and aborts the current parse.
fn log_fatal(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let message = log_message(ctx)?;
    log::error!("{message}");
    Err(RunError::domain(message))
}
