//! Dict and config methods.

use super::bound_method;
use crate::args::{NativeCtx, param};
use crate::ast::{Constant, Type};
use crate::error::{RunError, RunResult};
use crate::interp::Interp;
use crate::value::{Value, read_lock, write_lock};

/// Looks up a dict method by name, returning it bound to `receiver`.
pub(crate) fn dict_method(receiver: &Value, name: &str) -> Option<Value> {
    let method = match name {
        "get" => bound_method(
            name,
            receiver,
            vec![
                param("key").typed(&[Type::Str]),
                param("default").with_default(Constant::None),
            ],
            dict_get,
        ),
        "setdefault" => bound_method(
            name,
            receiver,
            vec![
                param("key").typed(&[Type::Str]),
                param("default").with_default(Constant::None),
            ],
            dict_setdefault,
        ),
        "keys" => bound_method(name, receiver, vec![], dict_keys),
        "values" => bound_method(name, receiver, vec![], dict_values),
        "items" => bound_method(name, receiver, vec![], dict_items),
        "copy" => bound_method(name, receiver, vec![], dict_copy),
        _ => return None,
    };
    Some(method)
}

/// Looks up a config method by name. Configs expose `get` and
/// `setdefault` alongside their keys.
pub(crate) fn config_method(receiver: &Value, name: &str) -> Option<Value> {
    let method = match name {
        "get" => bound_method(
            name,
            receiver,
            vec![
                param("key").typed(&[Type::Str]),
                param("default").with_default(Constant::None),
            ],
            config_get,
        ),
        "setdefault" => bound_method(
            name,
            receiver,
            vec![
                param("key").typed(&[Type::Str]),
                param("default").with_default(Constant::None),
            ],
            config_setdefault,
        ),
        _ => return None,
    };
    Some(method)
}

fn dict_get(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let key = ctx.args.expect_str("key")?;
    match ctx.args.get("self") {
        Value::Dict(d) | Value::FrozenDict(d) => Ok(read_lock(&d)
            .get(key.as_ref())
            .cloned()
            .unwrap_or_else(|| ctx.args.get("default"))),
        other => Err(RunError::typ(format!("get() on '{}'", other.type_name()))),
    }
}

fn dict_setdefault(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let key = ctx.args.expect_str("key")?;
    match ctx.args.get("self") {
        Value::Dict(d) => {
            let mut map = write_lock(&d);
            if let Some(existing) = map.get(key.as_ref()) {
                return Ok(existing.clone());
            }
            let default = ctx.args.get("default");
            map.insert(key.to_string(), default.clone());
            Ok(default)
        }
        Value::FrozenDict(_) => Err(RunError::value("cannot call setdefault() on a frozen dict")),
        other => Err(RunError::typ(format!("setdefault() on '{}'", other.type_name()))),
    }
}

fn dict_keys(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    match ctx.args.get("self") {
        Value::Dict(d) | Value::FrozenDict(d) => {
            Ok(Value::list(read_lock(&d).keys().map(|k| Value::str(k.as_str())).collect()))
        }
        other => Err(RunError::typ(format!("keys() on '{}'", other.type_name()))),
    }
}

fn dict_values(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    match ctx.args.get("self") {
        Value::Dict(d) | Value::FrozenDict(d) => Ok(Value::list(read_lock(&d).values().cloned().collect())),
        other => Err(RunError::typ(format!("values() on '{}'", other.type_name()))),
    }
}

fn dict_items(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    match ctx.args.get("self") {
        Value::Dict(d) | Value::FrozenDict(d) => Ok(Value::list(
            read_lock(&d)
                .iter()
                .map(|(k, v)| Value::list(vec![Value::str(k.as_str()), v.clone()]))
                .collect(),
        )),
        other => Err(RunError::typ(format!("items() on '{}'", other.type_name()))),
    }
}

/// Shallow copy; copying a frozen dict yields a mutable one.
fn dict_copy(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    match ctx.args.get("self") {
        Value::Dict(d) | Value::FrozenDict(d) => Ok(Value::dict(read_lock(&d).clone())),
        other => Err(RunError::typ(format!("copy() on '{}'", other.type_name()))),
    }
}

fn config_get(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let key = ctx.args.expect_str("key")?;
    match ctx.args.get("self") {
        Value::Config(c) => Ok(c.get(key.as_ref()).unwrap_or_else(|| ctx.args.get("default"))),
        other => Err(RunError::typ(format!("get() on '{}'", other.type_name()))),
    }
}

fn config_setdefault(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let key = ctx.args.expect_str("key")?;
    match ctx.args.get("self") {
        Value::Config(c) => c.setdefault(key.as_ref(), ctx.args.get("default")),
        other => Err(RunError::typ(format!("setdefault() on '{}'", other.type_name()))),
    }
}
