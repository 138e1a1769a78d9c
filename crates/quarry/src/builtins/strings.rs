//! String methods, bound to their receiver on property access.

use std::sync::Arc;

use super::bound_method;
use crate::args::{NativeCtx, param};
use crate::ast::{Constant, Type};
use crate::error::{RunError, RunResult};
use crate::interp::Interp;
use crate::value::Value;

/// Looks up a string method by name, returning it bound to `receiver`.
pub(crate) fn str_method(receiver: &Value, name: &str) -> Option<Value> {
    let method = match name {
        "join" => bound_method(name, receiver, vec![param("seq").typed(&[Type::List])], str_join),
        "split" => bound_method(
            name,
            receiver,
            vec![param("on").typed(&[Type::Str]).with_default(Constant::None)],
            str_split,
        ),
        "replace" => bound_method(
            name,
            receiver,
            vec![param("old").typed(&[Type::Str]), param("new").typed(&[Type::Str])],
            str_replace,
        ),
        "partition" => bound_method(name, receiver, vec![param("sep").typed(&[Type::Str])], str_partition),
        "rpartition" => bound_method(name, receiver, vec![param("sep").typed(&[Type::Str])], str_rpartition),
        "startswith" => bound_method(name, receiver, vec![param("prefix").typed(&[Type::Str])], str_startswith),
        "endswith" => bound_method(name, receiver, vec![param("suffix").typed(&[Type::Str])], str_endswith),
        "lstrip" => bound_method(name, receiver, strip_params(), str_lstrip),
        "rstrip" => bound_method(name, receiver, strip_params(), str_rstrip),
        "strip" => bound_method(name, receiver, strip_params(), str_strip),
        "find" => bound_method(name, receiver, vec![param("needle").typed(&[Type::Str])], str_find),
        "rfind" => bound_method(name, receiver, vec![param("needle").typed(&[Type::Str])], str_rfind),
        "format" => super::bound_method_with(name, receiver, vec![], Some("args"), Some("kwargs"), str_format),
        "count" => bound_method(name, receiver, vec![param("needle").typed(&[Type::Str])], str_count),
        "upper" => bound_method(name, receiver, vec![], str_upper),
        "lower" => bound_method(name, receiver, vec![], str_lower),
        _ => return None,
    };
    Some(method)
}

fn strip_params() -> Vec<crate::value::ParamSpec> {
    vec![param("chars").typed(&[Type::Str]).with_default(Constant::None)]
}

fn receiver(ctx: &NativeCtx<'_>) -> RunResult<Arc<str>> {
    ctx.args.get("self").expect_str()
}

fn str_join(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let sep = receiver(ctx)?;
    let items = ctx.args.get("seq").expect_list_items()?;
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(
            item.expect_str()
                .map_err(|e| RunError::new(e.kind, format!("join() requires strings: {}", e.message)))?
                .as_ref(),
        );
    }
    Ok(Value::str(out))
}

fn str_split(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let parts: Vec<Value> = match ctx.args.opt_str("on")? {
        Some(sep) => {
            if sep.is_empty() {
                return Err(RunError::value("empty separator"));
            }
            s.split(sep.as_ref()).map(Value::str).collect()
        }
        None => s.split_whitespace().map(Value::str).collect(),
    };
    Ok(Value::list(parts))
}

fn str_replace(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let old = ctx.args.expect_str("old")?;
    let new = ctx.args.expect_str("new")?;
    Ok(Value::str(s.replace(old.as_ref(), new.as_ref())))
}

fn str_partition(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let sep = ctx.args.expect_str("sep")?;
    let parts = match s.split_once(sep.as_ref()) {
        Some((before, after)) => vec![Value::str(before), Value::Str(sep), Value::str(after)],
        None => vec![Value::Str(s), Value::str(""), Value::str("")],
    };
    Ok(Value::list(parts))
}

fn str_rpartition(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let sep = ctx.args.expect_str("sep")?;
    let parts = match s.rsplit_once(sep.as_ref()) {
        Some((before, after)) => vec![Value::str(before), Value::Str(sep), Value::str(after)],
        None => vec![Value::str(""), Value::str(""), Value::Str(s)],
    };
    Ok(Value::list(parts))
}

fn str_startswith(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let prefix = ctx.args.expect_str("prefix")?;
    Ok(Value::Bool(s.starts_with(prefix.as_ref())))
}

fn str_endswith(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let suffix = ctx.args.expect_str("suffix")?;
    Ok(Value::Bool(s.ends_with(suffix.as_ref())))
}

fn strip_set(ctx: &NativeCtx<'_>) -> RunResult<Option<Vec<char>>> {
    Ok(ctx.args.opt_str("chars")?.map(|s| s.chars().collect()))
}

fn str_lstrip(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let out = match strip_set(ctx)? {
        Some(chars) => s.trim_start_matches(|c| chars.contains(&c)).to_owned(),
        None => s.trim_start().to_owned(),
    };
    Ok(Value::str(out))
}

fn str_rstrip(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let out = match strip_set(ctx)? {
        Some(chars) => s.trim_end_matches(|c| chars.contains(&c)).to_owned(),
        None => s.trim_end().to_owned(),
    };
    Ok(Value::str(out))
}

fn str_strip(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let out = match strip_set(ctx)? {
        Some(chars) => s.trim_matches(|c| chars.contains(&c)).to_owned(),
        None => s.trim().to_owned(),
    };
    Ok(Value::str(out))
}

/// Byte offsets converted to character indices, matching what indexing and
/// slicing operate on.
fn char_index_of(s: &str, byte_offset: usize) -> i64 {
    s[..byte_offset].chars().count() as i64
}

fn str_find(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let needle = ctx.args.expect_str("needle")?;
    Ok(Value::Int(
        s.find(needle.as_ref()).map_or(-1, |off| char_index_of(&s, off)),
    ))
}

fn str_rfind(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let needle = ctx.args.expect_str("needle")?;
    Ok(Value::Int(
        s.rfind(needle.as_ref()).map_or(-1, |off| char_index_of(&s, off)),
    ))
}

/// `format()`: `{}` takes the next positional argument, `{name}` a named
/// one, `{{`/`}}` are literal braces.
fn str_format(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let template = receiver(ctx)?;
    let positional = ctx.args.get("args").expect_list_items()?;
    let mut next = 0usize;
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(RunError::value("unmatched '{' in format string"));
                }
                let value = if name.is_empty() {
                    let v = positional
                        .get(next)
                        .ok_or_else(|| RunError::value("not enough arguments for format string"))?;
                    next += 1;
                    v.clone()
                } else {
                    ctx.args
                        .extras
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| v.clone())
                        .ok_or_else(|| RunError::value(format!("unknown format argument '{name}'")))?
                };
                out.push_str(&value.display_str());
            }
            c => out.push(c),
        }
    }
    Ok(Value::str(out))
}

fn str_count(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let s = receiver(ctx)?;
    let needle = ctx.args.expect_str("needle")?;
    if needle.is_empty() {
        return Ok(Value::Int(s.chars().count() as i64 + 1));
    }
    Ok(Value::Int(s.matches(needle.as_ref()).count() as i64))
}

fn str_upper(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    Ok(Value::str(receiver(ctx)?.to_uppercase()))
}

fn str_lower(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    Ok(Value::str(receiver(ctx)?.to_lowercase()))
}
