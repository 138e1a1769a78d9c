//! The public value mirror.
//!
//! Hosts pass configuration in and receive evaluation results as
//! [`Object`]s, decoupled from the internal `Value` representation (which
//! carries shared mutable handles that must not leak across the API).

use std::collections::BTreeMap;

use crate::value::{Value, read_lock};

/// A plain, owned mirror of the runtime value model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Object>),
    Dict(BTreeMap<String, Object>),
}

impl Object {
    pub(crate) fn from_value(value: &Value) -> Self {
        match value {
            Value::None => Self::None,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(n) => Self::Int(*n),
            Value::Str(s) => Self::Str(s.to_string()),
            Value::List(l) | Value::FrozenList(l) => Self::List(read_lock(l).iter().map(Self::from_value).collect()),
            Value::Dict(d) | Value::FrozenDict(d) => Self::Dict(
                read_lock(d)
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from_value(v)))
                    .collect(),
            ),
            // Functions and configs have no portable form; their repr is
            // the most useful thing a host can receive.
            other => Self::Str(other.repr()),
        }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Self::None => Value::None,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(n) => Value::Int(*n),
            Self::Str(s) => Value::str(s.as_str()),
            Self::List(items) => Value::list(items.iter().map(Self::to_value).collect()),
            Self::Dict(map) => Value::dict(map.iter().map(|(k, v)| (k.clone(), v.to_value())).collect()),
        }
    }
}

impl From<&str> for Object {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Object {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for Object {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Object {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl<T: Into<Object>> From<Vec<T>> for Object {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}
