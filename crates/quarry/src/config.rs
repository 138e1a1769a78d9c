//! The copy-on-write configuration object exposed to BUILD files as
//! `CONFIG`.
//!
//! A config is a two-level mapping: an immutable shared base (built by the
//! host from its structured configuration, keys reflected to ALL_CAPS) and
//! a mutable overlay. Reads consult the overlay first, then the base.
//! Writes go to the overlay. Copying is shallow: the base is shared and
//! the overlay dropped. A frozen view denies all mutation, `setdefault`
//! included.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::error::{RunError, RunResult};
use crate::value::{Value, read_lock, write_lock};

#[derive(Debug)]
pub(crate) struct ConfigValue {
    base: Arc<BTreeMap<String, Value>>,
    overlay: RwLock<BTreeMap<String, Value>>,
    frozen: bool,
}

impl ConfigValue {
    pub fn new(base: Arc<BTreeMap<String, Value>>) -> Self {
        Self {
            base,
            overlay: RwLock::new(BTreeMap::new()),
            frozen: false,
        }
    }

    /// Overlay-then-base lookup.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(v) = read_lock(&self.overlay).get(key) {
            return Some(v.clone());
        }
        self.base.get(key).cloned()
    }

    pub fn set(&self, key: &str, value: Value) -> RunResult<()> {
        if self.frozen {
            return Err(RunError::value("cannot modify a frozen config"));
        }
        write_lock(&self.overlay).insert(key.to_owned(), value);
        Ok(())
    }

    /// Returns the existing value, or sets and returns the default.
    pub fn setdefault(&self, key: &str, default: Value) -> RunResult<Value> {
        if let Some(v) = self.get(key) {
            return Ok(v);
        }
        self.set(key, default.clone())?;
        Ok(default)
    }

    /// Shallow copy: shares the base, drops the overlay.
    pub fn copy(&self) -> Self {
        Self::new(Arc::clone(&self.base))
    }

    /// A child config seeded with the current visible state, used when a
    /// subinclude runs in a fresh scope: it sees the caller's effective
    /// configuration but its own writes stay private.
    pub fn child_copy(&self) -> Self {
        Self {
            base: Arc::clone(&self.base),
            overlay: RwLock::new(read_lock(&self.overlay).clone()),
            frozen: false,
        }
    }

    /// A view sharing the current contents that denies all mutation.
    pub fn frozen_view(&self) -> Self {
        Self {
            base: Arc::clone(&self.base),
            overlay: RwLock::new(read_lock(&self.overlay).clone()),
            frozen: true,
        }
    }

    /// All visible keys, overlay shadowing base, in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let overlay = read_lock(&self.overlay);
        let mut keys: Vec<String> = self.base.keys().chain(overlay.keys()).cloned().collect();
        keys.sort_unstable();
        keys.dedup();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Arc<BTreeMap<String, Value>> {
        let mut m = BTreeMap::new();
        m.insert("OS".to_owned(), Value::str("linux"));
        m.insert("ARCH".to_owned(), Value::str("amd64"));
        Arc::new(m)
    }

    #[test]
    fn overlay_shadows_base() {
        let cfg = ConfigValue::new(base());
        assert_eq!(cfg.get("OS").unwrap().display_str(), "linux");
        cfg.set("OS", Value::str("darwin")).unwrap();
        assert_eq!(cfg.get("OS").unwrap().display_str(), "darwin");
        assert_eq!(cfg.get("ARCH").unwrap().display_str(), "amd64");
        assert!(cfg.get("MISSING").is_none());
    }

    #[test]
    fn copy_shares_base_and_drops_overlay() {
        let cfg = ConfigValue::new(base());
        cfg.set("OS", Value::str("darwin")).unwrap();
        let copy = cfg.copy();
        assert_eq!(copy.get("OS").unwrap().display_str(), "linux");
    }

    #[test]
    fn setdefault_only_writes_once() {
        let cfg = ConfigValue::new(base());
        let v = cfg.setdefault("NEW", Value::Int(1)).unwrap();
        assert!(v.equals(&Value::Int(1)));
        let v = cfg.setdefault("NEW", Value::Int(2)).unwrap();
        assert!(v.equals(&Value::Int(1)));
    }

    #[test]
    fn frozen_view_denies_mutation() {
        let cfg = ConfigValue::new(base());
        cfg.set("X", Value::Int(1)).unwrap();
        let frozen = cfg.frozen_view();
        assert!(frozen.get("X").unwrap().equals(&Value::Int(1)));
        assert!(frozen.set("X", Value::Int(2)).is_err());
        assert!(frozen.setdefault("Y", Value::Int(3)).is_err());
    }

    #[test]
    fn keys_are_sorted_and_deduplicated() {
        let cfg = ConfigValue::new(base());
        cfg.set("OS", Value::str("darwin")).unwrap();
        cfg.set("ZZZ", Value::Int(1)).unwrap();
        assert_eq!(cfg.keys(), vec!["ARCH".to_owned(), "OS".to_owned(), "ZZZ".to_owned()]);
    }
}
