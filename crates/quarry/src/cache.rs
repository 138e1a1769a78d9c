//! The concurrent, deduplicating subinclude cache and the global
//! parse-parallelism permit.
//!
//! The cache maps (output path, subrepo) to an evaluated, frozen namespace.
//! The first caller for a key wins the right to evaluate; concurrent
//! callers release their parse permit, wait on the cache's condvar, then
//! re-acquire the permit and read the result. An entry that errored is
//! removed so a later caller may retry. Releasing the permit before any
//! wait is what prevents a stall when every in-flight parse is blocked
//! behind the same pending subinclude.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};

use ahash::AHashMap;
use std::sync::Arc;

use crate::error::RunResult;
use crate::value::Value;

/// An immutable snapshot of a subincluded file's public bindings. Values
/// are frozen before insertion.
#[derive(Debug, Default)]
pub(crate) struct Namespace {
    bindings: BTreeMap<String, Value>,
}

impl Namespace {
    pub fn new(bindings: BTreeMap<String, Value>) -> Self {
        Self { bindings }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.bindings.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

/// Cache key: the output file being subincluded plus the subrepo the
/// including package lives in (the same file may evaluate differently per
/// subrepo configuration).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SubincludeKey {
    pub path: String,
    pub subrepo: Option<String>,
}

#[derive(Debug)]
enum Entry {
    /// First writer is evaluating; waiters sleep on the condvar.
    Pending,
    Ready(Arc<Namespace>),
}

#[derive(Debug, Default)]
pub(crate) struct SubincludeCache {
    entries: Mutex<AHashMap<SubincludeKey, Entry>>,
    cond: Condvar,
}

impl SubincludeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// First-writer-wins lookup. `build` runs at most once per key among
    /// concurrent callers; on error the entry is invalidated so a later
    /// call may retry. The caller must hold a parse permit from `limiter`.
    pub fn get_or_evaluate(
        &self,
        key: &SubincludeKey,
        limiter: &ParseLimiter,
        build: impl FnOnce() -> RunResult<Namespace>,
    ) -> RunResult<Arc<Namespace>> {
        let mut entries = self.lock_entries();
        loop {
            match entries.get(key) {
                Some(Entry::Ready(ns)) => return Ok(Arc::clone(ns)),
                Some(Entry::Pending) => {
                    limiter.release();
                    while matches!(entries.get(key), Some(Entry::Pending)) {
                        entries = self.cond.wait(entries).expect("subinclude cache lock poisoned");
                    }
                    drop(entries);
                    limiter.acquire();
                    entries = self.lock_entries();
                }
                None => {
                    entries.insert(key.clone(), Entry::Pending);
                    drop(entries);
                    let result = build();
                    let mut entries = self.lock_entries();
                    return match result {
                        Ok(ns) => {
                            let ns = Arc::new(ns);
                            entries.insert(key.clone(), Entry::Ready(Arc::clone(&ns)));
                            self.cond.notify_all();
                            Ok(ns)
                        }
                        Err(err) => {
                            entries.remove(key);
                            self.cond.notify_all();
                            Err(err)
                        }
                    };
                }
            }
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, AHashMap<SubincludeKey, Entry>> {
        self.entries.lock().expect("subinclude cache lock poisoned")
    }
}

/// A counting semaphore bounding how many parses run at once.
///
/// Every blocking wait inside an evaluation (build-graph waits, cache
/// waits) is bracketed by release/acquire so that blocked parses never pin
/// a permit.
#[derive(Debug)]
pub(crate) struct ParseLimiter {
    permits: Mutex<usize>,
    cond: Condvar,
}

impl ParseLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Mutex::new(capacity.max(1)),
            cond: Condvar::new(),
        }
    }

    pub fn acquire(&self) {
        let mut permits = self.permits.lock().expect("parse limiter lock poisoned");
        while *permits == 0 {
            permits = self.cond.wait(permits).expect("parse limiter lock poisoned");
        }
        *permits -= 1;
    }

    pub fn release(&self) {
        let mut permits = self.permits.lock().expect("parse limiter lock poisoned");
        *permits += 1;
        self.cond.notify_one();
    }

    /// Runs `f` with this thread's permit released, re-acquiring before
    /// returning. Used around host build-graph waits.
    pub fn with_released<R>(&self, f: impl FnOnce() -> R) -> R {
        self.release();
        let result = f();
        self.acquire();
        result
    }
}

/// RAII permit held for the duration of one parse.
pub(crate) struct PermitGuard<'a> {
    limiter: &'a ParseLimiter,
}

impl<'a> PermitGuard<'a> {
    pub fn acquire(limiter: &'a ParseLimiter) -> Self {
        limiter.acquire();
        Self { limiter }
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        self.limiter.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::error::RunError;

    fn key(path: &str) -> SubincludeKey {
        SubincludeKey {
            path: path.to_owned(),
            subrepo: None,
        }
    }

    #[test]
    fn concurrent_callers_share_one_evaluation() {
        let cache = Arc::new(SubincludeCache::new());
        let limiter = Arc::new(ParseLimiter::new(4));
        let builds = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let limiter = Arc::clone(&limiter);
            let builds = Arc::clone(&builds);
            handles.push(thread::spawn(move || {
                limiter.acquire();
                let ns = cache
                    .get_or_evaluate(&key("p/defs.build"), &limiter, || {
                        builds.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        let mut m = BTreeMap::new();
                        m.insert("x".to_owned(), Value::Int(42));
                        Ok(Namespace::new(m))
                    })
                    .unwrap();
                limiter.release();
                assert!(ns.get("x").unwrap().equals(&Value::Int(42)));
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errored_entry_allows_retry() {
        let cache = SubincludeCache::new();
        let limiter = ParseLimiter::new(1);
        limiter.acquire();
        let err = cache
            .get_or_evaluate(&key("bad.build"), &limiter, || Err(RunError::value("boom")))
            .unwrap_err();
        assert_eq!(err.message, "boom");
        let ns = cache
            .get_or_evaluate(&key("bad.build"), &limiter, || Ok(Namespace::default()))
            .unwrap();
        assert_eq!(ns.len(), 0);
        limiter.release();
    }

    #[test]
    fn waiting_releases_the_permit() {
        // One permit; the waiter must release it so the builder could make
        // progress if it needed a permit of its own.
        let cache = Arc::new(SubincludeCache::new());
        let limiter = Arc::new(ParseLimiter::new(1));
        let k = key("x.build");

        limiter.acquire();
        let builder = {
            let cache = Arc::clone(&cache);
            let limiter = Arc::clone(&limiter);
            let k = k.clone();
            thread::spawn(move || {
                cache
                    .get_or_evaluate(&k, &limiter, || {
                        thread::sleep(std::time::Duration::from_millis(30));
                        Ok(Namespace::default())
                    })
                    .unwrap()
            })
        };
        // Give the builder time to claim the entry, then wait on it from
        // this thread, which holds the only permit.
        thread::sleep(std::time::Duration::from_millis(10));
        let ns = cache.get_or_evaluate(&k, &limiter, || Ok(Namespace::default())).unwrap();
        assert_eq!(ns.len(), 0);
        builder.join().unwrap();
        limiter.release();
    }
}
