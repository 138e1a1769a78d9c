//! The host collaborator surface: the trait the embedding build system
//! implements, plus the package/target records the interpreter registers
//! against it.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use crate::error::{RunError, RunResult};
use crate::label::BuildLabel;

/// Everything the interpreter needs from its host build system.
///
/// Implementations must be thread-safe: multiple packages parse
/// concurrently against one host.
pub trait BuildHost: Send + Sync {
    /// Blocks until the given label has been built, returning the paths of
    /// its output files. The parse permit has been released around this
    /// call, so blocking here cannot stall other parses.
    fn wait_until_built(&self, label: &BuildLabel) -> Result<Vec<String>, String>;

    /// Reads a source or output file. The default goes to the real
    /// filesystem; hosts with virtual filesystems override it.
    fn read_file(&self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    /// Glob within a package directory.
    fn glob(&self, package_dir: &str, request: &GlobRequest) -> Vec<String>;

    /// Registers a nested repository.
    fn register_subrepo(&self, spec: SubrepoSpec) -> Result<(), String> {
        let _ = spec;
        Ok(())
    }

    /// Graph bookkeeping hook invoked before a subinclude blocks on its
    /// target.
    fn register_subinclude(&self, label: &BuildLabel, dependent: Option<&BuildLabel>) {
        let _ = (label, dependent);
    }
}

/// Arguments to [`BuildHost::glob`].
#[derive(Debug, Clone, Default)]
pub struct GlobRequest {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub hidden: bool,
    pub include_symlinks: bool,
}

/// A nested repository registration from the `subrepo()` builtin.
#[derive(Debug, Clone, Default)]
pub struct SubrepoSpec {
    pub name: String,
    /// Label of the target whose outputs root the subrepo, if any.
    pub dep: String,
    pub path: Option<String>,
    pub config: Option<String>,
    pub bazel_compat: bool,
    pub arch: Option<String>,
    pub plugin: bool,
}

/// A container of targets corresponding to one source directory. The host
/// constructs it before calling into the parser.
#[derive(Debug)]
pub struct Package {
    pub name: String,
    pub subrepo: Option<String>,
    targets: RwLock<IndexMap<String, Arc<Target>>>,
}

impl Package {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subrepo: None,
            targets: RwLock::new(IndexMap::new()),
        }
    }

    #[must_use]
    pub fn with_subrepo(name: impl Into<String>, subrepo: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subrepo: Some(subrepo.into()),
            targets: RwLock::new(IndexMap::new()),
        }
    }

    /// Registers a target, refusing duplicates by name.
    pub(crate) fn register_target(&self, target: Target) -> RunResult<Arc<Target>> {
        let mut targets = self.targets.write().expect("package lock poisoned");
        if targets.contains_key(&target.name) {
            return Err(RunError::domain(format!(
                "duplicate build target name '{}' in package //{}",
                target.name, self.name
            )));
        }
        let target = Arc::new(target);
        targets.insert(target.name.clone(), Arc::clone(&target));
        Ok(target)
    }

    #[must_use]
    pub fn target(&self, name: &str) -> Option<Arc<Target>> {
        self.targets.read().expect("package lock poisoned").get(name).cloned()
    }

    /// Target names in registration order.
    #[must_use]
    pub fn target_names(&self) -> Vec<String> {
        self.targets
            .read()
            .expect("package lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn has_targets(&self) -> bool {
        !self.targets.read().expect("package lock poisoned").is_empty()
    }

    /// The directory this package's sources live in.
    #[must_use]
    pub fn dir(&self) -> &str {
        &self.name
    }
}

/// One build target as registered by `build_rule`.
#[derive(Debug, Clone, Default)]
pub struct Target {
    pub name: String,
    pub srcs: Vec<String>,
    pub outs: Vec<String>,
    pub cmd: Option<String>,
    pub test_cmd: Option<String>,
    pub deps: Vec<String>,
    pub data: Vec<String>,
    pub tools: Vec<String>,
    pub visibility: Vec<String>,
    pub testonly: bool,
    pub licences: Vec<String>,
    pub labels: Vec<String>,
    pub binary: bool,
    pub test: bool,
    pub sandbox: bool,
    pub test_sandbox: bool,
    /// Test timeout in seconds.
    pub timeout: Option<i64>,
    /// Number of automatic retries for a flaky test.
    pub flaky: i64,
    pub test_outputs: Vec<String>,
    pub hashes: Vec<String>,
    pub requires: Vec<String>,
    pub provides: BTreeMap<String, String>,
    pub secrets: Vec<String>,
    pub building_description: Option<String>,
    pub pass_env: Vec<String>,
}

impl Target {
    #[must_use]
    pub fn label(&self, package: &Package) -> BuildLabel {
        BuildLabel {
            subrepo: package.subrepo.clone(),
            package: package.name.clone(),
            name: self.name.clone(),
        }
    }
}
