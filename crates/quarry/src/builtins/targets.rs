//! Target registration and package-level builtins: `build_rule`,
//! `package`, `subrepo` and `glob`.

use super::{Native, native};
use crate::args::{NativeCtx, param};
use crate::ast::{Constant, Type};
use crate::error::{RunError, RunResult};
use crate::host::{GlobRequest, SubrepoSpec, Target};
use crate::interp::Interp;
use crate::scope::Scope;
use crate::value::{Value, read_lock};

pub(super) fn register(scope: &Scope) {
    scope.set("build_rule", build_rule_native().build());
    scope.set(
        "package",
        native("package", builtin_package).kwargs("kwargs").keywords_only().build(),
    );
    scope.set(
        "subrepo",
        native("subrepo", builtin_subrepo)
            .params(vec![
                param("name").typed(&[Type::Str]),
                param("dep").typed(&[Type::Str]).with_default(Constant::Str("".into())),
                param("path").typed(&[Type::Str]).with_default(Constant::None),
                param("config").typed(&[Type::Str]).with_default(Constant::None),
                param("bazel_compat").typed(&[Type::Bool]).with_default(Constant::Bool(false)),
                param("arch").typed(&[Type::Str]).with_default(Constant::None),
                param("plugin").typed(&[Type::Bool]).with_default(Constant::Bool(false)),
            ])
            .build(),
    );
    scope.set(
        "glob",
        native("glob", builtin_glob)
            .params(vec![
                param("include").typed(&[Type::List, Type::Str]),
                param("exclude")
                    .typed(&[Type::List])
                    .aliased("excludes")
                    .with_default(Constant::List(std::sync::Arc::new(Vec::new()))),
                param("hidden").typed(&[Type::Bool]).with_default(Constant::Bool(false)),
                param("include_symlinks").typed(&[Type::Bool]).with_default(Constant::Bool(false)),
                param("allow_empty").typed(&[Type::Bool]).with_default(Constant::Bool(false)),
            ])
            .build(),
    );
}

/// The full keyword surface of `build_rule`. Everything is optional but
/// the name; None defaults pick up the configured package defaults.
fn build_rule_native() -> Native {
    let none = || Constant::None;
    native("build_rule", builtin_build_rule)
        .params(vec![
            param("name").typed(&[Type::Str]),
            param("srcs").typed(&[Type::List, Type::Str]).with_default(none()),
            param("outs").typed(&[Type::List, Type::Str]).with_default(none()),
            param("cmd").typed(&[Type::Str]).with_default(none()),
            param("test_cmd").typed(&[Type::Str]).with_default(none()),
            param("deps").typed(&[Type::List]).with_default(none()),
            param("data").typed(&[Type::List]).with_default(none()),
            param("tools").typed(&[Type::List, Type::Str]).with_default(none()),
            param("visibility").typed(&[Type::List]).with_default(none()),
            param("testonly").typed(&[Type::Bool]).with_default(none()),
            param("licences").typed(&[Type::List, Type::Str]).with_default(none()),
            param("labels").typed(&[Type::List]).with_default(none()),
            param("binary").typed(&[Type::Bool]).with_default(Constant::Bool(false)),
            param("test").typed(&[Type::Bool]).with_default(Constant::Bool(false)),
            param("sandbox").typed(&[Type::Bool]).with_default(none()),
            param("test_sandbox").typed(&[Type::Bool]).with_default(none()),
            param("timeout").typed(&[Type::Int]).with_default(none()),
            param("flaky").typed(&[Type::Bool, Type::Int]).with_default(none()),
            param("test_outputs").typed(&[Type::List]).with_default(none()),
            param("hashes").typed(&[Type::List, Type::Str]).with_default(none()),
            param("requires").typed(&[Type::List]).with_default(none()),
            param("provides").typed(&[Type::Dict]).with_default(none()),
            param("secrets").typed(&[Type::List, Type::Str]).with_default(none()),
            param("building_description").typed(&[Type::Str]).with_default(none()),
            param("pass_env").typed(&[Type::List]).with_default(none()),
        ])
        .keywords_only()
}

/// Constructs a target from keyword arguments, applies configured
/// defaults, and registers it on the current package.
fn builtin_build_rule(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let pkg = ctx
        .scope
        .pkg
        .as_ref()
        .ok_or_else(|| RunError::domain("build_rule() can only be called while a package is being parsed"))?;
    let config = ctx.scope.config();
    let name = ctx.args.expect_str("name")?;

    // Config defaults apply where the caller passed None.
    let visibility = match ctx.args.get("visibility") {
        Value::None => config_str_list(config.as_deref(), "DEFAULT_VISIBILITY"),
        _ => ctx.args.str_list("visibility")?,
    };
    let testonly = match ctx.args.opt_bool("testonly")? {
        Some(t) => t,
        None => config
            .as_deref()
            .and_then(|c| c.get("DEFAULT_TESTONLY"))
            .is_some_and(|v| v.is_truthy()),
    };
    let licences = match ctx.args.get("licences") {
        Value::None => config_str_list(config.as_deref(), "DEFAULT_LICENCES"),
        _ => ctx.args.str_list("licences")?,
    };
    let sandbox = match ctx.args.opt_bool("sandbox")? {
        Some(s) => s,
        None => config
            .as_deref()
            .and_then(|c| c.get("DEFAULT_SANDBOX"))
            .is_some_and(|v| v.is_truthy()),
    };
    let flaky = match ctx.args.get("flaky") {
        Value::None => 0,
        Value::Bool(true) => 3,
        Value::Bool(false) => 0,
        other => other.expect_int()?,
    };

    let target = Target {
        name: name.to_string(),
        srcs: ctx.args.str_list("srcs")?,
        outs: ctx.args.str_list("outs")?,
        cmd: ctx.args.opt_str("cmd")?.map(|s| s.to_string()),
        test_cmd: ctx.args.opt_str("test_cmd")?.map(|s| s.to_string()),
        deps: ctx.args.str_list("deps")?,
        data: ctx.args.str_list("data")?,
        tools: ctx.args.str_list("tools")?,
        visibility,
        testonly,
        licences,
        labels: ctx.args.str_list("labels")?,
        binary: ctx.args.expect_bool("binary")?,
        test: ctx.args.expect_bool("test")?,
        sandbox,
        test_sandbox: ctx.args.opt_bool("test_sandbox")?.unwrap_or(false),
        timeout: ctx.args.opt_int("timeout")?,
        flaky,
        test_outputs: ctx.args.str_list("test_outputs")?,
        hashes: ctx.args.str_list("hashes")?,
        requires: ctx.args.str_list("requires")?,
        provides: ctx.args.str_dict("provides")?,
        secrets: ctx.args.str_list("secrets")?,
        building_description: ctx.args.opt_str("building_description")?.map(|s| s.to_string()),
        pass_env: ctx.args.str_list("pass_env")?,
    };
    pkg.register_target(target)?;
    Ok(Value::str(format!(":{name}")))
}

fn config_str_list(config: Option<&crate::config::ConfigValue>, key: &str) -> Vec<String> {
    let Some(value) = config.and_then(|c| c.get(key)) else {
        return Vec::new();
    };
    match &value {
        Value::Str(s) => vec![s.to_string()],
        Value::List(_) | Value::FrozenList(_) => value
            .expect_list_items()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.expect_str().ok().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Package config keys that do not mirror an existing config key.
const PACKAGE_KEYS: &[&str] = &[
    "default_visibility",
    "default_testonly",
    "default_licences",
    "default_sandbox",
    "features",
];

/// `package()` sets per-package configuration overrides. It must run
/// before any target is registered; dict-valued keys merge into the
/// existing value.
fn builtin_package(_interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    if let Some(pkg) = &ctx.scope.pkg {
        if pkg.has_targets() {
            return Err(RunError::domain(
                "package() must be called before any build targets are defined",
            ));
        }
    }
    let config = ctx
        .scope
        .config()
        .ok_or_else(|| RunError::config("CONFIG is not defined in this scope"))?;
    for (key, value) in &ctx.args.extras {
        let upper = key.to_uppercase();
        let known = config.get(&upper).is_some() || PACKAGE_KEYS.contains(&key.as_str());
        if !known {
            return Err(RunError::config(format!("unknown package configuration key '{key}'")));
        }
        let merged = match (config.get(&upper), value) {
            (Some(Value::Dict(old) | Value::FrozenDict(old)), Value::Dict(new) | Value::FrozenDict(new)) => {
                let mut map = read_lock(&old).clone();
                for (k, v) in read_lock(new).iter() {
                    map.insert(k.clone(), v.clone());
                }
                Value::dict(map)
            }
            _ => value.clone(),
        };
        config.set(&upper, merged)?;
    }
    Ok(Value::None)
}

fn builtin_subrepo(interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let name = ctx.args.expect_str("name")?;
    let spec = SubrepoSpec {
        name: name.to_string(),
        dep: ctx.args.expect_str("dep")?.to_string(),
        path: ctx.args.opt_str("path")?.map(|s| s.to_string()),
        config: ctx.args.opt_str("config")?.map(|s| s.to_string()),
        bazel_compat: ctx.args.expect_bool("bazel_compat")?,
        arch: ctx.args.opt_str("arch")?.map(|s| s.to_string()),
        plugin: ctx.args.expect_bool("plugin")?,
    };
    interp
        .host
        .register_subrepo(spec)
        .map_err(|msg| RunError::domain(format!("cannot register subrepo '{name}': {msg}")))?;
    Ok(Value::str(name.as_ref()))
}

/// Host filesystem glob; failing to match anything is an error unless
/// `allow_empty` is set.
fn builtin_glob(interp: &Interp, ctx: &NativeCtx<'_>) -> RunResult<Value> {
    let include = ctx.args.str_list("include")?;
    let request = GlobRequest {
        include: include.clone(),
        exclude: ctx.args.str_list("exclude")?,
        hidden: ctx.args.expect_bool("hidden")?,
        include_symlinks: ctx.args.expect_bool("include_symlinks")?,
    };
    let dir = ctx.scope.pkg.as_ref().map_or("", |p| p.dir());
    let matches = interp.host.glob(dir, &request);
    if matches.is_empty() && !ctx.args.expect_bool("allow_empty")? {
        return Err(RunError::value(format!(
            "glob of {include:?} in //{dir} matched nothing (pass allow_empty=True if this is intended)"
        )));
    }
    Ok(Value::list(matches.into_iter().map(Value::str).collect()))
}
