//! The tree-walking evaluator.
//!
//! One [`Interp`] backs one embedding `Parser`: it owns the builtin root
//! scope, the parsed-AST and source registries, the subinclude cache and
//! the parse permit. Evaluation itself is single-threaded per file; the
//! shared state is only touched through locks.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use ahash::AHashMap;

use crate::args::{CallArgs, NativeCtx, bind_call_args};
use crate::ast::{
    Call, Comprehension, DictLit, Expression, FString, FileInput, IdentAction, IdentExpr, IdentExprAction, Lambda,
    OpExpression, Operator, Optimized, SliceExpr, Statement, StatementKind, UnaryOp, ValueExpression, ValueKind,
};
use crate::builtins;
use crate::cache::{Namespace, ParseLimiter, SubincludeCache, SubincludeKey};
use crate::config::ConfigValue;
use crate::error::{RunError, RunResult};
use crate::host::{BuildHost, Package};
use crate::label::BuildLabel;
use crate::parse;
use crate::prepare;
use crate::run::FunctionInfo;
use crate::scope::{ParseMode, Scope};
use crate::value::{FuncCode, FuncValue, ParamDefault, ParamSpec, Value, read_lock};

/// Result of executing one statement.
#[derive(Debug)]
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// A retained source file, kept for error rendering.
#[derive(Debug, Clone)]
pub(crate) struct SourceEntry {
    pub text: Arc<str>,
    pub is_builtin: bool,
}

pub(crate) struct Interp {
    pub host: Arc<dyn BuildHost>,
    pub base_config: Arc<BTreeMap<String, Value>>,
    /// Root of every scope chain; holds natives and loaded builtins.
    pub root: Arc<Scope>,
    pub cache: SubincludeCache,
    pub limiter: ParseLimiter,
    preloads: RwLock<Vec<Arc<Namespace>>>,
    functions_by_file: Mutex<BTreeMap<String, Vec<FunctionInfo>>>,
    sources: Mutex<AHashMap<String, SourceEntry>>,
    asts: Mutex<AHashMap<String, Arc<FileInput>>>,
}

impl Interp {
    pub fn new(host: Arc<dyn BuildHost>, base_config: BTreeMap<String, Value>, parallelism: usize) -> Self {
        let root = Arc::new(Scope::root(Arc::from("<builtin>")));
        builtins::register(&root);
        Self {
            host,
            base_config: Arc::new(base_config),
            root,
            cache: SubincludeCache::new(),
            limiter: ParseLimiter::new(parallelism),
            preloads: RwLock::new(Vec::new()),
            functions_by_file: Mutex::new(BTreeMap::new()),
            sources: Mutex::new(AHashMap::new()),
            asts: Mutex::new(AHashMap::new()),
        }
    }

    // ------------------------------------------------------------------
    // Parsing and registries
    // ------------------------------------------------------------------

    /// Lexes, parses and optimizes in-memory source, recording the source
    /// text and defined functions for tooling and error rendering.
    pub fn parse_only(&self, text: &str, filename: &str, is_builtin: bool) -> RunResult<Arc<FileInput>> {
        // Retain the source before parsing so even lexical errors can be
        // rendered with line and column information.
        self.sources.lock().expect("sources lock poisoned").insert(
            filename.to_owned(),
            SourceEntry {
                text: Arc::from(text),
                is_builtin,
            },
        );
        let fname: Arc<str> = Arc::from(filename);
        let mut file = parse::parse_data(text, &fname)?;
        prepare::optimise(&mut file);
        self.record_functions(filename, &file);
        Ok(Arc::new(file))
    }

    /// Parses a file through the host filesystem, reusing the shared AST
    /// across evaluations of the same path.
    pub fn parse_file_cached(&self, path: &str) -> RunResult<Arc<FileInput>> {
        if let Some(ast) = self.asts.lock().expect("ast lock poisoned").get(path) {
            return Ok(Arc::clone(ast));
        }
        let text = self
            .host
            .read_file(path)
            .map_err(|e| RunError::value(format!("cannot read {path}: {e}")))?;
        let ast = self.parse_only(&text, path, false)?;
        self.asts
            .lock()
            .expect("ast lock poisoned")
            .insert(path.to_owned(), Arc::clone(&ast));
        Ok(ast)
    }

    fn record_functions(&self, filename: &str, file: &FileInput) {
        let mut infos = Vec::new();
        for stmt in file {
            if let StatementKind::FuncDef(def) = &stmt.kind {
                infos.push(FunctionInfo {
                    name: def.name.clone(),
                    params: def.args.iter().map(|a| a.name.clone()).collect(),
                    docstring: def.docstring.clone(),
                    is_private: def.is_private(),
                });
            }
        }
        self.functions_by_file
            .lock()
            .expect("functions lock poisoned")
            .insert(filename.to_owned(), infos);
    }

    pub fn functions_by_file(&self) -> BTreeMap<String, Vec<FunctionInfo>> {
        self.functions_by_file.lock().expect("functions lock poisoned").clone()
    }

    pub fn source(&self, filename: &str) -> Option<SourceEntry> {
        self.sources.lock().expect("sources lock poisoned").get(filename).cloned()
    }

    // ------------------------------------------------------------------
    // Scopes and file evaluation
    // ------------------------------------------------------------------

    /// A fresh evaluation scope for a file: child of the root scope, with
    /// a copy-on-write CONFIG and any preloaded names.
    pub fn new_file_scope(
        &self,
        file: Arc<str>,
        pkg: Option<Arc<Package>>,
        mode: ParseMode,
        parsing_for: Option<BuildLabel>,
    ) -> Arc<Scope> {
        let scope = Arc::new(Scope::file_scope(&self.root, file, pkg, mode, parsing_for));
        scope.set(
            "CONFIG",
            Value::Config(Arc::new(ConfigValue::new(Arc::clone(&self.base_config)))),
        );
        for ns in self.preloads.read().expect("preload lock poisoned").iter() {
            for (name, value) in ns.iter() {
                scope.set(name.clone(), value.clone());
            }
        }
        scope
    }

    /// Evaluates a file's statements; a top-level `return` value becomes
    /// the result.
    pub fn evaluate(&self, scope: &Arc<Scope>, file: &[Statement]) -> RunResult<Value> {
        match self.exec_statements(scope, file)? {
            Flow::Return(v) => Ok(v),
            _ => Ok(Value::None),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    pub fn exec_statements(&self, scope: &Arc<Scope>, statements: &[Statement]) -> RunResult<Flow> {
        for stmt in statements {
            match self
                .exec_statement(scope, stmt)
                .map_err(|e| e.with_frame(&scope.file, stmt.span))?
            {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_statement(&self, scope: &Arc<Scope>, stmt: &Statement) -> RunResult<Flow> {
        match &stmt.kind {
            StatementKind::FuncDef(def) => {
                let func = FuncValue {
                    name: def.name.clone(),
                    def_file: Arc::clone(&scope.file),
                    params: def.args.iter().map(param_spec).collect(),
                    varargs: def.varargs.clone(),
                    kwargs: def.kwargs.clone(),
                    keywords_only: def.keywords_only,
                    is_builtin: scope.builtin_defs,
                    is_private: def.is_private(),
                    return_type: def.return_type,
                    docstring: def.docstring.clone(),
                    scope: Some(Arc::clone(scope)),
                    code: FuncCode::Statements(Arc::clone(&def.statements)),
                    bound_self: None,
                };
                scope.set(def.name.clone(), Value::Func(Arc::new(func)));
                Ok(Flow::Normal)
            }
            StatementKind::If(stmt) => {
                if self.eval_expression(scope, &stmt.condition)?.is_truthy() {
                    return self.exec_statements(scope, &stmt.statements);
                }
                for (cond, block) in &stmt.elifs {
                    if self.eval_expression(scope, cond)?.is_truthy() {
                        return self.exec_statements(scope, block);
                    }
                }
                self.exec_statements(scope, &stmt.else_statements)
            }
            StatementKind::For(stmt) => {
                let items = self
                    .eval_expression(scope, &stmt.iterable)?
                    .expect_list_items()
                    .map_err(|e| RunError::new(e.kind, format!("cannot iterate: {}", e.message)))?;
                for item in items {
                    bind_loop_names(scope, &stmt.names, &item)?;
                    match self.exec_statements(scope, &stmt.statements)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            StatementKind::Return(expr) => {
                let value = match expr {
                    Some(e) => self.eval_expression(scope, e)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            StatementKind::Raise(expr) => {
                log::warn!("{}: raise is deprecated, use fail() instead", scope.file);
                let value = self.eval_expression(scope, expr)?;
                Err(RunError::domain(value.display_str()))
            }
            StatementKind::Assert { condition, message } => {
                if self.eval_expression(scope, condition)?.is_truthy() {
                    return Ok(Flow::Normal);
                }
                let text = match message {
                    Some(m) => self.eval_expression(scope, m)?.display_str(),
                    None => "assertion failed".to_owned(),
                };
                Err(RunError::value(text))
            }
            StatementKind::Pass => Ok(Flow::Normal),
            StatementKind::Continue => Ok(Flow::Continue),
            StatementKind::Break => Ok(Flow::Break),
            StatementKind::Literal(expr) => {
                self.eval_expression(scope, expr)?;
                Ok(Flow::Normal)
            }
            StatementKind::Ident(stmt) => {
                self.exec_ident_statement(scope, stmt)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_ident_statement(&self, scope: &Arc<Scope>, stmt: &crate::ast::IdentStatement) -> RunResult<()> {
        match &stmt.action {
            IdentAction::Assign(expr) => {
                let value = self.eval_expression(scope, expr)?;
                scope.set(stmt.name.clone(), value);
                Ok(())
            }
            IdentAction::AugAssign(expr) => {
                let current = scope
                    .lookup(&stmt.name)
                    .ok_or_else(|| RunError::name(format!("name '{}' is not defined", stmt.name)))?;
                let value = self.eval_expression(scope, expr)?;
                scope.set(stmt.name.clone(), current.add(&value)?);
                Ok(())
            }
            IdentAction::IndexAssign { index, augmented, value } => {
                let target = scope
                    .lookup(&stmt.name)
                    .ok_or_else(|| RunError::name(format!("name '{}' is not defined", stmt.name)))?;
                let index = self.eval_expression(scope, index)?;
                let value = self.eval_expression(scope, value)?;
                if *augmented {
                    let current = target.index(&index)?;
                    target.set_index(&index, current.add(&value)?)
                } else {
                    target.set_index(&index, value)
                }
            }
            IdentAction::Unpack { names, expr } => {
                let value = self.eval_expression(scope, expr)?;
                let items = value
                    .expect_list_items()
                    .map_err(|e| RunError::new(e.kind, format!("cannot unpack: {}", e.message)))?;
                let total = names.len() + 1;
                if items.len() != total {
                    return Err(RunError::typ(format!(
                        "cannot unpack a list of {} values into {total} variables",
                        items.len()
                    )));
                }
                let mut iter = items.into_iter();
                if let Some(first) = iter.next() {
                    scope.set(stmt.name.clone(), first);
                }
                for (name, item) in names.iter().zip(iter) {
                    scope.set(name.clone(), item);
                }
                Ok(())
            }
            IdentAction::Call(call) => {
                let callee = scope
                    .lookup(&stmt.name)
                    .ok_or_else(|| RunError::name(format!("name '{}' is not defined", stmt.name)))?;
                let func = callee.expect_func()?;
                let args = self.eval_call_args(scope, call)?;
                self.call_function(scope, &func, args)?;
                Ok(())
            }
            IdentAction::Property(chain) => {
                let receiver = scope
                    .lookup(&stmt.name)
                    .ok_or_else(|| RunError::name(format!("name '{}' is not defined", stmt.name)))?;
                self.eval_property_step(scope, receiver, chain)?;
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub fn eval_expression(&self, scope: &Arc<Scope>, expr: &Expression) -> RunResult<Value> {
        if let Some(opt) = &expr.optimized {
            return self.eval_optimized(scope, opt);
        }
        if let Some(ternary) = &expr.ternary {
            if self.eval_expression(scope, &ternary.condition)?.is_truthy() {
                return self.eval_expr_no_ternary(scope, expr);
            }
            return self.eval_expression(scope, &ternary.else_value);
        }
        self.eval_expr_no_ternary(scope, expr)
    }

    fn eval_optimized(&self, scope: &Arc<Scope>, opt: &Optimized) -> RunResult<Value> {
        match opt {
            Optimized::Constant(c) => Ok(c.to_value()),
            Optimized::Local(name) => scope
                .lookup(name)
                .ok_or_else(|| RunError::name(format!("name '{name}' is not defined"))),
            Optimized::Config(key) => {
                let config = scope
                    .config()
                    .ok_or_else(|| RunError::config("CONFIG is not defined in this scope"))?;
                config
                    .get(key)
                    .ok_or_else(|| RunError::config(format!("unknown config key '{key}'")))
            }
            Optimized::Join { separator, items } => {
                let mut out = String::new();
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(separator);
                    }
                    let v = self.eval_expression(scope, item)?;
                    out.push_str(v.expect_str()?.as_ref());
                }
                Ok(Value::str(out))
            }
        }
    }

    fn eval_expr_no_ternary(&self, scope: &Arc<Scope>, expr: &Expression) -> RunResult<Value> {
        let head = self.eval_unary_value(scope, expr.unary, &expr.val)?;
        if expr.ops.is_empty() {
            return Ok(head);
        }
        let mut pos = 0;
        self.climb(scope, head, &expr.ops, &mut pos, 0)
    }

    /// Precedence climbing over the parser's flat op list. `and`/`or`
    /// decide before their right operand is evaluated, so short-circuiting
    /// skips the operand (and anything binding tighter to it) entirely.
    fn climb(
        &self,
        scope: &Arc<Scope>,
        mut lhs: Value,
        ops: &[OpExpression],
        pos: &mut usize,
        min_prec: u8,
    ) -> RunResult<Value> {
        while *pos < ops.len() {
            let op = ops[*pos].op;
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            let rhs_index = *pos;
            *pos += 1;
            let short_circuits = match op {
                Operator::And => !lhs.is_truthy(),
                Operator::Or => lhs.is_truthy(),
                _ => false,
            };
            if short_circuits {
                while *pos < ops.len() && ops[*pos].op.precedence() > prec {
                    *pos += 1;
                }
                continue;
            }
            let rhs_head = self.eval_expression(scope, &ops[rhs_index].expr)?;
            let rhs = self.climb(scope, rhs_head, ops, pos, prec + 1)?;
            lhs = apply_binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn eval_unary_value(&self, scope: &Arc<Scope>, unary: Option<UnaryOp>, val: &ValueExpression) -> RunResult<Value> {
        let value = self.eval_value_expression(scope, val)?;
        match unary {
            None => Ok(value),
            Some(UnaryOp::Negate) => value
                .expect_int()?
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| RunError::value("integer overflow")),
            Some(UnaryOp::Not) => Ok(Value::Bool(!value.is_truthy())),
        }
    }

    fn eval_value_expression(&self, scope: &Arc<Scope>, val: &ValueExpression) -> RunResult<Value> {
        let mut value = match &val.kind {
            ValueKind::None => Value::None,
            ValueKind::True => Value::Bool(true),
            ValueKind::False => Value::Bool(false),
            ValueKind::Int(n) => Value::Int(*n),
            ValueKind::Str(s) => Value::str(s.as_str()),
            ValueKind::FString(fs) => self.eval_fstring(scope, fs)?,
            ValueKind::List(list) | ValueKind::Tuple(list) => self.eval_expr_list(scope, list)?,
            ValueKind::Paren(inner) => self.eval_expression(scope, inner)?,
            ValueKind::Dict(dict) => self.eval_dict_lit(scope, dict)?,
            ValueKind::Lambda(lambda) => self.make_lambda(scope, lambda),
            ValueKind::Ident(ident) => self.eval_ident_expr(scope, ident)?,
        };
        for slice in &val.slices {
            value = match slice {
                SliceExpr::Index(e) => {
                    let index = self.eval_expression(scope, e)?;
                    value.index(&index)?
                }
                SliceExpr::Range { start, end } => {
                    let start = match start {
                        Some(e) => Some(self.eval_expression(scope, e)?.expect_int()?),
                        None => None,
                    };
                    let end = match end {
                        Some(e) => Some(self.eval_expression(scope, e)?.expect_int()?),
                        None => None,
                    };
                    value.slice(start, end)?
                }
            };
        }
        if let Some(property) = &val.property {
            value = self.eval_property_step(scope, value, property)?;
        } else if let Some(call) = &val.call {
            let func = value.expect_func()?;
            let args = self.eval_call_args(scope, call)?;
            value = self.call_function(scope, &func, args)?;
        }
        Ok(value)
    }

    fn eval_ident_expr(&self, scope: &Arc<Scope>, ident: &IdentExpr) -> RunResult<Value> {
        let value = scope
            .lookup(&ident.name)
            .ok_or_else(|| RunError::name(format!("name '{}' is not defined", ident.name)))?;
        self.apply_ident_actions(scope, value, &ident.actions)
    }

    fn apply_ident_actions(&self, scope: &Arc<Scope>, mut value: Value, actions: &[IdentExprAction]) -> RunResult<Value> {
        for action in actions {
            value = match action {
                IdentExprAction::Call(call) => {
                    let func = value.expect_func()?;
                    let args = self.eval_call_args(scope, call)?;
                    self.call_function(scope, &func, args)?
                }
                IdentExprAction::Property(inner) => self.eval_property_step(scope, value, inner)?,
            };
        }
        Ok(value)
    }

    /// Resolves `receiver.name…` one property link at a time, then applies
    /// the link's own call/property tail.
    fn eval_property_step(&self, scope: &Arc<Scope>, receiver: Value, chain: &IdentExpr) -> RunResult<Value> {
        let value = self.access_property(&receiver, &chain.name)?;
        self.apply_ident_actions(scope, value, &chain.actions)
    }

    /// Property access on a value: dict attribute access is equivalent to
    /// indexing; configs expose their keys; strings expose methods.
    pub fn access_property(&self, receiver: &Value, name: &str) -> RunResult<Value> {
        match receiver {
            Value::Dict(d) | Value::FrozenDict(d) => {
                if let Some(v) = read_lock(d).get(name) {
                    return Ok(v.clone());
                }
                builtins::dict_method(receiver, name)
                    .ok_or_else(|| RunError::typ(format!("dict has no key or method '{name}'")))
            }
            Value::Config(c) => {
                if let Some(m) = builtins::config_method(receiver, name) {
                    return Ok(m);
                }
                c.get(name)
                    .ok_or_else(|| RunError::config(format!("unknown config key '{name}'")))
            }
            Value::Str(_) => builtins::str_method(receiver, name)
                .ok_or_else(|| RunError::typ(format!("string has no method '{name}'"))),
            other => Err(RunError::typ(format!(
                "'{}' has no property '{name}'",
                other.type_name()
            ))),
        }
    }

    fn eval_call_args(&self, scope: &Arc<Scope>, call: &Call) -> RunResult<CallArgs> {
        let mut args = CallArgs::default();
        for arg in &call.args {
            let value = self.eval_expression(scope, &arg.value)?;
            match &arg.name {
                Some(name) => args.named.push((name.clone(), value)),
                None => args.pos.push(value),
            }
        }
        Ok(args)
    }

    /// Calls any function value with already-evaluated arguments.
    pub fn call_function(&self, caller: &Arc<Scope>, func: &Arc<FuncValue>, args: CallArgs) -> RunResult<Value> {
        let bound = bind_call_args(self, func, args)?;
        match &func.code {
            FuncCode::Native(f) => {
                let ctx = NativeCtx { scope: caller, args: bound };
                f(self, &ctx)
            }
            FuncCode::Statements(statements) => {
                let defining = func.scope.clone().unwrap_or_else(|| Arc::clone(&self.root));
                let callee = Arc::new(Scope::call_scope(&defining, caller, Arc::clone(&func.def_file)));
                for (name, value) in bound.iter() {
                    callee.set(name.clone(), value.clone());
                }
                let ret = match self.exec_statements(&callee, statements)? {
                    Flow::Return(v) => v,
                    _ => Value::None,
                };
                if let Some(t) = func.return_type {
                    if !ret.matches_type(t) {
                        return Err(RunError::typ(format!(
                            "invalid return value from {}(): expected {t}, was {}",
                            func.name,
                            ret.type_name()
                        )));
                    }
                }
                Ok(ret)
            }
            FuncCode::Lambda(body) => {
                let defining = func.scope.clone().unwrap_or_else(|| Arc::clone(&self.root));
                let callee = Arc::new(Scope::call_scope(&defining, caller, Arc::clone(&func.def_file)));
                for (name, value) in bound.iter() {
                    callee.set(name.clone(), value.clone());
                }
                self.eval_expression(&callee, body)
            }
        }
    }

    fn make_lambda(&self, scope: &Arc<Scope>, lambda: &Lambda) -> Value {
        let func = FuncValue {
            name: "<lambda>".to_owned(),
            def_file: Arc::clone(&scope.file),
            params: lambda.args.iter().map(param_spec).collect(),
            varargs: None,
            kwargs: None,
            keywords_only: false,
            is_builtin: false,
            is_private: false,
            return_type: None,
            docstring: None,
            scope: Some(Arc::clone(scope)),
            code: FuncCode::Lambda(Arc::new(lambda.body.clone())),
            bound_self: None,
        };
        Value::Func(Arc::new(func))
    }

    fn eval_expr_list(&self, scope: &Arc<Scope>, list: &crate::ast::ExprList) -> RunResult<Value> {
        if let Some(comp) = &list.comprehension {
            let head = list
                .values
                .first()
                .ok_or_else(|| RunError::syntax("comprehension has no head expression"))?;
            let items = self.eval_comprehension(scope, comp, |interp, child, out: &mut Vec<Value>| {
                out.push(interp.eval_expression(child, head)?);
                Ok(())
            })?;
            return Ok(Value::list(items));
        }
        let mut items = Vec::with_capacity(list.values.len());
        for value in &list.values {
            items.push(self.eval_expression(scope, value)?);
        }
        Ok(Value::list(items))
    }

    fn eval_dict_lit(&self, scope: &Arc<Scope>, dict: &DictLit) -> RunResult<Value> {
        if let Some(comp) = &dict.comprehension {
            let key_expr = dict
                .keys
                .first()
                .ok_or_else(|| RunError::syntax("dict comprehension has no key expression"))?;
            let value_expr = dict
                .values
                .first()
                .ok_or_else(|| RunError::syntax("dict comprehension has no value expression"))?;
            let pairs = self.eval_comprehension(scope, comp, |interp, child, out: &mut Vec<(String, Value)>| {
                let key = interp.eval_expression(child, key_expr)?.expect_str()?;
                let value = interp.eval_expression(child, value_expr)?;
                out.push((key.to_string(), value));
                Ok(())
            })?;
            return Ok(Value::dict(pairs.into_iter().collect()));
        }
        let mut map = BTreeMap::new();
        for (key_expr, value_expr) in dict.keys.iter().zip(dict.values.iter()) {
            let key = self
                .eval_expression(scope, key_expr)?
                .expect_str()
                .map_err(|e| RunError::new(e.kind, format!("dict keys must be strings: {}", e.message)))?;
            let value = self.eval_expression(scope, value_expr)?;
            map.insert(key.to_string(), value);
        }
        Ok(Value::dict(map))
    }

    /// Shared comprehension driver: iterates the (up to two) `for`
    /// clauses in a fresh child scope, applying the filter, and lets the
    /// caller produce output per iteration.
    fn eval_comprehension<T>(
        &self,
        scope: &Arc<Scope>,
        comp: &Comprehension,
        mut produce: impl FnMut(&Self, &Arc<Scope>, &mut Vec<T>) -> RunResult<()>,
    ) -> RunResult<Vec<T>> {
        let child = Arc::new(scope.child());
        let outer = self
            .eval_expression(scope, &comp.iterable)?
            .expect_list_items()
            .map_err(|e| RunError::new(e.kind, format!("cannot iterate: {}", e.message)))?;
        let mut out = Vec::with_capacity(outer.len());
        for item in outer {
            bind_loop_names(&child, &comp.names, &item)?;
            match &comp.second {
                Some((names, iterable)) => {
                    let inner = self
                        .eval_expression(&child, iterable)?
                        .expect_list_items()
                        .map_err(|e| RunError::new(e.kind, format!("cannot iterate: {}", e.message)))?;
                    for inner_item in inner {
                        bind_loop_names(&child, names, &inner_item)?;
                        if self.comprehension_passes(&child, comp)? {
                            produce(self, &child, &mut out)?;
                        }
                    }
                }
                None => {
                    if self.comprehension_passes(&child, comp)? {
                        produce(self, &child, &mut out)?;
                    }
                }
            }
        }
        Ok(out)
    }

    fn comprehension_passes(&self, child: &Arc<Scope>, comp: &Comprehension) -> RunResult<bool> {
        match &comp.condition {
            Some(cond) => Ok(self.eval_expression(child, cond)?.is_truthy()),
            None => Ok(true),
        }
    }

    fn eval_fstring(&self, scope: &Arc<Scope>, fs: &FString) -> RunResult<Value> {
        let mut out = String::new();
        for var in &fs.vars {
            out.push_str(&var.prefix);
            let mut value = scope
                .lookup(&var.path[0])
                .ok_or_else(|| RunError::name(format!("name '{}' is not defined", var.path[0])))?;
            for segment in &var.path[1..] {
                value = self.access_property(&value, segment)?;
            }
            out.push_str(&value.display_str());
        }
        out.push_str(&fs.suffix);
        Ok(Value::str(out))
    }

    // ------------------------------------------------------------------
    // Subinclude
    // ------------------------------------------------------------------

    /// Implements `subinclude(label)`: waits for the target, evaluates
    /// each of its output files through the cache, and returns the frozen
    /// namespaces. The caller merges them into its scope.
    pub fn subinclude(&self, scope: &Arc<Scope>, label_str: &str) -> RunResult<Vec<Arc<Namespace>>> {
        let (pkg_name, subrepo) = match &scope.pkg {
            Some(pkg) => (pkg.name.clone(), pkg.subrepo.clone()),
            None => (String::new(), None),
        };
        let label = BuildLabel::parse(label_str, &pkg_name, subrepo.as_deref())?;
        self.host.register_subinclude(&label, scope.parsing_for.as_ref());
        let outputs = self
            .limiter
            .with_released(|| self.host.wait_until_built(&label))
            .map_err(|msg| RunError::domain(format!("cannot build subinclude target {label}: {msg}")))?;
        let mut namespaces = Vec::with_capacity(outputs.len());
        for path in outputs {
            let key = SubincludeKey {
                path: path.clone(),
                subrepo: subrepo.clone(),
            };
            let ns = self
                .cache
                .get_or_evaluate(&key, &self.limiter, || self.evaluate_subinclude_file(scope, &path, &label))?;
            namespaces.push(ns);
        }
        Ok(namespaces)
    }

    fn evaluate_subinclude_file(&self, caller: &Arc<Scope>, path: &str, label: &BuildLabel) -> RunResult<Namespace> {
        let ast = self.parse_file_cached(path)?;
        let file: Arc<str> = Arc::from(path);
        let mut scope = Scope::file_scope(&self.root, file, None, ParseMode::Subinclude, caller.parsing_for.clone());
        scope.subinclude_label = Some(label.clone());
        let scope = Arc::new(scope);
        let config = match caller.config() {
            Some(c) => c.child_copy(),
            None => ConfigValue::new(Arc::clone(&self.base_config)),
        };
        scope.set("CONFIG", Value::Config(Arc::new(config)));
        for ns in self.preloads.read().expect("preload lock poisoned").iter() {
            for (name, value) in ns.iter() {
                scope.set(name.clone(), value.clone());
            }
        }
        self.evaluate(&scope, &ast)?;
        let mut bindings = BTreeMap::new();
        for (name, value) in scope.public_bindings() {
            if name == "CONFIG" {
                continue;
            }
            bindings.insert(name, value.freeze());
        }
        Ok(Namespace::new(bindings))
    }

    /// Pre-evaluates a subinclude target; its names seed every later
    /// evaluation scope.
    pub fn register_preload(&self, label: &str) -> RunResult<()> {
        let scratch = self.new_file_scope(Arc::from("<preload>"), None, ParseMode::Preload, None);
        let namespaces = self.subinclude(&scratch, label)?;
        self.preloads
            .write()
            .expect("preload lock poisoned")
            .extend(namespaces);
        Ok(())
    }
}

fn param_spec(arg: &crate::ast::ArgDef) -> ParamSpec {
    ParamSpec {
        name: arg.name.clone(),
        types: arg.types.iter().copied().collect(),
        aliases: arg.aliases.clone(),
        default: match (&arg.folded_default, &arg.default) {
            (Some(c), _) => Some(ParamDefault::Constant(c.clone())),
            (None, Some(e)) => Some(ParamDefault::Expr(Arc::new(e.clone()))),
            (None, None) => None,
        },
    }
}

/// Binds loop names to one element: a single name takes the element
/// itself, multiple names destructure a list of matching length.
fn bind_loop_names(scope: &Arc<Scope>, names: &[String], item: &Value) -> RunResult<()> {
    if names.len() == 1 {
        scope.set(names[0].clone(), item.clone());
        return Ok(());
    }
    let items = item
        .expect_list_items()
        .map_err(|e| RunError::new(e.kind, format!("cannot unpack loop variable: {}", e.message)))?;
    if items.len() != names.len() {
        return Err(RunError::typ(format!(
            "cannot unpack a list of {} values into {} loop variables",
            items.len(),
            names.len()
        )));
    }
    for (name, value) in names.iter().zip(items) {
        scope.set(name.clone(), value);
    }
    Ok(())
}

fn apply_binary(op: Operator, lhs: Value, rhs: Value) -> RunResult<Value> {
    match op {
        Operator::Add => lhs.add(&rhs),
        Operator::Subtract => lhs.subtract(&rhs),
        Operator::Modulo => lhs.modulo(&rhs),
        Operator::LessThan => Ok(Value::Bool(lhs.compare(&rhs)? == std::cmp::Ordering::Less)),
        Operator::GreaterThan => Ok(Value::Bool(lhs.compare(&rhs)? == std::cmp::Ordering::Greater)),
        Operator::LessOrEqual => Ok(Value::Bool(lhs.compare(&rhs)? != std::cmp::Ordering::Greater)),
        Operator::GreaterOrEqual => Ok(Value::Bool(lhs.compare(&rhs)? != std::cmp::Ordering::Less)),
        Operator::Equal => Ok(Value::Bool(lhs.equals(&rhs))),
        Operator::NotEqual => Ok(Value::Bool(!lhs.equals(&rhs))),
        Operator::Is => Ok(Value::Bool(is_identity(&lhs, &rhs))),
        Operator::IsNot => Ok(Value::Bool(!is_identity(&lhs, &rhs))),
        Operator::In => Ok(Value::Bool(rhs.contains(&lhs)?)),
        Operator::NotIn => Ok(Value::Bool(!rhs.contains(&lhs)?)),
        // Short-circuit cases were resolved by the climber; reaching here
        // means the result is the last evaluated operand.
        Operator::And | Operator::Or => Ok(rhs),
    }
}

/// `is` identity: restricted to None and booleans; anything else is never
/// identical.
fn is_identity(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        _ => false,
    }
}
