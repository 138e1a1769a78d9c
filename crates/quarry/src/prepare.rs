//! The peephole optimizer, run once over a freshly parsed tree before it
//! is shared.
//!
//! Four rewrites:
//! 1. constant folding of literal-only expressions (stored as a
//!    [`Constant`], instantiated fresh per evaluation);
//! 2. local-variable tagging of bare identifier references;
//! 3. config-key tagging of `CONFIG.NAME`;
//! 4. `"sep".join([...])` recognition, and the `append`/`extend` →
//!    augmented-assignment statement rewrite.
//!
//! Dicts are never folded: their values are mutable.

use std::sync::Arc;

use crate::ast::{
    ArgDef, Comprehension, Constant, DictLit, Expression, ExprList, FileInput, IdentAction, IdentExpr,
    IdentExprAction, IdentStatement, Lambda, Optimized, SliceExpr, Statement, StatementKind, ValueExpression,
    ValueKind,
};

pub(crate) fn optimise(file: &mut FileInput) {
    for stmt in file.iter_mut() {
        optimise_statement(stmt);
    }
}

fn optimise_statement(stmt: &mut Statement) {
    match &mut stmt.kind {
        StatementKind::FuncDef(def) => {
            for arg in &mut def.args {
                optimise_arg(arg);
            }
            // The tree is not yet shared, so this never clones.
            let body = Arc::make_mut(&mut def.statements);
            for s in body.iter_mut() {
                optimise_statement(s);
            }
        }
        StatementKind::If(s) => {
            optimise_expression(&mut s.condition);
            for stmt in &mut s.statements {
                optimise_statement(stmt);
            }
            for (cond, block) in &mut s.elifs {
                optimise_expression(cond);
                for stmt in block.iter_mut() {
                    optimise_statement(stmt);
                }
            }
            for stmt in &mut s.else_statements {
                optimise_statement(stmt);
            }
        }
        StatementKind::For(s) => {
            optimise_expression(&mut s.iterable);
            for stmt in &mut s.statements {
                optimise_statement(stmt);
            }
        }
        StatementKind::Return(Some(e)) | StatementKind::Raise(e) | StatementKind::Literal(e) => {
            optimise_expression(e);
        }
        StatementKind::Assert { condition, message } => {
            optimise_expression(condition);
            if let Some(m) = message {
                optimise_expression(m);
            }
        }
        StatementKind::Ident(ident) => {
            rewrite_append_extend(ident);
            match &mut ident.action {
                IdentAction::Assign(e) | IdentAction::AugAssign(e) => optimise_expression(e),
                IdentAction::IndexAssign { index, value, .. } => {
                    optimise_expression(index);
                    optimise_expression(value);
                }
                IdentAction::Unpack { expr, .. } => optimise_expression(expr),
                IdentAction::Call(call) => {
                    for arg in &mut call.args {
                        optimise_expression(&mut arg.value);
                    }
                }
                IdentAction::Property(chain) => optimise_ident_expr(chain),
            }
        }
        StatementKind::Return(None) | StatementKind::Pass | StatementKind::Continue | StatementKind::Break => {}
    }
}

/// Rewrites `x.append(v)` to `x += [v]` and `x.extend(v)` to `x += v`.
///
/// This deliberately changes semantics when `x` was bound in an enclosing
/// scope: the rewritten form assigns the result to a local `x`.
fn rewrite_append_extend(ident: &mut IdentStatement) {
    let IdentAction::Property(chain) = &mut ident.action else {
        return;
    };
    if !matches!(chain.name.as_str(), "append" | "extend") {
        return;
    }
    let [IdentExprAction::Call(call)] = chain.actions.as_mut_slice() else {
        return;
    };
    if call.args.len() != 1 || call.args[0].name.is_some() {
        return;
    }
    log::debug!("rewriting {}.{}() to an augmented assignment", ident.name, chain.name);
    let arg = call.args.pop().expect("argument count checked above").value;
    let expr = if chain.name == "append" {
        Expression {
            span: arg.span,
            unary: None,
            val: ValueExpression::plain(
                arg.span,
                ValueKind::List(ExprList {
                    values: vec![arg],
                    comprehension: None,
                }),
            ),
            ops: Vec::new(),
            ternary: None,
            optimized: None,
        }
    } else {
        arg
    };
    ident.action = IdentAction::AugAssign(expr);
}

fn optimise_arg(arg: &mut ArgDef) {
    if let Some(default) = &mut arg.default {
        optimise_expression(default);
        arg.folded_default = fold_expression(default);
    }
}

fn optimise_expression(expr: &mut Expression) {
    optimise_value(&mut expr.val);
    for op in &mut expr.ops {
        optimise_expression(&mut op.expr);
    }
    if let Some(ternary) = &mut expr.ternary {
        optimise_expression(&mut ternary.condition);
        optimise_expression(&mut ternary.else_value);
    }
    if let Some(constant) = fold_expression(expr) {
        expr.optimized = Some(Optimized::Constant(constant));
        return;
    }
    if !is_plain(expr) {
        return;
    }
    match &expr.val.kind {
        // A bare identifier: a single map lookup at evaluation time.
        ValueKind::Ident(ident) if ident.actions.is_empty() => {
            expr.optimized = Some(Optimized::Local(ident.name.clone()));
        }
        // CONFIG.NAME with exactly one property access.
        ValueKind::Ident(ident) if ident.name == "CONFIG" => {
            if let [IdentExprAction::Property(inner)] = ident.actions.as_slice() {
                if inner.actions.is_empty() {
                    expr.optimized = Some(Optimized::Config(inner.name.clone()));
                }
            }
        }
        _ => {}
    }
    maybe_tag_join(expr);
}

/// Tags `"sep".join([...])` so evaluation skips the intermediate list.
fn maybe_tag_join(expr: &mut Expression) {
    if expr.optimized.is_some() || expr.unary.is_some() || !expr.ops.is_empty() || expr.ternary.is_some() {
        return;
    }
    let val = &expr.val;
    if !val.slices.is_empty() || val.call.is_some() {
        return;
    }
    let ValueKind::Str(sep) = &val.kind else { return };
    let Some(prop) = &val.property else { return };
    if prop.name != "join" {
        return;
    }
    let [IdentExprAction::Call(call)] = prop.actions.as_slice() else {
        return;
    };
    if call.args.len() != 1 || call.args[0].name.is_some() {
        return;
    }
    let arg = &call.args[0].value;
    if arg.unary.is_some() || !arg.ops.is_empty() || arg.ternary.is_some() {
        return;
    }
    let ValueKind::List(list) = &arg.val.kind else { return };
    if list.comprehension.is_some() || !arg.val.slices.is_empty() || arg.val.property.is_some() || arg.val.call.is_some()
    {
        return;
    }
    expr.optimized = Some(Optimized::Join {
        separator: Arc::from(sep.as_str()),
        items: list.values.clone(),
    });
}

fn is_plain(expr: &Expression) -> bool {
    expr.unary.is_none()
        && expr.ops.is_empty()
        && expr.ternary.is_none()
        && expr.val.slices.is_empty()
        && expr.val.property.is_none()
        && expr.val.call.is_none()
}

/// Attempts to fold an expression to a constant. Only literal-shaped
/// expressions qualify: scalars, strings, and lists of constants.
fn fold_expression(expr: &Expression) -> Option<Constant> {
    if !is_plain(expr) {
        return None;
    }
    fold_value_kind(&expr.val.kind)
}

fn fold_value_kind(kind: &ValueKind) -> Option<Constant> {
    match kind {
        ValueKind::None => Some(Constant::None),
        ValueKind::True => Some(Constant::Bool(true)),
        ValueKind::False => Some(Constant::Bool(false)),
        ValueKind::Int(n) => Some(Constant::Int(*n)),
        ValueKind::Str(s) => Some(Constant::Str(Arc::from(s.as_str()))),
        ValueKind::List(list) | ValueKind::Tuple(list) => {
            if list.comprehension.is_some() {
                return None;
            }
            let items: Option<Vec<Constant>> = list.values.iter().map(fold_expression).collect();
            Some(Constant::List(Arc::new(items?)))
        }
        ValueKind::Paren(inner) => fold_expression(inner),
        _ => None,
    }
}

fn optimise_value(val: &mut ValueExpression) {
    match &mut val.kind {
        ValueKind::List(list) | ValueKind::Tuple(list) => optimise_expr_list(list),
        ValueKind::Dict(dict) => optimise_dict(dict),
        ValueKind::Paren(inner) => optimise_expression(inner),
        ValueKind::Lambda(lambda) => optimise_lambda(lambda),
        ValueKind::Ident(ident) => optimise_ident_expr(ident),
        _ => {}
    }
    for slice in &mut val.slices {
        match slice {
            SliceExpr::Index(e) => optimise_expression(e),
            SliceExpr::Range { start, end } => {
                if let Some(e) = start {
                    optimise_expression(e);
                }
                if let Some(e) = end {
                    optimise_expression(e);
                }
            }
        }
    }
    if let Some(prop) = &mut val.property {
        optimise_ident_expr(prop);
    }
    if let Some(call) = &mut val.call {
        for arg in &mut call.args {
            optimise_expression(&mut arg.value);
        }
    }
}

fn optimise_expr_list(list: &mut ExprList) {
    for value in &mut list.values {
        optimise_expression(value);
    }
    if let Some(comp) = &mut list.comprehension {
        optimise_comprehension(comp);
    }
}

fn optimise_dict(dict: &mut DictLit) {
    for key in &mut dict.keys {
        optimise_expression(key);
    }
    for value in &mut dict.values {
        optimise_expression(value);
    }
    if let Some(comp) = &mut dict.comprehension {
        optimise_comprehension(comp);
    }
}

fn optimise_comprehension(comp: &mut Comprehension) {
    optimise_expression(&mut comp.iterable);
    if let Some((_, iterable)) = &mut comp.second {
        optimise_expression(iterable);
    }
    if let Some(cond) = &mut comp.condition {
        optimise_expression(cond);
    }
}

fn optimise_lambda(lambda: &mut Lambda) {
    for arg in &mut lambda.args {
        optimise_arg(arg);
    }
    optimise_expression(&mut lambda.body);
}

fn optimise_ident_expr(ident: &mut IdentExpr) {
    for action in &mut ident.actions {
        match action {
            IdentExprAction::Property(inner) => optimise_ident_expr(inner),
            IdentExprAction::Call(call) => {
                for arg in &mut call.args {
                    optimise_expression(&mut arg.value);
                }
            }
        }
    }
}
