//! Flattened pre-order traversal of the syntax tree.
//!
//! Feature counters only care about "every node of kind X anywhere in the
//! tree", so a flat list of borrowed nodes is simpler than a visitor.

use super::ast::{Comprehension, Expr, Module, Param, Parameters, Stmt, StmtKind};

#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Stmt(&'a Stmt),
    Expr(&'a Expr),
    Param(&'a Param),
}

/// Every node of the module, parents before children.
pub fn walk_module(module: &Module) -> Vec<NodeRef<'_>> {
    walk_body(&module.body)
}

pub fn walk_body(body: &[Stmt]) -> Vec<NodeRef<'_>> {
    let mut out = Vec::new();
    for stmt in body {
        collect_stmt(stmt, &mut out);
    }
    out
}

/// The statement itself plus everything nested inside it.
pub fn walk_stmt(stmt: &Stmt) -> Vec<NodeRef<'_>> {
    let mut out = Vec::new();
    collect_stmt(stmt, &mut out);
    out
}

fn collect_body<'a>(body: &'a [Stmt], out: &mut Vec<NodeRef<'a>>) {
    for stmt in body {
        collect_stmt(stmt, out);
    }
}

fn collect_opt<'a>(expr: &'a Option<Expr>, out: &mut Vec<NodeRef<'a>>) {
    if let Some(expr) = expr {
        collect_expr(expr, out);
    }
}

fn collect_all<'a>(exprs: &'a [Expr], out: &mut Vec<NodeRef<'a>>) {
    for expr in exprs {
        collect_expr(expr, out);
    }
}

fn collect_params<'a>(params: &'a Parameters, out: &mut Vec<NodeRef<'a>>) {
    for param in params.iter() {
        out.push(NodeRef::Param(param));
        collect_opt(&param.annotation, out);
        collect_opt(&param.default, out);
    }
}

fn collect_stmt<'a>(stmt: &'a Stmt, out: &mut Vec<NodeRef<'a>>) {
    out.push(NodeRef::Stmt(stmt));
    match &stmt.kind {
        StmtKind::FunctionDef(func) => {
            collect_all(&func.decorators, out);
            collect_params(&func.params, out);
            collect_opt(&func.returns, out);
            collect_body(&func.body, out);
        }
        StmtKind::ClassDef(class) => {
            collect_all(&class.decorators, out);
            collect_all(&class.bases, out);
            for keyword in &class.keywords {
                collect_expr(&keyword.value, out);
            }
            collect_body(&class.body, out);
        }
        StmtKind::Return(value) => collect_opt(value, out),
        StmtKind::Delete(targets) => collect_all(targets, out),
        StmtKind::Assign { targets, value } => {
            collect_all(targets, out);
            collect_expr(value, out);
        }
        StmtKind::AugAssign { target, value, .. } => {
            collect_expr(target, out);
            collect_expr(value, out);
        }
        StmtKind::AnnAssign {
            target,
            annotation,
            value,
        } => {
            collect_expr(target, out);
            collect_expr(annotation, out);
            collect_opt(value, out);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
            ..
        } => {
            collect_expr(target, out);
            collect_expr(iter, out);
            collect_body(body, out);
            collect_body(orelse, out);
        }
        StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
            collect_expr(test, out);
            collect_body(body, out);
            collect_body(orelse, out);
        }
        StmtKind::With { items, body, .. } => {
            for item in items {
                collect_expr(&item.context, out);
                collect_opt(&item.target, out);
            }
            collect_body(body, out);
        }
        StmtKind::Raise { exc, cause } => {
            collect_opt(exc, out);
            collect_opt(cause, out);
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            collect_body(body, out);
            for handler in handlers {
                collect_opt(&handler.typ, out);
                collect_body(&handler.body, out);
            }
            collect_body(orelse, out);
            collect_body(finalbody, out);
        }
        StmtKind::Assert { test, msg } => {
            collect_expr(test, out);
            collect_opt(msg, out);
        }
        // Patterns bind rather than load names, so only guards are walked.
        StmtKind::Match { subject, cases } => {
            collect_expr(subject, out);
            for case in cases {
                collect_opt(&case.guard, out);
                collect_body(&case.body, out);
            }
        }
        StmtKind::TypeAlias { name, value, .. } => {
            collect_expr(name, out);
            collect_expr(value, out);
        }
        StmtKind::Expr(expr) => collect_expr(expr, out),
        StmtKind::Import(_)
        | StmtKind::ImportFrom { .. }
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}

fn collect_generators<'a>(generators: &'a [Comprehension], out: &mut Vec<NodeRef<'a>>) {
    for generator in generators {
        collect_expr(&generator.target, out);
        collect_expr(&generator.iter, out);
        collect_all(&generator.ifs, out);
    }
}

fn collect_boxed<'a>(expr: &'a Option<Box<Expr>>, out: &mut Vec<NodeRef<'a>>) {
    if let Some(expr) = expr {
        collect_expr(expr, out);
    }
}

fn collect_expr<'a>(expr: &'a Expr, out: &mut Vec<NodeRef<'a>>) {
    out.push(NodeRef::Expr(expr));
    match expr {
        Expr::BoolOp { values, .. } => collect_all(values, out),
        Expr::NamedExpr { target, value } => {
            collect_expr(target, out);
            collect_expr(value, out);
        }
        Expr::BinOp { left, right, .. } => {
            collect_expr(left, out);
            collect_expr(right, out);
        }
        Expr::UnaryOp { operand, .. } => collect_expr(operand, out),
        Expr::Lambda { params, body } => {
            collect_params(params, out);
            collect_expr(body, out);
        }
        Expr::IfExp { test, body, orelse } => {
            collect_expr(test, out);
            collect_expr(body, out);
            collect_expr(orelse, out);
        }
        Expr::Dict { keys, values } => {
            for key in keys.iter().flatten() {
                collect_expr(key, out);
            }
            collect_all(values, out);
        }
        Expr::Set(elts) | Expr::List(elts) | Expr::Tuple(elts) => collect_all(elts, out),
        Expr::ListComp { elt, generators }
        | Expr::SetComp { elt, generators }
        | Expr::GeneratorExp { elt, generators } => {
            collect_expr(elt, out);
            collect_generators(generators, out);
        }
        Expr::DictComp {
            key,
            value,
            generators,
        } => {
            collect_expr(key, out);
            collect_expr(value, out);
            collect_generators(generators, out);
        }
        Expr::Await(inner) | Expr::YieldFrom(inner) | Expr::Starred(inner) => {
            collect_expr(inner, out)
        }
        Expr::Yield(value) => collect_boxed(value, out),
        Expr::Compare {
            left, comparators, ..
        } => {
            collect_expr(left, out);
            collect_all(comparators, out);
        }
        Expr::Call {
            func,
            args,
            keywords,
        } => {
            collect_expr(func, out);
            collect_all(args, out);
            for keyword in keywords {
                collect_expr(&keyword.value, out);
            }
        }
        Expr::Attribute { value, .. } => collect_expr(value, out),
        Expr::Subscript { value, slice } => {
            collect_expr(value, out);
            collect_expr(slice, out);
        }
        Expr::Slice { lower, upper, step } => {
            collect_boxed(lower, out);
            collect_boxed(upper, out);
            collect_boxed(step, out);
        }
        Expr::Constant(_) | Expr::Str(_) | Expr::Name(_) => {}
    }
}
