//! Reachability traversal over the typed AST
//!
//! Starting from a set of root functions, walks bodies marking every
//! function that is referenced, resolving forward references, and assigns
//! the dense index layout emission needs: reachable-but-undefined
//! functions (imports) occupy the first indices, defined functions follow,
//! each group in first-encounter order.

use crate::ast::{Expr, ExprKind, Initializer, Program, Stmt, StmtKind};
use hashbrown::{HashMap, HashSet};
use log::debug;
use scc_common::{SccError, SccResult};

/// Result of the reachability traversal
#[derive(Debug)]
pub struct Reachability {
    /// Function name to dense index.
    pub indices: HashMap<String, u32>,
    /// Reachable functions without a body, in index order.
    pub imports: Vec<String>,
    /// Reachable defined functions, in index order after the imports.
    pub defined: Vec<String>,
}

impl Reachability {
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.indices.get(name).copied()
    }
}

/// Walk the program from `roots` and compute the emission index layout.
///
/// Each root must name a defined, externally visible function; anything
/// else is a linkage error.
pub fn analyze(program: &Program, roots: &[String]) -> SccResult<Reachability> {
    for root in roots {
        let func = program.find_function(root).ok_or_else(|| {
            SccError::link_error(format!("exported symbol '{}' is not defined", root))
        })?;
        if !func.is_defined() {
            return Err(SccError::link_error(format!(
                "exported symbol '{}' has no definition",
                root
            )));
        }
        if func.is_static {
            return Err(SccError::link_error(format!(
                "exported symbol '{}' is not externally visible",
                root
            )));
        }
    }

    // Depth-first over call references, recording first-encounter order.
    let mut seen: HashSet<String> = HashSet::new();
    let mut order: Vec<String> = Vec::new();
    let mut stack: Vec<String> = roots.iter().rev().cloned().collect();

    while let Some(name) = stack.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        order.push(name.clone());

        let Some(func) = program.find_function(&name) else { continue };
        let Some(body) = &func.body else { continue };

        let mut callees = Vec::new();
        collect_stmt(program, body, &mut callees);
        for callee in callees.into_iter().rev() {
            if !seen.contains(&callee) {
                stack.push(callee);
            }
        }
    }

    let mut imports = Vec::new();
    let mut defined = Vec::new();
    for name in &order {
        let is_defined =
            program.find_function(name).map(|f| f.is_defined()).unwrap_or(false);
        if is_defined {
            defined.push(name.clone());
        } else {
            imports.push(name.clone());
        }
    }

    let mut indices = HashMap::new();
    for (i, name) in imports.iter().chain(defined.iter()).enumerate() {
        indices.insert(name.clone(), i as u32);
    }
    debug!(
        "reachability: {} imports, {} defined functions",
        imports.len(),
        defined.len()
    );

    Ok(Reachability { indices, imports, defined })
}

/// Whether a variable reference names a function.
fn is_function_ref(program: &Program, expr: &Expr) -> Option<String> {
    if let ExprKind::Var(var) = &expr.kind {
        let info = program.scopes.var(var.scope, var.index);
        if info.ty.is_func() {
            return Some(var.name.clone());
        }
    }
    None
}

fn collect_stmt(program: &Program, stmt: &Stmt, out: &mut Vec<String>) {
    match &stmt.kind {
        StmtKind::Expr(e) => collect_expr(program, e, out),
        StmtKind::Block { stmts, .. } => {
            for s in stmts {
                collect_stmt(program, s, out);
            }
        }
        StmtKind::If { cond, then_branch, else_branch } => {
            collect_expr(program, cond, out);
            collect_stmt(program, then_branch, out);
            if let Some(else_branch) = else_branch {
                collect_stmt(program, else_branch, out);
            }
        }
        StmtKind::Switch { value, body, .. } => {
            collect_expr(program, value, out);
            collect_stmt(program, body, out);
        }
        StmtKind::While { cond, body } => {
            collect_expr(program, cond, out);
            collect_stmt(program, body, out);
        }
        StmtKind::DoWhile { body, cond } => {
            collect_stmt(program, body, out);
            collect_expr(program, cond, out);
        }
        StmtKind::For { pre, cond, post, body, .. } => {
            if let Some(pre) = pre {
                collect_stmt(program, pre, out);
            }
            if let Some(cond) = cond {
                collect_expr(program, cond, out);
            }
            if let Some(post) = post {
                collect_expr(program, post, out);
            }
            collect_stmt(program, body, out);
        }
        StmtKind::Return(Some(e)) => collect_expr(program, e, out),
        StmtKind::Case { body, .. }
        | StmtKind::Default { body }
        | StmtKind::Label { body, .. } => collect_stmt(program, body, out),
        StmtKind::VarDecl(items) => {
            for item in items {
                if let Some(init) = &item.init {
                    collect_init(program, init, out);
                }
            }
        }
        StmtKind::Return(None)
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Goto(_)
        | StmtKind::Asm(_)
        | StmtKind::Empty => {}
    }
}

fn collect_init(program: &Program, init: &Initializer, out: &mut Vec<String>) {
    match init {
        Initializer::Single(e) => collect_expr(program, e, out),
        Initializer::List(items) => {
            for item in items {
                collect_init(program, item, out);
            }
        }
    }
}

fn collect_expr(program: &Program, expr: &Expr, out: &mut Vec<String>) {
    if let Some(name) = is_function_ref(program, expr) {
        out.push(name);
    }
    match &expr.kind {
        ExprKind::Member { base, .. } => collect_expr(program, base, out),
        ExprKind::Deref(e)
        | ExprKind::Addr(e)
        | ExprKind::Unary { operand: e, .. }
        | ExprKind::Cast { inner: e, .. }
        | ExprKind::IncDec { target: e, .. } => collect_expr(program, e, out),
        ExprKind::Binary { lhs, rhs, .. }
        | ExprKind::Logical { lhs, rhs, .. }
        | ExprKind::Assign { lhs, rhs }
        | ExprKind::CompoundAssign { lhs, rhs, .. }
        | ExprKind::Comma { lhs, rhs } => {
            collect_expr(program, lhs, out);
            collect_expr(program, rhs, out);
        }
        ExprKind::Call { callee, args } => {
            collect_expr(program, callee, out);
            for arg in args {
                collect_expr(program, arg, out);
            }
        }
        ExprKind::Ternary { cond, then_expr, else_expr } => {
            collect_expr(program, cond, out);
            collect_expr(program, then_expr, out);
            collect_expr(program, else_expr, out);
        }
        ExprKind::CompoundLit { init, .. } => collect_init(program, init, out),
        ExprKind::IntLit(_)
        | ExprKind::FloatLit(_)
        | ExprKind::StrLit(_)
        | ExprKind::Var(_) => {}
    }
}
