use std::collections::HashSet;

use crate::ast::{
    Assign, BinaryExpr, Block, Call, ElementAccess, Expr, LocalDeclare, NodeId, Stmt,
};
use crate::usage::{self, UsageTable, VariableInfo};

use super::{RewriteOptions, Rewriter};

/// Collapses the decompiler's temporaries in VM handler bodies back into plain
/// register accesses (`stk[inst[OP_A]]` and friends).
///
/// Substitutions only fire for names with the configured temporary prefix whose
/// usage is known; a name missing from the usage table is never touched.
#[derive(Debug, Clone)]
pub struct HandlerRewriter {
    options: RewriteOptions,
    usage: UsageTable,
    refresh: bool,
}

impl HandlerRewriter {
    /// Re-analyses usage before every walk.
    pub fn new(options: RewriteOptions) -> Self {
        Self {
            options,
            usage: UsageTable::new(),
            refresh: true,
        }
    }

    /// Uses a caller-supplied usage table as-is.
    pub fn with_usage(options: RewriteOptions, usage: UsageTable) -> Self {
        Self {
            options,
            usage,
            refresh: false,
        }
    }

    fn temp<'a>(&'a self, expr: &'a Expr) -> Option<(&'a str, &'a VariableInfo)> {
        let name = expr.as_name()?;
        if !name.starts_with(self.options.temp_prefix.as_str()) {
            return None;
        }
        match self.usage.get(name)? {
            info if info.escapes_scope => None,
            info => Some((name, info)),
        }
    }

    /// `_3` where `local _3 = inst` becomes `inst`.
    fn alias_of(&self, expr: &Expr) -> Option<Expr> {
        let (_, info) = self.temp(expr)?;
        match &info.value {
            Some(value @ Expr::Name(_)) if info.assignment_count == 0 && value != expr => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Single-use `_4` where `local _4 = t[k]` with plain-name `t` and `k`.
    fn element_of(&self, expr: &Expr) -> Option<Expr> {
        let (name, info) = self.temp(expr)?;
        match &info.value {
            Some(value @ Expr::Index(ElementAccess { table, key }))
                if table.as_name().is_some()
                    && key.as_name().is_some()
                    && info.read_count == 1
                    && info.assignment_count == 0
                    && !value.mentions(name) =>
            {
                Some(value.clone())
            }
            _ => None,
        }
    }

    /// Single-use, never reassigned `_5` where `local _5 = a op b`.
    fn binary_of(&self, expr: &Expr) -> Option<Expr> {
        let (name, info) = self.temp(expr)?;
        match &info.value {
            Some(value @ Expr::Binary(_))
                if info.read_count == 1 && info.assignment_count == 0 && !value.mentions(name) =>
            {
                Some(value.clone())
            }
            _ => None,
        }
    }

    fn substitute(&self, expr: &Expr) -> Option<Expr> {
        self.alias_of(expr)
            .or_else(|| self.element_of(expr))
            .or_else(|| self.binary_of(expr))
    }

    fn substitute_pair(&self, left: &Expr, right: &Expr) -> Option<(Expr, Expr)> {
        let new_left = self.substitute(left);
        let new_right = self.substitute(right);
        if new_left.is_none() && new_right.is_none() {
            return None;
        }
        Some((
            new_left.unwrap_or_else(|| left.clone()),
            new_right.unwrap_or_else(|| right.clone()),
        ))
    }

    fn is_dead(&self, decl: &LocalDeclare) -> bool {
        decl.names.iter().all(|name| {
            self.usage
                .get(name)
                .is_some_and(|info| info.read_count == 0)
        })
    }

    /// Every use of the name follows this binding inside its block, so `local` keeps
    /// each read pointing at the same value.
    fn declares_here(&self, target: &Expr, id: NodeId) -> bool {
        self.temp(target)
            .is_some_and(|(_, info)| info.declaration == Some(id))
    }
}

impl Rewriter for HandlerRewriter {
    fn name(&self) -> &'static str {
        "handler-rewriter"
    }

    fn prepare(&mut self, root: &Block) {
        if self.refresh {
            self.usage = usage::analyze(root);
        }
    }

    /// `stk(_201, _200)` => `stk(inst[OP_A], inst[OP_B])`
    fn call(&mut self, node: &Call) -> Option<Call> {
        if node.func.as_name() != Some(self.options.register_helper.as_str()) {
            return None;
        }
        match node.args.as_slice() {
            [a @ Expr::Name(_), b @ Expr::Name(_)] => {
                let (a, b) = self.substitute_pair(a, b)?;
                Some(Call {
                    func: node.func.clone(),
                    args: vec![a, b],
                })
            }
            _ => None,
        }
    }

    /// `_184[_185]` => `inst[OP_A]`, `stk[_185]` => `stk[inst[OP_A]]`
    fn index(&mut self, node: &ElementAccess) -> Option<Expr> {
        let (table, key) = self.substitute_pair(&node.table, &node.key)?;
        Some(Expr::index(table, key))
    }

    /// `(_273 == _274)` => `(stk[inst[OP_A]] == stk[inst[OP_C]])`
    fn binary(&mut self, node: &BinaryExpr) -> Option<Expr> {
        let (left, right) = self.substitute_pair(&node.left, &node.right)?;
        Some(Expr::binary(node.op, left, right))
    }

    fn assign(&mut self, node: &Assign) -> Option<Stmt> {
        // `_185 = OP_A` => `local _185 = OP_A` when this is the only binding
        if !node.targets.is_empty() && node.targets.iter().all(|t| self.declares_here(t, node.id)) {
            let names = node
                .targets
                .iter()
                .filter_map(|t| t.as_name().map(str::to_string))
                .collect();
            return Some(Stmt::Local(LocalDeclare {
                id: node.id,
                names,
                values: node.values.clone(),
            }));
        }

        // `stk[_186] = _185` => `stk[_186] = stk[inst[OP_B]]`, `pc = _275` => `pc = <cond>`
        match (node.targets.as_slice(), node.values.as_slice()) {
            ([_], [value @ Expr::Name(_)]) => {
                let value = self.substitute(value)?;
                Some(Stmt::Assign(Assign {
                    id: node.id,
                    targets: node.targets.clone(),
                    values: vec![value],
                }))
            }
            _ => None,
        }
    }

    fn block(&mut self, node: &Block) -> Option<Block> {
        let dead: HashSet<usize> = node
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(i, stmt)| match stmt {
                Stmt::Local(decl) if self.is_dead(decl) => Some(i),
                _ => None,
            })
            .collect();
        if dead.is_empty() {
            return None;
        }
        let stmts = node
            .stmts
            .iter()
            .enumerate()
            .filter(|(i, _)| !dead.contains(i))
            .map(|(_, stmt)| stmt.clone())
            .collect();
        Some(Block::new(stmts))
    }
}
