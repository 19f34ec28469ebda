//! Variable usage information consumed by the handler simplification pass.
//!
//! Handler bodies come out of the decompiler with uniquely numbered temporaries, so
//! the analysis keys everything by name in one flat table per analysed tree.

use std::collections::HashMap;

use crate::ast::{Block, Expr, NodeId, Stmt};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableInfo {
    pub read_count: usize,
    /// Assignments after the declaring binding.
    pub assignment_count: usize,
    /// The `local` statement or first assignment that introduced the name.
    pub declaration: Option<NodeId>,
    /// Value bound at the declaration site, when names and values pair up one to one.
    pub value: Option<Expr>,
    /// Read before the declaration, or read or assigned outside the block holding it.
    /// Such a name does not behave like a local of that block.
    pub escapes_scope: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageTable {
    vars: HashMap<String, VariableInfo>,
}

impl UsageTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&VariableInfo> {
        self.vars.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, info: VariableInfo) {
        self.vars.insert(name.into(), info);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    fn entry(&mut self, name: &str) -> &mut VariableInfo {
        self.vars.entry(name.to_string()).or_default()
    }
}

pub fn analyze(block: &Block) -> UsageTable {
    let mut walker = Walker::default();
    walker.block(block);
    walker.table
}

fn paired_value(names: usize, values: &[Expr], i: usize) -> Option<Expr> {
    if names == values.len() {
        values.get(i).cloned()
    } else {
        None
    }
}

/// Blocks are numbered as they are entered; `path` holds the open ones, outermost first.
#[derive(Default)]
struct Walker {
    table: UsageTable,
    path: Vec<usize>,
    next_block: usize,
    /// Block path at each name's declaration.
    declared_in: HashMap<String, Vec<usize>>,
}

impl Walker {
    fn block(&mut self, block: &Block) {
        self.scoped(|w| {
            for stmt in &block.stmts {
                w.stmt(stmt);
            }
        });
    }

    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        self.path.push(self.next_block);
        self.next_block += 1;
        f(self);
        self.path.pop();
    }

    /// A use of a declared name is in scope when its block path extends the declaration's.
    fn check_scope(&mut self, name: &str) {
        let outside = self
            .declared_in
            .get(name)
            .is_some_and(|decl| !self.path.starts_with(decl));
        if outside {
            self.table.entry(name).escapes_scope = true;
        }
    }

    fn declare(&mut self, name: &str, id: NodeId, value: Option<Expr>) {
        let info = self.table.entry(name);
        if info.declaration.is_some() {
            return;
        }
        info.declaration = Some(id);
        info.value = value;
        if info.read_count > 0 {
            info.escapes_scope = true;
        }
        self.declared_in.insert(name.to_string(), self.path.clone());
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Local(l) => {
                for v in &l.values {
                    self.reads(v);
                }
                for (i, name) in l.names.iter().enumerate() {
                    let value = paired_value(l.names.len(), &l.values, i);
                    self.declare(name, l.id, value);
                }
            }
            Stmt::Assign(a) => {
                for v in &a.values {
                    self.reads(v);
                }
                for (i, target) in a.targets.iter().enumerate() {
                    match target {
                        Expr::Name(name) => {
                            let declared = self
                                .table
                                .get(name)
                                .is_some_and(|info| info.declaration.is_some());
                            if declared {
                                self.table.entry(name).assignment_count += 1;
                                self.check_scope(name);
                            } else {
                                let value = paired_value(a.targets.len(), &a.values, i);
                                self.declare(name, a.id, value);
                            }
                        }
                        other => self.reads(other),
                    }
                }
            }
            Stmt::Call(c) => {
                self.reads(&c.func);
                for a in &c.args {
                    self.reads(a);
                }
            }
            Stmt::Do(b) => self.block(b),
            Stmt::If(i) => {
                for clause in &i.clauses {
                    self.reads(&clause.cond);
                    self.block(&clause.body);
                }
                if let Some(b) = &i.else_body {
                    self.block(b);
                }
            }
            Stmt::While { cond, body } => {
                self.reads(cond);
                self.block(body);
            }
            // `until` sees the body's locals
            Stmt::Repeat { body, cond } => self.scoped(|w| {
                for stmt in &body.stmts {
                    w.stmt(stmt);
                }
                w.reads(cond);
            }),
            Stmt::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                self.reads(start);
                self.reads(limit);
                if let Some(s) = step {
                    self.reads(s);
                }
                self.table.entry(var);
                self.block(body);
            }
            Stmt::GenericFor { names, exprs, body } => {
                for e in exprs {
                    self.reads(e);
                }
                for n in names {
                    self.table.entry(n);
                }
                self.block(body);
            }
            Stmt::Return(values) => {
                for v in values {
                    self.reads(v);
                }
            }
            Stmt::Break => {}
        }
    }

    fn reads(&mut self, expr: &Expr) {
        match expr {
            Expr::Name(n) => {
                self.table.entry(n).read_count += 1;
                self.check_scope(n);
            }
            Expr::Binary(b) => {
                self.reads(&b.left);
                self.reads(&b.right);
            }
            Expr::Unary(u) => self.reads(&u.operand),
            Expr::Member(m) => self.reads(&m.object),
            Expr::Index(i) => {
                self.reads(&i.table);
                self.reads(&i.key);
            }
            Expr::Call(c) => {
                self.reads(&c.func);
                for a in &c.args {
                    self.reads(a);
                }
            }
            Expr::Table(entries) => {
                for e in entries {
                    if let Some(k) = &e.key {
                        self.reads(k);
                    }
                    self.reads(&e.value);
                }
            }
            Expr::Function(f) => {
                for p in &f.params {
                    self.table.entry(p);
                }
                self.block(&f.body);
            }
            Expr::Nil | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) | Expr::Vararg => {}
        }
    }
}
