//! Fixpoint tree rewriting.
//!
//! A pass implements [`Rewriter`]; each hook sees one node kind and returns `Some(new)`
//! to replace it or `None` to leave it alone. The engine walks bottom-up, substitutes
//! replacements into the parent slot and re-walks the replacement until its hook
//! declines, so every touched node reaches a local fixpoint.

mod constants;
mod fold;
mod handler;

pub use constants::ConstantReplacer;
pub use fold::ConstantFolder;
pub use handler::HandlerRewriter;

use serde::{Deserialize, Serialize};

use crate::ast::{
    Assign, BinaryExpr, Block, Call, ElementAccess, Expr, LocalDeclare, MemberAccess, Stmt,
    UnaryExpr,
};

/// Replacements allowed on a single tree slot before the engine gives up on it.
const MAX_LOCAL_REWRITES: usize = 256;

/// Expression nesting the engine descends into. A pass whose replacements keep
/// growing below themselves hits this and the rest of the walk is abandoned.
const MAX_EXPR_DEPTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteOptions {
    /// Prefix the decompiler gives its generated temporaries.
    pub temp_prefix: String,
    /// Name of the VM's `register, value` store helper.
    pub register_helper: String,
    pub max_iterations: usize,
}

impl Default for RewriteOptions {
    fn default() -> Self {
        Self {
            temp_prefix: "_".into(),
            register_helper: "stk".into(),
            max_iterations: 64,
        }
    }
}

pub trait Rewriter {
    fn name(&self) -> &'static str;

    /// Called once before each walk over `root`.
    fn prepare(&mut self, _root: &Block) {}

    fn binary(&mut self, _node: &BinaryExpr) -> Option<Expr> {
        None
    }

    fn unary(&mut self, _node: &UnaryExpr) -> Option<Expr> {
        None
    }

    fn member(&mut self, _node: &MemberAccess) -> Option<Expr> {
        None
    }

    fn index(&mut self, _node: &ElementAccess) -> Option<Expr> {
        None
    }

    fn call(&mut self, _node: &Call) -> Option<Call> {
        None
    }

    fn local(&mut self, _node: &LocalDeclare) -> Option<Stmt> {
        None
    }

    fn assign(&mut self, _node: &Assign) -> Option<Stmt> {
        None
    }

    fn block(&mut self, _node: &Block) -> Option<Block> {
        None
    }
}

struct Engine<'p, R: Rewriter + ?Sized> {
    pass: &'p mut R,
    replacements: usize,
    depth: usize,
    abandoned: bool,
}

/// Runs one pass over `block` and returns how many nodes it replaced.
pub fn rewrite_block<R: Rewriter + ?Sized>(pass: &mut R, block: &mut Block) -> usize {
    walk_pass(pass, block).0
}

/// Replacement count, and whether the walk was abandoned at the nesting limit.
fn walk_pass<R: Rewriter + ?Sized>(pass: &mut R, block: &mut Block) -> (usize, bool) {
    pass.prepare(block);
    let mut engine = Engine {
        pass,
        replacements: 0,
        depth: 0,
        abandoned: false,
    };
    engine.walk_block(block);
    (engine.replacements, engine.abandoned)
}

impl<R: Rewriter + ?Sized> Engine<'_, R> {
    fn settle(&mut self, rounds: &mut usize) -> bool {
        self.replacements += 1;
        *rounds += 1;
        if *rounds >= MAX_LOCAL_REWRITES {
            log::warn!(
                "{}: node still changing after {} rewrites, leaving it",
                self.pass.name(),
                rounds
            );
            return false;
        }
        true
    }

    fn walk_block(&mut self, block: &mut Block) {
        let mut rounds = 0;
        loop {
            for stmt in &mut block.stmts {
                self.walk_stmt(stmt);
            }
            if self.abandoned {
                break;
            }
            match self.pass.block(block) {
                Some(new) => {
                    *block = new;
                    if !self.settle(&mut rounds) {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    fn walk_exprs(&mut self, exprs: &mut [Expr]) {
        for e in exprs {
            self.walk_expr(e);
        }
    }

    fn walk_call(&mut self, call: &mut Call) {
        self.walk_expr(&mut call.func);
        self.walk_exprs(&mut call.args);
    }

    fn walk_stmt(&mut self, stmt: &mut Stmt) {
        let mut rounds = 0;
        loop {
            match stmt {
                Stmt::Local(l) => self.walk_exprs(&mut l.values),
                Stmt::Assign(a) => {
                    self.walk_exprs(&mut a.targets);
                    self.walk_exprs(&mut a.values);
                }
                Stmt::Call(c) => self.walk_call(c),
                Stmt::Do(b) => self.walk_block(b),
                Stmt::If(i) => {
                    for clause in &mut i.clauses {
                        self.walk_expr(&mut clause.cond);
                        self.walk_block(&mut clause.body);
                    }
                    if let Some(b) = &mut i.else_body {
                        self.walk_block(b);
                    }
                }
                Stmt::While { cond, body } => {
                    self.walk_expr(cond);
                    self.walk_block(body);
                }
                Stmt::Repeat { body, cond } => {
                    self.walk_block(body);
                    self.walk_expr(cond);
                }
                Stmt::NumericFor {
                    start,
                    limit,
                    step,
                    body,
                    ..
                } => {
                    self.walk_expr(start);
                    self.walk_expr(limit);
                    if let Some(s) = step {
                        self.walk_expr(s);
                    }
                    self.walk_block(body);
                }
                Stmt::GenericFor { exprs, body, .. } => {
                    self.walk_exprs(exprs);
                    self.walk_block(body);
                }
                Stmt::Return(values) => self.walk_exprs(values),
                Stmt::Break => {}
            }
            if self.abandoned {
                break;
            }

            let replacement = match stmt {
                Stmt::Local(l) => self.pass.local(l),
                Stmt::Assign(a) => self.pass.assign(a),
                Stmt::Call(c) => self.pass.call(c).map(Stmt::Call),
                _ => None,
            };
            match replacement {
                Some(new) => {
                    *stmt = new;
                    if !self.settle(&mut rounds) {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    fn walk_expr(&mut self, expr: &mut Expr) {
        if self.abandoned {
            return;
        }
        if self.depth >= MAX_EXPR_DEPTH {
            log::warn!(
                "{}: expression nesting passed {} levels, abandoning this walk",
                self.pass.name(),
                MAX_EXPR_DEPTH
            );
            self.abandoned = true;
            return;
        }
        self.depth += 1;
        self.walk_expr_at_depth(expr);
        self.depth -= 1;
    }

    fn walk_expr_at_depth(&mut self, expr: &mut Expr) {
        let mut rounds = 0;
        loop {
            match expr {
                Expr::Binary(b) => {
                    self.walk_expr(&mut b.left);
                    self.walk_expr(&mut b.right);
                }
                Expr::Unary(u) => self.walk_expr(&mut u.operand),
                Expr::Member(m) => self.walk_expr(&mut m.object),
                Expr::Index(i) => {
                    self.walk_expr(&mut i.table);
                    self.walk_expr(&mut i.key);
                }
                Expr::Call(c) => self.walk_call(c),
                Expr::Table(entries) => {
                    for e in entries {
                        if let Some(k) = &mut e.key {
                            self.walk_expr(k);
                        }
                        self.walk_expr(&mut e.value);
                    }
                }
                Expr::Function(f) => self.walk_block(&mut f.body),
                Expr::Nil
                | Expr::Bool(_)
                | Expr::Number(_)
                | Expr::String(_)
                | Expr::Vararg
                | Expr::Name(_) => {}
            }
            if self.abandoned {
                break;
            }

            let replacement = match expr {
                Expr::Binary(b) => self.pass.binary(b),
                Expr::Unary(u) => self.pass.unary(u),
                Expr::Member(m) => self.pass.member(m),
                Expr::Index(i) => self.pass.index(i),
                Expr::Call(c) => self.pass.call(c).map(Expr::Call),
                _ => None,
            };
            match replacement {
                Some(new) => {
                    *expr = new;
                    if !self.settle(&mut rounds) {
                        break;
                    }
                }
                None => break,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub iterations: usize,
    pub replacements: usize,
    pub converged: bool,
}

/// Ordered passes, repeated until a full iteration changes nothing.
pub struct Pipeline {
    passes: Vec<Box<dyn Rewriter>>,
    max_iterations: usize,
}

impl Pipeline {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            passes: Vec::new(),
            max_iterations,
        }
    }

    /// Folding, optional constant substitution, then handler simplification.
    pub fn standard(options: &RewriteOptions, constants: Option<ConstantReplacer>) -> Self {
        let mut pipeline = Pipeline::new(options.max_iterations).with(ConstantFolder);
        if let Some(replacer) = constants {
            pipeline = pipeline.with(replacer);
        }
        pipeline.with(HandlerRewriter::new(options.clone()))
    }

    pub fn with(mut self, pass: impl Rewriter + 'static) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn run(&mut self, block: &mut Block) -> PipelineReport {
        let mut report = PipelineReport::default();
        while report.iterations < self.max_iterations {
            report.iterations += 1;
            let mut changed = 0;
            for pass in &mut self.passes {
                let (n, abandoned) = walk_pass(pass.as_mut(), block);
                log::trace!(
                    "iteration {}: {} replaced {} node(s)",
                    report.iterations,
                    pass.name(),
                    n
                );
                report.replacements += n;
                if abandoned {
                    return report;
                }
                changed += n;
            }
            if changed == 0 {
                report.converged = true;
                return report;
            }
        }
        log::warn!(
            "rewrite pipeline did not converge after {} iterations",
            self.max_iterations
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;

    /// Rewrites `x + 0` to `x`, one level at a time.
    struct DropAddZero;

    impl Rewriter for DropAddZero {
        fn name(&self) -> &'static str {
            "drop-add-zero"
        }

        fn binary(&mut self, node: &BinaryExpr) -> Option<Expr> {
            match (node.op, node.right.as_ref()) {
                (BinaryOp::Add, Expr::Number(v)) if *v == 0.0 => Some((*node.left).clone()),
                _ => None,
            }
        }
    }

    /// Always answers with an equal node; must not hang the engine.
    struct Stubborn;

    impl Rewriter for Stubborn {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        fn unary(&mut self, node: &UnaryExpr) -> Option<Expr> {
            Some(Expr::Unary(node.clone()))
        }
    }

    /// Wraps every `not` in another one, below the node it was asked about.
    struct Burrow;

    impl Rewriter for Burrow {
        fn name(&self) -> &'static str {
            "burrow"
        }

        fn unary(&mut self, node: &UnaryExpr) -> Option<Expr> {
            Some(Expr::unary(node.op, Expr::Unary(node.clone())))
        }
    }

    fn ret(e: Expr) -> Block {
        Block::new(vec![Stmt::Return(vec![e])])
    }

    #[test]
    fn replacements_are_revisited_to_fixpoint() {
        let mut e = Expr::name("x");
        for _ in 0..5 {
            e = Expr::binary(BinaryOp::Add, e, Expr::num(0.0));
        }
        let mut block = ret(e);
        let n = rewrite_block(&mut DropAddZero, &mut block);
        assert_eq!(n, 5);
        assert_eq!(block, ret(Expr::name("x")));
    }

    #[test]
    fn unchanged_tree_reports_zero() {
        let mut block = ret(Expr::binary(BinaryOp::Add, Expr::name("x"), Expr::num(1.0)));
        assert_eq!(rewrite_block(&mut DropAddZero, &mut block), 0);
    }

    #[test]
    fn runaway_pass_is_capped() {
        let mut block = ret(Expr::unary(crate::ast::UnaryOp::Not, Expr::name("x")));
        let n = rewrite_block(&mut Stubborn, &mut block);
        assert_eq!(n, MAX_LOCAL_REWRITES);
    }

    #[test]
    fn ever_deepening_pass_is_cut_off() {
        let mut block = ret(Expr::unary(crate::ast::UnaryOp::Not, Expr::name("x")));
        let n = rewrite_block(&mut Burrow, &mut block);
        assert!(n > 0 && n <= MAX_EXPR_DEPTH, "{n}");

        let mut fresh = ret(Expr::unary(crate::ast::UnaryOp::Not, Expr::name("x")));
        let report = Pipeline::new(8).with(Burrow).run(&mut fresh);
        assert!(!report.converged);
        assert_eq!(report.iterations, 1);

        // already past the limit: nothing is rewritten, and that is not a fixpoint
        let report = Pipeline::new(8).with(Burrow).run(&mut block);
        assert!(!report.converged);
        assert_eq!(report.replacements, 0);
    }

    #[test]
    fn pipeline_stops_when_nothing_changes() {
        let mut block = ret(Expr::binary(BinaryOp::Add, Expr::name("x"), Expr::num(0.0)));
        let mut pipeline = Pipeline::new(8).with(DropAddZero);
        let report = pipeline.run(&mut block);
        assert!(report.converged);
        assert_eq!(report.iterations, 2);
        assert_eq!(report.replacements, 1);
    }

    #[test]
    fn pipeline_gives_up_at_the_iteration_limit() {
        let mut block = ret(Expr::unary(crate::ast::UnaryOp::Not, Expr::name("x")));
        let mut pipeline = Pipeline::new(3).with(Stubborn);
        let report = pipeline.run(&mut block);
        assert!(!report.converged);
        assert_eq!(report.iterations, 3);
    }

    #[test]
    fn standard_pipeline_orders_passes() {
        let options = RewriteOptions::default();
        let with = Pipeline::standard(&options, Some(ConstantReplacer::default()));
        assert_eq!(with.pass_names(), vec!["constant-folder", "constant-replacer", "handler-rewriter"]);
        let without = Pipeline::standard(&options, None);
        assert_eq!(without.pass_names(), vec!["constant-folder", "handler-rewriter"]);
    }
}
