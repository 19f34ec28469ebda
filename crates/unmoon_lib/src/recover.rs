//! Opcode recovery: maps each randomized opcode number to the catalog shape of the
//! handler it dispatches to and rewrites instructions in place.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::UnmoonError;
use crate::ast::Block;
use crate::bytecode::Function;
use crate::catalog::Catalog;
use crate::fingerprint::fingerprint;
use crate::rewrite::{ConstantReplacer, Pipeline, RewriteOptions};

/// A dispatch handler as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HandlerSource {
    /// Precomputed fingerprint string.
    Fingerprint(String),
    /// Decompiled handler body; simplified before fingerprinting.
    Ast(Block),
}

impl HandlerSource {
    pub fn fingerprint(&self, options: &RewriteOptions, constants: Option<&ConstantReplacer>) -> String {
        match self {
            HandlerSource::Fingerprint(fp) => fp.clone(),
            HandlerSource::Ast(block) => {
                let mut block = block.clone();
                Pipeline::standard(options, constants.cloned()).run(&mut block);
                fingerprint(&block)
            }
        }
    }
}

/// Numeric opcode => handler fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerTable {
    fingerprints: BTreeMap<u32, String>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sources(
        sources: &BTreeMap<u32, HandlerSource>,
        options: &RewriteOptions,
        constants: Option<&ConstantReplacer>,
    ) -> Self {
        let mut table = Self::new();
        for (&op_num, source) in sources {
            table.insert(op_num, source.fingerprint(options, constants));
        }
        table
    }

    pub fn insert(&mut self, op_num: u32, fingerprint: impl Into<String>) {
        self.fingerprints.insert(op_num, fingerprint.into());
    }

    pub fn get(&self, op_num: u32) -> Option<&str> {
        self.fingerprints.get(&op_num).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.fingerprints.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Instructions resolved by this run.
    pub resolved: usize,
    /// Instructions that already carried an opcode and were left untouched.
    pub skipped: usize,
    pub dead: usize,
    pub unresolved: usize,
    /// Numeric opcodes that had no handler or no catalog match.
    pub unknown_opcodes: BTreeSet<u32>,
}

impl RecoveryReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved == 0
    }
}

/// Resolves every live instruction of `root` and its descendants against the global catalog.
pub fn recover(root: &mut Function, handlers: &HandlerTable) -> RecoveryReport {
    recover_with(Catalog::global(), root, handlers)
}

pub fn recover_with(catalog: &Catalog, root: &mut Function, handlers: &HandlerTable) -> RecoveryReport {
    let mut report = RecoveryReport::default();
    recover_function(catalog, root, handlers, &mut report);
    report
}

fn recover_function(
    catalog: &Catalog,
    f: &mut Function,
    handlers: &HandlerTable,
    report: &mut RecoveryReport,
) {
    let (resolved, unresolved) = (report.resolved, report.unresolved);
    for (pc, ins) in f.instructions.iter_mut().enumerate() {
        if ins.dead {
            report.dead += 1;
            continue;
        }
        if ins.is_resolved() {
            report.skipped += 1;
            continue;
        }
        ins.pc = pc;
        let hit = match handlers.get(ins.op_num) {
            Some(fp) => {
                let hit = catalog.resolve(fp, ins);
                if !hit {
                    log::debug!("{}[{pc}]: opcode {} fingerprint {fp} not in catalog", f.name, ins.op_num);
                }
                hit
            }
            None => {
                log::debug!("{}[{pc}]: no handler for opcode {}", f.name, ins.op_num);
                false
            }
        };
        if hit {
            report.resolved += 1;
        } else {
            report.unresolved += 1;
            report.unknown_opcodes.insert(ins.op_num);
        }
    }
    log::debug!(
        "{}: resolved {}, unresolved {}",
        f.name,
        report.resolved - resolved,
        report.unresolved - unresolved
    );

    for child in &mut f.functions {
        recover_function(catalog, child, handlers, report);
    }
}

/// Serialized input for recovery: handler sources plus the raw prototype tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub handlers: BTreeMap<u32, HandlerSource>,
    pub root: Function,
}

impl Chunk {
    pub fn from_json(src: &str) -> Result<Self, UnmoonError> {
        let mut chunk: Chunk = serde_json::from_str(src)?;
        chunk.root.renumber();
        Ok(chunk)
    }

    pub fn handler_table(&self, options: &RewriteOptions, constants: Option<&ConstantReplacer>) -> HandlerTable {
        HandlerTable::from_sources(&self.handlers, options, constants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Stmt};
    use crate::bytecode::{Instruction, OpCode};

    fn n(s: &str) -> Expr {
        Expr::name(s)
    }

    fn raw_loadk_handler() -> Block {
        Block::new(vec![
            Stmt::local(1, &["_1"], vec![n("inst")]),
            Stmt::local(2, &["_2"], vec![n("OP_A")]),
            Stmt::local(3, &["_3"], vec![Expr::index(n("_1"), n("_2"))]),
            Stmt::local(4, &["_4"], vec![n("OP_B")]),
            Stmt::local(5, &["_5"], vec![Expr::index(n("_1"), n("_4"))]),
            Stmt::call(n("stk"), vec![n("_3"), n("_5")]),
        ])
    }

    #[test]
    fn ast_handlers_are_simplified_before_fingerprinting() {
        let options = RewriteOptions::default();
        let src = HandlerSource::Ast(raw_loadk_handler());
        assert_eq!(src.fingerprint(&options, None), "1419090");
        let raw = HandlerSource::Fingerprint("2990".into());
        assert_eq!(raw.fingerprint(&options, None), "2990");
    }

    #[test]
    fn resolves_parent_and_children_once() {
        let mut handlers = HandlerTable::new();
        handlers.insert(40, "2990");
        handlers.insert(41, "91909190");
        handlers.insert(42, "no-such-shape");

        let mut child = Function::new("child");
        child.push(Instruction::new(40, 0, 5, 0));
        let mut root = Function::new("main");
        root.push(Instruction::new(41, 0, 1, 0));
        root.push(Instruction::new(40, 0, 14, 0));
        root.push(Instruction::dead());
        root.push(Instruction::new(42, 0, 0, 0));
        root.push(Instruction::new(43, 0, 0, 0));
        root.push(Instruction::resolved(OpCode::Return, 0, 1, 0));
        root.functions.push(child);

        let report = recover(&mut root, &handlers);
        assert_eq!(report.resolved, 3);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.dead, 1);
        assert_eq!(report.unresolved, 2);
        assert_eq!(report.unknown_opcodes.into_iter().collect::<Vec<_>>(), vec![42, 43]);

        assert_eq!(root.instructions[0].opcode, Some(OpCode::Move));
        assert_eq!(root.instructions[1].opcode, Some(OpCode::Jmp));
        assert_eq!(root.instructions[1].b, 14 - 2);
        assert_eq!(root.functions[0].instructions[0].b, 5 - 1);

        // a second run must not normalize operands again
        let again = recover(&mut root, &handlers);
        assert_eq!(again.resolved, 0);
        assert_eq!(again.skipped, 4);
        assert_eq!(root.instructions[1].b, 12);
    }

    #[test]
    fn chunk_json_renumbers_and_accepts_both_handler_forms() {
        let src = r#"{
            "handlers": {
                "7": "2990",
                "9": {"stmts": [{"Return": []}]}
            },
            "root": {
                "name": "main",
                "instructions": [{"op": 9}, {"op": 7, "b": 3, "pc": 99}],
                "constants": ["x", 1.5, true, null]
            }
        }"#;
        let chunk = Chunk::from_json(src).unwrap();
        assert_eq!(chunk.root.instructions[1].pc, 1);
        assert!(matches!(chunk.handlers[&9], HandlerSource::Ast(_)));

        let table = chunk.handler_table(&RewriteOptions::default(), None);
        assert_eq!(table.get(9), Some("27"));
        assert_eq!(table.get(7), Some("2990"));
        assert!(Chunk::from_json("{}").is_err());
    }
}
