pub mod ast;
pub mod bytecode;
pub mod catalog;
pub mod disasm;
pub mod fingerprint;
pub mod luac;
pub mod recover;
pub mod rewrite;
pub mod usage;

use thiserror::Error;

pub use bytecode::{Constant, Function, Instruction, OpCode};
pub use catalog::{Catalog, HandlerShape, Normalize};
pub use disasm::disassemble;
pub use fingerprint::fingerprint;
pub use luac::write_chunk;
pub use recover::{Chunk, HandlerSource, HandlerTable, RecoveryReport, recover};
pub use rewrite::{ConstantReplacer, Pipeline, PipelineReport, RewriteOptions};

#[derive(Debug, Error)]
pub enum UnmoonError {
    #[error("invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unresolved opcode {op_num} at {function}[{pc}]")]
    UnresolvedOpcode {
        function: String,
        pc: usize,
        op_num: u32,
    },

    #[error("operand {operand}={value} out of range at {function}[{pc}]")]
    OperandOutOfRange {
        function: String,
        pc: usize,
        operand: char,
        value: i32,
    },
}

/// Runs the standard rewrite pipeline over a handler or script body.
pub fn simplify(
    block: &mut ast::Block,
    options: &RewriteOptions,
    constants: Option<ConstantReplacer>,
) -> PipelineReport {
    Pipeline::standard(options, constants).run(block)
}

/// Loads a JSON chunk, fingerprints its handlers and resolves every instruction.
pub fn recover_chunk(
    src: &str,
    options: &RewriteOptions,
    constants: Option<&ConstantReplacer>,
) -> Result<(Function, RecoveryReport), UnmoonError> {
    let chunk = Chunk::from_json(src)?;
    let handlers = chunk.handler_table(options, constants);
    let mut root = chunk.root;
    let report = recover(&mut root, &handlers);
    log::debug!(
        "recovered {} instruction(s) across {} function(s), {} unresolved",
        report.resolved,
        root.count_functions(),
        report.unresolved
    );
    Ok((root, report))
}

/// JSON chunk in, disassembly listing out.
pub fn disassemble_json(src: &str, options: &RewriteOptions) -> Result<String, UnmoonError> {
    let (root, _) = recover_chunk(src, options, None)?;
    Ok(disassemble(&root))
}
