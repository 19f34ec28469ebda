use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::bytecode::{Instruction, OpCode};

mod tables {
    use super::{HandlerShape, Normalize, OpCode};

    include!(concat!(env!("OUT_DIR"), "/handler_shapes.rs"));
}

pub use tables::HANDLER_SHAPES;

/// Operand fix-up implied by a matched handler shape.
///
/// Every rule leaves register-or-constant slots in the `value > 255 => K[value - 256]`
/// encoding and jump slots as offsets relative to the instruction after the jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalize {
    None,
    /// Handler indexes the constant pool 1-based without the RK offset.
    ConstIndexB,
    ConstB,
    ConstC,
    ConstBC,
    /// Handler unconditionally skips the next instruction.
    SkipNext,
    /// Absolute target in B, relative to `pc + 1`.
    Jump,
    /// Absolute target in B, relative to `pc + 2`.
    LoopPrep,
    /// Comparison handlers store the left operand in A and the jump in B.
    Compare { b_const: bool, c_const: bool, flag: i32 },
    Test { flag: i32 },
    TestSet { flag: i32 },
    /// Handler stores the last argument register instead of an argument count.
    CountB,
    /// Handler stores the last result register instead of a result count.
    CountC,
    CountBC,
    ReturnCount,
    ListCount,
    ClearB,
}

impl Normalize {
    /// Operands are taken from input as-is, so every adjustment saturates.
    pub fn apply(self, ins: &mut Instruction) {
        let pc = i32::try_from(ins.pc).unwrap_or(i32::MAX);
        let konst = |v: i32| v.saturating_add(255);
        match self {
            Normalize::None => {}
            Normalize::ConstIndexB => ins.b = ins.b.saturating_sub(1),
            Normalize::ConstB => ins.b = konst(ins.b),
            Normalize::ConstC => ins.c = konst(ins.c),
            Normalize::ConstBC => {
                ins.b = konst(ins.b);
                ins.c = konst(ins.c);
            }
            Normalize::SkipNext => ins.c = 1,
            Normalize::Jump => ins.b = ins.b.saturating_sub(pc.saturating_add(1)),
            Normalize::LoopPrep => ins.b = ins.b.saturating_sub(pc.saturating_add(2)),
            Normalize::Compare {
                b_const,
                c_const,
                flag,
            } => {
                ins.b = if b_const { konst(ins.a) } else { ins.a };
                ins.a = flag;
                if c_const {
                    ins.c = konst(ins.c);
                }
            }
            Normalize::Test { flag } => {
                ins.b = 0;
                ins.c = flag;
            }
            Normalize::TestSet { flag } => {
                ins.b = ins.c;
                ins.c = flag;
            }
            Normalize::CountB => ins.b = ins.b.saturating_sub(ins.a.saturating_sub(1)),
            Normalize::CountC => ins.c = ins.c.saturating_sub(ins.a.saturating_sub(2)),
            Normalize::CountBC => {
                ins.b = ins.b.saturating_sub(ins.a.saturating_sub(1));
                ins.c = ins.c.saturating_sub(ins.a.saturating_sub(2));
            }
            Normalize::ReturnCount => ins.b = ins.b.saturating_add(2),
            Normalize::ListCount => ins.b = ins.b.saturating_sub(ins.a),
            Normalize::ClearB => ins.b = 0,
        }
    }

    /// Which of (B, C) this rule proves to be constant references.
    pub fn constant_slots(self) -> (bool, bool) {
        match self {
            Normalize::ConstB => (true, false),
            Normalize::ConstC => (false, true),
            Normalize::ConstBC => (true, true),
            Normalize::Compare {
                b_const, c_const, ..
            } => (b_const, c_const),
            _ => (false, false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerShape {
    pub fingerprint: &'static str,
    pub op: OpCode,
    pub rule: Normalize,
}

pub struct Catalog {
    by_fingerprint: HashMap<&'static str, &'static HandlerShape>,
}

static GLOBAL: Lazy<Catalog> = Lazy::new(|| Catalog::from_shapes(HANDLER_SHAPES));

impl Catalog {
    pub fn global() -> &'static Catalog {
        &GLOBAL
    }

    pub fn from_shapes(shapes: &'static [HandlerShape]) -> Self {
        let by_fingerprint = shapes.iter().map(|s| (s.fingerprint, s)).collect();
        Self { by_fingerprint }
    }

    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }

    pub fn lookup(&self, fingerprint: &str) -> Option<&'static HandlerShape> {
        self.by_fingerprint.get(fingerprint).copied()
    }

    /// Assigns the canonical opcode and normalizes operands on a hit.
    /// A miss leaves the instruction untouched.
    pub fn resolve(&self, fingerprint: &str, ins: &mut Instruction) -> bool {
        match self.lookup(fingerprint) {
            Some(shape) => {
                ins.opcode = Some(shape.op);
                shape.rule.apply(ins);
                true
            }
            None => false,
        }
    }

    /// Shapes in catalog file order.
    pub fn entries(&self) -> impl Iterator<Item = &'static HandlerShape> {
        HANDLER_SHAPES.iter()
    }

    pub fn shapes_for(&self, op: OpCode) -> impl Iterator<Item = &'static HandlerShape> {
        self.entries().filter(move |s| s.op == op)
    }
}
