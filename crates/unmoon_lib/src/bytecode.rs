use std::fmt;

use serde::{Deserialize, Serialize};

mod tables {
    use serde::{Deserialize, Serialize};

    include!(concat!(env!("OUT_DIR"), "/opcodes.rs"));
}

pub use tables::{OPCODE_COUNT, OPCODE_INFO, OpCode, OpInfo};

/// Register-or-constant slots address the constant pool at `value - RK_CONSTANT_BASE`.
pub const RK_CONSTANT_BASE: i32 = 256;

/// Lua 5.1 `is_vararg` value for a function declared with `...`.
pub const VARARG_DECLARED: u8 = 2;

impl OpCode {
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<OpCode> {
        OPCODE_INFO.get(n as usize).map(|info| info.op)
    }

    pub fn name(self) -> &'static str {
        OPCODE_INFO[self as usize].name
    }

    /// Opcodes whose B operand is an 18-bit Bx field.
    pub fn uses_bx(self) -> bool {
        matches!(
            self,
            OpCode::LoadK | OpCode::GetGlobal | OpCode::SetGlobal | OpCode::Closure
        )
    }

    /// Opcodes whose B operand is a signed jump offset.
    pub fn uses_sbx(self) -> bool {
        matches!(self, OpCode::Jmp | OpCode::ForLoop | OpCode::ForPrep)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

pub fn is_constant_slot(v: i32) -> bool {
    v >= RK_CONSTANT_BASE
}

pub(crate) fn format_number(v: f64) -> String {
    if v.is_nan() {
        return "0/0".into();
    }
    if v.is_infinite() {
        return if v > 0.0 { "1/0".into() } else { "-1/0".into() };
    }
    if v.fract() == 0.0 && v.abs() < 1e15 {
        return format!("{}", v as i64);
    }
    format!("{v}")
}

pub(crate) fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => out.push_str(&format!("\\{}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constant {
    Bool(bool),
    Number(f64),
    String(String),
    Nil,
}

impl Constant {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => write!(f, "nil"),
            Constant::Bool(b) => write!(f, "{b}"),
            Constant::Number(v) => write!(f, "{}", format_number(*v)),
            Constant::String(s) => write!(f, "{}", quote_string(s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Numeric opcode as randomized by the obfuscator.
    #[serde(default, rename = "op")]
    pub op_num: u32,
    #[serde(default)]
    pub opcode: Option<OpCode>,
    #[serde(default)]
    pub a: i32,
    #[serde(default)]
    pub b: i32,
    #[serde(default)]
    pub c: i32,
    #[serde(default)]
    pub pc: usize,
    #[serde(default)]
    pub dead: bool,
}

impl Instruction {
    pub fn new(op_num: u32, a: i32, b: i32, c: i32) -> Self {
        Self {
            op_num,
            opcode: None,
            a,
            b,
            c,
            pc: 0,
            dead: false,
        }
    }

    pub fn resolved(op: OpCode, a: i32, b: i32, c: i32) -> Self {
        Self {
            op_num: op.number() as u32,
            opcode: Some(op),
            ..Self::new(0, a, b, c)
        }
    }

    pub fn dead() -> Self {
        Self {
            dead: true,
            ..Self::new(0, 0, 0, 0)
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.opcode.is_some()
    }
}

/// One compiled closure. Owns its instructions, constants and nested prototypes;
/// instructions look up their owner through the `&Function` a walker already holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    #[serde(default)]
    pub num_params: u8,
    #[serde(default)]
    pub is_vararg: u8,
    #[serde(default)]
    pub max_stack_size: u8,
    #[serde(default)]
    pub num_upvalues: u8,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub constants: Vec<Constant>,
    #[serde(default)]
    pub functions: Vec<Function>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends an instruction, assigning its program counter.
    pub fn push(&mut self, mut ins: Instruction) -> usize {
        let pc = self.instructions.len();
        ins.pc = pc;
        self.instructions.push(ins);
        pc
    }

    /// Rewrites every instruction's `pc` to its dense 0-based index, recursively.
    pub fn renumber(&mut self) {
        for (pc, ins) in self.instructions.iter_mut().enumerate() {
            ins.pc = pc;
        }
        for child in &mut self.functions {
            child.renumber();
        }
    }

    pub fn is_variadic(&self) -> bool {
        self.is_vararg == VARARG_DECLARED
    }

    pub fn constant(&self, idx: i32) -> Option<&Constant> {
        usize::try_from(idx).ok().and_then(|i| self.constants.get(i))
    }

    /// Resolves a register-or-constant slot to the constant it addresses, if any.
    pub fn rk_constant(&self, v: i32) -> Option<&Constant> {
        if is_constant_slot(v) {
            self.constant(v - RK_CONSTANT_BASE)
        } else {
            None
        }
    }

    pub fn child(&self, idx: i32) -> Option<&Function> {
        usize::try_from(idx).ok().and_then(|i| self.functions.get(i))
    }

    /// Number of prototypes in this tree, including `self`.
    pub fn count_functions(&self) -> usize {
        1 + self.functions.iter().map(Function::count_functions).sum::<usize>()
    }
}
