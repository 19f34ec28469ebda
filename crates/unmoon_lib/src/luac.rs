//! Lua 5.1 binary chunk writer for recovered prototypes.
//!
//! Layout: little-endian, 4-byte `int`, 8-byte `size_t`, 4-byte instructions,
//! 8-byte floating-point `lua_Number`. No debug information is emitted.

use byteorder::{ByteOrder, LittleEndian};

use crate::UnmoonError;
use crate::bytecode::{Constant, Function, Instruction, OpCode};

pub const LUA_SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const LUAC_VERSION: u8 = 0x51;
const LUAC_FORMAT: u8 = 0;

const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 9;
const SIZE_C: u32 = 9;
const POS_A: u32 = SIZE_OP;
const POS_C: u32 = POS_A + SIZE_A;
const POS_B: u32 = POS_C + SIZE_C;
const POS_BX: u32 = POS_C;

const MAXARG_A: i32 = (1 << SIZE_A) - 1;
const MAXARG_B: i32 = (1 << SIZE_B) - 1;
const MAXARG_C: i32 = (1 << SIZE_C) - 1;
const MAXARG_BX: i32 = (1 << (SIZE_B + SIZE_C)) - 1;
const MAXARG_SBX: i32 = MAXARG_BX >> 1;

const LUA_TNIL: u8 = 0;
const LUA_TBOOLEAN: u8 = 1;
const LUA_TNUMBER: u8 = 3;
const LUA_TSTRING: u8 = 4;

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u32(&mut self, v: u32) {
        let mut tmp = [0u8; 4];
        LittleEndian::write_u32(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
    }

    fn put_int(&mut self, v: usize) {
        self.put_u32(v as u32);
    }

    fn put_size(&mut self, v: usize) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_u64(&mut tmp, v as u64);
        self.buf.extend_from_slice(&tmp);
    }

    fn put_f64(&mut self, v: f64) {
        let mut tmp = [0u8; 8];
        LittleEndian::write_f64(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
    }

    /// `size_t` length including the trailing NUL, then the bytes; `None` writes length 0.
    fn put_string(&mut self, s: Option<&str>) {
        match s {
            Some(s) => {
                self.put_size(s.len() + 1);
                self.buf.extend_from_slice(s.as_bytes());
                self.put_u8(0);
            }
            None => self.put_size(0),
        }
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

fn check(
    f: &Function,
    pc: usize,
    operand: char,
    value: i32,
    min: i32,
    max: i32,
) -> Result<u32, UnmoonError> {
    if value < min || value > max {
        return Err(UnmoonError::OperandOutOfRange {
            function: f.name.clone(),
            pc,
            operand,
            value,
        });
    }
    Ok((value - min) as u32)
}

/// Packs one instruction into its 32-bit iABC / iABx / iAsBx word.
pub fn encode_instruction(f: &Function, pc: usize, ins: &Instruction) -> Result<u32, UnmoonError> {
    if ins.dead {
        let sbx = MAXARG_SBX as u32;
        return Ok(OpCode::Jmp.number() as u32 | (sbx << POS_BX));
    }
    let op = ins.opcode.ok_or_else(|| UnmoonError::UnresolvedOpcode {
        function: f.name.clone(),
        pc,
        op_num: ins.op_num,
    })?;

    let a = check(f, pc, 'A', ins.a, 0, MAXARG_A)?;
    let word = op.number() as u32 | (a << POS_A);
    if op.uses_bx() {
        let bx = check(f, pc, 'B', ins.b, 0, MAXARG_BX)?;
        Ok(word | (bx << POS_BX))
    } else if op.uses_sbx() {
        let bx = check(f, pc, 'B', ins.b, -MAXARG_SBX, MAXARG_BX - MAXARG_SBX)?;
        Ok(word | (bx << POS_BX))
    } else {
        let b = check(f, pc, 'B', ins.b, 0, MAXARG_B)?;
        let c = check(f, pc, 'C', ins.c, 0, MAXARG_C)?;
        Ok(word | (b << POS_B) | (c << POS_C))
    }
}

fn write_header(w: &mut Writer) {
    w.buf.extend_from_slice(LUA_SIGNATURE);
    w.put_u8(LUAC_VERSION);
    w.put_u8(LUAC_FORMAT);
    w.put_u8(1); // little endian
    w.put_u8(4); // int
    w.put_u8(8); // size_t
    w.put_u8(4); // Instruction
    w.put_u8(8); // lua_Number
    w.put_u8(0); // floating point
}

fn write_constant(w: &mut Writer, k: &Constant) {
    match k {
        Constant::Nil => w.put_u8(LUA_TNIL),
        Constant::Bool(b) => {
            w.put_u8(LUA_TBOOLEAN);
            w.put_u8(*b as u8);
        }
        Constant::Number(v) => {
            w.put_u8(LUA_TNUMBER);
            w.put_f64(*v);
        }
        Constant::String(s) => {
            w.put_u8(LUA_TSTRING);
            w.put_string(Some(s.as_str()));
        }
    }
}

fn write_function(w: &mut Writer, f: &Function, source: Option<&str>) -> Result<(), UnmoonError> {
    w.put_string(source);
    w.put_int(0); // linedefined
    w.put_int(0); // lastlinedefined
    w.put_u8(f.num_upvalues);
    w.put_u8(f.num_params);
    w.put_u8(f.is_vararg);
    w.put_u8(f.max_stack_size);

    w.put_int(f.instructions.len());
    for (pc, ins) in f.instructions.iter().enumerate() {
        let word = encode_instruction(f, pc, ins)?;
        w.put_u32(word);
    }

    w.put_int(f.constants.len());
    for k in &f.constants {
        write_constant(w, k);
    }

    w.put_int(f.functions.len());
    for child in &f.functions {
        write_function(w, child, None)?;
    }

    w.put_int(0); // lineinfo
    w.put_int(0); // locvars
    w.put_int(0); // upvalue names
    Ok(())
}

/// Serializes a fully resolved prototype tree as a Lua 5.1 chunk.
pub fn write_chunk(root: &Function) -> Result<Vec<u8>, UnmoonError> {
    let mut w = Writer::new();
    write_header(&mut w);
    let source = format!("={}", root.name);
    write_function(&mut w, root, Some(source.as_str()))?;
    log::debug!(
        "wrote {} bytes for {} function(s)",
        w.buf.len(),
        root.count_functions()
    );
    Ok(w.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(op: OpCode, a: i32, b: i32, c: i32) -> u32 {
        let f = Function::new("main");
        encode_instruction(&f, 0, &Instruction::resolved(op, a, b, c)).unwrap()
    }

    #[test]
    fn encodes_the_three_formats() {
        assert_eq!(word(OpCode::Return, 0, 1, 0), 0x0080_001e);
        assert_eq!(word(OpCode::Add, 1, 257, 2), 12 | (1 << 6) | (257 << 23) | (2 << 14));
        assert_eq!(word(OpCode::LoadK, 3, 70000, 0), 1 | (3 << 6) | (70000 << 14));
        assert_eq!(word(OpCode::Jmp, 0, 3, 0), 22 | ((3 + 131071) << 14));
        assert_eq!(word(OpCode::ForPrep, 0, -2, 0), 32 | ((131071 - 2) << 14));
    }

    #[test]
    fn dead_instructions_become_jump_zero() {
        let f = Function::new("main");
        let w = encode_instruction(&f, 4, &Instruction::dead()).unwrap();
        assert_eq!(w, word(OpCode::Jmp, 0, 0, 0));
    }

    #[test]
    fn rejects_unresolved_and_oversized_operands() {
        let f = Function::new("main");
        let err = encode_instruction(&f, 7, &Instruction::new(31, 0, 0, 0)).unwrap_err();
        assert!(matches!(err, UnmoonError::UnresolvedOpcode { pc: 7, op_num: 31, .. }));

        let big = Instruction::resolved(OpCode::Move, 256, 0, 0);
        let err = encode_instruction(&f, 0, &big).unwrap_err();
        assert!(matches!(err, UnmoonError::OperandOutOfRange { operand: 'A', value: 256, .. }));

        let neg = Instruction::resolved(OpCode::GetTable, 0, -1, 0);
        assert!(encode_instruction(&f, 0, &neg).is_err());
    }

    #[test]
    fn chunk_layout() {
        let mut main = Function::new("main");
        main.is_vararg = 2;
        main.max_stack_size = 2;
        main.constants = vec![Constant::String("hi".into()), Constant::Bool(true)];
        main.push(Instruction::resolved(OpCode::Return, 0, 1, 0));
        main.functions.push(Function::new("inner"));

        let bytes = write_chunk(&main).unwrap();
        assert_eq!(&bytes[..4], LUA_SIGNATURE);
        assert_eq!(&bytes[4..12], &[0x51, 0, 1, 4, 8, 4, 8, 0]);
        // source "=main" with NUL
        assert_eq!(LittleEndian::read_u64(&bytes[12..20]), 6);
        assert_eq!(&bytes[20..26], b"=main\0");
        // linedefined, lastlinedefined, nups, params, vararg, stack
        assert_eq!(&bytes[34..38], &[0, 0, 2, 2]);
        assert_eq!(LittleEndian::read_u32(&bytes[38..42]), 1);
        assert_eq!(LittleEndian::read_u32(&bytes[42..46]), 0x0080_001e);
        assert_eq!(LittleEndian::read_u32(&bytes[46..50]), 2);
        assert_eq!(bytes[50], LUA_TSTRING);

        let err = {
            let mut broken = main.clone();
            broken.functions[0].push(Instruction::new(9, 0, 0, 0));
            write_chunk(&broken).unwrap_err()
        };
        assert!(matches!(err, UnmoonError::UnresolvedOpcode { ref function, .. } if function == "inner"));
    }
}
