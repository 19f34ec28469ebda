//! Annotated text listing of an opcode-resolved prototype tree.

use crate::bytecode::{Function, Instruction, OpCode};

pub const LISTING_HEADER: &str = "-- Disassembled with unmoon (MoonSec V3)";

/// Lua 5.1 `LFIELDS_PER_FLUSH`.
const FIELDS_PER_FLUSH: i32 = 50;

/// Widest count a 9-bit B or C operand can carry.
const MAX_LISTED: i32 = 511;

pub fn disassemble(root: &Function) -> String {
    let mut out = String::new();
    out.push_str(LISTING_HEADER);
    out.push('\n');
    disassemble_function(root, &mut out);
    out
}

fn disassemble_function(f: &Function, out: &mut String) {
    let mut params: Vec<String> = (0..f.num_params).map(|i| format!("R{i}")).collect();
    if f.is_variadic() {
        params.push("...".into());
    }
    out.push_str(&format!("function {}({})\n", f.name, params.join(", ")));
    out.push_str(&format!(
        "\t[Slots: {}, Upvalues: {}, Constants: {}]\n",
        f.max_stack_size,
        f.num_upvalues,
        f.constants.len()
    ));

    for (i, ins) in f.instructions.iter().enumerate() {
        out.push_str(&format!("\t[{i:>4}]\t"));
        out.push_str(&instruction_line(ins, f));
        out.push('\n');
    }
    out.push_str("end\n");

    for child in &f.functions {
        disassemble_function(child, out);
    }
}

fn instruction_line(ins: &Instruction, f: &Function) -> String {
    let (a, b, c) = (ins.a, ins.b, ins.c);
    match ins.opcode {
        Some(op) => {
            let note = annotate(ins, f).unwrap_or_default();
            format!("{op:>12}\t| {a:>4} | {b:>4} | {c:>4} |\t{note}")
        }
        None if ins.dead => format!("{:>12}\t| {:>4} | {:>4} | {:>4} |", "DEAD", "-", "-", "-"),
        None => format!("{:>12}\t| {a:>4} | {b:>4} | {c:>4} |", ins.op_num),
    }
}

fn reg(r: i32) -> String {
    format!("R{r}")
}

/// Register `r + n`. Operands come straight from input, so nothing here may overflow.
fn off(r: i32, n: i32) -> i32 {
    r.saturating_add(n)
}

/// `R{first}, R{first+1}, ...` for `count` registers.
fn regs(first: i32, count: i32) -> String {
    (0..count.clamp(0, MAX_LISTED))
        .map(|i| reg(off(first, i)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn rk(v: i32, f: &Function) -> String {
    if v > 255 {
        match f.rk_constant(v) {
            Some(k) => k.to_string(),
            None => format!("K{}", v.saturating_sub(256)),
        }
    } else {
        reg(v)
    }
}

fn kst(idx: i32, f: &Function) -> String {
    match f.constant(idx) {
        Some(k) => k.to_string(),
        None => format!("K{idx}"),
    }
}

/// Global names print bare.
fn global(idx: i32, f: &Function) -> String {
    match f.constant(idx).and_then(|k| k.as_str()) {
        Some(name) => name.to_string(),
        None => kst(idx, f),
    }
}

/// Semantic annotation for a resolved instruction; `None` while the opcode is unknown.
pub fn annotate(ins: &Instruction, f: &Function) -> Option<String> {
    let (a, b, c) = (ins.a, ins.b, ins.c);
    let text = match ins.opcode? {
        OpCode::Move => format!("R{a} = R{b}"),
        OpCode::LoadK => format!("R{a} = {}", kst(b, f)),
        OpCode::LoadBool => {
            let skip = if c != 0 { "; PC += 1" } else { "" };
            format!("R{a} = {}{skip}", b != 0)
        }
        OpCode::LoadNil if b == a => format!("R{a} = nil"),
        OpCode::LoadNil => format!("R{a}->R{b} = nil"),
        OpCode::GetUpval => format!("R{a} = UPVALUE_{b}"),
        OpCode::GetGlobal => format!("R{a} = {}", global(b, f)),
        OpCode::GetTable => format!("R{a} = R{b}[{}]", rk(c, f)),
        OpCode::SetGlobal => format!("{} = R{a}", global(b, f)),
        OpCode::SetUpval => format!("UPVALUE_{b} = R{a}"),
        OpCode::SetTable => format!("R{a}[{}] = {}", rk(b, f), rk(c, f)),
        OpCode::NewTable => format!("R{a} = {{}}"),
        OpCode::SelfOp => format!("R{} = R{b}; R{a} = R{b}[{}]", off(a, 1), rk(c, f)),
        op @ (OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Mod
        | OpCode::Pow) => {
            let sym = match op {
                OpCode::Add => "+",
                OpCode::Sub => "-",
                OpCode::Mul => "*",
                OpCode::Div => "/",
                OpCode::Mod => "%",
                _ => "^",
            };
            format!("R{a} = {} {sym} {}", rk(b, f), rk(c, f))
        }
        OpCode::Unm => format!("R{a} = -R{b}"),
        OpCode::Not => format!("R{a} = not R{b}"),
        OpCode::Len => format!("R{a} = #R{b}"),
        OpCode::Concat => {
            let last = c.min(off(b, MAX_LISTED - 1));
            let parts: Vec<String> = (b..=last).map(reg).collect();
            format!("R{a} = {}", parts.join(" .. "))
        }
        OpCode::Jmp => format!("PC += {b}"),
        op @ (OpCode::Eq | OpCode::Lt | OpCode::Le) => {
            let sym = match (op, a != 0) {
                (OpCode::Eq, false) => "==",
                (OpCode::Eq, true) => "~=",
                (OpCode::Lt, false) => "<",
                (OpCode::Lt, true) => ">",
                (_, false) => "<=",
                (_, true) => ">=",
            };
            format!("if {} {sym} {} then PC += 1", rk(b, f), rk(c, f))
        }
        OpCode::Test if c == 0 => format!("if not R{a} then PC += 1"),
        OpCode::Test => format!("if R{a} then PC += 1"),
        OpCode::TestSet => {
            let cond = if c == 0 { format!("not R{b}") } else { reg(b) };
            format!("if {cond} then R{a} = R{b} else PC += 1")
        }
        OpCode::Call => {
            let lhs = match c {
                0 => format!("R{a}->top = "),
                1 => String::new(),
                _ => format!("{} = ", regs(a, off(c, -1))),
            };
            format!("{lhs}R{a}({})", call_args(a, b))
        }
        OpCode::TailCall => format!("return R{a}({})", call_args(a, b)),
        OpCode::Return => match b {
            0 => format!("return R{a}->top"),
            1 => "return".into(),
            _ => format!("return {}", regs(a, off(b, -1))),
        },
        OpCode::ForLoop => format!(
            "R{a} += R{}; if loop continues then PC += {b}; R{} = R{a};",
            off(a, 2),
            off(a, 3)
        ),
        OpCode::ForPrep => format!("R{a} -= R{}; PC += {b}", off(a, 2)),
        OpCode::TForLoop => format!(
            "{} = R{a}(R{}, R{}); if R{} ~= nil then R{} = R{} else PC += 1 end",
            regs(off(a, 3), c),
            off(a, 1),
            off(a, 2),
            off(a, 3),
            off(a, 2),
            off(a, 3)
        ),
        // C == 0 keeps the block number in the next word, which the handler table does not decode
        OpCode::SetList if c <= 0 => match b {
            0 => format!("R{a}[...] = R{}->top", off(a, 1)),
            _ => format!("R{a}[...] = R{}->R{}", off(a, 1), off(a, b)),
        },
        OpCode::SetList => {
            let first = off(c, -1).saturating_mul(FIELDS_PER_FLUSH).saturating_add(1);
            match b {
                0 => format!("R{a}[{first}..] = R{}->top", off(a, 1)),
                _ => format!(
                    "R{a}[{first}..{}] = R{}->R{}",
                    off(first, off(b, -1)),
                    off(a, 1),
                    off(a, b)
                ),
            }
        }
        OpCode::Close => format!("close R{a}->top"),
        OpCode::Closure => match f.child(b) {
            Some(child) => format!("R{a} = {}", child.name),
            None => format!("R{a} = closure[{b}]"),
        },
        OpCode::VarArg => match b {
            0 => format!("R{a}->top = ..."),
            1 => "...".into(),
            _ => format!("{} = ...", regs(a, off(b, -1))),
        },
    };
    Some(text)
}

fn call_args(a: i32, b: i32) -> String {
    match b {
        0 => format!("R{}->top", off(a, 1)),
        1 => String::new(),
        _ => regs(off(a, 1), off(b, -1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Constant;

    fn note(op: OpCode, a: i32, b: i32, c: i32) -> String {
        let f = Function::new("main");
        annotate(&Instruction::resolved(op, a, b, c), &f).unwrap()
    }

    #[test]
    fn call_counts_expand_to_register_lists() {
        assert_eq!(note(OpCode::Call, 2, 2, 3), "R2, R3 = R2(R3)");
        assert_eq!(note(OpCode::Call, 2, 2, 0), "R2->top = R2(R3)");
        assert_eq!(note(OpCode::Call, 2, 2, 1), "R2(R3)");
        assert_eq!(note(OpCode::Call, 0, 0, 2), "R0 = R0(R1->top)");
        assert_eq!(note(OpCode::Call, 0, 1, 1), "R0()");
        assert_eq!(note(OpCode::Call, 1, 4, 1), "R1(R2, R3, R4)");
    }

    #[test]
    fn return_tailcall_and_vararg_counts() {
        assert_eq!(note(OpCode::Return, 0, 1, 0), "return");
        assert_eq!(note(OpCode::Return, 3, 0, 0), "return R3->top");
        assert_eq!(note(OpCode::Return, 3, 3, 0), "return R3, R4");
        assert_eq!(note(OpCode::TailCall, 1, 0, 0), "return R1(R2->top)");
        assert_eq!(note(OpCode::TailCall, 1, 1, 0), "return R1()");
        assert_eq!(note(OpCode::TailCall, 1, 3, 0), "return R1(R2, R3)");
        assert_eq!(note(OpCode::VarArg, 2, 0, 0), "R2->top = ...");
        assert_eq!(note(OpCode::VarArg, 2, 3, 0), "R2, R3 = ...");
    }

    #[test]
    fn comparisons_mirror_when_flag_is_set() {
        assert_eq!(note(OpCode::Eq, 0, 1, 2), "if R1 == R2 then PC += 1");
        assert_eq!(note(OpCode::Eq, 1, 1, 2), "if R1 ~= R2 then PC += 1");
        assert_eq!(note(OpCode::Lt, 1, 1, 2), "if R1 > R2 then PC += 1");
        assert_eq!(note(OpCode::Le, 1, 1, 2), "if R1 >= R2 then PC += 1");
    }

    #[test]
    fn concat_spans_b_through_c() {
        assert_eq!(note(OpCode::Concat, 0, 1, 3), "R0 = R1 .. R2 .. R3");
    }

    #[test]
    fn constants_render_as_literals() {
        let mut f = Function::new("main");
        f.constants = vec![Constant::String("print".into()), Constant::Number(2.5)];
        let get = Instruction::resolved(OpCode::GetGlobal, 0, 0, 0);
        assert_eq!(annotate(&get, &f).unwrap(), "R0 = print");
        let load = Instruction::resolved(OpCode::LoadK, 1, 0, 0);
        assert_eq!(annotate(&load, &f).unwrap(), "R1 = \"print\"");
        let add = Instruction::resolved(OpCode::Add, 0, 257, 300);
        assert_eq!(annotate(&add, &f).unwrap(), "R0 = 2.5 + K44");
    }

    #[test]
    fn set_list_blocks() {
        assert_eq!(note(OpCode::SetList, 0, 3, 1), "R0[1..3] = R1->R3");
        assert_eq!(note(OpCode::SetList, 0, 0, 2), "R0[51..] = R1->top");
        assert_eq!(note(OpCode::SetList, 0, 2, 0), "R0[...] = R1->R2");
        assert_eq!(note(OpCode::SetList, 4, 0, 0), "R4[...] = R5->top");
    }

    #[test]
    fn oversized_operands_render_without_overflow() {
        let big = i32::MAX;
        assert_eq!(note(OpCode::SelfOp, big, 0, 0), format!("R{big} = R0; R{big} = R0[R0]"));
        assert_eq!(note(OpCode::ForPrep, big, 1, 0), format!("R{big} -= R{big}; PC += 1"));
        assert!(note(OpCode::SetList, big, big, big).starts_with(&format!("R{big}[")));
        assert_eq!(note(OpCode::Call, 0, 1, big).matches(", ").count(), (MAX_LISTED - 1) as usize);
        assert_eq!(note(OpCode::Return, 0, big, 0).matches(", ").count(), (MAX_LISTED - 1) as usize);
        assert_eq!(note(OpCode::Concat, 0, 0, big).matches(" .. ").count(), (MAX_LISTED - 1) as usize);
        assert_eq!(note(OpCode::Call, 0, i32::MIN, 0), "R0->top = R0()");

        let f = Function::new("main");
        let ins = Instruction::resolved(OpCode::Add, 0, i32::MIN, big);
        assert_eq!(annotate(&ins, &f).unwrap(), format!("R0 = R{} + K{}", i32::MIN, big - 256));
    }

    #[test]
    fn unresolved_has_no_annotation() {
        let f = Function::new("main");
        assert_eq!(annotate(&Instruction::new(17, 0, 0, 0), &f), None);
    }

    #[test]
    fn listing_layout() {
        let mut main = Function::new("main");
        main.num_params = 2;
        main.is_vararg = 2;
        main.max_stack_size = 4;
        main.push(Instruction::resolved(OpCode::Move, 0, 1, 0));
        main.push(Instruction::new(17, 1, 2, 3));
        main.push(Instruction::dead());
        main.push(Instruction::resolved(OpCode::Closure, 2, 0, 0));
        main.functions.push(Function::new("inner"));

        let expected = "\
-- Disassembled with unmoon (MoonSec V3)
function main(R0, R1, ...)
\t[Slots: 4, Upvalues: 0, Constants: 0]
\t[   0]\t        MOVE\t|    0 |    1 |    0 |\tR0 = R1
\t[   1]\t          17\t|    1 |    2 |    3 |
\t[   2]\t        DEAD\t|    - |    - |    - |
\t[   3]\t     CLOSURE\t|    2 |    0 |    0 |\tR2 = inner
end
function inner()
\t[Slots: 0, Upvalues: 0, Constants: 0]
end
";
        assert_eq!(disassemble(&main), expected);
    }
}
