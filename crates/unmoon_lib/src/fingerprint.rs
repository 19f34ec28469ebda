//! Structural fingerprint of a decompiled VM handler body.
//!
//! The fingerprint is a pre-order concatenation of decimal tokens. Literal values,
//! binding statements, `do` blocks and names outside the VM's own vocabulary are
//! elided, so two builds of the same handler agree even though their operand
//! literals and temporary names differ.

use crate::ast::{BinaryOp, Block, Expr, Stmt, UnaryOp};

const MEMBER: &str = "6";
const INDEX: &str = "9";
const IF: &str = "10";
const ELSEIF: &str = "11";
const ELSE: &str = "12";
const NUMERIC_FOR: &str = "13";
const CALL: &str = "14";
const RETURN: &str = "27";
const TABLE: &str = "33";
const WHILE: &str = "37";
const REPEAT: &str = "38";
const GENERIC_FOR: &str = "39";
const BREAK: &str = "40";
const FUNCTION: &str = "41";
const VARARG: &str = "42";

fn name_token(name: &str) -> Option<&'static str> {
    Some(match name {
        "inst" => "0",
        "stk" => "1",
        "upv" => "2",
        "env" => "3",
        "vararg" => "4",
        "unpack" => "5",
        "setmetatable" => "7",
        "protos" => "8",
        "pc" => "29",
        "top" => "30",
        _ => return None,
    })
}

fn binary_token(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "15",
        BinaryOp::Sub => "16",
        BinaryOp::Mul => "17",
        BinaryOp::Div => "18",
        BinaryOp::Mod => "19",
        BinaryOp::Pow => "20",
        BinaryOp::Lt => "21",
        BinaryOp::Gt => "22",
        BinaryOp::Le => "23",
        BinaryOp::Ge => "24",
        BinaryOp::Eq => "25",
        BinaryOp::Ne => "26",
        BinaryOp::Concat => "32",
        BinaryOp::And => "35",
        BinaryOp::Or => "36",
    }
}

fn unary_token(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Len => "28",
        UnaryOp::Neg => "31",
        UnaryOp::Not => "34",
    }
}

pub fn fingerprint(block: &Block) -> String {
    let mut out = String::new();
    block_tokens(block, &mut out);
    out
}

fn block_tokens(block: &Block, out: &mut String) {
    for stmt in &block.stmts {
        stmt_tokens(stmt, out);
    }
}

fn exprs_tokens(exprs: &[Expr], out: &mut String) {
    for e in exprs {
        expr_tokens(e, out);
    }
}

fn stmt_tokens(stmt: &Stmt, out: &mut String) {
    match stmt {
        Stmt::Local(l) => exprs_tokens(&l.values, out),
        Stmt::Assign(a) => {
            exprs_tokens(&a.targets, out);
            exprs_tokens(&a.values, out);
        }
        Stmt::Call(c) => {
            out.push_str(CALL);
            expr_tokens(&c.func, out);
            exprs_tokens(&c.args, out);
        }
        Stmt::Do(b) => block_tokens(b, out),
        Stmt::If(i) => {
            out.push_str(IF);
            for _ in i.clauses.iter().skip(1) {
                out.push_str(ELSEIF);
            }
            if i.else_body.is_some() {
                out.push_str(ELSE);
            }
            for clause in &i.clauses {
                expr_tokens(&clause.cond, out);
                block_tokens(&clause.body, out);
            }
            if let Some(body) = &i.else_body {
                block_tokens(body, out);
            }
        }
        Stmt::While { cond, body } => {
            out.push_str(WHILE);
            expr_tokens(cond, out);
            block_tokens(body, out);
        }
        Stmt::Repeat { body, cond } => {
            out.push_str(REPEAT);
            block_tokens(body, out);
            expr_tokens(cond, out);
        }
        Stmt::NumericFor {
            start,
            limit,
            step,
            body,
            ..
        } => {
            out.push_str(NUMERIC_FOR);
            expr_tokens(start, out);
            expr_tokens(limit, out);
            if let Some(s) = step {
                expr_tokens(s, out);
            }
            block_tokens(body, out);
        }
        Stmt::GenericFor { exprs, body, .. } => {
            out.push_str(GENERIC_FOR);
            exprs_tokens(exprs, out);
            block_tokens(body, out);
        }
        Stmt::Return(values) => {
            out.push_str(RETURN);
            exprs_tokens(values, out);
        }
        Stmt::Break => out.push_str(BREAK),
    }
}

fn expr_tokens(expr: &Expr, out: &mut String) {
    match expr {
        Expr::Nil | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => {}
        Expr::Vararg => out.push_str(VARARG),
        Expr::Name(n) => {
            if let Some(tok) = name_token(n) {
                out.push_str(tok);
            }
        }
        Expr::Binary(b) => {
            out.push_str(binary_token(b.op));
            expr_tokens(&b.left, out);
            expr_tokens(&b.right, out);
        }
        Expr::Unary(u) => {
            out.push_str(unary_token(u.op));
            expr_tokens(&u.operand, out);
        }
        Expr::Member(m) => {
            out.push_str(MEMBER);
            expr_tokens(&m.object, out);
        }
        Expr::Index(i) => {
            out.push_str(INDEX);
            expr_tokens(&i.table, out);
            expr_tokens(&i.key, out);
        }
        Expr::Call(c) => {
            out.push_str(CALL);
            expr_tokens(&c.func, out);
            exprs_tokens(&c.args, out);
        }
        Expr::Table(entries) => {
            out.push_str(TABLE);
            for e in entries {
                if let Some(k) = &e.key {
                    expr_tokens(k, out);
                }
                expr_tokens(&e.value, out);
            }
        }
        Expr::Function(func) => {
            out.push_str(FUNCTION);
            block_tokens(&func.body, out);
        }
    }
}
