//! Tree for decompiled handler / script source.
//!
//! Nodes are plain owned values. Rewrite passes never edit a node in place; they build a
//! replacement and hand it back to the engine (see [`crate::rewrite`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bytecode::{format_number, quote_string};

/// Identity of a binding statement, used as a declaration-site reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "..",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "~=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    /// Operator that keeps the truth value when the operands trade places.
    pub fn mirrored(self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::Eq),
            BinaryOp::Ne => Some(BinaryOp::Ne),
            BinaryOp::Lt => Some(BinaryOp::Gt),
            BinaryOp::Gt => Some(BinaryOp::Lt),
            BinaryOp::Le => Some(BinaryOp::Ge),
            BinaryOp::Ge => Some(BinaryOp::Le),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    Len,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "not ",
            UnaryOp::Len => "#",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
}

/// `object.field`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAccess {
    pub object: Box<Expr>,
    pub field: String,
}

/// `table[key]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementAccess {
    pub table: Box<Expr>,
    pub key: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub func: Box<Expr>,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    #[serde(default)]
    pub key: Option<Expr>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionExpr {
    pub params: Vec<String>,
    #[serde(default)]
    pub is_vararg: bool,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Nil,
    Bool(bool),
    Number(f64),
    String(String),
    Vararg,
    Name(String),
    Binary(BinaryExpr),
    Unary(UnaryExpr),
    Member(MemberAccess),
    Index(ElementAccess),
    Call(Call),
    Table(Vec<TableEntry>),
    Function(Box<FunctionExpr>),
}

impl Expr {
    pub fn name(s: impl Into<String>) -> Expr {
        Expr::Name(s.into())
    }

    pub fn num(v: f64) -> Expr {
        Expr::Number(v)
    }

    pub fn string(s: impl Into<String>) -> Expr {
        Expr::String(s.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary(UnaryExpr {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn member(object: Expr, field: impl Into<String>) -> Expr {
        Expr::Member(MemberAccess {
            object: Box::new(object),
            field: field.into(),
        })
    }

    pub fn index(table: Expr, key: Expr) -> Expr {
        Expr::Index(ElementAccess {
            table: Box::new(table),
            key: Box::new(key),
        })
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            func: Box::new(func),
            args,
        })
    }

    /// Array-style table constructor.
    pub fn array(values: Vec<Expr>) -> Expr {
        Expr::Table(
            values
                .into_iter()
                .map(|value| TableEntry { key: None, value })
                .collect(),
        )
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Nil | Expr::Bool(_) | Expr::Number(_) | Expr::String(_)
        )
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Expr::Name(n) => Some(n),
            _ => None,
        }
    }

    /// Whether `name` occurs anywhere in this expression.
    pub fn mentions(&self, name: &str) -> bool {
        match self {
            Expr::Name(n) => n == name,
            Expr::Binary(b) => b.left.mentions(name) || b.right.mentions(name),
            Expr::Unary(u) => u.operand.mentions(name),
            Expr::Member(m) => m.object.mentions(name),
            Expr::Index(i) => i.table.mentions(name) || i.key.mentions(name),
            Expr::Call(c) => c.func.mentions(name) || c.args.iter().any(|a| a.mentions(name)),
            Expr::Table(entries) => entries.iter().any(|e| {
                e.key.as_ref().is_some_and(|k| k.mentions(name)) || e.value.mentions(name)
            }),
            // closures capture by name; treat any body as a potential mention
            Expr::Function(_) => true,
            Expr::Nil | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) | Expr::Vararg => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDeclare {
    pub id: NodeId,
    pub names: Vec<String>,
    #[serde(default)]
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assign {
    pub id: NodeId,
    pub targets: Vec<Expr>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfClause {
    pub cond: Expr,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct If {
    /// `if` clause followed by any `elseif` clauses.
    pub clauses: Vec<IfClause>,
    #[serde(default)]
    pub else_body: Option<Block>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Local(LocalDeclare),
    Assign(Assign),
    Call(Call),
    Do(Block),
    If(If),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        names: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Return(Vec<Expr>),
    Break,
}

impl Stmt {
    pub fn local(id: u32, names: &[&str], values: Vec<Expr>) -> Stmt {
        Stmt::Local(LocalDeclare {
            id: NodeId(id),
            names: names.iter().map(|n| n.to_string()).collect(),
            values,
        })
    }

    pub fn assign(id: u32, targets: Vec<Expr>, values: Vec<Expr>) -> Stmt {
        Stmt::Assign(Assign {
            id: NodeId(id),
            targets,
            values,
        })
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Stmt {
        Stmt::Call(Call {
            func: Box::new(func),
            args,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }
}

fn needs_brackets(field: &str) -> bool {
    let mut chars = field.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return true,
    }
    !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn join(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Nil => write!(f, "nil"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Number(v) => write!(f, "{}", format_number(*v)),
            Expr::String(s) => write!(f, "{}", quote_string(s)),
            Expr::Vararg => write!(f, "..."),
            Expr::Name(n) => write!(f, "{n}"),
            Expr::Binary(b) => write!(f, "({} {} {})", b.left, b.op.symbol(), b.right),
            Expr::Unary(u) => {
                let operand = u.operand.to_string();
                // `--` opens a comment
                if u.op == UnaryOp::Neg && operand.starts_with('-') {
                    write!(f, "-({operand})")
                } else {
                    write!(f, "{}{operand}", u.op.symbol())
                }
            }
            Expr::Member(m) => {
                if needs_brackets(&m.field) {
                    write!(f, "{}[{}]", m.object, quote_string(&m.field))
                } else {
                    write!(f, "{}.{}", m.object, m.field)
                }
            }
            Expr::Index(i) => write!(f, "{}[{}]", i.table, i.key),
            Expr::Call(c) => write!(f, "{}({})", c.func, join(&c.args)),
            Expr::Table(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|e| match &e.key {
                        Some(k) => format!("[{}] = {}", k, e.value),
                        None => e.value.to_string(),
                    })
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Expr::Function(func) => {
                let mut params = func.params.clone();
                if func.is_vararg {
                    params.push("...".into());
                }
                writeln!(f, "function({})", params.join(", "))?;
                write!(f, "{}end", block_to_string(&func.body, 1))
            }
        }
    }
}

fn block_to_string(block: &Block, indent: usize) -> String {
    let mut out = String::new();
    for stmt in &block.stmts {
        stmt_to_string(stmt, indent, &mut out);
    }
    out
}

fn stmt_to_string(stmt: &Stmt, indent: usize, out: &mut String) {
    let pad = "    ".repeat(indent);
    match stmt {
        Stmt::Local(l) => {
            if l.values.is_empty() {
                out.push_str(&format!("{pad}local {}\n", l.names.join(", ")));
            } else {
                out.push_str(&format!(
                    "{pad}local {} = {}\n",
                    l.names.join(", "),
                    join(&l.values)
                ));
            }
        }
        Stmt::Assign(a) => {
            out.push_str(&format!("{pad}{} = {}\n", join(&a.targets), join(&a.values)))
        }
        Stmt::Call(c) => out.push_str(&format!("{pad}{}({})\n", c.func, join(&c.args))),
        Stmt::Do(b) => {
            out.push_str(&format!("{pad}do\n"));
            out.push_str(&block_to_string(b, indent + 1));
            out.push_str(&format!("{pad}end\n"));
        }
        Stmt::If(i) => {
            for (n, clause) in i.clauses.iter().enumerate() {
                let kw = if n == 0 { "if" } else { "elseif" };
                out.push_str(&format!("{pad}{kw} {} then\n", clause.cond));
                out.push_str(&block_to_string(&clause.body, indent + 1));
            }
            if let Some(body) = &i.else_body {
                out.push_str(&format!("{pad}else\n"));
                out.push_str(&block_to_string(body, indent + 1));
            }
            out.push_str(&format!("{pad}end\n"));
        }
        Stmt::While { cond, body } => {
            out.push_str(&format!("{pad}while {cond} do\n"));
            out.push_str(&block_to_string(body, indent + 1));
            out.push_str(&format!("{pad}end\n"));
        }
        Stmt::Repeat { body, cond } => {
            out.push_str(&format!("{pad}repeat\n"));
            out.push_str(&block_to_string(body, indent + 1));
            out.push_str(&format!("{pad}until {cond}\n"));
        }
        Stmt::NumericFor {
            var,
            start,
            limit,
            step,
            body,
        } => {
            match step {
                Some(s) => out.push_str(&format!("{pad}for {var} = {start}, {limit}, {s} do\n")),
                None => out.push_str(&format!("{pad}for {var} = {start}, {limit} do\n")),
            }
            out.push_str(&block_to_string(body, indent + 1));
            out.push_str(&format!("{pad}end\n"));
        }
        Stmt::GenericFor { names, exprs, body } => {
            out.push_str(&format!("{pad}for {} in {} do\n", names.join(", "), join(exprs)));
            out.push_str(&block_to_string(body, indent + 1));
            out.push_str(&format!("{pad}end\n"));
        }
        Stmt::Return(values) if values.is_empty() => out.push_str(&format!("{pad}return\n")),
        Stmt::Return(values) => out.push_str(&format!("{pad}return {}\n", join(values))),
        Stmt::Break => out.push_str(&format!("{pad}break\n")),
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        stmt_to_string(self, 0, &mut out);
        f.write_str(out.trim_end())
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&block_to_string(self, 0))
    }
}
