use crate::ast::{BinaryExpr, Expr, UnaryExpr, UnaryOp};

use super::Rewriter;

/// Folds negated and length-of literals and moves numeric literals to the right-hand
/// side of comparisons.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantFolder;

fn is_array_of_literals(entries: &[crate::ast::TableEntry]) -> bool {
    entries
        .iter()
        .all(|e| e.key.is_none() && e.value.is_literal() && e.value != Expr::Nil)
}

/// `5 < x` becomes `x > 5`; anything else is declined.
pub fn normalize_comparison(node: &BinaryExpr) -> Option<Expr> {
    if !matches!(node.left.as_ref(), Expr::Number(_)) || node.right.is_literal() {
        return None;
    }
    let op = node.op.mirrored()?;
    Some(Expr::binary(op, (*node.right).clone(), (*node.left).clone()))
}

impl Rewriter for ConstantFolder {
    fn name(&self) -> &'static str {
        "constant-folder"
    }

    fn unary(&mut self, node: &UnaryExpr) -> Option<Expr> {
        match (node.op, node.operand.as_ref()) {
            (UnaryOp::Neg, Expr::Number(v)) => Some(Expr::num(-v)),
            (UnaryOp::Len, Expr::Table(entries)) if is_array_of_literals(entries) => {
                Some(Expr::num(entries.len() as f64))
            }
            _ => None,
        }
    }

    fn binary(&mut self, node: &BinaryExpr) -> Option<Expr> {
        normalize_comparison(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Block, Stmt, TableEntry};
    use crate::rewrite::rewrite_block;

    fn fold(e: Expr) -> Expr {
        let mut block = Block::new(vec![Stmt::Return(vec![e])]);
        rewrite_block(&mut ConstantFolder, &mut block);
        match block.stmts.pop() {
            Some(Stmt::Return(mut v)) => v.remove(0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn folds_negated_number() {
        assert_eq!(fold(Expr::unary(UnaryOp::Neg, Expr::num(4.0))), Expr::num(-4.0));
        assert_eq!(
            fold(Expr::unary(UnaryOp::Neg, Expr::unary(UnaryOp::Neg, Expr::num(4.0)))),
            Expr::num(4.0)
        );
    }

    #[test]
    fn folds_length_of_array_literal() {
        let t = Expr::array(vec![Expr::num(1.0), Expr::string("a"), Expr::Bool(false)]);
        assert_eq!(fold(Expr::unary(UnaryOp::Len, t)), Expr::num(3.0));
    }

    #[test]
    fn declines_length_of_table_with_nil_key_or_expression() {
        let with_nil = Expr::array(vec![Expr::num(1.0), Expr::Nil]);
        let e = Expr::unary(UnaryOp::Len, with_nil);
        assert_eq!(fold(e.clone()), e);

        let keyed = Expr::Table(vec![TableEntry {
            key: Some(Expr::string("k")),
            value: Expr::num(1.0),
        }]);
        let e = Expr::unary(UnaryOp::Len, keyed);
        assert_eq!(fold(e.clone()), e);

        let dynamic = Expr::array(vec![Expr::name("x")]);
        let e = Expr::unary(UnaryOp::Len, dynamic);
        assert_eq!(fold(e.clone()), e);
    }

    #[test]
    fn ordering_comparisons_flip_when_swapped() {
        let cases = [
            (BinaryOp::Lt, BinaryOp::Gt),
            (BinaryOp::Gt, BinaryOp::Lt),
            (BinaryOp::Le, BinaryOp::Ge),
            (BinaryOp::Ge, BinaryOp::Le),
            (BinaryOp::Eq, BinaryOp::Eq),
            (BinaryOp::Ne, BinaryOp::Ne),
        ];
        for (op, expected) in cases {
            let e = Expr::binary(op, Expr::num(5.0), Expr::name("a"));
            assert_eq!(fold(e), Expr::binary(expected, Expr::name("a"), Expr::num(5.0)));
        }
    }

    #[test]
    fn comparison_normalization_is_idempotent() {
        let e = Expr::binary(BinaryOp::Le, Expr::num(1.0), Expr::name("n"));
        let once = fold(e);
        let twice = fold(once.clone());
        assert_eq!(once, twice);
        if let Expr::Binary(b) = &once {
            assert!(normalize_comparison(b).is_none());
        }
    }

    #[test]
    fn leaves_arithmetic_and_literal_pairs_alone() {
        let sum = Expr::binary(BinaryOp::Add, Expr::num(1.0), Expr::name("a"));
        assert_eq!(fold(sum.clone()), sum);
        let both = Expr::binary(BinaryOp::Lt, Expr::num(1.0), Expr::num(2.0));
        assert_eq!(fold(both.clone()), both);
    }
}
