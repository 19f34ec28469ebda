use std::collections::HashMap;

use unmoon_lib::ast::{BinaryOp, Block, Expr, Stmt};
use unmoon_lib::rewrite::{ConstantFolder, HandlerRewriter, Pipeline};
use unmoon_lib::{ConstantReplacer, RewriteOptions, fingerprint, simplify};

fn n(s: &str) -> Expr {
    Expr::name(s)
}

#[test]
fn constant_mapping_rewrites_member_accesses() {
    let mut constants = HashMap::new();
    constants.insert("FOO".to_string(), vec!["bit32".to_string(), "band".to_string()]);
    constants.insert("BAR".to_string(), vec!["7".to_string()]);

    let mut block = Block::new(vec![Stmt::Return(vec![
        Expr::member(n("x"), "FOO"),
        Expr::member(n("x"), "BAR"),
        Expr::member(n("x"), "BAZ"),
    ])]);
    let report = simplify(
        &mut block,
        &RewriteOptions::default(),
        Some(ConstantReplacer::new(constants)),
    );
    assert!(report.converged);
    assert_eq!(block.to_string(), "return bit32.band, 7, x.BAZ\n");
}

/// `local _0 = inst[OP_A]; local _1 = stk[_0]; ... pc = _N`
fn indirection_chain(depth: usize) -> (Block, String) {
    let mut stmts = vec![Stmt::local(0, &["_0"], vec![Expr::index(n("inst"), n("OP_A"))])];
    for i in 1..=depth {
        let name = format!("_{i}");
        stmts.push(Stmt::local(
            i as u32,
            &[name.as_str()],
            vec![Expr::index(n("stk"), Expr::name(format!("_{}", i - 1)))],
        ));
    }
    stmts.push(Stmt::assign(
        depth as u32 + 1,
        vec![n("pc")],
        vec![Expr::name(format!("_{depth}"))],
    ));

    let mut expected = "inst[OP_A]".to_string();
    for _ in 0..depth {
        expected = format!("stk[{expected}]");
    }
    (Block::new(stmts), format!("pc = {expected}\n"))
}

#[test]
fn nested_single_use_chain_collapses_in_bounded_iterations() {
    for depth in [1, 5, 20, 40] {
        let (mut block, expected) = indirection_chain(depth);
        let mut pipeline = Pipeline::new(4 * depth + 4)
            .with(ConstantFolder)
            .with(HandlerRewriter::new(RewriteOptions::default()));
        let report = pipeline.run(&mut block);
        assert!(report.converged, "depth {depth}");
        assert!(report.iterations <= depth + 2, "depth {depth}: {report:?}");
        assert_eq!(block.to_string(), expected);
    }
}

#[test]
fn raw_handler_simplifies_to_catalog_shape() {
    // local _1 = inst; local _2 = OP_A; local _3 = _1[_2]; local _4 = OP_B
    // local _5 = _1[_4]; local _6 = stk[_5]; local _7 = OP_C; local _8 = _1[_7]
    // local _9 = stk[_8]; local _10 = _6 + _9; stk[_3] = _10
    let mut block = Block::new(vec![
        Stmt::local(1, &["_1"], vec![n("inst")]),
        Stmt::local(2, &["_2"], vec![n("OP_A")]),
        Stmt::local(3, &["_3"], vec![Expr::index(n("_1"), n("_2"))]),
        Stmt::local(4, &["_4"], vec![n("OP_B")]),
        Stmt::local(5, &["_5"], vec![Expr::index(n("_1"), n("_4"))]),
        Stmt::local(6, &["_6"], vec![Expr::index(n("stk"), n("_5"))]),
        Stmt::local(7, &["_7"], vec![n("OP_C")]),
        Stmt::local(8, &["_8"], vec![Expr::index(n("_1"), n("_7"))]),
        Stmt::local(9, &["_9"], vec![Expr::index(n("stk"), n("_8"))]),
        Stmt::local(10, &["_10"], vec![Expr::binary(BinaryOp::Add, n("_6"), n("_9"))]),
        Stmt::assign(11, vec![Expr::index(n("stk"), n("_3"))], vec![n("_10")]),
    ]);
    let report = simplify(&mut block, &RewriteOptions::default(), None);
    assert!(report.converged);
    assert_eq!(
        block.to_string(),
        "stk[inst[OP_A]] = (stk[inst[OP_B]] + stk[inst[OP_C]])\n"
    );

    let fp = fingerprint(&block);
    assert_eq!(fp, "91901591909190");
    let shape = unmoon_lib::Catalog::global().lookup(&fp).unwrap();
    assert_eq!(shape.op, unmoon_lib::OpCode::Add);
    assert_eq!(shape.rule, unmoon_lib::Normalize::None);
}

#[test]
fn literal_on_left_of_comparison_moves_right_once() {
    let mut block = Block::new(vec![Stmt::Return(vec![Expr::binary(
        BinaryOp::Lt,
        Expr::num(5.0),
        n("a"),
    )])]);
    simplify(&mut block, &RewriteOptions::default(), None);
    assert_eq!(block.to_string(), "return (a > 5)\n");
    let again = block.clone();
    simplify(&mut block, &RewriteOptions::default(), None);
    assert_eq!(block, again);
}
