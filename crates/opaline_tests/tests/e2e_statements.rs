//! The statement executor: assignments, inhale/exhale/assert, branching.

mod common;

use common::{acc_f, verify, x_ref};
use opaline_ast::{
    BinOp, Exp, Field, LocalVarDecl, Method, Predicate, Program, Stmt, Type,
};
use opaline_verify::FailureKind;

fn program_with(method: Method) -> Program {
    Program::new()
        .with_field(Field::new("f", Type::Int))
        .with_method(method)
}

#[test]
fn assignment_flows_into_assertions() {
    // var y: Int; y := 5; assert y == 5
    let body = Stmt::seqn(
        vec![LocalVarDecl::new("y", Type::Int)],
        vec![
            Stmt::assign("y", Exp::int_lit(5)),
            Stmt::assert(Exp::eq_cmp(
                Exp::local_var("y", Type::Int),
                Exp::int_lit(5),
            )),
        ],
    );
    let method = Method::new("m", vec![]).with_body(body);
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn failing_assert_is_reported() {
    let body = Stmt::seqn(
        vec![LocalVarDecl::new("y", Type::Int)],
        vec![Stmt::assert(Exp::eq_cmp(
            Exp::local_var("y", Type::Int),
            Exp::int_lit(5),
        ))],
    );
    let method = Method::new("m", vec![]).with_body(body);
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(!summary.verified());
    assert!(matches!(
        summary.failures()[0].kind,
        FailureKind::AssertionFalse { .. }
    ));
}

#[test]
fn assert_keeps_permissions() {
    // requires acc(x.f); assert acc(x.f); ensures acc(x.f)
    let body = Stmt::seqn(
        vec![],
        vec![Stmt::assert(acc_f(x_ref(), Exp::full_perm()))],
    );
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(acc_f(x_ref(), Exp::full_perm()))
        .with_post(acc_f(x_ref(), Exp::full_perm()))
        .with_body(body);
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn exhale_gives_permissions_up() {
    // requires acc(x.f); exhale acc(x.f); ensures acc(x.f)  — must fail
    let body = Stmt::seqn(
        vec![],
        vec![Stmt::exhale(acc_f(x_ref(), Exp::full_perm()))],
    );
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(acc_f(x_ref(), Exp::full_perm()))
        .with_post(acc_f(x_ref(), Exp::full_perm()))
        .with_body(body);
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(!summary.verified());
    assert!(matches!(
        summary.failures()[0].kind,
        FailureKind::InsufficientPermission { .. }
    ));
}

#[test]
fn inhale_provides_permissions() {
    // inhale acc(x.f); ensures acc(x.f)
    let body = Stmt::seqn(
        vec![],
        vec![Stmt::inhale(acc_f(x_ref(), Exp::full_perm()))],
    );
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_post(acc_f(x_ref(), Exp::full_perm()))
        .with_body(body);
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn branches_rejoin_with_their_own_heaps() {
    // requires acc(x.f)
    // if (b) { exhale acc(x.f); inhale acc(x.f) }
    // ensures acc(x.f)
    let body = Stmt::seqn(
        vec![],
        vec![Stmt::if_then_else(
            Exp::local_var("b", Type::Bool),
            Stmt::seqn(
                vec![],
                vec![
                    Stmt::exhale(acc_f(x_ref(), Exp::full_perm())),
                    Stmt::inhale(acc_f(x_ref(), Exp::full_perm())),
                ],
            ),
            None,
        )],
    );
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("b", Type::Bool),
        ],
    )
    .with_pre(acc_f(x_ref(), Exp::full_perm()))
    .with_post(acc_f(x_ref(), Exp::full_perm()))
    .with_body(body);
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn field_value_survives_the_frame() {
    // requires acc(x.f) && x.f == 3   ensures acc(x.f) && x.f == 3
    let x_f = Exp::field_access(x_ref(), "f");
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(Exp::and(
            acc_f(x_ref(), Exp::full_perm()),
            Exp::eq_cmp(x_f.clone(), Exp::int_lit(3)),
        ))
        .with_post(Exp::and(
            acc_f(x_ref(), Exp::full_perm()),
            Exp::eq_cmp(x_f, Exp::int_lit(3)),
        ));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn predicate_instances_transfer() {
    // predicate node(this: Ref)
    // requires acc(node(x), write)  ensures acc(node(x), write)
    let acc_node = Exp::acc_predicate("node", vec![x_ref()], Exp::full_perm());
    let program = Program::new()
        .with_predicate(Predicate::new(
            "node",
            vec![LocalVarDecl::new("this", Type::Ref)],
            None,
        ))
        .with_method(
            Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
                .with_pre(acc_node.clone())
                .with_post(acc_node),
        );
    let Some(summary) = verify(&program) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn magic_wand_chunks_match_syntactically() {
    // requires acc(x.f, 1/2) --* acc(x.f, write)
    // ensures  acc(x.f, 1/2) --* acc(x.f, write)
    let wand = Exp::magic_wand(
        acc_f(x_ref(), common::half()),
        acc_f(x_ref(), Exp::full_perm()),
    );
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(wand.clone())
        .with_post(wand);
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn missing_wand_chunk_is_reported() {
    let wand = Exp::magic_wand(
        acc_f(x_ref(), common::half()),
        acc_f(x_ref(), Exp::full_perm()),
    );
    let method =
        Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)]).with_post(wand);
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(!summary.verified());
    assert!(matches!(
        summary.failures()[0].kind,
        FailureKind::MagicWandChunkNotFound { .. }
    ));
}

#[test]
fn failures_accumulate_across_conjuncts() {
    // ensures acc(x.f, write) && 1 == 2 — with nothing provided, both
    // conjuncts fail independently and both are reported.
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)]).with_post(Exp::and(
        acc_f(x_ref(), Exp::full_perm()),
        Exp::eq_cmp(Exp::int_lit(1), Exp::int_lit(2)),
    ));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    let failures = summary.failures();
    assert_eq!(failures.len(), 2, "failures: {:?}", failures);
    assert!(failures
        .iter()
        .any(|f| matches!(f.kind, FailureKind::InsufficientPermission { .. })));
    assert!(failures
        .iter()
        .any(|f| matches!(f.kind, FailureKind::AssertionFalse { .. })));
}

#[test]
fn arithmetic_specs_compose() {
    // method m(n: Int) requires n > 2 ensures n + 1 > 3
    let n = Exp::local_var("n", Type::Int);
    let method = Method::new("m", vec![LocalVarDecl::new("n", Type::Int)])
        .with_pre(Exp::binary(BinOp::Gt, n.clone(), Exp::int_lit(2)))
        .with_post(Exp::binary(
            BinOp::Gt,
            Exp::binary(BinOp::Add, n, Exp::int_lit(1)),
            Exp::int_lit(3),
        ));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}
