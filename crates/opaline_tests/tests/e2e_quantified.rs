//! Quantified permissions: ranges over sets and sequences.

mod common;

use common::verify;
use opaline_ast::{Exp, Field, LocalVarDecl, Method, Program, Stmt, Type};
use opaline_verify::FailureKind;

fn program_with(method: Method) -> Program {
    Program::new()
        .with_field(Field::new("f", Type::Int))
        .with_method(method)
}

/// `forall r: Ref :: r in s ==> acc(r.f, write)`
fn acc_over_set() -> Exp {
    let r = Exp::local_var("r", Type::Ref);
    let s = Exp::local_var("s", Type::Set(Box::new(Type::Ref)));
    Exp::forall(
        vec![LocalVarDecl::new("r", Type::Ref)],
        vec![],
        Exp::implies(
            Exp::set_in(r.clone(), s),
            Exp::acc_field(r, "f", Exp::full_perm()),
        ),
    )
}

#[test]
fn set_range_roundtrips() {
    // method m(s: Set[Ref])
    //   requires forall r in s :: acc(r.f, write)
    //   ensures  forall r in s :: acc(r.f, write)
    // { }
    let method = Method::new(
        "m",
        vec![LocalVarDecl::new("s", Type::Set(Box::new(Type::Ref)))],
    )
    .with_pre(acc_over_set())
    .with_post(acc_over_set())
    .with_body(Stmt::seqn(vec![], vec![]));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn non_injective_receiver_is_reported() {
    // method m(a: Seq[Ref])
    //   requires forall i: Int :: 0 <= i && i < |a| ==> acc(a[0].f, write)
    //
    // All indices map to the same receiver a[0]; inhaling the range would
    // stack permissions, so the receiver must be rejected.
    let a = Exp::local_var("a", Type::Seq(Box::new(Type::Ref)));
    let i = Exp::local_var("i", Type::Int);
    let in_bounds = Exp::and(
        Exp::binary(opaline_ast::BinOp::Le, Exp::int_lit(0), i.clone()),
        Exp::binary(opaline_ast::BinOp::Lt, i.clone(), Exp::seq_length(a.clone())),
    );
    let body = Exp::implies(
        in_bounds,
        Exp::acc_field(
            Exp::seq_index(a.clone(), Exp::int_lit(0)),
            "f",
            Exp::full_perm(),
        ),
    );
    let method = Method::new(
        "m",
        vec![LocalVarDecl::new("a", Type::Seq(Box::new(Type::Ref)))],
    )
    .with_pre(Exp::forall(
        vec![LocalVarDecl::new("i", Type::Int)],
        vec![],
        body,
    ));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(!summary.verified());
    let failures = summary.failures();
    assert_eq!(failures.len(), 1);
    assert!(
        matches!(failures[0].kind, FailureKind::ReceiverNotInjective { .. }),
        "unexpected failure: {}",
        failures[0]
    );
}

#[test]
fn singleton_consume_from_a_quantified_range() {
    // requires x in s && (forall r in s :: acc(r.f, write))
    // ensures  acc(x.f, write)
    //
    // The postcondition consumes one location out of the quantified chunk.
    let x = Exp::local_var("x", Type::Ref);
    let s = Exp::local_var("s", Type::Set(Box::new(Type::Ref)));
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("s", Type::Set(Box::new(Type::Ref))),
        ],
    )
    .with_pre(Exp::and(Exp::set_in(x.clone(), s), acc_over_set()))
    .with_post(Exp::acc_field(x, "f", Exp::full_perm()));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn range_not_covering_the_consumed_location_fails() {
    // requires forall r in s :: acc(r.f, write)
    // ensures  acc(x.f, write)        — x may lie outside s
    let x = Exp::local_var("x", Type::Ref);
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("s", Type::Set(Box::new(Type::Ref))),
        ],
    )
    .with_pre(acc_over_set())
    .with_post(Exp::acc_field(x, "f", Exp::full_perm()));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(!summary.verified());
    assert!(matches!(
        summary.failures()[0].kind,
        FailureKind::InsufficientPermission { .. }
    ));
}
