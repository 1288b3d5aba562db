//! Basic field permission transfer between pre- and postconditions.

mod common;

use common::{acc_f, half, verify, x_ref};
use opaline_ast::{Exp, Field, LocalVarDecl, Method, Program, Stmt, Type};
use opaline_verify::FailureKind;

fn int_field_program(method: Method) -> Program {
    Program::new()
        .with_field(Field::new("f", Type::Int))
        .with_method(method)
}

#[test]
fn full_permission_roundtrips() {
    // method m(x: Ref)
    //   requires acc(x.f, write)
    //   ensures  acc(x.f, write)
    // { }
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(acc_f(x_ref(), Exp::full_perm()))
        .with_post(acc_f(x_ref(), Exp::full_perm()))
        .with_body(Stmt::seqn(vec![], vec![]));
    let Some(summary) = verify(&int_field_program(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn half_permission_roundtrips() {
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(acc_f(x_ref(), half()))
        .with_post(acc_f(x_ref(), half()));
    let Some(summary) = verify(&int_field_program(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn insufficient_permission_is_reported() {
    // requires acc(x.f, 1/2)  ensures acc(x.f, write)
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(acc_f(x_ref(), half()))
        .with_post(acc_f(x_ref(), Exp::full_perm()));
    let Some(summary) = verify(&int_field_program(method)) else {
        return;
    };
    assert!(!summary.verified());
    let failures = summary.failures();
    assert_eq!(failures.len(), 1);
    assert!(
        matches!(failures[0].kind, FailureKind::InsufficientPermission { .. }),
        "unexpected failure: {}",
        failures[0]
    );
    assert!(failures[0].context.contains("postcondition of m"));
}

#[test]
fn negative_permission_is_reported() {
    // requires acc(x.f, -1/2)
    let minus_half = Exp::fractional_perm(Exp::int_lit(-1), Exp::int_lit(2));
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(acc_f(x_ref(), minus_half));
    let Some(summary) = verify(&int_field_program(method)) else {
        return;
    };
    assert!(!summary.verified());
    let failures = summary.failures();
    assert_eq!(failures.len(), 1);
    assert!(
        matches!(failures[0].kind, FailureKind::NegativePermission { .. }),
        "unexpected failure: {}",
        failures[0]
    );
}

#[test]
fn two_halves_recombine_to_write() {
    // requires acc(x.f, 1/2) && acc(x.f, 1/2)  ensures acc(x.f, write)
    //
    // Only the consolidate-and-retry path can satisfy the postcondition:
    // neither half chunk alone is enough.
    let method = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
        .with_pre(Exp::and(
            acc_f(x_ref(), half()),
            acc_f(x_ref(), half()),
        ))
        .with_post(acc_f(x_ref(), Exp::full_perm()));
    let Some(summary) = verify(&int_field_program(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn unrelated_receiver_fails() {
    // requires acc(x.f)  ensures acc(y.f) — nothing relates x and y.
    let y = Exp::local_var("y", Type::Ref);
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("y", Type::Ref),
        ],
    )
    .with_pre(acc_f(x_ref(), Exp::full_perm()))
    .with_post(acc_f(y, Exp::full_perm()));
    let Some(summary) = verify(&int_field_program(method)) else {
        return;
    };
    assert!(!summary.verified());
    assert!(matches!(
        summary.failures()[0].kind,
        FailureKind::InsufficientPermission { .. }
    ));
}
