//! Conditional assertions: branch handling and snapshot bookkeeping.

mod common;

use common::{acc_f, verify, x_ref};
use opaline_ast::{Exp, Field, LocalVarDecl, Method, Program, Stmt, Type};
use opaline_verify::FailureKind;

fn program_with(method: Method) -> Program {
    Program::new()
        .with_field(Field::new("f", Type::Int))
        .with_method(method)
}

fn b() -> Exp {
    Exp::local_var("b", Type::Bool)
}

#[test]
fn guarded_permission_roundtrips() {
    // method m(x: Ref, b: Bool)
    //   requires b ==> acc(x.f, write)
    //   ensures  b ==> acc(x.f, write)
    // { }
    //
    // In the else branch the snapshot is unit and no chunk is touched.
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("b", Type::Bool),
        ],
    )
    .with_pre(Exp::implies(b(), acc_f(x_ref(), Exp::full_perm())))
    .with_post(Exp::implies(b(), acc_f(x_ref(), Exp::full_perm())))
    .with_body(Stmt::seqn(vec![], vec![]));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn unguarded_post_fails_without_the_guard() {
    // requires b ==> acc(x.f)   ensures acc(x.f)
    // The else branch (!b) has no permission to give up.
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("b", Type::Bool),
        ],
    )
    .with_pre(Exp::implies(b(), acc_f(x_ref(), Exp::full_perm())))
    .with_post(acc_f(x_ref(), Exp::full_perm()));
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
fn conditional_expression_assertion_roundtrips() {
    // requires b ? acc(x.f, write) : acc(x.f, 1/2)
    // ensures  acc(x.f, 1/2)
    let cond_acc = Exp::cond(
        b(),
        acc_f(x_ref(), Exp::full_perm()),
        acc_f(x_ref(), common::half()),
    );
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("b", Type::Bool),
        ],
    )
    .with_pre(cond_acc)
    .with_post(acc_f(x_ref(), common::half()));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}

#[test]
fn sibling_branches_report_independent_failures() {
    // requires b ==> acc(x.f, 1/2)   ensures acc(x.f, write)
    // The then-branch holds only a half permission, the else-branch holds
    // nothing; each branch reports its own failure.
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("b", Type::Bool),
        ],
    )
    .with_pre(Exp::implies(b(), acc_f(x_ref(), common::half())))
    .with_post(acc_f(x_ref(), Exp::full_perm()));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    let failures = summary.failures();
    assert_eq!(failures.len(), 2, "failures: {:?}", failures);
    assert!(failures
        .iter()
        .all(|f| matches!(f.kind, FailureKind::InsufficientPermission { .. })));
}

#[test]
fn contradictory_path_is_pruned() {
    // requires b && !b — the whole method is unreachable and verifies
    // vacuously, including a postcondition that could never be satisfied.
    let method = Method::new(
        "m",
        vec![
            LocalVarDecl::new("x", Type::Ref),
            LocalVarDecl::new("b", Type::Bool),
        ],
    )
    .with_pre(Exp::and(b(), Exp::not(b())))
    .with_post(acc_f(x_ref(), Exp::full_perm()));
    let Some(summary) = verify(&program_with(method)) else {
        return;
    };
    assert!(summary.verified(), "failures: {:?}", summary.failures());
}
