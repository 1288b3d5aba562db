//! Shared helpers for the integration suite: solver discovery and program
//! builders in the surface syntax the scenarios use.
#![allow(dead_code)]

use opaline_ast::{Exp, Program, Type};
use opaline_smt::Config;
use opaline_verify::{VerificationSummary, Verifier};
use std::process::Command;

/// True when a Z3 binary is reachable with the default configuration.
pub fn z3_available() -> bool {
    Command::new(Config::default().resolve_z3_exe())
        .arg("--version")
        .output()
        .is_ok()
}

/// Runs the verifier over the program; `None` means "no solver, skipped".
pub fn verify(program: &Program) -> Option<VerificationSummary> {
    let _ = env_logger::builder().is_test(true).try_init();
    if !z3_available() {
        eprintln!("z3 not found; skipping solver-backed test");
        return None;
    }
    let verifier = Verifier::new(Config::default());
    Some(
        verifier
            .verify(program)
            .expect("verification run should not abort"),
    )
}

// ---- Expression shorthands ----

pub fn x_ref() -> Exp {
    Exp::local_var("x", Type::Ref)
}

pub fn acc_f(receiver: Exp, perm: Exp) -> Exp {
    Exp::acc_field(receiver, "f", perm)
}

pub fn half() -> Exp {
    Exp::fractional_perm(Exp::int_lit(1), Exp::int_lit(2))
}
