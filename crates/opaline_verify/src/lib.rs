//! # opaline-verify
//!
//! The symbolic execution engine: verifies each method of a program against
//! its specification by inhaling preconditions into a permission-annotated
//! symbolic heap, executing the body, and exhaling postconditions, with all
//! logical questions delegated to the SMT solver via `opaline-smt`.
//!
//! ## Architecture
//!
//! ```text
//!   verifier ── produce / consume ── eval ─┐
//!       │            │                     │
//!       │            └── qp (quantified permissions)
//!       │            │
//!       └──────── decider ── SmtDriver (opaline-smt)
//! ```
//!
//! - [`state`] / [`chunks`] — stores, heaps, path-condition scopes, and the
//!   fractional-permission chunk model
//! - [`decider`] — scoped assumptions, the trivial-assertion cache, fresh
//!   symbols, chunk lookup, and the consolidate-and-retry wrapper
//! - [`produce`] / [`consume`] — the inhale and exhale traversals, in
//!   continuation-passing style
//! - [`qp`] — quantified permissions: inverse functions, injectivity and
//!   non-null axioms, field-value functions, and the heap-split algorithm
//! - [`eval`] — expression evaluation into terms
//! - [`translator`] — the pure expression translator for domain axioms
//! - [`verifier`] — the per-method runner and statement executor
//!
//! Continuations are `&dyn Fn` values; each is invoked at most once per
//! execution path and state flows only through arguments. Verification
//! failures are non-fatal: they are recorded on the decider's accumulator
//! and execution keeps exploring remaining conjuncts and sibling branches,
//! so one method can report several failures. Only internal failures
//! (a broken solver dialog) short-circuit (see
//! [`result::VerificationResult`]).

pub mod branch;
pub mod chunks;
pub mod consolidate;
pub mod consume;
pub mod decider;
pub mod eval;
pub mod produce;
pub mod qp;
pub mod recorder;
pub mod result;
pub mod state;
pub mod translator;
pub mod verifier;

pub use decider::Decider;
pub use result::{ErrorContext, Failure, FailureKind, VerificationResult};
pub use state::{Heap, State, Store};
pub use verifier::{MethodResult, VerificationSummary, Verifier};

use opaline_ast::Program;
use opaline_smt::Config;

/// Shared read-only context threaded through the symbolic execution rules.
#[derive(Clone, Copy)]
pub struct Ctx<'a> {
    pub program: &'a Program,
    pub config: &'a Config,
}

impl<'a> Ctx<'a> {
    pub fn new(program: &'a Program, config: &'a Config) -> Self {
        Self { program, config }
    }
}
