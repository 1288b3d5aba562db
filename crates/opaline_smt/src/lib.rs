//! # opaline-smt
//!
//! Everything between the verifier and the SMT solver.
//!
//! The solver is an external Z3 process driven over a line-oriented SMT-LIB2
//! dialog on stdin/stdout. This crate owns that boundary:
//!
//! - [`config`] — solver location, timeouts, assertion mode, feature toggles
//! - [`printer`] — rendering sorts, terms, and declarations as SMT-LIB2
//! - [`preamble`] — the static prelude plus monomorphized theory
//!   instantiations (sequences, sets, multisets, sort wrappers)
//! - [`driver`] — the subprocess itself: push/pop scopes, assume/assert,
//!   model and statistics retrieval, logging, shutdown
//!
//! Nothing in this crate decides anything; it ships terms to the solver and
//! reports verbatim answers. The decider in `opaline-verify` adds the
//! path-condition stack and caching on top.

pub mod config;
pub mod driver;
pub mod error;
pub mod preamble;
pub mod printer;

pub use config::{AssertionMode, Config};
pub use driver::{ProverState, SatResult, SmtDriver};
pub use error::{ProverError, ProverResult};
pub use printer::Decl;
