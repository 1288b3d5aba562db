//! # opaline-term
//!
//! The logical term algebra of the opaline verifier.
//!
//! Symbolic execution never manipulates program expressions directly; the
//! evaluator turns them into [`Term`]s, and everything downstream — path
//! conditions, chunk permissions, snapshots, solver queries — is terms.
//!
//! Terms are immutable, structurally compared and hashed, and sorted: every
//! well-formed term has exactly one [`Sort`], and substitution preserves it.
//!
//! The module split:
//!
//! - [`sort`] — the closed sort lattice
//! - [`term`] — the term variants, smart constructors, substitution,
//!   traversal
//! - [`triggers`] — quantifier trigger inference for generated axioms

pub mod sort;
pub mod term;
pub mod triggers;

pub use sort::Sort;
pub use term::{Function, Quantifier, Term, TermVar, Trigger};
