//! # opaline-ast
//!
//! The typed AST of the opaline intermediate verification language.
//!
//! Opaline consumes programs as already-parsed, already-type-checked trees;
//! there is no parser in this workspace. Front ends (or tests) construct
//! [`Program`] values directly and hand them to the verifier.
//!
//! The language is a small separation-logic dialect: methods carry pre- and
//! postconditions, assertions mix pure boolean expressions with
//! accessibility predicates over fields and predicates, quantified
//! permissions range over sets and sequences of receivers, and magic wands
//! describe exchangeable heap fragments.
//!
//! ## Assertion utilities
//!
//! The producer and consumer rely on three structural helpers:
//!
//! - [`Exp::top_level_conjuncts`] — splits `a && b && c` into its conjuncts
//! - [`Exp::when_inhaling`] — resolves inhale-exhale assertions to their
//!   inhale face
//! - [`Exp::when_exhaling`] — dito, exhale face

pub mod exp;
pub mod program;

pub use exp::{BinOp, Exp, ExpKind, LocalVarDecl, Type, UnOp};
pub use program::{Domain, DomainAxiom, DomainFunc, Field, Method, Predicate, Program, Stmt, StmtKind};
