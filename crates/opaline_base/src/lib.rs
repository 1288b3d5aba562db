//! # opaline-base
//!
//! Shared structural atoms for the opaline verifier.
//!
//! Every node of the input language and every verification failure carries a
//! source position. This crate provides the two types that make that
//! possible, and nothing else:
//!
//! - [`Span`] — a region of source text, with optional line/column info
//! - [`SpannedError`]/[`Result`] — errors annotated with their origin
//!
//! # Design Principles
//!
//! This crate knows nothing about the verification language, terms, or the
//! solver. Higher-level crates attach spans to their own data and format
//! their own messages; this crate only carries the positions around.

pub mod error;
pub mod span;

pub use error::{Result, SpannedError};
pub use span::{Position, Span};
