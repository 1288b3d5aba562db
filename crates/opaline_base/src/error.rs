//! Errors annotated with source positions.
//!
//! [`SpannedError`] is the generic positioned error used by crates that have
//! nothing more specific to say (the AST utilities, the translator's input
//! validation). The verifier itself has a richer failure taxonomy in
//! `opaline-verify`; those failures also carry [`Span`]s but are distinct
//! types.

use crate::span::Span;
use std::fmt;

/// An error annotated with the source region it refers to.
#[derive(Debug, Clone)]
pub struct SpannedError {
    /// Human-readable error description.
    pub message: String,
    /// Where in the program text the problem lies.
    pub span: Span,
}

impl SpannedError {
    /// Creates an error with the given message and source location.
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for SpannedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.span)
    }
}

impl std::error::Error for SpannedError {}

/// Alias for `std::result::Result<T, SpannedError>`.
pub type Result<T> = std::result::Result<T, SpannedError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    #[test]
    fn spanned_error_display_includes_position() {
        let err = SpannedError::new(
            "unexpected wildcard permission",
            Span::with_pos(3, 12, Position::new(4, 8)),
        );
        let rendered = err.to_string();
        assert!(rendered.contains("unexpected wildcard permission"));
        assert!(rendered.contains("4:8"));
    }
}
