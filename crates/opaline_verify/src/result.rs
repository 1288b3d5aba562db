//! Verification results and the failure taxonomy.
//!
//! Symbolic execution threads a [`VerificationResult`] through every rule:
//! `Success` continues, `Unreachable` marks a pruned branch (its path
//! condition is unsatisfiable), and `Failure` carries an error.
//!
//! Two failure classes behave differently. Ordinary verification failures
//! — unprovable assertions, missing permissions, negative amounts,
//! non-injective receivers, missing wand chunks — are *non-fatal*: they
//! are recorded on the decider's accumulator and execution keeps exploring
//! the remaining conjuncts and sibling branches, so one method can report
//! several independent failures. Only [`FailureKind::Internal`] (a broken
//! solver dialog) is fatal and short-circuits the rest of the method; see
//! [`Failure::is_fatal`] and [`VerificationResult::and_then`].
//!
//! Every failure records the source span of the offending assertion and a
//! caller-supplied context line ("postcondition of method m might not
//! hold"), so one formatted message tells the user what was being checked,
//! why it failed, and where.

use opaline_base::Span;
use opaline_smt::ProverError;
use std::fmt;

/// The caller-supplied context under which producers/consumers run: what is
/// currently being verified, used to phrase failures.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub text: String,
    pub span: Span,
}

impl ErrorContext {
    pub fn new(text: impl Into<String>, span: Span) -> Self {
        Self {
            text: text.into(),
            span,
        }
    }
}

/// Why a method failed to verify.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureKind {
    /// A pure assertion could not be proved.
    AssertionFalse {
        /// The assertion, rendered in surface syntax.
        assertion: String,
    },

    /// An exhale required more permission than the heap holds.
    InsufficientPermission {
        /// The access that could not be satisfied, e.g. `x.f`.
        access: String,
    },

    /// A permission expression may be negative.
    NegativePermission {
        /// The offending permission expression.
        perm: String,
    },

    /// The receiver expression of a quantified permission may map two
    /// quantified values to the same location.
    ReceiverNotInjective {
        /// The receiver expression.
        receiver: String,
    },

    /// No magic-wand chunk matches the consumed wand.
    MagicWandChunkNotFound {
        /// The wand, rendered in surface syntax.
        wand: String,
    },

    /// A wand referenced through a binder has no matching chunk.
    NamedMagicWandChunkNotFound {
        /// The binder name.
        name: String,
    },

    /// The engine itself failed (solver dialog broke down mid-method).
    Internal { message: String },
}

/// A reportable verification failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub span: Span,
    /// The verification context, e.g. `"postcondition of method m"`.
    pub context: String,
}

impl Failure {
    pub fn assertion_false(assertion: impl fmt::Display, pve: &ErrorContext, span: Span) -> Self {
        Self {
            kind: FailureKind::AssertionFalse {
                assertion: assertion.to_string(),
            },
            span,
            context: pve.text.clone(),
        }
    }

    pub fn insufficient_permission(
        access: impl fmt::Display,
        pve: &ErrorContext,
        span: Span,
    ) -> Self {
        Self {
            kind: FailureKind::InsufficientPermission {
                access: access.to_string(),
            },
            span,
            context: pve.text.clone(),
        }
    }

    pub fn negative_permission(perm: impl fmt::Display, pve: &ErrorContext, span: Span) -> Self {
        Self {
            kind: FailureKind::NegativePermission {
                perm: perm.to_string(),
            },
            span,
            context: pve.text.clone(),
        }
    }

    pub fn receiver_not_injective(
        receiver: impl fmt::Display,
        pve: &ErrorContext,
        span: Span,
    ) -> Self {
        Self {
            kind: FailureKind::ReceiverNotInjective {
                receiver: receiver.to_string(),
            },
            span,
            context: pve.text.clone(),
        }
    }

    pub fn magic_wand_chunk_not_found(
        wand: impl fmt::Display,
        pve: &ErrorContext,
        span: Span,
    ) -> Self {
        Self {
            kind: FailureKind::MagicWandChunkNotFound {
                wand: wand.to_string(),
            },
            span,
            context: pve.text.clone(),
        }
    }

    pub fn named_magic_wand_chunk_not_found(
        name: impl Into<String>,
        pve: &ErrorContext,
        span: Span,
    ) -> Self {
        Self {
            kind: FailureKind::NamedMagicWandChunkNotFound { name: name.into() },
            span,
            context: pve.text.clone(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Internal {
                message: message.into(),
            },
            span: Span::unknown(),
            context: String::new(),
        }
    }

    /// Only engine-internal failures abort the rest of the method; the
    /// user-facing verification failures are recorded and accumulated.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, FailureKind::Internal { .. })
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }
        match &self.kind {
            FailureKind::AssertionFalse { assertion } => {
                write!(f, "assertion {} might not hold", assertion)?;
            }
            FailureKind::InsufficientPermission { access } => {
                write!(f, "there might be insufficient permission to access {}", access)?;
            }
            FailureKind::NegativePermission { perm } => {
                write!(f, "permission {} might be negative", perm)?;
            }
            FailureKind::ReceiverNotInjective { receiver } => {
                write!(f, "receiver {} might not be injective", receiver)?;
            }
            FailureKind::MagicWandChunkNotFound { wand } => {
                write!(f, "no magic wand chunk matches {}", wand)?;
            }
            FailureKind::NamedMagicWandChunkNotFound { name } => {
                write!(f, "no magic wand chunk is bound to {}", name)?;
            }
            FailureKind::Internal { message } => {
                write!(f, "internal verifier error: {}", message)?;
            }
        }
        if !self.span.is_unknown() {
            write!(f, " ({})", self.span)?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {}

/// The outcome of a symbolic execution path.
///
/// Ordinary verification failures reach the user through the decider's
/// accumulator, not through this type; a `Failure` result in the wild is
/// almost always an internal (fatal) one.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationResult {
    /// The path verified.
    Success,
    /// The path condition became unsatisfiable; the branch was dropped.
    Unreachable,
    /// A failure surfaced as a result value.
    Failure(Box<Failure>),
}

impl VerificationResult {
    pub fn failure(f: Failure) -> Self {
        VerificationResult::Failure(Box::new(f))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, VerificationResult::Failure(_))
    }

    /// True only for internal failures; those abort the rest of the
    /// current method.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VerificationResult::Failure(f) if f.is_fatal())
    }

    /// Sequential composition: evaluates `next` only when `self` is not
    /// fatal, and keeps the more significant of the two results.
    /// `Unreachable` is the unit.
    pub fn and_then(self, next: impl FnOnce() -> VerificationResult) -> VerificationResult {
        if self.is_fatal() {
            return self;
        }
        let second = next();
        match (self, second) {
            (VerificationResult::Unreachable, r) => r,
            (r, VerificationResult::Unreachable) => r,
            (VerificationResult::Success, r) => r,
            (r @ VerificationResult::Failure(_), _) => r,
        }
    }
}

/// Converts a broken solver dialog into a fatal internal failure.
pub fn prover_failure(e: ProverError) -> VerificationResult {
    VerificationResult::failure(Failure::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_failure() -> VerificationResult {
        VerificationResult::failure(Failure::internal("boom"))
    }

    #[test]
    fn and_then_short_circuits_on_fatal() {
        let mut ran = false;
        let r = some_failure().and_then(|| {
            ran = true;
            VerificationResult::Success
        });
        assert!(r.is_failure());
        assert!(!ran, "second leg must not run after a fatal result");
    }

    #[test]
    fn verification_failures_are_not_fatal() {
        let pve = ErrorContext::new("postcondition of m might not hold", Span::unknown());
        let f = Failure::insufficient_permission("x.f", &pve, Span::unknown());
        assert!(!f.is_fatal());

        let mut ran = false;
        let combined = VerificationResult::failure(f).and_then(|| {
            ran = true;
            VerificationResult::Success
        });
        assert!(ran, "a non-fatal failure must not short-circuit");
        assert!(combined.is_failure());
        assert!(!combined.is_fatal());
    }

    #[test]
    fn unreachable_is_the_unit() {
        let r = VerificationResult::Unreachable.and_then(|| VerificationResult::Success);
        assert_eq!(r, VerificationResult::Success);
        let r = VerificationResult::Success.and_then(|| VerificationResult::Unreachable);
        assert_eq!(r, VerificationResult::Success);
        let r = VerificationResult::Unreachable.and_then(|| VerificationResult::Unreachable);
        assert_eq!(r, VerificationResult::Unreachable);
    }

    #[test]
    fn failure_message_carries_context_and_position() {
        use opaline_base::Position;
        let pve = ErrorContext::new(
            "postcondition of method m might not hold",
            Span::unknown(),
        );
        let f = Failure::insufficient_permission(
            "x.f",
            &pve,
            Span::with_pos(10, 20, Position::new(3, 12)),
        );
        let msg = f.to_string();
        assert!(msg.contains("postcondition of method m"));
        assert!(msg.contains("x.f"));
        assert!(msg.contains("3:12"));
    }
}
