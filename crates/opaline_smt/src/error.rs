//! Errors at the solver boundary.
//!
//! Two failure classes are distinguished because they demand different
//! reactions: a missing solver binary is a *dependency* problem surfaced
//! before any verification starts, while unexpected solver output mid-dialog
//! is fatal for the current method only.

use std::fmt;

/// Result alias for driver operations.
pub type ProverResult<T = ()> = Result<T, ProverError>;

/// An error in the interaction with the SMT solver process.
#[derive(Debug)]
pub enum ProverError {
    /// The solver binary could not be spawned.
    ///
    /// Reported to the host as a distinguished dependency error; no
    /// verification is attempted.
    DependencyNotFound {
        /// The path that was tried.
        path: String,
        /// The spawn error.
        reason: String,
    },

    /// The solver answered something the protocol does not allow at this
    /// point (e.g. anything but `success` after a declaration).
    InteractionFailed {
        /// What the driver was waiting for.
        expected: String,
        /// What actually arrived; empty if the stream ended.
        got: String,
    },

    /// An I/O error on the solver's pipes or the log file.
    Io {
        /// The operation that failed, e.g. `"write to prover stdin"`.
        op: String,
        /// The underlying error, stringified.
        reason: String,
    },
}

impl ProverError {
    pub fn dependency_not_found(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DependencyNotFound {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn interaction_failed(expected: impl Into<String>, got: impl Into<String>) -> Self {
        Self::InteractionFailed {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn io(op: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            op: op.into(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for ProverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProverError::DependencyNotFound { path, reason } => {
                write!(
                    f,
                    "could not start the SMT solver '{}': {}. \
                     Install Z3 or point {} at the binary.",
                    path,
                    reason,
                    crate::config::Z3_EXE_ENV
                )
            }
            ProverError::InteractionFailed { expected, got } => {
                if got.is_empty() {
                    write!(
                        f,
                        "the SMT solver closed its output while '{}' was expected",
                        expected
                    )
                } else {
                    write!(
                        f,
                        "unexpected SMT solver output: expected '{}', got '{}'",
                        expected, got
                    )
                }
            }
            ProverError::Io { op, reason } => {
                write!(f, "I/O error during {}: {}", op, reason)
            }
        }
    }
}

impl std::error::Error for ProverError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_failure_mentions_both_sides() {
        let e = ProverError::interaction_failed("success", "(error \"line 3\")");
        let msg = e.to_string();
        assert!(msg.contains("success"));
        assert!(msg.contains("error"));
    }

    #[test]
    fn eof_renders_distinctly() {
        let e = ProverError::interaction_failed("sat", "");
        assert!(e.to_string().contains("closed its output"));
    }
}
