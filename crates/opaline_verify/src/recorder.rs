//! The function recorder.
//!
//! Quantified permissions mint fresh uninterpreted functions on the fly —
//! inverse functions, field-value functions, predicate-snap functions —
//! each with definitional axioms. Function axiomatization (outside this
//! crate) later needs exactly those definitions, so every mint is appended
//! here. The log is append-only; it is never consulted during symbolic
//! execution itself.

use opaline_term::Term;

/// What kind of generated function an entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedKind {
    /// An inverse of a quantified receiver expression.
    Inverse,
    /// A field-value function.
    FieldValue,
    /// A predicate-snap function.
    PredSnap,
}

/// One generated function with its definitional axioms.
#[derive(Debug, Clone)]
pub struct RecordedFunction {
    pub kind: RecordedKind,
    /// The SMT symbol of the function or constant.
    pub symbol: String,
    pub axioms: Vec<Term>,
}

/// Append-only log of generated functions.
#[derive(Debug, Clone, Default)]
pub struct FunctionRecorder {
    entries: Vec<RecordedFunction>,
}

impl FunctionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: RecordedKind, symbol: impl Into<String>, axioms: Vec<Term>) {
        self.entries.push(RecordedFunction {
            kind,
            symbol: symbol.into(),
            axioms,
        });
    }

    pub fn entries(&self) -> &[RecordedFunction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_accumulate_in_order() {
        let mut rec = FunctionRecorder::new();
        rec.record(RecordedKind::Inverse, "inv@0", vec![Term::True]);
        rec.record(RecordedKind::FieldValue, "fvf@0", vec![]);
        assert_eq!(rec.len(), 2);
        assert_eq!(rec.entries()[0].symbol, "inv@0");
        assert_eq!(rec.entries()[1].kind, RecordedKind::FieldValue);
    }
}
