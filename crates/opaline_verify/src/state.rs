//! The symbolic state: stores, heaps, and the per-method state bundle.
//!
//! States are values. Branching clones the state and hands each branch its
//! own copy, so the "restore the heap before the sibling branch" contract
//! holds by construction — a branch can only ever see the state it was
//! given. Within one path the heap is updated in place (copy-on-write over
//! the chunk list).
//!
//! Path conditions are *not* part of the state bundle: they live in the
//! decider, whose scope stack moves in lock-step with the solver's
//! push/pop. Branching pushes a scope around each branch, which drops the
//! branch's assumptions on exit.

use crate::chunks::Chunk;
use crate::recorder::FunctionRecorder;
use opaline_term::Term;
use std::fmt;

/// An ordered, immutable mapping from program variables to terms.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Store {
    bindings: Vec<(String, Term)>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: Vec<(String, Term)>) -> Self {
        Self { bindings: pairs }
    }

    pub fn get(&self, name: &str) -> Option<&Term> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Returns a new store with the binding appended. Later bindings shadow
    /// earlier ones.
    pub fn extend(&self, name: impl Into<String>, term: Term) -> Store {
        let mut bindings = self.bindings.clone();
        bindings.push((name.into(), term));
        Store { bindings }
    }

    pub fn pairs(&self) -> &[(String, Term)] {
        &self.bindings
    }
}

/// A multiset of chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Heap {
    chunks: Vec<Chunk>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chunks(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn add(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    pub fn remove(&mut self, index: usize) -> Chunk {
        self.chunks.remove(index)
    }

    pub fn set(&mut self, index: usize, chunk: Chunk) {
        self.chunks[index] = chunk;
    }

    /// Replaces the entire chunk list.
    pub fn replace(&mut self, chunks: Vec<Chunk>) {
        self.chunks = chunks;
    }
}

impl fmt::Display for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", chunk)?;
        }
        Ok(())
    }
}

/// The per-method symbolic state.
#[derive(Debug, Clone)]
pub struct State {
    pub store: Store,
    pub heap: Heap,

    /// Stack of reserve heaps used while processing magic wands; the
    /// topmost is the "used" heap of an `exhale-ext` operation.
    pub reserve_heaps: Vec<Heap>,
    /// True while consuming into a reserve heap for wand processing.
    pub exhale_ext: bool,
    /// True during the second attempt of a consolidate-and-retry.
    pub retrying: bool,

    /// Multiplied into every produced and consumed permission; enables
    /// unfolding and applying inside a fractional context.
    pub permission_scaling: Term,

    /// Fields known to have been split to quantified form.
    pub qp_fields: Vec<String>,
    /// Predicates known to have been split to quantified form.
    pub qp_predicates: Vec<String>,

    /// Append-only log of generated inverse/FVF/PSF functions.
    pub recorder: FunctionRecorder,

    /// Indicator term for conditional (partial) verification, if any.
    pub partial_verification: Option<Term>,
}

impl State {
    /// A fresh state for one method, with the given store and an empty heap.
    pub fn new(store: Store) -> Self {
        Self {
            store,
            heap: Heap::new(),
            reserve_heaps: Vec::new(),
            exhale_ext: false,
            retrying: false,
            permission_scaling: Term::FullPerm,
            qp_fields: Vec::new(),
            qp_predicates: Vec::new(),
            recorder: FunctionRecorder::new(),
            partial_verification: None,
        }
    }

    /// Applies the state's permission scaling factor to a permission.
    pub fn scale_perm(&self, perm: Term) -> Term {
        Term::perm_times(perm, self.permission_scaling.clone())
    }

    pub fn mark_qp_field(&mut self, field: &str) {
        if !self.qp_fields.iter().any(|f| f == field) {
            self.qp_fields.push(field.to_string());
        }
    }

    pub fn mark_qp_predicate(&mut self, predicate: &str) {
        if !self.qp_predicates.iter().any(|p| p == predicate) {
            self.qp_predicates.push(predicate.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::FieldChunk;
    use opaline_term::{Sort, TermVar};

    fn x() -> Term {
        Term::Var(TermVar::new("x", Sort::Ref))
    }

    #[test]
    fn store_extension_shadows_and_preserves_original() {
        let s0 = Store::new();
        let s1 = s0.extend("x", Term::int(1));
        let s2 = s1.extend("x", Term::int(2));
        assert_eq!(s0.get("x"), None);
        assert_eq!(s1.get("x"), Some(&Term::IntLit(1)));
        assert_eq!(s2.get("x"), Some(&Term::IntLit(2)));
    }

    #[test]
    fn heap_updates_do_not_alias_clones() {
        let mut h = Heap::new();
        h.add(Chunk::Field(FieldChunk {
            receiver: x(),
            field: "f".into(),
            value: Term::int(0),
            perm: Term::FullPerm,
        }));
        let snapshot = h.clone();
        h.remove(0);
        assert!(h.is_empty());
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn default_scaling_is_identity() {
        let s = State::new(Store::new());
        let p = Term::fraction_perm(Term::int(1), Term::int(2));
        assert_eq!(s.scale_perm(p.clone()), p);
    }

    #[test]
    fn qp_marking_is_idempotent() {
        let mut s = State::new(Store::new());
        s.mark_qp_field("f");
        s.mark_qp_field("f");
        assert_eq!(s.qp_fields, vec!["f".to_string()]);
    }
}
