//! The chunk model.
//!
//! A chunk is one fractional-permission record in the heap. Basic chunks
//! cover a single field location or predicate instance; quantified chunks
//! cover a *range* of locations, with the permission amount parameterized by
//! explicit codomain variables (the receiver for fields, the argument tuple
//! for predicates) and the values summarized by a field-value function or
//! predicate-snap function.
//!
//! Chunks are immutable; heap updates copy. The central invariant — the
//! permissions for any location sum to at most one — is not checked here,
//! it is *enforced* by the consumer, which never removes more permission
//! than a chunk holds.

use opaline_term::{Function, Term, TermVar};
use std::collections::HashMap;
use std::fmt;

/// Identifies what a chunk provides: a field or predicate name plus the
/// concrete argument terms (the receiver, for fields).
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkId {
    pub name: String,
    pub args: Vec<Term>,
}

impl ChunkId {
    pub fn new(name: impl Into<String>, args: Vec<Term>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, a) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", a)?;
        }
        write!(f, ")")
    }
}

/// Permission to a single field location, with its current symbolic value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChunk {
    pub receiver: Term,
    pub field: String,
    pub value: Term,
    pub perm: Term,
}

/// Permission to a single predicate instance, with its snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct PredicateChunk {
    pub name: String,
    pub args: Vec<Term>,
    pub snap: Term,
    pub perm: Term,
}

/// The inverse functions minted for a quantified chunk, kept with the chunk
/// so later consumes can reuse the same bridge between receivers and
/// quantified values.
#[derive(Debug, Clone, PartialEq)]
pub struct InverseFunctions {
    pub functions: Vec<Function>,
    pub axioms: Vec<Term>,
}

/// Permission to a range of field locations.
///
/// `perm` mentions `codomain` freely; the permission the chunk holds at
/// receiver `t` is `perm[codomain := t]` ([`Self::perm_at`]).
#[derive(Debug, Clone, PartialEq)]
pub struct QuantifiedFieldChunk {
    pub field: String,
    /// The field-value function summarizing the covered locations.
    pub fvf: Term,
    pub codomain: TermVar,
    pub perm: Term,
    pub inv: Option<InverseFunctions>,
    /// Set when the chunk provably covers a single receiver.
    pub singleton: Option<Term>,
    /// Syntactic hints from the producing assertion (`s[i]`, `x in xs`),
    /// used to bias candidate ordering on consume.
    pub hints: Vec<Term>,
}

impl QuantifiedFieldChunk {
    /// The permission this chunk holds at the given receiver.
    pub fn perm_at(&self, receiver: &Term) -> Term {
        self.perm.substitute_var(&self.codomain.name, receiver)
    }

    /// The value this chunk's FVF gives at the given receiver.
    pub fn value_at(&self, receiver: &Term) -> Term {
        Term::lookup(self.field.clone(), self.fvf.clone(), receiver.clone())
    }
}

/// Permission to a range of predicate instances.
///
/// The codomain is the tuple of the predicate's formal arguments; `perm`
/// mentions all of them freely.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantifiedPredicateChunk {
    pub name: String,
    /// The predicate-snap function summarizing the covered instances.
    pub psf: Term,
    pub codomains: Vec<TermVar>,
    pub perm: Term,
    pub inv: Option<InverseFunctions>,
    /// Set when the chunk provably covers a single argument tuple.
    pub singleton: Option<Vec<Term>>,
    pub hints: Vec<Term>,
}

impl QuantifiedPredicateChunk {
    /// The permission this chunk holds at the given argument tuple.
    pub fn perm_at(&self, args: &[Term]) -> Term {
        debug_assert_eq!(args.len(), self.codomains.len());
        let map: HashMap<String, Term> = self
            .codomains
            .iter()
            .zip(args.iter())
            .map(|(v, a)| (v.name.clone(), a.clone()))
            .collect();
        self.perm.substitute(&map)
    }

    /// The snapshot this chunk's PSF gives at the given argument tuple.
    pub fn snap_at(&self, args: &[Term]) -> Term {
        Term::pred_lookup(
            self.name.clone(),
            self.psf.clone(),
            Term::snap_args(args.to_vec()),
        )
    }
}

/// A ghost chunk for a packaged magic wand.
///
/// `id` is the structural rendering of the ghost-free wand; `bindings` are
/// the evaluated values of its free variables. Matching on consume is
/// purely syntactic over both.
#[derive(Debug, Clone, PartialEq)]
pub struct MagicWandChunk {
    pub id: String,
    pub bindings: Vec<Term>,
    pub snap: Term,
}

/// A heap chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Field(FieldChunk),
    Predicate(PredicateChunk),
    QuantifiedField(QuantifiedFieldChunk),
    QuantifiedPredicate(QuantifiedPredicateChunk),
    MagicWand(MagicWandChunk),
}

impl Chunk {
    /// The chunk's identity: resource name plus concrete arguments.
    ///
    /// Quantified chunks have no concrete arguments; their id names the
    /// resource only.
    pub fn id(&self) -> ChunkId {
        match self {
            Chunk::Field(c) => ChunkId::new(c.field.clone(), vec![c.receiver.clone()]),
            Chunk::Predicate(c) => ChunkId::new(c.name.clone(), c.args.clone()),
            Chunk::QuantifiedField(c) => ChunkId::new(c.field.clone(), vec![]),
            Chunk::QuantifiedPredicate(c) => ChunkId::new(c.name.clone(), vec![]),
            Chunk::MagicWand(c) => ChunkId::new(c.id.clone(), c.bindings.clone()),
        }
    }

    /// The chunk's permission term. For quantified chunks this mentions the
    /// codomain variables; wand chunks are always held whole.
    pub fn perm(&self) -> Term {
        match self {
            Chunk::Field(c) => c.perm.clone(),
            Chunk::Predicate(c) => c.perm.clone(),
            Chunk::QuantifiedField(c) => c.perm.clone(),
            Chunk::QuantifiedPredicate(c) => c.perm.clone(),
            Chunk::MagicWand(_) => Term::FullPerm,
        }
    }

    /// A copy of the chunk with the permission replaced.
    pub fn with_perm(&self, perm: Term) -> Chunk {
        match self {
            Chunk::Field(c) => Chunk::Field(FieldChunk {
                perm,
                ..c.clone()
            }),
            Chunk::Predicate(c) => Chunk::Predicate(PredicateChunk {
                perm,
                ..c.clone()
            }),
            Chunk::QuantifiedField(c) => Chunk::QuantifiedField(QuantifiedFieldChunk {
                perm,
                ..c.clone()
            }),
            Chunk::QuantifiedPredicate(c) => {
                Chunk::QuantifiedPredicate(QuantifiedPredicateChunk {
                    perm,
                    ..c.clone()
                })
            }
            Chunk::MagicWand(c) => Chunk::MagicWand(c.clone()),
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Field(c) => {
                write!(f, "{}.{} -> {} # {}", c.receiver, c.field, c.value, c.perm)
            }
            Chunk::Predicate(c) => {
                write!(f, "{} # {}", ChunkId::new(c.name.clone(), c.args.clone()), c.perm)
            }
            Chunk::QuantifiedField(c) => write!(
                f,
                "forall {} :: {}.{} # {}",
                c.codomain.name, c.codomain.name, c.field, c.perm
            ),
            Chunk::QuantifiedPredicate(c) => {
                write!(f, "forall args :: {}(...) # {}", c.name, c.perm)
            }
            Chunk::MagicWand(c) => write!(f, "wand {}", c.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opaline_term::Sort;

    fn r_var(name: &str) -> Term {
        Term::Var(TermVar::new(name, Sort::Ref))
    }

    #[test]
    fn quantified_field_perm_at_substitutes_codomain() {
        let codomain = TermVar::new("r@0", Sort::Ref);
        let x = r_var("x");
        let chunk = QuantifiedFieldChunk {
            field: "f".into(),
            fvf: Term::Var(TermVar::new("fvf@0", Sort::fvf(Sort::Int))),
            codomain: codomain.clone(),
            perm: Term::ite(
                Term::eq(Term::Var(codomain.clone()), x.clone()),
                Term::FullPerm,
                Term::NoPerm,
            ),
            inv: None,
            singleton: Some(x.clone()),
            hints: vec![],
        };
        // At x the conditional collapses to write.
        assert_eq!(chunk.perm_at(&x), Term::FullPerm);
        // At an unrelated receiver it stays conditional.
        let y = r_var("y");
        assert!(matches!(chunk.perm_at(&y), Term::Ite(..)));
    }

    #[test]
    fn with_perm_replaces_only_the_permission() {
        let chunk = Chunk::Field(FieldChunk {
            receiver: r_var("x"),
            field: "f".into(),
            value: Term::int(7),
            perm: Term::FullPerm,
        });
        let half = Term::fraction_perm(Term::int(1), Term::int(2));
        let updated = chunk.with_perm(half.clone());
        assert_eq!(updated.perm(), half);
        assert_eq!(updated.id(), chunk.id());
    }

    #[test]
    fn quantified_predicate_perm_at_substitutes_tuple() {
        let a = TermVar::new("a@0", Sort::Ref);
        let b = TermVar::new("b@0", Sort::Int);
        let chunk = QuantifiedPredicateChunk {
            name: "pair".into(),
            psf: Term::Var(TermVar::new("psf@0", Sort::psf("pair"))),
            codomains: vec![a.clone(), b.clone()],
            perm: Term::ite(
                Term::eq(Term::Var(b.clone()), Term::int(0)),
                Term::FullPerm,
                Term::NoPerm,
            ),
            inv: None,
            singleton: None,
            hints: vec![],
        };
        let p = chunk.perm_at(&[r_var("x"), Term::int(0)]);
        assert_eq!(p, Term::FullPerm);
    }
}
