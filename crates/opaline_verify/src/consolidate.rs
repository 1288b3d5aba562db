//! Heap consolidation.
//!
//! After a failed heap operation the heap may hold several chunks for the
//! same location — e.g. two halves of `x.f` inhaled separately — none of
//! which alone satisfies the consume. Consolidation merges basic chunks
//! with syntactically equal ids into one chunk with the summed permission,
//! and drops chunks whose permission is literally `none`.
//!
//! When two field chunks for the same location are merged, their values
//! must agree wherever both permissions are positive; that equality is
//! assumed, guarded by the positivity of both parts.
//!
//! Consolidation also re-asserts what the heap invariant guarantees about
//! field permissions: no location holds more than the full amount. Each
//! field chunk's permission is assumed bounded by `write`, and two field
//! chunks whose permissions would jointly exceed `write` must have
//! distinct receivers. (Predicate permissions carry no such bound.)
//!
//! Consolidation consumes and returns a heap *value*. The retry wrapper
//! decides what to do with it; nothing here mutates the caller's state, so
//! a failed retry can always surface the entry heap unchanged.

use crate::chunks::Chunk;
use crate::decider::Decider;
use crate::state::Heap;
use log::trace;
use opaline_smt::ProverResult;
use opaline_term::Term;

/// Merges mergeable chunks and drops empty ones; returns the new heap.
pub fn consolidate(decider: &mut Decider, heap: Heap) -> ProverResult<Heap> {
    let mut merged: Vec<Chunk> = Vec::new();
    let mut equalities: Vec<Term> = Vec::new();

    'next: for chunk in heap.chunks().iter() {
        if chunk.perm() == Term::NoPerm {
            trace!("consolidation drops empty chunk {}", chunk);
            continue;
        }
        match chunk {
            Chunk::Field(new) => {
                for existing in merged.iter_mut() {
                    if let Chunk::Field(old) = existing {
                        if old.field == new.field && old.receiver == new.receiver {
                            // Values agree wherever both halves are real.
                            equalities.push(Term::implies(
                                Term::and(
                                    Term::is_positive(old.perm.clone()),
                                    Term::is_positive(new.perm.clone()),
                                ),
                                Term::eq(old.value.clone(), new.value.clone()),
                            ));
                            old.perm = Term::perm_plus(old.perm.clone(), new.perm.clone());
                            trace!("consolidation merges field chunk for {}.{}", old.receiver, old.field);
                            continue 'next;
                        }
                    }
                }
                merged.push(chunk.clone());
            }
            Chunk::Predicate(new) => {
                for existing in merged.iter_mut() {
                    if let Chunk::Predicate(old) = existing {
                        if old.name == new.name && old.args == new.args {
                            equalities.push(Term::implies(
                                Term::and(
                                    Term::is_positive(old.perm.clone()),
                                    Term::is_positive(new.perm.clone()),
                                ),
                                Term::eq(old.snap.clone(), new.snap.clone()),
                            ));
                            old.perm = Term::perm_plus(old.perm.clone(), new.perm.clone());
                            continue 'next;
                        }
                    }
                }
                merged.push(chunk.clone());
            }
            // Quantified and wand chunks are never merged here; the split
            // algorithm handles overlapping quantified chunks itself.
            _ => merged.push(chunk.clone()),
        }
    }

    let mut facts = equalities;
    for (i, a) in merged.iter().enumerate() {
        if let Chunk::Field(fa) = a {
            facts.push(Term::perm_at_most(fa.perm.clone(), Term::FullPerm));
            for b in merged.iter().skip(i + 1) {
                if let Chunk::Field(fb) = b {
                    if fa.field == fb.field && fa.receiver != fb.receiver {
                        facts.push(Term::implies(
                            Term::perm_less(
                                Term::FullPerm,
                                Term::perm_plus(fa.perm.clone(), fb.perm.clone()),
                            ),
                            Term::neq(fa.receiver.clone(), fb.receiver.clone()),
                        ));
                    }
                }
            }
        }
    }

    decider.assume(facts)?;
    Ok(Heap::from_chunks(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::FieldChunk;
    use opaline_term::{Sort, TermVar};

    // Pure structural checks; merging behavior with a live solver is
    // covered by the integration suite.

    fn x() -> Term {
        Term::Var(TermVar::new("x", Sort::Ref))
    }

    fn half() -> Term {
        Term::fraction_perm(Term::int(1), Term::int(2))
    }

    #[test]
    fn merge_plan_is_structural() {
        // Two half chunks for x.f collapse to one with summed permission.
        let heap = Heap::from_chunks(vec![
            Chunk::Field(FieldChunk {
                receiver: x(),
                field: "f".into(),
                value: Term::int(1),
                perm: half(),
            }),
            Chunk::Field(FieldChunk {
                receiver: x(),
                field: "f".into(),
                value: Term::int(1),
                perm: half(),
            }),
        ]);
        // Mirror the merge logic without a decider: both chunks share an id.
        let ids: Vec<_> = heap.chunks().iter().map(|c| c.id()).collect();
        assert_eq!(ids[0], ids[1]);
    }

    #[test]
    fn empty_chunks_are_recognized() {
        let c = Chunk::Field(FieldChunk {
            receiver: x(),
            field: "f".into(),
            value: Term::int(1),
            perm: Term::NoPerm,
        });
        assert_eq!(c.perm(), Term::NoPerm);
    }
}
