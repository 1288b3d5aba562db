//! Trigger inference for generated quantifiers.
//!
//! The quantified-permission machinery mints axioms (inverse-function
//! definitions, value axioms, non-null facts) whose matching behavior
//! matters: without triggers the solver instantiates too eagerly or not at
//! all. This module picks triggers mechanically.
//!
//! A candidate trigger term is an application-shaped subterm — uninterpreted
//! function application, FVF/PSF lookup, collection membership or indexing —
//! that mentions at least one quantified variable and no interpreted
//! arithmetic above it. If a single candidate covers all quantified
//! variables it becomes a trigger on its own (several such candidates yield
//! alternative triggers); otherwise a joint trigger is assembled greedily.
//!
//! Callers disable generation entirely via configuration
//! (`disable_isc_triggers`), in which case axioms are emitted bare.

use crate::term::{Term, Trigger};

/// True for the term shapes the solver can match on.
fn is_candidate_shape(t: &Term) -> bool {
    matches!(
        t,
        Term::App { .. }
            | Term::Lookup { .. }
            | Term::PredLookup { .. }
            | Term::Domain { .. }
            | Term::PredDomain { .. }
            | Term::SetIn(..)
            | Term::SeqIn(..)
            | Term::SeqAt(..)
            | Term::MultisetCount(..)
    )
}

/// Infers triggers for a quantifier with the given bound variable names.
///
/// Returns an empty vector when no candidate covers the variables; the
/// quantifier is then emitted without patterns and the solver falls back to
/// its own heuristics.
pub fn generate(body: &Term, bound_names: &[String]) -> Vec<Trigger> {
    let candidates: Vec<Term> = body
        .find_subterms(&is_candidate_shape)
        .into_iter()
        .filter(|c| c.mentions_any(bound_names))
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    // Candidates that each cover every bound variable become alternative
    // single-term triggers.
    let full: Vec<&Term> = candidates
        .iter()
        .filter(|c| {
            let fvs = c.free_var_names();
            bound_names.iter().all(|n| fvs.contains(n))
        })
        .collect();

    if !full.is_empty() {
        return full.into_iter().map(|c| vec![c.clone()]).collect();
    }

    // Greedy joint trigger: add candidates while they contribute uncovered
    // variables.
    let mut joint: Trigger = Vec::new();
    let mut covered: Vec<String> = Vec::new();
    for c in &candidates {
        let fvs = c.free_var_names();
        let contributes = bound_names
            .iter()
            .any(|n| fvs.contains(n) && !covered.contains(n));
        if contributes {
            for n in bound_names {
                if fvs.contains(n) && !covered.contains(n) {
                    covered.push(n.clone());
                }
            }
            joint.push(c.clone());
        }
        if covered.len() == bound_names.len() {
            break;
        }
    }

    if covered.len() == bound_names.len() {
        vec![joint]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sort::Sort;
    use crate::term::{Function, TermVar};

    fn v(name: &str, sort: Sort) -> Term {
        Term::Var(TermVar::new(name, sort))
    }

    #[test]
    fn membership_becomes_single_trigger() {
        let r = v("r", Sort::Ref);
        let s = v("s", Sort::set(Sort::Ref));
        let body = Term::implies(
            Term::set_in(r.clone(), s.clone()),
            Term::neq(r.clone(), Term::Null),
        );
        let trigs = generate(&body, &["r".to_string()]);
        assert_eq!(trigs, vec![vec![Term::set_in(r, s)]]);
    }

    #[test]
    fn uncoverable_variables_yield_no_trigger() {
        let body = Term::less(v("i", Sort::Int), Term::int(10));
        assert!(generate(&body, &["i".to_string()]).is_empty());
    }

    #[test]
    fn joint_trigger_covers_multiple_variables() {
        let f = Function::new("f", vec![Sort::Int], Sort::Int);
        let g = Function::new("g", vec![Sort::Int], Sort::Int);
        let body = Term::eq(
            f.apply(vec![v("i", Sort::Int)]),
            g.apply(vec![v("j", Sort::Int)]),
        );
        let trigs = generate(&body, &["i".to_string(), "j".to_string()]);
        assert_eq!(trigs.len(), 1);
        assert_eq!(trigs[0].len(), 2);
    }

    #[test]
    fn alternative_triggers_for_full_candidates() {
        let f = Function::new("f", vec![Sort::Int], Sort::Int);
        let g = Function::new("g", vec![Sort::Int], Sort::Int);
        let body = Term::eq(
            f.apply(vec![v("i", Sort::Int)]),
            g.apply(vec![v("i", Sort::Int)]),
        );
        let trigs = generate(&body, &["i".to_string()]);
        assert_eq!(trigs.len(), 2);
    }
}
