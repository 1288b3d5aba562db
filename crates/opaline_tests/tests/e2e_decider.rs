//! Decider-level behavior: the trivial-assertion cache, scope discipline,
//! abstract read permissions, and heap consolidation.

mod common;

use common::z3_available;
use opaline_smt::Config;
use opaline_term::{Sort, Term, TermVar};
use opaline_verify::chunks::{Chunk, FieldChunk};
use opaline_verify::consolidate::consolidate;
use opaline_verify::{Decider, Heap};

fn decider() -> Option<Decider> {
    let _ = env_logger::builder().is_test(true).try_init();
    if !z3_available() {
        eprintln!("z3 not found; skipping decider test");
        return None;
    }
    Some(Decider::new(Config::default(), "decider-test").expect("decider should start"))
}

#[test]
fn assumed_terms_are_asserted_from_the_cache() {
    let Some(mut d) = decider() else {
        return;
    };
    let x = d.fresh("x", Sort::Int).unwrap();
    let fact = Term::less(Term::int(0), Term::Var(x));
    d.assume(vec![fact.clone()]).unwrap();

    let hits_before = d.statistics().cache_hits;
    assert!(d.assert_term(&fact, None).unwrap());
    assert!(d.statistics().cache_hits > hits_before, "expected a cache hit");

    // Literal truth never reaches the solver either.
    let hits_before = d.statistics().cache_hits;
    assert!(d.assert_term(&Term::True, None).unwrap());
    assert!(d.statistics().cache_hits > hits_before);
    d.stop().unwrap();
}

#[test]
fn scoped_assumptions_disappear_on_pop() {
    let Some(mut d) = decider() else {
        return;
    };
    let x = d.fresh("x", Sort::Int).unwrap();
    let fact = Term::eq(Term::Var(x.clone()), Term::int(7));

    d.push_scope().unwrap();
    d.assume(vec![fact.clone()]).unwrap();
    assert!(d.assert_term(&Term::less(Term::int(6), Term::Var(x.clone())), None).unwrap());
    d.pop_scope().unwrap();

    // Outside the scope the fact is gone, structurally and for the solver.
    assert!(!d.pc_contains(&fact));
    assert!(!d
        .assert_term(&Term::less(Term::int(6), Term::Var(x)), None)
        .unwrap());
    d.stop().unwrap();
}

#[test]
fn arp_is_positive_and_below_its_bound() {
    let Some(mut d) = decider() else {
        return;
    };
    let (var, constraint) = d.fresh_arp(None).unwrap();
    d.assume(vec![constraint]).unwrap();
    let v = Term::Var(var);
    assert!(d.assert_term(&Term::perm_less(Term::NoPerm, v.clone()), None).unwrap());
    assert!(d.assert_term(&Term::perm_less(v.clone(), Term::FullPerm), None).unwrap());
    assert!(d.is_arp_term(&v));
    assert!(!d.is_arp_term(&Term::FullPerm));
    d.stop().unwrap();
}

#[test]
fn with_chunk_proves_argument_equality() {
    let Some(mut d) = decider() else {
        return;
    };
    let x = Term::Var(d.fresh("x", Sort::Ref).unwrap());
    let y = Term::Var(d.fresh("y", Sort::Ref).unwrap());
    let mut heap = Heap::new();
    heap.add(Chunk::Field(FieldChunk {
        receiver: x.clone(),
        field: "f".into(),
        value: Term::int(1),
        perm: Term::FullPerm,
    }));

    // Unrelated receiver: no match.
    assert_eq!(
        d.with_chunk(&heap, "f", std::slice::from_ref(&y)).unwrap(),
        None
    );

    // Once x == y is known, the semantic pass finds the chunk.
    d.assume(vec![Term::eq(x, y.clone())]).unwrap();
    assert_eq!(
        d.with_chunk(&heap, "f", std::slice::from_ref(&y)).unwrap(),
        Some(0)
    );
    d.stop().unwrap();
}

#[test]
fn consolidation_merges_equal_receivers() {
    let Some(mut d) = decider() else {
        return;
    };
    let x = Term::Var(d.fresh("x", Sort::Ref).unwrap());
    let half = Term::fraction_perm(Term::int(1), Term::int(2));
    let chunk = |value: i64| {
        Chunk::Field(FieldChunk {
            receiver: x.clone(),
            field: "f".into(),
            value: Term::int(value),
            perm: half.clone(),
        })
    };
    let heap = Heap::from_chunks(vec![chunk(1), chunk(1)]);
    let merged = consolidate(&mut d, heap).unwrap();
    assert_eq!(merged.len(), 1);

    // The merged permission adds up to the full amount.
    let total = merged.chunks()[0].perm();
    assert!(d
        .assert_term(&Term::eq(total, Term::FullPerm), None)
        .unwrap());
    d.stop().unwrap();
}

#[test]
fn substituted_codomains_keep_their_sorts() {
    // Pure invariant, no solver needed: substitution preserves sorts on
    // chunk permission terms.
    let codomain = TermVar::new("r@0", Sort::Ref);
    let perm = Term::ite(
        Term::eq(
            Term::Var(codomain.clone()),
            Term::Var(TermVar::new("x@0", Sort::Ref)),
        ),
        Term::FullPerm,
        Term::NoPerm,
    );
    let at = perm.substitute_var("r@0", &Term::Null);
    assert_eq!(perm.sort(), at.sort());
    assert_eq!(at.sort(), Sort::Perm);
}
