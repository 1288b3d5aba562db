//! Quantified permissions.
//!
//! A quantified permission assertion `forall x :: c(x) ==> acc(e(x).f,
//! p(x))` covers a *range* of heap locations at once. This module owns
//! everything that makes those work:
//!
//! - **Inverse functions** bridging receivers and quantified values, with
//!   their two definitional axioms (*inv-of-e* and *e-of-inv*),
//! - the **injectivity** check (asserted on both produce and consume; an
//!   aliasing range would stack permissions past the full amount) and the
//!   **non-null** fact (assumed on produce),
//! - **field-value functions** (and predicate-snap functions) summarizing
//!   the values of a consumed range, with value and domain axioms — the
//!   domain axiom takes the optimized `dom(fvf) = s` form when the
//!   condition is a plain membership over the receiver itself,
//! - the **split algorithm** that removes a required permission range from
//!   the heap chunk by chunk, with solver-side `pTaken` macros, optional
//!   in-loop depleted checks under a short timeout, a hint-based candidate
//!   ordering, a constrain mode for abstract read permissions, and a final
//!   mandatory "enough taken" check without a timeout.
//!
//! Singleton accesses to a field that has gone quantified run through the
//! same split with the condition `r == t`, and all axioms instantiate at
//! the single receiver instead of quantifying.

use crate::chunks::{Chunk, InverseFunctions, QuantifiedFieldChunk, QuantifiedPredicateChunk};
use crate::consume::ConsumeCont;
use crate::decider::Decider;
use crate::eval::EvalCont;
use crate::produce::ProduceCont;
use crate::result::{prover_failure, ErrorContext, Failure, VerificationResult};
use crate::state::State;
use crate::translator::{sort_of_type, Translator};
use crate::Ctx;
use log::trace;
use opaline_ast::{Exp, LocalVarDecl};
use opaline_base::Span;
use opaline_term::{triggers, Sort, Term, TermVar, Trigger};
use std::collections::HashMap;

// =============================================================================
// Shared pieces
// =============================================================================

/// The translated bound parts of a quantified permission assertion.
struct QuantifiedParts {
    /// The quantified variables.
    qvars: Vec<TermVar>,
    /// The condition `c(xs)`; `true` when the quantifier body is a bare
    /// accessibility predicate.
    cond: Term,
    /// The receiver expressions `e_k(xs)`: one for fields, the argument
    /// tuple for predicates.
    receivers: Vec<Term>,
    /// The unscaled permission `p(xs)`.
    perm: Term,
}

fn translate_parts(
    ctx: Ctx<'_>,
    s: &State,
    vars: &[LocalVarDecl],
    cond_exp: Option<&Exp>,
    receiver_exps: &[&Exp],
    perm_exp: &Exp,
) -> QuantifiedParts {
    let qvars: Vec<TermVar> = vars
        .iter()
        .map(|v| TermVar::new(v.name.clone(), sort_of_type(&v.typ)))
        .collect();
    let mut bindings: Vec<(String, Term)> = s.store.pairs().to_vec();
    for v in &qvars {
        bindings.push((v.name.clone(), Term::Var(v.clone())));
    }
    let mut tr = Translator::with_bindings(ctx.program, bindings);
    let cond = cond_exp.map(|c| tr.translate(c)).unwrap_or(Term::True);
    let receivers = receiver_exps.iter().map(|e| tr.translate(e)).collect();
    let perm = tr.translate(perm_exp);
    QuantifiedParts {
        qvars,
        cond,
        receivers,
        perm,
    }
}

/// Syntactic hints biasing chunk ordering: indexing and membership shapes
/// occurring in the condition or receivers.
fn extract_hints(terms: &[Term]) -> Vec<Term> {
    let mut hints = Vec::new();
    for t in terms {
        for h in t.find_subterms(&|t| {
            matches!(t, Term::SeqAt(..) | Term::SetIn(..) | Term::MultisetCount(..))
        }) {
            if !hints.contains(&h) {
                hints.push(h);
            }
        }
    }
    hints
}

fn generated_triggers(ctx: Ctx<'_>, body: &Term, bound: &[TermVar]) -> Vec<Trigger> {
    if ctx.config.disable_isc_triggers {
        return Vec::new();
    }
    let names: Vec<String> = bound.iter().map(|v| v.name.clone()).collect();
    triggers::generate(body, &names)
}

/// Mints inverse functions for a quantified assertion and builds their two
/// definitional axioms.
///
/// For each quantified variable `x_j` a fresh `inv_j : sort(codomains) ->
/// sort(x_j)` is minted. Returns the bundle plus the substitution map
/// `x_j -> inv_j(codomains)`.
fn mk_inverses(
    ctx: Ctx<'_>,
    d: &mut Decider,
    parts: &QuantifiedParts,
    codomains: &[TermVar],
) -> Result<(InverseFunctions, HashMap<String, Term>), VerificationResult> {
    let codomain_sorts: Vec<Sort> = codomains.iter().map(|c| c.sort.clone()).collect();
    let codomain_terms: Vec<Term> = codomains.iter().map(|c| Term::Var(c.clone())).collect();

    let mut functions = Vec::new();
    for qv in &parts.qvars {
        let f = match d.fresh_function("inv", codomain_sorts.clone(), qv.sort.clone()) {
            Ok(f) => f,
            Err(e) => return Err(prover_failure(e)),
        };
        functions.push(f);
    }
    let guard = Term::and(parts.cond.clone(), Term::is_positive(parts.perm.clone()));

    // inv-of-e: forall xs :: c(xs) && 0 < p(xs) ==> inv_j(e(xs)) = x_j
    let inv_of_e_body = Term::implies(
        guard.clone(),
        Term::and_all(
            parts
                .qvars
                .iter()
                .zip(functions.iter())
                .map(|(qv, f)| Term::eq(f.apply(parts.receivers.clone()), Term::Var(qv.clone())))
                .collect(),
        ),
    );
    let trig1 = generated_triggers(ctx, &inv_of_e_body, &parts.qvars);
    let inv_of_e = Term::forall(
        parts.qvars.clone(),
        inv_of_e_body,
        trig1,
        d.fresh_bound_name("qp.inv-of-e"),
    );

    // e-of-inv: forall rs :: c[xs := inv(rs)] && 0 < p[xs := inv(rs)]
    //           ==> e_k[xs := inv(rs)] = r_k
    let cod_map: HashMap<String, Term> = parts
        .qvars
        .iter()
        .zip(functions.iter())
        .map(|(qv, f)| (qv.name.clone(), f.apply(codomain_terms.clone())))
        .collect();
    let guard_inv = guard.substitute(&cod_map);
    let e_of_inv_body = Term::implies(
        guard_inv,
        Term::and_all(
            parts
                .receivers
                .iter()
                .zip(codomain_terms.iter())
                .map(|(e, r)| Term::eq(e.substitute(&cod_map), r.clone()))
                .collect(),
        ),
    );
    let trig2 = generated_triggers(ctx, &e_of_inv_body, codomains);
    let e_of_inv = Term::forall(
        codomains.to_vec(),
        e_of_inv_body,
        trig2,
        d.fresh_bound_name("qp.e-of-inv"),
    );

    let bundle = InverseFunctions {
        functions,
        axioms: vec![inv_of_e, e_of_inv],
    };
    Ok((bundle, cod_map))
}

/// The injectivity obligation: distinct quantified values with positive
/// permission map to distinct receiver tuples.
fn injectivity_term(parts: &QuantifiedParts) -> Term {
    let rename = |suffix: &str| -> (Vec<TermVar>, HashMap<String, Term>) {
        let vars: Vec<TermVar> = parts
            .qvars
            .iter()
            .map(|v| TermVar::new(format!("{}{}", v.name, suffix), v.sort.clone()))
            .collect();
        let map = parts
            .qvars
            .iter()
            .zip(vars.iter())
            .map(|(old, new)| (old.name.clone(), Term::Var(new.clone())))
            .collect();
        (vars, map)
    };
    let (vars1, map1) = rename("$1");
    let (vars2, map2) = rename("$2");

    let guard = |map: &HashMap<String, Term>| {
        Term::and(
            parts.cond.substitute(map),
            Term::is_positive(parts.perm.substitute(map)),
        )
    };
    let receivers_equal = Term::and_all(
        parts
            .receivers
            .iter()
            .map(|e| Term::eq(e.substitute(&map1), e.substitute(&map2)))
            .collect(),
    );
    let values_equal = Term::and_all(
        parts
            .qvars
            .iter()
            .map(|v| {
                Term::eq(
                    map1[&v.name].clone(),
                    map2[&v.name].clone(),
                )
            })
            .collect(),
    );
    let body = Term::implies(
        Term::and_all(vec![guard(&map1), guard(&map2), receivers_equal]),
        values_equal,
    );
    let mut all_vars = vars1;
    all_vars.extend(vars2);
    Term::forall(all_vars, body, Vec::new(), "qp.injective")
}

// =============================================================================
// The split algorithm
// =============================================================================

/// One heap chunk competing to supply permissions to a split.
struct Candidate {
    /// Index into the entry heap's chunk list.
    index: usize,
    /// The chunk's permission, re-expressed over the split's codomains.
    perm: Term,
    /// The chunk's FVF or PSF term.
    summary: Term,
    /// Concrete location, when the chunk covers a single one.
    singleton: Option<Vec<Term>>,
    hints: Vec<Term>,
}

struct SplitOutcome {
    /// Whether enough permission was found.
    satisfied: bool,
    /// Surviving candidates: `(heap index, new permission)`.
    kept: Vec<(usize, Term)>,
    /// Depleted candidates, to be removed from the heap.
    dropped: Vec<usize>,
    /// All candidates the loop touched, with their *original* permission;
    /// value axioms range over exactly these.
    touched: Vec<(Term, Term, Option<Vec<Term>>)>,
}

fn forall_over(
    ctx: Ctx<'_>,
    d: &mut Decider,
    codomains: &[TermVar],
    body: Term,
    qid: &str,
) -> Term {
    let trigs = generated_triggers(ctx, &body, codomains);
    Term::forall(codomains.to_vec(), body, trigs, d.fresh_bound_name(qid))
}

/// Removes `needed(rs) = cond(rs) ? p(rs) : none` from the candidates.
///
/// Implements the heap-split algorithm: per candidate a solver-side
/// `pTaken` macro is defined, permissions are transferred in candidate
/// order, and after every candidate a short-timeout check may establish
/// early success. The final "enough taken" check runs without a timeout
/// and is mandatory unless the early check already succeeded.
fn split(
    ctx: Ctx<'_>,
    d: &mut Decider,
    codomains: &[TermVar],
    cond_inv: &Term,
    p_init: &Term,
    consumer_hints: &[Term],
    constrain: bool,
    mut candidates: Vec<Candidate>,
) -> Result<SplitOutcome, VerificationResult> {
    let cod_terms: Vec<Term> = codomains.iter().map(|c| Term::Var(c.clone())).collect();

    if !ctx.config.disable_chunk_order_heuristics {
        // Chunks whose recorded hints match the consumer's come first.
        candidates.sort_by_key(|c| c.hints != consumer_hints);
    }

    let mut needed = Term::ite(cond_inv.clone(), p_init.clone(), Term::NoPerm);
    let mut outcome = SplitOutcome {
        satisfied: false,
        kept: Vec::new(),
        dropped: Vec::new(),
        touched: Vec::new(),
    };
    let split_timeout = Some(ctx.config.split_timeout);

    for cand in &candidates {
        let taken_body = Term::ite(
            cond_inv.clone(),
            Term::perm_min(cand.perm.clone(), needed.clone()),
            Term::NoPerm,
        );
        let taken_fn = d
            .define_macro("pTaken", codomains.to_vec(), Sort::Perm, taken_body)
            .map_err(prover_failure)?;
        let taken = taken_fn.apply(cod_terms.clone());

        outcome
            .touched
            .push((cand.summary.clone(), cand.perm.clone(), cand.singleton.clone()));

        if constrain {
            // Abstract read permission: constrain it below the chunk's
            // amount instead of draining the chunk.
            let body = Term::implies(
                Term::not(Term::eq(cand.perm.clone(), Term::NoPerm)),
                Term::perm_less(p_init.clone(), cand.perm.clone()),
            );
            let axiom = forall_over(ctx, d, codomains, body, "qp.arp-constraint");
            d.assume(vec![axiom]).map_err(prover_failure)?;
            outcome.kept.push((
                cand.index,
                Term::perm_minus(cand.perm.clone(), taken.clone()),
            ));
        } else {
            let depleted_body = Term::eq(
                Term::perm_minus(cand.perm.clone(), taken.clone()),
                Term::NoPerm,
            );
            let depleted = forall_over(ctx, d, codomains, depleted_body, "qp.depleted");
            // `unknown` within the timeout counts as not depleted.
            let is_depleted = d.check(&depleted, split_timeout).map_err(prover_failure)?;
            if is_depleted {
                trace!("split depletes chunk #{}", cand.index);
                outcome.dropped.push(cand.index);
            } else {
                outcome.kept.push((
                    cand.index,
                    Term::perm_minus(cand.perm.clone(), taken.clone()),
                ));
            }
        }

        needed = Term::perm_minus(needed, taken);

        // Early-success short check; `unknown` falls through to the final
        // must-check.
        let done_body = Term::eq(needed.clone(), Term::NoPerm);
        let done = forall_over(ctx, d, codomains, done_body, "qp.done");
        if d.check(&done, split_timeout).map_err(prover_failure)? {
            outcome.satisfied = true;
            break;
        }
    }

    if !outcome.satisfied {
        // Mandatory final check, no timeout.
        let enough_body = Term::implies(
            cond_inv.clone(),
            Term::eq(needed.clone(), Term::NoPerm),
        );
        let enough = forall_over(ctx, d, codomains, enough_body, "qp.enough");
        outcome.satisfied = d.assert_term(&enough, None).map_err(prover_failure)?;
    }

    Ok(outcome)
}

// =============================================================================
// Fields: produce
// =============================================================================

fn field_value_sort(ctx: Ctx<'_>, field: &str) -> Sort {
    let decl = ctx
        .program
        .find_field(field)
        .unwrap_or_else(|| panic!("unknown field '{}'", field));
    sort_of_type(&decl.typ)
}

fn fvf_sort(ctx: Ctx<'_>, field: &str) -> Sort {
    Sort::fvf(field_value_sort(ctx, field))
}

/// Recognizes the optimized domain shape `x in S` with receiver `x`.
fn optimized_domain_set(parts: &QuantifiedParts) -> Option<Term> {
    if parts.qvars.len() != 1 || parts.receivers.len() != 1 {
        return None;
    }
    let qv = &parts.qvars[0];
    if parts.receivers[0] != Term::Var(qv.clone()) {
        return None;
    }
    match &parts.cond {
        Term::SetIn(elem, set) if **elem == Term::Var(qv.clone()) => Some((**set).clone()),
        _ => None,
    }
}

/// Produces `forall xs :: c(xs) ==> acc(e(xs).f, p(xs))`.
#[allow(clippy::too_many_arguments)]
pub fn produce_quantified_field(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    vars: &[LocalVarDecl],
    cond_exp: Option<&Exp>,
    receiver_exp: &Exp,
    field: &str,
    perm_exp: &Exp,
    sf: Term,
    span: Span,
    pve: &ErrorContext,
    q: ProduceCont<'_>,
) -> VerificationResult {
    let mut parts = translate_parts(ctx, &s, vars, cond_exp, &[receiver_exp], perm_exp);
    parts.perm = s.scale_perm(parts.perm);

    // Inhaling an aliasing range would stack permissions past the full
    // amount, so the receiver must be injective here as well.
    let injective = injectivity_term(&parts);
    match d.assert_term(&injective, None) {
        Ok(true) => {}
        Ok(false) => {
            if let Some(stop) =
                d.record_failure(Failure::receiver_not_injective(receiver_exp, pve, span))
            {
                return stop;
            }
        }
        Err(e) => return prover_failure(e),
    }

    let codomain = TermVar::new(d.fresh_bound_name("r"), Sort::Ref);
    let (inverses, cod_map) = match mk_inverses(ctx, d, &parts, std::slice::from_ref(&codomain))
    {
        Ok(pair) => pair,
        Err(r) => return r,
    };

    // Permission non-negativity and receiver non-nullness, over the
    // quantified variables.
    let nonneg_body = Term::implies(
        parts.cond.clone(),
        Term::is_non_negative(parts.perm.clone()),
    );
    let nonneg_trigs = generated_triggers(ctx, &nonneg_body, &parts.qvars);
    let nonneg = Term::forall(
        parts.qvars.clone(),
        nonneg_body,
        nonneg_trigs,
        d.fresh_bound_name("qp.perm-nonneg"),
    );
    let nonnull_body = Term::implies(
        Term::and(parts.cond.clone(), Term::is_positive(parts.perm.clone())),
        Term::neq(parts.receivers[0].clone(), Term::Null),
    );
    let nonnull_trigs = generated_triggers(ctx, &nonnull_body, &parts.qvars);
    let nonnull = Term::forall(
        parts.qvars.clone(),
        nonnull_body,
        nonnull_trigs,
        d.fresh_bound_name("qp.rcv-nonnull"),
    );

    let fvf = Term::from_snap(sf, fvf_sort(ctx, field));

    // Domain of the produced range.
    let cond_inv = parts.cond.substitute(&cod_map);
    let perm_inv = parts.perm.substitute(&cod_map);
    let domain_axiom = match optimized_domain_set(&parts) {
        Some(set) => Term::eq(Term::fvf_domain(field, fvf.clone()), set),
        None => {
            let body = Term::iff(
                Term::set_in(
                    Term::Var(codomain.clone()),
                    Term::fvf_domain(field, fvf.clone()),
                ),
                Term::and(cond_inv.clone(), Term::is_positive(perm_inv.clone())),
            );
            let trigs = generated_triggers(ctx, &body, std::slice::from_ref(&codomain));
            Term::forall(
                vec![codomain.clone()],
                body,
                trigs,
                d.fresh_bound_name("qp.domain"),
            )
        }
    };

    let mut assumptions = inverses.axioms.clone();
    assumptions.push(nonneg);
    assumptions.push(nonnull);
    assumptions.push(domain_axiom);
    if let Err(e) = d.assume(assumptions) {
        return prover_failure(e);
    }

    for f in &inverses.functions {
        s.recorder.record(
            crate::recorder::RecordedKind::Inverse,
            f.name.clone(),
            inverses.axioms.clone(),
        );
    }
    s.recorder.record(
        crate::recorder::RecordedKind::FieldValue,
        format!("{}", fvf),
        Vec::new(),
    );

    let chunk_perm = Term::ite(cond_inv, perm_inv, Term::NoPerm);
    let hints = extract_hints(&[parts.cond.clone(), parts.receivers[0].clone()]);
    s.mark_qp_field(field);
    s.heap.add(Chunk::QuantifiedField(QuantifiedFieldChunk {
        field: field.to_string(),
        fvf,
        codomain,
        perm: chunk_perm,
        inv: Some(inverses),
        singleton: None,
        hints,
    }));
    q(d, s)
}

/// Produces `acc(t.f, p)` as a singleton quantified chunk; used once the
/// field has gone quantified.
#[allow(clippy::too_many_arguments)]
pub fn produce_singleton_field(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    field: &str,
    receiver: Term,
    scaled_perm: Term,
    sf: Term,
    q: ProduceCont<'_>,
) -> VerificationResult {
    let value_sort = field_value_sort(ctx, field);
    let value = Term::from_snap(sf, value_sort);
    let fvf = match d.fresh("fvf", fvf_sort(ctx, field)) {
        Ok(v) => Term::Var(v),
        Err(e) => return prover_failure(e),
    };
    let assumptions = vec![
        Term::eq(
            Term::lookup(field, fvf.clone(), receiver.clone()),
            value,
        ),
        Term::eq(
            Term::fvf_domain(field, fvf.clone()),
            Term::SetSingleton(Box::new(receiver.clone())),
        ),
    ];
    if let Err(e) = d.assume(assumptions) {
        return prover_failure(e);
    }
    s.recorder.record(
        crate::recorder::RecordedKind::FieldValue,
        format!("{}", fvf),
        Vec::new(),
    );

    let codomain = TermVar::new(d.fresh_bound_name("r"), Sort::Ref);
    let perm = Term::ite(
        Term::eq(Term::Var(codomain.clone()), receiver.clone()),
        scaled_perm,
        Term::NoPerm,
    );
    let hints = extract_hints(std::slice::from_ref(&receiver));
    s.heap.add(Chunk::QuantifiedField(QuantifiedFieldChunk {
        field: field.to_string(),
        fvf,
        codomain,
        perm,
        inv: None,
        singleton: Some(receiver),
        hints,
    }));
    q(d, s)
}

// =============================================================================
// Fields: consume
// =============================================================================

/// Re-expresses any basic chunks for `field` as singleton quantified
/// chunks, so the split algorithm sees a uniform candidate pool.
fn upgrade_field_chunks(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: &mut State,
) -> Result<(), VerificationResult> {
    let basic: Vec<usize> = s
        .heap
        .chunks()
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match c {
            Chunk::Field(fc) if s.qp_fields.iter().any(|f| f == &fc.field) => Some(i),
            _ => None,
        })
        .collect();
    for index in basic {
        let fc = match &s.heap.chunks()[index] {
            Chunk::Field(fc) => fc.clone(),
            _ => unreachable!(),
        };
        let fvf = match d.fresh("fvf", fvf_sort(ctx, &fc.field)) {
            Ok(v) => Term::Var(v),
            Err(e) => return Err(prover_failure(e)),
        };
        let assumptions = vec![
            Term::eq(
                Term::lookup(&fc.field, fvf.clone(), fc.receiver.clone()),
                fc.value.clone(),
            ),
            Term::eq(
                Term::fvf_domain(&fc.field, fvf.clone()),
                Term::SetSingleton(Box::new(fc.receiver.clone())),
            ),
        ];
        if let Err(e) = d.assume(assumptions) {
            return Err(prover_failure(e));
        }
        let codomain = TermVar::new(d.fresh_bound_name("r"), Sort::Ref);
        let perm = Term::ite(
            Term::eq(Term::Var(codomain.clone()), fc.receiver.clone()),
            fc.perm.clone(),
            Term::NoPerm,
        );
        s.heap.set(
            index,
            Chunk::QuantifiedField(QuantifiedFieldChunk {
                field: fc.field.clone(),
                fvf,
                codomain,
                perm,
                inv: None,
                singleton: Some(fc.receiver.clone()),
                hints: Vec::new(),
            }),
        );
    }
    Ok(())
}

fn field_candidates(s: &State, field: &str, codomain: &TermVar) -> Vec<Candidate> {
    s.heap
        .chunks()
        .iter()
        .enumerate()
        .filter_map(|(index, c)| match c {
            Chunk::QuantifiedField(qf) if qf.field == field => Some(Candidate {
                index,
                perm: qf.perm_at(&Term::Var(codomain.clone())),
                summary: qf.fvf.clone(),
                singleton: qf.singleton.clone().map(|t| vec![t]),
                hints: qf.hints.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Emits the FVF-definition bundle for a consumed field range: value
/// axioms against every touched candidate, plus the domain axiom.
#[allow(clippy::too_many_arguments)]
fn emit_field_fvf_bundle(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: &mut State,
    field: &str,
    fvf_new: &Term,
    codomain: &TermVar,
    cond_inv: &Term,
    touched: &[(Term, Term, Option<Vec<Term>>)],
    domain: Option<Term>,
) -> Result<(), VerificationResult> {
    let mut axioms = Vec::new();
    for (summary, orig_perm, singleton) in touched {
        match singleton {
            Some(args) => {
                let t = &args[0];
                let map: HashMap<String, Term> =
                    [(codomain.name.clone(), t.clone())].into_iter().collect();
                axioms.push(Term::implies(
                    Term::and(
                        cond_inv.substitute(&map),
                        Term::is_positive(orig_perm.substitute(&map)),
                    ),
                    Term::eq(
                        Term::lookup(field, fvf_new.clone(), t.clone()),
                        Term::lookup(field, summary.clone(), t.clone()),
                    ),
                ));
            }
            None => {
                let r = Term::Var(codomain.clone());
                let body = Term::implies(
                    Term::and(cond_inv.clone(), Term::is_positive(orig_perm.clone())),
                    Term::eq(
                        Term::lookup(field, fvf_new.clone(), r.clone()),
                        Term::lookup(field, summary.clone(), r.clone()),
                    ),
                );
                let trigs = vec![
                    vec![Term::lookup(field, fvf_new.clone(), r.clone())],
                    vec![Term::lookup(field, summary.clone(), r)],
                ];
                axioms.push(Term::forall(
                    vec![codomain.clone()],
                    body,
                    if ctx.config.disable_isc_triggers {
                        Vec::new()
                    } else {
                        trigs
                    },
                    d.fresh_bound_name("qp.fvf-value"),
                ));
            }
        }
    }

    axioms.push(match domain {
        Some(set) => Term::eq(Term::fvf_domain(field, fvf_new.clone()), set),
        None => {
            let r = Term::Var(codomain.clone());
            let body = Term::iff(
                Term::set_in(r, Term::fvf_domain(field, fvf_new.clone())),
                cond_inv.clone(),
            );
            let trigs = generated_triggers(ctx, &body, std::slice::from_ref(codomain));
            Term::forall(
                vec![codomain.clone()],
                body,
                trigs,
                d.fresh_bound_name("qp.fvf-domain"),
            )
        }
    });

    if let Err(e) = d.assume(axioms) {
        return Err(prover_failure(e));
    }
    s.recorder.record(
        crate::recorder::RecordedKind::FieldValue,
        format!("{}", fvf_new),
        Vec::new(),
    );
    Ok(())
}

fn rebuild_heap(s: &mut State, kept: &[(usize, Term)], dropped: &[usize]) {
    let mut chunks: Vec<Chunk> = Vec::with_capacity(s.heap.len());
    for (index, chunk) in s.heap.chunks().iter().enumerate() {
        if dropped.contains(&index) {
            continue;
        }
        if let Some((_, new_perm)) = kept.iter().find(|(i, _)| *i == index) {
            chunks.push(chunk.with_perm(new_perm.clone()));
        } else {
            chunks.push(chunk.clone());
        }
    }
    s.heap.replace(chunks);
}

/// Consumes `forall xs :: c(xs) ==> acc(e(xs).f, p(xs))`.
#[allow(clippy::too_many_arguments)]
pub fn consume_quantified_field(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    vars: &[LocalVarDecl],
    cond_exp: Option<&Exp>,
    receiver_exp: &Exp,
    field: &str,
    perm_exp: &Exp,
    span: Span,
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    s.mark_qp_field(field);
    if let Err(r) = upgrade_field_chunks(ctx, d, &mut s) {
        return r;
    }

    let mut parts = translate_parts(ctx, &s, vars, cond_exp, &[receiver_exp], perm_exp);
    parts.perm = s.scale_perm(parts.perm);

    // Injectivity is the consumer's obligation.
    let injective = injectivity_term(&parts);
    match d.assert_term(&injective, None) {
        Ok(true) => {}
        Ok(false) => {
            if let Some(stop) =
                d.record_failure(Failure::receiver_not_injective(receiver_exp, pve, span))
            {
                return stop;
            }
        }
        Err(e) => return prover_failure(e),
    }

    let codomain = TermVar::new(d.fresh_bound_name("r"), Sort::Ref);
    let (inverses, cod_map) = match mk_inverses(ctx, d, &parts, std::slice::from_ref(&codomain))
    {
        Ok(pair) => pair,
        Err(r) => return r,
    };
    if let Err(e) = d.assume(inverses.axioms.clone()) {
        return prover_failure(e);
    }
    for f in &inverses.functions {
        s.recorder.record(
            crate::recorder::RecordedKind::Inverse,
            f.name.clone(),
            inverses.axioms.clone(),
        );
    }

    let cond_inv = parts.cond.substitute(&cod_map);
    let p_init = parts.perm.substitute(&cod_map);
    let constrain = d.is_arp_term(&parts.perm);
    let hints = extract_hints(&[parts.cond.clone(), parts.receivers[0].clone()]);
    let candidates = field_candidates(&s, field, &codomain);

    let outcome = match split(
        ctx,
        d,
        std::slice::from_ref(&codomain),
        &cond_inv,
        &p_init,
        &hints,
        constrain,
        candidates,
    ) {
        Ok(o) => o,
        Err(r) => return r,
    };

    if !outcome.satisfied {
        // Recorded; the partial transfer stands and the FVF is still
        // emitted so the continuation has values to work with.
        if let Some(stop) = d.record_failure(Failure::insufficient_permission(
            format!("{}.{}", receiver_exp, field),
            pve,
            span,
        )) {
            return stop;
        }
    }

    let fvf_new = match d.fresh("fvf", fvf_sort(ctx, field)) {
        Ok(v) => Term::Var(v),
        Err(e) => return prover_failure(e),
    };
    let domain = optimized_domain_set(&parts);
    if let Err(r) = emit_field_fvf_bundle(
        ctx,
        d,
        &mut s,
        field,
        &fvf_new,
        &codomain,
        &cond_inv,
        &outcome.touched,
        domain,
    ) {
        return r;
    }
    rebuild_heap(&mut s, &outcome.kept, &outcome.dropped);

    q(d, s, Term::to_snap(fvf_new))
}

/// Consumes `acc(t.f, p)` when `f` has gone quantified: the split runs
/// with the condition `r == t`, and the resulting snapshot is the value at
/// `t` under the fresh FVF.
#[allow(clippy::too_many_arguments)]
pub fn consume_singleton_field(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    field: &str,
    receiver: Term,
    loss: Term,
    access: &str,
    span: Span,
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    if let Err(r) = upgrade_field_chunks(ctx, d, &mut s) {
        return r;
    }

    let codomain = TermVar::new(d.fresh_bound_name("r"), Sort::Ref);
    let cond_inv = Term::eq(Term::Var(codomain.clone()), receiver.clone());
    let constrain = d.is_arp_term(&loss);
    let hints = extract_hints(std::slice::from_ref(&receiver));
    let candidates = field_candidates(&s, field, &codomain);

    let outcome = match split(
        ctx,
        d,
        std::slice::from_ref(&codomain),
        &cond_inv,
        &loss,
        &hints,
        constrain,
        candidates,
    ) {
        Ok(o) => o,
        Err(r) => return r,
    };

    if !outcome.satisfied {
        if let Some(stop) = d.record_failure(Failure::insufficient_permission(
            access, pve, span,
        )) {
            return stop;
        }
    }

    let fvf_new = match d.fresh("fvf", fvf_sort(ctx, field)) {
        Ok(v) => Term::Var(v),
        Err(e) => return prover_failure(e),
    };
    if let Err(r) = emit_field_fvf_bundle(
        ctx,
        d,
        &mut s,
        field,
        &fvf_new,
        &codomain,
        &cond_inv,
        &outcome.touched,
        Some(Term::SetSingleton(Box::new(receiver.clone()))),
    ) {
        return r;
    }
    rebuild_heap(&mut s, &outcome.kept, &outcome.dropped);

    let value = Term::lookup(field, fvf_new, receiver);
    q(d, s, Term::to_snap(value))
}

/// Heap lookup of `t.f` for the evaluator once `f` has gone quantified:
/// requires provably positive summed permission at `t` and returns the
/// value under a fresh FVF tied to every positive candidate.
#[allow(clippy::too_many_arguments)]
pub fn lookup_field(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    field: &str,
    receiver: Term,
    access: &str,
    span: Span,
    pve: &ErrorContext,
    q: EvalCont<'_>,
) -> VerificationResult {
    if let Err(r) = upgrade_field_chunks(ctx, d, &mut s) {
        return r;
    }

    let perms: Vec<Term> = s
        .heap
        .chunks()
        .iter()
        .filter_map(|c| match c {
            Chunk::QuantifiedField(qf) if qf.field == field => Some(qf.perm_at(&receiver)),
            _ => None,
        })
        .collect();
    let total = perms
        .into_iter()
        .fold(Term::NoPerm, Term::perm_plus);
    match d.assert_term(&Term::is_positive(total), None) {
        Ok(true) => {}
        // Recorded; the lookup still yields a value under the fresh FVF so
        // evaluation can continue.
        Ok(false) => {
            if let Some(stop) = d.record_failure(Failure::insufficient_permission(
                access, pve, span,
            )) {
                return stop;
            }
        }
        Err(e) => return prover_failure(e),
    }

    let fvf_new = match d.fresh("fvf", fvf_sort(ctx, field)) {
        Ok(v) => Term::Var(v),
        Err(e) => return prover_failure(e),
    };
    let mut axioms = Vec::new();
    for chunk in s.heap.chunks() {
        if let Chunk::QuantifiedField(qf) = chunk {
            if qf.field == field {
                axioms.push(Term::implies(
                    Term::is_positive(qf.perm_at(&receiver)),
                    Term::eq(
                        Term::lookup(field, fvf_new.clone(), receiver.clone()),
                        Term::lookup(field, qf.fvf.clone(), receiver.clone()),
                    ),
                ));
            }
        }
    }
    if let Err(e) = d.assume(axioms) {
        return prover_failure(e);
    }

    let value = Term::lookup(field, fvf_new, receiver);
    q(d, s, value)
}

// =============================================================================
// Predicates
// =============================================================================

fn predicate_codomains(
    ctx: Ctx<'_>,
    d: &mut Decider,
    predicate: &str,
) -> Vec<TermVar> {
    let decl = ctx
        .program
        .find_predicate(predicate)
        .unwrap_or_else(|| panic!("unknown predicate '{}'", predicate));
    decl.formal_args
        .iter()
        .map(|arg| {
            TermVar::new(
                d.fresh_bound_name(&arg.name),
                sort_of_type(&arg.typ),
            )
        })
        .collect()
}

/// Produces `forall xs :: c(xs) ==> acc(P(e1(xs), …), p(xs))`.
#[allow(clippy::too_many_arguments)]
pub fn produce_quantified_predicate(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    vars: &[LocalVarDecl],
    cond_exp: Option<&Exp>,
    predicate: &str,
    arg_exps: &[&Exp],
    perm_exp: &Exp,
    sf: Term,
    span: Span,
    pve: &ErrorContext,
    q: ProduceCont<'_>,
) -> VerificationResult {
    let mut parts = translate_parts(ctx, &s, vars, cond_exp, arg_exps, perm_exp);
    parts.perm = s.scale_perm(parts.perm);

    let injective = injectivity_term(&parts);
    match d.assert_term(&injective, None) {
        Ok(true) => {}
        Ok(false) => {
            if let Some(stop) = d.record_failure(Failure::receiver_not_injective(
                format!("{}(...)", predicate),
                pve,
                span,
            )) {
                return stop;
            }
        }
        Err(e) => return prover_failure(e),
    }

    let codomains = predicate_codomains(ctx, d, predicate);
    let (inverses, cod_map) = match mk_inverses(ctx, d, &parts, &codomains) {
        Ok(pair) => pair,
        Err(r) => return r,
    };

    let nonneg_body = Term::implies(
        parts.cond.clone(),
        Term::is_non_negative(parts.perm.clone()),
    );
    let nonneg_trigs = generated_triggers(ctx, &nonneg_body, &parts.qvars);
    let nonneg = Term::forall(
        parts.qvars.clone(),
        nonneg_body,
        nonneg_trigs,
        d.fresh_bound_name("qp.perm-nonneg"),
    );

    let psf = Term::from_snap(sf, Sort::psf(predicate));

    let cond_inv = parts.cond.substitute(&cod_map);
    let perm_inv = parts.perm.substitute(&cod_map);
    let cod_terms: Vec<Term> = codomains.iter().map(|c| Term::Var(c.clone())).collect();
    let domain_body = Term::iff(
        Term::set_in(
            Term::snap_args(cod_terms.clone()),
            Term::pred_domain(predicate, psf.clone()),
        ),
        Term::and(cond_inv.clone(), Term::is_positive(perm_inv.clone())),
    );
    let domain_trigs = generated_triggers(ctx, &domain_body, &codomains);
    let domain_axiom = Term::forall(
        codomains.clone(),
        domain_body,
        domain_trigs,
        d.fresh_bound_name("qp.domain"),
    );

    let mut assumptions = inverses.axioms.clone();
    assumptions.push(nonneg);
    assumptions.push(domain_axiom);
    if let Err(e) = d.assume(assumptions) {
        return prover_failure(e);
    }
    for f in &inverses.functions {
        s.recorder.record(
            crate::recorder::RecordedKind::Inverse,
            f.name.clone(),
            inverses.axioms.clone(),
        );
    }
    s.recorder.record(
        crate::recorder::RecordedKind::PredSnap,
        format!("{}", psf),
        Vec::new(),
    );

    let chunk_perm = Term::ite(cond_inv, perm_inv, Term::NoPerm);
    let hints = extract_hints(
        &std::iter::once(parts.cond.clone())
            .chain(parts.receivers.iter().cloned())
            .collect::<Vec<_>>(),
    );
    s.mark_qp_predicate(predicate);
    s.heap
        .add(Chunk::QuantifiedPredicate(QuantifiedPredicateChunk {
            name: predicate.to_string(),
            psf,
            codomains,
            perm: chunk_perm,
            inv: Some(inverses),
            singleton: None,
            hints,
        }));
    q(d, s)
}

/// Produces `acc(P(args), p)` as a singleton quantified chunk.
#[allow(clippy::too_many_arguments)]
pub fn produce_singleton_predicate(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    predicate: &str,
    args: Vec<Term>,
    scaled_perm: Term,
    sf: Term,
    q: ProduceCont<'_>,
) -> VerificationResult {
    let psf = match d.fresh("psf", Sort::psf(predicate)) {
        Ok(v) => Term::Var(v),
        Err(e) => return prover_failure(e),
    };
    let snap_args = Term::snap_args(args.clone());
    if let Err(e) = d.assume(vec![Term::eq(
        Term::pred_lookup(predicate, psf.clone(), snap_args.clone()),
        sf,
    )]) {
        return prover_failure(e);
    }
    s.recorder.record(
        crate::recorder::RecordedKind::PredSnap,
        format!("{}", psf),
        Vec::new(),
    );

    let codomains = predicate_codomains(ctx, d, predicate);
    let cod_terms: Vec<Term> = codomains.iter().map(|c| Term::Var(c.clone())).collect();
    let at_args = Term::and_all(
        cod_terms
            .iter()
            .zip(args.iter())
            .map(|(c, a)| Term::eq(c.clone(), a.clone()))
            .collect(),
    );
    let perm = Term::ite(at_args, scaled_perm, Term::NoPerm);
    s.heap
        .add(Chunk::QuantifiedPredicate(QuantifiedPredicateChunk {
            name: predicate.to_string(),
            psf,
            codomains,
            perm,
            inv: None,
            singleton: Some(args),
            hints: Vec::new(),
        }));
    q(d, s)
}

fn predicate_candidates(s: &State, predicate: &str, codomains: &[TermVar]) -> Vec<Candidate> {
    let cod_terms: Vec<Term> = codomains.iter().map(|c| Term::Var(c.clone())).collect();
    s.heap
        .chunks()
        .iter()
        .enumerate()
        .filter_map(|(index, c)| match c {
            Chunk::QuantifiedPredicate(qp) if qp.name == predicate => Some(Candidate {
                index,
                perm: qp.perm_at(&cod_terms),
                summary: qp.psf.clone(),
                singleton: qp.singleton.clone(),
                hints: qp.hints.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Re-expresses basic predicate chunks as singleton quantified chunks.
fn upgrade_predicate_chunks(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: &mut State,
) -> Result<(), VerificationResult> {
    let basic: Vec<usize> = s
        .heap
        .chunks()
        .iter()
        .enumerate()
        .filter_map(|(i, c)| match c {
            Chunk::Predicate(pc) if s.qp_predicates.iter().any(|p| p == &pc.name) => Some(i),
            _ => None,
        })
        .collect();
    for index in basic {
        let pc = match &s.heap.chunks()[index] {
            Chunk::Predicate(pc) => pc.clone(),
            _ => unreachable!(),
        };
        let psf = match d.fresh("psf", Sort::psf(&pc.name)) {
            Ok(v) => Term::Var(v),
            Err(e) => return Err(prover_failure(e)),
        };
        let snap_args = Term::snap_args(pc.args.clone());
        if let Err(e) = d.assume(vec![Term::eq(
            Term::pred_lookup(&pc.name, psf.clone(), snap_args),
            pc.snap.clone(),
        )]) {
            return Err(prover_failure(e));
        }
        let codomains = predicate_codomains(ctx, d, &pc.name);
        let cod_terms: Vec<Term> = codomains.iter().map(|c| Term::Var(c.clone())).collect();
        let at_args = Term::and_all(
            cod_terms
                .iter()
                .zip(pc.args.iter())
                .map(|(c, a)| Term::eq(c.clone(), a.clone()))
                .collect(),
        );
        let perm = Term::ite(at_args, pc.perm.clone(), Term::NoPerm);
        s.heap.set(
            index,
            Chunk::QuantifiedPredicate(QuantifiedPredicateChunk {
                name: pc.name.clone(),
                psf,
                codomains,
                perm,
                inv: None,
                singleton: Some(pc.args.clone()),
                hints: Vec::new(),
            }),
        );
    }
    Ok(())
}

/// Emits the PSF-definition bundle for a consumed predicate range.
#[allow(clippy::too_many_arguments)]
fn emit_predicate_psf_bundle(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: &mut State,
    predicate: &str,
    psf_new: &Term,
    codomains: &[TermVar],
    cond_inv: &Term,
    touched: &[(Term, Term, Option<Vec<Term>>)],
) -> Result<(), VerificationResult> {
    let cod_terms: Vec<Term> = codomains.iter().map(|c| Term::Var(c.clone())).collect();
    let mut axioms = Vec::new();
    for (summary, orig_perm, singleton) in touched {
        match singleton {
            Some(args) => {
                let map: HashMap<String, Term> = codomains
                    .iter()
                    .zip(args.iter())
                    .map(|(c, a)| (c.name.clone(), a.clone()))
                    .collect();
                let snap_args = Term::snap_args(args.clone());
                axioms.push(Term::implies(
                    Term::and(
                        cond_inv.substitute(&map),
                        Term::is_positive(orig_perm.substitute(&map)),
                    ),
                    Term::eq(
                        Term::pred_lookup(predicate, psf_new.clone(), snap_args.clone()),
                        Term::pred_lookup(predicate, summary.clone(), snap_args),
                    ),
                ));
            }
            None => {
                let snap_args = Term::snap_args(cod_terms.clone());
                let body = Term::implies(
                    Term::and(cond_inv.clone(), Term::is_positive(orig_perm.clone())),
                    Term::eq(
                        Term::pred_lookup(predicate, psf_new.clone(), snap_args.clone()),
                        Term::pred_lookup(predicate, summary.clone(), snap_args),
                    ),
                );
                let trigs = generated_triggers(ctx, &body, codomains);
                axioms.push(Term::forall(
                    codomains.to_vec(),
                    body,
                    trigs,
                    d.fresh_bound_name("qp.psf-value"),
                ));
            }
        }
    }

    let snap_args = Term::snap_args(cod_terms);
    let domain_body = Term::iff(
        Term::set_in(snap_args, Term::pred_domain(predicate, psf_new.clone())),
        cond_inv.clone(),
    );
    let domain_trigs = generated_triggers(ctx, &domain_body, codomains);
    axioms.push(Term::forall(
        codomains.to_vec(),
        domain_body,
        domain_trigs,
        d.fresh_bound_name("qp.psf-domain"),
    ));

    if let Err(e) = d.assume(axioms) {
        return Err(prover_failure(e));
    }
    s.recorder.record(
        crate::recorder::RecordedKind::PredSnap,
        format!("{}", psf_new),
        Vec::new(),
    );
    Ok(())
}

/// Consumes `forall xs :: c(xs) ==> acc(P(e1(xs), …), p(xs))`.
#[allow(clippy::too_many_arguments)]
pub fn consume_quantified_predicate(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    vars: &[LocalVarDecl],
    cond_exp: Option<&Exp>,
    predicate: &str,
    arg_exps: &[&Exp],
    perm_exp: &Exp,
    span: Span,
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    s.mark_qp_predicate(predicate);
    if let Err(r) = upgrade_predicate_chunks(ctx, d, &mut s) {
        return r;
    }

    let mut parts = translate_parts(ctx, &s, vars, cond_exp, arg_exps, perm_exp);
    parts.perm = s.scale_perm(parts.perm);

    let injective = injectivity_term(&parts);
    match d.assert_term(&injective, None) {
        Ok(true) => {}
        Ok(false) => {
            if let Some(stop) = d.record_failure(Failure::receiver_not_injective(
                format!("{}(...)", predicate),
                pve,
                span,
            )) {
                return stop;
            }
        }
        Err(e) => return prover_failure(e),
    }

    let codomains = predicate_codomains(ctx, d, predicate);
    let (inverses, cod_map) = match mk_inverses(ctx, d, &parts, &codomains) {
        Ok(pair) => pair,
        Err(r) => return r,
    };
    if let Err(e) = d.assume(inverses.axioms.clone()) {
        return prover_failure(e);
    }
    for f in &inverses.functions {
        s.recorder.record(
            crate::recorder::RecordedKind::Inverse,
            f.name.clone(),
            inverses.axioms.clone(),
        );
    }

    let cond_inv = parts.cond.substitute(&cod_map);
    let p_init = parts.perm.substitute(&cod_map);
    let constrain = d.is_arp_term(&parts.perm);
    let hints = extract_hints(
        &std::iter::once(parts.cond.clone())
            .chain(parts.receivers.iter().cloned())
            .collect::<Vec<_>>(),
    );
    let candidates = predicate_candidates(&s, predicate, &codomains);

    let outcome = match split(
        ctx,
        d,
        &codomains,
        &cond_inv,
        &p_init,
        &hints,
        constrain,
        candidates,
    ) {
        Ok(o) => o,
        Err(r) => return r,
    };

    if !outcome.satisfied {
        if let Some(stop) = d.record_failure(Failure::insufficient_permission(
            format!("{}(...)", predicate),
            pve,
            span,
        )) {
            return stop;
        }
    }

    let psf_new = match d.fresh("psf", Sort::psf(predicate)) {
        Ok(v) => Term::Var(v),
        Err(e) => return prover_failure(e),
    };
    if let Err(r) = emit_predicate_psf_bundle(
        ctx,
        d,
        &mut s,
        predicate,
        &psf_new,
        &codomains,
        &cond_inv,
        &outcome.touched,
    ) {
        return r;
    }
    rebuild_heap(&mut s, &outcome.kept, &outcome.dropped);

    q(d, s, Term::to_snap(psf_new))
}

/// Consumes `acc(P(args), p)` when `P` has gone quantified.
#[allow(clippy::too_many_arguments)]
pub fn consume_singleton_predicate(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    predicate: &str,
    args: Vec<Term>,
    loss: Term,
    span: Span,
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    if let Err(r) = upgrade_predicate_chunks(ctx, d, &mut s) {
        return r;
    }

    let codomains = predicate_codomains(ctx, d, predicate);
    let cod_terms: Vec<Term> = codomains.iter().map(|c| Term::Var(c.clone())).collect();
    let cond_inv = Term::and_all(
        cod_terms
            .iter()
            .zip(args.iter())
            .map(|(c, a)| Term::eq(c.clone(), a.clone()))
            .collect(),
    );
    let constrain = d.is_arp_term(&loss);
    let candidates = predicate_candidates(&s, predicate, &codomains);

    let outcome = match split(
        ctx,
        d,
        &codomains,
        &cond_inv,
        &loss,
        &[],
        constrain,
        candidates,
    ) {
        Ok(o) => o,
        Err(r) => return r,
    };

    if !outcome.satisfied {
        if let Some(stop) = d.record_failure(Failure::insufficient_permission(
            format!("{}(...)", predicate),
            pve,
            span,
        )) {
            return stop;
        }
    }

    let psf_new = match d.fresh("psf", Sort::psf(predicate)) {
        Ok(v) => Term::Var(v),
        Err(e) => return prover_failure(e),
    };
    if let Err(r) = emit_predicate_psf_bundle(
        ctx,
        d,
        &mut s,
        predicate,
        &psf_new,
        &codomains,
        &cond_inv,
        &outcome.touched,
    ) {
        return r;
    }
    rebuild_heap(&mut s, &outcome.kept, &outcome.dropped);

    let snap = Term::pred_lookup(predicate, psf_new, Term::snap_args(args));
    q(d, s, snap)
}
