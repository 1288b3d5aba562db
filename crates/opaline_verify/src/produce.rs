//! The producer: inhaling assertions.
//!
//! Producing an assertion adds its permissions to the heap and assumes its
//! pure facts, with a snapshot term deciding the values underneath the new
//! chunks. Conjunctions distribute the snapshot along `first`/`second`;
//! branch points fork execution and the else-branch of an implication pins
//! its snapshot to `unit`.
//!
//! Permission amounts are checked non-negative as they are produced (a
//! negative amount in a contract is recorded as [`FailureKind::NegativePermission`]
//! and production continues); receiver non-nullness under positive
//! permission is assumed. Quantified ranges additionally check receiver
//! injectivity — inhaling an aliasing range would stack permissions past
//! the full amount.
//!
//! [`FailureKind::NegativePermission`]: crate::result::FailureKind::NegativePermission

use crate::branch::branch;
use crate::chunks::{Chunk, FieldChunk, MagicWandChunk, PredicateChunk};
use crate::decider::Decider;
use crate::eval::{eval, evals};
use crate::qp;
use crate::result::{prover_failure, ErrorContext, Failure, VerificationResult};
use crate::state::State;
use crate::translator::sort_of_type;
use crate::Ctx;
use opaline_ast::{BinOp, Exp, ExpKind};
use opaline_term::{Function, Sort, Term};

/// Continuation of a produce: receives the extended state.
pub type ProduceCont<'a> = &'a dyn Fn(&mut Decider, State) -> VerificationResult;

/// Splits an (already inhale-resolved) quantifier body into its optional
/// condition and the accessibility predicate.
pub(crate) fn split_quantified_body(body: &Exp) -> (Option<&Exp>, &Exp) {
    match &body.kind {
        ExpKind::Binary {
            op: BinOp::Implies,
            left,
            right,
        } => (Some(left), right),
        _ => (None, body),
    }
}

/// Inhales one assertion under the snapshot `sf`.
pub fn produce(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    sf: Term,
    a: &Exp,
    pve: &ErrorContext,
    q: ProduceCont<'_>,
) -> VerificationResult {
    let resolved = a.when_inhaling();
    let tlcs: Vec<Exp> = resolved
        .top_level_conjuncts()
        .into_iter()
        .cloned()
        .collect();
    produce_tlcs(ctx, d, s, sf, &tlcs, pve, q)
}

/// Inhales a list of assertions (e.g. all preconditions) under one
/// snapshot, distributed as if they were conjoined.
pub fn produces(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    sf: Term,
    assertions: &[Exp],
    pve: &ErrorContext,
    q: ProduceCont<'_>,
) -> VerificationResult {
    let mut tlcs: Vec<Exp> = Vec::new();
    for a in assertions {
        let resolved = a.when_inhaling();
        tlcs.extend(resolved.top_level_conjuncts().into_iter().cloned());
    }
    produce_tlcs(ctx, d, s, sf, &tlcs, pve, q)
}

fn produce_tlcs(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    sf: Term,
    tlcs: &[Exp],
    pve: &ErrorContext,
    q: ProduceCont<'_>,
) -> VerificationResult {
    match tlcs.split_first() {
        None => {
            if let Err(e) = d.assume(vec![Term::eq(sf, Term::Unit)]) {
                return prover_failure(e);
            }
            q(d, s)
        }
        Some((a, rest)) if rest.is_empty() => produce2(ctx, d, s, sf, a, pve, q),
        Some((a, rest)) => {
            let sf1 = Term::first(sf.clone());
            let sf2 = Term::second(sf);
            let k = move |d: &mut Decider, s: State| {
                produce_tlcs(ctx, d, s, sf2.clone(), rest, pve, q)
            };
            produce2(ctx, d, s, sf1, a, pve, &k)
        }
    }
}

fn produce2(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    sf: Term,
    a: &Exp,
    pve: &ErrorContext,
    q: ProduceCont<'_>,
) -> VerificationResult {
    if a.is_pure() {
        let k = |d: &mut Decider, s: State, t: Term| {
            if let Err(e) = d.assume(vec![t, Term::eq(sf.clone(), Term::Unit)]) {
                return prover_failure(e);
            }
            q(d, s)
        };
        return eval(ctx, d, s, a, pve, &k);
    }

    match &a.kind {
        // Nested conjunctions re-split, reusing the same snapshot tree.
        ExpKind::Binary {
            op: BinOp::And, ..
        } => produce(ctx, d, s, sf, a, pve, q),

        ExpKind::Binary {
            op: BinOp::Implies,
            left,
            right,
        } => {
            let k = |d: &mut Decider, s: State, t_cond: Term| {
                let f_then =
                    |d: &mut Decider, s: State| produce(ctx, d, s, sf.clone(), right, pve, q);
                let f_else = |d: &mut Decider, s: State| {
                    // The snapshot of an unproduced assertion is unit.
                    if let Err(e) = d.assume(vec![Term::eq(sf.clone(), Term::Unit)]) {
                        return prover_failure(e);
                    }
                    q(d, s)
                };
                branch(d, &s, t_cond, &f_then, &f_else)
            };
            eval(ctx, d, s, left, pve, &k)
        }

        ExpKind::CondExp {
            cond,
            then_exp,
            else_exp,
        } => {
            let k = |d: &mut Decider, s: State, t_cond: Term| {
                let f_then =
                    |d: &mut Decider, s: State| produce(ctx, d, s, sf.clone(), then_exp, pve, q);
                let f_else =
                    |d: &mut Decider, s: State| produce(ctx, d, s, sf.clone(), else_exp, pve, q);
                branch(d, &s, t_cond, &f_then, &f_else)
            };
            eval(ctx, d, s, cond, pve, &k)
        }

        ExpKind::Let { var, bound, body } => {
            let outer_store = s.store.clone();
            let k = |d: &mut Decider, s: State, t_bound: Term| {
                let mut s_inner = s;
                s_inner.store = s_inner.store.extend(var.name.clone(), t_bound);
                let outer_store = outer_store.clone();
                let k_body = move |d: &mut Decider, s_body: State| {
                    let mut s_out = s_body;
                    s_out.store = outer_store.clone();
                    q(d, s_out)
                };
                produce(ctx, d, s_inner, sf.clone(), body, pve, &k_body)
            };
            eval(ctx, d, s, bound, pve, &k)
        }

        ExpKind::FieldAccessPredicate {
            receiver,
            field,
            perm,
        } => {
            let span = a.span;
            let k_rcv = |d: &mut Decider, s: State, t_rcv: Term| {
                let k_perm = |d: &mut Decider, s: State, t_perm: Term| {
                    match d.assert_term(&Term::is_non_negative(t_perm.clone()), None) {
                        Ok(true) => {}
                        // Recorded; the chunk is still produced so later
                        // conjuncts do not cascade into phantom failures.
                        Ok(false) => {
                            if let Some(stop) = d.record_failure(Failure::negative_permission(
                                perm.as_ref(),
                                pve,
                                span,
                            )) {
                                return stop;
                            }
                        }
                        Err(e) => return prover_failure(e),
                    }
                    if let Err(e) = d.assume(vec![Term::implies(
                        Term::is_positive(t_perm.clone()),
                        Term::neq(t_rcv.clone(), Term::Null),
                    )]) {
                        return prover_failure(e);
                    }
                    let scaled = s.scale_perm(t_perm.clone());
                    if s.qp_fields.iter().any(|f| f == field) {
                        qp::produce_singleton_field(
                            ctx,
                            d,
                            s,
                            field,
                            t_rcv.clone(),
                            scaled,
                            sf.clone(),
                            q,
                        )
                    } else {
                        let field_decl = ctx
                            .program
                            .find_field(field)
                            .unwrap_or_else(|| panic!("unknown field '{}'", field));
                        let value = Term::from_snap(sf.clone(), sort_of_type(&field_decl.typ));
                        let mut s2 = s;
                        s2.heap.add(Chunk::Field(FieldChunk {
                            receiver: t_rcv.clone(),
                            field: field.clone(),
                            value,
                            perm: scaled,
                        }));
                        q(d, s2)
                    }
                };
                eval(ctx, d, s, perm, pve, &k_perm)
            };
            eval(ctx, d, s, receiver, pve, &k_rcv)
        }

        ExpKind::PredicateAccessPredicate {
            predicate,
            args,
            perm,
        } => {
            let span = a.span;
            let k_args = |d: &mut Decider, s: State, t_args: Vec<Term>| {
                let k_perm = |d: &mut Decider, s: State, t_perm: Term| {
                    match d.assert_term(&Term::is_non_negative(t_perm.clone()), None) {
                        Ok(true) => {}
                        Ok(false) => {
                            if let Some(stop) = d.record_failure(Failure::negative_permission(
                                perm.as_ref(),
                                pve,
                                span,
                            )) {
                                return stop;
                            }
                        }
                        Err(e) => return prover_failure(e),
                    }
                    let scaled = s.scale_perm(t_perm.clone());
                    if s.qp_predicates.iter().any(|p| p == predicate) {
                        qp::produce_singleton_predicate(
                            ctx,
                            d,
                            s,
                            predicate,
                            t_args.clone(),
                            scaled,
                            sf.clone(),
                            q,
                        )
                    } else {
                        let mut s2 = s;
                        s2.heap.add(Chunk::Predicate(PredicateChunk {
                            name: predicate.clone(),
                            args: t_args.clone(),
                            snap: sf.clone(),
                            perm: scaled,
                        }));
                        if ctx.config.enable_predicate_triggers_on_inhale {
                            let trigger_fn = Function::new(
                                format!("$Pred.trigger_{}", predicate),
                                vec![Sort::Snap],
                                Sort::Bool,
                            );
                            let app =
                                trigger_fn.apply(vec![Term::snap_args(t_args.clone())]);
                            if let Err(e) = d.assume(vec![app]) {
                                return prover_failure(e);
                            }
                        }
                        q(d, s2)
                    }
                };
                eval(ctx, d, s, perm, pve, &k_perm)
            };
            evals(ctx, d, s, args, pve, &k_args)
        }

        ExpKind::Forall { vars, body, .. } => {
            let span = a.span;
            let (cond, acc) = split_quantified_body(body);
            match &acc.kind {
                ExpKind::FieldAccessPredicate {
                    receiver,
                    field,
                    perm,
                } => qp::produce_quantified_field(
                    ctx, d, s, vars, cond, receiver, field, perm, sf, span, pve, q,
                ),
                ExpKind::PredicateAccessPredicate {
                    predicate,
                    args,
                    perm,
                } => {
                    let arg_refs: Vec<&Exp> = args.iter().collect();
                    qp::produce_quantified_predicate(
                        ctx, d, s, vars, cond, predicate, &arg_refs, perm, sf, span, pve, q,
                    )
                }
                _ => unreachable!("impure quantifier without accessibility predicate: {}", a),
            }
        }

        ExpKind::MagicWand { .. } => {
            let id = a.to_string();
            let mut bindings = Vec::new();
            for fv in a.free_vars() {
                match s.store.get(&fv.name) {
                    Some(t) => bindings.push(t.clone()),
                    None => panic!("unbound variable '{}' in magic wand", fv.name),
                }
            }
            let mut s2 = s;
            s2.heap.add(Chunk::MagicWand(MagicWandChunk {
                id,
                bindings,
                snap: sf,
            }));
            q(d, s2)
        }

        ExpKind::InhaleExhale { .. } => VerificationResult::failure(Failure::internal(
            "inhale-exhale assertion survived normalization",
        )),

        _ => unreachable!("produce reached unexpected impure assertion {}", a),
    }
}
