//! The consumer: exhaling assertions.
//!
//! Consuming an assertion checks its pure facts and removes its
//! permissions from the heap, producing a snapshot that abstracts the
//! removed values: conjunctions combine their parts' snapshots pairwise,
//! the else-branch of an implication contributes `unit`.
//!
//! Expressions inside the consumed assertion — receivers, permission
//! amounts, pure conjuncts — are evaluated against the heap as it stood
//! when the consume *started*, not against the partially-consumed running
//! heap: in `acc(x.f) && x.f == 3` the read of `x.f` is justified by the
//! permission that the same exhale is giving up.
//!
//! Failures map directly onto the user-facing error taxonomy: an
//! unprovable pure fact is `AssertionFalse`, a missing or too-small chunk
//! is `InsufficientPermission`, a possibly-negative amount is
//! `NegativePermission`, a non-injective quantified receiver is
//! `ReceiverNotInjective`, a missing wand chunk is
//! `MagicWandChunkNotFound`. All of them are non-fatal: each is recorded
//! on the decider and the traversal carries on with a placeholder
//! snapshot, so the remaining conjuncts and sibling branches still get
//! checked and one exhale can report several independent failures.
//!
//! The public entry points wrap the traversal in the decider's
//! consolidate-and-retry: a failed exhale gets one second chance against
//! the merged heap before anything is reported (the first attempt's
//! recorded failures are discarded and rediscovered against the merged
//! heap).

use crate::branch::branch;
use crate::chunks::Chunk;
use crate::decider::Decider;
use crate::eval::{eval, evals, EvalCont, EvalsCont};
use crate::produce::split_quantified_body;
use crate::qp;
use crate::result::{prover_failure, ErrorContext, Failure, VerificationResult};
use crate::state::{Heap, State};
use crate::Ctx;
use opaline_ast::{BinOp, Exp, ExpKind};
use opaline_base::Span;
use opaline_term::Term;

/// Continuation of a consume: receives the reduced state and the snapshot
/// of the consumed heap portion.
pub type ConsumeCont<'a> = &'a dyn Fn(&mut Decider, State, Term) -> VerificationResult;

/// Exhales one assertion, with one consolidate-and-retry on failure.
pub fn consume(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    a: &Exp,
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    let resolved = a.when_exhaling();
    let tlcs: Vec<Exp> = resolved
        .top_level_conjuncts()
        .into_iter()
        .cloned()
        .collect();
    d.try_or_fail(&s, &|d, s| {
        let eval_heap = s.heap.clone();
        consume_tlcs(ctx, d, s, &eval_heap, &tlcs, pve, q)
    })
}

/// Exhales a list of assertions (e.g. all postconditions) as one
/// conjunction, with one consolidate-and-retry on failure.
pub fn consumes(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    assertions: &[Exp],
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    let mut tlcs: Vec<Exp> = Vec::new();
    for a in assertions {
        let resolved = a.when_exhaling();
        tlcs.extend(resolved.top_level_conjuncts().into_iter().cloned());
    }
    d.try_or_fail(&s, &|d, s| {
        let eval_heap = s.heap.clone();
        consume_tlcs(ctx, d, s, &eval_heap, &tlcs, pve, q)
    })
}

/// Inner consume of a nested assertion (no extra retry wrapper).
fn consume_assertion(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    eval_heap: &Heap,
    a: &Exp,
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    let tlcs: Vec<Exp> = a.top_level_conjuncts().into_iter().cloned().collect();
    consume_tlcs(ctx, d, s, eval_heap, &tlcs, pve, q)
}

fn consume_tlcs(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    eval_heap: &Heap,
    tlcs: &[Exp],
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    match tlcs.split_first() {
        None => q(d, s, Term::Unit),
        Some((a, rest)) if rest.is_empty() => consume2(ctx, d, s, eval_heap, a, pve, q),
        Some((a, rest)) => {
            let k = move |d: &mut Decider, s: State, snap1: Term| {
                let k2 = |d: &mut Decider, s: State, snap2: Term| {
                    q(d, s, Term::combine(snap1.clone(), snap2))
                };
                consume_tlcs(ctx, d, s, eval_heap, rest, pve, &k2)
            };
            consume2(ctx, d, s, eval_heap, a, pve, &k)
        }
    }
}

/// Evaluates an expression against the consume-entry heap, then reinstates
/// the running heap before continuing.
fn eval_in(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    eval_heap: &Heap,
    e: &Exp,
    pve: &ErrorContext,
    q: EvalCont<'_>,
) -> VerificationResult {
    let running = s.heap.clone();
    let mut s_eval = s;
    s_eval.heap = eval_heap.clone();
    let k = |d: &mut Decider, s2: State, t: Term| {
        let mut s3 = s2;
        s3.heap = running.clone();
        q(d, s3, t)
    };
    eval(ctx, d, s_eval, e, pve, &k)
}

/// List version of [`eval_in`].
fn evals_in(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    eval_heap: &Heap,
    es: &[Exp],
    pve: &ErrorContext,
    q: EvalsCont<'_>,
) -> VerificationResult {
    let running = s.heap.clone();
    let mut s_eval = s;
    s_eval.heap = eval_heap.clone();
    let k = |d: &mut Decider, s2: State, ts: Vec<Term>| {
        let mut s3 = s2;
        s3.heap = running.clone();
        q(d, s3, ts)
    };
    evals(ctx, d, s_eval, es, pve, &k)
}

fn consume2(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    eval_heap: &Heap,
    a: &Exp,
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    if a.is_pure() {
        let span = a.span;
        let k = |d: &mut Decider, s: State, t: Term| {
            match d.assert_term(&t, None) {
                Ok(true) => {
                    // A proved fact is also a known fact from here on.
                    if let Err(e) = d.assume(vec![t.clone()]) {
                        return prover_failure(e);
                    }
                    q(d, s, Term::Unit)
                }
                // Recorded, then on to the remaining conjuncts. The failed
                // fact is NOT assumed; that could kill the path and mask
                // further failures.
                Ok(false) => d.report_failure(
                    Failure::assertion_false(a, pve, span),
                    |d| q(d, s, Term::Unit),
                ),
                Err(e) => prover_failure(e),
            }
        };
        return eval_in(ctx, d, s, eval_heap, a, pve, &k);
    }

    match &a.kind {
        ExpKind::Binary {
            op: BinOp::And, ..
        } => consume_assertion(ctx, d, s, eval_heap, a, pve, q),

        ExpKind::Binary {
            op: BinOp::Implies,
            left,
            right,
        } => {
            let k = |d: &mut Decider, s: State, t_cond: Term| {
                let f_then = |d: &mut Decider, s: State| {
                    consume_assertion(ctx, d, s, eval_heap, right, pve, q)
                };
                let f_else = |d: &mut Decider, s: State| q(d, s, Term::Unit);
                branch(d, &s, t_cond, &f_then, &f_else)
            };
            eval_in(ctx, d, s, eval_heap, left, pve, &k)
        }

        ExpKind::CondExp {
            cond,
            then_exp,
            else_exp,
        } => {
            let k = |d: &mut Decider, s: State, t_cond: Term| {
                let f_then = |d: &mut Decider, s: State| {
                    consume_assertion(ctx, d, s, eval_heap, then_exp, pve, q)
                };
                let f_else = |d: &mut Decider, s: State| {
                    consume_assertion(ctx, d, s, eval_heap, else_exp, pve, q)
                };
                branch(d, &s, t_cond, &f_then, &f_else)
            };
            eval_in(ctx, d, s, eval_heap, cond, pve, &k)
        }

        ExpKind::Let { var, bound, body } => {
            let outer_store = s.store.clone();
            let k = |d: &mut Decider, s: State, t_bound: Term| {
                let mut s_inner = s;
                s_inner.store = s_inner.store.extend(var.name.clone(), t_bound);
                let outer_store = outer_store.clone();
                let k_body = move |d: &mut Decider, s_body: State, snap: Term| {
                    let mut s_out = s_body;
                    s_out.store = outer_store.clone();
                    q(d, s_out, snap)
                };
                consume_assertion(ctx, d, s_inner, eval_heap, body, pve, &k_body)
            };
            eval_in(ctx, d, s, eval_heap, bound, pve, &k)
        }

        ExpKind::FieldAccessPredicate {
            receiver,
            field,
            perm,
        } => {
            let span = a.span;
            let access = format!("{}.{}", receiver, field);
            let k_rcv = |d: &mut Decider, s: State, t_rcv: Term| {
                let access = access.clone();
                let k_perm = move |d: &mut Decider, s: State, t_perm: Term| {
                    match d.assert_term(&Term::is_non_negative(t_perm.clone()), None) {
                        Ok(true) => {}
                        // A possibly-negative amount is recorded; the
                        // transfer itself is skipped.
                        Ok(false) => {
                            return d.report_failure(
                                Failure::negative_permission(perm.as_ref(), pve, span),
                                |d| q(d, s, Term::Unit),
                            )
                        }
                        Err(e) => return prover_failure(e),
                    }
                    let loss = s.scale_perm(t_perm.clone());
                    if s.qp_fields.iter().any(|f| f == field) {
                        qp::consume_singleton_field(
                            ctx,
                            d,
                            s,
                            field,
                            t_rcv.clone(),
                            loss,
                            &access,
                            span,
                            pve,
                            q,
                        )
                    } else {
                        consume_basic_field(
                            ctx,
                            d,
                            s,
                            field,
                            t_rcv.clone(),
                            loss,
                            &access,
                            span,
                            pve,
                            q,
                        )
                    }
                };
                eval_in(ctx, d, s, eval_heap, perm, pve, &k_perm)
            };
            eval_in(ctx, d, s, eval_heap, receiver, pve, &k_rcv)
        }

        ExpKind::PredicateAccessPredicate {
            predicate,
            args,
            perm,
        } => {
            let span = a.span;
            let k_args = |d: &mut Decider, s: State, t_args: Vec<Term>| {
                let k_perm = move |d: &mut Decider, s: State, t_perm: Term| {
                    match d.assert_term(&Term::is_non_negative(t_perm.clone()), None) {
                        Ok(true) => {}
                        Ok(false) => {
                            return d.report_failure(
                                Failure::negative_permission(perm.as_ref(), pve, span),
                                |d| q(d, s, Term::Unit),
                            )
                        }
                        Err(e) => return prover_failure(e),
                    }
                    let loss = s.scale_perm(t_perm.clone());
                    if s.qp_predicates.iter().any(|p| p == predicate) {
                        qp::consume_singleton_predicate(
                            ctx,
                            d,
                            s,
                            predicate,
                            t_args.clone(),
                            loss,
                            span,
                            pve,
                            q,
                        )
                    } else {
                        consume_basic_predicate(
                            ctx,
                            d,
                            s,
                            predicate,
                            &t_args,
                            loss,
                            span,
                            pve,
                            q,
                        )
                    }
                };
                eval_in(ctx, d, s, eval_heap, perm, pve, &k_perm)
            };
            evals_in(ctx, d, s, eval_heap, args, pve, &k_args)
        }

        ExpKind::Forall { vars, body, .. } => {
            let span = a.span;
            let (cond, acc) = split_quantified_body(body);
            match &acc.kind {
                ExpKind::FieldAccessPredicate {
                    receiver,
                    field,
                    perm,
                } => qp::consume_quantified_field(
                    ctx, d, s, vars, cond, receiver, field, perm, span, pve, q,
                ),
                ExpKind::PredicateAccessPredicate {
                    predicate,
                    args,
                    perm,
                } => {
                    let arg_refs: Vec<&Exp> = args.iter().collect();
                    qp::consume_quantified_predicate(
                        ctx, d, s, vars, cond, predicate, &arg_refs, perm, span, pve, q,
                    )
                }
                _ => unreachable!("impure quantifier without accessibility predicate: {}", a),
            }
        }

        ExpKind::MagicWand { .. } => {
            let span = a.span;
            let id = a.to_string();
            let mut bindings = Vec::new();
            for fv in a.free_vars() {
                match s.store.get(&fv.name) {
                    Some(t) => bindings.push(t.clone()),
                    None => panic!("unbound variable '{}' in magic wand", fv.name),
                }
            }
            let found = s.heap.chunks().iter().position(|c| match c {
                Chunk::MagicWand(w) => w.id == id && w.bindings == bindings,
                _ => false,
            });
            match found {
                Some(index) => {
                    let mut s2 = s;
                    let chunk = s2.heap.remove(index);
                    let snap = match &chunk {
                        Chunk::MagicWand(w) => w.snap.clone(),
                        _ => unreachable!(),
                    };
                    if s2.exhale_ext {
                        // Wand processing: the chunk moves into the used
                        // heap instead of vanishing.
                        match s2.reserve_heaps.last_mut() {
                            Some(top) => top.add(chunk),
                            None => panic!("exhale-ext without a reserve heap"),
                        }
                    }
                    q(d, s2, snap)
                }
                None => d.report_failure(
                    Failure::magic_wand_chunk_not_found(a, pve, span),
                    |d| q(d, s, Term::Unit),
                ),
            }
        }

        ExpKind::InhaleExhale { .. } => VerificationResult::failure(Failure::internal(
            "inhale-exhale assertion survived normalization",
        )),

        _ => unreachable!("consume reached unexpected impure assertion {}", a),
    }
}

#[allow(clippy::too_many_arguments)]
fn consume_basic_field(
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
    match d.with_chunk(&s.heap, field, std::slice::from_ref(&receiver)) {
        Ok(Some(index)) => {
            let chunk = match &s.heap.chunks()[index] {
                Chunk::Field(fc) => fc.clone(),
                other => unreachable!("field consume found non-field chunk {}", other),
            };
            if d.is_arp_term(&loss) {
                // Abstract read permission: constrain it strictly below the
                // chunk's amount rather than proving sufficiency.
                if let Err(e) =
                    d.assume(vec![Term::perm_less(loss.clone(), chunk.perm.clone())])
                {
                    return prover_failure(e);
                }
            } else {
                match d.assert_term(&Term::perm_at_most(loss.clone(), chunk.perm.clone()), None)
                {
                    Ok(true) => {}
                    // Recorded; the chunk is left untouched so later
                    // conjuncts still see the permissions that are there.
                    Ok(false) => {
                        return d.report_failure(
                            Failure::insufficient_permission(access, pve, span),
                            |d| q(d, s, Term::to_snap(chunk.value.clone())),
                        )
                    }
                    Err(e) => return prover_failure(e),
                }
            }
            let new_perm = Term::perm_minus(chunk.perm.clone(), loss);
            let depleted = match d.check(
                &Term::eq(new_perm.clone(), Term::NoPerm),
                Some(ctx.config.split_timeout),
            ) {
                Ok(b) => b,
                Err(e) => return prover_failure(e),
            };
            if depleted {
                s.heap.remove(index);
            } else {
                let updated = s.heap.chunks()[index].with_perm(new_perm);
                s.heap.set(index, updated);
            }
            q(d, s, Term::to_snap(chunk.value))
        }
        Ok(None) => d.report_failure(
            Failure::insufficient_permission(access, pve, span),
            |d| q(d, s, Term::Unit),
        ),
        Err(e) => prover_failure(e),
    }
}

#[allow(clippy::too_many_arguments)]
fn consume_basic_predicate(
    ctx: Ctx<'_>,
    d: &mut Decider,
    mut s: State,
    predicate: &str,
    args: &[Term],
    loss: Term,
    span: Span,
    pve: &ErrorContext,
    q: ConsumeCont<'_>,
) -> VerificationResult {
    let access = format!("{}(...)", predicate);
    match d.with_chunk(&s.heap, predicate, args) {
        Ok(Some(index)) => {
            let chunk = match &s.heap.chunks()[index] {
                Chunk::Predicate(pc) => pc.clone(),
                other => unreachable!("predicate consume found non-predicate chunk {}", other),
            };
            if d.is_arp_term(&loss) {
                if let Err(e) =
                    d.assume(vec![Term::perm_less(loss.clone(), chunk.perm.clone())])
                {
                    return prover_failure(e);
                }
            } else {
                match d.assert_term(&Term::perm_at_most(loss.clone(), chunk.perm.clone()), None)
                {
                    Ok(true) => {}
                    Ok(false) => {
                        return d.report_failure(
                            Failure::insufficient_permission(access, pve, span),
                            |d| q(d, s, chunk.snap.clone()),
                        )
                    }
                    Err(e) => return prover_failure(e),
                }
            }
            let new_perm = Term::perm_minus(chunk.perm.clone(), loss);
            let depleted = match d.check(
                &Term::eq(new_perm.clone(), Term::NoPerm),
                Some(ctx.config.split_timeout),
            ) {
                Ok(b) => b,
                Err(e) => return prover_failure(e),
            };
            if depleted {
                s.heap.remove(index);
            } else {
                let updated = s.heap.chunks()[index].with_perm(new_perm);
                s.heap.set(index, updated);
            }
            q(d, s, chunk.snap)
        }
        Ok(None) => d.report_failure(
            Failure::insufficient_permission(access, pve, span),
            |d| q(d, s, Term::Unit),
        ),
        Err(e) => prover_failure(e),
    }
}
