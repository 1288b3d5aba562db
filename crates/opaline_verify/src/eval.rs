//! Expression evaluation.
//!
//! Evaluation turns program expressions into terms under the current state.
//! The pure, heap-free fragment is delegated wholesale to the
//! [`Translator`] with the store as bindings — evaluating it cannot branch
//! or touch the heap, so translation *is* evaluation there.
//!
//! What remains here is everything stateful:
//!
//! - field reads, which look up a chunk and require positive permission,
//! - wildcard permissions, which mint a fresh abstract read permission,
//! - conditionals with heap-dependent arms, which branch,
//! - composite expressions whose children are heap-dependent.
//!
//! Evaluation never changes the heap; it may extend the path conditions
//! (chunk-argument equalities, ARP constraints).

use crate::branch::branch;
use crate::chunks::Chunk;
use crate::decider::Decider;
use crate::qp;
use crate::result::{prover_failure, ErrorContext, Failure, VerificationResult};
use crate::state::State;
use crate::translator::{apply_binop, apply_unop, Translator};
use crate::Ctx;
use opaline_ast::{Exp, ExpKind};
use opaline_term::Term;

/// Continuation receiving the value of one expression.
pub type EvalCont<'a> = &'a dyn Fn(&mut Decider, State, Term) -> VerificationResult;

/// Continuation receiving the values of a list of expressions.
pub type EvalsCont<'a> = &'a dyn Fn(&mut Decider, State, Vec<Term>) -> VerificationResult;

/// Evaluates `e` and passes the resulting term to `q`.
pub fn eval(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    e: &Exp,
    pve: &ErrorContext,
    q: EvalCont<'_>,
) -> VerificationResult {
    if !e.is_heap_dependent() && !e.contains_wildcard() {
        let bindings = s.store.pairs().to_vec();
        let term = Translator::with_bindings(ctx.program, bindings).translate(e);
        return q(d, s, term);
    }

    match &e.kind {
        ExpKind::Unary { op, expr } => {
            let op = *op;
            let k = |d: &mut Decider, s: State, t: Term| q(d, s, apply_unop(op, t));
            eval(ctx, d, s, expr, pve, &k)
        }

        ExpKind::Binary { op, left, right } => {
            let op = *op;
            let k1 = |d: &mut Decider, s: State, l: Term| {
                let k2 = |d: &mut Decider, s: State, r: Term| {
                    q(d, s, apply_binop(op, l.clone(), r))
                };
                eval(ctx, d, s, right, pve, &k2)
            };
            eval(ctx, d, s, left, pve, &k1)
        }

        ExpKind::CondExp {
            cond,
            then_exp,
            else_exp,
        } => {
            // Heap-dependent arms must only be evaluated under their guard.
            let k_cond = |d: &mut Decider, s: State, t_cond: Term| {
                let f_then = |d: &mut Decider, s: State| eval(ctx, d, s, then_exp, pve, q);
                let f_else = |d: &mut Decider, s: State| eval(ctx, d, s, else_exp, pve, q);
                branch(d, &s, t_cond, &f_then, &f_else)
            };
            eval(ctx, d, s, cond, pve, &k_cond)
        }

        ExpKind::Let { var, bound, body } => {
            let outer_store = s.store.clone();
            let k_bound = |d: &mut Decider, s: State, t_bound: Term| {
                let mut s_inner = s;
                s_inner.store = s_inner.store.extend(var.name.clone(), t_bound);
                let outer_store = outer_store.clone();
                let k_body = move |d: &mut Decider, s_body: State, t: Term| {
                    let mut s_out = s_body;
                    s_out.store = outer_store.clone();
                    q(d, s_out, t)
                };
                eval(ctx, d, s_inner, body, pve, &k_body)
            };
            eval(ctx, d, s, bound, pve, &k_bound)
        }

        ExpKind::FieldAccess { receiver, field } => {
            let span = e.span;
            let access = e.to_string();
            let k = |d: &mut Decider, s: State, t_rcv: Term| {
                field_lookup(ctx, d, s, field, t_rcv, &access, span, pve, q)
            };
            eval(ctx, d, s, receiver, pve, &k)
        }

        ExpKind::WildcardPerm => {
            let (var, constraint) = match d.fresh_arp(None) {
                Ok(pair) => pair,
                Err(e) => return prover_failure(e),
            };
            if let Err(e) = d.assume(vec![constraint]) {
                return prover_failure(e);
            }
            q(d, s, Term::Var(var))
        }

        ExpKind::FractionalPerm { left, right } => {
            let k1 = |d: &mut Decider, s: State, l: Term| {
                let k2 = |d: &mut Decider, s: State, r: Term| {
                    q(d, s, Term::fraction_perm(l.clone(), r))
                };
                eval(ctx, d, s, right, pve, &k2)
            };
            eval(ctx, d, s, left, pve, &k1)
        }

        ExpKind::FuncApp { function, args } => {
            let decl = ctx
                .program
                .find_domain_func(function)
                .unwrap_or_else(|| panic!("unknown domain function '{}'", function));
            let f = opaline_term::Function::new(
                decl.name.clone(),
                decl.formal_args
                    .iter()
                    .map(crate::translator::sort_of_type)
                    .collect(),
                crate::translator::sort_of_type(&decl.return_type),
            );
            let k = move |d: &mut Decider, s: State, targs: Vec<Term>| {
                q(
                    d,
                    s,
                    Term::App {
                        function: f.clone(),
                        args: targs,
                    },
                )
            };
            evals(ctx, d, s, args, pve, &k)
        }

        ExpKind::SeqLength(inner) => {
            let k = |d: &mut Decider, s: State, t: Term| q(d, s, Term::SeqLength(Box::new(t)));
            eval(ctx, d, s, inner, pve, &k)
        }
        ExpKind::SeqIndex { seq, idx } => {
            let k1 = |d: &mut Decider, s: State, t_seq: Term| {
                let k2 = |d: &mut Decider, s: State, t_idx: Term| {
                    q(d, s, Term::seq_at(t_seq.clone(), t_idx))
                };
                eval(ctx, d, s, idx, pve, &k2)
            };
            eval(ctx, d, s, seq, pve, &k1)
        }
        ExpKind::SetCardinality(inner) => {
            let k = |d: &mut Decider, s: State, t: Term| {
                let card = match t.sort() {
                    opaline_term::Sort::Multiset(_) => Term::MultisetCard(Box::new(t)),
                    _ => Term::SetCard(Box::new(t)),
                };
                q(d, s, card)
            };
            eval(ctx, d, s, inner, pve, &k)
        }

        ExpKind::ExplicitSeq(es) => {
            let k = |d: &mut Decider, s: State, ts: Vec<Term>| {
                let mut it = ts.into_iter();
                let first = it.next().expect("explicit sequence literal is non-empty");
                let mut acc = Term::SeqSingleton(Box::new(first));
                for t in it {
                    acc = Term::SeqAppend(
                        Box::new(acc),
                        Box::new(Term::SeqSingleton(Box::new(t))),
                    );
                }
                q(d, s, acc)
            };
            evals(ctx, d, s, es, pve, &k)
        }
        ExpKind::ExplicitSet(es) => {
            let k = |d: &mut Decider, s: State, ts: Vec<Term>| {
                let mut it = ts.into_iter();
                let first = it.next().expect("explicit set literal is non-empty");
                let mut acc = Term::SetSingleton(Box::new(first));
                for t in it {
                    acc = Term::SetAdd(Box::new(acc), Box::new(t));
                }
                q(d, s, acc)
            };
            evals(ctx, d, s, es, pve, &k)
        }

        ExpKind::Forall { .. } | ExpKind::Exists { .. } => {
            // A pure quantifier reading the heap would need quantified
            // lookups; the front end desugars those before verification.
            panic!(
                "heap-dependent quantifier {} cannot be evaluated directly",
                e
            )
        }

        ExpKind::FieldAccessPredicate { .. }
        | ExpKind::PredicateAccessPredicate { .. }
        | ExpKind::MagicWand { .. }
        | ExpKind::InhaleExhale { .. } => {
            panic!("assertion {} evaluated as an expression", e)
        }

        // Everything else is heap-free and was handled by the translator.
        _ => unreachable!("non-heap-dependent expression fell through: {}", e),
    }
}

/// Evaluates a list of expressions left to right.
pub fn evals(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    es: &[Exp],
    pve: &ErrorContext,
    q: EvalsCont<'_>,
) -> VerificationResult {
    evals_rec(ctx, d, s, es, Vec::new(), pve, q)
}

fn evals_rec(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    rest: &[Exp],
    acc: Vec<Term>,
    pve: &ErrorContext,
    q: EvalsCont<'_>,
) -> VerificationResult {
    match rest.split_first() {
        None => q(d, s, acc),
        Some((e, tail)) => {
            let k = move |d: &mut Decider, s: State, t: Term| {
                let mut acc2 = acc.clone();
                acc2.push(t);
                evals_rec(ctx, d, s, tail, acc2, pve, q)
            };
            eval(ctx, d, s, e, pve, &k)
        }
    }
}

/// Looks a field value up in the heap; requires provably positive
/// permission.
#[allow(clippy::too_many_arguments)]
fn field_lookup(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    field: &str,
    receiver: Term,
    access: &str,
    span: opaline_base::Span,
    pve: &ErrorContext,
    q: EvalCont<'_>,
) -> VerificationResult {
    if s.qp_fields.iter().any(|f| f == field) {
        return qp::lookup_field(ctx, d, s, field, receiver, access, span, pve, q);
    }

    match d.with_chunk(&s.heap, field, &[receiver.clone()]) {
        Ok(Some(index)) => {
            let chunk = match &s.heap.chunks()[index] {
                Chunk::Field(fc) => fc.clone(),
                other => unreachable!("field lookup found non-field chunk {}", other),
            };
            match d.assert_term(&Term::is_positive(chunk.perm.clone()), None) {
                Ok(true) => q(d, s, chunk.value),
                // Recorded; the chunk's value still stands in so the
                // surrounding expression can be evaluated.
                Ok(false) => d.report_failure(
                    Failure::insufficient_permission(access, pve, span),
                    |d| q(d, s, chunk.value.clone()),
                ),
                Err(e) => prover_failure(e),
            }
        }
        // No chunk at all: record and continue with an opaque placeholder
        // of the field's sort.
        Ok(None) => {
            let value_sort = ctx
                .program
                .find_field(field)
                .map(|f| crate::translator::sort_of_type(&f.typ))
                .unwrap_or_else(|| panic!("unknown field '{}'", field));
            d.report_failure(
                Failure::insufficient_permission(access, pve, span),
                |d| q(d, s, Term::from_snap(Term::Unit, value_sort)),
            )
        }
        Err(e) => prover_failure(e),
    }
}
