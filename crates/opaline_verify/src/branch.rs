//! Branching.
//!
//! Every conditional in an assertion or statement forks symbolic execution.
//! Each branch runs inside its own path-condition scope (and solver scope),
//! so its assumptions vanish before the sibling starts; the sibling also
//! receives its own copy of the state, which keeps the heap-restoration
//! contract trivial.
//!
//! Infeasible branches are pruned with a `check` before they run: a branch
//! whose condition contradicts the path conditions yields `Unreachable`
//! without executing its continuation.

use crate::decider::Decider;
use crate::result::{prover_failure, VerificationResult};
use crate::state::State;
use log::trace;
use opaline_term::Term;

/// Forks on `cond`. `f_then` runs with `cond` assumed, `f_else` with its
/// negation; results combine per [`VerificationResult::and_then`]. Ordinary
/// verification failures in one branch are recorded on the decider and do
/// not keep the sibling from running — only a fatal (internal) then-branch
/// result skips the else-branch.
pub fn branch(
    d: &mut Decider,
    s: &State,
    cond: Term,
    f_then: &dyn Fn(&mut Decider, State) -> VerificationResult,
    f_else: &dyn Fn(&mut Decider, State) -> VerificationResult,
) -> VerificationResult {
    let negated = Term::not(cond.clone());

    let then_unreachable = match d.check(&negated, None) {
        Ok(proved) => proved,
        Err(e) => return prover_failure(e),
    };
    let r_then = if then_unreachable {
        trace!("then-branch on {} is unreachable", cond);
        VerificationResult::Unreachable
    } else {
        d.in_scope(|d| {
            if let Err(e) = d.assume(vec![cond.clone()]) {
                return prover_failure(e);
            }
            f_then(d, s.clone())
        })
    };
    if r_then.is_fatal() {
        return r_then;
    }

    let else_unreachable = match d.check(&cond, None) {
        Ok(proved) => proved,
        Err(e) => return prover_failure(e),
    };
    let r_else = if else_unreachable {
        trace!("else-branch on {} is unreachable", cond);
        VerificationResult::Unreachable
    } else {
        d.in_scope(|d| {
            if let Err(e) = d.assume(vec![negated.clone()]) {
                return prover_failure(e);
            }
            f_else(d, s.clone())
        })
    };

    r_then.and_then(|| r_else)
}
