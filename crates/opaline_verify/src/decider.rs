//! The decider: the verifier's window onto the solver.
//!
//! Layered over the raw driver it adds:
//!
//! - a **path-condition stack** of scopes, pushed and popped in lock-step
//!   with the solver's `push`/`pop` (the depths must agree whenever the
//!   decider is at rest; debug-asserted),
//! - a **trivial-assertion cache**: `assert` and `check` answer `true`
//!   without a solver query when the goal is literally `true` or is a
//!   member of some path-condition scope,
//! - **fresh-symbol minting** for constants, functions, macros, and
//!   abstract read permissions,
//! - **chunk lookup** with syntactic-then-semantic argument matching,
//! - the **failure accumulator**: verification failures are non-fatal,
//!   recorded here via [`Decider::report_failure`] while execution keeps
//!   exploring remaining conjuncts and sibling branches, and drained into
//!   the method result afterwards, and
//! - [`Decider::try_or_fail`], the consolidate-and-retry wrapper around
//!   failing heap operations.

use crate::consolidate;
use crate::result::{prover_failure, Failure, VerificationResult};
use crate::state::{Heap, State};
use log::debug;
use opaline_smt::printer::Decl;
use opaline_smt::{Config, ProverResult, SatResult, SmtDriver};
use opaline_term::{Function, Sort, Term, TermVar};
use serde::Serialize;
use std::collections::HashSet;

/// Counters kept by the decider, reported after verification.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeciderStatistics {
    /// Goals discharged via `assert`.
    pub asserts: u32,
    /// Feasibility checks via `check`.
    pub checks: u32,
    /// Terms added to the path conditions.
    pub assumptions: u32,
    /// Asserts and checks answered from the trivial-assertion cache.
    pub cache_hits: u32,
}

/// The decider. One per verified method; owns its solver process.
pub struct Decider {
    config: Config,
    driver: SmtDriver,
    /// Path-condition scopes; the first scope is the method root and is
    /// never popped.
    scopes: Vec<Vec<Term>>,
    /// Names of minted abstract-read-permission variables; permission terms
    /// mentioning one are consumed in constrain mode.
    arp_vars: HashSet<String>,
    /// Verification failures recorded so far for the current method.
    failures: Vec<Failure>,
    stats: DeciderStatistics,
}

impl Decider {
    /// Starts a solver and returns a running decider.
    ///
    /// A missing solver binary surfaces as
    /// [`opaline_smt::ProverError::DependencyNotFound`] before any
    /// verification work happens.
    pub fn new(config: Config, verifier_id: &str) -> ProverResult<Self> {
        let mut driver = SmtDriver::new(config.clone(), verifier_id);
        driver.start()?;
        Ok(Self {
            config,
            driver,
            scopes: vec![Vec::new()],
            arp_vars: HashSet::new(),
            failures: Vec::new(),
            stats: DeciderStatistics::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn statistics(&self) -> &DeciderStatistics {
        &self.stats
    }

    /// Raw prover statistics from `(get-info :all-statistics)`.
    pub fn prover_statistics(
        &mut self,
    ) -> ProverResult<std::collections::BTreeMap<String, String>> {
        self.driver.statistics()
    }

    /// The model fetched after the most recent failed assertion, if the
    /// configuration asked for models.
    pub fn last_model(&self) -> Option<&str> {
        self.driver.last_model()
    }

    pub fn comment(&mut self, text: &str) {
        self.driver.comment(text);
    }

    pub fn declare(&mut self, decl: &Decl) -> ProverResult<()> {
        self.driver.declare(decl)
    }

    /// Ships a pre-rendered command (theory instantiations, preamble
    /// extensions).
    pub fn emit_raw(&mut self, cmd: &str) -> ProverResult<()> {
        self.driver.emit_raw(cmd)
    }

    // =========================================================================
    // Scopes and path conditions
    // =========================================================================

    pub fn push_scope(&mut self) -> ProverResult<()> {
        self.scopes.push(Vec::new());
        self.driver.push(1)?;
        self.debug_check_sync();
        Ok(())
    }

    pub fn pop_scope(&mut self) -> ProverResult<()> {
        debug_assert!(self.scopes.len() > 1, "popping the method root scope");
        self.scopes.pop();
        self.driver.pop(1)?;
        self.debug_check_sync();
        Ok(())
    }

    fn debug_check_sync(&self) {
        debug_assert_eq!(
            self.scopes.len() as u32 - 1,
            self.driver.scope_depth(),
            "path-condition depth out of sync with the solver"
        );
    }

    /// Runs `body` inside a fresh scope; the scope is popped on every exit
    /// path.
    pub fn in_scope(
        &mut self,
        body: impl FnOnce(&mut Decider) -> VerificationResult,
    ) -> VerificationResult {
        if let Err(e) = self.push_scope() {
            return prover_failure(e);
        }
        let result = body(self);
        match self.pop_scope() {
            Ok(()) => result,
            // A broken dialog outranks the body's result unless the body
            // already failed.
            Err(e) if !result.is_fatal() => prover_failure(e),
            Err(_) => result,
        }
    }

    /// Structural membership of `t` in any path-condition scope.
    pub fn pc_contains(&self, t: &Term) -> bool {
        self.scopes.iter().any(|scope| scope.contains(t))
    }

    /// All current path conditions, innermost scope last.
    pub fn path_conditions(&self) -> Vec<&Term> {
        self.scopes.iter().flatten().collect()
    }

    // =========================================================================
    // Assume / assert / check
    // =========================================================================

    /// Adds facts to the current scope and the solver.
    ///
    /// Trivially true terms are filtered out before they reach either.
    pub fn assume(&mut self, terms: Vec<Term>) -> ProverResult<()> {
        for t in terms {
            if t == Term::True || self.pc_contains(&t) {
                continue;
            }
            self.driver.assume(&t)?;
            self.stats.assumptions += 1;
            if let Some(scope) = self.scopes.last_mut() {
                scope.push(t);
            }
        }
        Ok(())
    }

    /// Attempts to prove `t` under the current path conditions.
    ///
    /// Cache: answers `true` without the solver when `t` is literally
    /// `true` or a member of the path conditions (both imply provability).
    pub fn assert_term(&mut self, t: &Term, timeout: Option<u32>) -> ProverResult<bool> {
        self.stats.asserts += 1;
        if *t == Term::True || self.pc_contains(t) {
            self.stats.cache_hits += 1;
            return Ok(true);
        }
        self.driver.assert_goal(t, timeout)
    }

    /// Like [`Self::assert_term`] but with no side effects beyond the SMT
    /// check itself: always push-pop, never a model fetch, nothing cached
    /// on the solver.
    pub fn check(&mut self, t: &Term, timeout: Option<u32>) -> ProverResult<bool> {
        self.stats.checks += 1;
        if *t == Term::True || self.pc_contains(t) {
            self.stats.cache_hits += 1;
            return Ok(true);
        }
        self.driver.push(1)?;
        self.driver.assume(&Term::not(t.clone()))?;
        let result = self.driver.check(timeout)?;
        self.driver.pop(1)?;
        Ok(result == SatResult::Unsat)
    }

    // =========================================================================
    // Fresh symbols
    // =========================================================================

    /// Mints and declares a fresh constant.
    pub fn fresh(&mut self, prefix: &str, sort: Sort) -> ProverResult<TermVar> {
        let name = self.driver.fresh_name(prefix);
        let var = TermVar::new(name.clone(), sort.clone());
        self.driver.declare(&Decl::Const { name, sort })?;
        Ok(var)
    }

    /// Mints a fresh name without declaring anything; used for bound
    /// variables (quantifier codomains) that never reach the solver as
    /// constants.
    pub fn fresh_bound_name(&mut self, prefix: &str) -> String {
        self.driver.fresh_name(prefix)
    }

    /// Mints and declares a fresh uninterpreted function.
    pub fn fresh_function(
        &mut self,
        prefix: &str,
        arg_sorts: Vec<Sort>,
        result_sort: Sort,
    ) -> ProverResult<Function> {
        self.driver.fresh_function(prefix, arg_sorts, result_sort)
    }

    /// Defines a fresh solver-side macro and returns its function symbol.
    ///
    /// The split algorithm uses macros for its per-chunk `pTaken` terms so
    /// the solver input stays tractable.
    pub fn define_macro(
        &mut self,
        prefix: &str,
        params: Vec<TermVar>,
        result: Sort,
        body: Term,
    ) -> ProverResult<Function> {
        let name = self.driver.fresh_name(prefix);
        let arg_sorts: Vec<Sort> = params.iter().map(|p| p.sort.clone()).collect();
        self.driver.declare(&Decl::DefineFun {
            name: name.clone(),
            params,
            result: result.clone(),
            body,
        })?;
        Ok(Function::new(name, arg_sorts, result))
    }

    /// Mints an abstract read permission: a fresh permission variable with
    /// the constraint `none < v < upper` (upper defaults to `write`).
    pub fn fresh_arp(&mut self, upper: Option<Term>) -> ProverResult<(TermVar, Term)> {
        let var = self.fresh("arp", Sort::Perm)?;
        let v = Term::Var(var.clone());
        let upper = upper.unwrap_or(Term::FullPerm);
        let constraint = Term::and(
            Term::perm_less(Term::NoPerm, v.clone()),
            Term::perm_less(v, upper),
        );
        self.arp_vars.insert(var.name.clone());
        Ok((var, constraint))
    }

    /// Whether a permission term mentions an abstract read permission; such
    /// amounts are consumed in constrain mode.
    pub fn is_arp_term(&self, t: &Term) -> bool {
        let fvs = t.free_var_names();
        self.arp_vars.iter().any(|a| fvs.contains(a))
    }

    // =========================================================================
    // Chunk lookup
    // =========================================================================

    /// Finds a basic chunk for `name` whose arguments equal `args`,
    /// syntactically if possible, else by letting the solver prove the
    /// equalities (which are then assumed).
    pub fn with_chunk(
        &mut self,
        heap: &Heap,
        name: &str,
        args: &[Term],
    ) -> ProverResult<Option<usize>> {
        let mut candidates = Vec::new();
        for (i, chunk) in heap.chunks().iter().enumerate() {
            if !matches!(
                chunk,
                crate::chunks::Chunk::Field(_) | crate::chunks::Chunk::Predicate(_)
            ) {
                continue;
            }
            let id = chunk.id();
            if id.name != name || id.args.len() != args.len() {
                continue;
            }
            if id.args.as_slice() == args {
                return Ok(Some(i));
            }
            candidates.push((i, id.args));
        }

        for (i, chunk_args) in candidates {
            let eqs = Term::and_all(
                chunk_args
                    .iter()
                    .zip(args.iter())
                    .map(|(a, b)| Term::eq(a.clone(), b.clone()))
                    .collect(),
            );
            if self.check(&eqs, None)? {
                self.assume(vec![eqs])?;
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    // =========================================================================
    // Failure accumulation
    // =========================================================================

    /// Records a verification failure at a site that falls through inline.
    ///
    /// Verification failures are non-fatal: the failure is appended to the
    /// accumulator and the caller carries on, so remaining conjuncts and
    /// sibling branches can still surface their own failures. Returns
    /// `Some(result)` when the caller must stop instead: on a dead path
    /// (inconsistent path conditions) nothing is recorded — chunk lookups
    /// fail structurally there, and a phantom error from an unreachable
    /// branch would mislead — and a broken solver dialog stays fatal.
    pub fn record_failure(&mut self, failure: Failure) -> Option<VerificationResult> {
        match self.check(&Term::False, None) {
            Ok(true) => Some(VerificationResult::Unreachable),
            Ok(false) => {
                debug!("recording verification failure: {}", failure);
                self.failures.push(failure);
                None
            }
            Err(e) => Some(prover_failure(e)),
        }
    }

    /// Records a verification failure and continues with `and_then`; see
    /// [`Self::record_failure`] for the dead-path behavior.
    pub fn report_failure(
        &mut self,
        failure: Failure,
        and_then: impl FnOnce(&mut Decider) -> VerificationResult,
    ) -> VerificationResult {
        match self.record_failure(failure) {
            Some(stop) => stop,
            None => and_then(self),
        }
    }

    /// The verification failures recorded so far.
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Drains the accumulator, e.g. into a method result.
    pub fn take_failures(&mut self) -> Vec<Failure> {
        std::mem::take(&mut self.failures)
    }

    // =========================================================================
    // Retry wrapper
    // =========================================================================

    /// Runs `block` once; if it recorded failures (or failed fatally),
    /// consolidates the heap and retries once with `retrying` set. The
    /// first attempt's recorded failures are discarded — whatever is real
    /// is rediscovered against the merged heap — and the caller's state is
    /// passed by value both times, so on a persistent failure any sibling
    /// branch still starts from the entry heap.
    pub fn try_or_fail(
        &mut self,
        state: &State,
        block: &dyn Fn(&mut Decider, State) -> VerificationResult,
    ) -> VerificationResult {
        let mark = self.failures.len();
        let first = block(self, state.clone());
        let clean = self.failures.len() == mark && !first.is_fatal();
        if clean || state.retrying {
            return first;
        }
        debug!("operation failed; consolidating the heap and retrying");
        self.failures.truncate(mark);
        let mut retry = state.clone();
        retry.heap = match consolidate::consolidate(self, retry.heap) {
            Ok(heap) => heap,
            Err(e) => return prover_failure(e),
        };
        retry.retrying = true;
        block(self, retry)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Resets the solver and path conditions, keeping the process alive.
    pub fn reset(&mut self) -> ProverResult<()> {
        self.driver.reset()?;
        self.scopes = vec![Vec::new()];
        self.arp_vars.clear();
        Ok(())
    }

    /// Shuts the solver down.
    pub fn stop(&mut self) -> ProverResult<()> {
        self.driver.stop()
    }
}
