//! The per-method verification runner.
//!
//! Each method is verified independently with its own decider and solver
//! process: declare the program's sorts, fields, predicates, and domains;
//! havoc the formal arguments; produce the preconditions under a fresh
//! snapshot; execute the body; consume the postconditions.
//!
//! The statement language is small by design — loops arrive from the front
//! end already encoded with invariants (exhale, havoc, inhale), so the
//! executor never iterates.

use crate::consume::{consume, consumes};
use crate::decider::{Decider, DeciderStatistics};
use crate::eval::eval;
use crate::produce::{produce, produces};
use crate::result::{prover_failure, ErrorContext, Failure, VerificationResult};
use crate::state::{State, Store};
use crate::translator::{sort_of_type, Translator};
use crate::Ctx;
use log::{debug, info};
use opaline_ast::{Method, Program, Stmt, StmtKind, Type};
use opaline_smt::printer::Decl;
use opaline_smt::{preamble, Config, ProverError};
use opaline_term::{Function, Sort, Term};
use std::collections::HashSet;
use std::time::Instant;

/// The outcome of verifying one method.
///
/// Verification failures are non-fatal and accumulated, so one method can
/// carry several independent failures — one per failed conjunct or branch.
#[derive(Debug)]
pub struct MethodResult {
    pub method: String,
    pub failures: Vec<Failure>,
    pub statistics: DeciderStatistics,
    pub duration_ms: u128,
}

impl MethodResult {
    pub fn verified(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The outcome of verifying a whole program.
#[derive(Debug, Default)]
pub struct VerificationSummary {
    pub methods: Vec<MethodResult>,
}

impl VerificationSummary {
    pub fn verified(&self) -> bool {
        self.methods.iter().all(MethodResult::verified)
    }

    /// Process exit code: zero iff every method verified.
    pub fn exit_code(&self) -> i32 {
        if self.verified() {
            0
        } else {
            1
        }
    }

    /// All failures across all methods, in method order.
    pub fn failures(&self) -> Vec<&Failure> {
        self.methods
            .iter()
            .flat_map(|m| m.failures.iter())
            .collect()
    }
}

/// Verifies programs, one method at a time.
pub struct Verifier {
    config: Config,
}

impl Verifier {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Verifies every method of the program.
    ///
    /// A missing solver binary aborts the run with an error; any other
    /// solver trouble is confined to the method it occurred in.
    pub fn verify(&self, program: &Program) -> Result<VerificationSummary, ProverError> {
        let mut summary = VerificationSummary::default();
        for (index, method) in program.methods.iter().enumerate() {
            let id = format!("{:02}_{}", index, method.name);
            let started = Instant::now();
            let (failures, statistics) = self.verify_method(program, method, &id)?;
            let duration_ms = started.elapsed().as_millis();
            if failures.is_empty() {
                info!("method {}: verified ({} ms)", method.name, duration_ms);
            } else {
                info!(
                    "method {}: {} failure(s) ({} ms)",
                    method.name,
                    failures.len(),
                    duration_ms
                );
                for failure in &failures {
                    info!("  {}", failure);
                }
            }
            if let Ok(json) = serde_json::to_string(&statistics) {
                debug!("method {} decider statistics: {}", method.name, json);
            }
            summary.methods.push(MethodResult {
                method: method.name.clone(),
                failures,
                statistics,
                duration_ms,
            });
        }
        Ok(summary)
    }

    fn verify_method(
        &self,
        program: &Program,
        method: &Method,
        id: &str,
    ) -> Result<(Vec<Failure>, DeciderStatistics), ProverError> {
        let mut decider = match Decider::new(self.config.clone(), id) {
            Ok(d) => d,
            // The solver itself is missing: not a per-method failure.
            Err(e @ ProverError::DependencyNotFound { .. }) => return Err(e),
            Err(e) => {
                return Ok((
                    vec![Failure::internal(e.to_string())],
                    DeciderStatistics::default(),
                ));
            }
        };
        decider.comment(&format!("verifying method {}", method.name));

        let ctx = Ctx::new(program, &self.config);
        let result = match declare_program(ctx, &mut decider) {
            Ok(()) => self.run_method(ctx, &mut decider, method),
            Err(e) => prover_failure(e),
        };

        let mut failures = decider.take_failures();
        // A fully infeasible method is vacuously verified; a fatal result
        // joins the accumulated failures.
        if let VerificationResult::Failure(f) = result {
            failures.push(*f);
        }

        let statistics = decider.statistics().clone();
        if let Err(e) = decider.stop() {
            debug!("solver shutdown after {}: {}", method.name, e);
        }
        Ok((failures, statistics))
    }

    fn run_method(
        &self,
        ctx: Ctx<'_>,
        d: &mut Decider,
        method: &Method,
    ) -> VerificationResult {
        // Havoc the formal arguments.
        let mut store = Store::new();
        for arg in &method.formal_args {
            let var = match d.fresh(&arg.name, sort_of_type(&arg.typ)) {
                Ok(v) => v,
                Err(e) => return prover_failure(e),
            };
            store = store.extend(arg.name.clone(), Term::Var(var));
        }
        let state = State::new(store);

        let sf = match d.fresh("sf", Sort::Snap) {
            Ok(v) => Term::Var(v),
            Err(e) => return prover_failure(e),
        };

        let pve_pre = ErrorContext::new(
            format!("precondition of {} might not be well-formed", method.name),
            method.span,
        );
        let pve_post = ErrorContext::new(
            format!("postcondition of {} might not hold", method.name),
            method.span,
        );

        produces(ctx, d, state, sf, &method.pres, &pve_pre, &|d, s| {
            let exec_then_post = |d: &mut Decider, s: State| {
                consumes(ctx, d, s, &method.posts, &pve_post, &|_d, _s, _snap| {
                    VerificationResult::Success
                })
            };
            match &method.body {
                Some(body) => exec(ctx, d, s, body, &exec_then_post),
                None => exec_then_post(d, s),
            }
        })
    }
}

/// Continuation of a statement execution.
type ExecCont<'a> = &'a dyn Fn(&mut Decider, State) -> VerificationResult;

fn exec(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    stmt: &Stmt,
    q: ExecCont<'_>,
) -> VerificationResult {
    let pve = ErrorContext::new(
        match &stmt.kind {
            StmtKind::Inhale(_) => "inhaled assertion might not be well-formed",
            StmtKind::Exhale(_) => "exhale might fail",
            StmtKind::Assert(_) => "assert might fail",
            _ => "statement might fail",
        },
        stmt.span,
    );
    match &stmt.kind {
        StmtKind::Seqn { decls, stmts } => {
            let mut s2 = s;
            for decl in decls {
                let var = match d.fresh(&decl.name, sort_of_type(&decl.typ)) {
                    Ok(v) => v,
                    Err(e) => return prover_failure(e),
                };
                s2.store = s2.store.extend(decl.name.clone(), Term::Var(var));
            }
            exec_stmts(ctx, d, s2, stmts, q)
        }

        StmtKind::LocalVarAssign { name, rhs } => {
            let k = |d: &mut Decider, s: State, t: Term| {
                let mut s2 = s;
                s2.store = s2.store.extend(name.clone(), t);
                q(d, s2)
            };
            eval(ctx, d, s, rhs, &pve, &k)
        }

        StmtKind::Inhale(a) => {
            let sf = match d.fresh("sf", Sort::Snap) {
                Ok(v) => Term::Var(v),
                Err(e) => return prover_failure(e),
            };
            produce(ctx, d, s, sf, a, &pve, q)
        }

        StmtKind::Exhale(a) => consume(ctx, d, s, a, &pve, &|d, s, _snap| q(d, s)),

        StmtKind::Assert(a) => {
            // Assert checks without giving anything up: consume against a
            // scratch copy, continue with the entry state.
            let s_entry = s.clone();
            consume(ctx, d, s, a, &pve, &|d, _s, _snap| q(d, s_entry.clone()))
        }

        StmtKind::If {
            cond,
            then_body,
            else_body,
        } => {
            let k = |d: &mut Decider, s: State, t_cond: Term| {
                let f_then = |d: &mut Decider, s: State| exec(ctx, d, s, then_body, q);
                let f_else = |d: &mut Decider, s: State| match else_body {
                    Some(body) => exec(ctx, d, s, body, q),
                    None => q(d, s),
                };
                crate::branch::branch(d, &s, t_cond, &f_then, &f_else)
            };
            eval(ctx, d, s, cond, &pve, &k)
        }
    }
}

fn exec_stmts(
    ctx: Ctx<'_>,
    d: &mut Decider,
    s: State,
    stmts: &[Stmt],
    q: ExecCont<'_>,
) -> VerificationResult {
    match stmts.split_first() {
        None => q(d, s),
        Some((stmt, rest)) => {
            let k = move |d: &mut Decider, s: State| exec_stmts(ctx, d, s, rest, q);
            exec(ctx, d, s, stmt, &k)
        }
    }
}

// =============================================================================
// Program declarations
// =============================================================================

/// Collects every sort a type mentions, inner sorts first.
fn add_type_sorts(sort: &Sort, out: &mut Vec<Sort>) {
    match sort {
        Sort::Seq(e) | Sort::Set(e) | Sort::Multiset(e) => {
            add_type_sorts(e, out);
            if !out.contains(sort) {
                out.push(sort.clone());
            }
        }
        Sort::UserSort(_) => {
            if !out.contains(sort) {
                out.push(sort.clone());
            }
        }
        _ => {}
    }
}

/// Declares the program's sorts, theory instantiations, fields, predicates,
/// and domains, and assumes the translated domain axioms.
fn declare_program(ctx: Ctx<'_>, d: &mut Decider) -> Result<(), ProverError> {
    let program = ctx.program;

    // Sorts mentioned anywhere in the program, inner-first.
    let mut sorts: Vec<Sort> = Vec::new();
    let mut note_type = |typ: &Type, sorts: &mut Vec<Sort>| {
        add_type_sorts(&sort_of_type(typ), sorts);
    };
    for field in &program.fields {
        note_type(&field.typ, &mut sorts);
    }
    for predicate in &program.predicates {
        for arg in &predicate.formal_args {
            note_type(&arg.typ, &mut sorts);
        }
    }
    for method in &program.methods {
        for arg in &method.formal_args {
            note_type(&arg.typ, &mut sorts);
        }
    }
    for domain in &program.domains {
        for func in &domain.functions {
            for arg in &func.formal_args {
                note_type(arg, &mut sorts);
            }
            note_type(&func.return_type, &mut sorts);
        }
    }

    // Uninterpreted domain sorts come first; collection instantiations may
    // mention them.
    for sort in sorts.iter().filter(|s| matches!(s, Sort::UserSort(_))) {
        d.declare(&Decl::Sort(sort.clone()))?;
    }

    // The FVF domain codomain is always needed; predicate domains live in
    // sets of snapshots.
    let mut instantiated: HashSet<String> = HashSet::new();
    let mut instantiate = |d: &mut Decider, sort: &Sort| -> Result<(), ProverError> {
        if !instantiated.insert(sort.id()) {
            return Ok(());
        }
        let cmds = match sort {
            Sort::Set(e) => preamble::set_axioms(e),
            Sort::Seq(e) => preamble::seq_axioms(e),
            Sort::Multiset(e) => preamble::multiset_axioms(e),
            _ => return Ok(()),
        };
        for cmd in cmds {
            d.emit_raw(&cmd)?;
        }
        Ok(())
    };
    instantiate(d, &Sort::set(Sort::Ref))?;
    if !program.predicates.is_empty() {
        instantiate(d, &Sort::set(Sort::Snap))?;
    }
    for sort in &sorts {
        instantiate(d, sort)?;
    }

    // Snapshot wrappers beyond the base sorts of the static preamble.
    let mut wrapped: HashSet<String> = HashSet::new();
    for base in ["Int", "Bool", "$Ref", "$Perm"] {
        wrapped.insert(base.to_string());
    }
    let mut wrap = |d: &mut Decider, sort: &Sort| -> Result<(), ProverError> {
        if !wrapped.insert(sort.id()) {
            return Ok(());
        }
        for cmd in preamble::sort_wrappers(sort) {
            d.emit_raw(&cmd)?;
        }
        Ok(())
    };

    // Fields: FVF sorts, lookup/domain functions, wrappers.
    let mut fvf_sorts: HashSet<String> = HashSet::new();
    for field in &program.fields {
        let value_sort = sort_of_type(&field.typ);
        let fvf = Sort::fvf(value_sort.clone());
        if fvf_sorts.insert(fvf.id()) {
            d.emit_raw(&preamble::fvf_sort_decl(&value_sort))?;
        }
        for cmd in preamble::fvf_decls(&field.name, &value_sort) {
            d.emit_raw(&cmd)?;
        }
        wrap(d, &value_sort)?;
        wrap(d, &fvf)?;
    }

    // Predicates: PSF sorts and functions, wrappers for argument sorts.
    for predicate in &program.predicates {
        for cmd in preamble::psf_decls(&predicate.name) {
            d.emit_raw(&cmd)?;
        }
        wrap(d, &Sort::psf(&predicate.name))?;
        for arg in &predicate.formal_args {
            wrap(d, &sort_of_type(&arg.typ))?;
        }
        if ctx.config.enable_predicate_triggers_on_inhale {
            d.declare(&Decl::Func(Function::new(
                format!("$Pred.trigger_{}", predicate.name),
                vec![Sort::Snap],
                Sort::Bool,
            )))?;
        }
    }

    // Domains: function symbols, then translated axioms.
    for domain in &program.domains {
        for func in &domain.functions {
            d.declare(&Decl::Func(Function::new(
                func.name.clone(),
                func.formal_args.iter().map(sort_of_type).collect(),
                sort_of_type(&func.return_type),
            )))?;
        }
    }
    let mut axioms = Vec::new();
    for domain in &program.domains {
        for axiom in &domain.axioms {
            d.comment(&format!("axiom {}.{}", domain.name, axiom.name));
            axioms.push(Translator::new(program).translate(&axiom.exp));
        }
    }
    d.assume(axioms)?;

    Ok(())
}
