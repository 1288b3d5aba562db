//! Logical terms.
//!
//! A [`Term`] is an immutable tree; equality and hashing are structural, so
//! terms can key caches and populate path-condition sets directly. All
//! construction goes through the smart constructors, which apply identity
//! peepholes (`and(True, x)` is `x`, `ite(True, a, b)` is `a`,
//! `eq(t, t)` is `True`, …) so that trivially true facts never reach the
//! solver.
//!
//! Quantified-permission support leans on three operations here:
//! capture-avoiding [`Term::substitute`], subterm search
//! ([`Term::find_subterms`]), and free-variable computation.

use crate::sort::Sort;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A named, sorted variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TermVar {
    pub name: String,
    pub sort: Sort,
}

impl TermVar {
    pub fn new(name: impl Into<String>, sort: Sort) -> Self {
        Self {
            name: name.into(),
            sort,
        }
    }
}

/// An uninterpreted (or defined) function symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Function {
    pub name: String,
    pub arg_sorts: Vec<Sort>,
    pub result_sort: Sort,
}

impl Function {
    pub fn new(name: impl Into<String>, arg_sorts: Vec<Sort>, result_sort: Sort) -> Self {
        Self {
            name: name.into(),
            arg_sorts,
            result_sort,
        }
    }

    /// Applies the function to arguments.
    pub fn apply(&self, args: Vec<Term>) -> Term {
        Term::App {
            function: self.clone(),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantifier {
    Forall,
    Exists,
}

/// A trigger: a set of terms that jointly pattern the quantifier.
pub type Trigger = Vec<Term>;

/// A logical term. See the module docs; construct via smart constructors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    // ---- Literals ----
    IntLit(i64),
    True,
    False,
    Null,
    /// The unit snapshot.
    Unit,

    Var(TermVar),

    // ---- Integer arithmetic ----
    Plus(Box<Term>, Box<Term>),
    Minus(Box<Term>, Box<Term>),
    Times(Box<Term>, Box<Term>),
    Div(Box<Term>, Box<Term>),
    Mod(Box<Term>, Box<Term>),

    // ---- Booleans ----
    Not(Box<Term>),
    And(Vec<Term>),
    Or(Vec<Term>),
    Implies(Box<Term>, Box<Term>),
    Iff(Box<Term>, Box<Term>),
    Ite(Box<Term>, Box<Term>, Box<Term>),

    // ---- Relations (Int) ----
    Equals(Box<Term>, Box<Term>),
    Less(Box<Term>, Box<Term>),
    AtMost(Box<Term>, Box<Term>),
    Greater(Box<Term>, Box<Term>),
    AtLeast(Box<Term>, Box<Term>),

    // ---- Permissions ----
    NoPerm,
    FullPerm,
    /// `num/den` as a permission amount.
    FractionPerm(Box<Term>, Box<Term>),
    PermPlus(Box<Term>, Box<Term>),
    PermMinus(Box<Term>, Box<Term>),
    /// Permission times permission.
    PermTimes(Box<Term>, Box<Term>),
    /// Integer scaling of a permission.
    IntPermTimes(Box<Term>, Box<Term>),
    PermMin(Box<Term>, Box<Term>),
    PermLess(Box<Term>, Box<Term>),
    PermAtMost(Box<Term>, Box<Term>),
    /// `0 < p`
    IsPositive(Box<Term>),
    /// `0 <= p`
    IsNonNegative(Box<Term>),

    Quantification {
        quantifier: Quantifier,
        vars: Vec<TermVar>,
        body: Box<Term>,
        triggers: Vec<Trigger>,
        /// Quantifier id, surfaced as `:qid` for solver diagnostics.
        name: String,
    },

    App {
        function: Function,
        args: Vec<Term>,
    },

    // ---- Sequences ----
    SeqLength(Box<Term>),
    SeqAt(Box<Term>, Box<Term>),
    SeqEmpty(Sort),
    SeqSingleton(Box<Term>),
    SeqAppend(Box<Term>, Box<Term>),
    SeqIn(Box<Term>, Box<Term>),

    // ---- Sets ----
    SetEmpty(Sort),
    SetSingleton(Box<Term>),
    SetAdd(Box<Term>, Box<Term>),
    SetUnion(Box<Term>, Box<Term>),
    SetIntersect(Box<Term>, Box<Term>),
    SetDiff(Box<Term>, Box<Term>),
    SetSubset(Box<Term>, Box<Term>),
    SetIn(Box<Term>, Box<Term>),
    SetCard(Box<Term>),

    // ---- Multisets ----
    MultisetEmpty(Sort),
    MultisetAdd(Box<Term>, Box<Term>),
    MultisetCount(Box<Term>, Box<Term>),
    MultisetCard(Box<Term>),

    // ---- Snapshots ----
    Combine(Box<Term>, Box<Term>),
    First(Box<Term>),
    Second(Box<Term>),
    /// Wraps a value of any base sort into a snapshot.
    ToSnap(Box<Term>),
    /// Unwraps a snapshot into the given sort.
    FromSnap(Box<Term>, Sort),

    // ---- Field-value and predicate-snap functions ----
    Lookup {
        field: String,
        fvf: Box<Term>,
        receiver: Box<Term>,
    },
    Domain {
        field: String,
        fvf: Box<Term>,
    },
    PredLookup {
        predicate: String,
        psf: Box<Term>,
        /// The predicate arguments, encoded as one snapshot tree.
        args: Box<Term>,
    },
    PredDomain {
        predicate: String,
        psf: Box<Term>,
    },

    Let {
        var: TermVar,
        bound: Box<Term>,
        body: Box<Term>,
    },
}

impl Term {
    /// The sort of this term.
    ///
    /// Panics on ill-formed terms (e.g. `SeqAt` applied to a non-sequence);
    /// such terms indicate a bug in the evaluator or translator, never user
    /// input.
    pub fn sort(&self) -> Sort {
        use Term::*;
        match self {
            IntLit(_) | Plus(..) | Minus(..) | Times(..) | Div(..) | Mod(..) | SeqLength(_)
            | SetCard(_) | MultisetCount(..) | MultisetCard(_) => Sort::Int,

            True | False | Not(_) | And(_) | Or(_) | Implies(..) | Iff(..) | Equals(..)
            | Less(..) | AtMost(..) | Greater(..) | AtLeast(..) | PermLess(..)
            | PermAtMost(..) | IsPositive(_) | IsNonNegative(_) | SeqIn(..) | SetIn(..)
            | SetSubset(..) | Quantification { .. } => Sort::Bool,

            Null => Sort::Ref,

            Unit | Combine(..) | First(_) | Second(_) | ToSnap(_) | PredLookup { .. } => {
                Sort::Snap
            }

            NoPerm | FullPerm | FractionPerm(..) | PermPlus(..) | PermMinus(..)
            | PermTimes(..) | IntPermTimes(..) | PermMin(..) => Sort::Perm,

            Var(v) => v.sort.clone(),
            Ite(_, t, _) => t.sort(),
            App { function, .. } => function.result_sort.clone(),

            SeqAt(s, _) => match s.sort() {
                Sort::Seq(e) => *e,
                other => panic!("SeqAt applied to term of sort {}", other),
            },
            SeqEmpty(e) => Sort::seq(e.clone()),
            SeqSingleton(e) => Sort::seq(e.sort()),
            SeqAppend(l, _) => l.sort(),

            SetEmpty(e) => Sort::set(e.clone()),
            SetSingleton(e) => Sort::set(e.sort()),
            SetAdd(s, _) | SetUnion(s, _) | SetIntersect(s, _) | SetDiff(s, _) => s.sort(),

            MultisetEmpty(e) => Sort::multiset(e.clone()),
            MultisetAdd(s, _) => s.sort(),

            FromSnap(_, sort) => sort.clone(),

            Lookup { fvf, .. } => match fvf.sort() {
                Sort::FieldValueFunction(v) => *v,
                other => panic!("Lookup applied to term of sort {}", other),
            },
            Domain { .. } => Sort::set(Sort::Ref),
            PredDomain { .. } => Sort::set(Sort::Snap),

            Let { body, .. } => body.sort(),
        }
    }

    // =========================================================================
    // Smart constructors
    // =========================================================================

    pub fn var(v: TermVar) -> Term {
        Term::Var(v)
    }

    pub fn int(n: i64) -> Term {
        Term::IntLit(n)
    }

    pub fn bool_lit(b: bool) -> Term {
        if b {
            Term::True
        } else {
            Term::False
        }
    }

    pub fn not(t: Term) -> Term {
        match t {
            Term::True => Term::False,
            Term::False => Term::True,
            Term::Not(inner) => *inner,
            other => Term::Not(Box::new(other)),
        }
    }

    /// Conjunction; flattens, drops `True`, collapses on `False`.
    pub fn and(l: Term, r: Term) -> Term {
        Term::and_all(vec![l, r])
    }

    pub fn and_all(ts: Vec<Term>) -> Term {
        let mut out = Vec::new();
        for t in ts {
            match t {
                Term::True => {}
                Term::False => return Term::False,
                Term::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Term::True,
            1 => out.pop().unwrap_or(Term::True),
            _ => Term::And(out),
        }
    }

    pub fn or(l: Term, r: Term) -> Term {
        Term::or_all(vec![l, r])
    }

    pub fn or_all(ts: Vec<Term>) -> Term {
        let mut out = Vec::new();
        for t in ts {
            match t {
                Term::False => {}
                Term::True => return Term::True,
                Term::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => Term::False,
            1 => out.pop().unwrap_or(Term::False),
            _ => Term::Or(out),
        }
    }

    pub fn implies(l: Term, r: Term) -> Term {
        match (l, r) {
            (Term::True, r) => r,
            (Term::False, _) => Term::True,
            (_, Term::True) => Term::True,
            (l, r) => Term::Implies(Box::new(l), Box::new(r)),
        }
    }

    pub fn iff(l: Term, r: Term) -> Term {
        if l == r {
            return Term::True;
        }
        Term::Iff(Box::new(l), Box::new(r))
    }

    pub fn ite(cond: Term, then_t: Term, else_t: Term) -> Term {
        match cond {
            Term::True => then_t,
            Term::False => else_t,
            cond => {
                if then_t == else_t {
                    then_t
                } else {
                    Term::Ite(Box::new(cond), Box::new(then_t), Box::new(else_t))
                }
            }
        }
    }

    pub fn eq(l: Term, r: Term) -> Term {
        if l == r {
            return Term::True;
        }
        Term::Equals(Box::new(l), Box::new(r))
    }

    pub fn neq(l: Term, r: Term) -> Term {
        Term::not(Term::eq(l, r))
    }

    pub fn less(l: Term, r: Term) -> Term {
        Term::Less(Box::new(l), Box::new(r))
    }

    pub fn at_most(l: Term, r: Term) -> Term {
        Term::AtMost(Box::new(l), Box::new(r))
    }

    pub fn greater(l: Term, r: Term) -> Term {
        Term::Greater(Box::new(l), Box::new(r))
    }

    pub fn at_least(l: Term, r: Term) -> Term {
        Term::AtLeast(Box::new(l), Box::new(r))
    }

    pub fn plus(l: Term, r: Term) -> Term {
        match (l, r) {
            (Term::IntLit(0), r) => r,
            (l, Term::IntLit(0)) => l,
            (Term::IntLit(a), Term::IntLit(b)) => Term::IntLit(a + b),
            (l, r) => Term::Plus(Box::new(l), Box::new(r)),
        }
    }

    pub fn minus(l: Term, r: Term) -> Term {
        match (l, r) {
            (l, Term::IntLit(0)) => l,
            (Term::IntLit(a), Term::IntLit(b)) => Term::IntLit(a - b),
            (l, r) => {
                if l == r {
                    Term::IntLit(0)
                } else {
                    Term::Minus(Box::new(l), Box::new(r))
                }
            }
        }
    }

    pub fn times(l: Term, r: Term) -> Term {
        match (l, r) {
            (Term::IntLit(1), r) => r,
            (l, Term::IntLit(1)) => l,
            (Term::IntLit(0), _) | (_, Term::IntLit(0)) => Term::IntLit(0),
            (Term::IntLit(a), Term::IntLit(b)) => Term::IntLit(a * b),
            (l, r) => Term::Times(Box::new(l), Box::new(r)),
        }
    }

    pub fn div(l: Term, r: Term) -> Term {
        Term::Div(Box::new(l), Box::new(r))
    }

    pub fn modulo(l: Term, r: Term) -> Term {
        Term::Mod(Box::new(l), Box::new(r))
    }

    // ---- Permission constructors ----

    pub fn fraction_perm(num: Term, den: Term) -> Term {
        match (&num, &den) {
            (Term::IntLit(n), Term::IntLit(d)) if *n == *d && *d != 0 => return Term::FullPerm,
            (Term::IntLit(0), _) => return Term::NoPerm,
            _ => {}
        }
        Term::FractionPerm(Box::new(num), Box::new(den))
    }

    pub fn perm_plus(l: Term, r: Term) -> Term {
        match (l, r) {
            (Term::NoPerm, r) => r,
            (l, Term::NoPerm) => l,
            (l, r) => Term::PermPlus(Box::new(l), Box::new(r)),
        }
    }

    pub fn perm_minus(l: Term, r: Term) -> Term {
        match (l, r) {
            (l, Term::NoPerm) => l,
            (l, r) => {
                if l == r {
                    Term::NoPerm
                } else {
                    Term::PermMinus(Box::new(l), Box::new(r))
                }
            }
        }
    }

    pub fn perm_times(l: Term, r: Term) -> Term {
        match (l, r) {
            (Term::FullPerm, r) => r,
            (l, Term::FullPerm) => l,
            (Term::NoPerm, _) | (_, Term::NoPerm) => Term::NoPerm,
            (l, r) => Term::PermTimes(Box::new(l), Box::new(r)),
        }
    }

    pub fn int_perm_times(n: Term, p: Term) -> Term {
        match (n, p) {
            (Term::IntLit(1), p) => p,
            (Term::IntLit(0), _) => Term::NoPerm,
            (n, p) => Term::IntPermTimes(Box::new(n), Box::new(p)),
        }
    }

    pub fn perm_min(l: Term, r: Term) -> Term {
        if l == r {
            return l;
        }
        Term::PermMin(Box::new(l), Box::new(r))
    }

    pub fn perm_less(l: Term, r: Term) -> Term {
        match (&l, &r) {
            (Term::NoPerm, Term::FullPerm) => return Term::True,
            _ => {}
        }
        if l == r {
            return Term::False;
        }
        Term::PermLess(Box::new(l), Box::new(r))
    }

    pub fn perm_at_most(l: Term, r: Term) -> Term {
        if l == r {
            return Term::True;
        }
        Term::PermAtMost(Box::new(l), Box::new(r))
    }

    pub fn is_positive(p: Term) -> Term {
        if let Term::FractionPerm(n, d) = &p {
            if let (Term::IntLit(a), Term::IntLit(b)) = (n.as_ref(), d.as_ref()) {
                return Term::bool_lit(a * b > 0);
            }
        }
        match p {
            Term::FullPerm => Term::True,
            Term::NoPerm => Term::False,
            p => Term::IsPositive(Box::new(p)),
        }
    }

    pub fn is_non_negative(p: Term) -> Term {
        if let Term::FractionPerm(n, d) = &p {
            if let (Term::IntLit(a), Term::IntLit(b)) = (n.as_ref(), d.as_ref()) {
                return Term::bool_lit(a * b >= 0);
            }
        }
        match p {
            Term::FullPerm | Term::NoPerm => Term::True,
            p => Term::IsNonNegative(Box::new(p)),
        }
    }

    // ---- Quantification ----

    pub fn forall(
        vars: Vec<TermVar>,
        body: Term,
        triggers: Vec<Trigger>,
        name: impl Into<String>,
    ) -> Term {
        match body {
            Term::True => Term::True,
            body => Term::Quantification {
                quantifier: Quantifier::Forall,
                vars,
                body: Box::new(body),
                triggers,
                name: name.into(),
            },
        }
    }

    pub fn exists(vars: Vec<TermVar>, body: Term, name: impl Into<String>) -> Term {
        match body {
            Term::False => Term::False,
            body => Term::Quantification {
                quantifier: Quantifier::Exists,
                vars,
                body: Box::new(body),
                triggers: Vec::new(),
                name: name.into(),
            },
        }
    }

    // ---- Snapshots ----

    pub fn combine(l: Term, r: Term) -> Term {
        Term::Combine(Box::new(l), Box::new(r))
    }

    pub fn first(s: Term) -> Term {
        match s {
            Term::Combine(l, _) => *l,
            s => Term::First(Box::new(s)),
        }
    }

    pub fn second(s: Term) -> Term {
        match s {
            Term::Combine(_, r) => *r,
            s => Term::Second(Box::new(s)),
        }
    }

    pub fn to_snap(t: Term) -> Term {
        match t {
            Term::FromSnap(s, _) => *s,
            t if t.sort() == Sort::Snap => t,
            t => Term::ToSnap(Box::new(t)),
        }
    }

    pub fn from_snap(s: Term, sort: Sort) -> Term {
        if sort == Sort::Snap {
            return s;
        }
        match s {
            Term::ToSnap(inner) if inner.sort() == sort => *inner,
            s => Term::FromSnap(Box::new(s), sort),
        }
    }

    /// Encodes predicate arguments as one snapshot tree, right-combined.
    pub fn snap_args(args: Vec<Term>) -> Term {
        let mut wrapped: Vec<Term> = args.into_iter().map(Term::to_snap).collect();
        match wrapped.len() {
            0 => Term::Unit,
            1 => wrapped.pop().unwrap_or(Term::Unit),
            _ => {
                let mut it = wrapped.into_iter().rev();
                let mut acc = it.next().unwrap_or(Term::Unit);
                for t in it {
                    acc = Term::combine(t, acc);
                }
                acc
            }
        }
    }

    // ---- FVF / PSF ----

    pub fn lookup(field: impl Into<String>, fvf: Term, receiver: Term) -> Term {
        Term::Lookup {
            field: field.into(),
            fvf: Box::new(fvf),
            receiver: Box::new(receiver),
        }
    }

    pub fn fvf_domain(field: impl Into<String>, fvf: Term) -> Term {
        Term::Domain {
            field: field.into(),
            fvf: Box::new(fvf),
        }
    }

    pub fn pred_lookup(predicate: impl Into<String>, psf: Term, args: Term) -> Term {
        Term::PredLookup {
            predicate: predicate.into(),
            psf: Box::new(psf),
            args: Box::new(args),
        }
    }

    pub fn pred_domain(predicate: impl Into<String>, psf: Term) -> Term {
        Term::PredDomain {
            predicate: predicate.into(),
            psf: Box::new(psf),
        }
    }

    pub fn set_in(elem: Term, set: Term) -> Term {
        Term::SetIn(Box::new(elem), Box::new(set))
    }

    pub fn seq_at(seq: Term, idx: Term) -> Term {
        Term::SeqAt(Box::new(seq), Box::new(idx))
    }

    pub fn let_binding(var: TermVar, bound: Term, body: Term) -> Term {
        Term::Let {
            var,
            bound: Box::new(bound),
            body: Box::new(body),
        }
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// Visits every direct child term, in construction order.
    pub fn for_each_child(&self, f: &mut dyn FnMut(&Term)) {
        use Term::*;
        match self {
            IntLit(_) | True | False | Null | Unit | Var(_) | NoPerm | FullPerm | SeqEmpty(_)
            | SetEmpty(_) | MultisetEmpty(_) => {}

            Not(a) | IsPositive(a) | IsNonNegative(a) | SeqLength(a) | SeqSingleton(a)
            | SetSingleton(a) | SetCard(a) | MultisetCard(a) | First(a) | Second(a)
            | ToSnap(a) => f(a),

            FromSnap(a, _) => f(a),

            Plus(a, b) | Minus(a, b) | Times(a, b) | Div(a, b) | Mod(a, b) | Implies(a, b)
            | Iff(a, b) | Equals(a, b) | Less(a, b) | AtMost(a, b) | Greater(a, b)
            | AtLeast(a, b) | FractionPerm(a, b) | PermPlus(a, b) | PermMinus(a, b)
            | PermTimes(a, b) | IntPermTimes(a, b) | PermMin(a, b) | PermLess(a, b)
            | PermAtMost(a, b) | SeqAt(a, b) | SeqAppend(a, b) | SeqIn(a, b) | SetAdd(a, b)
            | SetUnion(a, b) | SetIntersect(a, b) | SetDiff(a, b) | SetSubset(a, b)
            | SetIn(a, b) | MultisetAdd(a, b) | MultisetCount(a, b) | Combine(a, b) => {
                f(a);
                f(b);
            }

            Ite(a, b, c) => {
                f(a);
                f(b);
                f(c);
            }

            And(ts) | Or(ts) => {
                for t in ts {
                    f(t);
                }
            }

            Quantification { body, triggers, .. } => {
                for trig in triggers {
                    for t in trig {
                        f(t);
                    }
                }
                f(body);
            }

            App { args, .. } => {
                for a in args {
                    f(a);
                }
            }

            Lookup { fvf, receiver, .. } => {
                f(fvf);
                f(receiver);
            }
            Domain { fvf, .. } | PredDomain { psf: fvf, .. } => f(fvf),
            PredLookup { psf, args, .. } => {
                f(psf);
                f(args);
            }

            Let { bound, body, .. } => {
                f(bound);
                f(body);
            }
        }
    }

    /// Collects all subterms (including `self`) matching the predicate.
    ///
    /// Descends into quantifier bodies; callers that care about binding
    /// structure must filter on free variables themselves.
    pub fn find_subterms(&self, pred: &dyn Fn(&Term) -> bool) -> Vec<Term> {
        let mut out = Vec::new();
        self.collect_subterms(pred, &mut out);
        out
    }

    fn collect_subterms(&self, pred: &dyn Fn(&Term) -> bool, out: &mut Vec<Term>) {
        if pred(self) && !out.contains(self) {
            out.push(self.clone());
        }
        self.for_each_child(&mut |child| child.collect_subterms(pred, out));
    }

    /// Names of the free variables of this term.
    pub fn free_var_names(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        let mut bound = Vec::new();
        self.collect_free_vars(&mut bound, &mut out);
        out
    }

    fn collect_free_vars(&self, bound: &mut Vec<String>, out: &mut HashSet<String>) {
        match self {
            Term::Var(v) => {
                if !bound.iter().any(|b| b == &v.name) {
                    out.insert(v.name.clone());
                }
            }
            Term::Quantification {
                vars,
                body,
                triggers,
                ..
            } => {
                let n = vars.len();
                for v in vars {
                    bound.push(v.name.clone());
                }
                for trig in triggers {
                    for t in trig {
                        t.collect_free_vars(bound, out);
                    }
                }
                body.collect_free_vars(bound, out);
                for _ in 0..n {
                    bound.pop();
                }
            }
            Term::Let { var, bound: b, body } => {
                b.collect_free_vars(bound, out);
                bound.push(var.name.clone());
                body.collect_free_vars(bound, out);
                bound.pop();
            }
            _ => {
                let mut children = Vec::new();
                self.for_each_child(&mut |c| children.push(c.clone()));
                for c in children {
                    c.collect_free_vars(bound, out);
                }
            }
        }
    }

    /// Returns `true` if the term mentions any of the given variable names
    /// freely.
    pub fn mentions_any(&self, names: &[String]) -> bool {
        let fvs = self.free_var_names();
        names.iter().any(|n| fvs.contains(n))
    }

    // =========================================================================
    // Substitution
    // =========================================================================

    /// Substitutes a single variable.
    pub fn substitute_var(&self, name: &str, replacement: &Term) -> Term {
        let mut map = HashMap::new();
        map.insert(name.to_string(), replacement.clone());
        self.substitute(&map)
    }

    /// Capture-avoiding simultaneous substitution.
    ///
    /// Bound variables shadow the map; a bound variable that would capture a
    /// free variable of a replacement is renamed first.
    pub fn substitute(&self, map: &HashMap<String, Term>) -> Term {
        if map.is_empty() {
            return self.clone();
        }
        use Term::*;
        match self {
            Var(v) => map.get(&v.name).cloned().unwrap_or_else(|| self.clone()),

            Quantification {
                quantifier,
                vars,
                body,
                triggers,
                name,
            } => {
                let mut inner: HashMap<String, Term> = map
                    .iter()
                    .filter(|(k, _)| !vars.iter().any(|v| &v.name == *k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                if inner.is_empty() {
                    return self.clone();
                }

                let mut avoid: HashSet<String> = inner
                    .values()
                    .flat_map(|t| t.free_var_names())
                    .collect();
                avoid.extend(body.free_var_names());
                for v in vars.iter() {
                    avoid.insert(v.name.clone());
                }

                let mut new_vars = Vec::with_capacity(vars.len());
                for v in vars {
                    let clashes = inner.values().any(|t| t.free_var_names().contains(&v.name));
                    if clashes {
                        let fresh = fresh_name(&v.name, &avoid);
                        avoid.insert(fresh.clone());
                        inner.insert(
                            v.name.clone(),
                            Term::Var(TermVar::new(fresh.clone(), v.sort.clone())),
                        );
                        new_vars.push(TermVar::new(fresh, v.sort.clone()));
                    } else {
                        new_vars.push(v.clone());
                    }
                }

                Quantification {
                    quantifier: *quantifier,
                    vars: new_vars,
                    body: Box::new(body.substitute(&inner)),
                    triggers: triggers
                        .iter()
                        .map(|trig| trig.iter().map(|t| t.substitute(&inner)).collect())
                        .collect(),
                    name: name.clone(),
                }
            }

            Let { var, bound, body } => {
                let new_bound = bound.substitute(map);
                let mut inner: HashMap<String, Term> = map
                    .iter()
                    .filter(|(k, _)| *k != &var.name)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let clashes = inner.values().any(|t| t.free_var_names().contains(&var.name));
                let (new_var, new_body) = if clashes {
                    let mut avoid: HashSet<String> =
                        inner.values().flat_map(|t| t.free_var_names()).collect();
                    avoid.extend(body.free_var_names());
                    let fresh = fresh_name(&var.name, &avoid);
                    inner.insert(
                        var.name.clone(),
                        Term::Var(TermVar::new(fresh.clone(), var.sort.clone())),
                    );
                    (
                        TermVar::new(fresh, var.sort.clone()),
                        body.substitute(&inner),
                    )
                } else {
                    (var.clone(), body.substitute(&inner))
                };
                Let {
                    var: new_var,
                    bound: Box::new(new_bound),
                    body: Box::new(new_body),
                }
            }

            IntLit(_) | True | False | Null | Unit | NoPerm | FullPerm | SeqEmpty(_)
            | SetEmpty(_) | MultisetEmpty(_) => self.clone(),

            Not(a) => Term::Not(Box::new(a.substitute(map))),
            IsPositive(a) => Term::IsPositive(Box::new(a.substitute(map))),
            IsNonNegative(a) => Term::IsNonNegative(Box::new(a.substitute(map))),
            SeqLength(a) => Term::SeqLength(Box::new(a.substitute(map))),
            SeqSingleton(a) => Term::SeqSingleton(Box::new(a.substitute(map))),
            SetSingleton(a) => Term::SetSingleton(Box::new(a.substitute(map))),
            SetCard(a) => Term::SetCard(Box::new(a.substitute(map))),
            MultisetCard(a) => Term::MultisetCard(Box::new(a.substitute(map))),
            First(a) => Term::First(Box::new(a.substitute(map))),
            Second(a) => Term::Second(Box::new(a.substitute(map))),
            ToSnap(a) => Term::ToSnap(Box::new(a.substitute(map))),
            FromSnap(a, s) => Term::FromSnap(Box::new(a.substitute(map)), s.clone()),

            Plus(a, b) => bin(map, a, b, Term::Plus),
            Minus(a, b) => bin(map, a, b, Term::Minus),
            Times(a, b) => bin(map, a, b, Term::Times),
            Div(a, b) => bin(map, a, b, Term::Div),
            Mod(a, b) => bin(map, a, b, Term::Mod),
            Implies(a, b) => bin(map, a, b, Term::Implies),
            Iff(a, b) => bin(map, a, b, Term::Iff),
            Equals(a, b) => bin(map, a, b, Term::Equals),
            Less(a, b) => bin(map, a, b, Term::Less),
            AtMost(a, b) => bin(map, a, b, Term::AtMost),
            Greater(a, b) => bin(map, a, b, Term::Greater),
            AtLeast(a, b) => bin(map, a, b, Term::AtLeast),
            FractionPerm(a, b) => bin(map, a, b, Term::FractionPerm),
            PermPlus(a, b) => bin(map, a, b, Term::PermPlus),
            PermMinus(a, b) => bin(map, a, b, Term::PermMinus),
            PermTimes(a, b) => bin(map, a, b, Term::PermTimes),
            IntPermTimes(a, b) => bin(map, a, b, Term::IntPermTimes),
            PermMin(a, b) => bin(map, a, b, Term::PermMin),
            PermLess(a, b) => bin(map, a, b, Term::PermLess),
            PermAtMost(a, b) => bin(map, a, b, Term::PermAtMost),
            SeqAt(a, b) => bin(map, a, b, Term::SeqAt),
            SeqAppend(a, b) => bin(map, a, b, Term::SeqAppend),
            SeqIn(a, b) => bin(map, a, b, Term::SeqIn),
            SetAdd(a, b) => bin(map, a, b, Term::SetAdd),
            SetUnion(a, b) => bin(map, a, b, Term::SetUnion),
            SetIntersect(a, b) => bin(map, a, b, Term::SetIntersect),
            SetDiff(a, b) => bin(map, a, b, Term::SetDiff),
            SetSubset(a, b) => bin(map, a, b, Term::SetSubset),
            SetIn(a, b) => bin(map, a, b, Term::SetIn),
            MultisetAdd(a, b) => bin(map, a, b, Term::MultisetAdd),
            MultisetCount(a, b) => bin(map, a, b, Term::MultisetCount),
            Combine(a, b) => bin(map, a, b, Term::Combine),

            Ite(a, b, c) => Term::Ite(
                Box::new(a.substitute(map)),
                Box::new(b.substitute(map)),
                Box::new(c.substitute(map)),
            ),

            And(ts) => Term::And(ts.iter().map(|t| t.substitute(map)).collect()),
            Or(ts) => Term::Or(ts.iter().map(|t| t.substitute(map)).collect()),

            App { function, args } => Term::App {
                function: function.clone(),
                args: args.iter().map(|t| t.substitute(map)).collect(),
            },

            Lookup {
                field,
                fvf,
                receiver,
            } => Term::Lookup {
                field: field.clone(),
                fvf: Box::new(fvf.substitute(map)),
                receiver: Box::new(receiver.substitute(map)),
            },
            Domain { field, fvf } => Term::Domain {
                field: field.clone(),
                fvf: Box::new(fvf.substitute(map)),
            },
            PredLookup {
                predicate,
                psf,
                args,
            } => Term::PredLookup {
                predicate: predicate.clone(),
                psf: Box::new(psf.substitute(map)),
                args: Box::new(args.substitute(map)),
            },
            PredDomain { predicate, psf } => Term::PredDomain {
                predicate: predicate.clone(),
                psf: Box::new(psf.substitute(map)),
            },
        }
    }
}

fn bin(
    map: &HashMap<String, Term>,
    a: &Term,
    b: &Term,
    mk: fn(Box<Term>, Box<Term>) -> Term,
) -> Term {
    mk(Box::new(a.substitute(map)), Box::new(b.substitute(map)))
}

fn fresh_name(base: &str, avoid: &HashSet<String>) -> String {
    let mut candidate = format!("{}'", base);
    while avoid.contains(&candidate) {
        candidate.push('\'');
    }
    candidate
}

// =============================================================================
// Rendering
// =============================================================================

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Term::*;
        match self {
            IntLit(n) => write!(f, "{}", n),
            True => write!(f, "true"),
            False => write!(f, "false"),
            Null => write!(f, "null"),
            Unit => write!(f, "unit"),
            Var(v) => write!(f, "{}", v.name),
            Plus(a, b) => write!(f, "({} + {})", a, b),
            Minus(a, b) => write!(f, "({} - {})", a, b),
            Times(a, b) => write!(f, "({} * {})", a, b),
            Div(a, b) => write!(f, "({} / {})", a, b),
            Mod(a, b) => write!(f, "({} % {})", a, b),
            Not(a) => write!(f, "!{}", a),
            And(ts) => join(f, ts, " && "),
            Or(ts) => join(f, ts, " || "),
            Implies(a, b) => write!(f, "({} ==> {})", a, b),
            Iff(a, b) => write!(f, "({} <==> {})", a, b),
            Ite(c, a, b) => write!(f, "({} ? {} : {})", c, a, b),
            Equals(a, b) => write!(f, "({} == {})", a, b),
            Less(a, b) => write!(f, "({} < {})", a, b),
            AtMost(a, b) => write!(f, "({} <= {})", a, b),
            Greater(a, b) => write!(f, "({} > {})", a, b),
            AtLeast(a, b) => write!(f, "({} >= {})", a, b),
            NoPerm => write!(f, "none"),
            FullPerm => write!(f, "write"),
            FractionPerm(a, b) => write!(f, "{}/{}", a, b),
            PermPlus(a, b) => write!(f, "({} + {})", a, b),
            PermMinus(a, b) => write!(f, "({} - {})", a, b),
            PermTimes(a, b) => write!(f, "({} * {})", a, b),
            IntPermTimes(a, b) => write!(f, "({} * {})", a, b),
            PermMin(a, b) => write!(f, "min({}, {})", a, b),
            PermLess(a, b) => write!(f, "({} < {})", a, b),
            PermAtMost(a, b) => write!(f, "({} <= {})", a, b),
            IsPositive(p) => write!(f, "(none < {})", p),
            IsNonNegative(p) => write!(f, "(none <= {})", p),
            Quantification {
                quantifier,
                vars,
                body,
                ..
            } => {
                let q = match quantifier {
                    Quantifier::Forall => "forall",
                    Quantifier::Exists => "exists",
                };
                write!(f, "({} ", q)?;
                for (i, v) in vars.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", v.name, v.sort)?;
                }
                write!(f, " :: {})", body)
            }
            App { function, args } => {
                write!(f, "{}(", function.name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            SeqLength(s) => write!(f, "|{}|", s),
            SeqAt(s, i) => write!(f, "{}[{}]", s, i),
            SeqEmpty(e) => write!(f, "Seq[{}]()", e),
            SeqSingleton(e) => write!(f, "Seq({})", e),
            SeqAppend(a, b) => write!(f, "({} ++ {})", a, b),
            SeqIn(e, s) => write!(f, "({} in {})", e, s),
            SetEmpty(e) => write!(f, "Set[{}]()", e),
            SetSingleton(e) => write!(f, "Set({})", e),
            SetAdd(s, e) => write!(f, "add({}, {})", s, e),
            SetUnion(a, b) => write!(f, "({} union {})", a, b),
            SetIntersect(a, b) => write!(f, "({} intersection {})", a, b),
            SetDiff(a, b) => write!(f, "({} setminus {})", a, b),
            SetSubset(a, b) => write!(f, "({} subset {})", a, b),
            SetIn(e, s) => write!(f, "({} in {})", e, s),
            SetCard(s) => write!(f, "|{}|", s),
            MultisetEmpty(e) => write!(f, "Multiset[{}]()", e),
            MultisetAdd(s, e) => write!(f, "add({}, {})", s, e),
            MultisetCount(s, e) => write!(f, "count({}, {})", s, e),
            MultisetCard(s) => write!(f, "|{}|", s),
            Combine(a, b) => write!(f, "combine({}, {})", a, b),
            First(s) => write!(f, "first({})", s),
            Second(s) => write!(f, "second({})", s),
            ToSnap(t) => write!(f, "snap({})", t),
            FromSnap(s, sort) => write!(f, "unsnap[{}]({})", sort, s),
            Lookup {
                field,
                fvf,
                receiver,
            } => write!(f, "lookup_{}({}, {})", field, fvf, receiver),
            Domain { field, fvf } => write!(f, "dom_{}({})", field, fvf),
            PredLookup {
                predicate,
                psf,
                args,
            } => write!(f, "lookup_{}({}, {})", predicate, psf, args),
            PredDomain { predicate, psf } => write!(f, "dom_{}({})", predicate, psf),
            Let { var, bound, body } => {
                write!(f, "(let {} == ({}) in {})", var.name, bound, body)
            }
        }
    }
}

fn join(f: &mut fmt::Formatter<'_>, ts: &[Term], sep: &str) -> fmt::Result {
    write!(f, "(")?;
    for (i, t) in ts.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", t)?;
    }
    write!(f, ")")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(name: &str, sort: Sort) -> Term {
        Term::Var(TermVar::new(name, sort))
    }

    #[test]
    fn and_drops_true_and_flattens() {
        let x = v("x", Sort::Bool);
        let y = v("y", Sort::Bool);
        assert_eq!(Term::and(Term::True, x.clone()), x);
        assert_eq!(
            Term::and(Term::and(x.clone(), y.clone()), Term::True),
            Term::And(vec![x.clone(), y.clone()])
        );
        assert_eq!(Term::and(x, Term::False), Term::False);
    }

    #[test]
    fn ite_collapses_on_literal_condition() {
        let a = Term::int(1);
        let b = Term::int(2);
        assert_eq!(Term::ite(Term::True, a.clone(), b.clone()), a);
        assert_eq!(Term::ite(Term::False, a.clone(), b.clone()), b);
        let c = v("c", Sort::Bool);
        assert_eq!(Term::ite(c, a.clone(), a.clone()), a);
    }

    #[test]
    fn eq_of_identical_terms_is_true() {
        let x = v("x", Sort::Ref);
        assert_eq!(Term::eq(x.clone(), x), Term::True);
    }

    #[test]
    fn perm_peepholes() {
        let p = v("p", Sort::Perm);
        assert_eq!(Term::perm_plus(Term::NoPerm, p.clone()), p);
        assert_eq!(Term::perm_minus(p.clone(), p.clone()), Term::NoPerm);
        assert_eq!(Term::perm_times(Term::FullPerm, p.clone()), p);
        assert_eq!(Term::perm_times(p, Term::NoPerm), Term::NoPerm);
        assert_eq!(Term::is_positive(Term::FullPerm), Term::True);
        assert_eq!(
            Term::is_positive(Term::fraction_perm(Term::int(1), Term::int(2))),
            Term::True
        );
    }

    #[test]
    fn fraction_of_equal_literals_is_full() {
        assert_eq!(
            Term::fraction_perm(Term::int(2), Term::int(2)),
            Term::FullPerm
        );
        assert_eq!(Term::fraction_perm(Term::int(0), Term::int(7)), Term::NoPerm);
    }

    #[test]
    fn snapshot_wrappers_cancel() {
        let x = v("x", Sort::Int);
        assert_eq!(Term::from_snap(Term::to_snap(x.clone()), Sort::Int), x);
        let s = v("s", Sort::Snap);
        assert_eq!(Term::to_snap(Term::from_snap(s.clone(), Sort::Int)), s);
    }

    #[test]
    fn first_second_project_combines() {
        let a = v("a", Sort::Snap);
        let b = v("b", Sort::Snap);
        let c = Term::combine(a.clone(), b.clone());
        assert_eq!(Term::first(c.clone()), a);
        assert_eq!(Term::second(c), b);
    }

    #[test]
    fn sorts_are_computed_structurally() {
        let r = v("r", Sort::Ref);
        let fvf = v("vs", Sort::fvf(Sort::Int));
        let lk = Term::lookup("f", fvf.clone(), r.clone());
        assert_eq!(lk.sort(), Sort::Int);
        assert_eq!(Term::fvf_domain("f", fvf).sort(), Sort::set(Sort::Ref));
        assert_eq!(Term::eq(r.clone(), Term::Null).sort(), Sort::Bool);
        assert_eq!(Term::Null.sort(), Sort::Ref);
    }

    #[test]
    fn substitution_replaces_free_occurrences() {
        let x = v("x", Sort::Int);
        let t = Term::plus(x.clone(), Term::int(1));
        let r = t.substitute_var("x", &Term::int(41));
        assert_eq!(r, Term::IntLit(42));
    }

    #[test]
    fn substitution_preserves_sort() {
        let x = v("x", Sort::Int);
        let t = Term::less(x.clone(), Term::int(10));
        let replaced = t.substitute_var("x", &v("y", Sort::Int));
        assert_eq!(t.sort(), replaced.sort());
    }

    #[test]
    fn substitution_respects_shadowing() {
        // forall x :: x < y   — substituting x must not touch the bound x
        let body = Term::less(v("x", Sort::Int), v("y", Sort::Int));
        let q = Term::forall(
            vec![TermVar::new("x", Sort::Int)],
            body.clone(),
            vec![],
            "q0",
        );
        let r = q.substitute_var("x", &Term::int(5));
        assert_eq!(r, q);
    }

    #[test]
    fn substitution_avoids_capture() {
        // forall x :: x < y, substitute y := x  — the bound x must be renamed
        let body = Term::less(v("x", Sort::Int), v("y", Sort::Int));
        let q = Term::forall(
            vec![TermVar::new("x", Sort::Int)],
            body,
            vec![],
            "q1",
        );
        let r = q.substitute_var("y", &v("x", Sort::Int));
        match &r {
            Term::Quantification { vars, body, .. } => {
                assert_ne!(vars[0].name, "x");
                let fvs = body.free_var_names();
                assert!(fvs.contains("x"), "outer x must remain free: {:?}", fvs);
            }
            other => panic!("expected quantification, got {}", other),
        }
    }

    #[test]
    fn free_vars_exclude_bound() {
        let body = Term::less(v("i", Sort::Int), v("n", Sort::Int));
        let q = Term::forall(vec![TermVar::new("i", Sort::Int)], body, vec![], "q2");
        let fvs = q.free_var_names();
        assert!(fvs.contains("n"));
        assert!(!fvs.contains("i"));
    }

    #[test]
    fn find_subterms_collects_matching_nodes() {
        let s = v("s", Sort::set(Sort::Ref));
        let r = v("r", Sort::Ref);
        let t = Term::implies(
            Term::set_in(r.clone(), s.clone()),
            Term::neq(r.clone(), Term::Null),
        );
        let ins = t.find_subterms(&|t| matches!(t, Term::SetIn(..)));
        assert_eq!(ins.len(), 1);
        assert_eq!(ins[0], Term::set_in(r, s));
    }

    #[test]
    fn snap_args_encodes_tuples() {
        assert_eq!(Term::snap_args(vec![]), Term::Unit);
        let x = v("x", Sort::Int);
        let y = v("y", Sort::Ref);
        let two = Term::snap_args(vec![x.clone(), y.clone()]);
        assert_eq!(
            two,
            Term::combine(Term::to_snap(x), Term::to_snap(y))
        );
    }
}
