//! The pure expression-to-term translator.
//!
//! Domain axioms are translated — not symbolically evaluated — because they
//! live outside any method: there is no store, no heap, no path condition.
//! The translator is a side-effect-free structural recursion from AST
//! expressions to terms.
//!
//! Only the pure, heap-independent fragment is accepted. Field accesses,
//! `unfolding`, accessibility predicates, wands, wildcards, and
//! inhale-exhale assertions cannot occur in domain axioms; encountering one
//! is a bug in the front end, and the translator aborts.

use opaline_ast::{BinOp, Exp, ExpKind, Program, Type, UnOp};
use opaline_term::{Function, Sort, Term, TermVar};

/// Maps a surface type to its term sort.
pub fn sort_of_type(typ: &Type) -> Sort {
    match typ {
        Type::Int => Sort::Int,
        Type::Bool => Sort::Bool,
        Type::Perm => Sort::Perm,
        Type::Ref => Sort::Ref,
        Type::Seq(t) => Sort::seq(sort_of_type(t)),
        Type::Set(t) => Sort::set(sort_of_type(t)),
        Type::Multiset(t) => Sort::multiset(sort_of_type(t)),
        Type::Domain(name) => Sort::UserSort(name.clone()),
    }
}

/// Applies a binary operator to already-translated operands, dispatching on
/// their sorts (arithmetic is overloaded over `Int` and `Perm`, `in` over
/// the three collection kinds).
///
/// Shared between the translator and the evaluator; panics on operand
/// sorts the operator does not support, which the type checker rules out.
pub(crate) fn apply_binop(op: BinOp, l: Term, r: Term) -> Term {
    let perm_operands = l.sort() == Sort::Perm || r.sort() == Sort::Perm;
    match op {
        BinOp::Add => {
            if perm_operands {
                Term::perm_plus(l, r)
            } else {
                Term::plus(l, r)
            }
        }
        BinOp::Sub => {
            if perm_operands {
                Term::perm_minus(l, r)
            } else {
                Term::minus(l, r)
            }
        }
        BinOp::Mul => match (l.sort(), r.sort()) {
            (Sort::Perm, Sort::Perm) => Term::perm_times(l, r),
            (Sort::Int, Sort::Perm) => Term::int_perm_times(l, r),
            (Sort::Perm, Sort::Int) => Term::int_perm_times(r, l),
            _ => Term::times(l, r),
        },
        BinOp::Div => {
            if l.sort() == Sort::Perm {
                // p / n  ==  p * (1/n)
                Term::perm_times(l, Term::fraction_perm(Term::int(1), r))
            } else {
                Term::div(l, r)
            }
        }
        BinOp::Mod => Term::modulo(l, r),
        BinOp::And => Term::and(l, r),
        BinOp::Or => Term::or(l, r),
        BinOp::Implies => Term::implies(l, r),
        BinOp::Eq => Term::eq(l, r),
        BinOp::Ne => Term::neq(l, r),
        BinOp::Lt => {
            if perm_operands {
                Term::perm_less(l, r)
            } else {
                Term::less(l, r)
            }
        }
        BinOp::Le => {
            if perm_operands {
                Term::perm_at_most(l, r)
            } else {
                Term::at_most(l, r)
            }
        }
        BinOp::Gt => {
            if perm_operands {
                Term::perm_less(r, l)
            } else {
                Term::greater(l, r)
            }
        }
        BinOp::Ge => {
            if perm_operands {
                Term::perm_at_most(r, l)
            } else {
                Term::at_least(l, r)
            }
        }
        BinOp::In => match r.sort() {
            Sort::Set(_) => Term::set_in(l, r),
            Sort::Seq(_) => Term::SeqIn(Box::new(l), Box::new(r)),
            Sort::Multiset(_) => Term::greater(
                Term::MultisetCount(Box::new(r), Box::new(l)),
                Term::int(0),
            ),
            other => panic!("'in' applied to a non-collection of sort {}", other),
        },
        BinOp::Union => set_op(op, l, r, Term::SetUnion),
        BinOp::Intersection => set_op(op, l, r, Term::SetIntersect),
        BinOp::SetMinus => set_op(op, l, r, Term::SetDiff),
        BinOp::Subset => set_op(op, l, r, Term::SetSubset),
    }
}

fn set_op(op: BinOp, l: Term, r: Term, mk: fn(Box<Term>, Box<Term>) -> Term) -> Term {
    match l.sort() {
        Sort::Set(_) => mk(Box::new(l), Box::new(r)),
        other => panic!("{:?} applied to a non-set of sort {}", op, other),
    }
}

pub(crate) fn apply_unop(op: UnOp, t: Term) -> Term {
    match op {
        UnOp::Not => Term::not(t),
        UnOp::Neg => Term::minus(Term::int(0), t),
    }
}

/// Pure translator for domain axioms and other heap-free expressions.
pub struct Translator<'a> {
    program: &'a Program,
    bindings: Vec<(String, Term)>,
    qid_counter: u32,
}

impl<'a> Translator<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            bindings: Vec::new(),
            qid_counter: 0,
        }
    }

    /// A translator with free variables pre-bound (used by the quantified-
    /// permission rules, which translate the bound parts of a quantifier
    /// under the current store).
    pub fn with_bindings(program: &'a Program, bindings: Vec<(String, Term)>) -> Self {
        Self {
            program,
            bindings,
            qid_counter: 0,
        }
    }

    fn lookup(&self, name: &str) -> &Term {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
            .unwrap_or_else(|| panic!("unbound variable '{}' in pure translation", name))
    }

    /// Translates a pure expression. Panics on heap-dependent input.
    pub fn translate(&mut self, e: &Exp) -> Term {
        match &e.kind {
            ExpKind::IntLit(n) => Term::int(*n),
            ExpKind::BoolLit(b) => Term::bool_lit(*b),
            ExpKind::NullLit => Term::Null,
            ExpKind::LocalVar(name, _) => self.lookup(name).clone(),

            ExpKind::Unary { op, expr } => apply_unop(*op, self.translate(expr)),
            ExpKind::Binary { op, left, right } => {
                let l = self.translate(left);
                let r = self.translate(right);
                apply_binop(*op, l, r)
            }
            ExpKind::CondExp {
                cond,
                then_exp,
                else_exp,
            } => Term::ite(
                self.translate(cond),
                self.translate(then_exp),
                self.translate(else_exp),
            ),

            ExpKind::Let { var, bound, body } => {
                let bound_term = self.translate(bound);
                let let_var = TermVar::new(var.name.clone(), bound_term.sort());
                self.bindings
                    .push((var.name.clone(), Term::Var(let_var.clone())));
                let body_term = self.translate(body);
                self.bindings.pop();
                Term::let_binding(let_var, bound_term, body_term)
            }

            ExpKind::FullPerm => Term::FullPerm,
            ExpKind::NoPerm => Term::NoPerm,
            ExpKind::FractionalPerm { left, right } => {
                let l = self.translate(left);
                let r = self.translate(right);
                match l.sort() {
                    Sort::Int => Term::fraction_perm(l, r),
                    Sort::Perm => Term::perm_times(l, Term::fraction_perm(Term::int(1), r)),
                    other => panic!("fractional permission over sort {}", other),
                }
            }

            ExpKind::Forall {
                vars,
                triggers,
                body,
            } => {
                let qvars: Vec<TermVar> = vars
                    .iter()
                    .map(|v| TermVar::new(v.name.clone(), sort_of_type(&v.typ)))
                    .collect();
                for v in &qvars {
                    self.bindings.push((v.name.clone(), Term::Var(v.clone())));
                }
                let trigger_terms: Vec<Vec<Term>> = triggers
                    .iter()
                    .map(|trig| trig.iter().map(|t| self.translate(t)).collect())
                    .collect();
                let body_term = self.translate(body);
                for _ in &qvars {
                    self.bindings.pop();
                }
                let name = self.next_qid();
                Term::forall(qvars, body_term, trigger_terms, name)
            }
            ExpKind::Exists { vars, body } => {
                let qvars: Vec<TermVar> = vars
                    .iter()
                    .map(|v| TermVar::new(v.name.clone(), sort_of_type(&v.typ)))
                    .collect();
                for v in &qvars {
                    self.bindings.push((v.name.clone(), Term::Var(v.clone())));
                }
                let body_term = self.translate(body);
                for _ in &qvars {
                    self.bindings.pop();
                }
                let name = self.next_qid();
                Term::exists(qvars, body_term, name)
            }

            ExpKind::FuncApp { function, args } => {
                let decl = self
                    .program
                    .find_domain_func(function)
                    .unwrap_or_else(|| panic!("unknown domain function '{}'", function));
                let f = Function::new(
                    decl.name.clone(),
                    decl.formal_args.iter().map(sort_of_type).collect(),
                    sort_of_type(&decl.return_type),
                );
                let targs = args.iter().map(|a| self.translate(a)).collect();
                Term::App {
                    function: f,
                    args: targs,
                }
            }

            ExpKind::SeqLength(s) => {
                let t = self.translate(s);
                match t.sort() {
                    Sort::Seq(_) => Term::SeqLength(Box::new(t)),
                    other => panic!("|.| applied to sort {}", other),
                }
            }
            ExpKind::SeqIndex { seq, idx } => {
                Term::seq_at(self.translate(seq), self.translate(idx))
            }
            ExpKind::EmptySeq(t) => Term::SeqEmpty(sort_of_type(t)),
            ExpKind::ExplicitSeq(es) => {
                let mut terms = es.iter().map(|e| self.translate(e));
                let first = terms
                    .next()
                    .unwrap_or_else(|| panic!("explicit sequence literal must be non-empty"));
                let mut acc = Term::SeqSingleton(Box::new(first));
                for t in terms {
                    acc = Term::SeqAppend(
                        Box::new(acc),
                        Box::new(Term::SeqSingleton(Box::new(t))),
                    );
                }
                acc
            }

            ExpKind::EmptySet(t) => Term::SetEmpty(sort_of_type(t)),
            ExpKind::ExplicitSet(es) => {
                let mut terms = es.iter().map(|e| self.translate(e));
                let first = terms
                    .next()
                    .unwrap_or_else(|| panic!("explicit set literal must be non-empty"));
                let mut acc = Term::SetSingleton(Box::new(first));
                for t in terms {
                    acc = Term::SetAdd(Box::new(acc), Box::new(t));
                }
                acc
            }
            ExpKind::SetCardinality(s) => {
                let t = self.translate(s);
                match t.sort() {
                    Sort::Set(_) => Term::SetCard(Box::new(t)),
                    Sort::Multiset(_) => Term::MultisetCard(Box::new(t)),
                    other => panic!("cardinality applied to sort {}", other),
                }
            }

            ExpKind::WildcardPerm
            | ExpKind::FieldAccess { .. }
            | ExpKind::FieldAccessPredicate { .. }
            | ExpKind::PredicateAccessPredicate { .. }
            | ExpKind::MagicWand { .. }
            | ExpKind::InhaleExhale { .. } => {
                panic!("heap-dependent expression {} reached the pure translator", e)
            }
        }
    }

    fn next_qid(&mut self) -> String {
        let id = format!("prog.q{}", self.qid_counter);
        self.qid_counter += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opaline_ast::{Domain, DomainFunc, LocalVarDecl};

    fn empty_program() -> Program {
        Program::new()
    }

    #[test]
    fn arithmetic_translates_with_int_dispatch() {
        let p = empty_program();
        let mut tr = Translator::with_bindings(
            &p,
            vec![("x".into(), Term::Var(TermVar::new("x@0", Sort::Int)))],
        );
        let e = Exp::binary(
            BinOp::Add,
            Exp::local_var("x", Type::Int),
            Exp::int_lit(1),
        );
        let t = tr.translate(&e);
        assert_eq!(t.sort(), Sort::Int);
        assert!(matches!(t, Term::Plus(..)));
    }

    #[test]
    fn perm_arithmetic_dispatches_on_sort() {
        let p = empty_program();
        let mut tr = Translator::with_bindings(
            &p,
            vec![("p".into(), Term::Var(TermVar::new("p@0", Sort::Perm)))],
        );
        let e = Exp::binary(
            BinOp::Add,
            Exp::local_var("p", Type::Perm),
            Exp::fractional_perm(Exp::int_lit(1), Exp::int_lit(2)),
        );
        let t = tr.translate(&e);
        assert_eq!(t.sort(), Sort::Perm);
        assert!(matches!(t, Term::PermPlus(..)));
    }

    #[test]
    fn quantifier_binds_its_variables() {
        let p = empty_program();
        let mut tr = Translator::new(&p);
        let body = Exp::binary(
            BinOp::Ge,
            Exp::local_var("i", Type::Int),
            Exp::int_lit(0),
        );
        let e = Exp::forall(vec![LocalVarDecl::new("i", Type::Int)], vec![], body);
        let t = tr.translate(&e);
        match &t {
            Term::Quantification { vars, .. } => assert_eq!(vars[0].name, "i"),
            other => panic!("expected quantification, got {}", other),
        }
        assert!(t.free_var_names().is_empty());
    }

    #[test]
    fn domain_functions_get_their_declared_signature() {
        let p = Program::new().with_domain(Domain::new(
            "Math",
            vec![DomainFunc::new("abs", vec![Type::Int], Type::Int)],
            vec![],
        ));
        let mut tr = Translator::new(&p);
        let e = Exp::func_app("abs", vec![Exp::int_lit(-3)]);
        let t = tr.translate(&e);
        assert_eq!(t.sort(), Sort::Int);
    }

    #[test]
    #[should_panic(expected = "pure translator")]
    fn heap_access_aborts() {
        let p = empty_program();
        let mut tr = Translator::new(&p);
        let e = Exp::field_access(Exp::local_var("x", Type::Ref), "f");
        tr.translate(&e);
    }

    #[test]
    #[should_panic(expected = "unbound variable")]
    fn unbound_variable_aborts() {
        let p = empty_program();
        let mut tr = Translator::new(&p);
        tr.translate(&Exp::local_var("ghost", Type::Int));
    }
}
