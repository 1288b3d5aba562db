//! Rendering sorts, terms, and declarations as SMT-LIB2.
//!
//! Parametric sorts and their operations are monomorphized by mangling the
//! element sort into the symbol name (`$Seq.length<Int>`); the matching
//! declarations come from [`crate::preamble`]. Angle brackets, `$`, and `.`
//! are all legal SMT-LIB simple-symbol characters, so no quoting is needed.
//!
//! Permissions are reals: `$Perm` is a defined sort alias, with `$Perm.No`
//! and `$Perm.Write` as the two distinguished constants.

use opaline_term::sort::Sort;
use opaline_term::term::{Quantifier, Term, TermVar};
use opaline_term::Function;
use std::fmt::Write as _;

/// A declaration shipped to the solver.
#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    /// `(declare-sort <id> 0)`
    Sort(Sort),
    /// `(declare-const <name> <sort>)`
    Const { name: String, sort: Sort },
    /// `(declare-fun <name> (<args>) <result>)`
    Func(Function),
    /// `(define-fun <name> ((<p> <sort>)…) <result> <body>)` — used for the
    /// permission macros of the split algorithm.
    DefineFun {
        name: String,
        params: Vec<TermVar>,
        result: Sort,
        body: Term,
    },
}

/// Renders a sort reference.
pub fn sort_to_smt(sort: &Sort) -> String {
    sort.id()
}

/// Renders a declaration as one SMT-LIB command.
pub fn decl_to_smt(decl: &Decl) -> String {
    match decl {
        Decl::Sort(sort) => format!("(declare-sort {} 0)", sort.id()),
        Decl::Const { name, sort } => {
            format!("(declare-const {} {})", name, sort_to_smt(sort))
        }
        Decl::Func(function) => {
            let args: Vec<String> = function.arg_sorts.iter().map(sort_to_smt).collect();
            format!(
                "(declare-fun {} ({}) {})",
                function.name,
                args.join(" "),
                sort_to_smt(&function.result_sort)
            )
        }
        Decl::DefineFun {
            name,
            params,
            result,
            body,
        } => {
            let ps: Vec<String> = params
                .iter()
                .map(|p| format!("({} {})", p.name, sort_to_smt(&p.sort)))
                .collect();
            format!(
                "(define-fun {} ({}) {} {})",
                name,
                ps.join(" "),
                sort_to_smt(result),
                term_to_smt(body)
            )
        }
    }
}

/// Renders a term as an SMT-LIB s-expression.
pub fn term_to_smt(term: &Term) -> String {
    let mut out = String::new();
    render(term, &mut out);
    out
}

fn render(term: &Term, out: &mut String) {
    use Term::*;
    match term {
        IntLit(n) => {
            if *n < 0 {
                let _ = write!(out, "(- {})", n.unsigned_abs());
            } else {
                let _ = write!(out, "{}", n);
            }
        }
        True => out.push_str("true"),
        False => out.push_str("false"),
        Null => out.push_str("$Ref.null"),
        Unit => out.push_str("$Snap.unit"),
        Var(v) => out.push_str(&v.name),

        Plus(a, b) => app2(out, "+", a, b),
        Minus(a, b) => app2(out, "-", a, b),
        Times(a, b) => app2(out, "*", a, b),
        Div(a, b) => app2(out, "div", a, b),
        Mod(a, b) => app2(out, "mod", a, b),

        Not(a) => app1(out, "not", a),
        And(ts) => napp(out, "and", ts),
        Or(ts) => napp(out, "or", ts),
        Implies(a, b) => app2(out, "=>", a, b),
        Iff(a, b) => app2(out, "=", a, b),
        Ite(c, a, b) => {
            out.push_str("(ite ");
            render(c, out);
            out.push(' ');
            render(a, out);
            out.push(' ');
            render(b, out);
            out.push(')');
        }

        Equals(a, b) => app2(out, "=", a, b),
        Less(a, b) => app2(out, "<", a, b),
        AtMost(a, b) => app2(out, "<=", a, b),
        Greater(a, b) => app2(out, ">", a, b),
        AtLeast(a, b) => app2(out, ">=", a, b),

        NoPerm => out.push_str("$Perm.No"),
        FullPerm => out.push_str("$Perm.Write"),
        FractionPerm(n, d) => {
            out.push_str("(/ ");
            render_as_real(n, out);
            out.push(' ');
            render_as_real(d, out);
            out.push(')');
        }
        PermPlus(a, b) => app2(out, "+", a, b),
        PermMinus(a, b) => app2(out, "-", a, b),
        PermTimes(a, b) => app2(out, "*", a, b),
        IntPermTimes(n, p) => {
            out.push_str("(* ");
            render_as_real(n, out);
            out.push(' ');
            render(p, out);
            out.push(')');
        }
        PermMin(a, b) => app2(out, "$Perm.min", a, b),
        PermLess(a, b) => app2(out, "<", a, b),
        PermAtMost(a, b) => app2(out, "<=", a, b),
        IsPositive(p) => {
            out.push_str("(< $Perm.No ");
            render(p, out);
            out.push(')');
        }
        IsNonNegative(p) => {
            out.push_str("(<= $Perm.No ");
            render(p, out);
            out.push(')');
        }

        Quantification {
            quantifier,
            vars,
            body,
            triggers,
            name,
        } => {
            let q = match quantifier {
                Quantifier::Forall => "forall",
                Quantifier::Exists => "exists",
            };
            let _ = write!(out, "({} (", q);
            for (i, v) in vars.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                let _ = write!(out, "({} {})", v.name, sort_to_smt(&v.sort));
            }
            out.push_str(") ");
            let annotated = !triggers.is_empty() || !name.is_empty();
            if annotated {
                out.push_str("(! ");
            }
            render(body, out);
            for trig in triggers {
                out.push_str(" :pattern (");
                for (i, t) in trig.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    render(t, out);
                }
                out.push(')');
            }
            if !name.is_empty() {
                let _ = write!(out, " :qid {}", name);
            }
            if annotated {
                out.push(')');
            }
            out.push(')');
        }

        App { function, args } => {
            if args.is_empty() {
                out.push_str(&function.name);
            } else {
                let _ = write!(out, "({}", function.name);
                for a in args {
                    out.push(' ');
                    render(a, out);
                }
                out.push(')');
            }
        }

        SeqLength(s) => coll1(out, "$Seq.length", &elem_of(s), s),
        SeqAt(s, i) => coll2(out, "$Seq.at", &elem_of(s), s, i),
        SeqEmpty(e) => {
            let _ = write!(out, "$Seq.empty<{}>", e.id());
        }
        SeqSingleton(e) => {
            let _ = write!(out, "($Seq.singleton<{}> ", e.sort().id());
            render(e, out);
            out.push(')');
        }
        SeqAppend(a, b) => coll2(out, "$Seq.append", &elem_of(a), a, b),
        SeqIn(e, s) => coll2_rev(out, "$Seq.in", &elem_of(s), e, s),

        SetEmpty(e) => {
            let _ = write!(out, "$Set.empty<{}>", e.id());
        }
        SetSingleton(e) => {
            let _ = write!(out, "($Set.singleton<{}> ", e.sort().id());
            render(e, out);
            out.push(')');
        }
        SetAdd(s, e) => coll2(out, "$Set.add", &elem_of(s), s, e),
        SetUnion(a, b) => coll2(out, "$Set.union", &elem_of(a), a, b),
        SetIntersect(a, b) => coll2(out, "$Set.inter", &elem_of(a), a, b),
        SetDiff(a, b) => coll2(out, "$Set.diff", &elem_of(a), a, b),
        SetSubset(a, b) => coll2(out, "$Set.subset", &elem_of(a), a, b),
        SetIn(e, s) => coll2_rev(out, "$Set.in", &elem_of(s), e, s),
        SetCard(s) => coll1(out, "$Set.card", &elem_of(s), s),

        MultisetEmpty(e) => {
            let _ = write!(out, "$Multiset.empty<{}>", e.id());
        }
        MultisetAdd(s, e) => coll2(out, "$Multiset.add", &elem_of(s), s, e),
        MultisetCount(s, e) => coll2(out, "$Multiset.count", &elem_of(s), s, e),
        MultisetCard(s) => coll1(out, "$Multiset.card", &elem_of(s), s),

        Combine(a, b) => app2(out, "$Snap.combine", a, b),
        First(s) => app1(out, "$Snap.first", s),
        Second(s) => app1(out, "$Snap.second", s),
        ToSnap(t) => {
            let _ = write!(out, "($SortWrappers.{}To$Snap ", t.sort().id());
            render(t, out);
            out.push(')');
        }
        FromSnap(s, sort) => {
            let _ = write!(out, "($SortWrappers.$SnapTo{} ", sort.id());
            render(s, out);
            out.push(')');
        }

        Lookup {
            field,
            fvf,
            receiver,
        } => {
            let _ = write!(out, "($FVF.lookup_{} ", field);
            render(fvf, out);
            out.push(' ');
            render(receiver, out);
            out.push(')');
        }
        Domain { field, fvf } => {
            let _ = write!(out, "($FVF.domain_{} ", field);
            render(fvf, out);
            out.push(')');
        }
        PredLookup {
            predicate,
            psf,
            args,
        } => {
            let _ = write!(out, "($PSF.lookup_{} ", predicate);
            render(psf, out);
            out.push(' ');
            render(args, out);
            out.push(')');
        }
        PredDomain { predicate, psf } => {
            let _ = write!(out, "($PSF.domain_{} ", predicate);
            render(psf, out);
            out.push(')');
        }

        Let { var, bound, body } => {
            let _ = write!(out, "(let (({} ", var.name);
            render(bound, out);
            out.push_str(")) ");
            render(body, out);
            out.push(')');
        }
    }
}

/// Integer-sorted terms inside permission arithmetic need a real coercion.
fn render_as_real(t: &Term, out: &mut String) {
    match t {
        Term::IntLit(n) => {
            if *n < 0 {
                let _ = write!(out, "(- {}.0)", n.unsigned_abs());
            } else {
                let _ = write!(out, "{}.0", n);
            }
        }
        other => {
            out.push_str("(to_real ");
            render(other, out);
            out.push(')');
        }
    }
}

fn elem_of(collection: &Term) -> String {
    match collection.sort().element() {
        Some(e) => e.id(),
        None => panic!(
            "collection operation applied to term of sort {}",
            collection.sort()
        ),
    }
}

fn app1(out: &mut String, op: &str, a: &Term) {
    let _ = write!(out, "({} ", op);
    render(a, out);
    out.push(')');
}

fn app2(out: &mut String, op: &str, a: &Term, b: &Term) {
    let _ = write!(out, "({} ", op);
    render(a, out);
    out.push(' ');
    render(b, out);
    out.push(')');
}

fn napp(out: &mut String, op: &str, ts: &[Term]) {
    match ts.len() {
        0 => out.push_str(if op == "and" { "true" } else { "false" }),
        1 => render(&ts[0], out),
        _ => {
            let _ = write!(out, "({}", op);
            for t in ts {
                out.push(' ');
                render(t, out);
            }
            out.push(')');
        }
    }
}

fn coll1(out: &mut String, op: &str, elem: &str, a: &Term) {
    let _ = write!(out, "({}<{}> ", op, elem);
    render(a, out);
    out.push(')');
}

fn coll2(out: &mut String, op: &str, elem: &str, a: &Term, b: &Term) {
    let _ = write!(out, "({}<{}> ", op, elem);
    render(a, out);
    out.push(' ');
    render(b, out);
    out.push(')');
}

/// Like [`coll2`] but the element precedes the collection in our term order
/// while the SMT function takes `(elem, collection)` as well; kept separate
/// for readability at call sites.
fn coll2_rev(out: &mut String, op: &str, elem: &str, e: &Term, s: &Term) {
    coll2(out, op, elem, e, s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opaline_term::TermVar;

    fn v(name: &str, sort: Sort) -> Term {
        Term::Var(TermVar::new(name, sort))
    }

    #[test]
    fn literals_and_arithmetic() {
        assert_eq!(term_to_smt(&Term::int(42)), "42");
        assert_eq!(term_to_smt(&Term::IntLit(-3)), "(- 3)");
        let t = Term::Plus(Box::new(Term::int(1)), Box::new(v("x", Sort::Int)));
        assert_eq!(term_to_smt(&t), "(+ 1 x)");
    }

    #[test]
    fn permissions_render_as_reals() {
        assert_eq!(term_to_smt(&Term::NoPerm), "$Perm.No");
        assert_eq!(term_to_smt(&Term::FullPerm), "$Perm.Write");
        let half = Term::FractionPerm(Box::new(Term::int(1)), Box::new(Term::int(2)));
        assert_eq!(term_to_smt(&half), "(/ 1.0 2.0)");
        assert_eq!(
            term_to_smt(&Term::IsPositive(Box::new(v("p", Sort::Perm)))),
            "(< $Perm.No p)"
        );
    }

    #[test]
    fn fraction_over_symbolic_terms_coerces() {
        let p = Term::FractionPerm(Box::new(v("n", Sort::Int)), Box::new(Term::int(2)));
        assert_eq!(term_to_smt(&p), "(/ (to_real n) 2.0)");
    }

    #[test]
    fn quantifier_with_trigger_and_qid() {
        let r = TermVar::new("r", Sort::Ref);
        let s = v("s", Sort::set(Sort::Ref));
        let body = Term::implies(
            Term::set_in(v("r", Sort::Ref), s),
            Term::neq(v("r", Sort::Ref), Term::Null),
        );
        let trig = vec![vec![Term::set_in(
            v("r", Sort::Ref),
            v("s", Sort::set(Sort::Ref)),
        )]];
        let q = Term::forall(vec![r], body, trig, "qp.nonnull");
        let smt = term_to_smt(&q);
        assert!(smt.starts_with("(forall ((r $Ref))"));
        assert!(smt.contains(":pattern (($Set.in<$Ref> r s))"));
        assert!(smt.contains(":qid qp.nonnull"));
    }

    #[test]
    fn collection_symbols_are_monomorphized() {
        let s = v("s", Sort::set(Sort::Ref));
        let t = Term::set_in(v("r", Sort::Ref), s.clone());
        assert_eq!(term_to_smt(&t), "($Set.in<$Ref> r s)");
        assert_eq!(
            term_to_smt(&Term::SetCard(Box::new(s))),
            "($Set.card<$Ref> s)"
        );
        let a = v("a", Sort::seq(Sort::Ref));
        assert_eq!(
            term_to_smt(&Term::seq_at(a, Term::int(0))),
            "($Seq.at<$Ref> a 0)"
        );
    }

    #[test]
    fn snapshot_plumbing() {
        let x = v("x", Sort::Int);
        assert_eq!(
            term_to_smt(&Term::ToSnap(Box::new(x))),
            "($SortWrappers.IntTo$Snap x)"
        );
        let s = v("s", Sort::Snap);
        assert_eq!(
            term_to_smt(&Term::FromSnap(Box::new(s.clone()), Sort::Ref)),
            "($SortWrappers.$SnapTo$Ref s)"
        );
        assert_eq!(
            term_to_smt(&Term::combine(Term::Unit, s)),
            "($Snap.combine $Snap.unit s)"
        );
    }

    #[test]
    fn fvf_lookup_renders_per_field() {
        let fvf = v("vs", Sort::fvf(Sort::Int));
        let t = Term::lookup("val", fvf.clone(), v("r", Sort::Ref));
        assert_eq!(term_to_smt(&t), "($FVF.lookup_val vs r)");
        assert_eq!(
            term_to_smt(&Term::fvf_domain("val", fvf)),
            "($FVF.domain_val vs)"
        );
    }

    #[test]
    fn declarations_render() {
        assert_eq!(
            decl_to_smt(&Decl::Sort(Sort::fvf(Sort::Int))),
            "(declare-sort $FVF<Int> 0)"
        );
        assert_eq!(
            decl_to_smt(&Decl::Const {
                name: "r@0".into(),
                sort: Sort::Ref
            }),
            "(declare-const r@0 $Ref)"
        );
        let f = Function::new("inv@1", vec![Sort::Ref], Sort::Int);
        assert_eq!(
            decl_to_smt(&Decl::Func(f)),
            "(declare-fun inv@1 ($Ref) Int)"
        );
        let m = Decl::DefineFun {
            name: "pTaken@0".into(),
            params: vec![TermVar::new("r", Sort::Ref)],
            result: Sort::Perm,
            body: Term::NoPerm,
        };
        assert_eq!(
            decl_to_smt(&m),
            "(define-fun pTaken@0 ((r $Ref)) $Perm $Perm.No)"
        );
    }
}
