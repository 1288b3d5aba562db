//! Expressions and assertions of the verification language.
//!
//! There is no syntactic distinction between boolean expressions and
//! assertions: an assertion is an expression that may additionally contain
//! accessibility predicates (`acc(x.f, p)`, `acc(P(e), p)`), quantified
//! permissions, magic wands, and inhale-exhale pairs. [`Exp::is_pure`]
//! separates the two worlds.
//!
//! Every expression carries a [`Span`]. The convenience constructors
//! synthesize spans by merging their children's, so programmatically built
//! trees keep usable positions without any front end.

use opaline_base::Span;
use std::fmt;

/// Types of the verification language.
///
/// These are the *surface* types of programs; the term algebra has its own
/// sort lattice which additionally knows about snapshots and field-value
/// functions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Bool,
    Perm,
    Ref,
    Seq(Box<Type>),
    Set(Box<Type>),
    Multiset(Box<Type>),
    /// A user-declared (domain) type, uninterpreted at this level.
    Domain(String),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "Int"),
            Type::Bool => write!(f, "Bool"),
            Type::Perm => write!(f, "Perm"),
            Type::Ref => write!(f, "Ref"),
            Type::Seq(t) => write!(f, "Seq[{}]", t),
            Type::Set(t) => write!(f, "Set[{}]", t),
            Type::Multiset(t) => write!(f, "Multiset[{}]", t),
            Type::Domain(name) => write!(f, "{}", name),
        }
    }
}

/// A typed variable binder: method formals, let bindings, quantified vars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVarDecl {
    pub name: String,
    pub typ: Type,
}

impl LocalVarDecl {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

impl fmt::Display for LocalVarDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.typ)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Boolean negation.
    Not,
    /// Integer negation.
    Neg,
}

/// Binary operators.
///
/// Arithmetic operators are overloaded over `Int` and `Perm`; the evaluator
/// dispatches on the operand types. `In` covers set, multiset, and sequence
/// membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Implies,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Union,
    Intersection,
    SetMinus,
    Subset,
}

/// An expression (or assertion) with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Exp {
    pub kind: ExpKind,
    pub span: Span,
}

/// The shape of an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpKind {
    IntLit(i64),
    BoolLit(bool),
    NullLit,

    /// A local variable with its declared type.
    LocalVar(String, Type),

    Unary {
        op: UnOp,
        expr: Box<Exp>,
    },
    Binary {
        op: BinOp,
        left: Box<Exp>,
        right: Box<Exp>,
    },
    /// `cond ? then_exp : else_exp`
    CondExp {
        cond: Box<Exp>,
        then_exp: Box<Exp>,
        else_exp: Box<Exp>,
    },
    /// `let x == (e) in body`
    Let {
        var: LocalVarDecl,
        bound: Box<Exp>,
        body: Box<Exp>,
    },

    /// `x.f` — heap-dependent field read.
    FieldAccess {
        receiver: Box<Exp>,
        field: String,
    },

    // ---- Permission amounts ----
    /// `write`
    FullPerm,
    /// `none`
    NoPerm,
    /// `l/r`
    FractionalPerm {
        left: Box<Exp>,
        right: Box<Exp>,
    },
    /// `wildcard` — some unknown positive amount.
    WildcardPerm,

    // ---- Accessibility predicates ----
    /// `acc(x.f, p)`
    FieldAccessPredicate {
        receiver: Box<Exp>,
        field: String,
        perm: Box<Exp>,
    },
    /// `acc(P(args), p)`
    PredicateAccessPredicate {
        predicate: String,
        args: Vec<Exp>,
        perm: Box<Exp>,
    },

    // ---- Quantifiers ----
    /// `forall xs :: {triggers} body`. When `body` contains accessibility
    /// predicates this is a quantified permission assertion.
    Forall {
        vars: Vec<LocalVarDecl>,
        triggers: Vec<Vec<Exp>>,
        body: Box<Exp>,
    },
    Exists {
        vars: Vec<LocalVarDecl>,
        body: Box<Exp>,
    },

    /// Application of a domain function.
    FuncApp {
        function: String,
        args: Vec<Exp>,
    },

    // ---- Sequences ----
    /// `|s|`
    SeqLength(Box<Exp>),
    /// `s[i]`
    SeqIndex {
        seq: Box<Exp>,
        idx: Box<Exp>,
    },
    EmptySeq(Type),
    ExplicitSeq(Vec<Exp>),

    // ---- Sets ----
    EmptySet(Type),
    ExplicitSet(Vec<Exp>),
    /// `|s|` over sets.
    SetCardinality(Box<Exp>),

    /// `left --* right`
    MagicWand {
        left: Box<Exp>,
        right: Box<Exp>,
    },

    /// `[inhale_exp, exhale_exp]` — asymmetric assertion.
    InhaleExhale {
        inhale: Box<Exp>,
        exhale: Box<Exp>,
    },
}

impl Exp {
    pub fn new(kind: ExpKind, span: Span) -> Self {
        Self { kind, span }
    }

    // ---- Convenience constructors (synthesized spans) ----

    pub fn int_lit(n: i64) -> Self {
        Self::new(ExpKind::IntLit(n), Span::unknown())
    }

    pub fn bool_lit(b: bool) -> Self {
        Self::new(ExpKind::BoolLit(b), Span::unknown())
    }

    pub fn null() -> Self {
        Self::new(ExpKind::NullLit, Span::unknown())
    }

    pub fn local_var(name: impl Into<String>, typ: Type) -> Self {
        Self::new(ExpKind::LocalVar(name.into(), typ), Span::unknown())
    }

    pub fn unary(op: UnOp, expr: Exp) -> Self {
        let span = expr.span;
        Self::new(
            ExpKind::Unary {
                op,
                expr: Box::new(expr),
            },
            span,
        )
    }

    pub fn binary(op: BinOp, left: Exp, right: Exp) -> Self {
        let span = left.span.to(right.span);
        Self::new(
            ExpKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    pub fn and(left: Exp, right: Exp) -> Self {
        Self::binary(BinOp::And, left, right)
    }

    pub fn implies(left: Exp, right: Exp) -> Self {
        Self::binary(BinOp::Implies, left, right)
    }

    pub fn eq_cmp(left: Exp, right: Exp) -> Self {
        Self::binary(BinOp::Eq, left, right)
    }

    pub fn not(expr: Exp) -> Self {
        Self::unary(UnOp::Not, expr)
    }

    pub fn cond(cond: Exp, then_exp: Exp, else_exp: Exp) -> Self {
        let span = cond.span.to(else_exp.span);
        Self::new(
            ExpKind::CondExp {
                cond: Box::new(cond),
                then_exp: Box::new(then_exp),
                else_exp: Box::new(else_exp),
            },
            span,
        )
    }

    pub fn field_access(receiver: Exp, field: impl Into<String>) -> Self {
        let span = receiver.span;
        Self::new(
            ExpKind::FieldAccess {
                receiver: Box::new(receiver),
                field: field.into(),
            },
            span,
        )
    }

    pub fn full_perm() -> Self {
        Self::new(ExpKind::FullPerm, Span::unknown())
    }

    pub fn no_perm() -> Self {
        Self::new(ExpKind::NoPerm, Span::unknown())
    }

    pub fn fractional_perm(left: Exp, right: Exp) -> Self {
        let span = left.span.to(right.span);
        Self::new(
            ExpKind::FractionalPerm {
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    pub fn wildcard_perm() -> Self {
        Self::new(ExpKind::WildcardPerm, Span::unknown())
    }

    pub fn acc_field(receiver: Exp, field: impl Into<String>, perm: Exp) -> Self {
        let span = receiver.span.to(perm.span);
        Self::new(
            ExpKind::FieldAccessPredicate {
                receiver: Box::new(receiver),
                field: field.into(),
                perm: Box::new(perm),
            },
            span,
        )
    }

    pub fn acc_predicate(predicate: impl Into<String>, args: Vec<Exp>, perm: Exp) -> Self {
        let span = perm.span;
        Self::new(
            ExpKind::PredicateAccessPredicate {
                predicate: predicate.into(),
                args,
                perm: Box::new(perm),
            },
            span,
        )
    }

    pub fn forall(vars: Vec<LocalVarDecl>, triggers: Vec<Vec<Exp>>, body: Exp) -> Self {
        let span = body.span;
        Self::new(
            ExpKind::Forall {
                vars,
                triggers,
                body: Box::new(body),
            },
            span,
        )
    }

    pub fn exists(vars: Vec<LocalVarDecl>, body: Exp) -> Self {
        let span = body.span;
        Self::new(
            ExpKind::Exists {
                vars,
                body: Box::new(body),
            },
            span,
        )
    }

    pub fn func_app(function: impl Into<String>, args: Vec<Exp>) -> Self {
        Self::new(
            ExpKind::FuncApp {
                function: function.into(),
                args,
            },
            Span::unknown(),
        )
    }

    pub fn seq_length(seq: Exp) -> Self {
        let span = seq.span;
        Self::new(ExpKind::SeqLength(Box::new(seq)), span)
    }

    pub fn seq_index(seq: Exp, idx: Exp) -> Self {
        let span = seq.span.to(idx.span);
        Self::new(
            ExpKind::SeqIndex {
                seq: Box::new(seq),
                idx: Box::new(idx),
            },
            span,
        )
    }

    pub fn set_in(elem: Exp, set: Exp) -> Self {
        Self::binary(BinOp::In, elem, set)
    }

    pub fn magic_wand(left: Exp, right: Exp) -> Self {
        let span = left.span.to(right.span);
        Self::new(
            ExpKind::MagicWand {
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    pub fn inhale_exhale(inhale: Exp, exhale: Exp) -> Self {
        let span = inhale.span.to(exhale.span);
        Self::new(
            ExpKind::InhaleExhale {
                inhale: Box::new(inhale),
                exhale: Box::new(exhale),
            },
            span,
        )
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    // ---- Structural utilities ----

    /// Splits `a && b && c` into `[a, b, c]`, recursively, left to right.
    ///
    /// Non-conjunction expressions yield themselves. The producer and
    /// consumer iterate the result so that snapshots can be distributed
    /// along the conjunct structure.
    pub fn top_level_conjuncts(&self) -> Vec<&Exp> {
        let mut out = Vec::new();
        self.collect_conjuncts(&mut out);
        out
    }

    fn collect_conjuncts<'a>(&'a self, out: &mut Vec<&'a Exp>) {
        match &self.kind {
            ExpKind::Binary {
                op: BinOp::And,
                left,
                right,
            } => {
                left.collect_conjuncts(out);
                right.collect_conjuncts(out);
            }
            _ => out.push(self),
        }
    }

    /// Resolves every inhale-exhale assertion in the tree to its inhale face.
    pub fn when_inhaling(&self) -> Exp {
        self.resolve_inhale_exhale(true)
    }

    /// Resolves every inhale-exhale assertion in the tree to its exhale face.
    pub fn when_exhaling(&self) -> Exp {
        self.resolve_inhale_exhale(false)
    }

    fn resolve_inhale_exhale(&self, inhaling: bool) -> Exp {
        let kind = match &self.kind {
            ExpKind::InhaleExhale { inhale, exhale } => {
                let side = if inhaling { inhale } else { exhale };
                return side.resolve_inhale_exhale(inhaling);
            }
            ExpKind::Unary { op, expr } => ExpKind::Unary {
                op: *op,
                expr: Box::new(expr.resolve_inhale_exhale(inhaling)),
            },
            ExpKind::Binary { op, left, right } => ExpKind::Binary {
                op: *op,
                left: Box::new(left.resolve_inhale_exhale(inhaling)),
                right: Box::new(right.resolve_inhale_exhale(inhaling)),
            },
            ExpKind::CondExp {
                cond,
                then_exp,
                else_exp,
            } => ExpKind::CondExp {
                cond: Box::new(cond.resolve_inhale_exhale(inhaling)),
                then_exp: Box::new(then_exp.resolve_inhale_exhale(inhaling)),
                else_exp: Box::new(else_exp.resolve_inhale_exhale(inhaling)),
            },
            ExpKind::Let { var, bound, body } => ExpKind::Let {
                var: var.clone(),
                bound: Box::new(bound.resolve_inhale_exhale(inhaling)),
                body: Box::new(body.resolve_inhale_exhale(inhaling)),
            },
            ExpKind::Forall {
                vars,
                triggers,
                body,
            } => ExpKind::Forall {
                vars: vars.clone(),
                triggers: triggers.clone(),
                body: Box::new(body.resolve_inhale_exhale(inhaling)),
            },
            ExpKind::Exists { vars, body } => ExpKind::Exists {
                vars: vars.clone(),
                body: Box::new(body.resolve_inhale_exhale(inhaling)),
            },
            _ => self.kind.clone(),
        };
        Exp::new(kind, self.span)
    }

    /// Returns `true` if the expression contains no accessibility
    /// predicates, magic wands, or inhale-exhale assertions.
    pub fn is_pure(&self) -> bool {
        !self.any_node(&|k| {
            matches!(
                k,
                ExpKind::FieldAccessPredicate { .. }
                    | ExpKind::PredicateAccessPredicate { .. }
                    | ExpKind::MagicWand { .. }
                    | ExpKind::InhaleExhale { .. }
            )
        })
    }

    /// Returns `true` if the expression reads the heap anywhere
    /// (field accesses count; accessibility predicates do too).
    pub fn is_heap_dependent(&self) -> bool {
        self.any_node(&|k| {
            matches!(
                k,
                ExpKind::FieldAccess { .. }
                    | ExpKind::FieldAccessPredicate { .. }
                    | ExpKind::PredicateAccessPredicate { .. }
                    | ExpKind::MagicWand { .. }
                    | ExpKind::InhaleExhale { .. }
            )
        })
    }

    /// Returns `true` if a wildcard permission occurs anywhere.
    pub fn contains_wildcard(&self) -> bool {
        self.any_node(&|k| matches!(k, ExpKind::WildcardPerm))
    }

    fn any_node(&self, pred: &dyn Fn(&ExpKind) -> bool) -> bool {
        if pred(&self.kind) {
            return true;
        }
        let mut found = false;
        self.for_each_child(&mut |child| {
            if !found {
                found = child.any_node(pred);
            }
        });
        found
    }

    fn for_each_child(&self, f: &mut dyn FnMut(&Exp)) {
        match &self.kind {
            ExpKind::Unary { expr, .. } => f(expr),
            ExpKind::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            ExpKind::CondExp {
                cond,
                then_exp,
                else_exp,
            } => {
                f(cond);
                f(then_exp);
                f(else_exp);
            }
            ExpKind::Let { bound, body, .. } => {
                f(bound);
                f(body);
            }
            ExpKind::FieldAccess { receiver, .. } => f(receiver),
            ExpKind::FractionalPerm { left, right } => {
                f(left);
                f(right);
            }
            ExpKind::FieldAccessPredicate { receiver, perm, .. } => {
                f(receiver);
                f(perm);
            }
            ExpKind::PredicateAccessPredicate { args, perm, .. } => {
                for a in args {
                    f(a);
                }
                f(perm);
            }
            ExpKind::Forall { triggers, body, .. } => {
                for trig in triggers {
                    for t in trig {
                        f(t);
                    }
                }
                f(body);
            }
            ExpKind::Exists { body, .. } => f(body),
            ExpKind::FuncApp { args, .. } => {
                for a in args {
                    f(a);
                }
            }
            ExpKind::SeqLength(s) | ExpKind::SetCardinality(s) => f(s),
            ExpKind::SeqIndex { seq, idx } => {
                f(seq);
                f(idx);
            }
            ExpKind::ExplicitSeq(es) | ExpKind::ExplicitSet(es) => {
                for e in es {
                    f(e);
                }
            }
            ExpKind::MagicWand { left, right } => {
                f(left);
                f(right);
            }
            ExpKind::InhaleExhale { inhale, exhale } => {
                f(inhale);
                f(exhale);
            }
            ExpKind::IntLit(_)
            | ExpKind::BoolLit(_)
            | ExpKind::NullLit
            | ExpKind::LocalVar(..)
            | ExpKind::FullPerm
            | ExpKind::NoPerm
            | ExpKind::WildcardPerm
            | ExpKind::EmptySeq(_)
            | ExpKind::EmptySet(_) => {}
        }
    }

    /// Free variables of the expression with their types, in first-use order.
    ///
    /// Used when a magic wand is turned into a chunk: the chunk's bindings
    /// are the current values of the wand's free variables.
    pub fn free_vars(&self) -> Vec<LocalVarDecl> {
        let mut out: Vec<LocalVarDecl> = Vec::new();
        let mut bound: Vec<String> = Vec::new();
        self.collect_free_vars(&mut bound, &mut out);
        out
    }

    fn collect_free_vars(&self, bound: &mut Vec<String>, out: &mut Vec<LocalVarDecl>) {
        match &self.kind {
            ExpKind::LocalVar(name, typ) => {
                if !bound.iter().any(|b| b == name) && !out.iter().any(|d| &d.name == name) {
                    out.push(LocalVarDecl::new(name.clone(), typ.clone()));
                }
            }
            ExpKind::Let { var, bound: b, body } => {
                b.collect_free_vars(bound, out);
                bound.push(var.name.clone());
                body.collect_free_vars(bound, out);
                bound.pop();
            }
            ExpKind::Forall {
                vars,
                triggers,
                body,
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
            ExpKind::Exists { vars, body } => {
                let n = vars.len();
                for v in vars {
                    bound.push(v.name.clone());
                }
                body.collect_free_vars(bound, out);
                for _ in 0..n {
                    bound.pop();
                }
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
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render(self, f)
    }
}

fn bin_op_str(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::And => "&&",
        BinOp::Or => "||",
        BinOp::Implies => "==>",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
        BinOp::In => "in",
        BinOp::Union => "union",
        BinOp::Intersection => "intersection",
        BinOp::SetMinus => "setminus",
        BinOp::Subset => "subset",
    }
}

fn render(e: &Exp, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &e.kind {
        ExpKind::IntLit(n) => write!(f, "{}", n),
        ExpKind::BoolLit(b) => write!(f, "{}", b),
        ExpKind::NullLit => write!(f, "null"),
        ExpKind::LocalVar(name, _) => write!(f, "{}", name),
        ExpKind::Unary { op, expr } => match op {
            UnOp::Not => write!(f, "!{}", expr),
            UnOp::Neg => write!(f, "-{}", expr),
        },
        ExpKind::Binary { op, left, right } => {
            write!(f, "({} {} {})", left, bin_op_str(*op), right)
        }
        ExpKind::CondExp {
            cond,
            then_exp,
            else_exp,
        } => write!(f, "({} ? {} : {})", cond, then_exp, else_exp),
        ExpKind::Let { var, bound, body } => {
            write!(f, "(let {} == ({}) in {})", var.name, bound, body)
        }
        ExpKind::FieldAccess { receiver, field } => write!(f, "{}.{}", receiver, field),
        ExpKind::FullPerm => write!(f, "write"),
        ExpKind::NoPerm => write!(f, "none"),
        ExpKind::FractionalPerm { left, right } => write!(f, "{}/{}", left, right),
        ExpKind::WildcardPerm => write!(f, "wildcard"),
        ExpKind::FieldAccessPredicate {
            receiver,
            field,
            perm,
        } => write!(f, "acc({}.{}, {})", receiver, field, perm),
        ExpKind::PredicateAccessPredicate {
            predicate,
            args,
            perm,
        } => {
            write!(f, "acc({}(", predicate)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", a)?;
            }
            write!(f, "), {})", perm)
        }
        ExpKind::Forall {
            vars,
            triggers,
            body,
        } => {
            write!(f, "(forall ")?;
            for (i, v) in vars.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", v)?;
            }
            write!(f, " ::")?;
            for trig in triggers {
                write!(f, " {{")?;
                for (i, t) in trig.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", t)?;
                }
                write!(f, "}}")?;
            }
            write!(f, " {})", body)
        }
        ExpKind::Exists { vars, body } => {
            write!(f, "(exists ")?;
            for (i, v) in vars.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", v)?;
            }
            write!(f, " :: {})", body)
        }
        ExpKind::FuncApp { function, args } => {
            write!(f, "{}(", function)?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", a)?;
            }
            write!(f, ")")
        }
        ExpKind::SeqLength(s) | ExpKind::SetCardinality(s) => write!(f, "|{}|", s),
        ExpKind::SeqIndex { seq, idx } => write!(f, "{}[{}]", seq, idx),
        ExpKind::EmptySeq(t) => write!(f, "Seq[{}]()", t),
        ExpKind::ExplicitSeq(es) => {
            write!(f, "Seq(")?;
            for (i, x) in es.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", x)?;
            }
            write!(f, ")")
        }
        ExpKind::EmptySet(t) => write!(f, "Set[{}]()", t),
        ExpKind::ExplicitSet(es) => {
            write!(f, "Set(")?;
            for (i, x) in es.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", x)?;
            }
            write!(f, ")")
        }
        ExpKind::MagicWand { left, right } => write!(f, "({} --* {})", left, right),
        ExpKind::InhaleExhale { inhale, exhale } => write!(f, "[{}, {}]", inhale, exhale),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Exp {
        Exp::local_var("x", Type::Ref)
    }

    #[test]
    fn conjuncts_split_left_to_right() {
        let a = Exp::bool_lit(true);
        let b = Exp::eq_cmp(Exp::int_lit(1), Exp::int_lit(1));
        let c = Exp::bool_lit(false);
        let e = Exp::and(Exp::and(a.clone(), b.clone()), c.clone());
        let tlcs = e.top_level_conjuncts();
        assert_eq!(tlcs.len(), 3);
        assert_eq!(*tlcs[0], a);
        assert_eq!(*tlcs[1], b);
        assert_eq!(*tlcs[2], c);
    }

    #[test]
    fn non_conjunction_is_its_own_conjunct() {
        let e = Exp::implies(Exp::bool_lit(true), Exp::bool_lit(false));
        assert_eq!(e.top_level_conjuncts().len(), 1);
    }

    #[test]
    fn when_inhaling_picks_inhale_face() {
        let ie = Exp::inhale_exhale(Exp::bool_lit(true), Exp::bool_lit(false));
        assert_eq!(ie.when_inhaling().kind, ExpKind::BoolLit(true));
        assert_eq!(ie.when_exhaling().kind, ExpKind::BoolLit(false));
    }

    #[test]
    fn when_inhaling_recurses_into_implications() {
        let ie = Exp::inhale_exhale(Exp::bool_lit(true), Exp::bool_lit(false));
        let e = Exp::implies(Exp::bool_lit(true), ie);
        let resolved = e.when_exhaling();
        match resolved.kind {
            ExpKind::Binary { op: BinOp::Implies, right, .. } => {
                assert_eq!(right.kind, ExpKind::BoolLit(false));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn purity_distinguishes_access_predicates() {
        let pure = Exp::eq_cmp(Exp::int_lit(1), Exp::int_lit(2));
        assert!(pure.is_pure());

        let acc = Exp::acc_field(x(), "f", Exp::full_perm());
        assert!(!acc.is_pure());

        let nested = Exp::implies(Exp::bool_lit(true), acc);
        assert!(!nested.is_pure());
    }

    #[test]
    fn field_access_is_heap_dependent_but_pure() {
        let fa = Exp::field_access(x(), "f");
        assert!(fa.is_pure());
        assert!(fa.is_heap_dependent());
    }

    #[test]
    fn free_vars_skip_bound_variables() {
        let body = Exp::eq_cmp(
            Exp::local_var("i", Type::Int),
            Exp::local_var("n", Type::Int),
        );
        let q = Exp::forall(vec![LocalVarDecl::new("i", Type::Int)], vec![], body);
        let fv = q.free_vars();
        assert_eq!(fv.len(), 1);
        assert_eq!(fv[0].name, "n");
    }

    #[test]
    fn display_renders_surface_syntax() {
        let e = Exp::acc_field(x(), "f", Exp::full_perm());
        assert_eq!(e.to_string(), "acc(x.f, write)");
    }
}
