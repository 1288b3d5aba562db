//! Programs, members, and the statement language.
//!
//! A [`Program`] is the unit of verification: a set of field declarations,
//! predicates, domains, and methods. Each method is verified in isolation
//! against its own pre- and postconditions.
//!
//! The statement language is deliberately small. Loops are expressed by the
//! front end as invariant-carrying encodings (exhale invariant, havoc,
//! inhale invariant), so the verifier itself never iterates.

use crate::exp::{Exp, LocalVarDecl, Type};
use opaline_base::Span;
use std::fmt;

/// A field declaration. All objects share the program's field set.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub typ: Type,
}

impl Field {
    pub fn new(name: impl Into<String>, typ: Type) -> Self {
        Self {
            name: name.into(),
            typ,
        }
    }
}

/// An abstract or bodied predicate.
///
/// A predicate instance `P(args)` stands for the heap fragment described by
/// its body; abstract predicates (no body) are opaque permissions.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub name: String,
    pub formal_args: Vec<LocalVarDecl>,
    pub body: Option<Exp>,
}

impl Predicate {
    pub fn new(name: impl Into<String>, formal_args: Vec<LocalVarDecl>, body: Option<Exp>) -> Self {
        Self {
            name: name.into(),
            formal_args,
            body,
        }
    }
}

/// A function declared by a domain, uninterpreted except for the domain's
/// axioms.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainFunc {
    pub name: String,
    pub formal_args: Vec<Type>,
    pub return_type: Type,
}

impl DomainFunc {
    pub fn new(name: impl Into<String>, formal_args: Vec<Type>, return_type: Type) -> Self {
        Self {
            name: name.into(),
            formal_args,
            return_type,
        }
    }
}

/// A named domain axiom. The axiom body must be pure and heap-independent;
/// it is translated (not evaluated) and assumed once per verification task.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainAxiom {
    pub name: String,
    pub exp: Exp,
}

impl DomainAxiom {
    pub fn new(name: impl Into<String>, exp: Exp) -> Self {
        Self {
            name: name.into(),
            exp,
        }
    }
}

/// A mathematical theory: uninterpreted functions plus axioms.
#[derive(Debug, Clone, PartialEq)]
pub struct Domain {
    pub name: String,
    pub functions: Vec<DomainFunc>,
    pub axioms: Vec<DomainAxiom>,
}

impl Domain {
    pub fn new(
        name: impl Into<String>,
        functions: Vec<DomainFunc>,
        axioms: Vec<DomainAxiom>,
    ) -> Self {
        Self {
            name: name.into(),
            functions,
            axioms,
        }
    }
}

/// A method: the unit of modular verification.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub formal_args: Vec<LocalVarDecl>,
    pub pres: Vec<Exp>,
    pub posts: Vec<Exp>,
    pub body: Option<Stmt>,
    pub span: Span,
}

impl Method {
    pub fn new(name: impl Into<String>, formal_args: Vec<LocalVarDecl>) -> Self {
        Self {
            name: name.into(),
            formal_args,
            pres: Vec::new(),
            posts: Vec::new(),
            body: None,
            span: Span::unknown(),
        }
    }

    pub fn with_pre(mut self, pre: Exp) -> Self {
        self.pres.push(pre);
        self
    }

    pub fn with_post(mut self, post: Exp) -> Self {
        self.posts.push(post);
        self
    }

    pub fn with_body(mut self, body: Stmt) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}

/// A statement with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

/// The statement language.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// Statement sequence with local declarations scoped to it.
    Seqn {
        decls: Vec<LocalVarDecl>,
        stmts: Vec<Stmt>,
    },
    /// `x := e` for pure `e`.
    LocalVarAssign { name: String, rhs: Exp },
    /// Add the assertion's permissions and assume its facts.
    Inhale(Exp),
    /// Check the assertion's facts and remove its permissions.
    Exhale(Exp),
    /// Check the assertion but keep all permissions.
    Assert(Exp),
    /// Two-way branch.
    If {
        cond: Exp,
        then_body: Box<Stmt>,
        else_body: Option<Box<Stmt>>,
    },
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn seqn(decls: Vec<LocalVarDecl>, stmts: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Seqn { decls, stmts }, Span::unknown())
    }

    pub fn assign(name: impl Into<String>, rhs: Exp) -> Self {
        let span = rhs.span;
        Self::new(
            StmtKind::LocalVarAssign {
                name: name.into(),
                rhs,
            },
            span,
        )
    }

    pub fn inhale(e: Exp) -> Self {
        let span = e.span;
        Self::new(StmtKind::Inhale(e), span)
    }

    pub fn exhale(e: Exp) -> Self {
        let span = e.span;
        Self::new(StmtKind::Exhale(e), span)
    }

    pub fn assert(e: Exp) -> Self {
        let span = e.span;
        Self::new(StmtKind::Assert(e), span)
    }

    pub fn if_then_else(cond: Exp, then_body: Stmt, else_body: Option<Stmt>) -> Self {
        let span = cond.span;
        Self::new(
            StmtKind::If {
                cond,
                then_body: Box::new(then_body),
                else_body: else_body.map(Box::new),
            },
            span,
        )
    }
}

/// A complete verification task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub domains: Vec<Domain>,
    pub fields: Vec<Field>,
    pub predicates: Vec<Predicate>,
    pub methods: Vec<Method>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domains.push(domain);
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn find_predicate(&self, name: &str) -> Option<&Predicate> {
        self.predicates.iter().find(|p| p.name == name)
    }

    pub fn find_domain_func(&self, name: &str) -> Option<&DomainFunc> {
        self.domains
            .iter()
            .flat_map(|d| d.functions.iter())
            .find(|func| func.name == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {}: {}", self.name, self.typ)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exp::{Exp, Type};

    #[test]
    fn program_lookup_by_name() {
        let program = Program::new()
            .with_field(Field::new("f", Type::Int))
            .with_field(Field::new("g", Type::Ref))
            .with_predicate(Predicate::new(
                "node",
                vec![LocalVarDecl::new("this", Type::Ref)],
                None,
            ));

        assert_eq!(program.find_field("g").map(|f| &f.typ), Some(&Type::Ref));
        assert!(program.find_field("missing").is_none());
        assert!(program.find_predicate("node").is_some());
    }

    #[test]
    fn method_builder_accumulates_specs() {
        let m = Method::new("m", vec![LocalVarDecl::new("x", Type::Ref)])
            .with_pre(Exp::bool_lit(true))
            .with_post(Exp::bool_lit(true))
            .with_post(Exp::bool_lit(false));
        assert_eq!(m.pres.len(), 1);
        assert_eq!(m.posts.len(), 2);
        assert!(m.body.is_none());
    }

    #[test]
    fn domain_function_lookup_crosses_domains() {
        let d1 = Domain::new(
            "Math",
            vec![DomainFunc::new("abs", vec![Type::Int], Type::Int)],
            vec![],
        );
        let d2 = Domain::new(
            "Pairs",
            vec![DomainFunc::new(
                "fst",
                vec![Type::Domain("Pair".into())],
                Type::Int,
            )],
            vec![],
        );
        let p = Program::new().with_domain(d1).with_domain(d2);
        assert!(p.find_domain_func("fst").is_some());
        assert!(p.find_domain_func("abs").is_some());
        assert!(p.find_domain_func("snd").is_none());
    }
}
