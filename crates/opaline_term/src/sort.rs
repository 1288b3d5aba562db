//! The sort lattice.
//!
//! Sorts classify terms. The set is closed: base sorts for the program
//! types, `Snap` for snapshots, and the two summarizing function sorts used
//! by quantified permissions (field-value functions and predicate-snap
//! functions).
//!
//! [`Sort::id`] produces the mangled spelling used for SMT symbols.
//! Parametric sorts are monomorphized by embedding the element sort into the
//! name (`$Seq<Int>`, `$Set<$Ref>`); each instantiation is declared
//! separately to the solver together with its axioms.

use std::fmt;

/// The sort of a term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Sort {
    Int,
    Bool,
    /// Permission amounts, rationals in `[0, 1]` under the heap invariant.
    Perm,
    /// Object references.
    Ref,
    /// Snapshots: abstracted heap values, combined pairwise.
    Snap,
    Seq(Box<Sort>),
    Set(Box<Sort>),
    Multiset(Box<Sort>),
    /// A field-value function `Ref -> T` summarizing a quantified range of
    /// heap locations for one field with value sort `T`.
    FieldValueFunction(Box<Sort>),
    /// A predicate-snap function for the named predicate.
    PredSnapFunction(String),
    /// A user-declared domain type.
    UserSort(String),
}

impl Sort {
    pub fn seq(elem: Sort) -> Sort {
        Sort::Seq(Box::new(elem))
    }

    pub fn set(elem: Sort) -> Sort {
        Sort::Set(Box::new(elem))
    }

    pub fn multiset(elem: Sort) -> Sort {
        Sort::Multiset(Box::new(elem))
    }

    pub fn fvf(value: Sort) -> Sort {
        Sort::FieldValueFunction(Box::new(value))
    }

    pub fn psf(predicate: impl Into<String>) -> Sort {
        Sort::PredSnapFunction(predicate.into())
    }

    /// The element sort of a collection sort, if any.
    pub fn element(&self) -> Option<&Sort> {
        match self {
            Sort::Seq(e) | Sort::Set(e) | Sort::Multiset(e) => Some(e),
            _ => None,
        }
    }

    /// The mangled identifier used in SMT symbol names.
    ///
    /// Stable across runs; angle brackets are legal SMT-LIB symbol
    /// characters, so no quoting is required.
    pub fn id(&self) -> String {
        match self {
            Sort::Int => "Int".to_string(),
            Sort::Bool => "Bool".to_string(),
            Sort::Perm => "$Perm".to_string(),
            Sort::Ref => "$Ref".to_string(),
            Sort::Snap => "$Snap".to_string(),
            Sort::Seq(e) => format!("$Seq<{}>", e.id()),
            Sort::Set(e) => format!("$Set<{}>", e.id()),
            Sort::Multiset(e) => format!("$Multiset<{}>", e.id()),
            Sort::FieldValueFunction(v) => format!("$FVF<{}>", v.id()),
            Sort::PredSnapFunction(p) => format!("$PSF<{}>", p),
            Sort::UserSort(name) => name.clone(),
        }
    }

    /// Whether values of this sort are rendered with a built-in SMT sort.
    pub fn is_builtin(&self) -> bool {
        matches!(self, Sort::Int | Sort::Bool | Sort::Perm)
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_mangled_and_nested() {
        assert_eq!(Sort::Int.id(), "Int");
        assert_eq!(Sort::set(Sort::Ref).id(), "$Set<$Ref>");
        assert_eq!(
            Sort::seq(Sort::set(Sort::Int)).id(),
            "$Seq<$Set<Int>>"
        );
        assert_eq!(Sort::fvf(Sort::Int).id(), "$FVF<Int>");
        assert_eq!(Sort::psf("node").id(), "$PSF<node>");
    }

    #[test]
    fn element_sort_of_collections() {
        assert_eq!(Sort::seq(Sort::Ref).element(), Some(&Sort::Ref));
        assert_eq!(Sort::Int.element(), None);
    }
}
