//! The static solver prelude and on-demand theory instantiations.
//!
//! SMT-LIB has no sort polymorphism, so every collection sort the program
//! uses gets its own monomorphized declarations and axioms, generated here
//! from format templates. The verification runner scans the program for the
//! element sorts it needs and emits each instantiation once.
//!
//! Every returned string is a single complete SMT-LIB command; the driver
//! expects one `success` answer per line.

use opaline_term::sort::Sort;

/// The fixed prelude: reference and snapshot sorts, the permission sort with
/// its two distinguished constants, and snapshot-wrapper functions for the
/// base sorts.
pub fn basic_preamble() -> Vec<String> {
    let mut cmds = vec![
        "(declare-sort $Ref 0)".to_string(),
        "(declare-sort $Snap 0)".to_string(),
        "(define-sort $Perm () Real)".to_string(),
        "(define-const $Perm.No $Perm 0.0)".to_string(),
        "(define-const $Perm.Write $Perm 1.0)".to_string(),
        "(define-fun $Perm.min ((p1 $Perm) (p2 $Perm)) $Perm (ite (<= p1 p2) p1 p2))"
            .to_string(),
        "(declare-const $Ref.null $Ref)".to_string(),
        "(declare-const $Snap.unit $Snap)".to_string(),
        "(declare-fun $Snap.combine ($Snap $Snap) $Snap)".to_string(),
        "(declare-fun $Snap.first ($Snap) $Snap)".to_string(),
        "(declare-fun $Snap.second ($Snap) $Snap)".to_string(),
        "(assert (forall ((s1 $Snap) (s2 $Snap)) (! (and (= ($Snap.first ($Snap.combine s1 s2)) s1) (= ($Snap.second ($Snap.combine s1 s2)) s2)) :pattern (($Snap.combine s1 s2)) :qid snap.proj)))"
            .to_string(),
    ];
    for sort in ["Int", "Bool", "$Ref", "$Perm"] {
        cmds.extend(sort_wrappers_for_id(sort));
    }
    cmds
}

/// Snapshot wrappers for a non-base sort (sequence-, set-, FVF-typed fields
/// and snapshot-encoded predicate arguments).
pub fn sort_wrappers(sort: &Sort) -> Vec<String> {
    sort_wrappers_for_id(&sort.id())
}

fn sort_wrappers_for_id(id: &str) -> Vec<String> {
    vec![
        format!("(declare-fun $SortWrappers.{id}To$Snap ({id}) $Snap)"),
        format!("(declare-fun $SortWrappers.$SnapTo{id} ($Snap) {id})"),
        format!(
            "(assert (forall ((x {id})) (! (= x ($SortWrappers.$SnapTo{id} ($SortWrappers.{id}To$Snap x))) :pattern (($SortWrappers.{id}To$Snap x)) :qid wrap.{id})))"
        ),
    ]
}

/// Declarations and axioms for `$Set<elem>`.
pub fn set_axioms(elem: &Sort) -> Vec<String> {
    let t = elem.id();
    let s = format!("$Set<{t}>");
    vec![
        format!("(declare-sort {s} 0)"),
        format!("(declare-fun $Set.in<{t}> ({t} {s}) Bool)"),
        format!("(declare-fun $Set.card<{t}> ({s}) Int)"),
        format!("(declare-const $Set.empty<{t}> {s})"),
        format!("(declare-fun $Set.singleton<{t}> ({t}) {s})"),
        format!("(declare-fun $Set.add<{t}> ({s} {t}) {s})"),
        format!("(declare-fun $Set.union<{t}> ({s} {s}) {s})"),
        format!("(declare-fun $Set.inter<{t}> ({s} {s}) {s})"),
        format!("(declare-fun $Set.diff<{t}> ({s} {s}) {s})"),
        format!("(declare-fun $Set.subset<{t}> ({s} {s}) Bool)"),
        format!(
            "(assert (forall ((xs {s})) (! (<= 0 ($Set.card<{t}> xs)) :pattern (($Set.card<{t}> xs)) :qid set.card-nonneg)))"
        ),
        format!(
            "(assert (forall ((x {t})) (! (not ($Set.in<{t}> x $Set.empty<{t}>)) :pattern (($Set.in<{t}> x $Set.empty<{t}>)) :qid set.empty-in)))"
        ),
        format!("(assert (= ($Set.card<{t}> $Set.empty<{t}>) 0))"),
        format!(
            "(assert (forall ((x {t}) (y {t})) (! (= ($Set.in<{t}> y ($Set.singleton<{t}> x)) (= x y)) :pattern (($Set.in<{t}> y ($Set.singleton<{t}> x))) :qid set.singleton-in)))"
        ),
        format!(
            "(assert (forall ((x {t})) (! ($Set.in<{t}> x ($Set.singleton<{t}> x)) :pattern (($Set.singleton<{t}> x)) :qid set.singleton-self)))"
        ),
        format!(
            "(assert (forall ((x {t})) (! (= ($Set.card<{t}> ($Set.singleton<{t}> x)) 1) :pattern (($Set.card<{t}> ($Set.singleton<{t}> x))) :qid set.singleton-card)))"
        ),
        format!(
            "(assert (forall ((xs {s}) (x {t}) (y {t})) (! (= ($Set.in<{t}> y ($Set.add<{t}> xs x)) (or (= x y) ($Set.in<{t}> y xs))) :pattern (($Set.in<{t}> y ($Set.add<{t}> xs x))) :qid set.add-in)))"
        ),
        format!(
            "(assert (forall ((a {s}) (b {s}) (y {t})) (! (= ($Set.in<{t}> y ($Set.union<{t}> a b)) (or ($Set.in<{t}> y a) ($Set.in<{t}> y b))) :pattern (($Set.in<{t}> y ($Set.union<{t}> a b))) :qid set.union-in)))"
        ),
        format!(
            "(assert (forall ((a {s}) (b {s}) (y {t})) (! (= ($Set.in<{t}> y ($Set.inter<{t}> a b)) (and ($Set.in<{t}> y a) ($Set.in<{t}> y b))) :pattern (($Set.in<{t}> y ($Set.inter<{t}> a b))) :qid set.inter-in)))"
        ),
        format!(
            "(assert (forall ((a {s}) (b {s}) (y {t})) (! (= ($Set.in<{t}> y ($Set.diff<{t}> a b)) (and ($Set.in<{t}> y a) (not ($Set.in<{t}> y b)))) :pattern (($Set.in<{t}> y ($Set.diff<{t}> a b))) :qid set.diff-in)))"
        ),
        format!(
            "(assert (forall ((a {s}) (b {s})) (! (= ($Set.subset<{t}> a b) (forall ((y {t})) (=> ($Set.in<{t}> y a) ($Set.in<{t}> y b)))) :pattern (($Set.subset<{t}> a b)) :qid set.subset-def)))"
        ),
    ]
}

/// Declarations and axioms for `$Seq<elem>`.
pub fn seq_axioms(elem: &Sort) -> Vec<String> {
    let t = elem.id();
    let s = format!("$Seq<{t}>");
    vec![
        format!("(declare-sort {s} 0)"),
        format!("(declare-fun $Seq.length<{t}> ({s}) Int)"),
        format!("(declare-const $Seq.empty<{t}> {s})"),
        format!("(declare-fun $Seq.singleton<{t}> ({t}) {s})"),
        format!("(declare-fun $Seq.append<{t}> ({s} {s}) {s})"),
        format!("(declare-fun $Seq.at<{t}> ({s} Int) {t})"),
        format!("(declare-fun $Seq.in<{t}> ({t} {s}) Bool)"),
        format!(
            "(assert (forall ((xs {s})) (! (<= 0 ($Seq.length<{t}> xs)) :pattern (($Seq.length<{t}> xs)) :qid seq.length-nonneg)))"
        ),
        format!("(assert (= ($Seq.length<{t}> $Seq.empty<{t}>) 0))"),
        format!(
            "(assert (forall ((x {t})) (! (= ($Seq.length<{t}> ($Seq.singleton<{t}> x)) 1) :pattern (($Seq.singleton<{t}> x)) :qid seq.singleton-length)))"
        ),
        format!(
            "(assert (forall ((x {t})) (! (= ($Seq.at<{t}> ($Seq.singleton<{t}> x) 0) x) :pattern (($Seq.singleton<{t}> x)) :qid seq.singleton-at)))"
        ),
        format!(
            "(assert (forall ((a {s}) (b {s})) (! (= ($Seq.length<{t}> ($Seq.append<{t}> a b)) (+ ($Seq.length<{t}> a) ($Seq.length<{t}> b))) :pattern (($Seq.append<{t}> a b)) :qid seq.append-length)))"
        ),
        format!(
            "(assert (forall ((a {s}) (b {s}) (i Int)) (! (= ($Seq.at<{t}> ($Seq.append<{t}> a b) i) (ite (< i ($Seq.length<{t}> a)) ($Seq.at<{t}> a i) ($Seq.at<{t}> b (- i ($Seq.length<{t}> a))))) :pattern (($Seq.at<{t}> ($Seq.append<{t}> a b) i)) :qid seq.append-at)))"
        ),
        format!(
            "(assert (forall ((x {t}) (xs {s})) (! (= ($Seq.in<{t}> x xs) (exists ((i Int)) (and (<= 0 i) (< i ($Seq.length<{t}> xs)) (= ($Seq.at<{t}> xs i) x)))) :pattern (($Seq.in<{t}> x xs)) :qid seq.in-def)))"
        ),
    ]
}

/// Declarations and axioms for `$Multiset<elem>`.
pub fn multiset_axioms(elem: &Sort) -> Vec<String> {
    let t = elem.id();
    let s = format!("$Multiset<{t}>");
    vec![
        format!("(declare-sort {s} 0)"),
        format!("(declare-fun $Multiset.count<{t}> ({s} {t}) Int)"),
        format!("(declare-fun $Multiset.card<{t}> ({s}) Int)"),
        format!("(declare-const $Multiset.empty<{t}> {s})"),
        format!("(declare-fun $Multiset.add<{t}> ({s} {t}) {s})"),
        format!(
            "(assert (forall ((xs {s}) (x {t})) (! (<= 0 ($Multiset.count<{t}> xs x)) :pattern (($Multiset.count<{t}> xs x)) :qid mset.count-nonneg)))"
        ),
        format!(
            "(assert (forall ((x {t})) (! (= ($Multiset.count<{t}> $Multiset.empty<{t}> x) 0) :pattern (($Multiset.count<{t}> $Multiset.empty<{t}> x)) :qid mset.empty-count)))"
        ),
        format!(
            "(assert (forall ((xs {s}) (x {t}) (y {t})) (! (= ($Multiset.count<{t}> ($Multiset.add<{t}> xs x) y) (ite (= x y) (+ ($Multiset.count<{t}> xs y) 1) ($Multiset.count<{t}> xs y))) :pattern (($Multiset.count<{t}> ($Multiset.add<{t}> xs x) y)) :qid mset.add-count)))"
        ),
        format!(
            "(assert (forall ((xs {s})) (! (<= 0 ($Multiset.card<{t}> xs)) :pattern (($Multiset.card<{t}> xs)) :qid mset.card-nonneg)))"
        ),
    ]
}

/// Field-value-function symbols for one field. The FVF *sort* declaration is
/// separate ([`fvf_sort_decl`]) because several fields may share a value
/// sort.
pub fn fvf_decls(field: &str, value_sort: &Sort) -> Vec<String> {
    let v = value_sort.id();
    vec![
        format!("(declare-fun $FVF.lookup_{field} ($FVF<{v}> $Ref) {v})"),
        format!("(declare-fun $FVF.domain_{field} ($FVF<{v}>) $Set<$Ref>)"),
    ]
}

/// The FVF sort declaration for a value sort.
pub fn fvf_sort_decl(value_sort: &Sort) -> String {
    format!("(declare-sort $FVF<{}> 0)", value_sort.id())
}

/// Predicate-snap-function symbols for one predicate.
pub fn psf_decls(predicate: &str) -> Vec<String> {
    vec![
        format!("(declare-sort $PSF<{predicate}> 0)"),
        format!("(declare-fun $PSF.lookup_{predicate} ($PSF<{predicate}> $Snap) $Snap)"),
        format!("(declare-fun $PSF.domain_{predicate} ($PSF<{predicate}>) $Set<$Snap>)"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_commands_are_single_line() {
        for cmd in basic_preamble() {
            assert!(!cmd.contains('\n'), "multi-line command: {}", cmd);
            assert!(cmd.starts_with('('));
            assert!(cmd.ends_with(')'));
        }
    }

    #[test]
    fn set_instantiation_is_monomorphic() {
        let cmds = set_axioms(&Sort::Ref);
        assert!(cmds[0].contains("$Set<$Ref>"));
        assert!(cmds.iter().all(|c| !c.contains("%")));
        assert!(cmds.iter().any(|c| c.contains("$Set.union<$Ref>")));
    }

    #[test]
    fn balanced_parens_in_axioms() {
        for cmds in [
            set_axioms(&Sort::Int),
            seq_axioms(&Sort::Ref),
            multiset_axioms(&Sort::Int),
            basic_preamble(),
        ] {
            for cmd in cmds {
                let open = cmd.matches('(').count();
                let close = cmd.matches(')').count();
                assert_eq!(open, close, "unbalanced: {}", cmd);
            }
        }
    }

    #[test]
    fn fvf_decls_follow_field_name() {
        let cmds = fvf_decls("val", &Sort::Int);
        assert!(cmds[0].contains("$FVF.lookup_val"));
        assert!(cmds[1].contains("$FVF.domain_val"));
        assert_eq!(fvf_sort_decl(&Sort::Int), "(declare-sort $FVF<Int> 0)");
    }
}
