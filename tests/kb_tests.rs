//! Knowledge-Base Integration Tests
//!
//! Tests for:
//! - Compile/query mode transitions and round-trips
//! - Version and missing-file failure semantics
//! - Pattern indexes and group index
//! - Predicate library idempotence

use abduce::engine::ingest_forms;
use abduce::fol::{Predicate, PropertyFlag};
use abduce::input::InputReader;
use abduce::kb::{CompileConfig, KbError, KnowledgeBase};
use std::path::Path;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn compile_kb(dir: &Path, source: &str) -> KnowledgeBase {
    compile_kb_with(dir, source, CompileConfig::default(), "basic")
}

fn compile_kb_with(
    dir: &Path,
    source: &str,
    config: CompileConfig,
    distance_key: &str,
) -> KnowledgeBase {
    let mut kb = KnowledgeBase::create(dir, config, distance_key).unwrap();
    let reader = InputReader::new(true);
    let forms = reader.read_str(source, kb.predicates_mut()).unwrap();
    ingest_forms(&mut kb, forms).unwrap();
    kb.finalize().unwrap()
}

// ============================================================================
// Round-trip Tests
// ============================================================================

#[test]
fn test_rule_roundtrip_through_disk() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(
        temp.path(),
        r#"(B (name "r1") (=> (^ (man x) (mortal x)) (dies x)))"#,
    );
    drop(kb);

    let kb = KnowledgeBase::open(temp.path()).unwrap();
    assert_eq!(kb.rule_count(), 1);
    let rule = kb.rule(0).unwrap();
    assert_eq!(rule.name(), "r1");
    assert_eq!(rule.lhs().len(), 2);
    assert_eq!(rule.rhs().len(), 1);

    let man = kb.predicates().id_of(&Predicate::new("man", 1)).unwrap();
    assert_eq!(rule.lhs()[0].pid(), man);
    // Same variable in every atom.
    assert_eq!(rule.lhs()[0].term(0), rule.rhs()[0].term(0));
}

#[test]
fn test_predicate_property_roundtrip() {
    let temp = TempDir::new().unwrap();
    compile_kb(
        temp.path(),
        "(B (define (nsubj 2) right-unique asymmetric) (=> (p x) (q x)))",
    );

    let kb = KnowledgeBase::open(temp.path()).unwrap();
    let nsubj = kb.predicates().id_of(&Predicate::new("nsubj", 2)).unwrap();
    let property = kb.predicates().property(nsubj).expect("property survived");
    assert!(property.is_right_unique());
    assert!(property.is_asymmetric());
    assert!(!property.is_transitive());
    assert!(property.flags().contains(&PropertyFlag::RightUnique));
}

#[test]
fn test_inconsistency_roundtrip() {
    let temp = TempDir::new().unwrap();
    compile_kb(temp.path(), "(B (xor (p x) (q x)) (=> (a x) (b x)))");

    let kb = KnowledgeBase::open(temp.path()).unwrap();
    let p = kb.predicates().id_of(&Predicate::new("p", 1)).unwrap();
    let q = kb.predicates().id_of(&Predicate::new("q", 1)).unwrap();
    assert_eq!(kb.predicates().inconsistency(p, q), Some(vec![(0, 0)]));
}

#[test]
fn test_predicate_ids_preserved_on_disk() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)) (=> (q x) (r x)))");
    let ids_before: Vec<_> = ["p/1", "q/1", "r/1"]
        .iter()
        .map(|s| kb.predicates().id_of_str(s).unwrap())
        .collect();
    drop(kb);

    let kb = KnowledgeBase::open(temp.path()).unwrap();
    let ids_after: Vec<_> = ["p/1", "q/1", "r/1"]
        .iter()
        .map(|s| kb.predicates().id_of_str(s).unwrap())
        .collect();
    assert_eq!(ids_before, ids_after);
}

// ============================================================================
// Failure Semantics
// ============================================================================

#[test]
fn test_missing_kb_is_fatal() {
    let temp = TempDir::new().unwrap();
    assert!(matches!(
        KnowledgeBase::open(&temp.path().join("absent")),
        Err(KbError::MissingFile(_))
    ));
}

#[test]
fn test_truncated_rule_count_is_fatal() {
    let temp = TempDir::new().unwrap();
    compile_kb(temp.path(), "(B (=> (p x) (q x)))");

    // Tamper with the meta rule count.
    let meta_path = temp.path().join("kb.meta");
    let mut meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
    meta["rule_count"] = serde_json::json!(7);
    std::fs::write(&meta_path, meta.to_string()).unwrap();

    assert!(matches!(
        KnowledgeBase::open(temp.path()),
        Err(KbError::Corrupt(_))
    ));
}

#[test]
fn test_distance_key_preserved() {
    let temp = TempDir::new().unwrap();
    compile_kb_with(
        temp.path(),
        "(B (=> (p x :d:0.5) (q x)))",
        CompileConfig::default(),
        "sum-lhs",
    );

    let kb = KnowledgeBase::open(temp.path()).unwrap();
    let rule = kb.rule(0).unwrap();
    assert_eq!(kb.rule_distance(&rule), Some(0.5));
}

// ============================================================================
// Pattern and Group Indexes
// ============================================================================

#[test]
fn test_pattern_index_drives_backward_lookup() {
    let temp = TempDir::new().unwrap();
    let kb = compile_kb(temp.path(), "(B (=> (p x) (q x)))");
    let q = kb.predicates().id_of(&Predicate::new("q", 1)).unwrap();

    let features = kb.features_with_predicate(q).unwrap();
    assert_eq!(features.len(), 1);
    let matches = kb.rules_matching(&features[0].0).unwrap();
    assert_eq!(matches, vec![(0, true)]);
}

#[test]
fn test_group_index() {
    let temp = TempDir::new().unwrap();
    compile_kb(
        temp.path(),
        r#"(B (name "g#r1") (=> (p1 x) (q x)))
           (B (name "g#r2") (=> (p2 x) (q x)))
           (B (name "other") (=> (p3 x) (q x)))"#,
    );

    let kb = KnowledgeBase::open(temp.path()).unwrap();
    let group = kb.rules_in_group("g").expect("group loaded");
    assert_eq!(group.len(), 2);
    assert!(kb.rules_share_group(0, 1));
    assert!(!kb.rules_share_group(1, 2));
}

// ============================================================================
// Predicate Library
// ============================================================================

#[test]
fn test_predicate_add_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let mut kb =
        KnowledgeBase::create(temp.path(), CompileConfig::default(), "basic").unwrap();
    let before = kb.predicates().len();
    let a = kb.predicates_mut().add(Predicate::new("eats", 2));
    let b = kb.predicates_mut().add(Predicate::new("eats", 2));
    assert_eq!(a, b);
    assert_eq!(kb.predicates().len(), before + 1);
}

#[test]
fn test_compile_then_query_modes_are_exclusive() {
    let temp = TempDir::new().unwrap();
    let kb = KnowledgeBase::create(temp.path(), CompileConfig::default(), "basic").unwrap();
    assert!(kb.is_writable());
    assert!(!kb.is_readable());

    let kb = kb.finalize().unwrap();
    assert!(kb.is_readable());
    assert!(!kb.is_writable());
}
