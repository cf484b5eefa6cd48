//! # Knowledge Base
//!
//! Persistent, content-addressed storage of rules and the indices that make
//! chaining tractable.
//!
//! ```text
//! compile mode                          query mode
//!   add_rule ──► rules.idx/rules.dat      rule(id): seek + read
//!   add_property ─► predicates.dat        predicate lookups (in memory)
//!   add_inconsistency ─┘                  inconsistency lookups
//!   finalize ──► conjunctions.cdb         features_with_predicate
//!            ──► features.cdb             rules_matching
//!            ──► groups.dat               rules_in_group
//!            ──► reachability.rm          distance_between (cached)
//!            ──► kb.meta                  version / config check
//! ```
//!
//! The two modes are exclusive; the transition is the explicit [`finalize`].
//! Opening a KB whose meta header does not match this binary's format
//! version is fatal.
//!
//! [`finalize`]: KnowledgeBase::finalize

mod binio;
mod cdb;
mod distance;
mod error;
mod pattern;
mod predicates;
mod reachability;
mod rules;

pub use cdb::{CdbReader, CdbWriter};
pub use distance::{BasicDistance, CostDistance, DistanceFunction, SumLhsDistance};
pub use error::{KbError, KbResult};
pub use pattern::{decode_feature, encode_feature, PatternIndex, DIR_BACKWARD, DIR_FORWARD};
pub use reachability::{BuildOptions, ReachabilityMatrix};
pub use rules::{decode_rule, encode_rule, RuleStore};

use crate::fol::{Feature, PredicateId, PredicateLibrary, Rule, RuleId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Current on-disk format version. A mismatch on open is fatal.
pub const KB_FORMAT_VERSION: u32 = 1;

/// Compile-time configuration. The pieces that affect query behavior are
/// frozen into the meta header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Maximum searched reachability distance; negative means unlimited.
    #[serde(default = "default_max_distance")]
    pub max_distance: f32,

    /// Worker threads for reachability construction (0 = all cores).
    #[serde(default)]
    pub threads: usize,

    /// Predicates (as `name/arity`) excluded from reachability seeding.
    #[serde(default)]
    pub stop_words: Vec<String>,

    /// Bypass the stop-word list.
    #[serde(default)]
    pub disable_stop_words: bool,

    /// Allow forward chaining (deduction) at query time.
    #[serde(default)]
    pub can_deduce: bool,
}

impl Default for CompileConfig {
    fn default() -> CompileConfig {
        CompileConfig {
            max_distance: default_max_distance(),
            threads: 0,
            stop_words: Vec::new(),
            disable_stop_words: false,
            can_deduce: false,
        }
    }
}

fn default_max_distance() -> f32 {
    9.0
}

/// The JSON meta header.
#[derive(Debug, Serialize, Deserialize)]
struct KbMeta {
    version: u32,
    max_distance: f32,
    can_deduce: bool,
    distance_key: String,
    distance_params: serde_json::Value,
    rule_count: u32,
    compiled_at: String,
}

enum Mode {
    Compile,
    Query,
}

type GroupMap = HashMap<String, BTreeSet<RuleId>>;

/// The knowledge base: predicate library, rule library, pattern indexes,
/// group index, and reachability matrix over one directory.
pub struct KnowledgeBase {
    dir: PathBuf,
    mode: Mode,
    config: CompileConfig,
    predicates: PredicateLibrary,
    rules: RuleStore,
    patterns: PatternIndex,
    groups: GroupMap,
    rule_groups: HashMap<RuleId, Vec<String>>,
    matrix: Option<ReachabilityMatrix>,
    distance: Box<dyn DistanceFunction>,
    distance_cache: DashMap<(PredicateId, PredicateId), Option<f32>>,
}

impl KnowledgeBase {
    /// Create a KB directory in compile mode.
    pub fn create(dir: &Path, config: CompileConfig, distance_key: &str) -> KbResult<KnowledgeBase> {
        fs::create_dir_all(dir)?;
        let distance = distance::create(distance_key, &serde_json::Value::Null)?;
        Ok(KnowledgeBase {
            dir: dir.to_path_buf(),
            mode: Mode::Compile,
            config,
            predicates: PredicateLibrary::new(),
            rules: RuleStore::create(dir)?,
            patterns: PatternIndex::new_compile(),
            groups: HashMap::new(),
            rule_groups: HashMap::new(),
            matrix: None,
            distance,
            distance_cache: DashMap::new(),
        })
    }

    /// Open a compiled KB in query mode. Fatal when the directory is missing,
    /// a store is truncated, or the version does not match.
    pub fn open(dir: &Path) -> KbResult<KnowledgeBase> {
        let meta_path = dir.join("kb.meta");
        if !meta_path.exists() {
            return Err(KbError::MissingFile(meta_path));
        }
        let meta: KbMeta = serde_json::from_str(&fs::read_to_string(meta_path)?)?;
        if meta.version != KB_FORMAT_VERSION {
            return Err(KbError::Version {
                found: meta.version,
                expected: KB_FORMAT_VERSION,
            });
        }

        let predicates = predicates::load(dir)?;
        let rules = RuleStore::open(dir)?;
        if rules.count() != meta.rule_count {
            return Err(KbError::Corrupt(format!(
                "rule store holds {} rules, meta says {}",
                rules.count(),
                meta.rule_count
            )));
        }
        let patterns = PatternIndex::open(dir)?;
        let groups: GroupMap = bincode::deserialize(&fs::read(dir.join("groups.dat"))?)?;
        let rule_groups = invert_groups(&groups);
        let matrix = ReachabilityMatrix::open(dir)?;
        let distance = distance::create(&meta.distance_key, &meta.distance_params)?;

        let config = CompileConfig {
            max_distance: meta.max_distance,
            can_deduce: meta.can_deduce,
            ..CompileConfig::default()
        };

        info!(dir = %dir.display(), rules = meta.rule_count, "opened knowledge base");
        Ok(KnowledgeBase {
            dir: dir.to_path_buf(),
            mode: Mode::Query,
            config,
            predicates,
            rules,
            patterns,
            groups,
            rule_groups,
            matrix: Some(matrix),
            distance,
            distance_cache: DashMap::new(),
        })
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.mode, Mode::Compile)
    }

    pub fn is_readable(&self) -> bool {
        matches!(self.mode, Mode::Query)
    }

    pub fn predicates(&self) -> &PredicateLibrary {
        &self.predicates
    }

    /// Mutable access to the predicate library. In query mode the on-disk
    /// image is frozen; growth only affects this process (observation
    /// predicates unseen at compile time).
    pub fn predicates_mut(&mut self) -> &mut PredicateLibrary {
        &mut self.predicates
    }

    /// Append a rule. Compile mode only.
    pub fn add_rule(&mut self, rule: &Rule) -> KbResult<RuleId> {
        let id = self.rules.append(rule)?;
        self.patterns.insert_rule(id, rule)?;
        let tags: Vec<String> = rule.group_tags().iter().map(ToString::to_string).collect();
        for tag in &tags {
            self.groups.entry(tag.clone()).or_default().insert(id);
        }
        if !tags.is_empty() {
            self.rule_groups.insert(id, tags);
        }
        Ok(id)
    }

    /// Build every index, write the meta header, and flip to query mode.
    pub fn finalize(self) -> KbResult<KnowledgeBase> {
        let Mode::Compile = self.mode else {
            return Ok(self);
        };
        info!(dir = %self.dir.display(), rules = self.rules.count(), "finalizing knowledge base");

        let rules = self.rules.finalize()?;
        let patterns = self.patterns.finalize(&self.dir)?;
        predicates::save(&self.predicates, &self.dir)?;
        fs::write(self.dir.join("groups.dat"), bincode::serialize(&self.groups)?)?;

        let mut ignored: HashSet<PredicateId> =
            [crate::fol::INVALID_PREDICATE_ID, crate::fol::EQ_PREDICATE_ID].into();
        if !self.config.disable_stop_words {
            for word in &self.config.stop_words {
                if let Some(pid) = self.predicates.id_of_str(word) {
                    ignored.insert(pid);
                }
            }
        }
        for property in self.predicates.properties() {
            if property.is_right_unique() {
                ignored.insert(property.pid());
            }
        }

        let matrix = ReachabilityMatrix::create(&self.dir)?;
        let options = BuildOptions {
            max_distance: self.config.max_distance,
            threads: self.config.threads,
            ignored: &ignored,
            can_deduce: self.config.can_deduce,
        };
        reachability::build_matrix(&matrix, &rules, &self.predicates, &*self.distance, &options)?;
        let matrix = matrix.finalize()?;

        let meta = KbMeta {
            version: KB_FORMAT_VERSION,
            max_distance: self.config.max_distance,
            can_deduce: self.config.can_deduce,
            distance_key: self.distance.key().to_string(),
            distance_params: self.distance.params(),
            rule_count: rules.count(),
            compiled_at: chrono::Utc::now().to_rfc3339(),
        };
        fs::write(self.dir.join("kb.meta"), serde_json::to_string_pretty(&meta)?)?;

        Ok(KnowledgeBase {
            dir: self.dir,
            mode: Mode::Query,
            config: self.config,
            predicates: self.predicates,
            rules,
            patterns,
            groups: self.groups,
            rule_groups: self.rule_groups,
            matrix: Some(matrix),
            distance: self.distance,
            distance_cache: DashMap::new(),
        })
    }

    pub fn rule(&self, id: RuleId) -> KbResult<Rule> {
        self.rules.get(id, &self.predicates)
    }

    pub fn rule_count(&self) -> u32 {
        self.rules.count()
    }

    pub fn max_distance(&self) -> f32 {
        self.config.max_distance
    }

    pub fn can_deduce(&self) -> bool {
        self.config.can_deduce
    }

    /// Distance the configured function gives `rule`.
    pub fn rule_distance(&self, rule: &Rule) -> Option<f32> {
        self.distance.rule_distance(rule)
    }

    /// Minimum rule-distance between two predicates from the reachability
    /// matrix; `None` means unreachable. Lazily cached.
    pub fn distance_between(&self, a: PredicateId, b: PredicateId) -> Option<f32> {
        let key = if a <= b { (a, b) } else { (b, a) };
        if let Some(cached) = self.distance_cache.get(&key) {
            return *cached;
        }
        let result = self
            .matrix
            .as_ref()
            .and_then(|m| m.get(a, b).ok())
            .flatten();
        self.distance_cache.insert(key, result);
        result
    }

    pub fn features_with_predicate(&self, pid: PredicateId) -> KbResult<Vec<(Feature, u8)>> {
        self.patterns.features_with_predicate(pid)
    }

    pub fn rules_matching(&self, feature: &Feature) -> KbResult<Vec<(RuleId, bool)>> {
        self.patterns.rules_matching(feature)
    }

    pub fn rules_in_group(&self, tag: &str) -> Option<&BTreeSet<RuleId>> {
        self.groups.get(tag)
    }

    pub fn groups_of_rule(&self, id: RuleId) -> &[String] {
        self.rule_groups.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Whether two rules share a group tag.
    pub fn rules_share_group(&self, a: RuleId, b: RuleId) -> bool {
        if a == b {
            return false;
        }
        let tags_a = self.groups_of_rule(a);
        !tags_a.is_empty()
            && self
                .groups_of_rule(b)
                .iter()
                .any(|t| tags_a.contains(t))
    }
}

fn invert_groups(groups: &GroupMap) -> HashMap<RuleId, Vec<String>> {
    let mut out: HashMap<RuleId, Vec<String>> = HashMap::new();
    for (tag, ids) in groups {
        for &id in ids {
            out.entry(id).or_default().push(tag.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fol::{Atom, Conjunction, Predicate, Term};
    use tempfile::TempDir;

    fn implication(
        library: &mut PredicateLibrary,
        name: &str,
        lhs: &str,
        rhs: &str,
    ) -> Rule {
        let l = library.add(Predicate::new(lhs, 1));
        let r = library.add(Predicate::new(rhs, 1));
        let x = Term::new("x");
        Rule::new(
            name,
            Conjunction::new(vec![Atom::new(l, vec![x], false, false)]),
            Conjunction::new(vec![Atom::new(r, vec![x], false, false)]),
        )
    }

    fn compile_kb(dir: &Path, rules: &[(&str, &str, &str)]) -> KnowledgeBase {
        let mut kb =
            KnowledgeBase::create(dir, CompileConfig::default(), "basic").unwrap();
        for (name, lhs, rhs) in rules {
            let rule = implication(kb.predicates_mut(), name, lhs, rhs);
            kb.add_rule(&rule).unwrap();
        }
        kb.finalize().unwrap()
    }

    #[test]
    fn test_compile_and_reopen() {
        let temp = TempDir::new().unwrap();
        let kb = compile_kb(temp.path(), &[("r1", "p", "q")]);
        drop(kb);

        let kb = KnowledgeBase::open(temp.path()).unwrap();
        assert!(kb.is_readable());
        assert_eq!(kb.rule_count(), 1);
        let rule = kb.rule(0).unwrap();
        assert_eq!(rule.name(), "r1");
    }

    #[test]
    fn test_version_mismatch_is_fatal() {
        let temp = TempDir::new().unwrap();
        compile_kb(temp.path(), &[("r1", "p", "q")]);

        let meta_path = temp.path().join("kb.meta");
        let meta = fs::read_to_string(&meta_path).unwrap();
        let mut value: serde_json::Value = serde_json::from_str(&meta).unwrap();
        value["version"] = serde_json::json!(999);
        fs::write(&meta_path, value.to_string()).unwrap();

        assert!(matches!(
            KnowledgeBase::open(temp.path()),
            Err(KbError::Version { found: 999, .. })
        ));
    }

    #[test]
    fn test_open_missing_dir_is_fatal() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            KnowledgeBase::open(&temp.path().join("nope")),
            Err(KbError::MissingFile(_))
        ));
    }

    #[test]
    fn test_groups() {
        let temp = TempDir::new().unwrap();
        let kb = compile_kb(
            temp.path(),
            &[("g#r1", "p1", "q"), ("g#r2", "p2", "q"), ("solo", "p3", "q")],
        );
        let group = kb.rules_in_group("g").unwrap();
        assert_eq!(group.len(), 2);
        assert!(kb.rules_share_group(0, 1));
        assert!(!kb.rules_share_group(0, 2));
        assert!(!kb.rules_share_group(0, 0));
    }

    #[test]
    fn test_reachability_through_chain() {
        let temp = TempDir::new().unwrap();
        let kb = compile_kb(temp.path(), &[("r1", "a", "b"), ("r2", "b", "c")]);
        let a = kb.predicates().id_of_str("a/1").unwrap();
        let b = kb.predicates().id_of_str("b/1").unwrap();
        let c = kb.predicates().id_of_str("c/1").unwrap();
        assert_eq!(kb.distance_between(a, b), Some(1.0));
        assert_eq!(kb.distance_between(a, c), Some(2.0));
        assert_eq!(kb.distance_between(c, a), Some(2.0));
    }
}
