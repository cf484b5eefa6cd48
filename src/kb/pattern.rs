//! Pattern indexes: predicate → conjunction features, feature → rule ids.
//!
//! Both indexes are CDB files built at finalize time. The conjunction index
//! answers "which rule-side patterns mention predicate p, and in which
//! chaining direction"; the feature index answers "which rules match this
//! exact pattern". Together they drive chain-candidate enumeration.

use super::binio::{read_u32, read_u8, write_u32, write_u8};
use super::cdb::{CdbReader, CdbWriter};
use super::error::{KbError, KbResult};
use crate::fol::{Feature, PredicateId, Rule, RuleId};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Direction bit: the feature matches graph nodes for backward chaining
/// (abduction from the rule's rhs).
pub const DIR_BACKWARD: u8 = 0b01;
/// Direction bit: the feature matches graph nodes for forward chaining
/// (deduction from the rule's lhs).
pub const DIR_FORWARD: u8 = 0b10;

fn conjunction_path(dir: &Path) -> PathBuf {
    dir.join("conjunctions.cdb")
}

fn feature_path(dir: &Path) -> PathBuf {
    dir.join("features.cdb")
}

/// Serialize a feature as a CDB key.
pub fn encode_feature(feature: &Feature) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(feature.pids.len() as u8);
    for &pid in &feature.pids {
        buf.extend_from_slice(&pid.to_le_bytes());
    }
    buf.push(feature.hard_terms.len() as u8);
    for &((a0, t0), (a1, t1)) in &feature.hard_terms {
        buf.extend_from_slice(&[a0, t0, a1, t1]);
    }
    buf
}

/// Deserialize a feature, returning it and the bytes consumed.
pub fn decode_feature(bytes: &[u8]) -> KbResult<(Feature, usize)> {
    let mut cursor = Cursor::new(bytes);
    let n_pids = read_u8(&mut cursor)? as usize;
    let mut pids = Vec::with_capacity(n_pids);
    for _ in 0..n_pids {
        pids.push(read_u32(&mut cursor)?);
    }
    let n_pairs = read_u8(&mut cursor)? as usize;
    let mut hard_terms = Vec::with_capacity(n_pairs);
    for _ in 0..n_pairs {
        let a0 = read_u8(&mut cursor)?;
        let t0 = read_u8(&mut cursor)?;
        let a1 = read_u8(&mut cursor)?;
        let t1 = read_u8(&mut cursor)?;
        hard_terms.push(((a0, t0), (a1, t1)));
    }
    let consumed = cursor.position() as usize;
    Ok((Feature { pids, hard_terms }, consumed))
}

enum State {
    Compile {
        features_by_pred: BTreeMap<PredicateId, BTreeMap<Feature, u8>>,
        rules_by_feature: BTreeMap<Feature, Vec<(RuleId, bool)>>,
    },
    Query {
        conjunctions: CdbReader,
        features: CdbReader,
    },
}

/// The two pattern indexes behind one interface.
pub struct PatternIndex {
    state: State,
}

impl PatternIndex {
    pub fn new_compile() -> PatternIndex {
        PatternIndex {
            state: State::Compile {
                features_by_pred: BTreeMap::new(),
                rules_by_feature: BTreeMap::new(),
            },
        }
    }

    pub fn open(dir: &Path) -> KbResult<PatternIndex> {
        Ok(PatternIndex {
            state: State::Query {
                conjunctions: CdbReader::open(&conjunction_path(dir))?,
                features: CdbReader::open(&feature_path(dir))?,
            },
        })
    }

    /// Record both chaining directions of a freshly compiled rule.
    pub fn insert_rule(&mut self, id: RuleId, rule: &Rule) -> KbResult<()> {
        let State::Compile {
            features_by_pred,
            rules_by_feature,
        } = &mut self.state
        else {
            return Err(KbError::Mode {
                actual: "query",
                required: "compile",
            });
        };

        let mut insert = |feature: Feature, is_backward: bool| {
            if feature.pids.is_empty() {
                return;
            }
            let bit = if is_backward { DIR_BACKWARD } else { DIR_FORWARD };
            for &pid in &feature.pids {
                *features_by_pred
                    .entry(pid)
                    .or_default()
                    .entry(feature.clone())
                    .or_insert(0) |= bit;
            }
            let entries = rules_by_feature.entry(feature).or_default();
            if !entries.contains(&(id, is_backward)) {
                entries.push((id, is_backward));
            }
        };

        insert(rule.rhs().feature(), true);
        insert(rule.lhs().feature(), false);
        Ok(())
    }

    /// Write both CDB files and reopen for query.
    pub fn finalize(self, dir: &Path) -> KbResult<PatternIndex> {
        let State::Compile {
            features_by_pred,
            rules_by_feature,
        } = self.state
        else {
            return PatternIndex::open(dir);
        };

        let mut writer = CdbWriter::create(&conjunction_path(dir))?;
        for (pid, features) in &features_by_pred {
            let mut value = Vec::new();
            write_u32(&mut value, features.len() as u32)?;
            for (feature, bits) in features {
                value.extend_from_slice(&encode_feature(feature));
                write_u8(&mut value, *bits)?;
            }
            writer.put(&pid.to_le_bytes(), &value)?;
        }
        writer.finish()?;

        let mut writer = CdbWriter::create(&feature_path(dir))?;
        for (feature, entries) in &rules_by_feature {
            let mut value = Vec::new();
            write_u32(&mut value, entries.len() as u32)?;
            for &(rule_id, is_backward) in entries {
                write_u32(&mut value, rule_id)?;
                write_u8(&mut value, u8::from(is_backward))?;
            }
            writer.put(&encode_feature(feature), &value)?;
        }
        writer.finish()?;

        PatternIndex::open(dir)
    }

    /// All features mentioning `pid`, each with its direction bits.
    pub fn features_with_predicate(&self, pid: PredicateId) -> KbResult<Vec<(Feature, u8)>> {
        let State::Query { conjunctions, .. } = &self.state else {
            return Err(KbError::Mode {
                actual: "compile",
                required: "query",
            });
        };
        let Some(value) = conjunctions.get(&pid.to_le_bytes())? else {
            return Ok(Vec::new());
        };
        let mut cursor = Cursor::new(value.as_slice());
        let count = read_u32(&mut cursor)? as usize;
        let mut out = Vec::with_capacity(count);
        let mut pos = cursor.position() as usize;
        for _ in 0..count {
            let (feature, consumed) = decode_feature(&value[pos..])?;
            pos += consumed;
            let bits = *value
                .get(pos)
                .ok_or_else(|| KbError::Corrupt("truncated conjunction index value".to_string()))?;
            pos += 1;
            out.push((feature, bits));
        }
        Ok(out)
    }

    /// Rules whose pattern exactly matches `feature`, with direction flags.
    pub fn rules_matching(&self, feature: &Feature) -> KbResult<Vec<(RuleId, bool)>> {
        let State::Query { features, .. } = &self.state else {
            return Err(KbError::Mode {
                actual: "compile",
                required: "query",
            });
        };
        let Some(value) = features.get(&encode_feature(feature))? else {
            return Ok(Vec::new());
        };
        let mut cursor = Cursor::new(value.as_slice());
        let count = read_u32(&mut cursor)? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let rule_id = read_u32(&mut cursor)?;
            let is_backward = read_u8(&mut cursor)? != 0;
            out.push((rule_id, is_backward));
        }
        Ok(out)
    }
}
