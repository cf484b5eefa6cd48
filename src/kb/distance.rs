//! Distance-function strategies for reachability-matrix construction.
//!
//! A distance function maps a rule to a non-negative real, or `None` when the
//! rule should not contribute edges. The selected function and its parameters
//! are part of the compiled KB and must match between compile and query.

use super::error::{KbError, KbResult};
use crate::fol::Rule;
use serde_json::{json, Value};

/// Strategy object giving each rule its distance.
pub trait DistanceFunction: Send + Sync {
    fn key(&self) -> &'static str;

    /// Distance contributed by `rule`, `None` when the rule is opted out.
    fn rule_distance(&self, rule: &Rule) -> Option<f32>;

    /// Parameters serialized into the KB configuration blob.
    fn params(&self) -> Value {
        Value::Null
    }
}

/// Parse a `d:<float>` distance annotation off a param string.
fn distance_param(param: &str) -> Option<f32> {
    param
        .split_whitespace()
        .find_map(|token| token.strip_prefix("d:"))
        .and_then(|v| v.parse().ok())
}

/// Every rule has distance 1.
pub struct BasicDistance;

impl DistanceFunction for BasicDistance {
    fn key(&self) -> &'static str {
        "basic"
    }

    fn rule_distance(&self, _rule: &Rule) -> Option<f32> {
        Some(1.0)
    }
}

/// Reads the distance off the rule's lhs parameter, defaulting to 1.
/// A negative annotation opts the rule out.
pub struct CostDistance;

impl DistanceFunction for CostDistance {
    fn key(&self) -> &'static str {
        "cost"
    }

    fn rule_distance(&self, rule: &Rule) -> Option<f32> {
        let d = distance_param(rule.lhs().param()).unwrap_or(1.0);
        (d >= 0.0).then_some(d)
    }
}

/// Sums per-atom `d:` annotations over the lhs, with a default per atom.
pub struct SumLhsDistance {
    default_distance: f32,
}

impl SumLhsDistance {
    pub fn new(default_distance: f32) -> SumLhsDistance {
        SumLhsDistance { default_distance }
    }
}

impl DistanceFunction for SumLhsDistance {
    fn key(&self) -> &'static str {
        "sum-lhs"
    }

    fn rule_distance(&self, rule: &Rule) -> Option<f32> {
        let mut sum = 0.0f32;
        for (_, atom) in rule.lhs().non_equality_atoms() {
            sum += distance_param(atom.param()).unwrap_or(self.default_distance);
        }
        (sum >= 0.0).then_some(sum)
    }

    fn params(&self) -> Value {
        json!({ "default": self.default_distance })
    }
}

/// Instantiate a distance function from its serialized key and parameters.
pub fn create(key: &str, params: &Value) -> KbResult<Box<dyn DistanceFunction>> {
    match key {
        "basic" => Ok(Box::new(BasicDistance)),
        "cost" => Ok(Box::new(CostDistance)),
        "sum-lhs" => {
            let default = params
                .get("default")
                .and_then(Value::as_f64)
                .unwrap_or(1.0) as f32;
            Ok(Box::new(SumLhsDistance::new(default)))
        }
        other => Err(KbError::UnknownDistance(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fol::{Atom, Conjunction, Term};

    fn rule_with_lhs_param(param: &str) -> Rule {
        let mut lhs = Conjunction::new(vec![Atom::new(
            5,
            vec![Term::new("x")],
            false,
            false,
        )]);
        lhs.set_param(param);
        Rule::new("r", lhs, Conjunction::default())
    }

    #[test]
    fn test_basic_distance() {
        assert_eq!(BasicDistance.rule_distance(&rule_with_lhs_param("")), Some(1.0));
    }

    #[test]
    fn test_cost_distance_reads_param() {
        assert_eq!(CostDistance.rule_distance(&rule_with_lhs_param("d:2.5")), Some(2.5));
        assert_eq!(CostDistance.rule_distance(&rule_with_lhs_param("")), Some(1.0));
        assert_eq!(CostDistance.rule_distance(&rule_with_lhs_param("d:-1")), None);
    }

    #[test]
    fn test_sum_lhs_distance() {
        let mut a1 = Atom::new(5, vec![Term::new("x")], false, false);
        a1.set_param("d:0.5");
        let a2 = Atom::new(6, vec![Term::new("x")], false, false);
        let rule = Rule::new("r", Conjunction::new(vec![a1, a2]), Conjunction::default());
        assert_eq!(SumLhsDistance::new(2.0).rule_distance(&rule), Some(2.5));
    }

    #[test]
    fn test_create_roundtrip() {
        let f = SumLhsDistance::new(3.0);
        let restored = create(f.key(), &f.params()).unwrap();
        assert_eq!(restored.key(), "sum-lhs");
    }

    #[test]
    fn test_create_unknown() {
        assert!(matches!(
            create("zigzag", &Value::Null),
            Err(KbError::UnknownDistance(_))
        ));
    }
}
