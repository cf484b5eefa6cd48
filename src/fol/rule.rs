//! Implicational rules `lhs => rhs`.

use crate::fol::conjunction::Conjunction;
use std::fmt;

/// Dense rule identifier, assigned at knowledge-base compile time.
pub type RuleId = u32;

/// An implication `lhs => rhs`. Backward chaining hypothesizes the lhs from
/// the rhs (abduction); forward chaining derives the rhs from the lhs
/// (deduction).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rule {
    name: String,
    lhs: Conjunction,
    rhs: Conjunction,
}

impl Rule {
    pub fn new(name: &str, lhs: Conjunction, rhs: Conjunction) -> Rule {
        Rule {
            name: name.to_string(),
            lhs,
            rhs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lhs(&self) -> &Conjunction {
        &self.lhs
    }

    pub fn rhs(&self) -> &Conjunction {
        &self.rhs
    }

    /// Group tags carried by the rule name: the colon-separated segments
    /// before `#`. Rules sharing a tag are mutually exclusive at chaining
    /// time. A name without `#` carries no tags.
    pub fn group_tags(&self) -> Vec<&str> {
        match self.name.split_once('#') {
            Some((groups, _)) if !groups.is_empty() => groups.split(':').collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule \"{}\"", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_tags() {
        let rule = Rule::new("g#r1", Conjunction::default(), Conjunction::default());
        assert_eq!(rule.group_tags(), vec!["g"]);

        let rule = Rule::new("a:b#r7", Conjunction::default(), Conjunction::default());
        assert_eq!(rule.group_tags(), vec!["a", "b"]);

        let rule = Rule::new("plain", Conjunction::default(), Conjunction::default());
        assert!(rule.group_tags().is_empty());
    }
}
