//! Cardinality rules over field values.
//!
//! A rule pairs a cardinality kind with target alternatives: a list of
//! all-of groups. A value satisfies the rule when it matches every member
//! of at least one group (groups are OR'd, members are AND'd), mirroring
//! OWL-style intersection/union restrictions. Rule satisfaction is always
//! evaluated against the current values, never stored.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cardinality kind of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// At least `count` satisfying values
    Min,
    /// At most `count` satisfying values
    Max,
    /// Exactly `count` satisfying values
    Exactly,
    /// At least one satisfying value
    Some,
    /// Every value must satisfy
    Only,
}

/// One cardinality rule attached to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub kind: RuleKind,
    /// Cardinality argument; ignored for `some` and `only`.
    #[serde(default)]
    pub count: u32,
    /// OR'd list of AND'd target groups. Targets name classes or
    /// individuals on relation fields and datatypes on data fields.
    pub targets: Vec<Vec<String>>,
}

impl Rule {
    pub fn min(count: u32, targets: Vec<Vec<String>>) -> Self {
        Self { kind: RuleKind::Min, count, targets }
    }

    pub fn max(count: u32, targets: Vec<Vec<String>>) -> Self {
        Self { kind: RuleKind::Max, count, targets }
    }

    pub fn exactly(count: u32, targets: Vec<Vec<String>>) -> Self {
        Self { kind: RuleKind::Exactly, count, targets }
    }

    pub fn some(targets: Vec<Vec<String>>) -> Self {
        Self { kind: RuleKind::Some, count: 0, targets }
    }

    pub fn only(targets: Vec<Vec<String>>) -> Self {
        Self { kind: RuleKind::Only, count: 0, targets }
    }

    /// Apply the cardinality test given how many values satisfy the
    /// targets and how many values the field holds in total.
    ///
    /// An empty field passes `max n` and `only`, and fails `min n > 0`,
    /// `some`, and `exactly n > 0`.
    pub fn is_fulfilled(&self, satisfied: usize, total: usize) -> bool {
        match self.kind {
            RuleKind::Min => satisfied >= self.count as usize,
            RuleKind::Max => satisfied <= self.count as usize,
            RuleKind::Exactly => satisfied == self.count as usize,
            RuleKind::Some => satisfied >= 1,
            RuleKind::Only => satisfied == total,
        }
    }

    /// Count values matching the rule, where `matches(value, target)`
    /// decides single-target membership. A value counts when it matches
    /// every member of at least one group.
    pub fn count_satisfying<'a, T: 'a>(
        &self,
        values: impl IntoIterator<Item = &'a T>,
        mut matches: impl FnMut(&T, &str) -> bool,
    ) -> usize {
        values
            .into_iter()
            .filter(|v| {
                self.targets
                    .iter()
                    .any(|group| group.iter().all(|target| matches(v, target)))
            })
            .count()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RuleKind::Min => write!(f, "min {}", self.count)?,
            RuleKind::Max => write!(f, "max {}", self.count)?,
            RuleKind::Exactly => write!(f, "exactly {}", self.count)?,
            RuleKind::Some => write!(f, "some")?,
            RuleKind::Only => write!(f, "only")?,
        }
        let groups: Vec<String> = self
            .targets
            .iter()
            .map(|group| {
                if group.len() == 1 {
                    group[0].clone()
                } else {
                    format!("({})", group.join(" and "))
                }
            })
            .collect();
        if !groups.is_empty() {
            write!(f, " {}", groups.join(" or "))?;
        }
        Ok(())
    }
}
