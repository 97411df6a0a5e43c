use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::splitter::base_state;

/// `parent -> child`. Identity is the pair of symbols; the score rides along
/// and never takes part in comparisons, so rules can key counters and maps.
#[derive(Debug, Clone)]
pub struct UnaryRule {
  pub parent: String,
  pub child: String,
  pub score: f64,
}

impl UnaryRule {
  pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
    Self::with_score(parent, child, 0.0)
  }

  pub fn with_score(parent: impl Into<String>, child: impl Into<String>, score: f64) -> Self {
    Self {
      parent: parent.into(),
      child: child.into(),
      score,
    }
  }

  pub fn is_self_loop(&self) -> bool {
    self.parent == self.child
  }

  /// The same rule over unrefined symbols.
  pub fn base_rule(&self) -> Self {
    Self::new(base_state(&self.parent), base_state(&self.child))
  }

  fn key(&self) -> (&str, &str) {
    (&self.parent, &self.child)
  }
}

impl PartialEq for UnaryRule {
  fn eq(&self, other: &Self) -> bool {
    self.key() == other.key()
  }
}

impl Eq for UnaryRule {}

impl Hash for UnaryRule {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key().hash(state);
  }
}

impl PartialOrd for UnaryRule {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for UnaryRule {
  fn cmp(&self, other: &Self) -> Ordering {
    self.key().cmp(&other.key())
  }
}

impl fmt::Display for UnaryRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} -> {} %% {}", self.parent, self.child, self.score)
  }
}

/// `parent -> left right`, compared by its three symbols only.
#[derive(Debug, Clone)]
pub struct BinaryRule {
  pub parent: String,
  pub left: String,
  pub right: String,
  pub score: f64,
}

impl BinaryRule {
  pub fn new(parent: impl Into<String>, left: impl Into<String>, right: impl Into<String>) -> Self {
    Self::with_score(parent, left, right, 0.0)
  }

  pub fn with_score(
    parent: impl Into<String>,
    left: impl Into<String>,
    right: impl Into<String>,
    score: f64,
  ) -> Self {
    Self {
      parent: parent.into(),
      left: left.into(),
      right: right.into(),
      score,
    }
  }

  pub fn base_rule(&self) -> Self {
    Self::new(
      base_state(&self.parent),
      base_state(&self.left),
      base_state(&self.right),
    )
  }

  fn key(&self) -> (&str, &str, &str) {
    (&self.parent, &self.left, &self.right)
  }
}

impl PartialEq for BinaryRule {
  fn eq(&self, other: &Self) -> bool {
    self.key() == other.key()
  }
}

impl Eq for BinaryRule {}

impl Hash for BinaryRule {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.key().hash(state);
  }
}

impl PartialOrd for BinaryRule {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for BinaryRule {
  fn cmp(&self, other: &Self) -> Ordering {
    self.key().cmp(&other.key())
  }
}

impl fmt::Display for BinaryRule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} -> {} {} %% {}",
      self.parent, self.left, self.right, self.score
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;

  #[test]
  fn test_identity_ignores_score() {
    let a = UnaryRule::with_score("VP", "VBD", 0.25);
    let b = UnaryRule::with_score("VP", "VBD", 0.75);
    assert_eq!(a, b);

    let set: HashSet<BinaryRule> = vec![
      BinaryRule::with_score("S", "NP", "VP", 1.0),
      BinaryRule::with_score("S", "NP", "VP", 0.5),
      BinaryRule::new("S", "VP", "NP"),
    ]
    .into_iter()
    .collect();
    assert_eq!(set.len(), 2);
  }

  #[test]
  fn test_display() {
    let r = BinaryRule::with_score("S", "NP", "VP", 1.0);
    assert_eq!(r.to_string(), "S -> NP VP %% 1");
    assert!(UnaryRule::new("A", "A").is_self_loop());
  }

  #[test]
  fn test_base_rule() {
    let r = BinaryRule::new("S^1", "NP^S^3", "VP^0");
    assert_eq!(r.base_rule(), BinaryRule::new("S", "NP^S", "VP"));
  }
}
