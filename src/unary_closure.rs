//! Reflexive, transitive closure of a grammar's unary rules.
//!
//! Each closed rule `A -> B` stands for the best-scoring chain of zero or more
//! unary rules rewriting `A` to `B`; its score is the product of the chain's
//! rule scores and `get_path` recovers the chain itself.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use crate::grammar::Grammar;
use crate::rules::UnaryRule;

#[derive(Debug, Clone, Default)]
pub struct UnaryClosure {
  closed_by_child: HashMap<String, Vec<UnaryRule>>,
  closed_by_parent: HashMap<String, Vec<UnaryRule>>,
  paths: HashMap<UnaryRule, Vec<String>>,
}

impl UnaryClosure {
  pub fn new(unary_rules: &[UnaryRule]) -> Self {
    let states = unary_rules
      .iter()
      .flat_map(|r| [r.parent.as_str(), r.child.as_str()])
      .collect::<BTreeSet<_>>()
      .into_iter()
      .collect::<Vec<_>>();
    let index = states
      .iter()
      .enumerate()
      .map(|(i, s)| (*s, i))
      .collect::<HashMap<_, _>>();
    let n = states.len();

    // scores[i * n + j] is the best known score for states[i] -> states[j],
    // zero meaning no chain yet
    let mut scores = vec![0.0f64; n * n];
    let mut intermediate: Vec<Option<usize>> = vec![None; n * n];

    for rule in unary_rules.iter() {
      let cell = index[rule.parent.as_str()] * n + index[rule.child.as_str()];
      if rule.score > scores[cell] {
        scores[cell] = rule.score;
      }
    }

    for k in 0..n {
      for i in 0..n {
        let into_k = scores[i * n + k];
        if i == k || into_k <= 0.0 {
          continue;
        }
        for j in 0..n {
          if j == k || j == i {
            continue;
          }
          let candidate = into_k * scores[k * n + j];
          if candidate > scores[i * n + j] {
            scores[i * n + j] = candidate;
            intermediate[i * n + j] = Some(k);
          }
        }
      }
    }

    let mut closure = Self::default();
    for i in 0..n {
      for j in 0..n {
        let score = scores[i * n + j];
        if i == j || score <= 0.0 {
          continue;
        }
        let path = extract_path(i, j, n, &intermediate)
          .into_iter()
          .map(|s| states[s].to_string())
          .collect();
        closure.add(UnaryRule::with_score(states[i], states[j], score), path);
      }
    }
    for state in states.iter() {
      closure.add(
        UnaryRule::with_score(*state, *state, 1.0),
        vec![state.to_string()],
      );
    }

    debug!("unary closure size: {}", closure.paths.len());
    closure
  }

  pub fn from_grammar(grammar: &Grammar) -> Self {
    Self::new(grammar.unary_rules())
  }

  fn add(&mut self, rule: UnaryRule, path: Vec<String>) {
    self
      .closed_by_child
      .entry(rule.child.clone())
      .or_default()
      .push(rule.clone());
    self
      .closed_by_parent
      .entry(rule.parent.clone())
      .or_default()
      .push(rule.clone());
    self.paths.insert(rule, path);
  }

  pub fn closed_unary_rules_by_child(&self, child: &str) -> &[UnaryRule] {
    self.closed_by_child.get(child).map_or(&[], Vec::as_slice)
  }

  pub fn closed_unary_rules_by_parent(&self, parent: &str) -> &[UnaryRule] {
    self.closed_by_parent.get(parent).map_or(&[], Vec::as_slice)
  }

  /// The symbols from parent to child the closed rule stands for; `[A]` for
  /// the self loop `A -> A`. `None` for a rule outside the closure.
  pub fn get_path(&self, rule: &UnaryRule) -> Option<&[String]> {
    self.paths.get(rule).map(Vec::as_slice)
  }

  pub fn len(&self) -> usize {
    self.paths.len()
  }

  pub fn is_empty(&self) -> bool {
    self.paths.is_empty()
  }
}

fn extract_path(from: usize, to: usize, n: usize, intermediate: &[Option<usize>]) -> Vec<usize> {
  match intermediate[from * n + to] {
    None => vec![from, to],
    Some(k) => {
      let mut path = extract_path(from, k, n, intermediate);
      path.extend(extract_path(k, to, n, intermediate).into_iter().skip(1));
      path
    }
  }
}

impl fmt::Display for UnaryClosure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut parents = self.closed_by_parent.keys().collect::<Vec<_>>();
    parents.sort();
    for parent in parents {
      for rule in self.closed_unary_rules_by_parent(parent) {
        let path = self.get_path(rule).unwrap_or_default();
        writeln!(f, "{}  [{}]", rule, path.join(", "))?;
      }
    }
    Ok(())
  }
}
