use std::collections::{BTreeSet, HashMap};
use std::fmt;

use tracing::info;

use crate::counter::Counter;
use crate::error::GrammarError;
use crate::rules::{BinaryRule, UnaryRule};
use crate::syntree::Tree;
use crate::utils::ratio_or_zero;

/// A PCFG over binarized trees. Rule scores are relative frequencies of the
/// counts the grammar was built from: count(rule) / count(all rules with the
/// same parent).
///
/// A *full* grammar can look rules up by left child and by parent, which the
/// chart parser needs. A grammar that is not full is an intermediate EM
/// generation; it skips those indices and instead records each rule's share
/// of the mass of its base (unrefined) rule.
#[derive(Debug, Clone)]
pub struct Grammar {
  full: bool,
  binary_rules: Vec<BinaryRule>,
  unary_rules: Vec<UnaryRule>,
  binary_counts: Counter<BinaryRule>,
  unary_counts: Counter<UnaryRule>,
  /// parent, left, right to rule position
  binary_index: HashMap<String, HashMap<String, HashMap<String, usize>>>,
  /// parent, child to rule position
  unary_index: HashMap<String, HashMap<String, usize>>,
  binary_by_left_child: HashMap<String, Vec<usize>>,
  binary_by_parent: HashMap<String, Vec<usize>>,
  unary_by_parent: HashMap<String, Vec<usize>>,
  relative_binary: HashMap<BinaryRule, f64>,
  relative_unary: HashMap<UnaryRule, f64>,
  states: BTreeSet<String>,
}

impl Grammar {
  /// Builds a grammar from rule counts. Non-positive counts are dropped.
  pub fn from_counts(
    unary_counts: Counter<UnaryRule>,
    binary_counts: Counter<BinaryRule>,
    full: bool,
  ) -> Self {
    let mut unary_counts = unary_counts;
    let mut binary_counts = binary_counts;
    unary_counts.clean();
    binary_counts.clean();

    let mut symbol_counts: Counter<&str> = Counter::new();
    for (rule, count) in unary_counts.iter() {
      symbol_counts.increment(&rule.parent, *count);
    }
    for (rule, count) in binary_counts.iter() {
      symbol_counts.increment(&rule.parent, *count);
    }

    let unary_rules: Vec<UnaryRule> = unary_counts
      .iter()
      .map(|(rule, count)| {
        let score = ratio_or_zero(*count, symbol_counts.get(rule.parent.as_str()));
        UnaryRule::with_score(rule.parent.clone(), rule.child.clone(), score)
      })
      .collect();
    let binary_rules: Vec<BinaryRule> = binary_counts
      .iter()
      .map(|(rule, count)| {
        let score = ratio_or_zero(*count, symbol_counts.get(rule.parent.as_str()));
        BinaryRule::with_score(
          rule.parent.clone(),
          rule.left.clone(),
          rule.right.clone(),
          score,
        )
      })
      .collect();

    let mut states = BTreeSet::new();
    for rule in unary_rules.iter() {
      states.insert(rule.parent.clone());
      states.insert(rule.child.clone());
    }
    for rule in binary_rules.iter() {
      states.insert(rule.parent.clone());
      states.insert(rule.left.clone());
      states.insert(rule.right.clone());
    }

    let mut unary_index: HashMap<String, HashMap<String, usize>> = HashMap::new();
    for (idx, r) in unary_rules.iter().enumerate() {
      unary_index
        .entry(r.parent.clone())
        .or_default()
        .insert(r.child.clone(), idx);
    }
    let mut binary_index: HashMap<String, HashMap<String, HashMap<String, usize>>> =
      HashMap::new();
    for (idx, r) in binary_rules.iter().enumerate() {
      binary_index
        .entry(r.parent.clone())
        .or_default()
        .entry(r.left.clone())
        .or_default()
        .insert(r.right.clone(), idx);
    }

    let mut grammar = Self {
      full: false,
      binary_rules,
      unary_rules,
      binary_counts,
      unary_counts,
      binary_index,
      unary_index,
      binary_by_left_child: HashMap::new(),
      binary_by_parent: HashMap::new(),
      unary_by_parent: HashMap::new(),
      relative_binary: HashMap::new(),
      relative_unary: HashMap::new(),
      states,
    };

    if full {
      grammar.build_lookups();
    } else {
      grammar.build_relative_scores();
    }
    grammar
  }

  /// Builds the parent / left-child lookup tables. Calling this on a full
  /// grammar changes nothing.
  pub fn become_full(mut self) -> Self {
    if !self.full {
      self.build_lookups();
    }
    self
  }

  fn build_lookups(&mut self) {
    for (idx, rule) in self.binary_rules.iter().enumerate() {
      self
        .binary_by_left_child
        .entry(rule.left.clone())
        .or_default()
        .push(idx);
      self
        .binary_by_parent
        .entry(rule.parent.clone())
        .or_default()
        .push(idx);
    }
    for (idx, rule) in self.unary_rules.iter().enumerate() {
      self
        .unary_by_parent
        .entry(rule.parent.clone())
        .or_default()
        .push(idx);
    }
    self.full = true;
  }

  /// For every rule, count(rule) / Σ count(r) over the refinements r of the
  /// same base rule. Read only through `relative_*_score`; EM re-estimates
  /// against treebank counts instead.
  fn build_relative_scores(&mut self) {
    let mut unary_totals: Counter<UnaryRule> = Counter::new();
    for (rule, count) in self.unary_counts.iter() {
      unary_totals.increment(rule.base_rule(), *count);
    }
    let mut binary_totals: Counter<BinaryRule> = Counter::new();
    for (rule, count) in self.binary_counts.iter() {
      binary_totals.increment(rule.base_rule(), *count);
    }

    self.relative_unary = self
      .unary_counts
      .iter()
      .map(|(rule, count)| {
        let total = unary_totals.get(&rule.base_rule());
        (rule.clone(), ratio_or_zero(*count, total))
      })
      .collect();
    self.relative_binary = self
      .binary_counts
      .iter()
      .map(|(rule, count)| {
        let total = binary_totals.get(&rule.base_rule());
        (rule.clone(), ratio_or_zero(*count, total))
      })
      .collect();
  }

  pub fn is_full(&self) -> bool {
    self.full
  }

  pub fn states(&self) -> &BTreeSet<String> {
    &self.states
  }

  pub fn binary_rules(&self) -> &[BinaryRule] {
    &self.binary_rules
  }

  pub fn unary_rules(&self) -> &[UnaryRule] {
    &self.unary_rules
  }

  pub fn num_rules(&self) -> usize {
    self.binary_rules.len() + self.unary_rules.len()
  }

  /// The counts the scores were estimated from.
  pub fn unary_counts(&self) -> &Counter<UnaryRule> {
    &self.unary_counts
  }

  pub fn binary_counts(&self) -> &Counter<BinaryRule> {
    &self.binary_counts
  }

  /// Empty unless the grammar is full.
  pub fn binary_rules_by_left_child<'a>(
    &'a self,
    left: &str,
  ) -> impl Iterator<Item = &'a BinaryRule> + 'a {
    Self::lookup(&self.binary_by_left_child, left, &self.binary_rules)
  }

  /// Empty unless the grammar is full.
  pub fn binary_rules_by_parent<'a>(
    &'a self,
    parent: &str,
  ) -> impl Iterator<Item = &'a BinaryRule> + 'a {
    Self::lookup(&self.binary_by_parent, parent, &self.binary_rules)
  }

  /// Empty unless the grammar is full.
  pub fn unary_rules_by_parent<'a>(
    &'a self,
    parent: &str,
  ) -> impl Iterator<Item = &'a UnaryRule> + 'a {
    Self::lookup(&self.unary_by_parent, parent, &self.unary_rules)
  }

  fn lookup<'a, R>(
    table: &'a HashMap<String, Vec<usize>>,
    key: &str,
    rules: &'a [R],
  ) -> impl Iterator<Item = &'a R> + 'a {
    table
      .get(key)
      .into_iter()
      .flatten()
      .map(move |&idx| &rules[idx])
  }

  fn find_binary(&self, parent: &str, left: &str, right: &str) -> Option<&BinaryRule> {
    let idx = self.binary_index.get(parent)?.get(left)?.get(right)?;
    Some(&self.binary_rules[*idx])
  }

  fn find_unary(&self, parent: &str, child: &str) -> Option<&UnaryRule> {
    let idx = self.unary_index.get(parent)?.get(child)?;
    Some(&self.unary_rules[*idx])
  }

  pub fn binary_rule(&self, rule: &BinaryRule) -> Option<&BinaryRule> {
    self.find_binary(&rule.parent, &rule.left, &rule.right)
  }

  pub fn unary_rule(&self, rule: &UnaryRule) -> Option<&UnaryRule> {
    self.find_unary(&rule.parent, &rule.child)
  }

  /// Score of `parent -> left right`, zero for a rule the grammar lacks.
  pub fn binary_score(&self, parent: &str, left: &str, right: &str) -> f64 {
    self.find_binary(parent, left, right).map_or(0.0, |r| r.score)
  }

  /// Score of `parent -> child`, zero for a rule the grammar lacks.
  pub fn unary_score(&self, parent: &str, child: &str) -> f64 {
    self.find_unary(parent, child).map_or(0.0, |r| r.score)
  }

  /// Share of the rule within its base rule's mass. Only recorded for
  /// grammars built non-full; zero otherwise. Kept for callers inspecting a
  /// generation; training does not read it.
  pub fn relative_unary_score(&self, rule: &UnaryRule) -> f64 {
    self.relative_unary.get(rule).copied().unwrap_or(0.0)
  }

  pub fn relative_binary_score(&self, rule: &BinaryRule) -> f64 {
    self.relative_binary.get(rule).copied().unwrap_or(0.0)
  }
}

impl fmt::Display for Grammar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut lines = self
      .binary_rules
      .iter()
      .map(|r| r.to_string())
      .chain(self.unary_rules.iter().map(|r| r.to_string()))
      .collect::<Vec<_>>();
    lines.sort();
    for line in lines {
      writeln!(f, "{}", line)?;
    }
    Ok(())
  }
}

pub trait GrammarBuilder {
  fn build_grammar(&self) -> Result<Grammar, GrammarError>;
}

/// Reads a grammar off binarized trees by relative-frequency estimation.
pub struct DefaultGrammarBuilder<'a> {
  trees: &'a [Tree],
  full: bool,
}

impl<'a> DefaultGrammarBuilder<'a> {
  pub fn new(trees: &'a [Tree]) -> Self {
    Self { trees, full: true }
  }

  /// Build a grammar that is not full (see [`Grammar`]).
  pub fn non_full(trees: &'a [Tree]) -> Self {
    Self { trees, full: false }
  }

  fn tally_tree(
    tree: &Tree,
    unary_counts: &mut Counter<UnaryRule>,
    binary_counts: &mut Counter<BinaryRule>,
  ) -> Result<(), GrammarError> {
    if tree.is_leaf() || tree.is_preterminal() {
      return Ok(());
    }
    let children = tree.children();
    match children {
      [child] => unary_counts.increment(UnaryRule::new(tree.label(), child.label()), 1.0),
      [left, right] => binary_counts.increment(
        BinaryRule::new(tree.label(), left.label(), right.label()),
        1.0,
      ),
      _ => {
        return Err(GrammarError::MalformedTree {
          label: tree.label().to_string(),
          arity: children.len(),
        });
      }
    }
    for child in children {
      Self::tally_tree(child, unary_counts, binary_counts)?;
    }
    Ok(())
  }
}

impl GrammarBuilder for DefaultGrammarBuilder<'_> {
  /// Errors if any tree has a node with more than two children.
  fn build_grammar(&self) -> Result<Grammar, GrammarError> {
    let mut unary_counts = Counter::new();
    let mut binary_counts = Counter::new();
    for tree in self.trees {
      Self::tally_tree(tree, &mut unary_counts, &mut binary_counts)?;
    }
    let grammar = Grammar::from_counts(unary_counts, binary_counts, self.full);
    info!(
      "built grammar: {} states, {} rules",
      grammar.states().len(),
      grammar.num_rules()
    );
    Ok(grammar)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::syntree::Tree;

  fn trees(src: &str) -> Vec<Tree> {
    crate::parse_treebank::parse_trees(src).unwrap()
  }

  #[test]
  fn test_relative_frequencies() {
    let ts = trees(
      "(S (NP (DT the) (NN dog)) (VP (VBD ran)))
       (S (NP (DT the) (NN cat)) (VP (VBD sat)))
       (S (NP (NN it)) (VP (VBD sat)))",
    );
    let g = DefaultGrammarBuilder::new(&ts).build_grammar().unwrap();

    assert!(g.is_full());
    assert_eq!(g.binary_score("S", "NP", "VP"), 1.0);
    assert!((g.binary_score("NP", "DT", "NN") - 2.0 / 3.0).abs() < 1e-12);
    assert!((g.unary_score("NP", "NN") - 1.0 / 3.0).abs() < 1e-12);
    assert_eq!(g.unary_score("VP", "VBD"), 1.0);
    assert_eq!(g.unary_score("VP", "NN"), 0.0);
    assert_eq!(g.binary_rules_by_left_child("NP").count(), 1);
    assert_eq!(g.unary_rules_by_parent("NP").count(), 1);
    assert_eq!(g.binary_rules_by_parent("NP").count(), 1);
  }

  #[test]
  fn test_scores_sum_to_one_per_parent() {
    let ts = trees(
      "(ROOT (S (NP (DT a) (JJ big) (NN dog)) (VP (VBD ran) (ADVP (RB fast)))))
       (ROOT (S (NP (PRP it)) (VP (VBD sat) (PP (IN on) (NP (DT the) (NN mat))))))
       (ROOT (FRAG (NP (NN wow))))",
    );
    let ts = ts
      .iter()
      .map(crate::annotations::annotate_tree)
      .collect::<Vec<_>>();
    let g = DefaultGrammarBuilder::new(&ts).build_grammar().unwrap();

    let mut totals: Counter<&str> = Counter::new();
    for r in g.unary_rules() {
      totals.increment(&r.parent, r.score);
    }
    for r in g.binary_rules() {
      totals.increment(&r.parent, r.score);
    }
    assert!(!totals.is_empty());
    for (parent, total) in totals.iter() {
      assert!((total - 1.0).abs() < 1e-9, "{} sums to {}", parent, total);
    }
  }

  #[test]
  fn test_unbinarized_tree_is_rejected() {
    let ts = trees("(S (NP (DT the) (JJ big) (NN dog)) (VP (VBD ran)))");
    let err = DefaultGrammarBuilder::new(&ts).build_grammar().unwrap_err();
    assert_eq!(
      err,
      GrammarError::MalformedTree {
        label: "NP".to_string(),
        arity: 3
      }
    );
  }

  #[test]
  fn test_lookups_tell_rules_with_shared_symbols_apart() {
    let mut binary = Counter::new();
    binary.increment(BinaryRule::new("NP", "DT", "NN"), 3.0);
    binary.increment(BinaryRule::new("NP", "DT", "NNS"), 1.0);
    binary.increment(BinaryRule::new("NP", "NN", "NN"), 4.0);
    let mut unary = Counter::new();
    unary.increment(UnaryRule::new("NP", "NN"), 2.0);
    let g = Grammar::from_counts(unary, binary, true);

    assert_eq!(g.binary_score("NP", "DT", "NN"), 0.3);
    assert_eq!(g.binary_score("NP", "DT", "NNS"), 0.1);
    assert_eq!(g.binary_score("NP", "NN", "NN"), 0.4);
    assert_eq!(g.binary_score("NP", "NN", "DT"), 0.0);
    assert_eq!(g.binary_score("VP", "DT", "NN"), 0.0);
    assert_eq!(g.unary_score("NP", "NN"), 0.2);
    assert_eq!(g.unary_score("NN", "NP"), 0.0);
    // identity is the symbols, so a rule with any score finds the stored one
    let stored = g.binary_rule(&BinaryRule::new("NP", "DT", "NNS")).unwrap();
    assert_eq!(stored.score, 0.1);
    assert!(g.unary_rule(&UnaryRule::new("NP", "NNS")).is_none());
  }

  #[test]
  fn test_non_full_records_relative_scores() {
    let mut unary = Counter::new();
    unary.increment(UnaryRule::new("VP^0", "VBD^0"), 3.0);
    unary.increment(UnaryRule::new("VP^1", "VBD^0"), 1.0);
    let g = Grammar::from_counts(unary, Counter::new(), false);

    assert!(!g.is_full());
    assert_eq!(g.unary_rules_by_parent("VP^0").count(), 0);
    assert_eq!(g.relative_unary_score(&UnaryRule::new("VP^0", "VBD^0")), 0.75);
    assert_eq!(g.relative_unary_score(&UnaryRule::new("VP^1", "VBD^0")), 0.25);
    // each refined parent has a single rule
    assert_eq!(g.unary_score("VP^1", "VBD^0"), 1.0);

    let g = g.become_full();
    assert!(g.is_full());
    assert_eq!(g.unary_rules_by_parent("VP^0").count(), 1);
  }
}
