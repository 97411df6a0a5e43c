//! Splitting every symbol of a grammar generation in two.
//!
//! A refined symbol is written `base^k`: the refinement marker is the *last*
//! `^` when it is followed by digits only. Parent-annotated symbols such as
//! `NP^S` therefore have no refinement yet, and `NP^S^3` is refinement 3 of
//! `NP^S`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::Rng;
use tracing::debug;

use crate::counter::{Counter, CounterMap};
use crate::error::GrammarError;
use crate::grammar::Grammar;
use crate::lexicon::SimpleLexicon;
use crate::rules::{BinaryRule, UnaryRule};
use crate::utils::combinations;

const REFINEMENT_MARK: char = '^';

fn split_refinement(state: &str) -> Option<(&str, usize)> {
  let mark = state.rfind(REFINEMENT_MARK)?;
  let suffix = &state[mark + 1..];
  if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  suffix.parse().ok().map(|k| (&state[..mark], k))
}

/// The unrefined symbol a state descends from.
///
/// ```
/// use splitmerge::splitter::base_state;
///
/// assert_eq!(base_state("NP^3"), "NP");
/// assert_eq!(base_state("NP^S^3"), "NP^S");
/// assert_eq!(base_state("NP^S"), "NP^S");
/// assert_eq!(base_state("ROOT"), "ROOT");
/// ```
pub fn base_state(state: &str) -> &str {
  split_refinement(state).map_or(state, |(base, _)| base)
}

/// The `k` of `base^k`, `None` for an unrefined symbol.
pub fn refinement_index(state: &str) -> Option<usize> {
  split_refinement(state).map(|(_, k)| k)
}

/// The refinements a state splits into: the root stays itself, `A` becomes
/// `A^0, A^1`, and `A^k` becomes `A^2k, A^2k+1`.
pub fn split_state(state: &str, root: &str) -> Vec<String> {
  if state == root {
    return vec![state.to_string()];
  }
  let (base, k) = split_refinement(state).unwrap_or((state, 0));
  vec![
    format!("{}{}{}", base, REFINEMENT_MARK, 2 * k),
    format!("{}{}{}", base, REFINEMENT_MARK, 2 * k + 1),
  ]
}

/// The other half of the split that produced `state`.
pub fn sibling_state(state: &str) -> Option<String> {
  split_refinement(state).map(|(base, k)| format!("{}{}{}", base, REFINEMENT_MARK, k ^ 1))
}

/// The name a sibling pair takes once merged: the even sibling's, so names
/// stay unique when the merged state is split again.
pub fn merged_state(state: &str) -> String {
  match split_refinement(state) {
    Some((base, k)) => format!("{}{}{}", base, REFINEMENT_MARK, k & !1),
    None => state.to_string(),
  }
}

/// Refinements of one base symbol, in refinement order.
pub(crate) fn sort_refinements(states: &mut [String]) {
  states.sort_by_key(|s| refinement_index(s));
}

/// Groups states by their base symbol.
pub(crate) fn variance_of<'a>(
  states: impl IntoIterator<Item = &'a str>,
) -> BTreeMap<String, Vec<String>> {
  let mut variance: BTreeMap<String, Vec<String>> = BTreeMap::new();
  let unique = states.into_iter().collect::<BTreeSet<_>>();
  for state in unique {
    variance
      .entry(base_state(state).to_string())
      .or_default()
      .push(state.to_string());
  }
  for refinements in variance.values_mut() {
    sort_refinements(refinements);
  }
  variance
}

fn jitter(rng: &mut impl Rng) -> f64 {
  1.0 + (rng.gen_range(0.0..1.0) - 0.5) / 50.0
}

/// Splits every non-root symbol of a grammar and lexicon in two, sharing each
/// rule's count among its refinements with a little random noise so that EM
/// has an asymmetry to work with.
#[derive(Debug, Clone)]
pub struct GrammarSplitter {
  split_map: BTreeMap<String, Vec<String>>,
  parent_map: HashMap<String, String>,
  variance: BTreeMap<String, Vec<String>>,
  new_grammar: Grammar,
  new_lexicon: SimpleLexicon,
}

impl GrammarSplitter {
  pub fn new(
    grammar: &Grammar,
    lexicon: &SimpleLexicon,
    root: &str,
    rng: &mut impl Rng,
  ) -> Result<Self, GrammarError> {
    let old_states = grammar
      .states()
      .iter()
      .map(String::as_str)
      .chain(lexicon.tags())
      .collect::<BTreeSet<_>>();
    let split_map = old_states
      .iter()
      .map(|s| (s.to_string(), split_state(s, root)))
      .collect::<BTreeMap<_, _>>();
    let parent_map = split_map
      .iter()
      .flat_map(|(old, news)| news.iter().map(move |new| (new.clone(), old.clone())))
      .collect();

    let mut splitter = Self {
      split_map,
      parent_map,
      variance: BTreeMap::new(),
      new_grammar: Grammar::from_counts(Counter::new(), Counter::new(), false),
      new_lexicon: SimpleLexicon::default(),
    };
    splitter.new_grammar = splitter.split_grammar(grammar, rng)?;
    splitter.new_lexicon = splitter.split_lexicon(lexicon, rng)?;
    splitter.variance = variance_of(
      splitter
        .new_grammar
        .states()
        .iter()
        .map(String::as_str)
        .chain(splitter.new_lexicon.tags()),
    );
    debug!(
      "split {} states into {}",
      splitter.split_map.len(),
      splitter.parent_map.len()
    );
    Ok(splitter)
  }

  fn refinements(&self, state: &str) -> Result<&Vec<String>, GrammarError> {
    self
      .split_map
      .get(state)
      .ok_or_else(|| GrammarError::MissingState {
        symbol: state.to_string(),
      })
  }

  fn split_grammar(&self, grammar: &Grammar, rng: &mut impl Rng) -> Result<Grammar, GrammarError> {
    let mut binary_counts = Counter::new();
    for (rule, count) in grammar.binary_counts().iter() {
      let expansions = combinations(&[
        self.refinements(&rule.parent)?.clone(),
        self.refinements(&rule.left)?.clone(),
        self.refinements(&rule.right)?.clone(),
      ]);
      let share = count / expansions.len() as f64;
      for symbols in expansions {
        if let [parent, left, right] = symbols.as_slice() {
          binary_counts.increment(BinaryRule::new(parent, left, right), share * jitter(rng));
        }
      }
    }

    let mut unary_counts = Counter::new();
    for (rule, count) in grammar.unary_counts().iter() {
      let expansions = combinations(&[
        self.refinements(&rule.parent)?.clone(),
        self.refinements(&rule.child)?.clone(),
      ]);
      let share = count / expansions.len() as f64;
      for symbols in expansions {
        if let [parent, child] = symbols.as_slice() {
          unary_counts.increment(UnaryRule::new(parent, child), share * jitter(rng));
        }
      }
    }

    Ok(Grammar::from_counts(unary_counts, binary_counts, false))
  }

  fn split_lexicon(
    &self,
    lexicon: &SimpleLexicon,
    rng: &mut impl Rng,
  ) -> Result<SimpleLexicon, GrammarError> {
    let mut word_to_tag = CounterMap::new();
    for (word, tags) in lexicon.word_to_tag_counters().iter() {
      for (tag, count) in tags.iter() {
        let new_tags = self.refinements(tag)?;
        let share = count / new_tags.len() as f64 * jitter(rng);
        for new_tag in new_tags {
          word_to_tag.increment(word.clone(), new_tag.clone(), share);
        }
      }
    }
    Ok(SimpleLexicon::new(word_to_tag))
  }

  /// All refinements of a base symbol after the split.
  pub fn get_variance(&self, base: &str) -> Option<&[String]> {
    self.variance.get(base).map(Vec::as_slice)
  }

  pub fn variance(&self) -> &BTreeMap<String, Vec<String>> {
    &self.variance
  }

  /// The refinements a pre-split state became.
  pub fn get_split_result(&self, old_state: &str) -> Option<&[String]> {
    self.split_map.get(old_state).map(Vec::as_slice)
  }

  /// The pre-split state a refinement came from.
  pub fn get_parent_state(&self, new_state: &str) -> Option<&str> {
    self.parent_map.get(new_state).map(String::as_str)
  }

  pub fn new_grammar(&self) -> &Grammar {
    &self.new_grammar
  }

  pub fn new_lexicon(&self) -> &SimpleLexicon {
    &self.new_lexicon
  }

  pub fn into_parts(self) -> (Grammar, SimpleLexicon, BTreeMap<String, Vec<String>>) {
    (self.new_grammar, self.new_lexicon, self.variance)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  fn grammar_and_lexicon() -> (Grammar, SimpleLexicon) {
    let mut unary = Counter::new();
    unary.increment(UnaryRule::new("ROOT", "S"), 2.0);
    unary.increment(UnaryRule::new("VP", "VBD"), 2.0);
    let mut binary = Counter::new();
    binary.increment(BinaryRule::new("S", "NP", "VP"), 2.0);
    binary.increment(BinaryRule::new("NP", "DT", "NN"), 2.0);
    let mut words = CounterMap::new();
    words.increment("the".to_string(), "DT".to_string(), 2.0);
    words.increment("dog".to_string(), "NN".to_string(), 1.0);
    words.increment("cat".to_string(), "NN".to_string(), 1.0);
    words.increment("ran".to_string(), "VBD".to_string(), 2.0);
    (
      Grammar::from_counts(unary, binary, false),
      SimpleLexicon::new(words),
    )
  }

  #[test]
  fn test_state_names() {
    assert_eq!(split_state("NP", "ROOT"), vec!["NP^0", "NP^1"]);
    assert_eq!(split_state("NP^3", "ROOT"), vec!["NP^6", "NP^7"]);
    assert_eq!(split_state("NP^S^1", "ROOT"), vec!["NP^S^2", "NP^S^3"]);
    assert_eq!(split_state("NP^S", "ROOT"), vec!["NP^S^0", "NP^S^1"]);
    assert_eq!(split_state("ROOT", "ROOT"), vec!["ROOT"]);

    assert_eq!(sibling_state("NP^6").as_deref(), Some("NP^7"));
    assert_eq!(sibling_state("NP^7").as_deref(), Some("NP^6"));
    assert_eq!(sibling_state("ROOT"), None);
    assert_eq!(merged_state("NP^7"), "NP^6");
    assert_eq!(merged_state("NP^6"), "NP^6");
    assert_eq!(refinement_index("@NP->_DT^12"), Some(12));
    assert_eq!(base_state("@NP->_DT^12"), "@NP->_DT");
  }

  #[test]
  fn test_split_preserves_mass() {
    let (g, lex) = grammar_and_lexicon();
    let splitter = GrammarSplitter::new(&g, &lex, "ROOT", &mut StdRng::seed_from_u64(3)).unwrap();
    let new = splitter.new_grammar();

    assert_eq!(splitter.get_variance("ROOT").unwrap(), ["ROOT"]);
    assert_eq!(splitter.get_variance("NP").unwrap(), ["NP^0", "NP^1"]);
    assert_eq!(splitter.get_split_result("VP").unwrap(), ["VP^0", "VP^1"]);
    assert_eq!(splitter.get_parent_state("S^1"), Some("S"));

    // ROOT -> S only has two expansions, S -> NP VP has eight
    assert_eq!(new.unary_counts().len(), 2 + 4);
    assert_eq!(new.binary_counts().len(), 8 + 8);
    let root_mass: f64 = new
      .unary_counts()
      .iter()
      .filter(|(r, _)| r.parent == "ROOT")
      .map(|(_, c)| c)
      .sum();
    assert!((root_mass - 2.0).abs() < 2.0 * 0.01);
    let s_mass: f64 = new
      .binary_counts()
      .iter()
      .filter(|(r, _)| base_state(&r.parent) == "S")
      .map(|(_, c)| c)
      .sum();
    assert!((s_mass - 2.0).abs() < 2.0 * 0.01);

    let lex = splitter.new_lexicon();
    let dog = lex.word_to_tag_counters().counter("dog").unwrap();
    assert_eq!(dog.len(), 2);
    assert!((dog.total() - 1.0).abs() < 0.01);
    assert_eq!(lex.relative_score("dog", "NN^0"), 0.5);
  }

  #[test]
  fn test_same_seed_same_split() {
    let (g, lex) = grammar_and_lexicon();
    let a = GrammarSplitter::new(&g, &lex, "ROOT", &mut StdRng::seed_from_u64(8)).unwrap();
    let b = GrammarSplitter::new(&g, &lex, "ROOT", &mut StdRng::seed_from_u64(8)).unwrap();
    assert_eq!(a.new_grammar().binary_counts(), b.new_grammar().binary_counts());
    assert_eq!(a.new_grammar().to_string(), b.new_grammar().to_string());
  }
}
