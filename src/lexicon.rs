use std::collections::BTreeSet;

use crate::counter::{Counter, CounterMap};
use crate::splitter::base_state;
use crate::syntree::Tree;
use crate::utils::ratio_or_zero;

/// Words seen fewer times than this share in the tag's open-class mass.
const RARE_WORD_THRESHOLD: f64 = 10.0;

/// Scores (word, tag) pairs with a smoothed estimate of P(tag|word)/P(tag).
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
  word_to_tag: CounterMap<String, String>,
  tag_counter: Counter<String>,
  word_counter: Counter<String>,
  /// Number of distinct words seen with each tag.
  type_tag_counter: Counter<String>,
  total_tokens: f64,
  total_word_types: f64,
}

impl Lexicon {
  pub fn from_trees(trees: &[Tree]) -> Self {
    Self::from_counts(tally_taggings(trees))
  }

  /// Builds a lexicon from (possibly fractional) word -> tag counts.
  pub fn from_counts(word_to_tag: CounterMap<String, String>) -> Self {
    let mut lexicon = Self::default();
    for (word, tags) in word_to_tag.iter() {
      for (tag, count) in tags.iter() {
        lexicon.total_tokens += count;
        lexicon.tag_counter.increment(tag.clone(), *count);
        lexicon.word_counter.increment(word.clone(), *count);
        lexicon.type_tag_counter.increment(tag.clone(), 1.0);
        lexicon.total_word_types += 1.0;
      }
    }
    lexicon.word_to_tag = word_to_tag;
    lexicon
  }

  pub fn all_tags(&self) -> impl Iterator<Item = &str> {
    self.tag_counter.keys().map(String::as_str)
  }

  pub fn is_known(&self, word: &str) -> bool {
    self.word_counter.contains(word)
  }

  pub fn word_to_tag_counters(&self) -> &CounterMap<String, String> {
    &self.word_to_tag
  }

  /// Proportional to P(tag|word)/P(tag) for a fixed word. Rare and unknown
  /// words get an extra pseudo-observation spread over tags by how many
  /// distinct words each tag has been seen with, so an unknown word can still
  /// take any open-class tag.
  pub fn score_tagging(&self, word: &str, tag: &str) -> f64 {
    let p_tag = ratio_or_zero(self.tag_counter.get(tag), self.total_tokens);
    let mut c_word = self.word_counter.get(word);
    let mut c_tag_and_word = self.word_to_tag.get(word, tag);
    if c_word < RARE_WORD_THRESHOLD {
      c_word += 1.0;
      c_tag_and_word += ratio_or_zero(self.type_tag_counter.get(tag), self.total_word_types);
    }
    let p_word = (1.0 + c_word) / (self.total_tokens + 1.0);
    let p_tag_given_word = ratio_or_zero(c_tag_and_word, c_word);
    ratio_or_zero(p_tag_given_word, p_tag) * p_word
  }
}

/// Word -> tag counts together with each count's share of its base tag, as
/// EM needs them.
#[derive(Debug, Clone, Default)]
pub struct SimpleLexicon {
  word_to_tag: CounterMap<String, String>,
  relative: CounterMap<String, String>,
}

impl SimpleLexicon {
  pub fn new(word_to_tag: CounterMap<String, String>) -> Self {
    let mut base_counts: CounterMap<&str, String> = CounterMap::new();
    for (word, tags) in word_to_tag.iter() {
      for (tag, count) in tags.iter() {
        base_counts.increment(word.as_str(), base_state(tag).to_string(), *count);
      }
    }

    let mut relative = CounterMap::new();
    for (word, tags) in word_to_tag.iter() {
      for (tag, count) in tags.iter() {
        let total = base_counts.get(word.as_str(), base_state(tag));
        relative.set(word.clone(), tag.clone(), ratio_or_zero(*count, total));
      }
    }

    Self {
      word_to_tag,
      relative,
    }
  }

  pub fn from_trees(trees: &[Tree]) -> Self {
    Self::new(tally_taggings(trees))
  }

  /// Share of c(word, tag) among the counts of `word` with any refinement of
  /// the same base tag; zero if the word was never seen with that base tag.
  pub fn relative_score(&self, word: &str, tag: &str) -> f64 {
    self.relative.get(word, tag)
  }

  pub fn word_to_tag_counters(&self) -> &CounterMap<String, String> {
    &self.word_to_tag
  }

  pub fn tags(&self) -> BTreeSet<&str> {
    self
      .word_to_tag
      .iter()
      .flat_map(|(_, tags)| tags.keys().map(String::as_str))
      .collect()
  }

  pub fn build_lexicon(&self) -> Lexicon {
    Lexicon::from_counts(self.word_to_tag.clone())
  }
}

fn tally_taggings(trees: &[Tree]) -> CounterMap<String, String> {
  let mut word_to_tag = CounterMap::new();
  for tree in trees {
    let words = tree.yield_words();
    let tags = tree.preterminal_yield();
    for (word, tag) in words.into_iter().zip(tags) {
      word_to_tag.increment(word.clone(), tag.clone(), 1.0);
    }
  }
  word_to_tag
}
