use std::collections::BTreeMap;
use std::fmt;

use tracing::info;

use crate::Parser;
use crate::annotations::{BinarizationConfig, annotate_tree_markov, unannotate_tree};
use crate::em::{EmGrammarTrainer, TrainerConfig};
use crate::error::GrammarError;
use crate::grammar::{DefaultGrammarBuilder, Grammar, GrammarBuilder};
use crate::lexicon::Lexicon;
use crate::parse_treebank::ROOT_LABEL;
use crate::rules::UnaryRule;
use crate::syntree::Tree;
use crate::unary_closure::UnaryClosure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
  /// The symbol a complete parse must be rooted in.
  pub root: String,
  pub binarization: BinarizationConfig,
}

impl Default for ParserConfig {
  fn default() -> Self {
    Self {
      root: ROOT_LABEL.to_string(),
      binarization: BinarizationConfig::lossless(),
    }
  }
}

impl ParserConfig {
  /// Markov binarization with `horizontal` siblings of history, optionally
  /// marking nodes with their parent.
  pub fn markov(horizontal: usize, vertical: bool) -> Self {
    Self {
      binarization: BinarizationConfig::markov(horizontal, vertical),
      ..Self::default()
    }
  }

  pub fn with_root(self, root: impl Into<String>) -> Self {
    Self {
      root: root.into(),
      ..self
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
enum Backtrace {
  Lexical,
  Binary {
    split: usize,
    left: String,
    right: String,
  },
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
  score: f64,
  back: Backtrace,
}

/// Best way to reach a symbol through the unary closure. `child` names the
/// entry of the lexical/binary layer the closed rule rewrites to.
#[derive(Debug, Clone, PartialEq)]
struct ClosedEntry {
  score: f64,
  child: String,
}

#[derive(Debug, Clone, Default)]
struct Cell {
  base: BTreeMap<String, Entry>,
  closed: BTreeMap<String, ClosedEntry>,
}

/// Viterbi chart over spans `i..j` of a sentence.
#[derive(Debug)]
pub struct Chart {
  len: usize,
  cells: Vec<Cell>,
}

impl Chart {
  fn new(len: usize) -> Self {
    Self {
      len,
      cells: vec![Cell::default(); (len + 1) * (len + 1)],
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  fn cell(&self, i: usize, j: usize) -> &Cell {
    &self.cells[i * (self.len + 1) + j]
  }

  fn cell_mut(&mut self, i: usize, j: usize) -> &mut Cell {
    &mut self.cells[i * (self.len + 1) + j]
  }

  /// Best score for `symbol` over `i..j` after unary closure.
  pub fn score(&self, i: usize, j: usize, symbol: &str) -> Option<f64> {
    self.cell(i, j).closed.get(symbol).map(|e| e.score)
  }
}

impl fmt::Display for Chart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for width in 1..=self.len {
      for i in 0..=(self.len - width) {
        let j = i + width;
        let cell = self.cell(i, j);
        if cell.closed.is_empty() {
          continue;
        }
        writeln!(f, "Span {}..{}:", i, j)?;
        for (symbol, entry) in cell.closed.iter() {
          if entry.child == *symbol {
            writeln!(f, "  {} %% {:e}", symbol, entry.score)?;
          } else {
            writeln!(f, "  {} -> {} %% {:e}", symbol, entry.child, entry.score)?;
          }
        }
      }
    }
    Ok(())
  }
}

/// A chart parser over a binarized grammar, with unary chains handled through
/// the grammar's unary closure.
#[derive(Debug, Clone)]
pub struct CkyParser {
  grammar: Grammar,
  lexicon: Lexicon,
  closure: UnaryClosure,
  config: ParserConfig,
}

impl CkyParser {
  pub fn new(grammar: Grammar, lexicon: Lexicon, config: ParserConfig) -> Self {
    let grammar = grammar.become_full();
    let closure = UnaryClosure::from_grammar(&grammar);
    Self {
      grammar,
      lexicon,
      closure,
      config,
    }
  }

  /// Binarizes the training trees as `config` says and reads a grammar and
  /// lexicon off them.
  pub fn train(trees: &[Tree], config: ParserConfig) -> Result<Self, GrammarError> {
    let annotated = annotate_trees(trees, &config.binarization);
    let grammar = DefaultGrammarBuilder::new(&annotated).build_grammar()?;
    let lexicon = Lexicon::from_trees(&annotated);
    Ok(Self::new(grammar, lexicon, config))
  }

  /// Like [`CkyParser::train`], but refines the grammar with split-merge EM.
  /// The trainer uses the parser's root symbol.
  pub fn train_em(
    trees: &[Tree],
    config: ParserConfig,
    trainer_config: TrainerConfig,
  ) -> Result<Self, GrammarError> {
    let annotated = annotate_trees(trees, &config.binarization);
    let trainer_config = TrainerConfig {
      root: config.root.clone(),
      ..trainer_config
    };
    let mut trainer = EmGrammarTrainer::new(&annotated, trainer_config)?;
    trainer.train()?;
    let (grammar, lexicon) = trainer.into_grammar_and_lexicon();
    Ok(Self::new(grammar, lexicon, config))
  }

  pub fn grammar(&self) -> &Grammar {
    &self.grammar
  }

  pub fn lexicon(&self) -> &Lexicon {
    &self.lexicon
  }

  pub fn unary_closure(&self) -> &UnaryClosure {
    &self.closure
  }

  pub fn config(&self) -> &ParserConfig {
    &self.config
  }

  /// Fills the chart for `sentence`.
  pub fn parse_chart(&self, sentence: &[&str]) -> Chart {
    let n = sentence.len();
    let mut chart = Chart::new(n);

    for (i, word) in sentence.iter().enumerate() {
      let cell = chart.cell_mut(i, i + 1);
      for tag in self.lexicon.all_tags() {
        let score = self.lexicon.score_tagging(word, tag);
        if score > 0.0 {
          cell.base.insert(
            tag.to_string(),
            Entry {
              score,
              back: Backtrace::Lexical,
            },
          );
        }
      }
      self.close_cell(cell);
    }

    for width in 2..=n {
      for i in 0..=(n - width) {
        let j = i + width;
        let mut base: BTreeMap<String, Entry> = BTreeMap::new();
        for k in (i + 1)..j {
          let right_cell = chart.cell(k, j);
          for (left, left_entry) in chart.cell(i, k).closed.iter() {
            for rule in self.grammar.binary_rules_by_left_child(left) {
              let Some(right_entry) = right_cell.closed.get(&rule.right) else {
                continue;
              };
              let score = left_entry.score * right_entry.score * rule.score;
              if base.get(&rule.parent).is_none_or(|e| score > e.score) {
                base.insert(
                  rule.parent.clone(),
                  Entry {
                    score,
                    back: Backtrace::Binary {
                      split: k,
                      left: left.clone(),
                      right: rule.right.clone(),
                    },
                  },
                );
              }
            }
          }
        }
        let cell = chart.cell_mut(i, j);
        cell.base = base;
        self.close_cell(cell);
      }
    }

    chart
  }

  /// Relaxes the lexical/binary layer of a cell through the unary closure.
  fn close_cell(&self, cell: &mut Cell) {
    let mut closed: BTreeMap<String, ClosedEntry> = cell
      .base
      .iter()
      .map(|(symbol, entry)| {
        (
          symbol.clone(),
          ClosedEntry {
            score: entry.score,
            child: symbol.clone(),
          },
        )
      })
      .collect();
    for (child, entry) in cell.base.iter() {
      for rule in self.closure.closed_unary_rules_by_child(child) {
        if rule.is_self_loop() {
          continue;
        }
        let score = entry.score * rule.score;
        if closed.get(&rule.parent).is_none_or(|e| score > e.score) {
          closed.insert(
            rule.parent.clone(),
            ClosedEntry {
              score,
              child: child.clone(),
            },
          );
        }
      }
    }
    cell.closed = closed;
  }

  /// The best parse with the grammar's own labels: binarized, marked and
  /// refined. `None` if the root symbol cannot cover the sentence.
  pub fn get_best_annotated_parse(&self, sentence: &[&str]) -> Option<Tree> {
    if sentence.is_empty() {
      return None;
    }
    let chart = self.parse_chart(sentence);
    self.build_tree(&chart, sentence, 0, sentence.len(), &self.config.root)
  }

  fn build_tree(
    &self,
    chart: &Chart,
    sentence: &[&str],
    i: usize,
    j: usize,
    label: &str,
  ) -> Option<Tree> {
    let closed = chart.cell(i, j).closed.get(label)?;
    let entry = chart.cell(i, j).base.get(&closed.child)?;

    let mut tree = match &entry.back {
      Backtrace::Lexical => Tree::branch(
        closed.child.clone(),
        vec![Tree::leaf(sentence[i].to_string(), i)],
      ),
      Backtrace::Binary { split, left, right } => {
        let left = self.build_tree(chart, sentence, i, *split, left)?;
        let right = self.build_tree(chart, sentence, *split, j, right)?;
        Tree::branch(closed.child.clone(), vec![left, right])
      }
    };

    if closed.child != label {
      let path = self
        .closure
        .get_path(&UnaryRule::new(label, closed.child.as_str()))?;
      for symbol in path[..path.len() - 1].iter().rev() {
        tree = Tree::branch(symbol.clone(), vec![tree]);
      }
    }
    Some(tree)
  }
}

impl Parser for CkyParser {
  fn get_best_parse(&self, sentence: &[&str]) -> Option<Tree> {
    self
      .get_best_annotated_parse(sentence)
      .map(|tree| unannotate_tree(&tree))
  }
}

fn annotate_trees(trees: &[Tree], config: &BinarizationConfig) -> Vec<Tree> {
  let annotated = trees
    .iter()
    .map(|t| annotate_tree_markov(t, config))
    .collect::<Vec<_>>();
  info!("annotated {} training trees", annotated.len());
  annotated
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::counter::{Counter, CounterMap};
  use crate::parse_treebank::parse_trees;
  use crate::rules::BinaryRule;

  fn corpus() -> Vec<Tree> {
    parse_trees(
      "(ROOT (S (NP (DT the) (NN dog)) (VP (VBD ran))))
       (ROOT (S (NP (DT the) (NN cat)) (VP (VBD sat) (PP (IN on) (NP (DT the) (NN mat))))))
       (ROOT (S (NP (PRP it)) (VP (VBD sat))))",
    )
    .unwrap()
  }

  #[test]
  fn test_parses_training_sentence() {
    let parser = CkyParser::train(&corpus(), ParserConfig::default()).unwrap();
    let parse = parser.get_best_parse(&["the", "dog", "ran"]).unwrap();
    assert_eq!(
      parse.to_string(),
      "(ROOT (S (NP (DT the) (NN dog)) (VP (VBD ran))))"
    );
    assert_eq!(parse.span(), (0, 3));
  }

  #[test]
  fn test_unary_chain_is_expanded() {
    // "it" only reaches S through NP -> PRP and VP -> VBD
    let parser = CkyParser::train(&corpus(), ParserConfig::default()).unwrap();
    let parse = parser.get_best_parse(&["it", "ran"]).unwrap();
    assert_eq!(parse.to_string(), "(ROOT (S (NP (PRP it)) (VP (VBD ran))))");
  }

  #[test]
  fn test_markov_parser_unannotates() {
    let parser = CkyParser::train(&corpus(), ParserConfig::markov(1, true)).unwrap();
    let parse = parser
      .get_best_parse(&["the", "cat", "sat", "on", "the", "mat"])
      .unwrap();
    assert_eq!(
      parse.to_string(),
      "(ROOT (S (NP (DT the) (NN cat)) (VP (VBD sat) (PP (IN on) (NP (DT the) (NN mat))))))"
    );
    let annotated = parser
      .get_best_annotated_parse(&["the", "cat", "sat", "on", "the", "mat"])
      .unwrap();
    assert!(annotated.to_string().contains("NP^S"));
  }

  #[test]
  fn test_no_parse() {
    let parser = CkyParser::train(&corpus(), ParserConfig::default()).unwrap();
    assert_eq!(parser.get_best_parse(&[]), None);

    let parser = CkyParser::train(&corpus(), ParserConfig::default().with_root("SQ")).unwrap();
    assert_eq!(parser.get_best_parse(&["the", "dog", "ran"]), None);
  }

  /// Every tree rooted in `symbol` over `sentence[i..j]` with its score.
  fn derivations(
    parser: &CkyParser,
    sentence: &[&str],
    symbol: &str,
    i: usize,
    j: usize,
  ) -> Vec<(f64, Tree)> {
    let grammar = parser.grammar();
    let mut found = Vec::new();
    if j == i + 1 {
      let score = parser.lexicon().score_tagging(sentence[i], symbol);
      if score > 0.0 && parser.lexicon().all_tags().any(|t| t == symbol) {
        let leaf = Tree::leaf(sentence[i].to_string(), i);
        found.push((score, Tree::branch(symbol.to_string(), vec![leaf])));
      }
    }
    for rule in grammar.unary_rules().iter().filter(|r| r.parent == symbol) {
      for (score, child) in derivations(parser, sentence, &rule.child, i, j) {
        found.push((rule.score * score, Tree::branch(symbol.to_string(), vec![child])));
      }
    }
    for rule in grammar.binary_rules().iter().filter(|r| r.parent == symbol) {
      for k in (i + 1)..j {
        let rights = derivations(parser, sentence, &rule.right, k, j);
        for (l_score, left) in derivations(parser, sentence, &rule.left, i, k) {
          for (r_score, right) in rights.iter() {
            found.push((
              rule.score * l_score * r_score,
              Tree::branch(symbol.to_string(), vec![left.clone(), right.clone()]),
            ));
          }
        }
      }
    }
    found
  }

  #[test]
  fn test_best_parse_matches_exhaustive_search() {
    let mut unary = Counter::new();
    unary.increment(UnaryRule::new("ROOT", "S"), 1.0);
    unary.increment(UnaryRule::new("S", "VP"), 1.0);
    unary.increment(UnaryRule::new("VP", "VB"), 2.0);
    unary.increment(UnaryRule::new("NP", "NN"), 3.0);
    let mut binary = Counter::new();
    binary.increment(BinaryRule::new("S", "NP", "VP"), 3.0);
    binary.increment(BinaryRule::new("NP", "DT", "NN"), 2.0);
    binary.increment(BinaryRule::new("NP", "NN", "NN"), 1.0);
    binary.increment(BinaryRule::new("VP", "VB", "NP"), 2.0);
    let mut words = CounterMap::new();
    words.increment("fish".to_string(), "NN".to_string(), 2.0);
    words.increment("fish".to_string(), "VB".to_string(), 1.0);
    words.increment("the".to_string(), "DT".to_string(), 2.0);
    words.increment("people".to_string(), "NN".to_string(), 1.0);
    let parser = CkyParser::new(
      Grammar::from_counts(unary, binary, false),
      Lexicon::from_counts(words),
      ParserConfig::default(),
    );

    let sentences: [&[&str]; 5] = [
      &["fish"],
      &["people", "fish"],
      &["people", "fish", "fish"],
      &["the", "fish", "fish"],
      &["fish", "the", "fish"],
    ];
    for sentence in sentences {
      let n = sentence.len();
      let all = derivations(&parser, sentence, "ROOT", 0, n);
      assert!(!all.is_empty(), "{:?} has no trees", sentence);
      let best = all.iter().map(|(score, _)| *score).fold(0.0, f64::max);

      let chart = parser.parse_chart(sentence);
      let chart_best = chart.score(0, n, "ROOT").unwrap();
      assert!((chart_best - best).abs() <= 1e-12 * best, "{:?}", sentence);

      let parse = parser.get_best_annotated_parse(sentence).unwrap().to_string();
      let (score, _) = all
        .iter()
        .find(|(_, tree)| tree.to_string() == parse)
        .unwrap_or_else(|| panic!("{} is not a tree of the grammar", parse));
      assert!(
        (score - best).abs() <= 1e-12 * best,
        "{} scores {} of {}",
        parse,
        score,
        best
      );
    }
  }

  #[test]
  fn test_hand_built_grammar() {
    let mut unary = Counter::new();
    unary.increment(UnaryRule::new("ROOT", "S"), 1.0);
    let mut binary = Counter::new();
    binary.increment(BinaryRule::new("S", "A", "B"), 3.0);
    binary.increment(BinaryRule::new("S", "B", "A"), 1.0);
    let grammar = Grammar::from_counts(unary, binary, false);
    let mut words = CounterMap::new();
    words.increment("a".to_string(), "A".to_string(), 1.0);
    words.increment("b".to_string(), "B".to_string(), 1.0);
    let lexicon = Lexicon::from_counts(words);

    let parser = CkyParser::new(grammar, lexicon, ParserConfig::default());
    assert!(parser.grammar().is_full());
    let chart = parser.parse_chart(&["a", "b"]);
    assert!(chart.score(0, 2, "ROOT").unwrap() > 0.0);
    assert!(chart.to_string().contains("Span 0..2:"));
    assert_eq!(
      parser.get_best_parse(&["b", "a"]).unwrap().to_string(),
      "(ROOT (S (B b) (A a)))"
    );
  }
}
