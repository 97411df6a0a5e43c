#[macro_use]
extern crate lazy_static;

pub mod annotations;
pub mod baseline;
pub mod binary_tree;
pub mod cky;
pub mod counter;
pub mod em;
pub mod error;
pub mod grammar;
pub mod lexicon;
pub mod parse_treebank;
pub mod rules;
pub mod splitter;
pub mod syntree;
pub mod unary_closure;
pub mod utils;

pub use crate::annotations::BinarizationConfig;
pub use crate::baseline::BaselineParser;
pub use crate::cky::{Chart, CkyParser, ParserConfig};
pub use crate::em::{CycleConfig, EmGrammarTrainer, TrainerConfig};
pub use crate::error::GrammarError;
pub use crate::grammar::{DefaultGrammarBuilder, Grammar, GrammarBuilder};
pub use crate::lexicon::{Lexicon, SimpleLexicon};
pub use crate::rules::{BinaryRule, UnaryRule};
pub use crate::syntree::Tree;
pub use crate::utils::Err;

/// Anything that can pick one tree for a sentence.
pub trait Parser {
  /// The best parse of `sentence`, unbinarized and with refinements removed,
  /// or `None` when there is no parse.
  fn get_best_parse(&self, sentence: &[&str]) -> Option<Tree>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse_treebank::parse_trees;

  fn two_sentences() -> Vec<Tree> {
    parse_trees(
      "(S (NP (DT the) (NN dog)) (VP (VBD ran)))
       (S (NP (DT the) (NN cat)) (VP (VBD sat)))",
    )
    .unwrap()
  }

  #[test]
  fn test_two_sentence_treebank() {
    let parser =
      CkyParser::train(&two_sentences(), ParserConfig::default().with_root("S")).unwrap();

    let grammar = parser.grammar();
    assert_eq!(grammar.binary_rules().len(), 2);
    assert_eq!(grammar.binary_score("S", "NP", "VP"), 1.0);
    assert_eq!(grammar.binary_score("NP", "DT", "NN"), 1.0);
    assert_eq!(grammar.unary_score("VP", "VBD"), 1.0);

    let lexicon = parser.lexicon();
    let best = lexicon
      .all_tags()
      .max_by(|a, b| {
        lexicon
          .score_tagging("the", a)
          .total_cmp(&lexicon.score_tagging("the", b))
      })
      .unwrap();
    assert_eq!(best, "DT");

    let parse = parser.get_best_parse(&["the", "dog", "sat"]).unwrap();
    assert_eq!(
      parse.to_string(),
      "(S (NP (DT the) (NN dog)) (VP (VBD sat)))"
    );
  }

  #[test]
  fn test_two_sentence_treebank_em() {
    let parser = CkyParser::train_em(
      &two_sentences(),
      ParserConfig::default().with_root("S"),
      TrainerConfig::default(),
    )
    .unwrap();
    assert!(parser.grammar().states().iter().any(|s| s.starts_with("NP^")));

    let parse = parser.get_best_parse(&["the", "dog", "sat"]).unwrap();
    assert_eq!(
      parse.to_string(),
      "(S (NP (DT the) (NN dog)) (VP (VBD sat)))"
    );
  }

  #[test]
  fn test_parsers_share_a_trait() {
    let trees = two_sentences();
    let parsers: Vec<Box<dyn Parser>> = vec![
      Box::new(CkyParser::train(&trees, ParserConfig::default().with_root("S")).unwrap()),
      Box::new(BaselineParser::new(&trees)),
    ];
    for parser in parsers {
      let parse = parser.get_best_parse(&["the", "cat", "ran"]).unwrap();
      assert_eq!(parse.yield_words(), vec!["the", "cat", "ran"]);
    }
  }
}
