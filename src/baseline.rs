use std::collections::HashMap;

use tracing::info;

use crate::Parser;
use crate::annotations::{annotate_tree, unannotate_tree};
use crate::counter::{Counter, CounterMap};
use crate::lexicon::Lexicon;
use crate::parse_treebank::ROOT_LABEL;
use crate::syntree::{SynTree, Tree};

/// Tags the sentence word by word, then returns the most frequent training
/// tree with that tag sequence, or failing that a right-branching tree whose
/// nodes get the category most often seen over spans of their length.
#[derive(Debug, Clone)]
pub struct BaselineParser {
  lexicon: Lexicon,
  known_parses: HashMap<Vec<String>, Vec<(Tree, usize)>>,
  span_to_categories: CounterMap<usize, String>,
  fallback_category: String,
}

impl BaselineParser {
  pub fn new(trees: &[Tree]) -> Self {
    let annotated = trees.iter().map(annotate_tree).collect::<Vec<_>>();
    let lexicon = Lexicon::from_trees(&annotated);

    let mut known_parses: HashMap<Vec<String>, Vec<(Tree, usize)>> = HashMap::new();
    let mut span_to_categories = CounterMap::new();
    let mut categories = Counter::new();
    for tree in annotated {
      tally_spans(&tree, &mut span_to_categories, &mut categories);
      let tags = tree
        .preterminal_yield()
        .into_iter()
        .cloned()
        .collect::<Vec<_>>();
      let parses = known_parses.entry(tags).or_default();
      match parses.iter_mut().find(|(t, _)| *t == tree) {
        Some((_, count)) => *count += 1,
        None => parses.push((tree, 1)),
      }
    }
    let fallback_category = categories
      .arg_max()
      .cloned()
      .unwrap_or_else(|| ROOT_LABEL.to_string());
    info!(
      "baseline parser knows {} tag sequences",
      known_parses.len()
    );

    Self {
      lexicon,
      known_parses,
      span_to_categories,
      fallback_category,
    }
  }

  fn best_tag(&self, word: &str) -> Option<&str> {
    let mut best: Option<(&str, f64)> = None;
    for tag in self.lexicon.all_tags() {
      let score = self.lexicon.score_tagging(word, tag);
      if best.is_none_or(|(_, b)| score > b) {
        best = Some((tag, score));
      }
    }
    best.map(|(tag, _)| tag)
  }

  fn best_known_parse(&self, tags: &[String]) -> Option<&Tree> {
    let parses = self.known_parses.get(tags)?;
    let mut best: Option<&(Tree, usize)> = None;
    for parse in parses.iter() {
      if best.is_none_or(|b| parse.1 > b.1) {
        best = Some(parse);
      }
    }
    best.map(|(tree, _)| tree)
  }

  fn category_for_span(&self, length: usize) -> String {
    self
      .span_to_categories
      .counter(&length)
      .and_then(Counter::arg_max)
      .unwrap_or(&self.fallback_category)
      .clone()
  }

  fn right_branching_parse(&self, sentence: &[&str], tags: &[String]) -> Tree {
    let mut preterminals = sentence
      .iter()
      .zip(tags.iter())
      .enumerate()
      .map(|(idx, (word, tag))| Tree::branch(tag.clone(), vec![Tree::leaf(word.to_string(), idx)]))
      .rev();
    let mut tree = match preterminals.next() {
      Some(last) => last,
      None => return Tree::branch(ROOT_LABEL.to_string(), Vec::new()),
    };
    for preterminal in preterminals {
      let (start, _) = preterminal.span();
      let label = self.category_for_span(sentence.len() - start);
      tree = Tree::branch(label, vec![preterminal, tree]);
    }
    Tree::branch(ROOT_LABEL.to_string(), vec![tree])
  }
}

impl Parser for BaselineParser {
  fn get_best_parse(&self, sentence: &[&str]) -> Option<Tree> {
    if sentence.is_empty() {
      return None;
    }
    let tags = sentence
      .iter()
      .map(|w| self.best_tag(w).map(str::to_string))
      .collect::<Option<Vec<_>>>()?;
    let annotated = match self.best_known_parse(&tags) {
      Some(known) => with_words(known, sentence, &mut 0),
      None => self.right_branching_parse(sentence, &tags),
    };
    Some(unannotate_tree(&annotated))
  }
}

/// Returns the number of words under `tree`.
fn tally_spans(
  tree: &Tree,
  span_to_categories: &mut CounterMap<usize, String>,
  categories: &mut Counter<String>,
) -> usize {
  if tree.is_leaf() || tree.is_preterminal() {
    return 1;
  }
  let length = tree
    .children()
    .iter()
    .map(|child| tally_spans(child, span_to_categories, categories))
    .sum();
  if tree.label() != ROOT_LABEL {
    span_to_categories.increment(length, tree.label().to_string(), 1.0);
    categories.increment(tree.label().to_string(), 1.0);
  }
  length
}

/// A copy of a training tree over the words of another sentence with the
/// same length.
fn with_words(tree: &Tree, sentence: &[&str], position: &mut usize) -> Tree {
  match tree {
    SynTree::Leaf(_) => {
      let leaf = Tree::leaf(sentence[*position].to_string(), *position);
      *position += 1;
      leaf
    }
    SynTree::Branch(c, children) => Tree::branch(
      c.value.clone(),
      children
        .iter()
        .map(|child| with_words(child, sentence, position))
        .collect(),
    ),
  }
}
