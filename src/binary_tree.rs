use std::collections::BTreeMap;

use crate::error::GrammarError;
use crate::grammar::Grammar;
use crate::lexicon::SimpleLexicon;
use crate::syntree::{SynTree, Tree};

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryChildren {
  /// A preterminal over this word.
  Leaf(String),
  Unary(Box<BinaryTree>),
  Binary(Box<BinaryTree>, Box<BinaryTree>),
}

/// A binarized training tree as EM sees it: every node knows the
/// refinements its label currently has, and holds one inside and one outside
/// score per refinement.
///
/// Scores are stored rescaled so the largest entry of each vector is 1; the
/// natural log of the factor taken out is kept alongside, so the true inside
/// score of refinement `k` is `inside()[k] * inside_scale().exp()`.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryTree {
  label: String,
  variance: Vec<String>,
  inside: Vec<f64>,
  outside: Vec<f64>,
  inside_scale: f64,
  outside_scale: f64,
  children: BinaryChildren,
}

impl BinaryTree {
  /// `variance` maps each base label to its refinements. Errors on nodes with
  /// more than two children, words outside preterminals, and labels without
  /// refinements.
  pub fn build(
    tree: &Tree,
    variance: &BTreeMap<String, Vec<String>>,
  ) -> Result<Self, GrammarError> {
    let (constituent, children) = match tree {
      SynTree::Branch(c, children) => (c, children),
      SynTree::Leaf(w) => {
        return Err(GrammarError::MalformedTree {
          label: w.value.clone(),
          arity: 0,
        });
      }
    };
    let malformed = || GrammarError::MalformedTree {
      label: constituent.value.clone(),
      arity: children.len(),
    };

    let children = match children.as_slice() {
      [SynTree::Leaf(w)] => BinaryChildren::Leaf(w.value.clone()),
      [child] => BinaryChildren::Unary(Box::new(Self::build(child, variance)?)),
      [left, right] if left.is_branch() && right.is_branch() => BinaryChildren::Binary(
        Box::new(Self::build(left, variance)?),
        Box::new(Self::build(right, variance)?),
      ),
      _ => return Err(malformed()),
    };

    let refinements = variance
      .get(&constituent.value)
      .filter(|v| !v.is_empty())
      .ok_or_else(|| GrammarError::MissingState {
        symbol: constituent.value.clone(),
      })?;

    Ok(Self {
      label: constituent.value.clone(),
      variance: refinements.clone(),
      inside: vec![0.0; refinements.len()],
      outside: vec![0.0; refinements.len()],
      inside_scale: 0.0,
      outside_scale: 0.0,
      children,
    })
  }

  /// The unrefined label.
  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn variance(&self) -> &[String] {
    &self.variance
  }

  /// Rescaled inside scores, see [`BinaryTree::inside_scale`].
  pub fn inside(&self) -> &[f64] {
    &self.inside
  }

  pub fn outside(&self) -> &[f64] {
    &self.outside
  }

  /// Log of the factor the inside scores were divided by.
  pub fn inside_scale(&self) -> f64 {
    self.inside_scale
  }

  pub fn outside_scale(&self) -> f64 {
    self.outside_scale
  }

  pub fn children(&self) -> &BinaryChildren {
    &self.children
  }

  pub fn is_preterminal(&self) -> bool {
    matches!(self.children, BinaryChildren::Leaf(_))
  }

  /// Log probability of the tree's yield and shape, summed over all
  /// refinements: ln Σ inside · outside at this node. Negative infinity when
  /// the tree has no derivation under the grammar.
  pub fn log_likelihood(&self) -> f64 {
    let scaled = self
      .inside
      .iter()
      .zip(self.outside.iter())
      .map(|(i, o)| i * o)
      .sum::<f64>();
    if scaled > 0.0 {
      scaled.ln() + self.inside_scale + self.outside_scale
    } else {
      f64::NEG_INFINITY
    }
  }

  /// `exp(log_likelihood())`; underflows to zero on long sentences.
  pub fn likelihood(&self) -> f64 {
    self.log_likelihood().exp()
  }

  /// This node and all nodes below it, parents before children.
  pub fn nodes(&self) -> Vec<&BinaryTree> {
    let mut nodes = Vec::new();
    self.collect_nodes(&mut nodes);
    nodes
  }

  fn collect_nodes<'a>(&'a self, nodes: &mut Vec<&'a BinaryTree>) {
    nodes.push(self);
    match &self.children {
      BinaryChildren::Leaf(_) => {}
      BinaryChildren::Unary(child) => child.collect_nodes(nodes),
      BinaryChildren::Binary(left, right) => {
        left.collect_nodes(nodes);
        right.collect_nodes(nodes);
      }
    }
  }

  /// Bottom-up pass. Preterminals take the lexicon's relative score of the
  /// word for each refined tag.
  pub fn compute_inside(&mut self, grammar: &Grammar, lexicon: &SimpleLexicon) {
    match &mut self.children {
      BinaryChildren::Leaf(word) => {
        for (inside, tag) in self.inside.iter_mut().zip(self.variance.iter()) {
          *inside = lexicon.relative_score(word.as_str(), tag);
        }
        self.inside_scale = 0.0;
      }
      BinaryChildren::Unary(child) => {
        child.compute_inside(grammar, lexicon);
        for (inside, parent) in self.inside.iter_mut().zip(self.variance.iter()) {
          *inside = child
            .variance
            .iter()
            .zip(child.inside.iter())
            .map(|(c, c_in)| grammar.unary_score(parent, c) * c_in)
            .sum();
        }
        self.inside_scale = child.inside_scale;
      }
      BinaryChildren::Binary(left, right) => {
        left.compute_inside(grammar, lexicon);
        right.compute_inside(grammar, lexicon);
        for (inside, parent) in self.inside.iter_mut().zip(self.variance.iter()) {
          let mut sum = 0.0;
          for (l, l_in) in left.variance.iter().zip(left.inside.iter()) {
            for (r, r_in) in right.variance.iter().zip(right.inside.iter()) {
              sum += grammar.binary_score(parent, l, r) * l_in * r_in;
            }
          }
          *inside = sum;
        }
        self.inside_scale = left.inside_scale + right.inside_scale;
      }
    }
    rescale(&mut self.inside, &mut self.inside_scale);
  }

  /// Spreads the root's outside mass evenly over its refinements.
  pub fn reset_root_outside(&mut self) {
    let share = 1.0 / self.variance.len() as f64;
    self.outside.iter_mut().for_each(|o| *o = share);
    self.outside_scale = 0.0;
    rescale(&mut self.outside, &mut self.outside_scale);
  }

  /// Top-down pass; expects inside scores to be current and this node's own
  /// outside scores to be set.
  pub fn compute_outside(&mut self, grammar: &Grammar) {
    match &mut self.children {
      BinaryChildren::Leaf(_) => {}
      BinaryChildren::Unary(child) => {
        for (c_out, c) in child.outside.iter_mut().zip(child.variance.iter()) {
          *c_out = self
            .variance
            .iter()
            .zip(self.outside.iter())
            .map(|(p, p_out)| grammar.unary_score(p, c) * p_out)
            .sum();
        }
        child.outside_scale = self.outside_scale;
        rescale(&mut child.outside, &mut child.outside_scale);
        child.compute_outside(grammar);
      }
      BinaryChildren::Binary(left, right) => {
        for (l_idx, l) in left.variance.iter().enumerate() {
          let mut sum = 0.0;
          for (p, p_out) in self.variance.iter().zip(self.outside.iter()) {
            for (r, r_in) in right.variance.iter().zip(right.inside.iter()) {
              sum += grammar.binary_score(p, l, r) * p_out * r_in;
            }
          }
          left.outside[l_idx] = sum;
        }
        left.outside_scale = self.outside_scale + right.inside_scale;
        rescale(&mut left.outside, &mut left.outside_scale);

        for (r_idx, r) in right.variance.iter().enumerate() {
          let mut sum = 0.0;
          for (p, p_out) in self.variance.iter().zip(self.outside.iter()) {
            for (l, l_in) in left.variance.iter().zip(left.inside.iter()) {
              sum += grammar.binary_score(p, l, r) * p_out * l_in;
            }
          }
          right.outside[r_idx] = sum;
        }
        right.outside_scale = self.outside_scale + left.inside_scale;
        rescale(&mut right.outside, &mut right.outside_scale);

        left.compute_outside(grammar);
        right.compute_outside(grammar);
      }
    }
  }

  /// Runs both passes from this node as the root.
  pub fn compute_inside_outside(&mut self, grammar: &Grammar, lexicon: &SimpleLexicon) {
    self.compute_inside(grammar, lexicon);
    self.reset_root_outside();
    self.compute_outside(grammar);
  }
}

/// Divides `values` by their maximum and adds its log to `scale`. All-zero
/// vectors are left alone.
fn rescale(values: &mut [f64], scale: &mut f64) {
  let max = values.iter().copied().fold(0.0, f64::max);
  if max > 0.0 && max.is_finite() {
    values.iter_mut().for_each(|v| *v /= max);
    *scale += max.ln();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::counter::{Counter, CounterMap};
  use crate::grammar::{DefaultGrammarBuilder, GrammarBuilder};
  use crate::rules::{BinaryRule, UnaryRule};
  use crate::splitter::GrammarSplitter;
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  fn variance() -> BTreeMap<String, Vec<String>> {
    let mut v = BTreeMap::new();
    v.insert("S".to_string(), vec!["S".to_string()]);
    for base in ["NP", "VP", "NN", "VBD"] {
      v.insert(base.to_string(), vec![format!("{}^0", base), format!("{}^1", base)]);
    }
    v
  }

  #[test]
  fn test_build_shapes() {
    let t: Tree = "(S (NP (NN dogs)) (VP (VBD bark)))".parse().unwrap();
    let b = BinaryTree::build(&t, &variance()).unwrap();
    assert_eq!(b.label(), "S");
    assert_eq!(b.nodes().len(), 5);
    assert!(b.nodes()[2].is_preterminal());
    assert_eq!(b.nodes()[1].variance(), ["NP^0", "NP^1"]);
    assert_eq!(b.nodes()[1].inside().len(), 2);

    let t: Tree = "(S (NP (NN dogs)) (VP (VBD bark)) (NN x))".parse().unwrap();
    assert_eq!(
      BinaryTree::build(&t, &variance()).unwrap_err(),
      GrammarError::MalformedTree {
        label: "S".to_string(),
        arity: 3
      }
    );
    let t: Tree = "(S (JJ big))".parse().unwrap();
    assert_eq!(
      BinaryTree::build(&t, &variance()).unwrap_err(),
      GrammarError::MissingState {
        symbol: "JJ".to_string()
      }
    );
  }

  #[test]
  fn test_inside_outside_agree() {
    let mut unary = Counter::new();
    let mut binary = Counter::new();
    for (i, np) in ["NP^0", "NP^1"].iter().enumerate() {
      for (j, vp) in ["VP^0", "VP^1"].iter().enumerate() {
        binary.increment(BinaryRule::new("S", *np, *vp), 1.0 + (i + 2 * j) as f64);
      }
      unary.increment(UnaryRule::new(*np, "NN^0"), 1.0 + i as f64);
      unary.increment(UnaryRule::new(*np, "NN^1"), 2.0);
    }
    for vp in ["VP^0", "VP^1"] {
      unary.increment(UnaryRule::new(vp, "VBD^0"), 1.0);
      unary.increment(UnaryRule::new(vp, "VBD^1"), 3.0);
    }
    let grammar = Grammar::from_counts(unary, binary, false);
    let mut words = CounterMap::new();
    words.increment("dogs".to_string(), "NN^0".to_string(), 1.0);
    words.increment("dogs".to_string(), "NN^1".to_string(), 3.0);
    words.increment("bark".to_string(), "VBD^0".to_string(), 1.0);
    words.increment("bark".to_string(), "VBD^1".to_string(), 1.0);
    let lexicon = SimpleLexicon::new(words);

    let t: Tree = "(S (NP (NN dogs)) (VP (VBD bark)))".parse().unwrap();
    let mut b = BinaryTree::build(&t, &variance()).unwrap();
    b.compute_inside_outside(&grammar, &lexicon);

    // Σ in·out is the same number at every node of the tree
    let likelihood = b.likelihood();
    assert!(likelihood > 0.0);
    for node in b.nodes() {
      assert!(
        (node.likelihood() - likelihood).abs() < 1e-12,
        "{} has {}",
        node.label(),
        node.likelihood()
      );
    }
  }

  /// `(S (X (T0 w0) (X (T1 w1) ... (X (T8 w398) (T9 w399)))))`
  fn right_branching(n: usize) -> Tree {
    let mut src = format!("(X (T{} w{}) (T{} w{}))", (n - 2) % 10, n - 2, (n - 1) % 10, n - 1);
    for k in (0..n - 2).rev() {
      src = format!("(X (T{} w{}) {})", k % 10, k, src);
    }
    format!("(S {})", src).parse().unwrap()
  }

  #[test]
  fn test_long_tree_stays_finite() {
    let trees = vec![right_branching(400)];
    let grammar = DefaultGrammarBuilder::non_full(&trees).build_grammar().unwrap();
    let lexicon = SimpleLexicon::from_trees(&trees);
    let splitter =
      GrammarSplitter::new(&grammar, &lexicon, "S", &mut StdRng::seed_from_u64(3)).unwrap();
    let (grammar, lexicon, variance) = splitter.into_parts();

    let mut b = BinaryTree::build(&trees[0], &variance).unwrap();
    b.compute_inside_outside(&grammar, &lexicon);

    let log_likelihood = b.log_likelihood();
    assert!(log_likelihood.is_finite());
    // far below what an unscaled product could represent
    assert!(log_likelihood < -745.0, "{}", log_likelihood);
    assert_eq!(b.likelihood(), 0.0);
    for node in b.nodes() {
      assert!(node.inside().iter().all(|v| (0.0..=1.0).contains(v)));
      assert!(
        (node.log_likelihood() - log_likelihood).abs() < 1e-9 * log_likelihood.abs(),
        "{} has {}",
        node.label(),
        node.log_likelihood()
      );
    }
  }
}
