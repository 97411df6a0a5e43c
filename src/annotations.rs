//! Binarizing and marking treebank trees for the grammar, and undoing it on
//! parser output.

use crate::syntree::{SynTree, Tree};

/// Labels starting with this are intermediate nodes introduced by
/// binarization.
pub const INTERMEDIATE_MARK: char = '@';
const ANNOTATION_MARK: char = '^';

/// How trees are binarized before a grammar is read off them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BinarizationConfig {
  /// How many already-generated siblings an intermediate node remembers.
  /// `None` remembers all of them, which makes binarization lossless.
  pub horizontal: Option<usize>,
  /// Mark phrasal nodes with their parent's label (`NP^S`).
  pub vertical: bool,
}

impl BinarizationConfig {
  pub fn lossless() -> Self {
    Self::default()
  }

  pub fn markov(horizontal: usize, vertical: bool) -> Self {
    Self {
      horizontal: Some(horizontal),
      vertical,
    }
  }
}

/// Lossless binarization without parent marking.
pub fn annotate_tree(tree: &Tree) -> Tree {
  annotate_tree_markov(tree, &BinarizationConfig::lossless())
}

/// Binarizes `tree` so that no node has more than two children.
///
/// `X -> C1 C2 C3 C4` becomes `X -> C1 @X->_C1`, `@X->_C1 -> C2 @X->_C1_C2`,
/// `@X->_C1_C2 -> C3 C4`. With a finite horizontal order only the last
/// siblings are kept in the intermediate label (`@X->.._C2`).
pub fn annotate_tree_markov(tree: &Tree, config: &BinarizationConfig) -> Tree {
  binarize(tree, None, config)
}

fn binarize(tree: &Tree, parent: Option<&str>, config: &BinarizationConfig) -> Tree {
  let (constituent, children) = match tree {
    SynTree::Leaf(_) => return tree.clone(),
    SynTree::Branch(c, children) => (c, children),
  };

  let label = match parent {
    Some(parent) if config.vertical && !tree.is_preterminal() => {
      format!("{}{}{}", constituent.value, ANNOTATION_MARK, parent)
    }
    _ => constituent.value.clone(),
  };

  let mut nodes = children
    .iter()
    .map(|child| binarize(child, Some(&constituent.value), config))
    .collect::<Vec<_>>();
  let n = nodes.len();
  if n <= 2 {
    return Tree::branch(label, nodes);
  }

  let history = children.iter().map(|c| c.label()).collect::<Vec<_>>();
  let last_two = nodes.split_off(n - 2);
  let mut right = Tree::branch(
    intermediate_label(&label, &history[..n - 2], config),
    last_two,
  );
  let first = nodes.remove(0);
  for (idx, node) in nodes.into_iter().enumerate().rev() {
    let generated = idx + 1;
    right = Tree::branch(
      intermediate_label(&label, &history[..generated], config),
      vec![node, right],
    );
  }
  Tree::branch(label, vec![first, right])
}

fn intermediate_label(label: &str, generated: &[&str], config: &BinarizationConfig) -> String {
  let (marker, kept) = match config.horizontal {
    Some(h) if generated.len() > h => ("..", &generated[generated.len() - h..]),
    _ => ("", generated),
  };
  let mut out = format!("{}{}->{}", INTERMEDIATE_MARK, label, marker);
  for sibling in kept {
    out.push('_');
    out.push_str(sibling);
  }
  out
}

/// Splices out intermediate `@` nodes and strips everything from the first
/// `^` of every label, which removes both parent marks and refinements.
pub fn unannotate_tree(tree: &Tree) -> Tree {
  match tree {
    SynTree::Leaf(_) => tree.clone(),
    SynTree::Branch(c, children) => {
      let mut spliced = Vec::with_capacity(children.len());
      for child in children.iter() {
        splice_into(child, &mut spliced);
      }
      Tree::branch(strip_annotations(&c.value).to_string(), spliced)
    }
  }
}

fn splice_into(tree: &Tree, out: &mut Vec<Tree>) {
  match tree {
    SynTree::Branch(c, children) if c.value.starts_with(INTERMEDIATE_MARK) => {
      for child in children.iter() {
        splice_into(child, out);
      }
    }
    _ => out.push(unannotate_tree(tree)),
  }
}

fn strip_annotations(label: &str) -> &str {
  label
    .find(ANNOTATION_MARK)
    .map_or(label, |idx| &label[..idx])
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parse_treebank::parse_trees;

  fn tree(src: &str) -> Tree {
    src.parse().unwrap()
  }

  fn max_arity(t: &Tree) -> usize {
    t.children()
      .iter()
      .map(max_arity)
      .max()
      .unwrap_or(0)
      .max(t.children().len())
  }

  #[test]
  fn test_lossless_binarization() {
    let t = tree("(NP (DT the) (JJ big) (JJ red) (NN dog))");
    let b = annotate_tree(&t);
    assert_eq!(
      b.to_string(),
      "(NP (DT the) (@NP->_DT (JJ big) (@NP->_DT_JJ (JJ red) (NN dog))))"
    );
    assert_eq!(b.span(), (0, 4));
    assert_eq!(b.children()[1].span(), (1, 4));
  }

  #[test]
  fn test_markov_binarization() {
    let t = tree("(ROOT (S (NP (DT the) (JJ big) (JJ red) (NN dog)) (VP (VBD ran))))");
    let b = annotate_tree_markov(&t, &BinarizationConfig::markov(1, true));
    assert_eq!(
      b.to_string(),
      "(ROOT (S^ROOT (NP^S (DT the) (@NP^S->_DT (JJ big) (@NP^S->.._JJ (JJ red) (NN dog)))) \
       (VP^S (VBD ran))))"
    );
  }

  #[test]
  fn test_small_nodes_untouched() {
    let t = tree("(S (NP (PRP it)) (VP (VBD sat)))");
    assert_eq!(annotate_tree(&t), t);
  }

  #[test]
  fn test_round_trip() {
    let trees = parse_trees(
      "(ROOT (S (NP (DT a) (JJ big) (JJ red) (NN dog))
                (VP (VBD ran) (ADVP (RB fast)) (PP (IN to) (NP (PRP me)))) (. .)))
       (ROOT (FRAG (NP (NN wow)) (. !)))
       (ROOT (S (NP (NNS dogs)) (VP (VBP bark))))",
    )
    .unwrap();
    let configs = [
      BinarizationConfig::lossless(),
      BinarizationConfig::markov(0, false),
      BinarizationConfig::markov(1, true),
      BinarizationConfig::markov(2, false),
      BinarizationConfig {
        horizontal: None,
        vertical: true,
      },
    ];
    for config in configs.iter() {
      for t in trees.iter() {
        let annotated = annotate_tree_markov(t, config);
        assert!(max_arity(&annotated) <= 2, "{}", annotated);
        assert_eq!(&unannotate_tree(&annotated), t, "{:?}", config);
      }
    }
  }

  #[test]
  fn test_unannotate_strips_refinements() {
    let t = tree("(ROOT (S^1 (NP^S^3 (NN dogs)) (@S->_NP^0 (VP^S^2 (VBP bark)))))");
    assert_eq!(
      unannotate_tree(&t).to_string(),
      "(ROOT (S (NP (NN dogs)) (VP (VBP bark))))"
    );
  }
}
