use std::fmt;

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Constituent<T> {
  pub value: T,
  pub span: (usize, usize),
}

impl<T> fmt::Display for Constituent<T>
where
  T: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}: {}", self.span.0, self.span.1, self.value)
  }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Word<U> {
  pub value: U,
  pub span: (usize, usize),
}

impl<U> fmt::Display for Word<U>
where
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}..{}: {}", self.span.0, self.span.1, self.value)
  }
}

/// A constituency tree. Branches carry a label and the span of words they
/// cover; leaves carry a word and its position.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum SynTree<T, U> {
  Branch(Constituent<T>, Vec<SynTree<T, U>>),
  Leaf(Word<U>),
}

/// The tree type everything in this crate trades in: string labels over
/// string words.
pub type Tree = SynTree<String, String>;

impl<T, U> SynTree<T, U> {
  /// A word at sentence position `position`.
  pub fn leaf(value: U, position: usize) -> Self {
    Self::Leaf(Word {
      value,
      span: (position, position + 1),
    })
  }

  /// A branch whose span is taken from its first and last children.
  pub fn branch(value: T, children: Vec<SynTree<T, U>>) -> Self {
    let span = match (children.first(), children.last()) {
      (Some(first), Some(last)) => (first.span().0, last.span().1),
      _ => (0, 0),
    };
    Self::Branch(Constituent { value, span }, children)
  }

  pub fn span(&self) -> (usize, usize) {
    match self {
      Self::Branch(c, _) => c.span,
      Self::Leaf(w) => w.span,
    }
  }

  pub fn is_leaf(&self) -> bool {
    matches!(self, Self::Leaf(_))
  }

  pub fn is_branch(&self) -> bool {
    matches!(self, Self::Branch(_, _))
  }

  /// A branch with a single leaf child, i.e. a tag over a word.
  pub fn is_preterminal(&self) -> bool {
    match self {
      Self::Branch(_, children) => children.len() == 1 && children[0].is_leaf(),
      _ => false,
    }
  }

  pub fn get_leaf(&self) -> Option<&Word<U>> {
    match self {
      Self::Leaf(w) => Some(w),
      _ => None,
    }
  }

  pub fn get_branch(&self) -> Option<(&Constituent<T>, &Vec<SynTree<T, U>>)> {
    match self {
      Self::Branch(c, cs) => Some((c, cs)),
      _ => None,
    }
  }

  pub fn into_branch(self) -> Option<(Constituent<T>, Vec<SynTree<T, U>>)> {
    match self {
      Self::Branch(c, cs) => Some((c, cs)),
      _ => None,
    }
  }

  pub fn children(&self) -> &[SynTree<T, U>] {
    match self {
      Self::Branch(_, children) => children,
      Self::Leaf(_) => &[],
    }
  }

  /// The words under this tree, left to right.
  pub fn yield_words(&self) -> Vec<&U> {
    let mut words = Vec::new();
    self.collect_yield(&mut words);
    words
  }

  fn collect_yield<'a>(&'a self, words: &mut Vec<&'a U>) {
    match self {
      Self::Leaf(w) => words.push(&w.value),
      Self::Branch(_, children) => children.iter().for_each(|c| c.collect_yield(words)),
    }
  }

  /// The labels of the preterminals under this tree, left to right. Lines up
  /// with `yield_words` for well-formed trees.
  pub fn preterminal_yield(&self) -> Vec<&T> {
    let mut tags = Vec::new();
    self.collect_preterminals(&mut tags);
    tags
  }

  fn collect_preterminals<'a>(&'a self, tags: &mut Vec<&'a T>) {
    if let Self::Branch(c, children) = self {
      if self.is_preterminal() {
        tags.push(&c.value);
      } else {
        children.iter().for_each(|child| child.collect_preterminals(tags));
      }
    }
  }
}

impl Tree {
  /// The node's label, or the word for a leaf.
  pub fn label(&self) -> &str {
    match self {
      Self::Branch(c, _) => &c.value,
      Self::Leaf(w) => &w.value,
    }
  }
}

impl<T, U> SynTree<T, U>
where
  T: fmt::Display,
  U: fmt::Display,
{
  /// Multi-line rendering, one constituent per line, children indented.
  pub fn pretty(&self) -> String {
    match self {
      Self::Leaf(w) => w.value.to_string(),
      Self::Branch(c, children) => {
        if self.is_preterminal() {
          return self.to_string();
        }
        let mut out = format!("({}", c.value);
        for child in children.iter() {
          for line in child.pretty().lines() {
            out.push_str("\n  ");
            out.push_str(line);
          }
        }
        out.push(')');
        out
      }
    }
  }
}

/// Bracketed single-line rendering: `(S (NP (DT the) (NN dog)) (VP (VBD ran)))`
impl<T, U> fmt::Display for SynTree<T, U>
where
  T: fmt::Display,
  U: fmt::Display,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Leaf(w) => write!(f, "{}", w.value),
      Self::Branch(c, children) => {
        write!(f, "({}", c.value)?;
        for child in children.iter() {
          write!(f, " {}", child)?;
        }
        write!(f, ")")
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn the_dog() -> Tree {
    let np = Tree::branch(
      "NP".to_string(),
      vec![
        Tree::branch("DT".to_string(), vec![Tree::leaf("the".to_string(), 0)]),
        Tree::branch("NN".to_string(), vec![Tree::leaf("dog".to_string(), 1)]),
      ],
    );
    let vp = Tree::branch(
      "VP".to_string(),
      vec![Tree::branch("VBD".to_string(), vec![Tree::leaf("ran".to_string(), 2)])],
    );
    Tree::branch("S".to_string(), vec![np, vp])
  }

  #[test]
  fn test_spans_and_yields() {
    let t = the_dog();
    assert_eq!(t.span(), (0, 3));
    assert_eq!(t.children()[1].span(), (2, 3));
    assert_eq!(t.yield_words(), vec!["the", "dog", "ran"]);
    assert_eq!(t.preterminal_yield(), vec!["DT", "NN", "VBD"]);
    assert!(t.children()[0].children()[0].is_preterminal());
    assert!(!t.children()[1].is_preterminal());
  }

  #[test]
  fn test_display() {
    let t = the_dog();
    assert_eq!(t.to_string(), "(S (NP (DT the) (NN dog)) (VP (VBD ran)))");
    println!("{}", t.pretty());
    assert_eq!(t.pretty().lines().count(), 6);
    assert!(t.pretty().ends_with("(VBD ran)))"));
  }
}
