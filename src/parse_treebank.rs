use regex::Regex;
/// Simple recursive-descent parsing of Penn-style bracketed trees
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::Err;
use crate::syntree::{SynTree, Tree};

/// Label given to an unlabeled outermost bracket, `( (S ...) )`.
pub const ROOT_LABEL: &str = "ROOT";
const EMPTY_ELEMENT: &str = "-NONE-";

/// Parses exactly one tree.
impl FromStr for Tree {
  type Err = Err;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut position = 0;
    let s = skip_whitespace(s);
    let (tree, s) = parse_tree(s, &mut position)?;
    let s = skip_whitespace(s);
    if s.is_empty() {
      Ok(tree)
    } else {
      Err(format!("trailing input after tree: {}", s).into())
    }
  }
}

/// Parses every tree in a string of whitespace-separated bracketed trees.
pub fn parse_trees(s: &str) -> Result<Vec<Tree>, Err> {
  let mut trees = Vec::new();
  let mut rem = skip_whitespace(s);
  while !rem.is_empty() {
    let mut position = 0;
    let (tree, s) = parse_tree(rem, &mut position)?;
    trees.push(tree);
    rem = skip_whitespace(s);
  }
  Ok(trees)
}

pub fn read_trees_from_file(path: impl AsRef<Path>) -> Result<Vec<Tree>, Err> {
  let path = path.as_ref();
  let contents = fs::read_to_string(path)
    .map_err(|e| -> Err { format!("reading {}: {}", path.display(), e).into() })?;
  parse_trees(&contents)
}

type Infallible<'a, T> = (T, &'a str);
type ParseResult<'a, T> = Result<(T, &'a str), Err>;

/// helper macro for initializing a regex with lazy_static!
macro_rules! regex_static {
  ($name:ident, $pattern:expr) => {
    lazy_static! {
      static ref $name: Regex = Regex::new($pattern).unwrap();
    }
  };
}

/// Try to consume a regex, returning None if it doesn't match
fn optional_re<'a>(re: &'static Regex, s: &'a str) -> Infallible<'a, Option<&'a str>> {
  match re.find(s) {
    Some(m) if m.start() == 0 => (Some(m.as_str()), &s[m.end()..]),
    _ => (None, s),
  }
}

/// Try to consume a char, returning None if it doesn't match
fn optional_char(c: char, s: &str) -> Infallible<'_, Option<char>> {
  match s.strip_prefix(c) {
    Some(rest) => (Some(c), rest),
    None => (None, s),
  }
}

/// Try to consume a char, failing if it doesn't match
fn needed_char(c: char, s: &str) -> ParseResult<'_, char> {
  if let (Some(c), rest) = optional_char(c, s) {
    Ok((c, rest))
  } else {
    Err(format!("couldn't match {} at {}", c, preview(s)).into())
  }
}

fn skip_whitespace(s: &str) -> &str {
  s.trim_start()
}

/// Labels and words: anything up to whitespace or a bracket
fn parse_token(s: &str) -> Infallible<'_, Option<&str>> {
  regex_static!(TOKEN, r"[^\s()]+");
  optional_re(&*TOKEN, s)
}

fn preview(s: &str) -> &str {
  match s.char_indices().nth(30) {
    Some((idx, _)) => &s[..idx],
    None => s,
  }
}

/// `(LABEL child...)` where each child is a bracketed tree or a bare word.
/// The label may be missing, which leaves it empty.
fn parse_tree<'a>(s: &'a str, position: &mut usize) -> ParseResult<'a, Tree> {
  let (_, s) = needed_char('(', s)?;
  let s = skip_whitespace(s);
  let (label, mut rem) = parse_token(s);

  let mut children = Vec::new();
  loop {
    rem = skip_whitespace(rem);
    if let (Some(_), s) = optional_char(')', rem) {
      if children.is_empty() {
        return Err(format!("empty constituent {}", label.unwrap_or("")).into());
      }
      return Ok((Tree::branch(label.unwrap_or("").to_string(), children), s));
    }
    if rem.starts_with('(') {
      let (child, s) = parse_tree(rem, position)?;
      children.push(child);
      rem = s;
    } else if let (Some(word), s) = parse_token(rem) {
      children.push(Tree::leaf(word.to_string(), *position));
      *position += 1;
      rem = s;
    } else {
      return Err(format!("unbalanced tree, expected ) at {}", preview(rem)).into());
    }
  }
}

/// Cleans up a raw treebank tree: removes empty elements (`-NONE-`) and any
/// constituents left empty by that, strips function tags and indices
/// (`NP-SBJ-1` becomes `NP`), and labels an unlabeled outer bracket `ROOT`.
/// Words are renumbered from zero. Returns `None` if nothing is left.
pub fn normalize_tree(tree: &Tree) -> Option<Tree> {
  let mut position = 0;
  let mut normalized = normalize_node(tree, &mut position)?;
  if let SynTree::Branch(c, _) = &mut normalized {
    if c.value.is_empty() {
      c.value = ROOT_LABEL.to_string();
    }
  }
  Some(normalized)
}

fn normalize_node(tree: &Tree, position: &mut usize) -> Option<Tree> {
  match tree {
    SynTree::Leaf(w) => {
      let leaf = Tree::leaf(w.value.clone(), *position);
      *position += 1;
      Some(leaf)
    }
    SynTree::Branch(c, children) => {
      if c.value == EMPTY_ELEMENT {
        return None;
      }
      let children = children
        .iter()
        .filter_map(|child| normalize_node(child, position))
        .collect::<Vec<_>>();
      if children.is_empty() {
        None
      } else {
        Some(Tree::branch(strip_function_tags(&c.value).to_string(), children))
      }
    }
  }
}

fn strip_function_tags(label: &str) -> &str {
  // -LRB- and friends are categories of their own
  if label.starts_with('-') && label.ends_with('-') {
    return label;
  }
  match label.find(['-', '=']) {
    Some(idx) if idx > 0 => &label[..idx],
    _ => label,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_and_render() {
    let src = "(S (NP (DT the) (NN dog)) (VP (VBD ran)))";
    let t: Tree = src.parse().unwrap();
    assert_eq!(t.to_string(), src);
    assert_eq!(t.span(), (0, 3));
    assert_eq!(t.yield_words(), vec!["the", "dog", "ran"]);

    let again: Tree = t.to_string().parse().unwrap();
    assert_eq!(again, t);
  }

  #[test]
  fn test_parse_many() {
    let trees = parse_trees(
      "
      (S (NP (PRP it)) (VP (VBD sat)))

      (FRAG (. !))
      ",
    )
    .unwrap();
    assert_eq!(trees.len(), 2);
    assert_eq!(trees[1].to_string(), "(FRAG (. !))");
    assert_eq!(trees[1].span(), (0, 1));
  }

  #[test]
  fn test_malformed() {
    assert!("(S (NP (DT the)".parse::<Tree>().is_err());
    assert!("(S ())".parse::<Tree>().is_err());
    assert!("(S (NN a)) (S (NN b))".parse::<Tree>().is_err());
    assert!("S".parse::<Tree>().is_err());
  }

  #[test]
  fn test_normalize() {
    let t: Tree = "( (S (NP-SBJ-1 (-NONE- *T*)) (NP-SBJ=2 (-LRB- -LRB-) (NN dog)) (VP (VBD ran))) )"
      .parse()
      .unwrap();
    let n = normalize_tree(&t).unwrap();
    assert_eq!(
      n.to_string(),
      "(ROOT (S (NP (-LRB- -LRB-) (NN dog)) (VP (VBD ran))))"
    );
    assert_eq!(n.yield_words(), vec!["-LRB-", "dog", "ran"]);
    assert_eq!(n.span(), (0, 3));

    let empty: Tree = "(S (-NONE- *))".parse().unwrap();
    assert_eq!(normalize_tree(&empty), None);
  }
}
