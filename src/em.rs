//! Split-merge training of latent symbol refinements.
//!
//! Each cycle splits every symbol in two, re-estimates the refined rule
//! probabilities with EM over the (fixed) training trees, merges back the
//! half of the splits whose removal costs the least likelihood, and smooths
//! the refinements of each symbol towards each other.
//!
//! Rule counts stay anchored to the unrefined treebank counts: after every
//! EM step the refinements of a base rule share exactly that base rule's
//! observed count.

use std::collections::{BTreeMap, BTreeSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use crate::binary_tree::{BinaryChildren, BinaryTree};
use crate::counter::{Counter, CounterMap};
use crate::error::GrammarError;
use crate::grammar::{DefaultGrammarBuilder, Grammar, GrammarBuilder};
use crate::lexicon::{Lexicon, SimpleLexicon};
use crate::parse_treebank::ROOT_LABEL;
use crate::rules::{BinaryRule, UnaryRule};
use crate::splitter::{GrammarSplitter, base_state, merged_state, sibling_state};
use crate::syntree::Tree;
use crate::utils::{combinations, ratio_or_zero};

/// One split-merge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleConfig {
  pub em_iterations: usize,
  /// Seeds the noise added to rule counts when splitting.
  pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
  pub cycles: Vec<CycleConfig>,
  /// Never split.
  pub root: String,
  /// Weight of the base rule's evenly shared count in a smoothed count.
  pub smooth_factor: f64,
  /// Multiplies posterior counts before they are normalized against the
  /// treebank counts.
  pub scaling_factor: f64,
  /// Share of the split symbols merged back after each cycle.
  pub merge_fraction: f64,
  pub merge: bool,
}

impl Default for TrainerConfig {
  fn default() -> Self {
    Self {
      cycles: vec![
        CycleConfig {
          em_iterations: 11,
          seed: 3,
        },
        CycleConfig {
          em_iterations: 11,
          seed: 8,
        },
      ],
      root: ROOT_LABEL.to_string(),
      smooth_factor: 0.01,
      scaling_factor: 1e4,
      merge_fraction: 0.5,
      merge: true,
    }
  }
}

impl TrainerConfig {
  pub fn validate(&self) -> Result<(), GrammarError> {
    if self.root.is_empty() {
      return Err(GrammarError::invalid_config("root symbol is empty"));
    }
    if !(0.0..1.0).contains(&self.smooth_factor) {
      return Err(GrammarError::invalid_config(format!(
        "smooth factor {} is outside [0, 1)",
        self.smooth_factor
      )));
    }
    if !(self.scaling_factor.is_finite() && self.scaling_factor > 0.0) {
      return Err(GrammarError::invalid_config(format!(
        "scaling factor {} must be positive and finite",
        self.scaling_factor
      )));
    }
    if !(0.0..=1.0).contains(&self.merge_fraction) {
      return Err(GrammarError::invalid_config(format!(
        "merge fraction {} is outside [0, 1]",
        self.merge_fraction
      )));
    }
    Ok(())
  }
}

/// Expected rule and tag counts collected from one or more trees.
#[derive(Debug, Clone, Default)]
struct SoftCounts {
  unary: Counter<UnaryRule>,
  binary: Counter<BinaryRule>,
  lexical: CounterMap<String, String>,
}

impl SoftCounts {
  fn merge(mut self, other: SoftCounts) -> Self {
    self.unary.merge(other.unary);
    self.binary.merge(other.binary);
    self.lexical.merge(other.lexical);
    self
  }
}

/// Refines a treebank grammar by split-merge EM. Takes binarized trees, e.g.
/// the output of [`crate::annotations::annotate_tree`].
#[derive(Debug, Clone)]
pub struct EmGrammarTrainer {
  trees: Vec<Tree>,
  config: TrainerConfig,
  base_grammar: Grammar,
  base_lexicon: SimpleLexicon,
  grammar: Grammar,
  lexicon: Lexicon,
}

impl EmGrammarTrainer {
  pub fn new(trees: &[Tree], config: TrainerConfig) -> Result<Self, GrammarError> {
    config.validate()?;
    let base_grammar = DefaultGrammarBuilder::non_full(trees).build_grammar()?;
    let base_lexicon = SimpleLexicon::from_trees(trees);
    Ok(Self {
      trees: trees.to_vec(),
      config,
      grammar: base_grammar.clone().become_full(),
      lexicon: base_lexicon.build_lexicon(),
      base_grammar,
      base_lexicon,
    })
  }

  /// Runs every configured cycle, replacing the current grammar and lexicon.
  pub fn train(&mut self) -> Result<(), GrammarError> {
    let mut grammar = self.base_grammar.clone();
    let mut lexicon = self.base_lexicon.clone();
    for (idx, cycle) in self.config.cycles.iter().enumerate() {
      info!("SM cycle {}", idx);
      (grammar, lexicon) = self.run_cycle(cycle, &grammar, &lexicon)?;
      info!(
        "SM cycle {} done: {} states, {} rules",
        idx,
        grammar.states().len(),
        grammar.num_rules()
      );
    }
    self.lexicon = lexicon.build_lexicon();
    self.grammar = grammar.become_full();
    Ok(())
  }

  /// The refined grammar after [`EmGrammarTrainer::train`], the treebank
  /// grammar before.
  pub fn grammar(&self) -> &Grammar {
    &self.grammar
  }

  pub fn lexicon(&self) -> &Lexicon {
    &self.lexicon
  }

  pub fn into_grammar_and_lexicon(self) -> (Grammar, Lexicon) {
    (self.grammar, self.lexicon)
  }

  fn run_cycle(
    &self,
    cycle: &CycleConfig,
    grammar: &Grammar,
    lexicon: &SimpleLexicon,
  ) -> Result<(Grammar, SimpleLexicon), GrammarError> {
    let mut rng = StdRng::seed_from_u64(cycle.seed);
    let splitter = GrammarSplitter::new(grammar, lexicon, &self.config.root, &mut rng)?;
    let (mut grammar, mut lexicon, mut variance) = splitter.into_parts();

    let mut trees = self
      .trees
      .iter()
      .map(|t| BinaryTree::build(t, &variance))
      .collect::<Result<Vec<_>, _>>()?;

    for iteration in 0..cycle.em_iterations {
      let counts = self.expectation(&mut trees, &grammar, &lexicon);
      (grammar, lexicon) = self.maximization(counts, &lexicon);
      debug!(
        "EM iteration {}: kept {} unary, {} binary rules, {} taggings",
        iteration,
        grammar.unary_counts().len(),
        grammar.binary_counts().len(),
        lexicon.word_to_tag_counters().total_size()
      );
    }

    if cycle.em_iterations > 0 && self.config.merge {
      for tree in trees.iter_mut() {
        tree.compute_inside_outside(&grammar, &lexicon);
      }
      let merges = self.choose_merges(&trees);
      grammar = merge_grammar(&grammar, &merges);
      lexicon = merge_lexicon(&lexicon, &merges);
      variance = merge_variance(&variance, &merges);
    }

    let grammar = self.smooth(&grammar, &variance)?;
    Ok((grammar, lexicon))
  }

  /// Posterior rule and tagging counts over all trees, one tree at a time.
  fn expectation(
    &self,
    trees: &mut [BinaryTree],
    grammar: &Grammar,
    lexicon: &SimpleLexicon,
  ) -> SoftCounts {
    trees
      .iter_mut()
      .filter_map(|tree| {
        tree.compute_inside_outside(grammar, lexicon);
        let log_likelihood = tree.log_likelihood();
        if log_likelihood.is_finite() {
          Some(self.posterior_counts(tree, grammar, log_likelihood))
        } else {
          warn!(
            "training tree rooted in {} has log likelihood {}, skipping",
            tree.label(),
            log_likelihood
          );
          None
        }
      })
      .fold(SoftCounts::default(), SoftCounts::merge)
  }

  /// Inside and outside scores are rescaled per node, so each posterior is
  /// the product of the stored scores times `exp` of the scales involved
  /// minus the tree's log likelihood.
  fn posterior_counts(
    &self,
    tree: &BinaryTree,
    grammar: &Grammar,
    log_likelihood: f64,
  ) -> SoftCounts {
    let posterior_scale =
      |log_scale: f64| self.config.scaling_factor * (log_scale - log_likelihood).exp();
    let mut counts = SoftCounts::default();
    for node in tree.nodes() {
      match node.children() {
        BinaryChildren::Leaf(word) => {
          let scale = posterior_scale(node.outside_scale() + node.inside_scale());
          let scores = node.outside().iter().zip(node.inside());
          for (tag, (out, inside)) in node.variance().iter().zip(scores) {
            let score = out * inside * scale;
            if score > 0.0 {
              counts.lexical.increment(word.clone(), tag.clone(), score);
            }
          }
        }
        BinaryChildren::Unary(child) => {
          let scale = posterior_scale(node.outside_scale() + child.inside_scale());
          for (parent, out) in node.variance().iter().zip(node.outside()) {
            for (c, c_in) in child.variance().iter().zip(child.inside()) {
              let score = out * grammar.unary_score(parent, c) * c_in * scale;
              if score > 0.0 {
                counts.unary.increment(UnaryRule::new(parent, c), score);
              }
            }
          }
        }
        BinaryChildren::Binary(left, right) => {
          let scale = posterior_scale(
            node.outside_scale() + left.inside_scale() + right.inside_scale(),
          );
          for (parent, out) in node.variance().iter().zip(node.outside()) {
            for (l, l_in) in left.variance().iter().zip(left.inside()) {
              for (r, r_in) in right.variance().iter().zip(right.inside()) {
                let score = out * grammar.binary_score(parent, l, r) * l_in * r_in * scale;
                if score > 0.0 {
                  counts.binary.increment(BinaryRule::new(parent, l, r), score);
                }
              }
            }
          }
        }
      }
    }
    counts
  }

  /// Rescales posterior counts so the refinements of each base rule (and
  /// each word's base tag) share the treebank count of that base rule.
  /// Taggings no tree produced posteriors for keep their counts from
  /// `previous`, so words of skipped trees stay in the lexicon.
  fn maximization(&self, counts: SoftCounts, previous: &SimpleLexicon) -> (Grammar, SimpleLexicon) {
    let unary = anchor_counts(
      counts.unary,
      self.base_grammar.unary_counts(),
      UnaryRule::base_rule,
    );
    let binary = anchor_counts(
      counts.binary,
      self.base_grammar.binary_counts(),
      BinaryRule::base_rule,
    );

    let base_words = self.base_lexicon.word_to_tag_counters();
    let mut lexical = CounterMap::new();
    for (word, tags) in counts.lexical {
      let anchored = anchor_counts(
        tags,
        base_words.counter(&word).unwrap_or(&Counter::new()),
        |tag: &String| base_state(tag).to_string(),
      );
      for (tag, count) in anchored {
        lexical.set(word.clone(), tag, count);
      }
    }

    let estimated = lexical
      .iter()
      .flat_map(|(word, tags)| {
        tags
          .keys()
          .map(move |tag| (word.clone(), base_state(tag).to_string()))
      })
      .collect::<BTreeSet<_>>();
    let mut kept = 0;
    for (word, tags) in previous.word_to_tag_counters().iter() {
      for (tag, count) in tags.iter() {
        if !estimated.contains(&(word.clone(), base_state(tag).to_string())) {
          lexical.set(word.clone(), tag.clone(), *count);
          kept += 1;
        }
      }
    }
    if kept > 0 {
      debug!("{} taggings had no posteriors and keep their counts", kept);
    }

    (
      Grammar::from_counts(unary, binary, false),
      SimpleLexicon::new(lexical),
    )
  }

  /// Picks the splits to undo: for every node and sibling pair, the loss in
  /// tree likelihood from sharing one inside score (the pair's average,
  /// weighted by how often each half occurs) and adding their outside scores.
  /// The cheapest share of pairs is merged. Merge targets are named by the
  /// even sibling.
  fn choose_merges(&self, trees: &[BinaryTree]) -> BTreeSet<String> {
    let trees = trees
      .iter()
      .filter(|t| t.log_likelihood().is_finite())
      .collect::<Vec<_>>();

    let mut observed: Counter<&str> = Counter::new();
    for tree in trees.iter() {
      let log_likelihood = tree.log_likelihood();
      for node in tree.nodes() {
        let scale = (node.inside_scale() + node.outside_scale() - log_likelihood).exp();
        for ((label, i), o) in node.variance().iter().zip(node.inside()).zip(node.outside()) {
          observed.increment(label, i * o * scale);
        }
      }
    }

    let mut losses: Counter<String> = Counter::new();
    for tree in trees.iter() {
      for node in tree.nodes() {
        let variance = node.variance();
        let (inside, outside) = (node.inside(), node.outside());
        // both sums share the node's scales, which cancel in the ratio
        let sum = inside.iter().zip(outside).map(|(i, o)| i * o).sum::<f64>();
        if !(sum > 0.0 && sum.is_finite()) {
          continue;
        }
        for (i, label) in variance.iter().enumerate() {
          let Some(sibling) = sibling_state(label) else {
            continue;
          };
          let Some(j) = variance.iter().position(|l| *l == sibling) else {
            continue;
          };
          if j < i {
            continue;
          }
          let (c1, c2) = (observed.get(label.as_str()), observed.get(sibling.as_str()));
          if c1 + c2 <= 0.0 {
            continue;
          }
          let merged_in = (c1 * inside[i] + c2 * inside[j]) / (c1 + c2);
          let merged_out = outside[i] + outside[j];
          let new_sum =
            sum - inside[i] * outside[i] - inside[j] * outside[j] + merged_in * merged_out;
          if new_sum > 0.0 {
            losses.increment(merged_state(label), -(new_sum / sum).ln());
          }
        }
      }
    }

    let mut candidates = losses.into_iter().collect::<Vec<_>>();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    let n_merges = (candidates.len() as f64 * self.config.merge_fraction).floor() as usize;
    let merges = candidates
      .into_iter()
      .take(n_merges)
      .map(|(state, _)| state)
      .collect::<BTreeSet<_>>();
    info!("merging {} split states back", merges.len());
    merges
  }

  /// Mixes every refined rule's count with an even share of its base rule's
  /// treebank count, over every combination of current refinements.
  fn smooth(
    &self,
    grammar: &Grammar,
    variance: &BTreeMap<String, Vec<String>>,
  ) -> Result<Grammar, GrammarError> {
    let f = self.config.smooth_factor;
    let refinements = |symbol: &str| {
      variance
        .get(symbol)
        .cloned()
        .ok_or_else(|| GrammarError::MissingState {
          symbol: symbol.to_string(),
        })
    };

    let mut unary = Counter::new();
    for (base, base_count) in self.base_grammar.unary_counts().iter() {
      let combos = combinations(&[refinements(&base.parent)?, refinements(&base.child)?]);
      let share = base_count / combos.len() as f64;
      for symbols in combos {
        if let [parent, child] = symbols.as_slice() {
          let rule = UnaryRule::new(parent, child);
          let count = (1.0 - f) * grammar.unary_counts().get(&rule) + f * share;
          unary.set(rule, count);
        }
      }
    }

    let mut binary = Counter::new();
    for (base, base_count) in self.base_grammar.binary_counts().iter() {
      let combos = combinations(&[
        refinements(&base.parent)?,
        refinements(&base.left)?,
        refinements(&base.right)?,
      ]);
      let share = base_count / combos.len() as f64;
      for symbols in combos {
        if let [parent, left, right] = symbols.as_slice() {
          let rule = BinaryRule::new(parent, left, right);
          let count = (1.0 - f) * grammar.binary_counts().get(&rule) + f * share;
          binary.set(rule, count);
        }
      }
    }

    Ok(Grammar::from_counts(unary, binary, false))
  }
}

impl GrammarBuilder for EmGrammarTrainer {
  /// The current grammar; see [`EmGrammarTrainer::grammar`].
  fn build_grammar(&self) -> Result<Grammar, GrammarError> {
    Ok(self.grammar.clone())
  }
}

/// new(r) = post(r) / Σ post(r') · base(base(r)), the sum running over
/// every r' with the same base as r. Entries that come out zero are dropped.
fn anchor_counts<K: Ord + Clone>(
  posteriors: Counter<K>,
  base_counts: &Counter<K>,
  base_of: impl Fn(&K) -> K,
) -> Counter<K> {
  let mut totals: Counter<K> = Counter::new();
  for (key, count) in posteriors.iter() {
    totals.increment(base_of(key), *count);
  }
  let mut anchored = Counter::new();
  for (key, count) in posteriors {
    let base = base_of(&key);
    let share = ratio_or_zero(count, totals.get(&base));
    anchored.set(key, share * base_counts.get(&base));
  }
  anchored.clean();
  anchored
}

fn merge_target(state: &str, merges: &BTreeSet<String>) -> String {
  let target = merged_state(state);
  if merges.contains(&target) {
    target
  } else {
    state.to_string()
  }
}

fn merge_grammar(grammar: &Grammar, merges: &BTreeSet<String>) -> Grammar {
  let unary = grammar
    .unary_counts()
    .iter()
    .map(|(r, c)| {
      (
        UnaryRule::new(merge_target(&r.parent, merges), merge_target(&r.child, merges)),
        *c,
      )
    })
    .collect();
  let binary = grammar
    .binary_counts()
    .iter()
    .map(|(r, c)| {
      (
        BinaryRule::new(
          merge_target(&r.parent, merges),
          merge_target(&r.left, merges),
          merge_target(&r.right, merges),
        ),
        *c,
      )
    })
    .collect();
  Grammar::from_counts(unary, binary, false)
}

fn merge_lexicon(lexicon: &SimpleLexicon, merges: &BTreeSet<String>) -> SimpleLexicon {
  let mut word_to_tag = CounterMap::new();
  for (word, tags) in lexicon.word_to_tag_counters().iter() {
    for (tag, count) in tags.iter() {
      word_to_tag.increment(word.clone(), merge_target(tag, merges), *count);
    }
  }
  SimpleLexicon::new(word_to_tag)
}

fn merge_variance(
  variance: &BTreeMap<String, Vec<String>>,
  merges: &BTreeSet<String>,
) -> BTreeMap<String, Vec<String>> {
  variance
    .iter()
    .map(|(base, states)| {
      let mut merged = Vec::with_capacity(states.len());
      for state in states.iter() {
        let target = merge_target(state, merges);
        if !merged.contains(&target) {
          merged.push(target);
        }
      }
      (base.clone(), merged)
    })
    .collect()
}
