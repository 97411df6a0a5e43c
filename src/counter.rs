//! Float-valued counters keyed by ordered keys.
//!
//! Iteration is in key order, so rule order and split noise come out the same
//! on every run.

use std::borrow::Borrow;
use std::collections::btree_map;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Counter<K: Ord> {
  counts: BTreeMap<K, f64>,
}

impl<K: Ord> Default for Counter<K> {
  fn default() -> Self {
    Self {
      counts: BTreeMap::new(),
    }
  }
}

impl<K: Ord> Counter<K> {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn increment(&mut self, key: K, amount: f64) {
    *self.counts.entry(key).or_insert(0.0) += amount;
  }

  pub fn set(&mut self, key: K, count: f64) {
    self.counts.insert(key, count);
  }

  /// The count for `key`, zero when absent.
  pub fn get<Q>(&self, key: &Q) -> f64
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    self.counts.get(key).copied().unwrap_or(0.0)
  }

  pub fn contains<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    self.counts.contains_key(key)
  }

  pub fn keys(&self) -> btree_map::Keys<'_, K, f64> {
    self.counts.keys()
  }

  pub fn iter(&self) -> btree_map::Iter<'_, K, f64> {
    self.counts.iter()
  }

  pub fn len(&self) -> usize {
    self.counts.len()
  }

  pub fn is_empty(&self) -> bool {
    self.counts.is_empty()
  }

  pub fn total(&self) -> f64 {
    self.counts.values().sum()
  }

  /// Drops every entry whose count is zero, negative, or not a number.
  pub fn clean(&mut self) {
    self.counts.retain(|_, v| *v > 0.0 && v.is_finite());
  }

  /// Adds every count of `other` into this counter.
  pub fn merge(&mut self, other: Counter<K>) {
    for (k, v) in other.counts {
      self.increment(k, v);
    }
  }

  /// The key with the highest count; the first one in key order on ties.
  pub fn arg_max(&self) -> Option<&K> {
    let mut best: Option<(&K, f64)> = None;
    for (k, v) in self.counts.iter() {
      if best.is_none_or(|(_, b)| *v > b) {
        best = Some((k, *v));
      }
    }
    best.map(|(k, _)| k)
  }
}

impl<K: Ord> IntoIterator for Counter<K> {
  type Item = (K, f64);
  type IntoIter = btree_map::IntoIter<K, f64>;

  fn into_iter(self) -> Self::IntoIter {
    self.counts.into_iter()
  }
}

impl<K: Ord> FromIterator<(K, f64)> for Counter<K> {
  fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
    let mut counter = Self::new();
    for (k, v) in iter {
      counter.increment(k, v);
    }
    counter
  }
}

/// Two-level counter, e.g. word -> tag -> count.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterMap<K: Ord, V: Ord> {
  counters: BTreeMap<K, Counter<V>>,
}

impl<K: Ord, V: Ord> Default for CounterMap<K, V> {
  fn default() -> Self {
    Self {
      counters: BTreeMap::new(),
    }
  }
}

impl<K: Ord, V: Ord> CounterMap<K, V> {
  pub fn new() -> Self {
    Default::default()
  }

  pub fn increment(&mut self, key: K, value: V, amount: f64) {
    self.counters.entry(key).or_default().increment(value, amount);
  }

  pub fn set(&mut self, key: K, value: V, count: f64) {
    self.counters.entry(key).or_default().set(value, count);
  }

  pub fn get<Q, R>(&self, key: &Q, value: &R) -> f64
  where
    K: Borrow<Q>,
    V: Borrow<R>,
    Q: Ord + ?Sized,
    R: Ord + ?Sized,
  {
    self.counters.get(key).map_or(0.0, |c| c.get(value))
  }

  pub fn counter<Q>(&self, key: &Q) -> Option<&Counter<V>>
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    self.counters.get(key)
  }

  pub fn contains_key<Q>(&self, key: &Q) -> bool
  where
    K: Borrow<Q>,
    Q: Ord + ?Sized,
  {
    self.counters.contains_key(key)
  }

  pub fn keys(&self) -> btree_map::Keys<'_, K, Counter<V>> {
    self.counters.keys()
  }

  pub fn iter(&self) -> btree_map::Iter<'_, K, Counter<V>> {
    self.counters.iter()
  }

  /// Number of (key, value) entries across all inner counters.
  pub fn total_size(&self) -> usize {
    self.counters.values().map(Counter::len).sum()
  }

  pub fn clean(&mut self) {
    for counter in self.counters.values_mut() {
      counter.clean();
    }
    self.counters.retain(|_, c| !c.is_empty());
  }

  pub fn merge(&mut self, other: CounterMap<K, V>) {
    for (k, counter) in other.counters {
      self.counters.entry(k).or_default().merge(counter);
    }
  }
}

impl<K: Ord, V: Ord> IntoIterator for CounterMap<K, V> {
  type Item = (K, Counter<V>);
  type IntoIter = btree_map::IntoIter<K, Counter<V>>;

  fn into_iter(self) -> Self::IntoIter {
    self.counters.into_iter()
  }
}
