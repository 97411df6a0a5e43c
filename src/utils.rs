use std::error::Error;

/// Boxed static error type
pub type Err = Box<dyn Error + 'static>;

/// Takes a list where each element is a set of choices, and returns all the possible sets
/// generated. Will clone the elements. This is how a rule is expanded over the
/// refinements of each of its symbols.
///
/// ```
/// let v = vec![
///   vec!["S"],
///   vec!["NP^0", "NP^1"],
///   vec!["VP^0", "VP^1"],
/// ];
///
/// assert_eq!(splitmerge::utils::combinations(&v), vec![
///   vec!["S", "NP^0", "VP^0"],
///   vec!["S", "NP^1", "VP^0"],
///   vec!["S", "NP^0", "VP^1"],
///   vec!["S", "NP^1", "VP^1"],
/// ]);
/// ```
pub fn combinations<T>(list: &[Vec<T>]) -> Vec<Vec<T>>
where
  T: Clone,
{
  if list.is_empty() {
    Vec::new()
  } else if list.len() == 1 {
    list[0].iter().map(|e| vec![e.clone()]).collect()
  } else {
    let (head, tail) = list.split_at(1);
    let head = &head[0];

    combinations(tail)
      .into_iter()
      .flat_map(|subseq| {
        // prepend every element of the head to every possible subseq
        head.iter().map(move |v| {
          let mut newseq = subseq.clone();
          newseq.insert(0, v.clone());
          newseq
        })
      })
      .collect()
  }
}

/// `numerator / denominator`, except that a zero, negative or non-finite
/// denominator (mass that was never observed) yields probability zero instead
/// of NaN or infinity.
///
/// ```
/// use splitmerge::utils::ratio_or_zero;
///
/// assert_eq!(ratio_or_zero(1.0, 4.0), 0.25);
/// assert_eq!(ratio_or_zero(1.0, 0.0), 0.0);
/// assert_eq!(ratio_or_zero(0.0, 0.0), 0.0);
/// ```
pub fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
  if denominator > 0.0 && denominator.is_finite() {
    let r = numerator / denominator;
    if r.is_finite() { r } else { 0.0 }
  } else {
    0.0
  }
}
