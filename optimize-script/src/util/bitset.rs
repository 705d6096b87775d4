use serde::{Serialize, Serializer};

/// Fixed-width bit-vector indexed by variable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BitSet {
  bits: Vec<u64>,
  width: usize,
}

impl BitSet {
  pub fn new(width: usize) -> Self {
    Self {
      bits: vec![0; (width.saturating_add(63)) / 64],
      width,
    }
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn insert(&mut self, idx: usize) {
    debug_assert!(idx < self.width);
    let (word, bit) = Self::word_bit(idx);
    self.bits[word] |= 1u64 << bit;
  }

  pub fn contains(&self, idx: usize) -> bool {
    if idx >= self.width {
      return false;
    }
    let (word, bit) = Self::word_bit(idx);
    self.bits[word] & (1u64 << bit) != 0
  }

  pub fn union_with(&mut self, other: &Self) {
    debug_assert_eq!(self.width, other.width);
    for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
      *a |= *b;
    }
  }

  pub fn intersect_with(&mut self, other: &Self) {
    debug_assert_eq!(self.width, other.width);
    for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
      *a &= *b;
    }
  }

  /// Flips every bit within the width.
  pub fn invert(&mut self) {
    for word in self.bits.iter_mut() {
      *word = !*word;
    }
    let tail = self.width % 64;
    if tail != 0 {
      if let Some(last) = self.bits.last_mut() {
        *last &= (1u64 << tail) - 1;
      }
    }
  }

  pub fn is_subset_of(&self, other: &Self) -> bool {
    self
      .bits
      .iter()
      .zip(other.bits.iter())
      .all(|(a, b)| a & !b == 0)
  }

  pub fn is_empty(&self) -> bool {
    self.bits.iter().all(|w| *w == 0)
  }

  pub fn iter_indices(&self) -> impl Iterator<Item = usize> + '_ {
    self
      .bits
      .iter()
      .enumerate()
      .flat_map(|(word_idx, word)| Self::iter_word(*word).map(move |bit| word_idx * 64 + bit))
  }

  fn iter_word(mut word: u64) -> impl Iterator<Item = usize> {
    std::iter::from_fn(move || {
      if word == 0 {
        return None;
      }
      let bit = word.trailing_zeros() as usize;
      word &= word - 1;
      Some(bit)
    })
  }

  const fn word_bit(idx: usize) -> (usize, usize) {
    (idx / 64, idx % 64)
  }
}

impl Serialize for BitSet {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(self.iter_indices())
  }
}

#[cfg(test)]
mod tests {
  use super::BitSet;

  #[test]
  fn invert_respects_width() {
    let mut set = BitSet::new(70);
    set.insert(3);
    set.insert(69);
    set.invert();
    assert!(!set.contains(3));
    assert!(!set.contains(69));
    assert!(set.contains(0));
    assert!(set.contains(68));
    assert_eq!(set.iter_indices().count(), 68);
    assert!(!set.contains(70));
  }

  #[test]
  fn subset_and_union() {
    let mut a = BitSet::new(10);
    let mut b = BitSet::new(10);
    a.insert(1);
    b.insert(1);
    b.insert(7);
    assert!(a.is_subset_of(&b));
    assert!(!b.is_subset_of(&a));
    a.union_with(&b);
    assert_eq!(a, b);
    a.intersect_with(&BitSet::new(10));
    assert!(a.is_empty());
  }

  #[test]
  fn zero_width_set_is_empty() {
    let mut set = BitSet::new(0);
    set.invert();
    assert!(set.is_empty());
    assert_eq!(set.iter_indices().count(), 0);
  }
}
