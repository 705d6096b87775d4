use crate::util::bitset::BitSet;
use itertools::Itertools;
use serde::Serialize;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::ops::RangeInclusive;

pub type BlockId = usize;

/// How control leaves a block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Terminator {
  /// Last block, and its final statement does not jump.
  Stop,
  /// Falls through into the lexically next block.
  Fallthrough(BlockId),
  /// Unconditional jump.
  Goto(BlockId),
  /// Conditional jump. `fallthrough` is absent when the block is the last one.
  Branch {
    taken: BlockId,
    fallthrough: Option<BlockId>,
  },
}

/// Maximal straight-line run of statements `[start, end]` (inclusive).
#[derive(Clone, Debug, Serialize)]
pub struct BasicBlock {
  pub start: usize,
  pub end: usize,
  pub terminator: Terminator,
  pub successors: BTreeSet<BlockId>,
  pub predecessors: BTreeSet<BlockId>,
  /// Variables read in this block before any write in it.
  pub use_before_def: BitSet,
  /// Variables never written in this block.
  pub not_def: BitSet,
  pub live_on_entry: BitSet,
  pub live_on_exit: BitSet,
}

impl BasicBlock {
  pub fn new(start: usize, end: usize, var_count: usize) -> Self {
    debug_assert!(start <= end);
    Self {
      start,
      end,
      terminator: Terminator::Stop,
      successors: BTreeSet::new(),
      predecessors: BTreeSet::new(),
      use_before_def: BitSet::new(var_count),
      not_def: BitSet::new(var_count),
      live_on_entry: BitSet::new(var_count),
      live_on_exit: BitSet::new(var_count),
    }
  }

  pub fn statements(&self) -> RangeInclusive<usize> {
    self.start..=self.end
  }

  pub fn statement_count(&self) -> usize {
    self.end - self.start + 1
  }
}

/// Control flow graph over a unit's flattened statements. Blocks are dense and
/// refer to each other only by index.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Cfg {
  pub blocks: Vec<BasicBlock>,
}

impl Cfg {
  pub fn len(&self) -> usize {
    self.blocks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.blocks.is_empty()
  }

  pub fn block(&self, id: BlockId) -> &BasicBlock {
    &self.blocks[id]
  }

  pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
    &mut self.blocks[id]
  }

  pub fn successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
    self.blocks[id].successors.iter().copied()
  }

  pub fn predecessors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
    self.blocks[id].predecessors.iter().copied()
  }

  pub fn connect(&mut self, parent: BlockId, child: BlockId) {
    self.blocks[parent].successors.insert(child);
    self.blocks[child].predecessors.insert(parent);
  }

  /// Block containing statement `stmt`.
  pub fn block_of_statement(&self, stmt: usize) -> Option<BlockId> {
    let idx = self.blocks.partition_point(|b| b.end < stmt);
    (idx < self.blocks.len() && self.blocks[idx].start <= stmt).then_some(idx)
  }

  /// Whether the variable may be read before it is written on some path from
  /// function entry. Only meaningful once liveness has run.
  pub fn is_live_on_entry(&self, var: usize) -> bool {
    self
      .blocks
      .first()
      .map_or(false, |b| b.live_on_entry.contains(var))
  }

  pub fn find_unreachable(&self) -> Vec<BlockId> {
    if self.blocks.is_empty() {
      return Vec::new();
    }
    let mut seen = vec![false; self.blocks.len()];
    seen[0] = true;
    let mut to_visit = VecDeque::from([0]);
    while let Some(n) = to_visit.pop_front() {
      for c in self.successors(n) {
        if !seen[c] {
          seen[c] = true;
          to_visit.push_back(c);
        }
      }
    }
    (0..self.blocks.len()).filter(|b| !seen[*b]).collect_vec()
  }
}
