use crate::cfg::cfg::{BlockId, Cfg};
use itertools::Itertools;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
  Forward,
  Backward,
}

/// Work done by one fixpoint run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DataFlowStats {
  pub sweeps: usize,
  pub transfers: usize,
}

pub trait DataFlowAnalysis {
  const DIRECTION: Direction;

  /// Recomputes the state of block `b` from its neighbours and stores it.
  /// Returns whether the state flowing out of the block changed, which dirties
  /// the blocks downstream in the analysis direction.
  fn transfer(&mut self, cfg: &mut Cfg, b: BlockId) -> bool;

  /// Blocks whose inputs changed through state not carried along CFG edges
  /// (e.g. a unit-wide accumulator). Called after every transfer.
  fn drain_invalidated(&mut self) -> Vec<BlockId> {
    Vec::new()
  }

  fn analyze(&mut self, cfg: &mut Cfg) -> DataFlowStats
  where
    Self: Sized,
  {
    run_dataflow(self, cfg)
  }
}

/// Round-robin fixpoint. Every block starts dirty; blocks are swept in index
/// order (reversed for backward analyses), and another sweep is made whenever a
/// block at or before the current sweep position was dirtied.
fn run_dataflow<A: DataFlowAnalysis>(analysis: &mut A, cfg: &mut Cfg) -> DataFlowStats {
  let n = cfg.len();
  let order = match A::DIRECTION {
    Direction::Forward => (0..n).collect_vec(),
    Direction::Backward => (0..n).rev().collect_vec(),
  };
  let mut position = vec![0; n];
  for (pos, &b) in order.iter().enumerate() {
    position[b] = pos;
  }

  let mut stats = DataFlowStats::default();
  let mut dirty = vec![true; n];
  loop {
    stats.sweeps += 1;
    let mut rescan = false;
    for (pos, &b) in order.iter().enumerate() {
      if !dirty[b] {
        continue;
      }
      dirty[b] = false;
      stats.transfers += 1;

      let mut downstream = Vec::new();
      if analysis.transfer(cfg, b) {
        downstream.extend(match A::DIRECTION {
          Direction::Forward => cfg.successors(b).collect_vec(),
          Direction::Backward => cfg.predecessors(b).collect_vec(),
        });
      }
      downstream.extend(analysis.drain_invalidated());
      for t in downstream {
        dirty[t] = true;
        if position[t] <= pos {
          rescan = true;
        }
      }
    }
    if !rescan {
      break;
    }
  }
  stats
}
