use crate::analysis::dataflow::{DataFlowAnalysis, DataFlowStats, Direction};
use crate::cfg::cfg::{BlockId, Cfg};
use crate::ir::node::{Node, NodeKind};
use crate::util::bitset::BitSet;

/// Collects the variables a statement reads before writing (`ubd`) and the
/// variables it writes (`def`), in evaluation order.
fn look_for_variable_access(node: &Node, ubd: &mut BitSet, def: &mut BitSet) {
  match node.kind {
    NodeKind::Inc { .. } | NodeKind::Dec { .. } => match node.first() {
      Some(operand) if operand.kind == NodeKind::GetVar => {
        if let Some(var) = operand.var() {
          // Reads the old value, then writes.
          if !def.contains(var.index()) {
            ubd.insert(var.index());
          }
          def.insert(var.index());
        }
      }
      Some(operand) => look_for_variable_access(operand, ubd, def),
      None => {}
    },
    NodeKind::SetVar => {
      for child in node.children.iter() {
        look_for_variable_access(child, ubd, def);
      }
      if let Some(var) = node.var() {
        def.insert(var.index());
      }
    }
    NodeKind::GetVar => {
      if let Some(var) = node.var() {
        if !def.contains(var.index()) {
          ubd.insert(var.index());
        }
      }
    }
    _ => {
      for child in node.children.iter() {
        look_for_variable_access(child, ubd, def);
      }
    }
  }
}

/// Fills `use_before_def` and `not_def` of every block and seeds
/// `live_on_entry` with `use_before_def`.
pub fn init_local_sets(cfg: &mut Cfg, statements: &[Node]) {
  for block in cfg.blocks.iter_mut() {
    let width = block.use_before_def.width();
    let mut ubd = BitSet::new(width);
    let mut def = BitSet::new(width);
    for stmt in &statements[block.statements()] {
      look_for_variable_access(stmt, &mut ubd, &mut def);
    }
    def.invert();
    block.live_on_entry = ubd.clone();
    block.live_on_exit = BitSet::new(width);
    block.use_before_def = ubd;
    block.not_def = def;
  }
}

/// Backward may-liveness over whole variables:
/// `exit = ∪ entry(succ)`, `entry = (exit ∩ not_def) ∪ use_before_def`.
#[derive(Default)]
pub struct LivenessAnalysis;

impl DataFlowAnalysis for LivenessAnalysis {
  const DIRECTION: Direction = Direction::Backward;

  fn transfer(&mut self, cfg: &mut Cfg, b: BlockId) -> bool {
    let mut exit = BitSet::new(cfg.block(b).live_on_exit.width());
    for succ in cfg.successors(b) {
      exit.union_with(&cfg.block(succ).live_on_entry);
    }
    let block = cfg.block_mut(b);
    let mut entry = exit.clone();
    entry.intersect_with(&block.not_def);
    entry.union_with(&block.use_before_def);
    debug_assert!(block.live_on_entry.is_subset_of(&entry));
    let changed = entry != block.live_on_entry;
    block.live_on_entry = entry;
    block.live_on_exit = exit;
    changed
  }
}

pub fn compute_liveness(cfg: &mut Cfg, statements: &[Node]) -> DataFlowStats {
  init_local_sets(cfg, statements);
  let stats = LivenessAnalysis.analyze(cfg);
  log::trace!(
    "liveness converged after {} sweeps ({} transfers)",
    stats.sweeps,
    stats.transfers
  );
  stats
}
