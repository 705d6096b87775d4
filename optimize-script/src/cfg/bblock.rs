use super::cfg::{BasicBlock, BlockId, Cfg, Terminator};
use crate::error::{OptError, OptimizeResult};
use crate::ir::node::{LabelId, Node, NodeKind};
use crate::unit::UnitId;
use ahash::HashMap;

/// Partitions `statements` into basic blocks and links them.
///
/// A `Target` always begins a block and a jump always ends one. Jump and label
/// nodes are annotated with the block they resolve to.
pub fn build_blocks(
  unit: UnitId,
  statements: &mut [Node],
  var_count: usize,
) -> OptimizeResult<Cfg> {
  let mut label_stmts = HashMap::<LabelId, usize>::default();
  for (i, stmt) in statements.iter().enumerate() {
    if stmt.kind != NodeKind::Target {
      continue;
    }
    let label = stmt.label().ok_or(OptError::MalformedNode {
      unit,
      kind: stmt.kind,
      reason: "missing label",
    })?;
    if label_stmts.insert(label, i).is_some() {
      return Err(OptError::DuplicateLabel { unit, label });
    }
  }

  let mut blocks = Vec::new();
  let mut begin = 0;
  for (i, stmt) in statements.iter().enumerate() {
    if stmt.kind == NodeKind::Target {
      if i != begin {
        blocks.push(BasicBlock::new(begin, i - 1, var_count));
        begin = i;
      }
    } else if stmt.kind.is_jump() {
      blocks.push(BasicBlock::new(begin, i, var_count));
      begin = i + 1;
    }
  }
  if begin != statements.len() {
    blocks.push(BasicBlock::new(begin, statements.len() - 1, var_count));
  }
  let mut cfg = Cfg { blocks };

  let block_count = cfg.len();
  for b in 0..block_count {
    let end = cfg.block(b).end;
    let last = &statements[end];
    let next = (b + 1 < block_count).then_some(b + 1);

    let taken = if last.kind.is_jump() {
      let label = last.label().ok_or(OptError::MalformedNode {
        unit,
        kind: last.kind,
        reason: "missing label",
      })?;
      let target_stmt = *label_stmts
        .get(&label)
        .ok_or(OptError::UnknownJumpTarget { unit, label })?;
      // Every label begins a block, so this resolves to the block's first statement.
      let target = cfg
        .block_of_statement(target_stmt)
        .filter(|t| cfg.block(*t).start == target_stmt)
        .ok_or(OptError::UnknownJumpTarget { unit, label })?;
      Some(target)
    } else {
      None
    };

    let terminator = match (last.kind, taken, next) {
      (NodeKind::Goto, Some(t), _) => Terminator::Goto(t),
      (_, Some(t), fallthrough) => Terminator::Branch {
        taken: t,
        fallthrough,
      },
      (_, None, Some(n)) => Terminator::Fallthrough(n),
      (_, None, None) => Terminator::Stop,
    };
    if last.kind != NodeKind::Goto {
      if let Some(n) = next {
        cfg.connect(b, n);
      }
    }
    if let Some(t) = taken {
      cfg.connect(b, t);
      statements[end].props.target_block = Some(t);
    }
    cfg.block_mut(b).terminator = terminator;
  }

  for (b, block) in cfg.blocks.iter().enumerate() {
    let first = &mut statements[block.start];
    if first.kind == NodeKind::Target {
      first.props.target_block = Some(b as BlockId);
    }
  }

  log::trace!(
    "unit {unit}: {} statements in {} blocks",
    statements.len(),
    cfg.len()
  );
  Ok(cfg)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::unit::vars::VarId;
  use itertools::Itertools;

  const UNIT: UnitId = UnitId(0);

  fn stmt() -> Node {
    Node::expr_stmt(Node::get_var(VarId(0)))
  }

  fn ranges(cfg: &Cfg) -> Vec<(usize, usize)> {
    cfg.blocks.iter().map(|b| (b.start, b.end)).collect()
  }

  fn edges(cfg: &Cfg) -> Vec<(usize, usize)> {
    (0..cfg.len())
      .flat_map(|b| cfg.successors(b).map(move |s| (b, s)))
      .collect_vec()
  }

  #[test]
  fn straight_line_code_is_one_block() {
    let mut stmts = vec![stmt(), stmt(), stmt()];
    let cfg = build_blocks(UNIT, &mut stmts, 1).unwrap();
    assert_eq!(ranges(&cfg), vec![(0, 2)]);
    assert_eq!(cfg.block(0).terminator, Terminator::Stop);
    assert!(edges(&cfg).is_empty());
  }

  #[test]
  fn if_else_diamond() {
    // 0: if (!c) goto ELSE; 1: a; 2: goto END; 3: ELSE: 4: b; 5: END: 6: use
    let mut stmts = vec![
      Node::if_ne(Node::get_var(VarId(0)), LabelId(1)),
      stmt(),
      Node::goto(LabelId(2)),
      Node::target(LabelId(1)),
      stmt(),
      Node::target(LabelId(2)),
      stmt(),
    ];
    let cfg = build_blocks(UNIT, &mut stmts, 1).unwrap();
    assert_eq!(ranges(&cfg), vec![(0, 0), (1, 2), (3, 4), (5, 6)]);
    assert_eq!(edges(&cfg), vec![(0, 1), (0, 2), (1, 3), (2, 3)]);
    assert_eq!(cfg.block(0).terminator, Terminator::Branch {
      taken: 2,
      fallthrough: Some(1)
    });
    assert_eq!(cfg.block(1).terminator, Terminator::Goto(3));
    assert_eq!(cfg.block(2).terminator, Terminator::Fallthrough(3));
    assert_eq!(cfg.predecessors(3).collect_vec(), vec![1, 2]);
    assert_eq!(stmts[0].props.target_block, Some(2));
    assert_eq!(stmts[5].props.target_block, Some(3));
  }

  #[test]
  fn loop_back_edge() {
    // 0: x; 1: TOP: 2: body; 3: if (c) goto TOP; 4: after
    let mut stmts = vec![
      stmt(),
      Node::target(LabelId(0)),
      stmt(),
      Node::if_eq(Node::get_var(VarId(0)), LabelId(0)),
      stmt(),
    ];
    let cfg = build_blocks(UNIT, &mut stmts, 1).unwrap();
    assert_eq!(ranges(&cfg), vec![(0, 0), (1, 3), (4, 4)]);
    assert_eq!(edges(&cfg), vec![(0, 1), (1, 1), (1, 2)]);
  }

  #[test]
  fn label_at_start_begins_block_zero() {
    let mut stmts = vec![
      Node::target(LabelId(7)),
      stmt(),
      Node::goto(LabelId(7)),
    ];
    let cfg = build_blocks(UNIT, &mut stmts, 1).unwrap();
    assert_eq!(ranges(&cfg), vec![(0, 2)]);
    assert_eq!(edges(&cfg), vec![(0, 0)]);
    assert_eq!(cfg.block(0).terminator, Terminator::Goto(0));
  }

  #[test]
  fn adjacent_labels_form_separate_blocks() {
    // goto L; L: M: use
    let mut stmts = vec![
      Node::goto(LabelId(0)),
      Node::target(LabelId(0)),
      Node::target(LabelId(1)),
      stmt(),
    ];
    let cfg = build_blocks(UNIT, &mut stmts, 1).unwrap();
    assert_eq!(ranges(&cfg), vec![(0, 0), (1, 1), (2, 3)]);
    assert_eq!(edges(&cfg), vec![(0, 1), (1, 2)]);
    assert_eq!(cfg.predecessors(1).collect_vec(), vec![0]);
  }

  #[test]
  fn trailing_jump_has_no_fallthrough_block() {
    let mut stmts = vec![
      Node::target(LabelId(0)),
      Node::if_eq(Node::get_var(VarId(0)), LabelId(0)),
    ];
    let cfg = build_blocks(UNIT, &mut stmts, 1).unwrap();
    assert_eq!(cfg.block(0).terminator, Terminator::Branch {
      taken: 0,
      fallthrough: None
    });
  }

  #[test]
  fn empty_body_has_no_blocks() {
    let cfg = build_blocks(UNIT, &mut [], 0).unwrap();
    assert!(cfg.is_empty());
  }

  #[test]
  fn unknown_label_is_fatal() {
    let mut stmts = vec![stmt(), Node::goto(LabelId(3))];
    let err = build_blocks(UNIT, &mut stmts, 1).unwrap_err();
    assert_eq!(err, OptError::UnknownJumpTarget {
      unit: UNIT,
      label: LabelId(3)
    });
  }

  #[test]
  fn duplicate_label_is_fatal() {
    let mut stmts = vec![Node::target(LabelId(1)), Node::target(LabelId(1))];
    let err = build_blocks(UNIT, &mut stmts, 1).unwrap_err();
    assert_eq!(err.code(), "OPT0102");
  }

  #[test]
  fn blocks_partition_statements() {
    let mut stmts = vec![
      stmt(),
      Node::target(LabelId(0)),
      Node::if_ne(Node::get_var(VarId(0)), LabelId(1)),
      Node::goto(LabelId(0)),
      stmt(),
      Node::target(LabelId(1)),
      Node::target(LabelId(2)),
      Node::goto(LabelId(2)),
      stmt(),
    ];
    let cfg = build_blocks(UNIT, &mut stmts, 1).unwrap();
    assert_eq!(cfg.block(0).start, 0);
    let mut next = 0;
    for block in cfg.blocks.iter() {
      assert_eq!(block.start, next);
      next = block.end + 1;
    }
    assert_eq!(next, stmts.len());
  }
}
