use crate::analysis::dataflow::{DataFlowAnalysis, DataFlowStats, Direction};
use crate::cfg::cfg::{BlockId, Cfg};
use crate::ir::node::{BinOp, Node, NodeKind};
use crate::unit::vars::{TypeUnion, VarId, VariableTable};
use derive_visitor::{DriveMut, VisitorMut};
use std::collections::BTreeSet;

/// Classifies the value an expression produces given the current variable unions.
pub fn expression_type(node: &Node, vars: &VariableTable) -> TypeUnion {
  match node.kind {
    NodeKind::Number
    | NodeKind::ToNumber
    | NodeKind::CseLoad
    | NodeKind::Inc { .. }
    | NodeKind::Dec { .. } => TypeUnion::Number,
    NodeKind::Binary(op) if op.is_numeric() => TypeUnion::Number,
    NodeKind::Unary(op) if op.is_numeric() => TypeUnion::Number,
    // Number only if every operand that can flow out is a number.
    NodeKind::Binary(BinOp::Add) | NodeKind::And | NodeKind::Or => node
      .children
      .iter()
      .fold(TypeUnion::None, |acc, c| acc | expression_type(c, vars)),
    NodeKind::Hook => node
      .children
      .iter()
      .skip(1)
      .fold(TypeUnion::None, |acc, c| acc | expression_type(c, vars)),
    NodeKind::Comma | NodeKind::SetVar => match node.children.last() {
      Some(value) => expression_type(value, vars),
      None => TypeUnion::Any,
    },
    NodeKind::GetVar => match node.var() {
      Some(var) => vars.type_union(var),
      None => TypeUnion::Any,
    },
    _ => TypeUnion::Any,
  }
}

/// Forward flow of per-variable type unions. The unions live in the unit's
/// [`VariableTable`] and so are shared by all blocks; a growing union dirties
/// every block that reads the variable.
pub struct TypeFlowAnalysis<'a> {
  statements: &'a [Node],
  vars: &'a mut VariableTable,
  readers: Vec<BTreeSet<BlockId>>,
  invalidated: Vec<BlockId>,
}

impl<'a> TypeFlowAnalysis<'a> {
  pub fn new(cfg: &Cfg, statements: &'a [Node], vars: &'a mut VariableTable) -> Self {
    let mut readers = vec![BTreeSet::new(); vars.len()];
    for (b, block) in cfg.blocks.iter().enumerate() {
      for stmt in &statements[block.statements()] {
        collect_reads(stmt, &mut |var| {
          readers[var.index()].insert(b);
        });
      }
    }
    Self {
      statements,
      vars,
      readers,
      invalidated: Vec::new(),
    }
  }

  /// Visits definitions in evaluation order, ORing in the stored value's type.
  fn find_def_points(&mut self, node: &Node, grown: &mut Vec<VarId>) {
    for child in node.children.iter() {
      self.find_def_points(child, grown);
    }
    let (var, typ) = match node.kind {
      NodeKind::SetVar => match (node.var(), node.first()) {
        (Some(var), Some(rhs)) => (var, expression_type(rhs, self.vars)),
        _ => return,
      },
      NodeKind::Inc { .. } | NodeKind::Dec { .. } => match node.first().and_then(Node::read_var) {
        Some(var) => (var, TypeUnion::Number),
        None => return,
      },
      _ => return,
    };
    if self.vars.assign_type(var, typ) {
      grown.push(var);
    }
  }
}

impl DataFlowAnalysis for TypeFlowAnalysis<'_> {
  const DIRECTION: Direction = Direction::Forward;

  fn transfer(&mut self, cfg: &mut Cfg, b: BlockId) -> bool {
    let statements = self.statements;
    let mut grown = Vec::new();
    for stmt in &statements[cfg.block(b).statements()] {
      self.find_def_points(stmt, &mut grown);
    }
    for var in grown.iter() {
      self.invalidated.extend(self.readers[var.index()].iter().copied());
    }
    !grown.is_empty()
  }

  fn drain_invalidated(&mut self) -> Vec<BlockId> {
    std::mem::take(&mut self.invalidated)
  }
}

fn collect_reads(node: &Node, f: &mut impl FnMut(VarId)) {
  if let Some(var) = node.read_var() {
    f(var);
  }
  for child in node.children.iter() {
    collect_reads(child, f);
  }
}

#[derive(VisitorMut)]
#[visitor(Node(enter))]
struct DefPointAnnotator<'a> {
  vars: &'a VariableTable,
}

impl DefPointAnnotator<'_> {
  fn enter_node(&mut self, node: &mut Node) {
    let typ = match node.kind {
      NodeKind::SetVar => node.first().map(|rhs| expression_type(rhs, self.vars)),
      NodeKind::Inc { .. } | NodeKind::Dec { .. } => node
        .first()
        .and_then(Node::read_var)
        .map(|_| TypeUnion::Number),
      _ => None,
    };
    if typ.is_some() {
      node.props.inferred_type = typ;
    }
  }
}

/// Runs type flow to its fixpoint, then records the result on definition
/// points and marks the variables that only ever hold numbers.
///
/// Parameters and variables that may be read before their first write start
/// out as `Any`.
pub fn compute_types(
  cfg: &mut Cfg,
  statements: &mut [Node],
  vars: &mut VariableTable,
) -> DataFlowStats {
  vars.reset_types();
  for i in 0..vars.param_count() {
    vars.assign_type(VarId(i as u32), TypeUnion::Any);
  }
  for i in 0..vars.len() {
    if cfg.is_live_on_entry(i) {
      vars.assign_type(VarId(i as u32), TypeUnion::Any);
    }
  }

  let stats = TypeFlowAnalysis::new(cfg, statements, vars).analyze(cfg);

  let mut annotator = DefPointAnnotator { vars: &*vars };
  for stmt in statements.iter_mut() {
    stmt.drive_mut(&mut annotator);
  }

  let numbers: Vec<VarId> = vars
    .iter()
    .filter(|(_, v)| v.type_union == TypeUnion::Number)
    .map(|(id, _)| id)
    .collect();
  for var in numbers {
    vars.set_specialized(var, true);
  }
  log::trace!(
    "type flow converged after {} sweeps ({} transfers)",
    stats.sweeps,
    stats.transfers
  );
  stats
}
