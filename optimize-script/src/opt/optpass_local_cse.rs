use crate::cfg::cfg::Cfg;
use crate::ir::node::{BinOp, Datum, Node, NodeId, NodeKind, TempId};
use crate::opt::PassResult;
use crate::unit::vars::{VarId, VariableTable};
use crate::unit::{fresh_node_id, CompilationUnit, UnitState};
use ahash::HashMap;
use derive_visitor::{DriveMut, VisitorMut};
use std::collections::VecDeque;

// Correctness:
// - Only unboxed arithmetic over literals and specialized locals is cached. These are pure, so
//   a repeat yields the same value as long as none of the variables it reads were written since.
// - Locals can only be written by this unit's own code: a unit whose locals are visible to
//   nested functions requires an activation record and is never optimized. Calls therefore
//   don't invalidate anything.
// - Values are only carried into blocks whose sole predecessor is the block that computed them,
//   so the first evaluation always dominates the reuse.

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ExprKey {
  Num(u64),
  Var(VarId),
  Bin(BinOp, Box<ExprKey>, Box<ExprKey>),
}

impl ExprKey {
  fn mentions(&self, var: VarId) -> bool {
    match self {
      ExprKey::Num(_) => false,
      ExprKey::Var(v) => *v == var,
      ExprKey::Bin(_, l, r) => l.mentions(var) || r.mentions(var),
    }
  }
}

/// Available expressions, mapped to the node that first computed them.
type Table = HashMap<ExprKey, NodeId>;

fn is_cacheable_op(op: BinOp) -> bool {
  op.is_numeric() || op == BinOp::Add
}

fn expr_key(node: &Node, vars: &VariableTable) -> Option<ExprKey> {
  if !node.props.is_number() || node.props.direct_param {
    return None;
  }
  match node.kind {
    // Keyed by bits so that -0 and NaN are handled consistently.
    NodeKind::Number => node.number_value().map(|n| ExprKey::Num(n.to_bits())),
    NodeKind::GetVar => node
      .var()
      .filter(|var| vars.is_number(*var))
      .map(ExprKey::Var),
    NodeKind::Binary(op) if is_cacheable_op(op) => match node.children.as_slice() {
      [l, r] => Some(ExprKey::Bin(
        op,
        Box::new(expr_key(l, vars)?),
        Box::new(expr_key(r, vars)?),
      )),
      _ => None,
    },
    _ => None,
  }
}

struct CseWalker<'a> {
  vars: &'a VariableTable,
  next_node_id: &'a mut u32,
  temp_count: u32,
  /// First evaluations that must also store into a temporary.
  stores: HashMap<NodeId, TempId>,
  result: PassResult,
}

impl CseWalker<'_> {
  fn kill(table: &mut Table, var: VarId) {
    table.retain(|key, _| !key.mentions(var));
  }

  /// Walks `node` with a private copy of `table`; only removals flow back.
  fn visit_conditional(&mut self, node: &mut Node, table: &mut Table) {
    let mut branch = table.clone();
    self.visit(node, &mut branch);
    table.retain(|key, _| branch.contains_key(key));
  }

  fn visit(&mut self, node: &mut Node, table: &mut Table) {
    if matches!(node.kind, NodeKind::Binary(_)) {
      if let Some(key) = expr_key(node, self.vars) {
        if let Some(&first) = table.get(&key) {
          self.reuse(node, first);
          return;
        }
        for child in node.children.iter_mut() {
          self.visit(child, table);
        }
        table.insert(key, node.id);
        return;
      }
    }

    match node.kind {
      NodeKind::SetVar | NodeKind::Inc { .. } | NodeKind::Dec { .. } => {
        for child in node.children.iter_mut() {
          self.visit(child, table);
        }
        let written = match node.kind {
          NodeKind::SetVar => node.var(),
          _ => node.first().and_then(Node::read_var),
        };
        if let Some(var) = written {
          Self::kill(table, var);
        }
      }
      NodeKind::Hook => {
        let mut children = node.children.iter_mut();
        if let Some(cond) = children.next() {
          self.visit(cond, table);
        }
        for arm in children {
          self.visit_conditional(arm, table);
        }
      }
      NodeKind::And | NodeKind::Or => {
        let mut children = node.children.iter_mut();
        if let Some(left) = children.next() {
          self.visit(left, table);
        }
        for right in children {
          self.visit_conditional(right, table);
        }
      }
      _ => {
        for child in node.children.iter_mut() {
          self.visit(child, table);
        }
      }
    }
  }

  fn reuse(&mut self, node: &mut Node, first: NodeId) {
    let temp_count = &mut self.temp_count;
    let temp = *self.stores.entry(first).or_insert_with(|| {
      let temp = TempId(*temp_count);
      *temp_count += 1;
      temp
    });
    let mut load = Node::new(NodeKind::CseLoad, Vec::new(), Some(Datum::Temp(temp)));
    load.id = fresh_node_id(self.next_node_id);
    load.props.numeric = node.props.numeric;
    log::trace!("cse: node {:?} reuses {:?} via {:?}", node.id, first, temp);
    *node = load;
    self.result.mark_changed();
  }

  fn walk_block(&mut self, cfg: &Cfg, statements: &mut [Node], b: usize, table: &mut Table) {
    for stmt in statements[cfg.block(b).statements()].iter_mut() {
      self.visit(stmt, table);
    }
  }
}

#[derive(VisitorMut)]
#[visitor(Node(enter))]
struct StoreTagger<'a> {
  stores: &'a HashMap<NodeId, TempId>,
}

impl StoreTagger<'_> {
  fn enter_node(&mut self, node: &mut Node) {
    if let Some(temp) = self.stores.get(&node.id) {
      node.props.cse_store = Some(*temp);
    }
  }
}

/// Replaces repeated unboxed arithmetic with loads of a temporary holding the
/// first result.
///
/// Tables are carried only along edges into blocks with a single predecessor;
/// merge points start from scratch rather than intersecting what reaches them.
pub fn optpass_local_cse(unit: &mut CompilationUnit) -> PassResult {
  unit.require(UnitState::Specialized);
  let cfg = &unit.cfg;
  let statements = &mut unit.statements;
  let mut walker = CseWalker {
    vars: &unit.vars,
    next_node_id: &mut unit.next_node_id,
    temp_count: unit.temp_count,
    stores: HashMap::default(),
    result: PassResult::default(),
  };

  let n = cfg.len();
  let mut entry_tables: Vec<Option<Table>> = vec![None; n];
  let mut visited = vec![false; n];
  let mut queue = VecDeque::new();
  if n > 0 {
    queue.push_back(0);
  }
  while let Some(b) = queue.pop_front() {
    if visited[b] {
      continue;
    }
    visited[b] = true;
    let mut table = entry_tables[b].take().unwrap_or_default();
    walker.walk_block(cfg, statements, b, &mut table);
    for succ in cfg.successors(b) {
      if visited[succ] {
        continue;
      }
      if succ != 0 && cfg.predecessors(succ).count() == 1 {
        entry_tables[succ] = Some(table.clone());
      }
      queue.push_back(succ);
    }
  }
  for b in 0..n {
    if !visited[b] {
      walker.walk_block(cfg, statements, b, &mut Table::default());
    }
  }

  let CseWalker {
    temp_count,
    stores,
    result,
    ..
  } = walker;
  let mut tagger = StoreTagger { stores: &stores };
  for stmt in statements.iter_mut() {
    stmt.drive_mut(&mut tagger);
  }
  unit.temp_count = temp_count;
  result
}
