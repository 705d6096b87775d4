use super::vars::{VarId, VariableTable};
use super::{CompilationUnit, UnitId};
use crate::error::{OptError, OptimizeResult};
use crate::ir::node::{Node, NodeKind};
use crate::ir::{flatten_statements, number_nodes};

/// All compilation units of one source file, indexed by `UnitId`.
#[derive(Debug)]
pub struct Script {
  pub units: Vec<CompilationUnit>,
}

impl Script {
  pub const TOP_LEVEL: UnitId = UnitId(0);

  pub fn top_level(&self) -> &CompilationUnit {
    &self.units[0]
  }

  pub fn unit(&self, id: UnitId) -> &CompilationUnit {
    &self.units[id.index()]
  }

  pub fn unit_mut(&mut self, id: UnitId) -> &mut CompilationUnit {
    &mut self.units[id.index()]
  }

  /// Looks a unit up by function name. Names are not unique in general; the
  /// first match in id order wins.
  pub fn find(&self, name: &str) -> Option<&CompilationUnit> {
    self.units.iter().find(|u| u.name.as_deref() == Some(name))
  }

  pub fn children(&self, id: UnitId) -> impl Iterator<Item = UnitId> + '_ {
    self
      .units
      .iter()
      .filter(move |u| u.parent == Some(id))
      .map(|u| u.id)
  }
}

/// Front-end side description of one unit before it is sealed into a [`Script`].
#[derive(Debug)]
pub struct UnitBuilder {
  name: Option<String>,
  parent: Option<UnitId>,
  vars: VariableTable,
  body: Vec<Node>,
  requires_activation: bool,
}

impl UnitBuilder {
  fn new(name: Option<String>, parent: Option<UnitId>, params: &[&str]) -> Self {
    Self {
      name,
      parent,
      vars: VariableTable::new(params.iter().copied()),
      body: Vec::new(),
      requires_activation: false,
    }
  }

  /// Declares a local, or returns the existing parameter or local with that name.
  pub fn var(&mut self, name: &str) -> VarId {
    match self.vars.lookup(name) {
      Some(var) => var,
      None => self.vars.add_var(name),
    }
  }

  pub fn param(&self, index: usize) -> VarId {
    debug_assert!(index < self.vars.param_count());
    VarId(index as u32)
  }

  pub fn set_requires_activation(&mut self, requires_activation: bool) -> &mut Self {
    self.requires_activation = requires_activation;
    self
  }

  pub fn push(&mut self, stmt: Node) -> &mut Self {
    self.body.push(stmt);
    self
  }

  pub fn extend(&mut self, stmts: impl IntoIterator<Item = Node>) -> &mut Self {
    self.body.extend(stmts);
    self
  }
}

#[derive(Debug)]
pub struct ScriptBuilder {
  units: Vec<UnitBuilder>,
}

impl Default for ScriptBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl ScriptBuilder {
  pub fn new() -> Self {
    Self {
      units: vec![UnitBuilder::new(None, None, &[])],
    }
  }

  pub fn top_level(&mut self) -> &mut UnitBuilder {
    &mut self.units[0]
  }

  pub fn unit(&mut self, id: UnitId) -> &mut UnitBuilder {
    &mut self.units[id.index()]
  }

  /// Declares a named function inside `parent`. The declaration statement is
  /// appended to the parent's body at this point.
  pub fn function(&mut self, parent: UnitId, name: &str, params: &[&str]) -> UnitId {
    let id = UnitId(self.units.len() as u32);
    self
      .units
      .push(UnitBuilder::new(Some(name.to_string()), Some(parent), params));
    self.units[parent.index()].push(Node::function(id));
    id
  }

  /// Seals every unit. A unit whose body does not validate is still built but
  /// starts out `Failed` with the error, so its siblings are unaffected.
  pub fn finish(self) -> Script {
    let parents: Vec<Option<UnitId>> = self.units.iter().map(|u| u.parent).collect();
    let mut units = Vec::with_capacity(self.units.len());
    for (i, builder) in self.units.into_iter().enumerate() {
      let id = UnitId(i as u32);
      let mut statements = flatten_statements(builder.body);
      let valid = statements
        .iter()
        .try_for_each(|stmt| validate(id, stmt, &builder.vars, &parents));
      let node_count = number_nodes(&mut statements);
      let mut unit = CompilationUnit::new(
        id,
        builder.name,
        builder.parent,
        statements,
        builder.vars,
        builder.requires_activation,
        node_count,
      );
      if let Err(err) = valid {
        unit.fail(err);
      }
      units.push(unit);
    }
    Script { units }
  }
}

fn validate(
  unit: UnitId,
  node: &Node,
  vars: &VariableTable,
  parents: &[Option<UnitId>],
) -> OptimizeResult<()> {
  let malformed = |reason| OptError::MalformedNode {
    unit,
    kind: node.kind,
    reason,
  };
  let arity = |n: usize| {
    if node.children.len() == n {
      Ok(())
    } else {
      Err(malformed("unexpected number of operands"))
    }
  };
  match node.kind {
    NodeKind::GetVar | NodeKind::SetVar => {
      let var = node.var().ok_or_else(|| malformed("missing variable"))?;
      if !vars.contains(var) {
        return Err(OptError::UnknownVariable { unit, var });
      }
      arity(if node.kind == NodeKind::SetVar { 1 } else { 0 })?;
    }
    NodeKind::Target | NodeKind::Goto => {
      node.label().ok_or_else(|| malformed("missing label"))?;
      arity(0)?;
    }
    NodeKind::IfEq | NodeKind::IfNe => {
      node.label().ok_or_else(|| malformed("missing label"))?;
      arity(1)?;
    }
    NodeKind::Function => {
      let target = node.unit().ok_or_else(|| malformed("missing unit"))?;
      if parents.get(target.index()).copied().flatten() != Some(unit) {
        return Err(OptError::UnknownUnit { unit, target });
      }
    }
    NodeKind::Call | NodeKind::New if node.children.is_empty() => {
      return Err(malformed("missing call target"));
    }
    NodeKind::Binary(_) | NodeKind::And | NodeKind::Or | NodeKind::SetProp => arity(2)?,
    NodeKind::Hook | NodeKind::SetElem => arity(3)?,
    NodeKind::GetElem => arity(2)?,
    NodeKind::Unary(_)
    | NodeKind::Inc { .. }
    | NodeKind::Dec { .. }
    | NodeKind::GetProp
    | NodeKind::ExprStmt
    | NodeKind::Throw => arity(1)?,
    _ => {}
  }
  for child in node.children.iter() {
    validate(unit, child, vars, parents)?;
  }
  Ok(())
}
