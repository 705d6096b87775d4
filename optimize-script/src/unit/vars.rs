use serde::Serialize;
use std::fmt;
use std::ops::BitOr;

/// Index into a unit's variable table. Parameters come first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct VarId(pub u32);

impl VarId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for VarId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "v{}", self.0)
  }
}

/// Flow-insensitive type of a local. `Any` absorbs `Number`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
pub enum TypeUnion {
  #[default]
  None,
  Number,
  Any,
}

impl TypeUnion {
  pub fn union(self, other: TypeUnion) -> TypeUnion {
    match (self, other) {
      (TypeUnion::Any, _) | (_, TypeUnion::Any) => TypeUnion::Any,
      (TypeUnion::Number, _) | (_, TypeUnion::Number) => TypeUnion::Number,
      (TypeUnion::None, TypeUnion::None) => TypeUnion::None,
    }
  }
}

impl BitOr for TypeUnion {
  type Output = TypeUnion;

  fn bitor(self, rhs: TypeUnion) -> TypeUnion {
    self.union(rhs)
  }
}

/// Machine slot chosen by the lowering stage. Unboxed numbers take two words.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct RegisterSlot {
  pub index: u16,
  pub width: u8,
}

#[derive(Clone, Debug, Serialize)]
pub struct LocalVar {
  pub name: String,
  pub is_parameter: bool,
  pub type_union: TypeUnion,
  pub specialized_as_number: bool,
  assigned_register: Option<RegisterSlot>,
}

impl LocalVar {
  fn new(name: String, is_parameter: bool) -> Self {
    Self {
      name,
      is_parameter,
      type_union: TypeUnion::None,
      specialized_as_number: false,
      assigned_register: None,
    }
  }

  pub fn assigned_register(&self) -> Option<RegisterSlot> {
    self.assigned_register
  }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct VariableTable {
  vars: Vec<LocalVar>,
  param_count: usize,
}

impl VariableTable {
  pub fn new<S: Into<String>>(params: impl IntoIterator<Item = S>) -> Self {
    let vars: Vec<_> = params
      .into_iter()
      .map(|name| LocalVar::new(name.into(), true))
      .collect();
    Self {
      param_count: vars.len(),
      vars,
    }
  }

  pub fn add_var(&mut self, name: impl Into<String>) -> VarId {
    let id = VarId(self.vars.len() as u32);
    self.vars.push(LocalVar::new(name.into(), false));
    id
  }

  pub fn len(&self) -> usize {
    self.vars.len()
  }

  pub fn is_empty(&self) -> bool {
    self.vars.is_empty()
  }

  pub fn param_count(&self) -> usize {
    self.param_count
  }

  pub fn contains(&self, var: VarId) -> bool {
    var.index() < self.vars.len()
  }

  pub fn get(&self, var: VarId) -> &LocalVar {
    &self.vars[var.index()]
  }

  pub fn iter(&self) -> impl Iterator<Item = (VarId, &LocalVar)> {
    self
      .vars
      .iter()
      .enumerate()
      .map(|(i, v)| (VarId(i as u32), v))
  }

  /// Finds the variable with `name`. Later declarations do not shadow earlier ones.
  pub fn lookup(&self, name: &str) -> Option<VarId> {
    self
      .vars
      .iter()
      .position(|v| v.name == name)
      .map(|i| VarId(i as u32))
  }

  pub fn is_parameter(&self, var: VarId) -> bool {
    self.get(var).is_parameter
  }

  pub fn type_union(&self, var: VarId) -> TypeUnion {
    self.get(var).type_union
  }

  /// ORs `typ` into the variable's union. Returns whether the union grew.
  pub fn assign_type(&mut self, var: VarId, typ: TypeUnion) -> bool {
    let slot = &mut self.vars[var.index()].type_union;
    let next = *slot | typ;
    let changed = next != *slot;
    *slot = next;
    changed
  }

  pub fn is_number(&self, var: VarId) -> bool {
    self.get(var).specialized_as_number
  }

  pub(crate) fn set_specialized(&mut self, var: VarId, specialized: bool) {
    self.vars[var.index()].specialized_as_number = specialized;
  }

  /// Resets every union to its pre-analysis state.
  pub(crate) fn reset_types(&mut self) {
    for var in self.vars.iter_mut() {
      var.type_union = TypeUnion::None;
      var.specialized_as_number = false;
    }
  }

  /// Machine words the variable's storage needs. Specialized variables, and
  /// parameters of direct-call targets (passed as value/number pairs), take two.
  pub fn slot_width(&self, var: VarId, direct_call_target: bool) -> u8 {
    let v = self.get(var);
    if v.specialized_as_number || (v.is_parameter && direct_call_target) {
      2
    } else {
      1
    }
  }

  /// Records the slot lowering picked. An already assigned slot is kept.
  pub(crate) fn assign_register(&mut self, var: VarId, slot: RegisterSlot) -> RegisterSlot {
    *self.vars[var.index()]
      .assigned_register
      .get_or_insert(slot)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn any_absorbs_number() {
    assert_eq!(TypeUnion::Number | TypeUnion::Any, TypeUnion::Any);
    assert_eq!(TypeUnion::None | TypeUnion::Number, TypeUnion::Number);
    assert_eq!(TypeUnion::None | TypeUnion::None, TypeUnion::None);
  }

  #[test]
  fn params_precede_locals() {
    let mut vars = VariableTable::new(["a", "b"]);
    let y = vars.add_var("y");
    assert_eq!(y, VarId(2));
    assert_eq!(vars.param_count(), 2);
    assert!(vars.is_parameter(VarId(1)));
    assert!(!vars.is_parameter(y));
    assert_eq!(vars.lookup("b"), Some(VarId(1)));
    assert_eq!(vars.lookup("z"), None);
  }

  #[test]
  fn assign_type_reports_growth_only() {
    let mut vars = VariableTable::new(Vec::<String>::new());
    let x = vars.add_var("x");
    assert!(vars.assign_type(x, TypeUnion::Number));
    assert!(!vars.assign_type(x, TypeUnion::Number));
    assert!(vars.assign_type(x, TypeUnion::Any));
    assert!(!vars.assign_type(x, TypeUnion::Number));
    assert_eq!(vars.type_union(x), TypeUnion::Any);
  }

  #[test]
  fn assigned_register_is_never_overwritten() {
    let mut vars = VariableTable::new(["p"]);
    let first = RegisterSlot { index: 0, width: 1 };
    let second = RegisterSlot { index: 4, width: 2 };
    assert_eq!(vars.assign_register(VarId(0), first), first);
    assert_eq!(vars.assign_register(VarId(0), second), first);
    assert_eq!(vars.get(VarId(0)).assigned_register(), Some(first));
  }

  #[test]
  fn slot_width_tracks_representation() {
    let mut vars = VariableTable::new(["p"]);
    let n = vars.add_var("n");
    vars.set_specialized(n, true);
    assert_eq!(vars.slot_width(n, false), 2);
    assert_eq!(vars.slot_width(VarId(0), false), 1);
    assert_eq!(vars.slot_width(VarId(0), true), 2);
  }
}
