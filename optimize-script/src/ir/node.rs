use super::props::Props;
use crate::unit::vars::VarId;
use crate::unit::UnitId;
use derive_visitor::{Drive, DriveMut};
use serde::Serialize;
use std::fmt;

/// Dense per-unit node identity, assigned when the unit is built.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LabelId(pub u32);

impl fmt::Display for LabelId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "L{}", self.0)
  }
}

/// Temporary introduced by local CSE to hold an already computed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TempId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum BinOp {
  Add,
  Sub,
  Mul,
  Div,
  Mod,
  BitAnd,
  BitOr,
  BitXor,
  Shl,
  Shr,
  UShr,
  Lt,
  Le,
  Gt,
  Ge,
  Eq,
  Ne,
  StrictEq,
  StrictNe,
  In,
  InstanceOf,
}

impl BinOp {
  /// Operators that always produce a number, whatever their operands are.
  /// `Add` is excluded as it may concatenate strings.
  pub fn is_numeric(self) -> bool {
    matches!(
      self,
      BinOp::Sub
        | BinOp::Mul
        | BinOp::Div
        | BinOp::Mod
        | BinOp::BitAnd
        | BinOp::BitOr
        | BinOp::BitXor
        | BinOp::Shl
        | BinOp::Shr
        | BinOp::UShr
    )
  }

  pub fn is_relational(self) -> bool {
    matches!(self, BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum UnOp {
  Neg,
  Pos,
  BitNot,
  Not,
  Typeof,
  Void,
  Delete,
}

impl UnOp {
  pub fn is_numeric(self) -> bool {
    matches!(self, UnOp::Neg | UnOp::Pos | UnOp::BitNot)
  }
}

/// Operator kind of an IR node.
///
/// Child layout per kind:
/// - `SetVar`: `[value]`, datum is the variable.
/// - `GetProp`: `[object]`, datum is the property name; `SetProp`: `[object, value]`.
/// - `GetElem`: `[object, index]`; `SetElem`: `[object, index, value]`.
/// - `Call`, `New`: `[target, args...]`.
/// - `IfEq` jumps when its single child is truthy, `IfNe` when it is falsy.
/// - `Inc`, `Dec`: `[operand]` where the operand is a `GetVar`, `GetProp` or `GetElem`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
  // Statements.
  Block,
  Loop,
  ExprStmt,
  Return,
  Throw,
  Target,
  Goto,
  IfEq,
  IfNe,
  Function,
  Empty,
  // Expressions.
  Number,
  String,
  Boolean,
  Null,
  Undefined,
  This,
  Name,
  GetVar,
  SetVar,
  GetProp,
  SetProp,
  GetElem,
  SetElem,
  Call,
  New,
  Binary(BinOp),
  Unary(UnOp),
  Inc { post: bool },
  Dec { post: bool },
  Hook,
  And,
  Or,
  Comma,
  ArrayLit,
  ObjectLit,
  // Inserted by the optimizer.
  ToNumber,
  ToObject,
  CseLoad,
}

impl NodeKind {
  pub fn is_jump(self) -> bool {
    matches!(self, NodeKind::Goto | NodeKind::IfEq | NodeKind::IfNe)
  }

  /// Statement containers that flattening dissolves.
  pub fn is_container(self) -> bool {
    matches!(self, NodeKind::Block | NodeKind::Loop)
  }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Datum {
  Number(f64),
  String(String),
  Boolean(bool),
  Var(VarId),
  Label(LabelId),
  Unit(UnitId),
  Temp(TempId),
}

#[derive(Clone, Debug, Drive, DriveMut, Serialize)]
pub struct Node {
  #[drive(skip)]
  pub id: NodeId,
  #[drive(skip)]
  pub kind: NodeKind,
  pub children: Vec<Node>,
  #[drive(skip)]
  #[serde(skip_serializing_if = "Option::is_none")]
  pub datum: Option<Datum>,
  #[drive(skip)]
  #[serde(skip_serializing_if = "Props::is_empty")]
  pub props: Props,
}

impl Node {
  pub fn new(kind: NodeKind, children: Vec<Node>, datum: Option<Datum>) -> Node {
    Node {
      id: NodeId::default(),
      kind,
      children,
      datum,
      props: Props::default(),
    }
  }

  pub fn var(&self) -> Option<VarId> {
    match self.datum {
      Some(Datum::Var(var)) => Some(var),
      _ => None,
    }
  }

  pub fn label(&self) -> Option<LabelId> {
    match self.datum {
      Some(Datum::Label(label)) => Some(label),
      _ => None,
    }
  }

  pub fn unit(&self) -> Option<UnitId> {
    match self.datum {
      Some(Datum::Unit(unit)) => Some(unit),
      _ => None,
    }
  }

  pub fn temp(&self) -> Option<TempId> {
    match self.datum {
      Some(Datum::Temp(temp)) => Some(temp),
      _ => None,
    }
  }

  pub fn number_value(&self) -> Option<f64> {
    match self.datum {
      Some(Datum::Number(value)) => Some(value),
      _ => None,
    }
  }

  pub fn string_value(&self) -> Option<&str> {
    match &self.datum {
      Some(Datum::String(value)) => Some(value),
      _ => None,
    }
  }

  pub fn first(&self) -> Option<&Node> {
    self.children.first()
  }

  /// The variable read by this node, if it is a `GetVar`.
  pub fn read_var(&self) -> Option<VarId> {
    match self.kind {
      NodeKind::GetVar => self.var(),
      _ => None,
    }
  }

  /// Whether the node leaves an unboxed number once lowered. Comparisons tag
  /// their operands but produce booleans; element accesses tag only the index.
  pub fn yields_number(&self) -> bool {
    match self.kind {
      NodeKind::Binary(op) if op.is_relational() => false,
      NodeKind::ExprStmt | NodeKind::GetElem | NodeKind::SetElem => false,
      _ => self.props.is_number(),
    }
  }

  /// Call and `New` argument count; the first child is the call target.
  pub fn arg_count(&self) -> usize {
    self.children.len().saturating_sub(1)
  }

  /// Replaces this node in place with `kind` wrapping the original node.
  pub fn wrap(&mut self, kind: NodeKind, id: NodeId) {
    let inner = std::mem::replace(self, Node::new(NodeKind::Empty, Vec::new(), None));
    *self = Node::new(kind, vec![inner], None);
    self.id = id;
  }
}
