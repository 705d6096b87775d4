//! Constructors used by front-ends (and tests) to assemble resolved IR.

use super::node::{BinOp, Datum, LabelId, Node, NodeKind, UnOp};
use crate::unit::vars::VarId;
use crate::unit::UnitId;

impl Node {
  fn leaf(kind: NodeKind, datum: Option<Datum>) -> Node {
    Node::new(kind, Vec::new(), datum)
  }

  pub fn number(value: f64) -> Node {
    Node::leaf(NodeKind::Number, Some(Datum::Number(value)))
  }

  pub fn string(value: impl Into<String>) -> Node {
    Node::leaf(NodeKind::String, Some(Datum::String(value.into())))
  }

  pub fn boolean(value: bool) -> Node {
    Node::leaf(NodeKind::Boolean, Some(Datum::Boolean(value)))
  }

  pub fn null() -> Node {
    Node::leaf(NodeKind::Null, None)
  }

  pub fn undefined() -> Node {
    Node::leaf(NodeKind::Undefined, None)
  }

  pub fn this() -> Node {
    Node::leaf(NodeKind::This, None)
  }

  /// Read of a name that is not a local of the unit.
  pub fn name(name: impl Into<String>) -> Node {
    Node::leaf(NodeKind::Name, Some(Datum::String(name.into())))
  }

  pub fn get_var(var: VarId) -> Node {
    Node::leaf(NodeKind::GetVar, Some(Datum::Var(var)))
  }

  pub fn set_var(var: VarId, value: Node) -> Node {
    Node::new(NodeKind::SetVar, vec![value], Some(Datum::Var(var)))
  }

  pub fn get_prop(object: Node, prop: impl Into<String>) -> Node {
    Node::new(
      NodeKind::GetProp,
      vec![object],
      Some(Datum::String(prop.into())),
    )
  }

  pub fn set_prop(object: Node, prop: impl Into<String>, value: Node) -> Node {
    Node::new(
      NodeKind::SetProp,
      vec![object, value],
      Some(Datum::String(prop.into())),
    )
  }

  pub fn get_elem(object: Node, index: Node) -> Node {
    Node::new(NodeKind::GetElem, vec![object, index], None)
  }

  pub fn set_elem(object: Node, index: Node, value: Node) -> Node {
    Node::new(NodeKind::SetElem, vec![object, index, value], None)
  }

  pub fn call(target: Node, args: Vec<Node>) -> Node {
    let mut children = vec![target];
    children.extend(args);
    Node::new(NodeKind::Call, children, None)
  }

  pub fn new_call(target: Node, args: Vec<Node>) -> Node {
    let mut children = vec![target];
    children.extend(args);
    Node::new(NodeKind::New, children, None)
  }

  pub fn bin(op: BinOp, left: Node, right: Node) -> Node {
    Node::new(NodeKind::Binary(op), vec![left, right], None)
  }

  pub fn unary(op: UnOp, operand: Node) -> Node {
    Node::new(NodeKind::Unary(op), vec![operand], None)
  }

  pub fn inc(operand: Node, post: bool) -> Node {
    Node::new(NodeKind::Inc { post }, vec![operand], None)
  }

  pub fn dec(operand: Node, post: bool) -> Node {
    Node::new(NodeKind::Dec { post }, vec![operand], None)
  }

  pub fn hook(cond: Node, then: Node, otherwise: Node) -> Node {
    Node::new(NodeKind::Hook, vec![cond, then, otherwise], None)
  }

  pub fn and(left: Node, right: Node) -> Node {
    Node::new(NodeKind::And, vec![left, right], None)
  }

  pub fn or(left: Node, right: Node) -> Node {
    Node::new(NodeKind::Or, vec![left, right], None)
  }

  pub fn comma(exprs: Vec<Node>) -> Node {
    Node::new(NodeKind::Comma, exprs, None)
  }

  pub fn array_lit(elems: Vec<Node>) -> Node {
    Node::new(NodeKind::ArrayLit, elems, None)
  }

  /// Object literal; each member becomes a key string followed by its value.
  pub fn object_lit(members: Vec<(String, Node)>) -> Node {
    let children = members
      .into_iter()
      .flat_map(|(key, value)| [Node::string(key), value])
      .collect();
    Node::new(NodeKind::ObjectLit, children, None)
  }

  pub fn expr_stmt(expr: Node) -> Node {
    Node::new(NodeKind::ExprStmt, vec![expr], None)
  }

  pub fn ret(value: Option<Node>) -> Node {
    Node::new(NodeKind::Return, value.into_iter().collect(), None)
  }

  pub fn throw(value: Node) -> Node {
    Node::new(NodeKind::Throw, vec![value], None)
  }

  pub fn block(stmts: Vec<Node>) -> Node {
    Node::new(NodeKind::Block, stmts, None)
  }

  /// Loop body whose back edges are already explicit `Target`/jump statements.
  pub fn loop_block(stmts: Vec<Node>) -> Node {
    Node::new(NodeKind::Loop, stmts, None)
  }

  pub fn target(label: LabelId) -> Node {
    Node::leaf(NodeKind::Target, Some(Datum::Label(label)))
  }

  pub fn goto(label: LabelId) -> Node {
    Node::leaf(NodeKind::Goto, Some(Datum::Label(label)))
  }

  /// Jumps to `label` when `cond` is truthy.
  pub fn if_eq(cond: Node, label: LabelId) -> Node {
    Node::new(NodeKind::IfEq, vec![cond], Some(Datum::Label(label)))
  }

  /// Jumps to `label` when `cond` is falsy.
  pub fn if_ne(cond: Node, label: LabelId) -> Node {
    Node::new(NodeKind::IfNe, vec![cond], Some(Datum::Label(label)))
  }

  /// Function declaration statement; the body is the separate unit `unit`.
  pub fn function(unit: UnitId) -> Node {
    Node::leaf(NodeKind::Function, Some(Datum::Unit(unit)))
  }

  pub fn empty() -> Node {
    Node::leaf(NodeKind::Empty, None)
  }
}
