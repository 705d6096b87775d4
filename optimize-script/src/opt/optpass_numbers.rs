use crate::ir::node::{BinOp, Node, NodeKind};
use crate::ir::props::NumericOperands;
use crate::opt::PassResult;
use crate::unit::vars::VariableTable;
use crate::unit::{fresh_node_id, CompilationUnit, UnitState};

/// Representation a rewritten expression produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Repr {
  Boxed,
  Number,
}

struct NumberRewriter<'a> {
  vars: &'a VariableTable,
  next_node_id: &'a mut u32,
  /// The unit is entered through the direct-call convention, so its parameters
  /// arrive as (value, number) pairs.
  in_direct_call: bool,
  parameter_number_context: bool,
  result: PassResult,
}

impl NumberRewriter<'_> {
  fn is_direct_param(&self, node: &Node) -> bool {
    self.in_direct_call
      && node
        .read_var()
        .map_or(false, |var| self.vars.is_parameter(var))
  }

  /// A direct-call parameter in a context that needs a boxed value is read from
  /// the value half of its pair rather than coerced. Returns whether `node` is
  /// such a parameter.
  fn convert_parameter(&mut self, node: &mut Node) -> bool {
    if !self.is_direct_param(node) {
      return false;
    }
    node.props.numeric = None;
    true
  }

  fn mark_number_context(&mut self, node: &Node) {
    if self.is_direct_param(node) {
      self.parameter_number_context = true;
    }
  }

  fn tag(&mut self, node: &mut Node, numeric: Option<NumericOperands>) {
    if numeric.is_some() {
      node.props.numeric = numeric;
      self.result.mark_changed();
    }
  }

  fn wrap(&mut self, node: &mut Node, kind: NodeKind) {
    node.wrap(kind, fresh_node_id(self.next_node_id));
    if kind == NodeKind::ToNumber {
      node.props.numeric = Some(NumericOperands::Both);
    }
    self.result.mark_changed();
  }

  fn rewrite_as_object(&mut self, node: &mut Node) {
    if self.rewrite(node, Repr::Boxed) == Repr::Number && !self.convert_parameter(node) {
      self.wrap(node, NodeKind::ToObject);
    }
  }

  fn rewrite_as_object_children(&mut self, node: &mut Node, from: usize) {
    for child in node.children.iter_mut().skip(from) {
      self.rewrite_as_object(child);
    }
  }

  fn rewrite(&mut self, node: &mut Node, desired: Repr) -> Repr {
    match node.kind {
      NodeKind::ExprStmt => {
        if let Some(expr) = node.children.first_mut() {
          if self.rewrite(expr, Repr::Number) == Repr::Number {
            self.tag(node, Some(NumericOperands::Both));
          }
        }
        Repr::Boxed
      }

      NodeKind::Number => {
        self.tag(node, Some(NumericOperands::Both));
        Repr::Number
      }

      NodeKind::GetVar => {
        let Some(var) = node.var() else {
          return Repr::Boxed;
        };
        if self.in_direct_call && self.vars.is_parameter(var) {
          node.props.direct_param = true;
          if desired == Repr::Number {
            self.tag(node, Some(NumericOperands::Both));
            return Repr::Number;
          }
          Repr::Boxed
        } else if self.vars.is_number(var) {
          self.tag(node, Some(NumericOperands::Both));
          Repr::Number
        } else {
          Repr::Boxed
        }
      }

      NodeKind::Inc { .. } | NodeKind::Dec { .. } => {
        let Some(operand) = node.children.first_mut() else {
          return Repr::Boxed;
        };
        let repr = self.rewrite(operand, Repr::Number);
        if operand.kind == NodeKind::GetVar
          && repr == Repr::Number
          && !self.convert_parameter(operand)
        {
          self.tag(node, Some(NumericOperands::Both));
          return Repr::Number;
        }
        Repr::Boxed
      }

      NodeKind::SetVar => {
        let Some(var) = node.var() else {
          return Repr::Boxed;
        };
        let Some(rhs) = node.children.first_mut() else {
          return Repr::Boxed;
        };
        let rhs_repr = self.rewrite(rhs, Repr::Number);
        if self.in_direct_call && self.vars.is_parameter(var) {
          if rhs_repr != Repr::Number {
            return rhs_repr;
          }
          if self.convert_parameter(rhs) {
            self.mark_number_context(rhs);
            return Repr::Boxed;
          }
          self.tag(node, Some(NumericOperands::Both));
          Repr::Number
        } else if self.vars.is_number(var) {
          self.mark_number_context(rhs);
          if rhs_repr != Repr::Number {
            self.wrap(rhs, NodeKind::ToNumber);
          }
          self.tag(node, Some(NumericOperands::Both));
          Repr::Number
        } else {
          if rhs_repr == Repr::Number && !self.convert_parameter(rhs) {
            self.wrap(rhs, NodeKind::ToObject);
          }
          Repr::Boxed
        }
      }

      NodeKind::Binary(op) if op.is_relational() || op == BinOp::Add => {
        let [left, right] = node.children.as_mut_slice() else {
          return Repr::Boxed;
        };
        let l = self.rewrite(left, Repr::Number) == Repr::Number;
        let r = self.rewrite(right, Repr::Number) == Repr::Number;
        if op.is_relational() {
          self.mark_number_context(left);
          self.mark_number_context(right);
        }
        let l_param = self.convert_parameter(left);
        let r_param = self.convert_parameter(right);
        let numeric = match (l_param, r_param) {
          (true, true) => None,
          (true, false) => r.then_some(NumericOperands::Right),
          (false, true) => l.then_some(NumericOperands::Left),
          (false, false) => match (l, r) {
            (true, true) => Some(NumericOperands::Both),
            (true, false) => Some(NumericOperands::Left),
            (false, true) => Some(NumericOperands::Right),
            (false, false) => None,
          },
        };
        self.tag(node, numeric);
        // Comparisons produce booleans; `+` is a number only when both sides are.
        if op == BinOp::Add && numeric == Some(NumericOperands::Both) {
          Repr::Number
        } else {
          Repr::Boxed
        }
      }

      NodeKind::Binary(op) if op.is_numeric() => {
        let [left, right] = node.children.as_mut_slice() else {
          return Repr::Boxed;
        };
        for operand in [left, right] {
          let repr = self.rewrite(operand, Repr::Number);
          self.mark_number_context(operand);
          // A direct parameter always answers `Number` here, so only genuinely
          // boxed operands are coerced.
          if repr == Repr::Boxed {
            self.wrap(operand, NodeKind::ToNumber);
          }
        }
        self.tag(node, Some(NumericOperands::Both));
        Repr::Number
      }

      NodeKind::Unary(op) if op.is_numeric() => {
        let Some(operand) = node.children.first_mut() else {
          return Repr::Boxed;
        };
        let repr = self.rewrite(operand, Repr::Number);
        self.mark_number_context(operand);
        if repr == Repr::Boxed {
          self.wrap(operand, NodeKind::ToNumber);
        }
        self.tag(node, Some(NumericOperands::Both));
        Repr::Number
      }

      NodeKind::GetElem | NodeKind::SetElem => {
        let mut children = node.children.iter_mut();
        let (Some(object), Some(index)) = (children.next(), children.next()) else {
          return Repr::Boxed;
        };
        if self.rewrite(object, Repr::Number) == Repr::Number && !self.convert_parameter(object) {
          self.wrap(object, NodeKind::ToObject);
        }
        let numeric_index =
          self.rewrite(index, Repr::Number) == Repr::Number && !self.convert_parameter(index);
        if let Some(value) = children.next() {
          if self.rewrite(value, Repr::Number) == Repr::Number && !self.convert_parameter(value) {
            self.wrap(value, NodeKind::ToObject);
          }
        }
        if numeric_index {
          self.tag(node, Some(NumericOperands::Right));
        }
        Repr::Boxed
      }

      NodeKind::Call | NodeKind::New => {
        if node.props.direct_call.is_none() {
          self.rewrite_as_object_children(node, 0);
          return Repr::Boxed;
        }
        let mut children = node.children.iter_mut();
        if let Some(target) = children.next() {
          self.rewrite_as_object(target);
        }
        // Passed as (value, number) pairs, so numbers stay unboxed.
        for arg in children {
          if self.rewrite(arg, Repr::Number) == Repr::Number {
            self.mark_number_context(arg);
          }
        }
        Repr::Boxed
      }

      _ => {
        self.rewrite_as_object_children(node, 0);
        Repr::Boxed
      }
    }
  }
}

/// Tags operations on specialized variables so they run on unboxed numbers,
/// and inserts explicit coercions where a number meets a boxed value.
pub fn optpass_numbers(unit: &mut CompilationUnit) -> PassResult {
  unit.require(UnitState::TypesComputed);
  let mut rewriter = NumberRewriter {
    vars: &unit.vars,
    next_node_id: &mut unit.next_node_id,
    in_direct_call: unit.is_direct_call_target,
    parameter_number_context: false,
    result: PassResult::default(),
  };
  for stmt in unit.statements.iter_mut() {
    rewriter.rewrite(stmt, Repr::Number);
  }
  let NumberRewriter {
    parameter_number_context,
    result,
    ..
  } = rewriter;
  unit.parameter_number_context = parameter_number_context;
  result
}
