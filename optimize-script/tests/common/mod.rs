#![allow(dead_code)]

use optimize_script::ir::node::{Node, NodeKind};
use optimize_script::unit::vars::VarId;
use optimize_script::{OptimizerOptions, Script, ScriptBuilder, ScriptReport};

pub fn serial() -> OptimizerOptions {
  OptimizerOptions {
    parallel: false,
    ..OptimizerOptions::default()
  }
}

pub fn optimize(sb: ScriptBuilder, options: &OptimizerOptions) -> (Script, ScriptReport) {
  let mut script = sb.finish();
  let report = script.optimize(options);
  (script, report)
}

pub fn assign(var: VarId, value: Node) -> Node {
  Node::expr_stmt(Node::set_var(var, value))
}

pub fn call(name: &str, args: Vec<Node>) -> Node {
  Node::call(Node::name(name), args)
}

/// `print(v);`
pub fn print(var: VarId) -> Node {
  Node::expr_stmt(call("print", vec![Node::get_var(var)]))
}

/// Visits every node of `stmt` in pre-order.
pub fn walk<'a>(stmt: &'a Node, f: &mut impl FnMut(&'a Node)) {
  f(stmt);
  for child in stmt.children.iter() {
    walk(child, f);
  }
}

/// All call and `new` nodes of the statements, in pre-order.
pub fn call_sites(statements: &[Node]) -> Vec<&Node> {
  let mut out = Vec::new();
  for stmt in statements {
    walk(stmt, &mut |n| {
      if matches!(n.kind, NodeKind::Call | NodeKind::New) {
        out.push(n);
      }
    });
  }
  out
}
