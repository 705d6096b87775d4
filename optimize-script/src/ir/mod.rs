pub mod build;
pub mod node;
pub mod props;

use derive_visitor::{DriveMut, VisitorMut};
use node::{Node, NodeId};

/// Linearizes a function body: `Block` and `Loop` containers are dissolved
/// into their statements, keeping relative order.
pub fn flatten_statements(body: Vec<Node>) -> Vec<Node> {
  fn flatten_into(node: Node, out: &mut Vec<Node>) {
    if node.kind.is_container() {
      for child in node.children {
        flatten_into(child, out);
      }
    } else {
      out.push(node);
    }
  }

  let mut out = Vec::with_capacity(body.len());
  for stmt in body {
    flatten_into(stmt, &mut out);
  }
  out
}

#[derive(VisitorMut)]
#[visitor(Node(enter))]
struct NodeNumberer {
  next: u32,
}

impl NodeNumberer {
  fn enter_node(&mut self, node: &mut Node) {
    node.id = NodeId(self.next);
    self.next += 1;
  }
}

/// Assigns dense pre-order ids to every node. Returns the number of ids used.
pub fn number_nodes(statements: &mut Vec<Node>) -> u32 {
  let mut numberer = NodeNumberer { next: 0 };
  statements.drive_mut(&mut numberer);
  numberer.next
}
