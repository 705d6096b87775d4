use super::node::TempId;
use crate::cfg::cfg::BlockId;
use crate::unit::vars::TypeUnion;
use crate::unit::UnitId;
use serde::Serialize;

/// Which operands of an operator are already primitive numbers, so the backend
/// can skip the dynamic coercion for them. On a leaf or an assignment, `Both`
/// means the value itself is held unboxed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NumericOperands {
  Both,
  Left,
  Right,
}

/// Analysis annotations attached to a node. Each field is written by exactly one
/// pipeline stage and only read by later ones.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Props {
  /// Block a jump transfers to, or the block a label begins. Set by the CFG builder.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub target_block: Option<BlockId>,
  /// Fixpoint type of the value stored by a definition point. Set by type flow.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub inferred_type: Option<TypeUnion>,
  /// Set by the number rewrite.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub numeric: Option<NumericOperands>,
  /// Parameter read in a direct-call target. The backend reads it from the
  /// (value, number) argument pair; with `numeric = Both` it takes the number.
  #[serde(skip_serializing_if = "std::ops::Not::not")]
  pub direct_param: bool,
  /// Statically expected callee of a call site. Set by direct-call discovery.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub direct_call: Option<UnitId>,
  /// This evaluation also stores its value into the temporary. Set by local CSE.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub cse_store: Option<TempId>,
}

impl Props {
  pub fn is_empty(&self) -> bool {
    *self == Props::default()
  }

  pub fn is_number(&self) -> bool {
    self.numeric == Some(NumericOperands::Both)
  }
}
