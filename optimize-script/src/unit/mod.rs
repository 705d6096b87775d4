pub mod script;
pub mod vars;

use crate::cfg::cfg::Cfg;
use crate::error::OptError;
use crate::ir::node::{Node, NodeId};
use crate::util::debug::OptimizerDebug;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use vars::VariableTable;

/// Index of a compilation unit within its script. Unit 0 is the top level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct UnitId(pub u32);

impl UnitId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for UnitId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "u{}", self.0)
  }
}

/// Per-unit pipeline position. Transitions are strictly sequential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum UnitState {
  Unskipped,
  BlocksBuilt,
  LivenessComputed,
  TypesComputed,
  Specialized,
  ReadyForLowering,
  /// The unit needs a full activation record, or optimization is off.
  Skipped,
  /// A unit-scoped error stopped the pipeline.
  Failed,
}

impl UnitState {
  fn rank(self) -> Option<u8> {
    match self {
      UnitState::Unskipped => Some(0),
      UnitState::BlocksBuilt => Some(1),
      UnitState::LivenessComputed => Some(2),
      UnitState::TypesComputed => Some(3),
      UnitState::Specialized => Some(4),
      UnitState::ReadyForLowering => Some(5),
      UnitState::Skipped | UnitState::Failed => None,
    }
  }

  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      UnitState::ReadyForLowering | UnitState::Skipped | UnitState::Failed
    )
  }

  fn can_advance_to(self, next: UnitState) -> bool {
    match (self.rank(), next.rank()) {
      (Some(a), Some(b)) => b == a + 1,
      _ => match next {
        UnitState::Skipped => self == UnitState::Unskipped,
        UnitState::Failed => !self.is_terminal(),
        _ => false,
      },
    }
  }
}

/// One function (or the top-level script) and everything the pipeline learns about it.
#[derive(Debug)]
pub struct CompilationUnit {
  pub id: UnitId,
  pub name: Option<String>,
  pub parent: Option<UnitId>,
  /// Flattened body, in statement-index order.
  pub statements: Vec<Node>,
  pub vars: VariableTable,
  pub cfg: Cfg,
  pub requires_activation: bool,
  pub is_direct_call_target: bool,
  /// Units this unit calls through the direct-call convention.
  pub direct_callees: BTreeSet<UnitId>,
  /// A parameter of this direct-call target is consumed as a number.
  pub parameter_number_context: bool,
  /// Temporaries introduced by local CSE.
  pub temp_count: u32,
  pub debug: Option<OptimizerDebug>,
  pub(crate) next_node_id: u32,
  state: UnitState,
  failure: Option<OptError>,
}

impl CompilationUnit {
  pub(crate) fn new(
    id: UnitId,
    name: Option<String>,
    parent: Option<UnitId>,
    statements: Vec<Node>,
    vars: VariableTable,
    requires_activation: bool,
    next_node_id: u32,
  ) -> Self {
    Self {
      id,
      name,
      parent,
      statements,
      vars,
      cfg: Cfg::default(),
      requires_activation,
      is_direct_call_target: false,
      direct_callees: BTreeSet::new(),
      parameter_number_context: false,
      temp_count: 0,
      debug: None,
      next_node_id,
      state: UnitState::Unskipped,
      failure: None,
    }
  }

  pub fn state(&self) -> UnitState {
    self.state
  }

  /// The error that moved this unit to `Failed`.
  pub fn failure(&self) -> Option<&OptError> {
    self.failure.as_ref()
  }

  pub fn param_count(&self) -> usize {
    self.vars.param_count()
  }

  pub(crate) fn advance(&mut self, next: UnitState) {
    debug_assert!(
      self.state.can_advance_to(next),
      "unit {} cannot move from {:?} to {:?}",
      self.id,
      self.state,
      next
    );
    log::trace!("unit {}: {:?} -> {:?}", self.id, self.state, next);
    self.state = next;
  }

  pub(crate) fn fail(&mut self, err: OptError) {
    log::debug!("unit {} failed in {:?}: {err}", self.id, self.state);
    self.advance(UnitState::Failed);
    self.failure = Some(err);
  }

  /// Asserts that the stage producing the annotations a pass reads has run.
  pub(crate) fn require(&self, at_least: UnitState) {
    debug_assert!(
      matches!((self.state.rank(), at_least.rank()), (Some(have), Some(need)) if have >= need),
      "unit {} is at {:?} but the pass needs {:?}",
      self.id,
      self.state,
      at_least
    );
  }
}

pub(crate) fn fresh_node_id(next: &mut u32) -> NodeId {
  let id = NodeId(*next);
  *next += 1;
  id
}
