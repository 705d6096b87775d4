use crate::ir::node::{LabelId, NodeKind};
use crate::unit::vars::VarId;
use crate::unit::{UnitId, UnitState};
use thiserror::Error;

/// Failure scoped to one compilation unit. Sibling units are unaffected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum OptError {
  #[error("unit {unit}: jump to undeclared label {label}")]
  UnknownJumpTarget { unit: UnitId, label: LabelId },
  #[error("unit {unit}: label {label} is declared more than once")]
  DuplicateLabel { unit: UnitId, label: LabelId },
  #[error("unit {unit}: malformed {kind:?} node: {reason}")]
  MalformedNode {
    unit: UnitId,
    kind: NodeKind,
    reason: &'static str,
  },
  #[error("unit {unit}: reference to undeclared variable {var}")]
  UnknownVariable { unit: UnitId, var: VarId },
  #[error("unit {unit}: function declaration refers to {target}, which is not a child unit")]
  UnknownUnit { unit: UnitId, target: UnitId },
  #[error("unit {unit} cannot be lowered in state {state:?}")]
  NotReady { unit: UnitId, state: UnitState },
  #[error("unit {unit}: frame needs more than {} words", u16::MAX)]
  FrameTooLarge { unit: UnitId },
  #[error("unit {unit}: no label ids left for the backend")]
  LabelsExhausted { unit: UnitId },
}

impl OptError {
  /// Stable diagnostic code.
  pub fn code(&self) -> &'static str {
    match self {
      OptError::UnknownJumpTarget { .. } => "OPT0101",
      OptError::DuplicateLabel { .. } => "OPT0102",
      OptError::MalformedNode { .. } => "OPT0103",
      OptError::UnknownVariable { .. } => "OPT0104",
      OptError::UnknownUnit { .. } => "OPT0105",
      OptError::NotReady { .. } => "OPT0201",
      OptError::FrameTooLarge { .. } => "OPT0202",
      OptError::LabelsExhausted { .. } => "OPT0203",
    }
  }

  pub fn unit(&self) -> UnitId {
    match self {
      OptError::UnknownJumpTarget { unit, .. }
      | OptError::DuplicateLabel { unit, .. }
      | OptError::MalformedNode { unit, .. }
      | OptError::UnknownVariable { unit, .. }
      | OptError::UnknownUnit { unit, .. }
      | OptError::NotReady { unit, .. }
      | OptError::FrameTooLarge { unit }
      | OptError::LabelsExhausted { unit } => *unit,
    }
  }
}

pub type OptimizeResult<T> = Result<T, OptError>;
