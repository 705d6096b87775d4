//! Interface between the optimizer and a code generator.
//!
//! A backend sees each finished unit through a [`LoweringUnit`]: the rewritten
//! IR, its CFG and a [`SlotAllocator`] over the unit's variables. Direct-call
//! facts are exposed as a [`DirectEntry`] for callees and a [`CallSitePlan`]
//! per tagged call site.

pub mod listing;

use crate::cfg::cfg::Cfg;
use crate::error::{OptError, OptimizeResult};
use crate::ir::node::{LabelId, Node, NodeId, NodeKind};
use crate::unit::script::Script;
use crate::unit::vars::{RegisterSlot, VarId, VariableTable};
use crate::unit::{CompilationUnit, UnitId, UnitState};
use derive_visitor::{Drive, Visitor};
use serde::Serialize;

/// Hands out machine slots on first use. Specialized variables and the
/// parameters of a direct-call target take two words; everything else one.
/// The whole frame must fit in `u16` words.
pub struct SlotAllocator<'a> {
  unit: UnitId,
  vars: &'a mut VariableTable,
  direct_call_target: bool,
  next: u16,
}

impl<'a> SlotAllocator<'a> {
  pub fn new(unit: UnitId, vars: &'a mut VariableTable, direct_call_target: bool) -> Self {
    // Assigned slots always end inside the frame, so this cannot saturate.
    let next = vars
      .iter()
      .filter_map(|(_, v)| v.assigned_register())
      .map(|slot| slot.index.saturating_add(u16::from(slot.width)))
      .max()
      .unwrap_or(0);
    Self {
      unit,
      vars,
      direct_call_target,
      next,
    }
  }

  pub fn vars(&self) -> &VariableTable {
    self.vars
  }

  pub fn slot(&mut self, var: VarId) -> OptimizeResult<RegisterSlot> {
    if let Some(slot) = self.vars.get(var).assigned_register() {
      return Ok(slot);
    }
    let width = self.vars.slot_width(var, self.direct_call_target);
    let end = self
      .next
      .checked_add(u16::from(width))
      .ok_or(OptError::FrameTooLarge { unit: self.unit })?;
    let slot = self.vars.assign_register(var, RegisterSlot {
      index: self.next,
      width,
    });
    self.next = end;
    Ok(slot)
  }

  /// Words used by every slot handed out so far.
  pub fn frame_size(&self) -> u16 {
    self.next
  }
}

/// One parameter of a direct-call entry: the generic value word and the
/// primitive number word next to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParamPair {
  pub var: VarId,
  pub value: u16,
  pub number: u16,
}

/// Secondary entry point of a direct-call target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirectEntry {
  pub unit: UnitId,
  pub params: Vec<ParamPair>,
  /// Some parameter is used as a number, so callers should pass numbers unboxed.
  pub parameter_number_context: bool,
}

/// A call site the optimizer resolved statically. The backend emits a guard on
/// callee identity: the fast path enters `callee` directly, the slow path is a
/// generic call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CallSitePlan {
  pub node: NodeId,
  pub callee: UnitId,
  pub callee_name: String,
  pub construct: bool,
  /// Per argument, whether it is passed unboxed.
  pub numeric_args: Vec<bool>,
}

#[derive(Visitor)]
#[visitor(Node(enter))]
struct CallSiteCollector {
  plans: Vec<CallSitePlan>,
}

impl CallSiteCollector {
  fn enter_node(&mut self, node: &Node) {
    let Some(callee) = node.props.direct_call else {
      return;
    };
    self.plans.push(CallSitePlan {
      node: node.id,
      callee,
      callee_name: node
        .first()
        .and_then(Node::string_value)
        .unwrap_or_default()
        .to_string(),
      construct: node.kind == NodeKind::New,
      numeric_args: node
        .children
        .iter()
        .skip(1)
        .map(|arg| arg.props.is_number())
        .collect(),
    });
  }
}

/// Read-only view of a unit that finished the pipeline, plus mutable access to
/// its slot assignment.
pub struct LoweringUnit<'a> {
  pub id: UnitId,
  pub name: Option<&'a str>,
  pub statements: &'a [Node],
  pub cfg: &'a Cfg,
  pub slots: SlotAllocator<'a>,
  /// False when the unit was skipped and its IR carries no annotations.
  pub optimized: bool,
  pub direct_call_target: bool,
  pub parameter_number_context: bool,
  pub temp_count: u32,
}

impl<'a> LoweringUnit<'a> {
  pub fn new(unit: &'a mut CompilationUnit) -> OptimizeResult<Self> {
    let state = unit.state();
    if !matches!(state, UnitState::ReadyForLowering | UnitState::Skipped) {
      return Err(OptError::NotReady {
        unit: unit.id,
        state,
      });
    }
    Ok(Self {
      id: unit.id,
      name: unit.name.as_deref(),
      statements: &unit.statements,
      cfg: &unit.cfg,
      slots: SlotAllocator::new(unit.id, &mut unit.vars, unit.is_direct_call_target),
      optimized: state == UnitState::ReadyForLowering,
      direct_call_target: unit.is_direct_call_target,
      parameter_number_context: unit.parameter_number_context,
      temp_count: unit.temp_count,
    })
  }

  /// Allocates the parameter pairs. Only direct-call targets have one.
  pub fn direct_entry(&mut self) -> OptimizeResult<Option<DirectEntry>> {
    if !self.direct_call_target {
      return Ok(None);
    }
    let params = (0..self.slots.vars().param_count())
      .map(|i| {
        let var = VarId(i as u32);
        // Pairs are two words wide, so the number word is still in the frame.
        let slot = self.slots.slot(var)?;
        Ok(ParamPair {
          var,
          value: slot.index,
          number: slot.index + 1,
        })
      })
      .collect::<OptimizeResult<Vec<_>>>()?;
    Ok(Some(DirectEntry {
      unit: self.id,
      params,
      parameter_number_context: self.parameter_number_context,
    }))
  }

  pub fn call_sites(&self) -> Vec<CallSitePlan> {
    let mut collector = CallSiteCollector { plans: Vec::new() };
    for stmt in self.statements.iter() {
      stmt.drive(&mut collector);
    }
    collector.plans
  }

  /// First label id not used by the unit, for labels the backend invents.
  pub fn next_free_label(&self) -> OptimizeResult<LabelId> {
    let mut next = 0;
    for label in self.statements.iter().filter_map(Node::label) {
      let after = label
        .0
        .checked_add(1)
        .ok_or(OptError::LabelsExhausted { unit: self.id })?;
      next = next.max(after);
    }
    Ok(LabelId(next))
  }
}

pub trait Backend {
  type Output;

  fn lower_unit(&mut self, unit: &mut LoweringUnit<'_>) -> OptimizeResult<Self::Output>;
}

/// Lowers every unit in id order. A unit that is not ready or fails to lower
/// gets its error in place of an output; the remaining units are still lowered.
pub fn lower_script<B: Backend>(
  script: &mut Script,
  backend: &mut B,
) -> Vec<(UnitId, OptimizeResult<B::Output>)> {
  script
    .units
    .iter_mut()
    .map(|unit| {
      let id = unit.id;
      let out = LoweringUnit::new(unit).and_then(|mut lowering| backend.lower_unit(&mut lowering));
      if let Err(err) = &out {
        log::debug!("unit {id} not lowered: {err}");
      }
      (id, out)
    })
    .collect()
}
