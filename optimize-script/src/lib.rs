pub mod analysis;
pub mod cfg;
pub mod error;
pub mod ir;
pub mod lower;
pub mod opt;
pub mod options;
pub mod unit;
pub mod util;

use analysis::liveness::compute_liveness;
use analysis::typeflow::compute_types;
use cfg::bblock::build_blocks;
use cfg::cfg::BasicBlock;
use opt::optpass_direct_calls::{optpass_direct_calls, revoke_failed_targets};
use opt::optpass_local_cse::optpass_local_cse;
use opt::optpass_numbers::optpass_numbers;
use opt::PassResult;
use rayon::prelude::*;
use util::debug::OptimizerDebug;

pub use error::{OptError, OptimizeResult};
pub use options::{OptLevel, OptimizerOptions};
pub use unit::script::{Script, ScriptBuilder, UnitBuilder};
pub use unit::{CompilationUnit, UnitId, UnitState};

fn run_pipeline(unit: &mut CompilationUnit, dbg: &mut Option<OptimizerDebug>) -> OptimizeResult<()> {
  let mut dbg_checkpoint = |name: &str, unit: &CompilationUnit| {
    if let Some(dbg) = dbg.as_mut() {
      dbg.add_step(name, &unit.cfg, &unit.vars, &unit.statements);
    }
  };
  dbg_checkpoint("source", unit);

  unit.cfg = build_blocks(unit.id, &mut unit.statements, unit.vars.len())?;
  if log::log_enabled!(log::Level::Trace) {
    log::trace!(
      "unit {}: largest block has {} statements, unreachable blocks {:?}",
      unit.id,
      unit
        .cfg
        .blocks
        .iter()
        .map(BasicBlock::statement_count)
        .max()
        .unwrap_or(0),
      unit.cfg.find_unreachable()
    );
  }
  unit.advance(UnitState::BlocksBuilt);
  dbg_checkpoint("blocks", unit);

  let stats = compute_liveness(&mut unit.cfg, &unit.statements);
  log::trace!(
    "unit {}: liveness converged after {} sweeps",
    unit.id,
    stats.sweeps
  );
  unit.advance(UnitState::LivenessComputed);
  dbg_checkpoint("liveness", unit);

  let stats = compute_types(&mut unit.cfg, &mut unit.statements, &mut unit.vars);
  log::trace!(
    "unit {}: type flow converged after {} sweeps",
    unit.id,
    stats.sweeps
  );
  unit.advance(UnitState::TypesComputed);
  dbg_checkpoint("types", unit);

  let numbers = optpass_numbers(unit);
  unit.advance(UnitState::Specialized);
  dbg_checkpoint("numbers", unit);

  let cse = optpass_local_cse(unit);
  unit.advance(UnitState::ReadyForLowering);
  dbg_checkpoint("local_cse", unit);

  log::debug!(
    "unit {}: {} blocks, {} number rewrites, {} cse reuses",
    unit.id,
    unit.cfg.len(),
    numbers.rewrites,
    cse.rewrites
  );
  Ok(())
}

/// Runs the per-unit pipeline: blocks, liveness, types, number rewrite, local
/// CSE. Direct-call discovery must already have run over the whole script.
///
/// Units that need an activation record, and every unit when optimization is
/// off, go straight to `Skipped`. Units that already left `Unskipped` are not
/// touched. On error the unit moves to `Failed` and keeps the error.
pub fn optimize_unit(unit: &mut CompilationUnit, options: &OptimizerOptions) -> OptimizeResult<()> {
  if unit.state() != UnitState::Unskipped {
    return Ok(());
  }
  if !options.enabled() || unit.requires_activation {
    unit.advance(UnitState::Skipped);
    return Ok(());
  }

  let mut dbg = options.debug.then(OptimizerDebug::new);
  let res = run_pipeline(unit, &mut dbg);
  unit.debug = dbg;
  if let Err(err) = &res {
    unit.fail(err.clone());
  }
  res
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnitOutcome {
  Ready,
  Skipped,
  Failed(OptError),
}

/// Per-unit result of [`Script::optimize`], in unit id order.
#[derive(Clone, Debug)]
pub struct ScriptReport {
  pub outcomes: Vec<(UnitId, UnitOutcome)>,
  /// Call sites tagged by direct-call discovery.
  pub direct_calls: usize,
}

impl ScriptReport {
  fn collect(script: &Script, direct_calls: PassResult) -> Self {
    let outcomes = script
      .units
      .iter()
      .map(|unit| {
        let outcome = match (unit.state(), unit.failure()) {
          (_, Some(err)) => UnitOutcome::Failed(err.clone()),
          (UnitState::ReadyForLowering, None) => UnitOutcome::Ready,
          _ => UnitOutcome::Skipped,
        };
        (unit.id, outcome)
      })
      .collect();
    Self {
      outcomes,
      direct_calls: direct_calls.rewrites,
    }
  }

  pub fn outcome(&self, unit: UnitId) -> Option<&UnitOutcome> {
    self
      .outcomes
      .iter()
      .find(|(id, _)| *id == unit)
      .map(|(_, outcome)| outcome)
  }

  pub fn failures(&self) -> impl Iterator<Item = &OptError> {
    self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
      UnitOutcome::Failed(err) => Some(err),
      _ => None,
    })
  }

  pub fn is_ok(&self) -> bool {
    self.failures().next().is_none()
  }
}

impl Script {
  /// Optimizes every unit. Direct-call discovery runs first over the whole
  /// script, then each unit runs its own pipeline independently. A failing unit
  /// is reported and does not affect its siblings: call sites that were bound
  /// to it directly go back to the generic call.
  pub fn optimize(&mut self, options: &OptimizerOptions) -> ScriptReport {
    let mut direct_calls = if options.enabled() {
      optpass_direct_calls(&mut self.units, options.parallel)
    } else {
      PassResult::default()
    };

    // Errors are recorded on the unit and collected into the report.
    let run = |unit: &mut CompilationUnit| {
      let _ = optimize_unit(unit, options);
    };
    if options.parallel {
      self.units.par_iter_mut().for_each(run);
    } else {
      self.units.iter_mut().for_each(run);
    }
    let revoked = revoke_failed_targets(&mut self.units);
    if revoked.any_change() {
      direct_calls.rewrites -= revoked.rewrites;
    }

    let report = ScriptReport::collect(self, direct_calls);
    log::debug!(
      "optimized {} units, {} failed, {} direct call sites",
      report.outcomes.len(),
      report.failures().count(),
      report.direct_calls
    );
    report
  }
}
