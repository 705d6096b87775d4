use crate::cfg::cfg::Cfg;
use crate::ir::node::Node;
use crate::unit::vars::{TypeUnion, VariableTable};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerDebugBlock {
  pub start: usize,
  pub end: usize,
  pub successors: Vec<usize>,
  pub live_on_entry: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerDebugStep {
  pub name: String,
  pub blocks: Vec<OptimizerDebugBlock>,
  pub var_types: BTreeMap<String, TypeUnion>,
  pub numbers: Vec<String>,
  pub statements: Vec<Node>,
}

/// Snapshots of a unit taken after each pipeline stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OptimizerDebug {
  steps: Vec<OptimizerDebugStep>,
}

impl OptimizerDebug {
  pub fn new() -> Self {
    Self { steps: Vec::new() }
  }

  pub fn steps(&self) -> &[OptimizerDebugStep] {
    &self.steps
  }

  pub fn step(&self, name: &str) -> Option<&OptimizerDebugStep> {
    self.steps.iter().find(|s| s.name == name)
  }

  pub fn add_step(
    &mut self,
    name: impl AsRef<str>,
    cfg: &Cfg,
    vars: &VariableTable,
    statements: &[Node],
  ) {
    self.steps.push(OptimizerDebugStep {
      name: name.as_ref().to_string(),
      blocks: cfg
        .blocks
        .iter()
        .map(|b| OptimizerDebugBlock {
          start: b.start,
          end: b.end,
          successors: b.successors.iter().copied().collect(),
          live_on_entry: b.live_on_entry.iter_indices().collect(),
        })
        .collect(),
      // Keyed by id as names may repeat between a parameter and a local.
      var_types: vars
        .iter()
        .map(|(id, v)| (format!("{id}:{}", v.name), v.type_union))
        .collect(),
      numbers: vars
        .iter()
        .filter(|(_, v)| v.specialized_as_number)
        .map(|(_, v)| v.name.clone())
        .collect(),
      statements: statements.to_vec(),
    });
  }
}
