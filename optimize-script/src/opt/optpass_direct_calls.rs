use crate::ir::node::{Node, NodeKind};
use crate::opt::PassResult;
use crate::unit::{fresh_node_id, CompilationUnit, UnitId, UnitState};
use ahash::{HashMap, HashSet};
use derive_visitor::{DriveMut, VisitorMut};
use rayon::prelude::*;
use std::collections::BTreeSet;

/// Callees with more parameters than this are always called generically.
pub const MAX_DIRECT_CALL_PARAMS: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Declared {
  Unique(UnitId),
  /// Declared more than once in the same scope; which one wins is decided at runtime.
  Ambiguous,
}

struct Scope {
  parent: Option<UnitId>,
  functions: HashMap<String, Declared>,
  locals: HashSet<String>,
}

/// Read-only snapshot of every unit's declarations, shared by all callers.
struct DirectCallIndex {
  scopes: Vec<Scope>,
  /// Parameter count of units that may be entered directly.
  eligible: Vec<Option<usize>>,
}

impl DirectCallIndex {
  fn new(units: &[CompilationUnit]) -> Self {
    let scopes = units
      .iter()
      .map(|unit| {
        let mut functions = HashMap::<String, Declared>::default();
        for stmt in unit.statements.iter() {
          let Some(callee) = stmt.unit().filter(|_| stmt.kind == NodeKind::Function) else {
            continue;
          };
          let Some(name) = units.get(callee.index()).and_then(|u| u.name.clone()) else {
            continue;
          };
          functions
            .entry(name)
            .and_modify(|d| *d = Declared::Ambiguous)
            .or_insert(Declared::Unique(callee));
        }
        Scope {
          parent: unit.parent,
          functions,
          locals: unit.vars.iter().map(|(_, v)| v.name.clone()).collect(),
        }
      })
      .collect();
    let eligible = units
      .iter()
      .map(|unit| {
        let ok = unit.state() == UnitState::Unskipped
          && !unit.requires_activation
          && unit.param_count() <= MAX_DIRECT_CALL_PARAMS;
        ok.then(|| unit.param_count())
      })
      .collect();
    Self { scopes, eligible }
  }

  /// Resolves `name` as seen from inside `caller`: the innermost scope that
  /// declares a function or a local of that name decides.
  fn resolve(&self, caller: UnitId, name: &str) -> Option<UnitId> {
    let mut scope_id = Some(caller);
    while let Some(id) = scope_id {
      let scope = &self.scopes[id.index()];
      match scope.functions.get(name) {
        Some(Declared::Unique(callee)) => return Some(*callee),
        Some(Declared::Ambiguous) => return None,
        None if scope.locals.contains(name) => return None,
        None => scope_id = scope.parent,
      }
    }
    None
  }

  fn direct_callee(&self, caller: UnitId, call: &Node) -> Option<UnitId> {
    let target = call.first()?;
    if target.kind != NodeKind::Name {
      return None;
    }
    let callee = self.resolve(caller, target.string_value()?)?;
    let param_count = (*self.eligible.get(callee.index())?)?;
    (call.arg_count() == param_count).then_some(callee)
  }
}

#[derive(VisitorMut)]
#[visitor(Node(enter))]
struct CallTagger<'a> {
  index: &'a DirectCallIndex,
  caller: UnitId,
  callees: BTreeSet<UnitId>,
  result: PassResult,
}

impl CallTagger<'_> {
  fn enter_node(&mut self, node: &mut Node) {
    if !matches!(node.kind, NodeKind::Call | NodeKind::New) {
      return;
    }
    node.props.direct_call = self.index.direct_callee(self.caller, node);
    if let Some(callee) = node.props.direct_call {
      self.callees.insert(callee);
      self.result.mark_changed();
    }
  }
}

fn tag_calls(unit: &mut CompilationUnit, index: &DirectCallIndex) -> PassResult {
  if unit.state() != UnitState::Unskipped || unit.requires_activation {
    return PassResult::default();
  }
  let mut tagger = CallTagger {
    index,
    caller: unit.id,
    callees: BTreeSet::new(),
    result: PassResult::default(),
  };
  for stmt in unit.statements.iter_mut() {
    stmt.drive_mut(&mut tagger);
  }
  unit.direct_callees = tagger.callees;
  tagger.result
}

/// Tags call sites whose callee is statically known and called with exactly
/// its declared parameter count, and marks those callees as direct-call
/// targets. Must run over the whole script before any unit is specialized.
pub fn optpass_direct_calls(units: &mut [CompilationUnit], parallel: bool) -> PassResult {
  let index = DirectCallIndex::new(units);
  let results: Vec<PassResult> = if parallel {
    units
      .par_iter_mut()
      .map(|unit| tag_calls(unit, &index))
      .collect()
  } else {
    units
      .iter_mut()
      .map(|unit| tag_calls(unit, &index))
      .collect()
  };

  let callees: BTreeSet<UnitId> = units
    .iter()
    .flat_map(|u| u.direct_callees.iter().copied())
    .collect();
  for callee in callees.iter() {
    units[callee.index()].is_direct_call_target = true;
  }
  log::debug!(
    "direct calls: {} call sites to {} targets",
    results.iter().map(|r| r.rewrites).sum::<usize>(),
    callees.len()
  );

  let mut result = PassResult::default();
  for r in results {
    result.merge(r);
  }
  result
}

#[derive(VisitorMut)]
#[visitor(Node(enter))]
struct CallUntagger<'a> {
  revoked: &'a BTreeSet<UnitId>,
  next_node_id: &'a mut u32,
  result: PassResult,
}

impl CallUntagger<'_> {
  fn enter_node(&mut self, node: &mut Node) {
    if !node
      .props
      .direct_call
      .map_or(false, |callee| self.revoked.contains(&callee))
    {
      return;
    }
    node.props.direct_call = None;
    // The generic convention only takes boxed arguments.
    for arg in node.children.iter_mut().skip(1) {
      if !arg.yields_number() {
        continue;
      }
      if arg.props.direct_param {
        arg.props.numeric = None;
      } else {
        arg.wrap(NodeKind::ToObject, fresh_node_id(self.next_node_id));
      }
    }
    self.result.mark_changed();
  }
}

/// Sends every call site whose direct callee ended up `Failed` back through the
/// generic call, since a failed unit has no direct entry. Runs after the
/// per-unit pipelines. Returns one rewrite per untagged call site.
pub fn revoke_failed_targets(units: &mut [CompilationUnit]) -> PassResult {
  let revoked: BTreeSet<UnitId> = units
    .iter()
    .filter(|u| u.is_direct_call_target && u.state() == UnitState::Failed)
    .map(|u| u.id)
    .collect();
  let mut result = PassResult::default();
  if revoked.is_empty() {
    return result;
  }
  for unit in units.iter_mut() {
    if unit.direct_callees.is_disjoint(&revoked) {
      continue;
    }
    unit.direct_callees.retain(|callee| !revoked.contains(callee));
    let mut untagger = CallUntagger {
      revoked: &revoked,
      next_node_id: &mut unit.next_node_id,
      result: PassResult::default(),
    };
    for stmt in unit.statements.iter_mut() {
      stmt.drive_mut(&mut untagger);
    }
    result.merge(untagger.result);
  }
  for callee in revoked.iter() {
    units[callee.index()].is_direct_call_target = false;
  }
  log::debug!(
    "direct calls: revoked {} call sites to {} failed targets",
    result.rewrites,
    revoked.len()
  );
  result
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::OptError;
  use crate::ir::props::NumericOperands;
  use crate::unit::script::{Script, ScriptBuilder};

  fn call(name: &str, argc: usize) -> Node {
    Node::expr_stmt(Node::call(
      Node::name(name),
      (0..argc).map(|i| Node::number(i as f64)).collect(),
    ))
  }

  fn tagged(unit: &CompilationUnit) -> Option<UnitId> {
    unit.statements.iter().find_map(|s| {
      s.first()
        .filter(|c| matches!(c.kind, NodeKind::Call | NodeKind::New))
        .and_then(|c| c.props.direct_call)
    })
  }

  #[test]
  fn sibling_call_with_matching_arity() {
    let mut sb = ScriptBuilder::new();
    let g = sb.function(Script::TOP_LEVEL, "g", &[]);
    let h = sb.function(Script::TOP_LEVEL, "h", &["a", "b"]);
    sb.unit(g).push(call("h", 2));
    let mut script = sb.finish();
    let result = optpass_direct_calls(&mut script.units, false);
    assert!(result.any_change());
    assert_eq!(tagged(script.unit(g)), Some(h));
    assert!(script.unit(h).is_direct_call_target);
    assert!(!script.unit(g).is_direct_call_target);
    assert_eq!(script.unit(g).direct_callees, BTreeSet::from([h]));
  }

  #[test]
  fn arity_mismatch_is_not_direct() {
    let mut sb = ScriptBuilder::new();
    let h = sb.function(Script::TOP_LEVEL, "h", &["a", "b"]);
    sb.top_level().push(call("h", 1));
    sb.top_level().push(call("h", 3));
    let mut script = sb.finish();
    optpass_direct_calls(&mut script.units, false);
    assert_eq!(tagged(script.top_level()), None);
    assert!(!script.unit(h).is_direct_call_target);
  }

  #[test]
  fn parameter_cap_is_inclusive() {
    let names32: Vec<String> = (0..32).map(|i| format!("p{i}")).collect();
    let names33: Vec<String> = (0..33).map(|i| format!("p{i}")).collect();
    let refs32: Vec<&str> = names32.iter().map(String::as_str).collect();
    let refs33: Vec<&str> = names33.iter().map(String::as_str).collect();
    let mut sb = ScriptBuilder::new();
    let wide = sb.function(Script::TOP_LEVEL, "wide", &refs32);
    let wider = sb.function(Script::TOP_LEVEL, "wider", &refs33);
    sb.top_level().push(call("wide", 32));
    sb.top_level().push(call("wider", 33));
    let mut script = sb.finish();
    optpass_direct_calls(&mut script.units, false);
    assert!(script.unit(wide).is_direct_call_target);
    assert!(!script.unit(wider).is_direct_call_target);
    assert_eq!(
      script.top_level().direct_callees,
      BTreeSet::from([wide])
    );
  }

  #[test]
  fn activation_units_never_take_part() {
    let mut sb = ScriptBuilder::new();
    let h = sb.function(Script::TOP_LEVEL, "h", &[]);
    let k = sb.function(Script::TOP_LEVEL, "k", &[]);
    sb.unit(h).set_requires_activation(true);
    sb.unit(k).set_requires_activation(true).push(call("h", 0));
    sb.top_level().push(call("h", 0));
    let mut script = sb.finish();
    optpass_direct_calls(&mut script.units, false);
    assert!(!script.unit(h).is_direct_call_target);
    assert!(script.unit(k).direct_callees.is_empty());
    assert!(script.top_level().direct_callees.is_empty());
  }

  #[test]
  fn duplicate_declarations_are_ambiguous() {
    let mut sb = ScriptBuilder::new();
    let first = sb.function(Script::TOP_LEVEL, "f", &[]);
    let second = sb.function(Script::TOP_LEVEL, "f", &[]);
    sb.top_level().push(call("f", 0));
    let mut script = sb.finish();
    optpass_direct_calls(&mut script.units, false);
    assert!(!script.unit(first).is_direct_call_target);
    assert!(!script.unit(second).is_direct_call_target);
  }

  #[test]
  fn inner_declarations_shadow_outer_ones() {
    let mut sb = ScriptBuilder::new();
    let outer_f = sb.function(Script::TOP_LEVEL, "f", &[]);
    let g = sb.function(Script::TOP_LEVEL, "g", &[]);
    let inner_f = sb.function(g, "f", &[]);
    sb.unit(g).push(Node::expr_stmt(Node::new_call(Node::name("f"), Vec::new())));
    // A local `f` in an enclosing function hides the top-level declaration.
    let shadow = sb.function(Script::TOP_LEVEL, "shadow", &[]);
    sb.unit(shadow).var("f");
    let nested = sb.function(shadow, "nested", &[]);
    sb.unit(nested).push(call("f", 0));
    let mut script = sb.finish();
    optpass_direct_calls(&mut script.units, true);
    assert_eq!(tagged(script.unit(g)), Some(inner_f));
    assert!(script.unit(inner_f).is_direct_call_target);
    assert!(!script.unit(outer_f).is_direct_call_target);
    assert_eq!(tagged(script.unit(nested)), None);
  }

  #[test]
  fn failed_targets_fall_back_to_generic_calls() {
    let mut sb = ScriptBuilder::new();
    let g = sb.function(Script::TOP_LEVEL, "g", &[]);
    let h = sb.function(Script::TOP_LEVEL, "h", &["a"]);
    let k = sb.function(Script::TOP_LEVEL, "k", &["a"]);
    sb.unit(g).push(call("h", 1));
    sb.unit(g).push(call("k", 1));
    let mut script = sb.finish();
    optpass_direct_calls(&mut script.units, false);
    // Stand-in for the numbers pass keeping the literal unboxed.
    for stmt in script.unit_mut(g).statements.iter_mut() {
      stmt.children[0].children[1].props.numeric = Some(NumericOperands::Both);
    }
    script.unit_mut(h).fail(OptError::UnknownUnit {
      unit: h,
      target: UnitId(99),
    });

    let result = revoke_failed_targets(&mut script.units);
    assert_eq!(result.rewrites, 1);
    assert!(!script.unit(h).is_direct_call_target);
    assert!(script.unit(k).is_direct_call_target);
    assert_eq!(script.unit(g).direct_callees, BTreeSet::from([k]));

    let to_h = &script.unit(g).statements[0].children[0];
    assert_eq!(to_h.props.direct_call, None);
    assert_eq!(to_h.children[1].kind, NodeKind::ToObject);
    assert!(to_h.children[1].first().unwrap().props.is_number());
    let to_k = &script.unit(g).statements[1].children[0];
    assert_eq!(to_k.props.direct_call, Some(k));
    assert_eq!(to_k.children[1].kind, NodeKind::Number);
  }

  #[test]
  fn nothing_to_revoke_without_failures() {
    let mut sb = ScriptBuilder::new();
    let h = sb.function(Script::TOP_LEVEL, "h", &[]);
    sb.top_level().push(call("h", 0));
    let mut script = sb.finish();
    optpass_direct_calls(&mut script.units, false);
    assert!(!revoke_failed_targets(&mut script.units).any_change());
    assert!(script.unit(h).is_direct_call_target);
  }
}
