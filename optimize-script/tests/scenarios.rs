mod common;

use common::{assign, call, call_sites, optimize, print, serial};
use optimize_script::ir::node::{BinOp, LabelId, Node};
use optimize_script::ir::props::NumericOperands;
use optimize_script::lower::LoweringUnit;
use optimize_script::unit::vars::{TypeUnion, VarId};
use optimize_script::{Script, ScriptBuilder, UnitOutcome};

// f(x) { var y = x + 1; return y * 2; }
fn scenario_one(direct: bool) -> (Script, VarId) {
  let mut sb = ScriptBuilder::new();
  let f = sb.function(Script::TOP_LEVEL, "f", &["x"]);
  let x = sb.unit(f).param(0);
  let y = sb.unit(f).var("y");
  sb.unit(f).extend([
    assign(y, Node::bin(BinOp::Add, Node::get_var(x), Node::number(1.0))),
    Node::ret(Some(Node::bin(BinOp::Mul, Node::get_var(y), Node::number(2.0)))),
  ]);
  if direct {
    sb.top_level()
      .push(Node::expr_stmt(call("f", vec![Node::number(4.0)])));
  }
  let (script, report) = optimize(sb, &serial());
  assert!(report.is_ok());
  (script, y)
}

#[test]
fn scenario_parameter_arithmetic_is_not_specialized() {
  for direct in [false, true] {
    let (script, y) = scenario_one(direct);
    let f = script.find("f").unwrap();
    assert_eq!(f.is_direct_call_target, direct);
    assert!(!f.cfg.is_live_on_entry(y.index()));
    assert_eq!(f.vars.type_union(y), TypeUnion::Any);
    assert!(!f.vars.is_number(y));
  }

  // Through the direct entry the parameter is read from the number half of its
  // pair where the `+` can take it unboxed.
  let (script, _) = scenario_one(true);
  let f = script.find("f").unwrap();
  let add = f.statements[0].children[0].children[0].clone();
  assert!(add.children[0].props.direct_param);
  assert_eq!(add.props.numeric, Some(NumericOperands::Right));
}

#[test]
fn scenario_diverging_branches() {
  let mut sb = ScriptBuilder::new();
  let u = sb.top_level();
  let c = u.var("c");
  let z = u.var("z");
  u.extend([
    Node::if_ne(Node::get_var(c), LabelId(0)),
    assign(z, Node::number(1.0)),
    Node::goto(LabelId(1)),
    Node::target(LabelId(0)),
    assign(z, Node::string("a")),
    Node::target(LabelId(1)),
    print(z),
  ]);
  let (script, _) = optimize(sb, &serial());
  let top = script.top_level();
  let use_block = top.cfg.block_of_statement(6).unwrap();
  assert_eq!(top.cfg.predecessors(use_block).count(), 2);
  assert_eq!(top.vars.type_union(z), TypeUnion::Any);
  assert!(!top.vars.is_number(z));
}

#[test]
fn scenario_sibling_direct_call() {
  let mut sb = ScriptBuilder::new();
  let g = sb.function(Script::TOP_LEVEL, "g", &[]);
  let h = sb.function(Script::TOP_LEVEL, "h", &["a", "b"]);
  sb.unit(g).push(Node::ret(Some(call("h", vec![
    Node::number(1.0),
    Node::number(2.0),
  ]))));
  sb.unit(h).push(Node::ret(Some(Node::bin(
    BinOp::Add,
    Node::get_var(VarId(0)),
    Node::get_var(VarId(1)),
  ))));
  let (mut script, report) = optimize(sb, &serial());
  assert_eq!(report.direct_calls, 1);

  let sites = call_sites(&script.unit(g).statements);
  assert_eq!(sites.len(), 1);
  assert_eq!(sites[0].props.direct_call, Some(h));
  assert!(script.unit(h).is_direct_call_target);
  assert!(script.unit(g).direct_callees.contains(&h));

  let plans = LoweringUnit::new(script.unit_mut(g)).unwrap().call_sites();
  assert_eq!(plans[0].numeric_args, vec![true, true]);
}

#[test]
fn scenario_adjacent_labels() {
  let mut sb = ScriptBuilder::new();
  let u = sb.top_level();
  let x = u.var("x");
  let c = u.var("c");
  u.extend([
    assign(x, Node::number(1.0)),
    Node::goto(LabelId(0)),
    Node::target(LabelId(0)),
    Node::target(LabelId(1)),
    print(x),
    Node::if_eq(Node::get_var(c), LabelId(1)),
  ]);
  let (script, report) = optimize(sb, &serial());
  assert_eq!(report.outcome(Script::TOP_LEVEL), Some(&UnitOutcome::Ready));
  let cfg = &script.top_level().cfg;
  let ranges: Vec<_> = cfg.blocks.iter().map(|b| (b.start, b.end)).collect();
  assert_eq!(ranges, vec![(0, 1), (2, 2), (3, 5)]);
  assert_eq!(cfg.predecessors(1).collect::<Vec<_>>(), vec![0]);
  assert_eq!(cfg.predecessors(2).collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn scenario_read_before_write() {
  let mut sb = ScriptBuilder::new();
  let v = sb.top_level().var("v");
  sb.top_level()
    .extend([print(v), assign(v, Node::number(5.0))]);
  let (script, _) = optimize(sb, &serial());
  let top = script.top_level();
  assert!(top.cfg.is_live_on_entry(v.index()));
  assert!(!top.vars.is_number(v));
  assert_eq!(
    top.statements[1].children[0].props.inferred_type,
    Some(TypeUnion::Number)
  );
}
