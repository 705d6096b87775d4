use criterion::{criterion_group, criterion_main, Criterion};
use optimize_script::analysis::liveness::compute_liveness;
use optimize_script::analysis::typeflow::compute_types;
use optimize_script::cfg::bblock::build_blocks;
use optimize_script::ir::node::{BinOp, LabelId, Node};
use optimize_script::unit::vars::VarId;
use optimize_script::{OptimizerOptions, Script, ScriptBuilder};
use std::hint::black_box;

/// `loops` nested counting loops over `vars` accumulators, each loop head a
/// separate label.
fn looping_script(loops: u32, vars: u32) -> Script {
  let mut sb = ScriptBuilder::new();
  let u = sb.top_level();
  let accs: Vec<VarId> = (0..vars).map(|i| u.var(&format!("a{i}"))).collect();
  for acc in accs.iter() {
    u.push(Node::expr_stmt(Node::set_var(*acc, Node::number(0.0))));
  }
  for l in 0..loops {
    let i = u.var(&format!("i{l}"));
    u.push(Node::expr_stmt(Node::set_var(i, Node::number(0.0))));
    u.push(Node::target(LabelId(l)));
    for (k, acc) in accs.iter().enumerate() {
      let prev = accs[(k + 1) % accs.len()];
      u.push(Node::expr_stmt(Node::set_var(
        *acc,
        Node::bin(
          BinOp::Add,
          Node::get_var(prev),
          Node::bin(BinOp::Mul, Node::get_var(i), Node::get_var(i)),
        ),
      )));
    }
    u.push(Node::expr_stmt(Node::inc(Node::get_var(i), false)));
    u.push(Node::if_eq(
      Node::bin(BinOp::Lt, Node::get_var(i), Node::number(100.0)),
      LabelId(l),
    ));
  }
  sb.finish()
}

fn bench_analyses(c: &mut Criterion) {
  let script = looping_script(50, 16);
  let unit = script.top_level();

  c.bench_function("liveness 50 loops 16 vars", |b| {
    b.iter(|| {
      let mut statements = unit.statements.clone();
      let mut cfg = build_blocks(unit.id, &mut statements, unit.vars.len()).unwrap();
      compute_liveness(black_box(&mut cfg), &statements)
    })
  });

  c.bench_function("type flow 50 loops 16 vars", |b| {
    b.iter(|| {
      let mut statements = unit.statements.clone();
      let mut vars = unit.vars.clone();
      let mut cfg = build_blocks(unit.id, &mut statements, vars.len()).unwrap();
      compute_liveness(&mut cfg, &statements);
      compute_types(black_box(&mut cfg), &mut statements, &mut vars)
    })
  });
}

fn bench_pipeline(c: &mut Criterion) {
  let options = OptimizerOptions {
    parallel: false,
    ..OptimizerOptions::default()
  };
  c.bench_function("full pipeline 50 loops 16 vars", |b| {
    b.iter_with_large_drop(|| {
      let mut script = looping_script(50, 16);
      script.optimize(black_box(&options));
      script
    })
  });
}

criterion_group!(benches, bench_analyses, bench_pipeline);
criterion_main!(benches);
