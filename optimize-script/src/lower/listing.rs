//! Reference backend that lowers units to a linear stack-machine listing.
//!
//! Every expression pushes exactly one value, in the representation the number
//! rewrite chose for it: unboxed where `props.numeric` says so, boxed otherwise.

use super::{Backend, DirectEntry, LoweringUnit, SlotAllocator};
use crate::error::{OptError, OptimizeResult};
use crate::ir::node::{BinOp, Datum, LabelId, Node, NodeKind, TempId, UnOp};
use crate::ir::props::NumericOperands;
use crate::unit::vars::VarId;
use crate::unit::UnitId;
use serde::Serialize;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Literal {
  Number(f64),
  String(String),
  Boolean(bool),
  Null,
  Undefined,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Insn {
  Label(LabelId),
  Jump(LabelId),
  /// Pops the condition.
  JumpIfTrue(LabelId),
  JumpIfFalse(LabelId),
  /// Pushes an unboxed number.
  Num(f64),
  /// Pushes a boxed constant.
  Const(Literal),
  This,
  LoadName(String),
  Load(u16),
  /// Reads the unboxed number held by a two-word slot.
  LoadNumber(u16),
  Store(u16),
  StoreNumber(u16),
  /// Reads a direct-call parameter pair, either half.
  LoadParam { slot: u16, number: bool },
  StoreParam { slot: u16, number: bool },
  LoadTemp(TempId),
  /// Stores the top of stack into a temporary without popping it.
  Tee(TempId),
  ToNumber,
  ToObject,
  Dup,
  Pop,
  GetProp(String),
  SetProp(String),
  GetElem { numeric_index: bool },
  SetElem { numeric_index: bool },
  IncProp { name: String, dec: bool, post: bool },
  IncElem { dec: bool, post: bool },
  Binary { op: BinOp, numeric: Option<NumericOperands> },
  Unary { op: UnOp, numeric: bool },
  Call { argc: usize },
  New { argc: usize },
  /// Jumps to `slow` unless the callee on top of the stack is `callee`. Does not pop.
  GuardCallee { callee: UnitId, slow: LabelId },
  CallDirect {
    callee: UnitId,
    construct: bool,
    numeric_args: Vec<bool>,
  },
  DeclareFunction(UnitId),
  MakeArray(usize),
  MakeObject(Vec<String>),
  Return,
  ReturnUndefined,
  Throw,
}

#[derive(Clone, Debug, Serialize)]
pub struct Listing {
  pub unit: UnitId,
  pub name: Option<String>,
  pub entry: Option<DirectEntry>,
  pub insns: Vec<Insn>,
  pub frame_size: u16,
  pub temps: u32,
}

impl Listing {
  pub fn position(&self, pred: impl Fn(&Insn) -> bool) -> Option<usize> {
    self.insns.iter().position(pred)
  }
}

impl fmt::Display for Listing {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.name {
      Some(name) => writeln!(f, "function {name} ({}):", self.unit)?,
      None => writeln!(f, "script ({}):", self.unit)?,
    }
    writeln!(f, "  frame {} words, {} temps", self.frame_size, self.temps)?;
    if let Some(entry) = &self.entry {
      write!(f, "  direct entry:")?;
      for p in entry.params.iter() {
        write!(f, " {}=({},{})", p.var, p.value, p.number)?;
      }
      writeln!(f)?;
    }
    for insn in self.insns.iter() {
      match insn {
        Insn::Label(label) => writeln!(f, "{label}:")?,
        other => writeln!(f, "    {other:?}")?,
      }
    }
    Ok(())
  }
}

fn literal(node: &Node) -> Option<Literal> {
  Some(match (&node.kind, &node.datum) {
    (NodeKind::Number, Some(Datum::Number(n))) => Literal::Number(*n),
    (NodeKind::String, Some(Datum::String(s))) => Literal::String(s.clone()),
    (NodeKind::Boolean, Some(Datum::Boolean(b))) => Literal::Boolean(*b),
    (NodeKind::Null, _) => Literal::Null,
    (NodeKind::Undefined, _) => Literal::Undefined,
    _ => return None,
  })
}

struct Emitter<'u, 'a> {
  unit: UnitId,
  slots: &'u mut SlotAllocator<'a>,
  direct_call_target: bool,
  next_label: u32,
  insns: Vec<Insn>,
}

impl Emitter<'_, '_> {
  fn malformed(&self, node: &Node, reason: &'static str) -> OptError {
    OptError::MalformedNode {
      unit: self.unit,
      kind: node.kind,
      reason,
    }
  }

  fn fresh_label(&mut self) -> OptimizeResult<LabelId> {
    let label = LabelId(self.next_label);
    self.next_label = self
      .next_label
      .checked_add(1)
      .ok_or(OptError::LabelsExhausted { unit: self.unit })?;
    Ok(label)
  }

  fn emit(&mut self, insn: Insn) {
    self.insns.push(insn);
  }

  fn child<'n>(&self, node: &'n Node, i: usize) -> OptimizeResult<&'n Node> {
    node
      .children
      .get(i)
      .ok_or_else(|| self.malformed(node, "missing operand"))
  }

  fn var_of(&self, node: &Node) -> OptimizeResult<VarId> {
    node.var().ok_or_else(|| self.malformed(node, "missing variable"))
  }

  fn is_param_pair(&self, var: VarId) -> bool {
    self.direct_call_target && self.slots.vars().is_parameter(var)
  }

  fn load_var(&mut self, var: VarId, number: bool) -> OptimizeResult<Insn> {
    let slot = self.slots.slot(var)?.index;
    Ok(if self.is_param_pair(var) {
      Insn::LoadParam { slot, number }
    } else if self.slots.vars().is_number(var) {
      Insn::LoadNumber(slot)
    } else {
      Insn::Load(slot)
    })
  }

  fn store_var(&mut self, var: VarId, number: bool) -> OptimizeResult<Insn> {
    let slot = self.slots.slot(var)?.index;
    Ok(if self.is_param_pair(var) {
      Insn::StoreParam { slot, number }
    } else if self.slots.vars().is_number(var) {
      Insn::StoreNumber(slot)
    } else {
      Insn::Store(slot)
    })
  }

  fn statement(&mut self, stmt: &Node) -> OptimizeResult<()> {
    match stmt.kind {
      NodeKind::ExprStmt => {
        let expr = self.child(stmt, 0)?;
        if expr.kind == NodeKind::SetVar && expr.props.cse_store.is_none() {
          let var = self.var_of(expr)?;
          self.expr(self.child(expr, 0)?)?;
          let store = self.store_var(var, expr.yields_number())?;
          self.emit(store);
        } else {
          self.expr(expr)?;
          self.emit(Insn::Pop);
        }
      }
      NodeKind::Return => match stmt.first() {
        Some(value) => {
          self.expr(value)?;
          self.emit(Insn::Return);
        }
        None => self.emit(Insn::ReturnUndefined),
      },
      NodeKind::Throw => {
        self.expr(self.child(stmt, 0)?)?;
        self.emit(Insn::Throw);
      }
      NodeKind::Target | NodeKind::Goto | NodeKind::IfEq | NodeKind::IfNe => {
        let label = stmt
          .label()
          .ok_or_else(|| self.malformed(stmt, "missing label"))?;
        match stmt.kind {
          NodeKind::Target => self.emit(Insn::Label(label)),
          NodeKind::Goto => self.emit(Insn::Jump(label)),
          NodeKind::IfEq => {
            self.expr(self.child(stmt, 0)?)?;
            self.emit(Insn::JumpIfTrue(label));
          }
          _ => {
            self.expr(self.child(stmt, 0)?)?;
            self.emit(Insn::JumpIfFalse(label));
          }
        }
      }
      NodeKind::Function => {
        let unit = stmt
          .unit()
          .ok_or_else(|| self.malformed(stmt, "missing unit"))?;
        self.emit(Insn::DeclareFunction(unit));
      }
      NodeKind::Empty => {}
      _ => return Err(self.malformed(stmt, "expression in statement position")),
    }
    Ok(())
  }

  fn expr(&mut self, node: &Node) -> OptimizeResult<()> {
    self.expr_value(node)?;
    if let Some(temp) = node.props.cse_store {
      self.emit(Insn::Tee(temp));
    }
    Ok(())
  }

  fn expr_value(&mut self, node: &Node) -> OptimizeResult<()> {
    let number = node.yields_number();
    match node.kind {
      NodeKind::Number if number => {
        let n = node
          .number_value()
          .ok_or_else(|| self.malformed(node, "missing value"))?;
        self.emit(Insn::Num(n));
      }
      NodeKind::Number
      | NodeKind::String
      | NodeKind::Boolean
      | NodeKind::Null
      | NodeKind::Undefined => {
        let lit = literal(node).ok_or_else(|| self.malformed(node, "missing value"))?;
        self.emit(Insn::Const(lit));
      }
      NodeKind::This => self.emit(Insn::This),
      NodeKind::Name => {
        let name = node
          .string_value()
          .ok_or_else(|| self.malformed(node, "missing name"))?;
        self.emit(Insn::LoadName(name.to_string()));
      }
      NodeKind::GetVar => {
        let load = self.load_var(self.var_of(node)?, number)?;
        self.emit(load);
      }
      NodeKind::SetVar => {
        let var = self.var_of(node)?;
        self.expr(self.child(node, 0)?)?;
        self.emit(Insn::Dup);
        let store = self.store_var(var, number)?;
        self.emit(store);
      }
      NodeKind::GetProp | NodeKind::SetProp => {
        let name = node
          .string_value()
          .ok_or_else(|| self.malformed(node, "missing property name"))?
          .to_string();
        for child in node.children.iter() {
          self.expr(child)?;
        }
        self.emit(match node.kind {
          NodeKind::GetProp => Insn::GetProp(name),
          _ => Insn::SetProp(name),
        });
      }
      NodeKind::GetElem | NodeKind::SetElem => {
        for child in node.children.iter() {
          self.expr(child)?;
        }
        let numeric_index = node.props.numeric == Some(NumericOperands::Right);
        self.emit(match node.kind {
          NodeKind::GetElem => Insn::GetElem { numeric_index },
          _ => Insn::SetElem { numeric_index },
        });
      }
      NodeKind::Call | NodeKind::New => self.call(node)?,
      NodeKind::Binary(op) => {
        self.expr(self.child(node, 0)?)?;
        self.expr(self.child(node, 1)?)?;
        self.emit(Insn::Binary {
          op,
          numeric: node.props.numeric,
        });
      }
      NodeKind::Unary(op) => {
        self.expr(self.child(node, 0)?)?;
        self.emit(Insn::Unary {
          op,
          numeric: number,
        });
      }
      NodeKind::Inc { post } | NodeKind::Dec { post } => {
        self.update(node, matches!(node.kind, NodeKind::Dec { .. }), post, number)?;
      }
      NodeKind::Hook => {
        let otherwise = self.fresh_label()?;
        let end = self.fresh_label()?;
        self.expr(self.child(node, 0)?)?;
        self.emit(Insn::JumpIfFalse(otherwise));
        self.expr(self.child(node, 1)?)?;
        self.emit(Insn::Jump(end));
        self.emit(Insn::Label(otherwise));
        self.expr(self.child(node, 2)?)?;
        self.emit(Insn::Label(end));
      }
      NodeKind::And | NodeKind::Or => {
        let end = self.fresh_label()?;
        self.expr(self.child(node, 0)?)?;
        self.emit(Insn::Dup);
        self.emit(match node.kind {
          NodeKind::And => Insn::JumpIfFalse(end),
          _ => Insn::JumpIfTrue(end),
        });
        self.emit(Insn::Pop);
        self.expr(self.child(node, 1)?)?;
        self.emit(Insn::Label(end));
      }
      NodeKind::Comma => {
        let Some((last, rest)) = node.children.split_last() else {
          return Err(self.malformed(node, "empty sequence"));
        };
        for expr in rest {
          self.expr(expr)?;
          self.emit(Insn::Pop);
        }
        self.expr(last)?;
      }
      NodeKind::ArrayLit => {
        for elem in node.children.iter() {
          self.expr(elem)?;
        }
        self.emit(Insn::MakeArray(node.children.len()));
      }
      NodeKind::ObjectLit => {
        let mut keys = Vec::with_capacity(node.children.len() / 2);
        for pair in node.children.chunks(2) {
          let [key, value] = pair else {
            return Err(self.malformed(node, "member without value"));
          };
          let key = key
            .string_value()
            .ok_or_else(|| self.malformed(node, "non-string key"))?;
          keys.push(key.to_string());
          self.expr(value)?;
        }
        self.emit(Insn::MakeObject(keys));
      }
      NodeKind::ToNumber | NodeKind::ToObject => {
        self.expr(self.child(node, 0)?)?;
        self.emit(match node.kind {
          NodeKind::ToNumber => Insn::ToNumber,
          _ => Insn::ToObject,
        });
      }
      NodeKind::CseLoad => {
        let temp = node
          .temp()
          .ok_or_else(|| self.malformed(node, "missing temporary"))?;
        self.emit(Insn::LoadTemp(temp));
      }
      _ => return Err(self.malformed(node, "statement in expression position")),
    }
    Ok(())
  }

  /// `++`/`--` on a local, a property or an element.
  fn update(&mut self, node: &Node, dec: bool, post: bool, number: bool) -> OptimizeResult<()> {
    let operand = self.child(node, 0)?;
    match operand.kind {
      NodeKind::GetVar => {
        let var = self.var_of(operand)?;
        let load = self.load_var(var, number)?;
        let store = self.store_var(var, number)?;
        self.emit(load);
        if !number {
          self.emit(Insn::ToNumber);
        }
        if post {
          self.emit(Insn::Dup);
        }
        self.emit(Insn::Num(1.0));
        self.emit(Insn::Binary {
          op: if dec { BinOp::Sub } else { BinOp::Add },
          numeric: Some(NumericOperands::Both),
        });
        if !post {
          self.emit(Insn::Dup);
        }
        if !number {
          self.emit(Insn::ToObject);
        }
        self.emit(store);
        if !number {
          self.emit(Insn::ToObject);
        }
      }
      NodeKind::GetProp => {
        let name = operand
          .string_value()
          .ok_or_else(|| self.malformed(operand, "missing property name"))?
          .to_string();
        self.expr(self.child(operand, 0)?)?;
        self.emit(Insn::IncProp { name, dec, post });
      }
      NodeKind::GetElem => {
        self.expr(self.child(operand, 0)?)?;
        self.expr(self.child(operand, 1)?)?;
        self.emit(Insn::IncElem { dec, post });
      }
      _ => return Err(self.malformed(node, "operand is not assignable")),
    }
    Ok(())
  }

  fn call(&mut self, node: &Node) -> OptimizeResult<()> {
    let target = self.child(node, 0)?;
    let args = &node.children[1..];
    let construct = node.kind == NodeKind::New;
    self.expr(target)?;

    let generic = if construct {
      Insn::New { argc: args.len() }
    } else {
      Insn::Call { argc: args.len() }
    };
    let Some(callee) = node.props.direct_call else {
      for arg in args {
        self.expr(arg)?;
      }
      self.emit(generic);
      return Ok(());
    };

    let slow = self.fresh_label()?;
    let done = self.fresh_label()?;
    self.emit(Insn::GuardCallee { callee, slow });
    for arg in args {
      self.expr(arg)?;
    }
    self.emit(Insn::CallDirect {
      callee,
      construct,
      numeric_args: args.iter().map(Node::yields_number).collect(),
    });
    self.emit(Insn::Jump(done));
    self.emit(Insn::Label(slow));
    for arg in args {
      self.expr(arg)?;
      if arg.yields_number() {
        self.emit(Insn::ToObject);
      }
    }
    self.emit(generic);
    self.emit(Insn::Label(done));
    Ok(())
  }
}

/// Lowers each unit into a [`Listing`].
#[derive(Debug, Default)]
pub struct ListingBackend;

impl Backend for ListingBackend {
  type Output = Listing;

  fn lower_unit(&mut self, unit: &mut LoweringUnit<'_>) -> OptimizeResult<Listing> {
    // Parameter pairs first so they sit at the bottom of the frame.
    let entry = unit.direct_entry()?;
    let next_label = unit.next_free_label()?.0;
    let statements = unit.statements;
    let mut emitter = Emitter {
      unit: unit.id,
      slots: &mut unit.slots,
      direct_call_target: unit.direct_call_target,
      next_label,
      insns: Vec::new(),
    };
    for stmt in statements.iter() {
      emitter.statement(stmt)?;
    }
    let insns = emitter.insns;
    log::trace!("lowered unit {} into {} instructions", unit.id, insns.len());
    Ok(Listing {
      unit: unit.id,
      name: unit.name.map(str::to_string),
      entry,
      insns,
      frame_size: unit.slots.frame_size(),
      temps: unit.temp_count,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::lower::lower_script;
  use crate::options::{OptLevel, OptimizerOptions};
  use crate::unit::script::{Script, ScriptBuilder};

  fn lower(sb: ScriptBuilder, options: OptimizerOptions) -> Vec<Listing> {
    let mut script = sb.finish();
    script.optimize(&options);
    lower_script(&mut script, &mut ListingBackend)
      .into_iter()
      .map(|(_, listing)| listing.unwrap())
      .collect()
  }

  fn both() -> Option<NumericOperands> {
    Some(NumericOperands::Both)
  }

  #[test]
  fn specialized_loop_counter_stays_unboxed() {
    let mut sb = ScriptBuilder::new();
    let u = sb.top_level();
    let i = u.var("i");
    u.extend([
      Node::expr_stmt(Node::set_var(i, Node::number(0.0))),
      Node::target(LabelId(0)),
      Node::expr_stmt(Node::inc(Node::get_var(i), true)),
      Node::if_eq(
        Node::bin(BinOp::Lt, Node::get_var(i), Node::number(10.0)),
        LabelId(0),
      ),
      Node::ret(Some(Node::get_var(i))),
    ]);
    let listing = lower(sb, OptimizerOptions::default()).remove(0);
    assert_eq!(&listing.insns[..3], &[
      Insn::Num(0.0),
      Insn::StoreNumber(0),
      Insn::Label(LabelId(0)),
    ]);
    assert!(listing.insns.contains(&Insn::Binary {
      op: BinOp::Lt,
      numeric: both(),
    }));
    assert!(!listing.insns.contains(&Insn::ToNumber));
    assert_eq!(&listing.insns[listing.insns.len() - 3..], &[
      Insn::LoadNumber(0),
      Insn::ToObject,
      Insn::Return,
    ]);
    assert_eq!(listing.frame_size, 2);
  }

  #[test]
  fn direct_call_has_guarded_fast_and_slow_paths() {
    let mut sb = ScriptBuilder::new();
    let h = sb.function(Script::TOP_LEVEL, "h", &["a"]);
    sb.unit(h).push(Node::ret(Some(Node::bin(
      BinOp::Mul,
      Node::get_var(VarId(0)),
      Node::number(2.0),
    ))));
    sb.top_level().push(Node::expr_stmt(Node::call(Node::name("h"), vec![
      Node::number(3.0),
    ])));
    let listings = lower(sb, OptimizerOptions::default());
    let top = &listings[0];
    let guard = top
      .position(|i| matches!(i, Insn::GuardCallee { callee, .. } if *callee == h))
      .unwrap();
    let direct = top
      .position(|i| matches!(i, Insn::CallDirect { .. }))
      .unwrap();
    let generic = top.position(|i| *i == Insn::Call { argc: 1 }).unwrap();
    assert!(guard < direct && direct < generic);
    assert_eq!(top.insns[direct - 1], Insn::Num(3.0));
    assert_eq!(&top.insns[generic - 2..generic], &[Insn::Num(3.0), Insn::ToObject]);

    let callee = &listings[h.index()];
    assert_eq!(callee.entry.as_ref().map(|e| e.params.len()), Some(1));
    assert!(callee.insns.contains(&Insn::LoadParam {
      slot: 0,
      number: true
    }));
  }

  #[test]
  fn cse_temporaries_are_stored_then_loaded() {
    let mut sb = ScriptBuilder::new();
    let u = sb.top_level();
    let x = u.var("x");
    let a = u.var("a");
    let b = u.var("b");
    let twice = || Node::bin(BinOp::Mul, Node::get_var(x), Node::number(2.0));
    u.extend([
      Node::expr_stmt(Node::set_var(x, Node::number(1.0))),
      Node::expr_stmt(Node::set_var(a, twice())),
      Node::expr_stmt(Node::set_var(b, twice())),
    ]);
    let listing = lower(sb, OptimizerOptions::default()).remove(0);
    let tee = listing.position(|i| *i == Insn::Tee(TempId(0))).unwrap();
    let load = listing.position(|i| *i == Insn::LoadTemp(TempId(0))).unwrap();
    assert!(tee < load);
    assert_eq!(listing.temps, 1);
  }

  #[test]
  fn unoptimized_units_are_lowered_boxed() {
    let mut sb = ScriptBuilder::new();
    let u = sb.top_level();
    let x = u.var("x");
    let y = u.var("y");
    u.extend([
      Node::expr_stmt(Node::set_var(x, Node::number(1.0))),
      Node::expr_stmt(Node::set_var(
        y,
        Node::bin(BinOp::Sub, Node::get_var(x), Node::number(2.0)),
      )),
    ]);
    let listing = lower(sb, OptimizerOptions {
      level: OptLevel::Off,
      ..OptimizerOptions::default()
    })
    .remove(0);
    assert_eq!(listing.insns, vec![
      Insn::Const(Literal::Number(1.0)),
      Insn::Store(0),
      Insn::Load(0),
      Insn::Const(Literal::Number(2.0)),
      Insn::Binary {
        op: BinOp::Sub,
        numeric: None
      },
      Insn::Store(1),
    ]);
    assert_eq!(listing.frame_size, 2);
  }

  #[test]
  fn synthetic_labels_do_not_collide() {
    let mut sb = ScriptBuilder::new();
    let u = sb.top_level();
    let c = u.var("c");
    u.extend([
      Node::target(LabelId(4)),
      Node::expr_stmt(Node::hook(
        Node::get_var(c),
        Node::number(1.0),
        Node::number(2.0),
      )),
    ]);
    let listing = lower(sb, OptimizerOptions::default()).remove(0);
    let labels: Vec<_> = listing
      .insns
      .iter()
      .filter_map(|i| match i {
        Insn::Label(l) => Some(l.0),
        _ => None,
      })
      .collect();
    assert_eq!(labels, vec![4, 5, 6]);
    let text = listing.to_string();
    assert!(text.starts_with("script (u0):"));
    assert!(text.contains("\nL5:\n"));
  }

  #[test]
  fn statements_inside_expressions_are_rejected() {
    let mut sb = ScriptBuilder::new();
    sb.top_level()
      .push(Node::expr_stmt(Node::block(vec![Node::ret(None)])));
    let mut script = sb.finish();
    script.optimize(&OptimizerOptions::default());
    let results = lower_script(&mut script, &mut ListingBackend);
    let err = results[0].1.as_ref().unwrap_err();
    assert_eq!(err.code(), "OPT0103");
  }
}
