//! Lowering the type-annotated AST to the IR module.
//!
//! Every user function lowers to an IR function whose signature carries its
//! declared formals followed by one implicit reference parameter per
//! visible outer-scope binding, in the order those bindings were logged.
//! That is the whole nested-function protocol: a nested function reaches an
//! enclosing local through a pointer its caller passes along. Inside a
//! function, every parameter and local lives in a stack slot (`alloca`) and
//! all access goes through [`Emitter::calc_addr`], which hides the
//! one-pointer-level difference between plain storage and reference
//! parameters.

use hashbrown::HashMap;
use indexmap::IndexMap;
use log::{debug, trace};
use smallvec::smallvec;

use crate::Compiler;
use crate::stdlib;
use crate::symbol::{Symbol, intern};
use crate::types::ast::{
  Binop, Call, Expr, ExprKind, FuncDef, Ident, LocalDef, PassMode, Stmt, StmtKind, Unop,
};
use crate::types::ir::{
  BinOp, BlockId, Cond, FuncId, Inst, IrTy, Module, Reg, Term, Value,
};
use crate::types::ty::{Scalar, Ty};

fn elem_ir(s: Scalar) -> IrTy {
  match s {
    Scalar::Int | Scalar::Bool => IrTy::I32,
    Scalar::Char => IrTy::I8,
  }
}

/// The IR representation of a semantic type in value position.
pub(crate) fn value_ty(ty: Ty) -> IrTy {
  match ty {
    Ty::Void => IrTy::Void,
    Ty::Int | Ty::Bool => IrTy::I32,
    Ty::Char => IrTy::I8,
    Ty::Array(n, e) => IrTy::Array(n, Box::new(elem_ir(e))),
    Ty::IArray(e) => elem_ir(e).ptr(),
  }
}

/// The IR representation of a parameter of the given type and mode. An
/// incomplete array is only legal by reference and is already a pointer to
/// its element type; everything else gains a pointer level under reference
/// passing.
pub(crate) fn ir_ty(ty: Ty, mode: PassMode) -> IrTy {
  match ty {
    Ty::IArray(e) => elem_ir(e).ptr(),
    _ => {
      let t = value_ty(ty);
      if mode == PassMode::ByReference { t.ptr() } else { t }
    }
  }
}

/// A logged variable: the type its stack slot holds and the register that
/// is the slot's address.
#[derive(Clone, Debug)]
struct Slot {
  ty: IrTy,
  reg: Reg,
}

#[derive(Debug, Default)]
struct ScopeFrame {
  /// Insertion order matters: it fixes the order of captured parameters.
  vars: IndexMap<Symbol, Slot>,
  funcs: HashMap<Symbol, FuncId>,
}

/// The per-scope name maps used during emission. Misses are internal
/// errors: semantic analysis has already resolved every name.
#[derive(Debug, Default)]
struct ScopeLog {
  scopes: Vec<ScopeFrame>,
}

impl ScopeLog {
  fn open_scope(&mut self) { self.scopes.push(ScopeFrame::default()) }

  fn close_scope(&mut self) { self.scopes.pop().expect("no open scope"); }

  fn add_variable(&mut self, name: Symbol, ty: IrTy, reg: Reg) {
    let top = self.scopes.last_mut().expect("no open scope");
    top.vars.insert(name, Slot { ty, reg });
  }

  fn add_function(&mut self, name: Symbol, f: FuncId) {
    let top = self.scopes.last_mut().expect("no open scope");
    top.funcs.insert(name, f);
  }

  fn var(&self, name: Symbol) -> &Slot {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|s| s.vars.get(&name))
      .unwrap_or_else(|| panic!("variable {name} not in scope"))
  }

  fn function(&self, name: Symbol) -> FuncId {
    self
      .scopes
      .iter()
      .rev()
      .find_map(|s| s.funcs.get(&name).copied())
      .unwrap_or_else(|| panic!("function {name} not in scope"))
  }

  fn current_vars(&self) -> impl Iterator<Item = (Symbol, &Slot)> {
    let top = self.scopes.last().expect("no open scope");
    top.vars.iter().map(|(&n, s)| (n, s))
  }
}

/// Emit the IR module for a whole program: the stdlib declarations, a
/// `main` that calls the root user function, and every user function.
pub fn emit_program(comp: &Compiler, root: &FuncDef) -> Module {
  debug!("emitting module {}", comp.filename);
  let mut em = Emitter {
    m: Module::new(&comp.filename),
    log: ScopeLog::default(),
    cur_func: FuncId(0),
    cur_block: BlockId(0),
  };
  em.log.open_scope();
  for (name, id) in stdlib::declare_ir(&mut em.m) {
    em.log.add_function(name, id);
  }

  let main_sym = intern("main");
  let main = em.m.define(main_sym, IrTy::I32, vec![]);
  em.log.add_function(main_sym, main);
  em.cur_func = main;
  em.cur_block = em.m[main].new_block("entry");

  em.func_def(root);

  // wire main to the root user function
  let root_f = em.log.function(root.decl.name);
  match em.m[root_f].ret.clone() {
    IrTy::Void => {
      em.emit(Inst::Call { dst: None, f: root_f, args: vec![] });
      em.terminate(Term::Ret(Some((IrTy::I32, Value::I32(0)))));
    }
    IrTy::I32 => {
      let r = em.fresh_reg();
      em.emit(Inst::Call { dst: Some(r), f: root_f, args: vec![] });
      em.terminate(Term::Ret(Some((IrTy::I32, Value::Reg(r)))));
    }
    IrTy::I8 => {
      // widen through the runtime's own cast so main still returns i32
      let r = em.fresh_reg();
      em.emit(Inst::Call { dst: Some(r), f: root_f, args: vec![] });
      let extend = em.log.function(intern("extend"));
      let w = em.fresh_reg();
      em.emit(Inst::Call { dst: Some(w), f: extend, args: vec![Value::Reg(r)] });
      em.terminate(Term::Ret(Some((IrTy::I32, Value::Reg(w)))));
    }
    ty => panic!("root function returns {ty}"),
  }
  if let Err(err) = em.m[main].verify() {
    panic!("IR verification failed for main: {err}");
  }
  em.log.close_scope();
  em.m
}

struct Emitter {
  m: Module,
  log: ScopeLog,
  cur_func: FuncId,
  cur_block: BlockId,
}

impl Emitter {
  fn emit(&mut self, inst: Inst) {
    self.m[self.cur_func].blocks[self.cur_block].insts.push(inst);
  }

  fn fresh_reg(&mut self) -> Reg { self.m[self.cur_func].fresh_reg() }

  fn terminate(&mut self, term: Term) {
    let block = &mut self.m[self.cur_func].blocks[self.cur_block];
    assert!(block.term.is_none(), "block {} already terminated", block.label);
    block.term = Some(term);
  }

  fn new_block(&mut self, stem: &str) -> BlockId {
    self.m[self.cur_func].new_block(stem)
  }

  fn func_def(&mut self, f: &FuncDef) {
    let d = &f.decl;
    debug!("emitting function {}", d.name);

    // declared formals, then one reference parameter per visible
    // outer-scope binding that no formal shadows
    let mut params: Vec<(Symbol, IrTy)> =
      d.params.iter().map(|p| (p.name, ir_ty(p.ty, p.mode))).collect();
    let captured: Vec<(Symbol, IrTy)> = self
      .log
      .current_vars()
      .filter(|&(name, _)| !params.iter().any(|&(n, _)| n == name))
      .map(|(name, slot)| {
        let ty = if slot.ty.is_ptr() { slot.ty.clone() } else { slot.ty.clone().ptr() };
        (name, ty)
      })
      .collect();
    params.extend(captured);

    let fid = self.m.define(d.name, value_ty(d.result), params);
    self.log.add_function(d.name, fid);
    self.log.open_scope();

    let saved = (self.cur_func, self.cur_block);
    self.cur_func = fid;
    let entry = self.m[fid].new_block("entry");
    self.cur_block = entry;

    // spill every incoming parameter into a stack slot
    for i in 0..self.m[fid].params.len() {
      let (name, ty) = self.m[fid].params[i].clone();
      let slot = self.fresh_reg();
      self.emit(Inst::Alloca { dst: slot, ty: ty.clone() });
      let param = self.m[fid].param_reg(i);
      self.emit(Inst::Store { ty: ty.clone(), val: Value::Reg(param), addr: Value::Reg(slot) });
      self.log.add_variable(name, ty, slot);
    }

    // local definitions; the insertion point returns to the entry block
    // after each one so the allocas stay together
    for l in &d.locals {
      match l {
        LocalDef::Var(v) => {
          let ty = value_ty(v.ty);
          let slot = self.fresh_reg();
          self.emit(Inst::Alloca { dst: slot, ty: ty.clone() });
          self.log.add_variable(v.name, ty, slot);
        }
        LocalDef::Func(g) => self.func_def(g),
      }
      self.cur_block = entry;
    }

    if let Some(body) = &f.body { self.stmt(body) }

    // Alan only requires an explicit return in non-proc functions, and an
    // early return leaves a fresh trailing block; either way the function
    // ends on a typed return
    let term = match self.m[fid].ret {
      IrTy::Void => Term::Ret(None),
      IrTy::I8 => Term::Ret(Some((IrTy::I8, Value::I8(0)))),
      _ => Term::Ret(Some((IrTy::I32, Value::I32(0)))),
    };
    self.terminate(term);
    if let Err(err) = self.m[fid].verify() {
      panic!("IR verification failed for {}: {err}", self.m[fid].name);
    }

    self.log.close_scope();
    (self.cur_func, self.cur_block) = saved;
  }

  fn stmt(&mut self, s: &Stmt) {
    match &s.kind {
      StmtKind::Block(stmts) => for s in stmts { self.stmt(s) },
      StmtKind::Assign(lval, value) => {
        let v = self.expr(value);
        let ExprKind::Id(id) = &lval.kind
          else { panic!("assignment target is not an identifier") };
        let sem_ty = lval.ty.expect("untyped assignment target");
        let addr = self.calc_addr(id, sem_ty);
        self.emit(Inst::Store { ty: value_ty(sem_ty), val: v, addr });
      }
      StmtKind::Call(c) => {
        self.call(c);
      }
      StmtKind::If(cond, then, els) => {
        let c = self.expr(cond);
        if els.is_some() {
          let then_b = self.new_block("then");
          let else_b = self.new_block("else");
          let end_b = self.new_block("endif");
          self.terminate(Term::CondBr(c, then_b, else_b));
          self.cur_block = then_b;
          if let Some(t) = then { self.stmt(t) }
          self.terminate(Term::Br(end_b));
          self.cur_block = else_b;
          if let Some(e) = els { self.stmt(e) }
          self.terminate(Term::Br(end_b));
          self.cur_block = end_b;
        } else {
          let then_b = self.new_block("then");
          let end_b = self.new_block("endif");
          self.terminate(Term::CondBr(c, then_b, end_b));
          self.cur_block = then_b;
          if let Some(t) = then { self.stmt(t) }
          self.terminate(Term::Br(end_b));
          self.cur_block = end_b;
        }
      }
      StmtKind::While(cond, body) => {
        let cond_b = self.new_block("cond");
        let loop_b = self.new_block("loop");
        let after_b = self.new_block("after");
        self.terminate(Term::Br(cond_b));
        self.cur_block = cond_b;
        let c = self.expr(cond);
        self.terminate(Term::CondBr(c, loop_b, after_b));
        self.cur_block = loop_b;
        if let Some(b) = body { self.stmt(b) }
        self.terminate(Term::Br(cond_b));
        self.cur_block = after_b;
      }
      StmtKind::Ret(value) => {
        let term = match value {
          Some(e) => {
            let v = self.expr(e);
            let ty = value_ty(e.ty.expect("untyped return value"));
            Term::Ret(Some((ty, v)))
          }
          None => Term::Ret(None),
        };
        self.terminate(term);
        // statements after an early return stay well-formed in their own
        // unreachable block
        let cont = self.new_block("after_ret");
        self.cur_block = cont;
      }
    }
  }

  fn expr(&mut self, e: &Expr) -> Value {
    match &e.kind {
      ExprKind::Int(n) => Value::I32(*n),
      ExprKind::Char(c) => Value::I8(*c),
      ExprKind::Str(s) => self.string_ptr(s.as_bytes()),
      ExprKind::Id(id) => {
        let sem_ty = e.ty.expect("untyped expression");
        let addr = self.calc_addr(id, sem_ty);
        let ty = match sem_ty {
          Ty::Array(_, el) | Ty::IArray(el) => elem_ir(el),
          t => value_ty(t),
        };
        let dst = self.fresh_reg();
        self.emit(Inst::Load { dst, ty, addr });
        Value::Reg(dst)
      }
      ExprKind::Unop(op, arg) => match op {
        Unop::Plus => self.expr(arg),
        Unop::Minus => {
          let v = self.expr(arg);
          let dst = self.fresh_reg();
          self.emit(Inst::Bin {
            dst, op: BinOp::Sub, ty: IrTy::I32, lhs: Value::I32(0), rhs: v,
          });
          Value::Reg(dst)
        }
        Unop::Not => {
          // logical not on i1
          let v = self.expr(arg);
          let dst = self.fresh_reg();
          self.emit(Inst::Bin {
            dst, op: BinOp::Xor, ty: IrTy::I1, lhs: v, rhs: Value::I1(true),
          });
          Value::Reg(dst)
        }
      },
      ExprKind::Binop(op, l, r) => {
        let lv = self.expr(l);
        let rv = self.expr(r);
        let ty = match r.ty {
          Some(Ty::Char) => IrTy::I8,
          _ => IrTy::I32,
        };
        let dst = self.fresh_reg();
        let inst = match op {
          Binop::Plus => Inst::Bin { dst, op: BinOp::Add, ty, lhs: lv, rhs: rv },
          Binop::Minus => Inst::Bin { dst, op: BinOp::Sub, ty, lhs: lv, rhs: rv },
          Binop::Times => Inst::Bin { dst, op: BinOp::Mul, ty, lhs: lv, rhs: rv },
          Binop::Div => Inst::Bin { dst, op: BinOp::SDiv, ty, lhs: lv, rhs: rv },
          Binop::Mod => Inst::Bin { dst, op: BinOp::SRem, ty, lhs: lv, rhs: rv },
          Binop::Eq => Inst::Icmp { dst, cond: Cond::Eq, ty, lhs: lv, rhs: rv },
          Binop::Ne => Inst::Icmp { dst, cond: Cond::Ne, ty, lhs: lv, rhs: rv },
          Binop::Lt => Inst::Icmp { dst, cond: Cond::Slt, ty, lhs: lv, rhs: rv },
          Binop::Le => Inst::Icmp { dst, cond: Cond::Sle, ty, lhs: lv, rhs: rv },
          Binop::Gt => Inst::Icmp { dst, cond: Cond::Sgt, ty, lhs: lv, rhs: rv },
          Binop::Ge => Inst::Icmp { dst, cond: Cond::Sge, ty, lhs: lv, rhs: rv },
          Binop::And => Inst::Bin { dst, op: BinOp::And, ty: IrTy::I1, lhs: lv, rhs: rv },
          Binop::Or => Inst::Bin { dst, op: BinOp::Or, ty: IrTy::I1, lhs: lv, rhs: rv },
        };
        self.emit(inst);
        Value::Reg(dst)
      }
      ExprKind::Call(c) => self.call(c).expect("value of a proc call"),
    }
  }

  /// A pointer to the first byte of a fresh global holding `data` plus a
  /// trailing NUL.
  fn string_ptr(&mut self, data: &[u8]) -> Value {
    let g = self.m.add_string(data);
    let base = self.m.string_ty(g);
    let dst = self.fresh_reg();
    self.emit(Inst::Gep {
      dst,
      base,
      addr: Value::Global(g),
      idxs: smallvec![(IrTy::I32, Value::I32(0)), (IrTy::I32, Value::I32(0))],
    });
    Value::Reg(dst)
  }

  /// The address of the storage an identifier denotes, per its semantic
  /// type: reference parameters are dereferenced once, bare array names
  /// become element-0 pointers, indexed names become element pointers.
  fn calc_addr(&mut self, id: &Ident, sem_ty: Ty) -> Value {
    let slot = self.log.var(id.name).clone();
    let (addr, eff) = if slot.ty.is_ptr() {
      let r = self.fresh_reg();
      self.emit(Inst::Load { dst: r, ty: slot.ty.clone(), addr: Value::Reg(slot.reg) });
      (Value::Reg(r), slot.ty.pointee().clone())
    } else {
      (Value::Reg(slot.reg), slot.ty)
    };

    if sem_ty.is_array() {
      // the name itself is the address being passed along
      let idxs = if matches!(eff, IrTy::Array(..)) {
        trace!("addr {}: complete array", id.name);
        smallvec![(IrTy::I32, Value::I32(0)), (IrTy::I32, Value::I32(0))]
      } else {
        trace!("addr {}: incomplete array", id.name);
        smallvec![(IrTy::I32, Value::I32(0))]
      };
      let dst = self.fresh_reg();
      self.emit(Inst::Gep { dst, base: eff, addr, idxs });
      return Value::Reg(dst);
    }

    if let Some(ix) = &id.index {
      let ix_ty = match ix.ty {
        Some(Ty::Char) => IrTy::I8,
        _ => IrTy::I32,
      };
      let iv = self.expr(ix);
      let idxs = if matches!(eff, IrTy::Array(..)) {
        trace!("addr {}: element of a complete array", id.name);
        smallvec![(IrTy::I32, Value::I32(0)), (ix_ty, iv)]
      } else {
        trace!("addr {}: element of an incomplete array", id.name);
        smallvec![(ix_ty, iv)]
      };
      let dst = self.fresh_reg();
      self.emit(Inst::Gep { dst, base: eff, addr, idxs });
      return Value::Reg(dst);
    }

    trace!("addr {}: scalar slot", id.name);
    addr
  }

  /// Lower a call. Declared arguments are taken from the AST; the callee's
  /// remaining parameters are its captured outer-scope bindings, satisfied
  /// from the caller's own slots so the callee ends up with a pointer to
  /// the original storage.
  fn call(&mut self, c: &Call) -> Option<Value> {
    let f = self.log.function(c.name);
    let (ret, params) = {
      let callee = &self.m[f];
      (callee.ret.clone(), callee.params.clone())
    };
    let mut args = Vec::with_capacity(params.len());
    for (i, (pname, pty)) in params.iter().enumerate() {
      match c.args.get(i) {
        Some(arg) => {
          if !pty.is_ptr() {
            args.push(self.expr(arg));
          } else if let ExprKind::Str(s) = &arg.kind {
            args.push(self.string_ptr(s.as_bytes()));
          } else {
            let ExprKind::Id(id) = &arg.kind
              else { panic!("reference argument is not an l-value") };
            let sem_ty = arg.ty.expect("untyped argument");
            args.push(self.calc_addr(id, sem_ty));
          }
        }
        None => {
          // dereference once per pointer level so the callee receives the
          // original storage, not our slot
          let slot = self.log.var(*pname).clone();
          if slot.ty.is_ptr() {
            let r = self.fresh_reg();
            self.emit(Inst::Load { dst: r, ty: slot.ty, addr: Value::Reg(slot.reg) });
            args.push(Value::Reg(r));
          } else {
            args.push(Value::Reg(slot.reg));
          }
        }
      }
    }
    if ret == IrTy::Void {
      self.emit(Inst::Call { dst: None, f, args });
      None
    } else {
      let dst = self.fresh_reg();
      self.emit(Inst::Call { dst: Some(dst), f, args });
      Some(Value::Reg(dst))
    }
  }
}
