//! Semantic analysis: name resolution and type checking.
//!
//! A single post-order walk over the AST that resolves names against the
//! symbol table, attaches a type to every expression, fills the
//! `nesting_diff`/`offset` annotations on identifiers, and enforces the
//! typing rules. Errors are reported through the [`Compiler`] context and
//! analysis continues with a plausible type where one exists, so one root
//! cause does not cascade: an unresolved identifier poisons to `bool`, and
//! checks involving an untyped side are suppressed.

use if_chain::if_chain;
use itertools::{EitherOrBoth, Itertools};
use smallvec::SmallVec;

use crate::{Compiler, DiagKind};
use crate::stdlib;
use crate::symtab::{EntryId, EntryKind, Lookup, SymbolTable};
use crate::types::ast::{
  Binop, Call, Expr, ExprKind, FuncDecl, FuncDef, Ident, LocalDef, Param, PassMode, Stmt,
  StmtKind, Unop, VarDef,
};
use crate::types::ty::Ty;

/// One element of the function stack: the function entry (absent when its
/// declaration failed) and whether a `return` definitely executes on the
/// straight-line path through its body.
struct Frame {
  entry: Option<EntryId>,
  returned: bool,
}

/// Analyze a whole program. Opens the outermost scope, registers the
/// runtime library in it, and walks the root function definition. The
/// returned table still has that outermost scope open.
pub fn analyze(comp: &mut Compiler, root: &mut FuncDef) -> SymbolTable {
  let mut an = Analyzer {
    comp,
    tab: SymbolTable::new(),
    stack: SmallVec::new(),
    branch_depth: 0,
  };
  an.tab.open_scope();
  stdlib::declare(&mut an.tab);
  an.func_def(root);
  debug_assert!(an.stack.is_empty(), "function stack not drained");
  an.tab
}

struct Analyzer<'a> {
  comp: &'a mut Compiler,
  tab: SymbolTable,
  /// The functions currently being defined; the top is the current one.
  stack: SmallVec<[Frame; 4]>,
  /// How many `if`/`while` bodies enclose the current statement. A
  /// `return` only counts as definite at depth zero.
  branch_depth: u32,
}

impl Analyzer<'_> {
  fn func_def(&mut self, f: &mut FuncDef) {
    self.func_decl(&mut f.decl);
    if let Some(body) = &mut f.body { self.stmt(body) }
    self.tab.close_scope();
    let frame = self.stack.pop().expect("function stack underflow");
    if !frame.returned && f.decl.result != Ty::Void {
      self.comp.warning(DiagKind::NonVoidMissingReturn(f.decl.name));
    }
  }

  fn func_decl(&mut self, d: &mut FuncDecl) {
    self.comp.line = d.line;
    let entry = match self.tab.new_function(d.name) {
      Ok(e) => Some(e),
      Err(kind) => {
        self.comp.error(kind);
        None
      }
    };
    self.tab.open_scope();
    self.stack.push(Frame { entry, returned: d.result == Ty::Void });
    // on a failed declaration the scope stays open for balance, but the
    // header contents are skipped
    let Some(entry) = entry else { return };
    for p in &d.params { self.param(p, entry) }
    if let Err(kind) = self.tab.end_function_header(entry, d.result) {
      self.comp.error(kind);
    }
    for l in &mut d.locals {
      match l {
        LocalDef::Var(v) => self.var_def(v),
        LocalDef::Func(g) => self.func_def(g),
      }
    }
    d.frame_size = self.tab.neg_offset();
  }

  fn param(&mut self, p: &Param, func: EntryId) {
    self.comp.line = p.line;
    if p.mode == PassMode::ByValue && p.ty.is_array() {
      self.comp.error(DiagKind::ArrayByValue(p.name));
    }
    if let Err(kind) = self.tab.new_parameter(p.name, p.ty, p.mode, func) {
      self.comp.error(kind);
    }
  }

  fn var_def(&mut self, v: &mut VarDef) {
    self.comp.line = v.line;
    if let Some(n) = v.dim {
      if n <= 0 {
        self.comp.error(DiagKind::IllegalArraySize(v.name));
      } else {
        let elem = v.ty.scalar().expect("array element must be scalar");
        v.ty = Ty::array(u32::try_from(n).expect("checked positive"), elem);
      }
    }
    if let Err(kind) = self.tab.new_variable(v.name, v.ty) {
      self.comp.error(kind);
    }
  }

  fn stmt(&mut self, s: &mut Stmt) {
    self.comp.line = s.line;
    match &mut s.kind {
      StmtKind::Block(stmts) => for s in stmts { self.stmt(s) },
      StmtKind::Assign(lval, value) => {
        self.expr(lval);
        if lval.ty.is_some_and(Ty::is_array) {
          self.comp.error(DiagKind::ArrayAssignment);
        }
        self.expr(value);
        let ExprKind::Id(id) = &lval.kind
          else { panic!("assignment target is not an identifier") };
        // suppress the mismatch when either side already failed to resolve
        if self.tab.lookup(id.name, Lookup::All).is_none() { return }
        let (Some(lt), Some(rt)) = (lval.ty, value.ty) else { return };
        if lt != rt { self.comp.error(DiagKind::AssignTypeMismatch) }
      }
      StmtKind::Call(c) => {
        self.call(c);
        if_chain! {
          if let Some(f) = self.tab.lookup(c.name, Lookup::All);
          if let EntryKind::Function(info) = &self.tab[f].kind;
          if info.result != Ty::Void;
          then { self.comp.error(DiagKind::CallStmtNotProc(c.name)) }
        }
      }
      StmtKind::If(cond, then, els) => {
        self.expr(cond);
        if cond.ty.is_some_and(|t| t != Ty::Bool) {
          self.comp.error(DiagKind::ConditionNotBoolean("if"));
        }
        self.branch_depth += 1;
        if let Some(t) = then { self.stmt(t) }
        if let Some(e) = els { self.stmt(e) }
        self.branch_depth -= 1;
      }
      StmtKind::While(cond, body) => {
        self.expr(cond);
        if cond.ty.is_some_and(|t| t != Ty::Bool) {
          self.comp.error(DiagKind::ConditionNotBoolean("while loop"));
        }
        self.branch_depth += 1;
        if let Some(b) = body { self.stmt(b) }
        self.branch_depth -= 1;
      }
      StmtKind::Ret(value) => {
        let result = {
          let frame = self.stack.last().expect("return outside of function body");
          frame.entry.map(|e| {
            let EntryKind::Function(info) = &self.tab[e].kind
              else { panic!("current function is not a function entry") };
            info.result
          })
        };
        if let Some(e) = value {
          self.expr(e);
          if let (Some(result), Some(ety)) = (result, e.ty) {
            if result == Ty::Void {
              self.comp.error(DiagKind::VoidReturnsValue);
            } else if result != ety {
              self.comp.error(DiagKind::ReturnTypeMismatch);
            }
          }
        } else if result.is_some_and(|r| r != Ty::Void) {
          self.comp.error(DiagKind::MissingReturnValue);
        }
        if self.branch_depth == 0 {
          self.stack.last_mut().expect("function stack underflow").returned = true;
        }
      }
    }
  }

  fn expr(&mut self, e: &mut Expr) {
    self.comp.line = e.line;
    let ty = match &mut e.kind {
      ExprKind::Int(_) => Some(Ty::Int),
      ExprKind::Char(_) => Some(Ty::Char),
      ExprKind::Str(s) => {
        let len = u32::try_from(s.len()).expect("string literal too long");
        Some(Ty::Array(len, crate::types::ty::Scalar::Char))
      }
      ExprKind::Id(id) => self.ident(id),
      ExprKind::Unop(op, arg) => self.unop(*op, arg),
      ExprKind::Binop(op, l, r) => self.binop(*op, l, r),
      ExprKind::Call(c) => self.call(c),
    };
    e.ty = ty;
  }

  fn ident(&mut self, id: &mut Ident) -> Option<Ty> {
    if let Some(ix) = &mut id.index { self.expr(ix) }
    let Some(eid) = self.tab.lookup(id.name, Lookup::All) else {
      self.comp.error(DiagKind::UnknownIdentifier(id.name));
      return Some(Ty::Bool); // poison, suppresses cascading errors
    };
    let level = self.tab[eid].level;
    let indexed = id.index.is_some();
    let (ty, offset) = match &self.tab[eid].kind {
      EntryKind::Variable { ty, offset } | EntryKind::Parameter { ty, offset, .. } => {
        if !indexed {
          (Some(*ty), *offset)
        } else if let Some(elem) = ty.elem() {
          (Some(elem.ty()), *offset)
        } else {
          let offset = *offset;
          self.comp.error(DiagKind::IndexedNonArray(id.name));
          (None, offset)
        }
      }
      // a function reference appearing under a call
      EntryKind::Function(info) => (Some(info.result), 0),
    };
    id.nesting_diff = self.tab.level() - level;
    id.offset = offset;
    ty
  }

  fn unop(&mut self, op: Unop, arg: &mut Expr) -> Option<Ty> {
    self.expr(arg);
    match op {
      Unop::Plus | Unop::Minus => {
        if arg.ty.is_some_and(|t| t != Ty::Int) {
          self.comp.error(DiagKind::SignednessNotInt);
        }
        Some(Ty::Int)
      }
      Unop::Not => {
        if arg.ty.is_some_and(|t| t != Ty::Bool) {
          self.comp.error(DiagKind::BoolOperandExpected(op.sym()));
        }
        Some(Ty::Bool)
      }
    }
  }

  fn binop(&mut self, op: Binop, l: &mut Expr, r: &mut Expr) -> Option<Ty> {
    self.expr(l);
    self.expr(r);
    match op {
      Binop::Plus | Binop::Minus | Binop::Times | Binop::Div | Binop::Mod => {
        self.check_scalar_op(l.ty, r.ty, op.sym());
        r.ty
      }
      Binop::Eq | Binop::Ne | Binop::Lt | Binop::Le | Binop::Gt | Binop::Ge => {
        self.check_scalar_op(l.ty, r.ty, op.sym());
        Some(Ty::Bool)
      }
      Binop::And | Binop::Or => {
        if l.ty.is_some_and(|t| t != Ty::Bool) || r.ty.is_some_and(|t| t != Ty::Bool) {
          self.comp.error(DiagKind::BoolOperandExpected(op.sym()));
        }
        Some(Ty::Bool)
      }
    }
  }

  /// Arithmetic and comparison operands must agree and be `int` or `byte`.
  fn check_scalar_op(&mut self, l: Option<Ty>, r: Option<Ty>, op: &'static str) {
    let (Some(l), Some(r)) = (l, r) else { return };
    if l != r { self.comp.error(DiagKind::OperatorTypeMismatch(op)) }
    if l != Ty::Int && l != Ty::Char {
      self.comp.error(DiagKind::OperatorOperandType(op));
    }
  }

  fn call(&mut self, c: &mut Call) -> Option<Ty> {
    self.comp.line = c.line;
    let Some(f) = self.tab.lookup(c.name, Lookup::All) else {
      self.comp.error(DiagKind::UnknownIdentifier(c.name));
      return None;
    };
    let EntryKind::Function(info) = &self.tab[f].kind else {
      self.comp.error(DiagKind::NotAFunction(c.name));
      return None;
    };
    let result = info.result;
    let params = info.params.clone();
    for a in &mut c.args { self.expr(a) }
    self.comp.line = c.line;
    for pair in c.args.iter().zip_longest(&params) {
      match pair {
        EitherOrBoth::Both(arg, &p) => self.check_arg(arg, p),
        EitherOrBoth::Left(_) => {
          self.comp.error(DiagKind::TooManyArgs(c.name));
          break;
        }
        EitherOrBoth::Right(_) => {
          self.comp.error(DiagKind::TooFewArgs(c.name));
          break;
        }
      }
    }
    Some(result)
  }

  fn check_arg(&mut self, arg: &Expr, param: EntryId) {
    let (pty, mode) = match &self.tab[param].kind {
      EntryKind::Parameter { ty, mode, .. } => (*ty, *mode),
      _ => panic!("function parameter list holds a non-parameter"),
    };
    if mode == PassMode::ByReference {
      // the actual must alias real storage: a resolvable identifier
      // (indexed or not) or a string literal
      let lvalue = if_chain! {
        if let ExprKind::Id(id) = &arg.kind;
        if self.tab.lookup(id.name, Lookup::All).is_some();
        then { true }
        else { matches!(arg.kind, ExprKind::Str(_)) }
      };
      if !lvalue {
        self.comp.error(DiagKind::RefActualNotLvalue);
        return;
      }
    }
    match pty {
      Ty::IArray(elem) => {
        let Some(at) = arg.ty else { return };
        match at.elem() {
          None => self.comp.error(DiagKind::ArgArrayExpected),
          Some(ae) if ae != elem => self.comp.error(DiagKind::ArgElementTypeMismatch),
          Some(_) => {}
        }
      }
      _ => {
        if arg.ty.is_some_and(|t| t != pty) {
          self.comp.error(DiagKind::ArgTypeMismatch);
        }
      }
    }
  }
}
