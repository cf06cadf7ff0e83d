//! The low-level IR emitted by the compiler: a module of externally-linked
//! functions made of basic blocks holding SSA-form instructions, plus global
//! string constants. The textual printer follows the LLVM surface syntax so
//! the output can be fed to a downstream assembler toolchain unchanged.

use std::fmt::{self, Display, Write as _};

use smallvec::SmallVec;

use crate::symbol::Symbol;
use crate::types::{IdxVec, mk_id};

mk_id! {
  /// An index into [`Module::funcs`].
  FuncId,
  /// An index into a function's block list.
  BlockId,
  /// An index into [`Module::strings`].
  GlobalId,
}

/// A virtual register, local to its function. The first `n` registers of a
/// defined function are its `n` incoming parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Reg(pub u32);

impl Display for Reg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "%{}", self.0) }
}

/// An IR value type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrTy {
  /// The empty result type.
  Void,
  /// A 1-bit boolean, produced by comparisons and consumed by branches.
  I1,
  /// An 8-bit integer.
  I8,
  /// A 32-bit integer.
  I32,
  /// A fixed-size array.
  Array(u32, Box<IrTy>),
  /// A pointer to the inner type.
  Ptr(Box<IrTy>),
}

impl IrTy {
  /// A pointer to this type.
  #[must_use] pub fn ptr(self) -> IrTy { IrTy::Ptr(Box::new(self)) }

  /// Whether this is a pointer type.
  #[must_use] pub fn is_ptr(&self) -> bool { matches!(self, IrTy::Ptr(_)) }

  /// The pointed-to type. Panics on non-pointers.
  #[must_use] pub fn pointee(&self) -> &IrTy {
    let IrTy::Ptr(t) = self else { panic!("pointee of non-pointer type {self}") };
    t
  }
}

impl Display for IrTy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      IrTy::Void => write!(f, "void"),
      IrTy::I1 => write!(f, "i1"),
      IrTy::I8 => write!(f, "i8"),
      IrTy::I32 => write!(f, "i32"),
      IrTy::Array(n, t) => write!(f, "[{n} x {t}]"),
      IrTy::Ptr(t) => write!(f, "{t}*"),
    }
  }
}

/// An operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
  /// A virtual register.
  Reg(Reg),
  /// An `i32` immediate.
  I32(i32),
  /// An `i8` immediate.
  I8(u8),
  /// An `i1` immediate.
  I1(bool),
  /// The address of a string constant.
  Global(GlobalId),
}

impl Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Reg(r) => r.fmt(f),
      Value::I32(n) => n.fmt(f),
      Value::I8(n) => n.fmt(f),
      Value::I1(b) => b.fmt(f),
      Value::Global(g) => write!(f, "@str{}", g.0),
    }
  }
}

/// Integer binary operations. Division and remainder are signed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp { Add, Sub, Mul, SDiv, SRem, And, Or, Xor }

impl Display for BinOp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BinOp::Add => write!(f, "add"),
      BinOp::Sub => write!(f, "sub"),
      BinOp::Mul => write!(f, "mul"),
      BinOp::SDiv => write!(f, "sdiv"),
      BinOp::SRem => write!(f, "srem"),
      BinOp::And => write!(f, "and"),
      BinOp::Or => write!(f, "or"),
      BinOp::Xor => write!(f, "xor"),
    }
  }
}

/// Signed comparison conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cond { Eq, Ne, Slt, Sle, Sgt, Sge }

impl Display for Cond {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Cond::Eq => write!(f, "eq"),
      Cond::Ne => write!(f, "ne"),
      Cond::Slt => write!(f, "slt"),
      Cond::Sle => write!(f, "sle"),
      Cond::Sgt => write!(f, "sgt"),
      Cond::Sge => write!(f, "sge"),
    }
  }
}

/// A non-terminator instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inst {
  /// `dst = alloca ty`: reserve a stack slot, yielding its address.
  Alloca { dst: Reg, ty: IrTy },
  /// `dst = load ty, ty* addr`.
  Load { dst: Reg, ty: IrTy, addr: Value },
  /// `store ty val, ty* addr`.
  Store { ty: IrTy, val: Value, addr: Value },
  /// `dst = getelementptr base, base* addr, idxs…`: address arithmetic over
  /// `addr`, whose pointee type is `base`.
  Gep { dst: Reg, base: IrTy, addr: Value, idxs: SmallVec<[(IrTy, Value); 2]> },
  /// `dst = op ty lhs, rhs`.
  Bin { dst: Reg, op: BinOp, ty: IrTy, lhs: Value, rhs: Value },
  /// `dst = icmp cond ty lhs, rhs`, yielding an `i1`.
  Icmp { dst: Reg, cond: Cond, ty: IrTy, lhs: Value, rhs: Value },
  /// A direct call. `dst` is absent for void callees. Argument types come
  /// from the callee's signature.
  Call { dst: Option<Reg>, f: FuncId, args: Vec<Value> },
}

/// A block terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Term {
  /// An unconditional branch.
  Br(BlockId),
  /// A conditional branch on an `i1` operand.
  CondBr(Value, BlockId, BlockId),
  /// Return, with the value and its type for non-void functions.
  Ret(Option<(IrTy, Value)>),
}

/// A basic block: a label, straight-line instructions, one terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
  /// The printed label.
  pub label: Box<str>,
  /// The instructions, in order.
  pub insts: Vec<Inst>,
  /// The terminator; `None` only while the block is still being built.
  pub term: Option<Term>,
}

/// A structural defect found by [`Function::verify`].
#[derive(Debug, PartialEq, Eq)]
pub enum VerifyErr {
  /// A block was left without a terminator.
  MissingTerminator(Box<str>),
  /// A `ret` disagrees with the function's result type.
  RetTypeMismatch(Box<str>),
}

impl Display for VerifyErr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      VerifyErr::MissingTerminator(l) => write!(f, "block {l} has no terminator"),
      VerifyErr::RetTypeMismatch(l) => write!(f, "return type mismatch in block {l}"),
    }
  }
}

/// An IR function. A function with no blocks is an external declaration.
#[derive(Debug)]
pub struct Function {
  /// The linkage name, unique within the module.
  pub name: Box<str>,
  /// The result type.
  pub ret: IrTy,
  /// Parameter names and types. Registers `0..params.len()` are the
  /// incoming parameters; names are consulted when satisfying captured
  /// outer-scope parameters at call sites.
  pub params: Vec<(Symbol, IrTy)>,
  /// The basic blocks, in layout order. The first is the entry.
  pub blocks: IdxVec<BlockId, Block>,
  next_reg: u32,
}

impl Function {
  /// Whether this is an external declaration.
  #[must_use] pub fn is_decl(&self) -> bool { self.blocks.is_empty() }

  /// Allocate a fresh virtual register.
  pub fn fresh_reg(&mut self) -> Reg {
    let r = Reg(self.next_reg);
    self.next_reg += 1;
    r
  }

  /// The register holding the `i`-th incoming parameter.
  #[must_use] pub fn param_reg(&self, i: usize) -> Reg {
    debug_assert!(i < self.params.len());
    Reg(u32::try_from(i).expect("parameter index overflow"))
  }

  /// Append a fresh, unterminated block. `entry` keeps its bare name; every
  /// other label gets the block index as a suffix so labels stay unique.
  pub fn new_block(&mut self, stem: &str) -> BlockId {
    let id = self.blocks.peek();
    let label = if id.0 == 0 {
      stem.into()
    } else {
      format!("{stem}{}", id.0).into_boxed_str()
    };
    self.blocks.push(Block { label, insts: vec![], term: None })
  }

  /// Check the function's structure: every block terminated, every `ret`
  /// agreeing with the result type. Unreachable instructions after an early
  /// return live in their own trailing block and are tolerated.
  pub fn verify(&self) -> Result<(), VerifyErr> {
    for (_, bl) in self.blocks.enum_iter() {
      match &bl.term {
        None => return Err(VerifyErr::MissingTerminator(bl.label.clone())),
        Some(Term::Ret(None)) if self.ret != IrTy::Void =>
          return Err(VerifyErr::RetTypeMismatch(bl.label.clone())),
        Some(Term::Ret(Some((ty, _)))) if *ty != self.ret =>
          return Err(VerifyErr::RetTypeMismatch(bl.label.clone())),
        Some(_) => {}
      }
    }
    Ok(())
  }
}

/// The IR module: string constants and functions, in creation order.
#[derive(Debug, Default)]
pub struct Module {
  /// The module name (the source file name).
  pub name: Box<str>,
  /// String constant data, without the trailing NUL (the printer adds it).
  pub strings: IdxVec<GlobalId, Box<[u8]>>,
  /// All functions: stdlib declarations first, then `main`, then the user
  /// functions as they were emitted.
  pub funcs: IdxVec<FuncId, Function>,
}

impl Module {
  /// An empty module.
  #[must_use] pub fn new(name: &str) -> Self {
    Module { name: name.into(), ..Self::default() }
  }

  /// Add an external function declaration.
  pub fn declare(&mut self, name: Symbol, ret: IrTy, params: Vec<(Symbol, IrTy)>) -> FuncId {
    let name = self.uniquify(name.as_str());
    self.funcs.push(Function { name, ret, params, blocks: IdxVec::new(), next_reg: 0 })
  }

  /// Add a function definition (initially with no blocks; callers create
  /// the entry block next).
  pub fn define(&mut self, name: Symbol, ret: IrTy, params: Vec<(Symbol, IrTy)>) -> FuncId {
    let name = self.uniquify(name.as_str());
    let next_reg = u32::try_from(params.len()).expect("too many parameters");
    self.funcs.push(Function { name, ret, params, blocks: IdxVec::new(), next_reg })
  }

  /// Add a string constant, returning its global.
  pub fn add_string(&mut self, data: &[u8]) -> GlobalId {
    self.strings.push(data.into())
  }

  /// The type of a string global: its data plus the trailing NUL.
  #[must_use] pub fn string_ty(&self, g: GlobalId) -> IrTy {
    let len = u32::try_from(self.strings[g].len()).expect("string too long");
    IrTy::Array(len + 1, Box::new(IrTy::I8))
  }

  // Nested functions in sibling scopes may share a source name; the module
  // namespace is flat, so later ones get a numeric suffix.
  fn uniquify(&self, base: &str) -> Box<str> {
    let taken = |s: &str| self.funcs.0.iter().any(|f| &*f.name == s);
    if !taken(base) { return base.into() }
    let mut n = 1;
    loop {
      let cand = format!("{base}.{n}");
      if !taken(&cand) { return cand.into_boxed_str() }
      n += 1;
    }
  }
}

impl std::ops::Index<FuncId> for Module {
  type Output = Function;
  fn index(&self, f: FuncId) -> &Function { &self.funcs[f] }
}

impl std::ops::IndexMut<FuncId> for Module {
  fn index_mut(&mut self, f: FuncId) -> &mut Function { &mut self.funcs[f] }
}

fn write_bytes_escaped(f: &mut fmt::Formatter<'_>, data: &[u8]) -> fmt::Result {
  for &b in data {
    match b {
      b'"' | b'\\' => write!(f, "\\{b:02X}")?,
      0x20..=0x7e => f.write_char(char::from(b))?,
      _ => write!(f, "\\{b:02X}")?,
    }
  }
  Ok(())
}

fn write_inst(f: &mut fmt::Formatter<'_>, m: &Module, inst: &Inst) -> fmt::Result {
  match inst {
    Inst::Alloca { dst, ty } => writeln!(f, "  {dst} = alloca {ty}"),
    Inst::Load { dst, ty, addr } => writeln!(f, "  {dst} = load {ty}, {ty}* {addr}"),
    Inst::Store { ty, val, addr } => writeln!(f, "  store {ty} {val}, {ty}* {addr}"),
    Inst::Gep { dst, base, addr, idxs } => {
      write!(f, "  {dst} = getelementptr {base}, {base}* {addr}")?;
      for (ty, ix) in idxs { write!(f, ", {ty} {ix}")? }
      writeln!(f)
    }
    Inst::Bin { dst, op, ty, lhs, rhs } =>
      writeln!(f, "  {dst} = {op} {ty} {lhs}, {rhs}"),
    Inst::Icmp { dst, cond, ty, lhs, rhs } =>
      writeln!(f, "  {dst} = icmp {cond} {ty} {lhs}, {rhs}"),
    Inst::Call { dst, f: callee, args } => {
      let callee = &m[*callee];
      write!(f, "  ")?;
      if let Some(dst) = dst { write!(f, "{dst} = ")? }
      write!(f, "call {} @{}(", callee.ret, callee.name)?;
      for (i, (arg, (_, ty))) in args.iter().zip(&callee.params).enumerate() {
        if i != 0 { write!(f, ", ")? }
        write!(f, "{ty} {arg}")?;
      }
      writeln!(f, ")")
    }
  }
}

fn write_term(f: &mut fmt::Formatter<'_>, func: &Function, term: &Term) -> fmt::Result {
  match term {
    Term::Br(b) => writeln!(f, "  br label %{}", func.blocks[*b].label),
    Term::CondBr(c, t, e) => writeln!(
      f, "  br i1 {c}, label %{}, label %{}",
      func.blocks[*t].label, func.blocks[*e].label,
    ),
    Term::Ret(None) => writeln!(f, "  ret void"),
    Term::Ret(Some((ty, v))) => writeln!(f, "  ret {ty} {v}"),
  }
}

impl Display for Module {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "; ModuleID = '{}'", self.name)?;
    writeln!(f, "source_filename = \"{}\"", self.name)?;
    if !self.strings.is_empty() { writeln!(f)? }
    for (g, data) in self.strings.enum_iter() {
      write!(f, "@str{} = private unnamed_addr constant {} c\"", g.0, self.string_ty(g))?;
      write_bytes_escaped(f, data)?;
      writeln!(f, "\\00\"")?;
    }
    for (_, func) in self.funcs.enum_iter() {
      writeln!(f)?;
      if func.is_decl() {
        write!(f, "declare {} @{}(", func.ret, func.name)?;
        for (i, (_, ty)) in func.params.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{ty}")?;
        }
        writeln!(f, ")")?;
      } else {
        write!(f, "define {} @{}(", func.ret, func.name)?;
        for (i, (_, ty)) in func.params.iter().enumerate() {
          if i != 0 { write!(f, ", ")? }
          write!(f, "{ty} {}", Reg(u32::try_from(i).expect("overflow")))?;
        }
        writeln!(f, ") {{")?;
        for (_, bl) in func.blocks.enum_iter() {
          writeln!(f, "{}:", bl.label)?;
          for inst in &bl.insts { write_inst(f, self, inst)? }
          let term = bl.term.as_ref().expect("printing unterminated block");
          write_term(f, func, term)?;
        }
        writeln!(f, "}}")?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;

  // A minimal type parser over the printed syntax, enough to reparse the
  // parameter lists of `define`/`declare` lines.
  fn parse_ty(s: &str) -> IrTy {
    let s = s.trim();
    if let Some(inner) = s.strip_suffix('*') { return parse_ty(inner).ptr() }
    if let Some(inner) = s.strip_prefix('[') {
      let inner = inner.strip_suffix(']').expect("unclosed array type");
      let (n, elem) = inner.split_once(" x ").expect("malformed array type");
      return IrTy::Array(n.trim().parse().expect("bad array size"), Box::new(parse_ty(elem)));
    }
    match s {
      "void" => IrTy::Void,
      "i1" => IrTy::I1,
      "i8" => IrTy::I8,
      "i32" => IrTy::I32,
      _ => panic!("unknown type token {s:?}"),
    }
  }

  fn reparse_signature(line: &str) -> (IrTy, Vec<IrTy>) {
    let rest = line
      .strip_prefix("define ")
      .or_else(|| line.strip_prefix("declare "))
      .expect("not a signature line");
    let open = rest.find('(').expect("no parameter list");
    let (head, params) = rest.split_at(open);
    let ret = parse_ty(head.rsplit_once(" @").expect("no function name").0);
    let params = params[1..].rsplit_once(')').expect("unclosed parameter list").0;
    let params = if params.trim().is_empty() {
      vec![]
    } else {
      params
        .split(',')
        .map(|p| {
          // drop the trailing register name; array types contain spaces
          let p = p.trim();
          parse_ty(p.rsplit_once(" %").map_or(p, |(ty, _)| ty))
        })
        .collect()
    };
    (ret, params)
  }

  #[test]
  fn signature_round_trip() {
    let mut m = Module::new("sig.alan");
    let sigs = [
      (intern("f"), IrTy::I32, vec![(intern("x"), IrTy::I8), (intern("y"), IrTy::I32.ptr())]),
      (intern("g"), IrTy::Void, vec![(intern("s"), IrTy::I8.ptr())]),
      (intern("h"), IrTy::I8, vec![(intern("a"), IrTy::Array(6, Box::new(IrTy::I8)).ptr())]),
      (intern("z"), IrTy::Void, vec![]),
    ];
    for (name, ret, params) in sigs.clone() {
      let id = m.define(name, ret.clone(), params);
      let entry = m[id].new_block("entry");
      let term = match ret {
        IrTy::Void => Term::Ret(None),
        ty => Term::Ret(Some((ty, Value::I32(0)))),
      };
      m[id].blocks[entry].term = Some(term);
    }
    let printed = m.to_string();
    let mut lines = printed.lines().filter(|l| l.starts_with("define"));
    for (_, ret, params) in sigs {
      let (r, ps) = reparse_signature(lines.next().expect("missing signature"));
      assert_eq!(r, ret);
      assert_eq!(ps, params.into_iter().map(|(_, t)| t).collect::<Vec<_>>());
    }
  }

  #[test]
  fn verify_catches_unterminated_blocks() {
    let mut m = Module::new("v.alan");
    let id = m.define(intern("badfn"), IrTy::Void, vec![]);
    m[id].new_block("entry");
    assert_eq!(m[id].verify(), Err(VerifyErr::MissingTerminator("entry".into())));
    let entry = BlockId(0);
    m[id].blocks[entry].term = Some(Term::Ret(Some((IrTy::I32, Value::I32(0)))));
    assert_eq!(m[id].verify(), Err(VerifyErr::RetTypeMismatch("entry".into())));
    m[id].blocks[entry].term = Some(Term::Ret(None));
    assert_eq!(m[id].verify(), Ok(()));
  }

  #[test]
  fn string_constants_escape_and_terminate() {
    let mut m = Module::new("s.alan");
    m.add_string(b"hi\n");
    let printed = m.to_string();
    assert!(printed.contains("@str0 = private unnamed_addr constant [4 x i8] c\"hi\\0A\\00\""));
  }

  #[test]
  fn duplicate_names_get_suffixes() {
    let mut m = Module::new("d.alan");
    let a = m.declare(intern("inner"), IrTy::Void, vec![]);
    let b = m.declare(intern("inner"), IrTy::Void, vec![]);
    assert_eq!(&*m[a].name, "inner");
    assert_eq!(&*m[b].name, "inner.1");
  }
}
