//! Compiler core for **Alan**, a small Pascal-family imperative language
//! with nested function definitions, lexical scoping, fixed-size and
//! incomplete arrays, value and reference parameters, and a fixed runtime
//! library.
//!
//! The crate takes the AST produced by the (external) parser and runs two
//! passes over it:
//!
//! 1. [`sem`]: semantic analysis — name resolution against a scoped symbol
//!    table and type checking, annotating the tree in place.
//! 2. [`build_ir`]: lowering to a low-level SSA-style IR module, including
//!    the implicit-reference-parameter protocol that lets nested functions
//!    reach enclosing-function locals.
//!
//! [`Compiler::compile`] drives both and hands back the IR module, whose
//! `Display` impl prints it for the downstream toolchain.

use std::fmt;

pub mod build_ir;
pub mod sem;
pub mod stdlib;
pub mod symbol;
pub mod symtab;
pub mod types;

pub use symbol::{Symbol, intern};
pub use types::{Idx, IdxVec};

/// Diagnostic severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
  /// A semantic error; suppresses IR emission.
  Error,
  /// A warning; compilation proceeds.
  Warning,
}

impl fmt::Display for Severity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Severity::Error => write!(f, "error"),
      Severity::Warning => write!(f, "warning"),
    }
  }
}

/// Everything that can be reported against the user's program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagKind {
  /// A name was used but never declared.
  UnknownIdentifier(Symbol),
  /// A name was declared twice in the same scope.
  DuplicateIdentifier(Symbol),
  /// A call names something that is not a function.
  NotAFunction(Symbol),
  /// The two sides of an assignment have different types.
  AssignTypeMismatch,
  /// An operator's operands have different types.
  OperatorTypeMismatch(&'static str),
  /// An operator's operands are not `int` or `byte`.
  OperatorOperandType(&'static str),
  /// A logical operator's operand is not boolean.
  BoolOperandExpected(&'static str),
  /// Unary `+`/`-` applied to a non-`int` operand.
  SignednessNotInt,
  /// An `if` or `while` condition is not boolean.
  ConditionNotBoolean(&'static str),
  /// An index applied to a non-array name.
  IndexedNonArray(Symbol),
  /// An array was defined with a nonpositive size.
  IllegalArraySize(Symbol),
  /// The left side of an assignment is an array.
  ArrayAssignment,
  /// An array parameter was declared with value passing.
  ArrayByValue(Symbol),
  /// A call supplies fewer arguments than the function declares.
  TooFewArgs(Symbol),
  /// A call supplies more arguments than the function declares.
  TooManyArgs(Symbol),
  /// An argument's type differs from the parameter's.
  ArgTypeMismatch,
  /// An incomplete-array parameter received a non-array argument.
  ArgArrayExpected,
  /// An incomplete-array parameter received an array of the wrong element
  /// type.
  ArgElementTypeMismatch,
  /// A reference parameter received something other than an l-value.
  RefActualNotLvalue,
  /// A call in statement position names a non-`proc` function.
  CallStmtNotProc(Symbol),
  /// The returned value's type differs from the function's result type.
  ReturnTypeMismatch,
  /// A `proc` returns a value.
  VoidReturnsValue,
  /// A non-`proc` function returns without a value.
  MissingReturnValue,
  /// Control may reach the end of a non-`proc` function. A warning.
  NonVoidMissingReturn(Symbol),
  /// A redeclaration has more parameters than the forward declaration.
  RedeclExtraParam(Symbol),
  /// A redeclaration has fewer parameters than the forward declaration.
  RedeclMissingParams(Symbol),
  /// A redeclared parameter's type differs from the forward declaration.
  RedeclParamType(Symbol),
  /// A redeclared parameter's mode differs from the forward declaration.
  RedeclParamMode(Symbol),
  /// A redeclared parameter's name differs from the forward declaration.
  RedeclParamName(Symbol),
}

impl fmt::Display for DiagKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    use DiagKind::*;
    match self {
      UnknownIdentifier(s) => write!(f, "unknown identifier {s}"),
      DuplicateIdentifier(s) => write!(f, "duplicate identifier {s}"),
      NotAFunction(s) => write!(f, "{s} is not a function"),
      AssignTypeMismatch => write!(f, "type mismatch in assignment"),
      OperatorTypeMismatch(op) => write!(f, "type mismatch in {op} operator"),
      OperatorOperandType(op) =>
        write!(f, "only int and byte types supported by {op} operator"),
      BoolOperandExpected(op) =>
        write!(f, "only boolean conditions supported by {op} operator"),
      SignednessNotInt => write!(f, "signedness only supported by int type"),
      ConditionNotBoolean(stmt) => write!(f, "{stmt} expects a boolean condition"),
      IndexedNonArray(s) => write!(f, "indexed identifier {s} is not an array"),
      IllegalArraySize(s) =>
        write!(f, "illegal size of array in definition of {s}"),
      ArrayAssignment => write!(f, "left side of assignment can not be an array"),
      ArrayByValue(s) =>
        write!(f, "array {s} can not be passed by value as a parameter to a function"),
      TooFewArgs(s) => write!(f, "expected more parameters in call to {s}"),
      TooManyArgs(s) => write!(f, "expected less parameters in call to {s}"),
      ArgTypeMismatch => write!(f, "function parameter type mismatch"),
      ArgArrayExpected => write!(f, "function parameter expected to be an array"),
      ArgElementTypeMismatch =>
        write!(f, "function parameter expected to be an array of different type"),
      RefActualNotLvalue => write!(f, "parameters passed by reference must be l-values"),
      CallStmtNotProc(s) =>
        write!(f, "{s} is called as a statement but is not declared as proc"),
      ReturnTypeMismatch =>
        write!(f, "result type of function and return value mismatch"),
      VoidReturnsValue => write!(f, "return with a value, in proc function"),
      MissingReturnValue => write!(f, "return with no value, in non-proc function"),
      NonVoidMissingReturn(s) =>
        write!(f, "control may reach end of non-proc function {s}()"),
      RedeclExtraParam(s) =>
        write!(f, "more parameters than expected in redeclaration of {s}"),
      RedeclMissingParams(s) =>
        write!(f, "fewer parameters than expected in redeclaration of {s}"),
      RedeclParamType(s) => write!(f, "parameter type mismatch in redeclaration of {s}"),
      RedeclParamMode(s) =>
        write!(f, "parameter passing mode mismatch in redeclaration of {s}"),
      RedeclParamName(s) => write!(f, "parameter name mismatch in redeclaration of {s}"),
    }
  }
}

/// One reported diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Diag {
  /// Source line the diagnostic points at.
  pub line: u32,
  /// Error or warning.
  pub severity: Severity,
  /// What went wrong.
  pub kind: DiagKind,
}

/// The compilation context threaded through the passes: the source file
/// name, the current line, and the diagnostic sink.
#[derive(Debug)]
pub struct Compiler {
  /// The source file name; doubles as the IR module name.
  pub filename: Box<str>,
  /// The line of the node currently being processed.
  pub line: u32,
  diags: Vec<Diag>,
  errors: usize,
}

impl Compiler {
  /// A fresh context for one compilation unit.
  #[must_use] pub fn new(filename: &str) -> Self {
    Compiler { filename: filename.into(), line: 1, diags: vec![], errors: 0 }
  }

  fn report(&mut self, severity: Severity, kind: DiagKind) {
    let diag = Diag { line: self.line, severity, kind };
    eprintln!("{}:{}: {severity}: {kind}", self.filename, diag.line);
    self.diags.push(diag);
    if severity == Severity::Error { self.errors += 1 }
  }

  /// Report an error at the current line and keep going.
  pub fn error(&mut self, kind: DiagKind) { self.report(Severity::Error, kind) }

  /// Report a warning at the current line.
  pub fn warning(&mut self, kind: DiagKind) { self.report(Severity::Warning, kind) }

  /// All diagnostics reported so far, in order.
  #[must_use] pub fn diags(&self) -> &[Diag] { &self.diags }

  /// The number of errors (warnings excluded) reported so far.
  #[must_use] pub fn error_count(&self) -> usize { self.errors }

  /// Whether any error was reported.
  #[must_use] pub fn has_errors(&self) -> bool { self.errors != 0 }

  /// Run semantic analysis and, if it reported no errors, IR emission.
  pub fn compile(&mut self, root: &mut types::ast::FuncDef) -> Option<types::ir::Module> {
    sem::analyze(self, root);
    if self.has_errors() { return None }
    Some(build_ir::emit_program(self, root))
  }
}
