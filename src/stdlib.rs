//! Registration of the fixed Alan runtime library, both in the symbol table
//! (so user code can call it) and in the IR module (as external
//! declarations resolved by the linker against the C shim). All names land
//! in the outermost scope before analysis starts, so they cannot be
//! shadowed at the top level.

use crate::build_ir;
use crate::symbol::{Symbol, intern};
use crate::symtab::SymbolTable;
use crate::types::ast::PassMode;
use crate::types::ir::{FuncId, Module};
use crate::types::ty::{Scalar, Ty};

const BYTES: Ty = Ty::IArray(Scalar::Char);
const VAL: PassMode = PassMode::ByValue;
const REF: PassMode = PassMode::ByReference;

/// Name, parameters (name, type, mode), result — for every runtime routine.
static SIGNATURES: &[(&str, &[(&str, Ty, PassMode)], Ty)] = &[
  ("writeInteger", &[("n", Ty::Int, VAL)], Ty::Void),
  ("writeByte", &[("b", Ty::Char, VAL)], Ty::Void),
  ("writeChar", &[("b", Ty::Char, VAL)], Ty::Void),
  ("writeString", &[("s", BYTES, REF)], Ty::Void),
  ("readInteger", &[], Ty::Int),
  ("readByte", &[], Ty::Char),
  ("readChar", &[], Ty::Char),
  ("readString", &[("n", Ty::Int, VAL), ("s", BYTES, REF)], Ty::Void),
  ("extend", &[("b", Ty::Char, VAL)], Ty::Int),
  ("shrink", &[("n", Ty::Int, VAL)], Ty::Char),
  ("strlen", &[("s", BYTES, REF)], Ty::Int),
  ("strcmp", &[("s1", BYTES, REF), ("s2", BYTES, REF)], Ty::Int),
  ("strcpy", &[("trg", BYTES, REF), ("src", BYTES, REF)], Ty::Void),
  ("strcat", &[("trg", BYTES, REF), ("src", BYTES, REF)], Ty::Void),
];

/// Enter every runtime routine into the current (outermost) scope of the
/// symbol table.
pub fn declare(tab: &mut SymbolTable) {
  for &(name, params, result) in SIGNATURES {
    let f = tab.new_function(intern(name)).expect("stdlib name registered twice");
    tab.open_scope();
    for &(pname, ty, mode) in params {
      tab.new_parameter(intern(pname), ty, mode, f).expect("stdlib parameter clash");
    }
    tab.end_function_header(f, result).expect("stdlib header closed twice");
    tab.close_scope();
  }
}

/// Declare every runtime routine as an external function in the IR module,
/// returning the names and ids for the emitter's scope log.
pub fn declare_ir(module: &mut Module) -> Vec<(Symbol, FuncId)> {
  SIGNATURES
    .iter()
    .map(|&(name, params, result)| {
      let sym = intern(name);
      let params = params
        .iter()
        .map(|&(pname, ty, mode)| (intern(pname), build_ir::ir_ty(ty, mode)))
        .collect();
      let id = module.declare(sym, build_ir::value_ty(result), params);
      (sym, id)
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symtab::{EntryKind, Lookup};

  #[test]
  fn all_names_resolve_after_registration() {
    let mut tab = SymbolTable::new();
    tab.open_scope();
    declare(&mut tab);
    assert_eq!(tab.depth(), 1, "registration must not leave scopes open");
    for &(name, params, result) in SIGNATURES {
      let id = tab.lookup(intern(name), Lookup::All).expect("stdlib name missing");
      let EntryKind::Function(info) = &tab[id].kind else { panic!("not a function") };
      assert_eq!(info.result, result);
      assert_eq!(info.params.len(), params.len());
    }
  }

  #[test]
  fn ir_declarations_match_the_abi() {
    use crate::types::ir::IrTy;
    let mut m = Module::new("t.alan");
    let funcs = declare_ir(&mut m);
    assert_eq!(funcs.len(), 14);
    let find = |n: &str| {
      let &(_, id) = funcs.iter().find(|(s, _)| s.as_str() == n).expect("missing");
      &m[id]
    };
    let ws = find("writeString");
    assert_eq!(ws.ret, IrTy::Void);
    assert_eq!(ws.params[0].1, IrTy::I8.ptr());
    let rs = find("readString");
    assert_eq!(rs.params[0].1, IrTy::I32);
    assert_eq!(rs.params[1].1, IrTy::I8.ptr());
    assert_eq!(find("extend").ret, IrTy::I32);
    assert_eq!(find("shrink").ret, IrTy::I8);
    assert_eq!(find("strcmp").ret, IrTy::I32);
  }
}
