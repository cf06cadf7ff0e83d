//! The global symbol interner. Names coming out of the parser are interned
//! once and handled as plain `u32` indexes everywhere else, so name equality
//! is integer equality in the symbol table and the scope log.

use std::fmt;
use std::sync::{LazyLock, Mutex};

use hashbrown::HashMap;

use crate::types::{Idx, IdxVec};

/// An interned string. Use [`intern`] to construct one and
/// [`Symbol::as_str`] to read it back.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Idx for Symbol {
  fn into_usize(self) -> usize { self.0 as usize }
  fn from_usize(n: usize) -> Self {
    Self(u32::try_from(n).expect("too many symbols"))
  }
}

#[derive(Default)]
struct Interner {
  names: IdxVec<Symbol, &'static str>,
  map: HashMap<&'static str, Symbol>,
}

impl Interner {
  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    // Leaked so `as_str` can hand out a reference without holding the lock.
    // The interner lives for the whole compilation anyway.
    let s: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let sym = self.names.push(s);
    self.map.insert(s, sym);
    sym
  }
}

static INTERNER: LazyLock<Mutex<Interner>> = LazyLock::new(Mutex::default);

/// Intern a string, yielding its [`Symbol`].
#[must_use] pub fn intern(s: &str) -> Symbol {
  INTERNER.lock().expect("interner poisoned").intern(s)
}

impl Symbol {
  /// The string this symbol was interned from.
  #[must_use] pub fn as_str(self) -> &'static str {
    INTERNER.lock().expect("interner poisoned").names[self]
  }
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

impl fmt::Debug for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.as_str().fmt(f) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_idempotent() {
    let a = intern("writeInteger");
    let b = intern("writeInteger");
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "writeInteger");
    assert_ne!(a, intern("writeByte"));
  }
}
