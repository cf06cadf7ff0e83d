//! Alan's semantic types.
//!
//! `bool` is a compile-only type: no declaration syntax produces it, it is
//! only the type of comparisons, logical operators, and `if`/`while`
//! conditions. Incomplete arrays (`int[]`/`byte[]` formals) have no size of
//! their own and are usable only as reference parameters.

use std::fmt;

/// The element type of an array. Arrays cannot nest in Alan, so an element
/// is always one of the scalars.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
  /// 32-bit signed integer (`int`).
  Int,
  /// Compile-only boolean.
  Bool,
  /// 8-bit unsigned byte (`byte`).
  Char,
}

impl Scalar {
  /// This scalar as a full [`Ty`].
  #[must_use] pub fn ty(self) -> Ty {
    match self {
      Scalar::Int => Ty::Int,
      Scalar::Bool => Ty::Bool,
      Scalar::Char => Ty::Char,
    }
  }

  /// Storage size in bytes.
  #[must_use] pub fn size(self) -> u32 {
    match self {
      Scalar::Int => 4,
      Scalar::Bool | Scalar::Char => 1,
    }
  }
}

/// A semantic type. Equality is structural: two array types are equal iff
/// their sizes and element types both agree, and a complete array is never
/// equal to an incomplete one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ty {
  /// The result type of a `proc`.
  Void,
  /// 32-bit signed integer.
  Int,
  /// Compile-only boolean.
  Bool,
  /// 8-bit unsigned byte.
  Char,
  /// `Array(n, e)`: fixed-size array of `n > 0` elements of `e`.
  Array(u32, Scalar),
  /// `IArray(e)`: incomplete array, size unknown at compile time.
  IArray(Scalar),
}

impl Ty {
  /// Construct a fixed-size array type.
  #[must_use] pub fn array(size: u32, elem: Scalar) -> Self {
    debug_assert!(size > 0, "array size must be positive");
    Ty::Array(size, elem)
  }

  /// Construct an incomplete array type.
  #[must_use] pub fn iarray(elem: Scalar) -> Self { Ty::IArray(elem) }

  /// The scalar this type is, if it is one.
  #[must_use] pub fn scalar(self) -> Option<Scalar> {
    match self {
      Ty::Int => Some(Scalar::Int),
      Ty::Bool => Some(Scalar::Bool),
      Ty::Char => Some(Scalar::Char),
      Ty::Void | Ty::Array(..) | Ty::IArray(_) => None,
    }
  }

  /// The element type, for either flavor of array.
  #[must_use] pub fn elem(self) -> Option<Scalar> {
    match self {
      Ty::Array(_, e) | Ty::IArray(e) => Some(e),
      _ => None,
    }
  }

  /// Whether this is a complete or incomplete array type.
  #[must_use] pub fn is_array(self) -> bool { self.elem().is_some() }

  /// Storage size in bytes. Incomplete arrays occupy a pointer slot in
  /// reference-passing contexts only and have no size of their own.
  #[must_use] pub fn size(self) -> u32 {
    match self {
      Ty::Void => panic!("void has no size"),
      Ty::Int | Ty::Bool | Ty::Char => self.scalar().expect("scalar").size(),
      Ty::Array(n, e) => n * e.size(),
      Ty::IArray(_) => panic!("incomplete array has no size"),
    }
  }
}

impl fmt::Display for Scalar {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Scalar::Int => write!(f, "int"),
      Scalar::Bool => write!(f, "bool"),
      Scalar::Char => write!(f, "byte"),
    }
  }
}

impl fmt::Display for Ty {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Ty::Void => write!(f, "proc"),
      Ty::Int => write!(f, "int"),
      Ty::Bool => write!(f, "bool"),
      Ty::Char => write!(f, "byte"),
      Ty::Array(n, e) => write!(f, "{e}[{n}]"),
      Ty::IArray(e) => write!(f, "{e}[]"),
    }
  }
}
