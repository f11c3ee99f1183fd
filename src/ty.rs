//! Type rules for binary and unary operators.
//!
//! Two small tables drive every inline check the parser performs: which
//! implicit casts exist between operand kinds, and what kind a binary
//! operator produces for a given (unified) operand kind. Everything else in
//! the type system lives with the symbols that define it.

use crate::tokenizer::TokenKind;

/// Shape of a type after stripping aliases; what the operator tables and
/// error messages work in terms of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
  Integer,
  Real,
  Boolean,
  Char,
  Record,
  Array,
  Pointer,
  /// String literals and procedure calls; participates in no operator.
  None,
}

impl TypeKind {
  pub fn name(self) -> &'static str {
    match self {
      Self::Integer => "integer",
      Self::Real => "float",
      Self::Boolean => "boolean",
      Self::Char => "char",
      Self::Record => "record",
      Self::Array => "array",
      Self::Pointer => "pointer",
      Self::None => "None",
    }
  }
}

/// Whether a value of `from` silently converts to `to`. Integers widen to
/// reals and double as booleans; nothing narrows.
pub fn can_cast(from: TypeKind, to: TypeKind) -> bool {
  use TypeKind::*;
  match from {
    Integer => matches!(to, Integer | Real | Boolean),
    Real => to == Real,
    Boolean => to == Boolean,
    _ => from == to,
  }
}

/// Unify two operand kinds for a binary operator: keep the left kind if the
/// right casts to it, otherwise try the other direction.
pub fn try_cast(left: TypeKind, right: TypeKind) -> Option<TypeKind> {
  if can_cast(right, left) {
    Some(left)
  } else if can_cast(left, right) {
    Some(right)
  } else {
    None
  }
}

/// Result kind of `op` applied to two operands of the unified kind, or
/// `None` when the operator is not defined on that kind.
pub fn result_kind(operands: TypeKind, op: TokenKind) -> Option<TypeKind> {
  use TokenKind::*;
  use TypeKind::{Boolean, Integer, Real};
  match operands {
    Integer => match op {
      Add | Sub | Mul | Div | Mod | And | Or | Xor | Shl | Shr => Some(Integer),
      DivReal => Some(Real),
      Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual => Some(Boolean),
      _ => None,
    },
    Real => match op {
      Add | Sub | Mul | DivReal => Some(Real),
      Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual => Some(Boolean),
      _ => None,
    },
    Boolean => match op {
      And | Or | Xor => Some(Boolean),
      _ => None,
    },
    _ => None,
  }
}

/// Result kind of a unary operator, or `None` when undefined.
pub fn unary_result_kind(operand: TypeKind, op: TokenKind) -> Option<TypeKind> {
  use TokenKind::*;
  use TypeKind::{Boolean, Integer, Real};
  match op {
    Not => match operand {
      Integer => Some(Integer),
      Boolean => Some(Boolean),
      _ => None,
    },
    Add | Sub => match operand {
      Integer => Some(Integer),
      Real => Some(Real),
      _ => None,
    },
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn integer_widens_to_real_but_not_back() {
    assert_eq!(
      try_cast(TypeKind::Real, TypeKind::Integer),
      Some(TypeKind::Real)
    );
    assert_eq!(
      try_cast(TypeKind::Integer, TypeKind::Real),
      Some(TypeKind::Real)
    );
    assert!(can_cast(TypeKind::Integer, TypeKind::Real));
    assert!(!can_cast(TypeKind::Real, TypeKind::Integer));
  }

  #[test]
  fn div_and_bitwise_are_integer_only() {
    assert_eq!(
      result_kind(TypeKind::Integer, TokenKind::Div),
      Some(TypeKind::Integer)
    );
    assert_eq!(result_kind(TypeKind::Real, TokenKind::Div), None);
    assert_eq!(result_kind(TypeKind::Real, TokenKind::Shl), None);
    assert_eq!(
      result_kind(TypeKind::Integer, TokenKind::DivReal),
      Some(TypeKind::Real)
    );
  }

  #[test]
  fn relations_yield_boolean_and_records_nothing() {
    assert_eq!(
      result_kind(TypeKind::Real, TokenKind::Less),
      Some(TypeKind::Boolean)
    );
    assert_eq!(result_kind(TypeKind::Record, TokenKind::Equal), None);
    assert_eq!(result_kind(TypeKind::Boolean, TokenKind::Equal), None);
  }

  #[test]
  fn unary_not_flips_integers_and_booleans_only() {
    assert_eq!(
      unary_result_kind(TypeKind::Boolean, TokenKind::Not),
      Some(TypeKind::Boolean)
    );
    assert_eq!(unary_result_kind(TypeKind::Real, TokenKind::Not), None);
    assert_eq!(
      unary_result_kind(TypeKind::Real, TokenKind::Sub),
      Some(TypeKind::Real)
    );
  }
}
