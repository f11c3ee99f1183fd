//! Compile-time evaluation of constant expressions.
//!
//! Const declarations, subrange bounds and variable initializers are folded
//! here over a closed node set: literals, names of earlier constants, and
//! the arithmetic/relational/bitwise operators. Anything else in a constant
//! position is an invalid expression.

use crate::ast::AstNode;
use crate::error::{CompileError, CompileResult, Pos};
use crate::symbols::{SymbolKind, Symbols};
use crate::tokenizer::TokenKind;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstValue {
  Integer(i64),
  Real(f64),
}

impl ConstValue {
  pub fn type_name(self) -> &'static str {
    match self {
      Self::Integer(_) => "integer",
      Self::Real(_) => "float",
    }
  }

  pub fn as_real(self) -> f64 {
    match self {
      Self::Integer(v) => v as f64,
      Self::Real(v) => v,
    }
  }

  pub fn as_integer(self) -> Option<i64> {
    match self {
      Self::Integer(v) => Some(v),
      Self::Real(_) => None,
    }
  }
}

/// Evaluate a parsed expression at compile time. `pos` anchors every error
/// raised while folding (the declaration being elaborated).
pub fn fold(node: &AstNode, symbols: &Symbols, pos: Pos) -> CompileResult<ConstValue> {
  match node {
    AstNode::IntLiteral { value } => Ok(ConstValue::Integer(*value)),
    AstNode::RealLiteral { value } => Ok(ConstValue::Real(*value)),
    AstNode::Identifier { symbol, .. } => match symbols.symbol(*symbol).kind {
      SymbolKind::IntConst { value } => Ok(ConstValue::Integer(value)),
      SymbolKind::RealConst { value } => Ok(ConstValue::Real(value)),
      _ => Err(CompileError::InvalidExpression { pos }),
    },
    AstNode::Binary {
      op, left, right, ..
    } => {
      let left = fold(left, symbols, pos)?;
      let right = fold(right, symbols, pos)?;
      apply_binary(*op, left, right, pos)
    }
    AstNode::Unary { op, operand, .. } => {
      let operand = fold(operand, symbols, pos)?;
      apply_unary(*op, operand, pos)
    }
    _ => Err(CompileError::InvalidExpression { pos }),
  }
}

/// Both operands as integers, or the typed error the parser would raise.
fn integer_operands(left: ConstValue, right: ConstValue, pos: Pos) -> CompileResult<(i64, i64)> {
  match (left.as_integer(), right.as_integer()) {
    (Some(l), Some(r)) => Ok((l, r)),
    _ => Err(CompileError::BadType {
      pos,
      got: "float".into(),
      expected: "integer".into(),
    }),
  }
}

fn apply_binary(
  op: TokenKind,
  left: ConstValue,
  right: ConstValue,
  pos: Pos,
) -> CompileResult<ConstValue> {
  use ConstValue::{Integer, Real};
  use TokenKind::*;

  let numeric = |int_op: fn(i64, i64) -> i64, real_op: fn(f64, f64) -> f64| match (left, right) {
    (Integer(l), Integer(r)) => Integer(int_op(l, r)),
    _ => Real(real_op(left.as_real(), right.as_real())),
  };

  match op {
    Add => Ok(numeric(i64::wrapping_add, |l, r| l + r)),
    Sub => Ok(numeric(i64::wrapping_sub, |l, r| l - r)),
    Mul => Ok(numeric(i64::wrapping_mul, |l, r| l * r)),
    DivReal => {
      let divisor = right.as_real();
      if divisor == 0.0 {
        return Err(CompileError::InvalidConstant {
          pos,
          name: "division by zero".into(),
        });
      }
      Ok(Real(left.as_real() / divisor))
    }
    Div | Mod => {
      let (l, r) = integer_operands(left, right, pos)?;
      if r == 0 {
        return Err(CompileError::InvalidConstant {
          pos,
          name: "division by zero".into(),
        });
      }
      Ok(Integer(if op == Div { l / r } else { l % r }))
    }
    And | Or | Xor | Shl | Shr => {
      let (l, r) = integer_operands(left, right, pos)?;
      let value = match op {
        And => l & r,
        Or => l | r,
        Xor => l ^ r,
        Shl => l.wrapping_shl(r as u32),
        _ => l.wrapping_shr(r as u32),
      };
      Ok(Integer(value))
    }
    Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual => {
      let (l, r) = (left.as_real(), right.as_real());
      let truth = match op {
        Equal => l == r,
        NotEqual => l != r,
        Less => l < r,
        LessEqual => l <= r,
        Greater => l > r,
        _ => l >= r,
      };
      Ok(Integer(truth as i64))
    }
    _ => Err(CompileError::InvalidExpression { pos }),
  }
}

fn apply_unary(op: TokenKind, operand: ConstValue, pos: Pos) -> CompileResult<ConstValue> {
  use ConstValue::{Integer, Real};
  match (op, operand) {
    (TokenKind::Add, v) => Ok(v),
    (TokenKind::Sub, Integer(v)) => Ok(Integer(v.wrapping_neg())),
    (TokenKind::Sub, Real(v)) => Ok(Real(-v)),
    (TokenKind::Not, Integer(v)) => Ok(Integer((v == 0) as i64)),
    (TokenKind::Not, Real(_)) => Err(CompileError::BadType {
      pos,
      got: "float".into(),
      expected: "integer".into(),
    }),
    _ => Err(CompileError::InvalidExpression { pos }),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbols::SymbolId;

  fn int(value: i64) -> AstNode {
    AstNode::IntLiteral { value }
  }

  fn real(value: f64) -> AstNode {
    AstNode::RealLiteral { value }
  }

  fn bin(op: TokenKind, left: AstNode, right: AstNode) -> AstNode {
    AstNode::binary(op, op.spelling().into(), SymbolId(0), left, right)
  }

  fn eval(node: &AstNode) -> CompileResult<ConstValue> {
    fold(node, &Symbols::new(), Pos::new(1, 1))
  }

  #[test]
  fn integer_arithmetic_stays_integer() {
    let node = bin(TokenKind::Add, int(2), bin(TokenKind::Mul, int(3), int(4)));
    assert_eq!(eval(&node).ok(), Some(ConstValue::Integer(14)));
    let node = bin(TokenKind::Div, int(7), int(2));
    assert_eq!(eval(&node).ok(), Some(ConstValue::Integer(3)));
  }

  #[test]
  fn mixing_in_a_real_promotes() {
    let node = bin(TokenKind::Add, int(1), real(0.5));
    assert_eq!(eval(&node).ok(), Some(ConstValue::Real(1.5)));
    let node = bin(TokenKind::DivReal, int(1), int(2));
    assert_eq!(eval(&node).ok(), Some(ConstValue::Real(0.5)));
  }

  #[test]
  fn relations_fold_to_zero_or_one() {
    let node = bin(TokenKind::Less, int(1), real(2.5));
    assert_eq!(eval(&node).ok(), Some(ConstValue::Integer(1)));
    let node = bin(TokenKind::Equal, int(3), int(4));
    assert_eq!(eval(&node).ok(), Some(ConstValue::Integer(0)));
  }

  #[test]
  fn integer_only_operators_reject_reals() {
    let node = bin(TokenKind::Div, real(1.5), int(2));
    assert!(matches!(eval(&node), Err(CompileError::BadType { .. })));
    let node = bin(TokenKind::Shl, int(1), real(2.0));
    assert!(matches!(eval(&node), Err(CompileError::BadType { .. })));
  }

  #[test]
  fn division_by_constant_zero_is_rejected() {
    for op in [TokenKind::Div, TokenKind::Mod, TokenKind::DivReal] {
      let node = bin(op, int(1), int(0));
      assert!(matches!(
        eval(&node),
        Err(CompileError::InvalidConstant { .. })
      ));
    }
  }

  #[test]
  fn non_constant_shapes_are_invalid_expressions() {
    let node = AstNode::Call {
      callee: Box::new(int(0)),
      args: Vec::new(),
      routine: SymbolId(0),
    };
    assert!(matches!(
      eval(&node),
      Err(CompileError::InvalidExpression { .. })
    ));
  }

  #[test]
  fn unary_operators_fold() {
    let neg = AstNode::unary(TokenKind::Sub, "-".into(), SymbolId(0), int(5));
    assert_eq!(eval(&neg).ok(), Some(ConstValue::Integer(-5)));
    let not = AstNode::unary(TokenKind::Not, "not".into(), SymbolId(0), int(0));
    assert_eq!(eval(&not).ok(), Some(ConstValue::Integer(1)));
  }
}
