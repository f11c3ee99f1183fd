//! Shared error types used across the compilation pipeline.
//!
//! Every detected violation is fatal: the stage that finds it builds the
//! matching `CompileError` variant and the whole compilation unwinds through
//! `?`. Positioned diagnostics render as `(<line> ; <col>): <message>`.

use std::fmt;

use snafu::Snafu;

pub type CompileResult<T> = Result<T, CompileError>;

/// Source position of a token or error, 1-based line and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
  pub line: usize,
  pub col: usize,
}

impl Pos {
  pub fn new(line: usize, col: usize) -> Self {
    Self { line, col }
  }
}

impl fmt::Display for Pos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "({} ; {})", self.line, self.col)
  }
}

/// The full diagnostic taxonomy: lexical, syntactic, name and type errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CompileError {
  #[snafu(display("File {fname} not found."))]
  MissingFile { fname: String },

  #[snafu(display("{pos}: Unterminated comment."))]
  UnterminatedComment { pos: Pos },

  #[snafu(display("{pos}: Unterminated string."))]
  UnterminatedString { pos: Pos },

  #[snafu(display("{pos}: Invalid integer."))]
  InvalidInteger { pos: Pos },

  #[snafu(display("{pos}: Invalid real."))]
  InvalidReal { pos: Pos },

  #[snafu(display("{pos}: Unexpected symbol."))]
  UnexpectedSymbol { pos: Pos },

  #[snafu(display("{pos}: Got unexpected token: \"{got}\". Expected: \"{expected}\"."))]
  UnexpectedToken {
    pos: Pos,
    got: String,
    expected: String,
  },

  #[snafu(display("{pos}: Unexpected end of file."))]
  UnexpectedEndOfFile { pos: Pos },

  #[snafu(display("{pos}: Invalid expression."))]
  InvalidExpression { pos: Pos },

  #[snafu(display("{pos}: Syntax error: Got: \"{got}\". Expected: \"{expected}\"."))]
  SyntaxError {
    pos: Pos,
    got: String,
    expected: String,
  },

  #[snafu(display("{pos}: Duplicate: \"{name}\"."))]
  Duplicate { pos: Pos, name: String },

  #[snafu(display("{pos}: Symbol \"{name}\" does not exist."))]
  UnknownSymbol { pos: Pos, name: String },

  #[snafu(display("{pos}: Error: identifier idents no member \"{member}\"."))]
  NoMember { pos: Pos, member: String },

  #[snafu(display("{pos}: Error: Illegal qualifier."))]
  IllegalQualifier { pos: Pos },

  #[snafu(display("{pos}: Type error: Got \"{got}\". Expected: \"{expected}\"."))]
  BadType {
    pos: Pos,
    got: String,
    expected: String,
  },

  #[snafu(display("{pos}: Error: Wrong number of parameters specified for call to \"{name}\"."))]
  WrongNumberOfParam { pos: Pos, name: String },

  #[snafu(display("{pos}: Invalid assignment, procedures return no value."))]
  ProcAssignment { pos: Pos },

  #[snafu(display("{pos}: Invalid constant: {name}."))]
  InvalidConstant { pos: Pos, name: String },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn positioned_errors_render_line_then_col() {
    let err = CompileError::UnterminatedString {
      pos: Pos::new(3, 14),
    };
    assert_eq!(err.to_string(), "(3 ; 14): Unterminated string.");
  }

  #[test]
  fn type_error_carries_both_type_names() {
    let err = CompileError::BadType {
      pos: Pos::new(1, 1),
      got: "float".into(),
      expected: "integer".into(),
    };
    assert_eq!(
      err.to_string(),
      "(1 ; 1): Type error: Got \"float\". Expected: \"integer\"."
    );
  }
}
