//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` performs lexical analysis and produces tokens on demand.
//! - `parser` owns all syntactic and semantic knowledge and returns a
//!   checked program with its symbol table.
//! - `consts` folds constant expressions during parsing.
//! - `codegen` lowers the checked program into NASM x86-64 assembly.
//! - `error` centralises the error type shared by the other modules.

pub mod ast;
pub mod consts;
pub mod error;
pub mod parser;
pub mod symbols;
pub mod tokenizer;
pub mod ty;

mod codegen;

pub use error::{CompileError, CompileResult};

/// Compile a source string into NASM x86-64 assembly.
pub fn compile(source: &str) -> CompileResult<String> {
  let program = parser::parse_program(source)?;
  Ok(codegen::generate(&program))
}

/// Render the token stream, one line per token.
pub fn tokens_dump(source: &str) -> CompileResult<String> {
  tokenizer::tokens_dump(source)
}

/// Parse a single expression leniently and render its tree.
pub fn expr_tree_dump(source: &str) -> CompileResult<String> {
  let (node, _) = parser::parse_expression(source)?;
  Ok(node.dump())
}

/// Parse a whole program and render every routine body followed by the
/// main block.
pub fn ast_dump(source: &str) -> CompileResult<String> {
  let program = parser::parse_program(source)?;
  let mut out = String::new();
  for routine in &program.routines {
    out.push_str(&routine.body.dump());
    out.push('\n');
  }
  out.push_str(&program.block.dump());
  Ok(out)
}

/// Parse a whole program and render its symbol table.
pub fn symbols_dump(source: &str) -> CompileResult<String> {
  let program = parser::parse_program(source)?;
  Ok(program.symbols.dump())
}
