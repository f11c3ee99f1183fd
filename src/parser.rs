//! Recursive-descent parser with embedded semantic analysis.
//!
//! Declarations, statements and expressions are parsed in a single pass
//! that also resolves names, assigns storage offsets and type-checks every
//! construct inline, so a tree that comes out of here is already verified.
//! Expressions use precedence climbing over the operator tiers; identifier
//! suffixes (`.field`, `[index]`, `(args)`) are folded left as a chain whose
//! current node and type travel together.

use crate::ast::AstNode;
use crate::consts::{self, ConstValue};
use crate::error::{CompileError, CompileResult, Pos};
use crate::symbols::{ScopeStack, SymbolId, SymbolKind, Symbols};
use crate::tokenizer::{Scanner, Token, TokenKind, TokenValue};
use crate::ty::{self, TypeKind};

/// A routine's symbol and fully checked body, in completion order: nested
/// routines finish before their parent, so emitting this list front to back
/// defines every callee before its callers.
#[derive(Debug)]
pub struct Routine {
  pub symbol: SymbolId,
  pub body: AstNode,
}

/// A fully parsed and checked compilation unit.
#[derive(Debug)]
pub struct Program {
  pub name: Option<String>,
  pub symbols: Symbols,
  pub routines: Vec<Routine>,
  pub block: AstNode,
}

/// Type of the value an expression node produces, `None` for strings and
/// procedure calls.
pub fn expr_type(symbols: &Symbols, node: &AstNode) -> Option<SymbolId> {
  match node {
    AstNode::IntLiteral { .. } => Some(symbols.builtin.integer),
    AstNode::RealLiteral { .. } => Some(symbols.builtin.real),
    AstNode::Identifier { symbol, .. } => symbols.value_type(*symbol),
    AstNode::Binary { ty, .. } | AstNode::Unary { ty, .. } => Some(*ty),
    AstNode::RecordField { field, .. } => symbols.value_type(*field),
    AstNode::ArrayIndex { elem, .. } => Some(*elem),
    AstNode::Call { routine, .. } => match symbols.symbol(*routine).kind {
      SymbolKind::Func { args, .. } => {
        let result = symbols.scope(args).entries.first()?;
        symbols.value_type(*result)
      }
      _ => None,
    },
    _ => None,
  }
}

/// Operator tiers, loosest-binding first; unary operators bind tighter
/// than all of them.
const PRIORITIES: [&[TokenKind]; 3] = [
  &[
    TokenKind::Equal,
    TokenKind::NotEqual,
    TokenKind::Less,
    TokenKind::LessEqual,
    TokenKind::Greater,
    TokenKind::GreaterEqual,
  ],
  &[TokenKind::Add, TokenKind::Sub, TokenKind::Or, TokenKind::Xor],
  &[
    TokenKind::Mul,
    TokenKind::Div,
    TokenKind::DivReal,
    TokenKind::Mod,
    TokenKind::And,
    TokenKind::Shl,
    TokenKind::Shr,
  ],
];

pub struct Parser {
  scanner: Scanner,
  symbols: Symbols,
  stack: ScopeStack,
  routines: Vec<Routine>,
  strict: bool,
}

/// Parse a whole program: optional header, declarations, main block, `end.`.
pub fn parse_program(source: &str) -> CompileResult<Program> {
  let mut parser = Parser::new(source, true);
  parser.advance()?;

  let mut name = None;
  if parser.accept(TokenKind::Program)? {
    parser.expect(TokenKind::Identifier)?;
    name = Some(parser.current().text.clone());
    parser.advance()?;
    parser.skip(TokenKind::Semicolon)?;
  }

  parser.parse_declarations()?;
  let block = parser.parse_block("main block")?;
  parser.skip(TokenKind::Dot)?;
  parser.expect(TokenKind::EndOfFile)?;

  Ok(Program {
    name,
    symbols: parser.symbols,
    routines: parser.routines,
    block,
  })
}

/// Parse a single expression leniently: unknown names type as integer. Used
/// by the expression-tree dump, which has no declarations to draw on.
pub fn parse_expression(source: &str) -> CompileResult<(AstNode, Symbols)> {
  let mut parser = Parser::new(source, false);
  parser.advance()?;
  let node = parser.parse_expr(0)?;
  Ok((node, parser.symbols))
}

impl Parser {
  fn new(source: &str, strict: bool) -> Self {
    let symbols = Symbols::new();
    let mut stack = ScopeStack::default();
    stack.push(symbols.global());
    Self {
      scanner: Scanner::new(source),
      symbols,
      stack,
      routines: Vec::new(),
      strict,
    }
  }

  fn current(&self) -> &Token {
    self.scanner.current()
  }

  fn kind(&self) -> TokenKind {
    self.current().kind
  }

  fn pos(&self) -> Pos {
    self.current().pos
  }

  fn advance(&mut self) -> CompileResult<()> {
    self.scanner.next()?;
    Ok(())
  }

  fn expect(&self, kind: TokenKind) -> CompileResult<()> {
    if self.kind() == kind {
      return Ok(());
    }
    if self.kind() == TokenKind::EndOfFile {
      return Err(CompileError::UnexpectedEndOfFile { pos: self.pos() });
    }
    Err(CompileError::UnexpectedToken {
      pos: self.pos(),
      got: self.current().text.clone(),
      expected: kind.spelling().into(),
    })
  }

  fn skip(&mut self, kind: TokenKind) -> CompileResult<()> {
    self.expect(kind)?;
    self.advance()
  }

  fn accept(&mut self, kind: TokenKind) -> CompileResult<bool> {
    if self.kind() == kind {
      self.advance()?;
      return Ok(true);
    }
    Ok(false)
  }

  fn resolve(&self, token: &Token) -> CompileResult<SymbolId> {
    self
      .stack
      .resolve(&self.symbols, &token.text, token.pos, self.strict)
  }

  fn node_kind(&self, node: &AstNode) -> TypeKind {
    expr_type(&self.symbols, node)
      .map(|t| self.symbols.kind_of(t))
      .unwrap_or(TypeKind::None)
  }

  fn is_storage_symbol(&self, id: SymbolId) -> bool {
    matches!(
      self.symbols.symbol(id).kind,
      SymbolKind::GlobalVar { .. }
        | SymbolKind::LocalVar { .. }
        | SymbolKind::Param { .. }
        | SymbolKind::VarParam { .. }
        | SymbolKind::FuncResult { .. }
    )
  }

  /// An addressable target: named storage, or a field/index path into one.
  fn is_storage_lvalue(&self, node: &AstNode) -> bool {
    match node {
      AstNode::Identifier { symbol, .. } => self.is_storage_symbol(*symbol),
      AstNode::RecordField { record, .. } => self.is_storage_lvalue(record),
      AstNode::ArrayIndex { base, .. } => self.is_storage_lvalue(base),
      _ => false,
    }
  }

  fn is_routine(&self, id: SymbolId) -> bool {
    matches!(
      self.symbols.symbol(id).kind,
      SymbolKind::Proc { .. } | SymbolKind::Func { .. }
    )
  }

  /// A value of this expression may land in a target of `target_ty`:
  /// primitives follow the cast table, aggregates must be the same type.
  fn assign_compatible(&self, target_ty: SymbolId, value: &AstNode) -> bool {
    let target_kind = self.symbols.kind_of(target_ty);
    match target_kind {
      TypeKind::Record | TypeKind::Array | TypeKind::Pointer => {
        expr_type(&self.symbols, value).map(|t| self.symbols.strip_alias(t))
          == Some(self.symbols.strip_alias(target_ty))
      }
      _ => ty::can_cast(self.node_kind(value), target_kind),
    }
  }

  fn require_kind(&self, node: &AstNode, want: TypeKind, pos: Pos) -> CompileResult<()> {
    let kind = self.node_kind(node);
    if ty::can_cast(kind, want) {
      return Ok(());
    }
    Err(CompileError::BadType {
      pos,
      got: kind.name().into(),
      expected: want.name().into(),
    })
  }

  // ---- expressions ----

  fn parse_expr(&mut self, priority: usize) -> CompileResult<AstNode> {
    if priority == PRIORITIES.len() {
      return self.parse_unary();
    }
    let mut left = self.parse_expr(priority + 1)?;
    while PRIORITIES[priority].contains(&self.kind()) {
      let op = self.current().clone();
      self.advance()?;
      let right = self.parse_expr(priority + 1)?;
      left = self.typed_binary(op, left, right)?;
    }
    Ok(left)
  }

  fn typed_binary(&mut self, op: Token, left: AstNode, right: AstNode) -> CompileResult<AstNode> {
    let left_kind = self.node_kind(&left);
    let right_kind = self.node_kind(&right);
    let unified = ty::try_cast(left_kind, right_kind).ok_or(CompileError::BadType {
      pos: op.pos,
      got: right_kind.name().into(),
      expected: left_kind.name().into(),
    })?;
    let result = ty::result_kind(unified, op.kind).ok_or(CompileError::BadType {
      pos: op.pos,
      got: unified.name().into(),
      expected: "integer".into(),
    })?;
    let ty = self.symbols.builtin_for(result);
    Ok(AstNode::binary(op.kind, op.text, ty, left, right))
  }

  fn parse_unary(&mut self) -> CompileResult<AstNode> {
    if matches!(
      self.kind(),
      TokenKind::Not | TokenKind::Sub | TokenKind::Add
    ) {
      let op = self.current().clone();
      self.advance()?;
      let operand = self.parse_unary()?;
      let kind = self.node_kind(&operand);
      let result = ty::unary_result_kind(kind, op.kind).ok_or(CompileError::BadType {
        pos: op.pos,
        got: kind.name().into(),
        expected: "integer".into(),
      })?;
      let ty = self.symbols.builtin_for(result);
      return Ok(AstNode::unary(op.kind, op.text, ty, operand));
    }
    self.parse_factor()
  }

  fn parse_factor(&mut self) -> CompileResult<AstNode> {
    match self.kind() {
      TokenKind::EndOfFile => Err(CompileError::UnexpectedEndOfFile { pos: self.pos() }),
      TokenKind::Identifier => self.parse_identifier(),
      TokenKind::IntegerNumber => {
        let Some(TokenValue::Int(value)) = self.current().value else {
          return Err(CompileError::InvalidInteger { pos: self.pos() });
        };
        self.advance()?;
        Ok(AstNode::IntLiteral { value })
      }
      TokenKind::RealNumber => {
        let Some(TokenValue::Real(value)) = self.current().value else {
          return Err(CompileError::InvalidReal { pos: self.pos() });
        };
        self.advance()?;
        Ok(AstNode::RealLiteral { value })
      }
      TokenKind::StringLiteral => {
        let value = match &self.current().value {
          Some(TokenValue::Str(v)) => v.clone(),
          _ => String::new(),
        };
        self.advance()?;
        Ok(AstNode::StringLiteral { value })
      }
      TokenKind::LParen => {
        self.advance()?;
        let node = self.parse_expr(0)?;
        self.skip(TokenKind::RParen)?;
        Ok(node)
      }
      _ => Err(CompileError::UnexpectedToken {
        pos: self.pos(),
        got: self.current().text.clone(),
        expected: "expression".into(),
      }),
    }
  }

  /// An identifier and its suffix chain. Each step re-derives the type of
  /// the node built so far and checks the next suffix against it.
  fn parse_identifier(&mut self) -> CompileResult<AstNode> {
    let tok = self.current().clone();
    let symbol = self.resolve(&tok)?;
    self.advance()?;
    let mut node = AstNode::Identifier {
      name: tok.text.clone(),
      symbol,
    };

    if self.is_routine(symbol) {
      if self.kind() == TokenKind::LParen {
        return self.parse_call(node, symbol, tok.pos);
      }
      // a parameterless function call needs no parentheses
      if matches!(self.symbols.symbol(symbol).kind, SymbolKind::Func { .. }) {
        self.check_call(&[], symbol, tok.pos)?;
        return Ok(AstNode::Call {
          callee: Box::new(node),
          args: Vec::new(),
          routine: symbol,
        });
      }
      return Ok(node);
    }

    let mut last_name = tok.text;
    loop {
      match self.kind() {
        TokenKind::Dot => {
          let dot_pos = self.pos();
          self.advance()?;
          self.expect(TokenKind::Identifier)?;
          let field_tok = self.current().clone();
          self.advance()?;

          let ty = expr_type(&self.symbols, &node).map(|t| self.symbols.strip_alias(t));
          let fields = match ty.map(|t| &self.symbols.symbol(t).kind) {
            Some(SymbolKind::TypeRecord { fields }) => *fields,
            _ => return Err(CompileError::IllegalQualifier { pos: dot_pos }),
          };
          let field = self.symbols.resolve_in(fields, &field_tok.text).ok_or(
            CompileError::NoMember {
              pos: field_tok.pos,
              member: field_tok.text.clone(),
            },
          )?;
          last_name = field_tok.text.clone();
          node = AstNode::RecordField {
            record: Box::new(node),
            field,
            name: field_tok.text,
          };
        }
        TokenKind::LBracket => {
          let bracket_pos = self.pos();
          self.advance()?;
          let mut args = vec![self.parse_expr(0)?];
          while self.accept(TokenKind::Comma)? {
            args.push(self.parse_expr(0)?);
          }
          self.skip(TokenKind::RBracket)?;

          let ty = expr_type(&self.symbols, &node)
            .ok_or(CompileError::IllegalQualifier { pos: bracket_pos })?;
          let dims = self.symbols.dimensions(ty);
          if dims == 0 {
            return Err(CompileError::IllegalQualifier { pos: bracket_pos });
          }
          // a subscript supplies every dimension at once
          if args.len() != dims {
            return Err(CompileError::WrongNumberOfParam {
              pos: bracket_pos,
              name: last_name.clone(),
            });
          }
          for arg in &args {
            self.require_kind(arg, TypeKind::Integer, bracket_pos)?;
          }
          let mut elem = ty;
          for _ in 0..args.len() {
            elem = match self.symbols.array_level(elem) {
              Some((next, _)) => next,
              None => return Err(CompileError::IllegalQualifier { pos: bracket_pos }),
            };
          }
          node = AstNode::ArrayIndex {
            base: Box::new(node),
            args,
            elem,
          };
        }
        _ => break,
      }
    }
    Ok(node)
  }

  fn parse_call(
    &mut self,
    callee: AstNode,
    routine: SymbolId,
    pos: Pos,
  ) -> CompileResult<AstNode> {
    self.skip(TokenKind::LParen)?;
    let mut args = Vec::new();
    if self.kind() != TokenKind::RParen {
      args.push(self.parse_expr(0)?);
      while self.accept(TokenKind::Comma)? {
        args.push(self.parse_expr(0)?);
      }
    }
    self.skip(TokenKind::RParen)?;
    self.check_call(&args, routine, pos)?;
    Ok(AstNode::Call {
      callee: Box::new(callee),
      args,
      routine,
    })
  }

  /// Arity and per-argument type checks. The declared argument scope of a
  /// function starts with the synthetic result slot, which takes no
  /// argument.
  fn check_call(&self, args: &[AstNode], routine: SymbolId, pos: Pos) -> CompileResult<()> {
    let name = self.symbols.symbol(routine).name.clone();
    let (arg_scope, is_func) = match self.symbols.symbol(routine).kind {
      SymbolKind::Func { args, .. } => (args, true),
      SymbolKind::Proc { args, .. } => (args, false),
      _ => return Err(CompileError::InvalidExpression { pos }),
    };
    let params: Vec<SymbolId> = self
      .symbols
      .scope(arg_scope)
      .entries
      .iter()
      .copied()
      .skip(is_func as usize)
      .collect();

    if args.len() != params.len() {
      return Err(CompileError::WrongNumberOfParam { pos, name });
    }

    for (arg, &param) in args.iter().zip(&params) {
      let param_kind = self.symbols.symbol(param).kind.clone();
      match param_kind {
        SymbolKind::VarParam { ty, .. } => {
          if !self.is_storage_lvalue(arg) {
            return Err(CompileError::InvalidExpression { pos });
          }
          // by-reference passing admits no conversion
          let arg_ty = expr_type(&self.symbols, arg).map(|t| self.symbols.strip_alias(t));
          if arg_ty != Some(self.symbols.strip_alias(ty)) {
            return Err(CompileError::BadType {
              pos,
              got: self.node_kind(arg).name().into(),
              expected: self.symbols.kind_of(ty).name().into(),
            });
          }
        }
        SymbolKind::Param { ty, .. } => {
          if !self.assign_compatible(ty, arg) {
            return Err(CompileError::BadType {
              pos,
              got: self.node_kind(arg).name().into(),
              expected: self.symbols.kind_of(ty).name().into(),
            });
          }
        }
        _ => {}
      }
    }
    Ok(())
  }

  // ---- statements ----

  fn parse_block(&mut self, name: &str) -> CompileResult<AstNode> {
    self.skip(TokenKind::Begin)?;
    let statements = self.parse_statements(TokenKind::End)?;
    self.skip(TokenKind::End)?;
    Ok(AstNode::Block {
      name: name.into(),
      statements,
    })
  }

  fn parse_statements(&mut self, terminator: TokenKind) -> CompileResult<Vec<AstNode>> {
    let mut statements = Vec::new();
    loop {
      if self.kind() == terminator {
        break;
      }
      let statement = self.parse_statement()?;
      if !matches!(statement, AstNode::Empty) {
        statements.push(statement);
      }
      if !self.accept(TokenKind::Semicolon)? {
        break;
      }
    }
    Ok(statements)
  }

  fn parse_statement(&mut self) -> CompileResult<AstNode> {
    match self.kind() {
      TokenKind::Begin => self.parse_block("block"),
      TokenKind::If => {
        self.advance()?;
        let cond_pos = self.pos();
        let cond = self.parse_expr(0)?;
        self.require_kind(&cond, TypeKind::Boolean, cond_pos)?;
        self.skip(TokenKind::Then)?;
        let then = self.parse_statement()?;
        let els = if self.accept(TokenKind::Else)? {
          Some(Box::new(self.parse_statement()?))
        } else {
          None
        };
        Ok(AstNode::If {
          cond: Box::new(cond),
          then: Box::new(then),
          els,
        })
      }
      TokenKind::While => {
        self.advance()?;
        let cond_pos = self.pos();
        let cond = self.parse_expr(0)?;
        self.require_kind(&cond, TypeKind::Boolean, cond_pos)?;
        self.skip(TokenKind::Do)?;
        let body = self.parse_statement()?;
        Ok(AstNode::While {
          cond: Box::new(cond),
          body: Box::new(body),
        })
      }
      TokenKind::For => self.parse_for(),
      TokenKind::Repeat => {
        self.advance()?;
        let statements = self.parse_statements(TokenKind::Until)?;
        self.skip(TokenKind::Until)?;
        let cond_pos = self.pos();
        let cond = self.parse_expr(0)?;
        self.require_kind(&cond, TypeKind::Boolean, cond_pos)?;
        Ok(AstNode::Repeat {
          body: Box::new(AstNode::Block {
            name: "repeat body".into(),
            statements,
          }),
          cond: Box::new(cond),
        })
      }
      TokenKind::Write => self.parse_write(false),
      TokenKind::Writeln => self.parse_write(true),
      TokenKind::Break => {
        self.advance()?;
        Ok(AstNode::Break)
      }
      TokenKind::Continue => {
        self.advance()?;
        Ok(AstNode::Continue)
      }
      TokenKind::Identifier => self.parse_simple_statement(),
      TokenKind::Semicolon | TokenKind::End | TokenKind::Until | TokenKind::Else => {
        Ok(AstNode::Empty)
      }
      TokenKind::EndOfFile => Err(CompileError::UnexpectedEndOfFile { pos: self.pos() }),
      _ => Err(CompileError::UnexpectedToken {
        pos: self.pos(),
        got: self.current().text.clone(),
        expected: "statement".into(),
      }),
    }
  }

  fn parse_for(&mut self) -> CompileResult<AstNode> {
    self.advance()?;
    self.expect(TokenKind::Identifier)?;
    let var_tok = self.current().clone();
    let var = self.resolve(&var_tok)?;
    let counter_ty = self
      .symbols
      .value_type(var)
      .filter(|_| self.is_storage_symbol(var));
    match counter_ty {
      Some(ty) if self.symbols.kind_of(ty) == TypeKind::Integer => {}
      _ => {
        return Err(CompileError::BadType {
          pos: var_tok.pos,
          got: counter_ty
            .map(|t| self.symbols.kind_of(t).name())
            .unwrap_or("None")
            .into(),
          expected: "integer".into(),
        });
      }
    }
    self.advance()?;
    self.skip(TokenKind::Assign)?;
    let init_pos = self.pos();
    let init = self.parse_expr(0)?;
    self.require_kind(&init, TypeKind::Integer, init_pos)?;

    let is_to = match self.kind() {
      TokenKind::To => true,
      TokenKind::Downto => false,
      _ => {
        return Err(CompileError::UnexpectedToken {
          pos: self.pos(),
          got: self.current().text.clone(),
          expected: "to".into(),
        });
      }
    };
    self.advance()?;
    let limit_pos = self.pos();
    let limit = self.parse_expr(0)?;
    self.require_kind(&limit, TypeKind::Integer, limit_pos)?;
    self.skip(TokenKind::Do)?;
    let body = self.parse_statement()?;

    Ok(AstNode::For {
      var,
      var_name: var_tok.text,
      is_to,
      init: Box::new(init),
      limit: Box::new(limit),
      body: Box::new(body),
    })
  }

  fn parse_write(&mut self, newline: bool) -> CompileResult<AstNode> {
    self.advance()?;
    let mut args = Vec::new();
    if self.accept(TokenKind::LParen)? {
      if self.kind() != TokenKind::RParen {
        loop {
          let pos = self.pos();
          let arg = self.parse_expr(0)?;
          match (&arg, self.node_kind(&arg)) {
            (AstNode::StringLiteral { .. }, _) => {}
            (_, TypeKind::Integer | TypeKind::Real | TypeKind::Boolean) => {}
            (_, kind) => {
              return Err(CompileError::BadType {
                pos,
                got: kind.name().into(),
                expected: "integer".into(),
              });
            }
          }
          args.push(arg);
          if !self.accept(TokenKind::Comma)? {
            break;
          }
        }
      }
      self.skip(TokenKind::RParen)?;
    }
    Ok(AstNode::Write { newline, args })
  }

  /// A statement that starts with an identifier: assignment or bare call.
  fn parse_simple_statement(&mut self) -> CompileResult<AstNode> {
    let start = self.pos();
    let expr = self.parse_identifier()?;

    if self.kind() == TokenKind::Assign {
      let assign_pos = self.pos();
      match &expr {
        AstNode::Call { .. } => return Err(CompileError::ProcAssignment { pos: assign_pos }),
        AstNode::Identifier { symbol, .. } if self.is_routine(*symbol) => {
          return Err(CompileError::ProcAssignment { pos: assign_pos });
        }
        _ if !self.is_storage_lvalue(&expr) => {
          return Err(CompileError::InvalidExpression { pos: assign_pos });
        }
        _ => {}
      }
      self.advance()?;
      let value_pos = self.pos();
      let value = self.parse_expr(0)?;
      let target_ty = expr_type(&self.symbols, &expr)
        .ok_or(CompileError::InvalidExpression { pos: assign_pos })?;
      if !self.assign_compatible(target_ty, &value) {
        return Err(CompileError::BadType {
          pos: value_pos,
          got: self.node_kind(&value).name().into(),
          expected: self.symbols.kind_of(target_ty).name().into(),
        });
      }
      return Ok(AstNode::Assignment {
        target: Box::new(expr),
        value: Box::new(value),
      });
    }

    match expr {
      AstNode::Call { .. } => Ok(expr),
      AstNode::Identifier { name, symbol } if self.is_routine(symbol) => {
        self.check_call(&[], symbol, start)?;
        Ok(AstNode::Call {
          callee: Box::new(AstNode::Identifier { name, symbol }),
          args: Vec::new(),
          routine: symbol,
        })
      }
      _ => Err(CompileError::SyntaxError {
        pos: self.pos(),
        got: self.current().text.clone(),
        expected: ":=".into(),
      }),
    }
  }

  // ---- declarations ----

  fn parse_declarations(&mut self) -> CompileResult<()> {
    loop {
      match self.kind() {
        TokenKind::Var => {
          self.advance()?;
          while self.kind() == TokenKind::Identifier {
            self.parse_var_line()?;
          }
        }
        TokenKind::Const => {
          self.advance()?;
          while self.kind() == TokenKind::Identifier {
            self.parse_const_line()?;
          }
        }
        TokenKind::Type => {
          self.advance()?;
          while self.kind() == TokenKind::Identifier {
            self.parse_type_line()?;
          }
        }
        TokenKind::Function => self.parse_routine(true)?,
        TokenKind::Procedure => self.parse_routine(false)?,
        _ => return Ok(()),
      }
    }
  }

  fn parse_name_list(&mut self) -> CompileResult<Vec<(String, Pos)>> {
    let mut names = Vec::new();
    loop {
      self.expect(TokenKind::Identifier)?;
      names.push((self.current().text.clone(), self.pos()));
      self.advance()?;
      if !self.accept(TokenKind::Comma)? {
        break;
      }
    }
    Ok(names)
  }

  fn parse_var_line(&mut self) -> CompileResult<()> {
    let names = self.parse_name_list()?;
    self.skip(TokenKind::Colon)?;
    let ty = self.parse_type_spec()?;

    let mut init = None;
    if self.kind() == TokenKind::Equal {
      let eq_pos = self.pos();
      // initializers exist for single global variables only
      if self.stack.depth() > 1 || names.len() > 1 {
        return Err(CompileError::UnexpectedToken {
          pos: eq_pos,
          got: "=".into(),
          expected: ";".into(),
        });
      }
      self.advance()?;
      let node = self.parse_expr(0)?;
      let value = consts::fold(&node, &self.symbols, eq_pos)?;
      init = Some(match (self.symbols.kind_of(ty), value) {
        (TypeKind::Integer, ConstValue::Integer(_)) => value,
        (TypeKind::Real, v) => ConstValue::Real(v.as_real()),
        (kind, v) => {
          return Err(CompileError::BadType {
            pos: eq_pos,
            got: v.type_name().into(),
            expected: kind.name().into(),
          });
        }
      });
    }
    self.skip(TokenKind::Semicolon)?;

    let global = self.stack.depth() == 1;
    for (name, pos) in names {
      let kind = if global {
        SymbolKind::GlobalVar { ty, init }
      } else {
        SymbolKind::LocalVar { ty, offset: 0 }
      };
      self.symbols.insert(self.stack.top(), &name, kind, pos)?;
    }
    Ok(())
  }

  fn parse_const_line(&mut self) -> CompileResult<()> {
    self.expect(TokenKind::Identifier)?;
    let tok = self.current().clone();
    self.advance()?;
    self.skip(TokenKind::Equal)?;
    let node = self.parse_expr(0)?;
    let value = consts::fold(&node, &self.symbols, tok.pos).map_err(|err| match err {
      CompileError::InvalidExpression { .. } => CompileError::InvalidConstant {
        pos: tok.pos,
        name: tok.text.clone(),
      },
      other => other,
    })?;
    self.skip(TokenKind::Semicolon)?;

    let kind = match value {
      ConstValue::Integer(value) => SymbolKind::IntConst { value },
      ConstValue::Real(value) => SymbolKind::RealConst { value },
    };
    self
      .symbols
      .insert(self.stack.top(), &tok.text, kind, tok.pos)?;
    Ok(())
  }

  fn parse_type_line(&mut self) -> CompileResult<()> {
    self.expect(TokenKind::Identifier)?;
    let tok = self.current().clone();
    self.advance()?;
    self.skip(TokenKind::Equal)?;
    let target = self.parse_type_spec()?;
    self.skip(TokenKind::Semicolon)?;
    self.symbols.insert(
      self.stack.top(),
      &tok.text,
      SymbolKind::TypeAlias { target },
      tok.pos,
    )?;
    Ok(())
  }

  fn parse_type_spec(&mut self) -> CompileResult<SymbolId> {
    match self.kind() {
      TokenKind::Identifier => {
        let tok = self.current().clone();
        let sym = self.stack.resolve(&self.symbols, &tok.text, tok.pos, true)?;
        if self.symbols.is_type(sym) {
          self.advance()?;
          return Ok(sym);
        }
        // a constant name here starts a subrange
        self.parse_subrange()
      }
      TokenKind::Record => {
        self.advance()?;
        let fields = self.symbols.new_scope();
        while self.kind() == TokenKind::Identifier {
          let names = self.parse_name_list()?;
          self.skip(TokenKind::Colon)?;
          let ty = self.parse_type_spec()?;
          for (name, pos) in names {
            self
              .symbols
              .insert(fields, &name, SymbolKind::LocalVar { ty, offset: 0 }, pos)?;
          }
          if !self.accept(TokenKind::Semicolon)? {
            break;
          }
        }
        self.skip(TokenKind::End)?;
        Ok(self.symbols.add_anon(SymbolKind::TypeRecord { fields }))
      }
      TokenKind::Array => {
        self.advance()?;
        if self.accept(TokenKind::LBracket)? {
          let mut bounds = Vec::new();
          loop {
            bounds.push(self.parse_bounds()?);
            if !self.accept(TokenKind::Comma)? {
              break;
            }
          }
          self.skip(TokenKind::RBracket)?;
          self.skip(TokenKind::Of)?;
          let mut elem = self.parse_type_spec()?;
          for (low, high) in bounds.into_iter().rev() {
            elem = self
              .symbols
              .add_anon(SymbolKind::TypeArray { elem, low, high });
          }
          Ok(elem)
        } else {
          self.skip(TokenKind::Of)?;
          let elem = self.parse_type_spec()?;
          Ok(self.symbols.add_anon(SymbolKind::TypeOpenArray { elem }))
        }
      }
      TokenKind::Hat => {
        self.advance()?;
        let target = self.parse_type_spec()?;
        Ok(self.symbols.add_anon(SymbolKind::TypePointer { target }))
      }
      _ => self.parse_subrange(),
    }
  }

  fn parse_subrange(&mut self) -> CompileResult<SymbolId> {
    let (low, high) = self.parse_bounds()?;
    Ok(self.symbols.add_anon(SymbolKind::TypeSubrange { low, high }))
  }

  fn parse_bounds(&mut self) -> CompileResult<(i64, i64)> {
    let pos = self.pos();
    let low = self.parse_const_integer(pos)?;
    self.skip(TokenKind::DoubleDot)?;
    let high = self.parse_const_integer(pos)?;
    Ok((low, high))
  }

  fn parse_const_integer(&mut self, pos: Pos) -> CompileResult<i64> {
    let node = self.parse_expr(0)?;
    match consts::fold(&node, &self.symbols, pos)? {
      ConstValue::Integer(v) => Ok(v),
      ConstValue::Real(_) => Err(CompileError::BadType {
        pos,
        got: "float".into(),
        expected: "integer".into(),
      }),
    }
  }

  fn parse_routine(&mut self, is_func: bool) -> CompileResult<()> {
    // nesting depth disambiguates the emitted label
    let depth = (self.stack.depth() + 1) / 2;
    self.advance()?;
    self.expect(TokenKind::Identifier)?;
    let name_tok = self.current().clone();
    self.advance()?;

    let args_scope = self.symbols.new_scope();
    let locals_scope = self.symbols.new_scope();
    let kind = if is_func {
      SymbolKind::Func {
        args: args_scope,
        locals: locals_scope,
        depth,
      }
    } else {
      SymbolKind::Proc {
        args: args_scope,
        locals: locals_scope,
        depth,
      }
    };
    // declared in the enclosing scope before the body, so recursion works
    let routine = self
      .symbols
      .insert(self.stack.top(), &name_tok.text, kind, name_tok.pos)?;

    let mut params: Vec<(String, Pos, SymbolId, bool)> = Vec::new();
    if self.accept(TokenKind::LParen)? {
      if self.kind() != TokenKind::RParen {
        loop {
          let by_ref = self.accept(TokenKind::Var)?;
          let names = self.parse_name_list()?;
          self.skip(TokenKind::Colon)?;
          let ty = self.parse_type_spec()?;
          for (name, pos) in names {
            params.push((name, pos, ty, by_ref));
          }
          if !self.accept(TokenKind::Semicolon)? {
            break;
          }
        }
      }
      self.skip(TokenKind::RParen)?;
    }

    self.stack.push(args_scope);
    if is_func {
      self.skip(TokenKind::Colon)?;
      let result_ty = self.parse_type_spec()?;
      // result first: re-basing then parks it above the explicit arguments,
      // where the caller reserves it before pushing them
      self.symbols.insert(
        args_scope,
        "result",
        SymbolKind::FuncResult {
          ty: result_ty,
          offset: 0,
        },
        name_tok.pos,
      )?;
    }
    for (name, pos, ty, by_ref) in params {
      let kind = if by_ref {
        SymbolKind::VarParam { ty, offset: 0 }
      } else {
        SymbolKind::Param { ty, offset: 0 }
      };
      self.symbols.insert(args_scope, &name, kind, pos)?;
    }
    self.symbols.rebase_params(args_scope);
    self.skip(TokenKind::Semicolon)?;

    self.stack.push(locals_scope);
    self.parse_declarations()?;
    let body = self.parse_block(&name_tok.text)?;
    self.skip(TokenKind::Semicolon)?;
    self.stack.pop();
    self.stack.pop();

    self.routines.push(Routine {
      symbol: routine,
      body,
    });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse_err(source: &str) -> CompileError {
    parse_program(source).expect_err("expected a compile error")
  }

  #[test]
  fn precedence_tiers_nest_correctly() {
    let (node, _) = parse_expression("1 + 2 * 3 = 7").expect("parses");
    assert_eq!(
      node.dump(),
      "\\- =\n   |- +\n   |  |- 1\n   |  \\- *\n   |     |- 2\n   |     \\- 3\n   \\- 7"
    );
  }

  #[test]
  fn unary_binds_tighter_than_binary() {
    let (node, _) = parse_expression("-1 + 2").expect("parses");
    assert_eq!(node.dump(), "\\- +\n   |- -\n   |  \\- 1\n   \\- 2");
  }

  #[test]
  fn lenient_mode_types_unknown_names_as_integer() {
    let (node, symbols) = parse_expression("a + b").expect("parses");
    let ty = expr_type(&symbols, &node).expect("typed");
    assert_eq!(symbols.kind_of(ty), TypeKind::Integer);
  }

  #[test]
  fn minimal_program_parses() {
    let program = parse_program("program p;\nbegin\nend.").expect("parses");
    assert_eq!(program.name.as_deref(), Some("p"));
    assert!(program.routines.is_empty());
  }

  #[test]
  fn unknown_symbol_is_reported_with_its_name() {
    let err = parse_err("begin x := 1; end.");
    assert_eq!(err.to_string(), "(1 ; 7): Symbol \"x\" does not exist.");
  }

  #[test]
  fn duplicate_declaration_is_fatal() {
    let err = parse_err("var x: integer; x: float;\nbegin end.");
    assert!(matches!(err, CompileError::Duplicate { name, .. } if name == "x"));
  }

  #[test]
  fn assignment_narrowing_is_a_type_error() {
    let err = parse_err("var x: integer;\nbegin x := 1.5; end.");
    assert!(
      matches!(err, CompileError::BadType { ref got, ref expected, .. }
        if got == "float" && expected == "integer")
    );
  }

  #[test]
  fn integer_widens_into_a_real_target() {
    parse_program("var x: float;\nbegin x := 1; end.").expect("parses");
  }

  #[test]
  fn condition_must_be_boolean() {
    let err = parse_err("begin if 1.5 then ; end.");
    assert!(matches!(err, CompileError::BadType { .. }));
    parse_program("begin if 1 then ; end.").expect("integers double as booleans");
  }

  #[test]
  fn div_on_reals_is_rejected_inline() {
    let err = parse_err("var x: integer;\nbegin x := 1.5 div 2; end.");
    assert!(matches!(err, CompileError::BadType { .. }));
  }

  #[test]
  fn record_fields_resolve_and_missing_ones_do_not() {
    let source = "type point = record x, y: integer end;\nvar p: point;\nbegin p.x := 1; end.";
    parse_program(source).expect("parses");

    let source = "type point = record x, y: integer end;\nvar p: point;\nbegin p.z := 1; end.";
    let err = parse_err(source);
    assert!(matches!(err, CompileError::NoMember { member, .. } if member == "z"));
  }

  #[test]
  fn qualifying_a_scalar_is_illegal() {
    let err = parse_err("var x: integer;\nbegin x.y := 1; end.");
    assert!(matches!(err, CompileError::IllegalQualifier { .. }));
    let err = parse_err("var x: integer;\nbegin x[1] := 1; end.");
    assert!(matches!(err, CompileError::IllegalQualifier { .. }));
  }

  #[test]
  fn subscripts_supply_every_dimension() {
    let source = "var a: array [1..2, 1..3] of integer;\nbegin a[1, 2] := 0; end.";
    parse_program(source).expect("parses");

    let source = "var a: array [1..2, 1..3] of integer;\nbegin a[1] := 0; end.";
    let err = parse_err(source);
    assert!(matches!(err, CompileError::WrongNumberOfParam { name, .. } if name == "a"));
  }

  #[test]
  fn call_arity_ignores_the_result_slot() {
    let source = "\
function add(a, b: integer): integer;
begin
  result := a + b;
end;
var x: integer;
begin
  x := add(1, 2);
end.";
    parse_program(source).expect("parses");

    let bad = source.replace("add(1, 2)", "add(1)");
    let err = parse_program(&bad).expect_err("arity");
    assert!(matches!(err, CompileError::WrongNumberOfParam { name, .. } if name == "add"));
  }

  #[test]
  fn procedure_calls_produce_no_value() {
    let source = "\
procedure p;
begin
end;
var x: integer;
begin
  x := p;
end.";
    let err = parse_program(source).expect_err("no value");
    assert!(matches!(err, CompileError::BadType { .. }));
  }

  #[test]
  fn assigning_to_a_routine_is_rejected() {
    let source = "procedure p;\nbegin\nend;\nbegin\n  p := 1;\nend.";
    let err = parse_program(source).expect_err("routine target");
    assert!(matches!(err, CompileError::ProcAssignment { .. }));
  }

  #[test]
  fn var_parameters_require_an_exact_lvalue() {
    let source = "\
procedure bump(var n: integer);
begin
  n := n + 1;
end;
var x: integer;
begin
  bump(x);
end.";
    parse_program(source).expect("parses");

    let literal = source.replace("bump(x)", "bump(5)");
    let err = parse_program(&literal).expect_err("literal by reference");
    assert!(matches!(err, CompileError::InvalidExpression { .. }));

    let widened = source.replace("var x: integer", "var x: float");
    let err = parse_program(&widened).expect_err("no conversion by reference");
    assert!(matches!(err, CompileError::BadType { .. }));
  }

  #[test]
  fn constants_fold_and_feed_later_declarations() {
    let source = "\
const n = 4 * 8;
type small = 1..n;
var x: small;
begin
  x := n - 31;
end.";
    parse_program(source).expect("parses");
  }

  #[test]
  fn non_constant_initializer_is_invalid() {
    let source = "var a: integer;\nconst c = a + 1;\nbegin end.";
    let err = parse_err(source);
    assert!(matches!(err, CompileError::InvalidConstant { name, .. } if name == "c"));
  }

  #[test]
  fn nested_routines_complete_before_their_parent() {
    let source = "\
procedure outer;
  procedure inner;
  begin
  end;
begin
  inner;
end;
begin
  outer;
end.";
    let program = parse_program(source).expect("parses");
    let names: Vec<_> = program
      .routines
      .iter()
      .map(|r| program.symbols.symbol(r.symbol).name.clone())
      .collect();
    assert_eq!(names, vec!["inner", "outer"]);
  }

  #[test]
  fn program_must_end_with_a_dot() {
    let err = parse_err("begin end");
    assert!(matches!(err, CompileError::UnexpectedEndOfFile { .. }));
  }

  #[test]
  fn result_slot_sits_above_the_explicit_arguments() {
    let source = "\
function add(a, b: integer): integer;
begin
  result := a + b;
end;
begin
end.";
    let program = parse_program(source).expect("parses");
    let routine = &program.routines[0];
    let SymbolKind::Func { args, .. } = program.symbols.symbol(routine.symbol).kind else {
      panic!("not a function");
    };
    let offsets: Vec<_> = program
      .symbols
      .scope(args)
      .entries
      .iter()
      .map(|&id| match program.symbols.symbol(id).kind {
        SymbolKind::Param { offset, .. } | SymbolKind::FuncResult { offset, .. } => offset,
        _ => panic!("unexpected symbol"),
      })
      .collect();
    // result, a, b
    assert_eq!(offsets, vec![24, 16, 8]);
  }
}
