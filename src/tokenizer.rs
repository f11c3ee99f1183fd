//! Lexical analysis: turns raw source text into positioned tokens.
//!
//! The scanner walks the source one character at a time, tracking 1-based
//! line/column positions. It knows nothing about semantics beyond keyword
//! recognition and literal decoding. Multi-character operators are matched
//! before single-character ones to avoid ambiguity, and the range operator
//! gets special treatment so `1..5` never lexes as a broken real.

use crate::error::{CompileError, CompileResult, Pos};

/// Kinds of tokens recognised by the front-end. Keywords are matched
/// case-insensitively; everything else is verbatim source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  // keywords
  And,
  Array,
  Begin,
  Break,
  Case,
  Const,
  Continue,
  Div,
  Do,
  Downto,
  Else,
  End,
  Exit,
  For,
  Function,
  Goto,
  If,
  Label,
  Mod,
  Nil,
  Not,
  Of,
  Or,
  Procedure,
  Program,
  Record,
  Repeat,
  Set,
  Shl,
  Shr,
  Then,
  To,
  Type,
  Until,
  Var,
  While,
  Write,
  Writeln,
  Xor,
  // operators
  Add,
  AddAssign,
  Sub,
  SubAssign,
  Mul,
  MulAssign,
  DivReal,
  DivAssign,
  Assign,
  Equal,
  NotEqual,
  Less,
  LessEqual,
  Greater,
  GreaterEqual,
  Hat,
  // delimiters
  Dot,
  DoubleDot,
  Comma,
  Colon,
  Semicolon,
  LParen,
  RParen,
  LBracket,
  RBracket,
  // literals and the rest
  Identifier,
  IntegerNumber,
  RealNumber,
  StringLiteral,
  EndOfFile,
}

impl TokenKind {
  /// Category label used in the token dump.
  pub fn category(self) -> &'static str {
    use TokenKind::*;
    match self {
      Identifier => "Identifier",
      IntegerNumber => "Integer number",
      RealNumber => "Real number",
      StringLiteral => "String",
      EndOfFile => "End of file",
      Add | AddAssign | Sub | SubAssign | Mul | MulAssign | DivReal | DivAssign | Assign
      | Equal | NotEqual | Less | LessEqual | Greater | GreaterEqual | Hat => "Operation",
      Dot | DoubleDot | Comma | Colon | Semicolon | LParen | RParen | LBracket | RBracket => {
        "Delimiter"
      }
      _ => "Word",
    }
  }

  /// Source spelling used when a parser error names an expected token.
  pub fn spelling(self) -> &'static str {
    use TokenKind::*;
    match self {
      And => "and",
      Array => "array",
      Begin => "begin",
      Break => "break",
      Case => "case",
      Const => "const",
      Continue => "continue",
      Div => "div",
      Do => "do",
      Downto => "downto",
      Else => "else",
      End => "end",
      Exit => "exit",
      For => "for",
      Function => "function",
      Goto => "goto",
      If => "if",
      Label => "label",
      Mod => "mod",
      Nil => "nil",
      Not => "not",
      Of => "of",
      Or => "or",
      Procedure => "procedure",
      Program => "program",
      Record => "record",
      Repeat => "repeat",
      Set => "set",
      Shl => "shl",
      Shr => "shr",
      Then => "then",
      To => "to",
      Type => "type",
      Until => "until",
      Var => "var",
      While => "while",
      Write => "write",
      Writeln => "writeln",
      Xor => "xor",
      Add => "+",
      AddAssign => "+=",
      Sub => "-",
      SubAssign => "-=",
      Mul => "*",
      MulAssign => "*=",
      DivReal => "/",
      DivAssign => "/=",
      Assign => ":=",
      Equal => "=",
      NotEqual => "<>",
      Less => "<",
      LessEqual => "<=",
      Greater => ">",
      GreaterEqual => ">=",
      Hat => "^",
      Dot => ".",
      DoubleDot => "..",
      Comma => ",",
      Colon => ":",
      Semicolon => ";",
      LParen => "(",
      RParen => ")",
      LBracket => "[",
      RBracket => "]",
      Identifier => "identifier",
      IntegerNumber => "integer number",
      RealNumber => "real number",
      StringLiteral => "string",
      EndOfFile => "end of file",
    }
  }
}

/// Decoded literal payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
  Int(i64),
  Real(f64),
  Str(String),
}

/// One lexed token. Immutable once produced.
#[derive(Debug, Clone)]
pub struct Token {
  pub kind: TokenKind,
  pub pos: Pos,
  pub text: String,
  pub value: Option<TokenValue>,
}

impl Token {
  fn new(kind: TokenKind, pos: Pos, text: impl Into<String>, value: Option<TokenValue>) -> Self {
    Self {
      kind,
      pos,
      text: text.into(),
      value,
    }
  }

  /// Decoded value rendered for the token dump; falls back to the raw text.
  pub fn value_string(&self) -> String {
    match &self.value {
      Some(TokenValue::Int(v)) => v.to_string(),
      Some(TokenValue::Real(v)) => format!("{v:.6}"),
      Some(TokenValue::Str(v)) => v.clone(),
      None => self.text.clone(),
    }
  }
}

fn keyword_kind(word: &str) -> Option<TokenKind> {
  use TokenKind::*;
  let kind = match word {
    "and" => And,
    "array" => Array,
    "begin" => Begin,
    "break" => Break,
    "case" => Case,
    "const" => Const,
    "continue" => Continue,
    "div" => Div,
    "do" => Do,
    "downto" => Downto,
    "else" => Else,
    "end" => End,
    "exit" => Exit,
    "for" => For,
    "function" => Function,
    "goto" => Goto,
    "if" => If,
    "label" => Label,
    "mod" => Mod,
    "nil" => Nil,
    "not" => Not,
    "of" => Of,
    "or" => Or,
    "procedure" => Procedure,
    "program" => Program,
    "record" => Record,
    "repeat" => Repeat,
    "set" => Set,
    "shl" => Shl,
    "shr" => Shr,
    "then" => Then,
    "to" => To,
    "type" => Type,
    "until" => Until,
    "var" => Var,
    "while" => While,
    "write" => Write,
    "writeln" => Writeln,
    "xor" => Xor,
    _ => return None,
  };
  Some(kind)
}

fn two_char_kind(first: char, second: char) -> Option<TokenKind> {
  use TokenKind::*;
  let kind = match (first, second) {
    ('+', '=') => AddAssign,
    ('-', '=') => SubAssign,
    ('*', '=') => MulAssign,
    ('/', '=') => DivAssign,
    (':', '=') => Assign,
    ('<', '=') => LessEqual,
    ('>', '=') => GreaterEqual,
    ('<', '>') => NotEqual,
    ('.', '.') => DoubleDot,
    _ => return None,
  };
  Some(kind)
}

fn single_char_kind(c: char) -> Option<TokenKind> {
  use TokenKind::*;
  let kind = match c {
    '+' => Add,
    '-' => Sub,
    '*' => Mul,
    '/' => DivReal,
    '=' => Equal,
    '<' => Less,
    '>' => Greater,
    '^' => Hat,
    '.' => Dot,
    ',' => Comma,
    ':' => Colon,
    ';' => Semicolon,
    '(' => LParen,
    ')' => RParen,
    '[' => LBracket,
    ']' => RBracket,
    _ => return None,
  };
  Some(kind)
}

fn is_ident_start(c: char) -> bool {
  c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
  is_ident_start(c) || c.is_ascii_digit()
}

/// Characters that legally terminate a numeric literal. Anything else right
/// after the digits makes the literal invalid (`123abc`).
fn is_literal_separator(c: char) -> bool {
  c.is_ascii_whitespace() || single_char_kind(c).is_some()
}

/// Character-level cursor producing one token at a time. The parser drives
/// it with `next()` and keeps at most the current token in hand.
pub struct Scanner {
  chars: Vec<char>,
  pos: usize,
  line: usize,
  col: usize,
  token: Token,
}

impl Scanner {
  pub fn new(source: &str) -> Self {
    Self {
      chars: source.chars().collect(),
      pos: 0,
      line: 1,
      col: 0,
      token: Token::new(TokenKind::EndOfFile, Pos::new(1, 1), "End of file", None),
    }
  }

  /// The token most recently produced by `next()`.
  pub fn current(&self) -> &Token {
    &self.token
  }

  fn peek(&self) -> Option<char> {
    self.chars.get(self.pos).copied()
  }

  fn peek_second(&self) -> Option<char> {
    self.chars.get(self.pos + 1).copied()
  }

  fn advance(&mut self) -> Option<char> {
    let c = self.peek()?;
    self.pos += 1;
    if c == '\n' {
      self.line += 1;
      self.col = 0;
    } else {
      self.col += 1;
    }
    Some(c)
  }

  /// Position of the next unconsumed character.
  fn mark(&self) -> Pos {
    Pos::new(self.line, self.col + 1)
  }

  /// Advance to and decode the next token, skipping whitespace and comments.
  pub fn next(&mut self) -> CompileResult<&Token> {
    loop {
      while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
        self.advance();
      }

      match self.peek() {
        Some('{') => {
          let pos = self.mark();
          self.advance();
          loop {
            match self.advance() {
              Some('}') => break,
              Some(_) => {}
              None => return Err(CompileError::UnterminatedComment { pos }),
            }
          }
          continue;
        }
        Some('/') if self.peek_second() == Some('/') => {
          while self.peek().is_some_and(|c| c != '\n') {
            self.advance();
          }
          continue;
        }
        _ => {}
      }

      let pos = self.mark();
      self.token = match self.peek() {
        None => Token::new(TokenKind::EndOfFile, pos, "End of file", None),
        Some(c) if is_ident_start(c) => self.read_identifier(pos),
        Some(c) if c.is_ascii_digit() => self.read_decimal(pos)?,
        Some('$') => self.read_based(pos, 16)?,
        Some('&') => self.read_based(pos, 8)?,
        Some('%') => self.read_based(pos, 2)?,
        Some('\'') => self.read_string(pos)?,
        Some(c) => {
          if let Some(second) = self.peek_second()
            && let Some(kind) = two_char_kind(c, second)
          {
            self.advance();
            self.advance();
            Token::new(kind, pos, format!("{c}{second}"), None)
          } else if let Some(kind) = single_char_kind(c) {
            self.advance();
            Token::new(kind, pos, c.to_string(), None)
          } else {
            return Err(CompileError::UnexpectedSymbol { pos });
          }
        }
      };
      return Ok(&self.token);
    }
  }

  fn read_identifier(&mut self, pos: Pos) -> Token {
    let mut text = String::new();
    while self.peek().is_some_and(is_ident_char) {
      text.push(self.advance().unwrap_or_default());
    }
    match keyword_kind(&text.to_ascii_lowercase()) {
      Some(kind) => Token::new(kind, pos, text, None),
      None => Token::new(TokenKind::Identifier, pos, text, None),
    }
  }

  fn read_digits_into(&mut self, text: &mut String) {
    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
      text.push(self.advance().unwrap_or_default());
    }
  }

  /// A literal must be followed by whitespace, a delimiter, an operator or
  /// the end of input; `123abc` and `1.5x` are lexical errors.
  fn check_separator(&self, pos: Pos, real: bool) -> CompileResult<()> {
    match self.peek() {
      None => Ok(()),
      Some(c) if is_literal_separator(c) => Ok(()),
      Some(_) if real => Err(CompileError::InvalidReal { pos }),
      Some(_) => Err(CompileError::InvalidInteger { pos }),
    }
  }

  fn read_decimal(&mut self, pos: Pos) -> CompileResult<Token> {
    let mut text = String::new();
    self.read_digits_into(&mut text);

    let mut real = false;
    if self.peek() == Some('.') && self.peek_second() != Some('.') {
      real = true;
      text.push(self.advance().unwrap_or_default());
      match self.peek() {
        Some(c) if c.is_ascii_digit() || is_literal_separator(c) || c == 'e' || c == 'E' => {}
        None => {}
        Some(_) => return Err(CompileError::InvalidReal { pos }),
      }
      self.read_digits_into(&mut text);
      if self.peek() == Some('.') {
        return Err(CompileError::InvalidReal { pos });
      }
    }

    if matches!(self.peek(), Some('e' | 'E')) {
      real = true;
      text.push(self.advance().unwrap_or_default());
      if matches!(self.peek(), Some('+' | '-')) {
        text.push(self.advance().unwrap_or_default());
      }
      if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
        return Err(CompileError::InvalidReal { pos });
      }
      self.read_digits_into(&mut text);
    }

    self.check_separator(pos, real)?;
    if real {
      let value = text
        .parse::<f64>()
        .map_err(|_| CompileError::InvalidReal { pos })?;
      Ok(Token::new(
        TokenKind::RealNumber,
        pos,
        text,
        Some(TokenValue::Real(value)),
      ))
    } else {
      let value = text
        .parse::<i64>()
        .map_err(|_| CompileError::InvalidInteger { pos })?;
      Ok(Token::new(
        TokenKind::IntegerNumber,
        pos,
        text,
        Some(TokenValue::Int(value)),
      ))
    }
  }

  /// `$` hexadecimal, `&` octal and `%` binary integer literals.
  fn read_based(&mut self, pos: Pos, radix: u32) -> CompileResult<Token> {
    let mut text = String::new();
    text.push(self.advance().unwrap_or_default());
    while self.peek().is_some_and(|c| c.is_digit(radix)) {
      text.push(self.advance().unwrap_or_default());
    }
    if text.len() == 1 {
      return Err(CompileError::InvalidInteger { pos });
    }
    self.check_separator(pos, false)?;
    let value = i64::from_str_radix(&text[1..], radix)
      .map_err(|_| CompileError::InvalidInteger { pos })?;
    Ok(Token::new(
      TokenKind::IntegerNumber,
      pos,
      text,
      Some(TokenValue::Int(value)),
    ))
  }

  /// Single-quoted string with `''` doubling and `#<decimal>` escapes;
  /// adjacent quote segments and escapes concatenate into one literal.
  fn read_string(&mut self, pos: Pos) -> CompileResult<Token> {
    let mut text = String::new();
    let mut value = String::new();
    loop {
      if self.peek() == Some('\'') {
        text.push(self.advance().unwrap_or_default());
        loop {
          match self.peek() {
            None | Some('\n') => return Err(CompileError::UnterminatedString { pos }),
            Some('\'') => break,
            Some(c) => {
              value.push(c);
              text.push(c);
              self.advance();
            }
          }
        }
        text.push(self.advance().unwrap_or_default());
        if self.peek() == Some('\'') {
          // doubled quote: literal apostrophe, keep reading the same string
          value.push('\'');
          continue;
        }
      } else if self.peek() == Some('#') {
        text.push(self.advance().unwrap_or_default());
        let mut digits = String::new();
        self.read_digits_into(&mut digits);
        text.push_str(&digits);
        let code = digits
          .parse::<u32>()
          .ok()
          .and_then(char::from_u32)
          .ok_or(CompileError::UnexpectedSymbol { pos })?;
        value.push(code);
      } else {
        break;
      }
    }
    Ok(Token::new(
      TokenKind::StringLiteral,
      pos,
      text,
      Some(TokenValue::Str(value)),
    ))
  }
}

/// One dump line per token: line, column, text, decoded value, category.
pub fn token_line(token: &Token) -> String {
  format!(
    "{:<4} {:<3} {:<15} {:<15} {}",
    token.pos.line,
    token.pos.col,
    token.text,
    token.value_string(),
    token.kind.category()
  )
}

/// Diagnostic token dump for the whole source (`-l` mode).
pub fn tokens_dump(source: &str) -> CompileResult<String> {
  let mut scanner = Scanner::new(source);
  let mut lines = Vec::new();
  loop {
    let token = scanner.next()?;
    if token.kind == TokenKind::EndOfFile {
      break;
    }
    lines.push(token_line(token));
  }
  Ok(lines.join("\n"))
}
