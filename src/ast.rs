//! Syntax tree produced by the parser.
//!
//! One sum type covers expressions and statements; nodes own their children
//! through `Box`/`Vec` and the whole tree is owned by the compilation unit.
//! Name resolution happens during parsing, so nodes that denote storage or
//! routines carry their resolved `SymbolId` and expression nodes carry the
//! type the parser computed for them.

use crate::symbols::SymbolId;
use crate::tokenizer::TokenKind;

#[derive(Debug, Clone)]
pub enum AstNode {
  IntLiteral {
    value: i64,
  },
  RealLiteral {
    value: f64,
  },
  StringLiteral {
    value: String,
  },
  Identifier {
    name: String,
    symbol: SymbolId,
  },
  Binary {
    op: TokenKind,
    sign: String,
    ty: SymbolId,
    left: Box<AstNode>,
    right: Box<AstNode>,
  },
  Unary {
    op: TokenKind,
    sign: String,
    ty: SymbolId,
    operand: Box<AstNode>,
  },
  RecordField {
    record: Box<AstNode>,
    field: SymbolId,
    name: String,
  },
  ArrayIndex {
    base: Box<AstNode>,
    args: Vec<AstNode>,
    elem: SymbolId,
  },
  Call {
    callee: Box<AstNode>,
    args: Vec<AstNode>,
    routine: SymbolId,
  },
  Assignment {
    target: Box<AstNode>,
    value: Box<AstNode>,
  },
  Block {
    name: String,
    statements: Vec<AstNode>,
  },
  If {
    cond: Box<AstNode>,
    then: Box<AstNode>,
    els: Option<Box<AstNode>>,
  },
  While {
    cond: Box<AstNode>,
    body: Box<AstNode>,
  },
  For {
    var: SymbolId,
    var_name: String,
    is_to: bool,
    init: Box<AstNode>,
    limit: Box<AstNode>,
    body: Box<AstNode>,
  },
  Repeat {
    body: Box<AstNode>,
    cond: Box<AstNode>,
  },
  Write {
    newline: bool,
    args: Vec<AstNode>,
  },
  Break,
  Continue,
  Empty,
}

impl AstNode {
  pub fn binary(op: TokenKind, sign: String, ty: SymbolId, left: AstNode, right: AstNode) -> Self {
    Self::Binary {
      op,
      sign,
      ty,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  pub fn unary(op: TokenKind, sign: String, ty: SymbolId, operand: AstNode) -> Self {
    Self::Unary {
      op,
      sign,
      ty,
      operand: Box::new(operand),
    }
  }

  pub fn is_lvalue(&self) -> bool {
    matches!(
      self,
      Self::Identifier { .. } | Self::RecordField { .. } | Self::ArrayIndex { .. }
    )
  }

  /// Render the tree with `|- ` for inner children and `\- ` for the last
  /// child of each node; the root is treated as a last child.
  pub fn dump(&self) -> String {
    let mut out = String::new();
    self.dump_into(&mut out, "", true);
    out
  }

  fn label(&self) -> String {
    match self {
      Self::IntLiteral { value } => value.to_string(),
      Self::RealLiteral { value } => format!("{value:.6}"),
      Self::StringLiteral { value } => format!("'{value}'"),
      Self::Identifier { name, .. } => name.clone(),
      Self::Binary { sign, .. } | Self::Unary { sign, .. } => sign.clone(),
      Self::RecordField { .. } => ".".into(),
      Self::ArrayIndex { .. } => "[]".into(),
      Self::Call { .. } => "call".into(),
      Self::Assignment { .. } => ":=".into(),
      Self::Block { name, .. } => name.clone(),
      Self::If { .. } => "if".into(),
      Self::While { .. } => "while".into(),
      Self::For { .. } => "for".into(),
      Self::Repeat { .. } => "repeat".into(),
      Self::Write { newline: false, .. } => "write".into(),
      Self::Write { newline: true, .. } => "writeln".into(),
      Self::Break => "break".into(),
      Self::Continue => "continue".into(),
      Self::Empty => "empty node".into(),
    }
  }

  fn dump_into(&self, out: &mut String, indent: &str, last: bool) {
    out.push_str(indent);
    out.push_str(if last { "\\- " } else { "|- " });
    out.push_str(&self.label());

    let child_indent = format!("{indent}{}", if last { "   " } else { "|  " });
    let mut children: Vec<(&AstNode, Option<String>)> = Vec::new();
    match self {
      Self::Binary { left, right, .. } => {
        children.push((left, None));
        children.push((right, None));
      }
      Self::Unary { operand, .. } => children.push((operand, None)),
      Self::RecordField { record, name, .. } => {
        children.push((record, None));
        children.push((record, Some(name.clone())));
      }
      Self::ArrayIndex { base, args, .. } => {
        children.push((base, None));
        for arg in args {
          children.push((arg, None));
        }
      }
      Self::Call { callee, args, .. } => {
        children.push((callee, None));
        for arg in args {
          children.push((arg, None));
        }
      }
      Self::Assignment { target, value } => {
        children.push((target, None));
        children.push((value, None));
      }
      Self::Block { statements, .. } => {
        if statements.is_empty() {
          children.push((self, Some("empty node".into())));
        }
        for statement in statements {
          children.push((statement, None));
        }
      }
      Self::If { cond, then, els } => {
        children.push((cond, None));
        children.push((then, None));
        if let Some(els) = els {
          children.push((els, None));
        }
      }
      Self::While { cond, body } => {
        children.push((cond, None));
        children.push((body, None));
      }
      Self::For {
        var_name,
        is_to,
        init,
        limit,
        body,
        ..
      } => {
        children.push((init, Some(var_name.clone())));
        children.push((init, Some(if *is_to { "to" } else { "downto" }.into())));
        children.push((init, None));
        children.push((limit, None));
        children.push((body, None));
      }
      Self::Repeat { body, cond } => {
        children.push((body, None));
        children.push((cond, None));
      }
      Self::Write { args, .. } => {
        for arg in args {
          children.push((arg, None));
        }
      }
      _ => {}
    }

    let count = children.len();
    for (i, (child, text)) in children.into_iter().enumerate() {
      out.push('\n');
      let last_child = i + 1 == count;
      match text {
        Some(text) => {
          out.push_str(&child_indent);
          out.push_str(if last_child { "\\- " } else { "|- " });
          out.push_str(&text);
        }
        None => child.dump_into(out, &child_indent, last_child),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn ident(name: &str) -> AstNode {
    AstNode::Identifier {
      name: name.into(),
      symbol: SymbolId(0),
    }
  }

  #[test]
  fn binary_tree_renders_with_branch_markers() {
    let tree = AstNode::binary(
      TokenKind::Add,
      "+".into(),
      SymbolId(0),
      ident("a"),
      AstNode::binary(
        TokenKind::Mul,
        "*".into(),
        SymbolId(0),
        ident("b"),
        AstNode::IntLiteral { value: 2 },
      ),
    );
    assert_eq!(
      tree.dump(),
      "\\- +\n   |- a\n   \\- *\n      |- b\n      \\- 2"
    );
  }

  #[test]
  fn empty_block_shows_an_empty_node() {
    let block = AstNode::Block {
      name: "block".into(),
      statements: Vec::new(),
    };
    assert_eq!(block.dump(), "\\- block\n   \\- empty node");
  }
}
