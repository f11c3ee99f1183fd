//! Code generation: lower the checked AST into NASM x86-64 assembly.
//!
//! The emitter is a stack machine: every expression leaves exactly one value
//! on the hardware stack, binary operators pop two and push one, and lvalues
//! are produced as addresses by `emit_address`. Every address is the
//! object's lowest byte: locals sit at `rbp - offset - size`, parameters at
//! `rbp + 16 + offset - size`, globals at their data symbol, and interior
//! field/element offsets always add. Objects of every storage class share
//! one layout, so aggregate copies and by-reference passing work across
//! localities. Output is one `main` under `section .text` preceded by the
//! routines, with globals and literal pools in `section .data`, printing
//! through the C `printf`.

use std::collections::HashMap;
use std::fmt;

use crate::ast::AstNode;
use crate::consts::ConstValue;
use crate::parser::{expr_type, Program, Routine};
use crate::symbols::{SymbolId, SymbolKind, Symbols};
use crate::tokenizer::TokenKind;
use crate::ty::{self, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reg {
  Rax,
  Rbx,
  Rcx,
  Rdx,
  Rbp,
  Rsp,
  Cl,
  Xmm0,
  Xmm1,
}

impl fmt::Display for Reg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Rax => "rax",
      Self::Rbx => "rbx",
      Self::Rcx => "rcx",
      Self::Rdx => "rdx",
      Self::Rbp => "rbp",
      Self::Rsp => "rsp",
      Self::Cl => "cl",
      Self::Xmm0 => "xmm0",
      Self::Xmm1 => "xmm1",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
  Push,
  Pop,
  Mov,
  Movq,
  Lea,
  Add,
  Sub,
  Imul,
  Idiv,
  Neg,
  Xor,
  And,
  Or,
  Test,
  Cmp,
  Sal,
  Shr,
  Call,
  Ret,
  Jmp,
  Jz,
  Jnz,
  Je,
  Jne,
  Jl,
  Jle,
  Jg,
  Jge,
  Ja,
  Jae,
  Jb,
  Jbe,
  Addsd,
  Subsd,
  Mulsd,
  Divsd,
  Comisd,
  Cvtsi2sd,
}

impl fmt::Display for Op {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Push => "push",
      Self::Pop => "pop",
      Self::Mov => "mov",
      Self::Movq => "movq",
      Self::Lea => "lea",
      Self::Add => "add",
      Self::Sub => "sub",
      Self::Imul => "imul",
      Self::Idiv => "idiv",
      Self::Neg => "neg",
      Self::Xor => "xor",
      Self::And => "and",
      Self::Or => "or",
      Self::Test => "test",
      Self::Cmp => "cmp",
      Self::Sal => "sal",
      Self::Shr => "shr",
      Self::Call => "call",
      Self::Ret => "ret",
      Self::Jmp => "jmp",
      Self::Jz => "jz",
      Self::Jnz => "jnz",
      Self::Je => "je",
      Self::Jne => "jne",
      Self::Jl => "jl",
      Self::Jle => "jle",
      Self::Jg => "jg",
      Self::Jge => "jge",
      Self::Ja => "ja",
      Self::Jae => "jae",
      Self::Jb => "jb",
      Self::Jbe => "jbe",
      Self::Addsd => "addsd",
      Self::Subsd => "subsd",
      Self::Mulsd => "mulsd",
      Self::Divsd => "divsd",
      Self::Comisd => "comisd",
      Self::Cvtsi2sd => "cvtsi2sd",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone)]
enum Operand {
  Reg(Reg),
  Imm(i64),
  /// A label, data symbol or literal used verbatim.
  Name(String),
  /// `[reg + disp]`
  Mem(Reg, i64),
  /// `[name]`
  MemName(String),
}

impl fmt::Display for Operand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Reg(reg) => write!(f, "{reg}"),
      Self::Imm(value) => write!(f, "{value}"),
      Self::Name(name) => f.write_str(name),
      Self::Mem(base, disp) => match disp {
        0 => write!(f, "[{base}]"),
        d if *d > 0 => write!(f, "[{base} + {d}]"),
        d => write!(f, "[{base} - {}]", -d),
      },
      Self::MemName(name) => write!(f, "[{name}]"),
    }
  }
}

fn r(reg: Reg) -> Operand {
  Operand::Reg(reg)
}

fn imm(value: i64) -> Operand {
  Operand::Imm(value)
}

fn name(text: impl Into<String>) -> Operand {
  Operand::Name(text.into())
}

fn mem(base: Reg, disp: i64) -> Operand {
  Operand::Mem(base, disp)
}

#[derive(Debug)]
enum Line {
  Cmd(Op, Vec<Operand>),
  Label(String),
}

#[derive(Debug)]
enum DataDef {
  /// `name: dq value`
  Quad { name: String, value: String },
  /// `name: db value, 0`
  Bytes { name: String, value: String },
  /// `name: times size db 0`
  Zeroed { name: String, size: usize },
}

/// Growable instruction and data buffer with label/name generators and the
/// loop-label stack. Rendering produces the complete NASM module.
struct AsmCode {
  lines: Vec<Line>,
  data: Vec<DataDef>,
  labels: usize,
  names: usize,
  loops: Vec<(String, String)>,
}

impl AsmCode {
  fn new() -> Self {
    Self {
      lines: Vec::new(),
      data: vec![
        DataDef::Bytes {
          name: "formatInt".into(),
          value: "\"%ld\"".into(),
        },
        DataDef::Bytes {
          name: "formatFloat".into(),
          value: "\"%f\"".into(),
        },
        DataDef::Bytes {
          name: "formatNewLine".into(),
          value: "10".into(),
        },
      ],
      labels: 0,
      names: 0,
      loops: Vec::new(),
    }
  }

  fn cmd0(&mut self, op: Op) {
    self.lines.push(Line::Cmd(op, Vec::new()));
  }

  fn cmd1(&mut self, op: Op, a: Operand) {
    self.lines.push(Line::Cmd(op, vec![a]));
  }

  fn cmd2(&mut self, op: Op, a: Operand, b: Operand) {
    self.lines.push(Line::Cmd(op, vec![a, b]));
  }

  fn label(&mut self, name: &str) {
    self.lines.push(Line::Label(name.into()));
  }

  fn new_label(&mut self) -> String {
    self.labels += 1;
    format!("L{}", self.labels)
  }

  fn new_data_name(&mut self) -> String {
    self.names += 1;
    format!("v_{}", self.names)
  }

  /// Pool a real literal and return its data name.
  fn real_data(&mut self, value: f64) -> String {
    let name = self.new_data_name();
    self.data.push(DataDef::Quad {
      name: name.clone(),
      value: format!("{value:.6}"),
    });
    name
  }

  fn push_loop(&mut self, cont: String, brk: String) {
    self.loops.push((cont, brk));
  }

  fn pop_loop(&mut self) {
    self.loops.pop();
  }

  /// `break`/`continue` outside any loop emit nothing.
  fn continue_label(&self) -> Option<String> {
    self.loops.last().map(|(c, _)| c.clone())
  }

  fn break_label(&self) -> Option<String> {
    self.loops.last().map(|(_, b)| b.clone())
  }
}

impl fmt::Display for AsmCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("global main\nextern printf\n\nsection .text\n")?;
    for line in &self.lines {
      match line {
        Line::Label(name) => writeln!(f, "{name}:")?,
        Line::Cmd(op, operands) => {
          write!(f, "\t{op}")?;
          for (i, operand) in operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            // push takes an explicit operand size on memory
            if *op == Op::Push && matches!(operand, Operand::Mem(..) | Operand::MemName(..)) {
              write!(f, "{sep}qword {operand}")?;
            } else {
              write!(f, "{sep}{operand}")?;
            }
          }
          writeln!(f)?;
        }
      }
    }
    f.write_str("\tmov rsp, rbp\n\tpop rbp\n\txor rax, rax\n\tret\n")?;
    f.write_str("\nsection .data\n")?;
    for def in &self.data {
      match def {
        DataDef::Quad { name, value } => writeln!(f, "\t{name}: dq {value}")?,
        DataDef::Bytes { name, value } => writeln!(f, "\t{name}: db {value}, 0")?,
        DataDef::Zeroed { name, size } => writeln!(f, "\t{name}: times {size} db 0")?,
      }
    }
    Ok(())
  }
}

/// NASM rendering of a string literal's bytes.
fn string_bytes(value: &str) -> String {
  if value.is_empty() {
    return "0".into();
  }
  if value.chars().all(|c| c != '"' && (' '..='~').contains(&c)) {
    return format!("\"{value}\"");
  }
  value
    .bytes()
    .map(|b| b.to_string())
    .collect::<Vec<_>>()
    .join(", ")
}

pub fn generate(program: &Program) -> String {
  let mut generator = Generator {
    program,
    asm: AsmCode::new(),
    routine_labels: HashMap::new(),
  };
  generator.assign_routine_labels();
  generator.run();
  generator.asm.to_string()
}

struct Generator<'a> {
  program: &'a Program,
  asm: AsmCode,
  routine_labels: HashMap<usize, String>,
}

impl<'a> Generator<'a> {
  fn symbols(&self) -> &'a Symbols {
    &self.program.symbols
  }

  fn run(&mut self) {
    let program = self.program;
    self.declare_globals();
    for routine in &program.routines {
      self.emit_routine(routine);
    }
    self.asm.label("main");
    self.asm.cmd1(Op::Push, r(Reg::Rbp));
    self.asm.cmd2(Op::Mov, r(Reg::Rbp), r(Reg::Rsp));
    self.emit_statement(&program.block);
  }

  fn declare_globals(&mut self) {
    let symbols = self.symbols();
    for &id in &symbols.scope(symbols.global()).entries {
      let sym = symbols.symbol(id);
      let SymbolKind::GlobalVar { ty, init } = &sym.kind else {
        continue;
      };
      let name = format!("v_{}", sym.name);
      let size = symbols.storage_size(*ty);
      let def = match (symbols.kind_of(*ty), init) {
        (TypeKind::Real, init) => DataDef::Quad {
          name,
          value: format!("{:.6}", (*init).map(ConstValue::as_real).unwrap_or(0.0)),
        },
        (_, Some(ConstValue::Integer(v))) => DataDef::Quad {
          name,
          value: v.to_string(),
        },
        _ if size <= 8 => DataDef::Quad {
          name,
          value: "0".into(),
        },
        _ => DataDef::Zeroed { name, size },
      };
      self.asm.data.push(def);
    }
  }

  /// One unique label per routine, `f_<name>_<depth>`. Same-named routines
  /// at equal depth under different parents get a numeric suffix so the
  /// assembler never sees a duplicate definition.
  fn assign_routine_labels(&mut self) {
    let symbols = self.symbols();
    let program = self.program;
    for routine in &program.routines {
      let sym = symbols.symbol(routine.symbol);
      let depth = match sym.kind {
        SymbolKind::Func { depth, .. } | SymbolKind::Proc { depth, .. } => depth,
        _ => 0,
      };
      let base = format!("f_{}_{depth}", sym.name);
      let mut label = base.clone();
      let mut n = 0;
      while self.routine_labels.values().any(|taken| *taken == label) {
        n += 1;
        label = format!("{base}_{n}");
      }
      self.routine_labels.insert(routine.symbol.0, label);
    }
  }

  fn routine_label(&self, id: SymbolId) -> String {
    self
      .routine_labels
      .get(&id.0)
      .cloned()
      .unwrap_or_else(|| format!("f_{}_0", self.symbols().symbol(id).name))
  }

  fn emit_routine(&mut self, routine: &'a Routine) {
    let symbols = self.symbols();
    let locals = match symbols.symbol(routine.symbol).kind {
      SymbolKind::Func { locals, .. } | SymbolKind::Proc { locals, .. } => locals,
      _ => return,
    };
    let label = self.routine_label(routine.symbol);
    self.asm.label(&label);
    self.asm.cmd1(Op::Push, r(Reg::Rbp));
    self.asm.cmd2(Op::Mov, r(Reg::Rbp), r(Reg::Rsp));
    let frame = symbols.scope(locals).size;
    if frame > 0 {
      self.asm.cmd2(Op::Sub, r(Reg::Rsp), imm(frame as i64));
    }
    self.emit_statement(&routine.body);
    self.asm.cmd2(Op::Mov, r(Reg::Rsp), r(Reg::Rbp));
    self.asm.cmd1(Op::Pop, r(Reg::Rbp));
    self.asm.cmd0(Op::Ret);
  }

  // ---- expression helpers ----

  fn node_ty(&self, node: &AstNode) -> Option<SymbolId> {
    expr_type(self.symbols(), node)
  }

  fn node_kind(&self, node: &AstNode) -> TypeKind {
    self
      .node_ty(node)
      .map(|t| self.symbols().kind_of(t))
      .unwrap_or(TypeKind::None)
  }

  fn node_size(&self, node: &AstNode) -> usize {
    self
      .node_ty(node)
      .map(|t| self.symbols().storage_size(t))
      .unwrap_or(8)
  }

  /// Push the lowest-byte address of an lvalue.
  fn emit_address(&mut self, node: &AstNode) {
    let symbols = self.symbols();
    match node {
      AstNode::Identifier { symbol, .. } => {
        let sym = symbols.symbol(*symbol);
        match sym.kind {
          SymbolKind::GlobalVar { .. } => {
            self
              .asm
              .cmd2(Op::Mov, r(Reg::Rax), name(format!("v_{}", sym.name)));
          }
          SymbolKind::LocalVar { ty, offset } => {
            let size = symbols.storage_size(ty);
            let disp = -((offset + size) as i64);
            self.asm.cmd2(Op::Lea, r(Reg::Rax), mem(Reg::Rbp, disp));
          }
          SymbolKind::Param { ty, offset } | SymbolKind::FuncResult { ty, offset } => {
            let size = symbols.storage_size(ty);
            let disp = 16 + offset as i64 - size as i64;
            self.asm.cmd2(Op::Lea, r(Reg::Rax), mem(Reg::Rbp, disp));
          }
          SymbolKind::VarParam { offset, .. } => {
            // the slot holds the forwarded address
            let disp = 16 + offset as i64 - 8;
            self.asm.cmd2(Op::Mov, r(Reg::Rax), mem(Reg::Rbp, disp));
          }
          _ => return,
        }
        self.asm.cmd1(Op::Push, r(Reg::Rax));
      }
      AstNode::RecordField { record, field, .. } => {
        self.emit_address(record);
        let offset = match symbols.symbol(*field).kind {
          SymbolKind::LocalVar { offset, .. } => offset as i64,
          _ => 0,
        };
        if offset != 0 {
          self.asm.cmd1(Op::Pop, r(Reg::Rax));
          self.asm.cmd2(Op::Add, r(Reg::Rax), imm(offset));
          self.asm.cmd1(Op::Push, r(Reg::Rax));
        }
      }
      AstNode::ArrayIndex { base, args, .. } => {
        self.emit_address(base);
        let mut level = match self.node_ty(base) {
          Some(ty) => ty,
          None => return,
        };
        for arg in args {
          let Some((elem, low)) = symbols.array_level(level) else {
            return;
          };
          let elem_size = symbols.storage_size(elem) as i64;
          self.emit_value(arg);
          self.asm.cmd1(Op::Pop, r(Reg::Rbx));
          if low != 0 {
            self.asm.cmd2(Op::Sub, r(Reg::Rbx), imm(low));
          }
          if elem_size != 1 {
            self.asm.cmd2(Op::Imul, r(Reg::Rbx), imm(elem_size));
          }
          self.asm.cmd1(Op::Pop, r(Reg::Rax));
          self.asm.cmd2(Op::Add, r(Reg::Rax), r(Reg::Rbx));
          self.asm.cmd1(Op::Push, r(Reg::Rax));
          level = elem;
        }
      }
      _ => {}
    }
  }

  /// Load an lvalue's value through its address: one word for scalars, a
  /// word-by-word block push for aggregates (lowest word ends up on top).
  fn emit_load(&mut self, node: &AstNode) {
    let size = self.node_size(node);
    self.emit_address(node);
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    if size <= 8 {
      self.asm.cmd2(Op::Mov, r(Reg::Rax), mem(Reg::Rax, 0));
      self.asm.cmd1(Op::Push, r(Reg::Rax));
      return;
    }
    // walk down from one past the highest byte
    self.asm.cmd2(Op::Add, r(Reg::Rax), imm(size as i64));
    self.asm.cmd2(Op::Mov, r(Reg::Rbx), imm(size as i64));
    let top = self.asm.new_label();
    self.asm.label(&top);
    self.asm.cmd2(Op::Sub, r(Reg::Rax), imm(8));
    self.asm.cmd1(Op::Push, mem(Reg::Rax, 0));
    self.asm.cmd2(Op::Sub, r(Reg::Rbx), imm(8));
    self.asm.cmd1(Op::Jnz, name(top));
  }

  fn emit_value(&mut self, node: &AstNode) {
    let symbols = self.symbols();
    match node {
      AstNode::IntLiteral { value } => {
        self.asm.cmd2(Op::Mov, r(Reg::Rax), imm(*value));
        self.asm.cmd1(Op::Push, r(Reg::Rax));
      }
      AstNode::RealLiteral { value } => {
        let data = self.asm.real_data(*value);
        self.asm.cmd2(Op::Mov, r(Reg::Rax), Operand::MemName(data));
        self.asm.cmd1(Op::Push, r(Reg::Rax));
      }
      AstNode::Identifier { symbol, .. } => match symbols.symbol(*symbol).kind {
        SymbolKind::IntConst { value } => {
          self.asm.cmd2(Op::Mov, r(Reg::Rax), imm(value));
          self.asm.cmd1(Op::Push, r(Reg::Rax));
        }
        SymbolKind::RealConst { value } => {
          let data = self.asm.real_data(value);
          self.asm.cmd2(Op::Mov, r(Reg::Rax), Operand::MemName(data));
          self.asm.cmd1(Op::Push, r(Reg::Rax));
        }
        _ => self.emit_load(node),
      },
      AstNode::RecordField { .. } | AstNode::ArrayIndex { .. } => self.emit_load(node),
      AstNode::Unary { op, operand, .. } => {
        self.emit_value(operand);
        let kind = self.node_kind(operand);
        match op {
          TokenKind::Sub => {
            self.asm.cmd1(Op::Pop, r(Reg::Rax));
            if kind == TypeKind::Real {
              // flip the IEEE sign bit
              self
                .asm
                .cmd2(Op::Mov, r(Reg::Rbx), name("0x8000000000000000"));
              self.asm.cmd2(Op::Xor, r(Reg::Rax), r(Reg::Rbx));
            } else {
              self.asm.cmd1(Op::Neg, r(Reg::Rax));
            }
            self.asm.cmd1(Op::Push, r(Reg::Rax));
          }
          TokenKind::Not => {
            self.asm.cmd1(Op::Pop, r(Reg::Rax));
            self.asm.cmd2(Op::Xor, r(Reg::Rax), imm(1));
            self.asm.cmd1(Op::Push, r(Reg::Rax));
          }
          _ => {}
        }
      }
      AstNode::Binary {
        op, left, right, ..
      } => self.emit_binary(*op, left, right),
      AstNode::Call { routine, args, .. } => self.emit_call(*routine, args, true),
      _ => {}
    }
  }

  fn emit_binary(&mut self, op: TokenKind, left: &AstNode, right: &AstNode) {
    let left_kind = self.node_kind(left);
    let right_kind = self.node_kind(right);
    let unified = ty::try_cast(left_kind, right_kind).unwrap_or(TypeKind::Integer);
    self.emit_value(left);
    self.emit_value(right);
    match unified {
      TypeKind::Real => self.emit_real_binary(op, left_kind, right_kind),
      TypeKind::Boolean => self.emit_boolean_binary(op),
      _ => self.emit_integer_binary(op),
    }
  }

  /// Materialize a flag as 0/1 through a compare-branch-set pair of labels.
  fn emit_flag(&mut self, jcc: Op) {
    let ltrue = self.asm.new_label();
    let lend = self.asm.new_label();
    self.asm.cmd1(jcc, name(ltrue.clone()));
    self.asm.cmd2(Op::Mov, r(Reg::Rax), imm(0));
    self.asm.cmd1(Op::Jmp, name(lend.clone()));
    self.asm.label(&ltrue);
    self.asm.cmd2(Op::Mov, r(Reg::Rax), imm(1));
    self.asm.label(&lend);
    self.asm.cmd1(Op::Push, r(Reg::Rax));
  }

  fn emit_real_binary(&mut self, op: TokenKind, left_kind: TypeKind, right_kind: TypeKind) {
    // right into xmm1, left into xmm0, widening integers on the way
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    if right_kind == TypeKind::Integer {
      self.asm.cmd2(Op::Cvtsi2sd, r(Reg::Xmm1), r(Reg::Rax));
    } else {
      self.asm.cmd2(Op::Movq, r(Reg::Xmm1), r(Reg::Rax));
    }
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    if left_kind == TypeKind::Integer {
      self.asm.cmd2(Op::Cvtsi2sd, r(Reg::Xmm0), r(Reg::Rax));
    } else {
      self.asm.cmd2(Op::Movq, r(Reg::Xmm0), r(Reg::Rax));
    }

    let arith = match op {
      TokenKind::Add => Some(Op::Addsd),
      TokenKind::Sub => Some(Op::Subsd),
      TokenKind::Mul => Some(Op::Mulsd),
      TokenKind::DivReal => Some(Op::Divsd),
      _ => None,
    };
    if let Some(arith) = arith {
      self.asm.cmd2(arith, r(Reg::Xmm0), r(Reg::Xmm1));
      self.asm.cmd2(Op::Movq, r(Reg::Rax), r(Reg::Xmm0));
      self.asm.cmd1(Op::Push, r(Reg::Rax));
      return;
    }

    self.asm.cmd2(Op::Comisd, r(Reg::Xmm0), r(Reg::Xmm1));
    let jcc = match op {
      TokenKind::Equal => Op::Je,
      TokenKind::NotEqual => Op::Jne,
      TokenKind::Less => Op::Jb,
      TokenKind::LessEqual => Op::Jbe,
      TokenKind::Greater => Op::Ja,
      _ => Op::Jae,
    };
    self.emit_flag(jcc);
  }

  fn emit_integer_binary(&mut self, op: TokenKind) {
    self.asm.cmd1(Op::Pop, r(Reg::Rbx));
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    match op {
      TokenKind::Add => self.asm.cmd2(Op::Add, r(Reg::Rax), r(Reg::Rbx)),
      TokenKind::Sub => self.asm.cmd2(Op::Sub, r(Reg::Rax), r(Reg::Rbx)),
      TokenKind::Mul => self.asm.cmd2(Op::Imul, r(Reg::Rax), r(Reg::Rbx)),
      TokenKind::Div => {
        self.asm.cmd2(Op::Xor, r(Reg::Rdx), r(Reg::Rdx));
        self.asm.cmd1(Op::Idiv, r(Reg::Rbx));
      }
      TokenKind::Mod => {
        self.asm.cmd2(Op::Xor, r(Reg::Rdx), r(Reg::Rdx));
        self.asm.cmd1(Op::Idiv, r(Reg::Rbx));
        self.asm.cmd2(Op::Mov, r(Reg::Rax), r(Reg::Rdx));
      }
      TokenKind::DivReal => {
        self.asm.cmd2(Op::Cvtsi2sd, r(Reg::Xmm0), r(Reg::Rax));
        self.asm.cmd2(Op::Cvtsi2sd, r(Reg::Xmm1), r(Reg::Rbx));
        self.asm.cmd2(Op::Divsd, r(Reg::Xmm0), r(Reg::Xmm1));
        self.asm.cmd2(Op::Movq, r(Reg::Rax), r(Reg::Xmm0));
      }
      TokenKind::And => self.asm.cmd2(Op::And, r(Reg::Rax), r(Reg::Rbx)),
      TokenKind::Or => self.asm.cmd2(Op::Or, r(Reg::Rax), r(Reg::Rbx)),
      TokenKind::Xor => self.asm.cmd2(Op::Xor, r(Reg::Rax), r(Reg::Rbx)),
      TokenKind::Shl => {
        self.asm.cmd2(Op::Mov, r(Reg::Rcx), r(Reg::Rbx));
        self.asm.cmd2(Op::Sal, r(Reg::Rax), r(Reg::Cl));
      }
      TokenKind::Shr => {
        self.asm.cmd2(Op::Mov, r(Reg::Rcx), r(Reg::Rbx));
        self.asm.cmd2(Op::Shr, r(Reg::Rax), r(Reg::Cl));
      }
      TokenKind::Equal
      | TokenKind::NotEqual
      | TokenKind::Less
      | TokenKind::LessEqual
      | TokenKind::Greater
      | TokenKind::GreaterEqual => {
        self.asm.cmd2(Op::Cmp, r(Reg::Rax), r(Reg::Rbx));
        let jcc = match op {
          TokenKind::Equal => Op::Je,
          TokenKind::NotEqual => Op::Jne,
          TokenKind::Less => Op::Jl,
          TokenKind::LessEqual => Op::Jle,
          TokenKind::Greater => Op::Jg,
          _ => Op::Jge,
        };
        self.emit_flag(jcc);
        return;
      }
      _ => {}
    }
    self.asm.cmd1(Op::Push, r(Reg::Rax));
  }

  /// Clamp a register to 0/1 so bitwise and/or/xor act as logic.
  fn normalize_truth(&mut self, reg: Reg) {
    let skip = self.asm.new_label();
    self.asm.cmd2(Op::Test, r(reg), r(reg));
    self.asm.cmd1(Op::Jz, name(skip.clone()));
    self.asm.cmd2(Op::Mov, r(reg), imm(1));
    self.asm.label(&skip);
  }

  fn emit_boolean_binary(&mut self, op: TokenKind) {
    self.asm.cmd1(Op::Pop, r(Reg::Rbx));
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    self.normalize_truth(Reg::Rax);
    self.normalize_truth(Reg::Rbx);
    let logic = match op {
      TokenKind::And => Op::And,
      TokenKind::Or => Op::Or,
      _ => Op::Xor,
    };
    self.asm.cmd2(logic, r(Reg::Rax), r(Reg::Rbx));
    self.asm.cmd1(Op::Push, r(Reg::Rax));
  }

  /// Reserve the result slot, push arguments in declaration order, call,
  /// then drop the explicit arguments; the result (if kept) stays pushed.
  fn emit_call(&mut self, routine: SymbolId, args: &[AstNode], keep_result: bool) {
    let symbols = self.symbols();
    let (arg_scope, is_func) = match symbols.symbol(routine).kind {
      SymbolKind::Func { args, .. } => (args, true),
      SymbolKind::Proc { args, .. } => (args, false),
      _ => return,
    };
    let mut params: Vec<SymbolId> = symbols.scope(arg_scope).entries.clone();
    let mut result_size = 0i64;
    if is_func {
      let result = params.remove(0);
      if let SymbolKind::FuncResult { ty, .. } = symbols.symbol(result).kind {
        result_size = symbols.storage_size(ty) as i64;
      }
      self.asm.cmd2(Op::Sub, r(Reg::Rsp), imm(result_size));
    }

    let mut explicit_bytes = 0i64;
    for (arg, &param) in args.iter().zip(&params) {
      match symbols.symbol(param).kind {
        SymbolKind::VarParam { .. } => {
          self.emit_address(arg);
          explicit_bytes += 8;
        }
        SymbolKind::Param { ty, .. } => {
          self.emit_value(arg);
          if symbols.kind_of(ty) == TypeKind::Real && self.node_kind(arg) == TypeKind::Integer {
            self.asm.cmd1(Op::Pop, r(Reg::Rax));
            self.asm.cmd2(Op::Cvtsi2sd, r(Reg::Xmm0), r(Reg::Rax));
            self.asm.cmd2(Op::Movq, r(Reg::Rax), r(Reg::Xmm0));
            self.asm.cmd1(Op::Push, r(Reg::Rax));
          }
          explicit_bytes += symbols.storage_size(ty) as i64;
        }
        _ => {}
      }
    }

    let label = self.routine_label(routine);
    self.asm.cmd1(Op::Call, name(label));
    if explicit_bytes > 0 {
      self.asm.cmd2(Op::Add, r(Reg::Rsp), imm(explicit_bytes));
    }
    if is_func && !keep_result {
      self.asm.cmd2(Op::Add, r(Reg::Rsp), imm(result_size));
    }
  }

  // ---- statements ----

  fn emit_statement(&mut self, node: &'a AstNode) {
    match node {
      AstNode::Block { statements, .. } => {
        for statement in statements {
          self.emit_statement(statement);
        }
      }
      AstNode::Assignment { target, value } => self.emit_assignment(target, value),
      AstNode::If { cond, then, els } => {
        self.emit_value(cond);
        self.asm.cmd1(Op::Pop, r(Reg::Rax));
        self.asm.cmd2(Op::Test, r(Reg::Rax), r(Reg::Rax));
        let lelse = self.asm.new_label();
        self.asm.cmd1(Op::Jz, name(lelse.clone()));
        self.emit_statement(then);
        match els {
          Some(els) => {
            let lend = self.asm.new_label();
            self.asm.cmd1(Op::Jmp, name(lend.clone()));
            self.asm.label(&lelse);
            self.emit_statement(els);
            self.asm.label(&lend);
          }
          None => self.asm.label(&lelse),
        }
      }
      AstNode::While { cond, body } => {
        let lcond = self.asm.new_label();
        let lbody = self.asm.new_label();
        let lend = self.asm.new_label();
        self.asm.cmd1(Op::Jmp, name(lcond.clone()));
        self.asm.label(&lbody);
        self.asm.push_loop(lcond.clone(), lend.clone());
        self.emit_statement(body);
        self.asm.pop_loop();
        self.asm.label(&lcond);
        self.emit_value(cond);
        self.asm.cmd1(Op::Pop, r(Reg::Rax));
        self.asm.cmd2(Op::Test, r(Reg::Rax), r(Reg::Rax));
        self.asm.cmd1(Op::Jnz, name(lbody));
        self.asm.label(&lend);
      }
      AstNode::For {
        var,
        var_name,
        is_to,
        init,
        limit,
        body,
      } => {
        let counter = AstNode::Identifier {
          name: var_name.clone(),
          symbol: *var,
        };
        self.emit_value(init);
        self.store_scalar(&counter);

        let lcond = self.asm.new_label();
        let lbody = self.asm.new_label();
        let lcont = self.asm.new_label();
        let lend = self.asm.new_label();
        self.asm.cmd1(Op::Jmp, name(lcond.clone()));
        self.asm.label(&lbody);
        self.asm.push_loop(lcont.clone(), lend.clone());
        self.emit_statement(body);
        self.asm.pop_loop();

        self.asm.label(&lcont);
        self.emit_value(&counter);
        self.asm.cmd1(Op::Pop, r(Reg::Rax));
        let step = if *is_to { Op::Add } else { Op::Sub };
        self.asm.cmd2(step, r(Reg::Rax), imm(1));
        self.asm.cmd1(Op::Push, r(Reg::Rax));
        self.store_scalar(&counter);

        self.asm.label(&lcond);
        self.emit_value(&counter);
        self.emit_value(limit);
        self.asm.cmd1(Op::Pop, r(Reg::Rbx));
        self.asm.cmd1(Op::Pop, r(Reg::Rax));
        self.asm.cmd2(Op::Cmp, r(Reg::Rax), r(Reg::Rbx));
        let back = if *is_to { Op::Jle } else { Op::Jge };
        self.asm.cmd1(back, name(lbody));
        self.asm.label(&lend);
      }
      AstNode::Repeat { body, cond } => {
        let lbody = self.asm.new_label();
        let lcont = self.asm.new_label();
        let lend = self.asm.new_label();
        self.asm.label(&lbody);
        self.asm.push_loop(lcont.clone(), lend.clone());
        self.emit_statement(body);
        self.asm.pop_loop();
        self.asm.label(&lcont);
        self.emit_value(cond);
        self.asm.cmd1(Op::Pop, r(Reg::Rax));
        self.asm.cmd2(Op::Test, r(Reg::Rax), r(Reg::Rax));
        self.asm.cmd1(Op::Jz, name(lbody));
        self.asm.label(&lend);
      }
      AstNode::Write { newline, args } => {
        for arg in args {
          match arg {
            AstNode::StringLiteral { value } => {
              let data = self.asm.new_data_name();
              self.asm.data.push(DataDef::Bytes {
                name: data.clone(),
                value: string_bytes(value),
              });
              self.asm.cmd2(Op::Xor, r(Reg::Rax), r(Reg::Rax));
              self.printf(&data);
            }
            _ => {
              self.emit_value(arg);
              if self.node_kind(arg) == TypeKind::Real {
                self.write_float();
              } else {
                self.write_int();
              }
            }
          }
        }
        if *newline {
          self.asm.cmd2(Op::Xor, r(Reg::Rax), r(Reg::Rax));
          self.printf("formatNewLine");
        }
      }
      AstNode::Break => {
        if let Some(label) = self.asm.break_label() {
          self.asm.cmd1(Op::Jmp, name(label));
        }
      }
      AstNode::Continue => {
        if let Some(label) = self.asm.continue_label() {
          self.asm.cmd1(Op::Jmp, name(label));
        }
      }
      AstNode::Call { routine, args, .. } => self.emit_call(*routine, args, false),
      _ => {}
    }
  }

  /// Pop the value on the stack into a scalar lvalue.
  fn store_scalar(&mut self, target: &AstNode) {
    self.emit_address(target);
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    self.asm.cmd1(Op::Pop, r(Reg::Rbx));
    self.asm.cmd2(Op::Mov, mem(Reg::Rax, 0), r(Reg::Rbx));
  }

  fn emit_assignment(&mut self, target: &AstNode, value: &AstNode) {
    let size = self.node_size(target);
    if size <= 8 {
      self.emit_value(value);
      if self.node_kind(target) == TypeKind::Real && self.node_kind(value) == TypeKind::Integer {
        self.asm.cmd1(Op::Pop, r(Reg::Rax));
        self.asm.cmd2(Op::Cvtsi2sd, r(Reg::Xmm0), r(Reg::Rax));
        self.asm.cmd2(Op::Movq, r(Reg::Rax), r(Reg::Xmm0));
        self.asm.cmd1(Op::Push, r(Reg::Rax));
      }
      self.store_scalar(target);
      return;
    }

    // aggregate copy: block on the stack, lowest word on top
    self.emit_value(value);
    self.emit_address(target);
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    self.asm.cmd2(Op::Mov, r(Reg::Rbx), imm(size as i64));
    let top = self.asm.new_label();
    self.asm.label(&top);
    self.asm.cmd1(Op::Pop, r(Reg::Rcx));
    self.asm.cmd2(Op::Mov, mem(Reg::Rax, 0), r(Reg::Rcx));
    self.asm.cmd2(Op::Add, r(Reg::Rax), imm(8));
    self.asm.cmd2(Op::Sub, r(Reg::Rbx), imm(8));
    self.asm.cmd1(Op::Jnz, name(top));
  }

  // ---- printf plumbing ----

  fn printf(&mut self, format: &str) {
    self.asm.cmd2(Op::Mov, r(Reg::Rcx), name(format));
    self.asm.cmd2(Op::Sub, r(Reg::Rsp), imm(32));
    self.asm.cmd1(Op::Call, name("printf"));
    self.asm.cmd2(Op::Add, r(Reg::Rsp), imm(32));
  }

  fn write_int(&mut self) {
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    self.asm.cmd2(Op::Mov, r(Reg::Rdx), r(Reg::Rax));
    self.asm.cmd2(Op::Xor, r(Reg::Rax), r(Reg::Rax));
    self.printf("formatInt");
  }

  fn write_float(&mut self) {
    self.asm.cmd1(Op::Pop, r(Reg::Rax));
    self.asm.cmd2(Op::Mov, r(Reg::Rdx), r(Reg::Rax));
    self.asm.cmd2(Op::Movq, r(Reg::Xmm1), r(Reg::Rdx));
    self.asm.cmd2(Op::Mov, r(Reg::Rax), imm(1));
    self.printf("formatFloat");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse_program;

  fn compile(source: &str) -> String {
    let program = parse_program(source).expect("parses");
    generate(&program)
  }

  #[test]
  fn module_skeleton_and_main_prologue() {
    let asm = compile("begin end.");
    assert!(asm.starts_with("global main\nextern printf\n"));
    assert!(asm.contains("section .text"));
    assert!(asm.contains("main:\n\tpush rbp\n\tmov rbp, rsp\n"));
    assert!(asm.contains("\tmov rsp, rbp\n\tpop rbp\n\txor rax, rax\n\tret\n"));
    assert!(asm.contains("formatInt: db \"%ld\", 0"));
    assert!(asm.contains("formatNewLine: db 10, 0"));
  }

  #[test]
  fn globals_land_in_the_data_section() {
    let asm = compile("var x: integer = 5;\nvar y: float;\nbegin end.");
    assert!(asm.contains("v_x: dq 5"));
    assert!(asm.contains("v_y: dq 0.000000"));
  }

  #[test]
  fn aggregate_globals_are_zeroed_byte_runs() {
    let asm = compile("var a: array [1..4] of integer;\nbegin end.");
    assert!(asm.contains("v_a: times 32 db 0"));
  }

  #[test]
  fn global_scalar_assignment_stores_through_the_name() {
    let asm = compile("var x: integer;\nbegin x := 41 + 1; end.");
    assert!(asm.contains("mov rax, v_x"));
    assert!(asm.contains("\tadd rax, rbx\n"));
    assert!(asm.contains("mov [rax], rbx"));
  }

  #[test]
  fn local_scalars_address_their_lowest_byte() {
    let source = "\
procedure p;
var n: integer;
begin
  n := n + 1;
end;
begin
  p;
end.";
    let asm = compile(source);
    assert!(asm.contains("f_p_1:"));
    assert!(asm.contains("sub rsp, 8"));
    assert!(asm.contains("lea rax, [rbp - 8]"));
    assert!(asm.contains("mov rax, [rax]"));
    assert!(asm.contains("mov [rax], rbx"));
  }

  #[test]
  fn integer_division_clears_rdx_first() {
    let asm = compile("var x: integer;\nbegin x := 7 div 2; end.");
    assert!(asm.contains("\txor rdx, rdx\n\tidiv rbx\n"));
    let asm = compile("var x: integer;\nbegin x := 7 mod 2; end.");
    assert!(asm.contains("\tidiv rbx\n\tmov rax, rdx\n"));
  }

  #[test]
  fn real_division_of_integers_widens_both_sides() {
    let asm = compile("var x: float;\nbegin x := 7 / 2; end.");
    assert!(asm.contains("cvtsi2sd xmm0, rax"));
    assert!(asm.contains("cvtsi2sd xmm1, rbx"));
    assert!(asm.contains("divsd xmm0, xmm1"));
  }

  #[test]
  fn real_comparison_uses_unsigned_flags() {
    let asm = compile("var b: boolean;\nbegin b := 1.5 > 0.5; end.");
    assert!(asm.contains("comisd xmm0, xmm1"));
    assert!(asm.contains("\tja L"));
  }

  #[test]
  fn calls_reserve_the_result_and_drop_the_arguments() {
    let source = "\
function add(a, b: integer): integer;
begin
  result := a + b;
end;
var x: integer;
begin
  x := add(1, 2);
end.";
    let asm = compile(source);
    assert!(asm.contains("f_add_1:"));
    assert!(asm.contains("\tsub rsp, 8\n"));
    assert!(asm.contains("call f_add_1"));
    assert!(asm.contains("\tadd rsp, 16\n"));
  }

  #[test]
  fn discarded_function_results_are_popped() {
    let source = "\
function one: integer;
begin
  result := 1;
end;
begin
  one;
end.";
    let asm = compile(source);
    let after_call = asm.split("call f_one_1").nth(1).expect("call emitted");
    assert!(after_call.starts_with("\n\tadd rsp, 8"));
  }

  #[test]
  fn while_tests_the_condition_after_the_jump() {
    let asm = compile("var n: integer;\nbegin while n > 0 do n := n - 1; end.");
    let jmp = asm.find("\tjmp L").expect("forward jump");
    let test = asm.find("\ttest rax, rax").expect("condition test");
    assert!(jmp < test);
    assert!(asm.contains("\tjnz L"));
  }

  #[test]
  fn for_loop_steps_and_compares_the_counter() {
    let asm = compile("var i: integer;\nbegin for i := 1 to 3 do i := i; end.");
    assert!(asm.contains("\tadd rax, 1\n"));
    assert!(asm.contains("\tjle L"));
    let down = compile("var i: integer;\nbegin for i := 3 downto 1 do i := i; end.");
    assert!(down.contains("\tsub rax, 1\n"));
    assert!(down.contains("\tjge L"));
  }

  #[test]
  fn writeln_prints_values_then_the_newline_format() {
    let asm = compile("begin writeln(1, 'hi'); end.");
    assert!(asm.contains("mov rcx, formatInt"));
    assert!(asm.contains("v_1: db \"hi\", 0"));
    assert!(asm.contains("mov rcx, formatNewLine"));
    assert!(asm.contains("\tsub rsp, 32\n\tcall printf\n\tadd rsp, 32\n"));
  }

  #[test]
  fn real_literals_are_pooled_in_data() {
    let asm = compile("var x: float;\nbegin x := 2.5; end.");
    assert!(asm.contains("v_1: dq 2.500000"));
    assert!(asm.contains("mov rax, [v_1]"));
  }

  #[test]
  fn break_jumps_to_the_loop_end_and_is_silent_outside() {
    let asm = compile("var n: integer;\nbegin while n > 0 do break; end.");
    assert!(asm.contains("\tjmp L"));
    // outside a loop the statement emits nothing
    let bare = compile("begin break; end.");
    assert!(bare.contains("main:"));
  }

  #[test]
  fn array_indexing_scales_by_element_size() {
    let source = "var a: array [1..5] of integer;\nvar x: integer;\nbegin x := a[3]; end.";
    let asm = compile(source);
    assert!(asm.contains("mov rax, v_a"));
    assert!(asm.contains("\tsub rbx, 1\n"));
    assert!(asm.contains("\timul rbx, 8\n"));
    assert!(asm.contains("\tadd rax, rbx\n"));
  }

  #[test]
  fn record_copies_move_word_blocks() {
    let source = "\
type point = record x, y: integer end;
var a, b: point;
begin
  a := b;
end.";
    let asm = compile(source);
    assert!(asm.contains("push qword [rax]"));
    assert!(asm.contains("\tmov rbx, 16\n"));
  }

  #[test]
  fn var_parameters_pass_the_address() {
    let source = "\
procedure bump(var n: integer);
begin
  n := n + 1;
end;
var x: integer;
begin
  bump(x);
end.";
    let asm = compile(source);
    // callee loads the forwarded pointer, caller passes the global's address
    assert!(asm.contains("mov rax, [rbp + 16]"));
    assert!(asm.contains("mov rax, v_x"));
  }

  #[test]
  fn record_fields_line_up_across_storage_classes() {
    let source = "\
type point = record x, y: integer end;
var g: point;
procedure p;
var l: point;
begin
  l := g;
  l.y := g.y;
end;
begin
  p;
end.";
    let asm = compile(source);
    // both localities reach field y by the same ascending offset
    assert!(asm.contains("\tlea rax, [rbp - 16]\n\tpush rax\n\tpop rax\n\tadd rax, 8\n"));
    assert!(asm.contains("\tmov rax, v_g\n\tpush rax\n\tpop rax\n\tadd rax, 8\n"));
    // the block copy lands word for word on the local's lowest byte
    assert!(asm.contains("\tpop rcx\n\tmov [rax], rcx\n\tadd rax, 8\n"));
  }

  #[test]
  fn sub_word_locals_get_full_slots() {
    let source = "\
procedure p;
var c: char;
    n: integer;
begin
  c := c;
  n := 1;
end;
begin
  p;
end.";
    let asm = compile(source);
    assert!(asm.contains("sub rsp, 16"));
    assert!(asm.contains("lea rax, [rbp - 8]"));
    assert!(asm.contains("lea rax, [rbp - 16]"));

    let copy = compile("var s, t: array [1..9] of char;\nbegin s := t; end.");
    assert!(copy.contains("v_s: times 72 db 0"));
    assert!(copy.contains("\tmov rbx, 72\n"));
  }

  #[test]
  fn same_named_nested_routines_get_distinct_labels() {
    let source = "\
procedure a;
  procedure helper;
  begin
  end;
begin
  helper;
end;
procedure b;
  procedure helper;
  begin
  end;
begin
  helper;
end;
begin
  a;
  b;
end.";
    let asm = compile(source);
    assert!(asm.contains("f_helper_2:"));
    assert!(asm.contains("f_helper_2_1:"));
    assert!(asm.contains("call f_helper_2\n"));
    assert!(asm.contains("call f_helper_2_1\n"));
  }
}
