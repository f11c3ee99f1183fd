//! Symbol tables: one arena of symbols, one arena of scopes.
//!
//! Scopes and symbols are addressed by index newtypes into flat vectors, so
//! the whole table is a plain owned value with no reference cycles. A scope
//! keeps its symbols in declaration order (offsets and dumps depend on it)
//! next to a name map for lookup. The scope stack is what the parser pushes
//! and pops as it enters argument and local scopes.

use std::collections::HashMap;

use crate::consts::ConstValue;
use crate::error::{CompileError, CompileResult, Pos};
use crate::ty::TypeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(pub usize);

/// What a name denotes. Storage-bearing variants carry the byte offset
/// assigned at insertion; type variants describe the type structure.
#[derive(Debug, Clone)]
pub enum SymbolKind {
  TypeInteger,
  TypeReal,
  TypeChar,
  TypeBoolean,
  TypeAlias {
    target: SymbolId,
  },
  TypeRecord {
    fields: ScopeId,
  },
  TypeArray {
    elem: SymbolId,
    low: i64,
    high: i64,
  },
  TypeOpenArray {
    elem: SymbolId,
  },
  TypeSubrange {
    low: i64,
    high: i64,
  },
  TypePointer {
    target: SymbolId,
  },
  GlobalVar {
    ty: SymbolId,
    init: Option<ConstValue>,
  },
  LocalVar {
    ty: SymbolId,
    offset: usize,
  },
  Param {
    ty: SymbolId,
    offset: usize,
  },
  VarParam {
    ty: SymbolId,
    offset: usize,
  },
  FuncResult {
    ty: SymbolId,
    offset: usize,
  },
  IntConst {
    value: i64,
  },
  RealConst {
    value: f64,
  },
  Proc {
    args: ScopeId,
    locals: ScopeId,
    depth: usize,
  },
  Func {
    args: ScopeId,
    locals: ScopeId,
    depth: usize,
  },
}

#[derive(Debug, Clone)]
pub struct Symbol {
  pub name: String,
  pub kind: SymbolKind,
}

/// One lexical scope: symbols in declaration order, a name map, and the
/// total byte size of the storage declared in it.
#[derive(Debug, Default)]
pub struct Scope {
  pub entries: Vec<SymbolId>,
  names: HashMap<String, SymbolId>,
  pub size: usize,
}

/// Ids of the builtin types seeded into the global scope.
#[derive(Debug, Clone, Copy)]
pub struct Builtins {
  pub integer: SymbolId,
  pub real: SymbolId,
  pub char: SymbolId,
  pub boolean: SymbolId,
}

#[derive(Debug)]
pub struct Symbols {
  symbols: Vec<Symbol>,
  scopes: Vec<Scope>,
  pub builtin: Builtins,
}

pub const POINTER_SIZE: usize = 8;

impl Symbols {
  /// A fresh table with the global scope holding the builtin types.
  pub fn new() -> Self {
    let mut table = Self {
      symbols: Vec::new(),
      scopes: vec![Scope::default()],
      builtin: Builtins {
        integer: SymbolId(0),
        real: SymbolId(0),
        char: SymbolId(0),
        boolean: SymbolId(0),
      },
    };
    let global = ScopeId(0);
    let pos = Pos::default();
    // seeding the empty global scope cannot collide
    if let (Ok(integer), Ok(real), Ok(char_id), Ok(boolean)) = (
      table.insert(global, "integer", SymbolKind::TypeInteger, pos),
      table.insert(global, "float", SymbolKind::TypeReal, pos),
      table.insert(global, "char", SymbolKind::TypeChar, pos),
      table.insert(global, "boolean", SymbolKind::TypeBoolean, pos),
    ) {
      table.builtin = Builtins {
        integer,
        real,
        char: char_id,
        boolean,
      };
    }
    table
  }

  pub fn global(&self) -> ScopeId {
    ScopeId(0)
  }

  pub fn symbol(&self, id: SymbolId) -> &Symbol {
    &self.symbols[id.0]
  }

  pub fn scope(&self, id: ScopeId) -> &Scope {
    &self.scopes[id.0]
  }

  pub fn new_scope(&mut self) -> ScopeId {
    self.scopes.push(Scope::default());
    ScopeId(self.scopes.len() - 1)
  }

  /// An arena symbol that belongs to no scope; anonymous type structure
  /// (records, array chains, subranges) lives here.
  pub fn add_anon(&mut self, kind: SymbolKind) -> SymbolId {
    self.symbols.push(Symbol {
      name: String::new(),
      kind,
    });
    SymbolId(self.symbols.len() - 1)
  }

  /// Insert a named symbol into a scope, assigning its storage offset from
  /// the bytes declared before it. Duplicate names in one scope are fatal.
  pub fn insert(
    &mut self,
    scope: ScopeId,
    name: &str,
    mut kind: SymbolKind,
    pos: Pos,
  ) -> CompileResult<SymbolId> {
    if self.scopes[scope.0].names.contains_key(name) {
      return Err(CompileError::Duplicate {
        pos,
        name: name.to_string(),
      });
    }

    let current = self.scopes[scope.0].size;
    let storage = match &mut kind {
      SymbolKind::LocalVar { ty, offset }
      | SymbolKind::Param { ty, offset }
      | SymbolKind::FuncResult { ty, offset } => {
        *offset = current;
        self.storage_size(*ty)
      }
      SymbolKind::VarParam { offset, .. } => {
        *offset = current;
        POINTER_SIZE
      }
      _ => 0,
    };

    self.symbols.push(Symbol {
      name: name.to_string(),
      kind,
    });
    let id = SymbolId(self.symbols.len() - 1);
    let scope = &mut self.scopes[scope.0];
    scope.entries.push(id);
    scope.names.insert(name.to_string(), id);
    scope.size += storage;
    Ok(id)
  }

  pub fn resolve_in(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
    self.scopes[scope.0].names.get(name).copied()
  }

  /// Flip parameter offsets so the first declared parameter ends up with the
  /// largest displacement; called once after a routine's argument scope is
  /// complete. Matches the caller pushing arguments in declaration order.
  pub fn rebase_params(&mut self, scope: ScopeId) {
    let total = self.scopes[scope.0].size;
    for id in self.scopes[scope.0].entries.clone() {
      match &mut self.symbols[id.0].kind {
        SymbolKind::Param { offset, .. }
        | SymbolKind::VarParam { offset, .. }
        | SymbolKind::FuncResult { offset, .. } => *offset = total - *offset,
        _ => {}
      }
    }
  }

  /// Follow alias links down to the defining type symbol.
  pub fn strip_alias(&self, mut id: SymbolId) -> SymbolId {
    while let SymbolKind::TypeAlias { target } = self.symbols[id.0].kind {
      id = target;
    }
    id
  }

  pub fn is_type(&self, id: SymbolId) -> bool {
    matches!(
      self.symbols[id.0].kind,
      SymbolKind::TypeInteger
        | SymbolKind::TypeReal
        | SymbolKind::TypeChar
        | SymbolKind::TypeBoolean
        | SymbolKind::TypeAlias { .. }
        | SymbolKind::TypeRecord { .. }
        | SymbolKind::TypeArray { .. }
        | SymbolKind::TypeOpenArray { .. }
        | SymbolKind::TypeSubrange { .. }
        | SymbolKind::TypePointer { .. }
    )
  }

  /// Operator-table kind of a type symbol. Subranges behave as integers.
  pub fn kind_of(&self, id: SymbolId) -> TypeKind {
    match &self.symbols[self.strip_alias(id).0].kind {
      SymbolKind::TypeInteger | SymbolKind::TypeSubrange { .. } => TypeKind::Integer,
      SymbolKind::TypeReal => TypeKind::Real,
      SymbolKind::TypeChar => TypeKind::Char,
      SymbolKind::TypeBoolean => TypeKind::Boolean,
      SymbolKind::TypeRecord { .. } => TypeKind::Record,
      SymbolKind::TypeArray { .. } | SymbolKind::TypeOpenArray { .. } => TypeKind::Array,
      SymbolKind::TypePointer { .. } => TypeKind::Pointer,
      _ => TypeKind::None,
    }
  }

  /// The builtin type symbol standing for an operator-result kind.
  pub fn builtin_for(&self, kind: TypeKind) -> SymbolId {
    match kind {
      TypeKind::Real => self.builtin.real,
      TypeKind::Boolean => self.builtin.boolean,
      TypeKind::Char => self.builtin.char,
      _ => self.builtin.integer,
    }
  }

  /// Type denoted by a value-producing symbol: the declared type of storage,
  /// the builtin type of a constant, a type symbol itself (so the lenient
  /// resolution fallback types as integer), `None` for routines.
  pub fn value_type(&self, id: SymbolId) -> Option<SymbolId> {
    match self.symbols[id.0].kind {
      SymbolKind::GlobalVar { ty, .. }
      | SymbolKind::LocalVar { ty, .. }
      | SymbolKind::Param { ty, .. }
      | SymbolKind::VarParam { ty, .. }
      | SymbolKind::FuncResult { ty, .. } => Some(ty),
      SymbolKind::IntConst { .. } => Some(self.builtin.integer),
      SymbolKind::RealConst { .. } => Some(self.builtin.real),
      _ if self.is_type(id) => Some(id),
      _ => None,
    }
  }

  /// Declared byte size of a value of this type. Scalars occupy a full
  /// word except `char`; aggregates are the sum of their parts.
  pub fn size_of(&self, id: SymbolId) -> usize {
    match &self.symbols[self.strip_alias(id).0].kind {
      SymbolKind::TypeChar => 1,
      SymbolKind::TypeRecord { fields } => self.scopes[fields.0].size,
      SymbolKind::TypeArray { elem, low, high } => {
        let count = (high - low + 1).max(0) as usize;
        count * self.size_of(*elem)
      }
      _ => POINTER_SIZE,
    }
  }

  /// Bytes this type occupies in storage. Every scalar gets a full word
  /// (sub-word stores would overlap their neighbours under qword moves),
  /// so array strides and record layouts stay word-granular too.
  pub fn storage_size(&self, id: SymbolId) -> usize {
    match &self.symbols[self.strip_alias(id).0].kind {
      SymbolKind::TypeRecord { fields } => self.scopes[fields.0].size,
      SymbolKind::TypeArray { elem, low, high } => {
        let count = (high - low + 1).max(0) as usize;
        count * self.storage_size(*elem)
      }
      _ => POINTER_SIZE,
    }
  }

  /// Number of index expressions a subscript of this type must supply.
  pub fn dimensions(&self, id: SymbolId) -> usize {
    match self.symbols[self.strip_alias(id).0].kind {
      SymbolKind::TypeArray { elem, .. } => 1 + self.dimensions(elem),
      SymbolKind::TypeOpenArray { elem } => 1 + self.dimensions(elem),
      _ => 0,
    }
  }

  /// Element type and low bound of one array level.
  pub fn array_level(&self, id: SymbolId) -> Option<(SymbolId, i64)> {
    match self.symbols[self.strip_alias(id).0].kind {
      SymbolKind::TypeArray { elem, low, .. } => Some((elem, low)),
      SymbolKind::TypeOpenArray { elem } => Some((elem, 0)),
      _ => None,
    }
  }

  /// Human-readable type name for dumps: the declared name when the type
  /// has one, a structural description otherwise.
  pub fn type_name(&self, id: SymbolId) -> String {
    let sym = &self.symbols[id.0];
    if !sym.name.is_empty() {
      return sym.name.clone();
    }
    match &sym.kind {
      SymbolKind::TypeRecord { .. } => "record".into(),
      SymbolKind::TypeArray { elem, low, high } => {
        format!("array [{low}..{high}] of {}", self.type_name(*elem))
      }
      SymbolKind::TypeOpenArray { elem } => format!("array of {}", self.type_name(*elem)),
      SymbolKind::TypeSubrange { low, high } => format!("{low}..{high}"),
      SymbolKind::TypePointer { target } => format!("^{}", self.type_name(*target)),
      _ => self.kind_of(id).name().into(),
    }
  }

  /// Symbol-table dump (`-s` mode), starting from the global scope.
  pub fn dump(&self) -> String {
    let mut out = String::new();
    self.dump_scope(self.global(), 0, &mut out);
    out
  }

  fn dump_scope(&self, scope: ScopeId, depth: usize, out: &mut String) {
    for &id in &self.scopes[scope.0].entries {
      self.dump_symbol(id, depth, out);
    }
  }

  fn dump_symbol(&self, id: SymbolId, depth: usize, out: &mut String) {
    let sym = &self.symbols[id.0];
    let indent = "    ".repeat(depth);
    let line = match &sym.kind {
      SymbolKind::TypeInteger
      | SymbolKind::TypeReal
      | SymbolKind::TypeChar
      | SymbolKind::TypeBoolean => format!("{indent}{:<15}{}", sym.name, "type"),
      SymbolKind::TypeAlias { target } => format!(
        "{indent}{:<15}{:<15}{}",
        sym.name,
        "type alias",
        self.type_name(*target)
      ),
      SymbolKind::TypeRecord { .. }
      | SymbolKind::TypeArray { .. }
      | SymbolKind::TypeOpenArray { .. }
      | SymbolKind::TypeSubrange { .. }
      | SymbolKind::TypePointer { .. } => {
        format!("{indent}{:<15}{:<15}{}", sym.name, "type", self.type_name(id))
      }
      SymbolKind::GlobalVar { ty, init } => {
        let mut line = format!("{indent}{:<15}{:<15}{}", sym.name, "var", self.type_name(*ty));
        match init {
          Some(ConstValue::Integer(v)) => line.push_str(&format!(" = {v}")),
          Some(ConstValue::Real(v)) => line.push_str(&format!(" = {v:.6}")),
          None => {}
        }
        line
      }
      SymbolKind::LocalVar { ty, .. } => {
        format!("{indent}{:<15}{:<15}{}", sym.name, "var", self.type_name(*ty))
      }
      SymbolKind::Param { ty, .. } => {
        format!("{indent}{:<15}{:<15}{}", sym.name, "param", self.type_name(*ty))
      }
      SymbolKind::VarParam { ty, .. } => format!(
        "{indent}{:<15}{:<15}{}",
        sym.name,
        "var param",
        self.type_name(*ty)
      ),
      SymbolKind::FuncResult { ty, .. } => format!(
        "{indent}{:<15}{:<15}{}",
        sym.name,
        "func result",
        self.type_name(*ty)
      ),
      SymbolKind::IntConst { value } => {
        format!("{indent}{:<15}{:<15}{value}", sym.name, "const integer")
      }
      SymbolKind::RealConst { value } => {
        format!("{indent}{:<15}{:<15}{value:.6}", sym.name, "const float")
      }
      SymbolKind::Proc { args, locals, .. } => {
        let mut line = format!("{indent}{:<15}{}", sym.name, "proc");
        self.dump_routine(*args, *locals, depth, &mut line);
        line
      }
      SymbolKind::Func { args, locals, .. } => {
        let mut line = format!("{indent}{:<15}{}", sym.name, "func");
        self.dump_routine(*args, *locals, depth, &mut line);
        line
      }
    };
    out.push_str(line.trim_end());
    out.push('\n');

    // named record types also list their fields
    if let SymbolKind::TypeAlias { target } = sym.kind
      && let SymbolKind::TypeRecord { fields } = self.symbols[self.strip_alias(target).0].kind
    {
      self.dump_scope(fields, depth + 1, out);
    }
  }

  fn dump_routine(&self, args: ScopeId, locals: ScopeId, depth: usize, out: &mut String) {
    let indent = "    ".repeat(depth);
    if !self.scopes[args.0].entries.is_empty() {
      out.push_str(&format!("\n{indent} arguments:\n"));
      let mut body = String::new();
      self.dump_scope(args, depth + 1, &mut body);
      out.push_str(body.trim_end());
    }
    if !self.scopes[locals.0].entries.is_empty() {
      out.push_str(&format!("\n{indent} locals:\n"));
      let mut body = String::new();
      self.dump_scope(locals, depth + 1, &mut body);
      out.push_str(body.trim_end());
    }
  }
}

impl Default for Symbols {
  fn default() -> Self {
    Self::new()
  }
}

/// Innermost-first resolution over the open scopes. In lenient mode (the
/// expression-dump entry point) unknown names resolve to builtin `integer`
/// instead of failing.
#[derive(Debug, Default)]
pub struct ScopeStack {
  scopes: Vec<ScopeId>,
}

impl ScopeStack {
  pub fn push(&mut self, scope: ScopeId) {
    self.scopes.push(scope);
  }

  pub fn pop(&mut self) {
    self.scopes.pop();
  }

  pub fn top(&self) -> ScopeId {
    self.scopes.last().copied().unwrap_or(ScopeId(0))
  }

  pub fn depth(&self) -> usize {
    self.scopes.len()
  }

  pub fn resolve(
    &self,
    symbols: &Symbols,
    name: &str,
    pos: Pos,
    strict: bool,
  ) -> CompileResult<SymbolId> {
    for &scope in self.scopes.iter().rev() {
      if let Some(id) = symbols.resolve_in(scope, name) {
        return Ok(id);
      }
    }
    if strict {
      Err(CompileError::UnknownSymbol {
        pos,
        name: name.to_string(),
      })
    } else {
      Ok(symbols.builtin.integer)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn table() -> (Symbols, ScopeId) {
    let symbols = Symbols::new();
    let global = symbols.global();
    (symbols, global)
  }

  #[test]
  fn offsets_accumulate_by_declared_size() {
    let (mut symbols, _) = table();
    let integer = symbols.builtin.integer;
    let scope = symbols.new_scope();
    let elem = integer;
    let arr = symbols.add_anon(SymbolKind::TypeArray {
      elem,
      low: 1,
      high: 4,
    });
    let a = symbols
      .insert(scope, "a", SymbolKind::LocalVar { ty: integer, offset: 0 }, Pos::default())
      .expect("inserts");
    let b = symbols
      .insert(scope, "b", SymbolKind::LocalVar { ty: arr, offset: 0 }, Pos::default())
      .expect("inserts");
    let c = symbols
      .insert(scope, "c", SymbolKind::LocalVar { ty: integer, offset: 0 }, Pos::default())
      .expect("inserts");
    let offset_of = |symbols: &Symbols, id: SymbolId| match symbols.symbol(id).kind {
      SymbolKind::LocalVar { offset, .. } => offset,
      _ => panic!("not a local"),
    };
    assert_eq!(offset_of(&symbols, a), 0);
    assert_eq!(offset_of(&symbols, b), 8);
    assert_eq!(offset_of(&symbols, c), 40);
    assert_eq!(symbols.scope(scope).size, 48);
  }

  #[test]
  fn duplicate_names_in_one_scope_are_fatal() {
    let (mut symbols, global) = table();
    let integer = symbols.builtin.integer;
    symbols
      .insert(global, "x", SymbolKind::GlobalVar { ty: integer, init: None }, Pos::default())
      .expect("first insert");
    let err = symbols
      .insert(global, "x", SymbolKind::GlobalVar { ty: integer, init: None }, Pos::default())
      .expect_err("duplicate");
    assert!(matches!(err, CompileError::Duplicate { .. }));
  }

  #[test]
  fn rebase_gives_the_first_param_the_largest_displacement() {
    let (mut symbols, _) = table();
    let integer = symbols.builtin.integer;
    let args = symbols.new_scope();
    let first = symbols
      .insert(args, "a", SymbolKind::Param { ty: integer, offset: 0 }, Pos::default())
      .expect("inserts");
    let second = symbols
      .insert(args, "b", SymbolKind::Param { ty: integer, offset: 0 }, Pos::default())
      .expect("inserts");
    symbols.rebase_params(args);
    let offset_of = |symbols: &Symbols, id: SymbolId| match symbols.symbol(id).kind {
      SymbolKind::Param { offset, .. } => offset,
      _ => panic!("not a param"),
    };
    assert_eq!(offset_of(&symbols, first), 16);
    assert_eq!(offset_of(&symbols, second), 8);
  }

  #[test]
  fn lenient_resolution_falls_back_to_integer() {
    let (symbols, global) = table();
    let mut stack = ScopeStack::default();
    stack.push(global);
    let err = stack
      .resolve(&symbols, "missing", Pos::new(1, 1), true)
      .expect_err("strict fails");
    assert!(matches!(err, CompileError::UnknownSymbol { .. }));
    let id = stack
      .resolve(&symbols, "missing", Pos::new(1, 1), false)
      .expect("lenient resolves");
    assert_eq!(id, symbols.builtin.integer);
    assert_eq!(symbols.kind_of(id), TypeKind::Integer);
  }

  #[test]
  fn inner_scopes_shadow_outer_ones() {
    let (mut symbols, global) = table();
    let integer = symbols.builtin.integer;
    let real = symbols.builtin.real;
    symbols
      .insert(global, "x", SymbolKind::GlobalVar { ty: integer, init: None }, Pos::default())
      .expect("inserts");
    let inner = symbols.new_scope();
    let shadow = symbols
      .insert(inner, "x", SymbolKind::LocalVar { ty: real, offset: 0 }, Pos::default())
      .expect("inserts");
    let mut stack = ScopeStack::default();
    stack.push(global);
    stack.push(inner);
    let found = stack
      .resolve(&symbols, "x", Pos::new(1, 1), true)
      .expect("resolves");
    assert_eq!(found, shadow);
  }

  #[test]
  fn char_storage_occupies_a_full_word() {
    let (mut symbols, _) = table();
    let integer = symbols.builtin.integer;
    let char_ty = symbols.builtin.char;
    assert_eq!(symbols.size_of(char_ty), 1);
    assert_eq!(symbols.storage_size(char_ty), 8);

    // a char next to an integer must not share bytes with it
    let scope = symbols.new_scope();
    symbols
      .insert(scope, "c", SymbolKind::LocalVar { ty: char_ty, offset: 0 }, Pos::default())
      .expect("inserts");
    let n = symbols
      .insert(scope, "n", SymbolKind::LocalVar { ty: integer, offset: 0 }, Pos::default())
      .expect("inserts");
    assert!(matches!(
      symbols.symbol(n).kind,
      SymbolKind::LocalVar { offset: 8, .. }
    ));
    assert_eq!(symbols.scope(scope).size, 16);

    let arr = symbols.add_anon(SymbolKind::TypeArray {
      elem: char_ty,
      low: 1,
      high: 9,
    });
    assert_eq!(symbols.size_of(arr), 9);
    assert_eq!(symbols.storage_size(arr), 72);
  }

  #[test]
  fn sizes_of_aggregates_and_aliases() {
    let (mut symbols, _) = table();
    let integer = symbols.builtin.integer;
    let char_ty = symbols.builtin.char;
    assert_eq!(symbols.size_of(integer), 8);
    assert_eq!(symbols.size_of(char_ty), 1);

    let fields = symbols.new_scope();
    symbols
      .insert(fields, "x", SymbolKind::LocalVar { ty: integer, offset: 0 }, Pos::default())
      .expect("inserts");
    symbols
      .insert(fields, "y", SymbolKind::LocalVar { ty: integer, offset: 0 }, Pos::default())
      .expect("inserts");
    let record = symbols.add_anon(SymbolKind::TypeRecord { fields });
    assert_eq!(symbols.size_of(record), 16);

    let arr = symbols.add_anon(SymbolKind::TypeArray {
      elem: record,
      low: 0,
      high: 2,
    });
    assert_eq!(symbols.size_of(arr), 48);

    let alias = symbols.add_anon(SymbolKind::TypeAlias { target: arr });
    assert_eq!(symbols.size_of(alias), 48);
    assert_eq!(symbols.kind_of(alias), TypeKind::Array);
    assert_eq!(symbols.dimensions(alias), 1);
  }
}
