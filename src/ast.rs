//! Abstract syntax tree for the While language.
//!
//! Each syntactic category (declarations, statements, expressions, types)
//! is a closed sum type, so every consumer dispatches with an exhaustive
//! match. Statement and expression nodes carry a [`Span`] for diagnostics;
//! expressions additionally carry a type annotation slot which the checker
//! fills in before code generation runs.
//!
//! The `Display` impls re-serialize a tree to parseable source text, which
//! backs the parse → print → parse round-trip property.

use crate::token::Span;
use std::fmt;

/// A complete compilation unit: an ordered sequence of declarations.
pub type Program = Vec<Decl>;

// ── Declarations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Decl {
    /// `type Name is Type;`
    Type(TypeDecl),
    /// `RetType name(params) { body }`
    Method(MethodDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDecl {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub ret: Type,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: Type,
    pub name: String,
    pub span: Span,
}

// ── Statements ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `Type name = init;` (initialiser optional)
    VarDecl {
        ty: Type,
        name: String,
        init: Option<Expr>,
    },

    /// `lval = expr;`
    Assign { lhs: Expr, rhs: Expr },

    /// `if (cond) { ... } else { ... }` — `else if` chains nest here.
    IfElse {
        cond: Expr,
        then_blk: Vec<Stmt>,
        else_blk: Vec<Stmt>,
    },

    /// `while (cond) { ... }`
    While { cond: Expr, body: Vec<Stmt> },

    /// `for (decl; cond; step) { ... }`
    For {
        decl: Box<Stmt>,
        cond: Expr,
        step: Box<Stmt>,
        body: Vec<Stmt>,
    },

    /// `switch (subject) { case v: ... default: ... }`
    Switch { subject: Expr, cases: Vec<Case> },

    Break,
    Continue,

    /// `return;` or `return expr;`
    Return(Option<Expr>),

    /// `assert expr;`
    Assert(Expr),

    /// `print expr;`
    Print(Expr),

    /// A bare method call used as a statement.
    Invoke(Expr),
}

/// One arm of a switch statement. `value` is `None` for the default arm,
/// otherwise a folded [`ExprKind::Literal`].
#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub value: Option<Expr>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

// ── Expressions ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    /// Resolved type, filled in by the checker. `None` straight out of
    /// the parser.
    pub ty: Option<Type>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            ty: None,
        }
    }

    /// Whether this expression may stand on the left of an assignment.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Variable(_) | ExprKind::IndexOf { .. } | ExprKind::FieldAccess { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A compile-time constant: `42`, `'x'`, `"hi"`, `true`, `null`, or a
    /// folded aggregate.
    Literal(Value),

    /// Variable reference.
    Variable(String),

    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },

    /// `src[index]`
    IndexOf { src: Box<Expr>, index: Box<Expr> },

    /// `src.field`
    FieldAccess { src: Box<Expr>, field: String },

    /// `{f1: e1, f2: e2}`
    RecordConstructor(Vec<(String, Expr)>),

    /// `[e1, e2, e3]`
    ArrayInitialiser(Vec<Expr>),

    /// `[value; size]`
    ArrayGenerator { value: Box<Expr>, size: Box<Expr> },

    /// `name(args)`
    Invoke { name: String, args: Vec<Expr> },

    /// `expr is Type`
    Is { expr: Box<Expr>, test: Type },

    /// `(Type) expr`
    Cast { ty: Type, expr: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Eq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    /// `|e|`
    LengthOf,
}

// ── Constant values ──────────────────────────────────────────────────

/// A folded compile-time constant, as required for switch case guards.
///
/// Record fields are kept sorted by name (the parser normalizes them when
/// folding), so derived equality is field-order insensitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Char(char),
    Str(String),
    Array(Vec<Value>),
    Record(Vec<(String, Value)>),
}

// ── Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum Type {
    Void,
    Null,
    Bool,
    Int,
    Char,
    /// Surface sugar for `int[]`; lowered to a character-code array.
    Str,
    /// Reference to a declared type alias.
    Named(String),
    Array(Box<Type>),
    /// Ordered field list `(type, name)`. Equality ignores field order.
    Record(Vec<(Type, String)>),
    /// Set of alternatives. Equality ignores member order.
    Union(Vec<Type>),
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Void, Type::Void)
            | (Type::Null, Type::Null)
            | (Type::Bool, Type::Bool)
            | (Type::Int, Type::Int)
            | (Type::Char, Type::Char)
            | (Type::Str, Type::Str) => true,
            (Type::Named(a), Type::Named(b)) => a == b,
            (Type::Array(a), Type::Array(b)) => a == b,
            (Type::Record(a), Type::Record(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(t, n)| b.iter().any(|(t2, n2)| n == n2 && t == t2))
            }
            (Type::Union(a), Type::Union(b)) => {
                a.iter().all(|t| b.contains(t)) && b.iter().all(|t| a.contains(t))
            }
            _ => false,
        }
    }
}

impl Eq for Type {}

// ── Source re-serialization ──────────────────────────────────────────

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Char => write!(f, "char"),
            Type::Str => write!(f, "string"),
            Type::Named(n) => write!(f, "{}", n),
            Type::Array(elem) => write!(f, "{}[]", elem),
            Type::Record(fields) => {
                write!(f, "{{")?;
                for (i, (t, n)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", t, n)?;
                }
                write!(f, "}}")
            }
            Type::Union(alts) => {
                for (i, t) in alts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{}", t)?;
                }
                Ok(())
            }
        }
    }
}

fn escape_char(c: char, out: &mut String) {
    match c {
        '\n' => out.push_str("\\n"),
        '\t' => out.push_str("\\t"),
        '\r' => out.push_str("\\r"),
        '\\' => out.push_str("\\\\"),
        '"' => out.push_str("\\\""),
        '\'' => out.push_str("\\'"),
        c => out.push(c),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Char(c) => {
                let mut s = String::new();
                escape_char(*c, &mut s);
                write!(f, "'{}'", s)
            }
            Value::Str(s) => {
                let mut out = String::new();
                for c in s.chars() {
                    escape_char(c, &mut out);
                }
                write!(f, "\"{}\"", out)
            }
            Value::Array(elems) => {
                write!(f, "[")?;
                for (i, v) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (n, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", n, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(v) => write!(f, "{}", v),
            ExprKind::Variable(n) => write!(f, "{}", n),
            ExprKind::Binary { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            ExprKind::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "!{}", expr),
                UnaryOp::Neg => write!(f, "-{}", expr),
                UnaryOp::LengthOf => write!(f, "|{}|", expr),
            },
            ExprKind::IndexOf { src, index } => write!(f, "{}[{}]", src, index),
            ExprKind::FieldAccess { src, field } => write!(f, "{}.{}", src, field),
            ExprKind::RecordConstructor(fields) => {
                write!(f, "{{")?;
                for (i, (n, e)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", n, e)?;
                }
                write!(f, "}}")
            }
            ExprKind::ArrayInitialiser(elems) => {
                write!(f, "[")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
            ExprKind::ArrayGenerator { value, size } => write!(f, "[{}; {}]", value, size),
            ExprKind::Invoke { name, args } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            ExprKind::Is { expr, test } => write!(f, "({} is {})", expr, test),
            ExprKind::Cast { ty, expr } => write!(f, "({}) {}", ty, expr),
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, stmts: &[Stmt], indent: usize) -> fmt::Result {
    writeln!(f, "{{")?;
    for s in stmts {
        s.fmt_indented(f, indent + 1)?;
    }
    write!(f, "{:indent$}}}", "", indent = indent * 4)
}

impl Stmt {
    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        write!(f, "{:indent$}", "", indent = indent * 4)?;
        match &self.kind {
            StmtKind::VarDecl { ty, name, init } => {
                write!(f, "{} {}", ty, name)?;
                if let Some(e) = init {
                    write!(f, " = {}", e)?;
                }
                writeln!(f, ";")
            }
            StmtKind::Assign { lhs, rhs } => writeln!(f, "{} = {};", lhs, rhs),
            StmtKind::IfElse {
                cond,
                then_blk,
                else_blk,
            } => {
                write!(f, "if ({}) ", cond)?;
                write_block(f, then_blk, indent)?;
                if !else_blk.is_empty() {
                    write!(f, " else ")?;
                    write_block(f, else_blk, indent)?;
                }
                writeln!(f)
            }
            StmtKind::While { cond, body } => {
                write!(f, "while ({}) ", cond)?;
                write_block(f, body, indent)?;
                writeln!(f)
            }
            StmtKind::For {
                decl,
                cond,
                step,
                body,
            } => {
                let decl = decl.to_string();
                let step = step.to_string();
                write!(
                    f,
                    "for ({}; {}; {}) ",
                    decl.trim_end_matches(|c| c == ';' || c == '\n'),
                    cond,
                    step.trim_end_matches(|c| c == ';' || c == '\n'),
                )?;
                write_block(f, body, indent)?;
                writeln!(f)
            }
            StmtKind::Switch { subject, cases } => {
                writeln!(f, "switch ({}) {{", subject)?;
                for case in cases {
                    write!(f, "{:indent$}", "", indent = indent * 4)?;
                    match &case.value {
                        Some(v) => writeln!(f, "case {}:", v)?,
                        None => writeln!(f, "default:")?,
                    }
                    for s in &case.body {
                        s.fmt_indented(f, indent + 1)?;
                    }
                }
                writeln!(f, "{:indent$}}}", "", indent = indent * 4)
            }
            StmtKind::Break => writeln!(f, "break;"),
            StmtKind::Continue => writeln!(f, "continue;"),
            StmtKind::Return(None) => writeln!(f, "return;"),
            StmtKind::Return(Some(e)) => writeln!(f, "return {};", e),
            StmtKind::Assert(e) => writeln!(f, "assert {};", e),
            StmtKind::Print(e) => writeln!(f, "print {};", e),
            StmtKind::Invoke(e) => writeln!(f, "{};", e),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

impl fmt::Display for Decl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decl::Type(td) => writeln!(f, "type {} is {};", td.name, td.ty),
            Decl::Method(md) => {
                write!(f, "{} {}(", md.ret, md.name)?;
                for (i, p) in md.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", p.ty, p.name)?;
                }
                write!(f, ") ")?;
                write_block(f, &md.body, 0)?;
                writeln!(f)
            }
        }
    }
}

/// Render a whole program back to source text.
pub fn to_source(program: &Program) -> String {
    let mut out = String::new();
    for decl in program {
        out.push_str(&decl.to_string());
        out.push('\n');
    }
    out
}
