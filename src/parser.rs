//! Parser — single-pass recursive descent with inline semantic checks.
//!
//! The parser consumes the token stream produced by the lexer and builds
//! the AST directly, validating names, arities, lvalues and jump contexts
//! as it goes. There is no separate resolution pass: declared type names
//! and method signatures are recorded in symbol tables owned by the parser
//! the moment their headers are parsed, and every later reference resolves
//! against those tables. Local variable scope is tracked by a [`Context`]
//! value that is cloned on entry to every nested block, so declarations
//! cannot leak outward.
//!
//! Two constructs are syntactically ambiguous at their first token and are
//! resolved by speculative parsing with rewind: `(` opens either a cast or
//! a parenthesized expression, and a leading type can only be told from an
//! expression statement by attempting to parse it as a type.
//!
//! Compilation is fail-fast: the first violation aborts the parse with a
//! [`SyntaxError`] carrying a stable error code and the offending span.

use crate::ast::{
    BinOp, Case, Decl, Expr, ExprKind, MethodDecl, Param, Program, Stmt, StmtKind, Type, TypeDecl,
    UnaryOp, Value,
};
use crate::errors::{ErrorCode, SyntaxError};
use crate::token::{Span, Token, TokenKind};
use std::collections::{HashMap, HashSet};

/// Per-scope parse state. Cloned when entering a nested block so that
/// declarations made inside the block are dropped on exit.
#[derive(Clone, Default)]
struct Context {
    in_loop: bool,
    in_switch: bool,
    vars: HashSet<String>,
}

impl Context {
    fn declare(&mut self, name: &str) -> bool {
        self.vars.insert(name.to_string())
    }

    fn is_declared(&self, name: &str) -> bool {
        self.vars.contains(name)
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Names introduced by `type ... is ...;` declarations seen so far.
    types: HashSet<String>,
    /// Method name to declared parameter count, for arity checking.
    methods: HashMap<String, usize>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            types: HashSet::new(),
            methods: HashMap::new(),
        }
    }

    pub fn parse(mut self) -> Result<Program, SyntaxError> {
        let mut program = Vec::new();
        while !self.check(&TokenKind::Eof) {
            if self.check(&TokenKind::Type) {
                program.push(Decl::Type(self.parse_type_decl()?));
            } else {
                program.push(Decl::Method(self.parse_method_decl()?));
            }
        }
        Ok(program)
    }

    // ── Declarations ─────────────────────────────────────────────────

    fn parse_type_decl(&mut self) -> Result<TypeDecl, SyntaxError> {
        let start = self.peek().span;
        self.expect(TokenKind::Type)?;
        let (name, name_span) = self.expect_ident()?;
        if self.types.contains(&name) || self.methods.contains_key(&name) {
            return Err(SyntaxError::new(
                ErrorCode::Redeclaration,
                format!("'{}' is already declared", name),
                name_span,
            ));
        }
        // Registered before the alias body parses so recursive types
        // (e.g. linked lists) can mention their own name.
        self.types.insert(name.clone());
        self.expect(TokenKind::Is)?;
        let ty = self.parse_type()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(TypeDecl {
            name,
            ty,
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_method_decl(&mut self) -> Result<MethodDecl, SyntaxError> {
        let start = self.peek().span;
        let ret = self.parse_type()?;
        let (name, name_span) = self.expect_ident()?;
        if self.methods.contains_key(&name) || self.types.contains(&name) {
            return Err(SyntaxError::new(
                ErrorCode::Redeclaration,
                format!("'{}' is already declared", name),
                name_span,
            ));
        }

        self.expect(TokenKind::LParen)?;
        let mut params: Vec<Param> = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let pstart = self.peek().span;
                let ty = self.parse_type()?;
                let (pname, pspan) = self.expect_ident()?;
                if params.iter().any(|p| p.name == pname) {
                    return Err(SyntaxError::new(
                        ErrorCode::Redeclaration,
                        format!("duplicate parameter '{}'", pname),
                        pspan,
                    ));
                }
                params.push(Param {
                    ty,
                    name: pname,
                    span: pstart.merge(pspan),
                });
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        // Registered before the body parses so the method can call itself.
        self.methods.insert(name.clone(), params.len());

        let mut ctx = Context::default();
        for p in &params {
            ctx.declare(&p.name);
        }
        let body = self.parse_block(&ctx)?;
        Ok(MethodDecl {
            name,
            ret,
            params,
            body,
            span: start.merge(self.prev_span()),
        })
    }

    // ── Statements ───────────────────────────────────────────────────

    /// Parse a `{ ... }` block. Declarations inside are scoped to the
    /// block because the context is cloned, not borrowed.
    fn parse_block(&mut self, ctx: &Context) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(TokenKind::LBrace)?;
        let mut inner = ctx.clone();
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.eof_error("expected '}'"));
            }
            stmts.push(self.parse_stmt(&mut inner)?);
        }
        self.expect(TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_stmt(&mut self, ctx: &mut Context) -> Result<Stmt, SyntaxError> {
        match self.peek().kind {
            TokenKind::If => return self.parse_if_stmt(ctx),
            TokenKind::While => return self.parse_while_stmt(ctx),
            TokenKind::For => return self.parse_for_stmt(ctx),
            TokenKind::Switch => return self.parse_switch_stmt(ctx),
            TokenKind::Break => return self.parse_break_stmt(ctx),
            TokenKind::Continue => return self.parse_continue_stmt(ctx),
            TokenKind::Return => return self.parse_return_stmt(ctx),
            TokenKind::Assert => return self.parse_assert_stmt(ctx),
            TokenKind::Print => return self.parse_print_stmt(ctx),
            _ => {}
        }
        if self.looks_like_decl() {
            return self.parse_var_decl_stmt(ctx);
        }
        let stmt = self.parse_unit_stmt(ctx)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(stmt)
    }

    /// A variable declaration starts with a type followed by an
    /// identifier. Neither fact is decidable from one token (`point p`
    /// versus `point = ...;`), so we speculatively parse a type and
    /// rewind regardless of the outcome.
    fn looks_like_decl(&mut self) -> bool {
        let save = self.pos;
        let ok = self.parse_type().is_ok() && matches!(self.peek().kind, TokenKind::Ident(_));
        self.pos = save;
        ok
    }

    fn parse_var_decl_stmt(&mut self, ctx: &mut Context) -> Result<Stmt, SyntaxError> {
        let stmt = self.parse_var_decl(ctx)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(stmt)
    }

    fn parse_var_decl(&mut self, ctx: &mut Context) -> Result<Stmt, SyntaxError> {
        let start = self.peek().span;
        let ty = self.parse_type()?;
        let (name, name_span) = self.expect_ident()?;
        if !ctx.declare(&name) {
            return Err(SyntaxError::new(
                ErrorCode::Redeclaration,
                format!("variable '{}' is already declared", name),
                name_span,
            ));
        }
        let init = if self.match_kind(&TokenKind::Eq) {
            Some(self.parse_expr(ctx)?)
        } else {
            None
        };
        Ok(Stmt {
            kind: StmtKind::VarDecl { ty, name, init },
            span: start.merge(self.prev_span()),
        })
    }

    /// An assignment or bare method call, without the trailing semicolon
    /// (shared between ordinary statements and the `for` increment slot).
    fn parse_unit_stmt(&mut self, ctx: &mut Context) -> Result<Stmt, SyntaxError> {
        let start = self.peek().span;
        let lhs = self.parse_postfix_expr(ctx)?;
        if self.match_kind(&TokenKind::Eq) {
            if !lhs.is_lvalue() {
                return Err(SyntaxError::new(
                    ErrorCode::InvalidLvalue,
                    "this expression cannot be assigned to",
                    lhs.span,
                ));
            }
            let rhs = self.parse_expr(ctx)?;
            return Ok(Stmt {
                kind: StmtKind::Assign { lhs, rhs },
                span: start.merge(self.prev_span()),
            });
        }
        if matches!(lhs.kind, ExprKind::Invoke { .. }) {
            return Ok(Stmt {
                span: start.merge(lhs.span),
                kind: StmtKind::Invoke(lhs),
            });
        }
        Err(SyntaxError::new(
            ErrorCode::ExpectedToken,
            "expected '=' or a method call",
            lhs.span,
        ))
    }

    fn parse_if_stmt(&mut self, ctx: &mut Context) -> Result<Stmt, SyntaxError> {
        let start = self.peek().span;
        self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr(ctx)?;
        self.expect(TokenKind::RParen)?;
        let then_blk = self.parse_block(ctx)?;
        let else_blk = if self.match_kind(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                // `else if` chains nest as an else block holding one if.
                vec![self.parse_if_stmt(ctx)?]
            } else {
                self.parse_block(ctx)?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt {
            kind: StmtKind::IfElse {
                cond,
                then_blk,
                else_blk,
            },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_while_stmt(&mut self, ctx: &mut Context) -> Result<Stmt, SyntaxError> {
        let start = self.peek().span;
        self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.parse_expr(ctx)?;
        self.expect(TokenKind::RParen)?;
        let mut inner = ctx.clone();
        inner.in_loop = true;
        let body = self.parse_block(&inner)?;
        Ok(Stmt {
            kind: StmtKind::While { cond, body },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_for_stmt(&mut self, ctx: &mut Context) -> Result<Stmt, SyntaxError> {
        let start = self.peek().span;
        self.expect(TokenKind::For)?;
        self.expect(TokenKind::LParen)?;
        // The index variable is scoped to the whole loop header and body.
        let mut inner = ctx.clone();
        let decl = self.parse_var_decl(&mut inner)?;
        self.expect(TokenKind::Semicolon)?;
        let cond = self.parse_expr(&inner)?;
        self.expect(TokenKind::Semicolon)?;
        let step = self.parse_unit_stmt(&mut inner)?;
        self.expect(TokenKind::RParen)?;
        inner.in_loop = true;
        let body = self.parse_block(&inner)?;
        Ok(Stmt {
            kind: StmtKind::For {
                decl: Box::new(decl),
                cond,
                step: Box::new(step),
                body,
            },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_switch_stmt(&mut self, ctx: &mut Context) -> Result<Stmt, SyntaxError> {
        let start = self.peek().span;
        self.expect(TokenKind::Switch)?;
        self.expect(TokenKind::LParen)?;
        let subject = self.parse_expr(ctx)?;
        self.expect(TokenKind::RParen)?;
        self.expect(TokenKind::LBrace)?;

        let mut inner = ctx.clone();
        inner.in_switch = true;

        let mut cases: Vec<Case> = Vec::new();
        let mut seen: Vec<Value> = Vec::new();
        let mut has_default = false;
        while !self.check(&TokenKind::RBrace) {
            if self.check(&TokenKind::Eof) {
                return Err(self.eof_error("expected '}'"));
            }
            let case_start = self.peek().span;
            let value = if self.match_kind(&TokenKind::Case) {
                let guard = self.parse_expr(&inner)?;
                let folded = fold_constant(&guard).ok_or_else(|| {
                    SyntaxError::new(
                        ErrorCode::NonConstant,
                        "case guard must be a compile-time constant",
                        guard.span,
                    )
                })?;
                if seen.contains(&folded) {
                    return Err(SyntaxError::new(
                        ErrorCode::DuplicateCase,
                        format!("duplicate case value '{}'", folded),
                        guard.span,
                    ));
                }
                seen.push(folded.clone());
                Some(Expr {
                    kind: ExprKind::Literal(folded),
                    span: guard.span,
                    ty: None,
                })
            } else if self.check(&TokenKind::Default) {
                let tok = self.advance();
                if has_default {
                    return Err(SyntaxError::new(
                        ErrorCode::DuplicateCase,
                        "duplicate default case",
                        tok.span,
                    ));
                }
                has_default = true;
                None
            } else {
                let tok = self.peek().clone();
                return Err(SyntaxError::new(
                    ErrorCode::ExpectedToken,
                    format!("expected 'case' or 'default', found '{}'", tok.kind),
                    tok.span,
                ));
            };
            self.expect(TokenKind::Colon)?;

            // The case body runs until the next case label or the closing
            // brace; declarations inside one case do not reach the next.
            let mut case_ctx = inner.clone();
            let mut body = Vec::new();
            while !matches!(
                self.peek().kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace | TokenKind::Eof
            ) {
                body.push(self.parse_stmt(&mut case_ctx)?);
            }
            cases.push(Case {
                value,
                body,
                span: case_start.merge(self.prev_span()),
            });
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Stmt {
            kind: StmtKind::Switch { subject, cases },
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_break_stmt(&mut self, ctx: &Context) -> Result<Stmt, SyntaxError> {
        let tok = self.advance();
        if !ctx.in_loop && !ctx.in_switch {
            return Err(SyntaxError::new(
                ErrorCode::JumpOutsideLoop,
                "'break' outside of a loop or switch",
                tok.span,
            ));
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Break,
            span: tok.span,
        })
    }

    fn parse_continue_stmt(&mut self, ctx: &Context) -> Result<Stmt, SyntaxError> {
        let tok = self.advance();
        if !ctx.in_loop {
            return Err(SyntaxError::new(
                ErrorCode::JumpOutsideLoop,
                "'continue' outside of a loop",
                tok.span,
            ));
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Continue,
            span: tok.span,
        })
    }

    fn parse_return_stmt(&mut self, ctx: &Context) -> Result<Stmt, SyntaxError> {
        let start = self.advance().span;
        let value = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expr(ctx)?)
        };
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Return(value),
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_assert_stmt(&mut self, ctx: &Context) -> Result<Stmt, SyntaxError> {
        let start = self.advance().span;
        let expr = self.parse_expr(ctx)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Assert(expr),
            span: start.merge(self.prev_span()),
        })
    }

    fn parse_print_stmt(&mut self, ctx: &Context) -> Result<Stmt, SyntaxError> {
        let start = self.advance().span;
        let expr = self.parse_expr(ctx)?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt {
            kind: StmtKind::Print(expr),
            span: start.merge(self.prev_span()),
        })
    }

    // ── Expressions ──────────────────────────────────────────────────
    //
    // Precedence, loosest first: `&& || is` (one level, right associative
    // for the logical pair), relational (non-associative), additive,
    // multiplicative, postfix index/field chains, terms.

    fn parse_expr(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let lhs = self.parse_relational_expr(ctx)?;
        match self.peek().kind {
            TokenKind::Is => {
                self.advance();
                let test = self.parse_type()?;
                let span = lhs.span.merge(self.prev_span());
                Ok(Expr::new(
                    ExprKind::Is {
                        expr: Box::new(lhs),
                        test,
                    },
                    span,
                ))
            }
            TokenKind::AndAnd => {
                self.advance();
                let rhs = self.parse_expr(ctx)?;
                let span = lhs.span.merge(rhs.span);
                Ok(Expr::new(
                    ExprKind::Binary {
                        op: BinOp::And,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    span,
                ))
            }
            TokenKind::OrOr => {
                self.advance();
                let rhs = self.parse_expr(ctx)?;
                let span = lhs.span.merge(rhs.span);
                Ok(Expr::new(
                    ExprKind::Binary {
                        op: BinOp::Or,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    span,
                ))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_relational_expr(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let lhs = self.parse_additive_expr(ctx)?;
        let op = match self.peek().kind {
            TokenKind::Lt => BinOp::Lt,
            TokenKind::LtEq => BinOp::LtEq,
            TokenKind::Gt => BinOp::Gt,
            TokenKind::GtEq => BinOp::GtEq,
            TokenKind::EqEq => BinOp::Eq,
            TokenKind::BangEq => BinOp::Neq,
            _ => return Ok(lhs),
        };
        self.advance();
        // Relational operators do not chain: `a < b < c` is rejected
        // downstream because the right operand is additive-only.
        let rhs = self.parse_additive_expr(ctx)?;
        let span = lhs.span.merge(rhs.span);
        Ok(Expr::new(
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        ))
    }

    fn parse_additive_expr(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_multiplicative_expr(ctx)?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative_expr(ctx)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn parse_multiplicative_expr(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let mut lhs = self.parse_postfix_expr(ctx)?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_postfix_expr(ctx)?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    fn parse_postfix_expr(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_term(ctx)?;
        loop {
            if self.match_kind(&TokenKind::LBracket) {
                let index = self.parse_expr(ctx)?;
                self.expect(TokenKind::RBracket)?;
                let span = expr.span.merge(self.prev_span());
                expr = Expr::new(
                    ExprKind::IndexOf {
                        src: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.match_kind(&TokenKind::Dot) {
                let (field, fspan) = self.expect_ident()?;
                let span = expr.span.merge(fspan);
                expr = Expr::new(
                    ExprKind::FieldAccess {
                        src: Box::new(expr),
                        field,
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_term(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::IntLit(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Int(n)), tok.span))
            }
            TokenKind::CharLit(c) => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Char(c)), tok.span))
            }
            TokenKind::StrLit(ref s) => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Literal(Value::Str(s.clone())),
                    tok.span,
                ))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Bool(true)), tok.span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Bool(false)), tok.span))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Value::Null), tok.span))
            }
            TokenKind::Ident(ref name) => {
                self.advance();
                if self.check(&TokenKind::LParen) {
                    self.parse_invoke(ctx, name.clone(), tok.span)
                } else if ctx.is_declared(name) {
                    Ok(Expr::new(ExprKind::Variable(name.clone()), tok.span))
                } else {
                    Err(SyntaxError::new(
                        ErrorCode::UnresolvedName,
                        format!("variable '{}' is not declared", name),
                        tok.span,
                    ))
                }
            }
            TokenKind::Minus => {
                self.advance();
                // A minus directly on an integer literal folds into one
                // negative literal, so `-1` is constant for case guards.
                if let TokenKind::IntLit(n) = self.peek().kind {
                    let lit = self.advance();
                    return Ok(Expr::new(
                        ExprKind::Literal(Value::Int(-n)),
                        tok.span.merge(lit.span),
                    ));
                }
                let operand = self.parse_term(ctx)?;
                let span = tok.span.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_term(ctx)?;
                let span = tok.span.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        expr: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Bar => {
                self.advance();
                // Additive only: a full expression here would collide
                // with `||` at the closing delimiter.
                let operand = self.parse_additive_expr(ctx)?;
                self.expect(TokenKind::Bar)?;
                let span = tok.span.merge(self.prev_span());
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::LengthOf,
                        expr: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::LParen => self.parse_bracketed(ctx),
            TokenKind::LBracket => self.parse_array_expr(ctx),
            TokenKind::LBrace => self.parse_record_expr(ctx),
            TokenKind::Eof => Err(self.eof_error("expected an expression")),
            _ => Err(SyntaxError::new(
                ErrorCode::UnrecognizedTerm,
                format!("'{}' cannot begin an expression", tok.kind),
                tok.span,
            )),
        }
    }

    fn parse_invoke(&mut self, ctx: &Context, name: String, span: Span) -> Result<Expr, SyntaxError> {
        let arity = match self.methods.get(&name) {
            Some(&n) => n,
            None => {
                return Err(SyntaxError::new(
                    ErrorCode::UnresolvedName,
                    format!("method '{}' is not declared", name),
                    span,
                ));
            }
        };
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expr(ctx)?);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        if args.len() != arity {
            return Err(SyntaxError::new(
                ErrorCode::ArityMismatch,
                format!(
                    "'{}' takes {} argument(s) but {} were supplied",
                    name,
                    arity,
                    args.len()
                ),
                span.merge(self.prev_span()),
            ));
        }
        let span = span.merge(self.prev_span());
        Ok(Expr::new(ExprKind::Invoke { name, args }, span))
    }

    /// `(` begins either a cast or a parenthesized expression. Try the
    /// cast reading first; if a type followed by `)` and the start of a
    /// term is not there, rewind and take the expression reading.
    fn parse_bracketed(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let start = self.peek().span;
        let save = self.pos;
        self.advance(); // (
        if let Ok(ty) = self.parse_type() {
            if self.match_kind(&TokenKind::RParen) && self.starts_term() {
                let operand = self.parse_postfix_expr(ctx)?;
                let span = start.merge(operand.span);
                return Ok(Expr::new(
                    ExprKind::Cast {
                        ty,
                        expr: Box::new(operand),
                    },
                    span,
                ));
            }
        }
        self.pos = save;
        self.advance(); // (
        let expr = self.parse_expr(ctx)?;
        self.expect(TokenKind::RParen)?;
        Ok(expr)
    }

    fn starts_term(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::IntLit(_)
                | TokenKind::CharLit(_)
                | TokenKind::StrLit(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Null
                | TokenKind::Ident(_)
                | TokenKind::Minus
                | TokenKind::Bang
                | TokenKind::Bar
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
        )
    }

    /// `[a, b, c]` array initialiser or `[value; size]` generator.
    fn parse_array_expr(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let start = self.peek().span;
        self.expect(TokenKind::LBracket)?;
        if self.match_kind(&TokenKind::RBracket) {
            return Ok(Expr::new(
                ExprKind::ArrayInitialiser(Vec::new()),
                start.merge(self.prev_span()),
            ));
        }
        let first = self.parse_expr(ctx)?;
        if self.match_kind(&TokenKind::Semicolon) {
            let size = self.parse_expr(ctx)?;
            self.expect(TokenKind::RBracket)?;
            return Ok(Expr::new(
                ExprKind::ArrayGenerator {
                    value: Box::new(first),
                    size: Box::new(size),
                },
                start.merge(self.prev_span()),
            ));
        }
        let mut elems = vec![first];
        while self.match_kind(&TokenKind::Comma) {
            elems.push(self.parse_expr(ctx)?);
        }
        self.expect(TokenKind::RBracket)?;
        Ok(Expr::new(
            ExprKind::ArrayInitialiser(elems),
            start.merge(self.prev_span()),
        ))
    }

    /// `{field: expr, ...}` record constructor.
    fn parse_record_expr(&mut self, ctx: &Context) -> Result<Expr, SyntaxError> {
        let start = self.peek().span;
        self.expect(TokenKind::LBrace)?;
        let mut fields: Vec<(String, Expr)> = Vec::new();
        loop {
            let (name, name_span) = self.expect_ident()?;
            if fields.iter().any(|(n, _)| *n == name) {
                return Err(SyntaxError::new(
                    ErrorCode::DuplicateField,
                    format!("duplicate field '{}'", name),
                    name_span,
                ));
            }
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr(ctx)?;
            fields.push((name, value));
            if !self.match_kind(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        Ok(Expr::new(
            ExprKind::RecordConstructor(fields),
            start.merge(self.prev_span()),
        ))
    }

    // ── Types ────────────────────────────────────────────────────────

    fn parse_type(&mut self) -> Result<Type, SyntaxError> {
        let first = self.parse_array_type()?;
        if !self.check(&TokenKind::Bar) {
            return Ok(first);
        }
        let mut alts = vec![first];
        while self.match_kind(&TokenKind::Bar) {
            alts.push(self.parse_array_type()?);
        }
        Ok(Type::Union(alts))
    }

    fn parse_array_type(&mut self) -> Result<Type, SyntaxError> {
        let mut ty = self.parse_base_type()?;
        while self.check(&TokenKind::LBracket) && self.check_next(&TokenKind::RBracket) {
            self.advance();
            self.advance();
            ty = Type::Array(Box::new(ty));
        }
        Ok(ty)
    }

    fn parse_base_type(&mut self) -> Result<Type, SyntaxError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Int => {
                self.advance();
                Ok(Type::Int)
            }
            TokenKind::Bool => {
                self.advance();
                Ok(Type::Bool)
            }
            TokenKind::Char => {
                self.advance();
                Ok(Type::Char)
            }
            TokenKind::Str => {
                self.advance();
                Ok(Type::Str)
            }
            TokenKind::Void => {
                self.advance();
                Ok(Type::Void)
            }
            TokenKind::Null => {
                self.advance();
                Ok(Type::Null)
            }
            TokenKind::Ident(ref name) => {
                if self.types.contains(name) {
                    self.advance();
                    Ok(Type::Named(name.clone()))
                } else {
                    Err(SyntaxError::new(
                        ErrorCode::UnresolvedName,
                        format!("type '{}' is not declared", name),
                        tok.span,
                    ))
                }
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields: Vec<(Type, String)> = Vec::new();
                loop {
                    let ty = self.parse_type()?;
                    let (name, name_span) = self.expect_ident()?;
                    if fields.iter().any(|(_, n)| *n == name) {
                        return Err(SyntaxError::new(
                            ErrorCode::DuplicateField,
                            format!("duplicate field '{}'", name),
                            name_span,
                        ));
                    }
                    fields.push((ty, name));
                    if !self.match_kind(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBrace)?;
                Ok(Type::Record(fields))
            }
            TokenKind::Eof => Err(self.eof_error("expected a type")),
            _ => Err(SyntaxError::new(
                ErrorCode::ExpectedToken,
                format!("expected a type, found '{}'", tok.kind),
                tok.span,
            )),
        }
    }

    // ── Token-level helpers ──────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_next(&self, kind: &TokenKind) -> bool {
        self.tokens.get(self.pos + 1).map_or(false, |t| &t.kind == kind)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if !matches!(tok.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        tok
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, SyntaxError> {
        if self.check(&kind) {
            return Ok(self.advance());
        }
        if self.check(&TokenKind::Eof) {
            return Err(self.eof_error(format!("expected '{}'", kind)));
        }
        let tok = self.peek().clone();
        Err(SyntaxError::new(
            ErrorCode::ExpectedToken,
            format!("expected '{}', found '{}'", kind, tok.kind),
            tok.span,
        ))
    }

    fn expect_ident(&mut self) -> Result<(String, Span), SyntaxError> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok((name, tok.span))
            }
            TokenKind::Eof => Err(self.eof_error("expected an identifier")),
            other => Err(SyntaxError::new(
                ErrorCode::ExpectedToken,
                format!("expected an identifier, found '{}'", other),
                tok.span,
            )),
        }
    }

    fn eof_error(&self, message: impl Into<String>) -> SyntaxError {
        let mut message = message.into();
        message.push_str(" but the input ended");
        SyntaxError::new(ErrorCode::UnexpectedEof, message, self.peek().span)
    }
}

/// Reduce an expression to a constant [`Value`], or `None` if it contains
/// anything not known at compile time. Record fields are sorted by name so
/// equal constants written with different field orders compare equal.
fn fold_constant(expr: &Expr) -> Option<Value> {
    match &expr.kind {
        ExprKind::Literal(v) => Some(v.clone()),
        ExprKind::ArrayInitialiser(elems) => {
            let folded: Option<Vec<Value>> = elems.iter().map(fold_constant).collect();
            folded.map(Value::Array)
        }
        ExprKind::RecordConstructor(fields) => {
            let mut folded = Vec::with_capacity(fields.len());
            for (name, value) in fields {
                folded.push((name.clone(), fold_constant(value)?));
            }
            folded.sort_by(|a, b| a.0.cmp(&b.0));
            Some(Value::Record(folded))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::to_source;
    use crate::lexer::Lexer;

    fn try_parse(source: &str) -> Result<Program, SyntaxError> {
        let tokens = Lexer::new(source).scan_tokens().expect("lexer error");
        Parser::new(tokens).parse()
    }

    fn parse(source: &str) -> Program {
        try_parse(source).expect("parse error")
    }

    fn parse_err(source: &str) -> SyntaxError {
        try_parse(source).expect_err("expected a parse error")
    }

    #[test]
    fn test_simple_method() {
        let program = parse("int id(int x) { return x; }");
        assert_eq!(program.len(), 1);
        let Decl::Method(m) = &program[0] else {
            panic!("expected a method");
        };
        assert_eq!(m.name, "id");
        assert_eq!(m.ret, Type::Int);
        assert_eq!(m.params.len(), 1);
        assert_eq!(m.body.len(), 1);
    }

    #[test]
    fn test_type_alias_and_use() {
        let program = parse(
            "type point is {int x, int y};\n\
             int getx(point p) { return p.x; }",
        );
        assert_eq!(program.len(), 2);
        let Decl::Method(m) = &program[1] else {
            panic!("expected a method");
        };
        assert_eq!(m.params[0].ty, Type::Named("point".into()));
    }

    #[test]
    fn test_recursive_type_alias() {
        parse("type list is null|{int data, list next};\nvoid f() { }");
    }

    #[test]
    fn test_direct_recursion_allowed() {
        parse(
            "int fib(int n) {\n\
                 if (n <= 1) { return n; }\n\
                 return fib(n - 1) + fib(n - 2);\n\
             }",
        );
    }

    #[test]
    fn test_forward_call_rejected() {
        // Methods resolve against earlier declarations only.
        let err = parse_err("void f() { g(); }\nvoid g() { }");
        assert_eq!(err.code, ErrorCode::UnresolvedName);
    }

    #[test]
    fn test_redeclared_method() {
        let err = parse_err("void f() { }\nint f() { return 1; }");
        assert_eq!(err.code, ErrorCode::Redeclaration);
    }

    #[test]
    fn test_redeclared_variable() {
        let err = parse_err("void f() { int x = 1; bool x = true; }");
        assert_eq!(err.code, ErrorCode::Redeclaration);
    }

    #[test]
    fn test_block_scoping() {
        // A declaration inside an if body is gone after the block.
        let err = parse_err(
            "void f(bool b) {\n\
                 if (b) { int x = 1; }\n\
                 x = 2;\n\
             }",
        );
        assert_eq!(err.code, ErrorCode::UnresolvedName);
    }

    #[test]
    fn test_shadowing_in_nested_block_allowed() {
        parse(
            "void f(bool b) {\n\
                 int x = 1;\n\
                 if (b) { x = 2; }\n\
             }",
        );
    }

    #[test]
    fn test_undeclared_variable() {
        let err = parse_err("void f() { x = 1; }");
        assert_eq!(err.code, ErrorCode::UnresolvedName);
    }

    #[test]
    fn test_undeclared_type() {
        let err = parse_err("point f() { return null; }");
        assert_eq!(err.code, ErrorCode::UnresolvedName);
    }

    #[test]
    fn test_duplicate_record_type_field() {
        let err = parse_err("type t is {int x, bool x};");
        assert_eq!(err.code, ErrorCode::DuplicateField);
    }

    #[test]
    fn test_duplicate_record_literal_field() {
        let err = parse_err("void f() { print {x: 1, x: 2}; }");
        assert_eq!(err.code, ErrorCode::DuplicateField);
    }

    #[test]
    fn test_arity_mismatch() {
        let err = parse_err(
            "int add(int a, int b) { return a + b; }\n\
             void f() { print add(1); }",
        );
        assert_eq!(err.code, ErrorCode::ArityMismatch);
    }

    #[test]
    fn test_duplicate_case() {
        let err = parse_err(
            "void f(int x) {\n\
                 switch (x) { case 1: break; case 1: break; }\n\
             }",
        );
        assert_eq!(err.code, ErrorCode::DuplicateCase);
    }

    #[test]
    fn test_duplicate_case_record_field_order() {
        // {x:1, y:2} and {y:2, x:1} denote the same constant.
        let err = parse_err(
            "void f(int v) {\n\
                 switch (v) {\n\
                     case {x: 1, y: 2}: break;\n\
                     case {y: 2, x: 1}: break;\n\
                 }\n\
             }",
        );
        assert_eq!(err.code, ErrorCode::DuplicateCase);
    }

    #[test]
    fn test_duplicate_default() {
        let err = parse_err(
            "void f(int x) {\n\
                 switch (x) { default: break; default: break; }\n\
             }",
        );
        assert_eq!(err.code, ErrorCode::DuplicateCase);
    }

    #[test]
    fn test_non_constant_case() {
        let err = parse_err(
            "void f(int x, int y) {\n\
                 switch (x) { case y: break; }\n\
             }",
        );
        assert_eq!(err.code, ErrorCode::NonConstant);
    }

    #[test]
    fn test_negative_case_guard_is_constant() {
        parse("void f(int x) { switch (x) { case -1: break; } }");
    }

    #[test]
    fn test_break_outside_loop() {
        let err = parse_err("void f() { break; }");
        assert_eq!(err.code, ErrorCode::JumpOutsideLoop);
    }

    #[test]
    fn test_break_inside_switch_allowed() {
        parse("void f(int x) { switch (x) { case 1: break; } }");
    }

    #[test]
    fn test_continue_inside_switch_only_rejected() {
        let err = parse_err("void f(int x) { switch (x) { case 1: continue; } }");
        assert_eq!(err.code, ErrorCode::JumpOutsideLoop);
    }

    #[test]
    fn test_continue_in_loop_in_switch() {
        parse(
            "void f(int x) {\n\
                 while (x < 10) {\n\
                     switch (x) { case 1: x = x + 1; }\n\
                     continue;\n\
                 }\n\
             }",
        );
    }

    #[test]
    fn test_invalid_lvalue() {
        let err = parse_err("void f() { 1 = 2; }");
        assert_eq!(err.code, ErrorCode::InvalidLvalue);
    }

    #[test]
    fn test_call_result_not_assignable() {
        let err = parse_err(
            "int g() { return 1; }\n\
             void f() { g() = 2; }",
        );
        assert_eq!(err.code, ErrorCode::InvalidLvalue);
    }

    #[test]
    fn test_index_and_field_lvalues() {
        parse(
            "void f(int[] a, {int x} r) {\n\
                 a[0] = 1;\n\
                 r.x = 2;\n\
             }",
        );
    }

    #[test]
    fn test_unrecognized_term() {
        let err = parse_err("void f() { int x = *; }");
        assert_eq!(err.code, ErrorCode::UnrecognizedTerm);
    }

    #[test]
    fn test_premature_eof() {
        let err = parse_err("int f(int x) { return x");
        assert_eq!(err.code, ErrorCode::UnexpectedEof);
    }

    #[test]
    fn test_cast_versus_paren() {
        let program = parse(
            "type t is int|null;\n\
             void f(t v, int x) {\n\
                 int a = (int) v;\n\
                 int b = (x);\n\
             }",
        );
        let Decl::Method(m) = &program[1] else {
            panic!("expected a method");
        };
        let StmtKind::VarDecl { init: Some(a), .. } = &m.body[0].kind else {
            panic!("expected a declaration");
        };
        assert!(matches!(a.kind, ExprKind::Cast { .. }));
        let StmtKind::VarDecl { init: Some(b), .. } = &m.body[1].kind else {
            panic!("expected a declaration");
        };
        assert!(matches!(b.kind, ExprKind::Variable(_)));
    }

    #[test]
    fn test_negative_literal_folds() {
        let program = parse("void f() { int x = -5; }");
        let Decl::Method(m) = &program[0] else {
            panic!("expected a method");
        };
        let StmtKind::VarDecl { init: Some(e), .. } = &m.body[0].kind else {
            panic!("expected a declaration");
        };
        assert_eq!(e.kind, ExprKind::Literal(Value::Int(-5)));
    }

    #[test]
    fn test_negate_non_literal_stays_unary() {
        let program = parse("void f(int x) { int y = -x; }");
        let Decl::Method(m) = &program[0] else {
            panic!("expected a method");
        };
        let StmtKind::VarDecl { init: Some(e), .. } = &m.body[0].kind else {
            panic!("expected a declaration");
        };
        assert!(matches!(
            e.kind,
            ExprKind::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn test_for_loop_scoping() {
        // The index variable does not survive the loop.
        let err = parse_err(
            "void f() {\n\
                 for (int i = 0; i < 10; i = i + 1) { }\n\
                 i = 0;\n\
             }",
        );
        assert_eq!(err.code, ErrorCode::UnresolvedName);
    }

    #[test]
    fn test_else_if_chain() {
        let program = parse(
            "int sign(int x) {\n\
                 if (x < 0) { return -1; }\n\
                 else if (x > 0) { return 1; }\n\
                 else { return 0; }\n\
             }",
        );
        let Decl::Method(m) = &program[0] else {
            panic!("expected a method");
        };
        let StmtKind::IfElse { else_blk, .. } = &m.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(else_blk.len(), 1);
        assert!(matches!(else_blk[0].kind, StmtKind::IfElse { .. }));
    }

    #[test]
    fn test_array_generator_and_length() {
        let program = parse("void f() { int[] a = [0; 10]; int n = |a|; }");
        let Decl::Method(m) = &program[0] else {
            panic!("expected a method");
        };
        let StmtKind::VarDecl { init: Some(e), .. } = &m.body[0].kind else {
            panic!("expected a declaration");
        };
        assert!(matches!(e.kind, ExprKind::ArrayGenerator { .. }));
    }

    #[test]
    fn test_union_type_parses() {
        let program = parse("int|null f() { return null; }");
        let Decl::Method(m) = &program[0] else {
            panic!("expected a method");
        };
        assert_eq!(m.ret, Type::Union(vec![Type::Int, Type::Null]));
    }

    #[test]
    fn test_is_expression() {
        parse(
            "type t is int|null;\n\
             bool f(t v) { return v is int; }",
        );
    }

    #[test]
    fn test_short_circuit_parse_right_assoc() {
        let program = parse("bool f(bool a, bool b, bool c) { return a && b && c; }");
        let Decl::Method(m) = &program[0] else {
            panic!("expected a method");
        };
        let StmtKind::Return(Some(e)) = &m.body[0].kind else {
            panic!("expected return");
        };
        let ExprKind::Binary {
            op: BinOp::And,
            rhs,
            ..
        } = &e.kind
        else {
            panic!("expected &&");
        };
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_print_parse_print_fixpoint() {
        let source = "type point is {int x, int y};\n\
             int dist(point p) {\n\
                 int[] road = [1, 2, 3];\n\
                 int acc = 0;\n\
                 for (int i = 0; i < |road|; i = i + 1) {\n\
                     acc = acc + road[i] * p.x;\n\
                 }\n\
                 switch (acc) {\n\
                     case -1: return 0;\n\
                     case 10: acc = acc + 1;\n\
                     default: acc = 0;\n\
                 }\n\
                 if (acc > 0 && p.y != 0) { return acc; } else { return p.y; }\n\
             }";
        let once = parse(source);
        let printed = to_source(&once);
        let twice = parse(&printed);
        assert_eq!(printed, to_source(&twice));
    }
}
