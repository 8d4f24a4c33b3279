//! Parser
//!
//! Recursive descent for items and statements, precedence climbing for
//! expressions. A syntax error records one diagnostic and the parser
//! resynchronises at the next statement or item boundary, so independent
//! errors in one source are all reported.

pub mod ast;

use tracing::debug;

use crate::frontend::lexer::{Token, TokenKind};
use crate::util::diagnostic::{Diagnostic, Diagnostics};
use crate::util::span::Span;

use ast::*;

/// Marker for "a diagnostic was recorded, unwind to a recovery point"
#[derive(Debug)]
struct Abort;

type PResult<T> = Result<T, Abort>;

/// Deepest syntax tree the parser builds
///
/// Every later phase walks the tree recursively, so the cap bounds their
/// stack use as well as the parser's own.
pub const MAX_NESTING_DEPTH: usize = 128;

/// Parse a token stream (ending in `Eof`) into a compilation unit
pub fn parse(tokens: &[Token]) -> (Unit, Diagnostics) {
    let mut parser = Parser::new(tokens);
    let unit = parser.parse_unit();
    debug!(
        "Parsed {} types, {} functions, {} uses",
        unit.types.len(),
        unit.functions.len(),
        unit.uses.len()
    );
    (unit, parser.diagnostics)
}

struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    diagnostics: Diagnostics,
    /// Inside `if`/`while`/`for` headers, where `Name {` opens the body
    no_struct_literal: bool,
    /// Nesting of the node being parsed
    depth: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            diagnostics: Diagnostics::new(),
            no_struct_literal: false,
            depth: 0,
        }
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn current(&self) -> &'t Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &'t TokenKind {
        &self.current().kind
    }

    fn peek_at(
        &self,
        ahead: usize,
    ) -> &'t TokenKind {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + ahead).min(last)].kind
    }

    fn at(
        &self,
        kind: &TokenKind,
    ) -> bool {
        self.peek() == kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) -> &'t Token {
        let token = self.current();
        if !self.at_eof() {
            self.pos += 1;
        }
        token
    }

    fn prev_span(&self) -> Span {
        if self.pos == 0 {
            self.current().span
        } else {
            self.tokens[self.pos - 1].span
        }
    }

    fn eat(
        &mut self,
        kind: &TokenKind,
    ) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error_here(
        &mut self,
        expected: &str,
    ) -> Abort {
        let token = self.current();
        self.diagnostics.push(Diagnostic::error(
            "E0101",
            format!("expected {}, found {}", expected, token.kind),
            token.span,
        ));
        Abort
    }

    fn expect(
        &mut self,
        kind: TokenKind,
    ) -> PResult<&'t Token> {
        if self.at(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error_here(&kind.to_string()))
        }
    }

    fn expect_ident(
        &mut self,
        what: &str,
    ) -> PResult<Ident> {
        match self.peek() {
            TokenKind::Identifier(name) => {
                let span = self.advance().span;
                Ok(Ident {
                    name: name.clone(),
                    span,
                })
            }
            _ => Err(self.error_here(what)),
        }
    }

    // ------------------------------------------------------------------
    // Nesting
    // ------------------------------------------------------------------

    /// Go one level deeper; E0102 past [`MAX_NESTING_DEPTH`]
    fn descend(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            self.diagnostics.push(Diagnostic::error(
                "E0102",
                format!("nesting too deep (more than {} levels)", MAX_NESTING_DEPTH),
                self.current().span,
            ));
            return Err(Abort);
        }
        Ok(())
    }

    /// Run `f` one level deeper, restoring the depth on every exit
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> PResult<T>,
    ) -> PResult<T> {
        let depth = self.depth;
        let result = match self.descend() {
            Ok(()) => f(self),
            Err(abort) => Err(abort),
        };
        self.depth = depth;
        result
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Skip to the next token that can start an item
    fn synchronize_item(&mut self) {
        while !self.at_eof() {
            match self.peek() {
                TokenKind::KwType | TokenKind::KwFn | TokenKind::KwPub | TokenKind::KwUse => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Skip past the end of the broken statement
    ///
    /// Stops after a `;` or before a `}` at the statement's own nesting level.
    fn synchronize_stmt(&mut self) {
        let mut depth = 0usize;
        while !self.at_eof() {
            match self.peek() {
                TokenKind::Semicolon if depth == 0 => {
                    self.advance();
                    return;
                }
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                TokenKind::KwLet
                | TokenKind::KwIf
                | TokenKind::KwWhile
                | TokenKind::KwFor
                | TokenKind::KwReturn
                | TokenKind::KwThrow
                    if depth == 0 =>
                {
                    return
                }
                TokenKind::KwFn | TokenKind::KwType | TokenKind::KwPub => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    fn parse_unit(&mut self) -> Unit {
        let mut unit = Unit::default();

        while !self.at_eof() {
            let start = self.pos;
            let result = match self.peek() {
                TokenKind::KwUse => self.parse_use().map(|u| unit.uses.push(u)),
                TokenKind::KwType => self.parse_type(false).map(|t| unit.types.push(t)),
                TokenKind::KwFn => self.parse_fn(false).map(|f| unit.functions.push(f)),
                TokenKind::KwPub => match self.peek_at(1) {
                    TokenKind::KwType => {
                        self.advance();
                        self.parse_type(true).map(|t| unit.types.push(t))
                    }
                    TokenKind::KwFn => {
                        self.advance();
                        self.parse_fn(true).map(|f| unit.functions.push(f))
                    }
                    _ => {
                        self.advance();
                        Err(self.error_here("`fn` or `type` after `pub`"))
                    }
                },
                _ => Err(self.error_here("`fn`, `type` or `use`")),
            };

            if result.is_err() {
                if self.pos == start {
                    self.advance();
                }
                self.synchronize_item();
            }
        }

        unit
    }

    fn parse_use(&mut self) -> PResult<UseDecl> {
        let start = self.expect(TokenKind::KwUse)?.span;
        let mut path = vec![self.expect_ident("module path")?];
        while self.eat(&TokenKind::Dot) {
            path.push(self.expect_ident("module path segment")?);
        }
        self.expect(TokenKind::Semicolon)?;
        Ok(UseDecl {
            path,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_type(
        &mut self,
        is_pub: bool,
    ) -> PResult<TypeDecl> {
        let start = self.expect(TokenKind::KwType)?.span;
        let name = self.expect_ident("type name")?;
        self.expect(TokenKind::LBrace)?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();

        while !self.at(&TokenKind::RBrace) && !self.at_eof() {
            let member_start = self.pos;
            let result = match self.peek() {
                TokenKind::KwFn => self.parse_fn(false).map(|m| methods.push(m)),
                TokenKind::KwPub if matches!(self.peek_at(1), TokenKind::KwFn) => {
                    self.advance();
                    self.parse_fn(true).map(|m| methods.push(m))
                }
                TokenKind::KwPub => {
                    self.advance();
                    Err(self.error_here("`fn` after `pub` (fields have no visibility)"))
                }
                TokenKind::Identifier(_) => self.parse_field().map(|f| fields.push(f)),
                _ => Err(self.error_here("field or method")),
            };

            if result.is_err() {
                if self.pos == member_start {
                    self.advance();
                }
                // Resume at the next member
                while !self.at_eof() {
                    match self.peek() {
                        TokenKind::KwFn | TokenKind::KwPub | TokenKind::RBrace => break,
                        TokenKind::Identifier(_)
                            if matches!(self.peek_at(1), TokenKind::Colon) =>
                        {
                            break
                        }
                        _ => {
                            self.advance();
                        }
                    }
                }
            }
        }

        self.expect(TokenKind::RBrace)?;
        Ok(TypeDecl {
            name,
            is_pub,
            fields,
            methods,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_field(&mut self) -> PResult<FieldDecl> {
        let name = self.expect_ident("field name")?;
        self.expect(TokenKind::Colon)?;
        let ty = self.parse_type_expr()?;
        if !self.eat(&TokenKind::Comma) {
            self.eat(&TokenKind::Semicolon);
        }
        Ok(FieldDecl { name, ty })
    }

    fn parse_fn(
        &mut self,
        is_pub: bool,
    ) -> PResult<FnDecl> {
        let start = self.expect(TokenKind::KwFn)?.span;
        let name = self.expect_ident("function name")?;
        self.expect(TokenKind::LParen)?;

        let mut has_self = false;
        let mut params = Vec::new();
        if self.eat(&TokenKind::KwSelf) {
            has_self = true;
            if !self.at(&TokenKind::RParen) {
                self.expect(TokenKind::Comma)?;
            }
        }
        while !self.at(&TokenKind::RParen) {
            if self.at(&TokenKind::KwSelf) {
                return Err(self.error_here("parameter (`self` must come first)"));
            }
            let pname = self.expect_ident("parameter name")?;
            self.expect(TokenKind::Colon)?;
            let ty = self.parse_type_expr()?;
            params.push(Param { name: pname, ty });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;

        let ret = if self.eat(&TokenKind::Arrow) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        let body = self.parse_block()?;
        Ok(FnDecl {
            name,
            is_pub,
            has_self,
            params,
            ret,
            span: start.to(body.span),
            body,
        })
    }

    fn parse_type_expr(&mut self) -> PResult<TypeExpr> {
        let name = self.expect_ident("type")?;
        let arg = if self.eat(&TokenKind::LBracket) {
            let inner = self.nested(Self::parse_type_expr)?;
            self.expect(TokenKind::RBracket)?;
            Some(Box::new(inner))
        } else {
            None
        };
        Ok(TypeExpr { name, arg })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_block(&mut self) -> PResult<Block> {
        self.nested(Self::parse_block_inner)
    }

    fn parse_block_inner(&mut self) -> PResult<Block> {
        let start = self.expect(TokenKind::LBrace)?.span;
        let saved = std::mem::replace(&mut self.no_struct_literal, false);
        let mut stmts = Vec::new();

        while !self.at(&TokenKind::RBrace) && !self.at_eof() {
            if matches!(self.peek(), TokenKind::KwFn | TokenKind::KwType | TokenKind::KwPub) {
                // A new item: the block was never closed
                break;
            }
            let stmt_start = self.pos;
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(Abort) => {
                    if self.pos == stmt_start {
                        self.advance();
                    }
                    self.synchronize_stmt();
                }
            }
        }

        self.no_struct_literal = saved;
        self.expect(TokenKind::RBrace)?;
        Ok(Block {
            stmts,
            span: start.to(self.prev_span()),
        })
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        match self.peek() {
            TokenKind::KwLet => self.parse_let(),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwWhile => {
                self.advance();
                let cond = self.parse_header_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::While { cond, body })
            }
            TokenKind::KwFor => {
                self.advance();
                let var = self.expect_ident("loop variable")?;
                self.expect(TokenKind::KwIn)?;
                let iter = self.parse_header_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::For { var, iter, body })
            }
            TokenKind::KwReturn => {
                let start = self.advance().span;
                let value = if self.at(&TokenKind::Semicolon) || self.at(&TokenKind::RBrace) {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Return {
                    value,
                    span: start.to(self.prev_span()),
                })
            }
            TokenKind::KwBreak => {
                let span = self.advance().span;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Break(span))
            }
            TokenKind::KwContinue => {
                let span = self.advance().span;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Continue(span))
            }
            TokenKind::KwThrow => {
                let start = self.advance().span;
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semicolon)?;
                Ok(Stmt::Throw {
                    value,
                    span: start.to(self.prev_span()),
                })
            }
            _ => {
                let expr = self.parse_expr()?;
                if self.eat(&TokenKind::Eq) {
                    let value = self.parse_expr()?;
                    self.expect(TokenKind::Semicolon)?;
                    let span = expr.span.to(value.span);
                    Ok(Stmt::Assign {
                        target: expr,
                        value,
                        span,
                    })
                } else {
                    self.expect(TokenKind::Semicolon)?;
                    Ok(Stmt::Expr(expr))
                }
            }
        }
    }

    fn parse_let(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::KwLet)?;
        let mutable = self.eat(&TokenKind::KwMut);
        let name = self.expect_ident("variable name")?;
        let ty = if self.eat(&TokenKind::Colon) {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        self.expect(TokenKind::Eq)?;
        let value = self.parse_expr()?;
        self.expect(TokenKind::Semicolon)?;
        Ok(Stmt::Let {
            name,
            mutable,
            ty,
            value,
        })
    }

    fn parse_if(&mut self) -> PResult<Stmt> {
        self.expect(TokenKind::KwIf)?;
        let mut branches = Vec::new();
        let cond = self.parse_header_expr()?;
        let body = self.parse_block()?;
        branches.push((cond, body));

        let mut else_block = None;
        loop {
            if self.eat(&TokenKind::KwElif) {
                let cond = self.parse_header_expr()?;
                let body = self.parse_block()?;
                branches.push((cond, body));
            } else if self.eat(&TokenKind::KwElse) {
                else_block = Some(self.parse_block()?);
                break;
            } else {
                break;
            }
        }

        Ok(Stmt::If {
            branches,
            else_block,
        })
    }

    /// Expression in an `if`/`while`/`for` header
    fn parse_header_expr(&mut self) -> PResult<Expr> {
        let saved = std::mem::replace(&mut self.no_struct_literal, true);
        let result = self.parse_expr();
        self.no_struct_literal = saved;
        result
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> PResult<Expr> {
        self.nested(|p| p.parse_binary(1))
    }

    fn binary_op(kind: &TokenKind) -> Option<(BinOp, u8)> {
        let op = match kind {
            TokenKind::Or => (BinOp::Or, 1),
            TokenKind::And => (BinOp::And, 2),
            TokenKind::EqEq => (BinOp::Eq, 3),
            TokenKind::Neq => (BinOp::Ne, 3),
            TokenKind::Lt => (BinOp::Lt, 4),
            TokenKind::Le => (BinOp::Le, 4),
            TokenKind::Gt => (BinOp::Gt, 4),
            TokenKind::Ge => (BinOp::Ge, 4),
            TokenKind::DotDot => (BinOp::Range, 5),
            TokenKind::Plus => (BinOp::Add, 6),
            TokenKind::Minus => (BinOp::Sub, 6),
            TokenKind::Star => (BinOp::Mul, 7),
            TokenKind::Slash => (BinOp::Div, 7),
            TokenKind::Percent => (BinOp::Rem, 7),
            _ => return None,
        };
        Some(op)
    }

    fn parse_binary(
        &mut self,
        min_prec: u8,
    ) -> PResult<Expr> {
        let depth = self.depth;
        let result = self.fold_binary(min_prec);
        self.depth = depth;
        result
    }

    /// Each operator folded in nests the left operand one level deeper
    fn fold_binary(
        &mut self,
        min_prec: u8,
    ) -> PResult<Expr> {
        let mut lhs = self.parse_unary()?;

        while let Some((op, prec)) = Self::binary_op(self.peek()) {
            if prec < min_prec {
                break;
            }
            self.descend()?;
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            let span = lhs.span.to(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let op = match self.peek() {
            TokenKind::Minus => UnOp::Neg,
            TokenKind::Not => UnOp::Not,
            _ => return self.parse_postfix(),
        };
        let start = self.advance().span;
        let operand = self.nested(Self::parse_unary)?;
        let span = start.to(operand.span);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let depth = self.depth;
        let result = self.fold_postfix();
        self.depth = depth;
        result
    }

    fn fold_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;

        loop {
            if matches!(self.peek(), TokenKind::Dot | TokenKind::LBracket) {
                self.descend()?;
            }
            if self.eat(&TokenKind::Dot) {
                let name = self.expect_ident("field or method name")?;
                if self.at(&TokenKind::LParen) {
                    let args = self.parse_args()?;
                    let span = expr.span.to(self.prev_span());
                    expr = Expr::new(
                        ExprKind::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                        },
                        span,
                    );
                } else {
                    let span = expr.span.to(name.span);
                    expr = Expr::new(
                        ExprKind::Field {
                            object: Box::new(expr),
                            field: name,
                        },
                        span,
                    );
                }
            } else if self.eat(&TokenKind::LBracket) {
                let saved = std::mem::replace(&mut self.no_struct_literal, false);
                let index = self.parse_expr();
                self.no_struct_literal = saved;
                let index = index?;
                self.expect(TokenKind::RBracket)?;
                let span = expr.span.to(self.prev_span());
                expr = Expr::new(
                    ExprKind::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let saved = std::mem::replace(&mut self.no_struct_literal, false);
        let result = self.parse_comma_list(TokenKind::RParen);
        self.no_struct_literal = saved;
        result
    }

    /// Comma separated expressions up to and including `close`
    fn parse_comma_list(
        &mut self,
        close: TokenKind,
    ) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.at(&close) {
            items.push(self.parse_expr()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.current();
        let span = token.span;

        let kind = match &token.kind {
            TokenKind::IntLiteral(n) => {
                self.advance();
                ExprKind::Int(*n)
            }
            TokenKind::FloatLiteral(x) => {
                self.advance();
                ExprKind::Float(*x)
            }
            TokenKind::BoolLiteral(b) => {
                self.advance();
                ExprKind::Bool(*b)
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                ExprKind::Str(s.clone())
            }
            TokenKind::KwSelf => {
                self.advance();
                ExprKind::SelfRef
            }
            TokenKind::LParen => {
                self.advance();
                let saved = std::mem::replace(&mut self.no_struct_literal, false);
                let inner = self.parse_expr();
                self.no_struct_literal = saved;
                let inner = inner?;
                self.expect(TokenKind::RParen)?;
                return Ok(Expr::new(inner.kind, span.to(self.prev_span())));
            }
            TokenKind::LBracket => {
                self.advance();
                let saved = std::mem::replace(&mut self.no_struct_literal, false);
                let items = self.parse_comma_list(TokenKind::RBracket);
                self.no_struct_literal = saved;
                return Ok(Expr::new(ExprKind::List(items?), span.to(self.prev_span())));
            }
            TokenKind::Identifier(name) => {
                let ident = Ident {
                    name: name.clone(),
                    span,
                };
                self.advance();
                match self.peek() {
                    TokenKind::LParen => {
                        let args = self.parse_args()?;
                        return Ok(Expr::new(
                            ExprKind::Call {
                                callee: ident,
                                args,
                            },
                            span.to(self.prev_span()),
                        ));
                    }
                    TokenKind::LBrace if !self.no_struct_literal => {
                        return self.parse_struct_literal(ident);
                    }
                    _ => ExprKind::Var(ident.name),
                }
            }
            _ => return Err(self.error_here("expression")),
        };

        Ok(Expr::new(kind, span))
    }

    fn parse_struct_literal(
        &mut self,
        ty: Ident,
    ) -> PResult<Expr> {
        self.expect(TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.at(&TokenKind::RBrace) {
            let name = self.expect_ident("field name")?;
            self.expect(TokenKind::Colon)?;
            let value = self.parse_expr()?;
            fields.push((name, value));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace)?;
        let span = ty.span.to(self.prev_span());
        Ok(Expr::new(ExprKind::StructLit { ty, fields }, span))
    }
}
