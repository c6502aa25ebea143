//! Parser.
//!
//! Recursive descent over the lexer's token sequence, with the expression
//! grammar layered by precedence (ascending):
//!
//! `or` → `and` → `not`/comparison/`is` → `+ -` → `* / %` → `**` →
//! `as` → unary (`- * & not`) → dot-access/call → term.
//!
//! Blocks are `Newline Indent statement* Dedent`, with the final dedent
//! permitted to be implicit at end of file. There is no error recovery:
//! the first unexpected token stops the unit with an expected-vs-found
//! message on the offending span.

use crate::ast::*;
use crate::error::CoreError;
use crate::span::FileId;
use crate::token::{Token, TokenKind};
use crate::types::{FloatWidth, IntWidth};

/// Parse a whole token sequence into the module root block.
pub fn parse(tokens: Vec<Token>) -> Result<Block, CoreError> {
    Parser::new(tokens).parse_module()
}

/// Convenience for tests and tools: lex and parse a buffer in one step.
pub fn parse_source(file: FileId, source: &str) -> Result<Block, CoreError> {
    parse(crate::lexer::scan(file, source)?)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Parser {
        Parser { tokens, pos: 0 }
    }

    // ------------------------------------------------------------------
    // Token cursor
    // ------------------------------------------------------------------

    fn peek(&self) -> &Token {
        // The lexer guarantees a trailing Eof token.
        self.tokens.get(self.pos).unwrap_or_else(|| {
            self.tokens.last().expect("token stream includes Eof")
        })
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek_kind() == kind {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CoreError> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(kind.describe()))
        }
    }

    fn unexpected(&self, expected: &str) -> CoreError {
        let found = self.peek();
        CoreError::parse(
            format!("expected {expected}, found {}", found.kind.describe()),
            found.span,
        )
    }

    fn ident(&mut self) -> Result<Ident, CoreError> {
        let token = self.expect(TokenKind::Identifier)?;
        Ok(Ident {
            name: token.lexeme,
            span: token.span,
        })
    }

    /// Consume the end of a simple statement: a `Newline`, or nothing at
    /// end of file.
    fn end_statement(&mut self) -> Result<(), CoreError> {
        match self.peek_kind() {
            TokenKind::Newline => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    // ------------------------------------------------------------------
    // Module and blocks
    // ------------------------------------------------------------------

    fn parse_module(mut self) -> Result<Block, CoreError> {
        let start = self.peek().span;
        let mut statements = Vec::new();
        while self.peek_kind() != TokenKind::Eof {
            if self.peek_kind() == TokenKind::Indent {
                return Err(CoreError::parse("unexpected indent", self.peek().span));
            }
            let stmt = self.parse_statement()?;
            if !stmt.allowed_at_top_level() {
                return Err(CoreError::parse(
                    "this statement is not allowed at module top level",
                    stmt.span,
                ));
            }
            statements.push(stmt);
        }
        let span = match (statements.first(), statements.last()) {
            (Some(first), Some(last)) => first.span.join(last.span),
            _ => start,
        };
        Ok(Block { statements, span })
    }

    /// `Newline Indent statement* Dedent`, dedent implicit at end of file.
    fn parse_block(&mut self) -> Result<Block, CoreError> {
        self.expect(TokenKind::Newline)?;
        let open = self.expect(TokenKind::Indent)?;
        let mut statements = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                _ => statements.push(self.parse_statement()?),
            }
        }
        let span = match (statements.first(), statements.last()) {
            (Some(first), Some(last)) => first.span.join(last.span),
            _ => open.span,
        };
        Ok(Block { statements, span })
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Stmt, CoreError> {
        match self.peek_kind() {
            TokenKind::Var => self.parse_var_decl(true),
            TokenKind::Let => self.parse_var_decl(false),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Func => self.parse_func_decl(false),
            TokenKind::Extern => self.parse_extern_func(),
            TokenKind::Export => self.parse_export(),
            TokenKind::Import | TokenKind::From => self.parse_import(),
            TokenKind::Class => self.parse_class(false),
            TokenKind::Enum => self.parse_enum(false),
            TokenKind::Break => {
                let token = self.advance();
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Break,
                    span: token.span,
                })
            }
            TokenKind::Continue => {
                let token = self.advance();
                self.end_statement()?;
                Ok(Stmt {
                    kind: StmtKind::Continue,
                    span: token.span,
                })
            }
            TokenKind::Return => self.parse_return(),
            TokenKind::Defer => self.parse_defer(),
            _ => self.parse_assign_or_expression(),
        }
    }

    fn parse_var_decl(&mut self, mutable: bool) -> Result<Stmt, CoreError> {
        let keyword = self.advance();
        let name = self.ident()?;
        let ty = if self.eat(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.eat(TokenKind::Equal) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        if !mutable && init.is_none() {
            return Err(CoreError::parse(
                "`let` binding requires an initializer",
                keyword.span.join(name.span),
            ));
        }
        if ty.is_none() && init.is_none() {
            return Err(CoreError::parse(
                "variable declaration needs a type annotation or an initializer",
                keyword.span.join(name.span),
            ));
        }
        let end = init
            .as_ref()
            .map(|e| e.span)
            .or_else(|| ty.as_ref().map(|t| t.span))
            .unwrap_or(name.span);
        let span = keyword.span.join(end);
        self.end_statement()?;
        Ok(Stmt {
            kind: StmtKind::VarDecl {
                name,
                mutable,
                ty,
                init,
            },
            span,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, CoreError> {
        let mut clauses = Vec::new();
        let keyword = self.expect(TokenKind::If)?;
        let condition = self.parse_expression()?;
        let block = self.parse_block()?;
        let span = keyword.span.join(block.span);
        clauses.push(IfClause {
            condition,
            block,
            span,
        });

        loop {
            match self.peek_kind() {
                TokenKind::ElseIf => {
                    let keyword = self.advance();
                    let condition = self.parse_expression()?;
                    let block = self.parse_block()?;
                    let span = keyword.span.join(block.span);
                    clauses.push(IfClause {
                        condition,
                        block,
                        span,
                    });
                }
                TokenKind::Else => {
                    let keyword = self.advance();
                    let block = self.parse_block()?;
                    let span = keyword.span.join(block.span);
                    clauses.push(IfClause {
                        condition: Expr {
                            kind: ExprKind::ElseMarker,
                            span: keyword.span,
                        },
                        block,
                        span,
                    });
                    break;
                }
                _ => break,
            }
        }

        let span = clauses
            .first()
            .map(|c| c.span)
            .into_iter()
            .chain(clauses.last().map(|c| c.span))
            .reduce(|a, b| a.join(b))
            .unwrap_or(keyword.span);
        Ok(Stmt {
            kind: StmtKind::If { clauses },
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::While)?;
        let condition = self.parse_expression()?;
        let block = self.parse_block()?;
        let span = keyword.span.join(block.span);
        Ok(Stmt {
            kind: StmtKind::While { condition, block },
            span,
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::For)?;
        let binding = self.ident()?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expression()?;
        let block = self.parse_block()?;
        let span = keyword.span.join(block.span);
        Ok(Stmt {
            kind: StmtKind::For {
                binding,
                iterable,
                block,
            },
            span,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::Return)?;
        let value = if matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Eof) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        let span = value
            .as_ref()
            .map(|v| keyword.span.join(v.span))
            .unwrap_or(keyword.span);
        self.end_statement()?;
        Ok(Stmt {
            kind: StmtKind::Return(value),
            span,
        })
    }

    fn parse_defer(&mut self) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::Defer)?;
        let inner = self.parse_assign_or_expression()?;
        let span = keyword.span.join(inner.span);
        Ok(Stmt {
            kind: StmtKind::Defer(Box::new(inner)),
            span,
        })
    }

    fn parse_export(&mut self) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::Export)?;
        match self.peek_kind() {
            TokenKind::Func => self.parse_func_decl(true),
            TokenKind::Class => self.parse_class(true),
            TokenKind::Enum => self.parse_enum(true),
            _ => Err(CoreError::parse(
                "`export` must be followed by a function, class, or enum declaration",
                keyword.span.join(self.peek().span),
            )),
        }
    }

    fn parse_func_decl(&mut self, exported: bool) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::Func)?;
        let name = self.ident()?;
        let (params, variadic) = self.parse_params()?;
        if variadic {
            return Err(CoreError::parse(
                "variadic marker is only allowed on extern functions",
                name.span,
            ));
        }
        let ret = if self.eat(TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let body = self.parse_block()?;
        let span = keyword.span.join(body.span);
        Ok(Stmt {
            kind: StmtKind::FuncDecl(FuncDecl {
                name,
                params,
                ret,
                body,
                exported,
                span,
            }),
            span,
        })
    }

    fn parse_extern_func(&mut self) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::Extern)?;
        self.expect(TokenKind::Func)?;
        let name = self.ident()?;
        let (params, variadic) = self.parse_params()?;
        let ret = if self.eat(TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let end = ret.as_ref().map(|t| t.span).unwrap_or(name.span);
        let span = keyword.span.join(end);
        self.end_statement()?;
        Ok(Stmt {
            kind: StmtKind::ExternFuncDecl(ExternFuncDecl {
                name,
                params,
                variadic,
                ret,
                span,
            }),
            span,
        })
    }

    /// Parameter list inside parentheses. Returns the parameters and
    /// whether a trailing `...` was present; the variadic marker must be
    /// the last entry.
    fn parse_params(&mut self) -> Result<(Vec<Param>, bool), CoreError> {
        self.expect(TokenKind::LeftParen)?;
        let mut params = Vec::new();
        let mut variadic = false;
        if !self.eat(TokenKind::RightParen) {
            loop {
                if self.peek_kind() == TokenKind::Ellipsis {
                    let marker = self.advance();
                    variadic = true;
                    if self.peek_kind() != TokenKind::RightParen {
                        return Err(CoreError::parse(
                            "`...` must be the last parameter",
                            marker.span,
                        ));
                    }
                    self.advance();
                    break;
                }
                let name = self.ident()?;
                let ty = if self.eat(TokenKind::Colon) {
                    Some(self.parse_type()?)
                } else {
                    None
                };
                let default = if self.eat(TokenKind::Equal) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                if ty.is_none() && default.is_none() {
                    return Err(CoreError::parse(
                        format!(
                            "parameter `{}` needs a type annotation or a default value",
                            name.name
                        ),
                        name.span,
                    ));
                }
                let end = default
                    .as_ref()
                    .map(|d| d.span)
                    .or_else(|| ty.as_ref().map(|t| t.span))
                    .unwrap_or(name.span);
                params.push(Param {
                    span: name.span.join(end),
                    name,
                    ty,
                    default,
                });
                if self.eat(TokenKind::Comma) {
                    continue;
                }
                self.expect(TokenKind::RightParen)?;
                break;
            }
        }
        Ok((params, variadic))
    }

    fn parse_class(&mut self, exported: bool) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::Class)?;
        let name = self.ident()?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Var | TokenKind::Let => {
                    fields.push(self.parse_field()?);
                }
                TokenKind::Func => {
                    let stmt = self.parse_func_decl(false)?;
                    match stmt.kind {
                        StmtKind::FuncDecl(decl) => methods.push(decl),
                        _ => unreachable!("parse_func_decl produces FuncDecl"),
                    }
                }
                TokenKind::Extern => {
                    return Err(CoreError::parse(
                        "extern functions are not allowed inside a class body",
                        self.peek().span,
                    ));
                }
                TokenKind::Export => {
                    return Err(CoreError::parse(
                        "`export` is not allowed inside a class body",
                        self.peek().span,
                    ));
                }
                _ => {
                    return Err(self.unexpected("a field or method declaration"));
                }
            }
        }

        let end = methods
            .last()
            .map(|m| m.span)
            .or_else(|| fields.last().map(|f| f.span))
            .unwrap_or(name.span);
        let span = keyword.span.join(end);
        Ok(Stmt {
            kind: StmtKind::Class(ClassDecl {
                name,
                fields,
                methods,
                exported,
                span,
            }),
            span,
        })
    }

    fn parse_field(&mut self) -> Result<FieldDecl, CoreError> {
        let keyword = self.advance();
        let mutable = keyword.kind == TokenKind::Var;
        let name = self.ident()?;
        let ty = if self.eat(TokenKind::Colon) {
            Some(self.parse_type()?)
        } else {
            None
        };
        let init = if self.eat(TokenKind::Equal) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        if ty.is_none() && init.is_none() {
            return Err(CoreError::parse(
                format!(
                    "field `{}` needs a type annotation or an initializer",
                    name.name
                ),
                name.span,
            ));
        }
        let end = init
            .as_ref()
            .map(|e| e.span)
            .or_else(|| ty.as_ref().map(|t| t.span))
            .unwrap_or(name.span);
        let span = keyword.span.join(end);
        self.end_statement()?;
        Ok(FieldDecl {
            name,
            mutable,
            ty,
            init,
            span,
        })
    }

    fn parse_enum(&mut self, exported: bool) -> Result<Stmt, CoreError> {
        let keyword = self.expect(TokenKind::Enum)?;
        let name = self.ident()?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;
        let mut variants = Vec::new();
        loop {
            match self.peek_kind() {
                TokenKind::Dedent => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => break,
                TokenKind::Identifier => {
                    variants.push(self.ident()?);
                    self.end_statement()?;
                }
                _ => return Err(self.unexpected("an enum variant name")),
            }
        }
        if variants.is_empty() {
            return Err(CoreError::parse(
                format!("enum `{}` has no variants", name.name),
                keyword.span.join(name.span),
            ));
        }
        let end = variants.last().map(|v| v.span).unwrap_or(name.span);
        let span = keyword.span.join(end);
        Ok(Stmt {
            kind: StmtKind::Enum(EnumDecl {
                name,
                variants,
                exported,
                span,
            }),
            span,
        })
    }

    fn parse_import(&mut self) -> Result<Stmt, CoreError> {
        if self.peek_kind() == TokenKind::From {
            let keyword = self.advance();
            let target = self.parse_import_target()?;
            self.expect(TokenKind::Import)?;
            let items = if self.peek_kind() == TokenKind::Star {
                self.advance();
                ImportItems::All
            } else {
                let mut list = Vec::new();
                loop {
                    let name = self.ident()?;
                    let rename = if self.eat(TokenKind::As) {
                        Some(self.ident()?)
                    } else {
                        None
                    };
                    list.push((name, rename));
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                ImportItems::List(list)
            };
            let span = keyword.span.join(self.peek().span);
            self.end_statement()?;
            return Ok(Stmt {
                kind: StmtKind::Import(ImportStmt {
                    target,
                    kind: ImportKind::Selective { items },
                    span,
                }),
                span,
            });
        }

        let keyword = self.expect(TokenKind::Import)?;
        let target = self.parse_import_target()?;
        let alias = if self.eat(TokenKind::As) {
            Some(self.ident()?)
        } else {
            None
        };
        let end = alias.as_ref().map(|a| a.span).unwrap_or(keyword.span);
        let span = keyword.span.join(end);
        self.end_statement()?;
        Ok(Stmt {
            kind: StmtKind::Import(ImportStmt {
                target,
                kind: ImportKind::Module { alias },
                span,
            }),
            span,
        })
    }

    fn parse_import_target(&mut self) -> Result<ImportTarget, CoreError> {
        match self.peek_kind() {
            TokenKind::Identifier => {
                let name = self.ident()?;
                Ok(ImportTarget::Std(name.name))
            }
            TokenKind::Str => {
                let token = self.advance();
                Ok(ImportTarget::Path(token.lexeme))
            }
            _ => Err(self.unexpected("a module name or a file path string")),
        }
    }

    /// Assignment vs. expression statement. The decision scans forward
    /// within the current logical line for an assignment operator at
    /// bracket depth zero; the scan never consumes tokens.
    fn parse_assign_or_expression(&mut self) -> Result<Stmt, CoreError> {
        if self.line_has_assignment() {
            let target = self.parse_expression()?;
            if !is_assignable(&target) {
                return Err(CoreError::parse(
                    "invalid assignment target",
                    target.span,
                ));
            }
            let op = match self.peek_kind() {
                TokenKind::Equal => AssignOp::Set,
                TokenKind::PlusEqual => AssignOp::Add,
                TokenKind::MinusEqual => AssignOp::Sub,
                TokenKind::StarEqual => AssignOp::Mul,
                TokenKind::SlashEqual => AssignOp::Div,
                _ => return Err(self.unexpected("an assignment operator")),
            };
            self.advance();
            let value = self.parse_expression()?;
            let span = target.span.join(value.span);
            self.end_statement()?;
            return Ok(Stmt {
                kind: StmtKind::Assign { target, op, value },
                span,
            });
        }

        let expr = self.parse_expression()?;
        let span = expr.span;
        self.end_statement()?;
        Ok(Stmt {
            kind: StmtKind::Expression(expr),
            span,
        })
    }

    fn line_has_assignment(&self) -> bool {
        let mut depth = 0usize;
        for token in &self.tokens[self.pos..] {
            match token.kind {
                TokenKind::Newline | TokenKind::Eof => return false,
                TokenKind::LeftParen | TokenKind::LeftBracket | TokenKind::LeftBrace => depth += 1,
                TokenKind::RightParen | TokenKind::RightBracket | TokenKind::RightBrace => {
                    depth = depth.saturating_sub(1)
                }
                kind if kind.is_assignment() && depth == 0 => return true,
                _ => {}
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    fn parse_type(&mut self) -> Result<TypeExpr, CoreError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ampersand => {
                self.advance();
                let inner = self.parse_type()?;
                let span = token.span.join(inner.span);
                Ok(TypeExpr {
                    kind: TypeExprKind::Reference(Box::new(inner)),
                    span,
                })
            }
            TokenKind::IntType | TokenKind::UintType => {
                self.advance();
                let signed = token.kind == TokenKind::IntType;
                let width = match token.lexeme.as_str() {
                    "int8" | "uint8" => IntWidth::W8,
                    "int16" | "uint16" => IntWidth::W16,
                    "int32" | "uint32" => IntWidth::W32,
                    _ => IntWidth::W64,
                };
                Ok(TypeExpr {
                    kind: TypeExprKind::Int { width, signed },
                    span: token.span,
                })
            }
            TokenKind::FloatType => {
                self.advance();
                let width = if token.lexeme == "float32" {
                    FloatWidth::W32
                } else {
                    FloatWidth::W64
                };
                Ok(TypeExpr {
                    kind: TypeExprKind::Float { width },
                    span: token.span,
                })
            }
            TokenKind::BoolType => {
                self.advance();
                Ok(TypeExpr {
                    kind: TypeExprKind::Bool,
                    span: token.span,
                })
            }
            TokenKind::StrType => {
                self.advance();
                Ok(TypeExpr {
                    kind: TypeExprKind::Str,
                    span: token.span,
                })
            }
            TokenKind::VoidType => {
                self.advance();
                Ok(TypeExpr {
                    kind: TypeExprKind::Void,
                    span: token.span,
                })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(TypeExpr {
                    kind: TypeExprKind::Named(token.lexeme),
                    span: token.span,
                })
            }
            _ => Err(self.unexpected("a type")),
        }
    }

    // ------------------------------------------------------------------
    // Expressions, by ascending precedence
    // ------------------------------------------------------------------

    fn parse_expression(&mut self) -> Result<Expr, CoreError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, CoreError> {
        let mut lhs = self.parse_and()?;
        while self.eat(TokenKind::Or) {
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CoreError> {
        let mut lhs = self.parse_comparison()?;
        while self.eat(TokenKind::And) {
            let rhs = self.parse_comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    /// The `not` / comparison / `is` layer.
    ///
    /// A prefix `not` at this level negates a whole comparison
    /// (`not a == b` reads as `not (a == b)`).
    fn parse_comparison(&mut self) -> Result<Expr, CoreError> {
        if self.peek_kind() == TokenKind::Not {
            let keyword = self.advance();
            let operand = self.parse_comparison()?;
            let span = keyword.span.join(operand.span);
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            });
        }

        let mut lhs = self.parse_addition()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::EqualEqual => BinaryOp::Eq,
                TokenKind::BangEqual => BinaryOp::Ne,
                TokenKind::Less => BinaryOp::Lt,
                TokenKind::LessEqual => BinaryOp::Le,
                TokenKind::Greater => BinaryOp::Gt,
                TokenKind::GreaterEqual => BinaryOp::Ge,
                TokenKind::Is => {
                    self.advance();
                    let ty = self.parse_type()?;
                    let span = lhs.span.join(ty.span);
                    lhs = Expr {
                        kind: ExprKind::TypeTest {
                            value: Box::new(lhs),
                            ty,
                        },
                        span,
                    };
                    continue;
                }
                _ => break,
            };
            self.advance();
            let rhs = self.parse_addition()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_addition(&mut self) -> Result<Expr, CoreError> {
        let mut lhs = self.parse_multiplication()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplication()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplication(&mut self) -> Result<Expr, CoreError> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_power()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    /// `**` is right-associative.
    fn parse_power(&mut self) -> Result<Expr, CoreError> {
        let lhs = self.parse_cast()?;
        if self.eat(TokenKind::StarStar) {
            let rhs = self.parse_power()?;
            return Ok(binary(BinaryOp::Pow, lhs, rhs));
        }
        Ok(lhs)
    }

    fn parse_cast(&mut self) -> Result<Expr, CoreError> {
        let mut value = self.parse_unary()?;
        while self.eat(TokenKind::As) {
            let ty = self.parse_type()?;
            let span = value.span.join(ty.span);
            value = Expr {
                kind: ExprKind::Cast {
                    value: Box::new(value),
                    ty,
                },
                span,
            };
        }
        Ok(value)
    }

    fn parse_unary(&mut self) -> Result<Expr, CoreError> {
        let op = match self.peek_kind() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Star => UnaryOp::Deref,
            TokenKind::Ampersand => UnaryOp::AddrOf,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let token = self.advance();
        let operand = self.parse_unary()?;
        let span = token.span.join(operand.span);
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    /// Dot-access and calls bind tightest after terms.
    fn parse_postfix(&mut self) -> Result<Expr, CoreError> {
        let mut expr = self.parse_term()?;
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    self.advance();
                    let member = self.ident()?;
                    let span = expr.span.join(member.span);
                    expr = Expr {
                        kind: ExprKind::Dot {
                            base: Box::new(expr),
                            member,
                        },
                        span,
                    };
                }
                TokenKind::LeftParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.eat(TokenKind::RightParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if self.eat(TokenKind::Comma) {
                                continue;
                            }
                            self.expect(TokenKind::RightParen)?;
                            break;
                        }
                    }
                    let end = self.tokens[self.pos - 1].span;
                    let span = expr.span.join(end);
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, CoreError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Integer => {
                self.advance();
                let digits = token.lexeme.replace('_', "");
                let value = digits.parse::<i64>().map_err(|_| {
                    CoreError::parse("integer literal out of range", token.span)
                })?;
                Ok(Expr {
                    kind: ExprKind::Integer(value),
                    span: token.span,
                })
            }
            TokenKind::Float => {
                self.advance();
                let digits = token.lexeme.replace('_', "");
                let value = digits.parse::<f64>().map_err(|_| {
                    CoreError::parse("malformed float literal", token.span)
                })?;
                Ok(Expr {
                    kind: ExprKind::Float(value),
                    span: token.span,
                })
            }
            TokenKind::Str => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Str(token.lexeme),
                    span: token.span,
                })
            }
            TokenKind::True | TokenKind::False => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Bool(token.kind == TokenKind::True),
                    span: token.span,
                })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr {
                    kind: ExprKind::Identifier(token.lexeme),
                    span: token.span,
                })
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                let close = self.expect(TokenKind::RightParen)?;
                Ok(Expr {
                    kind: inner.kind,
                    span: token.span.join(close.span),
                })
            }
            _ => Err(self.unexpected("an expression")),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span.join(rhs.span);
    Expr {
        kind: ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    }
}

/// Valid assignment targets: identifiers, dot-access, dereference.
fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr.kind,
        ExprKind::Identifier(_)
            | ExprKind::Dot { .. }
            | ExprKind::Unary {
                op: UnaryOp::Deref,
                ..
            }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Block {
        parse_source(FileId(0), source).expect("parse")
    }

    fn parse_err(source: &str) -> CoreError {
        parse_source(FileId(0), source).expect_err("expected parse error")
    }

    #[test]
    fn three_statement_module_parses_to_three_nodes() {
        let root = parse_ok("var y: int = 100\ny = 101\nexit(y)\n");
        assert_eq!(root.statements.len(), 3);
        assert!(matches!(root.statements[0].kind, StmtKind::VarDecl { .. }));
        assert!(matches!(root.statements[1].kind, StmtKind::Assign { .. }));
        match &root.statements[2].kind {
            StmtKind::Expression(expr) => {
                assert!(matches!(expr.kind, ExprKind::Call { .. }))
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn precedence_orders_arithmetic_below_comparison() {
        let root = parse_ok("ok = 1 + 2 * 3 == 7\n");
        let StmtKind::Assign { value, .. } = &root.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, lhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Eq);
        let ExprKind::Binary { op: add, rhs, .. } = &lhs.kind else {
            panic!("expected nested binary");
        };
        assert_eq!(*add, BinaryOp::Add);
        assert!(matches!(
            rhs.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn power_is_right_associative_and_tighter_than_mul() {
        let root = parse_ok("x = 2 * 3 ** 2 ** 2\n");
        let StmtKind::Assign { value, .. } = &root.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Mul);
        let ExprKind::Binary { op: pow, rhs: inner, .. } = &rhs.kind else {
            panic!("expected power");
        };
        assert_eq!(*pow, BinaryOp::Pow);
        assert!(matches!(
            inner.kind,
            ExprKind::Binary {
                op: BinaryOp::Pow,
                ..
            }
        ));
    }

    #[test]
    fn cast_binds_tighter_than_power() {
        let root = parse_ok("x = y as int ** 2\n");
        let StmtKind::Assign { value, .. } = &root.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, lhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinaryOp::Pow);
        assert!(matches!(lhs.kind, ExprKind::Cast { .. }));
    }

    #[test]
    fn not_negates_a_whole_comparison() {
        let root = parse_ok("x = not a == b\n");
        let StmtKind::Assign { value, .. } = &root.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Unary { op, operand } = &value.kind else {
            panic!("expected unary, got {:?}", value.kind);
        };
        assert_eq!(*op, UnaryOp::Not);
        assert!(matches!(
            operand.kind,
            ExprKind::Binary {
                op: BinaryOp::Eq,
                ..
            }
        ));
    }

    #[test]
    fn dot_access_chains_with_calls() {
        let root = parse_ok("v = a.b(1).c\n");
        let StmtKind::Assign { value, .. } = &root.statements[0].kind else {
            panic!("expected assignment");
        };
        let ExprKind::Dot { base, member } = &value.kind else {
            panic!("expected dot");
        };
        assert_eq!(member.name, "c");
        assert!(matches!(base.kind, ExprKind::Call { .. }));
    }

    #[test]
    fn if_else_if_else_collects_clauses() {
        let source = "func f(a: int)\n    if a == 1\n        g()\n    else if a == 2\n        g()\n    else\n        g()\n";
        let root = parse_ok(source);
        let StmtKind::FuncDecl(decl) = &root.statements[0].kind else {
            panic!("expected func");
        };
        let StmtKind::If { clauses } = &decl.body.statements[0].kind else {
            panic!("expected if");
        };
        assert_eq!(clauses.len(), 3);
        assert!(matches!(clauses[2].condition.kind, ExprKind::ElseMarker));
    }

    #[test]
    fn control_flow_is_rejected_at_top_level() {
        let err = parse_err("if a\n    b = 1\n");
        assert!(err.to_string().contains("top level"), "got: {err}");
        let err = parse_err("while a\n    b = 1\n");
        assert!(err.to_string().contains("top level"));
    }

    #[test]
    fn let_requires_an_initializer() {
        let err = parse_err("let x: int\n");
        assert!(err.to_string().contains("initializer"));
    }

    #[test]
    fn var_requires_type_or_initializer() {
        let err = parse_err("var x\n");
        assert!(err.to_string().contains("type annotation or an initializer"));
    }

    #[test]
    fn parameter_without_type_or_default_is_rejected() {
        let err = parse_err("func f(a)\n    return\n");
        assert!(err.to_string().contains("parameter `a`"));
    }

    #[test]
    fn defaulted_parameter_without_type_is_accepted() {
        let root = parse_ok("func f(a: int, b = 2)\n    g()\n");
        let StmtKind::FuncDecl(decl) = &root.statements[0].kind else {
            panic!("expected func");
        };
        assert_eq!(decl.params.len(), 2);
        assert!(decl.params[1].ty.is_none());
        assert!(decl.params[1].default.is_some());
    }

    #[test]
    fn variadic_marker_must_be_last() {
        let err = parse_err("extern func f(a: int, ..., b: int)\n");
        assert!(err.to_string().contains("last parameter"));
    }

    #[test]
    fn variadic_is_extern_only() {
        let err = parse_err("func f(a: int, ...)\n    g()\n");
        assert!(err.to_string().contains("extern"));
    }

    #[test]
    fn import_forms_parse() {
        let root = parse_ok(
            "import math as m\nfrom math import min, max as biggest\nfrom \"util.sbl\" import *\n",
        );
        assert_eq!(root.statements.len(), 3);
        let StmtKind::Import(first) = &root.statements[0].kind else {
            panic!("expected import");
        };
        assert_eq!(first.target, ImportTarget::Std("math".into()));
        assert!(matches!(&first.kind, ImportKind::Module { alias: Some(a) } if a.name == "m"));
        let StmtKind::Import(second) = &root.statements[1].kind else {
            panic!("expected import");
        };
        let ImportKind::Selective {
            items: ImportItems::List(items),
        } = &second.kind
        else {
            panic!("expected selective import");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].1.as_ref().unwrap().name, "biggest");
        let StmtKind::Import(third) = &root.statements[2].kind else {
            panic!("expected import");
        };
        assert_eq!(third.target, ImportTarget::Path("util.sbl".into()));
        assert!(matches!(
            &third.kind,
            ImportKind::Selective {
                items: ImportItems::All
            }
        ));
    }

    #[test]
    fn class_body_rejects_extern_members() {
        let err = parse_err("class C\n    extern func f()\n");
        assert!(err.to_string().contains("extern"));
    }

    #[test]
    fn class_body_rejects_export() {
        let err = parse_err("class C\n    export func f()\n        g()\n");
        assert!(err.to_string().contains("export"));
    }

    #[test]
    fn class_collects_fields_and_methods() {
        let source = "class Point\n    var x: int\n    var y: int\n    func new(x: int, y: int)\n        self.x = x\n        self.y = y\n";
        let root = parse_ok(source);
        let StmtKind::Class(decl) = &root.statements[0].kind else {
            panic!("expected class");
        };
        assert_eq!(decl.fields.len(), 2);
        assert_eq!(decl.methods.len(), 1);
        assert_eq!(decl.methods[0].name.name, "new");
    }

    #[test]
    fn enum_parses_flat_variant_list() {
        let root = parse_ok("enum Color\n    Red\n    Green\n    Blue\n");
        let StmtKind::Enum(decl) = &root.statements[0].kind else {
            panic!("expected enum");
        };
        let names: Vec<_> = decl.variants.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["Red", "Green", "Blue"]);
    }

    #[test]
    fn enum_rejects_non_identifier_variants() {
        let err = parse_err("enum Color\n    Red\n    func f()\n");
        assert!(err.to_string().contains("variant"));
    }

    #[test]
    fn assignment_lookahead_ignores_bracketed_operators() {
        // `==` never triggers the assignment parse, and a call with a
        // defaulted-argument expression stays an expression statement.
        let root = parse_ok("f(g(x == 1))\n");
        assert!(matches!(root.statements[0].kind, StmtKind::Expression(_)));
    }

    #[test]
    fn compound_assignment_operators_parse() {
        let root = parse_ok("x += 1\ny *= 2\n");
        let StmtKind::Assign { op, .. } = &root.statements[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(*op, AssignOp::Add);
        let StmtKind::Assign { op, .. } = &root.statements[1].kind else {
            panic!("expected assignment");
        };
        assert_eq!(*op, AssignOp::Mul);
    }

    #[test]
    fn invalid_assignment_target_is_rejected() {
        let err = parse_err("1 + 2 = 3\n");
        assert!(err.to_string().contains("assignment target"));
    }

    #[test]
    fn unexpected_token_reports_expected_and_found() {
        let err = parse_err("var = 3\n");
        let message = err.to_string();
        assert!(message.contains("expected identifier"), "got: {message}");
        assert!(message.contains("`=`"), "got: {message}");
    }

    #[test]
    fn defer_wraps_a_statement() {
        let root = parse_ok("func f()\n    defer cleanup()\n    work()\n");
        let StmtKind::FuncDecl(decl) = &root.statements[0].kind else {
            panic!("expected func");
        };
        assert!(matches!(decl.body.statements[0].kind, StmtKind::Defer(_)));
    }

    #[test]
    fn block_dedent_is_implicit_at_eof() {
        let root = parse_ok("func f()\n    g()");
        assert_eq!(root.statements.len(), 1);
    }

    #[test]
    fn type_test_parses_at_comparison_level() {
        let root = parse_ok("ok = x is int\n");
        let StmtKind::Assign { value, .. } = &root.statements[0].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::TypeTest { .. }));
    }

    #[test]
    fn for_parses_but_is_reserved() {
        let root = parse_ok("func f()\n    for x in xs\n        g(x)\n");
        let StmtKind::FuncDecl(decl) = &root.statements[0].kind else {
            panic!("expected func");
        };
        assert!(matches!(decl.body.statements[0].kind, StmtKind::For { .. }));
    }
}
