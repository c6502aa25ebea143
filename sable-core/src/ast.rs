//! The abstract syntax tree.
//!
//! Two closed node families, [`Expr`] and [`Stmt`], each a tagged variant
//! so every visitor site is checked for exhaustiveness. Every node carries
//! a span. The tree is strictly hierarchical: parents own children, the
//! parser never produces cycles, and the generator consumes it read-only.

use crate::span::Span;
use crate::types::{FloatWidth, IntWidth};

/// A name together with where it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

/// A parsed type annotation. Resolution to a [`crate::types::TypeDescriptor`]
/// happens in the generator, where class/enum names are in scope.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub kind: TypeExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeExprKind {
    Int { width: IntWidth, signed: bool },
    Float { width: FloatWidth },
    Bool,
    Str,
    Void,
    /// A class or enum name, resolved against the symbol table.
    Named(String),
    Reference(Box<TypeExpr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Arithmetic negation `-x`.
    Neg,
    /// Logical negation `not x`.
    Not,
    /// Dereference `*x`.
    Deref,
    /// Address-of `&x`.
    AddrOf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Identifier(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `base.member` — static or instance access, decided by the generator.
    Dot {
        base: Box<Expr>,
        member: Ident,
    },
    /// `value as type`.
    Cast {
        value: Box<Expr>,
        ty: TypeExpr,
    },
    /// `value is type`.
    TypeTest {
        value: Box<Expr>,
        ty: TypeExpr,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    /// Stands in for the condition of a trailing `else` clause.
    ElseMarker,
}

/// The kind of assignment operator used in an assignment statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

/// A `NEWLINE INDENT statement* DEDENT` region (or the module root).
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

/// One `if`/`else if`/`else` clause. The trailing `else` clause carries an
/// [`ExprKind::ElseMarker`] condition.
#[derive(Debug, Clone, PartialEq)]
pub struct IfClause {
    pub condition: Expr,
    pub block: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: Ident,
    pub ty: Option<TypeExpr>,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: Ident,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub body: Block,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternFuncDecl {
    pub name: Ident,
    pub params: Vec<Param>,
    /// Trailing `...`; always the last parameter position.
    pub variadic: bool,
    pub ret: Option<TypeExpr>,
    pub span: Span,
}

/// A class field: `var`/`let` inside a class body.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: Ident,
    pub mutable: bool,
    pub ty: Option<TypeExpr>,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: Ident,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FuncDecl>,
    pub exported: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: Ident,
    pub variants: Vec<Ident>,
    pub exported: bool,
    pub span: Span,
}

/// What an import statement names: a standard-library module or a file
/// path relative to the importing file.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportTarget {
    Std(String),
    Path(String),
}

/// Items pulled in by a `from ... import ...` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportItems {
    /// `from x import *`
    All,
    /// `from x import a, b as c` — `(name, optional rename)`.
    List(Vec<(Ident, Option<Ident>)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportKind {
    /// `import x` / `import x as y`.
    Module { alias: Option<Ident> },
    /// `from x import ...`.
    Selective { items: ImportItems },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportStmt {
    pub target: ImportTarget,
    pub kind: ImportKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    VarDecl {
        name: Ident,
        mutable: bool,
        ty: Option<TypeExpr>,
        init: Option<Expr>,
    },
    Assign {
        target: Expr,
        op: AssignOp,
        value: Expr,
    },
    If {
        clauses: Vec<IfClause>,
    },
    While {
        condition: Expr,
        block: Block,
    },
    /// Parsed but rejected by the generator; kept so the syntax is
    /// reserved.
    For {
        binding: Ident,
        iterable: Expr,
        block: Block,
    },
    FuncDecl(FuncDecl),
    ExternFuncDecl(ExternFuncDecl),
    Import(ImportStmt),
    Class(ClassDecl),
    Enum(EnumDecl),
    Break,
    Continue,
    Return(Option<Expr>),
    Defer(Box<Stmt>),
    Expression(Expr),
}

impl Stmt {
    /// Whether this statement may appear at module top level.
    ///
    /// Statement-level control flow is restricted to function bodies.
    pub fn allowed_at_top_level(&self) -> bool {
        !matches!(
            self.kind,
            StmtKind::If { .. }
                | StmtKind::While { .. }
                | StmtKind::For { .. }
                | StmtKind::Break
                | StmtKind::Continue
        )
    }
}
