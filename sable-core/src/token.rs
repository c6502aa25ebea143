//! Tokens produced by the lexer.
//!
//! A token is immutable once produced: its lexeme (the matched source
//! text), its kind, and its span. The three structural kinds `Newline`,
//! `Indent`, and `Dedent` never correspond to visible source characters;
//! they are synthesized from line breaks and leading whitespace.

use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    Integer,
    Float,
    Str,
    True,
    False,

    Identifier,

    // Keywords
    Var,
    Let,
    Func,
    Extern,
    Class,
    Enum,
    Import,
    From,
    Export,
    As,
    Is,
    And,
    Or,
    Not,
    If,
    Else,
    /// `else if`, merged by the lexer from an `Else` followed by `if`.
    ElseIf,
    While,
    For,
    In,
    Break,
    Continue,
    Return,
    Defer,

    // Type keywords; the lexeme distinguishes widths (`int`, `int32`, ...).
    IntType,
    UintType,
    FloatType,
    BoolType,
    StrType,
    VoidType,

    // Operators and punctuation
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    PlusEqual,
    MinusEqual,
    StarEqual,
    SlashEqual,
    Ampersand,
    Arrow,
    Ellipsis,
    Dot,
    Comma,
    Colon,
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,

    // Structural tokens derived from whitespace
    Newline,
    Indent,
    Dedent,

    Eof,
}

impl TokenKind {
    /// Operators that make the enclosing statement an assignment.
    pub fn is_assignment(self) -> bool {
        matches!(
            self,
            TokenKind::Equal
                | TokenKind::PlusEqual
                | TokenKind::MinusEqual
                | TokenKind::StarEqual
                | TokenKind::SlashEqual
        )
    }

    pub fn is_type_keyword(self) -> bool {
        matches!(
            self,
            TokenKind::IntType
                | TokenKind::UintType
                | TokenKind::FloatType
                | TokenKind::BoolType
                | TokenKind::StrType
                | TokenKind::VoidType
        )
    }

    /// Human-readable name used in "expected X, found Y" messages.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Integer => "integer literal",
            TokenKind::Float => "float literal",
            TokenKind::Str => "string literal",
            TokenKind::True => "`true`",
            TokenKind::False => "`false`",
            TokenKind::Identifier => "identifier",
            TokenKind::Var => "`var`",
            TokenKind::Let => "`let`",
            TokenKind::Func => "`func`",
            TokenKind::Extern => "`extern`",
            TokenKind::Class => "`class`",
            TokenKind::Enum => "`enum`",
            TokenKind::Import => "`import`",
            TokenKind::From => "`from`",
            TokenKind::Export => "`export`",
            TokenKind::As => "`as`",
            TokenKind::Is => "`is`",
            TokenKind::And => "`and`",
            TokenKind::Or => "`or`",
            TokenKind::Not => "`not`",
            TokenKind::If => "`if`",
            TokenKind::Else => "`else`",
            TokenKind::ElseIf => "`else if`",
            TokenKind::While => "`while`",
            TokenKind::For => "`for`",
            TokenKind::In => "`in`",
            TokenKind::Break => "`break`",
            TokenKind::Continue => "`continue`",
            TokenKind::Return => "`return`",
            TokenKind::Defer => "`defer`",
            TokenKind::IntType
            | TokenKind::UintType
            | TokenKind::FloatType
            | TokenKind::BoolType
            | TokenKind::StrType
            | TokenKind::VoidType => "type name",
            TokenKind::Plus => "`+`",
            TokenKind::Minus => "`-`",
            TokenKind::Star => "`*`",
            TokenKind::Slash => "`/`",
            TokenKind::Percent => "`%`",
            TokenKind::StarStar => "`**`",
            TokenKind::EqualEqual => "`==`",
            TokenKind::BangEqual => "`!=`",
            TokenKind::Less => "`<`",
            TokenKind::LessEqual => "`<=`",
            TokenKind::Greater => "`>`",
            TokenKind::GreaterEqual => "`>=`",
            TokenKind::Equal => "`=`",
            TokenKind::PlusEqual => "`+=`",
            TokenKind::MinusEqual => "`-=`",
            TokenKind::StarEqual => "`*=`",
            TokenKind::SlashEqual => "`/=`",
            TokenKind::Ampersand => "`&`",
            TokenKind::Arrow => "`->`",
            TokenKind::Ellipsis => "`...`",
            TokenKind::Dot => "`.`",
            TokenKind::Comma => "`,`",
            TokenKind::Colon => "`:`",
            TokenKind::LeftParen => "`(`",
            TokenKind::RightParen => "`)`",
            TokenKind::LeftBracket => "`[`",
            TokenKind::RightBracket => "`]`",
            TokenKind::LeftBrace => "`{`",
            TokenKind::RightBrace => "`}`",
            TokenKind::Newline => "end of line",
            TokenKind::Indent => "indent",
            TokenKind::Dedent => "dedent",
            TokenKind::Eof => "end of file",
        }
    }
}

/// A single lexed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// The matched source text. For string literals this is the *unescaped*
    /// content, without the surrounding quotes.
    pub lexeme: String,
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(lexeme: impl Into<String>, kind: TokenKind, span: Span) -> Token {
        Token {
            lexeme: lexeme.into(),
            kind,
            span,
        }
    }
}
