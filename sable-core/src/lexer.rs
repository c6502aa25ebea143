//! Lexer.
//!
//! A stateful scanner over one source buffer. Besides the visible tokens it
//! synthesizes the structural `Newline`, `Indent`, and `Dedent` tokens that
//! make the language's block structure explicit for the parser:
//!
//! - a `Newline` is appended when a line break is consumed, and retracted
//!   again if the line turns out to have produced no tokens (blank or
//!   comment-only lines terminate nothing);
//! - leading whitespace at the start of each line is measured twice, once
//!   with tabs expanded to columns and once as a raw character count, and
//!   the two measures are tracked on parallel stacks so that mixed tab and
//!   space indentation is rejected deterministically;
//! - any open `(`/`[`/`{` suppresses all structural tokens, so an
//!   expression may span lines freely inside brackets.
//!
//! The scanner is restartable per buffer but not resumable: the first
//! lexical error aborts the buffer.

use crate::error::CoreError;
use crate::span::{FileId, Span};
use crate::token::{Token, TokenKind};

/// Tab stops used for the column measure of indentation.
const TAB_WIDTH: u32 = 8;

/// Scan one buffer to completion, ending with an `Eof` token.
pub fn scan(file: FileId, source: &str) -> Result<Vec<Token>, CoreError> {
    Lexer::new(file, source).scan_all()
}

struct Lexer<'src> {
    file: FileId,
    source: &'src str,
    bytes: &'src [u8],
    index: usize,
    tokens: Vec<Token>,
    /// Enclosing indentation widths in columns (tab-expanded).
    indent_stack: Vec<u32>,
    /// The same indentation levels measured in raw characters.
    alt_indent_stack: Vec<u32>,
    /// Open bracket depth; structural tokens are suppressed while > 0.
    level: usize,
    /// True while positioned at the start of a physical line whose
    /// indentation has not been processed yet.
    at_line_start: bool,
    /// Whether the current line has produced any token.
    line_has_tokens: bool,
}

impl<'src> Lexer<'src> {
    fn new(file: FileId, source: &'src str) -> Lexer<'src> {
        Lexer {
            file,
            source,
            bytes: source.as_bytes(),
            index: 0,
            tokens: Vec::new(),
            indent_stack: vec![0],
            alt_indent_stack: vec![0],
            level: 0,
            at_line_start: true,
            line_has_tokens: false,
        }
    }

    fn scan_all(mut self) -> Result<Vec<Token>, CoreError> {
        loop {
            if self.at_line_start && self.level == 0 {
                self.handle_line_start()?;
            }
            self.skip_inline_whitespace();

            let Some(ch) = self.peek() else { break };
            let start = self.index as u32;
            match ch {
                b'\n' | b'\r' => {
                    self.consume_newline();
                    self.end_line();
                }
                b'#' => self.skip_comment(),
                b'\\' => self.scan_continuation()?,
                b'"' => self.scan_string(start)?,
                b'0'..=b'9' => self.scan_number(start),
                _ if is_ident_start(ch) => self.scan_ident(start),
                _ => self.scan_operator(start)?,
            }
        }

        // A final line without a trailing line break still terminates its
        // statement.
        if self.line_has_tokens {
            let end = self.index as u32;
            self.push(Token::new("", TokenKind::Newline, self.span_at(end)));
        }
        // Close every block still open at end of input so Indent/Dedent
        // counts balance.
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            self.alt_indent_stack.pop();
            let end = self.index as u32;
            self.tokens
                .push(Token::new("", TokenKind::Dedent, self.span_at(end)));
        }
        let end = self.index as u32;
        self.tokens
            .push(Token::new("", TokenKind::Eof, self.span_at(end)));
        Ok(self.tokens)
    }

    /// Measure the leading whitespace of the line under the cursor and
    /// synthesize `Indent`/`Dedent` tokens. Blank and comment-only lines
    /// are skipped without touching the stacks.
    fn handle_line_start(&mut self) -> Result<(), CoreError> {
        self.at_line_start = false;

        let start = self.index as u32;
        let mut width = 0u32;
        let mut raw = 0u32;
        while let Some(ch) = self.peek() {
            match ch {
                b' ' => width += 1,
                b'\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                _ => break,
            }
            raw += 1;
            self.advance();
        }

        // Lines with no content do not participate in block structure.
        if matches!(self.peek(), None | Some(b'\n') | Some(b'\r') | Some(b'#')) {
            return Ok(());
        }

        let span = Span::new(self.file, start, self.index as u32);
        let top = *self.indent_stack.last().unwrap_or(&0);
        let alt_top = *self.alt_indent_stack.last().unwrap_or(&0);

        if width == top {
            if raw != alt_top {
                return Err(CoreError::lex(
                    "inconsistent use of tabs and spaces in indentation",
                    span,
                ));
            }
            return Ok(());
        }

        if width > top {
            if raw <= alt_top {
                return Err(CoreError::lex(
                    "inconsistent use of tabs and spaces in indentation",
                    span,
                ));
            }
            self.indent_stack.push(width);
            self.alt_indent_stack.push(raw);
            self.push(Token::new("", TokenKind::Indent, span));
            return Ok(());
        }

        // Dedent: pop every level deeper than the new width.
        while self
            .indent_stack
            .last()
            .is_some_and(|&level| level > width)
        {
            self.indent_stack.pop();
            self.alt_indent_stack.pop();
            self.tokens.push(Token::new("", TokenKind::Dedent, span));
        }
        let top = *self.indent_stack.last().unwrap_or(&0);
        let alt_top = *self.alt_indent_stack.last().unwrap_or(&0);
        if top != width {
            return Err(CoreError::lex(
                "dedent does not match any outer indentation level",
                span,
            ));
        }
        if alt_top != raw {
            return Err(CoreError::lex(
                "inconsistent use of tabs and spaces in indentation",
                span,
            ));
        }
        Ok(())
    }

    /// Consume a line break and close the logical line: append a `Newline`
    /// optimistically, then retract it if the line produced no tokens.
    fn end_line(&mut self) {
        if self.level == 0 {
            let end = self.index as u32;
            self.tokens
                .push(Token::new("", TokenKind::Newline, self.span_at(end)));
            if !self.line_has_tokens {
                self.tokens.pop();
            }
        }
        self.line_has_tokens = false;
        self.at_line_start = true;
    }

    /// Line continuation: `\` followed by only blanks and an optional
    /// comment must be terminated by a line break, which is consumed
    /// without emitting a `Newline` and without re-measuring indentation.
    fn scan_continuation(&mut self) -> Result<(), CoreError> {
        let start = self.index as u32;
        self.advance(); // the backslash
        self.skip_inline_whitespace();
        if self.peek() == Some(b'#') {
            self.skip_comment();
        }
        match self.peek() {
            Some(b'\n') | Some(b'\r') => {
                self.consume_newline();
                // The joined line continues the current logical line; its
                // leading whitespace is ordinary spacing, not indentation.
                self.at_line_start = false;
                Ok(())
            }
            _ => Err(CoreError::lex(
                "expected a line break after `\\` line continuation",
                Span::new(self.file, start, self.index as u32 + 1),
            )),
        }
    }

    fn scan_string(&mut self, start: u32) -> Result<(), CoreError> {
        self.advance(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                None | Some(b'\n') | Some(b'\r') => {
                    return Err(CoreError::lex(
                        "unterminated string literal",
                        Span::new(self.file, start, self.index as u32),
                    ));
                }
                Some(b'"') => {
                    self.advance();
                    let span = Span::new(self.file, start, self.index as u32);
                    self.push(Token::new(value, TokenKind::Str, span));
                    return Ok(());
                }
                Some(b'\\') => {
                    let escape_start = self.index as u32;
                    self.advance();
                    let Some(escaped) = self.peek() else {
                        return Err(CoreError::lex(
                            "unterminated string literal",
                            Span::new(self.file, start, self.index as u32),
                        ));
                    };
                    self.advance();
                    match escaped {
                        b'n' => value.push('\n'),
                        b'r' => value.push('\r'),
                        b't' => value.push('\t'),
                        b'b' => value.push('\u{8}'),
                        b'0' => value.push('\0'),
                        b'e' => value.push('\u{1b}'),
                        b'"' => value.push('"'),
                        b'\'' => value.push('\''),
                        b'\\' => value.push('\\'),
                        _ => {
                            return Err(CoreError::lex(
                                "invalid escape sequence in string literal",
                                Span::new(self.file, escape_start, self.index as u32),
                            ));
                        }
                    }
                }
                Some(_) => {
                    let ch = self.current_char();
                    value.push(ch);
                    self.index += ch.len_utf8();
                }
            }
        }
    }

    fn scan_number(&mut self, start: u32) {
        let mut kind = TokenKind::Integer;
        self.consume_digits();
        // A `.` makes this a float only when a digit follows; otherwise it
        // is left for dot-access.
        if self.peek() == Some(b'.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            kind = TokenKind::Float;
            self.advance();
            self.consume_digits();
        }
        let span = Span::new(self.file, start, self.index as u32);
        let text = &self.source[start as usize..self.index as usize];
        self.push(Token::new(text, kind, span));
    }

    fn consume_digits(&mut self) {
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == b'_')
        {
            self.advance();
        }
    }

    fn scan_ident(&mut self, start: u32) {
        while self.peek().is_some_and(is_ident_continue) {
            self.advance();
        }
        let span = Span::new(self.file, start, self.index as u32);
        let text = &self.source[start as usize..self.index as usize];

        // `else` directly followed by `if` collapses into one token; the
        // already emitted `else` is retracted from the stream.
        if text == "if" && self.tokens.last().map(|t| t.kind) == Some(TokenKind::Else) {
            let else_token = self.tokens.pop().unwrap();
            let merged = else_token.span.join(span);
            self.push(Token::new("else if", TokenKind::ElseIf, merged));
            return;
        }

        let kind = match text {
            "var" => TokenKind::Var,
            "let" => TokenKind::Let,
            "func" => TokenKind::Func,
            "extern" => TokenKind::Extern,
            "class" => TokenKind::Class,
            "enum" => TokenKind::Enum,
            "import" => TokenKind::Import,
            "from" => TokenKind::From,
            "export" => TokenKind::Export,
            "as" => TokenKind::As,
            "is" => TokenKind::Is,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "defer" => TokenKind::Defer,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "int" | "int8" | "int16" | "int32" | "int64" => TokenKind::IntType,
            "uint" | "uint8" | "uint16" | "uint32" | "uint64" => TokenKind::UintType,
            "float" | "float32" | "float64" => TokenKind::FloatType,
            "bool" => TokenKind::BoolType,
            "str" => TokenKind::StrType,
            "void" => TokenKind::VoidType,
            _ => TokenKind::Identifier,
        };
        self.push(Token::new(text, kind, span));
    }

    fn scan_operator(&mut self, start: u32) -> Result<(), CoreError> {
        let ch = self.peek().unwrap_or(0);
        self.advance();
        let kind = match ch {
            b'+' => self.with_equal(TokenKind::Plus, TokenKind::PlusEqual),
            b'-' => {
                if self.peek() == Some(b'>') {
                    self.advance();
                    TokenKind::Arrow
                } else {
                    self.with_equal(TokenKind::Minus, TokenKind::MinusEqual)
                }
            }
            b'*' => {
                if self.peek() == Some(b'*') {
                    self.advance();
                    TokenKind::StarStar
                } else {
                    self.with_equal(TokenKind::Star, TokenKind::StarEqual)
                }
            }
            b'/' => self.with_equal(TokenKind::Slash, TokenKind::SlashEqual),
            b'%' => TokenKind::Percent,
            b'=' => self.with_equal(TokenKind::Equal, TokenKind::EqualEqual),
            b'<' => self.with_equal(TokenKind::Less, TokenKind::LessEqual),
            b'>' => self.with_equal(TokenKind::Greater, TokenKind::GreaterEqual),
            b'&' => TokenKind::Ampersand,
            b',' => TokenKind::Comma,
            b':' => TokenKind::Colon,
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.advance();
                    TokenKind::BangEqual
                } else {
                    return Err(CoreError::lex(
                        "unexpected character `!` (use `not` or `!=`)",
                        Span::new(self.file, start, self.index as u32),
                    ));
                }
            }
            b'.' => {
                if self.peek() == Some(b'.') {
                    self.advance();
                    if self.peek() == Some(b'.') {
                        self.advance();
                        TokenKind::Ellipsis
                    } else {
                        return Err(CoreError::lex(
                            "expected `...`",
                            Span::new(self.file, start, self.index as u32),
                        ));
                    }
                } else {
                    TokenKind::Dot
                }
            }
            b'(' => {
                self.level += 1;
                TokenKind::LeftParen
            }
            b'[' => {
                self.level += 1;
                TokenKind::LeftBracket
            }
            b'{' => {
                self.level += 1;
                TokenKind::LeftBrace
            }
            b')' => {
                self.level = self.level.saturating_sub(1);
                TokenKind::RightParen
            }
            b']' => {
                self.level = self.level.saturating_sub(1);
                TokenKind::RightBracket
            }
            b'}' => {
                self.level = self.level.saturating_sub(1);
                TokenKind::RightBrace
            }
            other => {
                return Err(CoreError::lex(
                    format!("unexpected character `{}`", other as char),
                    Span::new(self.file, start, self.index as u32),
                ));
            }
        };
        let span = Span::new(self.file, start, self.index as u32);
        let text = &self.source[start as usize..self.index as usize];
        self.push(Token::new(text, kind, span));
        Ok(())
    }

    /// `single`, or `combined` if the next character is `=`.
    fn with_equal(&mut self, single: TokenKind, combined: TokenKind) -> TokenKind {
        if self.peek() == Some(b'=') {
            self.advance();
            combined
        } else {
            single
        }
    }

    fn skip_comment(&mut self) {
        while !matches!(self.peek(), None | Some(b'\n') | Some(b'\r')) {
            self.advance();
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
            self.advance();
        }
    }

    fn consume_newline(&mut self) {
        if self.peek() == Some(b'\r') {
            self.advance();
        }
        if self.peek() == Some(b'\n') {
            self.advance();
        }
    }

    fn push(&mut self, token: Token) {
        self.line_has_tokens = true;
        // A token on this line means any later indentation check belongs to
        // the next physical line (relevant when brackets close mid-line).
        self.at_line_start = false;
        self.tokens.push(token);
    }

    fn span_at(&self, offset: u32) -> Span {
        Span::new(self.file, offset, offset)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn current_char(&self) -> char {
        self.source[self.index..].chars().next().unwrap_or('\0')
    }

    fn advance(&mut self) {
        if self.index < self.bytes.len() {
            self.index += 1;
        }
    }
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        scan(FileId(0), source)
            .expect("scan")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn scan_err(source: &str) -> CoreError {
        scan(FileId(0), source).expect_err("expected lexical error")
    }

    #[test]
    fn declaration_assignment_call_token_stream() {
        use TokenKind::*;
        let tokens = scan(FileId(0), "var y: int = 100\ny = 101\nexit(y)\n").expect("scan");
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                Var, Identifier, Colon, IntType, Equal, Integer, Newline, Identifier, Equal,
                Integer, Newline, Identifier, LeftParen, Identifier, RightParen, Newline, Eof,
            ]
        );
        assert_eq!(tokens[1].lexeme, "y");
        assert_eq!(tokens[5].lexeme, "100");
        assert_eq!(tokens[9].lexeme, "101");
        assert_eq!(tokens[11].lexeme, "exit");
    }

    #[test]
    fn indent_and_dedent_tokens_balance() {
        let source = "if a\n    b = 1\n    if c\n        d = 2\ne = 3\n";
        let kinds = kinds(source);
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
    }

    #[test]
    fn dedents_are_emitted_per_popped_level() {
        let source = "if a\n    if b\n        c = 1\nd = 2\n";
        let kinds = kinds(source);
        // Both nested blocks close before `d`.
        let d_pos = kinds
            .iter()
            .rposition(|k| *k == TokenKind::Identifier)
            .unwrap();
        assert_eq!(kinds[d_pos - 1], TokenKind::Dedent);
        assert_eq!(kinds[d_pos - 2], TokenKind::Dedent);
    }

    #[test]
    fn tabs_only_indentation_is_accepted() {
        let source = "if a\n\tb = 1\n\tc = 2\nd = 3\n";
        let kinds = kinds(source);
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, dedents);
        assert_eq!(indents, 1);
    }

    #[test]
    fn mixed_tab_and_space_indentation_is_rejected() {
        // First indented line uses spaces, second uses a tab.
        let err = scan_err("if a\n    b = 1\n\tc = 2\n");
        assert!(matches!(err, CoreError::Lex(_)), "got {err:?}");
    }

    #[test]
    fn partial_dedent_to_unknown_level_is_rejected() {
        let err = scan_err("if a\n        b = 1\n    c = 2\n");
        let message = err.to_string();
        assert!(message.contains("dedent"), "got: {message}");
    }

    #[test]
    fn blank_and_comment_lines_do_not_affect_blocks() {
        let source = "if a\n    b = 1\n\n    # note\n    c = 2\nd = 3\n";
        let kinds = kinds(source);
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(dedents, 1);
        // No doubled newlines from the blank/comment lines.
        assert!(!kinds
            .windows(2)
            .any(|w| w == [TokenKind::Newline, TokenKind::Newline]));
    }

    #[test]
    fn comment_only_buffer_produces_just_eof() {
        assert_eq!(kinds("# nothing here\n\n"), vec![TokenKind::Eof]);
    }

    #[test]
    fn newline_suppressed_inside_brackets() {
        let source = "f(1,\n  2,\n  3)\n";
        let kinds = kinds(source);
        assert_eq!(
            kinds.iter().filter(|k| **k == TokenKind::Newline).count(),
            1
        );
        assert!(!kinds.contains(&TokenKind::Indent));
    }

    #[test]
    fn line_continuation_joins_lines() {
        let source = "a = 1 + \\\n    2\n";
        let kinds = kinds(source);
        assert_eq!(
            kinds.iter().filter(|k| **k == TokenKind::Newline).count(),
            1
        );
        assert!(!kinds.contains(&TokenKind::Indent));
    }

    #[test]
    fn line_continuation_allows_trailing_comment() {
        let kinds = kinds("a = 1 + \\  # carried over\n    2\n");
        assert!(!kinds.contains(&TokenKind::Indent));
    }

    #[test]
    fn line_continuation_requires_line_break() {
        let err = scan_err("a = 1 \\ 2\n");
        assert!(err.to_string().contains("line continuation"));
    }

    #[test]
    fn else_if_merges_into_one_token() {
        let source = "if a\n    b = 1\nelse if c\n    d = 2\n";
        let tokens = scan(FileId(0), source).expect("scan");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::ElseIf));
        assert!(!tokens.iter().any(|t| t.kind == TokenKind::Else));
    }

    #[test]
    fn else_on_its_own_line_stays_else() {
        let source = "if a\n    b = 1\nelse\n    c = 2\n";
        let tokens = scan(FileId(0), source).expect("scan");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Else));
        assert!(!tokens.iter().any(|t| t.kind == TokenKind::ElseIf));
    }

    #[test]
    fn string_escapes_are_decoded() {
        let tokens = scan(FileId(0), r#"s = "a\tb\n\"q\"\\""#).expect("scan");
        let lit = tokens.iter().find(|t| t.kind == TokenKind::Str).unwrap();
        assert_eq!(lit.lexeme, "a\tb\n\"q\"\\");
    }

    #[test]
    fn unknown_escape_is_a_lex_error() {
        let err = scan_err(r#"s = "bad \q escape""#);
        assert!(err.to_string().contains("escape"));
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let err = scan_err("s = \"no end\n");
        assert!(err.to_string().contains("unterminated"));
    }

    #[test]
    fn comments_are_discarded() {
        let kinds = kinds("x = 1 # trailing comment\n");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Identifier,
                TokenKind::Equal,
                TokenKind::Integer,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn float_and_integer_literals_are_distinguished() {
        let tokens = scan(FileId(0), "a = 1.5\nb = 2\nc = v.field\n").expect("scan");
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Float));
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Dot));
    }

    #[test]
    fn final_line_without_newline_still_terminates() {
        let kinds = kinds("x = 1");
        assert_eq!(kinds.last(), Some(&TokenKind::Eof));
        assert_eq!(kinds[kinds.len() - 2], TokenKind::Newline);
    }

    #[test]
    fn two_character_operators_lex_as_one_token() {
        use TokenKind::*;
        let kinds = kinds("a <= b != c ** d -> e += f\n");
        assert!(kinds.contains(&LessEqual));
        assert!(kinds.contains(&BangEqual));
        assert!(kinds.contains(&StarStar));
        assert!(kinds.contains(&Arrow));
        assert!(kinds.contains(&PlusEqual));
    }

    #[test]
    fn variadic_marker_lexes_as_ellipsis() {
        assert!(kinds("extern func printf(fmt: str, ...)\n").contains(&TokenKind::Ellipsis));
    }
}
