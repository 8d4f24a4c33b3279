//! Lexer
//!
//! Turns YX source text into tokens. Lexical errors are reported as
//! diagnostics and scanning continues, so a single pass reports every bad
//! character in the input.

pub mod tokens;

use std::iter::Peekable;
use std::str::Chars;

use tracing::debug;

use crate::util::diagnostic::{Diagnostic, Diagnostics};
use crate::util::span::{Position, Span};

pub use tokens::{Token, TokenKind};

/// Tokenize source code
///
/// The returned token list always ends with [`TokenKind::Eof`].
pub fn tokenize(source: &str) -> (Vec<Token>, Diagnostics) {
    debug!("Lexing {} bytes", source.len());

    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token() {
        tokens.push(token);
    }
    let end = lexer.position();
    tokens.push(Token::new(TokenKind::Eof, Span::new(end, end)));

    debug!(
        "Lexed {} tokens with {} diagnostics",
        tokens.len(),
        lexer.diagnostics.len()
    );
    (tokens, lexer.diagnostics)
}

/// Main lexer structure
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    offset: usize,
    line: usize,
    column: usize,
    start: Position,
    diagnostics: Diagnostics,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            offset: 0,
            line: 1,
            column: 1,
            start: Position::start(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Get current position
    pub fn position(&self) -> Position {
        Position::with_offset(self.line, self.column, self.offset)
    }

    /// Span from the start of the current token to here
    fn span(&self) -> Span {
        Span::new(self.start, self.position())
    }

    /// Advance to next character
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.clone().nth(1)
    }

    fn eat(
        &mut self,
        expected: char,
    ) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(
        &mut self,
        code: &'static str,
        message: String,
        span: Span,
    ) {
        self.diagnostics.push(Diagnostic::error(code, message, span));
    }

    /// Skip whitespace and comments
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '/' if self.peek_next() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '/' if self.peek_next() == Some('*') => {
                    self.start = self.position();
                    self.advance();
                    self.advance();
                    let mut depth = 1;
                    while depth > 0 {
                        match self.advance() {
                            Some('/') if self.peek() == Some('*') => {
                                self.advance();
                                depth += 1;
                            }
                            Some('*') if self.peek() == Some('/') => {
                                self.advance();
                                depth -= 1;
                            }
                            Some(_) => {}
                            None => {
                                let span = self.span();
                                self.error("E0001", "unterminated block comment".to_string(), span);
                                break;
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// Generate next token, `None` at end of input
    pub fn next_token(&mut self) -> Option<Token> {
        loop {
            self.skip_trivia();
            self.start = self.position();
            let c = self.advance()?;

            let kind = match c {
                c if c == '_' || unicode_ident::is_xid_start(c) => self.scan_word(c),
                c if c.is_ascii_digit() => self.scan_number(c),
                '"' => self.scan_string(),
                '+' => TokenKind::Plus,
                '-' => {
                    if self.eat('>') {
                        TokenKind::Arrow
                    } else {
                        TokenKind::Minus
                    }
                }
                '*' => TokenKind::Star,
                '/' => TokenKind::Slash,
                '%' => TokenKind::Percent,
                '=' => {
                    if self.eat('=') {
                        TokenKind::EqEq
                    } else {
                        TokenKind::Eq
                    }
                }
                '!' => {
                    if self.eat('=') {
                        TokenKind::Neq
                    } else {
                        TokenKind::Not
                    }
                }
                '<' => {
                    if self.eat('=') {
                        TokenKind::Le
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    if self.eat('=') {
                        TokenKind::Ge
                    } else {
                        TokenKind::Gt
                    }
                }
                '&' if self.peek() == Some('&') => {
                    self.advance();
                    TokenKind::And
                }
                '|' if self.peek() == Some('|') => {
                    self.advance();
                    TokenKind::Or
                }
                '.' => {
                    if self.eat('.') {
                        TokenKind::DotDot
                    } else {
                        TokenKind::Dot
                    }
                }
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                '{' => TokenKind::LBrace,
                '}' => TokenKind::RBrace,
                ',' => TokenKind::Comma,
                ':' => TokenKind::Colon,
                ';' => TokenKind::Semicolon,
                other => {
                    let span = self.span();
                    self.error(
                        "E0001",
                        format!("unexpected character `{}`", other.escape_debug()),
                        span,
                    );
                    continue;
                }
            };

            return Some(Token::new(kind, self.span()));
        }
    }

    fn scan_word(
        &mut self,
        first: char,
    ) -> TokenKind {
        let mut word = String::from(first);
        while let Some(c) = self.peek() {
            if c == '_' || unicode_ident::is_xid_continue(c) {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }
        TokenKind::keyword(&word).unwrap_or(TokenKind::Identifier(word))
    }

    fn scan_number(
        &mut self,
        first: char,
    ) -> TokenKind {
        let mut text = String::from(first);
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else if c == '_' {
                self.advance();
            } else if c == '.'
                && !is_float
                && self.peek_next().is_some_and(|n| n.is_ascii_digit())
            {
                is_float = true;
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // `12abc` is one bad literal, not a number followed by a name
        let mut bad_suffix = false;
        while let Some(c) = self.peek() {
            if c == '_' || unicode_ident::is_xid_continue(c) {
                bad_suffix = true;
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        let span = self.span();
        if bad_suffix {
            self.error("E0003", format!("invalid number literal `{}`", text), span);
            return TokenKind::IntLiteral(0);
        }

        if is_float {
            match text.parse::<f64>() {
                Ok(x) => TokenKind::FloatLiteral(x),
                Err(_) => {
                    self.error("E0003", format!("invalid number literal `{}`", text), span);
                    TokenKind::FloatLiteral(0.0)
                }
            }
        } else {
            match text.parse::<i64>() {
                Ok(n) => TokenKind::IntLiteral(n),
                Err(_) => {
                    self.error(
                        "E0003",
                        format!("integer literal `{}` is out of range", text),
                        span,
                    );
                    TokenKind::IntLiteral(0)
                }
            }
        }
    }

    fn scan_string(&mut self) -> TokenKind {
        let mut value = String::new();
        loop {
            let escape_start = self.position();
            match self.advance() {
                Some('"') => return TokenKind::StringLiteral(value),
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(other) => {
                        let span = Span::new(escape_start, self.position());
                        self.error(
                            "E0004",
                            format!("invalid escape sequence `\\{}`", other.escape_debug()),
                            span,
                        );
                        value.push(other);
                    }
                    None => break,
                },
                Some(c) => value.push(c),
                None => break,
            }
        }

        let span = self.span();
        self.error("E0002", "unterminated string literal".to_string(), span);
        TokenKind::StringLiteral(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, diags) = tokenize(source);
        assert!(diags.is_empty(), "unexpected diagnostics: {}", diags);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source_is_just_eof() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
        assert_eq!(kinds("  // only a comment\n"), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_keywords_and_identifiers() {
        assert_eq!(
            kinds("pub fn Main self selfish _x"),
            vec![
                TokenKind::KwPub,
                TokenKind::KwFn,
                TokenKind::Identifier("Main".into()),
                TokenKind::KwSelf,
                TokenKind::Identifier("selfish".into()),
                TokenKind::Identifier("_x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_range_is_not_a_float() {
        assert_eq!(
            kinds("0..10 1.5"),
            vec![
                TokenKind::IntLiteral(0),
                TokenKind::DotDot,
                TokenKind::IntLiteral(10),
                TokenKind::FloatLiteral(1.5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("-> == != <= >= && || ! = ."),
            vec![
                TokenKind::Arrow,
                TokenKind::EqEq,
                TokenKind::Neq,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::Eq,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\tb\n\"q\"""#),
            vec![TokenKind::StringLiteral("a\tb\n\"q\"".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_nested_block_comment() {
        assert_eq!(
            kinds("/* a /* b */ c */ 1"),
            vec![TokenKind::IntLiteral(1), TokenKind::Eof]
        );
    }

    #[test]
    fn test_spans_are_one_indexed() {
        let (tokens, _) = tokenize("let\n  x");
        assert_eq!(tokens[1].span.start.line, 2);
        assert_eq!(tokens[1].span.start.column, 3);
        assert_eq!(tokens[1].span.start.offset, 6);
    }

    #[test]
    fn test_reports_every_bad_character() {
        let (tokens, diags) = tokenize("1 @ 2 # 3");
        assert_eq!(diags.len(), 2);
        assert!(diags.iter().all(|d| d.code == "E0001"));
        assert_eq!(tokens.len(), 4);
    }

    #[test]
    fn test_unterminated_string() {
        let (_, diags) = tokenize("\"abc");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags.iter().next().unwrap().code, "E0002");
    }

    #[test]
    fn test_bad_numbers() {
        let (_, diags) = tokenize("99999999999999999999 12ab");
        let codes: Vec<_> = diags.iter().map(|d| d.code).collect();
        assert_eq!(codes, vec!["E0003", "E0003"]);
    }

    #[test]
    fn test_bad_escape() {
        let (tokens, diags) = tokenize(r#""\q""#);
        assert_eq!(diags.iter().next().unwrap().code, "E0004");
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral("q".into()));
    }

    proptest! {
        #[test]
        fn prop_lexer_never_panics(source in "\\PC{0,64}") {
            let (tokens, _) = tokenize(&source);
            prop_assert_eq!(tokens.last().map(|t| &t.kind), Some(&TokenKind::Eof));
        }
    }
}
