//! Lexer — tokenizes While source code.
//!
//! The lexer scans the source string character by character, producing a
//! vector of tokens terminated by an explicit [`TokenKind::Eof`] marker.
//! Every token records its byte offset range in the source, which enables
//! error messages that underline the exact problematic characters.
//!
//! Keyword recognition happens after an identifier has been scanned, by
//! checking it against a keyword table. Unlike the parser, the lexer has no
//! recovery story of its own: the whole compile fails fast on the first
//! diagnostic, so the first bad character aborts scanning.

use crate::errors::{ErrorCode, SyntaxError};
use crate::token::{Span, Token, TokenKind};

pub struct Lexer {
    chars: Vec<char>,
    start: usize,    // Start of current token (byte offset)
    current: usize,  // Current position (char index)
    byte_pos: usize, // Current byte position
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            start: 0,
            current: 0,
            byte_pos: 0,
            tokens: Vec::new(),
        }
    }

    pub fn scan_tokens(mut self) -> Result<Vec<Token>, SyntaxError> {
        while !self.is_at_end() {
            self.start = self.byte_pos;
            self.scan_token()?;
        }
        self.tokens.push(Token::new(
            TokenKind::Eof,
            Span::new(self.byte_pos, self.byte_pos),
        ));
        Ok(self.tokens)
    }

    fn scan_token(&mut self) -> Result<(), SyntaxError> {
        let c = self.advance();
        match c {
            // Whitespace — skip
            ' ' | '\t' | '\r' | '\n' => {}

            // Single-line comments
            '/' if self.peek() == '/' => {
                while !self.is_at_end() && self.peek() != '\n' {
                    self.advance();
                }
            }

            // Block comments
            '/' if self.peek() == '*' => {
                self.advance(); // consume *
                loop {
                    if self.is_at_end() {
                        return Err(
                            self.error(ErrorCode::UnexpectedEof, "unterminated block comment")
                        );
                    }
                    if self.peek() == '*' && self.peek_next() == '/' {
                        self.advance();
                        self.advance();
                        break;
                    }
                    self.advance();
                }
            }

            // Single-character tokens
            '(' => self.add_token(TokenKind::LParen),
            ')' => self.add_token(TokenKind::RParen),
            '{' => self.add_token(TokenKind::LBrace),
            '}' => self.add_token(TokenKind::RBrace),
            '[' => self.add_token(TokenKind::LBracket),
            ']' => self.add_token(TokenKind::RBracket),
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            ':' => self.add_token(TokenKind::Colon),
            '.' => self.add_token(TokenKind::Dot),
            '+' => self.add_token(TokenKind::Plus),
            '-' => self.add_token(TokenKind::Minus),
            '*' => self.add_token(TokenKind::Star),
            '%' => self.add_token(TokenKind::Percent),
            '/' => self.add_token(TokenKind::Slash),

            '=' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::EqEq);
                } else {
                    self.add_token(TokenKind::Eq);
                }
            }

            '!' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::BangEq);
                } else {
                    self.add_token(TokenKind::Bang);
                }
            }

            '<' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::LtEq);
                } else {
                    self.add_token(TokenKind::Lt);
                }
            }

            '>' => {
                if self.match_char('=') {
                    self.add_token(TokenKind::GtEq);
                } else {
                    self.add_token(TokenKind::Gt);
                }
            }

            '&' => {
                if self.match_char('&') {
                    self.add_token(TokenKind::AndAnd);
                } else {
                    return Err(self.error(
                        ErrorCode::ExpectedToken,
                        "unexpected '&', did you mean '&&'?",
                    ));
                }
            }

            '|' => {
                if self.match_char('|') {
                    self.add_token(TokenKind::OrOr);
                } else {
                    self.add_token(TokenKind::Bar);
                }
            }

            '"' => self.string()?,
            '\'' => self.character()?,

            c if c.is_ascii_digit() => self.number(c)?,
            c if c.is_alphabetic() || c == '_' => self.identifier(c),

            c => {
                return Err(self.error(
                    ErrorCode::UnrecognizedTerm,
                    format!("unexpected character '{}'", c),
                ));
            }
        }
        Ok(())
    }

    // ── Literal scanners ─────────────────────────────────────────────

    fn string(&mut self) -> Result<(), SyntaxError> {
        let mut value = String::new();
        while !self.is_at_end() && self.peek() != '"' {
            let c = self.advance();
            if c == '\\' && !self.is_at_end() {
                value.push(self.escape()?);
            } else {
                value.push(c);
            }
        }
        if self.is_at_end() {
            return Err(self.error(ErrorCode::UnexpectedEof, "unterminated string literal"));
        }
        self.advance(); // closing "
        self.add_token(TokenKind::StrLit(value));
        Ok(())
    }

    fn character(&mut self) -> Result<(), SyntaxError> {
        if self.is_at_end() {
            return Err(self.error(ErrorCode::UnexpectedEof, "unterminated character literal"));
        }
        let c = self.advance();
        let value = if c == '\\' {
            self.escape()?
        } else {
            c
        };
        if !self.match_char('\'') {
            let code = if self.is_at_end() {
                ErrorCode::UnexpectedEof
            } else {
                ErrorCode::ExpectedToken
            };
            return Err(self.error(code, "unterminated character literal"));
        }
        self.add_token(TokenKind::CharLit(value));
        Ok(())
    }

    fn escape(&mut self) -> Result<char, SyntaxError> {
        if self.is_at_end() {
            return Err(self.error(ErrorCode::UnexpectedEof, "unterminated escape sequence"));
        }
        match self.advance() {
            'n' => Ok('\n'),
            't' => Ok('\t'),
            'r' => Ok('\r'),
            '0' => Ok('\0'),
            '\\' => Ok('\\'),
            '"' => Ok('"'),
            '\'' => Ok('\''),
            other => Err(self.error(
                ErrorCode::UnrecognizedTerm,
                format!("unknown escape sequence '\\{}'", other),
            )),
        }
    }

    fn number(&mut self, first: char) -> Result<(), SyntaxError> {
        let mut s = String::new();
        s.push(first);
        while !self.is_at_end() && self.peek().is_ascii_digit() {
            s.push(self.advance());
        }
        match s.parse::<i32>() {
            Ok(n) => {
                self.add_token(TokenKind::IntLit(n));
                Ok(())
            }
            Err(_) => Err(self.error(
                ErrorCode::UnrecognizedTerm,
                format!("invalid integer literal '{}'", s),
            )),
        }
    }

    fn identifier(&mut self, first: char) {
        let mut name = String::new();
        name.push(first);
        while !self.is_at_end() && (self.peek().is_alphanumeric() || self.peek() == '_') {
            name.push(self.advance());
        }

        let kind = match name.as_str() {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "switch" => TokenKind::Switch,
            "case" => TokenKind::Case,
            "default" => TokenKind::Default,
            "break" => TokenKind::Break,
            "continue" => TokenKind::Continue,
            "return" => TokenKind::Return,
            "assert" => TokenKind::Assert,
            "print" => TokenKind::Print,
            "type" => TokenKind::Type,
            "is" => TokenKind::Is,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "int" => TokenKind::Int,
            "bool" => TokenKind::Bool,
            "char" => TokenKind::Char,
            "string" => TokenKind::Str,
            "void" => TokenKind::Void,
            _ => TokenKind::Ident(name),
        };
        self.add_token(kind);
    }

    // ── Character-level helpers ──────────────────────────────────────

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        self.byte_pos += c.len_utf8();
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.chars[self.current]
        }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.chars.len() {
            '\0'
        } else {
            self.chars[self.current + 1]
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.chars[self.current] != expected {
            return false;
        }
        self.current += 1;
        self.byte_pos += expected.len_utf8();
        true
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn add_token(&mut self, kind: TokenKind) {
        self.tokens
            .push(Token::new(kind, Span::new(self.start, self.byte_pos)));
    }

    fn error(&self, code: ErrorCode, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(code, message, Span::new(self.start, self.byte_pos))
    }
}
