//! Lexer for loop-head and binding expressions
//!
//! Converts source text into a stream of tokens.

use std::iter::Peekable;
use std::str::CharIndices;

use crate::value::JsString;

/// Source span information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32, column: u32) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    String(JsString),
    True,
    False,
    Null,

    Identifier(JsString),

    // Keywords
    Let,
    Const,
    Var,
    Of,

    // Punctuation
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Dot,      // .
    Comma,    // ,
    Colon,    // :
    Bang,     // !

    // Special
    Eof,
    Invalid(char),
}

/// A token with its source location
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn eof(pos: usize, line: u32, column: u32) -> Self {
        Self {
            kind: TokenKind::Eof,
            span: Span::new(pos, pos, line, column),
        }
    }
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
    current_pos: usize,
    line: u32,
    column: u32,
    start_pos: usize,
    start_line: u32,
    start_column: u32,
    /// Set when a string literal ran to end of input
    unterminated: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            line: 1,
            column: 1,
            start_pos: 0,
            start_line: 1,
            start_column: 1,
            unterminated: false,
        }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    /// True if the last scanned string literal was not closed
    pub fn hit_unterminated_string(&self) -> bool {
        self.unterminated
    }

    /// Get the next token from the source
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        self.start_pos = self.current_pos;
        self.start_line = self.line;
        self.start_column = self.column;

        let Some((_pos, ch)) = self.advance() else {
            return Token::eof(self.current_pos, self.line, self.column);
        };

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '!' => TokenKind::Bang,
            '.' => match self.peek() {
                Some(c) if c.is_ascii_digit() => self.scan_number(ch),
                _ => TokenKind::Dot,
            },
            '"' | '\'' => self.scan_string(ch),
            '0'..='9' => self.scan_number(ch),
            c if is_id_start(c) => self.scan_identifier(c),
            c => TokenKind::Invalid(c),
        };

        Token::new(kind, self.make_span())
    }

    /// Tokenize the whole input, ending with `Eof`
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    fn advance(&mut self) -> Option<(usize, char)> {
        let result = self.chars.next();
        if let Some((pos, ch)) = result {
            self.current_pos = pos + ch.len_utf8();
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        result
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, ch)| *ch)
    }

    fn make_span(&self) -> Span {
        Span::new(
            self.start_pos,
            self.current_pos,
            self.start_line,
            self.start_column,
        )
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn scan_string(&mut self, quote: char) -> TokenKind {
        let mut value = String::new();
        loop {
            let Some((_, ch)) = self.advance() else {
                self.unterminated = true;
                break;
            };
            match ch {
                c if c == quote => break,
                '\\' => match self.advance() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, 'r')) => value.push('\r'),
                    Some((_, '0')) => value.push('\0'),
                    Some((_, other)) => value.push(other),
                    None => {
                        self.unterminated = true;
                        break;
                    }
                },
                c => value.push(c),
            }
        }
        TokenKind::String(JsString::from(value))
    }

    fn scan_number(&mut self, first: char) -> TokenKind {
        let mut text = String::new();
        text.push(first);
        let mut seen_dot = first == '.';
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                if ch != '_' {
                    text.push(ch);
                }
                self.advance();
            } else if ch == '.' && !seen_dot {
                seen_dot = true;
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match text.parse::<f64>() {
            Ok(n) => TokenKind::Number(n),
            Err(_) => TokenKind::Invalid(first),
        }
    }

    fn scan_identifier(&mut self, first: char) -> TokenKind {
        let mut name = String::new();
        name.push(first);
        while let Some(ch) = self.peek() {
            if is_id_continue(ch) {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        match name.as_str() {
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            "let" => TokenKind::Let,
            "const" => TokenKind::Const,
            "var" => TokenKind::Var,
            "of" => TokenKind::Of,
            _ => TokenKind::Identifier(JsString::from(name)),
        }
    }
}

fn is_id_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_id_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}
