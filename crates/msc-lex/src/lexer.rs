//! The MiniScript lexer.
//!
//! Transforms source text into tokens one at a time. Whitespace (space,
//! tab, CR) is skipped, every physical newline produces a [`TokenKind::Line`]
//! token, and `#` introduces a comment running to the end of the line (the
//! newline itself still yields its `Line` token, since newlines terminate
//! statements).
//!
//! The lexer allocates nothing on the VM heap except the string objects
//! backing string literals, which is why [`Lexer::next_token`] takes the
//! VM. On a lex error a diagnostic is reported and either a
//! [`TokenKind::Error`] token is produced (invalid bytes) or the literal is
//! completed with a fallback value (bad escapes, out-of-range numbers), so
//! the parser always sees a well-formed stream.

use mgc::{Value, Vm};
use msc_util::Handler;

use crate::cursor::Cursor;
use crate::token::{keyword, Token, TokenKind};

/// The lexer state over one source text.
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    handler: &'a Handler,
    /// Byte offset where the current token started.
    token_start: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over `source`, reporting errors into `handler`.
    pub fn new(source: &'a str, handler: &'a Handler) -> Self {
        Self {
            cursor: Cursor::new(source),
            handler,
            token_start: 0,
        }
    }

    /// The source text being lexed.
    pub fn source(&self) -> &'a str {
        self.cursor.source()
    }

    /// Lexes the next token.
    pub fn next_token(&mut self, vm: &mut Vm) -> Token {
        loop {
            self.token_start = self.cursor.position();

            if self.cursor.is_at_end() {
                return self.make_token(TokenKind::Eof);
            }

            let c = self.cursor.eat();
            match c {
                b',' => return self.make_token(TokenKind::Comma),
                b':' => return self.make_token(TokenKind::Colon),
                b';' => return self.make_token(TokenKind::Semicolon),
                b'(' => return self.make_token(TokenKind::Lparen),
                b')' => return self.make_token(TokenKind::Rparen),
                b'[' => return self.make_token(TokenKind::Lbracket),
                b']' => return self.make_token(TokenKind::Rbracket),
                b'{' => return self.make_token(TokenKind::Lbrace),
                b'}' => return self.make_token(TokenKind::Rbrace),
                b'%' => return self.make_token(TokenKind::Percent),
                b'~' => return self.make_token(TokenKind::Tilde),
                b'&' => return self.make_token(TokenKind::Amp),
                b'|' => return self.make_token(TokenKind::Pipe),
                b'^' => return self.make_token(TokenKind::Caret),

                b'\n' => return self.make_token(TokenKind::Line),

                b' ' | b'\t' | b'\r' => {
                    while matches!(self.cursor.peek(), b' ' | b'\t' | b'\r') {
                        self.cursor.eat();
                    }
                }

                // `#` introduces a line comment. The newline stays put so
                // it still terminates the statement.
                b'#' => {
                    while !self.cursor.is_at_end() && self.cursor.peek() != b'\n' {
                        self.cursor.eat();
                    }
                }

                b'.' => {
                    return self.two_byte_token(b'.', TokenKind::Dot, TokenKind::DotDot);
                }
                b'=' => return self.two_byte_token(b'=', TokenKind::Eq, TokenKind::EqEq),
                b'!' => return self.two_byte_token(b'=', TokenKind::Not, TokenKind::NotEq),
                b'+' => return self.two_byte_token(b'=', TokenKind::Plus, TokenKind::PlusEq),
                b'-' => return self.two_byte_token(b'=', TokenKind::Minus, TokenKind::MinusEq),
                b'*' => return self.two_byte_token(b'=', TokenKind::Star, TokenKind::StarEq),
                b'/' => return self.two_byte_token(b'=', TokenKind::Slash, TokenKind::SlashEq),

                b'>' => {
                    return if self.cursor.match_byte(b'>') {
                        self.make_token(TokenKind::ShiftRight)
                    } else {
                        self.two_byte_token(b'=', TokenKind::Gt, TokenKind::GtEq)
                    };
                }
                b'<' => {
                    return if self.cursor.match_byte(b'<') {
                        self.make_token(TokenKind::ShiftLeft)
                    } else {
                        self.two_byte_token(b'=', TokenKind::Lt, TokenKind::LtEq)
                    };
                }

                b'"' => return self.lex_string(vm),

                c if c.is_ascii_digit() => return self.lex_number(),
                c if is_name_start(c) => return self.lex_name(),

                c => {
                    if (32..=126).contains(&c) {
                        self.error(format!("Invalid character {}", c as char));
                    } else {
                        self.error(format!("Invalid byte 0x{:x}", c));
                    }
                    return self.make_token(TokenKind::Error);
                }
            }
        }
    }

    /// Lexes an identifier or keyword.
    fn lex_name(&mut self) -> Token {
        while is_name_continue(self.cursor.peek()) {
            self.cursor.eat();
        }

        let text = self.cursor.slice_from(self.token_start);
        let kind = keyword(text).unwrap_or(TokenKind::Name);
        self.make_token(kind)
    }

    /// Lexes a decimal number with an optional fractional part.
    fn lex_number(&mut self) -> Token {
        while self.cursor.peek().is_ascii_digit() {
            self.cursor.eat();
        }

        // The dot only belongs to the number when a digit follows, so
        // `10..20` stays a range and `x.y` an attribute access.
        if self.cursor.peek() == b'.' && self.cursor.peek_next().is_ascii_digit() {
            self.cursor.eat();
            while self.cursor.peek().is_ascii_digit() {
                self.cursor.eat();
            }
        }

        let text = self.cursor.slice_from(self.token_start);
        let value = match text.parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            _ => {
                self.error(format!("Literal is too large ({})", text));
                0.0
            }
        };

        self.make_value_token(TokenKind::Number, Value::Num(value))
    }

    /// Lexes a string literal, materialising its value on the VM heap.
    fn lex_string(&mut self, vm: &mut Vm) -> Token {
        let mut content: Vec<u8> = Vec::new();

        loop {
            if self.cursor.is_at_end() {
                self.error("Non terminated string.");
                break;
            }

            let c = self.cursor.eat();
            if c == b'"' {
                break;
            }

            if c == b'\\' {
                match self.cursor.eat() {
                    b'"' => content.push(b'"'),
                    b'\\' => content.push(b'\\'),
                    b'n' => content.push(b'\n'),
                    b'r' => content.push(b'\r'),
                    b't' => content.push(b'\t'),
                    _ => self.error("Invalid escape character"),
                }
            } else {
                content.push(c);
            }
        }

        let text = String::from_utf8_lossy(&content);
        let string = vm.new_string(&text);
        self.make_value_token(TokenKind::String, Value::Obj(string))
    }

    fn two_byte_token(&mut self, second: u8, one: TokenKind, two: TokenKind) -> Token {
        if self.cursor.match_byte(second) {
            self.make_token(two)
        } else {
            self.make_token(one)
        }
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        // A Line token belongs to the line it ends, not the one it starts.
        let line_adjust = if kind == TokenKind::Line { 1 } else { 0 };
        Token {
            kind,
            start: self.token_start,
            length: self.cursor.position() - self.token_start,
            line: self.cursor.line() - line_adjust,
            value: Value::Undefined,
        }
    }

    fn make_value_token(&self, kind: TokenKind, value: Value) -> Token {
        let mut token = self.make_token(kind);
        token.value = value;
        token
    }

    fn error(&self, message: impl Into<String>) {
        self.handler.error(self.cursor.line(), message);
    }
}

/// Bytes that may start an identifier.
fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

/// Bytes that may continue an identifier.
fn is_name_continue(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Lexes a whole source into a token vector, ending with the `Eof` token.
///
/// Mostly a convenience for tests and tooling; the parser pulls tokens one
/// at a time instead.
pub fn tokenize(vm: &mut Vm, handler: &Handler, source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source, handler);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token(vm);
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return tokens;
        }
    }
}
