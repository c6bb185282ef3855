//! Token-window management and consumption helpers.
//!
//! The parser drives the lexer one token at a time and keeps a three-token
//! window `(previous, current, next)`. [`Parser::lex_token`] shifts the
//! window; everything else is built on top of it.
//!
//! String literal tokens carry references to heap strings that nothing else
//! reaches until they are pooled, so the window registers its values with
//! the VM's root set: a value is rooted when its token enters the window
//! and released when the token leaves it (or when [`Parser::release_roots`]
//! runs at the end of a compile).

use mgc::Vm;
use msc_lex::{Lexer, Token, TokenKind};
use msc_util::Handler;

/// Parser state over one source text.
pub(crate) struct Parser<'a> {
    lexer: Lexer<'a>,
    pub(crate) source: &'a str,
    pub(crate) handler: &'a Handler,

    pub(crate) previous: Token,
    pub(crate) current: Token,
    pub(crate) next: Token,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(source: &'a str, handler: &'a Handler) -> Self {
        Self {
            lexer: Lexer::new(source, handler),
            source,
            handler,
            previous: Token::empty(),
            current: Token::empty(),
            next: Token::empty(),
        }
    }

    /// Shifts the token window and lexes a fresh `next` token.
    pub(crate) fn lex_token(&mut self, vm: &mut Vm) {
        if let Some(r) = self.previous.value.as_obj() {
            vm.remove_root(r);
        }
        self.previous = self.current;
        self.current = self.next;

        if self.current.kind == TokenKind::Eof {
            return;
        }

        self.next = self.lexer.next_token(vm);
        if let Some(r) = self.next.value.as_obj() {
            vm.add_root(r);
        }
    }

    /// Releases the window's literal values from the root set.
    pub(crate) fn release_roots(&mut self, vm: &mut Vm) {
        for token in [&mut self.previous, &mut self.current, &mut self.next] {
            if let Some(r) = token.value.as_obj() {
                vm.remove_root(r);
                token.value = mgc::Value::Undefined;
            }
        }
    }

    /// The current token's kind.
    pub(crate) fn peek(&self) -> TokenKind {
        self.current.kind
    }

    /// Consumes the current token if it matches, skipping newlines first.
    /// `Line` itself is never matchable this way.
    pub(crate) fn match_token(&mut self, vm: &mut Vm, expected: TokenKind) -> bool {
        debug_assert!(expected != TokenKind::Line, "cannot match a Line token");
        self.match_line(vm);

        if self.peek() != expected {
            return false;
        }
        self.lex_token(vm);
        true
    }

    /// Consumes the current token if it matches, without skipping
    /// newlines. Used where a token is only significant on the same line,
    /// like the optional `=` after an assignment target.
    pub(crate) fn match_same_line(&mut self, vm: &mut Vm, expected: TokenKind) -> bool {
        if self.peek() != expected {
            return false;
        }
        self.lex_token(vm);
        true
    }

    /// Consumes one or more newline tokens; returns whether any were there.
    pub(crate) fn match_line(&mut self, vm: &mut Vm) -> bool {
        if self.peek() != TokenKind::Line {
            return false;
        }
        while self.peek() == TokenKind::Line {
            self.lex_token(vm);
        }
        true
    }

    /// Requires the next significant token to be `expected`; reports
    /// `message` otherwise. When the token after a mismatch is the expected
    /// one, the stray token is discarded to resynchronise.
    pub(crate) fn consume(&mut self, vm: &mut Vm, expected: TokenKind, message: &str) {
        debug_assert!(expected != TokenKind::Line, "cannot consume a Line token");
        self.match_line(vm);

        self.lex_token(vm);
        if self.previous.kind != expected {
            self.parse_error(message);

            if self.peek() == expected {
                self.lex_token(vm);
            }
        }
    }

    /// A statement terminator: a same-line `;` and/or newlines; end of
    /// input also qualifies.
    pub(crate) fn consume_end_statement(&mut self, vm: &mut Vm) {
        let mut consumed = false;

        // The semicolon must sit on the same line.
        if self.peek() == TokenKind::Semicolon {
            self.lex_token(vm);
            consumed = true;
        }
        if self.match_line(vm) {
            consumed = true;
        }
        if !consumed && self.peek() != TokenKind::Eof {
            self.parse_error("Expected statement end with newline or ';'.");
        }
    }

    /// A block opener: an optional same-line `do` and/or newlines.
    pub(crate) fn consume_start_block(&mut self, vm: &mut Vm) {
        let mut consumed = false;

        // The `do` must sit on the same line.
        if self.peek() == TokenKind::Do {
            self.lex_token(vm);
            consumed = true;
        }
        if self.match_line(vm) {
            consumed = true;
        }
        if !consumed {
            self.parse_error("Expected enter block with newline or 'do'.");
        }
    }

    /// Reports a parse error at the last consumed token. When that token is
    /// a lex-error token the message is suppressed: the lexer already
    /// reported the underlying problem.
    pub(crate) fn parse_error(&self, message: impl Into<String>) {
        if self.previous.kind == TokenKind::Error {
            return;
        }
        self.handler.error(self.previous.line, message);
    }
}
