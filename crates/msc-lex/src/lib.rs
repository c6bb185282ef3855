//! msc-lex - The MiniScript lexer.
//!
//! Turns source text into a token stream. The lexer is byte-oriented and
//! single-pass: it keeps a [`Cursor`] over the source, recognises the
//! language's symbols, keywords and literals, and reports malformed input
//! into a shared diagnostic handler while still producing a usable token so
//! parsing can continue.
//!
//! Number tokens carry their `f64` value; string tokens carry a reference
//! to a string object materialised on the VM heap, which is the only heap
//! allocation lexing performs.

pub mod cursor;
pub mod lexer;
pub mod token;

pub use cursor::Cursor;
pub use lexer::{tokenize, Lexer};
pub use token::{keyword, Token, TokenKind};
