//! Token kinds and the token record.

use lazy_static::lazy_static;
use mgc::Value;
use rustc_hash::FxHashMap;

/// The kind of a lexical token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Produced after a lex error; the parser suppresses follow-on
    /// diagnostics for it.
    Error,
    /// End of input.
    Eof,
    /// A newline. One token per physical newline; the parser collapses
    /// runs.
    Line,

    // Symbols.
    Dot,        // .
    DotDot,     // ..
    Comma,      // ,
    Colon,      // :
    Semicolon,  // ;
    Lparen,     // (
    Rparen,     // )
    Lbracket,   // [
    Rbracket,   // ]
    Lbrace,     // {
    Rbrace,     // }
    Percent,    // %
    Tilde,      // ~
    Amp,        // &
    Pipe,       // |
    Caret,      // ^
    Plus,       // +
    Minus,      // -
    Star,       // *
    Slash,      // /
    Eq,         // =
    Gt,         // >
    Lt,         // <
    EqEq,       // ==
    NotEq,      // !=
    GtEq,       // >=
    LtEq,       // <=
    PlusEq,     // +=
    MinusEq,    // -=
    StarEq,     // *=
    SlashEq,    // /=
    ShiftRight, // >>
    ShiftLeft,  // <<

    // Keywords.
    Import,
    Enum,
    Def,
    Native,
    End,
    Null,
    SelfKw,
    Is,
    In,
    And,
    Or,
    Not, // also lexed from '!'
    True,
    False,
    Do,
    While,
    For,
    If,
    Elif,
    Else,
    Break,
    Continue,
    Return,

    // Type names, usable with the `is` operator.
    BoolType,
    NumType,
    StringType,
    ArrayType,
    MapType,
    RangeType,
    FunctionType,
    ObjectType,

    /// An identifier.
    Name,
    /// A number literal; the token carries its value.
    Number,
    /// A string literal; the token carries its interned value.
    String,
}

lazy_static! {
    /// Keyword spellings mapped to their token kinds.
    static ref KEYWORDS: FxHashMap<&'static str, TokenKind> = {
        let mut map = FxHashMap::default();
        map.insert("import", TokenKind::Import);
        map.insert("enum", TokenKind::Enum);
        map.insert("def", TokenKind::Def);
        map.insert("native", TokenKind::Native);
        map.insert("end", TokenKind::End);
        map.insert("null", TokenKind::Null);
        map.insert("self", TokenKind::SelfKw);
        map.insert("is", TokenKind::Is);
        map.insert("in", TokenKind::In);
        map.insert("and", TokenKind::And);
        map.insert("or", TokenKind::Or);
        map.insert("not", TokenKind::Not);
        map.insert("true", TokenKind::True);
        map.insert("false", TokenKind::False);
        map.insert("do", TokenKind::Do);
        map.insert("while", TokenKind::While);
        map.insert("for", TokenKind::For);
        map.insert("if", TokenKind::If);
        map.insert("elif", TokenKind::Elif);
        map.insert("else", TokenKind::Else);
        map.insert("break", TokenKind::Break);
        map.insert("continue", TokenKind::Continue);
        map.insert("return", TokenKind::Return);
        map.insert("Bool", TokenKind::BoolType);
        map.insert("Num", TokenKind::NumType);
        map.insert("String", TokenKind::StringType);
        map.insert("Array", TokenKind::ArrayType);
        map.insert("Map", TokenKind::MapType);
        map.insert("Range", TokenKind::RangeType);
        map.insert("Function", TokenKind::FunctionType);
        map.insert("Object", TokenKind::ObjectType);
        map
    };
}

/// Reclassifies an identifier spelling as a keyword, if it is one.
pub fn keyword(ident: &str) -> Option<TokenKind> {
    KEYWORDS.get(ident).copied()
}

/// A lexical token.
///
/// Tokens reference the source through `start`/`length` rather than owning
/// their text; `Number` and `String` tokens additionally carry a [`Value`].
#[derive(Clone, Copy, Debug)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the token in the source.
    pub start: usize,
    /// Byte length of the token.
    pub length: usize,
    /// Source line of the token (1-based).
    pub line: u32,
    /// Literal value for `Number` and `String` tokens, `undefined`
    /// otherwise.
    pub value: Value,
}

impl Token {
    /// A placeholder token used to seed the parser's window.
    pub fn empty() -> Self {
        Self {
            kind: TokenKind::Error,
            start: 0,
            length: 0,
            line: 1,
            value: Value::Undefined,
        }
    }

    /// The token's text within its source.
    pub fn lexeme<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.start + self.length]
    }
}
