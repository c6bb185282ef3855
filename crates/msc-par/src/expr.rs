//! Pratt-precedence expression parsing and code emission.
//!
//! Each token kind maps to an optional prefix parselet, an optional infix
//! parselet and an infix precedence. [`Compiler::parse_precedence`] drives
//! the climb: it consumes a token, runs its prefix parselet, then keeps
//! consuming operators whose precedence is at least the requested one.
//!
//! Every parselet leaves exactly one value on the operand stack; the
//! statement layer pops it (or keeps it, for a fresh local's slot).
//!
//! Assignment is consumed by the *prefix* parselets of valid targets
//! (names, attributes, subscripts) when the context allows it
//! (`precedence <= ASSIGNMENT`). The infix assignment rule therefore only
//! fires for invalid targets like `1 + 2 = 3`, where it reports the error.

use mgc::{NamePool, Opcode, Value};
use msc_lex::TokenKind;

use crate::compiler::Compiler;

/// Precedence levels, lowest binding to tightest.
pub(crate) mod prec {
    pub const NONE: u8 = 0;
    pub const LOWEST: u8 = 1;
    pub const ASSIGNMENT: u8 = 2; // =  +=  -=  *=  /=
    pub const LOGICAL_OR: u8 = 3; // or
    pub const LOGICAL_AND: u8 = 4; // and
    pub const EQUALITY: u8 = 6; // ==  !=
    pub const IN: u8 = 7; // in
    pub const IS: u8 = 8; // is
    pub const COMPARISON: u8 = 9; // <  >  <=  >=
    pub const BITWISE_OR: u8 = 10; // |
    pub const BITWISE_XOR: u8 = 11; // ^
    pub const BITWISE_AND: u8 = 12; // &
    pub const BITWISE_SHIFT: u8 = 13; // <<  >>
    pub const RANGE: u8 = 14; // ..
    pub const TERM: u8 = 15; // +  -
    pub const FACTOR: u8 = 16; // *  /  %
    pub const UNARY: u8 = 17; // -  ~  not
    pub const CALL: u8 = 18; // ()
    pub const SUBSCRIPT: u8 = 19; // []
    pub const ATTRIB: u8 = 20; // .
}

/// Prefix parselets.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Prefix {
    Literal,
    Name,
    Grouping,
    List,
    Map,
    Unary,
}

/// Infix parselets.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Infix {
    Binary,
    Assignment,
    Call,
    Subscript,
    Attrib,
}

/// One row of the grammar table.
pub(crate) struct Rule {
    pub prefix: Option<Prefix>,
    pub infix: Option<Infix>,
    pub precedence: u8,
}

const fn rule_of(prefix: Option<Prefix>, infix: Option<Infix>, precedence: u8) -> Rule {
    Rule {
        prefix,
        infix,
        precedence,
    }
}

/// The grammar rule for a token kind.
pub(crate) fn rule(kind: TokenKind) -> Rule {
    use TokenKind::*;

    match kind {
        Dot => rule_of(None, Some(Infix::Attrib), prec::ATTRIB),
        DotDot => rule_of(None, Some(Infix::Binary), prec::RANGE),
        Lparen => rule_of(Some(Prefix::Grouping), Some(Infix::Call), prec::CALL),
        Lbracket => rule_of(Some(Prefix::List), Some(Infix::Subscript), prec::SUBSCRIPT),
        Lbrace => rule_of(Some(Prefix::Map), None, prec::NONE),
        Percent => rule_of(None, Some(Infix::Binary), prec::FACTOR),
        Tilde => rule_of(Some(Prefix::Unary), None, prec::NONE),
        Amp => rule_of(None, Some(Infix::Binary), prec::BITWISE_AND),
        Pipe => rule_of(None, Some(Infix::Binary), prec::BITWISE_OR),
        Caret => rule_of(None, Some(Infix::Binary), prec::BITWISE_XOR),
        Plus => rule_of(None, Some(Infix::Binary), prec::TERM),
        Minus => rule_of(Some(Prefix::Unary), Some(Infix::Binary), prec::TERM),
        Star | Slash => rule_of(None, Some(Infix::Binary), prec::FACTOR),
        Eq | PlusEq | MinusEq | StarEq | SlashEq => {
            rule_of(None, Some(Infix::Assignment), prec::ASSIGNMENT)
        }
        Gt | Lt | GtEq | LtEq => rule_of(None, Some(Infix::Binary), prec::COMPARISON),
        EqEq | NotEq => rule_of(None, Some(Infix::Binary), prec::EQUALITY),
        ShiftRight | ShiftLeft => rule_of(None, Some(Infix::Binary), prec::BITWISE_SHIFT),
        Is => rule_of(None, Some(Infix::Binary), prec::IS),
        In => rule_of(None, Some(Infix::Binary), prec::IN),
        And => rule_of(None, Some(Infix::Binary), prec::LOGICAL_AND),
        Or => rule_of(None, Some(Infix::Binary), prec::LOGICAL_OR),
        Not => rule_of(Some(Prefix::Unary), None, prec::NONE),
        Null | True | False | Number | String | BoolType | NumType | StringType | ArrayType
        | MapType | RangeType | FunctionType | ObjectType => {
            rule_of(Some(Prefix::Literal), None, prec::NONE)
        }
        Name => rule_of(Some(Prefix::Name), None, prec::NONE),
        _ => rule_of(None, None, prec::NONE),
    }
}

/// Name resolution result, searched locals first, then globals, then
/// functions.
enum NameRef {
    Local(u8),
    Global(u16),
    Function(u16),
    NotDefined,
}

impl<'a> Compiler<'a> {
    /// Compiles one expression, leaving its value on the operand stack.
    pub(crate) fn compile_expression(&mut self) {
        // Expressions may start on a fresh line (after `=`, `(`, `,`, ...).
        self.parser.match_line(self.vm);
        self.parse_precedence(prec::LOWEST);
    }

    /// The Pratt precedence climb.
    pub(crate) fn parse_precedence(&mut self, precedence: u8) {
        self.parser.lex_token(self.vm);

        let prefix = match rule(self.parser.previous.kind).prefix {
            Some(prefix) => prefix,
            None => {
                self.parser.parse_error("Expected an expression.");
                return;
            }
        };

        let can_assign = precedence <= prec::ASSIGNMENT;
        self.do_prefix(prefix, can_assign);

        while rule(self.parser.peek()).precedence >= precedence {
            self.parser.lex_token(self.vm);
            let infix = match rule(self.parser.previous.kind).infix {
                Some(infix) => infix,
                None => break,
            };
            self.do_infix(infix, can_assign);
        }
    }

    fn do_prefix(&mut self, prefix: Prefix, can_assign: bool) {
        match prefix {
            Prefix::Literal => self.expr_literal(),
            Prefix::Name => self.expr_name(can_assign),
            Prefix::Grouping => self.expr_grouping(),
            Prefix::List => self.expr_list(),
            Prefix::Map => self.expr_map(),
            Prefix::Unary => self.expr_unary(),
        }
    }

    fn do_infix(&mut self, infix: Infix, can_assign: bool) {
        match infix {
            Infix::Binary => self.expr_binary(),
            Infix::Assignment => self.expr_bad_assignment(),
            Infix::Call => self.expr_call(),
            Infix::Subscript => self.expr_subscript(can_assign),
            Infix::Attrib => self.expr_attrib(can_assign),
        }
    }

    /// null, true, false, number, string and type-name literals.
    fn expr_literal(&mut self) {
        let token = self.parser.previous;
        match token.kind {
            TokenKind::Null => self.emit_opcode(Opcode::PushNull),
            TokenKind::True => self.emit_constant(Value::Bool(true)),
            TokenKind::False => self.emit_constant(Value::Bool(false)),
            TokenKind::Number | TokenKind::String => self.emit_constant(token.value),
            kind => {
                // Type names evaluate to their interned name string; `is`
                // compares it against a value's type at run time.
                let name = type_literal_name(kind);
                let index = self.add_attr_name(name);
                let string = self.vm.script(self.script).names.get(index);
                self.emit_constant(Value::Obj(string));
            }
        }
    }

    /// An identifier: load, store or define depending on context.
    fn expr_name(&mut self, can_assign: bool) {
        let token = self.parser.previous;
        let name = token.lexeme(self.parser.source);

        let target = self.resolve_name(name);
        let assign_op = match self.parser.peek() {
            op @ (TokenKind::Eq
            | TokenKind::PlusEq
            | TokenKind::MinusEq
            | TokenKind::StarEq
            | TokenKind::SlashEq)
                if can_assign =>
            {
                Some(op)
            }
            _ => None,
        };

        let Some(op) = assign_op else {
            match target {
                NameRef::Local(index) => {
                    self.emit_opcode(Opcode::PushLocal);
                    self.emit_byte(index);
                }
                NameRef::Global(index) => {
                    self.emit_opcode(Opcode::PushGlobal);
                    self.emit_short(index);
                }
                NameRef::Function(index) => {
                    self.emit_opcode(Opcode::PushFn);
                    self.emit_short(index);
                }
                NameRef::NotDefined => {
                    self.parser
                        .parse_error(format!("Name '{}' is not defined.", name));
                    self.emit_opcode(Opcode::PushNull);
                }
            }
            return;
        };

        self.parser.lex_token(self.vm); // consume the assignment operator

        match target {
            NameRef::Local(index) => {
                if let Some(binop) = compound_opcode(op) {
                    self.emit_opcode(Opcode::PushLocal);
                    self.emit_byte(index);
                    self.compile_expression();
                    self.emit_opcode(binop);
                } else {
                    self.compile_expression();
                }
                self.emit_opcode(Opcode::StoreLocal);
                self.emit_byte(index);
            }
            NameRef::Global(index) => {
                if let Some(binop) = compound_opcode(op) {
                    self.emit_opcode(Opcode::PushGlobal);
                    self.emit_short(index);
                    self.compile_expression();
                    self.emit_opcode(binop);
                } else {
                    self.compile_expression();
                }
                self.emit_opcode(Opcode::StoreGlobal);
                self.emit_short(index);
            }
            NameRef::Function(_) => {
                self.parser
                    .parse_error(format!("Function '{}' is not assignable.", name));
                self.compile_expression();
            }
            NameRef::NotDefined => {
                if compound_opcode(op).is_some() {
                    self.parser
                        .parse_error(format!("Variable '{}' is not defined.", name));
                    self.compile_expression();
                } else {
                    self.define_name(token, name);
                }
            }
        }
    }

    /// A plain `=` to an unknown name defines it: a global at the top
    /// level, a local inside a function. A new local's value stays on the
    /// stack as its slot, so the defining statement must not pop it.
    fn define_name(&mut self, token: msc_lex::Token, name: &str) {
        if self.scope_depth == -1 {
            if self.vm.script(self.script).global_names.len() >= crate::compiler::MAX_CONSTANTS {
                self.parser
                    .parse_error("A script can have at most 65536 global variables.");
                self.compile_expression();
                return;
            }
            let index = self.vm.script_add_global(self.script, name);
            self.compile_expression();
            self.emit_opcode(Opcode::StoreGlobal);
            self.emit_short(index);
        } else {
            self.compile_expression();
            if self.locals.len() >= crate::compiler::MAX_VARIABLES {
                self.parser.parse_error(
                    "A function can have at most 256 local variables (including parameters).",
                );
                return;
            }
            // The local is added after its initialiser so `a = a` cannot
            // read the slot being defined.
            self.add_local(token);
            self.new_local = true;
        }
    }

    /// Infix assignment only fires for targets no prefix parselet claimed.
    fn expr_bad_assignment(&mut self) {
        self.parser.parse_error("Invalid assignment target.");
        self.compile_expression();
        self.emit_opcode(Opcode::Pop);
    }

    fn expr_binary(&mut self) {
        let op = self.parser.previous.kind;

        // Allow the right-hand side to continue on the next line.
        self.parser.match_line(self.vm);
        self.parse_precedence(rule(op).precedence + 1);

        let opcode = match op {
            TokenKind::DotDot => Opcode::Range,
            TokenKind::Percent => Opcode::Mod,
            TokenKind::Amp => Opcode::BitAnd,
            TokenKind::Pipe => Opcode::BitOr,
            TokenKind::Caret => Opcode::BitXor,
            TokenKind::Plus => Opcode::Add,
            TokenKind::Minus => Opcode::Subtract,
            TokenKind::Star => Opcode::Multiply,
            TokenKind::Slash => Opcode::Divide,
            TokenKind::Gt => Opcode::Gt,
            TokenKind::Lt => Opcode::Lt,
            TokenKind::EqEq => Opcode::EqEq,
            TokenKind::NotEq => Opcode::NotEq,
            TokenKind::GtEq => Opcode::GtEq,
            TokenKind::LtEq => Opcode::LtEq,
            TokenKind::ShiftRight => Opcode::BitRshift,
            TokenKind::ShiftLeft => Opcode::BitLshift,
            TokenKind::Is => Opcode::Is,
            TokenKind::In => Opcode::In,
            TokenKind::And => Opcode::And,
            TokenKind::Or => Opcode::Or,
            kind => unreachable!("not a binary operator: {:?}", kind),
        };
        self.emit_opcode(opcode);
    }

    fn expr_unary(&mut self) {
        let op = self.parser.previous.kind;

        self.parser.match_line(self.vm);
        self.parse_precedence(prec::UNARY + 1);

        let opcode = match op {
            TokenKind::Tilde => Opcode::BitNot,
            TokenKind::Minus => Opcode::Negative,
            TokenKind::Not => Opcode::Not,
            kind => unreachable!("not a unary operator: {:?}", kind),
        };
        self.emit_opcode(opcode);
    }

    fn expr_grouping(&mut self) {
        self.compile_expression();
        self.parser
            .consume(self.vm, TokenKind::Rparen, "Expected ')' after expression.");
    }

    /// `[e1, e2, ...]` - the element count is patched once known.
    fn expr_list(&mut self) {
        self.emit_opcode(Opcode::PushList);
        let count_index = self.emit_short(0xffff);

        let mut count: usize = 0;
        if !self.parser.match_token(self.vm, TokenKind::Rbracket) {
            loop {
                self.compile_expression();
                count += 1;
                self.emit_opcode(Opcode::ListAppend);
                if !self.parser.match_token(self.vm, TokenKind::Comma) {
                    break;
                }
            }
            self.parser.consume(
                self.vm,
                TokenKind::Rbracket,
                "Expected ']' after list elements.",
            );
        }

        if count >= crate::compiler::MAX_CONSTANTS {
            self.parser
                .parse_error("A list literal can contain at most 65536 elements.");
        }
        self.patch_short(count_index, count as u16);
    }

    /// `{k1: v1, k2: v2, ...}`
    fn expr_map(&mut self) {
        self.emit_opcode(Opcode::PushMap);

        if !self.parser.match_token(self.vm, TokenKind::Rbrace) {
            loop {
                self.compile_expression();
                self.parser
                    .consume(self.vm, TokenKind::Colon, "Expected ':' after a map key.");
                self.compile_expression();
                self.emit_opcode(Opcode::MapInsert);
                if !self.parser.match_token(self.vm, TokenKind::Comma) {
                    break;
                }
            }
            self.parser.consume(
                self.vm,
                TokenKind::Rbrace,
                "Expected '}' after map entries.",
            );
        }
    }

    /// `callee(a1, a2, ...)`
    fn expr_call(&mut self) {
        let mut argc: usize = 0;
        if !self.parser.match_token(self.vm, TokenKind::Rparen) {
            loop {
                self.compile_expression();
                argc += 1;
                if argc == 256 {
                    self.parser
                        .parse_error("A call can pass at most 255 arguments.");
                }
                if !self.parser.match_token(self.vm, TokenKind::Comma) {
                    break;
                }
            }
            self.parser.consume(
                self.vm,
                TokenKind::Rparen,
                "Expected ')' after call arguments.",
            );
        }
        self.emit_call(argc.min(255) as u8);
    }

    /// `object[index]` load or store.
    fn expr_subscript(&mut self, can_assign: bool) {
        self.compile_expression();
        self.parser.consume(
            self.vm,
            TokenKind::Rbracket,
            "Expected ']' after subscript index.",
        );

        if can_assign && self.parser.match_same_line(self.vm, TokenKind::Eq) {
            self.compile_expression();
            self.emit_opcode(Opcode::SetSubscript);
        } else {
            self.emit_opcode(Opcode::GetSubscript);
        }
    }

    /// `object.name` load or store; the name is interned in the script's
    /// attribute pool and referenced by index.
    fn expr_attrib(&mut self, can_assign: bool) {
        self.parser.consume(
            self.vm,
            TokenKind::Name,
            "Expected an attribute name after '.'.",
        );
        let token = self.parser.previous;
        if token.kind != TokenKind::Name {
            return;
        }
        let name = token.lexeme(self.parser.source);
        let index = self.add_attr_name(name);

        if can_assign && self.parser.match_same_line(self.vm, TokenKind::Eq) {
            self.compile_expression();
            self.emit_opcode(Opcode::SetAttrib);
            self.emit_short(index);
        } else {
            self.emit_opcode(Opcode::GetAttrib);
            self.emit_short(index);
        }
    }

    /// Interns an identifier in the script's attribute-name pool.
    pub(crate) fn add_attr_name(&mut self, name: &str) -> u16 {
        let script = self.script;
        if self.vm.script_find_name(script, NamePool::Attrs, name).is_none()
            && self.vm.script(script).names.len() >= crate::compiler::MAX_CONSTANTS
        {
            self.parser
                .parse_error("A script can intern at most 65536 names.");
            return 0;
        }
        self.vm.script_add_name(script, NamePool::Attrs, name)
    }

    fn resolve_name(&self, name: &str) -> NameRef {
        if let Some(index) = self.resolve_local(name) {
            return NameRef::Local(index);
        }
        if let Some(index) = self
            .vm
            .script_find_name(self.script, NamePool::Globals, name)
        {
            return NameRef::Global(index);
        }
        if let Some(index) = self
            .vm
            .script_find_name(self.script, NamePool::Functions, name)
        {
            return NameRef::Function(index);
        }
        NameRef::NotDefined
    }

    /// Innermost local with the given name, if any.
    fn resolve_local(&self, name: &str) -> Option<u8> {
        self.locals
            .iter()
            .rposition(|local| &self.parser.source[local.start..local.start + local.length] == name)
            .map(|index| index as u8)
    }
}

/// The type-name spelling of a type literal token.
fn type_literal_name(kind: TokenKind) -> &'static str {
    match kind {
        TokenKind::BoolType => "Bool",
        TokenKind::NumType => "Num",
        TokenKind::StringType => "String",
        TokenKind::ArrayType => "Array",
        TokenKind::MapType => "Map",
        TokenKind::RangeType => "Range",
        TokenKind::FunctionType => "Function",
        TokenKind::ObjectType => "Object",
        kind => unreachable!("not a type literal: {:?}", kind),
    }
}

/// The binary opcode a compound assignment desugars to, or `None` for a
/// plain `=`.
fn compound_opcode(op: TokenKind) -> Option<Opcode> {
    match op {
        TokenKind::PlusEq => Some(Opcode::Add),
        TokenKind::MinusEq => Some(Opcode::Subtract),
        TokenKind::StarEq => Some(Opcode::Multiply),
        TokenKind::SlashEq => Some(Opcode::Divide),
        _ => None,
    }
}
