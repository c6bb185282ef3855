//! Single-pass compilation: statements, declarations and the compile
//! entry points.
//!
//! The compiler owns the parser and emits bytecode while it parses; there
//! is no intermediate tree. Scope is tracked with a depth counter
//! (-1 = top level, 0 = parameters, >= 1 = nested blocks) and a flat array
//! of locals; loops are a stack of contexts carrying their start address
//! and pending `break` patches.

use log::debug;
use mgc::{ErrorKind, HostError, NamePool, ObjRef, Opcode, Vm};
use msc_lex::{Token, TokenKind};
use msc_util::Handler;
use thiserror::Error;

use crate::parser::Parser;

/// The maximum number of local variables in one compilation context,
/// parameters included. Bounded by the one-byte local index operand.
pub const MAX_VARIABLES: usize = 256;

/// The maximum number of unique literal constants per script. Bounded by
/// the two-byte constant index operand.
pub const MAX_CONSTANTS: usize = 1 << 16;

/// The maximum bytecode address a jump can target. Bounded by the two-byte
/// jump operand.
pub const MAX_JUMP: usize = 1 << 16;

/// The maximum number of `break` statements in one loop.
pub const MAX_BREAK_PATCH: usize = 256;

/// A local variable (or parameter) of the current compilation context.
pub(crate) struct Local {
    /// Byte offset of the name in the source.
    pub start: usize,
    /// Byte length of the name.
    pub length: usize,
    /// Scope depth the local was declared in.
    pub depth: i32,
    /// Declaration line, kept for diagnostics.
    #[allow(dead_code)]
    pub line: u32,
}

/// Per-loop compilation context.
struct LoopCtx {
    /// Bytecode index execution jumps back to.
    start: usize,
    /// Placeholder indices of `break` jumps, patched after the loop.
    patches: Vec<usize>,
}

/// Result of a successful compile run.
///
/// A script is produced even when diagnostics were reported; `has_errors`
/// tells whether it is valid to execute.
#[derive(Clone, Copy, Debug)]
pub struct Compilation {
    /// The compiled script, owned by the VM.
    pub script: ObjRef,
    /// True when any compile error was reported.
    pub has_errors: bool,
}

/// Failure to even start compiling.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to load script '{path}'")]
    LoadFailed {
        path: String,
        #[source]
        source: HostError,
    },
}

/// The single-pass compiler.
pub(crate) struct Compiler<'a> {
    pub(crate) vm: &'a mut Vm,
    pub(crate) parser: Parser<'a>,

    /// The script being compiled; rooted in the VM by the caller.
    pub(crate) script: ObjRef,
    /// The function bytecode is currently emitted into.
    pub(crate) func: ObjRef,

    /// -1 at the top level, 0 in a parameter list, >= 1 in nested blocks.
    pub(crate) scope_depth: i32,
    pub(crate) locals: Vec<Local>,
    /// Tracked operand-stack depth of the current function.
    pub(crate) stack_size: i32,

    loops: Vec<LoopCtx>,
    /// Set when the last expression statement defined a new local, whose
    /// value must stay on the stack as the local's slot.
    pub(crate) new_local: bool,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(
        vm: &'a mut Vm,
        handler: &'a Handler,
        source: &'a str,
        script: ObjRef,
    ) -> Self {
        let func = vm.script(script).body();
        Self {
            vm,
            parser: Parser::new(source, handler),
            script,
            func,
            scope_depth: -1,
            locals: Vec::new(),
            stack_size: 0,
            loops: Vec::new(),
            new_local: false,
        }
    }

    /// Compiles the whole source into the script.
    pub(crate) fn run(&mut self) {
        // Prime the token window: current <- next.
        self.parser.lex_token(self.vm);
        self.parser.lex_token(self.vm);
        self.parser.match_line(self.vm);

        let mut seen_other = false;
        while !self.parser.match_token(self.vm, TokenKind::Eof) {
            if self.parser.match_token(self.vm, TokenKind::Native) {
                // Tolerate `native def name(...)` alongside `native name(...)`.
                self.parser.match_token(self.vm, TokenKind::Def);
                self.compile_function(true);
                seen_other = true;
            } else if self.parser.match_token(self.vm, TokenKind::Def) {
                self.compile_function(false);
                seen_other = true;
            } else if self.parser.match_token(self.vm, TokenKind::Import) {
                self.compile_import(seen_other);
            } else {
                self.compile_statement();
                seen_other = true;
            }
        }

        // Terminate the top-level body.
        self.emit_opcode(Opcode::PushNull);
        self.emit_opcode(Opcode::Return);
    }

    /// Releases the parser's rooted literals; call once parsing is done.
    pub(crate) fn finish(mut self) {
        self.parser.release_roots(self.vm);
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    /// `def name(params) <body> end` or `native name(params)`.
    fn compile_function(&mut self, is_native: bool) {
        self.parser
            .consume(self.vm, TokenKind::Name, "Expected a function name.");
        let name_token = self.parser.previous;
        if name_token.kind != TokenKind::Name {
            return;
        }
        let name = name_token.lexeme(self.parser.source);

        let func = match self
            .vm
            .script_find_name(self.script, NamePool::Functions, name)
        {
            Some(index) => {
                self.parser
                    .parse_error(format!("Name '{}' is already defined.", name));
                // Recompile into the existing function so the function
                // buffer and its name table stay index-parallel.
                let func = self.vm.script(self.script).functions[index as usize];
                let f = self.vm.func_mut(func);
                f.arity = 0;
                f.payload = if is_native {
                    mgc::FuncImpl::Native(None)
                } else {
                    mgc::FuncImpl::Code(mgc::Code::default())
                };
                func
            }
            None => {
                if self
                    .vm
                    .script_find_name(self.script, NamePool::Globals, name)
                    .is_some()
                {
                    self.parser
                        .parse_error(format!("Name '{}' is already defined.", name));
                }
                self.vm.new_function(name, Some(self.script), is_native)
            }
        };

        let saved_func = std::mem::replace(&mut self.func, func);
        let saved_stack = std::mem::replace(&mut self.stack_size, 0);
        let locals_start = self.locals.len();

        self.parser.consume(
            self.vm,
            TokenKind::Lparen,
            "Expected '(' after function name.",
        );
        self.scope_depth += 1; // parameter scope

        let mut arity: i32 = 0;
        if !self.parser.match_token(self.vm, TokenKind::Rparen) {
            loop {
                self.parser
                    .consume(self.vm, TokenKind::Name, "Expected a parameter name.");
                let param = self.parser.previous;
                if param.kind == TokenKind::Name {
                    let param_name = param.lexeme(self.parser.source);
                    if self.local_in_current_scope(param_name) {
                        self.parser
                            .parse_error("Multiple definition of a parameter.");
                    } else if self.locals.len() >= MAX_VARIABLES {
                        self.parser.parse_error(
                            "A function can have at most 256 local variables (including parameters).",
                        );
                    } else {
                        self.add_local(param);
                    }
                    arity += 1;
                }
                if !self.parser.match_token(self.vm, TokenKind::Comma) {
                    break;
                }
            }
            self.parser
                .consume(self.vm, TokenKind::Rparen, "Expected ')' after parameters.");
        }
        self.vm.func_mut(func).arity = arity;

        self.parser.consume_end_statement(self.vm);

        if !is_native {
            self.compile_block_body(false);
            self.parser
                .consume(self.vm, TokenKind::End, "Expected 'end' after function body.");

            // Bodies that fall off the end return null.
            self.emit_opcode(Opcode::PushNull);
            self.emit_opcode(Opcode::Return);

            self.parser.consume_end_statement(self.vm);
        }

        // Leave the parameter scope. Parameters are released by the frame
        // teardown at run time, so no pops are emitted for them.
        self.locals.truncate(locals_start);
        self.scope_depth -= 1;
        self.stack_size = saved_stack;
        self.func = saved_func;
    }

    /// `import name` - position enforced, semantics not yet defined.
    fn compile_import(&mut self, seen_other: bool) {
        if self.parser.peek() == TokenKind::Name || self.parser.peek() == TokenKind::String {
            self.parser.lex_token(self.vm);
        } else {
            self.parser
                .parse_error("Expected a script name after 'import'.");
        }

        if seen_other {
            self.parser
                .parse_error("An 'import' statement should precede all other statements.");
        } else {
            self.parser
                .parse_error("The 'import' statement is not implemented yet.");
        }
        self.parser.consume_end_statement(self.vm);
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_statement(&mut self) {
        if self.parser.match_token(self.vm, TokenKind::Break) {
            if self.loops.is_empty() {
                self.parser
                    .parse_error("Cannot use 'break' outside a loop.");
                return;
            }

            let over_budget = {
                let ctx = self.loops.last().expect("loop stack underflow");
                ctx.patches.len() >= MAX_BREAK_PATCH
            };
            if over_budget {
                self.parser
                    .parse_error("Too many break statements within a loop.");
            } else {
                self.emit_opcode(Opcode::Jump);
                let patch = self.emit_short(0xffff);
                self.loops
                    .last_mut()
                    .expect("loop stack underflow")
                    .patches
                    .push(patch);
            }
            self.parser.consume_end_statement(self.vm);
        } else if self.parser.match_token(self.vm, TokenKind::Continue) {
            if self.loops.is_empty() {
                self.parser
                    .parse_error("Cannot use 'continue' outside a loop.");
                return;
            }

            let start = self.loops.last().expect("loop stack underflow").start;
            self.emit_opcode(Opcode::Jump);
            if start >= MAX_JUMP {
                self.parser.parse_error("Too large address to jump.");
            }
            self.emit_short((start % MAX_JUMP) as u16);
            self.parser.consume_end_statement(self.vm);
        } else if self.parser.match_token(self.vm, TokenKind::Return) {
            if self.scope_depth == -1 {
                self.parser
                    .parse_error("Invalid 'return' outside a function.");
                return;
            }

            if matches!(self.parser.peek(), TokenKind::Semicolon | TokenKind::Line) {
                self.emit_opcode(Opcode::PushNull);
                self.emit_opcode(Opcode::Return);
            } else {
                self.compile_expression(); // return value
                self.emit_opcode(Opcode::Return);
            }
            self.parser.consume_end_statement(self.vm);
        } else if self.parser.match_token(self.vm, TokenKind::If) {
            self.compile_if_statement();
            self.parser.consume_end_statement(self.vm);
        } else if self.parser.match_token(self.vm, TokenKind::While) {
            self.compile_while_statement();
            self.parser.consume_end_statement(self.vm);
        } else if self.parser.match_token(self.vm, TokenKind::For) {
            // Reserved; the grammar is not settled yet.
            self.parser
                .parse_error("The 'for' statement is not implemented yet.");
            self.skip_to_line_end();
        } else {
            self.new_local = false;
            self.compile_expression();
            if self.new_local {
                // The value is the fresh local's slot; keep it.
                self.new_local = false;
            } else {
                self.emit_opcode(Opcode::Pop);
            }
            self.parser.consume_end_statement(self.vm);
        }
    }

    /// `if cond do? <body> (elif cond do? <body>)* (else <body>)? end`
    ///
    /// Each taken arm jumps past the remaining arms, so exactly one arm
    /// runs.
    fn compile_if_statement(&mut self) {
        self.compile_expression(); // condition
        self.emit_opcode(Opcode::JumpIfNot);
        let mut arm_patch = Some(self.emit_short(0xffff));

        self.parser.consume_start_block(self.vm);
        self.compile_block_body(true);

        let mut end_patches: Vec<usize> = Vec::new();
        loop {
            if self.parser.match_token(self.vm, TokenKind::Elif) {
                self.emit_opcode(Opcode::Jump);
                end_patches.push(self.emit_short(0xffff));
                if let Some(patch) = arm_patch.take() {
                    self.patch_jump(patch);
                }

                self.compile_expression();
                self.emit_opcode(Opcode::JumpIfNot);
                arm_patch = Some(self.emit_short(0xffff));

                self.parser.consume_start_block(self.vm);
                self.compile_block_body(true);
            } else if self.parser.match_token(self.vm, TokenKind::Else) {
                self.emit_opcode(Opcode::Jump);
                end_patches.push(self.emit_short(0xffff));
                if let Some(patch) = arm_patch.take() {
                    self.patch_jump(patch);
                }

                self.compile_block_body(false);
                break;
            } else {
                break;
            }
        }

        if let Some(patch) = arm_patch {
            self.patch_jump(patch);
        }
        for patch in end_patches {
            self.patch_jump(patch);
        }

        self.parser
            .consume(self.vm, TokenKind::End, "Expected 'end' after [if] statement.");
    }

    /// `while cond do? <body> end`
    fn compile_while_statement(&mut self) {
        let start = self.code_len();
        self.loops.push(LoopCtx {
            start,
            patches: Vec::new(),
        });

        self.compile_expression(); // condition
        self.emit_opcode(Opcode::JumpIfNot);
        let exit_patch = self.emit_short(0xffff);

        self.parser.consume_start_block(self.vm);
        self.compile_block_body(false);
        self.parser.consume(
            self.vm,
            TokenKind::End,
            "Expected 'end' after [while] statement.",
        );

        self.emit_opcode(Opcode::Jump);
        if start >= MAX_JUMP {
            self.parser.parse_error("Too large address to jump.");
        }
        self.emit_short((start % MAX_JUMP) as u16);

        self.patch_jump(exit_patch);

        let ctx = self.loops.pop().expect("loop stack underflow");
        for patch in ctx.patches {
            self.patch_jump(patch);
        }
    }

    /// Statements until `end` (or `elif`/`else` when compiling an if-arm).
    fn compile_block_body(&mut self, if_body: bool) {
        self.enter_block();

        loop {
            self.parser.match_line(self.vm);
            let next = self.parser.peek();
            if next == TokenKind::End
                || next == TokenKind::Eof
                || (if_body && (next == TokenKind::Else || next == TokenKind::Elif))
            {
                break;
            }
            self.compile_statement();
        }

        self.exit_block();
    }

    /// Skips tokens to the end of the line; crude resynchronisation after
    /// an unparseable statement.
    fn skip_to_line_end(&mut self) {
        while !matches!(
            self.parser.peek(),
            TokenKind::Line | TokenKind::Eof | TokenKind::End
        ) {
            self.parser.lex_token(self.vm);
        }
    }

    // =========================================================================
    // Scope tracking
    // =========================================================================

    fn enter_block(&mut self) {
        self.scope_depth += 1;
    }

    /// Discards the block's locals, emitting one `POP` per slot so the
    /// runtime stack matches the compile-time model.
    fn exit_block(&mut self) {
        debug_assert!(self.scope_depth > -1, "cannot exit the top level");

        while let Some(local) = self.locals.last() {
            if local.depth < self.scope_depth {
                break;
            }
            self.locals.pop();
            self.emit_opcode(Opcode::Pop);
        }
        self.scope_depth -= 1;
    }

    /// Records a local for the current scope. The caller has checked the
    /// variable budget.
    pub(crate) fn add_local(&mut self, token: Token) {
        debug_assert!(self.locals.len() < MAX_VARIABLES);
        self.locals.push(Local {
            start: token.start,
            length: token.length,
            depth: self.scope_depth,
            line: token.line,
        });
    }

    /// True when a local with this name exists in the current scope.
    pub(crate) fn local_in_current_scope(&self, name: &str) -> bool {
        self.locals.iter().any(|local| {
            local.depth == self.scope_depth
                && &self.parser.source[local.start..local.start + local.length] == name
        })
    }
}

/// Compiles the script at `path`, loading its source through the VM's
/// host. The host's `load_done` callback runs after compilation finishes,
/// whether or not it produced errors.
pub fn compile(vm: &mut Vm, path: &str) -> Result<Compilation, CompileError> {
    let source = match vm.host_mut().load_script(path) {
        Ok(source) => source,
        Err(source) => {
            return Err(CompileError::LoadFailed {
                path: path.to_string(),
                source,
            })
        }
    };

    let compilation = compile_source(vm, path, &source);
    vm.host_mut().load_done(path);
    Ok(compilation)
}

/// Compiles in-memory source text. `path` is only used for diagnostics.
///
/// Diagnostics are forwarded to the host's error sink with
/// [`ErrorKind::Compile`]; the returned script is owned by the VM and kept
/// alive by it for as long as it stays reachable from the embedder's roots.
pub fn compile_source(vm: &mut Vm, path: &str, source: &str) -> Compilation {
    let source = strip_bom(source);
    let handler = Handler::new();

    let script = vm.new_script();
    vm.add_root(script);

    let mut compiler = Compiler::new(vm, &handler, source, script);
    compiler.run();
    compiler.finish();

    for diagnostic in handler.diagnostics() {
        vm.host_mut()
            .error(ErrorKind::Compile, Some(path), diagnostic.line, &diagnostic.message);
    }

    // The script stays registered as a VM root: the embedder holds a
    // reference to it, and the collector must not sweep it from under them.

    debug!(
        "compiled '{}': {} function(s), {} constant(s), {} error(s)",
        path,
        vm.script(script).functions.len(),
        vm.script(script).literals.len(),
        handler.error_count()
    );

    Compilation {
        script,
        has_errors: handler.has_errors(),
    }
}

/// Drops a leading UTF-8 byte-order mark.
fn strip_bom(source: &str) -> &str {
    source.strip_prefix('\u{feff}').unwrap_or(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgc::{Code, FileHost, Host, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    // =========================================================================
    // Helpers
    // =========================================================================

    fn compile_str(source: &str) -> (Vm, Compilation) {
        let mut vm = Vm::new(Box::new(FileHost::new()));
        let compilation = compile_source(&mut vm, "test.ms", source);
        (vm, compilation)
    }

    /// Host that records forwarded compile errors.
    struct RecordingHost {
        errors: Rc<RefCell<Vec<(u32, String)>>>,
    }

    impl Host for RecordingHost {
        fn load_script(&mut self, path: &str) -> Result<String, HostError> {
            Err(HostError::NotFound(path.to_string()))
        }

        fn write(&mut self, _text: &str) {}

        fn error(&mut self, kind: ErrorKind, _file: Option<&str>, line: u32, message: &str) {
            if kind == ErrorKind::Compile {
                self.errors.borrow_mut().push((line, message.to_string()));
            }
        }
    }

    fn compile_rec(source: &str) -> (Vm, Compilation, Rc<RefCell<Vec<(u32, String)>>>) {
        let errors = Rc::new(RefCell::new(Vec::new()));
        let mut vm = Vm::new(Box::new(RecordingHost {
            errors: Rc::clone(&errors),
        }));
        let compilation = compile_source(&mut vm, "test.ms", source);
        (vm, compilation, errors)
    }

    fn messages(errors: &Rc<RefCell<Vec<(u32, String)>>>) -> Vec<String> {
        errors.borrow().iter().map(|(_, m)| m.clone()).collect()
    }

    fn body_code<'v>(vm: &'v Vm, compilation: &Compilation) -> &'v Code {
        vm.func(vm.script(compilation.script).body()).code()
    }

    #[derive(Debug, Clone, Copy)]
    struct Ins {
        op: Opcode,
        operand: usize,
        addr: usize,
    }

    /// Walks a bytecode buffer into decoded instructions.
    fn decode(code: &Code) -> Vec<Ins> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < code.opcodes.len() {
            let op = Opcode::from_byte(code.opcodes[i]).expect("undecodable opcode");
            let operand = match op.operand_width() {
                0 => 0,
                1 => code.opcodes[i + 1] as usize,
                2 => ((code.opcodes[i + 1] as usize) << 8) | code.opcodes[i + 2] as usize,
                _ => unreachable!(),
            };
            out.push(Ins { op, operand, addr: i });
            i += 1 + op.operand_width();
        }
        out
    }

    fn ops(code: &Code) -> Vec<Opcode> {
        decode(code).iter().map(|ins| ins.op).collect()
    }

    /// Maximum prefix sum of the per-instruction stack deltas.
    fn linear_peak(code: &Code) -> i32 {
        let mut depth = 0;
        let mut peak = 0;
        for ins in decode(code) {
            let delta = match ins.op {
                Opcode::Call => -(ins.operand as i32),
                _ => ins.op.stack_effect(),
            };
            depth += delta;
            peak = peak.max(depth);
        }
        peak
    }

    fn assert_line_table(code: &Code) {
        assert_eq!(code.opcodes.len(), code.oplines.len());
    }

    // =========================================================================
    // Literals and constant pooling
    // =========================================================================

    #[test]
    fn test_constant_pooling_dedups_numbers() {
        let (vm, compilation) = compile_str("x = 3.14\ny = 3.14\nz = 3.14 + 3.14\n");
        assert!(!compilation.has_errors);

        let literals = &vm.script(compilation.script).literals;
        let hits = literals
            .iter()
            .filter(|&&v| Value::same(v, Value::Num(3.14)))
            .count();
        assert_eq!(hits, 1);
        assert_eq!(literals.len(), 1);
    }

    #[test]
    fn test_string_literal_reaches_pool() {
        let (vm, compilation) = compile_str("s = \"hi\"\n");
        assert!(!compilation.has_errors);

        let literals = &vm.script(compilation.script).literals;
        assert_eq!(literals.len(), 1);
        let string = literals[0].as_obj().unwrap();
        assert_eq!(vm.string(string).as_str(), "hi");
    }

    #[test]
    fn test_pooled_literals_survive_collection() {
        let (mut vm, compilation) = compile_str("s = \"keepsake\"\nn = 42\n");
        vm.collect_garbage();

        let literals = &vm.script(compilation.script).literals;
        let string = literals[0].as_obj().unwrap();
        assert_eq!(vm.string(string).as_str(), "keepsake");
    }

    #[test]
    fn test_null_true_false_literals() {
        let (vm, compilation) = compile_str("a = null\nb = true\nc = false\n");
        assert!(!compilation.has_errors);

        let code = body_code(&vm, &compilation);
        let kinds = ops(code);
        assert!(kinds.contains(&Opcode::PushNull));

        let literals = &vm.script(compilation.script).literals;
        assert!(literals.iter().any(|&v| Value::same(v, Value::Bool(true))));
        assert!(literals.iter().any(|&v| Value::same(v, Value::Bool(false))));
    }

    #[test]
    fn test_type_name_literal() {
        let (vm, compilation) = compile_str("x = 1\nt = x is Num\n");
        assert!(!compilation.has_errors);

        // The type name is interned once and pooled as a string constant.
        let script = vm.script(compilation.script);
        assert_eq!(script.names.len(), 1);
        assert_eq!(vm.string(script.names.get(0)).as_str(), "Num");
        assert!(ops(body_code(&vm, &compilation)).contains(&Opcode::Is));
    }

    // =========================================================================
    // Globals, locals and assignment
    // =========================================================================

    #[test]
    fn test_global_definition_and_use() {
        let (vm, compilation) = compile_str("x = 1\ny = x + 1\n");
        assert!(!compilation.has_errors);

        let script = vm.script(compilation.script);
        assert_eq!(script.globals.len(), 2);
        assert_eq!(vm.string(script.global_names.get(0)).as_str(), "x");
        assert_eq!(vm.string(script.global_names.get(1)).as_str(), "y");

        let code = body_code(&vm, &compilation);
        assert_line_table(code);
        assert_eq!(
            ops(code),
            vec![
                Opcode::Constant,
                Opcode::StoreGlobal,
                Opcode::Pop,
                Opcode::PushGlobal,
                Opcode::Constant,
                Opcode::Add,
                Opcode::StoreGlobal,
                Opcode::Pop,
                Opcode::PushNull,
                Opcode::Return,
            ]
        );
    }

    #[test]
    fn test_compound_assignment() {
        let (vm, compilation) = compile_str("x = 1\nx += 2\n");
        assert!(!compilation.has_errors);

        let code = body_code(&vm, &compilation);
        assert_eq!(
            ops(code),
            vec![
                Opcode::Constant,
                Opcode::StoreGlobal,
                Opcode::Pop,
                Opcode::PushGlobal,
                Opcode::Constant,
                Opcode::Add,
                Opcode::StoreGlobal,
                Opcode::Pop,
                Opcode::PushNull,
                Opcode::Return,
            ]
        );
    }

    #[test]
    fn test_undefined_name_is_an_error() {
        let (_vm, compilation, errors) = compile_rec("x\n");
        assert!(compilation.has_errors);
        assert_eq!(messages(&errors), vec!["Name 'x' is not defined."]);
    }

    #[test]
    fn test_compound_assignment_to_undefined_is_an_error() {
        let (_vm, compilation, errors) = compile_rec("x += 1\n");
        assert!(compilation.has_errors);
        assert_eq!(messages(&errors), vec!["Variable 'x' is not defined."]);
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (_vm, compilation, errors) = compile_rec("x = 1\n1 + 2 = x\n");
        assert!(compilation.has_errors);
        assert!(messages(&errors).contains(&"Invalid assignment target.".to_string()));
    }

    #[test]
    fn test_locals_inside_function() {
        let (vm, compilation) = compile_str("def f()\n  a = 1\n  b = a\n  return b\nend\n");
        assert!(!compilation.has_errors);

        let script = vm.script(compilation.script);
        let func = vm.func(script.functions[1]);
        let code = func.code();
        assert_line_table(code);
        assert_eq!(
            ops(code),
            vec![
                Opcode::Constant,  // a's slot
                Opcode::PushLocal, // read a
                Opcode::PushLocal, // read b
                Opcode::Return,
                Opcode::Pop, // block exit discards b
                Opcode::Pop, // block exit discards a
                Opcode::PushNull,
                Opcode::Return,
            ]
        );
        let loads: Vec<usize> = decode(code)
            .iter()
            .filter(|i| i.op == Opcode::PushLocal)
            .map(|i| i.operand)
            .collect();
        assert_eq!(loads, vec![0, 1]);
        assert_eq!(code.stack_size as i32, linear_peak(code));
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn test_break_outside_loop() {
        let (vm, compilation, errors) = compile_rec("break\n");
        assert!(compilation.has_errors);
        assert_eq!(messages(&errors), vec!["Cannot use 'break' outside a loop."]);

        // No jump was emitted for the invalid break.
        let code = body_code(&vm, &compilation);
        assert_eq!(ops(code), vec![Opcode::PushNull, Opcode::Return]);
    }

    #[test]
    fn test_continue_outside_loop() {
        let (_vm, compilation, errors) = compile_rec("continue\n");
        assert!(compilation.has_errors);
        assert_eq!(
            messages(&errors),
            vec!["Cannot use 'continue' outside a loop."]
        );
    }

    #[test]
    fn test_while_break_bytecode_shape() {
        let (vm, compilation) = compile_str("while 1 do\n  break\nend\n");
        assert!(!compilation.has_errors);

        let code = body_code(&vm, &compilation);
        assert_line_table(code);

        let instructions = decode(code);
        let kinds: Vec<Opcode> = instructions.iter().map(|i| i.op).collect();
        assert_eq!(
            kinds,
            vec![
                Opcode::Constant,  // condition
                Opcode::JumpIfNot, // exit jump
                Opcode::Jump,      // break
                Opcode::Jump,      // loop back-edge
                Opcode::PushNull,
                Opcode::Return,
            ]
        );

        let len = code.opcodes.len();
        let past_loop = instructions[4].addr; // address of PUSH_NULL

        assert_eq!(instructions[1].operand, past_loop);
        assert_eq!(instructions[2].operand, past_loop);
        assert_eq!(instructions[3].operand, 0); // back to the condition
        for ins in &instructions {
            match ins.op {
                Opcode::Jump | Opcode::JumpIfNot => assert!(ins.operand < len),
                _ => {}
            }
        }

        // Operands are big-endian: the exit jump's bytes spell the target.
        assert_eq!(code.opcodes[instructions[1].addr + 1], (past_loop >> 8) as u8);
        assert_eq!(code.opcodes[instructions[1].addr + 2], (past_loop & 0xff) as u8);

        assert_eq!(code.stack_size as i32, linear_peak(code));
    }

    #[test]
    fn test_while_continue_targets_loop_start() {
        let (vm, compilation) = compile_str("x = 1\nwhile x do\n  continue\nend\n");
        assert!(!compilation.has_errors);

        let code = body_code(&vm, &compilation);
        let instructions = decode(code);

        // The loop starts after `x = 1` (Constant, StoreGlobal, Pop).
        let loop_start = instructions[3].addr;
        let continues: Vec<&Ins> = instructions
            .iter()
            .filter(|i| i.op == Opcode::Jump && i.operand == loop_start)
            .collect();
        // Both the continue and the loop back-edge land on the condition.
        assert_eq!(continues.len(), 2);
    }

    #[test]
    fn test_if_elif_else_arms_jump_past_alternatives() {
        let (vm, compilation) = compile_str(
            "x = 1\nif x do\n  x = 2\nelif x do\n  x = 3\nelse\n  x = 4\nend\n",
        );
        assert!(!compilation.has_errors);

        let code = body_code(&vm, &compilation);
        assert_line_table(code);
        let instructions = decode(code);
        let len = code.opcodes.len();

        let jumps: Vec<&Ins> = instructions
            .iter()
            .filter(|i| i.op == Opcode::Jump)
            .collect();
        let conditional: Vec<&Ins> = instructions
            .iter()
            .filter(|i| i.op == Opcode::JumpIfNot)
            .collect();

        assert_eq!(jumps.len(), 2); // one end-jump per non-final arm
        assert_eq!(conditional.len(), 2); // if + elif

        // Both end-jumps land on the same address: right past the else arm.
        let end = jumps[0].operand;
        assert_eq!(jumps[1].operand, end);
        let push_null = instructions[instructions.len() - 2];
        assert_eq!(push_null.op, Opcode::PushNull);
        assert_eq!(end, push_null.addr);

        // Every conditional jump lands just past its own arm's end-jump.
        for (jump_if_not, jump) in conditional.iter().zip(jumps.iter()) {
            assert_eq!(jump_if_not.operand, jump.addr + 3);
        }
        for ins in &instructions {
            match ins.op {
                Opcode::Jump | Opcode::JumpIfNot => assert!(ins.operand < len),
                _ => {}
            }
        }
    }

    #[test]
    fn test_single_line_loop_with_semicolon() {
        let (vm, compilation) = compile_str("x = 2\nwhile x do x = 0; end\n");
        assert!(!compilation.has_errors);
        assert_line_table(body_code(&vm, &compilation));
    }

    #[test]
    fn test_missing_block_opener() {
        let (_vm, compilation, errors) = compile_rec("x = 1\nif x x = 2\nend\n");
        assert!(compilation.has_errors);
        assert!(messages(&errors)
            .contains(&"Expected enter block with newline or 'do'.".to_string()));
    }

    #[test]
    fn test_missing_statement_terminator() {
        let (_vm, compilation, errors) = compile_rec("x = 1 y = 2\n");
        assert!(compilation.has_errors);
        assert!(messages(&errors)
            .contains(&"Expected statement end with newline or ';'.".to_string()));
    }

    #[test]
    fn test_for_is_reserved() {
        let (_vm, compilation, errors) = compile_rec("for x in y do\nend\n");
        assert!(compilation.has_errors);
        assert!(messages(&errors)
            .contains(&"The 'for' statement is not implemented yet.".to_string()));
    }

    // =========================================================================
    // Functions
    // =========================================================================

    #[test]
    fn test_function_declaration() {
        let (vm, compilation) = compile_str("def add(a, b)\n  return a + b\nend\n");
        assert!(!compilation.has_errors);

        let script = vm.script(compilation.script);
        assert_eq!(script.functions.len(), 2); // body + add
        assert_eq!(script.function_names.len(), 2);
        assert_eq!(vm.string(script.function_names.get(1)).as_str(), "add");

        let func = vm.func(script.functions[1]);
        assert_eq!(func.arity, 2);
        assert!(!func.is_native());

        let code = func.code();
        assert_line_table(code);
        assert_eq!(
            ops(code),
            vec![
                Opcode::PushLocal,
                Opcode::PushLocal,
                Opcode::Add,
                Opcode::Return,
                Opcode::PushNull,
                Opcode::Return,
            ]
        );
        assert_eq!(code.stack_size, 2);
        assert_eq!(code.stack_size as i32, linear_peak(code));
    }

    #[test]
    fn test_function_without_return_returns_null() {
        let (vm, compilation) = compile_str("def noop()\nend\n");
        assert!(!compilation.has_errors);

        let script = vm.script(compilation.script);
        let func = vm.func(script.functions[1]);
        assert_eq!(func.arity, 0);
        assert_eq!(
            ops(func.code()),
            vec![Opcode::PushNull, Opcode::Return]
        );
    }

    #[test]
    fn test_native_function_declaration() {
        let (vm, compilation) = compile_str("native clock()\nnative def read_line(prompt)\n");
        assert!(!compilation.has_errors);

        let script = vm.script(compilation.script);
        assert_eq!(script.functions.len(), 3);

        let clock = vm.func(script.functions[1]);
        assert!(clock.is_native());
        assert_eq!(clock.arity, 0);

        let read_line = vm.func(script.functions[2]);
        assert!(read_line.is_native());
        assert_eq!(read_line.arity, 1);
        assert_eq!(vm.string(read_line.name).as_str(), "read_line");
    }

    #[test]
    fn test_duplicate_parameter() {
        let (_vm, compilation, errors) = compile_rec("def f(a, a)\nend\n");
        assert!(compilation.has_errors);
        assert_eq!(
            messages(&errors),
            vec!["Multiple definition of a parameter."]
        );
    }

    #[test]
    fn test_duplicate_function_name() {
        let (vm, compilation, errors) = compile_rec("def f()\nend\ndef f()\nend\n");
        assert!(compilation.has_errors);
        assert!(messages(&errors).contains(&"Name 'f' is already defined.".to_string()));

        // The function buffer and its name table stay index-parallel.
        let script = vm.script(compilation.script);
        assert_eq!(script.functions.len(), script.function_names.len());
    }

    #[test]
    fn test_return_outside_function() {
        let (_vm, compilation, errors) = compile_rec("return\n");
        assert!(compilation.has_errors);
        assert_eq!(
            messages(&errors),
            vec!["Invalid 'return' outside a function."]
        );
    }

    #[test]
    fn test_bare_return_pushes_null() {
        let (vm, compilation) = compile_str("def f()\n  return\nend\n");
        assert!(!compilation.has_errors);

        let script = vm.script(compilation.script);
        let code = vm.func(script.functions[1]).code();
        assert_eq!(
            ops(code),
            vec![
                Opcode::PushNull,
                Opcode::Return,
                Opcode::PushNull,
                Opcode::Return,
            ]
        );
    }

    #[test]
    fn test_call_codegen() {
        let (vm, compilation) = compile_str("def f(a)\n  return a\nend\nx = f(1)\n");
        assert!(!compilation.has_errors);

        let code = body_code(&vm, &compilation);
        let instructions = decode(code);
        assert_eq!(
            ops(code),
            vec![
                Opcode::PushFn,
                Opcode::Constant,
                Opcode::Call,
                Opcode::StoreGlobal,
                Opcode::Pop,
                Opcode::PushNull,
                Opcode::Return,
            ]
        );
        assert_eq!(instructions[0].operand, 1); // function index
        assert_eq!(instructions[2].operand, 1); // argc
        assert_eq!(code.stack_size as i32, linear_peak(code));
    }

    // =========================================================================
    // Collections, attributes, subscripts
    // =========================================================================

    #[test]
    fn test_list_literal() {
        let (vm, compilation) = compile_str("l = [1, 2, 3]\n");
        assert!(!compilation.has_errors);

        let code = body_code(&vm, &compilation);
        let instructions = decode(code);
        assert_eq!(instructions[0].op, Opcode::PushList);
        assert_eq!(instructions[0].operand, 3); // patched element count
        let appends = instructions
            .iter()
            .filter(|i| i.op == Opcode::ListAppend)
            .count();
        assert_eq!(appends, 3);
    }

    #[test]
    fn test_empty_list_literal() {
        let (vm, compilation) = compile_str("l = []\n");
        assert!(!compilation.has_errors);
        let instructions = decode(body_code(&vm, &compilation));
        assert_eq!(instructions[0].op, Opcode::PushList);
        assert_eq!(instructions[0].operand, 0);
    }

    #[test]
    fn test_map_literal() {
        let (vm, compilation) = compile_str("m = {\"k\": 1, \"j\": 2}\n");
        assert!(!compilation.has_errors);

        let kinds = ops(body_code(&vm, &compilation));
        assert_eq!(kinds[0], Opcode::PushMap);
        let inserts = kinds.iter().filter(|&&k| k == Opcode::MapInsert).count();
        assert_eq!(inserts, 2);
    }

    #[test]
    fn test_attribute_access() {
        let (vm, compilation) = compile_str("x = 1\ny = x.length\nx.size = 2\n");
        assert!(!compilation.has_errors);

        let script = vm.script(compilation.script);
        assert_eq!(script.names.len(), 2);
        assert_eq!(vm.string(script.names.get(0)).as_str(), "length");
        assert_eq!(vm.string(script.names.get(1)).as_str(), "size");

        let kinds = ops(body_code(&vm, &compilation));
        assert!(kinds.contains(&Opcode::GetAttrib));
        assert!(kinds.contains(&Opcode::SetAttrib));
    }

    #[test]
    fn test_subscript_access() {
        let (vm, compilation) = compile_str("x = [1]\ny = x[0]\nx[0] = 2\n");
        assert!(!compilation.has_errors);

        let kinds = ops(body_code(&vm, &compilation));
        assert!(kinds.contains(&Opcode::GetSubscript));
        assert!(kinds.contains(&Opcode::SetSubscript));
    }

    #[test]
    fn test_range_and_bitwise_operators() {
        let (vm, compilation) = compile_str("x = 1..10\ny = 1 & 2 | 3 ^ 4\nz = 1 << 2 >> 3\n");
        assert!(!compilation.has_errors);

        let kinds = ops(body_code(&vm, &compilation));
        for expected in [
            Opcode::Range,
            Opcode::BitAnd,
            Opcode::BitOr,
            Opcode::BitXor,
            Opcode::BitLshift,
            Opcode::BitRshift,
        ] {
            assert!(kinds.contains(&expected), "missing {:?}", expected);
        }
    }

    #[test]
    fn test_unary_operators() {
        let (vm, compilation) = compile_str("x = -1\ny = ~2\nz = not x\n");
        assert!(!compilation.has_errors);

        let kinds = ops(body_code(&vm, &compilation));
        assert!(kinds.contains(&Opcode::Negative));
        assert!(kinds.contains(&Opcode::BitNot));
        assert!(kinds.contains(&Opcode::Not));
    }

    #[test]
    fn test_precedence_multiplication_binds_tighter() {
        let (vm, compilation) = compile_str("x = 1 + 2 * 3\n");
        assert!(!compilation.has_errors);

        // 2 * 3 reduces before the addition.
        let kinds: Vec<Opcode> = ops(body_code(&vm, &compilation))
            .into_iter()
            .filter(|k| matches!(k, Opcode::Add | Opcode::Multiply))
            .collect();
        assert_eq!(kinds, vec![Opcode::Multiply, Opcode::Add]);
    }

    #[test]
    fn test_operator_line_wrap() {
        let (vm, compilation) = compile_str("x = 1 +\n    2\n");
        assert!(!compilation.has_errors);
        assert!(ops(body_code(&vm, &compilation)).contains(&Opcode::Add));
    }

    // =========================================================================
    // Imports and larger programs
    // =========================================================================

    #[test]
    fn test_import_is_unimplemented() {
        let (_vm, compilation, errors) = compile_rec("import foo\n");
        assert!(compilation.has_errors);
        assert_eq!(
            messages(&errors),
            vec!["The 'import' statement is not implemented yet."]
        );
    }

    #[test]
    fn test_import_must_come_first() {
        let (_vm, compilation, errors) = compile_rec("x = 1\nimport foo\n");
        assert!(compilation.has_errors);
        assert_eq!(
            messages(&errors),
            vec!["An 'import' statement should precede all other statements."]
        );
    }

    #[test]
    fn test_lex_error_suppresses_cascading_parse_error() {
        let (_vm, compilation, errors) = compile_rec("x = $\n");
        assert!(compilation.has_errors);
        // Only the lexer's message surfaces; the parser stays quiet about
        // the error token.
        assert_eq!(messages(&errors), vec!["Invalid character $"]);
    }

    #[test]
    fn test_error_lines_are_reported() {
        let (_vm, _compilation, errors) = compile_rec("x = 1\ny = 2\nbreak\n");
        let recorded = errors.borrow();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, 3);
    }

    #[test]
    fn test_bom_is_stripped() {
        let (_vm, compilation) = compile_str("\u{feff}x = 1\n");
        assert!(!compilation.has_errors);
    }

    #[test]
    fn test_compilation_continues_past_errors() {
        let (vm, compilation, errors) = compile_rec("break\nx = 1\ny = x\n");
        assert!(compilation.has_errors);
        assert_eq!(errors.borrow().len(), 1);

        // The rest of the program still compiled.
        let script = vm.script(compilation.script);
        assert_eq!(script.globals.len(), 2);
    }

    #[test]
    fn test_fibonacci_program_compiles() {
        let source = "\
def fib(n)
  if n < 2 do
    return n
  end
  return fib(n - 1) + fib(n - 2)
end

result = fib(10)
";
        let (vm, compilation) = compile_str(source);
        assert!(!compilation.has_errors);

        let script = vm.script(compilation.script);
        assert_eq!(script.functions.len(), 2);

        let fib = vm.func(script.functions[1]);
        assert_eq!(fib.arity, 1);
        let code = fib.code();
        assert_line_table(code);
        assert_eq!(code.stack_size as i32, linear_peak(code));

        // The recursive calls go through the function index.
        let calls = decode(code)
            .iter()
            .filter(|i| i.op == Opcode::Call)
            .count();
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_script_body_is_rooted_after_compile() {
        let (mut vm, compilation) = compile_str("x = 42\n");
        vm.collect_garbage();

        // The compiled script survives collections without embedder help.
        let script = vm.script(compilation.script);
        assert_eq!(script.globals.len(), 1);
        assert_eq!(vm.string(script.global_names.get(0)).as_str(), "x");
    }
}
