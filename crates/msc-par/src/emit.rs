//! Bytecode emission.
//!
//! All emission goes into the current function's [`Code`]: every
//! instruction byte gets a parallel line-number entry, and every opcode
//! updates the tracked operand-stack depth so the function records the peak
//! it needs at run time. `CALL` and the patched element count of
//! `PUSH_LIST` are the only operands the fixed-delta table cannot cover;
//! [`Compiler::emit_call`] applies the variable delta explicitly.
//!
//! [`Code`]: mgc::Code

use mgc::{Opcode, Value};

use crate::compiler::{Compiler, MAX_CONSTANTS, MAX_JUMP};

impl<'a> Compiler<'a> {
    /// Length of the current function's bytecode.
    pub(crate) fn code_len(&self) -> usize {
        self.vm.func(self.func).code().opcodes.len()
    }

    /// Appends one byte and its line entry; returns the byte's index.
    pub(crate) fn emit_byte(&mut self, byte: u8) -> usize {
        let line = self.parser.previous.line;
        let code = self.vm.func_mut(self.func).code_mut();
        code.opcodes.push(byte);
        code.oplines.push(line);
        code.opcodes.len() - 1
    }

    /// Appends a big-endian two-byte operand; returns its first index.
    pub(crate) fn emit_short(&mut self, value: u16) -> usize {
        let index = self.emit_byte((value >> 8) as u8);
        self.emit_byte((value & 0xff) as u8);
        index
    }

    /// Appends an opcode and applies its fixed stack delta.
    pub(crate) fn emit_opcode(&mut self, opcode: Opcode) {
        self.emit_byte(opcode as u8);
        self.apply_stack_effect(opcode.stack_effect());
    }

    /// Appends a `CALL` with its argument count; the delta is `-argc`
    /// (the callee and the arguments are replaced by the result).
    pub(crate) fn emit_call(&mut self, argc: u8) {
        self.emit_opcode(Opcode::Call);
        self.emit_byte(argc);
        self.apply_stack_effect(-(argc as i32));
    }

    /// Adjusts the tracked stack depth and records the function's peak.
    pub(crate) fn apply_stack_effect(&mut self, delta: i32) {
        self.stack_size += delta;
        let stack_size = self.stack_size;
        let code = self.vm.func_mut(self.func).code_mut();
        if stack_size > 0 && stack_size as u32 > code.stack_size {
            code.stack_size = stack_size as u32;
        }
    }

    /// Pools `value` in the script's literal buffer, reusing an existing
    /// entry that is `same` as it. Overflowing the pool is a parse error.
    pub(crate) fn add_constant(&mut self, value: Value) -> u16 {
        let literals = &self.vm.script(self.script).literals;
        if let Some(index) = literals.iter().position(|&v| Value::same(v, value)) {
            return index as u16;
        }

        if literals.len() < MAX_CONSTANTS {
            self.vm.script_mut(self.script).literals.push(value);
            (self.vm.script(self.script).literals.len() - 1) as u16
        } else {
            self.parser.parse_error(format!(
                "A script should contain at most {} unique constants.",
                MAX_CONSTANTS
            ));
            (MAX_CONSTANTS - 1) as u16
        }
    }

    /// Emits `CONSTANT` with the pooled index of `value`.
    pub(crate) fn emit_constant(&mut self, value: Value) {
        let index = self.add_constant(value);
        self.emit_opcode(Opcode::Constant);
        self.emit_short(index);
    }

    /// Writes the current bytecode length into the two placeholder bytes at
    /// `addr_index`, big-endian.
    pub(crate) fn patch_jump(&mut self, addr_index: usize) {
        let jump_to = self.code_len();
        if jump_to >= MAX_JUMP {
            self.parser.parse_error("Too large address to jump.");
        }
        self.patch_short(addr_index, (jump_to % MAX_JUMP) as u16);
    }

    /// Overwrites the two bytes at `addr_index` with `value`, big-endian.
    pub(crate) fn patch_short(&mut self, addr_index: usize, value: u16) {
        let code = self.vm.func_mut(self.func).code_mut();
        code.opcodes[addr_index] = (value >> 8) as u8;
        code.opcodes[addr_index + 1] = (value & 0xff) as u8;
    }
}
