//! mgc - Value representation and garbage-collected heap for MiniScript.
//!
//! The compiler front end allocates every script-visible object through the
//! [`Vm`] defined here, and the collector owns their lifetimes from that
//! moment on. The crate provides:
//!
//! - [`Value`]: the tagged union over null, bool, number, object reference
//!   and the internal `undefined` sentinel.
//! - The object kinds of the language: [`Str`], [`List`], [`Map`],
//!   [`Range`], [`Script`], [`Func`] and [`Fiber`], each created only
//!   through a `Vm` constructor that registers it with the collector.
//! - [`Vm`]: the heap manager. It owns the slot table that doubles as the
//!   all-objects list, the temp-roots stack, the gray work list and the
//!   byte accounting that decides when to run a mark/sweep cycle.
//! - [`Opcode`]: the bytecode instruction set the emitter writes and the
//!   interpreter consumes, together with operand widths and stack deltas.
//! - [`Host`]: the embedder interface (error sink, script loader, path
//!   resolver, write callback) supplied when a `Vm` is created.
//!
//! # Rooting discipline
//!
//! A collection may run on any allocation. Code that holds a freshly
//! created object which is not yet reachable from the VM's root set must
//! pin it with [`Vm::push_temp_root`] before allocating again and pop it
//! once the object is linked into the graph. Pushes and pops are strictly
//! LIFO; a mismatched pop is a programmer error and panics.

pub mod heap;
pub mod host;
pub mod object;
pub mod opcode;
pub mod value;

pub use heap::{NamePool, Vm, GROW_FACTOR, MAP_LOAD_PERCENT, MIN_CAPACITY, SCRIPT_BODY_NAME};
pub use host::{ErrorKind, FileHost, Host, HostError};
pub use object::{
    CallFrame, Code, Fiber, Func, FuncImpl, List, Map, MapEntry, NameTable, NativeFn, Obj,
    ObjKind, ObjRef, Range, Script, Str,
};
pub use opcode::Opcode;
pub use value::Value;

/// Crate version string from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
