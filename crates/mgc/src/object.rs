//! Heap object kinds.
//!
//! Every object starts with a header carrying its kind and the collector's
//! mark bit. Objects are only ever created through the [`Vm`] constructors
//! (`new_string`, `new_list`, ...) which initialise the header and register
//! the object with the collector in one step.
//!
//! Ownership runs one way: a [`Script`] owns its [`Func`]tions through the
//! `functions` buffer, while a function's `owner` field is a non-owning back
//! reference that the marker traces but destruction never follows.
//!
//! [`Vm`]: crate::heap::Vm

use crate::value::Value;

/// Handle to a heap object.
///
/// References are indices into the VM's slot table. They stay valid for as
/// long as the object is reachable; holding a reference to a swept object is
/// an invariant violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjRef(pub(crate) u32);

/// Object header plus payload.
#[derive(Debug)]
pub struct Obj {
    /// Mark bit for the tracing collector.
    pub(crate) marked: bool,
    /// The object's payload.
    pub kind: ObjKind,
}

/// The payload of a heap object.
#[derive(Debug)]
pub enum ObjKind {
    Str(Str),
    List(List),
    Map(Map),
    Range(Range),
    Script(Script),
    Func(Func),
    Fiber(Fiber),
}

impl ObjKind {
    /// The language-level type name of this object kind.
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjKind::Str(_) => "String",
            ObjKind::List(_) => "List",
            ObjKind::Map(_) => "Map",
            ObjKind::Range(_) => "Range",
            ObjKind::Script(_) => "Script",
            ObjKind::Func(_) => "Func",
            ObjKind::Fiber(_) => "Fiber",
        }
    }
}

/// An immutable string with a precomputed FNV-1a hash.
///
/// The byte buffer physically ends with a NUL byte that is not counted in
/// the string's length, mirroring the wire layout interpreters expect.
#[derive(Debug)]
pub struct Str {
    hash: u32,
    data: Box<[u8]>,
}

impl Str {
    pub(crate) fn new(text: &str) -> Self {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(0);
        Self {
            hash: crate::value::fnv1a(text.as_bytes()),
            data: data.into_boxed_slice(),
        }
    }

    /// Length in bytes, excluding the trailing NUL.
    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    /// Returns true for the empty string.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The precomputed FNV-1a hash of the content.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    /// Content bytes, excluding the trailing NUL.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len()]
    }

    /// The raw buffer including the trailing NUL.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The content as UTF-8 text.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(self.bytes()).expect("string object holds invalid UTF-8")
    }
}

/// A growable value sequence.
#[derive(Debug, Default)]
pub struct List {
    /// The elements, in order.
    pub elements: Vec<Value>,
}

/// One slot of a map's entry array.
///
/// A slot with an `undefined` key is either empty (`value == false`) or a
/// tombstone left behind by a removal (`value == true`). Tombstones must be
/// traversed during probing but may be reused on insertion.
#[derive(Clone, Copy, Debug)]
pub struct MapEntry {
    pub key: Value,
    pub value: Value,
}

impl MapEntry {
    pub(crate) const EMPTY: MapEntry = MapEntry {
        key: Value::Undefined,
        value: Value::Bool(false),
    };

    /// Returns true if this slot holds a live key/value pair.
    pub fn is_live(&self) -> bool {
        !self.key.is_undefined()
    }
}

/// An open-addressed, linear-probing hash map.
#[derive(Debug, Default)]
pub struct Map {
    pub(crate) count: usize,
    pub(crate) entries: Box<[MapEntry]>,
}

impl Map {
    /// Number of live entries.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Number of slots in the entry array.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// The raw slot array.
    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }
}

/// An inclusive-exclusive numeric range.
#[derive(Debug)]
pub struct Range {
    pub from: f64,
    pub to: f64,
}

/// A growable array of interned string objects.
///
/// `add` (a [`Vm`] method, since it may allocate) returns the index of an
/// existing identical string when present, so indices identify names
/// uniquely for the table's lifetime and the returned references are stable.
///
/// [`Vm`]: crate::heap::Vm
#[derive(Debug, Default)]
pub struct NameTable {
    pub(crate) names: Vec<ObjRef>,
}

impl NameTable {
    /// The interned string at `index`.
    pub fn get(&self, index: u16) -> ObjRef {
        self.names[index as usize]
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the table holds no names.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All interned names, in insertion order.
    pub fn as_slice(&self) -> &[ObjRef] {
        &self.names
    }
}

/// A compiled module.
#[derive(Debug)]
pub struct Script {
    /// Global variable slots, parallel to `global_names`.
    pub globals: Vec<Value>,
    /// Names of the globals, index-parallel to `globals`.
    pub global_names: NameTable,
    /// Pooled literal constants.
    pub literals: Vec<Value>,
    /// Functions declared in the script, in declaration order.
    pub functions: Vec<ObjRef>,
    /// Names of the functions, index-parallel to `functions`.
    pub function_names: NameTable,
    /// Interned identifiers used as attribute names.
    pub names: NameTable,
    pub(crate) body: Option<ObjRef>,
}

impl Script {
    /// The function holding the script's top-level bytecode.
    pub fn body(&self) -> ObjRef {
        self.body.expect("script body is not initialised")
    }
}

/// Bytecode and its side tables for a non-native function.
#[derive(Debug, Default)]
pub struct Code {
    /// The instruction stream.
    pub opcodes: Vec<u8>,
    /// Source line of each byte in `opcodes`, index-parallel.
    pub oplines: Vec<u32>,
    /// Peak operand-stack depth the instructions require.
    pub stack_size: u32,
}

/// A function callable from the host, marshalled by the interpreter.
pub type NativeFn = fn(&mut crate::heap::Vm);

/// The payload of a function: either a native entry point or bytecode.
#[derive(Debug)]
pub enum FuncImpl {
    /// A native function. The pointer is filled in when the host binds it.
    Native(Option<NativeFn>),
    /// A bytecode function compiled from source.
    Code(Code),
}

/// A named function.
#[derive(Debug)]
pub struct Func {
    /// The function's name, borrowed from the owner's name table (or a
    /// dedicated string for ownerless natives).
    pub name: ObjRef,
    /// The script the function belongs to, if any. Non-owning back edge.
    pub owner: Option<ObjRef>,
    /// Declared parameter count; -1 denotes variadic.
    pub arity: i32,
    /// Native pointer or bytecode.
    pub payload: FuncImpl,
}

impl Func {
    /// Returns true for native functions.
    pub fn is_native(&self) -> bool {
        matches!(self.payload, FuncImpl::Native(_))
    }

    /// The function's bytecode.
    ///
    /// # Panics
    ///
    /// Panics for native functions, which have none.
    pub fn code(&self) -> &Code {
        match &self.payload {
            FuncImpl::Code(code) => code,
            FuncImpl::Native(_) => panic!("native function has no bytecode"),
        }
    }

    /// Mutable access to the function's bytecode.
    ///
    /// # Panics
    ///
    /// Panics for native functions, which have none.
    pub fn code_mut(&mut self) -> &mut Code {
        match &mut self.payload {
            FuncImpl::Code(code) => code,
            FuncImpl::Native(_) => panic!("native function has no bytecode"),
        }
    }
}

/// One call frame of a fiber.
#[derive(Clone, Copy, Debug)]
pub struct CallFrame {
    /// The function executing in this frame.
    pub func: ObjRef,
    /// Instruction pointer into the function's bytecode.
    pub ip: usize,
    /// Index of the frame's first slot in the fiber's value stack.
    pub stack_start: usize,
}

/// A cooperatively scheduled execution context.
#[derive(Debug)]
pub struct Fiber {
    /// The function the fiber was created to run.
    pub func: ObjRef,
    /// The operand/value stack.
    pub stack: Vec<Value>,
    /// Stack pointer: number of live slots in `stack`.
    pub sp: usize,
    /// Active call frames, innermost last.
    pub frames: Vec<CallFrame>,
    /// Error string when the fiber has failed.
    pub error: Option<ObjRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_layout() {
        let s = Str::new("hello");
        assert_eq!(s.len(), 5);
        assert_eq!(s.bytes(), b"hello");
        assert_eq!(s.raw_bytes(), b"hello\0");
        assert_eq!(s.raw_bytes()[s.len()], 0);
        assert_eq!(s.as_str(), "hello");
        assert_eq!(s.hash(), crate::value::fnv1a(b"hello"));
    }

    #[test]
    fn test_empty_str() {
        let s = Str::new("");
        assert_eq!(s.len(), 0);
        assert!(s.is_empty());
        assert_eq!(s.raw_bytes(), b"\0");
    }

    #[test]
    fn test_map_entry_markers() {
        let empty = MapEntry::EMPTY;
        assert!(!empty.is_live());
        assert!(empty.key.is_undefined());

        let live = MapEntry {
            key: Value::Num(1.0),
            value: Value::Null,
        };
        assert!(live.is_live());
    }

    #[test]
    fn test_code_default() {
        let code = Code::default();
        assert!(code.opcodes.is_empty());
        assert!(code.oplines.is_empty());
        assert_eq!(code.stack_size, 0);
    }
}
