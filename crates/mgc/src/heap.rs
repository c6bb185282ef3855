//! The VM heap and its mark/sweep collector.
//!
//! [`Vm`] owns every heap object behind a slot table that doubles as the
//! all-objects list: allocation claims a slot (reusing swept ones through a
//! free list) and sweeping clears it. Collection is triggered by byte
//! accounting: every allocation charges an estimate of the object's owned
//! memory, and once the running total passes the threshold a full
//! mark/sweep cycle runs before the allocation proceeds.
//!
//! The root set at collection time is the temp-roots stack plus the
//! persistent root registry. The compiler registers its in-progress script
//! (and the literal values held in its token window) in the registry; the
//! runtime registers the fibers it drives.

use std::mem::size_of;

use log::debug;

use crate::host::Host;
use crate::object::{
    CallFrame, Code, Fiber, Func, FuncImpl, List, Map, MapEntry, NameTable, Obj, ObjKind, ObjRef,
    Range, Script, Str,
};
use crate::value::{fnv1a, Value};

/// Smallest non-zero capacity a map's entry array may have.
pub const MIN_CAPACITY: usize = 8;

/// The factor collections grow and shrink by.
pub const GROW_FACTOR: usize = 2;

/// The maximum percentage of map entries that may be filled before the map
/// grows. Lower values reduce collisions at the cost of memory.
pub const MAP_LOAD_PERCENT: usize = 75;

/// Byte threshold below which the collector never runs.
const INITIAL_GC_THRESHOLD: usize = 1024 * 1024;

/// Name of the function holding a script's top-level bytecode.
pub const SCRIPT_BODY_NAME: &str = "@(ScriptLevel)";

/// Selects one of a script's three name tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamePool {
    /// Global variable names, index-parallel to `Script::globals`.
    Globals,
    /// Function names, index-parallel to `Script::functions`.
    Functions,
    /// Interned attribute-name identifiers.
    Attrs,
}

/// The MiniScript virtual machine state the front end compiles into: the
/// heap, the collector bookkeeping and the embedder host.
pub struct Vm {
    host: Box<dyn Host>,

    /// All heap objects. A `None` slot is free and its index is on
    /// `free_slots`.
    slots: Vec<Option<Obj>>,
    free_slots: Vec<u32>,

    /// Strictly LIFO stack pinning not-yet-linked objects across
    /// allocations.
    temp_roots: Vec<ObjRef>,

    /// Persistent roots: the compiling script, its token-window literals,
    /// running fibers.
    roots: Vec<ObjRef>,

    /// Gray work list of the tricolour marker.
    gray: Vec<ObjRef>,

    bytes_allocated: usize,
    next_gc: usize,
    collections: u64,
}

impl Vm {
    /// Creates a VM with the given embedder host.
    pub fn new(host: Box<dyn Host>) -> Self {
        Self {
            host,
            slots: Vec::new(),
            free_slots: Vec::new(),
            temp_roots: Vec::new(),
            roots: Vec::new(),
            gray: Vec::new(),
            bytes_allocated: 0,
            next_gc: INITIAL_GC_THRESHOLD,
            collections: 0,
        }
    }

    /// The embedder host.
    pub fn host_mut(&mut self) -> &mut dyn Host {
        &mut *self.host
    }

    // =========================================================================
    // Object access
    // =========================================================================

    /// The object behind a reference.
    ///
    /// # Panics
    ///
    /// Panics if the reference points at a swept slot; holding such a
    /// reference is an invariant violation.
    pub fn obj(&self, r: ObjRef) -> &Obj {
        self.slots[r.0 as usize]
            .as_ref()
            .expect("stale object reference")
    }

    /// Mutable access to the object behind a reference.
    pub fn obj_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.0 as usize]
            .as_mut()
            .expect("stale object reference")
    }

    /// The string behind `r`. Panics if `r` is not a string.
    pub fn string(&self, r: ObjRef) -> &Str {
        match &self.obj(r).kind {
            ObjKind::Str(s) => s,
            kind => panic!("expected String, found {}", kind.type_name()),
        }
    }

    /// The list behind `r`. Panics if `r` is not a list.
    pub fn list(&self, r: ObjRef) -> &List {
        match &self.obj(r).kind {
            ObjKind::List(l) => l,
            kind => panic!("expected List, found {}", kind.type_name()),
        }
    }

    /// Mutable access to the list behind `r`.
    pub fn list_mut(&mut self, r: ObjRef) -> &mut List {
        match &mut self.obj_mut(r).kind {
            ObjKind::List(l) => l,
            kind => panic!("expected List, found {}", kind.type_name()),
        }
    }

    /// The map behind `r`. Panics if `r` is not a map.
    pub fn map(&self, r: ObjRef) -> &Map {
        match &self.obj(r).kind {
            ObjKind::Map(m) => m,
            kind => panic!("expected Map, found {}", kind.type_name()),
        }
    }

    /// Mutable access to the map behind `r`.
    pub fn map_mut(&mut self, r: ObjRef) -> &mut Map {
        match &mut self.obj_mut(r).kind {
            ObjKind::Map(m) => m,
            kind => panic!("expected Map, found {}", kind.type_name()),
        }
    }

    /// The range behind `r`. Panics if `r` is not a range.
    pub fn range(&self, r: ObjRef) -> &Range {
        match &self.obj(r).kind {
            ObjKind::Range(range) => range,
            kind => panic!("expected Range, found {}", kind.type_name()),
        }
    }

    /// The script behind `r`. Panics if `r` is not a script.
    pub fn script(&self, r: ObjRef) -> &Script {
        match &self.obj(r).kind {
            ObjKind::Script(s) => s,
            kind => panic!("expected Script, found {}", kind.type_name()),
        }
    }

    /// Mutable access to the script behind `r`.
    pub fn script_mut(&mut self, r: ObjRef) -> &mut Script {
        match &mut self.obj_mut(r).kind {
            ObjKind::Script(s) => s,
            kind => panic!("expected Script, found {}", kind.type_name()),
        }
    }

    /// The function behind `r`. Panics if `r` is not a function.
    pub fn func(&self, r: ObjRef) -> &Func {
        match &self.obj(r).kind {
            ObjKind::Func(f) => f,
            kind => panic!("expected Func, found {}", kind.type_name()),
        }
    }

    /// Mutable access to the function behind `r`.
    pub fn func_mut(&mut self, r: ObjRef) -> &mut Func {
        match &mut self.obj_mut(r).kind {
            ObjKind::Func(f) => f,
            kind => panic!("expected Func, found {}", kind.type_name()),
        }
    }

    /// The fiber behind `r`. Panics if `r` is not a fiber.
    pub fn fiber(&self, r: ObjRef) -> &Fiber {
        match &self.obj(r).kind {
            ObjKind::Fiber(f) => f,
            kind => panic!("expected Fiber, found {}", kind.type_name()),
        }
    }

    /// Mutable access to the fiber behind `r`.
    pub fn fiber_mut(&mut self, r: ObjRef) -> &mut Fiber {
        match &mut self.obj_mut(r).kind {
            ObjKind::Fiber(f) => f,
            kind => panic!("expected Fiber, found {}", kind.type_name()),
        }
    }

    // =========================================================================
    // Roots
    // =========================================================================

    /// Pins an object for the duration of a composite allocation.
    pub fn push_temp_root(&mut self, r: ObjRef) {
        self.temp_roots.push(r);
    }

    /// Releases the most recently pushed temp root.
    ///
    /// # Panics
    ///
    /// Panics on underflow; pushes and pops must pair up exactly.
    pub fn pop_temp_root(&mut self) {
        self.temp_roots
            .pop()
            .expect("temp root stack underflow");
    }

    /// Registers a persistent root.
    pub fn add_root(&mut self, r: ObjRef) {
        self.roots.push(r);
    }

    /// Removes a previously registered persistent root.
    ///
    /// # Panics
    ///
    /// Panics if `r` is not currently registered.
    pub fn remove_root(&mut self, r: ObjRef) {
        let index = self
            .roots
            .iter()
            .rposition(|&root| root == r)
            .expect("removing unregistered root");
        self.roots.swap_remove(index);
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Allocates a string object.
    pub fn new_string(&mut self, text: &str) -> ObjRef {
        let s = Str::new(text);
        self.alloc(ObjKind::Str(s))
    }

    /// Allocates a list, reserving room for `size` elements.
    pub fn new_list(&mut self, size: usize) -> ObjRef {
        self.alloc(ObjKind::List(List {
            elements: Vec::with_capacity(size),
        }))
    }

    /// Allocates an empty map.
    pub fn new_map(&mut self) -> ObjRef {
        self.alloc(ObjKind::Map(Map::default()))
    }

    /// Allocates a range object.
    pub fn new_range(&mut self, from: f64, to: f64) -> ObjRef {
        self.alloc(ObjKind::Range(Range { from, to }))
    }

    /// Allocates a script together with its top-level body function.
    pub fn new_script(&mut self) -> ObjRef {
        let script = self.alloc(ObjKind::Script(Script {
            globals: Vec::new(),
            global_names: NameTable::default(),
            literals: Vec::new(),
            functions: Vec::new(),
            function_names: NameTable::default(),
            names: NameTable::default(),
            body: None,
        }));

        // The body allocates a name string; keep the script reachable
        // until it holds the back reference.
        self.push_temp_root(script);
        let body = self.new_function(SCRIPT_BODY_NAME, Some(script), false);
        self.script_mut(script).body = Some(body);
        self.pop_temp_root();

        script
    }

    /// Allocates a function.
    ///
    /// With an owner, the function is appended to the owner's `functions`
    /// buffer and its name interned in `function_names` at the same index.
    /// Without an owner the function must be native; its name gets a
    /// dedicated string.
    pub fn new_function(&mut self, name: &str, owner: Option<ObjRef>, is_native: bool) -> ObjRef {
        let payload = if is_native {
            FuncImpl::Native(None)
        } else {
            FuncImpl::Code(Code::default())
        };

        match owner {
            Some(script) => {
                let name_index = self.script_add_name(script, NamePool::Functions, name);
                debug_assert_eq!(
                    name_index as usize,
                    self.script(script).functions.len(),
                    "function name table out of step with function buffer"
                );
                let name_ref = self.script(script).function_names.get(name_index);
                let func = self.alloc(ObjKind::Func(Func {
                    name: name_ref,
                    owner: Some(script),
                    arity: 0,
                    payload,
                }));
                self.script_mut(script).functions.push(func);
                func
            }
            None => {
                debug_assert!(is_native, "only native functions may be ownerless");
                let name_ref = self.new_string(name);
                self.push_temp_root(name_ref);
                let func = self.alloc(ObjKind::Func(Func {
                    name: name_ref,
                    owner: None,
                    arity: 0,
                    payload,
                }));
                self.pop_temp_root();
                func
            }
        }
    }

    /// Allocates a fiber rooted at `func`.
    pub fn new_fiber(&mut self, func: ObjRef) -> ObjRef {
        self.alloc(ObjKind::Fiber(Fiber {
            func,
            stack: Vec::new(),
            sp: 0,
            frames: Vec::new(),
            error: None,
        }))
    }

    // =========================================================================
    // Name tables
    // =========================================================================

    /// Finds `name` in one of the script's name tables.
    pub fn script_find_name(&self, script: ObjRef, pool: NamePool, name: &str) -> Option<u16> {
        let table = self.script_pool(script, pool);
        let hash = fnv1a(name.as_bytes());
        table
            .names
            .iter()
            .position(|&r| {
                let s = self.string(r);
                s.hash() == hash && s.bytes() == name.as_bytes()
            })
            .map(|i| i as u16)
    }

    /// Interns `name` in one of the script's name tables, returning the
    /// existing index when an identical string is already present.
    ///
    /// The script must be reachable from the VM roots: the interned string
    /// is allocated before it is linked into the table.
    pub fn script_add_name(&mut self, script: ObjRef, pool: NamePool, name: &str) -> u16 {
        if let Some(index) = self.script_find_name(script, pool, name) {
            return index;
        }

        let s = self.new_string(name);
        let table = self.script_pool_mut(script, pool);
        table.names.push(s);
        (table.names.len() - 1) as u16
    }

    /// Interns a global name and reserves its value slot, keeping the two
    /// buffers index-parallel. Returns the global's index.
    pub fn script_add_global(&mut self, script: ObjRef, name: &str) -> u16 {
        let index = self.script_add_name(script, NamePool::Globals, name);
        let s = self.script_mut(script);
        if index as usize == s.globals.len() {
            s.globals.push(Value::Null);
        }
        index
    }

    fn script_pool(&self, script: ObjRef, pool: NamePool) -> &NameTable {
        let s = self.script(script);
        match pool {
            NamePool::Globals => &s.global_names,
            NamePool::Functions => &s.function_names,
            NamePool::Attrs => &s.names,
        }
    }

    fn script_pool_mut(&mut self, script: ObjRef, pool: NamePool) -> &mut NameTable {
        let s = self.script_mut(script);
        match pool {
            NamePool::Globals => &mut s.global_names,
            NamePool::Functions => &mut s.function_names,
            NamePool::Attrs => &mut s.names,
        }
    }

    // =========================================================================
    // List operations
    // =========================================================================

    /// Appends a value to a list.
    pub fn list_append(&mut self, list: ObjRef, value: Value) {
        let l = self.list_mut(list);
        let before = l.elements.capacity();
        l.elements.push(value);
        let after = l.elements.capacity();
        self.bytes_allocated += (after - before) * size_of::<Value>();
    }

    /// Inserts a value at `index`, shifting later elements up.
    pub fn list_insert(&mut self, list: ObjRef, index: usize, value: Value) {
        let l = self.list_mut(list);
        let before = l.elements.capacity();
        l.elements.insert(index, value);
        let after = l.elements.capacity();
        self.bytes_allocated += (after - before) * size_of::<Value>();
    }

    /// Removes and returns the value at `index`, shifting later elements
    /// down. The backing store shrinks by half once count falls to half the
    /// capacity.
    pub fn list_remove_at(&mut self, list: ObjRef, index: usize) -> Value {
        let l = self.list_mut(list);
        let removed = l.elements.remove(index);

        let capacity = l.elements.capacity();
        if capacity / GROW_FACTOR >= l.elements.len() && capacity > 0 {
            l.elements.shrink_to(capacity / GROW_FACTOR);
            let freed = capacity - l.elements.capacity();
            self.bytes_allocated = self
                .bytes_allocated
                .saturating_sub(freed * size_of::<Value>());
        }

        removed
    }

    // =========================================================================
    // Map operations
    // =========================================================================

    /// Looks up `key`, returning `undefined` when absent.
    pub fn map_get(&self, map: ObjRef, key: Value) -> Value {
        match self.map_find_entry(map, key) {
            Some((index, true)) => self.map(map).entries[index].value,
            _ => Value::Undefined,
        }
    }

    /// Inserts or replaces `key`'s entry.
    pub fn map_set(&mut self, map: ObjRef, key: Value, value: Value) {
        // Grow before the load factor cap is crossed.
        let (count, capacity) = {
            let m = self.map(map);
            (m.count, m.entries.len())
        };
        if count + 1 > capacity * MAP_LOAD_PERCENT / 100 {
            let new_capacity = (capacity * GROW_FACTOR).max(MIN_CAPACITY);
            self.map_resize(map, new_capacity);
        }

        if self.map_insert_entry(map, key, value) {
            self.map_mut(map).count += 1;
        }
    }

    /// Removes `key`, returning its value, or `null` when absent. The slot
    /// becomes a tombstone. Removing the last entry releases the storage.
    pub fn map_remove(&mut self, map: ObjRef, key: Value) -> Value {
        let (index, found) = match self.map_find_entry(map, key) {
            Some(pair) => pair,
            None => return Value::Null,
        };
        if !found {
            return Value::Null;
        }

        let m = self.map_mut(map);
        let value = m.entries[index].value;
        m.entries[index] = MapEntry {
            key: Value::Undefined,
            value: Value::Bool(true),
        };
        m.count -= 1;

        let (count, capacity) = (m.count, m.entries.len());
        if count == 0 {
            self.map_clear(map);
        } else if capacity > MIN_CAPACITY
            && count * 100 / MAP_LOAD_PERCENT < capacity / GROW_FACTOR
        {
            let new_capacity = (capacity / GROW_FACTOR).max(MIN_CAPACITY);
            self.map_resize(map, new_capacity);
        }

        value
    }

    /// Drops every entry and releases the storage.
    pub fn map_clear(&mut self, map: ObjRef) {
        let m = self.map_mut(map);
        let freed = m.entries.len() * size_of::<MapEntry>();
        m.entries = Box::default();
        m.count = 0;
        self.bytes_allocated = self.bytes_allocated.saturating_sub(freed);
    }

    /// Finds the entry for `key`. Returns `None` for a map with no storage;
    /// otherwise `(index, true)` when the key is present, or
    /// `(index, false)` naming the slot an insertion should use (the first
    /// tombstone crossed, if any, else the empty slot that ended the probe).
    fn map_find_entry(&self, map: ObjRef, key: Value) -> Option<(usize, bool)> {
        let m = self.map(map);
        let capacity = m.entries.len();
        if capacity == 0 {
            return None;
        }

        let start_index = self.value_hash(key) as usize % capacity;
        let mut index = start_index;
        let mut tombstone: Option<usize> = None;

        loop {
            let entry = m.entries[index];

            if entry.key.is_undefined() {
                let is_tombstone = match entry.value {
                    Value::Bool(b) => b,
                    _ => panic!("map slot marker must be a bool"),
                };
                if is_tombstone {
                    // Remember the first tombstone; the key may still live
                    // further along the probe sequence.
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                } else {
                    return Some((tombstone.unwrap_or(index), false));
                }
            } else if self.values_equal(entry.key, key) {
                return Some((index, true));
            }

            index = (index + 1) % capacity;
            if index == start_index {
                break;
            }
        }

        // Every slot is a live entry or tombstone; reuse the first tombstone.
        let slot = tombstone.expect("probed a full map with no tombstones");
        Some((slot, false))
    }

    /// Writes `key`/`value`, returning true when the key is new.
    fn map_insert_entry(&mut self, map: ObjRef, key: Value, value: Value) -> bool {
        let (index, found) = self
            .map_find_entry(map, key)
            .expect("map capacity must be ensured before inserting");
        let m = self.map_mut(map);
        m.entries[index] = MapEntry { key, value };
        !found
    }

    /// Rebuilds the entry array at `capacity`, dropping tombstones.
    fn map_resize(&mut self, map: ObjRef, capacity: usize) {
        let old_entries = std::mem::take(&mut self.map_mut(map).entries);
        self.map_mut(map).entries = vec![MapEntry::EMPTY; capacity].into_boxed_slice();

        for entry in old_entries.iter().filter(|e| e.is_live()) {
            self.map_insert_entry(map, entry.key, entry.value);
        }

        let grown = capacity.saturating_sub(old_entries.len()) * size_of::<MapEntry>();
        let shrunk = old_entries.len().saturating_sub(capacity) * size_of::<MapEntry>();
        self.bytes_allocated = (self.bytes_allocated + grown).saturating_sub(shrunk);
    }

    // =========================================================================
    // Allocation and collection
    // =========================================================================

    /// Claims a slot for a new object, collecting first when the byte
    /// budget is exhausted.
    fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        let bytes = size_of::<Obj>() + kind_bytes(&kind);
        if self.bytes_allocated + bytes > self.next_gc {
            self.collect_garbage();
        }
        self.bytes_allocated += bytes;

        let obj = Obj {
            marked: false,
            kind,
        };
        match self.free_slots.pop() {
            Some(index) => {
                debug_assert!(self.slots[index as usize].is_none());
                self.slots[index as usize] = Some(obj);
                ObjRef(index)
            }
            None => {
                self.slots.push(Some(obj));
                ObjRef((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Runs a full mark/sweep cycle.
    ///
    /// Byte accounting is re-derived during blackening, so the running
    /// total self-corrects every cycle.
    pub fn collect_garbage(&mut self) {
        let before = self.bytes_allocated;
        self.bytes_allocated = 0;
        self.gray.clear();

        for i in 0..self.temp_roots.len() {
            let root = self.temp_roots[i];
            self.gray_object(root);
        }
        for i in 0..self.roots.len() {
            let root = self.roots[i];
            self.gray_object(root);
        }

        while let Some(gray) = self.gray.pop() {
            self.blacken_object(gray);
        }

        let mut freed = 0usize;
        for index in 0..self.slots.len() {
            let dead = matches!(&self.slots[index], Some(obj) if !obj.marked);
            if dead {
                self.slots[index] = None;
                self.free_slots.push(index as u32);
                freed += 1;
            } else if let Some(obj) = &mut self.slots[index] {
                obj.marked = false;
            }
        }

        self.next_gc = (self.bytes_allocated * GROW_FACTOR).max(INITIAL_GC_THRESHOLD);
        self.collections += 1;
        debug!(
            "gc: freed {} objects, {} -> {} bytes live",
            freed, before, self.bytes_allocated
        );
    }

    /// Marks an object reachable and queues it for scanning.
    fn gray_object(&mut self, r: ObjRef) {
        let obj = self.obj_mut(r);
        if obj.marked {
            return;
        }
        obj.marked = true;
        self.gray.push(r);
    }

    fn gray_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.gray_object(r);
        }
    }

    /// Scans a marked object: charges its bytes and grays its children.
    fn blacken_object(&mut self, r: ObjRef) {
        let bytes = size_of::<Obj>() + kind_bytes(&self.obj(r).kind);
        self.bytes_allocated += bytes;

        let tag = match &self.obj(r).kind {
            ObjKind::Str(_) => Tag::Str,
            ObjKind::List(_) => Tag::List,
            ObjKind::Map(_) => Tag::Map,
            ObjKind::Range(_) => Tag::Range,
            ObjKind::Script(_) => Tag::Script,
            ObjKind::Func(_) => Tag::Func,
            ObjKind::Fiber(_) => Tag::Fiber,
        };

        match tag {
            Tag::Str | Tag::Range => {}
            Tag::List => {
                let count = self.list(r).elements.len();
                for i in 0..count {
                    let element = self.list(r).elements[i];
                    self.gray_value(element);
                }
            }
            Tag::Map => {
                let capacity = self.map(r).entries.len();
                for i in 0..capacity {
                    let entry = self.map(r).entries[i];
                    if entry.is_live() {
                        self.gray_value(entry.key);
                        self.gray_value(entry.value);
                    }
                }
            }
            Tag::Script => {
                for i in 0..self.script(r).globals.len() {
                    let v = self.script(r).globals[i];
                    self.gray_value(v);
                }
                for i in 0..self.script(r).global_names.len() {
                    let name = self.script(r).global_names.names[i];
                    self.gray_object(name);
                }
                for i in 0..self.script(r).literals.len() {
                    let v = self.script(r).literals[i];
                    self.gray_value(v);
                }
                for i in 0..self.script(r).functions.len() {
                    let func = self.script(r).functions[i];
                    self.gray_object(func);
                }
                for i in 0..self.script(r).function_names.len() {
                    let name = self.script(r).function_names.names[i];
                    self.gray_object(name);
                }
                for i in 0..self.script(r).names.len() {
                    let name = self.script(r).names.names[i];
                    self.gray_object(name);
                }
                if let Some(body) = self.script(r).body {
                    self.gray_object(body);
                }
            }
            Tag::Func => {
                let (name, owner) = {
                    let f = self.func(r);
                    (f.name, f.owner)
                };
                self.gray_object(name);
                if let Some(owner) = owner {
                    self.gray_object(owner);
                }
            }
            Tag::Fiber => {
                let func = self.fiber(r).func;
                self.gray_object(func);

                let sp = self.fiber(r).sp;
                for i in 0..sp {
                    let v = self.fiber(r).stack[i];
                    self.gray_value(v);
                }
                for i in 0..self.fiber(r).frames.len() {
                    let frame_func = self.fiber(r).frames[i].func;
                    self.gray_object(frame_func);
                }
                if let Some(error) = self.fiber(r).error {
                    self.gray_object(error);
                }
            }
        }
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Bytes the collector currently believes are live or pending.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of objects currently occupying slots.
    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Number of completed collection cycles.
    pub fn collections(&self) -> u64 {
        self.collections
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Box::new(crate::host::FileHost::new()))
    }
}

/// Scanning tag; lets the collector match on a kind without holding a
/// borrow into the slot table.
#[derive(Clone, Copy)]
enum Tag {
    Str,
    List,
    Map,
    Range,
    Script,
    Func,
    Fiber,
}

/// Estimated bytes owned by an object's payload, mirroring what the
/// allocator would have charged for the kind-specific buffers.
fn kind_bytes(kind: &ObjKind) -> usize {
    match kind {
        ObjKind::Str(s) => s.raw_bytes().len(),
        ObjKind::List(l) => l.elements.capacity() * size_of::<Value>(),
        ObjKind::Map(m) => m.entries.len() * size_of::<MapEntry>(),
        ObjKind::Range(_) => 0,
        ObjKind::Script(s) => {
            s.globals.capacity() * size_of::<Value>()
                + s.global_names.names.capacity() * size_of::<ObjRef>()
                + s.literals.capacity() * size_of::<Value>()
                + s.functions.capacity() * size_of::<ObjRef>()
                + s.function_names.names.capacity() * size_of::<ObjRef>()
                + s.names.names.capacity() * size_of::<ObjRef>()
        }
        ObjKind::Func(f) => match &f.payload {
            FuncImpl::Native(_) => 0,
            FuncImpl::Code(code) => {
                code.opcodes.capacity() + code.oplines.capacity() * size_of::<u32>()
            }
        },
        ObjKind::Fiber(f) => {
            f.stack.capacity() * size_of::<Value>()
                + f.frames.capacity() * size_of::<CallFrame>()
        }
    }
}
