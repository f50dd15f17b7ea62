// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Heap and object model for the Selva runtime.
//!
//! Cells live in a growable pool and are threaded onto two doubly-linked
//! lists owned by the collector:
//!
//! ```text
//! ACTIVE (provisional garbage)
//! ┌──────────────────────────────────────────────────────────┐
//! │ [alloc'd][alloc'd][alloc'd] │ next_free ─►[free][free]…  │
//! └──────────────────────────────────────────────────────────┘
//! OLD (proven reachable last cycle)
//! ┌──────────────────────────────────────────────────────────┐
//! │ [live][live][live]…                                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Allocation hands out cells by advancing `next_free` through the active
//! list; the cells stay linked where they are. A collection merges both
//! lists, flips the colour, splices everything reachable from the roots onto
//! `old`, and the residue of `active` becomes the new free pool (see
//! [`Heap::collect`] in `gc.rs`).
//!
//! The heap is also the runtime context: it owns the root stack, the
//! finalizable set, the symbol interning table, the global environment and
//! the shared singletons, and is passed to every primitive.
//!
//! ## Rooting
//!
//! Any cell reference held only in a Rust local is invisible to the
//! collector, and every allocation may collect. Callers must register such
//! temporaries first:
//!
//! ```text
//! let tmp_root = heap.push_root(tmp);
//! let cell = heap.make_pair(tmp, other);   // may collect; tmp survives
//! heap.pop_root(tmp_root);
//! ```
//!
//! [`Heap::push_root`] returns an affine [`Root`] token, so a slot cannot be
//! popped twice; [`Heap::pop_root`] tolerates out-of-order pops by scanning
//! and treats a missing record as a runtime bug (panic). The typed
//! constructors below root their own arguments, so chained construction is
//! safe as long as intermediate results are re-rooted across further
//! allocating calls.

#[cfg(test)]
mod heap_test;

mod gc;

use rustc_hash::FxHashMap;

use crate::primitives::PrimitiveFn;
use crate::value::{Cell, CellRef, Payload, Tag};

/// Cells added by the first heap extension.
const INITIAL_EXTENSION: usize = 1000;

/// Growth factor for successive extension increments.
const EXTENSION_GROWTH: usize = 3;

/// A doubly-linked list of cells, identified by head and tail.
#[derive(Clone, Copy, Default)]
pub(crate) struct CellList {
    pub(crate) head: Option<CellRef>,
    pub(crate) tail: Option<CellRef>,
}

/// A registered root-stack record.
struct RootEntry {
    id: u64,
    value: CellRef,
}

/// Token for a registered root slot.
///
/// Deliberately neither `Copy` nor `Clone`: a token is consumed by
/// [`Heap::pop_root`], which makes double-pops a compile error.
#[must_use = "an unpopped root keeps its value alive forever"]
pub struct Root {
    id: u64,
}

/// Counters describing the current heap state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapStats {
    /// Total cells in the pool.
    pub total_cells: usize,
    /// Cells currently available for allocation.
    pub free_cells: usize,
    /// Cells registered for finalization.
    pub finalizable_cells: usize,
    /// Interned symbols.
    pub symbols: usize,
    /// Completed collection cycles.
    pub collections: u64,
}

/// The Selva heap: cell pool, collector state and runtime tables.
pub struct Heap {
    pub(crate) cells: Vec<Cell>,
    pub(crate) active: CellList,
    pub(crate) old: CellList,
    pub(crate) next_free: Option<CellRef>,
    pub(crate) colour: bool,
    /// Size of the next extension increment.
    next_extension: usize,
    pub(crate) free_count: usize,
    pub(crate) collections: u64,

    roots: Vec<RootEntry>,
    next_root_id: u64,
    pub(crate) finalizable: Vec<CellRef>,
    /// Swap space for the finalizable sweep.
    pub(crate) finalizable_next: Vec<CellRef>,

    pub(crate) symbols: FxHashMap<Box<str>, CellRef>,
    pub(crate) globals: FxHashMap<CellRef, CellRef>,

    empty_list: CellRef,
    bool_true: CellRef,
    bool_false: CellRef,
    nil_symbol: CellRef,
    cc_template: Option<CellRef>,
}

impl Heap {
    /// Create a heap with the initial cell pool and the shared singletons.
    #[must_use]
    pub fn new() -> Self {
        let placeholder = CellRef::new(0);
        let mut heap = Self {
            cells: Vec::new(),
            active: CellList::default(),
            old: CellList::default(),
            next_free: None,
            colour: false,
            next_extension: INITIAL_EXTENSION,
            free_count: 0,
            collections: 0,
            roots: Vec::new(),
            next_root_id: 0,
            finalizable: Vec::new(),
            finalizable_next: Vec::new(),
            symbols: FxHashMap::default(),
            globals: FxHashMap::default(),
            empty_list: placeholder,
            bool_true: placeholder,
            bool_false: placeholder,
            nil_symbol: placeholder,
            cc_template: None,
        };
        heap.extend();

        // Singletons; the pool is fresh, so none of these can collect.
        heap.empty_list = heap.alloc(Tag::EmptyList, false);
        heap.bool_true = heap.alloc(Tag::Boolean, false);
        heap.cells[heap.bool_true.index()].payload = Payload::Boolean(true);
        heap.bool_false = heap.alloc(Tag::Boolean, false);
        heap.cells[heap.bool_false.index()].payload = Payload::Boolean(false);
        heap.nil_symbol = heap.make_symbol("nil");
        heap
    }

    /// Current heap counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            total_cells: self.cells.len(),
            free_cells: self.free_count,
            finalizable_cells: self.finalizable.len(),
            symbols: self.symbols.len(),
            collections: self.collections,
        }
    }

    // --- Allocation ---

    /// Draw a cell from the free pool, collecting and extending as needed.
    ///
    /// The returned cell carries the requested tag, the current colour and an
    /// empty payload; the caller must fill the payload before the next
    /// allocation. `needs_finalization` registers the cell in the
    /// finalizable set and must be set for every cell that will own an
    /// external buffer.
    ///
    /// Panics when the pool cannot be extended any further (process-fatal
    /// out-of-memory, per the runtime's error model).
    pub fn alloc(&mut self, tag: Tag, needs_finalization: bool) -> CellRef {
        if self.next_free.is_none() {
            self.recover_space();
        }
        let Some(cell) = self.next_free else {
            panic!("selva heap: out of memory after collection and extension");
        };
        self.next_free = self.cells[cell.index()].next;
        self.free_count -= 1;

        let slot = &mut self.cells[cell.index()];
        slot.tag = tag;
        slot.colour = self.colour;
        // Clear the recycled payload so a rooted-but-unfilled cell can never
        // trace stale children.
        slot.payload = Payload::EmptyList;

        if needs_finalization {
            self.finalizable.push(cell);
        }
        cell
    }

    /// Collect, then extend if too little came back.
    fn recover_space(&mut self) {
        let freed = self.collect();
        if freed == 0 || self.next_extension > 2 * freed {
            self.extend();
        }
    }

    /// Append a fresh increment of cells to the active list.
    fn extend(&mut self) {
        let count = self.next_extension;
        self.next_extension *= EXTENSION_GROWTH;

        let start = self.cells.len();
        assert!(
            start + count < u32::MAX as usize,
            "selva heap: cell pool exceeds addressable size"
        );
        self.cells.reserve(count);
        for offset in 0..count {
            let here = start + offset;
            let prev = (offset > 0).then(|| CellRef::new(here - 1));
            let next = (offset + 1 < count).then(|| CellRef::new(here + 1));
            self.cells.push(Cell {
                tag: Tag::EmptyList,
                colour: self.colour,
                prev,
                next,
                payload: Payload::EmptyList,
            });
        }

        let first = CellRef::new(start);
        let last = CellRef::new(start + count - 1);
        match self.active.tail {
            Some(tail) => {
                self.cells[tail.index()].next = Some(first);
                self.cells[first.index()].prev = Some(tail);
            }
            None => self.active.head = Some(first),
        }
        self.active.tail = Some(last);
        if self.next_free.is_none() {
            self.next_free = Some(first);
        }
        self.free_count += count;

        tracing::info!(added = count, total = self.cells.len(), "heap extended");
    }

    // --- Root protocol ---

    /// Register a holder for `value`; the collector keeps the slot's current
    /// value alive until the matching [`Heap::pop_root`].
    pub fn push_root(&mut self, value: CellRef) -> Root {
        let id = self.next_root_id;
        self.next_root_id += 1;
        self.roots.push(RootEntry { id, value });
        Root { id }
    }

    /// Replace the value held by a registered root slot.
    pub fn set_root(&mut self, root: &Root, value: CellRef) {
        for entry in self.roots.iter_mut().rev() {
            if entry.id == root.id {
                entry.value = value;
                return;
            }
        }
        panic!("selva heap: root stack desynchronised (set on unregistered root)");
    }

    /// Current value of a registered root slot.
    #[must_use]
    pub fn root_value(&self, root: &Root) -> CellRef {
        for entry in self.roots.iter().rev() {
            if entry.id == root.id {
                return entry.value;
            }
        }
        panic!("selva heap: root stack desynchronised (read of unregistered root)");
    }

    /// Unregister a root slot and return its final value.
    ///
    /// Pops are expected in LIFO order; an out-of-order pop is found by
    /// scanning back. A pop with no matching record indicates a rooting bug
    /// somewhere in the VM or a primitive and is process-fatal.
    pub fn pop_root(&mut self, root: Root) -> CellRef {
        // LIFO pops remove the last record; the scan only matters for
        // out-of-order pops.
        match self.roots.iter().rposition(|entry| entry.id == root.id) {
            Some(position) => self.roots.remove(position).value,
            None => panic!("selva heap: root stack desynchronised (pop of unregistered root)"),
        }
    }

    /// Snapshot of every root the collector must trace from.
    pub(crate) fn root_snapshot(&self) -> Vec<CellRef> {
        let mut roots = Vec::with_capacity(
            4 + self.roots.len() + self.symbols.len() + 2 * self.globals.len(),
        );
        roots.push(self.empty_list);
        roots.push(self.bool_true);
        roots.push(self.bool_false);
        roots.extend(self.symbols.values().copied());
        for (&symbol, &value) in &self.globals {
            roots.push(symbol);
            roots.push(value);
        }
        roots.extend(self.roots.iter().map(|entry| entry.value));
        roots.extend(self.cc_template);
        roots
    }

    // --- Singletons ---

    /// The empty-list singleton.
    #[inline]
    #[must_use]
    pub fn empty_list(&self) -> CellRef {
        self.empty_list
    }

    /// The true singleton.
    #[inline]
    #[must_use]
    pub fn bool_true(&self) -> CellRef {
        self.bool_true
    }

    /// The false singleton.
    #[inline]
    #[must_use]
    pub fn bool_false(&self) -> CellRef {
        self.bool_false
    }

    /// The interned symbol `nil`.
    #[inline]
    #[must_use]
    pub fn nil_symbol(&self) -> CellRef {
        self.nil_symbol
    }

    /// Boolean singleton for `value`.
    #[inline]
    #[must_use]
    pub fn make_boolean(&self, value: bool) -> CellRef {
        if value { self.bool_true } else { self.bool_false }
    }

    // --- Constructors ---

    /// Allocate a fixnum cell.
    pub fn make_fixnum(&mut self, value: i64) -> CellRef {
        let cell = self.alloc(Tag::Fixnum, false);
        self.cells[cell.index()].payload = Payload::Fixnum(value);
        cell
    }

    /// Allocate a character cell.
    pub fn make_character(&mut self, value: char) -> CellRef {
        let cell = self.alloc(Tag::Character, false);
        self.cells[cell.index()].payload = Payload::Character(value);
        cell
    }

    /// Allocate a string cell owning a copy of `value`.
    pub fn make_string(&mut self, value: &str) -> CellRef {
        let cell = self.alloc(Tag::String, true);
        self.cells[cell.index()].payload = Payload::String(Some(value.into()));
        cell
    }

    /// Intern a symbol; equal names return the identical cell.
    pub fn make_symbol(&mut self, name: &str) -> CellRef {
        if let Some(&existing) = self.symbols.get(name) {
            return existing;
        }
        let cell = self.alloc(Tag::Symbol, false);
        self.cells[cell.index()].payload = Payload::Symbol(name.into());
        self.symbols.insert(name.into(), cell);
        cell
    }

    /// Allocate a pair.
    pub fn make_pair(&mut self, car: CellRef, cdr: CellRef) -> CellRef {
        let car_root = self.push_root(car);
        let cdr_root = self.push_root(cdr);
        let cell = self.alloc(Tag::Pair, false);
        self.cells[cell.index()].payload = Payload::Pair { car, cdr };
        self.pop_root(cdr_root);
        self.pop_root(car_root);
        cell
    }

    /// Allocate a three-element list.
    pub fn make_list3(&mut self, first: CellRef, second: CellRef, third: CellRef) -> CellRef {
        let first_root = self.push_root(first);
        let second_root = self.push_root(second);
        let empty = self.empty_list;
        let mut list = self.make_pair(third, empty);
        list = self.make_pair(second, list);
        list = self.make_pair(first, list);
        self.pop_root(second_root);
        self.pop_root(first_root);
        list
    }

    /// Allocate a vector of `len` slots, all set to `fill`.
    pub fn make_vector(&mut self, len: usize, fill: CellRef) -> CellRef {
        let fill_root = self.push_root(fill);
        let cell = self.alloc(Tag::Vector, true);
        self.cells[cell.index()].payload =
            Payload::Vector(Some(vec![fill; len].into_boxed_slice()));
        self.pop_root(fill_root);
        cell
    }

    /// Allocate a fresh vector with the same elements as `source`.
    ///
    /// Returns `None` if `source` is not a vector.
    pub fn copy_vector(&mut self, source: CellRef) -> Option<CellRef> {
        self.vector_len(source)?;
        let source_root = self.push_root(source);
        let cell = self.alloc(Tag::Vector, true);
        let buffer = match &self.cells[source.index()].payload {
            Payload::Vector(Some(buffer)) => buffer.clone(),
            _ => unreachable!("rooted vector lost its buffer"),
        };
        self.cells[cell.index()].payload = Payload::Vector(Some(buffer));
        self.pop_root(source_root);
        Some(cell)
    }

    /// Allocate a compiled procedure over `code`, `constants` and `env`.
    pub fn make_compiled_proc(
        &mut self,
        code: CellRef,
        constants: CellRef,
        env: CellRef,
    ) -> CellRef {
        let code_root = self.push_root(code);
        let constants_root = self.push_root(constants);
        let env_root = self.push_root(env);
        let cell = self.alloc(Tag::CompiledProc, false);
        self.cells[cell.index()].payload = Payload::CompiledProc {
            code,
            constants,
            env,
        };
        self.pop_root(env_root);
        self.pop_root(constants_root);
        self.pop_root(code_root);
        cell
    }

    /// Allocate a primitive-procedure cell.
    pub fn make_primitive_proc(&mut self, function: PrimitiveFn) -> CellRef {
        let cell = self.alloc(Tag::PrimitiveProc, false);
        self.cells[cell.index()].payload = Payload::PrimitiveProc(function);
        cell
    }

    /// Allocate a meta procedure wrapping `inner` with `meta`.
    pub fn make_meta_proc(&mut self, inner: CellRef, meta: CellRef) -> CellRef {
        let inner_root = self.push_root(inner);
        let meta_root = self.push_root(meta);
        let cell = self.alloc(Tag::MetaProc, false);
        self.cells[cell.index()].payload = Payload::MetaProc { inner, meta };
        self.pop_root(meta_root);
        self.pop_root(inner_root);
        cell
    }

    /// Allocate an empty hash table.
    pub fn make_hash_table(&mut self) -> CellRef {
        let cell = self.alloc(Tag::HashTable, true);
        self.cells[cell.index()].payload = Payload::HashTable(Some(Box::default()));
        cell
    }

    // --- Accessors and mutators ---

    /// Tag of a cell.
    #[inline]
    #[must_use]
    pub fn tag(&self, cell: CellRef) -> Tag {
        self.cells[cell.index()].tag
    }

    /// Boolean payload, if `cell` is a boolean.
    #[must_use]
    pub fn boolean(&self, cell: CellRef) -> Option<bool> {
        match self.cells[cell.index()].payload {
            Payload::Boolean(value) => Some(value),
            _ => None,
        }
    }

    /// Fixnum payload, if `cell` is a fixnum.
    #[must_use]
    pub fn fixnum(&self, cell: CellRef) -> Option<i64> {
        match self.cells[cell.index()].payload {
            Payload::Fixnum(value) => Some(value),
            _ => None,
        }
    }

    /// Character payload, if `cell` is a character.
    #[must_use]
    pub fn character(&self, cell: CellRef) -> Option<char> {
        match self.cells[cell.index()].payload {
            Payload::Character(value) => Some(value),
            _ => None,
        }
    }

    /// String contents, if `cell` is a live string.
    #[must_use]
    pub fn string(&self, cell: CellRef) -> Option<&str> {
        match &self.cells[cell.index()].payload {
            Payload::String(Some(buffer)) => Some(buffer),
            _ => None,
        }
    }

    /// Symbol name, if `cell` is a symbol.
    #[must_use]
    pub fn symbol_name(&self, cell: CellRef) -> Option<&str> {
        match &self.cells[cell.index()].payload {
            Payload::Symbol(name) => Some(name),
            _ => None,
        }
    }

    /// `car` of a pair.
    #[must_use]
    pub fn car(&self, cell: CellRef) -> Option<CellRef> {
        match self.cells[cell.index()].payload {
            Payload::Pair { car, .. } => Some(car),
            _ => None,
        }
    }

    /// `cdr` of a pair.
    #[must_use]
    pub fn cdr(&self, cell: CellRef) -> Option<CellRef> {
        match self.cells[cell.index()].payload {
            Payload::Pair { cdr, .. } => Some(cdr),
            _ => None,
        }
    }

    /// Both halves of a pair.
    #[must_use]
    pub fn pair(&self, cell: CellRef) -> Option<(CellRef, CellRef)> {
        match self.cells[cell.index()].payload {
            Payload::Pair { car, cdr } => Some((car, cdr)),
            _ => None,
        }
    }

    /// Replace the `car` of a pair. Returns `false` if `cell` is not a pair.
    pub fn set_car(&mut self, cell: CellRef, value: CellRef) -> bool {
        match &mut self.cells[cell.index()].payload {
            Payload::Pair { car, .. } => {
                *car = value;
                true
            }
            _ => false,
        }
    }

    /// Replace the `cdr` of a pair. Returns `false` if `cell` is not a pair.
    pub fn set_cdr(&mut self, cell: CellRef, value: CellRef) -> bool {
        match &mut self.cells[cell.index()].payload {
            Payload::Pair { cdr, .. } => {
                *cdr = value;
                true
            }
            _ => false,
        }
    }

    /// Length of a live vector.
    #[must_use]
    pub fn vector_len(&self, cell: CellRef) -> Option<usize> {
        match &self.cells[cell.index()].payload {
            Payload::Vector(Some(buffer)) => Some(buffer.len()),
            _ => None,
        }
    }

    /// Element `index` of a vector.
    #[must_use]
    pub fn vector_ref(&self, cell: CellRef, index: usize) -> Option<CellRef> {
        match &self.cells[cell.index()].payload {
            Payload::Vector(Some(buffer)) => buffer.get(index).copied(),
            _ => None,
        }
    }

    /// Store `value` at `index`. Returns `false` when `cell` is not a vector
    /// or `index` is out of range.
    pub fn vector_set(&mut self, cell: CellRef, index: usize, value: CellRef) -> bool {
        match &mut self.cells[cell.index()].payload {
            Payload::Vector(Some(buffer)) => match buffer.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Grow a vector's backing buffer in place to `new_len` slots,
    /// initialising the new slots to `fill`. The cell identity is unchanged.
    ///
    /// Allocates no cells, so it can never trigger a collection.
    pub fn vector_grow(&mut self, cell: CellRef, new_len: usize, fill: CellRef) -> bool {
        match &mut self.cells[cell.index()].payload {
            Payload::Vector(Some(buffer)) => {
                if new_len <= buffer.len() {
                    return true;
                }
                let mut grown = Vec::with_capacity(new_len);
                grown.extend_from_slice(buffer);
                grown.resize(new_len, fill);
                *buffer = grown.into_boxed_slice();
                true
            }
            _ => false,
        }
    }

    /// Parts of a compiled (or syntax) procedure: code, constants, captured
    /// environment.
    #[must_use]
    pub fn proc_parts(&self, cell: CellRef) -> Option<(CellRef, CellRef, CellRef)> {
        match self.cells[cell.index()].payload {
            Payload::CompiledProc {
                code,
                constants,
                env,
            } => Some((code, constants, env)),
            _ => None,
        }
    }

    /// Inner procedure and metadata of a meta procedure.
    #[must_use]
    pub fn meta_parts(&self, cell: CellRef) -> Option<(CellRef, CellRef)> {
        match self.cells[cell.index()].payload {
            Payload::MetaProc { inner, meta } => Some((inner, meta)),
            _ => None,
        }
    }

    /// Function pointer of a primitive procedure.
    #[must_use]
    pub fn primitive_fn(&self, cell: CellRef) -> Option<PrimitiveFn> {
        match self.cells[cell.index()].payload {
            Payload::PrimitiveProc(function) => Some(function),
            _ => None,
        }
    }

    /// Re-tag a compiled procedure as a macro transformer.
    ///
    /// Returns `false` if `cell` is not a compiled procedure.
    pub fn set_macro(&mut self, cell: CellRef) -> bool {
        let slot = &mut self.cells[cell.index()];
        match slot.tag {
            Tag::CompiledProc | Tag::CompiledSyntaxProc => {
                slot.tag = Tag::CompiledSyntaxProc;
                true
            }
            _ => false,
        }
    }

    /// Lookup in a hash table.
    #[must_use]
    pub fn hash_get(&self, table: CellRef, key: CellRef) -> Option<CellRef> {
        match &self.cells[table.index()].payload {
            Payload::HashTable(Some(body)) => body.get(&key).copied(),
            _ => None,
        }
    }

    /// Store into a hash table. Returns `false` if `table` is not a live
    /// hash table.
    pub fn hash_set(&mut self, table: CellRef, key: CellRef, value: CellRef) -> bool {
        match &mut self.cells[table.index()].payload {
            Payload::HashTable(Some(body)) => {
                body.insert(key, value);
                true
            }
            _ => false,
        }
    }

    /// Remove a key from a hash table; returns the removed value.
    pub fn hash_remove(&mut self, table: CellRef, key: CellRef) -> Option<CellRef> {
        match &mut self.cells[table.index()].payload {
            Payload::HashTable(Some(body)) => body.remove(&key),
            _ => None,
        }
    }

    /// Length of a proper list, or `None` for improper lists.
    #[must_use]
    pub fn list_length(&self, list: CellRef) -> Option<usize> {
        let mut length = 0;
        let mut cursor = list;
        while cursor != self.empty_list {
            let (_, cdr) = self.pair(cursor)?;
            length += 1;
            cursor = cdr;
        }
        Some(length)
    }

    // --- Global environment ---

    /// Define or update a global binding.
    pub fn define_global(&mut self, symbol: CellRef, value: CellRef) {
        self.globals.insert(symbol, value);
    }

    /// Look up a global binding.
    #[must_use]
    pub fn lookup_global(&self, symbol: CellRef) -> Option<CellRef> {
        self.globals.get(&symbol).copied()
    }

    /// Whether a global binding exists.
    #[must_use]
    pub fn global_is_bound(&self, symbol: CellRef) -> bool {
        self.globals.contains_key(&symbol)
    }

    // --- Continuation template cache ---

    pub(crate) fn cc_template(&self) -> Option<CellRef> {
        self.cc_template
    }

    pub(crate) fn set_cc_template(&mut self, template: CellRef) {
        self.cc_template = Some(template);
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
