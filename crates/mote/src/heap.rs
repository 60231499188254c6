//! The private object arena.
//!
//! Objects live in slots addressed by [`HeapId`]. Capacity is accounted in
//! fixed-size chunks: every object's size is estimated from its payload and
//! rounded up to whole chunks, and the sum of those must stay within the
//! heap size the runtime was configured with. When an allocation does not fit
//! a full mark-sweep collection runs first; if the request still does not fit
//! it fails with MemoryError and every reachable object is left untouched.
//!
//! Reachability starts from two sets: permanent roots registered by the runtime
//! (threads, the builtins, the native frame, the module table) and a bounded
//! stack of temporary roots that protects objects while they are still being
//! assembled on the Rust side.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    config::VmConfig,
    exception_private::{ExcType, RunResult},
    types::{
        Class, Code, Dict, Frame, FrameKind, Function, Instance, Method, Module, NativeCode, NativeFrame, SeqIter,
        Thread, Type,
    },
    value::Value,
};

/// Accounted size of one value slot in a container.
pub const VALUE_SLOT_SIZE: usize = 4;
/// Accounted size of every object's header.
pub const OBJECT_HEADER_SIZE: usize = 4;

/// Handle of a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeapId(usize);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Payload of a heap object.
#[derive(Debug, Clone)]
pub enum HeapData {
    Str(Vec<u8>),
    Bytearray(Vec<u8>),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Dict),
    Code(Code),
    NativeCode(NativeCode),
    Function(Function),
    Module(Module),
    Class(Class),
    Instance(Instance),
    Method(Method),
    Cell(Value),
    Thread(Thread),
    Frame(Frame),
    NativeFrame(NativeFrame),
    SeqIter(SeqIter),
}

impl HeapData {
    #[must_use]
    pub fn type_of(&self) -> Type {
        match self {
            Self::Str(_) => Type::Str,
            Self::Bytearray(_) => Type::Bytearray,
            Self::Tuple(_) => Type::Tuple,
            Self::List(_) => Type::List,
            Self::Dict(_) => Type::Dict,
            Self::Code(_) => Type::Code,
            Self::NativeCode(_) => Type::NativeCode,
            Self::Function(_) => Type::Function,
            Self::Module(_) => Type::Module,
            Self::Class(_) => Type::Class,
            Self::Instance(_) => Type::Instance,
            Self::Method(_) => Type::Method,
            Self::Cell(_) => Type::Cell,
            Self::Thread(_) => Type::Thread,
            Self::Frame(_) => Type::Frame,
            Self::NativeFrame(_) => Type::NativeFrame,
            Self::SeqIter(_) => Type::SeqIter,
        }
    }

    /// Estimated size in bytes on the target, header included.
    #[must_use]
    pub fn estimate_size(&self) -> usize {
        let payload = match self {
            Self::Str(s) => s.len() + 3,
            Self::Bytearray(b) => b.len() + 2,
            Self::Tuple(items) | Self::List(items) => 2 + items.len() * VALUE_SLOT_SIZE,
            Self::Dict(d) => 2 + d.len() * 2 * VALUE_SLOT_SIZE,
            Self::Code(_) => 24,
            Self::NativeCode(_) => 4,
            Self::Function(_) => 5 * VALUE_SLOT_SIZE,
            Self::Module(_) | Self::Instance(_) | Self::Method(_) => 2 * VALUE_SLOT_SIZE,
            Self::Class(_) => 3 * VALUE_SLOT_SIZE,
            Self::Cell(_) => VALUE_SLOT_SIZE,
            Self::Thread(_) => 4 + 3 * VALUE_SLOT_SIZE,
            Self::Frame(f) => {
                8 + (5 + f.stack.capacity() + f.locals.len() + f.cells.len()) * VALUE_SLOT_SIZE + f.blocks.len() * 6
            }
            Self::NativeFrame(nf) => 4 + (2 + nf.locals.len()) * VALUE_SLOT_SIZE,
            Self::SeqIter(_) => VALUE_SLOT_SIZE + 2,
        };
        OBJECT_HEADER_SIZE + payload
    }
}

#[derive(Debug)]
struct HeapEntry {
    data: HeapData,
    chunks: usize,
}

/// Snapshot of heap occupancy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub live_objects: usize,
    pub chunk_size: usize,
    pub used_chunks: usize,
    pub free_chunks: usize,
    pub total_chunks: usize,
    /// Highest `used_chunks` observed since the heap was created.
    pub peak_chunks: usize,
    pub collections: usize,
    /// Live objects per type name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "heap: {}/{} chunks used ({} free, peak {}), {} objects, {} collections",
            self.used_chunks, self.total_chunks, self.free_chunks, self.peak_chunks, self.live_objects, self.collections
        )?;
        for (name, count) in &self.objects_by_type {
            writeln!(f, "  {name:<14} {count}")?;
        }
        Ok(())
    }
}

/// The object arena.
#[derive(Debug)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    free_list: Vec<usize>,
    chunk_size: usize,
    capacity: usize,
    used: usize,
    peak: usize,
    roots: Vec<HeapId>,
    temp_roots: SmallVec<[HeapId; 24]>,
    temp_root_capacity: usize,
    gc_interval: usize,
    allocations_since_gc: usize,
    collections: usize,
}

impl Heap {
    /// Creates a heap of `heap_size` bytes divided into `chunk_size`-byte chunks.
    #[must_use]
    pub fn new(heap_size: usize, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            chunk_size,
            capacity: heap_size / chunk_size,
            used: 0,
            peak: 0,
            roots: Vec::new(),
            temp_roots: SmallVec::new(),
            temp_root_capacity: 24,
            gc_interval: 0,
            allocations_since_gc: 0,
            collections: 0,
        }
    }

    #[must_use]
    pub fn from_config(config: &VmConfig) -> Self {
        let mut heap = Self::new(config.heap_size, config.chunk_size);
        heap.temp_root_capacity = config.temp_root_capacity;
        heap.gc_interval = config.gc_interval;
        heap
    }

    fn chunks_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.chunk_size).max(1)
    }

    #[must_use]
    pub fn free_chunks(&self) -> usize {
        self.capacity - self.used
    }

    #[must_use]
    pub fn used_chunks(&self) -> usize {
        self.used
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[must_use]
    pub fn capacity_chunks(&self) -> usize {
        self.capacity
    }

    /// Makes room for `chunks` more chunks, collecting if needed.
    ///
    /// `pending` lists handles that are not reachable from any root yet but
    /// must survive the collection (the contents of the object being built).
    fn ensure_room(&mut self, chunks: usize, pending: &[HeapId]) -> RunResult<()> {
        if chunks <= self.free_chunks() {
            return Ok(());
        }
        self.collect_with(pending.to_vec());
        if chunks <= self.free_chunks() {
            Ok(())
        } else {
            tracing::debug!(
                requested = chunks,
                free = self.free_chunks(),
                total = self.capacity,
                "heap exhausted"
            );
            Err(ExcType::MemoryError.msg(format!(
                "cannot allocate {chunks} chunks ({} free of {})",
                self.free_chunks(),
                self.capacity
            )))
        }
    }

    /// Allocates an object, running a collection first if it does not fit.
    pub fn allocate(&mut self, data: HeapData) -> RunResult<HeapId> {
        let chunks = self.chunks_for(data.estimate_size());
        if chunks > self.free_chunks() {
            let mut pending = Vec::new();
            collect_child_ids(&data, &mut pending);
            self.ensure_room(chunks, &pending)?;
        }
        self.used += chunks;
        self.peak = self.peak.max(self.used);
        self.allocations_since_gc += 1;
        let entry = HeapEntry { data, chunks };
        let id = if let Some(index) = self.free_list.pop() {
            self.entries[index] = Some(entry);
            HeapId(index)
        } else {
            self.entries.push(Some(entry));
            HeapId(self.entries.len() - 1)
        };
        Ok(id)
    }

    /// Accounts `extra_bytes` of upcoming growth for `id` before the caller mutates it.
    ///
    /// `pinned` are values about to be stored into the object; they are kept
    /// alive across any collection this triggers.
    pub fn reserve_growth(&mut self, id: HeapId, extra_bytes: usize, pinned: &[Value]) -> RunResult<()> {
        let (current, size) = {
            let entry = self.entry(id);
            (entry.chunks, entry.data.estimate_size())
        };
        let wanted = self.chunks_for(size + extra_bytes);
        if wanted <= current {
            return Ok(());
        }
        let delta = wanted - current;
        if delta > self.free_chunks() {
            let mut pending: Vec<HeapId> = pinned.iter().filter_map(|v| v.ref_id()).collect();
            pending.push(id);
            self.ensure_room(delta, &pending)?;
        }
        self.used += delta;
        self.peak = self.peak.max(self.used);
        self.entry_mut(id).chunks = wanted;
        Ok(())
    }

    /// Re-derives an object's chunk count from its current size after it shrank.
    pub fn refresh_size(&mut self, id: HeapId) {
        let (current, size) = {
            let entry = self.entry(id);
            (entry.chunks, entry.data.estimate_size())
        };
        let wanted = self.chunks_for(size);
        if wanted < current {
            self.used -= current - wanted;
            self.entry_mut(id).chunks = wanted;
        }
    }

    fn entry(&self, id: HeapId) -> &HeapEntry {
        self.entries
            .get(id.index())
            .expect("Heap::entry: slot missing")
            .as_ref()
            .expect("Heap::entry: object already freed")
    }

    fn entry_mut(&mut self, id: HeapId) -> &mut HeapEntry {
        self.entries
            .get_mut(id.index())
            .expect("Heap::entry_mut: slot missing")
            .as_mut()
            .expect("Heap::entry_mut: object already freed")
    }

    /// Returns the payload stored at `id`.
    ///
    /// # Panics
    /// Panics if the slot was freed; a reachable handle never is.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self.entry(id).data
    }

    /// Returns the payload stored at `id` mutably.
    ///
    /// # Panics
    /// Panics if the slot was freed.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self.entry_mut(id).data
    }

    /// Returns the payload if the slot is live.
    #[must_use]
    pub fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.index())?.as_ref().map(|e| &e.data)
    }

    #[must_use]
    pub fn is_live(&self, id: HeapId) -> bool {
        self.get_if_live(id).is_some()
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------

    /// Registers a permanent root.
    pub fn add_root(&mut self, id: HeapId) {
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    pub fn remove_root(&mut self, id: HeapId) {
        self.roots.retain(|r| *r != id);
    }

    /// Current depth of the temporary-root stack, to hand back to [`Heap::restore_temp_roots`].
    #[must_use]
    pub fn temp_root_mark(&self) -> usize {
        self.temp_roots.len()
    }

    /// Pushes an object under construction onto the temporary-root stack.
    pub fn push_temp_root(&mut self, id: HeapId) -> RunResult<()> {
        if self.temp_roots.len() >= self.temp_root_capacity {
            return Err(ExcType::system_error("temporary root stack overflow"));
        }
        self.temp_roots.push(id);
        Ok(())
    }

    /// Pushes `value` if it is a heap value; scalars need no protection.
    pub fn push_temp_root_value(&mut self, value: Value) -> RunResult<()> {
        match value {
            Value::Ref(id) => self.push_temp_root(id),
            _ => Ok(()),
        }
    }

    pub fn pop_temp_root(&mut self) -> Option<HeapId> {
        self.temp_roots.pop()
    }

    /// Drops every temporary root above `mark`.
    pub fn restore_temp_roots(&mut self, mark: usize) {
        self.temp_roots.truncate(mark);
    }

    #[must_use]
    pub fn temp_root_depth(&self) -> usize {
        self.temp_roots.len()
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Whether the periodic collection interval has elapsed.
    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.gc_interval > 0 && self.allocations_since_gc >= self.gc_interval
    }

    /// Runs a full mark-sweep pass from the registered roots. Returns the number of chunks freed.
    pub fn collect_garbage(&mut self) -> usize {
        self.collect_with(Vec::new())
    }

    fn collect_with(&mut self, mut work_list: Vec<HeapId>) -> usize {
        work_list.extend_from_slice(&self.roots);
        work_list.extend_from_slice(&self.temp_roots);

        let mut reachable = vec![false; self.entries.len()];
        while let Some(id) = work_list.pop() {
            let idx = id.index();
            if idx >= reachable.len() || reachable[idx] {
                continue;
            }
            reachable[idx] = true;
            if let Some(Some(entry)) = self.entries.get(idx) {
                collect_child_ids(&entry.data, &mut work_list);
            }
        }

        let mut freed = 0;
        for (idx, slot) in self.entries.iter_mut().enumerate() {
            if reachable[idx] {
                continue;
            }
            if let Some(entry) = slot.take() {
                freed += entry.chunks;
                self.free_list.push(idx);
            }
        }
        self.used -= freed;
        self.allocations_since_gc = 0;
        self.collections += 1;
        tracing::debug!(freed, used = self.used, total = self.capacity, "heap collection");
        freed
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            *objects_by_type.entry(entry.data.type_of().into()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            chunk_size: self.chunk_size,
            used_chunks: self.used,
            free_chunks: self.free_chunks(),
            total_chunks: self.capacity,
            peak_chunks: self.peak,
            collections: self.collections,
            objects_by_type,
        }
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    pub fn alloc_str(&mut self, bytes: &[u8]) -> RunResult<HeapId> {
        self.allocate(HeapData::Str(bytes.to_vec()))
    }

    pub fn alloc_tuple(&mut self, items: Vec<Value>) -> RunResult<HeapId> {
        self.allocate(HeapData::Tuple(items))
    }

    pub fn alloc_list(&mut self, items: Vec<Value>) -> RunResult<HeapId> {
        self.allocate(HeapData::List(items))
    }

    pub fn alloc_dict(&mut self) -> RunResult<HeapId> {
        self.allocate(HeapData::Dict(Dict::new()))
    }

    /// Appends to a list, reserving the slot first.
    pub fn list_append(&mut self, list: HeapId, value: Value) -> RunResult<()> {
        self.reserve_growth(list, VALUE_SLOT_SIZE, &[value])?;
        match self.get_mut(list) {
            HeapData::List(items) => {
                items.push(value);
                Ok(())
            }
            other => Err(ExcType::type_error(format!("expected list, got {}", other.type_of()))),
        }
    }
}

fn push_value(v: &Value, work_list: &mut Vec<HeapId>) {
    if let Value::Ref(id) = v {
        work_list.push(*id);
    }
}

/// Pushes every handle `data` refers to onto `work_list`.
fn collect_child_ids(data: &HeapData, work_list: &mut Vec<HeapId>) {
    match data {
        HeapData::Str(_) | HeapData::Bytearray(_) | HeapData::NativeCode(_) => {}
        HeapData::Tuple(items) | HeapData::List(items) => {
            for v in items {
                push_value(v, work_list);
            }
        }
        HeapData::Dict(d) => {
            for (k, v) in d.entries() {
                push_value(k, work_list);
                push_value(v, work_list);
            }
        }
        HeapData::Cell(v) => push_value(v, work_list),
        HeapData::Method(m) => {
            push_value(&m.receiver, work_list);
            work_list.push(m.function);
        }
        HeapData::Code(c) => {
            work_list.push(c.names);
            work_list.push(c.consts);
            work_list.extend(c.cellvars);
        }
        HeapData::Function(f) => {
            work_list.push(f.code);
            work_list.push(f.globals);
            work_list.extend(f.attrs);
            work_list.extend(f.defaults);
            work_list.extend(f.closure);
        }
        HeapData::Module(m) => {
            work_list.push(m.code);
            work_list.push(m.attrs);
        }
        HeapData::Class(c) => {
            work_list.push(c.name);
            work_list.push(c.attrs);
            work_list.extend(c.bases);
        }
        HeapData::Instance(i) => {
            work_list.push(i.class);
            work_list.push(i.attrs);
        }
        HeapData::Thread(t) => {
            work_list.extend(t.frame);
            push_value(&t.exc_type, work_list);
            push_value(&t.exc_value, work_list);
        }
        HeapData::Frame(f) => {
            work_list.extend(f.back);
            work_list.push(f.func);
            work_list.push(f.code);
            work_list.push(f.globals);
            work_list.extend(f.names);
            work_list.extend_from_slice(&f.cells);
            match f.kind {
                FrameKind::Import(module) => work_list.push(module),
                FrameKind::Init(v) => push_value(&v, work_list),
                FrameKind::Call | FrameKind::Entry => {}
            }
            for v in &f.stack {
                push_value(v, work_list);
            }
            for v in f.locals.iter().flatten() {
                push_value(v, work_list);
            }
        }
        HeapData::NativeFrame(nf) => {
            work_list.extend(nf.func);
            work_list.extend(nf.back);
            for v in &nf.locals {
                push_value(v, work_list);
            }
        }
        HeapData::SeqIter(it) => work_list.push(it.seq),
    }
}
