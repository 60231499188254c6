//! The builtins namespace and the native-function interface.
//!
//! A native function is a plain Rust function over a [`NativeCall`], which
//! exposes the call's arguments and the runtime services a native may use.
//! The interpreter's own builtins occupy the top of the native index space
//! (from [`BUILTIN_BASE`]); hosts register theirs at the indices their images
//! reference. Each builtin has its own submodule.

mod abs;
mod convert;
mod introspect;
mod len;
mod min_max; // min and max share implementation
mod range;
mod sum;
mod system;

use ahash::AHashMap;
use smallvec::SmallVec;
use strum::IntoEnumIterator;

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    io::PlatformIo,
    periodic::Periodic,
    types::{Class, Function, NativeCode, dict::dict_set_str},
    value::Value,
};

/// First native index reserved for the interpreter's builtins.
pub const BUILTIN_BASE: u16 = 0xF000;

/// Signature of every native function.
pub type NativeFn = fn(&mut NativeCall<'_>) -> RunResult<Value>;

/// A registered native function.
#[derive(Debug, Clone, Copy)]
pub struct NativeEntry {
    pub name: &'static str,
    pub func: NativeFn,
}

/// The interpreter's builtins in index order from [`BUILTIN_BASE`].
const BUILTINS: &[(&str, NativeFn)] = &[
    ("len", len::builtin_len),
    ("abs", abs::builtin_abs),
    ("chr", convert::builtin_chr),
    ("ord", convert::builtin_ord),
    ("id", introspect::builtin_id),
    ("type", introspect::builtin_type),
    ("range", range::builtin_range),
    ("sum", sum::builtin_sum),
    ("min", min_max::builtin_min),
    ("max", min_max::builtin_max),
    ("globals", introspect::builtin_globals),
    ("locals", introspect::builtin_locals),
    ("str", convert::builtin_str),
    ("int", convert::builtin_int),
    ("float", convert::builtin_float),
    ("bytearray", convert::builtin_bytearray),
    ("isinstance", introspect::builtin_isinstance),
    ("hasattr", introspect::builtin_hasattr),
    ("ticks", system::builtin_ticks),
    ("gc", system::builtin_gc),
    ("heap", system::builtin_heap),
    ("putb", system::builtin_putb),
    ("getb", system::builtin_getb),
    ("run_in_thread", system::builtin_run_in_thread),
    ("exit", system::builtin_exit),
];

/// Native functions by image native-table index.
#[derive(Debug, Default)]
pub struct NativeTable {
    entries: AHashMap<u16, NativeEntry>,
}

impl NativeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host native function. Indices from [`BUILTIN_BASE`] up are reserved.
    pub fn register(&mut self, index: u16, name: &'static str, func: NativeFn) -> RunResult<()> {
        if index >= BUILTIN_BASE {
            return Err(ExcType::system_error(format!(
                "native index {index:#06x} is reserved for builtins"
            )));
        }
        if let Some(previous) = self.entries.insert(index, NativeEntry { name, func }) {
            tracing::warn!(index, previous = previous.name, name, "native function replaced");
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, index: u16) -> Option<&NativeEntry> {
        self.entries.get(&index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Namespaces visible to a native call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallScope {
    /// Globals of the calling frame.
    pub globals: HeapId,
    /// Names dict of the calling frame, for module and class bodies.
    pub locals: Option<HeapId>,
    pub object_class: HeapId,
}

/// A native function's view of its call.
///
/// The arguments stay reachable (they are held by the native frame) for the
/// whole call, but anything a native allocates is unrooted until it is
/// returned. A native that allocates more than once must keep earlier results
/// on the temporary-root stack.
pub struct NativeCall<'a> {
    name: &'static str,
    args: SmallVec<[Value; 4]>,
    heap: &'a mut Heap,
    io: &'a mut dyn PlatformIo,
    periodic: &'a Periodic,
    scope: CallScope,
    spawns: SmallVec<[Value; 1]>,
    collect: bool,
}

impl<'a> NativeCall<'a> {
    pub(crate) fn new(
        name: &'static str,
        args: &[Value],
        heap: &'a mut Heap,
        io: &'a mut dyn PlatformIo,
        periodic: &'a Periodic,
        scope: CallScope,
    ) -> Self {
        Self {
            name,
            args: SmallVec::from_slice(args),
            heap,
            io,
            periodic,
            scope,
            spawns: SmallVec::new(),
            collect: false,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument `i`; TypeError when the call had fewer.
    pub fn arg(&self, i: usize) -> RunResult<Value> {
        self.args
            .get(i)
            .copied()
            .ok_or_else(|| ExcType::type_error(format!("{}() missing argument {}", self.name, i + 1)))
    }

    /// Fails with TypeError unless exactly `n` arguments were passed.
    pub fn expect_args(&self, n: usize) -> RunResult<()> {
        if self.args.len() == n {
            Ok(())
        } else {
            Err(ExcType::type_error_arg_count(self.name, n, self.args.len()))
        }
    }

    /// Fails with TypeError unless between `min` and `max` arguments were passed.
    pub fn expect_args_between(&self, min: usize, max: usize) -> RunResult<()> {
        let n = self.args.len();
        if (min..=max).contains(&n) {
            Ok(())
        } else {
            Err(ExcType::type_error(format!(
                "{}() takes {min} to {max} arguments ({n} given)",
                self.name
            )))
        }
    }

    /// Argument `i` as an integer; booleans count.
    pub fn int_arg(&self, i: usize) -> RunResult<i32> {
        let v = self.arg(i)?;
        v.as_int().ok_or_else(|| {
            ExcType::type_error(format!(
                "{}() argument {} must be int, not {}",
                self.name,
                i + 1,
                v.type_of(self.heap)
            ))
        })
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        self.heap
    }

    pub fn io(&mut self) -> &mut (dyn PlatformIo + 'a) {
        self.io
    }

    /// Milliseconds since the runtime started, as counted by the tick.
    #[must_use]
    pub fn ms_ticks(&self) -> u32 {
        self.periodic.ms_ticks()
    }

    /// Globals of the calling frame.
    #[must_use]
    pub fn globals(&self) -> HeapId {
        self.scope.globals
    }

    /// Names dict of the calling frame, when it has one.
    #[must_use]
    pub fn locals(&self) -> Option<HeapId> {
        self.scope.locals
    }

    pub(crate) fn object_class(&self) -> HeapId {
        self.scope.object_class
    }

    /// Allocates a string object.
    pub fn alloc_str(&mut self, bytes: &[u8]) -> RunResult<Value> {
        self.heap.alloc_str(bytes).map(Value::Ref)
    }

    /// Asks the runtime to start a thread calling `func` once this call returns.
    ///
    /// `func` must be one of this call's arguments so it stays reachable.
    pub fn spawn_thread(&mut self, func: Value) -> RunResult<()> {
        let is_bytecode = match func.heap_data(self.heap) {
            Some(HeapData::Function(f)) => matches!(self.heap.get(f.code), HeapData::Code(_)),
            _ => false,
        };
        if !is_bytecode {
            return Err(ExcType::type_error(format!(
                "{}() needs a bytecode function, not '{}'",
                self.name,
                func.type_of(self.heap)
            )));
        }
        self.spawns.push(func);
        Ok(())
    }

    pub(crate) fn take_spawns(&mut self) -> SmallVec<[Value; 1]> {
        std::mem::take(&mut self.spawns)
    }

    /// Asks for a full collection once the native has returned.
    pub fn request_collection(&mut self) {
        self.collect = true;
    }

    pub(crate) fn collection_requested(&self) -> bool {
        self.collect
    }
}

/// Handles of the builtin classes, kept by the runtime.
#[derive(Debug)]
pub(crate) struct BuiltinClasses {
    pub object: HeapId,
    /// Indexed by `ExcType as usize`.
    pub exceptions: Vec<HeapId>,
}

/// Fills the builtins dict and registers the builtin natives.
///
/// The classes are made permanent roots; everything else is reachable
/// through the (rooted) builtins dict.
pub(crate) fn install(heap: &mut Heap, natives: &mut NativeTable, builtins: HeapId) -> RunResult<BuiltinClasses> {
    dict_set_str(heap, builtins, b"None", Value::None)?;
    dict_set_str(heap, builtins, b"True", Value::Bool(true))?;
    dict_set_str(heap, builtins, b"False", Value::Bool(false))?;

    let object = new_class(heap, b"object", None, None)?;
    heap.add_root(object);
    dict_set_str(heap, builtins, b"object", Value::Ref(object))?;

    let mut exceptions = Vec::new();
    let mut exception_base = None;
    for kind in ExcType::iter() {
        let name: &'static str = kind.into();
        let class = new_class(heap, name.as_bytes(), exception_base, Some(kind))?;
        heap.add_root(class);
        dict_set_str(heap, builtins, name.as_bytes(), Value::Ref(class))?;
        if kind == ExcType::Exception {
            let bases = heap.alloc_tuple(vec![Value::Ref(class)])?;
            heap.add_root(bases);
            exception_base = Some(bases);
        }
        exceptions.push(class);
    }

    for (offset, &(name, func)) in BUILTINS.iter().enumerate() {
        let index = BUILTIN_BASE + offset as u16;
        natives.entries.insert(index, NativeEntry { name, func });
        let code = heap.allocate(HeapData::NativeCode(NativeCode { argcount: 0, index }))?;
        let mark = heap.temp_root_mark();
        heap.push_temp_root(code)?;
        let function = heap.allocate(HeapData::Function(Function {
            code,
            globals: builtins,
            attrs: None,
            defaults: None,
            closure: None,
        }));
        heap.restore_temp_roots(mark);
        dict_set_str(heap, builtins, name.as_bytes(), Value::Ref(function?))?;
    }
    tracing::debug!(
        natives = BUILTINS.len(),
        exceptions = exceptions.len(),
        "builtins installed"
    );
    Ok(BuiltinClasses { object, exceptions })
}

fn new_class(heap: &mut Heap, name: &[u8], bases: Option<HeapId>, exc_kind: Option<ExcType>) -> RunResult<HeapId> {
    let mark = heap.temp_root_mark();
    let result = (|| {
        let name = heap.alloc_str(name)?;
        heap.push_temp_root(name)?;
        let attrs = heap.alloc_dict()?;
        heap.push_temp_root(attrs)?;
        heap.allocate(HeapData::Class(Class {
            name,
            attrs,
            bases,
            exc_kind,
        }))
    })();
    heap.restore_temp_roots(mark);
    result
}

/// MemoryError up front when `bytes` could never fit in the heap.
fn ensure_fits(heap: &Heap, bytes: usize) -> RunResult<()> {
    let capacity = heap.capacity_chunks() * heap.chunk_size();
    if bytes > capacity {
        return Err(ExcType::MemoryError.msg(format!("{bytes} bytes exceed the {capacity}-byte heap")));
    }
    Ok(())
}

/// Converts a length to an int value.
fn int_from_len(len: usize) -> RunResult<Value> {
    i32::try_from(len).map(Value::Int).map_err(|_| ExcType::overflow())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::dict::dict_get_str;

    fn installed() -> (Heap, NativeTable, HeapId, BuiltinClasses) {
        let mut heap = Heap::new(8192, 8);
        let builtins = heap.alloc_dict().unwrap();
        heap.add_root(builtins);
        let mut natives = NativeTable::new();
        let classes = install(&mut heap, &mut natives, builtins).unwrap();
        (heap, natives, builtins, classes)
    }

    #[test]
    fn exception_classes_follow_kind_order() {
        let (heap, _, builtins, classes) = installed();
        assert_eq!(classes.exceptions.len(), ExcType::iter().count());
        let key_error = dict_get_str(&heap, builtins, b"KeyError").unwrap();
        assert_eq!(key_error, Value::Ref(classes.exceptions[ExcType::KeyError as usize]));
        assert!(dict_get_str(&heap, builtins, b"IOError").is_some());
    }

    #[test]
    fn builtins_survive_collection() {
        let (mut heap, natives, builtins, _) = installed();
        heap.collect_garbage();
        let len = dict_get_str(&heap, builtins, b"len").unwrap();
        let Some(HeapData::Function(f)) = len.heap_data(&heap) else {
            panic!("len is not a function");
        };
        let HeapData::NativeCode(nc) = heap.get(f.code) else {
            panic!("len does not wrap native code");
        };
        assert_eq!(natives.get(nc.index).map(|e| e.name), Some("len"));
    }

    #[test]
    fn host_indices_below_the_reserved_range() {
        fn nop(_: &mut NativeCall<'_>) -> RunResult<Value> {
            Ok(Value::None)
        }
        let mut table = NativeTable::new();
        table.register(3, "nop", nop).unwrap();
        assert_eq!(table.len(), 1);
        let err = table.register(BUILTIN_BASE, "nop", nop).unwrap_err();
        assert_eq!(err.kind(), ExcType::SystemError);
    }
}
