//! Loader for the compiled image format.
//!
//! An image is a tagged object stream. Every object starts with a type byte:
//!
//! | byte | object     | payload                                                  |
//! |------|------------|----------------------------------------------------------|
//! | 0    | None       | -                                                        |
//! | 1    | Int        | i32, little-endian                                       |
//! | 2    | Float      | f32, little-endian                                       |
//! | 3    | String     | u16 length, bytes                                        |
//! | 4    | Tuple      | u8 count, objects                                        |
//! | 10   | CodeObject | see [`load_code`]                                        |
//! | 11   | NativeCode | u8 argcount, u16 native table index                      |
//!
//! A module table is a run of code images terminated by [`IMAGE_TABLE_END`].

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    memspace::{MemRef, MemSpace, MemSpaces},
    types::{Code, NativeCode, code::code_name},
    value::Value,
};

/// Marks the end of a module table.
pub const IMAGE_TABLE_END: u8 = 0xFF;

/// Object type bytes of the image format.
pub mod obj_type {
    pub const NONE: u8 = 0;
    pub const INT: u8 = 1;
    pub const FLOAT: u8 = 2;
    pub const STRING: u8 = 3;
    pub const TUPLE: u8 = 4;
    pub const CODE: u8 = 10;
    pub const NATIVE: u8 = 11;
}

/// Bytes between a code image's type byte and its names tuple.
const CODE_HEADER_LEN: usize = 1 + 2 + 5 + 2;

/// A code image found while scanning a module table.
#[derive(Debug, Clone)]
pub struct TableEntry {
    pub name: Vec<u8>,
    pub code: HeapId,
}

/// Loads one object starting at `addr` and advances `addr` past it.
pub fn load_object(heap: &mut Heap, mem: &MemSpaces, space: MemSpace, addr: &mut usize) -> RunResult<Value> {
    let start = *addr;
    let type_byte = mem.read_byte(space, addr);
    match type_byte {
        obj_type::NONE => Ok(Value::None),
        obj_type::INT => Ok(Value::Int(mem.read_i32(space, addr))),
        obj_type::FLOAT => Ok(Value::Float(mem.read_f32(space, addr))),
        obj_type::STRING => {
            let window = string_window(mem, space, addr, false);
            Ok(Value::Ref(heap.alloc_str(&window.read_all(mem))?))
        }
        obj_type::TUPLE => load_tuple_body(heap, mem, space, addr).map(Value::Ref),
        obj_type::CODE => {
            *addr = start;
            load_code(heap, mem, space, addr).map(Value::Ref)
        }
        obj_type::NATIVE => {
            let argcount = mem.read_byte(space, addr);
            let index = mem.read_u16(space, addr);
            let id = heap.allocate(HeapData::NativeCode(NativeCode { argcount, index }))?;
            Ok(Value::Ref(id))
        }
        other => Err(ExcType::system_error(format!(
            "bad image object type {other} at {space}:{start:#06x}"
        ))),
    }
}

/// Reads a string's length prefix and returns a window over its bytes.
///
/// The compiler terminates filenames with a NUL; `strip_nul` drops it.
fn string_window(mem: &MemSpaces, space: MemSpace, addr: &mut usize, strip_nul: bool) -> MemRef {
    let len = usize::from(mem.read_u16(space, addr));
    let begin = *addr;
    *addr += len;
    let mut last = begin + len.saturating_sub(1);
    let trimmed = if strip_nul && len > 0 && mem.read_byte(space, &mut last) == 0 {
        len - 1
    } else {
        len
    };
    MemRef::new(space, begin, trimmed)
}

/// Expects a string object at `addr` and returns its window without copying it.
fn load_string_ref(mem: &MemSpaces, space: MemSpace, addr: &mut usize, strip_nul: bool) -> RunResult<MemRef> {
    let at = *addr;
    match mem.read_byte(space, addr) {
        obj_type::STRING => Ok(string_window(mem, space, addr, strip_nul)),
        other => Err(ExcType::system_error(format!(
            "expected string in image at {space}:{at:#06x}, found type {other}"
        ))),
    }
}

fn expect_tuple(heap: &mut Heap, mem: &MemSpaces, space: MemSpace, addr: &mut usize) -> RunResult<HeapId> {
    let at = *addr;
    match mem.read_byte(space, addr) {
        obj_type::TUPLE => load_tuple_body(heap, mem, space, addr),
        other => Err(ExcType::system_error(format!(
            "expected tuple in image at {space}:{at:#06x}, found type {other}"
        ))),
    }
}

/// Builds the tuple shell first and fills it in place, so loaded elements are
/// reachable while later ones are still being allocated.
fn load_tuple_body(heap: &mut Heap, mem: &MemSpaces, space: MemSpace, addr: &mut usize) -> RunResult<HeapId> {
    let count = usize::from(mem.read_byte(space, addr));
    let tuple = heap.alloc_tuple(vec![Value::None; count])?;
    let mark = heap.temp_root_mark();
    heap.push_temp_root(tuple)?;
    let result = (|| {
        for i in 0..count {
            let item = load_object(heap, mem, space, addr)?;
            if let HeapData::Tuple(items) = heap.get_mut(tuple) {
                items[i] = item;
            }
        }
        Ok(tuple)
    })();
    heap.restore_temp_roots(mark);
    result
}

/// Loads a code image starting at its type byte.
///
/// Layout after the type byte: u16 size (counted from the type byte), u8
/// argcount, flags, stacksize, nlocals, nfreevars, u16 first line number,
/// names tuple, line-number table string, filename string, constants tuple,
/// cell-variable tuple or None, then the bytecode up to `start + size`.
pub fn load_code(heap: &mut Heap, mem: &MemSpaces, space: MemSpace, addr: &mut usize) -> RunResult<HeapId> {
    let start = *addr;
    let type_byte = mem.read_byte(space, addr);
    if type_byte != obj_type::CODE {
        return Err(ExcType::system_error(format!(
            "expected code image at {space}:{start:#06x}, found type {type_byte}"
        )));
    }
    let size = usize::from(mem.read_u16(space, addr));
    if size < CODE_HEADER_LEN {
        return Err(ExcType::system_error(format!("code image too short ({size} bytes)")));
    }
    let argcount = mem.read_byte(space, addr);
    let flags = mem.read_byte(space, addr);
    let stacksize = mem.read_byte(space, addr);
    let nlocals = mem.read_byte(space, addr);
    let nfreevars = mem.read_byte(space, addr);
    let first_line = mem.read_u16(space, addr);

    let mark = heap.temp_root_mark();
    let result = (|| {
        let names = expect_tuple(heap, mem, space, addr)?;
        heap.push_temp_root(names)?;
        let lnotab = load_string_ref(mem, space, addr, false)?;
        let filename = load_string_ref(mem, space, addr, true)?;
        let consts = expect_tuple(heap, mem, space, addr)?;
        heap.push_temp_root(consts)?;
        let cellvars = match load_object(heap, mem, space, addr)? {
            Value::None => None,
            Value::Ref(id) if matches!(heap.get(id), HeapData::Tuple(_)) => Some(id),
            _ => return Err(ExcType::system_error("code image cellvars must be a tuple or None")),
        };
        let end = start + size;
        if *addr > end {
            return Err(ExcType::system_error(format!(
                "code image at {space}:{start:#06x} overruns its size {size}"
            )));
        }
        let code = Code {
            argcount,
            flags,
            stacksize,
            nlocals,
            nfreevars,
            first_line,
            names,
            consts,
            cellvars,
            lnotab,
            filename,
            bytecode: MemRef::new(space, *addr, end - *addr),
            image: MemRef::new(space, start, size),
        };
        *addr = end;
        heap.allocate(HeapData::Code(code))
    })();
    heap.restore_temp_roots(mark);
    result
}

/// Loads every code image of the table at `addr`, up to the end marker.
///
/// Each image is keyed by the last element of its names tuple. The returned
/// code objects are not rooted; the caller registers them.
pub fn load_table(heap: &mut Heap, mem: &MemSpaces, space: MemSpace, mut addr: usize) -> RunResult<Vec<TableEntry>> {
    let mut entries: Vec<TableEntry> = Vec::new();
    let mark = heap.temp_root_mark();
    let result = (|| {
        loop {
            let mut peek = addr;
            let lead = mem.read_byte(space, &mut peek);
            if lead == IMAGE_TABLE_END || peek == addr {
                // end marker, or a reserved space that yields nothing
                break;
            }
            if addr >= mem.len(space) {
                return Err(ExcType::system_error(format!(
                    "module table in {space} is missing its end marker"
                )));
            }
            let code = load_code(heap, mem, space, &mut addr)?;
            heap.add_root(code);
            let name = match heap.get(code) {
                HeapData::Code(c) => code_name(heap, c.names).into_bytes(),
                _ => Vec::new(),
            };
            tracing::debug!(module = %String::from_utf8_lossy(&name), %space, "found image");
            entries.push(TableEntry { name, code });
        }
        Ok(())
    })();
    // the caller takes over rooting
    for entry in &entries {
        heap.remove_root(entry.code);
    }
    heap.restore_temp_roots(mark);
    result.map(|()| entries)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn str_obj(out: &mut Vec<u8>, s: &[u8]) {
        out.push(obj_type::STRING);
        out.extend_from_slice(&(s.len() as u16).to_le_bytes());
        out.extend_from_slice(s);
    }

    #[test]
    fn scalars_and_strings() {
        let mut bytes = vec![obj_type::INT];
        bytes.extend_from_slice(&(-5i32).to_le_bytes());
        bytes.push(obj_type::FLOAT);
        bytes.extend_from_slice(&1.5f32.to_le_bytes());
        str_obj(&mut bytes, b"hi");
        let mem = MemSpaces::new().with_prog(bytes);
        let mut heap = Heap::new(1024, 8);
        let mut addr = 0;
        assert_eq!(load_object(&mut heap, &mem, MemSpace::Prog, &mut addr).unwrap(), Value::Int(-5));
        assert_eq!(load_object(&mut heap, &mem, MemSpace::Prog, &mut addr).unwrap(), Value::Float(1.5));
        let s = load_object(&mut heap, &mem, MemSpace::Prog, &mut addr).unwrap();
        assert_eq!(s.as_str_bytes(&heap), Some(&b"hi"[..]));
        assert_eq!(addr, mem.len(MemSpace::Prog));
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let mem = MemSpaces::new().with_prog(vec![7]);
        let mut heap = Heap::new(1024, 8);
        let err = load_object(&mut heap, &mem, MemSpace::Prog, &mut 0).unwrap_err();
        assert_eq!(err.kind(), ExcType::SystemError);
    }

    #[test]
    fn tuple_contents_survive_collection_while_loading() {
        // tuple of many strings in a heap that must collect mid-load
        let mut bytes = vec![obj_type::TUPLE, 6];
        for _ in 0..6 {
            str_obj(&mut bytes, b"abcd");
        }
        let mem = MemSpaces::new().with_prog(bytes);
        let mut heap = Heap::new(8 * 16, 8);
        // garbage that forces a collection during the load
        for _ in 0..4 {
            heap.alloc_str(b"0123456789").unwrap();
        }
        let t = load_object(&mut heap, &mem, MemSpace::Prog, &mut 0).unwrap();
        let Some(HeapData::Tuple(items)) = t.heap_data(&heap) else {
            panic!("expected tuple");
        };
        assert_eq!(items.len(), 6);
        for item in items {
            assert_eq!(item.as_str_bytes(&heap), Some(&b"abcd"[..]));
        }
        assert_eq!(heap.temp_root_depth(), 0);
    }
}
