//! Module creation and import.
//!
//! A module is a code object paired with one dict that serves as both its
//! attribute namespace and the globals of everything defined in it. Import
//! resolution asks the host's [`CodeLoader`] first and falls back to the
//! module table loaded from an image; each import creates a fresh module.

use crate::{
    bytecode::Vm,
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    io::PlatformIo,
    memspace::MemSpaces,
    tracer::VmTracer,
    types::{Module, dict::dict_get_str},
    value::Value,
};

/// Host hook that supplies code objects for module names.
///
/// Returning `Ok(None)` lets the lookup continue in the module table.
pub trait CodeLoader {
    fn load(&mut self, name: &[u8], heap: &mut Heap, mem: &MemSpaces) -> RunResult<Option<HeapId>>;
}

impl<F> CodeLoader for F
where
    F: FnMut(&[u8], &mut Heap, &MemSpaces) -> RunResult<Option<HeapId>>,
{
    fn load(&mut self, name: &[u8], heap: &mut Heap, mem: &MemSpaces) -> RunResult<Option<HeapId>> {
        self(name, heap, mem)
    }
}

/// Creates a module for `code` with a fresh attribute dict.
pub fn module_new(heap: &mut Heap, code: HeapId) -> RunResult<HeapId> {
    if !matches!(heap.get(code), HeapData::Code(_)) {
        return Err(ExcType::type_error(format!(
            "module needs a code object, got {}",
            heap.get(code).type_of()
        )));
    }
    let mark = heap.temp_root_mark();
    let result = heap.push_temp_root(code).and_then(|()| {
        let attrs = heap.alloc_dict()?;
        heap.allocate(HeapData::Module(Module { code, attrs }))
    });
    heap.restore_temp_roots(mark);
    result
}

impl<P: PlatformIo, Tr: VmTracer> Vm<P, Tr> {
    /// Installs the hook consulted before the module table on every import.
    pub fn set_code_loader(&mut self, loader: impl CodeLoader + 'static) {
        self.loader = Some(Box::new(loader));
    }

    /// Resolves `name` to a code object and wraps it in a new module.
    ///
    /// The module's body has not run yet.
    pub fn import_module(&mut self, name: Value) -> RunResult<HeapId> {
        let Some(name) = name.as_str_bytes(&self.heap).map(<[u8]>::to_vec) else {
            return Err(ExcType::SyntaxError.msg(format!(
                "module name must be a string, not {}",
                name.type_of(&self.heap)
            )));
        };
        let module_text = String::from_utf8_lossy(&name).into_owned();
        let loaded = match self.loader.as_mut() {
            Some(loader) => loader.load(&name, &mut self.heap, &self.mem)?,
            None => None,
        };
        let code = match loaded {
            Some(code) => {
                if !matches!(self.heap.get(code), HeapData::Code(_)) {
                    return Err(ExcType::system_error(format!(
                        "loader returned {} for module {module_text}",
                        self.heap.get(code).type_of()
                    )));
                }
                tracing::debug!(module = %module_text, "module supplied by loader");
                code
            }
            None => self
                .modules
                .iter()
                .find(|entry| entry.name == name)
                .map(|entry| entry.code)
                .ok_or_else(|| ExcType::import_error(&module_text))?,
        };
        module_new(&mut self.heap, code)
    }

    /// A global of `module`, looked up without allocating.
    #[must_use]
    pub fn module_global(&self, module: HeapId, name: &str) -> Option<Value> {
        match self.heap.get_if_live(module)? {
            HeapData::Module(m) => dict_get_str(&self.heap, m.attrs, name.as_bytes()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{config::VmConfig, image::load_code, io::NoIo, memspace::MemSpace};

    /// Code image named `m` whose body is a bare `RETURN_VALUE`.
    fn tiny_image() -> Vec<u8> {
        let mut img = vec![0x0A];
        let size_at = img.len();
        img.extend_from_slice(&[0, 0]);
        img.extend_from_slice(&[0, 0x40, 1, 0, 0, 1, 0]);
        img.extend_from_slice(&[0x04, 1, 0x03, 1, 0, b'm']);
        img.extend_from_slice(&[0x03, 0, 0]);
        img.extend_from_slice(&[0x03, 2, 0, b'm', 0]);
        img.extend_from_slice(&[0x04, 0]);
        img.push(0x00);
        img.push(0x53);
        let size = u16::try_from(img.len()).unwrap();
        img[size_at..size_at + 2].copy_from_slice(&size.to_le_bytes());
        img
    }

    #[test]
    fn module_attrs_are_fresh_per_module() {
        let mem = MemSpaces::new().with_prog(tiny_image());
        let mut heap = Heap::new(4096, 8);
        let code = load_code(&mut heap, &mem, MemSpace::Prog, &mut 0).unwrap();
        heap.add_root(code);
        let a = module_new(&mut heap, code).unwrap();
        let b = module_new(&mut heap, code).unwrap();
        let (HeapData::Module(ma), HeapData::Module(mb)) = (heap.get(a), heap.get(b)) else {
            panic!("expected modules");
        };
        assert_ne!(ma.attrs, mb.attrs);
        assert_eq!(ma.code, mb.code);
    }

    #[test]
    fn module_new_rejects_non_code() {
        let mut heap = Heap::new(4096, 8);
        let s = heap.alloc_str(b"x").unwrap();
        assert_eq!(module_new(&mut heap, s).unwrap_err().kind(), ExcType::TypeError);
    }

    #[test]
    fn loader_wins_over_the_table() {
        let mem = MemSpaces::new().with_prog(tiny_image());
        let mut vm = Vm::new(VmConfig::default(), mem, NoIo).unwrap();
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        let seen = std::rc::Rc::clone(&calls);
        vm.set_code_loader(move |name: &[u8], heap: &mut Heap, mem: &MemSpaces| -> RunResult<Option<HeapId>> {
            seen.set(seen.get() + 1);
            if name == b"m" {
                let code = load_code(heap, mem, MemSpace::Prog, &mut 0)?;
                heap.add_root(code);
                Ok(Some(code))
            } else {
                Ok(None)
            }
        });
        let name = vm.heap_mut().alloc_str(b"m").unwrap();
        let module = vm.import_module(Value::Ref(name)).unwrap();
        assert!(matches!(vm.heap().get(module), HeapData::Module(_)));
        let other = vm.heap_mut().alloc_str(b"missing").unwrap();
        let err = vm.import_module(Value::Ref(other)).unwrap_err();
        assert_eq!(err.kind(), ExcType::ImportError);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn non_string_names_are_syntax_errors() {
        let mut vm = Vm::new(VmConfig::default(), MemSpaces::new(), NoIo).unwrap();
        let err = vm.import_module(Value::Int(3)).unwrap_err();
        assert_eq!(err.kind(), ExcType::SyntaxError);
    }
}
