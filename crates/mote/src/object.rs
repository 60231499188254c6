//! Operations every value supports: truthiness, equality, ordering, containment, printing and repr.

use std::cmp::Ordering;

use crate::{
    exception_private::{ExcType, RunResult},
    heap::{Heap, HeapData, HeapId},
    types::{
        Type,
        class::class_lookup,
        dict::dict_get,
        str::{bytearray_repr_into, string_repr_into},
    },
    value::Value,
};

/// Nesting depth past which comparison and printing stop descending, so that
/// self-referencing containers cannot exhaust the native stack.
const MAX_NESTING: usize = 32;

/// Outcome of [`compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Same,
    Differ,
}

impl Cmp {
    #[must_use]
    pub fn is_same(self) -> bool {
        self == Self::Same
    }

    fn from_bool(same: bool) -> Self {
        if same { Self::Same } else { Self::Differ }
    }
}

/// Flags shared by everything that writes program output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrintState {
    /// Set whenever something other than a suppressed `None` was printed.
    pub something_printed: bool,
    /// A separating space is owed before the next `print` item.
    pub soft_space: bool,
}

/// Truthiness: None, zero, empty containers and False are false.
#[must_use]
pub fn is_false(heap: &Heap, v: Value) -> bool {
    match v {
        Value::None => true,
        Value::Bool(b) => !b,
        Value::Int(i) => i == 0,
        Value::Float(f) => f == 0.0,
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) | HeapData::Bytearray(s) => s.is_empty(),
            HeapData::Tuple(items) | HeapData::List(items) => items.is_empty(),
            HeapData::Dict(d) => d.is_empty(),
            _ => false,
        },
    }
}

/// Identity: the same heap slot, or the same immediate (floats bitwise).
#[must_use]
pub fn is_identical(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

/// Value wrapped by an instance under the reserved `None` key, or the value itself.
fn unwrap_instance(heap: &Heap, v: Value) -> Value {
    if let Value::Ref(id) = v
        && let HeapData::Instance(inst) = heap.get(id)
        && let HeapData::Dict(attrs) = heap.get(inst.attrs)
        && let Some((_, inner)) = attrs.entries().iter().find(|(k, _)| k.is_none())
    {
        return *inner;
    }
    v
}

/// Language-level equality.
///
/// Identity short-circuits. Instances are unwrapped first so an instance
/// wrapping a primitive compares equal to that primitive. Values of different
/// types are never equal.
#[must_use]
pub fn compare(heap: &Heap, a: Value, b: Value) -> Cmp {
    compare_depth(heap, a, b, 0)
}

fn compare_depth(heap: &Heap, a: Value, b: Value, depth: usize) -> Cmp {
    if is_identical(a, b) {
        return Cmp::Same;
    }
    if depth > MAX_NESTING {
        return Cmp::Differ;
    }
    let a = unwrap_instance(heap, a);
    let b = unwrap_instance(heap, b);
    if is_identical(a, b) {
        return Cmp::Same;
    }
    if a.type_of(heap) != b.type_of(heap) {
        return Cmp::Differ;
    }
    match (a, b) {
        (Value::None, Value::None) => Cmp::Same,
        (Value::Bool(x), Value::Bool(y)) => Cmp::from_bool(x == y),
        (Value::Int(x), Value::Int(y)) => Cmp::from_bool(x == y),
        #[expect(clippy::float_cmp, reason = "IEEE equality is the language semantics")]
        (Value::Float(x), Value::Float(y)) => Cmp::from_bool(x == y),
        (Value::Ref(x), Value::Ref(y)) => match (heap.get(x), heap.get(y)) {
            (HeapData::Str(s), HeapData::Str(t)) | (HeapData::Bytearray(s), HeapData::Bytearray(t)) => {
                Cmp::from_bool(s == t)
            }
            (HeapData::Tuple(s), HeapData::Tuple(t)) | (HeapData::List(s), HeapData::List(t)) => Cmp::from_bool(
                s.len() == t.len()
                    && s.iter()
                        .zip(t)
                        .all(|(p, q)| compare_depth(heap, *p, *q, depth + 1).is_same()),
            ),
            (HeapData::Dict(s), HeapData::Dict(t)) => Cmp::from_bool(
                s.len() == t.len()
                    && s.entries().iter().all(|(k, v)| {
                        t.entries().iter().any(|(k2, v2)| {
                            compare_depth(heap, *k, *k2, depth + 1).is_same()
                                && compare_depth(heap, *v, *v2, depth + 1).is_same()
                        })
                    }),
            ),
            _ => Cmp::Differ,
        },
        _ => Cmp::Differ,
    }
}

/// Ordering used by `<` and friends and by `min`/`max`.
///
/// Numbers compare with int/float promotion, strings bytewise, and tuples and
/// lists element by element. Anything else is unorderable.
pub fn order(heap: &Heap, a: Value, b: Value) -> RunResult<Ordering> {
    order_depth(heap, a, b, 0)
}

fn order_depth(heap: &Heap, a: Value, b: Value, depth: usize) -> RunResult<Ordering> {
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return Ok(x.cmp(&y));
    }
    if let (Some(x), Some(y)) = (a.as_float(), b.as_float()) {
        return Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal));
    }
    if depth <= MAX_NESTING
        && let (Value::Ref(x), Value::Ref(y)) = (a, b)
    {
        match (heap.get(x), heap.get(y)) {
            (HeapData::Str(s), HeapData::Str(t)) => return Ok(s.cmp(t)),
            (HeapData::Tuple(s), HeapData::Tuple(t)) | (HeapData::List(s), HeapData::List(t)) => {
                for (p, q) in s.iter().zip(t) {
                    let o = order_depth(heap, *p, *q, depth + 1)?;
                    if o != Ordering::Equal {
                        return Ok(o);
                    }
                }
                return Ok(s.len().cmp(&t.len()));
            }
            _ => {}
        }
    }
    Err(ExcType::type_error(format!(
        "unorderable types: {}() < {}()",
        a.type_of(heap),
        b.type_of(heap)
    )))
}

/// Finds attribute `name` of `obj` without binding methods.
///
/// Modules and instances look in their attribute dict (instances then fall
/// back to their class chain), classes search their chain, and functions look
/// in their attribute dict when they have one.
pub(crate) fn find_attr(heap: &Heap, obj: Value, name: Value) -> RunResult<Option<Value>> {
    let Value::Ref(id) = obj else {
        return Ok(None);
    };
    let name_bytes = name.as_str_bytes(heap).unwrap_or_default();
    match heap.get(id) {
        HeapData::Module(m) => dict_get(heap, m.attrs, name),
        HeapData::Class(_) => Ok(class_lookup(heap, id, name_bytes)),
        HeapData::Instance(inst) => match dict_get(heap, inst.attrs, name)? {
            Some(v) => Ok(Some(v)),
            None => Ok(class_lookup(heap, inst.class, name_bytes)),
        },
        HeapData::Function(f) => match f.attrs {
            Some(attrs) => dict_get(heap, attrs, name),
            None => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Containment test for the `in` operator.
pub fn is_in(heap: &Heap, container: Value, item: Value) -> RunResult<bool> {
    let container_type = container.type_of(heap);
    let Value::Ref(id) = container else {
        return Err(ExcType::type_error(format!(
            "argument of type '{container_type}' is not iterable"
        )));
    };
    match heap.get(id) {
        HeapData::Tuple(items) | HeapData::List(items) => {
            Ok(items.iter().any(|elem| compare(heap, item, *elem).is_same()))
        }
        HeapData::Str(haystack) => {
            let Some(needle) = item.as_str_bytes(heap) else {
                return Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    item.type_of(heap)
                )));
            };
            match needle {
                [] => Ok(true),
                [c] => Ok(haystack.contains(c)),
                _ => Err(ExcType::value_error("'in <string>' requires a single character")),
            }
        }
        HeapData::Dict(d) => Ok(d.entries().iter().any(|(k, _)| compare(heap, item, *k).is_same())),
        _ => Err(ExcType::type_error(format!(
            "argument of type '{container_type}' is not iterable"
        ))),
    }
}

/// Renders `v` for output.
///
/// `is_expr_repr` selects the form used for expression statements (strings
/// quoted, bare `None` suppressed); `is_nested` is set for container elements.
pub fn print(
    heap: &Heap,
    v: Value,
    is_expr_repr: bool,
    is_nested: bool,
    out: &mut Vec<u8>,
    state: &mut PrintState,
) -> RunResult<()> {
    if !(v.is_none() && is_expr_repr && !is_nested) {
        state.something_printed = true;
    }
    print_into(heap, v, is_expr_repr, is_nested, out, 0)
}

fn print_into(
    heap: &Heap,
    v: Value,
    is_expr_repr: bool,
    is_nested: bool,
    out: &mut Vec<u8>,
    depth: usize,
) -> RunResult<()> {
    if depth > MAX_NESTING {
        out.extend_from_slice(b"...");
        return Ok(());
    }
    match v {
        Value::None => {
            if !is_expr_repr || is_nested {
                out.extend_from_slice(b"None");
            }
        }
        Value::Bool(b) => out.extend_from_slice(if b { &b"True"[..] } else { b"False" }),
        Value::Int(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Value::Float(f) => out.extend_from_slice(float_text(f).as_bytes()),
        Value::Ref(id) => match heap.get(id) {
            HeapData::Str(s) => {
                if is_expr_repr || is_nested {
                    string_repr_into(out, s);
                } else {
                    out.extend_from_slice(s);
                }
            }
            HeapData::Tuple(items) => {
                out.push(b'(');
                print_items(heap, items, out, depth)?;
                if items.len() == 1 {
                    out.push(b',');
                }
                out.push(b')');
            }
            HeapData::List(items) => {
                out.push(b'[');
                print_items(heap, items, out, depth)?;
                out.push(b']');
            }
            HeapData::Dict(d) => {
                out.push(b'{');
                for (i, (k, val)) in d.entries().iter().enumerate() {
                    if i > 0 {
                        out.extend_from_slice(b", ");
                    }
                    print_into(heap, *k, is_expr_repr, true, out, depth + 1)?;
                    out.extend_from_slice(b": ");
                    print_into(heap, *val, is_expr_repr, true, out, depth + 1)?;
                }
                out.push(b'}');
            }
            HeapData::Bytearray(b) => bytearray_repr_into(out, b),
            HeapData::Instance(_) => match unwrap_instance(heap, v) {
                Value::Ref(inner) if inner != id && matches!(heap.get(inner), HeapData::Bytearray(_)) => {
                    print_into(heap, Value::Ref(inner), is_expr_repr, is_nested, out, depth + 1)?;
                }
                _ => diagnostic_into(out, Type::Instance, id),
            },
            other => diagnostic_into(out, other.type_of(), id),
        },
    }
    Ok(())
}

fn print_items(heap: &Heap, items: &[Value], out: &mut Vec<u8>, depth: usize) -> RunResult<()> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b", ");
        }
        print_into(heap, *item, true, true, out, depth + 1)?;
    }
    Ok(())
}

/// `<obj type 0x08 @ 0x0000002A>`
fn diagnostic_into(out: &mut Vec<u8>, type_: Type, id: HeapId) {
    out.extend_from_slice(format!("<obj type 0x{:02X} @ 0x{:08X}>", type_.tag(), id.index()).as_bytes());
}

/// Canonical text of a float.
#[must_use]
pub fn float_text(f: f32) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "inf".to_owned() } else { "-inf".to_owned() }
    } else {
        ryu::Buffer::new().format_finite(f).to_owned()
    }
}

/// Decimal or float text of a numeric value; TypeError for anything else.
pub fn repr(heap: &Heap, v: Value) -> RunResult<String> {
    match v {
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(float_text(f)),
        other => Err(ExcType::type_error(format!(
            "repr() unsupported for '{}'",
            other.type_of(heap)
        ))),
    }
}

/// Human-readable text used inside error messages.
#[must_use]
pub fn display_value(heap: &Heap, v: Value) -> String {
    let mut out = Vec::new();
    if print_into(heap, v, true, true, &mut out, 0).is_err() {
        return v.type_of(heap).to_string();
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::{Dict, Instance, dict::dict_set};

    fn heap() -> Heap {
        Heap::new(4096, 8)
    }

    fn s(heap: &mut Heap, text: &str) -> Value {
        Value::Ref(heap.alloc_str(text.as_bytes()).unwrap())
    }

    fn render(heap: &Heap, v: Value, is_expr_repr: bool) -> (String, bool) {
        let mut out = Vec::new();
        let mut state = PrintState::default();
        print(heap, v, is_expr_repr, false, &mut out, &mut state).unwrap();
        (String::from_utf8(out).unwrap(), state.something_printed)
    }

    #[test]
    fn falsy_values() {
        let mut h = heap();
        let empty = s(&mut h, "");
        let a = s(&mut h, "a");
        let list = Value::Ref(h.alloc_list(vec![]).unwrap());
        assert!(is_false(&h, Value::None));
        assert!(is_false(&h, Value::Int(0)));
        assert!(is_false(&h, Value::Float(0.0)));
        assert!(is_false(&h, Value::Float(-0.0)));
        assert!(is_false(&h, Value::Bool(false)));
        assert!(is_false(&h, empty));
        assert!(is_false(&h, list));
        assert!(!is_false(&h, a));
        assert!(!is_false(&h, Value::Int(-3)));
    }

    #[test]
    fn compare_is_reflexive_and_symmetric() {
        let mut h = heap();
        let a = s(&mut h, "abc");
        let b = s(&mut h, "abc");
        let c = s(&mut h, "abd");
        let t1 = Value::Ref(h.alloc_tuple(vec![Value::Int(1), a]).unwrap());
        let t2 = Value::Ref(h.alloc_tuple(vec![Value::Int(1), b]).unwrap());
        let values = [
            Value::None,
            Value::Int(1),
            Value::Float(f32::NAN),
            Value::Float(0.0),
            Value::Float(-0.0),
            Value::Bool(true),
            a,
            b,
            c,
            t1,
            t2,
        ];
        for x in values {
            assert_eq!(compare(&h, x, x), Cmp::Same);
            for y in values {
                assert_eq!(compare(&h, x, y), compare(&h, y, x));
            }
        }
        assert_eq!(compare(&h, a, b), Cmp::Same);
        assert_eq!(compare(&h, a, c), Cmp::Differ);
        assert_eq!(compare(&h, t1, t2), Cmp::Same);
        assert_eq!(compare(&h, Value::Float(0.0), Value::Float(-0.0)), Cmp::Same);
        assert_eq!(compare(&h, Value::Float(f32::NAN), Value::Float(-f32::NAN)), Cmp::Differ);
        assert_eq!(compare(&h, Value::Int(1), Value::Float(1.0)), Cmp::Differ);
    }

    #[test]
    fn dicts_compare_ignoring_order() {
        let mut h = heap();
        let d1 = h.alloc_dict().unwrap();
        let d2 = h.alloc_dict().unwrap();
        dict_set(&mut h, d1, Value::Int(1), Value::Int(10)).unwrap();
        dict_set(&mut h, d1, Value::Int(2), Value::Int(20)).unwrap();
        dict_set(&mut h, d2, Value::Int(2), Value::Int(20)).unwrap();
        dict_set(&mut h, d2, Value::Int(1), Value::Int(10)).unwrap();
        assert_eq!(compare(&h, Value::Ref(d1), Value::Ref(d2)), Cmp::Same);
        dict_set(&mut h, d2, Value::Int(1), Value::Int(11)).unwrap();
        assert_eq!(compare(&h, Value::Ref(d1), Value::Ref(d2)), Cmp::Differ);
    }

    #[test]
    fn wrapped_instance_compares_to_primitive() {
        let mut h = heap();
        let attrs = h.alloc_dict().unwrap();
        dict_set(&mut h, attrs, Value::None, Value::Int(7)).unwrap();
        let name = h.alloc_str(b"W").unwrap();
        let cls_attrs = h.alloc_dict().unwrap();
        let class = h
            .allocate(HeapData::Class(crate::types::Class {
                name,
                attrs: cls_attrs,
                bases: None,
                exc_kind: None,
            }))
            .unwrap();
        let inst = Value::Ref(h.allocate(HeapData::Instance(Instance { class, attrs })).unwrap());
        assert_eq!(compare(&h, inst, Value::Int(7)), Cmp::Same);
        assert_eq!(compare(&h, Value::Int(7), inst), Cmp::Same);
        assert_eq!(compare(&h, inst, Value::Int(8)), Cmp::Differ);
    }

    #[test]
    fn string_containment() {
        let mut h = heap();
        let empty = s(&mut h, "");
        let abc = s(&mut h, "abc");
        let d = s(&mut h, "d");
        let b = s(&mut h, "b");
        let bc = s(&mut h, "bc");
        assert!(is_in(&h, empty, empty).unwrap());
        assert!(is_in(&h, abc, b).unwrap());
        assert!(!is_in(&h, abc, d).unwrap());
        assert_eq!(is_in(&h, abc, bc).unwrap_err().kind(), ExcType::ValueError);
        assert_eq!(is_in(&h, abc, Value::Int(1)).unwrap_err().kind(), ExcType::TypeError);
        assert_eq!(is_in(&h, Value::Int(3), b).unwrap_err().kind(), ExcType::TypeError);
    }

    #[test]
    fn containment_agrees_with_compare() {
        let mut h = heap();
        let x = s(&mut h, "x");
        let x2 = s(&mut h, "x");
        let items = vec![Value::Int(1), Value::Float(2.5), x, Value::None];
        let list = Value::Ref(h.alloc_list(items.clone()).unwrap());
        let tuple = Value::Ref(h.alloc_tuple(items.clone()).unwrap());
        for probe in [Value::Int(1), Value::Int(2), Value::Float(2.5), x2, Value::None, Value::Bool(true)] {
            let expected = items.iter().any(|e| compare(&h, probe, *e).is_same());
            assert_eq!(is_in(&h, list, probe).unwrap(), expected);
            assert_eq!(is_in(&h, tuple, probe).unwrap(), expected);
        }
    }

    #[test]
    fn dict_containment_checks_keys() {
        let mut h = heap();
        let d = h.allocate(HeapData::Dict(Dict::new())).unwrap();
        dict_set(&mut h, d, Value::Int(1), Value::Int(2)).unwrap();
        assert!(is_in(&h, Value::Ref(d), Value::Int(1)).unwrap());
        assert!(!is_in(&h, Value::Ref(d), Value::Int(2)).unwrap());
    }

    #[test]
    fn printing_forms() {
        let mut h = heap();
        let a = s(&mut h, "a'b");
        let t = Value::Ref(h.alloc_tuple(vec![Value::Int(1)]).unwrap());
        let l = Value::Ref(h.alloc_list(vec![a, Value::None, Value::Float(1.5), Value::Bool(false)]).unwrap());
        assert_eq!(render(&h, a, false), ("a'b".to_owned(), true));
        assert_eq!(render(&h, a, true), ("'a\\'b'".to_owned(), true));
        assert_eq!(render(&h, t, false), ("(1,)".to_owned(), true));
        assert_eq!(render(&h, l, false), ("['a\\'b', None, 1.5, False]".to_owned(), true));
        assert_eq!(render(&h, Value::None, true), (String::new(), false));
        assert_eq!(render(&h, Value::None, false), ("None".to_owned(), true));
    }

    #[test]
    fn unprintable_objects_use_diagnostic_form() {
        let mut h = heap();
        let names = h.alloc_tuple(vec![]).unwrap();
        let attrs = h.alloc_dict().unwrap();
        let cls = h
            .allocate(HeapData::Class(crate::types::Class {
                name: names,
                attrs,
                bases: None,
                exc_kind: None,
            }))
            .unwrap();
        let (text, printed) = render(&h, Value::Ref(cls), false);
        assert_eq!(text, format!("<obj type 0x07 @ 0x{:08X}>", cls.index()));
        assert!(printed);
    }

    #[test]
    fn repr_is_numeric_only() {
        let mut h = heap();
        let a = s(&mut h, "a");
        assert_eq!(repr(&h, Value::Int(-42)).unwrap(), "-42");
        assert_eq!(repr(&h, Value::Float(0.25)).unwrap(), "0.25");
        assert_eq!(repr(&h, a).unwrap_err().kind(), ExcType::TypeError);
        assert_eq!(repr(&h, Value::None).unwrap_err().kind(), ExcType::TypeError);
    }

    #[test]
    fn ordering_promotes_numbers_and_walks_sequences() {
        let mut h = heap();
        let a = s(&mut h, "abc");
        let b = s(&mut h, "abd");
        assert_eq!(order(&h, Value::Int(1), Value::Float(1.5)).unwrap(), Ordering::Less);
        assert_eq!(order(&h, Value::Bool(true), Value::Int(1)).unwrap(), Ordering::Equal);
        assert_eq!(order(&h, a, b).unwrap(), Ordering::Less);
        let t1 = Value::Ref(h.alloc_tuple(vec![Value::Int(1), b]).unwrap());
        let t2 = Value::Ref(h.alloc_tuple(vec![Value::Int(1), a]).unwrap());
        assert_eq!(order(&h, t1, t2).unwrap(), Ordering::Greater);
        assert_eq!(order(&h, a, Value::Int(1)).unwrap_err().kind(), ExcType::TypeError);
    }
}
