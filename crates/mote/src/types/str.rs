/// Appends the quoted, escaped form of a byte string: `'a\n'`.
pub(crate) fn string_repr_into(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'\'');
    escape_into(out, bytes, b'\'');
    out.push(b'\'');
}

/// Appends `bytearray(b'...')`.
pub(crate) fn bytearray_repr_into(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(b"bytearray(b'");
    escape_into(out, bytes, b'\'');
    out.extend_from_slice(b"')");
}

fn escape_into(out: &mut Vec<u8>, bytes: &[u8], quote: u8) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for &b in bytes {
        match b {
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            _ if b == quote => {
                out.push(b'\\');
                out.push(b);
            }
            0x20..=0x7E => out.push(b),
            _ => {
                out.extend_from_slice(b"\\x");
                out.push(HEX[usize::from(b >> 4)]);
                out.push(HEX[usize::from(b & 0x0F)]);
            }
        }
    }
}

/// Resolves a possibly negative index against `len`.
pub(crate) fn normalize_index(index: i32, len: usize) -> Option<usize> {
    let len_i = i64::try_from(len).ok()?;
    let idx = if index < 0 { i64::from(index) + len_i } else { i64::from(index) };
    if (0..len_i).contains(&idx) {
        usize::try_from(idx).ok()
    } else {
        None
    }
}

/// Clamps slice bounds the way the source language does for `s[a:b]`.
pub(crate) fn slice_bounds(start: Option<i32>, stop: Option<i32>, len: usize) -> (usize, usize) {
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let clamp = |v: Option<i32>, default: i64| -> i64 {
        match v {
            None => default,
            Some(i) if i < 0 => (i64::from(i) + len_i).max(0),
            Some(i) => i64::from(i).min(len_i),
        }
    };
    let lo = clamp(start, 0);
    let hi = clamp(stop, len_i).max(lo);
    (
        usize::try_from(lo).unwrap_or(0),
        usize::try_from(hi).unwrap_or(len),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_escapes_quotes_and_controls() {
        let mut out = Vec::new();
        string_repr_into(&mut out, b"it's\n\x01");
        assert_eq!(out, b"'it\\'s\\n\\x01'");
    }

    #[test]
    fn negative_indices_wrap_once() {
        assert_eq!(normalize_index(-1, 3), Some(2));
        assert_eq!(normalize_index(-4, 3), None);
        assert_eq!(normalize_index(3, 3), None);
    }

    #[test]
    fn slices_clamp() {
        assert_eq!(slice_bounds(Some(-2), None, 5), (3, 5));
        assert_eq!(slice_bounds(Some(4), Some(1), 5), (4, 4));
        assert_eq!(slice_bounds(None, Some(99), 5), (0, 5));
    }
}
