//! Uniform byte access over the target's address spaces.
//!
//! Code images may live in mutable RAM, in the read-only program store, or in
//! the persistent store. Everything that walks bytecode, constant pools or
//! debug tables reads through [`MemSpaces`] so that images never have to be
//! copied into the heap before they can run.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Identifier of one address domain.
///
/// The four `Other*` spaces and `SEeprom` are reserved identifiers: they exist so
/// that images produced for larger targets still name a valid space, but no
/// backing store is attached to them here.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MemSpace {
    Ram,
    Prog,
    Eeprom,
    SEeprom,
    Other0,
    Other1,
    Other2,
    Other3,
}

impl MemSpace {
    /// Whether reads from this space are backed by real storage.
    #[must_use]
    pub fn is_reserved(self) -> bool {
        !matches!(self, Self::Ram | Self::Prog | Self::Eeprom)
    }
}

/// A `(space, address, length)` window into one memory space.
///
/// Code objects keep their bytecode, line-number table and filename as
/// windows rather than heap copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRef {
    pub space: MemSpace,
    pub addr: usize,
    pub len: usize,
}

impl MemRef {
    #[must_use]
    pub fn new(space: MemSpace, addr: usize, len: usize) -> Self {
        Self { space, addr, len }
    }

    /// Returns the window's bytes, going through the same per-byte read path as the interpreter.
    #[must_use]
    pub fn read_all(&self, mem: &MemSpaces) -> Vec<u8> {
        let mut addr = self.addr;
        (0..self.len).map(|_| mem.read_byte(self.space, &mut addr)).collect()
    }
}

impl fmt::Display for MemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#06x}+{}", self.space, self.addr, self.len)
    }
}

/// Backing stores for the real memory spaces.
///
/// Reads past the end of a store yield zero, the same value an erased flash
/// cell or unmapped region would produce on the target.
#[derive(Debug, Default, Clone)]
pub struct MemSpaces {
    ram: Vec<u8>,
    prog: Vec<u8>,
    eeprom: Vec<u8>,
}

impl MemSpaces {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the read-only program store.
    #[must_use]
    pub fn with_prog(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.prog = bytes.into();
        self
    }

    /// Attaches a RAM region, used for images received at run time.
    #[must_use]
    pub fn with_ram(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.ram = bytes.into();
        self
    }

    /// Attaches the persistent store.
    #[must_use]
    pub fn with_eeprom(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.eeprom = bytes.into();
        self
    }

    /// Size in bytes of a space's backing store (zero for reserved spaces).
    #[must_use]
    pub fn len(&self, space: MemSpace) -> usize {
        self.store(space).map_or(0, <[u8]>::len)
    }

    /// Whether a space has no backing bytes at all.
    #[must_use]
    pub fn is_empty(&self, space: MemSpace) -> bool {
        self.len(space) == 0
    }

    fn store(&self, space: MemSpace) -> Option<&[u8]> {
        match space {
            MemSpace::Ram => Some(&self.ram),
            MemSpace::Prog => Some(&self.prog),
            MemSpace::Eeprom => Some(&self.eeprom),
            MemSpace::SEeprom | MemSpace::Other0 | MemSpace::Other1 | MemSpace::Other2 | MemSpace::Other3 => None,
        }
    }

    /// Reads one byte and post-increments `addr`.
    ///
    /// Reserved spaces return 0 and leave `addr` untouched.
    #[inline]
    pub fn read_byte(&self, space: MemSpace, addr: &mut usize) -> u8 {
        let Some(store) = self.store(space) else {
            return 0;
        };
        let byte = store.get(*addr).copied().unwrap_or(0);
        *addr += 1;
        byte
    }

    /// Reads a little-endian u16.
    #[inline]
    pub fn read_u16(&self, space: MemSpace, addr: &mut usize) -> u16 {
        let lo = self.read_byte(space, addr);
        let hi = self.read_byte(space, addr);
        u16::from_le_bytes([lo, hi])
    }

    /// Reads a little-endian i32.
    pub fn read_i32(&self, space: MemSpace, addr: &mut usize) -> i32 {
        let mut buf = [0u8; 4];
        for b in &mut buf {
            *b = self.read_byte(space, addr);
        }
        i32::from_le_bytes(buf)
    }

    /// Reads a little-endian IEEE single.
    pub fn read_f32(&self, space: MemSpace, addr: &mut usize) -> f32 {
        f32::from_bits(self.read_i32(space, addr) as u32)
    }
}
