//! Block ids, payload handles and header field storage.
//!
//! Blocks are named by unit index rather than by address. The first `base`
//! indices belong to the sentinel, which lives inside the allocator value;
//! every later index maps onto the arena:
//!
//! ```text
//!   unit index:   0 .. base-1 │ base        base+1      base+2 ...
//!                 ────────────┼────────────────────────────────────
//!   storage:      sentinel    │ arena[0]    arena[U]    arena[2U] ...
//! ```
//!
//! Header fields are 32-bit words inside a unit, so every access is a
//! bounds-checked slice read. A corrupted size or link panics instead of
//! scribbling over unrelated memory.

use crate::{
  align::{UNIT, bytes},
  arena::Arena,
};

/// Link value meaning "not on any list".
pub(crate) const NIL: usize = u32::MAX as usize;

/// Largest number of units one heap can index.
pub(crate) const MAX_UNITS: usize = NIL - 1;

/// 32-bit header fields per unit.
pub(crate) const FIELDS: usize = 4;

const WORD: usize = size_of::<u32>();

/// Most units a sentinel may occupy.
const MAX_SENTINEL: usize = 2;

/// Handle to an allocation: the arena byte offset of its first payload byte.
///
/// This is the allocator's notion of a pointer. It is only meaningful for
/// the heap that produced it and only until it is freed or resized away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Payload(usize);

impl Payload {
  /// Byte offset of the payload from the start of the arena.
  pub fn offset(self) -> usize {
    self.0
  }
}

/// One block as seen by an address-order walk of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Arena byte offset of the block header.
  pub offset: usize,
  /// Block length in bytes, headers included.
  pub size: usize,
  pub free: bool,
}

/// Unit-addressed view over a sentinel plus an arena.
#[derive(Debug)]
pub(crate) struct Units<A> {
  pub(crate) arena: A,
  sentinel: [[u32; FIELDS]; MAX_SENTINEL],
  base: usize,
}

impl<A: Arena> Units<A> {
  pub(crate) fn new(
    arena: A,
    base: usize,
  ) -> Self {
    assert!(base <= MAX_SENTINEL);
    Self {
      arena,
      sentinel: [[0; FIELDS]; MAX_SENTINEL],
      base,
    }
  }

  /// Index of the first arena unit.
  #[inline]
  pub(crate) fn first(&self) -> usize {
    self.base
  }

  /// One past the index of the last arena unit.
  #[inline]
  pub(crate) fn end(&self) -> usize {
    self.base + self.arena.size() / UNIT
  }

  /// Arena byte offset of the unit at `index`.
  #[inline]
  pub(crate) fn offset(
    &self,
    index: usize,
  ) -> usize {
    debug_assert!(index >= self.base, "the sentinel has no arena offset");
    bytes(index - self.base)
  }

  /// Unit index of the arena byte `offset`.
  #[inline]
  pub(crate) fn index(
    &self,
    offset: usize,
  ) -> usize {
    offset / UNIT + self.base
  }

  #[inline]
  pub(crate) fn payload(
    &self,
    block: usize,
  ) -> Payload {
    Payload(self.offset(block + 1))
  }

  /// Header index of the block owning `payload`.
  #[inline]
  pub(crate) fn block(
    &self,
    payload: Payload,
  ) -> usize {
    debug_assert!(
      payload.0 % UNIT == 0 && payload.0 >= UNIT,
      "payload offset {:#x} was not produced by this allocator",
      payload.0
    );
    self.index(payload.0) - 1
  }

  pub(crate) fn get(
    &self,
    index: usize,
    field: usize,
  ) -> usize {
    if index < self.base {
      return self.sentinel[index][field] as usize;
    }

    let at = self.offset(index) + field * WORD;
    let mut word = [0u8; WORD];
    word.copy_from_slice(&self.arena.bytes()[at..at + WORD]);
    u32::from_ne_bytes(word) as usize
  }

  pub(crate) fn set(
    &mut self,
    index: usize,
    field: usize,
    value: usize,
  ) {
    debug_assert!(value <= NIL, "header field overflow: {value}");
    let value = value as u32;
    if index < self.base {
      self.sentinel[index][field] = value;
      return;
    }

    let at = self.offset(index) + field * WORD;
    self.arena.bytes_mut()[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
  }

  /// Zeroes every sentinel field.
  pub(crate) fn clear_sentinel(&mut self) {
    self.sentinel = [[0; FIELDS]; MAX_SENTINEL];
  }

  /// Byte range of the payload of `block`, whose size is `size` units of
  /// which `overhead` are bookkeeping.
  pub(crate) fn payload_range(
    &self,
    block: usize,
    size: usize,
    overhead: usize,
  ) -> core::ops::Range<usize> {
    let start = self.offset(block + 1);
    start..start + bytes(size - overhead)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::VecArena;

  fn units(base: usize) -> Units<VecArena> {
    let mut arena = VecArena::with_page_size(1 << 16, 4096);
    arena.init().unwrap();
    arena.extend(bytes(8)).unwrap();
    Units::new(arena, base)
  }

  #[test]
  fn sentinel_and_arena_fields_are_separate() {
    let mut u = units(2);
    u.set(0, 1, 7);
    u.set(1, 1, 9);
    u.set(2, 1, 11);

    assert_eq!(u.get(0, 1), 7);
    assert_eq!(u.get(1, 1), 9);
    assert_eq!(u.get(2, 1), 11);
    assert_eq!(u.arena.bytes()[WORD..2 * WORD], 11u32.to_ne_bytes());
  }

  #[test]
  fn index_and_offset_round_trip() {
    let u = units(1);
    assert_eq!(u.first(), 1);
    assert_eq!(u.end(), 9);
    assert_eq!(u.offset(1), 0);
    assert_eq!(u.offset(4), 3 * UNIT);
    assert_eq!(u.index(3 * UNIT), 4);

    let p = u.payload(4);
    assert_eq!(p.offset(), 4 * UNIT);
    assert_eq!(u.block(p), 4);
  }

  #[test]
  fn nil_fits_a_field() {
    let mut u = units(1);
    u.set(3, 2, NIL);
    assert_eq!(u.get(3, 2), NIL);
  }

  #[test]
  #[should_panic]
  fn reads_past_the_arena_panic() {
    let u = units(1);
    u.get(u.end(), 0);
  }
}
