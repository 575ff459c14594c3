use log::{debug, trace};

use super::HeapAllocator;
use crate::{
  align::{UNIT, bytes, payload_units},
  arena::Arena,
  block::{BlockInfo, MAX_UNITS, NIL, Payload, Units},
  error::{AllocError, HeapError, Result},
};

// Header unit: size, next free block. Tail unit: size, previous free block.
// Allocated blocks carry NIL in both links.
const SIZE: usize = 0;
const LINK: usize = 1;

/// Header plus tail tag.
const OVERHEAD: usize = 2;
const MIN_BLOCK: usize = OVERHEAD + 1;

/// The sentinel occupies units 0 and 1, outside the arena.
const SENTINEL: usize = 0;

/// Boundary-tagged heap with a circular free list.
///
/// Only free blocks are on the list. Each free block names its successor in
/// its header and its predecessor in its tail tag, so a freed block finds
/// both physical neighbours in O(1): the header right above it and the tail
/// right below it.
///
/// ```text
///         ┌──────────────────── free list (circular) ───────────────────┐
///         ▼                                                             │
///   ┌──────────┐      ┌──────────┐          ┌──────────┐                │
///   │ sentinel │ ───▶ │  free A  │ ───────▶ │  free B  │ ───────────────┘
///   └──────────┘      └──────────┘          └──────────┘
///                            ▲
///                            └── cursor: the next search starts after it
/// ```
#[derive(Debug)]
pub struct TaggedHeap<A> {
  units: Units<A>,
  cursor: usize,
  live: bool,
}

impl<A: Arena> TaggedHeap<A> {
  pub fn new(arena: A) -> Self {
    let mut heap = Self {
      units: Units::new(arena, OVERHEAD),
      cursor: SENTINEL,
      live: false,
    };
    heap.install_sentinel();
    heap
  }

  pub fn arena(&self) -> &A {
    &self.units.arena
  }

  pub fn arena_mut(&mut self) -> &mut A {
    &mut self.units.arena
  }

  fn install_sentinel(&mut self) {
    self.units.clear_sentinel();
    self.set_size(SENTINEL, OVERHEAD);
    self.link(SENTINEL, SENTINEL);
    self.cursor = SENTINEL;
  }

  fn units_for(nbytes: usize) -> Option<usize> {
    payload_units(nbytes)?
      .checked_add(OVERHEAD)
      .filter(|&units| units <= MAX_UNITS)
  }

  #[inline]
  fn size(
    &self,
    block: usize,
  ) -> usize {
    self.units.get(block, SIZE)
  }

  #[inline]
  fn tail(
    &self,
    block: usize,
  ) -> usize {
    block + self.size(block) - 1
  }

  #[inline]
  fn next(
    &self,
    block: usize,
  ) -> usize {
    self.units.get(block, LINK)
  }

  #[inline]
  fn prev(
    &self,
    block: usize,
  ) -> usize {
    self.units.get(self.tail(block), LINK)
  }

  #[inline]
  fn is_free(
    &self,
    block: usize,
  ) -> bool {
    self.next(block) != NIL
  }

  /// Writes `size` into both the header and the tail it implies.
  fn set_size(
    &mut self,
    block: usize,
    size: usize,
  ) {
    self.units.set(block, SIZE, size);
    self.units.set(block + size - 1, SIZE, size);
  }

  /// Makes `b` the successor of `a`.
  fn link(
    &mut self,
    a: usize,
    b: usize,
  ) {
    self.units.set(a, LINK, b);
    let tail = self.tail(b);
    self.units.set(tail, LINK, a);
  }

  fn unlink(
    &mut self,
    block: usize,
  ) {
    let (prev, next) = (self.prev(block), self.next(block));
    self.link(prev, next);
  }

  fn mark_allocated(
    &mut self,
    block: usize,
  ) {
    let tail = self.tail(block);
    self.units.set(block, LINK, NIL);
    self.units.set(tail, LINK, NIL);
  }

  /// Hands out `units` units of `block`, whose list predecessor is `prev`.
  ///
  /// A larger block keeps its lower part on the list in place and gives up
  /// its upper end, so no links move.
  fn take(
    &mut self,
    prev: usize,
    block: usize,
    units: usize,
  ) -> Payload {
    let size = self.size(block);
    let chosen = if size == units {
      let next = self.next(block);
      self.link(prev, next);
      block
    } else {
      let rest = size - units;
      self.set_size(block, rest);
      let tail = self.tail(block);
      self.units.set(tail, LINK, prev);

      let upper = block + rest;
      self.set_size(upper, units);
      trace!("split block {block}: {rest} + {units} units");
      upper
    };

    self.mark_allocated(chosen);
    self.cursor = prev;
    self.units.payload(chosen)
  }

  /// Extends the arena far enough that the new space, once merged, is
  /// guaranteed to satisfy a request of `units` units.
  fn grow(
    &mut self,
    units: usize,
    requested: usize,
  ) -> Result<()> {
    let page_units = (self.units.arena.page_size() / UNIT).max(1);
    let mut grow = units.max(page_units);
    if grow > units && grow < units + MIN_BLOCK {
      grow += page_units;
    }
    if self.units.end() + grow > MAX_UNITS {
      return Err(AllocError::OutOfMemory { requested });
    }

    let offset = self.units.arena.extend(bytes(grow)).map_err(|err| {
      debug!("tagged heap: out of memory for {requested} bytes: {err}");
      AllocError::OutOfMemory { requested }
    })?;
    debug!(
      "tagged heap: grew by {} bytes to {}",
      bytes(grow),
      self.units.arena.size()
    );

    let block = self.units.index(offset);
    self.set_size(block, grow);
    self.mark_allocated(block);
    self.release(block);
    Ok(())
  }

  /// Puts `block` on the free list behind the cursor and merges it with
  /// free physical neighbours. Leaves the merged block right after the
  /// cursor.
  fn release(
    &mut self,
    block: usize,
  ) {
    let cursor = self.cursor;
    let after = self.next(cursor);
    self.link(block, after);
    self.link(cursor, block);

    let upper = block + self.size(block);
    if upper < self.units.end() && self.is_free(upper) {
      self.coalesce(block, upper);
      self.cursor = self.prev(block);
    }

    if block > self.units.first() {
      let lower_tail = block - 1;
      if self.units.get(lower_tail, LINK) != NIL {
        let lower = lower_tail + 1 - self.units.get(lower_tail, SIZE);
        self.coalesce(lower, block);
        self.cursor = self.prev(lower);
      }
    }
  }

  /// Folds `upper` into the physically adjacent `lower`. Both are free.
  fn coalesce(
    &mut self,
    lower: usize,
    upper: usize,
  ) {
    trace!("merge block {lower} with block {upper}");
    self.unlink(upper);
    let prev = self.prev(lower);
    let size = self.size(lower) + self.size(upper);
    self.set_size(lower, size);
    let tail = self.tail(lower);
    self.units.set(tail, LINK, prev);
  }

  fn check_blocks(&self) -> core::result::Result<usize, HeapError> {
    let end = self.units.end();
    let mut block = self.units.first();
    let mut prev_free = None;
    let mut free = 0;

    while block < end {
      let size = self.size(block);
      let offset = self.units.offset(block);
      if size < MIN_BLOCK || block + size > end {
        return Err(HeapError::BadSize { offset, size });
      }

      let tail = self.tail(block);
      let tail_free = self.units.get(tail, LINK) != NIL;
      if self.units.get(tail, SIZE) != size || tail_free != self.is_free(block) {
        return Err(HeapError::TailMismatch { offset });
      }

      if self.is_free(block) {
        if let Some(lower) = prev_free {
          return Err(HeapError::Uncoalesced {
            lower,
            upper: offset,
          });
        }
        prev_free = Some(offset);
        free += size;
      } else {
        prev_free = None;
      }
      block += size;
    }

    Ok(bytes(free))
  }

  fn check_list(&self) -> core::result::Result<usize, HeapError> {
    let end = self.units.end();
    let limit = end - self.units.first() + 1;
    let mut block = SENTINEL;
    let mut listed = 0;
    let mut cursor_seen = self.cursor == SENTINEL;

    for _ in 0..=limit {
      let next = self.next(block);
      let offset = if block == SENTINEL {
        0
      } else {
        self.units.offset(block)
      };
      if next == NIL || (next != SENTINEL && (next < self.units.first() || next >= end)) {
        return Err(HeapError::BrokenLink { offset });
      }
      if self.prev(next) != block {
        return Err(HeapError::BrokenLink { offset });
      }
      if next == SENTINEL {
        if !cursor_seen {
          return Err(HeapError::BrokenLink {
            offset: self.units.offset(self.cursor),
          });
        }
        return Ok(bytes(listed));
      }
      listed += self.size(next);
      cursor_seen |= next == self.cursor;
      block = next;
    }

    Err(HeapError::BrokenLink { offset: 0 })
  }
}

impl<A: Arena> HeapAllocator for TaggedHeap<A> {
  fn init(&mut self) -> Result<()> {
    self.units.arena.init()?;
    self.units.arena.reset();
    self.install_sentinel();
    self.live = true;
    debug!("tagged heap: init");
    Ok(())
  }

  fn reset(&mut self) {
    self.units.arena.reset();
    self.install_sentinel();
    debug!("tagged heap: reset");
  }

  fn deinit(&mut self) {
    self.units.arena.teardown();
    self.install_sentinel();
    self.live = false;
    debug!("tagged heap: deinit");
  }

  fn allocate(
    &mut self,
    nbytes: usize,
  ) -> Result<Payload> {
    if !self.live {
      self.init()?;
    }
    let units = Self::units_for(nbytes).ok_or(AllocError::OutOfMemory { requested: nbytes })?;

    let mut prev = self.cursor;
    let mut block = self.next(prev);
    loop {
      let size = self.size(block);
      if block != SENTINEL && (size == units || size >= units + MIN_BLOCK) {
        let payload = self.take(prev, block, units);
        trace!("allocate({nbytes}) -> {payload:?}");
        return Ok(payload);
      }

      if block == self.cursor {
        // Wrapped around without a fit.
        self.grow(units, nbytes)?;
        prev = self.cursor;
        block = self.next(prev);
        continue;
      }

      prev = block;
      block = self.next(block);
    }
  }

  fn free(
    &mut self,
    payload: Option<Payload>,
  ) {
    let Some(payload) = payload else {
      return;
    };

    let block = self.units.block(payload);
    let size = self.size(block);
    debug_assert!(
      size >= MIN_BLOCK && block + size <= self.units.end(),
      "free({payload:?}): implausible block size {size}"
    );
    debug_assert!(!self.is_free(block), "free({payload:?}): double free");

    trace!("free({payload:?}), {size} units");
    self.release(block);
  }

  fn free_bytes(&self) -> usize {
    if !self.live {
      return 0;
    }

    let mut free = 0;
    let mut block = self.next(SENTINEL);
    while block != SENTINEL {
      free += self.size(block);
      block = self.next(block);
    }
    bytes(free)
  }

  fn capacity(
    &self,
    payload: Payload,
  ) -> usize {
    let block = self.units.block(payload);
    bytes(self.size(block) - OVERHEAD)
  }

  fn payload(
    &self,
    payload: Payload,
  ) -> &[u8] {
    let block = self.units.block(payload);
    let range = self.units.payload_range(block, self.size(block), OVERHEAD);
    &self.units.arena.bytes()[range]
  }

  fn payload_mut(
    &mut self,
    payload: Payload,
  ) -> &mut [u8] {
    let block = self.units.block(payload);
    let range = self.units.payload_range(block, self.size(block), OVERHEAD);
    &mut self.units.arena.bytes_mut()[range]
  }

  fn copy_payload(
    &mut self,
    from: Payload,
    to: Payload,
    len: usize,
  ) {
    let src = from.offset();
    self.units.arena.bytes_mut().copy_within(src..src + len, to.offset());
  }

  fn heap_size(&self) -> usize {
    self.units.arena.size()
  }

  fn overhead(&self) -> usize {
    bytes(OVERHEAD)
  }

  fn blocks(&self) -> Vec<BlockInfo> {
    let mut blocks = Vec::new();
    let mut block = self.units.first();
    while block < self.units.end() {
      let size = self.size(block);
      if size == 0 {
        break;
      }
      blocks.push(BlockInfo {
        offset: self.units.offset(block),
        size: bytes(size),
        free: self.is_free(block),
      });
      block += size;
    }
    blocks
  }

  fn check(&self) -> core::result::Result<(), HeapError> {
    let walked = self.check_blocks()?;
    let listed = self.check_list()?;
    if listed != walked {
      return Err(HeapError::FreeMismatch { listed, walked });
    }

    let covered: usize = self.blocks().iter().map(|b| b.size).sum();
    let size = self.units.arena.size();
    if covered != size {
      return Err(HeapError::Coverage { covered, size });
    }
    Ok(())
  }
}
