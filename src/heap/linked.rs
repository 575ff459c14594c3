use log::{debug, trace};

use super::HeapAllocator;
use crate::{
  align::{UNIT, bytes, payload_units},
  arena::Arena,
  block::{BlockInfo, MAX_UNITS, NIL, Payload, Units},
  error::{AllocError, HeapError, Result},
};

const SIZE: usize = 0;
const FREE: usize = 1;
const PREV: usize = 2;
const NEXT: usize = 3;

const OVERHEAD: usize = 1;
const MIN_BLOCK: usize = OVERHEAD + 1;

/// Unit 0, outside the arena. Never free, size zero.
const SENTINEL: usize = 0;

/// Heap threading every block, free or not, through one address-ordered
/// circular list.
///
/// ```text
///   ┌──────────┐    ┌─────────┐    ┌─────────┐    ┌─────────┐
///   │ sentinel │ ⇄  │ used    │ ⇄  │ free    │ ⇄  │ used    │ ⇄ (sentinel)
///   └──────────┘    └─────────┘    └─────────┘    └─────────┘
///                    arena[0]       physically adjacent ──▶
/// ```
///
/// Freeing flips a flag; the physical neighbours are simply the list
/// neighbours, so coalescing needs no tail tags.
#[derive(Debug)]
pub struct LinkedHeap<A> {
  units: Units<A>,
  cursor: usize,
  live: bool,
}

impl<A: Arena> LinkedHeap<A> {
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
  fn next(
    &self,
    block: usize,
  ) -> usize {
    self.units.get(block, NEXT)
  }

  #[inline]
  fn prev(
    &self,
    block: usize,
  ) -> usize {
    self.units.get(block, PREV)
  }

  #[inline]
  fn is_free(
    &self,
    block: usize,
  ) -> bool {
    self.units.get(block, FREE) != 0
  }

  fn set_free(
    &mut self,
    block: usize,
    free: bool,
  ) {
    self.units.set(block, FREE, free as usize);
  }

  fn link(
    &mut self,
    a: usize,
    b: usize,
  ) {
    self.units.set(a, NEXT, b);
    self.units.set(b, PREV, a);
  }

  /// Physically adjacent: `upper` starts where `lower` ends.
  fn adjacent(
    &self,
    lower: usize,
    upper: usize,
  ) -> bool {
    lower != SENTINEL && lower + self.size(lower) == upper
  }

  fn take(
    &mut self,
    prev: usize,
    block: usize,
    units: usize,
  ) -> Payload {
    let size = self.size(block);
    let chosen = if size == units {
      block
    } else {
      let rest = size - units;
      let upper = block + rest;
      let next = self.next(block);
      self.units.set(block, SIZE, rest);
      self.units.set(upper, SIZE, units);
      self.link(block, upper);
      self.link(upper, next);
      trace!("split block {block}: {rest} + {units} units");
      upper
    };

    self.set_free(chosen, false);
    self.cursor = prev;
    self.units.payload(chosen)
  }

  /// Appends a fresh block at the top of the arena and frees it into the
  /// list. Sized so that, merged or not, it satisfies `units`.
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
      debug!("linked heap: out of memory for {requested} bytes: {err}");
      AllocError::OutOfMemory { requested }
    })?;
    debug!(
      "linked heap: grew by {} bytes to {}",
      bytes(grow),
      self.units.arena.size()
    );

    let block = self.units.index(offset);
    let last = self.prev(SENTINEL);
    self.units.set(block, SIZE, grow);
    self.set_free(block, false);
    self.link(last, block);
    self.link(block, SENTINEL);
    self.release(block);
    Ok(())
  }

  /// Marks `block` free and folds it together with free neighbours. The
  /// cursor ends on the merged block's predecessor.
  fn release(
    &mut self,
    block: usize,
  ) {
    self.set_free(block, true);

    let next = self.next(block);
    if self.is_free(next) && self.adjacent(block, next) {
      trace!("merge block {block} with block {next}");
      let size = self.size(block) + self.size(next);
      let after = self.next(next);
      self.units.set(block, SIZE, size);
      self.link(block, after);
    }

    let mut block = block;
    let prev = self.prev(block);
    if self.is_free(prev) && self.adjacent(prev, block) {
      trace!("merge block {prev} with block {block}");
      let size = self.size(prev) + self.size(block);
      let after = self.next(block);
      self.units.set(prev, SIZE, size);
      self.link(prev, after);
      block = prev;
    }

    self.cursor = self.prev(block);
  }
}

impl<A: Arena> HeapAllocator for LinkedHeap<A> {
  fn init(&mut self) -> Result<()> {
    self.units.arena.init()?;
    self.units.arena.reset();
    self.install_sentinel();
    self.live = true;
    debug!("linked heap: init");
    Ok(())
  }

  fn reset(&mut self) {
    self.units.arena.reset();
    self.install_sentinel();
    debug!("linked heap: reset");
  }

  fn deinit(&mut self) {
    self.units.arena.teardown();
    self.install_sentinel();
    self.live = false;
    debug!("linked heap: deinit");
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
      if self.is_free(block) && (size == units || size >= units + MIN_BLOCK) {
        let payload = self.take(prev, block, units);
        trace!("allocate({nbytes}) -> {payload:?}");
        return Ok(payload);
      }

      if block == self.cursor {
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
      if self.is_free(block) {
        free += self.size(block);
      }
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
    let mut block = self.next(SENTINEL);
    while block != SENTINEL && block != NIL && blocks.len() < self.units.end() {
      blocks.push(BlockInfo {
        offset: self.units.offset(block),
        size: bytes(self.size(block)),
        free: self.is_free(block),
      });
      block = self.next(block);
    }
    blocks
  }

  fn check(&self) -> core::result::Result<(), HeapError> {
    let end = self.units.end();
    let mut expected = self.units.first();
    let mut block = SENTINEL;
    let mut lower_free: Option<usize> = None;
    let mut cursor_seen = self.cursor == SENTINEL;
    let mut walked = 0;

    loop {
      let next = self.next(block);
      let offset = if block == SENTINEL {
        0
      } else {
        self.units.offset(block)
      };
      if next == NIL || self.prev(next) != block {
        return Err(HeapError::BrokenLink { offset });
      }
      if next == SENTINEL {
        break;
      }
      // Blocks tile the arena in list order.
      if next != expected {
        return Err(HeapError::BrokenLink { offset });
      }

      let size = self.size(next);
      let next_offset = self.units.offset(next);
      if size < MIN_BLOCK || next + size > end {
        return Err(HeapError::BadSize {
          offset: next_offset,
          size,
        });
      }

      if self.is_free(next) {
        if let Some(lower) = lower_free {
          return Err(HeapError::Uncoalesced {
            lower,
            upper: next_offset,
          });
        }
        lower_free = Some(next_offset);
        walked += size;
      } else {
        lower_free = None;
      }

      cursor_seen |= next == self.cursor;
      expected = next + size;
      block = next;
    }

    if !cursor_seen {
      return Err(HeapError::BrokenLink {
        offset: self.units.offset(self.cursor),
      });
    }

    let covered = bytes(expected - self.units.first());
    let size = self.units.arena.size();
    if covered != size {
      return Err(HeapError::Coverage { covered, size });
    }

    let listed = self.free_bytes();
    let walked = if self.live { bytes(walked) } else { 0 };
    if listed != walked {
      return Err(HeapError::FreeMismatch { listed, walked });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arena::VecArena;

  const PAGE: usize = 4096;

  fn heap() -> LinkedHeap<VecArena> {
    LinkedHeap::new(VecArena::with_page_size(16 * PAGE, PAGE))
  }

  #[test]
  fn every_block_is_on_the_list() {
    let mut heap = heap();
    let a = heap.allocate(10).unwrap();
    let b = heap.allocate(10).unwrap();

    let blocks = heap.blocks();
    assert_eq!(blocks.len(), 3);
    assert!(blocks[0].free);
    assert_eq!(blocks[1].offset, b.offset() - UNIT);
    assert_eq!(blocks[2].offset, a.offset() - UNIT);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn free_flips_the_flag_in_place() {
    let mut heap = heap();
    let a = heap.allocate(10).unwrap();
    let _b = heap.allocate(10).unwrap();
    let _c = heap.allocate(10).unwrap();

    heap.free(Some(a));
    let top = heap.blocks().pop().unwrap();
    assert_eq!(top.offset, a.offset() - UNIT);
    assert!(top.free);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn merge_with_both_neighbours_leaves_one_block() {
    let mut heap = heap();
    let a = heap.allocate(48).unwrap();
    let b = heap.allocate(48).unwrap();
    let c = heap.allocate(48).unwrap();

    heap.free(Some(a));
    heap.free(Some(c));
    heap.free(Some(b));

    assert_eq!(heap.check(), Ok(()));
    assert_eq!(
      heap.blocks(),
      vec![BlockInfo {
        offset: 0,
        size: PAGE,
        free: true
      }]
    );
    assert_eq!(heap.free_bytes(), PAGE);
  }

  #[test]
  fn cursor_rotates_past_the_last_hit() {
    let mut heap = heap();
    let a = heap.allocate(16).unwrap();
    let b = heap.allocate(16).unwrap();
    let _fence = heap.allocate(16).unwrap();
    heap.free(Some(a));
    heap.free(Some(b));

    // a and b merged into one free block; the cursor sits just before it.
    let c = heap.allocate(16).unwrap();
    assert_eq!(c, a);
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn appended_page_merges_with_free_top_block() {
    let mut heap = heap();
    let a = heap.allocate(100).unwrap();
    let _b = heap.allocate(100).unwrap();
    heap.free(Some(a));

    let _big = heap.allocate(bytes(250)).unwrap();
    assert_eq!(heap.heap_size(), 2 * PAGE);
    let merged = heap
      .blocks()
      .into_iter()
      .find(|b| b.offset == a.offset() - UNIT)
      .unwrap();
    assert!(merged.free);
    assert_eq!(merged.size, bytes(8) + PAGE - bytes(251));
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  #[should_panic(expected = "double free")]
  #[cfg(debug_assertions)]
  fn double_free_is_caught_in_debug_builds() {
    let mut heap = heap();
    let a = heap.allocate(8).unwrap();
    let _b = heap.allocate(8).unwrap();
    heap.free(Some(a));
    heap.free(Some(a));
  }
}
