//! The allocator core: one contract, two free-block strategies.
//!
//! Both strategies embed a one-unit header in front of every payload and
//! grow the arena a page at a time:
//!
//! ```text
//!   Tagged block (free):
//!   ┌──────────────┬───────────────────────────────┬──────────────┐
//!   │ size │ next  │           payload             │ size │ prev  │
//!   └──────────────┴───────────────────────────────┴──────────────┘
//!     header unit                                     tail unit
//!
//!   Linked block:
//!   ┌───────────────────────────────┬───────────────────────────────┐
//!   │ size │ free │ prev │ next     │           payload             │
//!   └───────────────────────────────┴───────────────────────────────┘
//!     header unit
//! ```
//!
//! Every operation takes `&mut self`; a heap is a plain value with no
//! internal locking. Share one across threads only behind a mutex.

mod linked;
mod tagged;

pub use linked::LinkedHeap;
pub use tagged::TaggedHeap;

use crate::{
  arena::{Arena, MmapArena, VecArena},
  block::{BlockInfo, Payload},
  config::{HeapConfig, Strategy},
  error::{ConfigError, HeapError, Result},
};

/// The allocate / free / resize contract shared by every strategy.
pub trait HeapAllocator {
  /// Initialises the arena and installs an empty free list. Calling it on
  /// a live heap starts over from an empty arena.
  fn init(&mut self) -> Result<()>;

  /// Rewinds the arena and empties the free list. Outstanding handles
  /// become invalid.
  fn reset(&mut self);

  /// Releases the arena. The next `allocate` initialises again.
  fn deinit(&mut self);

  /// Allocates at least `nbytes` bytes (at least one unit, even for zero).
  fn allocate(
    &mut self,
    nbytes: usize,
  ) -> Result<Payload>;

  /// Like `allocate`, with the whole payload capacity zeroed.
  fn allocate_zeroed(
    &mut self,
    nbytes: usize,
  ) -> Result<Payload> {
    let payload = self.allocate(nbytes)?;
    self.payload_mut(payload).fill(0);
    Ok(payload)
  }

  /// Returns a block to the heap. `None` is ignored.
  ///
  /// # Panics
  ///
  /// Freeing a handle this heap did not hand out, or freeing one twice, is
  /// a caller bug. Debug builds assert on it; release builds may panic on
  /// a bounds check or silently corrupt the free list.
  fn free(
    &mut self,
    payload: Option<Payload>,
  );

  /// Grows an allocation, moving it when its block is too small.
  ///
  /// `None` behaves like `allocate`. A request the current block already
  /// covers returns the same handle; blocks never shrink. Otherwise the
  /// contents move to a new block and the old handle is released. On
  /// failure the old handle stays valid.
  fn resize(
    &mut self,
    payload: Option<Payload>,
    nbytes: usize,
  ) -> Result<Payload> {
    let Some(old) = payload else {
      return self.allocate(nbytes);
    };

    let capacity = self.capacity(old);
    if nbytes <= capacity {
      return Ok(old);
    }

    let new = self.allocate(nbytes)?;
    self.copy_payload(old, new, capacity.min(nbytes));
    self.free(Some(old));
    Ok(new)
  }

  /// Bytes currently free, bookkeeping of free blocks included.
  ///
  /// Walks the free structure, so this is linear in the number of blocks.
  fn free_bytes(&self) -> usize;

  /// Usable bytes behind `payload`.
  fn capacity(
    &self,
    payload: Payload,
  ) -> usize;

  /// The whole usable payload.
  fn payload(
    &self,
    payload: Payload,
  ) -> &[u8];

  fn payload_mut(
    &mut self,
    payload: Payload,
  ) -> &mut [u8];

  /// Copies the first `len` payload bytes of `from` into `to`.
  fn copy_payload(
    &mut self,
    from: Payload,
    to: Payload,
    len: usize,
  );

  /// Current arena extent in bytes.
  fn heap_size(&self) -> usize;

  /// Bookkeeping bytes every block carries.
  fn overhead(&self) -> usize;

  /// All blocks in address order.
  fn blocks(&self) -> Vec<BlockInfo>;

  /// Validates every structural invariant of the heap.
  fn check(&self) -> core::result::Result<(), HeapError>;
}

/// A heap whose strategy is chosen at runtime.
#[derive(Debug)]
pub enum Heap<A: Arena> {
  Tagged(TaggedHeap<A>),
  Linked(LinkedHeap<A>),
}

macro_rules! dispatch {
  ($self:ident, $heap:ident => $body:expr) => {
    match $self {
      Heap::Tagged($heap) => $body,
      Heap::Linked($heap) => $body,
    }
  };
}

impl<A: Arena> Heap<A> {
  pub fn new(
    strategy: Strategy,
    arena: A,
  ) -> Self {
    match strategy {
      Strategy::Tagged => Heap::Tagged(TaggedHeap::new(arena)),
      Strategy::Linked => Heap::Linked(LinkedHeap::new(arena)),
    }
  }

  pub fn strategy(&self) -> Strategy {
    match self {
      Heap::Tagged(_) => Strategy::Tagged,
      Heap::Linked(_) => Strategy::Linked,
    }
  }

  pub fn arena(&self) -> &A {
    dispatch!(self, heap => heap.arena())
  }

  pub fn arena_mut(&mut self) -> &mut A {
    dispatch!(self, heap => heap.arena_mut())
  }
}

impl Heap<VecArena> {
  /// Builds a heap over an owned, bounded vector arena.
  pub fn with_vec_arena(config: &HeapConfig) -> core::result::Result<Self, ConfigError> {
    config.validate()?;
    let arena = VecArena::with_page_size(config.max_heap, config.page_size());
    Ok(Self::new(config.strategy, arena))
  }
}

impl Heap<MmapArena> {
  /// Builds a heap over a reserved anonymous mapping.
  pub fn with_mmap_arena(config: &HeapConfig) -> core::result::Result<Self, ConfigError> {
    config.validate()?;
    let arena = MmapArena::with_page_size(config.max_heap, config.page_size());
    Ok(Self::new(config.strategy, arena))
  }
}

impl<A: Arena> HeapAllocator for Heap<A> {
  fn init(&mut self) -> Result<()> {
    dispatch!(self, heap => heap.init())
  }

  fn reset(&mut self) {
    dispatch!(self, heap => heap.reset())
  }

  fn deinit(&mut self) {
    dispatch!(self, heap => heap.deinit())
  }

  fn allocate(
    &mut self,
    nbytes: usize,
  ) -> Result<Payload> {
    dispatch!(self, heap => heap.allocate(nbytes))
  }

  fn free(
    &mut self,
    payload: Option<Payload>,
  ) {
    dispatch!(self, heap => heap.free(payload))
  }

  fn free_bytes(&self) -> usize {
    dispatch!(self, heap => heap.free_bytes())
  }

  fn capacity(
    &self,
    payload: Payload,
  ) -> usize {
    dispatch!(self, heap => heap.capacity(payload))
  }

  fn payload(
    &self,
    payload: Payload,
  ) -> &[u8] {
    dispatch!(self, heap => heap.payload(payload))
  }

  fn payload_mut(
    &mut self,
    payload: Payload,
  ) -> &mut [u8] {
    dispatch!(self, heap => heap.payload_mut(payload))
  }

  fn copy_payload(
    &mut self,
    from: Payload,
    to: Payload,
    len: usize,
  ) {
    dispatch!(self, heap => heap.copy_payload(from, to, len))
  }

  fn heap_size(&self) -> usize {
    dispatch!(self, heap => heap.heap_size())
  }

  fn overhead(&self) -> usize {
    dispatch!(self, heap => heap.overhead())
  }

  fn blocks(&self) -> Vec<BlockInfo> {
    dispatch!(self, heap => heap.blocks())
  }

  fn check(&self) -> core::result::Result<(), HeapError> {
    dispatch!(self, heap => heap.check())
  }
}
