//! Growable backing stores the allocator core carves blocks out of.
//!
//! An arena is a single contiguous byte range that only ever grows at its
//! top, like the data segment behind `sbrk(2)`:
//!
//! ```text
//!   offset 0                              size()            limit
//!   ├──────────────────────────────────────┼──────────────────┤
//!   │        bytes handed out so far       │  not yet mapped  │
//!   └──────────────────────────────────────┴──────────────────┘
//!                                          ▲
//!                                  extend(n) returns this
//!                                  offset and moves it up by n
//! ```
//!
//! The allocator never talks to the OS itself. All growth goes through
//! [`Arena::extend`], which is also the seam tests use to simulate a small
//! or failing heap (see [`VecArena`]).

mod mmap;
mod vec;

pub use mmap::MmapArena;
pub use vec::VecArena;

use crate::error::ArenaError;

/// A linear, growable byte buffer addressed by offsets from its start.
pub trait Arena {
  /// Prepares the backing store. Calling it on a live arena is a no-op.
  fn init(&mut self) -> Result<(), ArenaError>;

  /// Grows the arena by `incr` bytes and returns the offset of the first
  /// new byte (the old break).
  fn extend(
    &mut self,
    incr: usize,
  ) -> Result<usize, ArenaError>;

  /// Current extent in bytes.
  fn size(&self) -> usize;

  /// Address of the first byte of the arena.
  fn heap_lo(&self) -> *const u8;

  /// Address one past the last byte of the arena.
  fn heap_hi(&self) -> *const u8 {
    self.heap_lo().wrapping_add(self.size())
  }

  /// Granularity the allocator should grow by.
  fn page_size(&self) -> usize;

  /// Rewinds the break to offset zero. The backing store stays live.
  fn reset(&mut self);

  /// Releases the backing store. `init` must run again before `extend`.
  fn teardown(&mut self);

  /// The bytes `[0, size())`.
  fn bytes(&self) -> &[u8];

  /// The bytes `[0, size())`, mutably.
  fn bytes_mut(&mut self) -> &mut [u8];
}

/// Page size reported by the operating system.
pub fn system_page_size() -> usize {
  let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
  if size <= 0 { 4096 } else { size as usize }
}
