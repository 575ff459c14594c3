//! Error types for the arena, the allocator core and configuration.

use thiserror::Error;

/// Failures reported by an [`Arena`](crate::arena::Arena) backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArenaError {
  #[error("arena exhausted (requested: {requested} bytes, capacity: {capacity} bytes)")]
  Exhausted { requested: usize, capacity: usize },

  #[error("failed to map {bytes} bytes of backing memory (errno {errno})")]
  MapFailed { bytes: usize, errno: i32 },

  #[error("arena used before init")]
  Uninitialized,
}

/// Recoverable allocator failures.
///
/// Misuse such as double frees or wild handles is not represented here: it
/// trips a debug assertion or a bounds check instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
  #[error("out of memory (requested: {requested} bytes)")]
  OutOfMemory { requested: usize },

  #[error("backing store unavailable: {0}")]
  Arena(#[from] ArenaError),
}

/// Inconsistencies found by [`HeapAllocator::check`](crate::HeapAllocator::check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
  #[error("block at offset {offset:#x} has implausible size {size} units")]
  BadSize { offset: usize, size: usize },

  #[error("block at offset {offset:#x} has a broken list link")]
  BrokenLink { offset: usize },

  #[error("free blocks at offsets {lower:#x} and {upper:#x} were not coalesced")]
  Uncoalesced { lower: usize, upper: usize },

  #[error("tail tag of block at offset {offset:#x} disagrees with its header")]
  TailMismatch { offset: usize },

  #[error("free list holds {listed} bytes but the block walk found {walked} free bytes")]
  FreeMismatch { listed: usize, walked: usize },

  #[error("blocks cover {covered} bytes of a {size} byte arena")]
  Coverage { covered: usize, size: usize },
}

/// Rejected [`HeapConfig`](crate::HeapConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("page size {0} is not a power of two multiple of the allocation unit")]
  PageSize(usize),

  #[error("max heap of {0} bytes cannot be indexed by 32-bit block ids")]
  MaxHeapTooLarge(usize),

  #[error("max heap of {max_heap} bytes is smaller than one {page_size} byte page")]
  MaxHeapTooSmall { max_heap: usize, page_size: usize },
}

pub type Result<T> = core::result::Result<T, AllocError>;
