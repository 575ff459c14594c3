//! # rheap - A Free-List Heap Allocator Library
//!
//! This crate provides a classic **free-list allocator** (the `malloc` /
//! `free` / `realloc` triad) that carves blocks out of a growable arena,
//! with two interchangeable bookkeeping strategies.
//!
//! ## Overview
//!
//! The heap is a run of blocks, each a whole number of *units* long. A
//! unit is as wide as the platform's strictest alignment, so every payload
//! is maximally aligned relative to the arena base:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              ARENA                                   │
//!   │                                                                      │
//!   │   ┌───┬──────────┬───┬────┬───┬──────────────────┬───┬───────────┐   │
//!   │   │ H │   free   │ H │ A1 │ H │       free       │ H │    A2     │   │
//!   │   └───┴──────────┴───┴────┴───┴──────────────────┴───┴───────────┘   │
//!   │                                                                  ▲   │
//!   │                                                                  │   │
//!   │                                                        Arena break   │
//!   │                                                   (grows a page at   │
//!   │                                                    a time)           │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   H = one-unit header in front of every block.
//! ```
//!
//! Allocation is next-fit: the search starts just after the block the
//! previous operation touched and wraps once around the free list before
//! the arena is extended. Oversized blocks are split, freed blocks are
//! merged with free physical neighbours immediately.
//!
//! ## Crate Structure
//!
//! ```text
//!   rheap
//!   ├── align      - Unit size and the align! macro
//!   ├── arena      - Arena trait, VecArena, MmapArena
//!   ├── block      - Payload handles and header field storage (internal)
//!   ├── config     - HeapConfig and Strategy
//!   ├── error      - ArenaError, AllocError, HeapError, ConfigError
//!   └── heap       - HeapAllocator trait, TaggedHeap, LinkedHeap, Heap
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rheap::{Heap, HeapAllocator, HeapConfig, Strategy};
//!
//! let config = HeapConfig::new(Strategy::Tagged);
//! let mut heap = Heap::with_vec_arena(&config).unwrap();
//!
//! let p = heap.allocate(5).unwrap();
//! heap.payload_mut(p)[..5].copy_from_slice(b"hello");
//!
//! let p = heap.resize(Some(p), 64).unwrap();
//! assert_eq!(&heap.payload(p)[..5], b"hello");
//!
//! heap.free(Some(p));
//! assert_eq!(heap.free_bytes(), heap.heap_size());
//! ```
//!
//! ## Strategies
//!
//! ```text
//!   Strategy::Tagged                     Strategy::Linked
//!   ┌──────┬─────────────┬──────┐        ┌──────┬──────────────────┐
//!   │ H    │   payload   │ tail │        │ H    │     payload      │
//!   └──────┴─────────────┴──────┘        └──────┴──────────────────┘
//!   only free blocks are listed;         every block is listed in
//!   the tail tag finds the lower         address order; a flag marks
//!   neighbour in O(1)                    the free ones
//! ```
//!
//! ## Handles, Not Pointers
//!
//! [`Payload`] is an arena offset rather than a raw pointer. Payload bytes
//! are reached through [`HeapAllocator::payload`] and
//! [`HeapAllocator::payload_mut`], and every header access is a checked
//! slice read, so a stray handle panics instead of corrupting memory.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no internal locking; wrap a heap in a mutex
//!   to share it
//! - **No shrinking**: `resize` keeps over-sized blocks, and the arena is
//!   only returned on `reset` / `deinit`
//! - **Linear accounting**: `free_bytes` walks the free structure
//! - **Unix-only**: the unit size and `MmapArena` come from `libc`

pub mod align;
pub mod arena;
mod block;
pub mod config;
pub mod error;
pub mod heap;

pub use align::UNIT;
pub use arena::{Arena, MmapArena, VecArena};
pub use block::{BlockInfo, Payload};
pub use config::{HeapConfig, Strategy};
pub use error::{AllocError, ArenaError, ConfigError, HeapError};
pub use heap::{Heap, HeapAllocator, LinkedHeap, TaggedHeap};
