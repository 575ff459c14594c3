use log::debug;

use super::{Arena, system_page_size};
use crate::error::ArenaError;

/// An arena backed by an owned `Vec<u8>` with a hard byte limit.
///
/// Offsets stay valid when the vector reallocates, so this arena needs no
/// address stability. Lowering the limit between calls is how tests make
/// the next growth fail.
#[derive(Debug)]
pub struct VecArena {
  buf: Vec<u8>,
  limit: usize,
  page_size: usize,
  live: bool,
  extensions: usize,
}

impl VecArena {
  pub fn new(limit: usize) -> Self {
    Self::with_page_size(limit, system_page_size())
  }

  pub fn with_page_size(
    limit: usize,
    page_size: usize,
  ) -> Self {
    Self {
      buf: Vec::new(),
      limit,
      page_size,
      live: false,
      extensions: 0,
    }
  }

  /// Number of successful `extend` calls since construction.
  pub fn extensions(&self) -> usize {
    self.extensions
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  /// Caps future growth at `limit` bytes. Bytes already handed out stay.
  pub fn set_limit(
    &mut self,
    limit: usize,
  ) {
    self.limit = limit;
  }
}

impl Arena for VecArena {
  fn init(&mut self) -> Result<(), ArenaError> {
    if !self.live {
      debug!("vec arena: init, limit {} bytes", self.limit);
      self.live = true;
    }
    Ok(())
  }

  fn extend(
    &mut self,
    incr: usize,
  ) -> Result<usize, ArenaError> {
    if !self.live {
      return Err(ArenaError::Uninitialized);
    }

    let old = self.buf.len();
    let capacity = self.limit.saturating_sub(old);
    if incr > capacity {
      return Err(ArenaError::Exhausted {
        requested: incr,
        capacity,
      });
    }

    self.buf.resize(old + incr, 0);
    self.extensions += 1;
    Ok(old)
  }

  fn size(&self) -> usize {
    self.buf.len()
  }

  fn heap_lo(&self) -> *const u8 {
    self.buf.as_ptr()
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn reset(&mut self) {
    self.buf.clear();
  }

  fn teardown(&mut self) {
    self.buf = Vec::new();
    self.live = false;
  }

  fn bytes(&self) -> &[u8] {
    &self.buf
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    &mut self.buf
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extend_returns_old_break() {
    let mut arena = VecArena::with_page_size(4096, 4096);
    arena.init().unwrap();

    assert_eq!(arena.extend(64), Ok(0));
    assert_eq!(arena.extend(32), Ok(64));
    assert_eq!(arena.size(), 96);
    assert_eq!(arena.extensions(), 2);
  }

  #[test]
  fn extend_past_limit_fails_without_growing() {
    let mut arena = VecArena::with_page_size(100, 4096);
    arena.init().unwrap();
    arena.extend(60).unwrap();

    assert_eq!(
      arena.extend(41),
      Err(ArenaError::Exhausted {
        requested: 41,
        capacity: 40
      })
    );
    assert_eq!(arena.size(), 60);
    assert_eq!(arena.extensions(), 1);
  }

  #[test]
  fn extend_before_init_is_rejected() {
    let mut arena = VecArena::new(4096);
    assert_eq!(arena.extend(16), Err(ArenaError::Uninitialized));
  }

  #[test]
  fn reset_rewinds_and_teardown_requires_init() {
    let mut arena = VecArena::new(1 << 16);
    arena.init().unwrap();
    arena.extend(1024).unwrap();

    arena.reset();
    assert_eq!(arena.size(), 0);
    assert_eq!(arena.extend(16), Ok(0));

    arena.teardown();
    assert_eq!(arena.size(), 0);
    assert_eq!(arena.extend(16), Err(ArenaError::Uninitialized));
  }

  #[test]
  fn lowered_limit_applies_to_next_extend() {
    let mut arena = VecArena::new(1 << 16);
    arena.init().unwrap();
    arena.extend(512).unwrap();
    arena.set_limit(512);

    assert!(arena.extend(1).is_err());
    assert_eq!(arena.bytes().len(), 512);
  }
}
