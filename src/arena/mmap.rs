use std::{ptr, slice};

use libc::{
  MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void,
};
use log::debug;

use super::{Arena, system_page_size};
use crate::error::ArenaError;

/// An arena carved out of one anonymous mapping.
///
/// `init` reserves `limit` bytes of address space up front and `extend`
/// only moves a break offset inside it, so the arena is contiguous and its
/// base never moves. Pages are committed lazily by the kernel on first
/// touch.
///
/// ```text
///   base                       base + brk             base + reserved
///   ├──────────────────────────────┼─────────────────────────┤
///   │       heap (extended)        │   reserved, untouched   │
///   └──────────────────────────────┴─────────────────────────┘
/// ```
///
/// The raw base pointer makes this type neither `Send` nor `Sync`.
#[derive(Debug)]
pub struct MmapArena {
  base: *mut u8,
  reserved: usize,
  brk: usize,
  page_size: usize,
}

impl MmapArena {
  pub fn new(limit: usize) -> Self {
    Self::with_page_size(limit, system_page_size())
  }

  pub fn with_page_size(
    limit: usize,
    page_size: usize,
  ) -> Self {
    let page_size = page_size.max(1);
    Self {
      base: ptr::null_mut(),
      reserved: limit.div_ceil(page_size) * page_size,
      brk: 0,
      page_size,
    }
  }

  pub fn reserved(&self) -> usize {
    self.reserved
  }
}

impl Arena for MmapArena {
  fn init(&mut self) -> Result<(), ArenaError> {
    if !self.base.is_null() {
      return Ok(());
    }

    let base = unsafe {
      libc::mmap(
        ptr::null_mut(),
        self.reserved,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
        -1,
        0,
      )
    };
    if base == MAP_FAILED {
      let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
      return Err(ArenaError::MapFailed {
        bytes: self.reserved,
        errno,
      });
    }

    debug!("mmap arena: reserved {} bytes at {:?}", self.reserved, base);
    self.base = base.cast::<u8>();
    self.brk = 0;
    Ok(())
  }

  fn extend(
    &mut self,
    incr: usize,
  ) -> Result<usize, ArenaError> {
    if self.base.is_null() {
      return Err(ArenaError::Uninitialized);
    }

    let capacity = self.reserved - self.brk;
    if incr > capacity {
      return Err(ArenaError::Exhausted {
        requested: incr,
        capacity,
      });
    }

    let old = self.brk;
    self.brk += incr;
    Ok(old)
  }

  fn size(&self) -> usize {
    self.brk
  }

  fn heap_lo(&self) -> *const u8 {
    self.base
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn reset(&mut self) {
    if self.base.is_null() {
      return;
    }
    // Hand the touched pages back; the next extend sees zero-filled memory.
    let touched = self.brk.div_ceil(self.page_size) * self.page_size;
    if touched > 0 {
      let rc = unsafe { libc::madvise(self.base.cast::<c_void>(), touched, libc::MADV_DONTNEED) };
      if rc != 0 {
        debug!(
          "mmap arena: madvise of {touched} bytes failed: {}",
          std::io::Error::last_os_error()
        );
      }
    }
    self.brk = 0;
  }

  fn teardown(&mut self) {
    if self.base.is_null() {
      return;
    }
    let rc = unsafe { libc::munmap(self.base.cast::<c_void>(), self.reserved) };
    if rc == 0 {
      debug!("mmap arena: released {} bytes", self.reserved);
    } else {
      debug!(
        "mmap arena: munmap of {} bytes failed: {}",
        self.reserved,
        std::io::Error::last_os_error()
      );
    }
    self.base = ptr::null_mut();
    self.brk = 0;
  }

  fn bytes(&self) -> &[u8] {
    if self.base.is_null() {
      return &[];
    }
    // `base..base + brk` lies inside the live mapping and is only reachable
    // through `&self`.
    unsafe { slice::from_raw_parts(self.base, self.brk) }
  }

  fn bytes_mut(&mut self) -> &mut [u8] {
    if self.base.is_null() {
      return &mut [];
    }
    unsafe { slice::from_raw_parts_mut(self.base, self.brk) }
  }
}

impl Drop for MmapArena {
  fn drop(&mut self) {
    self.teardown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn base_is_page_aligned_and_stable() {
    let mut arena = MmapArena::new(1 << 20);
    arena.init().unwrap();

    let lo = arena.heap_lo();
    assert_eq!(lo as usize % arena.page_size(), 0);

    arena.extend(4096).unwrap();
    arena.extend(4096).unwrap();
    assert_eq!(arena.heap_lo(), lo);
    assert_eq!(arena.heap_hi(), lo.wrapping_add(8192));
  }

  #[test]
  #[cfg(target_os = "linux")]
  fn memory_is_writable_and_zeroed_after_reset() {
    let mut arena = MmapArena::new(1 << 20);
    arena.init().unwrap();
    arena.extend(128).unwrap();

    arena.bytes_mut().fill(0xAB);
    assert!(arena.bytes().iter().all(|&b| b == 0xAB));

    arena.reset();
    assert_eq!(arena.size(), 0);
    arena.extend(128).unwrap();
    assert!(arena.bytes().iter().all(|&b| b == 0));
  }

  #[test]
  fn growth_stops_at_reservation() {
    let mut arena = MmapArena::with_page_size(8192, 4096);
    arena.init().unwrap();

    assert_eq!(arena.extend(8192), Ok(0));
    assert_eq!(
      arena.extend(1),
      Err(ArenaError::Exhausted {
        requested: 1,
        capacity: 0
      })
    );
  }

  #[test]
  fn teardown_then_init_maps_again() {
    let mut arena = MmapArena::new(1 << 16);
    arena.init().unwrap();
    arena.extend(64).unwrap();

    arena.teardown();
    assert!(arena.bytes().is_empty());
    assert_eq!(arena.extend(64), Err(ArenaError::Uninitialized));

    arena.init().unwrap();
    assert_eq!(arena.extend(64), Ok(0));
  }

  #[test_log::test]
  #[cfg(target_os = "linux")]
  fn failed_unmap_still_forgets_the_mapping() {
    let mut arena = MmapArena::with_page_size(1 << 16, 4096);
    arena.init().unwrap();
    arena.extend(64).unwrap();

    // A misaligned base makes both madvise and munmap fail with EINVAL.
    let base = arena.base;
    arena.base = base.wrapping_add(1);

    arena.reset();
    assert_eq!(arena.size(), 0);

    arena.teardown();
    assert!(arena.bytes().is_empty());
    assert_eq!(arena.extend(64), Err(ArenaError::Uninitialized));

    let rc = unsafe { libc::munmap(base.cast::<c_void>(), arena.reserved()) };
    assert_eq!(rc, 0);
  }
}
