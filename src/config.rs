//! Heap construction parameters.

use crate::{
  align::UNIT,
  arena::system_page_size,
  block::MAX_UNITS,
  error::ConfigError,
};

/// Free-block bookkeeping strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
  /// Circular free list linked through block headers and tail tags.
  #[default]
  Tagged,
  /// Every block on one address-ordered doubly linked list with a free flag.
  Linked,
}

/// Configuration for building a [`Heap`](crate::Heap).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  pub strategy: Strategy,

  /// Hard limit on arena growth in bytes.
  ///
  /// Default: 20 MiB. Must cover at least one page and stay within what
  /// 32-bit block ids can index.
  pub max_heap: usize,

  /// Growth granularity in bytes. `None` asks the operating system.
  pub page_size: Option<usize>,
}

impl HeapConfig {
  /// Default arena limit: 20 MiB.
  pub const DEFAULT_MAX_HEAP: usize = 20 * (1 << 20);

  pub fn new(strategy: Strategy) -> Self {
    Self {
      strategy,
      max_heap: Self::DEFAULT_MAX_HEAP,
      page_size: None,
    }
  }

  /// Effective page size.
  pub fn page_size(&self) -> usize {
    self.page_size.unwrap_or_else(system_page_size)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let page_size = self.page_size();
    if !page_size.is_power_of_two() || page_size < UNIT {
      return Err(ConfigError::PageSize(page_size));
    }
    if self.max_heap / UNIT > MAX_UNITS - 2 {
      return Err(ConfigError::MaxHeapTooLarge(self.max_heap));
    }
    if self.max_heap < page_size {
      return Err(ConfigError::MaxHeapTooSmall {
        max_heap: self.max_heap,
        page_size,
      });
    }
    Ok(())
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::new(Strategy::default())
  }
}
