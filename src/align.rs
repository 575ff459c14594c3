use std::mem;

/// Allocation granularity in bytes.
///
/// Every block header, tail tag and payload is a whole number of units, so
/// every payload handed out is aligned to the platform's strictest
/// fundamental alignment. The floor of 16 leaves room for four 32-bit header
/// fields on targets where `max_align_t` is only 8 bytes wide.
pub const UNIT: usize = {
  let max_align = mem::align_of::<libc::max_align_t>();
  if max_align > 16 { max_align } else { 16 }
};

/// Rounds `$value` bytes up to the next multiple of [`UNIT`].
///
/// # Examples
///
/// ```rust
/// use rheap::{align, UNIT};
///
/// assert_eq!(align!(1), UNIT);
/// assert_eq!(align!(UNIT), UNIT);
/// assert_eq!(align!(UNIT + 1), 2 * UNIT);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::UNIT - 1) & !($crate::UNIT - 1)
  };
}

/// Number of whole units needed to hold `nbytes` of payload.
///
/// Zero rounds up to one unit so every handle owns at least one byte of
/// addressable payload. Returns `None` on arithmetic overflow.
pub(crate) fn payload_units(nbytes: usize) -> Option<usize> {
  nbytes.checked_add(UNIT - 1)?;
  Some((align!(nbytes) / UNIT).max(1))
}

/// Bytes spanned by `units` allocation units.
#[inline]
pub(crate) const fn bytes(units: usize) -> usize {
  units * UNIT
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unit_is_power_of_two_and_fits_max_align() {
    assert!(UNIT.is_power_of_two());
    assert!(UNIT >= mem::align_of::<libc::max_align_t>());
    assert!(UNIT >= 16);
  }

  #[test]
  fn test_align() {
    let mut alignments = Vec::new();

    for i in 0..10 {
      let sizes = (UNIT * i + 1)..=(UNIT * (i + 1));

      let expected_alignment = UNIT * (i + 1);

      alignments.push((sizes, expected_alignment));
    }

    for (sizes, expected) in alignments {
      for size in sizes {
        assert_eq!(expected, align!(size));
      }
    }
  }

  #[test]
  fn zero_bytes_still_take_a_unit() {
    assert_eq!(payload_units(0), Some(1));
    assert_eq!(payload_units(1), Some(1));
    assert_eq!(payload_units(UNIT), Some(1));
    assert_eq!(payload_units(UNIT + 1), Some(2));
  }

  #[test]
  fn overflow_is_reported() {
    assert_eq!(payload_units(usize::MAX), None);
    assert_eq!(payload_units(usize::MAX - UNIT + 2), None);
  }

  #[test]
  fn largest_request_rounds_without_overflow() {
    let top = usize::MAX - UNIT + 1;
    assert_eq!(payload_units(top), Some(top / UNIT));
    assert_eq!(payload_units(top - 1), Some(top / UNIT));
  }
}
