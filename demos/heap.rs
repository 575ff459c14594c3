use std::io::Read;

use rheap::{Arena, Heap, HeapAllocator, HeapConfig, MmapArena, Payload, Strategy};

/// Waits for ENTER when the demo runs with `--step`.
/// Useful when you want to inspect the mapping with `pmap` or `gdb` between
/// steps.
fn pause(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn print_alloc(
  heap: &Heap<MmapArena>,
  nbytes: usize,
  payload: Payload,
) {
  println!(
    "Allocated {} bytes, offset = {:#x}, address = {:?}, capacity = {}, heap size = {}",
    nbytes,
    payload.offset(),
    heap.arena().heap_lo().wrapping_add(payload.offset()),
    heap.capacity(payload),
    heap.heap_size(),
  );
}

fn print_blocks(
  heap: &Heap<MmapArena>,
  label: &str,
) {
  println!("--- blocks after \"{label}\" ({} bytes free):", heap.free_bytes());
  for block in heap.blocks() {
    println!(
      "    {:#8x}  {:6} bytes  {}",
      block.offset,
      block.size,
      if block.free { "free" } else { "used" }
    );
  }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();

  let step = std::env::args().any(|arg| arg == "--step");
  let strategy = if std::env::args().any(|arg| arg == "--linked") {
    Strategy::Linked
  } else {
    Strategy::Tagged
  };

  let mut heap = Heap::with_mmap_arena(&HeapConfig::new(strategy))?;
  heap.init()?;
  println!("[0] {:?} heap, PID = {}", heap.strategy(), std::process::id());
  pause(step);

  // ----------------------------------------------------------------------
  // 1) A u32 worth of bytes. The first request maps the first page.
  // ----------------------------------------------------------------------
  let first = heap.allocate(4)?;
  println!("\n[1] Allocate 4 bytes");
  print_alloc(&heap, 4, first);
  heap.payload_mut(first)[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  pause(step);

  // ----------------------------------------------------------------------
  // 2) Odd-sized request: rounded up to whole units.
  // ----------------------------------------------------------------------
  let second = heap.allocate(12)?;
  println!("\n[2] Allocate 12 bytes");
  print_alloc(&heap, 12, second);
  heap.payload_mut(second)[..12].fill(0xAB);
  print_blocks(&heap, "two allocations");
  pause(step);

  // ----------------------------------------------------------------------
  // 3) Free the first block, then ask for 2 bytes: the freed block fits
  //    exactly and is handed out again.
  // ----------------------------------------------------------------------
  heap.free(Some(first));
  let third = heap.allocate(2)?;
  println!("\n[3] Free first, allocate 2 bytes");
  print_alloc(&heap, 2, third);
  println!(
    "[3] third == first? {}",
    if third == first {
      "Yes, it reused the freed block"
    } else {
      "No, it allocated somewhere else"
    }
  );
  pause(step);

  // ----------------------------------------------------------------------
  // 4) Grow the second block past its capacity; its bytes move along.
  // ----------------------------------------------------------------------
  let moved = heap.resize(Some(second), 200)?;
  println!("\n[4] Resize second to 200 bytes");
  print_alloc(&heap, 200, moved);
  println!("[4] first bytes still 0xAB? {}", heap.payload(moved)[..12].iter().all(|&b| b == 0xAB));
  pause(step);

  // ----------------------------------------------------------------------
  // 5) A large request extends the arena.
  // ----------------------------------------------------------------------
  let before = heap.heap_size();
  let big = heap.allocate(64 * 1024)?;
  println!("\n[5] Allocate 64 KiB, heap grew from {} to {} bytes", before, heap.heap_size());
  print_alloc(&heap, 64 * 1024, big);
  pause(step);

  // ----------------------------------------------------------------------
  // 6) Free everything: the blocks merge back into one.
  // ----------------------------------------------------------------------
  for payload in [third, moved, big] {
    heap.free(Some(payload));
  }
  print_blocks(&heap, "freeing everything");
  heap.check()?;

  heap.deinit();
  println!("\n[7] Heap released.");
  Ok(())
}
