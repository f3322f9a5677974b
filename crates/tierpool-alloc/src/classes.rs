//! Size-class mapping and the tuning constants shared by all three tiers.
//!
//! There is one class per multiple of `ALIGNMENT` up to `MAX_BYTES`:
//! class `i` serves blocks of `(i + 1) * ALIGNMENT` bytes. Requests above
//! `MAX_BYTES` never reach the tiers and go straight to the host
//! allocator.

/// Base alignment of every block; also the class granularity.
pub const ALIGNMENT: usize = 8;

/// Largest request served by the tiers (256 KiB).
pub const MAX_BYTES: usize = 256 * 1024;

/// Number of size classes.
pub const FREE_LIST_SIZE: usize = MAX_BYTES / ALIGNMENT;

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Default page-tier refill, 32 KiB per span.
pub const SPAN_PAGES: usize = 8;

/// Thread-tier list length that triggers a spill to the central tier.
pub const THREAD_RETURN_THRESHOLD: usize = 64;

/// Upper bound on the bytes moved by one central-to-thread refill.
pub const CENTRAL_BATCH_MAX_BYTES: usize = 4096;

// A free block stores its successor in its own first word, so every
// class must be able to hold a pointer.
const _: () = assert!(ALIGNMENT >= core::mem::size_of::<*mut u8>());
const _: () = assert!(ALIGNMENT.is_power_of_two());
const _: () = assert!(FREE_LIST_SIZE * ALIGNMENT == MAX_BYTES);
const _: () = assert!(SPAN_PAGES * PAGE_SIZE >= MAX_BYTES / 8);

/// Smallest multiple of `ALIGNMENT` that can serve `size`. Zero-size
/// requests are promoted to one alignment unit.
pub const fn round_up(size: usize) -> usize {
  let size = if size < ALIGNMENT { ALIGNMENT } else { size };
  (size + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Index of the class serving `size`. Caller ensures `size <= MAX_BYTES`.
pub const fn class_index(size: usize) -> usize {
  round_up(size) / ALIGNMENT - 1
}

/// Block size of class `index`.
pub const fn block_size(index: usize) -> usize {
  (index + 1) * ALIGNMENT
}

/// Pages to request from the page tier when the central list for blocks
/// of `block_size` bytes runs dry: a full default span while one fits,
/// otherwise just enough pages for a single block.
pub const fn span_pages_for(block_size: usize) -> usize {
  if block_size <= SPAN_PAGES * PAGE_SIZE {
    SPAN_PAGES
  } else {
    (block_size + PAGE_SIZE - 1) / PAGE_SIZE
  }
}

/// Blocks per central-to-thread transfer for `block_size`: small classes
/// move in bulk, large ones one at a time, and no batch exceeds
/// `CENTRAL_BATCH_MAX_BYTES`.
pub const fn batch_for(block_size: usize) -> usize {
  let base = if block_size <= 32 {
    64
  } else if block_size <= 64 {
    32
  } else if block_size <= 128 {
    16
  } else if block_size <= 256 {
    8
  } else if block_size <= 512 {
    4
  } else if block_size <= 1024 {
    2
  } else {
    1
  };

  let cap = CENTRAL_BATCH_MAX_BYTES / block_size;
  let cap = if cap < 1 { 1 } else { cap };
  let batch = if base < cap { base } else { cap };
  if batch < 1 { 1 } else { batch }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn constants_are_valid() {
    assert_eq!(ALIGNMENT, 8);
    assert_eq!(MAX_BYTES, 262144);
    assert_eq!(FREE_LIST_SIZE, 32768);
    assert_eq!(PAGE_SIZE, 4096);
    assert_eq!(SPAN_PAGES * PAGE_SIZE, 32768);
  }

  #[test]
  fn round_up_boundaries() {
    assert_eq!(round_up(0), ALIGNMENT);
    assert_eq!(round_up(1), 8);
    assert_eq!(round_up(8), 8);
    assert_eq!(round_up(9), 16);
    assert_eq!(round_up(MAX_BYTES), MAX_BYTES);
  }

  #[test]
  fn class_index_boundaries() {
    assert_eq!(class_index(0), 0);
    assert_eq!(class_index(1), 0);
    assert_eq!(class_index(8), 0);
    assert_eq!(class_index(9), 1);
    assert_eq!(class_index(16), 1);
    assert_eq!(class_index(17), 2);
    assert_eq!(class_index(MAX_BYTES), FREE_LIST_SIZE - 1);
  }

  #[test]
  fn block_size_inverts_class_index() {
    for size in [1, 7, 8, 9, 128, 1024, 8192, MAX_BYTES] {
      let idx = class_index(size);
      assert!(idx < FREE_LIST_SIZE);
      assert_eq!(block_size(idx), round_up(size));
      assert!(block_size(idx) >= size.max(1));
    }
  }

  #[test]
  fn span_pages_policy() {
    assert_eq!(span_pages_for(8), SPAN_PAGES);
    assert_eq!(span_pages_for(1024), SPAN_PAGES);
    assert_eq!(span_pages_for(32768), SPAN_PAGES);
    assert_eq!(span_pages_for(32776), 9);
    assert_eq!(span_pages_for(MAX_BYTES), 64);
  }

  #[test]
  fn span_always_fits_at_least_one_block() {
    for idx in 0..FREE_LIST_SIZE {
      let bsize = block_size(idx);
      let span_bytes = span_pages_for(bsize) * PAGE_SIZE;
      assert!(
        span_bytes / bsize >= 1,
        "class {} gets an undersized span",
        idx
      );
    }
  }

  #[test]
  fn batch_table() {
    assert_eq!(batch_for(8), 64);
    assert_eq!(batch_for(32), 64);
    assert_eq!(batch_for(40), 32);
    assert_eq!(batch_for(64), 32);
    assert_eq!(batch_for(128), 16);
    assert_eq!(batch_for(256), 8);
    assert_eq!(batch_for(512), 4);
    assert_eq!(batch_for(1024), 2);
    assert_eq!(batch_for(2048), 1);
    assert_eq!(batch_for(MAX_BYTES), 1);
  }

  #[test]
  fn batch_never_exceeds_byte_budget() {
    for idx in 0..FREE_LIST_SIZE {
      let bsize = block_size(idx);
      let batch = batch_for(bsize);
      assert!(batch >= 1);
      if batch > 1 {
        assert!(
          batch * bsize <= CENTRAL_BATCH_MAX_BYTES,
          "batch {} x {} overruns the byte budget",
          batch,
          bsize
        );
      }
    }
  }
}
