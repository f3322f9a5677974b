//! End-to-end exercises of the pool through its public API: alignment,
//! non-overlap, data integrity, the bypass boundary, and multithreaded
//! churn.

use std::ptr::NonNull;

use rand::{
  Rng,
  rng,
  seq::SliceRandom,
};
use tierpool::{
  ALIGNMENT,
  MAX_BYTES,
  allocate,
  deallocate,
};

fn addr(ptr: NonNull<u8>) -> usize {
  ptr.as_ptr() as usize
}

#[test]
fn basic_small_medium_large() {
  let small = allocate(8).expect("8-byte allocation failed");
  let medium = allocate(1024).expect("1 KiB allocation failed");
  let large = allocate(1024 * 1024).expect("1 MiB allocation failed");

  unsafe {
    deallocate(small, 8);
    deallocate(medium, 1024);
    deallocate(large, 1024 * 1024);
  }
}

#[test]
fn minimum_request_is_aligned() {
  let ptr = allocate(1).expect("1-byte allocation failed");
  assert_eq!(addr(ptr) % ALIGNMENT, 0);
  unsafe { deallocate(ptr, 1) };
}

#[test]
fn max_bytes_boundary() {
  let last_pooled = allocate(MAX_BYTES).expect("MAX_BYTES allocation failed");
  let first_bypass = allocate(MAX_BYTES + 1).expect("bypass allocation failed");

  assert_eq!(addr(last_pooled) % ALIGNMENT, 0);
  assert_eq!(addr(first_bypass) % ALIGNMENT, 0);

  unsafe {
    deallocate(last_pooled, MAX_BYTES);
    deallocate(first_bypass, MAX_BYTES + 1);
  }
}

#[test]
fn write_read_full_block() {
  let size = 128usize;
  let ptr = allocate(size).expect("allocation failed");

  for i in 0..size {
    unsafe { ptr.as_ptr().add(i).write((i % 256) as u8) };
  }
  for i in 0..size {
    assert_eq!(
      unsafe { ptr.as_ptr().add(i).read() },
      (i % 256) as u8,
      "byte {} corrupted",
      i
    );
  }

  unsafe { deallocate(ptr, size) };
}

#[test]
fn size_class_coverage() {
  for size in [1usize, 8, 9, 16, 17, 128, 1024, 8192, MAX_BYTES, MAX_BYTES + 1] {
    let ptr = allocate(size).unwrap_or_else(|| panic!("allocation of {} bytes failed", size));
    assert_eq!(addr(ptr) % ALIGNMENT, 0, "size {} misaligned", size);
    unsafe { deallocate(ptr, size) };
  }
}

#[test]
fn live_allocations_never_overlap() {
  let sizes = [1usize, 8, 9, 16, 17, 128, 1024, 8192];
  let live: Vec<(NonNull<u8>, usize)> = sizes
    .iter()
    .map(|&s| (allocate(s).expect("allocation failed"), s))
    .collect();

  for (i, &(a, sa)) in live.iter().enumerate() {
    for &(b, sb) in live.iter().skip(i + 1) {
      let (a, b) = (addr(a), addr(b));
      assert!(
        a + sa <= b || b + sb <= a,
        "[{:#x}; {}] overlaps [{:#x}; {}]",
        a,
        sa,
        b,
        sb
      );
    }
  }

  for (ptr, size) in live {
    unsafe { deallocate(ptr, size) };
  }
}

#[test]
fn multithreaded_churn() {
  const THREADS: usize = 4;
  const ITERATIONS: usize = 1000;

  let workers: Vec<_> = (0..THREADS)
    .map(|id| {
      std::thread::spawn(move || {
        let mut rng = rng();
        let marker = id as u8 + 1;
        let mut live: Vec<(NonNull<u8>, usize)> = Vec::with_capacity(ITERATIONS);

        for _ in 0..ITERATIONS {
          let size = rng.random_range(1..=256usize) * 8;
          let ptr = allocate(size).expect("allocation failed under churn");

          // Stamp the whole block; a cross-thread overlap would tear it.
          unsafe { ptr.as_ptr().write_bytes(marker, size) };
          live.push((ptr, size));

          if rng.random_bool(0.5) && !live.is_empty() {
            let victim = rng.random_range(0..live.len());
            let (ptr, size) = live.swap_remove(victim);
            for i in [0, size / 2, size - 1] {
              assert_eq!(
                unsafe { ptr.as_ptr().add(i).read() },
                marker,
                "block contents changed while held"
              );
            }
            unsafe { deallocate(ptr, size) };
          }
        }

        for (ptr, size) in live {
          for i in [0, size / 2, size - 1] {
            assert_eq!(unsafe { ptr.as_ptr().add(i).read() }, marker);
          }
          unsafe { deallocate(ptr, size) };
        }
      })
    })
    .collect();

  for worker in workers {
    worker.join().expect("churn worker panicked");
  }
}

#[test]
fn stress_shuffled_free_order() {
  const COUNT: usize = 10_000;

  let mut rng = rng();
  let mut live: Vec<(NonNull<u8>, usize)> = (0..COUNT)
    .map(|_| {
      let size = rng.random_range(1..=1024usize) * 8;
      (allocate(size).expect("allocation failed"), size)
    })
    .collect();

  live.shuffle(&mut rng);
  for (ptr, size) in live {
    unsafe { deallocate(ptr, size) };
  }

  let after = allocate(8).expect("allocation after stress failed");
  assert_eq!(addr(after) % ALIGNMENT, 0);
  unsafe { deallocate(after, 8) };
}

#[test]
fn repeated_round_trips_stay_healthy() {
  for round in 0..100 {
    let size = (round % 64 + 1) * 8;
    let ptr = allocate(size).expect("round-trip allocation failed");
    assert_eq!(addr(ptr) % ALIGNMENT, 0);
    unsafe {
      ptr.as_ptr().write_bytes(0xA5, size);
      deallocate(ptr, size);
    }
  }
}
