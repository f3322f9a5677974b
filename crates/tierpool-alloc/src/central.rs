//! Central tier: one free list of uniform blocks per size class, shared
//! by all threads. Each class has its own test-and-set lock, so traffic
//! in different classes never contends. Empty lists are refilled by
//! carving a fresh span from the page tier; blocks never migrate back to
//! the page tier once carved.

use core::{
  ptr::NonNull,
  sync::atomic::{
    AtomicPtr,
    Ordering,
  },
};

use tierpool_list as list;
use tierpool_sync::YieldMutex;

use crate::{
  classes::{
    FREE_LIST_SIZE,
    PAGE_SIZE,
    block_size,
    span_pages_for,
  },
  page,
};

pub struct CentralTier {
  heads: [AtomicPtr<u8>; FREE_LIST_SIZE],
  locks: [YieldMutex<()>; FREE_LIST_SIZE],
}

static CENTRAL: CentralTier = CentralTier::new();

/// Detaches a chain of up to `batch` blocks of class `index`. The chain
/// is null-terminated and may be shorter than requested; `None` when the
/// class index is out of range, `batch` is zero, or the page tier cannot
/// supply a span.
pub fn fetch_range(index: usize, batch: usize) -> Option<NonNull<u8>> {
  CENTRAL.fetch_range(index, batch)
}

/// Splices a chain of at most `max_blocks` blocks of class `index` back
/// in front of the class's list. The chain itself is authoritative: a
/// null word ends it even if `max_blocks` says otherwise.
pub fn return_range(head: NonNull<u8>, max_blocks: usize, index: usize) {
  CENTRAL.return_range(head, max_blocks, index)
}

impl CentralTier {
  const fn new() -> Self {
    Self {
      heads: [const { AtomicPtr::new(core::ptr::null_mut()) }; FREE_LIST_SIZE],
      locks: [const { YieldMutex::new(()) }; FREE_LIST_SIZE],
    }
  }

  fn fetch_range(&self, index: usize, batch: usize) -> Option<NonNull<u8>> {
    if index >= FREE_LIST_SIZE || batch == 0 {
      return None;
    }

    let _guard = self.locks[index].lock();

    match NonNull::new(self.heads[index].load(Ordering::Relaxed)) {
      None => self.refill(index, batch),
      Some(head) => {
        let (last, _) = unsafe { list::walk(head, batch) };
        let residual = unsafe { list::read_next(last) };
        unsafe { list::write_next(last, None) };

        let raw = residual.map_or(core::ptr::null_mut(), |p| p.as_ptr());
        self.heads[index].store(raw, Ordering::Release);
        Some(head)
      }
    }
  }

  /// Pulls a span from the page tier and carves it into blocks. The
  /// first `min(batch, total)` blocks form the returned chain; whatever
  /// is left becomes the new list. Caller holds the class lock and the
  /// list is empty.
  fn refill(&self, index: usize, batch: usize) -> Option<NonNull<u8>> {
    let bsize = block_size(index);
    let pages = span_pages_for(bsize);
    let start = page::allocate_span(pages)?;

    let total = (pages * PAGE_SIZE) / bsize;
    let take = batch.min(total);

    unsafe { list::carve(start, bsize, take) };

    if total > take {
      let rest = unsafe { NonNull::new_unchecked(start.as_ptr().add(take * bsize)) };
      unsafe { list::carve(rest, bsize, total - take) };
      self.heads[index].store(rest.as_ptr(), Ordering::Release);
    }

    Some(start)
  }

  fn return_range(&self, head: NonNull<u8>, max_blocks: usize, index: usize) {
    if index >= FREE_LIST_SIZE || max_blocks == 0 {
      return;
    }

    let _guard = self.locks[index].lock();

    let (last, _) = unsafe { list::walk(head, max_blocks) };
    let current = self.heads[index].load(Ordering::Relaxed);
    unsafe { list::write_next(last, NonNull::new(current)) };
    self.heads[index].store(head.as_ptr(), Ordering::Release);
  }
}
