//! Thread tier: the hot path. Every thread owns one `ThreadTier` behind
//! a pthread key; allocate and free touch only thread-private lists and
//! need no synchronization. Misses pull a batch from the central tier,
//! overfull lists spill three quarters of their blocks back, and the
//! destructor at thread exit returns everything still held.

use core::ptr::NonNull;

use tierpool_list::{
  self as list,
  FreeList,
};
use tierpool_sync::ThreadLocal;

use crate::{
  central,
  classes::{
    ALIGNMENT,
    FREE_LIST_SIZE,
    MAX_BYTES,
    THREAD_RETURN_THRESHOLD,
    batch_for,
    block_size,
    class_index,
  },
};

pub struct ThreadTier {
  lists: [FreeList; FREE_LIST_SIZE],
}

static THREAD_TIER: ThreadLocal<ThreadTier> = ThreadLocal::new(ThreadTier::new);

/// Allocates `size` bytes for the calling thread. Zero is served as one
/// alignment unit; sizes above `MAX_BYTES` bypass the tiers entirely.
pub fn allocate(size: usize) -> Option<NonNull<u8>> {
  THREAD_TIER.with(|tier| tier.allocate(size))
}

/// Returns a block obtained from [`allocate`].
///
/// # Safety
///
/// `ptr` must come from [`allocate`] on this allocator with the same
/// `size`, and must not be used afterwards. A mismatched size corrupts
/// the free lists.
pub unsafe fn deallocate(ptr: NonNull<u8>, size: usize) {
  THREAD_TIER.with(|tier| unsafe { tier.deallocate(ptr, size) })
}

impl ThreadTier {
  fn new() -> Self {
    Self {
      lists: [const { FreeList::new() }; FREE_LIST_SIZE],
    }
  }

  pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
    let size = if size == 0 { ALIGNMENT } else { size };

    if size > MAX_BYTES {
      return NonNull::new(unsafe { libc::malloc(size) } as *mut u8);
    }

    let index = class_index(size);
    if let Some(block) = self.lists[index].pop() {
      return Some(block);
    }

    self.fetch_from_central(index)
  }

  /// # Safety
  ///
  /// See [`deallocate`].
  pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) {
    if size > MAX_BYTES {
      unsafe { libc::free(ptr.as_ptr() as *mut libc::c_void) };
      return;
    }

    let index = class_index(size);
    unsafe { self.lists[index].push(ptr) };

    if self.lists[index].len() > THREAD_RETURN_THRESHOLD {
      self.spill(index);
    }
  }

  /// Refills an empty class list with a batch from the central tier and
  /// hands the first block to the caller. The central tier may deliver
  /// fewer blocks than asked for, so the adopted length is counted from
  /// the chain itself.
  fn fetch_from_central(&mut self, index: usize) -> Option<NonNull<u8>> {
    debug_assert!(self.lists[index].is_empty());

    let batch = batch_for(block_size(index));
    let head = central::fetch_range(index, batch)?;

    if let Some(rest) = unsafe { list::read_next(head) } {
      let (_, count) = unsafe { list::walk(rest, usize::MAX) };
      unsafe { self.lists[index].set(Some(rest), count) };
    }

    Some(head)
  }

  /// Keeps a quarter of the list (at least one block) and returns the
  /// rest to the central tier.
  fn spill(&mut self, index: usize) {
    let total = self.lists[index].len();
    if total <= 1 {
      return;
    }

    let keep = core::cmp::max(1, total / 4);
    let Some(head) = self.lists[index].head() else {
      return;
    };

    let (split, kept) = unsafe { list::walk(head, keep) };
    let returned = unsafe { list::read_next(split) };
    unsafe { list::write_next(split, None) };
    unsafe { self.lists[index].set(Some(head), kept) };

    if let Some(returned) = returned {
      central::return_range(returned, total - kept, index);
    }
  }
}

impl Drop for ThreadTier {
  fn drop(&mut self) {
    for index in 0..FREE_LIST_SIZE {
      let len = self.lists[index].len();
      if let Some(head) = self.lists[index].head() {
        central::return_range(head, len, index);
        unsafe { self.lists[index].set(None, 0) };
      }
    }
  }
}
