//! Page tier: hands out page-aligned spans and takes them back, merging
//! a returning span with its immediate right neighbor when that neighbor
//! is free. One global instance behind one lock.
//!
//! Spans of up to `MAX_DIRECT_PAGES` pages sit in exact-size lists
//! indexed by page count; anything larger goes to a single overflow
//! list. Best fit is the smallest count at or above the request, so the
//! direct lists are scanned upward before the overflow list. Descriptors
//! come from a bump arena and are recycled through a retire list; the
//! tier never unmaps a span.

use core::ptr::NonNull;

use getset::CloneGetters;
use tierpool_bump::Bump;
use tierpool_rtree::RTree;
use tierpool_sync::YieldMutex;
use tierpool_sys::{
  GLOBAL_SYSTEM,
  prim::va_size,
};

use crate::classes::{
  PAGE_SHIFT,
  PAGE_SIZE,
};

/// Largest page count with a dedicated free list.
pub const MAX_DIRECT_PAGES: usize = 256;

const MAP_FANOUT: usize = 64;
const META_CHUNK: usize = 64 * 1024;

/// Descriptor of one contiguous page-aligned region. Lives in the page
/// tier's bump arena for the life of the process.
#[derive(CloneGetters)]
pub struct Span {
  #[getset(get_clone = "pub")]
  addr: NonNull<u8>,
  #[getset(get_clone = "pub")]
  num_pages: usize,
  next: Option<NonNull<Span>>,
}

pub struct PageTier {
  free: [Option<NonNull<Span>>; MAX_DIRECT_PAGES + 1],
  large: Option<NonNull<Span>>,
  map: RTree<Span, MAP_FANOUT>,
  descriptors: Bump,
  retired: Option<NonNull<Span>>,
}

unsafe impl Send for PageTier {}

static PAGE_TIER: YieldMutex<PageTier> = YieldMutex::new(PageTier::new());

/// Allocates a span of exactly `num_pages` pages. `None` only when the
/// OS denies the mapping (or the request is zero pages).
pub fn allocate_span(num_pages: usize) -> Option<NonNull<u8>> {
  PAGE_TIER.lock().allocate(num_pages)
}

/// Returns a span previously handed out by [`allocate_span`]. Addresses
/// this tier never mapped are ignored.
pub fn deallocate_span(addr: NonNull<u8>, num_pages: usize) {
  PAGE_TIER.lock().deallocate(addr, num_pages)
}

fn page_key(addr: NonNull<u8>) -> usize {
  addr.as_ptr() as usize >> PAGE_SHIFT
}

impl PageTier {
  pub const fn new() -> Self {
    Self {
      free: [None; MAX_DIRECT_PAGES + 1],
      large: None,
      map: RTree::new(META_CHUNK, va_size() - PAGE_SHIFT),
      descriptors: Bump::new(META_CHUNK),
      retired: None,
    }
  }

  pub fn allocate(&mut self, num_pages: usize) -> Option<NonNull<u8>> {
    if num_pages == 0 {
      return None;
    }

    if let Some(span) = self.detach_fit(num_pages) {
      let spare = unsafe { span.as_ref() }.num_pages - num_pages;
      if spare > 0 && self.split_off(span, num_pages, spare).is_none() {
        // Could not index the remainder; hand the span back untouched.
        self.push_free(span);
        return None;
      }
      return Some(unsafe { span.as_ref() }.addr);
    }

    self.map_fresh(num_pages)
  }

  pub fn deallocate(&mut self, addr: NonNull<u8>, num_pages: usize) {
    let Some(mut span) = self.map.lookup(page_key(addr)) else {
      // Not ours; the caller's error is absorbed here.
      return;
    };

    let next_addr = addr.as_ptr() as usize + num_pages * PAGE_SIZE;
    if let Some(merged) = self.take_free_neighbor(next_addr >> PAGE_SHIFT) {
      unsafe { span.as_mut() }.num_pages += merged;
    }

    self.push_free(span);
  }

  /// Detaches the free neighbor starting at `key`, if there is one, and
  /// returns its page count. A neighbor that is carved into blocks is in
  /// the map but on no free list, and stays untouched.
  fn take_free_neighbor(&mut self, key: usize) -> Option<usize> {
    let neighbor = self.map.lookup(key)?;
    if !self.unlink(neighbor) {
      return None;
    }

    self.map.remove(key);
    let pages = unsafe { neighbor.as_ref() }.num_pages;
    self.retire(neighbor);
    Some(pages)
  }

  /// Shrinks `span` to `num_pages` and indexes the `spare` trailing pages
  /// as a fresh free span. `None` when descriptor bookkeeping fails; the
  /// span is left whole in that case.
  fn split_off(&mut self, mut span: NonNull<Span>, num_pages: usize, spare: usize) -> Option<()> {
    let base = unsafe { span.as_ref() }.addr;
    let rest_addr =
      unsafe { NonNull::new_unchecked(base.as_ptr().add(num_pages * PAGE_SIZE)) };

    let rest = self.new_descriptor(rest_addr, spare)?;
    if self.map.insert(page_key(rest_addr), rest).is_err() {
      self.retire(rest);
      return None;
    }

    unsafe { span.as_mut() }.num_pages = num_pages;
    self.push_free(rest);
    Some(())
  }

  fn map_fresh(&mut self, num_pages: usize) -> Option<NonNull<u8>> {
    let bytes = num_pages * PAGE_SIZE;
    let slice = unsafe { GLOBAL_SYSTEM.map(bytes) }.ok()?;
    let addr = unsafe { NonNull::new_unchecked(slice.as_mut_ptr()) };

    let span = self.new_descriptor(addr, num_pages)?;
    if self.map.insert(page_key(addr), span).is_err() {
      self.retire(span);
      return None;
    }
    Some(addr)
  }

  /// Smallest free span with at least `num_pages` pages, detached from
  /// its list.
  fn detach_fit(&mut self, num_pages: usize) -> Option<NonNull<Span>> {
    if num_pages <= MAX_DIRECT_PAGES {
      for count in num_pages..=MAX_DIRECT_PAGES {
        if let Some(mut head) = self.free[count] {
          self.free[count] = unsafe { head.as_ref() }.next;
          unsafe { head.as_mut() }.next = None;
          return Some(head);
        }
      }
    }

    let best = self.best_large_fit(num_pages)?;
    self.unlink(best);
    Some(best)
  }

  fn best_large_fit(&self, num_pages: usize) -> Option<NonNull<Span>> {
    let mut best: Option<NonNull<Span>> = None;
    let mut current = self.large;

    while let Some(span) = current {
      let pages = unsafe { span.as_ref() }.num_pages;
      let better = match best {
        None => pages >= num_pages,
        Some(b) => pages >= num_pages && pages < unsafe { b.as_ref() }.num_pages,
      };
      if better {
        best = Some(span);
      }
      current = unsafe { span.as_ref() }.next;
    }

    best
  }

  fn list_for(&mut self, num_pages: usize) -> &mut Option<NonNull<Span>> {
    if num_pages <= MAX_DIRECT_PAGES {
      &mut self.free[num_pages]
    } else {
      &mut self.large
    }
  }

  fn push_free(&mut self, mut span: NonNull<Span>) {
    let pages = unsafe { span.as_ref() }.num_pages;
    let list = self.list_for(pages);
    unsafe { span.as_mut() }.next = *list;
    *list = Some(span);
  }

  /// Unlinks `target` from the free list for its page count. `false`
  /// means the span was not free.
  fn unlink(&mut self, target: NonNull<Span>) -> bool {
    let pages = unsafe { target.as_ref() }.num_pages;
    let list = self.list_for(pages);

    let mut prev: Option<NonNull<Span>> = None;
    let mut current = *list;
    while let Some(mut span) = current {
      if span == target {
        let next = unsafe { span.as_ref() }.next;
        match prev {
          None => *list = next,
          Some(mut p) => unsafe { p.as_mut() }.next = next,
        }
        unsafe { span.as_mut() }.next = None;
        return true;
      }
      prev = current;
      current = unsafe { span.as_ref() }.next;
    }

    false
  }

  fn new_descriptor(&mut self, addr: NonNull<u8>, num_pages: usize) -> Option<NonNull<Span>> {
    let slot = match self.retired.take() {
      Some(mut slot) => {
        self.retired = unsafe { slot.as_ref() }.next;
        unsafe { slot.as_mut() }.next = None;
        slot
      }
      None => self.descriptors.create::<Span>().ok()?,
    };

    unsafe {
      slot.as_ptr().write(Span {
        addr,
        num_pages,
        next: None,
      })
    };
    Some(slot)
  }

  fn retire(&mut self, mut span: NonNull<Span>) {
    unsafe { span.as_mut() }.next = self.retired;
    self.retired = Some(span);
  }
}
