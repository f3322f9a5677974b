#![cfg_attr(not(test), no_std)]

//! Chunked bump allocator for allocator-internal metadata. Chunks are
//! whole anonymous mappings; the chunk header lives at the start of its
//! own mapping. Individual allocations are never freed, the backing
//! mappings are released when the `Bump` is dropped.

use core::{
  alloc::Layout,
  cmp,
  ptr::NonNull,
};

use tierpool_sys::{
  extent::{
    Extent,
    ExtentError,
  },
  math::align_up,
  prim::os_page_size,
};

#[derive(Debug)]
pub enum BumpError {
  ExtentError(ExtentError),
  Overflow,
}

impl From<ExtentError> for BumpError {
  fn from(err: ExtentError) -> Self {
    BumpError::ExtentError(err)
  }
}

pub type BumpResult<T> = Result<T, BumpError>;

struct Chunk {
  next: Option<NonNull<Chunk>>,
  extent: Extent<'static>,
  used: usize,
}

impl Chunk {
  fn header_size() -> BumpResult<usize> {
    let layout = Layout::new::<Self>();
    align_up(layout.size(), layout.align()).ok_or(BumpError::Overflow)
  }

  fn new(size: usize) -> BumpResult<NonNull<Chunk>> {
    let mut extent = Extent::new(size)?;
    let base = extent.as_mut().as_mut_ptr() as *mut Chunk;

    let header = Self::header_size()?;
    let chunk = Chunk {
      next: None,
      extent,
      used: header,
    };

    unsafe { base.write(chunk) };
    Ok(unsafe { NonNull::new_unchecked(base) })
  }

  fn allocate(&mut self, layout: Layout) -> Option<NonNull<u8>> {
    let base = self.extent.as_ref().as_ptr() as usize;
    let start = align_up(base.checked_add(self.used)?, layout.align())?;
    let end = start.checked_add(layout.size())?;

    if end > base + self.extent.len() {
      return None;
    }

    self.used = end - base;
    NonNull::new(start as *mut u8)
  }
}

pub struct Bump {
  head: Option<NonNull<Chunk>>,
  chunk_size: usize,
}

impl Bump {
  pub const fn new(chunk_size: usize) -> Self {
    Self {
      head: None,
      chunk_size,
    }
  }

  fn obtain_chunk(&self, layout: Layout) -> BumpResult<NonNull<Chunk>> {
    let header = Chunk::header_size()?;
    let required = header
      .checked_add(layout.size())
      .and_then(|n| n.checked_add(layout.align()))
      .ok_or(BumpError::Overflow)?;

    let size = cmp::max(self.chunk_size, required);
    let size = align_up(size, os_page_size()).ok_or(BumpError::Overflow)?;
    Chunk::new(size)
  }

  pub fn allocate(&mut self, layout: Layout) -> BumpResult<NonNull<u8>> {
    if let Some(mut head) = self.head {
      if let Some(ptr) = unsafe { head.as_mut() }.allocate(layout) {
        return Ok(ptr);
      }
    }

    let mut chunk = self.obtain_chunk(layout)?;
    unsafe { chunk.as_mut() }.next = self.head;
    self.head = Some(chunk);

    unsafe { chunk.as_mut() }
      .allocate(layout)
      .ok_or(BumpError::Overflow)
  }

  /// Reserves an uninitialized, properly aligned slot for a `T`. The
  /// caller is responsible for writing a value before reading it.
  pub fn create<T>(&mut self) -> BumpResult<NonNull<T>> {
    let ptr = self.allocate(Layout::new::<T>())?;
    Ok(ptr.cast())
  }
}

impl Drop for Bump {
  fn drop(&mut self) {
    let mut current = self.head.take();
    while let Some(ptr) = current {
      let chunk = unsafe { core::ptr::read(ptr.as_ptr()) };
      current = chunk.next;
      drop(chunk);
    }
  }
}

unsafe impl Send for Bump {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_allocate_aligned() {
    let mut bump = Bump::new(4096);

    for align in [1usize, 2, 4, 8, 16, 64] {
      let layout = Layout::from_size_align(24, align).unwrap();
      let ptr = bump.allocate(layout).expect("bump allocation failed");
      assert_eq!(
        ptr.as_ptr() as usize % align,
        0,
        "allocation not aligned to {}",
        align
      );
    }
  }

  #[test]
  fn test_allocations_disjoint() {
    let mut bump = Bump::new(4096);
    let layout = Layout::from_size_align(32, 8).unwrap();

    let a = bump.allocate(layout).unwrap().as_ptr() as usize;
    let b = bump.allocate(layout).unwrap().as_ptr() as usize;
    assert!(b >= a + 32 || a >= b + 32);
  }

  #[test]
  fn test_chunk_growth() {
    let mut bump = Bump::new(4096);
    let layout = Layout::from_size_align(1024, 8).unwrap();

    for _ in 0..64 {
      bump.allocate(layout).expect("bump allocation failed");
    }
  }

  #[test]
  fn test_oversized_request() {
    let mut bump = Bump::new(4096);
    let layout = Layout::from_size_align(1 << 20, 8).unwrap();
    let ptr = bump.allocate(layout).expect("oversized allocation failed");

    unsafe { ptr.as_ptr().write_bytes(0xAA, 1 << 20) };
  }

  #[test]
  fn test_create_slot() {
    let mut bump = Bump::new(4096);
    let slot = bump.create::<[u64; 4]>().expect("create failed");
    unsafe { slot.as_ptr().write([1, 2, 3, 4]) };
    assert_eq!(unsafe { slot.as_ptr().read() }, [1, 2, 3, 4]);
  }
}
