use core::sync::atomic::{
  AtomicUsize,
  Ordering,
};

use crate::math::is_aligned;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const COMMON_PAGE_SIZE: usize = 4096;

pub const fn word_width() -> usize {
  core::mem::size_of::<usize>()
}

/// Width of the usable virtual address space in bits. mmap on the
/// supported 64-bit targets hands out addresses below 2^48 unless the
/// caller opts into larger spaces with an address hint.
pub const fn va_size() -> usize {
  48
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn os_page_size_helper() -> usize {
  unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn os_page_size_helper() -> usize {
  COMMON_PAGE_SIZE
}

/// Page size reported by the operating system. Cached after the first
/// query; zero is never a valid value.
pub fn os_page_size() -> usize {
  static OS_PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

  let cached = OS_PAGE_SIZE.load(Ordering::Acquire);
  if cached != 0 {
    return cached;
  }

  let size = os_page_size_helper();
  OS_PAGE_SIZE.store(size, Ordering::Release);
  size
}

pub fn is_page_aligned(value: usize) -> Option<bool> {
  is_aligned(value, os_page_size())
}
