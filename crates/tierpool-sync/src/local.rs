use core::{
  marker::PhantomData,
  ptr,
};

use tierpool_bump::Bump;

use crate::{
  lazy::LazyLock,
  relax::YieldMutex,
};

static TLS_BUMP: YieldMutex<Bump> = YieldMutex::new(Bump::new(64 * 1024));

/// Backing storage for one thread's value. After the value is dropped at
/// thread exit the slot is pushed onto its owner's recycle list, linked
/// through the `recycle` word, and handed to the next thread that needs
/// one.
#[repr(C)]
struct Slot<T> {
  recycle: *const YieldMutex<*mut u8>,
  value: T,
}

/// Per-thread value keyed by a pthread key. The value's `Drop` runs at
/// thread exit, from the pthread destructor.
pub struct ThreadLocal<T, F = fn() -> T> {
  key: LazyLock<libc::pthread_key_t>,
  recycled: YieldMutex<*mut u8>,
  init: F,
  _marker: PhantomData<T>,
}

unsafe extern "C" fn tls_detor<T>(ptr: *mut libc::c_void) {
  if ptr.is_null() {
    return;
  }

  let slot = ptr as *mut Slot<T>;
  unsafe { core::ptr::drop_in_place(&mut (*slot).value) };

  let recycle = unsafe { (*slot).recycle };
  if recycle.is_null() {
    return;
  }

  let mut head = unsafe { (*recycle).lock() };
  unsafe { (slot as *mut *mut u8).write(*head) };
  *head = slot as *mut u8;
}

fn obtain_key<T>() -> libc::pthread_key_t {
  let mut key: libc::pthread_key_t = 0;
  let ret = unsafe { libc::pthread_key_create(&mut key, Some(tls_detor::<T>)) };
  if ret != 0 {
    panic!("failed to create pthread key: {}", ret);
  }
  key
}

impl<T, F> ThreadLocal<T, F>
where
  F: Fn() -> T,
{
  pub const fn new(init: F) -> Self {
    Self {
      key: LazyLock::new(|| obtain_key::<T>()),
      recycled: YieldMutex::new(ptr::null_mut()),
      init,
      _marker: PhantomData,
    }
  }

  fn take_recycled(&self) -> *mut Slot<T> {
    let mut head = self.recycled.lock();
    let slot = *head;
    if slot.is_null() {
      return ptr::null_mut();
    }

    *head = unsafe { (slot as *mut *mut u8).read() };
    slot as *mut Slot<T>
  }

  fn get_or_init(&self) -> *mut Slot<T> {
    let key = *self.key;
    let existing = unsafe { libc::pthread_getspecific(key) } as *mut Slot<T>;
    if !existing.is_null() {
      return existing;
    }

    let mut slot = self.take_recycled();
    if slot.is_null() {
      slot = TLS_BUMP
        .lock()
        .create::<Slot<T>>()
        .unwrap_or_else(|_| panic!("thread-local slot allocation failed"))
        .as_ptr();
    }

    unsafe {
      (&raw mut (*slot).recycle).write(&self.recycled);
      (&raw mut (*slot).value).write((self.init)());
    }

    let ret = unsafe { libc::pthread_setspecific(key, slot.cast()) };
    if ret != 0 {
      panic!("pthread_setspecific failed: {}", ret);
    }
    slot
  }

  pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
    let slot = self.get_or_init();
    f(unsafe { &mut (*slot).value })
  }
}

impl<T, F> Drop for ThreadLocal<T, F> {
  fn drop(&mut self) {
    let _ = unsafe { libc::pthread_key_delete(*self.key) };
  }
}

unsafe impl<T, F> Send for ThreadLocal<T, F> {}
unsafe impl<T, F> Sync for ThreadLocal<T, F> {}
