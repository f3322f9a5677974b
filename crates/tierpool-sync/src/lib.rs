#![cfg_attr(not(test), no_std)]

pub mod lazy;
pub mod local;
pub mod relax;

pub use lazy::LazyLock;
pub use local::ThreadLocal;
pub use relax::{
  Yield,
  YieldMutex,
  YieldMutexGuard,
};
