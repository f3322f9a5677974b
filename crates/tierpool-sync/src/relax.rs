use spin::relax::RelaxStrategy;

/// Spin backoff that gives the time slice back to the scheduler instead
/// of burning the CPU between lock attempts.
pub struct Yield;

impl RelaxStrategy for Yield {
  #[inline]
  fn relax() {
    unsafe { libc::sched_yield() };
  }
}

/// Test-and-set lock that yields while contended. Acquire on lock,
/// release on guard drop; the guard releases even when the critical
/// section unwinds.
pub type YieldMutex<T> = spin::mutex::SpinMutex<T, Yield>;
pub type YieldMutexGuard<'a, T> = spin::mutex::SpinMutexGuard<'a, T>;
