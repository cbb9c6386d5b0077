//! Wait-on-value primitive for parking idle workers
//!
//! Provides the minimal futex-style surface the executor needs: block
//! while an atomic word holds an expected value, wake one waiter, wake
//! all waiters. Built on a mutex and condition variable; notifications
//! take the mutex so a waiter that has observed the expected value and
//! is entering the wait can never miss its wake-up.

use core::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Condvar, Mutex};

/// An `i64` atomic with blocking wait and wake operations
///
/// Plain atomic accesses never touch the lock; only `wait` and the
/// `notify_*` calls do.
pub struct WaitableAtomic {
    value: AtomicI64,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WaitableAtomic {
    /// Creates a new atomic with the given initial value
    pub const fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Atomic load
    #[inline]
    pub fn load(&self, order: Ordering) -> i64 {
        self.value.load(order)
    }

    /// Atomic store
    #[inline]
    pub fn store(&self, value: i64, order: Ordering) {
        self.value.store(value, order);
    }

    /// Atomic add, returning the previous value
    #[inline]
    pub fn fetch_add(&self, value: i64, order: Ordering) -> i64 {
        self.value.fetch_add(value, order)
    }

    /// Atomic subtract, returning the previous value
    #[inline]
    pub fn fetch_sub(&self, value: i64, order: Ordering) -> i64 {
        self.value.fetch_sub(value, order)
    }

    /// Blocks the calling thread while the value equals `expected`
    ///
    /// Returns the first observed value different from `expected`.
    pub fn wait(&self, expected: i64) -> i64 {
        let mut current = self.value.load(Ordering::Acquire);
        if current != expected {
            return current;
        }
        let mut guard = self.lock.lock();
        loop {
            current = self.value.load(Ordering::Acquire);
            if current != expected {
                return current;
            }
            self.condvar.wait(&mut guard);
        }
    }

    /// Wakes at most one waiter
    pub fn notify_one(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_one();
    }

    /// Wakes all waiters
    pub fn notify_all(&self) {
        let _guard = self.lock.lock();
        self.condvar.notify_all();
    }
}

impl core::fmt::Debug for WaitableAtomic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("WaitableAtomic")
            .field(&self.value.load(Ordering::Relaxed))
            .finish()
    }
}
