//! The lock module.
//!
//! The original kernel-rs runs bare metal and so its locks have to
//! manage interrupts and a `Cpu`-local `noff` counter by hand
//! (`RawSpinlock::acquire`/`release` in the teacher's `spinlock.rs`).
//! Hosted on top of `std`, that bookkeeping is exactly what
//! `std::sync::Mutex` already gives us, so `Spinlock<T>` below keeps the
//! teacher's named-lock API (`Spinlock::new(name, data)`, a guard that
//! derefs to `&T`/`&mut T`) but is a thin wrapper over it instead of a
//! hand-rolled spin loop.
//!
//! `Sleeplock<T>` plays the same role as the teacher's sleeping lock:
//! a mutex meant to be held across long operations (inode reads/writes)
//! rather than short critical sections. Since nothing in this crate
//! actually blocks a simulated CPU core on a data mutex, it is simply a
//! second name for the same underlying primitive -- the distinction is
//! about *intent*, as in the teacher's code.

use std::sync::{Mutex, MutexGuard};

pub struct Spinlock<T> {
    name: &'static str,
    inner: Mutex<T>,
}

pub struct SpinlockGuard<'s, T> {
    name: &'static str,
    inner: MutexGuard<'s, T>,
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        SpinlockGuard {
            name: self.name,
            inner,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut().unwrap_or_else(|e| e.into_inner())
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<T> std::ops::Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> std::ops::DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> SpinlockGuard<'_, T> {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A lock meant to be held across operations that, on a real kernel,
/// would be long enough to justify descheduling rather than spinning
/// (inode reads, directory traversal). See the module doc for why this
/// crate models it identically to `Spinlock`.
pub type Sleeplock<T> = Spinlock<T>;
pub type SleeplockGuard<'s, T> = SpinlockGuard<'s, T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_derefs_to_inner_data() {
        let lock = Spinlock::new("test", 41);
        *lock.lock() += 1;
        assert_eq!(*lock.lock(), 42);
    }
}
