//! Locking primitives without lock poisoning.
//!
//! Stage bodies run user code that may panic. Those panics are turned into
//! [`Error::Panicked`][crate::Error::Panicked] outcomes or into chain faults, so a panic must never
//! leave a cell or a chain counter permanently unusable. The [`std::sync`] types would poison
//! themselves in that situation, and every later `lock().unwrap()` would turn one failing stage
//! into a cascade of unrelated panics that hide the root cause.
//!
//! The wrappers here simply recover the guard from a poisoned lock.

use std::{
    ops::{Deref, DerefMut},
    sync,
};

pub struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub const fn new(t: T) -> Mutex<T> {
        Self {
            inner: sync::Mutex::new(t),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };

        MutexGuard { inner: guard }
    }
}

pub struct MutexGuard<'a, T: ?Sized + 'a> {
    inner: sync::MutexGuard<'a, T>,
}

impl<'a, T: ?Sized + 'a> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<'a, T: ?Sized + 'a> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

pub struct Condvar {
    inner: sync::Condvar,
}

impl Condvar {
    pub const fn new() -> Condvar {
        Self {
            inner: sync::Condvar::new(),
        }
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let guard = match self.inner.wait(guard.inner) {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        MutexGuard { inner: guard }
    }

    pub fn wait_while<'a, T, F>(&self, guard: MutexGuard<'a, T>, condition: F) -> MutexGuard<'a, T>
    where
        F: FnMut(&mut T) -> bool,
    {
        let guard = match self.inner.wait_while(guard.inner, condition) {
            Ok(guard) => guard,
            Err(poison) => poison.into_inner(),
        };
        MutexGuard { inner: guard }
    }

    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        panic::{catch_unwind, AssertUnwindSafe},
        sync::Arc,
        thread,
    };

    use super::*;

    #[test]
    fn lock_survives_panicking_holder() {
        let mutex = Arc::new(Mutex::new(0));
        let m = mutex.clone();
        thread::spawn(move || {
            let _ = catch_unwind(AssertUnwindSafe(|| {
                let mut guard = m.lock();
                *guard += 1;
                crate::test::silent_panic("holder panic");
            }));
        })
        .join()
        .unwrap();

        assert_eq!(*mutex.lock(), 1);
    }
}
