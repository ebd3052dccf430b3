//! Scoped RAII holders for the crate's locks.

use crate::lock::Lock;
use crate::util::marker::PhantomUnsend;
use crate::word_lock::WordLock;

/// The common surface of the crate's mutexes, for code generic over which
/// flavour it holds.
///
/// # Safety
///
/// Implementations must provide mutual exclusion: between a `lock` return
/// and the matching `unlock`, no other `lock` call may return.
pub unsafe trait Lockable {
    /// Acquires the lock, blocking until it is available.
    fn lock(&self);

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock.
    unsafe fn unlock(&self);

    /// Checks whether some thread currently holds the lock.
    fn is_held(&self) -> bool;
}

// SAFETY: Lock is a mutex.
unsafe impl Lockable for Lock {
    #[inline]
    fn lock(&self) {
        Lock::lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        Lock::unlock(self)
    }

    #[inline]
    fn is_held(&self) -> bool {
        Lock::is_held(self)
    }
}

// SAFETY: WordLock is a mutex.
unsafe impl Lockable for WordLock {
    #[inline]
    fn lock(&self) {
        WordLock::lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        WordLock::unlock(self)
    }

    #[inline]
    fn is_held(&self) -> bool {
        WordLock::is_held(self)
    }
}

/// Holds a [`Lockable`] lock for the duration of a scope.
///
/// Locks on construction, unlocks on drop. Not `Send`: the thread that
/// locked must be the one that unlocks.
pub struct Locker<'a, L: Lockable> {
    lock: &'a L,
    _unsend: PhantomUnsend,
}

impl<'a, L: Lockable> Locker<'a, L> {
    /// Acquires `lock`, blocking until it is available.
    pub fn new(lock: &'a L) -> Self {
        lock.lock();
        Self {
            lock,
            _unsend: PhantomUnsend::default(),
        }
    }
}

impl<L: Lockable> Drop for Locker<'_, L> {
    fn drop(&mut self) {
        /*SAFETY: acquired in new() on this same thread (the holder is not
         *Send) and released exactly once, here.*/
        unsafe { self.lock.unlock() };
    }
}

/// A scoped holder for [`Lock`].
pub type LockHolder<'a> = Locker<'a, Lock>;

/// A scoped holder for [`WordLock`].
pub type WordLockHolder<'a> = Locker<'a, WordLock>;
