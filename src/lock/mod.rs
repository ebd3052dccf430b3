use crate::parking_lot;
use crate::sync::atomic::{
    AtomicU8,
    Ordering::{Acquire, Relaxed, Release},
};
use crate::thread;

const IS_HELD_BIT: u8 = 1;
const HAS_PARKED_BIT: u8 = 2;

#[cfg(not(feature = "loom"))]
const SPIN_LIMIT: usize = 40;
//Keep loom's state space tractable.
#[cfg(feature = "loom")]
const SPIN_LIMIT: usize = 1;

/// A fully adaptive mutex that only requires one byte of storage.
///
/// Uncontended locking is an inlined compare-and-swap, micro-contention is
/// handled by spinning and yielding, and persistent contention parks the
/// thread in [the parking lot](crate::parking_lot), keyed by the address of
/// the byte itself. The byte carries two bits: whether the lock is held, and
/// whether any thread is (or is about to be) parked on it.
///
/// Unlocking is unfair: the byte is released before a waiter is dispatched,
/// so a fresh arrival can barge in ahead of threads that were already
/// queued. Waiters are woken in FIFO order.
pub struct Lock {
    byte: AtomicU8,
}

impl Lock {
    /// Creates the lock in the unlocked state.
    #[cfg(not(feature = "loom"))]
    #[inline]
    pub const fn new() -> Self {
        Self {
            byte: AtomicU8::new(0),
        }
    }
    /// Creates the lock in the unlocked state.
    #[cfg(feature = "loom")]
    pub fn new() -> Self {
        Self {
            byte: AtomicU8::new(0),
        }
    }

    /// Acquires the lock, blocking the calling thread until it is available.
    #[inline]
    pub fn lock(&self) {
        if self
            .byte
            .compare_exchange_weak(0, IS_HELD_BIT, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    /// Releases the lock, dispatching one parked waiter if there is one.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock, i.e. this call must pair with
    /// an earlier [`lock`](Lock::lock) on the same thread.
    #[inline]
    pub unsafe fn unlock(&self) {
        // Only succeeds when nobody is parked; the parked bit forces the
        // slow path.
        if self
            .byte
            .compare_exchange_weak(IS_HELD_BIT, 0, Release, Relaxed)
            .is_ok()
        {
            return;
        }
        self.unlock_slow();
    }

    /// Checks whether some thread currently holds the lock.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.byte.load(Acquire) & IS_HELD_BIT != 0
    }

    /// Alias for [`is_held`](Lock::is_held).
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.is_held()
    }

    #[inline]
    fn byte_address(&self) -> *const () {
        (&self.byte as *const AtomicU8).cast()
    }

    #[cold]
    fn lock_slow(&self) {
        let mut spin_count = 0;
        loop {
            let current = self.byte.load(Relaxed);

            if current & IS_HELD_BIT == 0 {
                if self
                    .byte
                    .compare_exchange_weak(current, current | IS_HELD_BIT, Acquire, Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            if spin_count < SPIN_LIMIT {
                spin_count += 1;
                thread::yield_now();
                continue;
            }

            // Tell unlockers there is someone to wake before committing to
            // the sleep.
            if current & HAS_PARKED_BIT == 0
                && self
                    .byte
                    .compare_exchange_weak(current, current | HAS_PARKED_BIT, Relaxed, Relaxed)
                    .is_err()
            {
                continue;
            }

            /*The validation runs under the queue lock for our byte address.
             *If the unlocker already released the byte, validation fails and
             *we never sleep; if we get queued first, the unlocker's
             *unpark_one is behind the same queue lock and must find us.
             *Either way the wakeup can't be lost.*/
            parking_lot::park_conditionally(self.byte_address(), || {
                self.byte.load(Relaxed) == (IS_HELD_BIT | HAS_PARKED_BIT)
            });
        }
    }

    #[cold]
    fn unlock_slow(&self) {
        loop {
            let current = self.byte.load(Relaxed);
            debug_assert!(
                current & IS_HELD_BIT != 0,
                "unlocking a Lock that is not held"
            );

            if current == IS_HELD_BIT {
                if self
                    .byte
                    .compare_exchange_weak(IS_HELD_BIT, 0, Release, Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            // Someone is parked: give the byte up but keep the parked tag,
            // then dispatch a waiter.
            debug_assert_eq!(current, IS_HELD_BIT | HAS_PARKED_BIT);
            if self
                .byte
                .compare_exchange_weak(current, HAS_PARKED_BIT, Release, Relaxed)
                .is_ok()
            {
                break;
            }
        }

        if !parking_lot::unpark_one(self.byte_address()) {
            // The queue drained; try to drop the tag. A new locker may have
            // claimed the byte already, in which case its unlock retries
            // this cleanup.
            let _ = self
                .byte
                .compare_exchange(HAS_PARKED_BIT, 0, Relaxed, Relaxed);
        }
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}
