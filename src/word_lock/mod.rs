use crate::cell::Cell;
use crate::sync::atomic::{
    AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use crate::thread;
use crate::util::park::Parker;
use std::ptr;

const IS_LOCKED_BIT: usize = 1;
const IS_QUEUE_LOCKED_BIT: usize = 2;
const QUEUE_HEAD_MASK: usize = 3;

#[cfg(not(feature = "loom"))]
const SPIN_LIMIT: usize = 40;
//Keep loom's state space tractable.
#[cfg(feature = "loom")]
const SPIN_LIMIT: usize = 1;

/// A fully adaptive mutex that uses `sizeof(usize)` storage.
///
/// The fast paths are a single compare-and-swap; under persistent contention
/// waiters splice a stack-allocated record into an intrusive queue embedded
/// in the upper bits of the lock word and go to sleep on a per-record
/// condvar. The queue needs no allocation and no global state, which is why
/// [the parking lot](crate::parking_lot) can use `WordLock` for its own
/// buckets without recursing into itself.
///
/// Most code should use [`Lock`](crate::Lock) instead; `WordLock` sits lower
/// in the stack and costs a full word per instance.
pub struct WordLock {
    word: AtomicUsize,
}

/*On-stack wait record. The word's pointer bits link these head to tail;
 *the head record additionally caches the queue tail so appending is O(1).*/
#[repr(align(4))]
struct WaitRecord {
    parker: Parker,
    next: Cell<*const WaitRecord>,
    tail: Cell<*const WaitRecord>,
}

impl WaitRecord {
    fn new() -> Self {
        Self {
            parker: Parker::new(),
            next: Cell::new(ptr::null()),
            tail: Cell::new(ptr::null()),
        }
    }
}

impl WordLock {
    /// Creates the lock in the unlocked state.
    #[cfg(not(feature = "loom"))]
    #[inline]
    pub const fn new() -> Self {
        Self {
            word: AtomicUsize::new(0),
        }
    }
    /// Creates the lock in the unlocked state.
    #[cfg(feature = "loom")]
    pub fn new() -> Self {
        Self {
            word: AtomicUsize::new(0),
        }
    }

    /// Acquires the lock, blocking the calling thread until it is available.
    #[inline]
    pub fn lock(&self) {
        if self
            .word
            .compare_exchange_weak(0, IS_LOCKED_BIT, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    /// Releases the lock.
    ///
    /// Ownership is not handed to a waiter: the word is fully released and
    /// any woken thread races for it again from the fast path.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock, i.e. this call must pair with
    /// an earlier [`lock`](WordLock::lock) on the same thread.
    #[inline]
    pub unsafe fn unlock(&self) {
        if self
            .word
            .compare_exchange_weak(IS_LOCKED_BIT, 0, Release, Relaxed)
            .is_ok()
        {
            return;
        }
        self.unlock_slow();
    }

    /// Checks whether some thread currently holds the lock.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.word.load(Acquire) & IS_LOCKED_BIT != 0
    }

    /// Alias for [`is_held`](WordLock::is_held).
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.is_held()
    }

    #[cold]
    fn lock_slow(&self) {
        let mut spin_count = 0;
        let record = WaitRecord::new();
        loop {
            let current = self.word.load(Relaxed);

            if current & IS_LOCKED_BIT == 0 {
                //Barging: whoever lands the CAS first wins, queued or not.
                if self
                    .word
                    .compare_exchange_weak(current, current | IS_LOCKED_BIT, Acquire, Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            // Spin only while nobody is queued; a queue means the contention
            // is not short-lived.
            if current & !QUEUE_HEAD_MASK == 0 && spin_count < SPIN_LIMIT {
                spin_count += 1;
                thread::yield_now();
                continue;
            }

            if current & IS_QUEUE_LOCKED_BIT != 0 {
                thread::yield_now();
                continue;
            }

            if self
                .word
                .compare_exchange_weak(current, current | IS_QUEUE_LOCKED_BIT, Acquire, Relaxed)
                .is_err()
            {
                continue;
            }

            // The queue bit is ours; nobody else may touch the links until we
            // publish a word with the bit clear.
            record.parker.prepare_park();
            let record_ptr = &record as *const WaitRecord;
            debug_assert_eq!(record_ptr as usize & QUEUE_HEAD_MASK, 0);

            let head = (current & !QUEUE_HEAD_MASK) as *const WaitRecord;
            if head.is_null() {
                record.tail.set(record_ptr);
                self.word.store(record_ptr as usize | IS_LOCKED_BIT, Release);
            } else {
                /*SAFETY:
                 *Linked records belong to threads blocked in this function;
                 *they can't unwind their stacks until their parker fires,
                 *and the queue bit keeps everyone else off the links.
                 */
                unsafe {
                    let tail = (*head).tail.get();
                    (*tail).next.set(record_ptr);
                    (*head).tail.set(record_ptr);
                }
                // Same word as the snapshot: queue bit clear, lock bit set,
                // head unchanged.
                self.word.store(current, Release);
            }

            record.parker.park();

            //The unlocker detached us before waking us; rearm for the retry.
            record.next.set(ptr::null());
            record.tail.set(ptr::null());
        }
    }

    #[cold]
    fn unlock_slow(&self) {
        loop {
            let current = self.word.load(Relaxed);
            debug_assert!(
                current & IS_LOCKED_BIT != 0,
                "unlocking a WordLock that is not held"
            );

            if current == IS_LOCKED_BIT {
                if self
                    .word
                    .compare_exchange_weak(IS_LOCKED_BIT, 0, Release, Relaxed)
                    .is_ok()
                {
                    return;
                }
                continue;
            }

            if current & IS_QUEUE_LOCKED_BIT != 0 {
                thread::yield_now();
                continue;
            }

            debug_assert!(current & !QUEUE_HEAD_MASK != 0);
            if self
                .word
                .compare_exchange_weak(current, current | IS_QUEUE_LOCKED_BIT, Acquire, Relaxed)
                .is_err()
            {
                continue;
            }

            let head = (current & !QUEUE_HEAD_MASK) as *const WaitRecord;
            /*SAFETY:
             *We hold the queue bit, so the links are ours to rewrite, and
             *`head` is still blocked on its parker so its stack is live.
             */
            unsafe {
                let new_head = (*head).next.get();
                if !new_head.is_null() {
                    (*new_head).tail.set((*head).tail.get());
                }
                // Clears the lock bit, the queue bit and installs the new
                // head in one store.
                self.word.store(new_head as usize, Release);
                (*head).parker.unpark();
            }
            return;
        }
    }
}

impl Default for WordLock {
    fn default() -> Self {
        Self::new()
    }
}
