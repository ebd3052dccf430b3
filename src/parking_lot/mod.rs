//! A process-wide registry of sleeping threads, keyed by address.
//!
//! Any thread may block on an arbitrary machine-word key (conventionally the
//! address of the synchronization object it is waiting for) and be woken by
//! another thread that targets the same key. The wait queues live here, in a
//! global hash table of buckets, so the primitive being waited on needs no
//! queue storage of its own — [`Lock`](crate::Lock) gets by on one byte.
//!
//! Keys are pure identities: the parking lot never dereferences them. Only
//! park on addresses you control, since unrelated primitives sharing a key
//! would wake each other.

use crate::cell::Cell;
use crate::sync::atomic::{
    AtomicPtr, AtomicUsize,
    Ordering::{AcqRel, Acquire, Relaxed},
};
use crate::thread::{self, ThreadId};
use crate::util::park::Parker;
use crate::word_lock::WordLock;
use smallvec::SmallVec;
use std::ptr;

/*With 64 bytes of bucket padding and three buckets per thread, the memory
 *cost of the table is still only a few hundred bytes per thread.*/
const MAX_LOAD_FACTOR: usize = 3;

const GROWTH_FACTOR: usize = 2;

#[cfg(target_pointer_width = "64")]
const HASH_MULTIPLIER: usize = 0x9E37_79B9_7F4A_7C15;
#[cfg(target_pointer_width = "32")]
const HASH_MULTIPLIER: usize = 0x9E37_79B9;

cfg_not_loom! {
    /// Points to the hash table currently in use, null until the first park.
    ///
    /// Tables this has ever pointed to are never freed: a thread that loaded
    /// the pointer before a rehash may still be reading the old spine. The
    /// geometric growth keeps the total leak within a small multiple of the
    /// live table.
    static HASHTABLE: AtomicPtr<Hashtable> = AtomicPtr::new(ptr::null_mut());

    static NUM_THREADS: AtomicUsize = AtomicUsize::new(0);
}

cfg_loom! {
    loom::lazy_static! {
        static ref HASHTABLE: AtomicPtr<Hashtable> = AtomicPtr::new(ptr::null_mut());
        static ref NUM_THREADS: AtomicUsize = AtomicUsize::new(0);
    }
}

struct Hashtable {
    slots: Box<[AtomicPtr<Bucket>]>,
}

impl Hashtable {
    fn new(size: usize) -> Self {
        debug_assert!(size >= 1);
        Self {
            slots: (0..size).map(|_| AtomicPtr::new(ptr::null_mut())).collect(),
        }
    }

    #[inline]
    fn size(&self) -> usize {
        self.slots.len()
    }
}

/*Buckets are allocated on demand, never freed once published, and migrate
 *between tables across rehashes. The alignment keeps neighbouring buckets
 *from sharing a cache line.*/
#[repr(align(64))]
struct Bucket {
    /// Protects the whole bucket. Thou shall not touch the queue, nor decide
    /// whether this bucket still belongs to the current table, without it.
    lock: WordLock,
    queue_head: Cell<*const ThreadData>,
    queue_tail: Cell<*const ThreadData>,
}

enum DequeueResult {
    Ignore,
    RemoveAndContinue,
    RemoveAndStop,
}

impl Bucket {
    fn new() -> Self {
        Self {
            lock: WordLock::new(),
            queue_head: Cell::new(ptr::null()),
            queue_tail: Cell::new(ptr::null()),
        }
    }

    /// Appends `record` to the FIFO.
    ///
    /// # Safety
    ///
    /// The caller must hold `self.lock`, and `record` must point to a
    /// `ThreadData` whose owner is committed to parking (address set, parker
    /// armed, not linked anywhere else).
    unsafe fn enqueue(&self, record: *const ThreadData) {
        debug_assert!(!(*record).address.get().is_null());
        debug_assert!((*record).next_in_queue.get().is_null());

        let tail = self.queue_tail.get();
        if !tail.is_null() {
            (*tail).next_in_queue.set(record);
        } else {
            self.queue_head.set(record);
        }
        self.queue_tail.set(record);
    }

    /// Walks the FIFO from the head, letting `f` decide per record whether
    /// to keep it, remove it and go on, or remove it and stop.
    ///
    /// The walk keeps a reference to the link that points at the current
    /// record (the head cell, or some record's `next_in_queue`) plus the
    /// previous record, which is everything needed to unlink in place while
    /// maintaining `queue_tail`.
    ///
    /// # Safety
    ///
    /// The caller must hold `self.lock`.
    unsafe fn dequeue_with(&self, mut f: impl FnMut(&ThreadData) -> DequeueResult) {
        let mut current_link = &self.queue_head;
        let mut previous: *const ThreadData = ptr::null();
        loop {
            let current = current_link.get();
            if current.is_null() {
                break;
            }
            match f(&*current) {
                DequeueResult::Ignore => {
                    previous = current;
                    current_link = &(*current).next_in_queue;
                }
                result => {
                    if self.queue_tail.get() == current {
                        self.queue_tail.set(previous);
                    }
                    current_link.set((*current).next_in_queue.get());
                    (*current).next_in_queue.set(ptr::null());
                    if let DequeueResult::RemoveAndStop = result {
                        break;
                    }
                }
            }
        }
        debug_assert_eq!(
            self.queue_head.get().is_null(),
            self.queue_tail.get().is_null()
        );
    }

    /// Removes and returns the head record, if any.
    ///
    /// # Safety
    ///
    /// The caller must hold `self.lock`.
    unsafe fn dequeue_any(&self) -> Option<*const ThreadData> {
        let mut result = None;
        self.dequeue_with(|record| {
            result = Some(record as *const ThreadData);
            DequeueResult::RemoveAndStop
        });
        result
    }
}

/*One per live thread, created lazily on the first park and torn down by the
 *thread-local destructor. While the record sits in a bucket queue, all of
 *its fields except the parker belong to whoever holds that bucket's lock;
 *the owning thread only clears `address` after it has been dequeued and
 *woken.*/
struct ThreadData {
    thread_id: ThreadId,
    parker: Parker,
    /// Key this thread is parked on; null while not parked.
    address: Cell<*const ()>,
    next_in_queue: Cell<*const ThreadData>,
}

impl ThreadData {
    fn new() -> Self {
        // Thread creation is the only event that can push the table over its
        // load factor, so this is the only place that grows it.
        let num_threads = NUM_THREADS.fetch_add(1, Relaxed) + 1;
        ensure_hashtable_size(num_threads);

        Self {
            thread_id: thread::current().id(),
            parker: Parker::new(),
            address: Cell::new(ptr::null()),
            next_in_queue: Cell::new(ptr::null()),
        }
    }
}

impl Drop for ThreadData {
    fn drop(&mut self) {
        NUM_THREADS.fetch_sub(1, Relaxed);
    }
}

#[inline(always)]
fn with_thread_data<R>(f: impl FnOnce(&ThreadData) -> R) -> R {
    #[cfg(not(feature = "loom"))]
    std::thread_local!(static THREAD_DATA: ThreadData = ThreadData::new());
    #[cfg(feature = "loom")]
    loom::thread_local!(static THREAD_DATA: ThreadData = ThreadData::new());

    /*A park during thread teardown can outlive the thread-local; fall back
     *to a record on the stack, it only costs the counter churn.*/
    let mut teardown_storage = None;
    let thread_data = THREAD_DATA
        .try_with(|data| data as *const ThreadData)
        .unwrap_or_else(|_| teardown_storage.get_or_insert_with(ThreadData::new));

    /*SAFETY: either points into the thread-local or into teardown_storage,
     *both of which outlive this call.*/
    f(unsafe { &*thread_data })
}

#[inline]
fn hash_address(address: *const ()) -> usize {
    //Fibonacci multiply; aligned pointers differ mostly in their upper bits.
    (address as usize).wrapping_mul(HASH_MULTIPLIER)
}

/// Returns the current table, creating the initial one if need be. The
/// reference is valid forever, though the table it names may stop being the
/// current one at any point.
fn get_or_create_hashtable() -> &'static Hashtable {
    loop {
        let table = HASHTABLE.load(Acquire);
        if !table.is_null() {
            /*SAFETY: published tables are never freed.*/
            return unsafe { &*table };
        }

        //Race to be the one that creates it.
        let fresh = Box::into_raw(Box::new(Hashtable::new(MAX_LOAD_FACTOR)));
        match HASHTABLE.compare_exchange(ptr::null_mut(), fresh, AcqRel, Acquire) {
            /*SAFETY: we just leaked it, and it will never be freed.*/
            Ok(_) => return unsafe { &*fresh },
            Err(_) => {
                /*SAFETY: `fresh` lost the race unpublished; nobody else has
                 *seen it.*/
                drop(unsafe { Box::from_raw(fresh) });
            }
        }
    }
}

/// Returns the bucket in `slot`, installing a fresh one if the slot is
/// still empty.
fn materialize_bucket(slot: &AtomicPtr<Bucket>) -> &'static Bucket {
    loop {
        let bucket = slot.load(Acquire);
        if !bucket.is_null() {
            /*SAFETY: published buckets are never freed.*/
            return unsafe { &*bucket };
        }

        let fresh = Box::into_raw(Box::new(Bucket::new()));
        match slot.compare_exchange(ptr::null_mut(), fresh, AcqRel, Acquire) {
            /*SAFETY: we just leaked it, and it will never be freed.*/
            Ok(_) => return unsafe { &*fresh },
            Err(_) => {
                /*SAFETY: `fresh` lost the race unpublished.*/
                drop(unsafe { Box::from_raw(fresh) });
            }
        }
    }
}

/// Locks and returns the bucket for `address` in the current table,
/// creating table and bucket as needed.
fn lock_bucket(address: *const ()) -> &'static Bucket {
    let hash = hash_address(address);
    loop {
        let table = get_or_create_hashtable();
        let bucket = materialize_bucket(&table.slots[hash % table.size()]);

        bucket.lock.lock();

        // The table may have been rehashed between the load above and the
        // lock; the lock itself keeps any further rehash out.
        if ptr::eq(HASHTABLE.load(Relaxed), table) {
            return bucket;
        }

        // SAFETY: locked just above
        unsafe { bucket.lock.unlock() };
    }
}

/// As [`lock_bucket`], but refuses to create anything: returns `None` when
/// no table exists yet or the slot is still empty, which means nothing can
/// be parked there.
fn lock_existing_bucket(address: *const ()) -> Option<&'static Bucket> {
    let hash = hash_address(address);
    loop {
        let table = HASHTABLE.load(Acquire);
        if table.is_null() {
            return None;
        }
        /*SAFETY: published tables are never freed.*/
        let table = unsafe { &*table };

        let bucket = table.slots[hash % table.size()].load(Acquire);
        if bucket.is_null() {
            return None;
        }
        /*SAFETY: published buckets are never freed.*/
        let bucket = unsafe { &*bucket };

        bucket.lock.lock();

        if ptr::eq(HASHTABLE.load(Relaxed), table as *const _ as *mut Hashtable) {
            return Some(bucket);
        }

        // SAFETY: locked just above
        unsafe { bucket.lock.unlock() };
    }
}

/// Locks every bucket of the current table and returns them. Slow and not
/// scalable; only thread creation and diagnostics go through here.
fn lock_hashtable() -> Vec<&'static Bucket> {
    loop {
        let table = get_or_create_hashtable();

        // Materialize every bucket first so that locking the buckets really
        // locks the whole table.
        let mut buckets: Vec<&'static Bucket> = table
            .slots
            .iter()
            .map(|slot| materialize_bucket(slot))
            .collect();

        //Always lock in address order, so two table lockers can't deadlock.
        buckets.sort_by_key(|bucket| *bucket as *const Bucket as usize);
        for bucket in &buckets {
            bucket.lock.lock();
        }

        // Somebody may have rehashed between our load and the locks; their
        // table wins and we go again.
        if ptr::eq(HASHTABLE.load(Relaxed), table) {
            return buckets;
        }

        for bucket in &buckets {
            // SAFETY: locked in the loop above
            unsafe { bucket.lock.unlock() };
        }
    }
}

fn unlock_hashtable(buckets: &[&'static Bucket]) {
    for bucket in buckets {
        // SAFETY: the caller got these from lock_hashtable()
        unsafe { bucket.lock.unlock() };
    }
}

/// Grows the table to fit `num_threads` threads, if it doesn't already.
fn ensure_hashtable_size(num_threads: usize) {
    // Cheap check first; most thread creations don't grow anything.
    let table = HASHTABLE.load(Acquire);
    /*SAFETY: published tables are never freed.*/
    if !table.is_null() && unsafe { (*table).size() } >= MAX_LOAD_FACTOR * num_threads {
        return;
    }

    let locked = lock_hashtable();

    // Re-check: the table could have been rehashed while we were locking
    // it, and lock_hashtable created one if there was none.
    /*SAFETY: we hold every bucket lock, so this pointer is stable; published
     *tables are never freed.*/
    let table = unsafe { &*HASHTABLE.load(Relaxed) };
    if table.size() >= MAX_LOAD_FACTOR * num_threads {
        unlock_hashtable(&locked);
        return;
    }

    // Drain every queue. Per-bucket FIFO order is preserved, which is what
    // keeps per-address FIFO intact across the rehash.
    let mut records = Vec::new();
    for bucket in &locked {
        /*SAFETY: bucket locks held.*/
        while let Some(record) = unsafe { bucket.dequeue_any() } {
            records.push(record);
        }
    }

    let new_size = num_threads * GROWTH_FACTOR * MAX_LOAD_FACTOR;
    assert!(new_size > table.size());
    let new_table: &'static Hashtable = Box::leak(Box::new(Hashtable::new(new_size)));

    // Refill, reusing the drained (still locked) buckets before minting new
    // ones.
    let mut reusable = locked.clone();
    for record in records {
        /*SAFETY: drained records belong to threads that are still parked, so
         *their ThreadData is live and their address is set.*/
        let address = unsafe { (*record).address.get() };
        let slot = &new_table.slots[hash_address(address) % new_size];
        let bucket = match slot.load(Relaxed) {
            bucket if !bucket.is_null() => {
                /*SAFETY: placed below, never freed.*/
                unsafe { &*bucket }
            }
            _ => {
                let bucket = reusable
                    .pop()
                    .unwrap_or_else(|| Box::leak(Box::new(Bucket::new())));
                slot.store(bucket as *const Bucket as *mut Bucket, Relaxed);
                bucket
            }
        };
        /*SAFETY: reused buckets are locked by us, fresh ones are invisible
         *until the new table is published.*/
        unsafe { bucket.enqueue(record) };
    }

    // Any buckets still unused go into empty slots at random, just so they
    // aren't stranded. The table grew, so there is always room.
    for slot in new_table.slots.iter() {
        if slot.load(Relaxed).is_null() {
            match reusable.pop() {
                Some(bucket) => slot.store(bucket as *const Bucket as *mut Bucket, Relaxed),
                None => break,
            }
        }
    }
    debug_assert!(reusable.is_empty());

    // Publish. Nobody can race this store: every would-be rehasher is stuck
    // on the bucket locks we hold.
    let published = HASHTABLE.compare_exchange(
        table as *const Hashtable as *mut Hashtable,
        new_table as *const Hashtable as *mut Hashtable,
        AcqRel,
        Relaxed,
    );
    assert!(published.is_ok());

    unlock_hashtable(&locked);
}

/// Parks the calling thread on `address` if `validate` approves.
///
/// `validate` runs with the internal queue for `address` locked. That is the
/// whole point of the operation: a waker that changes user state *before*
/// calling [`unpark_one`]/[`unpark_all`] cannot slip between the validation
/// and this thread joining the queue, so a wakeup can never be lost. If
/// `validate` returns `false` the thread does not block and `false` is
/// returned; otherwise the thread sleeps until unparked, then returns
/// `true`.
///
/// `validate` must be brief and must not call back into the parking lot —
/// it runs under a queue lock, and re-entry can deadlock.
///
/// Only park on addresses you control; the key is never dereferenced.
pub fn park_conditionally(address: *const (), validate: impl FnOnce() -> bool) -> bool {
    with_thread_data(|me| {
        debug_assert!(me.address.get().is_null(), "thread is already parked");

        let bucket = lock_bucket(address);

        if !validate() {
            // SAFETY: locked by lock_bucket
            unsafe { bucket.lock.unlock() };
            return false;
        }

        me.address.set(address);
        me.parker.prepare_park();
        /*SAFETY: we hold the bucket lock, the address is set and the parker
         *armed; we are not linked anywhere else or we'd still be parked.*/
        unsafe { bucket.enqueue(me) };
        // SAFETY: locked by lock_bucket
        unsafe { bucket.lock.unlock() };

        me.parker.park();

        //We're out of the queue; only this thread looks at `address` now.
        me.address.set(ptr::null());
        true
    })
}

/// Wakes the thread at the front of the queue for `address`, if any.
///
/// The returned flag is `false` when nothing was queued on `address`.
/// When a thread *was* woken, the flag reports whether its bucket still held
/// waiters after the removal — which, on a hash collision, can include
/// threads parked on other addresses. Callers use it as a hint that nobody
/// is left behind (a `false` is reliable; a `true` may be stale by the time
/// it is observed).
pub fn unpark_one(address: *const ()) -> bool {
    let Some(bucket) = lock_existing_bucket(address) else {
        return false;
    };

    let mut target: *const ThreadData = ptr::null();
    /*SAFETY: bucket lock held.*/
    unsafe {
        bucket.dequeue_with(|record| {
            if record.address.get() != address {
                return DequeueResult::Ignore;
            }
            target = record;
            DequeueResult::RemoveAndStop
        });
    }
    let queue_not_empty = !bucket.queue_head.get().is_null();
    // SAFETY: locked by lock_existing_bucket
    unsafe { bucket.lock.unlock() };

    if target.is_null() {
        return false;
    }

    /*SAFETY: the target is out of the queue but still asleep — it cannot
     *tear its ThreadData down until this unpark releases it.*/
    unsafe { (*target).parker.unpark() };
    queue_not_empty
}

/// Wakes every thread currently parked on `address`, in FIFO order.
///
/// Threads that begin parking after the internal queue lock is taken are
/// not woken. A call with no waiters is a no-op.
pub fn unpark_all(address: *const ()) {
    let Some(bucket) = lock_existing_bucket(address) else {
        return;
    };

    let mut wakeups: SmallVec<[*const ThreadData; 8]> = SmallVec::new();
    /*SAFETY: bucket lock held.*/
    unsafe {
        bucket.dequeue_with(|record| {
            if record.address.get() != address {
                return DequeueResult::Ignore;
            }
            wakeups.push(record);
            DequeueResult::RemoveAndContinue
        });
    }
    // SAFETY: locked by lock_existing_bucket
    unsafe { bucket.lock.unlock() };

    // Wake outside the bucket lock; each wakeup takes the target's own
    // mutex and there is no reason to serialize unrelated parks behind that.
    for record in wakeups {
        /*SAFETY: as in unpark_one — dequeued but still asleep.*/
        unsafe { (*record).parker.unpark() };
    }
}

/// Calls `callback` with the thread id and parked address of every thread
/// currently in the parking lot. Diagnostic.
///
/// This locks the entire table, blocking all parks and unparks for the
/// duration. The callback must not call back into the parking lot.
pub fn for_each(mut callback: impl FnMut(ThreadId, *const ())) {
    let buckets = lock_hashtable();

    for bucket in &buckets {
        let mut current = bucket.queue_head.get();
        while !current.is_null() {
            /*SAFETY: reachable records belong to parked threads and we hold
             *every bucket lock.*/
            let record = unsafe { &*current };
            callback(record.thread_id, record.address.get());
            current = record.next_in_queue.get();
        }
    }

    unlock_hashtable(&buckets);
}

#[cfg(test)]
mod tests;
