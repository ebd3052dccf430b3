use super::*;

cfg_not_loom! {

use crate::util::testing;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};
use std::sync::{Arc, Mutex};
use std::thread;

fn key<T>(place: &T) -> *const () {
    (place as *const T).cast()
}

fn parked_count(address: *const ()) -> usize {
    let mut count = 0;
    for_each(|_, parked_on| {
        if parked_on == address {
            count += 1;
        }
    });
    count
}

fn wait_for_parked(address: *const (), count: usize) {
    while parked_count(address) != count {
        thread::yield_now();
    }
}

#[test]
fn park_and_unpark_one() {
    let _lot = testing::exclusive_lot();
    static GO: AtomicBool = AtomicBool::new(false);

    let waiter = thread::spawn(|| park_conditionally(key(&GO), || !GO.load(Relaxed)));
    let waiter_id = waiter.thread().id();
    wait_for_parked(key(&GO), 1);

    // The sleeper is visible to the diagnostic walk.
    let mut seen = Vec::new();
    for_each(|thread_id, parked_on| {
        if parked_on == key(&GO) {
            seen.push(thread_id);
        }
    });
    assert_eq!(seen, vec![waiter_id]);

    GO.store(true, Relaxed);
    // A wakeup happens, but the flag reports what was left behind: nothing.
    assert!(!unpark_one(key(&GO)));
    assert!(waiter.join().unwrap());

    assert!(!unpark_one(key(&GO)));
    assert_eq!(parked_count(key(&GO)), 0);
}

#[test]
fn validation_declines() {
    let _lot = testing::exclusive_lot();
    static GO: AtomicBool = AtomicBool::new(true);

    assert!(!park_conditionally(key(&GO), || !GO.load(Relaxed)));
    assert_eq!(parked_count(key(&GO)), 0);
}

#[test]
fn unpark_without_waiters_is_a_noop() {
    let _lot = testing::exclusive_lot();
    static PLACE: AtomicUsize = AtomicUsize::new(0);

    assert!(!unpark_one(key(&PLACE)));
    unpark_all(key(&PLACE));
    assert_eq!(parked_count(key(&PLACE)), 0);
}

#[test]
fn unpark_one_wakes_in_fifo_order() {
    const WAITERS: usize = 10;
    let _lot = testing::exclusive_lot();
    static TOKEN: AtomicUsize = AtomicUsize::new(0);

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..WAITERS {
        let order = order.clone();
        handles.push(thread::spawn(move || {
            assert!(park_conditionally(key(&TOKEN), || {
                TOKEN.load(Relaxed) == 0
            }));
            order.lock().unwrap().push(i);
        }));
        // Serialise the enqueues so the queue order is known.
        wait_for_parked(key(&TOKEN), i + 1);
    }

    for woken in 0..WAITERS {
        // While waiters remain queued the flag says so; the last unpark
        // leaves an empty queue behind.
        assert_eq!(unpark_one(key(&TOKEN)), woken + 1 < WAITERS);
        while order.lock().unwrap().len() != woken + 1 {
            thread::yield_now();
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), (0..WAITERS).collect::<Vec<_>>());
}

#[test]
fn unpark_all_wakes_everyone() {
    const WAITERS: usize = 10;
    let _lot = testing::exclusive_lot();
    static GO: AtomicBool = AtomicBool::new(false);
    static WOKE: AtomicUsize = AtomicUsize::new(0);

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            thread::spawn(|| {
                assert!(park_conditionally(key(&GO), || !GO.load(Relaxed)));
                WOKE.fetch_add(1, Relaxed);
            })
        })
        .collect();
    wait_for_parked(key(&GO), WAITERS);

    GO.store(true, Relaxed);
    unpark_all(key(&GO));
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(WOKE.load(Relaxed), WAITERS);
    assert_eq!(parked_count(key(&GO)), 0);
    // Nothing queued any more; this must be a no-op.
    unpark_all(key(&GO));
}

/*Threads sleep until the generation of their current address moves past
 *their round; the main thread pumps every generation up to ROUNDS while the
 *workers cycle through the address pool. Thread startup grows the table
 *underneath the queues, so records get migrated while parked. The handshake
 *guarantees no wakeup is lost, which is exactly what makes this terminate.*/
fn pump_generations<const ADDRESSES: usize>(
    generations: &'static [AtomicUsize; ADDRESSES],
    threads: usize,
    rounds: usize,
) {
    let workers: Vec<_> = (0..threads)
        .map(|t| {
            thread::spawn(move || {
                for round in 0..rounds {
                    let i = (t + round) % ADDRESSES;
                    park_conditionally(key(&generations[i]), || {
                        generations[i].load(Relaxed) <= round
                    });
                }
            })
        })
        .collect();

    for generation in 1..=rounds {
        for place in generations.iter() {
            place.store(generation, Relaxed);
            unpark_all(key(place));
        }
    }
    for worker in workers {
        worker.join().unwrap();
    }

    for place in generations.iter() {
        assert_eq!(parked_count(key(place)), 0);
    }
}

#[test]
fn stress_shared_addresses() {
    let _lot = testing::exclusive_lot();
    static GENERATIONS: [AtomicUsize; 8] = [
        AtomicUsize::new(0),
        AtomicUsize::new(0),
        AtomicUsize::new(0),
        AtomicUsize::new(0),
        AtomicUsize::new(0),
        AtomicUsize::new(0),
        AtomicUsize::new(0),
        AtomicUsize::new(0),
    ];
    pump_generations(&GENERATIONS, 32, 16);
}

#[test]
#[ignore] //heavyweight; run with --ignored when touching the table growth
fn stress_shared_addresses_large() {
    let _lot = testing::exclusive_lot();
    static GENERATIONS: [AtomicUsize; 64] = {
        const ZERO: AtomicUsize = AtomicUsize::new(0);
        [ZERO; 64]
    };
    pump_generations(&GENERATIONS, 256, 200);
}

}

cfg_loom! {

use crate::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use loom::thread;

#[test]
#[ignore] //large model, takes a while to exhaust
fn unpark_one_cannot_be_lost() {
    let mut builder = loom::model::Builder::new();
    builder.preemption_bound = Some(2);
    builder.check(|| {
        loom::lazy_static! {
            static ref WROTE: AtomicUsize = AtomicUsize::new(0);
        }
        thread::spawn(|| {
            WROTE.store(1, Relaxed);
            unpark_one(8 as *const ());
        });
        park_conditionally(8 as *const (), || WROTE.load(Relaxed) == 0);
        assert_eq!(WROTE.load(Relaxed), 1);
    });
}

#[test]
#[ignore] //large model, takes a while to exhaust
fn unpark_all_cannot_be_lost() {
    let mut builder = loom::model::Builder::new();
    builder.preemption_bound = Some(2);
    builder.check(|| {
        loom::lazy_static! {
            static ref WROTE: AtomicUsize = AtomicUsize::new(0);
        }
        let waiter = thread::spawn(|| {
            park_conditionally(8 as *const (), || WROTE.load(Relaxed) == 0);
            assert_eq!(WROTE.load(Relaxed), 1);
        });
        WROTE.store(1, Relaxed);
        unpark_all(8 as *const ());
        waiter.join().unwrap();
    });
}

}
