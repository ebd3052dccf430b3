use super::Parker;
cfg_not_loom! {

#[test]
fn unarmed_park_returns() {
    let parker = Parker::new();
    parker.park();
}

#[test]
fn unpark_before_park() {
    let parker = Parker::new();
    parker.prepare_park();
    parker.unpark();
    parker.park();
}

#[test]
fn unpark_from_other_thread() {
    static PARKER: Parker = Parker::new();
    PARKER.prepare_park();
    std::thread::spawn(|| PARKER.unpark());
    PARKER.park();
}

}

cfg_loom! {

use loom::model::model;
use loom::thread;
use std::sync::Arc;

#[test]
fn unarmed_park_returns() {
    model(|| {
        let parker = Parker::new();
        parker.park();
    });
}

#[test]
fn unpark_from_other_thread() {
    model(|| {
        let parker = Arc::new(Parker::new());
        parker.prepare_park();
        let cloned = parker.clone();
        thread::spawn(move || {
            cloned.unpark();
        });
        parker.park();
    });
}

#[test]
fn unpark_synchronises_with_park() {
    model(|| {
        use crate::sync::atomic::{AtomicUsize, Ordering::Relaxed};
        let wrote = Arc::new(AtomicUsize::new(0));
        let parker = Arc::new(Parker::new());
        parker.prepare_park();
        {
            let wrote = wrote.clone();
            let parker = parker.clone();
            thread::spawn(move || {
                wrote.store(1, Relaxed);
                parker.unpark();
            });
        }
        parker.park();
        assert_eq!(wrote.load(Relaxed), 1);
    });
}

}
