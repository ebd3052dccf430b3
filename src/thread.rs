#![allow(unused_imports)]
cfg_loom! {
    pub(crate) use loom::thread::yield_now;
    /*loom threads are real OS threads driven one at a time,
     *so thread identity can stay the host's.*/
    pub(crate) use std::thread::{current, ThreadId};
}

cfg_not_loom! {
    pub(crate) use std::thread::{current, yield_now, ThreadId};
}
