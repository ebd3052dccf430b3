#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
// loom integration
#[doc(hidden)]
macro_rules! cfg_loom {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "loom")]
            $item
        )*
    };
}
#[doc(hidden)]
macro_rules! cfg_not_loom {
    ($($item:item)*) => {
        $(
            #[cfg(not(feature = "loom"))]
            $item
        )*
    };
}

#[doc(hidden)]
mod cell;
#[doc(hidden)]
mod sync;
#[doc(hidden)]
mod thread;
//loom integration finished.

mod util;

/// A module containing the one-byte adaptive mutex.
pub mod lock;

/// A module containing the RAII holders for the crate's locks.
pub mod locker;

/// A module containing the process-wide thread parking service.
pub mod parking_lot;

/// A module containing the pointer-sized adaptive mutex.
pub mod word_lock;

#[doc(inline)]
pub use lock::Lock;
#[doc(inline)]
pub use locker::{LockHolder, Lockable, Locker, WordLockHolder};
#[doc(inline)]
pub use parking_lot::{for_each, park_conditionally, unpark_all, unpark_one};
#[doc(inline)]
pub use word_lock::WordLock;
