use crate::sync::{Condvar, Mutex, MutexGuard};

/// The blocking half of a park/unpark handshake, one per waiting thread.
///
/// A queue holder arms the parker with [`prepare_park`](Parker::prepare_park)
/// while holding the lock that also serialises [`unpark`](Parker::unpark)
/// callers, then blocks in [`park`](Parker::park) after dropping that lock.
/// The flag lives inside the mutex, so an unpark that fires in the window
/// between arming and sleeping is never lost: `park` re-checks the flag
/// under the mutex before every wait.
pub(crate) struct Parker {
    should_park: Mutex<bool>,
    condition: Condvar,
}

impl Parker {
    #[cfg(not(feature = "loom"))]
    pub(crate) const fn new() -> Self {
        Self {
            should_park: Mutex::new(false),
            condition: Condvar::new(),
        }
    }
    #[cfg(feature = "loom")]
    pub(crate) fn new() -> Self {
        Self {
            should_park: Mutex::new(false),
            condition: Condvar::new(),
        }
    }

    /// Arms the parker so that the next call to `park` blocks.
    ///
    /// Callers arm while holding the queue lock that makes this parker
    /// reachable to unparkers; once the lock is dropped, an unpark may
    /// legally race ahead of `park`.
    pub(crate) fn prepare_park(&self) {
        *self.flag() = true;
    }

    /// Blocks until some thread runs `unpark`.
    ///
    /// Returns immediately if the parker was never armed, or if the matching
    /// unpark already happened. Spurious condvar wakeups re-check the flag.
    pub(crate) fn park(&self) {
        let mut should_park = self.flag();
        while *should_park {
            should_park = match self.condition.wait(should_park) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Releases the parked (or about-to-park) thread.
    /*Notify while still holding the mutex: the waiter can't slip between
     *our store and our signal, because it has to reacquire the mutex to
     *re-check the flag.*/
    pub(crate) fn unpark(&self) {
        let mut should_park = self.flag();
        *should_park = false;
        self.condition.notify_all();
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        //Panics don't cross the handshake, so poison carries no information.
        match self.should_park.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests;
