use std::sync::{Mutex, MutexGuard};

static SCENARIOS: Mutex<()> = Mutex::new(());

/*The parking lot is process-global state: a test that asserts on queue
 *contents (or on unpark return values, which peek at whole buckets) must
 *not run while another test has threads parked.*/
pub(crate) fn exclusive_lot() -> MutexGuard<'static, ()> {
    match SCENARIOS.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
