//! Monotonic timestamps and stable per-thread identifiers (spec §4.A).

use once_cell::sync::Lazy;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Instant;

static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds elapsed since the first call into this module in the
/// process. Calls from different threads that do not overlap in time are
/// guaranteed to observe a happens-before ordering; concurrent calls may
/// return values in either order.
pub fn now_ns() -> u64 {
    ORIGIN.elapsed().as_nanos() as u64
}

/// A stable numeric identifier for the calling OS thread, unique within
/// this process. Not portable across processes or platforms.
pub fn thread_id() -> u64 {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ns_is_non_decreasing_within_a_thread() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn thread_id_is_stable_for_the_current_thread() {
        assert_eq!(thread_id(), thread_id());
    }

    #[test]
    fn thread_id_differs_across_threads() {
        let main_id = thread_id();
        let spawned_id = std::thread::spawn(thread_id).join().unwrap();
        assert_ne!(main_id, spawned_id);
    }
}
