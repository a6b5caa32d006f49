//! Cooperative multitasking module.
//!
//! With the fiber module you can:
//! - run user code as lightweight, non-preemptive fibers via [`start`] and
//!   [`spawn`],
//! - cooperatively give up the CPU with [`yield_now`] or [`sleep`],
//! - synchronize fibers with [`Cond`], a condition variable that suspends
//!   the calling fiber rather than its backing OS thread.

mod cond;
pub mod scheduler;

pub use cond::Cond;
pub use scheduler::FiberId;

use std::time::Duration;

/// Consume the calling OS thread as the root fiber of a fresh scheduler,
/// running `entry` and everything it spawns to completion. See
/// [`scheduler::start`].
pub fn start<F>(entry: F)
where
    F: FnOnce() + Send + 'static,
{
    scheduler::start(entry)
}

/// Enqueue a new fiber running `f` on the scheduler installed on the
/// calling thread.
///
/// # Panics
///
/// Panics if no scheduler is installed on the calling thread (i.e. this
/// isn't being called from within [`start`]).
pub fn spawn<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    let (scheduler, _id) =
        scheduler::current().expect("fiber::spawn called without an active scheduler");
    scheduler.spawn(f);
}

/// Cooperative yield: the current fiber goes to the back of the ready
/// queue. Outside of a fiber this is a plain `std::thread::yield_now`.
pub fn yield_now() {
    match scheduler::current() {
        Some((scheduler, id)) => scheduler.yield_now(id),
        None => std::thread::yield_now(),
    }
}

/// Cooperative sleep: blocks the fiber for at least `duration` without
/// blocking other fibers sharing its scheduler. Outside of a fiber this is
/// a plain `std::thread::sleep`.
pub fn sleep(duration: Duration) {
    match scheduler::current() {
        Some((scheduler, id)) => {
            scheduler.release_token();
            std::thread::sleep(duration);
            scheduler.acquire_token(id);
        }
        None => std::thread::sleep(duration),
    }
}

/// `true` if a scheduler is installed on the calling thread.
pub fn is_fiber() -> bool {
    scheduler::current().is_some()
}
