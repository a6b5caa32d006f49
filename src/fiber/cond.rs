//! A condition variable usable from both fiber and non-fiber code.
//!
//! Unlike `pthread_cond`, callers don't need to hold an external mutex
//! around the wait: `Cond` just exposes `signal`/`broadcast` and
//! `wait`/`wait_timeout`. Internally it tracks a generation counter behind a
//! small private mutex so spurious wakeups (always possible with condition
//! variables) are never mistaken for a real signal.

use std::sync::{Condvar as OsCondvar, Mutex};
use std::time::{Duration, Instant};

use crate::fiber::scheduler;

/// A condition variable whose `wait` suspends the current fiber (if a
/// scheduler is installed on the calling thread) rather than the OS thread,
/// and degrades to a plain OS wait otherwise.
pub struct Cond {
    generation: Mutex<u64>,
    os_cond: OsCondvar,
}

impl Cond {
    pub fn new() -> Self {
        Self { generation: Mutex::new(0), os_cond: OsCondvar::new() }
    }

    /// Wake one fiber waiting on this condition. Does nothing if none is
    /// waiting. Never blocks.
    pub fn signal(&self) {
        let mut gen = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        *gen = gen.wrapping_add(1);
        self.os_cond.notify_one();
    }

    /// Wake every fiber waiting on this condition. Never blocks.
    pub fn broadcast(&self) {
        let mut gen = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        *gen = gen.wrapping_add(1);
        self.os_cond.notify_all();
    }

    /// Suspend the current fiber until [`signal`](Self::signal) or
    /// [`broadcast`](Self::broadcast) is called. Tolerates spurious
    /// wakeups internally — callers still must re-check their own
    /// predicate in a loop, exactly as with a standard condition variable.
    pub fn wait(&self) {
        self.wait_timeout(Duration::from_secs(u64::MAX / 2));
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout`. Returns
    /// `true` if woken by a signal, `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let guard = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        let start_gen = *guard;

        if matches!(deadline, Some(d) if Instant::now() >= d) {
            return false;
        }

        scheduler::cooperative_wait(&self.generation, guard, |mut guard| {
            loop {
                if *guard != start_gen {
                    return (guard, true);
                }
                let remaining = match deadline {
                    Some(d) => match d.checked_duration_since(Instant::now()) {
                        Some(r) => r,
                        None => return (guard, false),
                    },
                    None => Duration::from_secs(3600),
                };
                let (next_guard, timeout_result) =
                    self.os_cond.wait_timeout(guard, remaining).unwrap_or_else(|e| e.into_inner());
                guard = next_guard;
                if *guard != start_gen {
                    return (guard, true);
                }
                if timeout_result.timed_out() && deadline.is_some() {
                    return (guard, false);
                }
            }
        })
        .1
    }
}

impl Default for Cond {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cond {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cond").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn wait_timeout_returns_false_with_no_signal() {
        let cond = Cond::new();
        let start = Instant::now();
        assert!(!cond.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn wait_timeout_returns_true_when_signaled_first() {
        let cond = Arc::new(Cond::new());
        let signaler = thread::spawn({
            let cond = cond.clone();
            move || {
                thread::sleep(Duration::from_millis(20));
                cond.signal();
            }
        });
        let start = Instant::now();
        assert!(cond.wait_timeout(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
        signaler.join().unwrap();
    }

    #[test]
    fn signal_wakes_exactly_one_waiter() {
        let cond = Arc::new(Cond::new());
        let woken = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let cond = cond.clone();
                let woken = woken.clone();
                thread::spawn(move || {
                    if cond.wait_timeout(Duration::from_secs(5)) {
                        woken.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        cond.signal();
        thread::sleep(Duration::from_millis(50));
        cond.broadcast();
        for w in waiters {
            w.join().unwrap();
        }
        assert_eq!(woken.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn broadcast_wakes_every_waiter() {
        let cond = Arc::new(Cond::new());
        let woken = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let cond = cond.clone();
                let woken = woken.clone();
                thread::spawn(move || {
                    cond.wait();
                    woken.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        cond.broadcast();
        for w in waiters {
            w.join().unwrap();
        }
        assert_eq!(woken.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn wait_inside_a_fiber_yields_the_token_and_wakes_on_signal() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let cond = Arc::new(Cond::new());
        crate::fiber::start({
            let order = order.clone();
            let cond = cond.clone();
            move || {
                let waiter_order = order.clone();
                let waiter_cond = cond.clone();
                crate::fiber::spawn(move || {
                    waiter_order.lock().unwrap().push("wait-start");
                    waiter_cond.wait();
                    waiter_order.lock().unwrap().push("wait-done");
                });

                // Poll (rather than sleep) until the waiter fiber has
                // actually entered `Cond::wait` and parked on the token,
                // which it can only do by giving up the token back to this
                // fiber first — so there is no race with the signal below.
                let deadline = Instant::now() + Duration::from_secs(2);
                while !order.lock().unwrap().iter().any(|s| *s == "wait-start") {
                    assert!(Instant::now() < deadline, "waiter fiber never started waiting");
                    crate::fiber::yield_now();
                }

                order.lock().unwrap().push("signal");
                cond.signal();
            }
        });
        assert_eq!(*order.lock().unwrap(), vec!["wait-start", "signal", "wait-done"]);
    }
}
