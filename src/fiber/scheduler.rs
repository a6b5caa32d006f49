//! The cooperative scheduler.
//!
//! A [`Scheduler`] multiplexes a set of fibers so that, observably, only one
//! of them ever runs at a time, in round-robin order, with no preemption.
//! Real stackful fibers (many fibers sharing one OS thread) have no
//! safe-Rust equivalent that doesn't also force every fiber body to become
//! `async`, which an external interface built on ordinary blocking
//! `send`/`receive` rules out. Instead every fiber gets its own backing OS
//! thread, and a run token — handed off round-robin at each suspension
//! point — enforces that at most one of them executes user code at any
//! instant. Parked fibers block on a real condition variable rather than
//! spin.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use std::cell::RefCell;

/// Identifies one fiber within its owning [`Scheduler`]. Stable for the
/// fiber's lifetime; never reused within a single scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(u64);

struct State {
    ready: VecDeque<FiberId>,
    current: Option<FiberId>,
    live: usize,
}

/// The per-scheduler run queue and run-token bookkeeping.
///
/// Not exposed directly to users: reached through [`current`], [`start`],
/// [`spawn`][crate::fiber::spawn], [`yield_now`][crate::fiber::yield_now].
pub struct Scheduler {
    state: Mutex<State>,
    turn: Condvar,
    next_id: AtomicU64,
}

thread_local! {
    static CURRENT: RefCell<Option<(Arc<Scheduler>, FiberId)>> = RefCell::new(None);
}

fn set_current(value: Option<(Arc<Scheduler>, FiberId)>) {
    CURRENT.with(|c| *c.borrow_mut() = value);
}

/// The scheduler and fiber id installed on the calling OS thread, if any.
///
/// Every primitive in this crate that needs to "park the fiber, not the OS
/// thread" (channels, [`Cond`](super::Cond)) consults this on every wait,
/// so the same code works correctly whether or not a scheduler happens to
/// be installed on the calling thread.
pub fn current() -> Option<(Arc<Scheduler>, FiberId)> {
    CURRENT.with(|c| c.borrow().clone())
}

impl Scheduler {
    fn alloc_id(&self) -> FiberId {
        FiberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Join the ready queue: become the running fiber immediately if no
    /// other fiber is running, otherwise queue up at the back.
    fn join_ready_queue(&self, id: FiberId) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if st.current.is_none() {
            st.current = Some(id);
        } else {
            st.ready.push_back(id);
        }
        self.turn.notify_all();
    }

    fn wait_for_turn(&self, id: FiberId) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while st.current != Some(id) {
            st = self.turn.wait(st).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Join the ready queue and block until it is this fiber's turn.
    pub(crate) fn acquire_token(&self, id: FiberId) {
        self.join_ready_queue(id);
        self.wait_for_turn(id);
    }

    /// Hand the run token to the next ready fiber (or release it entirely
    /// if none is ready). Never blocks.
    pub(crate) fn release_token(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.current = st.ready.pop_front();
        self.turn.notify_all();
    }

    /// Cooperative yield: go to the back of the ready queue and wait to be
    /// scheduled again.
    pub(crate) fn yield_now(&self, id: FiberId) {
        self.release_token();
        self.acquire_token(id);
    }

    fn finish(&self, id: FiberId) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        debug_assert_eq!(st.current, Some(id), "a fiber finished without holding the run token");
        st.live -= 1;
        st.current = st.ready.pop_front();
        self.turn.notify_all();
    }

    fn wait_until_drained(&self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while st.live != 0 {
            st = self.turn.wait(st).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Enqueue a new fiber running `f` on its own backing thread.
    pub fn spawn<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.alloc_id();
        {
            let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
            st.live += 1;
        }
        let scheduler = self.clone();
        std::thread::Builder::new()
            .name(format!("fiber-{}", id.0))
            .spawn(move || run_fiber(scheduler, id, f))
            .expect("failed to spawn fiber thread");
    }
}

fn run_fiber<F: FnOnce() + Send + 'static>(scheduler: Arc<Scheduler>, id: FiberId, f: F) {
    set_current(Some((scheduler.clone(), id)));
    scheduler.join_ready_queue(id);
    scheduler.wait_for_turn(id);
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    scheduler.finish(id);
    set_current(None);
    if let Err(payload) = result {
        log_fiber_panic(id, payload);
    }
}

fn log_fiber_panic(id: FiberId, payload: Box<dyn Any + Send>) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_string());
    log::error!("fiber {:?} panicked: {}", id, message);
}

/// Consume the calling OS thread as the root fiber of a fresh scheduler,
/// running `entry` and every fiber it (transitively) spawns to completion.
/// Returns once the root and all spawned fibers have finished.
///
/// # Panics
///
/// Propagates a panic from `entry` itself to the caller, after every
/// spawned fiber has also finished running.
pub fn start<F>(entry: F)
where
    F: FnOnce() + Send + 'static,
{
    let scheduler = Arc::new(Scheduler {
        state: Mutex::new(State { ready: VecDeque::new(), current: None, live: 0 }),
        turn: Condvar::new(),
        next_id: AtomicU64::new(0),
    });
    let root_id = scheduler.alloc_id();
    {
        let mut st = scheduler.state.lock().unwrap_or_else(|e| e.into_inner());
        st.live += 1;
    }
    set_current(Some((scheduler.clone(), root_id)));
    scheduler.acquire_token(root_id);

    let result = panic::catch_unwind(AssertUnwindSafe(entry));
    scheduler.finish(root_id);
    scheduler.wait_until_drained();
    set_current(None);

    if let Err(payload) = result {
        panic::resume_unwind(payload);
    }
}

/// Release the run token, run `park` (expected to genuinely block the
/// calling OS thread) while `mutex` is unlocked for the `park(...)` call,
/// then wait to be scheduled again before returning, relocking `mutex`.
/// When no scheduler is installed this degrades to just running `park`.
///
/// `park` must return whether it actually blocked (true) or found the
/// answer without blocking (false) alongside its guard; either way, the
/// guard it returns is dropped *before* this function blocks on
/// [`Scheduler::acquire_token`] so an unrelated fiber scheduled in the
/// meantime can still lock `mutex` (`SPEC_FULL.md` §5: "never wait on a
/// condition while holding an unrelated lock").
pub(crate) fn cooperative_wait<'a, T>(
    mutex: &'a Mutex<T>,
    guard: MutexGuard<'a, T>,
    park: impl FnOnce(MutexGuard<'a, T>) -> (MutexGuard<'a, T>, bool),
) -> (MutexGuard<'a, T>, bool) {
    match current() {
        Some((scheduler, id)) => {
            scheduler.release_token();
            let (guard, timed_out) = park(guard);
            drop(guard);
            scheduler.acquire_token(id);
            (mutex.lock().unwrap_or_else(|e| e.into_inner()), timed_out)
        }
        None => park(guard),
    }
}
