//! The bounded, closable, fiber-aware channel.
//!
//! `Sender`/`Receiver` split with `SendError`/`RecvError`/`TrySendError`/
//! `TryRecvError` taxonomy, backed by a plain `Mutex` plus two condition
//! variables rather than any FFI runtime call: waiting fibers are parked via
//! [`crate::fiber::scheduler::cooperative_wait`], which releases the run
//! token for the duration of the wait so other fibers keep making progress.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::fiber::scheduler;

struct State<T> {
    buffer: VecDeque<T>,
    capacity: usize,
    closed: bool,
    /// Set when a capacity-0 channel has a value parked waiting for a
    /// receiver to claim it (the rendezvous case).
    rendezvous_taken: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

/// A bounded, closable channel of `T`. Capacity 0 means synchronous
/// rendezvous: `send` blocks until a receiver claims the value.
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Channel<T> {
    pub fn new(capacity: usize) -> (Sender<T>, Receiver<T>) {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                buffer: VecDeque::with_capacity(capacity.min(256)),
                capacity,
                closed: false,
                rendezvous_taken: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        });
        let chan = Channel { inner };
        (Sender { chan: chan.clone_inner() }, Receiver { chan })
    }

    fn clone_inner(&self) -> Channel<T> {
        Channel { inner: self.inner.clone() }
    }

    fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    fn close(&self) {
        let mut st = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        st.closed = true;
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    fn send(&self, mut msg: T, deadline: Option<Instant>) -> Result<(), SendError<T>> {
        let mut st = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if st.closed {
                return Err(SendError::Disconnected(msg));
            }
            let room = if st.capacity == 0 {
                !st.rendezvous_taken
            } else {
                st.buffer.len() < st.capacity
            };
            if room {
                if st.capacity == 0 {
                    st.buffer.push_back(msg);
                    st.rendezvous_taken = true;
                    self.inner.not_empty.notify_one();
                    // Rendezvous: wait for a receiver to actually take it
                    // before returning, so `send` completing really does
                    // happen-before the matching `receive` completing.
                    loop {
                        if !st.rendezvous_taken {
                            return Ok(());
                        }
                        if st.closed {
                            msg = st.buffer.pop_back().expect("rendezvous slot must hold our message");
                            st.rendezvous_taken = false;
                            self.inner.not_full.notify_all();
                            return Err(SendError::Disconnected(msg));
                        }
                        let (guard, timed_out) = wait_with_deadline(&self.inner.state, &self.inner.not_full, st, deadline);
                        st = guard;
                        if timed_out && st.rendezvous_taken {
                            // We own the slot; nobody will ever come now in
                            // time. Reclaim it so a later receiver can't
                            // pick up a half-cancelled send.
                            msg = st.buffer.pop_back().expect("rendezvous slot must hold our message");
                            st.rendezvous_taken = false;
                            self.inner.not_full.notify_all();
                            return Err(SendError::Timeout(msg));
                        }
                    }
                } else {
                    st.buffer.push_back(msg);
                    self.inner.not_empty.notify_one();
                    return Ok(());
                }
            }
            let (guard, timed_out) = wait_with_deadline(&self.inner.state, &self.inner.not_full, st, deadline);
            st = guard;
            if timed_out {
                return Err(SendError::Timeout(msg));
            }
        }
    }

    fn recv(&self, deadline: Option<Instant>) -> Result<T, RecvError> {
        let mut st = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(msg) = st.buffer.pop_front() {
                if st.capacity == 0 {
                    st.rendezvous_taken = false;
                }
                self.inner.not_full.notify_one();
                return Ok(msg);
            }
            if st.closed {
                return Err(RecvError::Disconnected);
            }
            let (guard, timed_out) = wait_with_deadline(&self.inner.state, &self.inner.not_empty, st, deadline);
            st = guard;
            if timed_out && st.buffer.is_empty() {
                return Err(RecvError::Timeout(
                    deadline.map(|d| d.saturating_duration_since(Instant::now())).unwrap_or_default(),
                ));
            }
        }
    }

    fn try_send(&self, msg: T) -> Result<(), TrySendError<T>> {
        self.send(msg, Some(Instant::now())).map_err(From::from)
    }

    fn try_recv(&self) -> Result<T, TryRecvError> {
        self.recv(Some(Instant::now())).map_err(From::from)
    }
}

/// Block on `cond`, releasing `guard`'s mutex for the duration, while
/// cooperating with an installed fiber scheduler if there is one. Returns
/// the reacquired guard and whether the wait timed out.
///
/// An already-elapsed `deadline` (the common case for `try_send`/
/// `try_recv`, and the final iteration of any `send_timeout`/
/// `recv_timeout`) returns immediately without involving the scheduler at
/// all: there is nothing to wait for, so there is no reason to release this
/// fiber's run token and risk another fiber observing `mutex` still locked
/// while this one blocks on getting the token back.
fn wait_with_deadline<'a, T>(
    mutex: &'a Mutex<State<T>>,
    cond: &Condvar,
    guard: MutexGuard<'a, State<T>>,
    deadline: Option<Instant>,
) -> (MutexGuard<'a, State<T>>, bool) {
    if let Some(deadline) = deadline {
        if Instant::now() >= deadline {
            return (guard, true);
        }
    }
    scheduler::cooperative_wait(mutex, guard, |guard| match deadline {
        None => (cond.wait(guard).unwrap_or_else(|e| e.into_inner()), false),
        Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
            None => (guard, true),
            Some(remaining) => {
                let (guard, result) = cond.wait_timeout(guard, remaining).unwrap_or_else(|e| e.into_inner());
                (guard, result.timed_out())
            }
        },
    })
}

////////////////////////////////////////////////////////////////////////////////
// Sender
////////////////////////////////////////////////////////////////////////////////

pub struct Sender<T> {
    chan: Channel<T>,
}

impl<T> Sender<T> {
    /// Block until the message is accepted or the channel is closed.
    pub fn send(&self, t: T) -> Result<(), SendError<T>> {
        self.chan.send(t, None)
    }

    /// Block until the message is accepted, the channel is closed, or
    /// `timeout` elapses.
    pub fn send_timeout(&self, t: T, timeout: Duration) -> Result<(), SendError<T>> {
        self.chan.send(t, Instant::now().checked_add(timeout))
    }

    /// Never blocks: accepts the message only if there is room right now.
    pub fn try_send(&self, t: T) -> Result<(), TrySendError<T>> {
        self.chan.try_send(t)
    }

    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    /// Close the channel: every pending and future `send`/`recv` fails or
    /// drains, per `SPEC_FULL.md` §4.1.
    pub fn close(&self) {
        self.chan.close()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self { chan: self.chan.clone_inner() }
    }
}

impl<T> std::fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").finish_non_exhaustive()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SendError<T> {
    Timeout(T),
    Disconnected(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(t) | Self::Disconnected(t) => t,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TrySendError<T> {
    Full(T),
    Disconnected(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(t) | Self::Disconnected(t) => t,
        }
    }
}

impl<T> From<SendError<T>> for TrySendError<T> {
    fn from(e: SendError<T>) -> Self {
        match e {
            SendError::Disconnected(t) => Self::Disconnected(t),
            SendError::Timeout(t) => Self::Full(t),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Receiver
////////////////////////////////////////////////////////////////////////////////

pub struct Receiver<T> {
    chan: Channel<T>,
}

impl<T> Receiver<T> {
    /// Block until a message arrives or the channel is closed and drained.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.chan.recv(None)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvError> {
        self.chan.recv(Instant::now().checked_add(timeout))
    }

    /// Never blocks: returns a message only if one is buffered right now.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.chan.try_recv()
    }

    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    pub fn close(&self) {
        self.chan.close()
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter { rx: self }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self { chan: self.chan.clone_inner() }
    }
}

impl<T> std::fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

pub struct Iter<'a, T> {
    rx: &'a Receiver<T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rx.recv().ok()
    }
}

impl<'a, T> IntoIterator for &'a Receiver<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecvError {
    Timeout(Duration),
    Disconnected,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TryRecvError {
    Empty,
    Disconnected,
}

impl From<RecvError> for TryRecvError {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Disconnected => Self::Disconnected,
            RecvError::Timeout(_) => Self::Empty,
        }
    }
}
