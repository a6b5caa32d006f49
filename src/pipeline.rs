//! Request/response correlation across a pair of [`Envelope`] channels.
//!
//! A [`MessagePipeline`] pairs a `consumer` channel (client to server) with a
//! `producer` channel (server to client) and layers request-id matching on
//! top: [`query`](MessagePipeline::query) stamps a command with a fresh id,
//! sends it on `consumer`, then polls `producer` with non-blocking
//! `try_recv` calls, yielding the fiber between attempts, until a response
//! carrying the same id shows up or `timeout` elapses. Only one `query` may
//! be outstanding at a time per pipeline — a second concurrent call is a
//! programmer error, not a queued one, and any reply that doesn't match the
//! single outstanding request is logged and discarded rather than buffered.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::channel::{Channel, Receiver, Sender, TryRecvError};
use crate::error::{Error, Result};
use crate::fiber;
use crate::message::{Command, Envelope, Response};

/// Pipelines are always handed around behind an `Arc`: the client side that
/// calls [`query`](MessagePipeline::query) and the server-side dispatch
/// fiber spawned in reaction to `Envelope::CreatePipe` (that fiber is user
/// code; see `SPEC_FULL.md` §6) share the same instance.
pub type PipelineHandle = Arc<MessagePipeline>;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Process-global, per `SPEC_FULL.md` §9: a single counter shared by every
/// pipeline rules out id collisions between pipelines that happen to share a
/// dispatch thread.
fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Derive this OS thread's pipeline name: a hex rendering of its
/// [`std::thread::ThreadId`]. Stable's `ThreadId` exposes no public integer,
/// so the id is hashed instead of formatted directly; it is still stable for
/// the thread's lifetime, which is all the naming contract requires.
pub fn current_thread_pipeline_name() -> String {
    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

struct Lifecycle {
    closed: bool,
    busy: bool,
    closing_soon: bool,
}

/// A paired request/response link with id-matched `query` semantics,
/// joined to a server's inbox (`root`) on [`open`](Self::open).
pub struct MessagePipeline {
    name: String,
    root: Sender<Envelope>,
    consumer_tx: Sender<Envelope>,
    consumer_rx: Receiver<Envelope>,
    producer_tx: Sender<Envelope>,
    producer_rx: Receiver<Envelope>,
    lifecycle: Mutex<Lifecycle>,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl MessagePipeline {
    /// Construct and immediately open a pipeline to `root`: sends
    /// `CreatePipe{self}` on `root` so the server can spawn a dispatch fiber
    /// (via [`consumer_receiver`](Self::consumer_receiver) and
    /// [`reply`](Self::reply)), then flips the pipeline to `Open`.
    pub fn open(name: impl Into<String>, root: Sender<Envelope>) -> PipelineHandle {
        Self::open_with_capacity(name, root, crate::spawn::DEFAULT_INBOX_CAPACITY)
    }

    pub fn open_with_capacity(name: impl Into<String>, root: Sender<Envelope>, capacity: usize) -> PipelineHandle {
        let name = name.into();
        let (consumer_tx, consumer_rx) = Channel::new(capacity);
        let (producer_tx, producer_rx) = Channel::new(capacity);
        let pipeline = Arc::new(MessagePipeline {
            name,
            root,
            consumer_tx,
            consumer_rx,
            producer_tx,
            producer_rx,
            lifecycle: Mutex::new(Lifecycle { closed: true, busy: false, closing_soon: false }),
            on_close: Mutex::new(None),
        });

        if let Err(e) = pipeline.root.send(Envelope::CreatePipe(pipeline.clone())) {
            log::warn!("pipeline {:?} failed to open: root inbox closed ({e:?})", pipeline.name);
        }
        pipeline.lifecycle.lock().unwrap_or_else(|e| e.into_inner()).closed = false;

        pipeline
    }

    /// Run a callback once [`close`](Self::close) transitions this pipeline
    /// to `Closed`. Only the most recently set callback fires.
    pub fn set_on_close(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_close.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(callback));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    pub fn is_busy(&self) -> bool {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()).busy
    }

    pub fn is_closing_soon(&self) -> bool {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()).closing_soon
    }

    pub fn set_closing_soon(&self, value: bool) {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()).closing_soon = value;
    }

    pub fn next_id(&self) -> u64 {
        next_request_id()
    }

    /// The receiving end of the client-to-server channel, for the
    /// server-side dispatch fiber spawned in reaction to `CreatePipe` to
    /// read `Command`s from. Cloning the channel handle is cheap; the
    /// underlying channel still delivers each message to exactly one
    /// receiver.
    pub fn consumer_receiver(&self) -> Receiver<Envelope> {
        self.consumer_rx.clone()
    }

    /// Send `method(args)` on the consumer channel and block, cooperatively
    /// yielding between poll attempts, for up to `timeout` for a matching
    /// reply on the producer channel. A reply whose id doesn't match is
    /// logged and discarded — this pipeline assumes a single request is ever
    /// in flight, guarded by `busy`.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline is closed, or if another `query` is already in
    /// flight on this pipeline: both are programmer errors, not recoverable
    /// runtime states (`SPEC_FULL.md` §4.5, §9).
    pub fn query(&self, method: impl Into<String>, args: impl Into<String>, timeout: Duration) -> Result<Response> {
        {
            let mut lc = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            assert!(!lc.closed, "query() called on a closed pipeline {:?}", self.name);
            assert!(!lc.busy, "query() called while another query is in flight on pipeline {:?}", self.name);
            lc.busy = true;
        }
        let result = self.query_inner(method.into(), args.into(), timeout);
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()).busy = false;
        result
    }

    fn query_inner(&self, method: String, args: String, timeout: Duration) -> Result<Response> {
        let id = next_request_id();
        let command = Envelope::Command(Command { sender: self.producer_tx.clone(), id, method, args });
        self.consumer_tx.send(command)?;

        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.producer_rx.try_recv() {
                Ok(Envelope::Response(response)) if response.id == id => return Ok(response),
                Ok(Envelope::Response(stale)) => {
                    log::warn!("pipeline {:?} discarding stale response for request {}", self.name, stale.id);
                }
                Ok(other) => {
                    log::warn!("pipeline {:?} ignoring unexpected envelope while awaiting a reply: {other:?}", self.name);
                }
                Err(TryRecvError::Disconnected) => return Err(Error::ChannelClosed),
                Err(TryRecvError::Empty) => {}
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    log::debug!("pipeline {:?} query {} timed out after {timeout:?}", self.name, id);
                    return Ok(Response::timeout(id));
                }
            }
            fiber::yield_now();
        }
    }

    /// Answer a query previously received through this pipeline's
    /// [`consumer_receiver`](Self::consumer_receiver). Called by the
    /// server-side dispatch fiber, not by the client that calls `query`.
    ///
    /// # Panics
    ///
    /// Panics if the pipeline has already been closed.
    pub fn reply(&self, response: Response) -> Result<()> {
        assert!(!self.is_closed(), "reply() called on a closed pipeline {:?}", self.name);
        self.producer_tx.send(Envelope::Response(response)).map_err(Error::from)
    }

    /// Close the pipeline: sends `DestroyPipe` on the consumer channel so
    /// the server's dispatch fiber can tear itself down, flips the pipeline
    /// to `Closed`, and fires the `on_close` callback if one was set.
    pub fn close(&self) {
        let mut lc = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        if lc.closed {
            return;
        }
        lc.closed = true;
        drop(lc);

        let _ = self.consumer_tx.send(Envelope::DestroyPipe);
        if let Some(callback) = self.on_close.lock().unwrap_or_else(|e| e.into_inner()).take() {
            callback();
        }
    }
}

impl std::fmt::Debug for MessagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePipeline")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

static PIPELINE_REGISTRY: Lazy<Mutex<HashMap<String, PipelineHandle>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Register `pipeline` under its own name so other parts of the process can
/// find it without holding onto the handle themselves.
///
/// # Errors
///
/// Returns [`Error::RegistrationFailed`] if a pipeline is already registered
/// under this name, or if `pipeline` is already closed.
pub fn register(pipeline: PipelineHandle) -> Result<()> {
    if pipeline.is_closed() {
        return Err(Error::RegistrationFailed(pipeline.name().to_string()));
    }
    let mut table = PIPELINE_REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    if table.contains_key(pipeline.name()) {
        return Err(Error::RegistrationFailed(pipeline.name().to_string()));
    }
    table.insert(pipeline.name().to_string(), pipeline);
    Ok(())
}

pub fn unregister(name: &str) -> Option<PipelineHandle> {
    PIPELINE_REGISTRY.lock().unwrap_or_else(|e| e.into_inner()).remove(name)
}

/// Look up a previously [`register`]ed pipeline by name. A closed pipeline
/// is pruned on lookup rather than returned.
pub fn locate(name: &str) -> Option<PipelineHandle> {
    let mut table = PIPELINE_REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    match table.get(name) {
        Some(p) if p.is_closed() => {
            table.remove(name);
            None
        }
        Some(p) => Some(p.clone()),
        None => None,
    }
}

/// Look up the pipeline registered under the calling thread's own
/// [`current_thread_pipeline_name`].
pub fn locate_current() -> Option<PipelineHandle> {
    locate(&current_thread_pipeline_name())
}
