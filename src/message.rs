//! The message envelope.
//!
//! [`Envelope`] is the single value type that ever travels over a
//! [`Channel`](crate::channel::Channel). It is a plain tagged union: owned by
//! whoever constructed it, moved by `send`, owned by the receiver after
//! `receive`. Variants are matched by tag, never inspected via any kind of
//! runtime type check.

use std::time::Duration;

use crate::channel::Sender;
use crate::pipeline::PipelineHandle;

/// The outcome of a [`Command`], carried back on the sender's channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Failed,
    Timeout,
    Success,
}

/// A request: "run `method` with `args`, and reply to `sender` tagging the
/// reply with `id`".
#[derive(Debug, Clone)]
pub struct Command {
    pub sender: Sender<Envelope>,
    pub id: u64,
    pub method: String,
    pub args: String,
}

/// The reply to a [`Command`], matched back to it by `id`.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub id: u64,
    pub data: String,
}

impl Response {
    pub fn success(id: u64, data: impl Into<String>) -> Self {
        Self { status: Status::Success, id, data: data.into() }
    }

    pub fn failed(id: u64, data: impl Into<String>) -> Self {
        Self { status: Status::Failed, id, data: data.into() }
    }

    pub fn timeout(id: u64) -> Self {
        Self { status: Status::Timeout, id, data: String::new() }
    }
}

/// Tells a worker to suspend dispatch for `duration`. Commands that arrive
/// while sleeping are queued (`drop = false`) or discarded as they arrive
/// (`drop = true`).
#[derive(Debug, Clone, Copy)]
pub struct TimeDirective {
    pub duration: Duration,
    pub drop: bool,
}

/// Renaming hint for a stored method: `mangled_name` is how the method is
/// addressed on the wire by callers, `pretty_name` is how it should be
/// reported in logs and diagnostics.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    pub mangled_name: String,
    pub pretty_name: String,
}

/// The tagged union carried by every channel in this crate.
#[derive(Debug, Clone)]
pub enum Envelope {
    Command(Command),
    Response(Response),
    FilterSpec(FilterSpec),
    TimeDirective(TimeDirective),
    Shutdown,
    CreatePipe(PipelineHandle),
    DestroyPipe,
}

impl Envelope {
    /// `true` for variants that ask the receiver's loop to terminate.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Envelope::Shutdown)
    }
}
