//! Spawning a named worker on its own OS thread.
//!
//! A "worker" in this crate is an OS thread that runs its own fiber
//! scheduler (via [`fiber::start`]) and owns one inbox channel. Callers
//! address it only through the [`Sender`] handed back by [`spawn_thread`];
//! what runs inside is free to spawn as many fibers off that single thread
//! as it likes.

use crate::channel::{Channel, Sender};
use crate::fiber;
use crate::message::Envelope;

/// Inboxes default to this capacity unless a caller asks for a different
/// bound through [`spawn_thread_with_capacity`].
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Spawn a new OS thread named `name`, install a fresh fiber scheduler on
/// it, and run `entry` as that scheduler's root fiber with its own inbox.
/// Returns the [`Sender`] side of that inbox so other threads can talk to
/// it; the `Receiver` side is handed to `entry`.
pub fn spawn_thread<F>(name: impl Into<String>, entry: F) -> Sender<Envelope>
where
    F: FnOnce(crate::channel::Receiver<Envelope>) + Send + 'static,
{
    spawn_thread_with_capacity(name, DEFAULT_INBOX_CAPACITY, entry)
}

/// Like [`spawn_thread`], but with an explicit inbox capacity.
pub fn spawn_thread_with_capacity<F>(name: impl Into<String>, capacity: usize, entry: F) -> Sender<Envelope>
where
    F: FnOnce(crate::channel::Receiver<Envelope>) + Send + 'static,
{
    let name = name.into();
    let (tx, rx) = Channel::new(capacity);
    let thread_name = name.clone();
    std::thread::Builder::new()
        .name(thread_name)
        .spawn(move || {
            fiber::start(move || entry(rx));
        })
        .unwrap_or_else(|e| panic!("failed to spawn worker thread {name:?}: {e}"));
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Envelope, Response, Status};
    use std::time::Duration;

    #[test]
    fn spawned_worker_replies_on_its_own_inbox() {
        let (reply_tx, reply_rx) = Channel::new(1);
        let worker = spawn_thread("echo", move |inbox| {
            while let Ok(envelope) = inbox.recv() {
                if envelope.is_shutdown() {
                    break;
                }
                if let Envelope::Command(cmd) = envelope {
                    let resp = Response::success(cmd.id, cmd.args.clone());
                    let _ = cmd.sender.send(Envelope::Response(resp));
                }
            }
        });

        worker
            .send(Envelope::Command(crate::message::Command {
                sender: reply_tx,
                id: 1,
                method: "echo".to_string(),
                args: "hi".to_string(),
            }))
            .unwrap();

        match reply_rx.recv_timeout(Duration::from_secs(1)).unwrap() {
            Envelope::Response(Response { status: Status::Success, id, data }) => {
                assert_eq!(id, 1);
                assert_eq!(data, "hi");
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        worker.send(Envelope::Shutdown).unwrap();
    }
}
