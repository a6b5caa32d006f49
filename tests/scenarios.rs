//! End-to-end scenarios mirroring the literal walkthroughs in
//! `SPEC_FULL.md` §8: a worker built purely out of this crate's public
//! primitives, driven the way an embedding application would drive it.

use std::time::{Duration, Instant};

use fiberbus::channel::{Channel, Receiver, Sender};
use fiberbus::message::{Command, Envelope, Response, Status, TimeDirective};
use fiberbus::pipeline::MessagePipeline;
use fiberbus::{registry, spawn};

/// A worker that answers `method = "pow"` with the square of `args`,
/// respects `TimeDirective` sleep-and-{queue,drop} semantics, and terminates
/// on `Shutdown`. This is the kind of handler loop `SPEC_FULL.md` §6
/// describes as user code built on top of the core, not part of it.
fn pow_worker(inbox: Receiver<Envelope>) {
    loop {
        match inbox.recv() {
            Ok(Envelope::Command(cmd)) => dispatch_pow(cmd),
            Ok(Envelope::TimeDirective(directive)) => sleep_and_drain(&inbox, directive),
            Ok(Envelope::Shutdown) | Err(_) => return,
            Ok(_other) => {}
        }
    }
}

fn dispatch_pow(cmd: Command) {
    let n: i64 = cmd.args.parse().unwrap_or(0);
    let response = Response::success(cmd.id, (n * n).to_string());
    let _ = cmd.sender.send(Envelope::Response(response));
}

fn sleep_and_drain(inbox: &Receiver<Envelope>, directive: TimeDirective) {
    let deadline = Instant::now() + directive.duration;
    let mut queued = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match inbox.recv_timeout(remaining) {
            Ok(Envelope::Command(cmd)) => {
                if !directive.drop {
                    queued.push(cmd);
                }
            }
            Ok(Envelope::Shutdown) => return,
            Ok(_other) => {}
            Err(_) => break,
        }
    }
    for cmd in queued {
        dispatch_pow(cmd);
    }
}

fn command(sender: Sender<Envelope>, id: u64, method: &str, args: &str) -> Envelope {
    Envelope::Command(Command { sender, id, method: method.to_string(), args: args.to_string() })
}

/// S1: pow round-trip, then a clean shutdown.
#[test]
fn s1_pow_round_trip() {
    let worker = spawn::spawn_thread("s1-pow", pow_worker);
    let (client_tx, client_rx) = Channel::new(1);

    worker.send(command(client_tx, 0, "pow", "2")).unwrap();
    let response = client_rx.recv_timeout(Duration::from_secs(1)).unwrap();
    match response {
        Envelope::Response(Response { status: Status::Success, id: 0, data }) => assert_eq!(data, "4"),
        other => panic!("unexpected reply: {other:?}"),
    }

    worker.send(Envelope::Shutdown).unwrap();
}

/// S2: a `TimeDirective{drop: false}` queues commands that arrive during the
/// sleep window and dispatches them, in order, once it elapses.
#[test]
fn s2_sleep_and_queue() {
    let worker = spawn::spawn_thread("s2-sleep-queue", pow_worker);
    let (client_tx, client_rx) = Channel::new(4);

    worker.send(Envelope::TimeDirective(TimeDirective { duration: Duration::from_millis(200), drop: false })).unwrap();
    for id in 1..=3u64 {
        worker.send(command(client_tx.clone(), id, "pow", "3")).unwrap();
    }

    assert_eq!(client_rx.recv_timeout(Duration::from_millis(50)), Err(fiberbus::channel::RecvError::Timeout(Duration::ZERO)));

    let mut responses = Vec::new();
    for _ in 0..3 {
        match client_rx.recv_timeout(Duration::from_millis(500)).unwrap() {
            Envelope::Response(r) => responses.push(r),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
    let ids: Vec<u64> = responses.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(responses.iter().all(|r| r.status == Status::Success && r.data == "9"));

    worker.send(Envelope::Shutdown).unwrap();
}

/// S3: same setup as S2, but `drop: true` — commands that arrive during the
/// sleep window vanish instead of queueing.
#[test]
fn s3_sleep_and_drop() {
    let worker = spawn::spawn_thread("s3-sleep-drop", pow_worker);
    let (client_tx, client_rx) = Channel::new(4);

    worker.send(Envelope::TimeDirective(TimeDirective { duration: Duration::from_millis(150), drop: true })).unwrap();
    for id in 1..=3u64 {
        worker.send(command(client_tx.clone(), id, "pow", "3")).unwrap();
    }

    assert_eq!(
        client_rx.recv_timeout(Duration::from_millis(400)),
        Err(fiberbus::channel::RecvError::Timeout(Duration::ZERO)),
        "dropped commands must never produce a response"
    );

    worker.send(Envelope::Shutdown).unwrap();
}

/// S4: a receiver blocked on an empty channel wakes with `ChannelClosed`
/// within bounded time once another thread closes the channel.
#[test]
fn s4_close_wakes_receive() {
    let (tx, rx) = Channel::<()>::new(0);
    let started = Instant::now();
    let handle = std::thread::spawn(move || rx.recv());
    std::thread::sleep(Duration::from_millis(10));
    tx.close();
    let result = handle.join().unwrap();
    assert!(matches!(result, Err(fiberbus::channel::RecvError::Disconnected)));
    assert!(started.elapsed() < Duration::from_millis(50));
}

/// S5: registry name uniqueness, lookup, and removal.
#[test]
fn s5_registry_uniqueness() {
    let (ch1, _rx1) = Channel::new(1);
    let (ch2, _rx2) = Channel::new(1);
    let name = "s5-registry-uniqueness";

    registry::register(name, ch1).unwrap();
    assert!(matches!(registry::register(name, ch2), Err(fiberbus::Error::RegistrationFailed(_))));
    assert!(registry::locate(name).is_some());
    assert!(registry::unregister(name).is_some());
    assert!(registry::locate(name).is_none());
}

/// S6: a pipeline `query` against a server that never replies returns a
/// synthesized `Timeout` response within the requested bound, and the
/// pipeline itself remains open afterward.
#[test]
fn s6_pipeline_query_timeout() {
    let (root_tx, _root_rx) = Channel::new(1);
    let pipeline = MessagePipeline::open("s6-timeout", root_tx);

    let started = Instant::now();
    let response = pipeline.query("anything", "", Duration::from_millis(100)).unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status, Status::Timeout);
    assert!(elapsed < Duration::from_millis(150), "query took {elapsed:?}");
    assert!(!pipeline.is_closed());

    pipeline.close();
}
