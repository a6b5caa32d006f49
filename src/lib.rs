//! In-process actor-style messaging: bounded closable channels, a
//! cooperative fiber scheduler, a process-wide named channel registry, and
//! a request/response [`pipeline`] built on top of them.
//!
//! ```no_run
//! use fiberbus::channel::Channel;
//! use fiberbus::fiber;
//!
//! fiber::start(|| {
//!     let (tx, rx) = Channel::new(4);
//!     fiber::spawn(move || {
//!         tx.send("hello").unwrap();
//!     });
//!     assert_eq!(rx.recv().unwrap(), "hello");
//! });
//! ```

pub mod channel;
pub mod error;
pub mod fiber;
pub mod message;
pub mod pipeline;
pub mod registry;
pub mod spawn;

pub use error::{Error, Result};

/// Shorthand used in a few places where carrying the error type along
/// would be noise.
pub type StdResult<T, E> = std::result::Result<T, E>;
