//! Error handling utils.
//!
//! Every fallible operation in this crate returns either one of the small,
//! local error enums defined next to the type that raises them
//! ([`crate::channel::SendError`], [`crate::channel::RecvError`], ...), or
//! the crate-wide [`Error`] once a caller needs to thread several of those
//! through one `?`-chain (for example a handler loop that both sends and
//! receives).
//!
//! Programmer errors — calling [`query`](crate::pipeline::MessagePipeline::query)
//! or [`reply`](crate::pipeline::MessagePipeline::reply) on a closed pipeline —
//! are not part of this enum. They panic, because the process cannot
//! reasonably continue once that invariant is violated.

use crate::channel::{RecvError, SendError, TryRecvError, TrySendError};

/// A specialized [`Result`] type for the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can cross a module boundary in this crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The channel was closed; the caller must stop using it.
    #[error("channel closed")]
    ChannelClosed,

    /// A pipeline `query` timed out before a matching response arrived.
    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A name was already registered, or the channel being registered was
    /// already closed.
    #[error("registration of {0:?} failed: name taken or channel closed")]
    RegistrationFailed(String),

    /// A background lock was poisoned by a panicking holder.
    #[error("internal lock poisoned")]
    LockPoisoned,
}

impl<T> From<SendError<T>> for Error {
    fn from(e: SendError<T>) -> Self {
        match e {
            SendError::Timeout(_) => Error::Timeout(std::time::Duration::ZERO),
            SendError::Disconnected(_) => Error::ChannelClosed,
        }
    }
}

impl From<RecvError> for Error {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Timeout(d) => Error::Timeout(d),
            RecvError::Disconnected => Error::ChannelClosed,
        }
    }
}

impl<T> From<TrySendError<T>> for Error {
    fn from(e: TrySendError<T>) -> Self {
        match e {
            TrySendError::Full(_) => Error::Timeout(std::time::Duration::ZERO),
            TrySendError::Disconnected(_) => Error::ChannelClosed,
        }
    }
}

impl From<TryRecvError> for Error {
    fn from(e: TryRecvError) -> Self {
        match e {
            TryRecvError::Empty => Error::Timeout(std::time::Duration::ZERO),
            TryRecvError::Disconnected => Error::ChannelClosed,
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned
    }
}
