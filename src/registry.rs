//! The process-wide named channel registry.
//!
//! Workers register their inbox under a name so unrelated parts of the
//! process can find them without passing `Sender` handles around by hand.
//! One name maps to at most one channel at a time; registering over an
//! existing name without first unregistering it fails rather than silently
//! replacing the old entry.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::channel::Sender;
use crate::error::{Error, Result};
use crate::message::Envelope;

static REGISTRY: Lazy<Mutex<HashMap<String, Sender<Envelope>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// Register `channel` under `name`.
///
/// # Errors
///
/// Returns [`Error::RegistrationFailed`] if `name` is already registered or
/// `channel` is already closed.
pub fn register(name: impl Into<String>, channel: Sender<Envelope>) -> Result<()> {
    let name = name.into();
    if channel.is_closed() {
        return Err(Error::RegistrationFailed(name));
    }
    let mut table = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    if table.contains_key(&name) {
        return Err(Error::RegistrationFailed(name));
    }
    table.insert(name, channel);
    Ok(())
}

/// Remove `name` from the registry, if present. Does not close the
/// channel: ownership of shutting a worker down stays with its caller.
pub fn unregister(name: &str) -> Option<Sender<Envelope>> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner()).remove(name)
}

/// Look up the channel registered under `name`, if any and if it has not
/// been closed since registration (a closed entry is treated as absent and
/// pruned).
pub fn locate(name: &str) -> Option<Sender<Envelope>> {
    let mut table = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    match table.get(name) {
        Some(sender) if sender.is_closed() => {
            table.remove(name);
            None
        }
        Some(sender) => Some(sender.clone()),
        None => None,
    }
}

/// `true` if `name` currently resolves to a live channel.
pub fn is_registered(name: &str) -> bool {
    locate(name).is_some()
}
