//! Demo agents wired up by `airobot run`.
//!
//! - [`EchoHandler`] logs every message it consumes.
//! - [`TallyHandler`] counts messages per method and exposes a snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use airobot_kernel::{Handler, Message};
use tracing::info;

// ---------------------------------------------------------------------------
// Echo
// ---------------------------------------------------------------------------

/// Logs each message at `info` level.
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&self, message: Message) {
        info!(
            request_id = message.request_id(),
            sender_id = message.sender_id(),
            method = %message.method(),
            priority = message.priority(),
            payload = %message.payload(),
            "echo"
        );
    }
}

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

/// Per-method message counts, shared between the handler and the caller.
pub type Tally = Arc<Mutex<BTreeMap<String, usize>>>;

/// Counts consumed messages by method.
pub struct TallyHandler {
    counts: Tally,
}

impl TallyHandler {
    /// Create a handler and return the shared counter it writes to.
    pub fn new() -> (Self, Tally) {
        let counts: Tally = Arc::default();
        (
            Self {
                counts: Arc::clone(&counts),
            },
            counts,
        )
    }
}

impl Handler for TallyHandler {
    fn handle(&self, message: Message) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        *counts.entry(message.method().to_string()).or_default() += 1;
    }
}

/// Copy the current counts out of a [`Tally`].
pub fn snapshot(tally: &Tally) -> BTreeMap<String, usize> {
    tally
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_by_method() {
        let (handler, tally) = TallyHandler::new();
        for method in ["train", "predict", "train"] {
            handler.handle(Message::from_kernel(1, method, 0));
        }
        let counts = snapshot(&tally);
        assert_eq!(counts.get("train"), Some(&2));
        assert_eq!(counts.get("predict"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn echo_accepts_any_message() {
        EchoHandler.handle(Message::new(2, 1, "anything", -3).with_payload("x".into()));
    }
}
