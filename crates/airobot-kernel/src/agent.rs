//! Addressable agents and their private inboxes.
//!
//! An [`Agent`] pairs a [`Handler`] with a FIFO inbox guarded by the agent's
//! own mutex and condition variable.  The kernel is the only writer (through
//! the crate-private `deliver`); the agent's consumer thread is the only
//! reader.
//!
//! # Consumption contract
//!
//! ```text
//! lock inbox --> wait while empty --> pop front --> unlock --> handle()
//!      ^                                                          |
//!      +----------------------------------------------------------+
//! ```
//!
//! The handler always runs with the inbox unlocked so that the kernel can keep
//! delivering while a message is being processed.  The loop ends once the
//! agent is [closed](Agent::close) and the inbox has been drained.
//!
//! # Example
//!
//! ```rust
//! # use std::sync::Arc;
//! # use airobot_kernel::{Agent, Kernel, Message};
//! let kernel = Kernel::new();
//! let agent = Arc::new(Agent::new("printer", |msg: Message| {
//!     println!("got {}", msg.method());
//! }));
//! let id = kernel.register_agent(&agent).unwrap();
//!
//! kernel.post(Message::from_kernel(id, "hello", 0)).unwrap();
//! kernel.run_once();
//!
//! agent.close();
//! assert_eq!(agent.run(), 1);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use crate::message::{AgentId, Message};

// ---------------------------------------------------------------------------
// Handler capability
// ---------------------------------------------------------------------------

/// Behaviour of an agent: what it does with each message it consumes.
///
/// The kernel never sees concrete agent types, only this capability.  Any
/// `Fn(Message) + Send + Sync` closure is a handler.
pub trait Handler: Send + Sync {
    fn handle(&self, message: Message);
}

impl<F> Handler for F
where
    F: Fn(Message) + Send + Sync,
{
    fn handle(&self, message: Message) {
        self(message)
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

struct Inbox {
    queue: VecDeque<Message>,
    closed: bool,
}

/// An addressable actor with a private inbox.
///
/// Agents are shared as `Arc<Agent>`: the application keeps the strong
/// reference and the kernel only holds a weak one, so dropping the last
/// `Arc` makes the agent unreachable for dispatch.
pub struct Agent {
    name: String,
    identity: OnceLock<AgentId>,
    inbox: Mutex<Inbox>,
    ready: Condvar,
    handler: Box<dyn Handler>,
}

impl Agent {
    /// Create an unregistered agent.
    pub fn new(name: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self {
            name: name.into(),
            identity: OnceLock::new(),
            inbox: Mutex::new(Inbox {
                queue: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            handler: Box::new(handler),
        }
    }

    /// The kernel-assigned id, or `None` before registration.
    pub fn id(&self) -> Option<AgentId> {
        self.identity.get().copied()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of delivered messages not yet consumed.
    pub fn pending(&self) -> usize {
        self.lock_inbox().queue.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_inbox().closed
    }

    /// Block until a message is available and pop it.
    ///
    /// Returns `None` once the agent has been closed and every message
    /// delivered before the close has been consumed.
    pub fn recv(&self) -> Option<Message> {
        let guard = self.lock_inbox();
        let mut inbox = self
            .ready
            .wait_while(guard, |inbox| inbox.queue.is_empty() && !inbox.closed)
            .unwrap_or_else(PoisonError::into_inner);
        inbox.queue.pop_front()
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    ///
    /// A timeout too large to express as a deadline waits without limit.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.recv();
        };
        let mut inbox = self.lock_inbox();
        loop {
            if let Some(message) = inbox.queue.pop_front() {
                return Some(message);
            }
            if inbox.closed {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            // Spurious wakeups fall through to the re-check above.
            inbox = self
                .ready
                .wait_timeout(inbox, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Pop a message without blocking.
    pub fn try_recv(&self) -> Option<Message> {
        self.lock_inbox().queue.pop_front()
    }

    /// Consume messages until the agent is closed and drained.
    ///
    /// Each message is handed to the handler with the inbox unlocked.
    /// Returns the number of messages handled.
    pub fn run(&self) -> usize {
        tracing::debug!(agent = %self.name, agent_id = ?self.id(), "agent consumer started");
        let mut handled = 0;
        while let Some(message) = self.recv() {
            self.handler.handle(message);
            handled += 1;
        }
        tracing::debug!(agent = %self.name, handled, "agent consumer stopped");
        handled
    }

    /// Signal the consumer to stop once the inbox is drained.
    ///
    /// Wakes every waiter.  Messages dispatched after the close are refused
    /// and count as drops.
    pub fn close(&self) {
        let mut inbox = self.lock_inbox();
        if !inbox.closed {
            inbox.closed = true;
            tracing::debug!(agent = %self.name, pending = inbox.queue.len(), "agent closed");
        }
        drop(inbox);
        self.ready.notify_all();
    }

    // -- Kernel-facing ------------------------------------------------------

    /// Write the kernel-assigned id.  Fails with the existing id if the agent
    /// was already registered.
    pub(crate) fn assign_id(&self, id: AgentId) -> std::result::Result<(), AgentId> {
        self.identity.set(id).map_err(|_| self.id().unwrap_or(id))
    }

    /// Append a message and wake one waiter.  Hands the message back if the
    /// inbox is closed.
    pub(crate) fn deliver(&self, message: Message) -> std::result::Result<(), Message> {
        let mut inbox = self.lock_inbox();
        if inbox.closed {
            return Err(message);
        }
        inbox.queue.push_back(message);
        drop(inbox);
        self.ready.notify_one();
        Ok(())
    }

    // A panic inside the critical sections above cannot leave the queue
    // half-updated, so poisoning is safe to ignore.
    fn lock_inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("id", &self.id())
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
