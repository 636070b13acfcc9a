//! The message kernel: agent registry, priority queue and dispatch step.
//!
//! # Dispatch model
//!
//! ```text
//! post() --> [global queue, ordered by (priority, post order)]
//!                       |
//!                  run_once()      (one message per call, driven externally)
//!                       |
//!          target registered and alive?
//!              yes /          \ no
//!   agent inbox (FIFO)      dropped
//! ```
//!
//! Lower priority values are more urgent.  Messages of equal priority leave
//! the queue in the order they were posted.
//!
//! # Locking
//!
//! The registry, the queue and the id counters share one kernel lock whose
//! critical sections never wait on anything.  Delivery takes the target
//! agent's own lock, and only after the kernel lock has been released, so the
//! two are never held together.  Dispatch steps are serialized by a separate
//! dispatch lock: this keeps per-agent inbox order equal to dispatch order
//! even with several drivers, while producers calling [`Kernel::post`] never
//! wait on a delivery.
//!
//! Events and statistics are updated inside the kernel critical section that
//! makes the matching change, so subscribers observe a message as posted
//! before they observe it as delivered or dropped.
//!
//! The kernel owns no thread.  Whoever embeds it decides when to call
//! [`Kernel::run_once`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent::Agent;
use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::events::{EventBus, KernelEvent};
use crate::message::{AgentId, Message, RequestId};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Why a message left the queue without reaching an inbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// The target was never registered, was deregistered, or its owner
    /// dropped it.
    UnknownTarget,
    /// The target exists but has been closed.
    InboxClosed,
}

/// Outcome of a single dispatch step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The message was appended to the target's inbox.
    Delivered {
        request_id: RequestId,
        target_id: AgentId,
    },
    /// The message was discarded.
    Dropped {
        request_id: RequestId,
        target_id: AgentId,
        reason: DropReason,
    },
}

impl Dispatch {
    pub fn request_id(&self) -> RequestId {
        match *self {
            Self::Delivered { request_id, .. } | Self::Dropped { request_id, .. } => request_id,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Registry metadata for one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub id: AgentId,
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

/// Lifetime message counters.
///
/// Kept under the kernel lock, so a snapshot never shows more messages
/// leaving the queue than entered it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelStats {
    /// Messages accepted by `post`.
    pub posted: u64,
    /// Messages moved into an inbox.
    pub delivered: u64,
    /// Messages discarded at dispatch.
    pub dropped: u64,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// A message waiting in the global queue.
///
/// `BinaryHeap` is a max-heap, so the ordering is reversed: the smallest
/// `(priority, seq)` pair compares greatest and pops first.
struct Queued {
    priority: i32,
    seq: u64,
    message: Message,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Queued {}

struct Registration {
    agent: Weak<Agent>,
    info: AgentInfo,
}

struct KernelState {
    agents: HashMap<AgentId, Registration>,
    queue: BinaryHeap<Queued>,
    next_agent_id: AgentId,
    next_request_id: RequestId,
    next_seq: u64,
    shutdown: bool,
    stats: KernelStats,
}

impl KernelState {
    fn live_agents(&self) -> usize {
        self.agents
            .values()
            .filter(|r| r.agent.strong_count() > 0)
            .count()
    }

    /// Forget entries whose agent has been dropped by its owner.
    fn prune_dropped(&mut self) {
        self.agents.retain(|_, r| r.agent.strong_count() > 0);
    }
}

/// Hand out the current value of `counter` and advance it.  Refuses instead
/// of wrapping so that an id is never issued twice.
fn take_id(counter: &mut u64, name: &'static str) -> Result<u64> {
    let id = *counter;
    *counter = id
        .checked_add(1)
        .ok_or(KernelError::IdSpaceExhausted { counter: name })?;
    Ok(id)
}

// ---------------------------------------------------------------------------
// Kernel
// ---------------------------------------------------------------------------

/// Registry of agents plus a priority-ordered global message queue.
///
/// `Send + Sync`; share it as `Arc<Kernel>`.
pub struct Kernel {
    config: KernelConfig,
    state: Mutex<KernelState>,
    /// Serializes dispatch steps.  Always taken before `state`.
    dispatch: Mutex<()>,
    /// Published to while `state` is held, so each subscriber sees events in
    /// the order the state changes happened.
    events: EventBus,
}

impl Kernel {
    /// Create a kernel with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    #[must_use]
    pub fn with_config(config: KernelConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            state: Mutex::new(KernelState {
                agents: HashMap::new(),
                queue: BinaryHeap::new(),
                next_agent_id: 1,
                next_request_id: 1,
                next_seq: 0,
                shutdown: false,
                stats: KernelStats::default(),
            }),
            dispatch: Mutex::new(()),
            events,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    // -- Registry -----------------------------------------------------------

    /// Give `agent` a fresh id and make it addressable.
    ///
    /// The kernel keeps only a weak reference; the caller owns the agent's
    /// lifetime.  Registering the same agent twice fails with
    /// [`KernelError::AlreadyRegistered`].
    pub fn register_agent(&self, agent: &Arc<Agent>) -> Result<AgentId> {
        let mut state = self.lock_state();
        if state.shutdown {
            return Err(KernelError::KernelShutdown);
        }
        if let Some(agent_id) = agent.id() {
            return Err(KernelError::AlreadyRegistered { agent_id });
        }
        state.prune_dropped();
        if self.config.max_agents > 0 && state.agents.len() >= self.config.max_agents {
            return Err(KernelError::AgentLimitReached {
                limit: self.config.max_agents,
            });
        }

        let mut next = state.next_agent_id;
        let id = take_id(&mut next, "agent")?;
        agent
            .assign_id(id)
            .map_err(|agent_id| KernelError::AlreadyRegistered { agent_id })?;
        state.next_agent_id = next;

        let name = agent.name().to_string();
        let registered_at = Utc::now();
        state.agents.insert(
            id,
            Registration {
                agent: Arc::downgrade(agent),
                info: AgentInfo {
                    id,
                    name: name.clone(),
                    registered_at,
                },
            },
        );
        self.events.publish(KernelEvent::AgentRegistered {
            agent_id: id,
            name: name.clone(),
            timestamp: registered_at,
        });
        drop(state);

        tracing::info!(agent_id = id, agent = %name, "agent registered");
        Ok(id)
    }

    /// Remove an agent from the registry.
    ///
    /// The id is retired: it is never reissued, and messages still queued
    /// for it are dropped when dispatched.
    pub fn deregister_agent(&self, agent_id: AgentId) -> Option<AgentInfo> {
        let removed = {
            let mut state = self.lock_state();
            let removed = state.agents.remove(&agent_id)?.info;
            self.events.publish(KernelEvent::AgentDeregistered {
                agent_id,
                name: removed.name.clone(),
                timestamp: Utc::now(),
            });
            removed
        };

        tracing::info!(agent_id, agent = %removed.name, "agent deregistered");
        Some(removed)
    }

    /// Look up a live agent by id.
    pub fn agent(&self, agent_id: AgentId) -> Option<Arc<Agent>> {
        self.lock_state()
            .agents
            .get(&agent_id)
            .and_then(|r| r.agent.upgrade())
    }

    /// Registry metadata for a live agent.
    pub fn agent_info(&self, agent_id: AgentId) -> Result<AgentInfo> {
        self.lock_state()
            .agents
            .get(&agent_id)
            .filter(|r| r.agent.strong_count() > 0)
            .map(|r| r.info.clone())
            .ok_or(KernelError::AgentNotFound { agent_id })
    }

    /// Metadata for every live agent, ordered by id.
    pub fn list_agents(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self
            .lock_state()
            .agents
            .values()
            .filter(|r| r.agent.strong_count() > 0)
            .map(|r| r.info.clone())
            .collect();
        agents.sort_by_key(|info| info.id);
        agents
    }

    /// Number of registered agents that are still alive.
    pub fn agent_count(&self) -> usize {
        self.lock_state().live_agents()
    }

    // -- Queue --------------------------------------------------------------

    /// Stamp `message` with a fresh request id and enqueue it.
    ///
    /// The target is not checked here; an unresolvable target is handled by
    /// the drop policy at dispatch time.
    pub fn post(&self, mut message: Message) -> Result<RequestId> {
        let sender_id = message.sender_id();
        let target_id = message.target_id();
        let priority = message.priority();
        let method = message.method().to_string();

        let request_id = {
            let mut state = self.lock_state();
            if state.shutdown {
                return Err(KernelError::KernelShutdown);
            }
            if self.config.max_pending > 0 && state.queue.len() >= self.config.max_pending {
                return Err(KernelError::QueueFull {
                    capacity: self.config.max_pending,
                });
            }

            let request_id = take_id(&mut state.next_request_id, "request")?;
            // Advances in lockstep with the request counter, which is
            // checked above, so it cannot overflow first.
            let seq = state.next_seq;
            state.next_seq += 1;

            message.stamp(request_id);
            state.queue.push(Queued {
                priority,
                seq,
                message,
            });
            state.stats.posted += 1;
            self.events.publish(KernelEvent::MessagePosted {
                request_id,
                sender_id,
                target_id,
                method: method.clone(),
                priority,
            });
            request_id
        };

        tracing::debug!(
            request_id,
            sender_id,
            target_id,
            method = %method,
            priority,
            "message posted"
        );
        Ok(request_id)
    }

    /// Number of messages waiting in the global queue.
    pub fn pending(&self) -> usize {
        self.lock_state().queue.len()
    }

    // -- Dispatch -----------------------------------------------------------

    /// Move the most urgent queued message into its target's inbox.
    ///
    /// Returns `false` if the queue was empty, in which case nothing
    /// happened.  Returns `true` if one message left the queue, whether it
    /// was delivered or dropped.
    pub fn run_once(&self) -> bool {
        self.dispatch_next().is_some()
    }

    /// Like [`run_once`](Self::run_once) but reports what happened to the
    /// message.
    pub fn dispatch_next(&self) -> Option<Dispatch> {
        let turn = self
            .dispatch
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let (message, target) = {
            let mut state = self.lock_state();
            let queued = state.queue.pop()?;
            let target_id = queued.message.target_id();
            let lookup = state.agents.get(&target_id).map(|r| r.agent.upgrade());
            let target = match lookup {
                Some(Some(agent)) => Some(agent),
                Some(None) => {
                    // Owner dropped the agent; forget the stale entry.
                    state.agents.remove(&target_id);
                    tracing::debug!(agent_id = target_id, "pruned dropped agent");
                    None
                }
                None => None,
            };
            (queued.message, target)
        };

        let request_id = message.request_id();
        let target_id = message.target_id();
        let outcome = match target {
            Some(agent) => match agent.deliver(message) {
                Ok(()) => Dispatch::Delivered {
                    request_id,
                    target_id,
                },
                Err(_) => Dispatch::Dropped {
                    request_id,
                    target_id,
                    reason: DropReason::InboxClosed,
                },
            },
            None => Dispatch::Dropped {
                request_id,
                target_id,
                reason: DropReason::UnknownTarget,
            },
        };

        {
            let mut state = self.lock_state();
            match outcome {
                Dispatch::Delivered { .. } => {
                    state.stats.delivered += 1;
                    self.events.publish(KernelEvent::MessageDelivered {
                        request_id,
                        target_id,
                    });
                }
                Dispatch::Dropped { reason, .. } => {
                    state.stats.dropped += 1;
                    self.events.publish(KernelEvent::MessageDropped {
                        request_id,
                        target_id,
                        reason,
                    });
                }
            }
        }
        drop(turn);

        match outcome {
            Dispatch::Delivered { .. } => {
                tracing::debug!(request_id, target_id, "message delivered");
            }
            Dispatch::Dropped { reason, .. } => {
                tracing::debug!(request_id, target_id, ?reason, "message dropped");
            }
        }
        Some(outcome)
    }

    /// Dispatch until the queue is empty and return how many messages left
    /// it.  Messages posted concurrently while draining are included.
    pub fn run_until_idle(&self) -> usize {
        let mut steps = 0;
        while self.run_once() {
            steps += 1;
        }
        steps
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Stop accepting new agents and messages.
    ///
    /// Already queued messages can still be dispatched.  Idempotent.
    pub fn shutdown(&self) {
        let pending = {
            let mut state = self.lock_state();
            if std::mem::replace(&mut state.shutdown, true) {
                return;
            }
            self.events.publish(KernelEvent::KernelShutdown);
            state.queue.len()
        };
        tracing::info!(pending, "kernel shutdown requested");
    }

    pub fn is_shutdown(&self) -> bool {
        self.lock_state().shutdown
    }

    /// Close every live registered agent so its consumer loop can exit.
    /// Returns how many agents were closed.
    pub fn close_agents(&self) -> usize {
        let agents: Vec<Arc<Agent>> = self
            .lock_state()
            .agents
            .values()
            .filter_map(|r| r.agent.upgrade())
            .collect();
        // Agent locks are taken only after the kernel lock is gone.
        for agent in &agents {
            agent.close();
        }
        agents.len()
    }

    // -- Observability ------------------------------------------------------

    pub fn stats(&self) -> KernelStats {
        self.lock_state().stats
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to kernel events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<KernelEvent>> {
        self.events.subscribe()
    }

    // -- Private helpers ----------------------------------------------------

    // Every mutation under this lock completes without calling out, so a
    // poisoned lock still guards consistent state.
    fn lock_state(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Kernel")
            .field("agents", &state.agents.len())
            .field("pending", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .field("stats", &state.stats)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
