//! Kernel error types.
//!
//! Every fallible public API in this crate returns [`KernelError`].  Note that
//! an unknown target at dispatch time is *not* an error: it is the drop
//! policy, reported through [`crate::kernel::Dispatch::Dropped`] instead.

use crate::message::AgentId;

/// Unified error type for the airobot message kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Registry errors ----------------------------------------------------
    /// The agent object already carries an identity from an earlier
    /// registration.
    #[error("agent already registered as {agent_id}")]
    AlreadyRegistered {
        /// The id assigned by the first registration.
        agent_id: AgentId,
    },

    /// No agent with this id is currently registered.
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: AgentId },

    /// The configured `max_agents` limit has been reached.
    #[error("agent limit reached ({limit})")]
    AgentLimitReached { limit: usize },

    // -- Queue errors -------------------------------------------------------
    /// The configured `max_pending` limit has been reached.
    #[error("message queue full ({capacity} pending)")]
    QueueFull { capacity: usize },

    /// The kernel has been shut down and will not accept new work.
    #[error("kernel is shut down")]
    KernelShutdown,

    /// A monotonically increasing id counter would overflow.  Ids are never
    /// wrapped or reused, so this is permanent: every later request for the
    /// same kind of id fails the same way for the rest of the kernel's
    /// lifetime.
    #[error("{counter} id space exhausted")]
    IdSpaceExhausted { counter: &'static str },

    // -- Configuration ------------------------------------------------------
    /// The configuration could not be read or parsed.
    #[error("invalid kernel configuration: {reason}")]
    Config { reason: String },
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
