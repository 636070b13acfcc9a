//! airobot message kernel.
//!
//! An in-process, actor-style message kernel:
//!
//! - **[`message`]** -- Immutable directed [`Message`] values and the
//!   [`AgentId`] / [`RequestId`] identifier types.
//! - **[`agent`]** -- [`Agent`]s with a private FIFO inbox guarded by their
//!   own mutex and condition variable, and the [`Handler`] capability.
//! - **[`kernel`]** -- The [`Kernel`]: agent registry, priority-ordered
//!   global queue and the [`Kernel::run_once`] dispatch step.
//! - **[`events`]** -- Broadcast [`EventBus`] reporting registrations and
//!   message state transitions.
//! - **[`config`]** -- [`KernelConfig`] loaded from TOML.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! All public types are `Send + Sync`.  The kernel runs no thread of its own:
//! producers call [`Kernel::post`], one or more drivers call
//! [`Kernel::run_once`], and each agent drains its inbox on its own thread.

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod kernel;
pub mod message;

// Re-export the most commonly used types at the crate root for convenience.
pub use agent::{Agent, Handler};
pub use config::KernelConfig;
pub use error::{KernelError, Result};
pub use events::{EventBus, KernelEvent};
pub use kernel::{AgentInfo, Dispatch, DropReason, Kernel, KernelStats};
pub use message::{AgentId, KERNEL_SENDER, Message, RequestId};
