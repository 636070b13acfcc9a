//! Directed messages between agents.
//!
//! A [`Message`] is an immutable value: once built, its fields are only
//! reachable through accessors.  The one exception is the request id, which
//! the kernel stamps when the message is posted.

use serde::{Deserialize, Serialize};

/// Kernel-assigned agent identifier.  Ids start at 1.
pub type AgentId = u64;

/// Kernel-assigned request identifier.  Ids start at 1; `0` means the message
/// has not been posted yet.
pub type RequestId = u64;

/// Sender id used for messages that originate from the kernel itself rather
/// than from a registered agent.
pub const KERNEL_SENDER: AgentId = 0;

/// A directed request from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    sender_id: AgentId,
    target_id: AgentId,
    method: String,
    #[serde(default)]
    request_id: RequestId,
    priority: i32,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Message {
    /// Build a message from `sender_id` to `target_id`.
    ///
    /// Lower `priority` values are dispatched first.
    #[must_use]
    pub fn new(
        sender_id: AgentId,
        target_id: AgentId,
        method: impl Into<String>,
        priority: i32,
    ) -> Self {
        Self {
            sender_id,
            target_id,
            method: method.into(),
            request_id: 0,
            priority,
            payload: serde_json::Value::Null,
        }
    }

    /// Build a kernel-originated message.
    #[must_use]
    pub fn from_kernel(target_id: AgentId, method: impl Into<String>, priority: i32) -> Self {
        Self::new(KERNEL_SENDER, target_id, method, priority)
    }

    /// Attach an opaque payload.  The kernel never looks inside it.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn sender_id(&self) -> AgentId {
        self.sender_id
    }

    pub fn target_id(&self) -> AgentId {
        self.target_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// `0` until the message has been posted.
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// True when no registered agent sent this message.
    pub fn is_from_kernel(&self) -> bool {
        self.sender_id == KERNEL_SENDER
    }

    pub(crate) fn stamp(&mut self, request_id: RequestId) {
        self.request_id = request_id;
    }
}
