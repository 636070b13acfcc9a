//! Shared helper functions used across CLI subcommands.
//!
//! Includes tracing initialization, the kernel event logger and the demo
//! workload generator.

use airobot_kernel::{AgentId, Kernel, KernelEvent, Message};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with the given default log level.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Event logger
// ---------------------------------------------------------------------------

/// Log every kernel event at `debug` level until the task is aborted.
pub fn spawn_event_logger(kernel: &Kernel) -> JoinHandle<()> {
    let mut rx = kernel.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event logger lagged behind the kernel");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &KernelEvent) {
    match event {
        KernelEvent::AgentRegistered { agent_id, name, .. } => {
            debug!(agent_id, agent = %name, "event: agent registered");
        }
        KernelEvent::AgentDeregistered { agent_id, name, .. } => {
            debug!(agent_id, agent = %name, "event: agent deregistered");
        }
        KernelEvent::MessagePosted {
            request_id,
            target_id,
            priority,
            ..
        } => {
            debug!(request_id, target_id, priority, "event: message posted");
        }
        KernelEvent::MessageDelivered {
            request_id,
            target_id,
        } => {
            debug!(request_id, target_id, "event: message delivered");
        }
        KernelEvent::MessageDropped {
            request_id,
            target_id,
            reason,
        } => {
            debug!(request_id, target_id, ?reason, "event: message dropped");
        }
        KernelEvent::KernelShutdown => debug!("event: kernel shutdown"),
    }
}

// ---------------------------------------------------------------------------
// Demo workload
// ---------------------------------------------------------------------------

const DEMO_METHODS: [&str; 3] = ["load_data", "train", "predict"];

/// Build `count` demo messages from `sender` spread round-robin over
/// `targets`, with priorities cycling through 0..4.
pub fn demo_messages(count: usize, sender: AgentId, targets: &[AgentId]) -> Vec<Message> {
    if targets.is_empty() {
        return Vec::new();
    }
    (0..count)
        .map(|i| {
            let target = targets[i % targets.len()];
            let method = DEMO_METHODS[i % DEMO_METHODS.len()];
            let priority = (i % 4) as i32;
            Message::new(sender, target, method, priority)
                .with_payload(serde_json::json!({ "step": i }))
        })
        .collect()
}

/// Post every message and return how many were accepted.
pub fn post_all(kernel: &Kernel, messages: Vec<Message>) -> usize {
    let mut accepted = 0;
    for message in messages {
        match kernel.post(message) {
            Ok(_) => accepted += 1,
            Err(e) => warn!(error = %e, "message rejected"),
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_messages_round_robin_targets() {
        let messages = demo_messages(6, 0, &[1, 2]);
        let targets: Vec<_> = messages.iter().map(Message::target_id).collect();
        assert_eq!(targets, vec![1, 2, 1, 2, 1, 2]);

        let priorities: Vec<_> = messages.iter().map(Message::priority).collect();
        assert_eq!(priorities, vec![0, 1, 2, 3, 0, 1]);
        assert_eq!(messages[4].payload()["step"], 4);
    }

    #[test]
    fn demo_messages_without_targets_is_empty() {
        assert!(demo_messages(10, 0, &[]).is_empty());
    }

    #[test]
    fn post_all_counts_rejections() {
        let kernel = Kernel::new();
        kernel.shutdown();
        assert_eq!(post_all(&kernel, demo_messages(3, 0, &[1])), 0);
    }
}
