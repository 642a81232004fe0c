//! Message Bus
//!
//! In-process agent messaging:
//! - One unbounded FIFO mailbox per agent, created on first touch
//! - Broadcast fans out to every mailbox except the sender's
//! - Type-keyed subscribers run synchronously at send time, isolated from
//!   the sender (errors and panics are logged)
//! - Recent history for conversation queries and statistics
//!
//! History is bounded, and mailboxes may be; when full, the oldest message
//! is dropped. Delivery is at-most-once. Ordering is FIFO per recipient only.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Recipient that fans out to every mailbox but the sender's
pub const BROADCAST: &str = "broadcast";

/// A message between agents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: String,
    pub content: Value,
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// Subscriber callback
pub type Subscriber = Arc<dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync>;

/// Bus statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusStats {
    pub total_messages: usize,
    pub messages_by_type: BTreeMap<String, usize>,
    pub messages_by_agent: BTreeMap<String, usize>,
    pub active_agents: usize,
}

/// Size limits for mailboxes and history
#[derive(Debug, Clone, Copy)]
pub struct BusLimits {
    /// Messages kept per mailbox. `None` leaves mailboxes unbounded.
    pub mailbox_capacity: Option<usize>,
    /// Messages kept in history
    pub history_capacity: usize,
}

impl Default for BusLimits {
    fn default() -> Self {
        Self {
            mailbox_capacity: None,
            history_capacity: 10_000,
        }
    }
}

#[derive(Default)]
struct BusState {
    queues: HashMap<String, VecDeque<Message>>,
    history: VecDeque<Message>,
    subscribers: HashMap<String, Vec<Subscriber>>,
}

/// Agent message bus
#[derive(Default)]
pub struct MessageBus {
    state: Mutex<BusState>,
    arrivals: Notify,
    limits: BusLimits,
}

/// Append, dropping from the front past `capacity`
fn push_bounded(
    queue: &mut VecDeque<Message>,
    message: Message,
    capacity: Option<usize>,
) -> bool {
    let mut dropped = false;
    while capacity.is_some_and(|cap| queue.len() >= cap.max(1)) {
        queue.pop_front();
        dropped = true;
    }
    queue.push_back(message);
    dropped
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: BusLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    /// Create a mailbox so the agent receives broadcasts
    pub fn register_agent(&self, agent_id: &str) {
        self.state
            .lock()
            .queues
            .entry(agent_id.to_string())
            .or_default();
    }

    /// Send a message; returns its id
    pub fn send(
        &self,
        from_agent: &str,
        to_agent: &str,
        message_type: &str,
        content: Value,
        priority: u8,
    ) -> String {
        let message = Message {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            from_agent: from_agent.to_string(),
            to_agent: to_agent.to_string(),
            message_type: message_type.to_string(),
            content,
            priority,
            timestamp: Utc::now(),
            read: false,
        };

        let subscribers = {
            let mut state = self.state.lock();
            let limits = self.limits;

            if to_agent == BROADCAST {
                for (agent, queue) in state.queues.iter_mut() {
                    if agent != from_agent
                        && push_bounded(queue, message.clone(), limits.mailbox_capacity)
                    {
                        debug!("Mailbox {} full, dropped oldest message", agent);
                    }
                }
            } else {
                let queue = state.queues.entry(to_agent.to_string()).or_default();
                if push_bounded(queue, message.clone(), limits.mailbox_capacity) {
                    debug!("Mailbox {} full, dropped oldest message", to_agent);
                }
            }

            push_bounded(&mut state.history, message.clone(), Some(limits.history_capacity));
            state
                .subscribers
                .get(message_type)
                .cloned()
                .unwrap_or_default()
        };

        self.arrivals.notify_waiters();
        debug!(
            "Message {} {} -> {} ({})",
            message.id, from_agent, to_agent, message_type
        );

        for subscriber in subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber(&message))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Subscriber for '{}' failed: {}", message_type, e),
                Err(_) => error!("Subscriber for '{}' panicked", message_type),
            }
        }

        message.id
    }

    /// Broadcast to every other agent
    pub fn broadcast(&self, from_agent: &str, message_type: &str, content: Value) -> String {
        self.send(from_agent, BROADCAST, message_type, content, 0)
    }

    /// Pop the next message, if any
    pub fn receive(&self, agent_id: &str) -> Option<Message> {
        let mut state = self.state.lock();
        let queue = state.queues.entry(agent_id.to_string()).or_default();
        queue.pop_front().map(|mut m| {
            m.read = true;
            m
        })
    }

    /// Wait up to `timeout` for the next message
    pub async fn recv_timeout(&self, agent_id: &str, timeout: Duration) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrivals.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.receive(agent_id) {
                return Some(message);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.receive(agent_id);
            }
        }
    }

    /// Drain the mailbox, marking everything read
    pub fn get_unread_messages(&self, agent_id: &str) -> Vec<Message> {
        let mut state = self.state.lock();
        let queue = state.queues.entry(agent_id.to_string()).or_default();
        queue
            .drain(..)
            .map(|mut m| {
                m.read = true;
                m
            })
            .collect()
    }

    /// Register a callback for a message type
    pub fn subscribe<F>(&self, message_type: &str, callback: F)
    where
        F: Fn(&Message) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .subscribers
            .entry(message_type.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Messages exchanged between two agents, in send order
    pub fn get_conversation(&self, agent_a: &str, agent_b: &str) -> Vec<Message> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|m| {
                (m.from_agent == agent_a && m.to_agent == agent_b)
                    || (m.from_agent == agent_b && m.to_agent == agent_a)
            })
            .cloned()
            .collect()
    }

    /// Messages sent or received by an agent
    pub fn get_agent_messages(&self, agent_id: &str) -> Vec<Message> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|m| m.from_agent == agent_id || m.to_agent == agent_id)
            .cloned()
            .collect()
    }

    pub fn statistics(&self) -> BusStats {
        let state = self.state.lock();
        let mut stats = BusStats {
            total_messages: state.history.len(),
            active_agents: state.queues.len(),
            ..Default::default()
        };
        for m in &state.history {
            *stats.messages_by_type.entry(m.message_type.clone()).or_default() += 1;
            *stats.messages_by_agent.entry(m.from_agent.clone()).or_default() += 1;
        }
        stats
    }

    /// Drop history; mailboxes are kept
    pub fn clear_history(&self) {
        self.state.lock().history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_direct_send_fifo() {
        let bus = MessageBus::new();
        bus.send("a", "b", "task_request", json!(1), 1);
        bus.send("a", "b", "task_request", json!(2), 1);

        let first = bus.receive("b").unwrap();
        assert_eq!(first.content, json!(1));
        assert!(first.read);
        assert_eq!(first.id.len(), 8);
        assert_eq!(bus.receive("b").unwrap().content, json!(2));
        assert!(bus.receive("b").is_none());
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let bus = MessageBus::new();
        for agent in ["supervisor", "analyzer", "validator"] {
            bus.register_agent(agent);
        }

        bus.broadcast("analyzer", "insight", json!({"q": 0.9}));

        assert!(bus.get_unread_messages("analyzer").is_empty());
        assert_eq!(bus.get_unread_messages("supervisor").len(), 1);
        assert_eq!(bus.get_unread_messages("validator").len(), 1);
        // Drained
        assert!(bus.get_unread_messages("validator").is_empty());
    }

    #[test]
    fn test_subscriber_failure_isolated() {
        let bus = MessageBus::new();
        let seen = Arc::new(AtomicUsize::new(0));

        bus.subscribe("insight", |_| anyhow::bail!("boom"));
        bus.subscribe("insight", |_| panic!("subscriber panic"));
        let counter = Arc::clone(&seen);
        bus.subscribe("insight", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let id = bus.send("a", "b", "insight", json!({}), 0);
        assert!(!id.is_empty());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.receive("b").unwrap().id, id);
    }

    #[test]
    fn test_history_queries_and_stats() {
        let bus = MessageBus::new();
        bus.send("a", "b", "task_request", json!({}), 1);
        bus.send("b", "a", "task_response", json!({}), 1);
        bus.send("a", "c", "task_request", json!({}), 1);

        assert_eq!(bus.get_conversation("a", "b").len(), 2);
        assert_eq!(bus.get_agent_messages("a").len(), 3);

        let stats = bus.statistics();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.messages_by_type["task_request"], 2);
        assert_eq!(stats.messages_by_agent["a"], 2);
        assert_eq!(stats.active_agents, 3);

        bus.clear_history();
        assert_eq!(bus.statistics().total_messages, 0);
        assert_eq!(bus.statistics().active_agents, 3);
    }

    #[test]
    fn test_full_mailbox_and_history_drop_oldest() {
        let bus = MessageBus::with_limits(BusLimits {
            mailbox_capacity: Some(2),
            history_capacity: 3,
        });
        for n in 0..5 {
            bus.send("a", "b", "task_request", json!({"n": n}), 1);
        }

        let pending = bus.get_unread_messages("b");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].content["n"], 3);
        assert_eq!(pending[1].content["n"], 4);

        let history = bus.get_conversation("a", "b");
        let kept: Vec<i64> = history.iter().map(|m| m.content["n"].as_i64().unwrap()).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert_eq!(bus.statistics().total_messages, 3);
    }

    #[tokio::test]
    async fn test_recv_timeout_wakes_on_send() {
        let bus = Arc::new(MessageBus::new());
        let sender = Arc::clone(&bus);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.send("a", "b", "ping", json!("hi"), 0);
        });

        let msg = bus.recv_timeout("b", Duration::from_secs(2)).await;
        assert_eq!(msg.unwrap().content, json!("hi"));

        let none = bus.recv_timeout("b", Duration::from_millis(20)).await;
        assert!(none.is_none());
    }
}
