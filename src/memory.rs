//! Agent Memory
//!
//! Two layers of in-process memory:
//! - [`AgentMemory`]: per-agent short-term ring buffer, working memory and context
//! - [`SharedMemory`]: process-wide blackboard, agent state snapshots and the
//!   global task context
//!
//! Both use interior locking so one agent instance can serve concurrent tasks.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default short-term capacity
pub const DEFAULT_SHORT_TERM_SIZE: usize = 10;

/// Working memory slot
#[derive(Debug, Clone, Serialize)]
pub struct WorkingEntry {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Per-agent memory
pub struct AgentMemory {
    agent_id: String,
    capacity: usize,
    short_term: Mutex<VecDeque<Value>>,
    working: Mutex<HashMap<String, WorkingEntry>>,
    context: Mutex<Map<String, Value>>,
}

impl AgentMemory {
    pub fn new(agent_id: &str) -> Self {
        Self::with_capacity(agent_id, DEFAULT_SHORT_TERM_SIZE)
    }

    pub fn with_capacity(agent_id: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            agent_id: agent_id.to_string(),
            capacity,
            short_term: Mutex::new(VecDeque::with_capacity(capacity)),
            working: Mutex::new(HashMap::new()),
            context: Mutex::new(Map::new()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Append an event; the oldest event is dropped once full.
    /// Object events get a `timestamp` field if they lack one.
    pub fn add_to_short_term(&self, mut event: Value) {
        if let Value::Object(map) = &mut event {
            map.entry("timestamp")
                .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        }

        let mut short_term = self.short_term.lock();
        if short_term.len() == self.capacity {
            short_term.pop_front();
        }
        short_term.push_back(event);
    }

    /// Last `n` events, oldest first
    pub fn get_recent_context(&self, n: usize) -> Vec<Value> {
        let short_term = self.short_term.lock();
        let skip = short_term.len().saturating_sub(n);
        short_term.iter().skip(skip).cloned().collect()
    }

    pub fn short_term_len(&self) -> usize {
        self.short_term.lock().len()
    }

    /// Store a working-memory value (last write wins)
    pub fn remember(&self, key: &str, value: Value) {
        self.working.lock().insert(
            key.to_string(),
            WorkingEntry {
                value,
                timestamp: Utc::now(),
            },
        );
    }

    pub fn recall(&self, key: &str) -> Option<Value> {
        self.working.lock().get(key).map(|e| e.value.clone())
    }

    pub fn clear_working_memory(&self) {
        self.working.lock().clear();
        debug!("Cleared working memory for {}", self.agent_id);
    }

    pub fn set_context(&self, key: &str, value: Value) {
        self.context.lock().insert(key.to_string(), value);
    }

    pub fn get_context(&self, key: &str) -> Option<Value> {
        self.context.lock().get(key).cloned()
    }
}

/// Blackboard entry tagged with its writer
#[derive(Debug, Clone, Serialize)]
pub struct SharedEntry {
    pub value: Value,
    pub set_by: String,
    pub timestamp: DateTime<Utc>,
}

/// Process-wide shared memory
#[derive(Default)]
pub struct SharedMemory {
    shared_state: RwLock<HashMap<String, SharedEntry>>,
    agent_states: RwLock<HashMap<String, Value>>,
    global_context: RwLock<Map<String, Value>>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a value on the blackboard
    pub fn set_shared(&self, key: &str, value: Value, agent_id: &str) {
        self.shared_state.write().insert(
            key.to_string(),
            SharedEntry {
                value,
                set_by: agent_id.to_string(),
                timestamp: Utc::now(),
            },
        );
    }

    pub fn get_shared(&self, key: &str) -> Option<Value> {
        self.shared_state.read().get(key).map(|e| e.value.clone())
    }

    pub fn get_shared_entry(&self, key: &str) -> Option<SharedEntry> {
        self.shared_state.read().get(key).cloned()
    }

    /// Read-modify-write a blackboard key under a single write lock.
    /// Returns the stored value.
    pub fn update_shared<F>(&self, key: &str, agent_id: &str, f: F) -> Value
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let mut state = self.shared_state.write();
        let value = f(state.get(key).map(|e| &e.value));
        state.insert(
            key.to_string(),
            SharedEntry {
                value: value.clone(),
                set_by: agent_id.to_string(),
                timestamp: Utc::now(),
            },
        );
        value
    }

    pub fn shared_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared_state.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Replace an agent's state snapshot
    pub fn update_agent_state(&self, agent_id: &str, state: Value) {
        self.agent_states.write().insert(agent_id.to_string(), state);
    }

    pub fn get_agent_state(&self, agent_id: &str) -> Option<Value> {
        self.agent_states.read().get(agent_id).cloned()
    }

    pub fn all_agent_states(&self) -> HashMap<String, Value> {
        self.agent_states.read().clone()
    }

    pub fn set_global_context(&self, context: Map<String, Value>) {
        *self.global_context.write() = context;
    }

    pub fn get_global_context(&self) -> Map<String, Value> {
        self.global_context.read().clone()
    }
}
