//! Autonomous Agent Core
//!
//! Shared behaviour for every agent: LLM-backed decisions with deterministic
//! fallbacks, tool selection, messaging, status tracking and reflection into
//! short-term memory.

use crate::llm::LlmClient;
use crate::memory::{AgentMemory, SharedMemory};
use crate::message_bus::{Message, MessageBus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::planner::{extract_json, strip_code_fences};
use super::tools::ToolRegistry;

/// Quality above which a result is broadcast as an insight
const INSIGHT_THRESHOLD: f64 = 0.8;

/// Agent lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Planning,
    Coordinating,
    Processing,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Coordinating => "coordinating",
            Self::Processing => "processing",
        }
    }
}

/// Outcome of [`AgentCore::make_decision`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub choice: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

/// Status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub role: String,
    pub status: AgentStatus,
    pub current_task: Option<Value>,
    pub decisions_made: usize,
    pub messages_sent: u64,
}

/// Services an agent is wired to
#[derive(Clone)]
pub struct AgentServices {
    pub shared: Arc<SharedMemory>,
    pub tools: Arc<ToolRegistry>,
    pub bus: Arc<MessageBus>,
    pub llm: Option<Arc<dyn LlmClient>>,
}

/// Common agent state and behaviour
pub struct AgentCore {
    pub agent_id: String,
    pub role: String,
    pub memory: AgentMemory,
    pub services: AgentServices,
    status: parking_lot::Mutex<AgentStatus>,
    current_task: parking_lot::Mutex<Option<Value>>,
    decisions: parking_lot::Mutex<Vec<Value>>,
    messages_sent: AtomicU64,
}

impl AgentCore {
    pub fn new(agent_id: &str, role: &str, memory: AgentMemory, services: AgentServices) -> Self {
        services.bus.register_agent(agent_id);
        let core = Self {
            agent_id: agent_id.to_string(),
            role: role.to_string(),
            memory,
            services,
            status: parking_lot::Mutex::new(AgentStatus::Idle),
            current_task: parking_lot::Mutex::new(None),
            decisions: parking_lot::Mutex::new(Vec::new()),
            messages_sent: AtomicU64::new(0),
        };
        core.publish_state();
        core
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.services.tools
    }

    pub fn has_llm(&self) -> bool {
        self.services.llm.is_some()
    }

    pub fn set_status(&self, status: AgentStatus) {
        *self.status.lock() = status;
        self.publish_state();
    }

    pub fn status_value(&self) -> AgentStatus {
        *self.status.lock()
    }

    pub fn set_current_task(&self, task: Value) {
        *self.current_task.lock() = Some(task);
        self.publish_state();
    }

    fn publish_state(&self) {
        self.services.shared.update_agent_state(
            &self.agent_id,
            json!({
                "status": self.status_value(),
                "role": self.role,
                "current_task": self.current_task.lock().clone(),
            }),
        );
    }

    /// Record an entry in the decision history
    pub fn record_decision(&self, entry: Value) {
        self.decisions.lock().push(entry);
    }

    pub fn decision_history(&self) -> Vec<Value> {
        self.decisions.lock().clone()
    }

    /// Choose among `options`. Without an LLM, or when it fails, the first
    /// option wins with a fixed confidence.
    pub async fn make_decision(&self, situation: &str, options: &[String]) -> Decision {
        let first = options.first().cloned().unwrap_or_default();

        let decision = match &self.services.llm {
            None => Decision {
                choice: first,
                reasoning: "No LLM available, using default".to_string(),
                confidence: 0.5,
            },
            Some(llm) => {
                let prompt = self.decision_prompt(situation, options);
                let system = format!("You are a {}. Respond with JSON only.", self.role);
                match llm.complete(&system, &prompt).await {
                    Ok(text) => parse_decision(&text).unwrap_or(Decision {
                        choice: first,
                        reasoning: text,
                        confidence: 0.7,
                    }),
                    Err(e) => {
                        warn!("{} decision failed: {}", self.agent_id, e);
                        Decision {
                            choice: first,
                            reasoning: format!("Decision error: {}", e),
                            confidence: 0.3,
                        }
                    }
                }
            }
        };

        let decision = Decision {
            confidence: decision.confidence.clamp(0.0, 1.0),
            ..decision
        };

        self.record_decision(json!({
            "situation": situation,
            "options": options,
            "decision": decision,
        }));
        debug!(
            "{} decided '{}' ({:.2})",
            self.agent_id, decision.choice, decision.confidence
        );
        decision
    }

    fn decision_prompt(&self, situation: &str, options: &[String]) -> String {
        let recent = self
            .memory
            .get_recent_context(3)
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("\n");
        let numbered = options
            .iter()
            .enumerate()
            .map(|(i, o)| format!("{}. {}", i + 1, o))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "As {} ({}), decide how to proceed.\n\n\
             SITUATION:\n{}\n\n\
             OPTIONS:\n{}\n\n\
             RECENT CONTEXT:\n{}\n\n\
             Respond with JSON: {{\"choice\": \"<one option verbatim>\", \"reasoning\": \"...\", \"confidence\": 0.0-1.0}}",
            self.agent_id,
            self.role,
            situation,
            numbered,
            if recent.is_empty() { "None" } else { &recent },
        )
    }

    /// Pick a tool for a free-text task via keyword discovery
    pub async fn select_tool(&self, task_description: &str) -> Option<String> {
        let candidates = self.tools().find_tools_for_task(task_description);
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0].name().to_string()),
            _ => {
                let options: Vec<String> = candidates
                    .iter()
                    .map(|t| format!("{}: {}", t.name(), t.description()))
                    .collect();
                let situation = format!("Select the best tool for: {}", task_description);
                let decision = self.make_decision(&situation, &options).await;
                let chosen = decision
                    .choice
                    .split(':')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_string();

                if self.tools().contains(&chosen) {
                    Some(chosen)
                } else {
                    Some(candidates[0].name().to_string())
                }
            }
        }
    }

    /// Send a message; returns its id
    pub fn communicate(&self, to_agent: &str, message_type: &str, content: Value, priority: u8) -> String {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.services
            .bus
            .send(&self.agent_id, to_agent, message_type, content, priority)
    }

    pub fn check_messages(&self) -> Vec<Message> {
        self.services.bus.get_unread_messages(&self.agent_id)
    }

    /// Remember an outcome; broadcast an insight for high-quality results
    pub fn reflect(&self, result: &Value) {
        let success = result.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
        self.memory.add_to_short_term(json!({
            "task": self.current_task.lock().clone(),
            "result": result,
            "success": success,
        }));

        let quality = result.get("quality_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        if quality > INSIGHT_THRESHOLD {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
            self.services.bus.broadcast(
                &self.agent_id,
                "insight",
                json!({
                    "agent": self.agent_id,
                    "quality_score": quality,
                    "category": result.get("category"),
                    "extraction_method": result.get("extraction_method"),
                }),
            );
            info!("{} shared an insight (quality {:.2})", self.agent_id, quality);
        }
    }

    pub fn report(&self) -> AgentReport {
        AgentReport {
            agent_id: self.agent_id.clone(),
            role: self.role.clone(),
            status: self.status_value(),
            current_task: self.current_task.lock().clone(),
            decisions_made: self.decisions.lock().len(),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
        }
    }
}

fn parse_decision(text: &str) -> Option<Decision> {
    let body = strip_code_fences(text);
    let json_str = extract_json(body)?;
    serde_json::from_str(json_str).ok()
}
