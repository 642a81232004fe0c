//! Agentic Labeler
//!
//! Multi-agent file labeling: a supervisor plans each task with an LLM,
//! coordinates tools through a shared registry, and learns from an
//! experience log.
//!
//! # Features
//!
//! - **Planning**: typed LLM plans with a deterministic fallback pipeline
//! - **Execution**: intent × modality tool dispatch with in-band failures
//! - **Replanning**: bounded, with an explicit step-failure policy
//! - **Memory**: per-agent short-term and working memory plus a shared blackboard
//! - **Messaging**: in-process bus with broadcast and subscribers
//! - **Learning**: experience log with similarity recall and insights
//! - **Caching**: LRU + TTL memory tier over an optional persisted store
//! - **Workers**: bounded tokio pool over one shared queue
//!
//! # Architecture
//!
//! ```text
//! CLI ──► WorkerPool ──► Orchestrator ──► ResultCache (hit → return)
//!                             │
//!                             ├── SupervisorAgent ──► Planner (LLM)
//!                             │        │
//!                             │        └── ToolRegistry (extract/classify/label/validate)
//!                             ├── ContentExtractorAgent
//!                             ├── MessageBus
//!                             ├── SharedMemory (blackboard)
//!                             └── ExperienceDatabase (JSON file)
//! ```

pub mod agent;
pub mod cache;
pub mod config;
pub mod experience;
pub mod insights;
pub mod llm;
pub mod memory;
pub mod message_bus;
pub mod orchestrator;
pub mod worker_pool;

pub use agent::{
    ExecutionState, LlmPlanner, Modality, OnStepFailure, Plan, PlanStep, Planner, StepIntent,
    SupervisorAgent, Task, Tool, ToolOutcome, ToolRegistry, ToolSchema,
};
pub use cache::{CacheHit, CacheSource, MemoryCache, PersistedRecord, PersistedStore, ResultCache};
pub use config::{Config, ConfigError};
pub use experience::{Experience, ExperienceDatabase, ExperienceRecord, PersistenceError};
pub use llm::{ChatClient, ChatClientConfig, LlmClient};
pub use memory::{AgentMemory, SharedMemory};
pub use message_bus::{BusLimits, Message, MessageBus};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, SystemStatus};
pub use worker_pool::{PoolConfig, PoolError, TaskHandle, TaskStatus, WorkerPool};
