//! Agent Layer
//!
//! Autonomous agents and the pieces they share:
//! - `state`: task, modality and per-task execution state
//! - `tools`: tool wrapper, registry and built-in tools
//! - `quality`: heuristic result validation
//! - `planner`: typed plans and the LLM planner
//! - `intent`: action text to step intent
//! - `autonomous`: decisions, tool selection, messaging, reflection
//! - `supervisor`: plan, execute, replan, post-process
//! - `extractor`: strategy-driven content extraction
//!
//! Each task follows plan → execute → reflect, with failures kept in-band.

pub mod autonomous;
pub mod extractor;
pub mod intent;
pub mod planner;
pub mod quality;
pub mod state;
pub mod supervisor;
pub mod tools;

pub use autonomous::{AgentCore, AgentReport, AgentServices, AgentStatus, Decision};
pub use extractor::ContentExtractorAgent;
pub use planner::{LlmPlanner, Plan, PlanRequest, PlanStep, Planner, PlanningError, StepIntent};
pub use quality::QualityReport;
pub use state::{ExecutionState, Modality, Task};
pub use supervisor::{OnStepFailure, SupervisorAgent, SupervisorConfig};
pub use tools::{Tool, ToolError, ToolOutcome, ToolRegistry, ToolSchema};
