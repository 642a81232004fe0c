//! Supervisor Agent
//!
//! Plans a labeling task, executes the plan step by step through the tool
//! registry, and guarantees every returned state carries a category, a
//! clamped quality score and a quality check, whatever the plan did.
//!
//! ```text
//! PENDING ──► PLANNING ──► EXECUTING ──► POST_PROCESSING ──► DONE
//!                ▲             │
//!                └── replan ───┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::autonomous::{AgentCore, AgentReport, AgentServices, AgentStatus};
use super::intent;
use super::planner::{Plan, PlanRequest, PlanStep, Planner, StepIntent};
use super::state::{ExecutionState, Modality, Task};
use super::tools::ToolOutcome;
use crate::config::ConfigError;
use crate::experience::ExperienceDatabase;
use crate::memory::AgentMemory;

pub const SUPERVISOR_ID: &str = "supervisor";

const DEFAULT_MAX_REPLANS: u32 = 3;
const REPLAN_LIMIT_ERROR: &str = "replan limit exceeded";
const NO_OP_TOOL: &str = "none";

/// Categories that trigger the post-plan classification pass
const UNASSIGNED_CATEGORIES: &[&str] = &["uncategorized", "unknown", "none", "null"];

/// What to do when a step's tool reports `success:false`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnStepFailure {
    Continue,
    Replan,
    Abort,
}

impl OnStepFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::Replan => "replan",
            Self::Abort => "abort",
        }
    }

    /// Interpret a free-text decision choice
    fn from_choice(choice: &str) -> Self {
        let lowered = choice.to_lowercase();
        if lowered.contains("replan") {
            Self::Replan
        } else if lowered.contains("abort") {
            Self::Abort
        } else {
            Self::Continue
        }
    }
}

impl fmt::Display for OnStepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnStepFailure {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "replan" => Ok(Self::Replan),
            "abort" => Ok(Self::Abort),
            _ => Err(ConfigError::InvalidValue {
                key: "LABELER_FAILURE_POLICY",
                value: s.to_string(),
            }),
        }
    }
}

/// Supervisor tuning
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_replans: u32,
    /// Fixed policy; `None` decides per failure
    pub failure_policy: Option<OnStepFailure>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_replans: DEFAULT_MAX_REPLANS,
            failure_policy: None,
        }
    }
}

impl SupervisorConfig {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_replans: config.max_replans,
            failure_policy: config.failure_policy,
        }
    }
}

/// Result of running one plan's steps
enum StepRun {
    Completed,
    Aborted,
    Replan(Value),
}

/// Plans and coordinates the labeling pipeline
pub struct SupervisorAgent {
    core: AgentCore,
    planner: Option<Arc<dyn Planner>>,
    experience: Arc<ExperienceDatabase>,
    agents: Vec<(String, String)>,
    config: SupervisorConfig,
}

impl SupervisorAgent {
    pub fn new(
        memory: AgentMemory,
        services: AgentServices,
        planner: Option<Arc<dyn Planner>>,
        experience: Arc<ExperienceDatabase>,
        config: SupervisorConfig,
    ) -> Self {
        let agents = vec![
            (
                "content_extractor".to_string(),
                "Extracts raw text, transcripts or visual features from files".to_string(),
            ),
            (
                "analyzer".to_string(),
                "Classifies content into a category and generates structured labels".to_string(),
            ),
            (
                "validator".to_string(),
                "Validates the quality and completeness of labeling results".to_string(),
            ),
        ];

        Self {
            core: AgentCore::new(
                SUPERVISOR_ID,
                "Supervisor - plans and coordinates labeling tasks",
                memory,
                services,
            ),
            planner,
            experience,
            agents,
            config,
        }
    }

    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    /// Agent ids and descriptions offered to the planner
    pub fn agents(&self) -> &[(String, String)] {
        &self.agents
    }

    pub fn status(&self) -> AgentReport {
        self.core.report()
    }

    /// Plan, execute and reflect on one task
    pub async fn process(&self, task: &Task) -> ExecutionState {
        info!("Supervisor processing {}", task.file_path);
        self.core.set_current_task(task.to_value());

        self.core.set_status(AgentStatus::Planning);
        let plan = self.create_plan(task).await;
        self.core
            .services
            .shared
            .set_shared("current_plan", plan.to_value(), SUPERVISOR_ID);

        self.core.set_status(AgentStatus::Coordinating);
        let state = self.execute_plan(plan, task).await;

        self.core.set_status(AgentStatus::Idle);
        self.core.reflect(&state.to_value());
        state
    }

    /// Ask the planner for a plan; any failure yields the fallback plan
    pub async fn create_plan(&self, task: &Task) -> Plan {
        let plan = match &self.planner {
            None => {
                debug!("No planner configured, using fallback plan");
                Plan::fallback()
            }
            Some(planner) => {
                let request = self.plan_request(task);
                match planner.plan(&request).await {
                    Ok(plan) => plan,
                    Err(e) => {
                        warn!("Planning failed, using fallback plan: {}", e);
                        Plan::fallback()
                    }
                }
            }
        };

        info!(
            "Plan for {}: {} steps ({})",
            task.file_name,
            plan.steps.len(),
            plan.reasoning
        );
        self.core.record_decision(json!({
            "type": "plan",
            "task": task.to_value(),
            "plan": plan.to_value(),
        }));
        plan
    }

    fn plan_request(&self, task: &Task) -> PlanRequest {
        let modality = task
            .modality
            .unwrap_or_else(|| Modality::from_path(&task.file_path));
        let mut query = Map::new();
        query.insert("type".to_string(), json!(task.task_type));
        query.insert("modality".to_string(), json!(modality.as_str()));

        let similar_experiences = self
            .experience
            .recall_similar_experiences(&query, 3)
            .into_iter()
            .map(|s| json!({"similarity": s.score, "experience": s.experience.to_value()}))
            .collect();
        let exemplars = self
            .experience
            .get_high_quality_experiences(0.7, 2)
            .iter()
            .map(|e| e.to_value())
            .collect();

        PlanRequest {
            task: task.to_value(),
            agents: self.agents.clone(),
            tools: serde_json::to_value(self.core.tools().descriptions()).unwrap_or(Value::Null),
            recent_context: self.core.memory.get_recent_context(3),
            similar_experiences,
            exemplars,
        }
    }

    /// Run a plan to completion, replanning within the configured bound
    pub async fn execute_plan(&self, plan: Plan, task: &Task) -> ExecutionState {
        let mut plan = plan;
        let mut task = task.clone();
        let mut replans = 0u32;

        loop {
            let mut state = ExecutionState::new(&task.file_path);
            if let Some(modality) = task.modality {
                state.set("modality", modality.as_str());
            }

            match self.run_steps(&plan, &mut state).await {
                StepRun::Completed | StepRun::Aborted => {
                    self.finalize(&mut state).await;
                    return state;
                }
                StepRun::Replan(failure) => {
                    if replans >= self.config.max_replans {
                        warn!("Giving up on {} after {} replans", task.file_path, replans);
                        state.set("success", false);
                        state.set("error", REPLAN_LIMIT_ERROR);
                        self.finalize(&mut state).await;
                        return state;
                    }
                    replans += 1;
                    info!("Replanning {} (attempt {})", task.file_path, replans);
                    task = task.with_failure(failure);
                    plan = self.create_plan(&task).await;
                }
            }
        }
    }

    async fn run_steps(&self, plan: &Plan, state: &mut ExecutionState) -> StepRun {
        for step in &plan.steps {
            info!(
                "Step {}: {} -> {} ({})",
                step.step_number, step.action, step.agent, step.reasoning
            );

            self.core.communicate(
                &step.agent,
                "task_request",
                json!({
                    "action": step.action,
                    "parameters": step.parameters,
                    "state": state.summary(),
                }),
                1,
            );

            let outcome = self.execute_step(step, state).await;
            let mut run = None;

            if !outcome.success {
                let error = outcome.error.clone().unwrap_or_default();
                warn!("Step {} failed: {}", step.step_number, error);

                match self.on_failure(step, &error).await {
                    OnStepFailure::Continue => warn!("Continuing despite failure"),
                    OnStepFailure::Abort => {
                        state.set("success", false);
                        state.set("error", error);
                        run = Some(StepRun::Aborted);
                    }
                    OnStepFailure::Replan => run = Some(StepRun::Replan(outcome.to_value())),
                }
            }

            self.core.memory.add_to_short_term(json!({
                "step": step.step_number,
                "result": outcome.to_value(),
                "success": outcome.success,
            }));

            if let Some(run) = run {
                return run;
            }
        }
        StepRun::Completed
    }

    async fn on_failure(&self, step: &PlanStep, error: &str) -> OnStepFailure {
        if let Some(policy) = self.config.failure_policy {
            return policy;
        }

        let options = vec![
            "Continue with current plan".to_string(),
            "Replan with alternative approach".to_string(),
            "Abort and report error".to_string(),
        ];
        let situation = format!("Step failed: {}. Error: {}", step.action, error);
        let decision = self.core.make_decision(&situation, &options).await;
        OnStepFailure::from_choice(&decision.choice)
    }

    /// Execute one step against the state
    async fn execute_step(&self, step: &PlanStep, state: &mut ExecutionState) -> ToolOutcome {
        if !state.contains("modality") {
            let modality = Modality::from_path(state.file_path());
            state.set("modality", modality.as_str());
        }
        let modality = state.modality().unwrap_or(Modality::Unknown);

        let Some(step_intent) = intent::resolve(step) else {
            warn!("No tool matched for action: {}", step.action);
            return no_op(format!("No tool matched for action: {}", step.action));
        };

        match step_intent {
            StepIntent::Extraction => {
                let tool_name = match modality {
                    Modality::TextDocument => "ocr_extractor",
                    Modality::Image => "vision_analyzer",
                    Modality::Audio => "audio_transcriber",
                    Modality::Unknown => {
                        return ToolOutcome::failure(
                            "extraction",
                            format!("Unknown modality: {}", modality),
                        )
                    }
                };
                let outcome = self
                    .call_tool(tool_name, json!({"file_path": state.file_path()}))
                    .await;
                if let Some(payload) = succeeded(&outcome) {
                    merge_extraction(state, &payload);
                }
                outcome
            }
            StepIntent::Classification => {
                if !self.core.tools().contains("category_classifier") {
                    return missing_tool("category_classifier");
                }
                if !state.has_content() {
                    warn!("No content available for {} classification", modality);
                    return ToolOutcome::failure(
                        "category_classifier",
                        format!("No content extracted for {} classification", modality),
                    );
                }
                let outcome = self.classify(state).await;
                if let Some(payload) = succeeded(&outcome) {
                    merge_classification(state, &payload);
                }
                outcome
            }
            StepIntent::Labeling => {
                let args = json!({
                    "modality": modality.as_str(),
                    "content": state.to_value(),
                    "category": state.get_str("category").unwrap_or("uncategorized"),
                });
                let outcome = self.call_tool("label_generator", args).await;
                if let Some(payload) = succeeded(&outcome) {
                    merge_labels(state, &payload);
                }
                outcome
            }
            StepIntent::Validation => {
                let outcome = self.validate(state).await;
                if let Some(payload) = succeeded(&outcome) {
                    merge_validation(state, &payload);
                }
                outcome
            }
            StepIntent::Custom(name) => {
                let tool_name = if self.core.tools().contains(&name) {
                    Some(name.clone())
                } else {
                    self.core.select_tool(&name).await
                };
                let Some(tool_name) = tool_name else {
                    return missing_tool(&name);
                };

                let args = json!({
                    "file_path": state.file_path(),
                    "modality": modality.as_str(),
                    "content": state.to_value(),
                    "category": state.get("category"),
                    "result": state.to_value(),
                    "parameters": step.parameters,
                });
                let outcome = self.call_tool(&tool_name, args).await;
                if let Some(payload) = succeeded(&outcome) {
                    state.merge_absent(&payload);
                }
                outcome
            }
        }
    }

    /// Call a registered tool; an unregistered one is a no-op
    async fn call_tool(&self, name: &str, args: Value) -> ToolOutcome {
        match self.core.tools().get(name) {
            Some(tool) => tool.call(args).await,
            None => missing_tool(name),
        }
    }

    async fn classify(&self, state: &ExecutionState) -> ToolOutcome {
        let modality = state.modality().unwrap_or(Modality::Unknown);
        self.call_tool(
            "category_classifier",
            json!({"modality": modality.as_str(), "content": state.to_value()}),
        )
        .await
    }

    async fn validate(&self, state: &ExecutionState) -> ToolOutcome {
        self.call_tool("quality_validator", json!({"result": state.to_value()}))
            .await
    }

    /// Post-conditions applied to every finished plan
    async fn finalize(&self, state: &mut ExecutionState) {
        if needs_category(state) {
            let assigned = if state.has_content() && self.core.tools().contains("category_classifier") {
                info!("Category not assigned, classifying now");
                let outcome = self.classify(state).await;
                match succeeded(&outcome) {
                    Some(payload) => {
                        merge_classification(state, &payload);
                        true
                    }
                    None => {
                        warn!("Categorization failed: {}", outcome.error.as_deref().unwrap_or_default());
                        false
                    }
                }
            } else {
                debug!("Cannot categorize {}: no content or classifier", state.file_path());
                false
            };
            if !assigned || needs_category(state) {
                state.set("category", "uncategorized");
            }
        }

        if state.get_f64("quality_score").map_or(true, |q| q == 0.0) {
            debug!("Quality check not in plan, validating now");
            let outcome = self.validate(state).await;
            if let Some(payload) = succeeded(&outcome) {
                merge_validation(state, &payload);
            }
        }

        let score = clamp_unit(
            state
                .get_f64("quality_score")
                .or_else(|| {
                    state
                        .get("quality_check")
                        .and_then(|c| c.get("quality_score"))
                        .and_then(|v| v.as_f64())
                })
                .unwrap_or(0.0),
        );
        state.set("quality_score", score);
        let check = normalize_quality_check(
            state.get("quality_check"),
            score,
            state.get_str("quality_status"),
        );
        state.set("quality_check", check);
        state.set_default("success", true);

        info!(
            "Plan completed for {}: category={} quality={:.2}",
            state.file_path(),
            state.get_str("category").unwrap_or_default(),
            state.get_f64("quality_score").unwrap_or(0.0)
        );
    }
}

/// `quality_check` carrying at least `quality_score`, `quality_status`,
/// `issues` and `passed`; the score always mirrors the top-level one
fn normalize_quality_check(check: Option<&Value>, score: f64, status: Option<&str>) -> Value {
    let mut check = check.and_then(|c| c.as_object()).cloned().unwrap_or_default();
    check.insert("quality_score".to_string(), json!(score));
    if !check.get("quality_status").map_or(false, |s| s.is_string()) {
        check.insert("quality_status".to_string(), json!(status.unwrap_or("unknown")));
    }
    if !check.get("issues").map_or(false, |i| i.is_array()) {
        check.insert("issues".to_string(), json!([]));
    }
    if !check.get("passed").map_or(false, |p| p.is_boolean()) {
        check.insert("passed".to_string(), Value::Bool(false));
    }
    Value::Object(check)
}

fn needs_category(state: &ExecutionState) -> bool {
    let category = state
        .get_str("category")
        .map(|c| c.trim().to_lowercase())
        .unwrap_or_default();
    category.is_empty() || UNASSIGNED_CATEGORIES.contains(&category.as_str())
}

/// Payload of a successful tool run; empty when the tool returned a
/// non-object. No-op outcomes carry nothing to merge.
fn succeeded(outcome: &ToolOutcome) -> Option<Map<String, Value>> {
    (outcome.success && outcome.tool != NO_OP_TOOL)
        .then(|| outcome.payload().cloned().unwrap_or_default())
}

fn no_op(note: String) -> ToolOutcome {
    ToolOutcome::success(NO_OP_TOOL, json!({"note": note}))
}

fn missing_tool(name: &str) -> ToolOutcome {
    warn!("Tool {} is not registered, skipping step", name);
    no_op(format!("Tool not registered: {}", name))
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn field_or(payload: &Map<String, Value>, key: &str, default: Value) -> Value {
    payload.get(key).cloned().unwrap_or(default)
}

fn merge_extraction(state: &mut ExecutionState, payload: &Map<String, Value>) {
    state.set("raw_text", field_or(payload, "raw_text", json!("")));
    state.set("visual_features", field_or(payload, "visual_features", json!("")));
    state.set("extraction_method", field_or(payload, "extraction_method", json!("")));
    let file_name = std::path::Path::new(state.file_path())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    state.set("file_name", file_name);
}

fn merge_classification(state: &mut ExecutionState, payload: &Map<String, Value>) {
    state.set("category", field_or(payload, "category", json!("uncategorized")));
    state.set("confidence", field_or(payload, "confidence", json!(0.0)));
    state.set("category_reasoning", field_or(payload, "reasoning", json!("")));
}

fn merge_labels(state: &mut ExecutionState, payload: &Map<String, Value>) {
    state.set("labels", field_or(payload, "labels", json!({})));
    state.set("label_confidence", field_or(payload, "confidence", json!(0.0)));
}

fn merge_validation(state: &mut ExecutionState, payload: &Map<String, Value>) {
    let score = payload
        .get("quality_score")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    state.set("quality_score", clamp_unit(score));
    state.set("quality_status", field_or(payload, "quality_status", json!("unknown")));
    state.set("quality_check", Value::Object(payload.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{Tool, ToolRegistry, ToolSchema};
    use crate::memory::SharedMemory;
    use crate::message_bus::MessageBus;

    fn supervisor(tools: ToolRegistry, config: SupervisorConfig) -> SupervisorAgent {
        let services = AgentServices {
            shared: Arc::new(SharedMemory::new()),
            tools: Arc::new(tools),
            bus: Arc::new(MessageBus::new()),
            llm: None,
        };
        SupervisorAgent::new(
            AgentMemory::new(SUPERVISOR_ID),
            services,
            None,
            Arc::new(ExperienceDatabase::in_memory()),
            config,
        )
    }

    fn fixed(name: &str, payload: Value) -> Tool {
        Tool::new(ToolSchema::new(name, name), move |_| {
            let payload = payload.clone();
            async move { Ok(payload) }
        })
    }

    #[test]
    fn test_failure_policy_parsing() {
        assert_eq!("Continue".parse::<OnStepFailure>().unwrap(), OnStepFailure::Continue);
        assert_eq!(" replan ".parse::<OnStepFailure>().unwrap(), OnStepFailure::Replan);
        assert_eq!("ABORT".parse::<OnStepFailure>().unwrap(), OnStepFailure::Abort);
        assert!("retry".parse::<OnStepFailure>().is_err());
    }

    #[test]
    fn test_choice_mapping() {
        assert_eq!(OnStepFailure::from_choice("Replan with alternative approach"), OnStepFailure::Replan);
        assert_eq!(OnStepFailure::from_choice("Abort and report error"), OnStepFailure::Abort);
        assert_eq!(OnStepFailure::from_choice("Continue with current plan"), OnStepFailure::Continue);
        assert_eq!(OnStepFailure::from_choice(""), OnStepFailure::Continue);
    }

    #[tokio::test]
    async fn test_empty_plan_is_well_formed() {
        let sup = supervisor(ToolRegistry::new(), SupervisorConfig::default());
        let task = Task::label_file("notes.txt", None);
        let state = sup.execute_plan(Plan::new(vec![], "nothing"), &task).await;

        assert_eq!(state.get_str("category"), Some("uncategorized"));
        assert_eq!(state.get_f64("quality_score"), Some(0.0));
        assert_eq!(state.success(), Some(true));
        let check = state.get("quality_check").unwrap();
        for key in ["quality_score", "quality_status", "issues", "passed"] {
            assert!(check.get(key).is_some(), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_unknown_modality_extraction_fails() {
        let sup = supervisor(
            ToolRegistry::new(),
            SupervisorConfig {
                failure_policy: Some(OnStepFailure::Abort),
                ..Default::default()
            },
        );
        let task = Task::label_file("archive.xyz", None);
        let plan = Plan::new(
            vec![PlanStep::new(1, "content_extractor", "Extract content")],
            "",
        );
        let state = sup.execute_plan(plan, &task).await;
        assert_eq!(state.get_str("modality"), Some("unknown"));
        assert_eq!(state.success(), Some(false));
        assert_eq!(state.get_str("error"), Some("Unknown modality: unknown"));
    }

    #[tokio::test]
    async fn test_unmatched_action_is_noop() {
        let sup = supervisor(ToolRegistry::new(), SupervisorConfig::default());
        let task = Task::label_file("a.txt", None);
        let plan = Plan::new(vec![PlanStep::new(1, "analyzer", "Summarize the file")], "");
        let state = sup.execute_plan(plan, &task).await;

        assert_eq!(state.success(), Some(true));
        let audit = sup.core().memory.get_recent_context(1);
        assert_eq!(audit[0]["success"], true);
        assert!(audit[0]["result"]["result"]["note"]
            .as_str()
            .unwrap()
            .contains("No tool matched"));
    }

    #[tokio::test]
    async fn test_custom_tool_fills_absent_keys() {
        let mut tools = ToolRegistry::new();
        tools.register(
            fixed("pii_scrubber", json!({"file_path": "overwritten", "pii_found": false})),
            "custom",
        );
        let sup = supervisor(tools, SupervisorConfig::default());
        let task = Task::label_file("a.txt", None);
        let plan = Plan::new(vec![PlanStep::new(1, "analyzer", "Use pii_scrubber")], "");
        let state = sup.execute_plan(plan, &task).await;

        assert_eq!(state.file_path(), "a.txt");
        assert_eq!(state.get("pii_found"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_validation_score_is_clamped() {
        let mut tools = ToolRegistry::new();
        tools.register(
            fixed("quality_validator", json!({"quality_score": 1.4, "quality_status": "high"})),
            "validation",
        );
        let sup = supervisor(tools, SupervisorConfig::default());
        let task = Task::label_file("a.txt", None);
        let plan = Plan::new(vec![PlanStep::new(1, "validator", "Validate quality")], "");
        let state = sup.execute_plan(plan, &task).await;
        assert_eq!(state.get_f64("quality_score"), Some(1.0));
    }

    #[tokio::test]
    async fn test_partial_validator_payload_is_normalized() {
        let mut tools = ToolRegistry::new();
        tools.register(
            fixed("quality_validator", json!({"quality_score": 0.75, "quality_status": "medium"})),
            "validation",
        );
        let sup = supervisor(tools, SupervisorConfig::default());
        let task = Task::label_file("a.pdf", None);
        let plan = Plan::new(vec![PlanStep::new(1, "validator", "Validate quality")], "");
        let state = sup.execute_plan(plan, &task).await;

        assert_eq!(
            state.get("quality_check"),
            Some(&json!({
                "quality_score": 0.75,
                "quality_status": "medium",
                "issues": [],
                "passed": false,
            }))
        );
    }

    #[tokio::test]
    async fn test_check_score_follows_clamped_score() {
        let mut tools = ToolRegistry::new();
        tools.register(
            fixed(
                "quality_validator",
                json!({"quality_score": 3.0, "issues": ["x"], "passed": true}),
            ),
            "validation",
        );
        let sup = supervisor(tools, SupervisorConfig::default());
        let task = Task::label_file("a.pdf", None);
        let plan = Plan::new(vec![PlanStep::new(1, "validator", "Validate quality")], "");
        let state = sup.execute_plan(plan, &task).await;

        let check = state.get("quality_check").unwrap();
        assert_eq!(check["quality_score"], 1.0);
        assert_eq!(check["quality_status"], "unknown");
        assert_eq!(check["issues"], json!(["x"]));
        assert_eq!(check["passed"], true);
    }

    #[tokio::test]
    async fn test_process_publishes_plan_and_returns_idle() {
        let sup = supervisor(ToolRegistry::new(), SupervisorConfig::default());
        let task = Task::label_file("a.txt", None);
        sup.process(&task).await;

        let plan = sup.core().services.shared.get_shared("current_plan").unwrap();
        assert_eq!(plan["steps"].as_array().unwrap().len(), 4);
        assert_eq!(sup.status().status, AgentStatus::Idle);
        assert!(sup.status().decisions_made >= 1);
    }
}
