//! Planning Engine
//!
//! Turns a labeling task into an ordered [`Plan`]:
//! - Planning context: task, agents, tools, recent memory, past experiences
//! - One structured LLM request through the [`Planner`] trait
//! - Strict parsing and validation into typed steps
//! - A fixed extract → classify → label → validate fallback
//!
//! Planners report failure as [`PlanningError`]; the supervisor recovers with
//! [`Plan::fallback`], so planning never blocks a task.

use crate::llm::LlmClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Planning errors
#[derive(Error, Debug)]
pub enum PlanningError {
    #[error("LLM call failed: {0}")]
    Llm(String),
    #[error("No JSON object in planner response")]
    NoJson,
    #[error("Malformed plan: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid plan: {0}")]
    Invalid(String),
}

/// What a step does, independent of its free-text wording
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepIntent {
    Extraction,
    Classification,
    Labeling,
    Validation,
    /// Call the named tool directly
    Custom(String),
}

impl StepIntent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Extraction => "extraction",
            Self::Classification => "classification",
            Self::Labeling => "labeling",
            Self::Validation => "validation",
            Self::Custom(name) => name,
        }
    }
}

/// A single step in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Step number (1-indexed)
    pub step_number: u32,
    /// Agent role responsible for the step
    pub agent: String,
    /// Free-text action
    pub action: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub expected_output: String,
    /// Structured intent; when absent the action text is classified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<StepIntent>,
}

impl PlanStep {
    pub fn new(step_number: u32, agent: &str, action: &str) -> Self {
        Self {
            step_number,
            agent: agent.to_string(),
            action: action.to_string(),
            reasoning: String::new(),
            parameters: Value::Object(Default::default()),
            expected_output: String::new(),
            intent: None,
        }
    }

    pub fn with_intent(mut self, intent: StepIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    pub fn with_expected_output(mut self, expected: &str) -> Self {
        self.expected_output = expected.to_string();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A complete execution plan. Steps are kept sorted by `step_number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub estimated_time: String,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

impl Plan {
    pub fn new(mut steps: Vec<PlanStep>, reasoning: &str) -> Self {
        steps.sort_by_key(|s| s.step_number);
        Self {
            steps,
            reasoning: reasoning.to_string(),
            estimated_time: String::new(),
            risk_factors: vec![],
        }
    }

    /// Fixed 4-step pipeline used whenever planning fails
    pub fn fallback() -> Self {
        let steps = vec![
            PlanStep::new(1, "content_extractor", "Extract content from file")
                .with_intent(StepIntent::Extraction)
                .with_expected_output("Extracted text or visual features"),
            PlanStep::new(2, "analyzer", "Classify category")
                .with_intent(StepIntent::Classification)
                .with_expected_output("Category with confidence"),
            PlanStep::new(3, "analyzer", "Generate labels")
                .with_intent(StepIntent::Labeling)
                .with_expected_output("Structured labels"),
            PlanStep::new(4, "validator", "Validate quality")
                .with_intent(StepIntent::Validation)
                .with_expected_output("Quality score and status"),
        ];

        Self {
            steps,
            reasoning: "Standard labeling pipeline (fallback plan)".to_string(),
            estimated_time: "2-5 minutes".to_string(),
            risk_factors: vec![
                "API failures".to_string(),
                "Low quality content".to_string(),
            ],
        }
    }

    pub fn agents(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.agent.as_str()).collect()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Context handed to a planner
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanRequest {
    pub task: Value,
    /// (agent id, description)
    pub agents: Vec<(String, String)>,
    pub tools: Value,
    pub recent_context: Vec<Value>,
    pub similar_experiences: Vec<Value>,
    pub exemplars: Vec<Value>,
}

/// Produces a validated plan or a typed error
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &PlanRequest) -> Result<Plan, PlanningError>;
}

const PLANNER_SYSTEM: &str = "You are a supervisor agent that plans file labeling pipelines. \
Respond with a single JSON object and nothing else.";

/// LLM-backed planner
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    max_steps: usize,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm, max_steps: 10 }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    fn build_prompt(&self, request: &PlanRequest) -> String {
        let agents = request
            .agents
            .iter()
            .map(|(id, desc)| format!("- {}: {}", id, desc))
            .collect::<Vec<_>>()
            .join("\n");

        let pretty = |v: &Value| serde_json::to_string_pretty(v).unwrap_or_default();
        let list = |items: &[Value]| {
            if items.is_empty() {
                "None".to_string()
            } else {
                items.iter().map(pretty).collect::<Vec<_>>().join("\n")
            }
        };

        format!(
            r#"Create an execution plan for this labeling task.

TASK:
{task}

AVAILABLE AGENTS:
{agents}

AVAILABLE TOOLS:
{tools}

RECENT CONTEXT:
{recent}

SIMILAR PAST EXPERIENCES:
{similar}

HIGH-QUALITY EXAMPLES:
{exemplars}

Return a JSON object with:
- steps: array of {{step_number, agent, action, reasoning, parameters, expected_output, intent}}
  where intent is one of "extraction", "classification", "labeling", "validation" or {{"custom": "<tool name>"}}
- reasoning: why this plan
- estimated_time: rough duration
- risk_factors: array of strings

The plan must extract content, classify it, generate labels and validate quality. Maximum {max} steps.

JSON only:"#,
            task = pretty(&request.task),
            agents = agents,
            tools = pretty(&request.tools),
            recent = list(&request.recent_context),
            similar = list(&request.similar_experiences),
            exemplars = list(&request.exemplars),
            max = self.max_steps,
        )
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, request: &PlanRequest) -> Result<Plan, PlanningError> {
        let prompt = self.build_prompt(request);
        let response = self
            .llm
            .complete(PLANNER_SYSTEM, &prompt)
            .await
            .map_err(|e| PlanningError::Llm(e.to_string()))?;

        let plan = parse_plan(&response)?;
        if plan.steps.len() > self.max_steps {
            return Err(PlanningError::Invalid(format!(
                "{} steps exceeds the limit of {}",
                plan.steps.len(),
                self.max_steps
            )));
        }

        info!(
            "Planner ({}) produced {} steps",
            self.llm.model(),
            plan.steps.len()
        );
        Ok(plan)
    }
}

/// Parse and validate a planner response
pub fn parse_plan(response: &str) -> Result<Plan, PlanningError> {
    #[derive(Deserialize)]
    struct PlanJson {
        steps: Vec<PlanStep>,
        #[serde(default)]
        reasoning: String,
        #[serde(default)]
        estimated_time: String,
        #[serde(default)]
        risk_factors: Vec<String>,
    }

    let body = strip_code_fences(response);
    let json_str = extract_json(body).ok_or(PlanningError::NoJson)?;
    let parsed: PlanJson = serde_json::from_str(json_str)?;

    if parsed.steps.is_empty() {
        return Err(PlanningError::Invalid("plan has no steps".to_string()));
    }

    let mut seen = HashSet::new();
    for step in &parsed.steps {
        if step.action.trim().is_empty() {
            return Err(PlanningError::Invalid(format!(
                "step {} has no action",
                step.step_number
            )));
        }
        if step.agent.trim().is_empty() {
            return Err(PlanningError::Invalid(format!(
                "step {} has no agent",
                step.step_number
            )));
        }
        if !seen.insert(step.step_number) {
            return Err(PlanningError::Invalid(format!(
                "duplicate step number {}",
                step.step_number
            )));
        }
    }

    let mut plan = Plan::new(parsed.steps, &parsed.reasoning);
    plan.estimated_time = parsed.estimated_time;
    plan.risk_factors = parsed.risk_factors;
    debug!("Parsed plan with agents {:?}", plan.agents());
    Ok(plan)
}

/// Remove a surrounding ``` / ```json fence
pub(crate) fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Extract JSON object from text
pub(crate) fn extract_json(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fallback_plan_shape() {
        let plan = Plan::fallback();
        assert_eq!(
            plan.agents(),
            vec!["content_extractor", "analyzer", "analyzer", "validator"]
        );
        assert_eq!(plan.steps[0].action, "Extract content from file");
        assert_eq!(plan.steps[3].intent, Some(StepIntent::Validation));
        assert_eq!(plan.risk_factors.len(), 2);
    }

    #[test]
    fn test_parse_fenced_plan_sorts_steps() {
        let response = r#"```json
{
  "steps": [
    {"step_number": 2, "agent": "analyzer", "action": "Classify category"},
    {"step_number": 1, "agent": "content_extractor", "action": "Extract content {raw}", "intent": "extraction"}
  ],
  "reasoning": "short"
}
```"#;
        let plan = parse_plan(response).unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].step_number, 1);
        assert_eq!(plan.steps[0].intent, Some(StepIntent::Extraction));
        assert_eq!(plan.steps[1].intent, None);
        assert_eq!(plan.reasoning, "short");
    }

    #[test]
    fn test_parse_custom_intent() {
        let response = json!({
            "steps": [{"step_number": 1, "agent": "analyzer", "action": "run it", "intent": {"custom": "pii_scrubber"}}]
        })
        .to_string();
        let plan = parse_plan(&response).unwrap();
        assert_eq!(
            plan.steps[0].intent,
            Some(StepIntent::Custom("pii_scrubber".to_string()))
        );
    }

    #[test]
    fn test_invalid_plans_are_typed_errors() {
        assert!(matches!(parse_plan("no json here"), Err(PlanningError::NoJson)));
        assert!(matches!(
            parse_plan(r#"{"steps": "nope"}"#),
            Err(PlanningError::Parse(_))
        ));
        assert!(matches!(
            parse_plan(r#"{"steps": []}"#),
            Err(PlanningError::Invalid(_))
        ));
        assert!(matches!(
            parse_plan(
                r#"{"steps": [{"step_number": 1, "agent": "a", "action": "x"},
                              {"step_number": 1, "agent": "b", "action": "y"}]}"#
            ),
            Err(PlanningError::Invalid(_))
        ));
    }

    #[test]
    fn test_extract_json_ignores_braces_in_strings() {
        let s = r#"Plan: {"a": "}{", "b": {"c": 1}} trailing"#;
        assert_eq!(extract_json(s), Some(r#"{"a": "}{", "b": {"c": 1}}"#));
        assert_eq!(extract_json("{unclosed"), None);
    }
}
