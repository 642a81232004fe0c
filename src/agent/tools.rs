//! Tool Framework
//!
//! Uniform invocation wrapper for extraction, analysis and validation tools:
//! - JSON schema parameter validation
//! - Usage and success statistics per tool
//! - Errors and panics in a tool body collapse into `success: false`
//! - Category index and keyword discovery for free-text task descriptions

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default registry category
pub const DEFAULT_CATEGORY: &str = "general";

/// Tool invocation errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),
    #[error("Parameter '{name}' has wrong type, expected {expected}")]
    WrongType { name: String, expected: String },
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Tool panicked: {0}")]
    Panicked(String),
}

/// JSON Schema for tool parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Tool name (snake_case)
    pub name: String,
    /// Human-readable description, also used for keyword discovery
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: Value,
    /// Required parameter names
    pub required: Vec<String>,
}

impl ToolSchema {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {}
            }),
            required: vec![],
        }
    }

    fn with_param(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        if let Some(props) = self.parameters.get_mut("properties") {
            props[name] = serde_json::json!({
                "type": kind,
                "description": description
            });
        }
        if required {
            self.required.push(name.to_string());
        }
        self
    }

    pub fn with_string_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, "string", description, required)
    }

    pub fn with_object_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, "object", description, required)
    }

    /// Any JSON value (no type check)
    pub fn with_any_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, "any", description, required)
    }

    /// Validate parameters against schema
    pub fn validate(&self, params: &Value) -> Result<(), ToolError> {
        for req in &self.required {
            if params.get(req).map_or(true, |v| v.is_null()) {
                return Err(ToolError::MissingParameter(req.clone()));
            }
        }

        if let Some(props) = self.parameters.get("properties").and_then(|p| p.as_object()) {
            for (name, schema) in props {
                let Some(value) = params.get(name) else {
                    continue;
                };
                let expected = schema.get("type").and_then(|t| t.as_str());
                let valid = match expected {
                    Some("string") => value.is_string(),
                    Some("number") => value.is_number(),
                    Some("boolean") => value.is_boolean(),
                    Some("array") => value.is_array(),
                    Some("object") => value.is_object(),
                    _ => true,
                };
                if !valid {
                    return Err(ToolError::WrongType {
                        name: name.clone(),
                        expected: expected.unwrap_or("unknown").to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Envelope returned by every tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool: String,
}

impl ToolOutcome {
    pub fn success(tool: &str, result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            tool: tool.to_string(),
        }
    }

    pub fn failure(tool: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            tool: tool.to_string(),
        }
    }

    /// Result payload as an object, if it is one
    pub fn payload(&self) -> Option<&serde_json::Map<String, Value>> {
        self.result.as_ref().and_then(|r| r.as_object())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Usage statistics for one tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub name: String,
    pub usage_count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub last_used: Option<DateTime<Utc>>,
}

/// Tool listing used in planning prompts
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub stats: ToolStats,
}

/// Type alias for tool handler function
pub type ToolHandler =
    Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// A registered tool with schema, handler and statistics
pub struct Tool {
    pub schema: ToolSchema,
    handler: ToolHandler,
    usage_count: AtomicU64,
    success_count: AtomicU64,
    last_used: Mutex<Option<DateTime<Utc>>>,
}

impl Tool {
    pub fn new<F, Fut>(schema: ToolSchema, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            schema,
            handler: Arc::new(move |params| Box::pin(handler(params))),
            usage_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            last_used: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn description(&self) -> &str {
        &self.schema.description
    }

    /// Invoke the tool. Never fails: errors become `success: false`.
    pub async fn call(&self, params: Value) -> ToolOutcome {
        self.usage_count.fetch_add(1, Ordering::Relaxed);
        *self.last_used.lock() = Some(Utc::now());
        let start = std::time::Instant::now();

        let outcome = match self.schema.validate(&params) {
            Err(e) => ToolOutcome::failure(self.name(), e.to_string()),
            Ok(()) => {
                let handler = Arc::clone(&self.handler);
                let run = async move { handler(params).await };
                match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(Ok(result)) => ToolOutcome::success(self.name(), result),
                    Ok(Err(e)) => ToolOutcome::failure(self.name(), e.to_string()),
                    Err(panic) => {
                        let e = ToolError::Panicked(panic_message(panic.as_ref()));
                        warn!("Tool {} panicked", self.name());
                        ToolOutcome::failure(self.name(), e.to_string())
                    }
                }
            }
        };

        if outcome.success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            "Tool {} finished in {}ms (success: {})",
            self.name(),
            start.elapsed().as_millis(),
            outcome.success
        );
        outcome
    }

    pub fn stats(&self) -> ToolStats {
        let usage_count = self.usage_count.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        ToolStats {
            name: self.schema.name.clone(),
            usage_count,
            success_count,
            success_rate: if usage_count > 0 {
                success_count as f64 / usage_count as f64
            } else {
                0.0
            },
            last_used: *self.last_used.lock(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Tool registry: name index, categories and keyword discovery
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<Tool>>,
    index: HashMap<String, usize>,
    categories: HashMap<String, Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under a category. Re-registering a name replaces the
    /// tool in place.
    pub fn register(&mut self, tool: Tool, category: &str) {
        let name = tool.schema.name.clone();
        let tool = Arc::new(tool);

        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }

        for names in self.categories.values_mut() {
            names.retain(|n| n != &name);
        }
        self.categories
            .entry(category.to_string())
            .or_default()
            .push(name.clone());

        info!("Registered tool: {} ({})", name, category);
    }

    /// Register under the `general` category
    pub fn register_default(&mut self, tool: Tool) {
        self.register(tool, DEFAULT_CATEGORY);
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.index.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn by_category(&self, category: &str) -> Vec<Arc<Tool>> {
        self.categories
            .get(category)
            .map(|names| names.iter().filter_map(|n| self.get(n)).collect())
            .unwrap_or_default()
    }

    /// All tools, in registration order
    pub fn all(&self) -> Vec<Arc<Tool>> {
        self.tools.clone()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn descriptions(&self) -> Vec<ToolDescription> {
        self.tools
            .iter()
            .map(|t| ToolDescription {
                name: t.schema.name.clone(),
                description: t.schema.description.clone(),
                stats: t.stats(),
            })
            .collect()
    }

    pub fn stats(&self) -> Vec<ToolStats> {
        self.tools.iter().map(|t| t.stats()).collect()
    }

    /// Tools where any word of `description` occurs in "name description".
    /// Approximate: false positives are expected.
    pub fn find_tools_for_task(&self, description: &str) -> Vec<Arc<Tool>> {
        let lowered = description.to_lowercase();
        let keywords: Vec<&str> = lowered.split_whitespace().collect();
        if keywords.is_empty() {
            return vec![];
        }

        self.tools
            .iter()
            .filter(|t| {
                let haystack = format!("{} {}", t.schema.name, t.schema.description).to_lowercase();
                keywords.iter().any(|kw| haystack.contains(kw))
            })
            .cloned()
            .collect()
    }

    /// Call a tool by name
    pub async fn execute(&self, name: &str, params: Value) -> ToolOutcome {
        match self.get(name) {
            Some(tool) => tool.call(params).await,
            None => ToolOutcome::failure(name, ToolError::UnknownTool(name.to_string()).to_string()),
        }
    }
}

/// Built-in tools that need no external backend
pub mod builtin {
    use super::*;
    use crate::agent::quality;
    use anyhow::Context;

    /// Plain-text extractor registered in the `ocr_extractor` slot. Reads
    /// UTF-8 documents directly; binary formats fail and need a real OCR
    /// backend registered under the same name.
    pub fn plain_text_extractor() -> Tool {
        let schema = ToolSchema::new(
            "ocr_extractor",
            "Extract text from PDF and document files (plain-text reader for text documents)",
        )
        .with_string_param("file_path", "Path of the file to read", true);

        Tool::new(schema, |params| async move {
            let path = params
                .get("file_path")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let raw_text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Cannot read text from {}", path))?;
            let file_name = std::path::Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();

            Ok(serde_json::json!({
                "raw_text": raw_text,
                "extraction_method": "plain_text",
                "file_name": file_name,
            }))
        })
    }

    /// Heuristic result validator
    pub fn quality_validator() -> Tool {
        let schema = ToolSchema::new(
            "quality_validator",
            "Validate quality and completeness of labeling results",
        )
        .with_object_param("result", "Labeling result to validate", true);

        Tool::new(schema, |params| async move {
            let result = params.get("result").cloned().unwrap_or(Value::Null);
            let report = quality::assess(&result);
            Ok(serde_json::to_value(report)?)
        })
    }

    /// Registry holding the built-in tools
    pub fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(plain_text_extractor(), "extraction");
        registry.register(quality_validator(), "validation");
        registry
    }
}
