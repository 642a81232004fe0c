//! Orchestrator
//!
//! Wires the shared services (blackboard, message bus, tool registry,
//! experience log, result cache) to the agents and runs one file through
//! cache → supervisor → experience log → output file.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::agent::autonomous::{AgentReport, AgentServices};
use crate::agent::extractor::{ContentExtractorAgent, EXTRACTOR_ID};
use crate::agent::planner::Planner;
use crate::agent::state::Task;
use crate::agent::supervisor::{SupervisorAgent, SupervisorConfig, SUPERVISOR_ID};
use crate::agent::tools::{builtin, ToolRegistry, ToolStats};
use crate::cache::{CacheStats, ResultCache};
use crate::config::Config;
use crate::experience::{ExperienceDatabase, ExperienceRecord, ExperienceStats};
use crate::insights::{self, LearningInsights};
use crate::llm::LlmClient;
use crate::memory::{AgentMemory, SharedMemory};
use crate::message_bus::{BusStats, MessageBus};

const ORCHESTRATOR_ID: &str = "orchestrator";

/// Whole-system snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub agents: BTreeMap<String, AgentReport>,
    pub supervisor: AgentReport,
    pub message_bus: BusStats,
    pub experience_db: ExperienceStats,
    pub tools: Vec<ToolStats>,
    pub cache: CacheStats,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: Config,
    tools: Option<ToolRegistry>,
    experience: Option<Arc<ExperienceDatabase>>,
    cache: Option<ResultCache>,
    llm: Option<Arc<dyn LlmClient>>,
    planner: Option<Arc<dyn Planner>>,
}

impl OrchestratorBuilder {
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn experience(mut self, experience: Arc<ExperienceDatabase>) -> Self {
        self.experience = Some(experience);
        self
    }

    pub fn cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Client for agent decisions
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn build(self) -> Orchestrator {
        let config = self.config;
        let tools = Arc::new(self.tools.unwrap_or_else(builtin::registry));
        let experience = self
            .experience
            .unwrap_or_else(|| Arc::new(ExperienceDatabase::open(&config.experience_path)));
        let cache = Arc::new(
            self.cache
                .unwrap_or_else(|| ResultCache::from_config(&config, None)),
        );

        let services = AgentServices {
            shared: Arc::new(SharedMemory::new()),
            tools: tools.clone(),
            bus: Arc::new(MessageBus::new()),
            llm: self.llm,
        };
        services.bus.register_agent(ORCHESTRATOR_ID);

        let extractor = ContentExtractorAgent::new(
            AgentMemory::with_capacity(EXTRACTOR_ID, config.short_term_size),
            services.clone(),
            experience.clone(),
        );
        let supervisor = SupervisorAgent::new(
            AgentMemory::with_capacity(SUPERVISOR_ID, config.short_term_size),
            services.clone(),
            self.planner,
            experience.clone(),
            SupervisorConfig::from_config(&config),
        );

        info!(
            "Orchestrator ready: {} tools, {} past experiences",
            tools.list().len(),
            experience.len()
        );

        Orchestrator {
            output_dir: config.output_dir.clone(),
            services,
            experience,
            cache,
            extractor,
            supervisor,
        }
    }
}

/// Runs files through the agent system
pub struct Orchestrator {
    output_dir: PathBuf,
    services: AgentServices,
    experience: Arc<ExperienceDatabase>,
    cache: Arc<ResultCache>,
    extractor: ContentExtractorAgent,
    supervisor: SupervisorAgent,
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            tools: None,
            experience: None,
            cache: None,
            llm: None,
            planner: None,
        }
    }

    pub fn shared(&self) -> &SharedMemory {
        &self.services.shared
    }

    pub fn bus(&self) -> &MessageBus {
        &self.services.bus
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.services.tools
    }

    pub fn experience(&self) -> &ExperienceDatabase {
        &self.experience
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn supervisor(&self) -> &SupervisorAgent {
        &self.supervisor
    }

    pub fn extractor(&self) -> &ContentExtractorAgent {
        &self.extractor
    }

    pub fn default_output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Label one file. Never fails: errors come back as `success:false`.
    pub async fn process_file(&self, file_path: &Path, output_dir: Option<&Path>) -> Value {
        let start = Instant::now();
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let file_id = file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        info!("Processing file {}", file_name);

        if let Some(hit) = self.cache.get(file_path, Some(&file_id)).await {
            info!("Cache hit for {} ({})", file_name, hit.source.as_str());
            let mut result = hit.result;
            if let Some(obj) = result.as_object_mut() {
                obj.insert("cache_hit".to_string(), Value::Bool(true));
                obj.insert("cache_source".to_string(), json!(hit.source.as_str()));
            }
            return result;
        }

        let output_dir = output_dir.unwrap_or(&self.output_dir);
        match self.run(file_path, &file_id, output_dir, start).await {
            Ok(result) => result,
            Err(e) => {
                error!("Processing {} failed: {:#}", file_name, e);
                json!({
                    "success": false,
                    "error": format!("{:#}", e),
                    "file_name": file_name,
                })
            }
        }
    }

    async fn run(&self, file_path: &Path, file_id: &str, output_dir: &Path, start: Instant) -> Result<Value> {
        let task = Task::label_file(file_path, Some(output_dir));
        if let Value::Object(context) = task.to_value() {
            self.services.shared.set_global_context(context);
        }

        let state = self.supervisor.process(&task).await;
        let processing_time = start.elapsed().as_secs_f64();

        let mut result = state.into_map();
        result.insert("processing_time".to_string(), json!(processing_time));
        result.insert("timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339()));
        result.insert("agentic_system".to_string(), Value::Bool(true));
        result.insert(
            "agents_involved".to_string(),
            json!([EXTRACTOR_ID, SUPERVISOR_ID]),
        );

        let success = result
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let str_field = |key: &str| result.get(key).and_then(|v| v.as_str()).map(String::from);

        let record = ExperienceRecord {
            task: task.to_value(),
            result: Value::Object(result.clone()),
            quality_score: result
                .get("quality_score")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            processing_time,
            success,
            modality: str_field("modality"),
            category: str_field("category"),
            extraction_method: str_field("extraction_method"),
            file_extension: file_path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase())),
        };
        let result = Value::Object(result);

        if success {
            self.cache.store(file_path, Some(file_id), &result).await;
        }

        self.experience.store_experience(record.into_fields());

        if success {
            let output = save_output(&result, output_dir).await?;
            info!("Output saved to {}", output.display());
        }

        self.log_statistics(processing_time);
        Ok(result)
    }

    fn log_statistics(&self, processing_time: f64) {
        let bus = self.services.bus.statistics();
        info!(
            "Message bus: {} messages {:?}",
            bus.total_messages, bus.messages_by_type
        );

        let used: Vec<String> = self
            .services
            .tools
            .stats()
            .into_iter()
            .filter(|s| s.usage_count > 0)
            .map(|s| format!("{}={}/{:.0}%", s.name, s.usage_count, s.success_rate * 100.0))
            .collect();
        if !used.is_empty() {
            info!("Tool usage: {}", used.join(", "));
        }

        let exp = self.experience.statistics();
        info!(
            "Experiences: {} (avg quality {:.2})",
            exp.total,
            exp.avg_quality.unwrap_or(0.0)
        );
        info!("Processing time: {:.2}s", processing_time);
    }

    /// Run the extractor agent alone
    pub async fn extract_content(&self, file_path: &Path) -> Value {
        self.extractor.process(&Task::label_file(file_path, None)).await
    }

    pub fn system_status(&self) -> SystemStatus {
        let mut agents = BTreeMap::new();
        agents.insert(EXTRACTOR_ID.to_string(), self.extractor.status());

        SystemStatus {
            agents,
            supervisor: self.supervisor.status(),
            message_bus: self.services.bus.statistics(),
            experience_db: self.experience.statistics(),
            tools: self.services.tools.stats(),
            cache: self.cache.stats(),
        }
    }

    pub fn insights(&self) -> LearningInsights {
        insights::learning_insights(&self.experience)
    }
}

/// Write `<output_dir>/<file_name>_agentic_labeled.json`
async fn save_output(result: &Value, output_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Cannot create output directory {}", output_dir.display()))?;

    let file_name = result
        .get("file_name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("output");
    let path = output_dir.join(format!("{}_agentic_labeled.json", file_name));

    let body = serde_json::to_string_pretty(result)?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("Cannot write {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline(dir: &Path) -> Orchestrator {
        let config = Config {
            output_dir: dir.join("out"),
            ..Config::default()
        };
        Orchestrator::builder(config)
            .experience(Arc::new(ExperienceDatabase::in_memory()))
            .build()
    }

    #[tokio::test]
    async fn test_process_text_file_offline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memo.txt");
        std::fs::write(&path, "Quarterly budget review for the finance team").unwrap();

        let orch = offline(dir.path());
        let result = orch.process_file(&path, None).await;

        assert_eq!(result["success"], true);
        assert_eq!(result["agentic_system"], true);
        assert_eq!(result["raw_text"], "Quarterly budget review for the finance team");
        assert_eq!(result["category"], "uncategorized");
        assert!(result["quality_score"].as_f64().unwrap() <= 1.0);
        assert!(dir.path().join("out/memo.txt_agentic_labeled.json").exists());
        assert_eq!(orch.experience().len(), 1);
    }

    #[tokio::test]
    async fn test_system_status() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline(dir.path());
        let status = serde_json::to_value(orch.system_status()).unwrap();

        assert!(status["agents"].get(EXTRACTOR_ID).is_some());
        assert_eq!(status["supervisor"]["agent_id"], SUPERVISOR_ID);
        assert_eq!(status["experience_db"]["total"], 0);
        assert_eq!(status["cache"]["memory_cache_enabled"], true);
        assert_eq!(status["tools"].as_array().unwrap().len(), 2);
    }
}
