//! Content Extractor Agent
//!
//! Chooses an extraction strategy for a file (learning from similar past
//! experiences), discovers a matching tool and runs it.

use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use super::autonomous::{AgentCore, AgentReport, AgentServices, AgentStatus, Decision};
use super::state::{Modality, Task};
use crate::experience::{ExperienceDatabase, SimilarExperience};
use crate::memory::AgentMemory;

pub const EXTRACTOR_ID: &str = "content_extractor";

/// Minimum past quality for a method to be preferred
const LEARNED_QUALITY: f64 = 0.6;

/// Autonomous extraction agent
pub struct ContentExtractorAgent {
    core: AgentCore,
    experience: Arc<ExperienceDatabase>,
}

impl ContentExtractorAgent {
    pub fn new(memory: AgentMemory, services: AgentServices, experience: Arc<ExperienceDatabase>) -> Self {
        Self {
            core: AgentCore::new(EXTRACTOR_ID, "content extraction specialist", memory, services),
            experience,
        }
    }

    pub fn core(&self) -> &AgentCore {
        &self.core
    }

    pub fn status(&self) -> AgentReport {
        self.core.report()
    }

    /// Extract content from the task's file
    pub async fn process(&self, task: &Task) -> Value {
        self.core.set_status(AgentStatus::Processing);
        self.core.set_current_task(task.to_value());

        let modality = task
            .modality
            .unwrap_or_else(|| Modality::from_path(&task.file_path));
        info!("Extracting {} ({})", task.file_path, modality);

        let mut query = Map::new();
        query.insert("modality".to_string(), json!(modality.as_str()));
        query.insert("file_name".to_string(), json!(file_name(&task.file_path)));
        let similar = self.experience.recall_similar_experiences(&query, 2);

        if !similar.is_empty() {
            info!("Found {} similar past cases", similar.len());
            let published: Vec<Value> = similar
                .iter()
                .map(|s| json!({"score": s.score, "experience": s.experience.to_value()}))
                .collect();
            self.core
                .services
                .shared
                .set_shared("similar_experiences", Value::Array(published), EXTRACTOR_ID);
        }

        let strategy = self.choose_strategy(&task.file_path, modality, &similar).await;
        info!("Extraction strategy: {} ({})", strategy.choice, strategy.reasoning);

        let Some(tool_name) = self.core.select_tool(&strategy.choice).await else {
            error!("No suitable tool found for '{}'", strategy.choice);
            self.core.set_status(AgentStatus::Idle);
            return json!({
                "success": false,
                "error": "No suitable tool found",
                "agent": EXTRACTOR_ID,
            });
        };

        info!("Using tool {}", tool_name);
        let result = self
            .core
            .tools()
            .execute(&tool_name, json!({"file_path": task.file_path}))
            .await
            .to_value();

        self.core.reflect(&result);
        self.core.memory.remember("last_extraction", result.clone());
        self.core.set_status(AgentStatus::Idle);
        result
    }

    async fn choose_strategy(
        &self,
        file_path: &str,
        modality: Modality,
        similar: &[SimilarExperience],
    ) -> Decision {
        let size = tokio::fs::metadata(file_path).await.map(|m| m.len()).unwrap_or(0);
        let extension = Path::new(file_path)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        let mut situation = format!(
            "File: {}\nExtension: {}\nModality: {}\nSize: {} bytes\n",
            file_name(file_path),
            extension,
            modality,
            size
        );
        if !similar.is_empty() {
            situation.push_str("\nLEARN FROM PAST EXPERIENCES:\n");
            for s in similar {
                situation.push_str(&format!(
                    "- Past similar file: Quality={:.2}, Success={}, Method={}\n",
                    s.experience.quality_score(),
                    s.experience.success(),
                    s.experience.result_str("extraction_method").unwrap_or("unknown"),
                ));
            }
        }

        let mut options = strategy_options(modality);
        if let Some(learned) = learned_option(similar) {
            options.insert(0, learned.to_string());
        }

        self.core.make_decision(&situation, &options).await
    }
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn strategy_options(modality: Modality) -> Vec<String> {
    let options: &[&str] = match modality {
        Modality::TextDocument => &[
            "Use OCR extraction for text documents",
            "Use vision analysis if document is primarily visual",
        ],
        Modality::Image => &[
            "Use vision analysis for visual content",
            "Use OCR if image contains significant text",
        ],
        Modality::Audio => &["Use audio transcription with Whisper"],
        Modality::Unknown => &["Analyze file and determine best extraction method"],
    };
    options.iter().map(|o| o.to_string()).collect()
}

/// Option for the first method that worked well on a similar file
fn learned_option(similar: &[SimilarExperience]) -> Option<&'static str> {
    let method = similar
        .iter()
        .find(|s| s.experience.success() && s.experience.quality_score() > LEARNED_QUALITY)?
        .experience
        .result_str("extraction_method")?;

    match method {
        "ocr" => Some("Use OCR extraction (learned: worked well for similar files)"),
        "vision" => Some("Use vision analysis (learned: worked well for similar files)"),
        _ => None,
    }
}
