//! Experience Database
//!
//! Append-only log of past task outcomes, persisted as a JSON array.
//! Recall is symbolic: fields of a query are compared against stored
//! experiences, no embeddings involved.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Persistence errors (logged, never surfaced to callers)
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A stored experience: id, timestamp and the free-form payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experience {
    pub id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Experience {
    /// Field lookup: top level first, then inside `task`
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).or_else(|| {
            self.fields
                .get("task")
                .and_then(|t| t.as_object())
                .and_then(|t| t.get(key))
        })
    }

    pub fn quality_score(&self) -> f64 {
        self.fields
            .get("quality_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    pub fn success(&self) -> bool {
        self.fields
            .get("success")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn processing_time(&self) -> f64 {
        self.fields
            .get("processing_time")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    /// Field from the stored `result`, as a string
    pub fn result_str(&self, key: &str) -> Option<&str> {
        self.fields
            .get("result")
            .and_then(|r| r.get(key))
            .and_then(|v| v.as_str())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Typed builder for the usual experience payload
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExperienceRecord {
    pub task: Value,
    pub result: Value,
    pub quality_score: f64,
    pub processing_time: f64,
    pub success: bool,
    pub modality: Option<String>,
    pub category: Option<String>,
    pub extraction_method: Option<String>,
    pub file_extension: Option<String>,
}

impl ExperienceRecord {
    pub fn into_fields(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Recall hit with its similarity score
#[derive(Debug, Clone)]
pub struct SimilarExperience {
    pub score: f64,
    pub experience: Experience,
}

/// Aggregate statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExperienceStats {
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_quality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_quality: Option<f64>,
}

/// Append-only experience log
pub struct ExperienceDatabase {
    path: Option<PathBuf>,
    experiences: Mutex<Vec<Experience>>,
}

impl ExperienceDatabase {
    /// Open a file-backed database. A missing file starts empty; a corrupt
    /// file is logged and also starts empty.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let experiences = match load(&path) {
            Ok(experiences) => {
                info!("Loaded {} experiences from {}", experiences.len(), path.display());
                experiences
            }
            Err(PersistenceError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Could not load experiences from {}: {}", path.display(), e);
                Vec::new()
            }
        };

        Self {
            path: Some(path),
            experiences: Mutex::new(experiences),
        }
    }

    /// Database without persistence
    pub fn in_memory() -> Self {
        Self {
            path: None,
            experiences: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append an experience and rewrite the whole file. Returns the id.
    pub fn store_experience(&self, fields: Map<String, Value>) -> String {
        let id = generate_id(&fields);
        let experience = Experience {
            id: id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            fields,
        };

        let mut experiences = self.experiences.lock();
        experiences.push(experience);

        if let Some(path) = &self.path {
            if let Err(e) = persist(path, &experiences) {
                warn!("Failed to persist experience log to {}: {}", path.display(), e);
            }
        }

        debug!("Stored experience {} ({} total)", id, experiences.len());
        id
    }

    /// Top `top_k` experiences by similarity to `query`, highest first.
    /// Equal scores keep insertion order.
    pub fn recall_similar_experiences(
        &self,
        query: &Map<String, Value>,
        top_k: usize,
    ) -> Vec<SimilarExperience> {
        let experiences = self.experiences.lock();
        let mut scored: Vec<SimilarExperience> = experiences
            .iter()
            .map(|exp| SimilarExperience {
                score: similarity(query, exp),
                experience: exp.clone(),
            })
            .collect();
        drop(experiences);

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        scored
    }

    /// Most recent `limit` experiences with quality at or above `min_quality`
    pub fn get_high_quality_experiences(&self, min_quality: f64, limit: usize) -> Vec<Experience> {
        let experiences = self.experiences.lock();
        let matching: Vec<&Experience> = experiences
            .iter()
            .filter(|e| e.quality_score() >= min_quality)
            .collect();
        let skip = matching.len().saturating_sub(limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn statistics(&self) -> ExperienceStats {
        let experiences = self.experiences.lock();
        if experiences.is_empty() {
            return ExperienceStats::default();
        }

        let scores: Vec<f64> = experiences.iter().map(|e| e.quality_score()).collect();
        let total = scores.len();
        ExperienceStats {
            total,
            avg_quality: Some(scores.iter().sum::<f64>() / total as f64),
            max_quality: scores.iter().cloned().fold(None, |m: Option<f64>, s| {
                Some(m.map_or(s, |m| m.max(s)))
            }),
            min_quality: scores.iter().cloned().fold(None, |m: Option<f64>, s| {
                Some(m.map_or(s, |m| m.min(s)))
            }),
        }
    }

    /// Snapshot of every stored experience
    pub fn all(&self) -> Vec<Experience> {
        self.experiences.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.experiences.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiences.lock().is_empty()
    }
}

/// First 16 hex chars of SHA256 over the key-sorted JSON payload
fn generate_id(fields: &Map<String, Value>) -> String {
    // serde_json::Map is ordered by key, so this is canonical
    let content = serde_json::to_string(fields).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// (exact matches + 0.5 * substring matches) / query fields present
fn similarity(query: &Map<String, Value>, experience: &Experience) -> f64 {
    let mut score = 0.0;
    let mut present = 0usize;

    for (key, wanted) in query {
        let Some(found) = experience.field(key) else {
            continue;
        };
        present += 1;

        if found == wanted {
            score += 1.0;
        } else if display(found)
            .to_lowercase()
            .contains(&display(wanted).to_lowercase())
        {
            score += 0.5;
        }
    }

    if present == 0 {
        0.0
    } else {
        score / present as f64
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn load(path: &Path) -> Result<Vec<Experience>, PersistenceError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn persist(path: &Path, experiences: &[Experience]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(experiences)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_id_is_deterministic() {
        let a = fields(json!({"b": 1, "a": "x"}));
        let b = fields(json!({"a": "x", "b": 1}));
        assert_eq!(generate_id(&a), generate_id(&b));
        assert_eq!(generate_id(&a).len(), 16);
    }

    #[test]
    fn test_similarity_scoring() {
        let exp = Experience {
            id: "1".to_string(),
            timestamp: String::new(),
            fields: fields(json!({
                "modality": "text_document",
                "task": {"type": "label_file", "file_name": "Report_2024.pdf"}
            })),
        };

        // Exact on both present fields
        let q = fields(json!({"modality": "text_document", "type": "label_file"}));
        assert_eq!(similarity(&q, &exp), 1.0);

        // Substring, case-insensitive
        let q = fields(json!({"file_name": "report"}));
        assert_eq!(similarity(&q, &exp), 0.5);

        // Absent fields don't count toward the denominator
        let q = fields(json!({"modality": "image", "category": "x"}));
        assert_eq!(similarity(&q, &exp), 0.0);
    }

    #[test]
    fn test_high_quality_returns_most_recent() {
        let db = ExperienceDatabase::in_memory();
        for q in [0.9, 0.5, 0.95, 0.85] {
            db.store_experience(fields(json!({ "quality_score": q })));
        }

        let hq = db.get_high_quality_experiences(0.8, 2);
        assert_eq!(hq.len(), 2);
        assert_eq!(hq[0].quality_score(), 0.95);
        assert_eq!(hq[1].quality_score(), 0.85);
    }

    #[test]
    fn test_statistics() {
        let db = ExperienceDatabase::in_memory();
        assert_eq!(db.statistics().total, 0);
        assert!(db.statistics().avg_quality.is_none());

        db.store_experience(fields(json!({"quality_score": 0.4})));
        db.store_experience(fields(json!({"quality_score": 0.8})));

        let stats = db.statistics();
        assert_eq!(stats.total, 2);
        assert!((stats.avg_quality.unwrap() - 0.6).abs() < 1e-9);
        assert_eq!(stats.max_quality, Some(0.8));
        assert_eq!(stats.min_quality, Some(0.4));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("experience.json");
        std::fs::write(&path, "{not json").unwrap();

        let db = ExperienceDatabase::open(&path);
        assert!(db.is_empty());
    }

    #[test]
    fn test_persist_failure_is_swallowed() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes every write fail
        let path = dir.path().join("blocked");
        std::fs::create_dir(&path).unwrap();

        let db = ExperienceDatabase::open(&path);
        let id = db.store_experience(fields(json!({"quality_score": 1.0})));
        assert!(!id.is_empty());
        assert_eq!(db.len(), 1);
    }
}
