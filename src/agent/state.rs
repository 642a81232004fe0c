//! Task and per-task execution state

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

/// File modality, resolved from the extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    TextDocument,
    Image,
    Audio,
    Unknown,
}

impl Modality {
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" | "txt" | "docx" | "doc" | "csv" => Self::TextDocument,
            "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => Self::Image,
            "mp3" | "wav" | "flac" | "m4a" | "mp4" => Self::Audio,
            _ => Self::Unknown,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "text_document" => Self::TextDocument,
            "image" => Self::Image,
            "audio" => Self::Audio,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextDocument => "text_document",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Unknown => "unknown",
        }
    }

    /// State field holding this modality's extracted content
    pub fn content_field(&self) -> &'static str {
        match self {
            Self::Image => "visual_features",
            _ => "raw_text",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_task_type() -> String {
    "label_file".to_string()
}

/// A labeling request. Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(rename = "type", default = "default_task_type")]
    pub task_type: String,
    pub file_path: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_failure: Option<Value>,
}

impl Task {
    /// Label-file task for a path
    pub fn label_file(file_path: impl AsRef<Path>, output_dir: Option<&Path>) -> Self {
        let path = file_path.as_ref();
        Self {
            task_type: default_task_type(),
            file_path: path.to_string_lossy().to_string(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            output_dir: output_dir.map(|d| d.to_string_lossy().to_string()),
            timestamp: Utc::now().to_rfc3339(),
            modality: None,
            previous_failure: None,
        }
    }

    pub fn with_modality(mut self, modality: Modality) -> Self {
        self.modality = Some(modality);
        self
    }

    /// Copy of this task carrying the payload of a failed step
    pub fn with_failure(&self, failure: Value) -> Self {
        Self {
            previous_failure: Some(failure),
            ..self.clone()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

const BULKY_FIELDS: &[&str] = &["raw_text", "visual_features"];

/// Mutable JSON state accumulated across plan steps. One per task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionState(Map<String, Value>);

impl ExecutionState {
    pub fn new(file_path: &str) -> Self {
        let mut map = Map::new();
        map.insert("file_path".to_string(), Value::String(file_path.to_string()));
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| v.as_f64())
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Set only when the key is absent
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        self.0.entry(key.to_string()).or_insert_with(|| value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn file_path(&self) -> &str {
        self.get_str("file_path").unwrap_or_default()
    }

    pub fn modality(&self) -> Option<Modality> {
        self.get_str("modality").map(Modality::parse)
    }

    /// Extracted content for the state's modality, if non-empty
    pub fn content(&self) -> Option<&Value> {
        let modality = self.modality().unwrap_or(Modality::Unknown);
        self.get(modality.content_field()).filter(|v| is_truthy(v))
    }

    pub fn has_content(&self) -> bool {
        self.content().is_some()
    }

    pub fn success(&self) -> Option<bool> {
        self.get("success").and_then(|v| v.as_bool())
    }

    /// Copy keys from `payload` that the state does not have yet
    pub fn merge_absent(&mut self, payload: &Map<String, Value>) {
        for (k, v) in payload {
            self.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// The state with bulky extracted content replaced by its length
    pub fn summary(&self) -> Value {
        let mut map = self.0.clone();
        for key in BULKY_FIELDS {
            if let Some(value) = map.remove(*key) {
                let chars = value
                    .as_str()
                    .map_or_else(|| value.to_string().len(), |s| s.chars().count());
                map.insert(format!("{}_chars", key), Value::from(chars));
            }
        }
        Value::Object(map)
    }
}

impl From<Map<String, Value>> for ExecutionState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Non-null, non-empty, non-false, non-zero
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
