//! Heuristic Quality Assessment
//!
//! Scores a labeling result from 1.0 downward: missing fields, missing or
//! generic category, thin extracted content, missing or malformed labels,
//! and low confidence each cost a fixed penalty.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::is_truthy;

const REQUIRED_FIELDS: &[&str] = &["file_name", "modality"];
const TEXT_LABEL_FIELDS: &[&str] = &["topics", "entities", "keywords", "sentiment"];
const IMAGE_LABEL_FIELDS: &[&str] = &[
    "image",
    "objects",
    "colors",
    "scene_type",
    "subject",
    "style",
    "features",
    "design",
    "construction",
    "visual_effects",
];
const NESTED_IMAGE_FIELDS: &[&str] = &[
    "subject",
    "style",
    "features",
    "design",
    "construction",
    "color",
    "visual_effects",
];
const GENERIC_LABEL_FIELDS: &[&str] = &[
    "topics",
    "entities",
    "keywords",
    "sentiment",
    "objects",
    "colors",
    "scene_type",
    "image",
    "subject",
];
const LIST_FIELDS: &[&str] = &["topics", "entities", "keywords", "objects", "colors"];

/// Categories that count as "no category"
pub const GENERIC_CATEGORIES: &[&str] = &["uncategorized", "unknown"];

/// Quality report returned by the validator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    pub quality_score: f64,
    pub quality_status: String,
    pub issues: Vec<String>,
    pub passed: bool,
    pub recommendations: Vec<String>,
}

/// high >= 0.8, medium >= 0.6, else low
pub fn status_for(score: f64) -> &'static str {
    if score >= 0.8 {
        "high"
    } else if score >= 0.6 {
        "medium"
    } else {
        "low"
    }
}

/// Assess a result object
pub fn assess(result: &Value) -> QualityReport {
    let mut score = 1.0_f64;
    let mut issues: Vec<String> = Vec::new();

    for field in REQUIRED_FIELDS {
        if !result.get(*field).map_or(false, is_truthy) {
            issues.push(format!("Missing required field: {}", field));
            score -= 0.2;
        }
    }

    let category = result.get("category").and_then(|v| v.as_str()).unwrap_or("");
    if category.is_empty() || GENERIC_CATEGORIES.contains(&category) {
        issues.push("Category is missing or uncategorized".to_string());
        score -= 0.2;
    }

    let modality = result.get("modality").and_then(|v| v.as_str()).unwrap_or("");
    match modality {
        "text_document" | "audio" => {
            if text_len(result.get("raw_text")) < 10 {
                issues.push("Raw text is too short or missing".to_string());
                score -= 0.3;
            }
        }
        "image" => {
            if text_len(result.get("visual_features")) < 10 {
                issues.push("Visual features are missing or too short".to_string());
                score -= 0.3;
            }
        }
        _ => {}
    }

    match result.get("labels") {
        Some(labels) if is_truthy(labels) => {
            if let Some(labels) = labels.as_object() {
                let meaningful = match modality {
                    "image" => has_image_labels(labels),
                    "text_document" | "audio" => any_truthy(labels, TEXT_LABEL_FIELDS),
                    _ => any_truthy(labels, GENERIC_LABEL_FIELDS),
                };
                if !meaningful {
                    issues.push("Labels lack meaningful content".to_string());
                    score -= 0.15;
                }

                if labels.contains_key("error") || labels.contains_key("error_type") {
                    issues.push("Labels contain error information".to_string());
                    score -= 0.1;
                }

                for field in LIST_FIELDS {
                    if labels.get(*field).map_or(false, |v| !v.is_array()) {
                        issues.push(format!("Label field '{}' is not a list", field));
                        score -= 0.05;
                    }
                }
            }
        }
        _ => {
            issues.push("No labels generated".to_string());
            score -= 0.2;
        }
    }

    let confidence = ["confidence", "label_confidence", "category_confidence"]
        .iter()
        .filter_map(|k| result.get(*k).and_then(|v| v.as_f64()))
        .fold(0.0_f64, f64::max);
    if confidence < 0.5 {
        issues.push(format!("Low confidence score: {}", confidence));
        score -= 0.1;
    }

    let score = (score.clamp(0.0, 1.0) * 100.0).round() / 100.0;
    let recommendations = recommendations_for(&issues);

    QualityReport {
        quality_score: score,
        quality_status: status_for(score).to_string(),
        passed: issues.is_empty(),
        issues,
        recommendations,
    }
}

fn text_len(value: Option<&Value>) -> usize {
    match value {
        Some(Value::String(s)) => s.trim().chars().count(),
        Some(v) if is_truthy(v) => v.to_string().len(),
        _ => 0,
    }
}

fn any_truthy(labels: &serde_json::Map<String, Value>, fields: &[&str]) -> bool {
    fields
        .iter()
        .any(|f| labels.get(*f).map_or(false, is_truthy))
}

fn has_image_labels(labels: &serde_json::Map<String, Value>) -> bool {
    if any_truthy(labels, IMAGE_LABEL_FIELDS) {
        return true;
    }
    match labels.get("image").and_then(|v| v.as_object()) {
        Some(nested) => any_truthy(nested, NESTED_IMAGE_FIELDS) || nested.len() >= 3,
        None => false,
    }
}

fn recommendations_for(issues: &[String]) -> Vec<String> {
    let joined = issues.join("\n");
    let mut recs = Vec::new();

    let rules: &[(&str, &str)] = &[
        (
            "Raw text is too short",
            "Consider re-extracting content with different OCR settings",
        ),
        (
            "Visual features are missing",
            "Try re-processing the image with a different vision model",
        ),
        (
            "Category is missing",
            "Content may be too ambiguous - consider manual categorization",
        ),
        (
            "No labels generated",
            "Content may be too sparse - consider enriching the input",
        ),
        (
            "Labels lack meaningful content",
            "Try reprocessing with different content or check if content extraction was successful",
        ),
        (
            "Low confidence",
            "Consider manual review or reprocessing with different settings",
        ),
    ];
    for (issue, rec) in rules {
        if joined.contains(issue) {
            recs.push(rec.to_string());
        }
    }

    if joined.to_lowercase().contains("error") {
        recs.push("Check API connectivity and quota limits".to_string());
    }

    if recs.is_empty() {
        recs.push("Quality check passed - result looks good!".to_string());
    }
    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_complete_text_result_passes() {
        let result = json!({
            "file_name": "a.pdf",
            "modality": "text_document",
            "category": "invoice",
            "raw_text": "Invoice number 42 for consulting",
            "labels": {"topics": ["billing"], "keywords": ["invoice"]},
            "confidence": 0.9,
        });
        let report = assess(&result);
        assert_eq!(report.quality_score, 1.0);
        assert_eq!(report.quality_status, "high");
        assert!(report.passed);
        assert_eq!(report.recommendations, vec!["Quality check passed - result looks good!"]);
    }

    #[test]
    fn test_empty_result_scores_zero() {
        let report = assess(&json!({}));
        // 2 required fields, category, no labels, low confidence
        assert_eq!(report.quality_score, 0.1);
        assert_eq!(report.quality_status, "low");
        assert!(!report.passed);
        assert_eq!(report.issues.len(), 5);
    }

    #[test]
    fn test_partial_text_result() {
        let result = json!({
            "file_name": "a.pdf",
            "modality": "text_document",
            "category": "uncategorized",
            "file_path": "a.pdf",
        });
        let report = assess(&result);
        // category -0.2, raw text -0.3, labels -0.2, confidence -0.1
        assert_eq!(report.quality_score, 0.2);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("different OCR settings")));
    }

    #[test]
    fn test_label_shape_penalties() {
        let result = json!({
            "file_name": "a.png",
            "modality": "image",
            "category": "photo",
            "visual_features": "a red barn in a green field",
            "labels": {"objects": "barn", "error": "timeout"},
            "label_confidence": 0.8,
        });
        let report = assess(&result);
        // error fields -0.1, objects not a list -0.05
        assert_eq!(report.quality_score, 0.85);
        assert!(report.issues.iter().any(|i| i.contains("'objects' is not a list")));
        assert!(report
            .recommendations
            .contains(&"Check API connectivity and quota limits".to_string()));
    }

    #[test]
    fn test_status_thresholds() {
        assert_eq!(status_for(0.8), "high");
        assert_eq!(status_for(0.79), "medium");
        assert_eq!(status_for(0.6), "medium");
        assert_eq!(status_for(0.59), "low");
    }
}
