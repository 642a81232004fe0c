//! Step Intent Classification
//!
//! Maps a plan step's free-text action to a [`StepIntent`] when the planner
//! did not supply one. Prefix checks run in a fixed order: extraction,
//! classification, labeling, validation. `use <tool>` names a tool directly.

use super::planner::{PlanStep, StepIntent};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static EXTRACTION_TOOLS: &[&str] = &["ocr_extractor", "vision_analyzer", "audio_transcriber"];
static CLASSIFICATION_TOOLS: &[&str] = &["category_classifier"];
static LABELING_TOOLS: &[&str] = &["label_generator"];
static VALIDATION_TOOLS: &[&str] = &["quality_validator"];

static EXTRACTION_PREFIXES: &[&str] = &[
    "extract",
    "use ocr",
    "use vision",
    "transcribe",
    "analyze image",
    "get visual",
];

static CLASSIFICATION_PREFIXES: &[&str] = &[
    "classify",
    "categorize",
    "assign category",
    "determine category",
    "analyze and categorize",
];

static LABELING_PREFIXES: &[&str] = &[
    "generate label",
    "generate structured",
    "create label",
    "label",
    "identify",
    "analyze the extracted",
    "analyze and generate",
];

static VALIDATION_PREFIXES: &[&str] = &["validate", "check quality", "verify", "quality check"];

static USE_TOOL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^use\s+([a-z0-9_\-]+)").unwrap()
});

/// Intent for a step: explicit intent first, then the action text
pub fn resolve(step: &PlanStep) -> Option<StepIntent> {
    step.intent.clone().or_else(|| classify_action(&step.action))
}

/// Classify a free-text action. `None` when nothing matches.
pub fn classify_action(action: &str) -> Option<StepIntent> {
    let lowered = action.trim().to_lowercase();
    let tool = USE_TOOL_PATTERN
        .captures(&lowered)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let named = |set: &[&str]| tool.as_deref().map_or(false, |t| set.contains(&t));
    let starts = |prefixes: &[&str]| prefixes.iter().any(|p| lowered.starts_with(p));

    let intent = if starts(EXTRACTION_PREFIXES) || named(EXTRACTION_TOOLS) {
        Some(StepIntent::Extraction)
    } else if starts(CLASSIFICATION_PREFIXES) || named(CLASSIFICATION_TOOLS) {
        Some(StepIntent::Classification)
    } else if starts(LABELING_PREFIXES) || named(LABELING_TOOLS) {
        Some(StepIntent::Labeling)
    } else if starts(VALIDATION_PREFIXES) || named(VALIDATION_TOOLS) {
        Some(StepIntent::Validation)
    } else {
        tool.map(StepIntent::Custom)
    };

    debug!("Action '{}' -> {:?}", action, intent);
    intent
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_actions() {
        assert_eq!(classify_action("Extract content from file"), Some(StepIntent::Extraction));
        assert_eq!(classify_action("Classify category"), Some(StepIntent::Classification));
        assert_eq!(classify_action("Generate labels"), Some(StepIntent::Labeling));
        assert_eq!(classify_action("Validate quality"), Some(StepIntent::Validation));
    }

    #[test]
    fn test_prefix_order() {
        // Extraction wins over labeling for image analysis
        assert_eq!(classify_action("Analyze image contents"), Some(StepIntent::Extraction));
        assert_eq!(
            classify_action("Analyze and categorize the text"),
            Some(StepIntent::Classification)
        );
        assert_eq!(
            classify_action("Analyze the extracted text"),
            Some(StepIntent::Labeling)
        );
        assert_eq!(classify_action("Quality check"), Some(StepIntent::Validation));
    }

    #[test]
    fn test_use_tool() {
        assert_eq!(classify_action("Use vision_analyzer"), Some(StepIntent::Extraction));
        assert_eq!(classify_action("use label_generator now"), Some(StepIntent::Labeling));
        assert_eq!(
            classify_action("Use pii_scrubber on text"),
            Some(StepIntent::Custom("pii_scrubber".to_string()))
        );
    }

    #[test]
    fn test_unmatched() {
        assert_eq!(classify_action("Summarize the document"), None);
        assert_eq!(classify_action(""), None);
    }

    #[test]
    fn test_explicit_intent_wins() {
        let step = PlanStep::new(1, "analyzer", "Summarize").with_intent(StepIntent::Labeling);
        assert_eq!(resolve(&step), Some(StepIntent::Labeling));
    }
}
