//! Learning Insights
//!
//! Performance analysis over the experience log: success rate, quality by
//! modality and extraction method, recent quality trend, and plain-language
//! recommendations.

use crate::experience::{Experience, ExperienceDatabase};
use serde::Serialize;
use std::collections::BTreeMap;

/// Experiences considered "recent" for trend detection
const RECENT_WINDOW: usize = 10;

/// Direction of recent quality against the overall average
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTrend {
    Improving,
    Stable,
    Declining,
}

/// Per-group statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct GroupPerformance {
    pub count: usize,
    pub avg_quality: f64,
    pub success_rate: f64,
}

/// Aggregate performance analysis
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceAnalysis {
    pub total_experiences: usize,
    pub success_rate: f64,
    pub avg_quality: f64,
    pub avg_processing_time: f64,
    pub modality_performance: BTreeMap<String, GroupPerformance>,
    pub category_performance: BTreeMap<String, GroupPerformance>,
    pub extraction_method_performance: BTreeMap<String, GroupPerformance>,
    pub recent_avg_quality: f64,
    pub quality_trend: QualityTrend,
}

/// Summary of one high-quality experience
#[derive(Debug, Clone, Serialize)]
pub struct QualityExample {
    pub quality_score: f64,
    pub modality: String,
    pub category: String,
    pub extraction_method: String,
}

/// Full learning report
#[derive(Debug, Clone, Serialize)]
pub struct LearningInsights {
    pub performance: Option<PerformanceAnalysis>,
    pub recommendations: Vec<String>,
    pub high_quality_examples: Vec<QualityExample>,
    pub total_learning_examples: usize,
}

/// Analyze the experience log. `None` when it is empty.
pub fn analyze_performance(experiences: &[Experience]) -> Option<PerformanceAnalysis> {
    if experiences.is_empty() {
        return None;
    }

    let total = experiences.len();
    let successful = experiences.iter().filter(|e| e.success()).count();
    let avg_quality = experiences.iter().map(|e| e.quality_score()).sum::<f64>() / total as f64;
    let avg_processing_time =
        experiences.iter().map(|e| e.processing_time()).sum::<f64>() / total as f64;

    let modality_performance = group_by(experiences, "modality", "unknown");
    let category_performance = group_by(experiences, "category", "uncategorized");
    let extraction_method_performance = group_by(experiences, "extraction_method", "unknown");

    // Most recent first by timestamp (RFC 3339 strings sort chronologically)
    let mut recent: Vec<&Experience> = experiences.iter().collect();
    recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent.truncate(RECENT_WINDOW);
    let recent_avg_quality =
        recent.iter().map(|e| e.quality_score()).sum::<f64>() / recent.len() as f64;

    let quality_trend = if recent_avg_quality > avg_quality {
        QualityTrend::Improving
    } else if recent_avg_quality < avg_quality {
        QualityTrend::Declining
    } else {
        QualityTrend::Stable
    };

    Some(PerformanceAnalysis {
        total_experiences: total,
        success_rate: successful as f64 / total as f64,
        avg_quality,
        avg_processing_time,
        modality_performance,
        category_performance,
        extraction_method_performance,
        recent_avg_quality,
        quality_trend,
    })
}

fn group_by(
    experiences: &[Experience],
    field: &str,
    missing: &str,
) -> BTreeMap<String, GroupPerformance> {
    let mut groups: BTreeMap<String, (usize, f64, usize)> = BTreeMap::new();
    for exp in experiences {
        let key = exp.result_str(field).unwrap_or(missing).to_string();
        let entry = groups.entry(key).or_default();
        entry.0 += 1;
        entry.1 += exp.quality_score();
        if exp.success() {
            entry.2 += 1;
        }
    }

    groups
        .into_iter()
        .map(|(k, (count, quality, successes))| {
            (
                k,
                GroupPerformance {
                    count,
                    avg_quality: quality / count as f64,
                    success_rate: successes as f64 / count as f64,
                },
            )
        })
        .collect()
}

/// Recommendations derived from an analysis
pub fn recommendations(analysis: Option<&PerformanceAnalysis>) -> Vec<String> {
    let Some(analysis) = analysis else {
        return vec!["Start processing files to build experience database".to_string()];
    };

    let mut recs = Vec::new();

    if analysis.avg_quality < 0.6 {
        recs.push(
            "Overall quality is low. Consider reviewing extraction methods and prompts.".to_string(),
        );
    }

    if analysis.quality_trend == QualityTrend::Declining {
        recs.push(
            "Quality trend is declining. Review recent failures and adjust strategies.".to_string(),
        );
    }

    for (modality, stats) in &analysis.modality_performance {
        if stats.avg_quality < 0.6 {
            recs.push(format!(
                "{} processing quality is low ({:.2}). Consider improving {} extraction.",
                modality, stats.avg_quality, modality
            ));
        }
    }

    let best_method = analysis
        .extraction_method_performance
        .iter()
        .max_by(|a, b| {
            a.1.avg_quality
                .partial_cmp(&b.1.avg_quality)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    if let Some((method, stats)) = best_method {
        if stats.avg_quality > 0.7 {
            recs.push(format!(
                "Best performing extraction method: {} (quality: {:.2})",
                method, stats.avg_quality
            ));
        }
    }

    if analysis.success_rate < 0.8 {
        recs.push(format!(
            "Success rate is {:.1}%. Review error patterns and improve error handling.",
            analysis.success_rate * 100.0
        ));
    }

    if recs.is_empty() {
        recs.push("System is performing well! Keep up the good work.".to_string());
    }

    recs
}

/// Full insight report for a database
pub fn learning_insights(db: &ExperienceDatabase) -> LearningInsights {
    let experiences = db.all();
    let performance = analyze_performance(&experiences);
    let recommendations = recommendations(performance.as_ref());

    let high_quality_examples = db
        .get_high_quality_experiences(0.8, 5)
        .iter()
        .map(|e| QualityExample {
            quality_score: e.quality_score(),
            modality: e.result_str("modality").unwrap_or("unknown").to_string(),
            category: e.result_str("category").unwrap_or("unknown").to_string(),
            extraction_method: e
                .result_str("extraction_method")
                .unwrap_or("unknown")
                .to_string(),
        })
        .collect();

    LearningInsights {
        performance,
        recommendations,
        high_quality_examples,
        total_learning_examples: experiences.len(),
    }
}
