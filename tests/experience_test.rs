//! Experience log recall, persistence and insights

use agentic_labeler::insights::learning_insights;
use agentic_labeler::{ExperienceDatabase, ExperienceRecord};
use serde_json::{json, Map, Value};
use tempfile::TempDir;

fn fields(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

#[test]
fn test_recall_orders_by_score_and_keeps_ties_stable() {
    let db = ExperienceDatabase::in_memory();
    // scores against {modality: image, category: invoice}
    db.store_experience(fields(json!({"n": 0, "modality": "audio", "category": "memo"}))); // 0.0
    db.store_experience(fields(json!({"n": 1, "modality": "image", "category": "receipt"}))); // 0.5
    db.store_experience(fields(json!({"n": 2, "modality": "image", "category": "invoice"}))); // 1.0
    db.store_experience(fields(json!({"n": 3, "modality": "image", "category": "invoice_scan"}))); // 0.75
    db.store_experience(fields(json!({"n": 4, "modality": "image", "category": "invoice"}))); // 1.0

    let query = fields(json!({"modality": "image", "category": "invoice"}));
    let all = db.recall_similar_experiences(&query, 10);
    let order: Vec<i64> = all
        .iter()
        .map(|s| s.experience.field("n").unwrap().as_i64().unwrap())
        .collect();
    assert_eq!(order, vec![2, 4, 3, 1, 0]);

    let scores: Vec<f64> = all.iter().map(|s| s.score).collect();
    assert_eq!(scores, vec![1.0, 1.0, 0.75, 0.5, 0.0]);
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));

    let top = db.recall_similar_experiences(&query, 2);
    assert_eq!(top.len(), 2);
    assert_eq!(top[0].experience.field("n"), Some(&json!(2)));
    assert_eq!(top[1].experience.field("n"), Some(&json!(4)));
}

#[test]
fn test_recall_on_empty_database() {
    let db = ExperienceDatabase::in_memory();
    let query = fields(json!({"modality": "image"}));
    assert!(db.recall_similar_experiences(&query, 3).is_empty());
    assert_eq!(db.statistics().total, 0);
    assert_eq!(
        serde_json::to_value(db.statistics()).unwrap(),
        json!({"total": 0})
    );
}

#[test]
fn test_log_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("data").join("experience_db.json");

    let first_id = {
        let db = ExperienceDatabase::open(&path);
        assert!(db.is_empty());
        let id = db.store_experience(fields(json!({"quality_score": 0.9, "category": "report"})));
        db.store_experience(fields(json!({"quality_score": 0.4, "category": "memo"})));
        id
    };
    assert!(path.exists());

    let db = ExperienceDatabase::open(&path);
    assert_eq!(db.len(), 2);
    let all = db.all();
    assert_eq!(all[0].id, first_id);
    assert_eq!(all[0].field("category"), Some(&json!("report")));
    assert!(!all[1].timestamp.is_empty());

    let stats = db.statistics();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.max_quality, Some(0.9));
    assert_eq!(stats.min_quality, Some(0.4));
}

#[test]
fn test_corrupt_log_starts_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("experience_db.json");
    std::fs::write(&path, "{ not json").unwrap();

    let db = ExperienceDatabase::open(&path);
    assert!(db.is_empty());
    db.store_experience(fields(json!({"quality_score": 0.5})));
    assert_eq!(ExperienceDatabase::open(&path).len(), 1);
}

#[test]
fn test_identical_payloads_share_an_id() {
    let db = ExperienceDatabase::in_memory();
    let a = db.store_experience(fields(json!({"category": "x", "quality_score": 0.5})));
    let b = db.store_experience(fields(json!({"quality_score": 0.5, "category": "x"})));
    let c = db.store_experience(fields(json!({"category": "y", "quality_score": 0.5})));

    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.len(), 16);
    assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    assert_eq!(db.len(), 3);
}

#[test]
fn test_high_quality_returns_most_recent() {
    let db = ExperienceDatabase::in_memory();
    for (n, q) in [0.9, 0.2, 0.8, 0.95, 0.75].iter().enumerate() {
        db.store_experience(fields(json!({"n": n, "quality_score": q})));
    }

    let best = db.get_high_quality_experiences(0.7, 2);
    let order: Vec<&Value> = best.iter().map(|e| e.field("n").unwrap()).collect();
    assert_eq!(order, vec![&json!(3), &json!(4)]);
}

#[test]
fn test_insights_from_records() {
    let db = ExperienceDatabase::in_memory();
    for (category, quality, success) in [
        ("invoice", 0.9, true),
        ("invoice", 0.7, true),
        ("memo", 0.3, false),
    ] {
        let record = ExperienceRecord {
            task: json!({"type": "label_file"}),
            result: json!({"category": category}),
            quality_score: quality,
            processing_time: 1.5,
            success,
            modality: Some("text_document".to_string()),
            category: Some(category.to_string()),
            extraction_method: Some("plain_text".to_string()),
            file_extension: Some(".txt".to_string()),
        };
        db.store_experience(record.into_fields());
    }

    let insights = learning_insights(&db);
    assert_eq!(insights.total_learning_examples, 3);
    let performance = insights.performance.unwrap();
    assert_eq!(performance.total_experiences, 3);
    assert!((performance.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(insights.high_quality_examples.len(), 1);
    assert_eq!(insights.high_quality_examples[0].category, "invoice");
}

#[test]
fn test_recall_looks_inside_task_and_matches_non_strings_loosely() {
    let db = ExperienceDatabase::in_memory();
    db.store_experience(fields(json!({"task": {"type": "label_file"}, "attempts": 12})));
    db.store_experience(fields(json!({"task": {"type": "summarize"}, "attempts": 3})));

    // `type` lives only under `task`; 12 contains "1" as text
    let query = fields(json!({"type": "label_file", "attempts": 1}));
    let found = db.recall_similar_experiences(&query, 2);
    assert_eq!(found[0].experience.field("attempts"), Some(&json!(12)));
    assert_eq!(found[0].score, 0.75);
    assert_eq!(found[1].score, 0.0);
}
