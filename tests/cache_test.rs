//! Result cache behaviour, alone and in front of the orchestrator

use agentic_labeler::cache::file_hash;
use agentic_labeler::{
    CacheSource, Config, ExperienceDatabase, MemoryCache, OnStepFailure, Orchestrator,
    ResultCache,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(dir: &std::path::Path) -> Orchestrator {
    let config = Config {
        output_dir: dir.join("out"),
        ..Config::default()
    };
    Orchestrator::builder(config)
        .experience(Arc::new(ExperienceDatabase::in_memory()))
        .build()
}

fn usage(orch: &Orchestrator, tool: &str) -> u64 {
    orch.tools()
        .stats()
        .into_iter()
        .find(|s| s.name == tool)
        .map(|s| s.usage_count)
        .unwrap_or(0)
}

#[tokio::test]
async fn test_second_request_is_served_from_memory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "Meeting notes about the spring product launch").unwrap();

    let orch = orchestrator(dir.path());
    let first = orch.process_file(&file, None).await;
    assert_eq!(first["success"], true);
    assert!(first.get("cache_hit").is_none());
    let extractions = usage(&orch, "ocr_extractor");
    assert_eq!(extractions, 1);

    let second = orch.process_file(&file, None).await;
    assert_eq!(second["cache_hit"], true);
    assert_eq!(second["cache_source"], "memory");
    assert_eq!(second["raw_text"], first["raw_text"]);
    assert_eq!(usage(&orch, "ocr_extractor"), extractions);
    assert_eq!(orch.experience().len(), 1);

    let stats = orch.cache().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_failed_results_are_not_cached() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("ghost.txt");
    let config = Config {
        output_dir: dir.path().join("out"),
        failure_policy: Some(OnStepFailure::Abort),
        ..Config::default()
    };
    let orch = Orchestrator::builder(config)
        .experience(Arc::new(ExperienceDatabase::in_memory()))
        .build();

    let result = orch.process_file(&missing, None).await;
    assert_eq!(result["success"], false);
    assert!(orch.cache().stats().memory_cache.unwrap().keys.is_empty());

    let again = orch.process_file(&missing, None).await;
    assert!(again.get("cache_hit").is_none());
    assert_eq!(orch.experience().len(), 2);
}

#[tokio::test]
async fn test_identical_bytes_share_a_hash_key() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("copy_of_a.txt");
    std::fs::write(&a, b"same bytes").unwrap();
    std::fs::write(&b, b"same bytes").unwrap();

    assert_eq!(file_hash(&a).await, file_hash(&b).await);
    let key = ResultCache::cache_key(&a, None).await;
    assert!(key.starts_with("file_hash:"));
    assert_eq!(key, ResultCache::cache_key(&b, None).await);
    assert_eq!(ResultCache::cache_key(&a, Some("a")).await, "file_id:a");

    let cache = ResultCache::new(Some(MemoryCache::new(8, Duration::from_secs(60))), None);
    cache.store(&a, None, &json!({"category": "memo"})).await;
    let hit = cache.get(&b, None).await.unwrap();
    assert_eq!(hit.source, CacheSource::Memory);
    assert_eq!(hit.result["category"], "memo");
}

#[test]
fn test_lru_eviction_respects_reads() {
    let cache = MemoryCache::new(3, Duration::from_secs(60));
    cache.set("k1", json!(1));
    cache.set("k2", json!(2));
    cache.set("k3", json!(3));

    // k1 becomes most recently used, so k2 is evicted next
    assert_eq!(cache.get("k1"), Some(json!(1)));
    cache.set("k4", json!(4));

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.get("k2"), None);
    assert_eq!(cache.get("k1"), Some(json!(1)));
    assert_eq!(cache.get("k3"), Some(json!(3)));
    assert_eq!(cache.get("k4"), Some(json!(4)));
}

#[test]
fn test_reinsert_replaces_without_growing() {
    let cache = MemoryCache::new(2, Duration::from_secs(60));
    cache.set("k", json!("old"));
    cache.set("k", json!("new"));
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("k"), Some(json!("new")));
}

#[tokio::test]
async fn test_expired_entries_are_dropped_on_read() {
    let cache = MemoryCache::new(4, Duration::from_millis(50));
    cache.set("k", json!({"v": 1}));
    assert!(cache.get("k").is_some());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.len(), 0);
}

#[tokio::test]
async fn test_rewritten_file_with_same_name_is_served_stale() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("notes.txt");
    std::fs::write(&file, "First draft of the budget memo").unwrap();

    let orch = orchestrator(dir.path());
    let first = orch.process_file(&file, None).await;
    assert_eq!(first["success"], true);

    // Results are keyed by file stem, so new content is not noticed until the entry expires
    std::fs::write(&file, "Completely different travel itinerary").unwrap();
    let second = orch.process_file(&file, None).await;
    assert_eq!(second["cache_hit"], true);
    assert_eq!(second["raw_text"], first["raw_text"]);
}
