//! Result Cache
//!
//! Two tiers in front of the labeling pipeline:
//! - an in-memory LRU with lazy TTL expiry
//! - an optional persisted store, looked up by file id only
//!
//! Keys are `file_id:<id>` when an id is supplied, otherwise
//! `file_hash:<sha256 of the file bytes>`.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::agent::quality::status_for;
use crate::config::Config;

const HASH_CHUNK_SIZE: usize = 4096;

struct CacheEntry {
    result: Value,
    inserted: Instant,
}

/// Memory tier statistics
#[derive(Debug, Clone, Serialize)]
pub struct MemoryCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub ttl_seconds: u64,
    /// Least recently used first
    pub keys: Vec<String>,
}

/// Bounded LRU with per-entry TTL, checked at read time
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    max_size: usize,
    ttl: Duration,
}

impl MemoryCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_size: capacity.get(),
            ttl,
        }
    }

    /// Fresh entry for `key`; promotes it to most recently used
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            None => return None,
            Some(entry) => entry.inserted.elapsed() > self.ttl,
        };

        if expired {
            entries.pop(key);
            debug!("Cache EXPIRED: {}", key);
            return None;
        }
        entries.get(key).map(|e| e.result.clone())
    }

    /// Insert, replacing any prior entry and evicting the LRU one when full
    pub fn set(&self, key: &str, result: Value) {
        let mut entries = self.entries.lock();
        entries.pop(key);
        if let Some((evicted, _)) = entries.push(
            key.to_string(),
            CacheEntry {
                result,
                inserted: Instant::now(),
            },
        ) {
            debug!("Cache EVICT: {}", evicted);
        }
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.lock().pop(key).map(|e| e.result)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoryCacheStats {
        let entries = self.entries.lock();
        MemoryCacheStats {
            size: entries.len(),
            max_size: self.max_size,
            ttl_seconds: self.ttl.as_secs(),
            keys: entries.iter().rev().map(|(k, _)| k.clone()).collect(),
        }
    }
}

/// Record held by an external persisted store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedRecord {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub modality: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub visual_features: String,
    #[serde(default)]
    pub labels: Value,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl PersistedRecord {
    /// Convert into a pipeline result marked `cached`
    pub fn into_result(self) -> Value {
        let confidence = self
            .metadata
            .as_ref()
            .and_then(|m| m.get("confidence"))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let labels = if self.labels.is_null() {
            json!({})
        } else {
            self.labels
        };

        let mut result = json!({
            "file_name": self.file_name,
            "file_id": self.file_id,
            "modality": self.modality,
            "category": self.category,
            "raw_text": self.raw_text,
            "visual_features": self.visual_features,
            "labels": labels,
            "quality_score": self.quality_score,
            "quality_status": status_for(self.quality_score),
            "confidence": confidence,
            "success": true,
            "cached": true,
            "cached_at": self.updated_at.unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
            "processing_time": self.processing_time,
        });
        if let (Some(metadata), Some(obj)) = (self.metadata, result.as_object_mut()) {
            if !metadata.is_empty() {
                obj.insert("processing_metadata".to_string(), Value::Object(metadata));
            }
        }
        result
    }
}

/// External store consulted when the memory tier misses
#[async_trait]
pub trait PersistedStore: Send + Sync {
    async fn get_by_file_id(&self, file_id: &str) -> anyhow::Result<Option<PersistedRecord>>;
}

/// Which tier answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    Memory,
    Database,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Database => "database",
        }
    }
}

/// A cache hit and its source
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub result: Value,
    pub source: CacheSource,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_cache_enabled: bool,
    pub db_cache_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_cache: Option<MemoryCacheStats>,
    pub hits: u64,
    pub misses: u64,
}

/// Two-tier result cache
pub struct ResultCache {
    memory: Option<MemoryCache>,
    store: Option<Arc<dyn PersistedStore>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    pub fn new(memory: Option<MemoryCache>, store: Option<Arc<dyn PersistedStore>>) -> Self {
        info!(
            "Result cache initialized (memory: {}, db: {})",
            memory.is_some(),
            store.is_some()
        );
        Self {
            memory,
            store,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build from configuration; `store` is used only when the db tier is enabled
    pub fn from_config(config: &Config, store: Option<Arc<dyn PersistedStore>>) -> Self {
        if !config.caching_enabled {
            return Self::disabled();
        }
        let memory = config
            .memory_cache_enabled
            .then(|| MemoryCache::new(config.memory_cache_size, config.memory_cache_ttl()));
        let store = if config.db_cache_enabled { store } else { None };
        Self::new(memory, store)
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// `file_id:<id>` or `file_hash:<sha256>`
    pub async fn cache_key(file_path: &Path, file_id: Option<&str>) -> String {
        match file_id {
            Some(id) if !id.is_empty() => format!("file_id:{}", id),
            _ => format!("file_hash:{}", file_hash(file_path).await),
        }
    }

    /// Look up a result: memory first, then the persisted store by id
    pub async fn get(&self, file_path: &Path, file_id: Option<&str>) -> Option<CacheHit> {
        if self.memory.is_none() && self.store.is_none() {
            return None;
        }
        let key = Self::cache_key(file_path, file_id).await;

        if let Some(memory) = &self.memory {
            if let Some(result) = memory.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                info!("Cache HIT (memory): {}", key);
                return Some(CacheHit {
                    result,
                    source: CacheSource::Memory,
                });
            }
        }

        if let (Some(store), Some(id)) = (&self.store, file_id.filter(|id| !id.is_empty())) {
            match store.get_by_file_id(id).await {
                Ok(Some(record)) => {
                    let result = record.into_result();
                    if let Some(memory) = &self.memory {
                        memory.set(&key, result.clone());
                    }
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    info!("Cache HIT (database): {}", key);
                    return Some(CacheHit {
                        result,
                        source: CacheSource::Database,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("Database cache lookup failed: {}", e),
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache MISS: {}", key);
        None
    }

    /// Store a result in the memory tier
    pub async fn store(&self, file_path: &Path, file_id: Option<&str>, result: &Value) {
        let Some(memory) = &self.memory else {
            return;
        };
        let key = Self::cache_key(file_path, file_id).await;

        let mut result = result.clone();
        if let Some(obj) = result.as_object_mut() {
            if obj.contains_key("cached") {
                obj.insert("cached".to_string(), Value::Bool(false));
            }
        }
        memory.set(&key, result);
        debug!("Cache SET: {}", key);
    }

    pub fn clear(&self) {
        if let Some(memory) = &self.memory {
            memory.clear();
        }
        info!("All caches cleared");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_cache_enabled: self.memory.is_some(),
            db_cache_enabled: self.store.is_some(),
            memory_cache: self.memory.as_ref().map(|m| m.stats()),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// SHA-256 of the file bytes; falls back to hashing the file name
pub async fn file_hash(path: &Path) -> String {
    match hash_file(path).await {
        Ok(hash) => hash,
        Err(e) => {
            warn!("Failed to hash {}: {}", path.display(), e);
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            hex::encode(Sha256::digest(name.as_bytes()))
        }
    }
}

async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
