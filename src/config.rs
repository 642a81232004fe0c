//! Configuration management

use crate::agent::supervisor::OnStepFailure;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required credential: {0}")]
    MissingCredential(&'static str),
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Labeler configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API key for the OpenAI-compatible endpoint (required unless offline)
    pub api_key: Option<String>,

    /// Base URL of the chat completions API
    pub llm_base_url: String,

    /// Model used for plan generation
    pub planner_model: String,

    /// Model used for agent decisions
    pub decision_model: String,

    /// Per-request LLM timeout
    pub llm_timeout: Duration,

    /// JSON file holding the experience log
    pub experience_path: PathBuf,

    /// Default directory for labeled output
    pub output_dir: PathBuf,

    /// Master switch for result caching
    pub caching_enabled: bool,

    /// In-memory LRU tier
    pub memory_cache_enabled: bool,

    /// Persisted-store tier
    pub db_cache_enabled: bool,

    /// Maximum entries in the memory tier
    pub memory_cache_size: usize,

    /// Memory tier TTL in seconds
    pub memory_cache_ttl_secs: u64,

    /// Concurrent workers in the pool
    pub max_workers: usize,

    /// Replans allowed per task before giving up
    pub max_replans: u32,

    /// Short-term memory capacity per agent
    pub short_term_size: usize,

    /// Fixed step-failure policy; `None` lets the supervisor decide per failure
    pub failure_policy: Option<OnStepFailure>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            llm_base_url: "https://api.openai.com/v1".to_string(),
            planner_model: "gpt-4o".to_string(),
            decision_model: "gpt-4o-mini".to_string(),
            llm_timeout: Duration::from_secs(60),
            experience_path: PathBuf::from("data/experience_db.json"),
            output_dir: PathBuf::from("output"),
            caching_enabled: true,
            memory_cache_enabled: true,
            db_cache_enabled: true,
            memory_cache_size: 100,
            memory_cache_ttl_secs: 3600,
            max_workers: 4,
            max_replans: 3,
            short_term_size: 10,
            failure_policy: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let llm_base_url = std::env::var("LLM_BASE_URL").unwrap_or(defaults.llm_base_url);
        let planner_model = std::env::var("PLANNER_MODEL").unwrap_or(defaults.planner_model);
        let decision_model = std::env::var("DECISION_MODEL").unwrap_or(defaults.decision_model);

        let llm_timeout = std::env::var("LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.llm_timeout);

        let experience_path = std::env::var("LABELER_EXPERIENCE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.experience_path);

        let output_dir = std::env::var("LABELER_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);

        let caching_enabled = env_flag("ENABLE_CACHING", true);
        let memory_cache_enabled = env_flag("ENABLE_MEMORY_CACHE", true);
        let db_cache_enabled = env_flag("ENABLE_DB_CACHE", true);

        let memory_cache_size = env_number("MEMORY_CACHE_SIZE", defaults.memory_cache_size)?;
        let memory_cache_ttl_secs =
            env_number("MEMORY_CACHE_TTL", defaults.memory_cache_ttl_secs)?;
        let max_workers = env_number("LABELER_MAX_WORKERS", defaults.max_workers)?;
        let max_replans = env_number("LABELER_MAX_REPLANS", defaults.max_replans)?;
        let short_term_size = env_number("LABELER_SHORT_TERM_SIZE", defaults.short_term_size)?;

        let failure_policy = match std::env::var("LABELER_FAILURE_POLICY") {
            Ok(v) if v.trim().is_empty() || v.eq_ignore_ascii_case("decide") => None,
            Ok(v) => Some(v.parse::<OnStepFailure>()?),
            Err(_) => None,
        };

        let config = Self {
            api_key,
            llm_base_url,
            planner_model,
            decision_model,
            llm_timeout,
            experience_path,
            output_dir,
            caching_enabled,
            memory_cache_enabled,
            db_cache_enabled,
            memory_cache_size,
            memory_cache_ttl_secs,
            max_workers,
            max_replans,
            short_term_size,
            failure_policy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory_cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MEMORY_CACHE_SIZE",
                value: "0".to_string(),
            });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LABELER_MAX_WORKERS",
                value: "0".to_string(),
            });
        }
        if self.short_term_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LABELER_SHORT_TERM_SIZE",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// The API key, or an error when it is not configured
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential("OPENAI_API_KEY"))
    }

    /// Memory tier TTL
    pub fn memory_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_cache_ttl_secs)
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn env_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
        Err(_) => Ok(default),
    }
}
