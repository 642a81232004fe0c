//! LLM Client
//!
//! Thin OpenAI-compatible chat completions client used for plan generation
//! and agent decisions. Agents only see the [`LlmClient`] trait, so tests and
//! alternative backends can plug in without touching the supervisor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Text completion backend
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete `prompt` under the given system instruction
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

/// Chat client configuration
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl ChatClientConfig {
    /// Build from the labeler config for the given model
    pub fn from_config(config: &crate::config::Config, model: &str) -> Result<Self> {
        let api_key = config.require_api_key()?.to_string();
        Ok(Self {
            base_url: config.llm_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            temperature: 0.2,
            max_tokens: 2048,
            timeout: config.llm_timeout,
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client
pub struct ChatClient {
    config: ChatClientConfig,
    client: reqwest::Client,
}

impl ChatClient {
    /// Create a client; the configured timeout applies to every request
    pub fn new(config: ChatClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl LlmClient for ChatClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM error {}: {}", status, body);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("Chat completion returned no content")?;

        debug!("LLM {} returned {} chars", self.config.model, content.len());
        Ok(content.trim().to_string())
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_requires_key() {
        let config = crate::config::Config::default();
        assert!(ChatClientConfig::from_config(&config, "gpt-4o").is_err());

        let config = crate::config::Config {
            api_key: Some("sk-test".to_string()),
            llm_base_url: "http://localhost:8080/v1/".to_string(),
            ..Default::default()
        };
        let chat = ChatClientConfig::from_config(&config, "gpt-4o").unwrap();
        assert_eq!(chat.base_url, "http://localhost:8080/v1");
        assert_eq!(chat.model, "gpt-4o");
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"{\"steps\":[]}"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("{\"steps\":[]}")
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_errors() {
        let client = ChatClient::new(ChatClientConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            api_key: "sk-test".to_string(),
            model: "test".to_string(),
            temperature: 0.0,
            max_tokens: 16,
            timeout: Duration::from_millis(500),
        })
        .unwrap();
        assert!(client.complete("sys", "hi").await.is_err());
        assert_eq!(client.model(), "test");
    }
}
