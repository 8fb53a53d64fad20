//! DeepSeek chat-completions client.
//!
//! One HTTP client backs both external collaborators: free-text generation
//! for facilitator prose and the insight-detection oracle. The oracle path
//! routes its raw completion through [`crate::oracle::recover_indices`], so
//! response-format variance never leaks past this module.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::ReasoningEndpoint;
use crate::generation::{ChatTurn, GenerationError, TextGenerator};
use crate::oracle::{recover_indices, InsightOracle, OracleError};
use crate::prompts;

/// Generation sampling bounds. Responses are display text; a hard token cap
/// keeps them chat-sized.
const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 800;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for a chat-completions endpoint (DeepSeek-compatible).
pub struct DeepSeekClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl DeepSeekClient {
    pub fn new(endpoint: &ReasoningEndpoint) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GenerationError::Request(format!("client build failed: {e}")))?;
        Ok(Self {
            http,
            url: format!("{}/chat/completions", endpoint.url.trim_end_matches('/')),
            api_key: endpoint.api_key.clone(),
            model: endpoint.model.clone(),
        })
    }

    /// One completion round-trip; returns the first choice's content.
    async fn complete(&self, turns: &[ChatTurn]) -> Result<String, GenerationError> {
        let body = json!({
            "model": self.model,
            "messages": turns,
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Request(format!(
                "endpoint returned {status}: {body}"
            )));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        match parsed["choices"][0]["message"]["content"].as_str() {
            Some(content) if !content.is_empty() => Ok(content.to_string()),
            _ => Err(GenerationError::Malformed(
                "no content in first choice".into(),
            )),
        }
    }
}

#[async_trait]
impl TextGenerator for DeepSeekClient {
    async fn generate(&self, turns: &[ChatTurn]) -> Result<String, GenerationError> {
        self.complete(turns).await
    }
}

#[async_trait]
impl InsightOracle for DeepSeekClient {
    async fn detect(&self, message: &str, candidates: &[String]) -> Result<Vec<usize>, OracleError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let turns = [
            ChatTurn::system(prompts::insight_detector(candidates)),
            ChatTurn::user(message),
        ];
        let raw = self.complete(&turns).await.map_err(|e| match e {
            GenerationError::Request(msg) => OracleError::Request(msg),
            GenerationError::Malformed(msg) => OracleError::Unusable(msg),
        })?;
        Ok(recover_indices(&raw, candidates.len()))
    }
}
