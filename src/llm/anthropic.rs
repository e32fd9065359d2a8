//! Anthropic-backed narrative engine.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::llm::{strip_json_fences, ChatMessage, ChatRole, NarrativeEngine};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_VERSION: &str = "2023-06-01";

/// Narrative engine over the Anthropic messages API.
pub struct AnthropicEngine {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ApiContent>,
}

#[derive(Debug, Deserialize)]
struct ApiContent {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

impl AnthropicEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm_timeout_secs);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("llm http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl NarrativeEngine for AnthropicEngine {
    async fn complete_json(
        &self,
        system: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<serde_json::Value> {
        let api_messages: Vec<ApiMessage> = messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    ChatRole::User => "user".to_string(),
                    ChatRole::Assistant => "assistant".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        let request = ApiRequest {
            model: self.model.clone(),
            messages: api_messages,
            max_tokens: 4096,
            system: (!system.is_empty()).then(|| system.to_string()),
            temperature,
        };

        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::LlmUnavailable(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::LlmUnavailable(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                return Err(Error::LlmUnavailable(format!(
                    "API error ({}): {}",
                    error.error.error_type, error.error.message
                )));
            }
            return Err(Error::LlmUnavailable(format!(
                "API error ({}): {}",
                status, body
            )));
        }

        let api_response: ApiResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LlmUnavailable(format!("failed to parse response: {}", e)))?;

        let text = api_response
            .content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        serde_json::from_str(strip_json_fences(&text))
            .map_err(|e| Error::LlmUnavailable(format!("verdict is not valid JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_engine_construction() {
        let config = EngineConfig::default().with_llm_api_key("test-key");
        let engine = AnthropicEngine::new(&config).unwrap();
        assert_eq!(engine.model, "claude-3-5-sonnet-20241022");
        assert_eq!(engine.timeout, Duration::from_secs(30));
    }
}
