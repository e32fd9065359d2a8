//! Narrative engine adapters.
//!
//! The engine is invoked at exactly three points - risk assessment,
//! critic verdict, policy-judge verdict - and always through
//! [`NarrativeEngine::complete_json`]. Control flow never depends on
//! free-form text; callers parse a JSON verdict and fail closed when
//! the engine is unavailable.

mod anthropic;
mod scripted;

pub use anthropic::AnthropicEngine;
pub use scripted::ScriptedEngine;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat roles accepted by the narrative engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Blocking JSON-completion interface over an external LLM.
#[async_trait]
pub trait NarrativeEngine: Send + Sync {
    /// Complete a prompt and parse the response as a JSON object.
    ///
    /// Returns [`crate::error::Error::LlmUnavailable`] on timeout, HTTP
    /// failure or malformed JSON; callers apply their own fail-closed
    /// defaults.
    async fn complete_json(
        &self,
        system: &str,
        messages: &[ChatMessage],
        temperature: f64,
    ) -> Result<Value>;
}

/// Strip markdown code fences an engine may wrap around JSON output.
pub(crate) fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_json_fences("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
        assert_eq!(strip_json_fences("```\n{}\n```"), "{}");
    }
}
