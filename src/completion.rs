//! Text-completion port and its OpenAI-compatible HTTP adapter.
//!
//! The orchestrator owns prompt construction and deadlines; adapters only
//! move a [`CompletionRequest`] over the wire and hand back the text.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::config::CompletionConfig;
use crate::error::{ForgeError, Result};
use crate::profile::Profile;

/// Instruction preceding the continuity block.
pub const CONTINUITY_PREAMBLE: &str = "Context only. The previous section ended with the \
passage below. Keep names, tone and facts consistent with it, but do not restate, \
summarise or continue it verbatim.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub profile: Profile,
    /// Tail of the preceding output, sent as its own context block.
    pub continuity: Option<String>,
    /// Persona and constraints.
    pub instructions: String,
    /// The (possibly placeholder-protected) source material.
    pub user_content: String,
    pub target_words: u32,
    pub pages: u32,
    /// `(index, total)` when the request is one chunk of several.
    pub section: Option<(usize, usize)>,
}

#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Chat-completions client for OpenAI and compatible servers.
pub struct OpenAiCompletion {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl OpenAiCompletion {
    pub fn new(config: &CompletionConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| ForgeError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.into(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    /// Build from config, reading the key from the configured variable.
    pub fn from_env(config: &CompletionConfig) -> Result<Self> {
        let key = std::env::var(&config.api_key_env).map_err(|_| {
            ForgeError::Config(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(config, key)
    }

    fn build_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.instructions,
        })];
        if let Some(context) = &request.continuity {
            messages.push(serde_json::json!({
                "role": "system",
                "content": format!("{CONTINUITY_PREAMBLE}\n\n{context}"),
            }));
        }
        messages.push(serde_json::json!({
            "role": "user",
            "content": request.user_content,
        }));
        messages
    }
}

#[async_trait]
impl TextCompletion for OpenAiCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": Self::build_messages(request),
            "max_tokens": self.max_tokens,
        });
        if let Some(temp) = self.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ForgeError::Completion(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ForgeError::Completion(format!(
                "backend returned {}: {}",
                status.as_u16(),
                text.chars().take(200).collect::<String>()
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ForgeError::Completion(format!("invalid response body: {e}")))?;

        json["choices"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|c| c["message"]["content"].as_str())
            .map(str::to_string)
            .ok_or_else(|| ForgeError::Completion("response has no message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(continuity: Option<&str>) -> CompletionRequest {
        CompletionRequest {
            profile: Profile::Narrative,
            continuity: continuity.map(str::to_string),
            instructions: "be brief".into(),
            user_content: "a story".into(),
            target_words: 250,
            pages: 1,
            section: None,
        }
    }

    #[test]
    fn continuity_is_a_separate_message() {
        let messages = OpenAiCompletion::build_messages(&request(Some("the end of part one")));
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["content"], "be brief");
        let context = messages[1]["content"].as_str().unwrap();
        assert!(context.starts_with(CONTINUITY_PREAMBLE));
        assert!(context.ends_with("the end of part one"));
        assert_eq!(messages[2]["role"], "user");
    }

    #[test]
    fn no_continuity_message_without_token() {
        let messages = OpenAiCompletion::build_messages(&request(None));
        assert_eq!(messages.len(), 2);
    }
}
