//! OpenAI-compatible provider adapter
//!
//! Talks to the chat completions API (`POST /v1/chat/completions`) with a
//! Bearer API key. Works against any OpenAI-compatible server.

use crate::chat::ChatTurn;
use crate::providers::{ChatProvider, ProviderError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Adapter for an OpenAI-compatible completions API
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatTurn,
}

impl OpenAiProvider {
    /// Create an adapter pointing at `base_url` with an optional API key
    pub fn new(client: reqwest::Client, base_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url,
            api_key,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatTurn],
        stream: bool,
    ) -> Result<ChatTurn, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );

        tracing::debug!(
            url = %url,
            model = %model,
            context_len = messages.len(),
            "Calling OpenAI chat completions API"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&OpenAiChatRequest {
                model,
                messages,
                stream,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            tracing::error!(
                status = status.as_u16(),
                body = %body,
                "OpenAI API returned error status"
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let reply: OpenAiChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("{}: {}", e, body)))?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Malformed("response has no choices".to_string()))?;

        Ok(ChatTurn {
            role: "assistant".to_string(),
            content: choice.message.content,
        })
    }
}
