//! Ollama provider adapter
//!
//! Talks to the Ollama chat API (`POST /api/chat`).

use crate::chat::ChatTurn;
use crate::providers::{ChatProvider, ProviderError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Adapter for a local or remote Ollama server
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatTurn,
    #[allow(dead_code)]
    done: Option<bool>,
}

impl OllamaProvider {
    /// Create an adapter pointing at `base_url` (e.g. http://localhost:11434)
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatTurn],
        stream: bool,
    ) -> Result<ChatTurn, ProviderError> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));

        tracing::debug!(
            url = %url,
            model = %model,
            context_len = messages.len(),
            "Calling Ollama chat API"
        );

        let response = self
            .client
            .post(&url)
            .json(&OllamaChatRequest {
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
                "Ollama API returned error status"
            );
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let reply: OllamaChatResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("{}: {}", e, body)))?;

        Ok(ChatTurn {
            role: "assistant".to_string(),
            content: reply.message.content,
        })
    }
}
