//! LLM provider adapters and routing
//!
//! Each backend (Ollama, OpenAI-compatible) implements [`ChatProvider`]; the
//! [`ProviderRouter`] maps the `<provider>/` prefix of a model identifier to
//! the registered adapter. Adding a backend means one new implementation and
//! one `register` call, not new branching in handlers.

pub mod ollama;
pub mod openai;

pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

use crate::chat::ChatTurn;
use crate::config::ProvidersConfig;
use crate::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced by a provider adapter
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The HTTP request to the provider could not be sent
    #[error("request to provider failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The provider answered with a non-2xx status
    #[error("provider returned status {status}: {body}")]
    Status {
        /// HTTP status code returned by the provider
        status: u16,
        /// Raw response body, for diagnostics
        body: String,
    },

    /// The provider answered 2xx but the body did not match the wire format
    #[error("provider returned malformed response: {0}")]
    Malformed(String),

    /// The adapter is missing required configuration
    #[error("provider is not configured: {0}")]
    Config(String),
}

/// A chat completion backend
///
/// Implementations own serialization into their provider's wire format and
/// deserialization of the reply back into the neutral [`ChatTurn`] shape.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send the ordered context to the provider and return its single reply
    ///
    /// `model` is the provider-native model name (the part after the `/` in
    /// the model identifier). `stream` is forwarded to the provider but the
    /// contract is non-streaming: one complete assistant turn comes back.
    /// The returned turn may have empty content when the provider produced
    /// no text; callers decide what that means.
    async fn complete(
        &self,
        model: &str,
        messages: &[ChatTurn],
        stream: bool,
    ) -> Result<ChatTurn, ProviderError>;
}

/// Maps model identifier prefixes to provider adapters
#[derive(Default)]
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
}

impl ProviderRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under a provider name
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ChatProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Build a router with the adapters enabled by configuration
    ///
    /// A provider with no base URL configured is simply not registered, so
    /// routing to it fails closed with `UnsupportedProvider`.
    pub fn from_config(config: &ProvidersConfig, client: reqwest::Client) -> Self {
        let mut router = Self::new();

        if let Some(base_url) = &config.ollama_base_url {
            router.register(
                "ollama",
                Arc::new(OllamaProvider::new(client.clone(), base_url.clone())),
            );
        }

        if let Some(base_url) = &config.openai_base_url {
            router.register(
                "openai",
                Arc::new(OpenAiProvider::new(
                    client,
                    base_url.clone(),
                    config.openai_api_key.clone(),
                )),
            );
        }

        router
    }

    /// Resolve a `<provider>/<name>` model identifier to an adapter
    ///
    /// Returns the adapter and the provider-native model name (the suffix,
    /// passed through verbatim). Fails with `UnsupportedProvider` when the
    /// identifier has no `/` or the prefix is not registered; this happens
    /// before any outbound call.
    pub fn resolve<'a>(
        &self,
        model_id: &'a str,
    ) -> Result<(Arc<dyn ChatProvider>, &'a str), AppError> {
        let (prefix, model) = model_id
            .split_once('/')
            .ok_or_else(|| AppError::UnsupportedProvider(model_id.to_string()))?;

        let provider = self
            .providers
            .get(prefix)
            .cloned()
            .ok_or_else(|| AppError::UnsupportedProvider(model_id.to_string()))?;

        Ok((provider, model))
    }
}
