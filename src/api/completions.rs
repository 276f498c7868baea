//! Chat completions endpoint
//!
//! Reachable directly, or implicitly as the continuation of posting a
//! message. With a `conversation_id` the context comes from the store alone
//! and the reply is persisted and broadcast; without one the request's
//! inline messages are completed one-shot with no persistence.

use crate::auth::Identity;
use crate::chat::{ChatTurn, Message};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, response::Json, Extension};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Request for a chat completion
#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    /// Model identifier of the form `<provider>/<name>`
    pub model: String,
    /// Inline messages; only used when no conversation is attached
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
    /// Forwarded to the provider; the reply is still a single message
    #[serde(default)]
    pub stream: bool,
    /// Conversation to complete against; when set, context is read from the
    /// store and the reply is persisted into it
    pub conversation_id: Option<String>,
}

/// The completion's reply: a stored message when a conversation was
/// attached, otherwise the raw provider turn
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CompletionReply {
    /// Reply persisted into a conversation
    Stored(Message),
    /// One-shot reply, not persisted
    Raw(ChatTurn),
}

/// Response for a chat completion
///
/// `message` is null when the provider produced no text.
#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    /// The model identifier that was dispatched
    pub model: String,
    /// The assistant's reply, if one was produced
    pub message: Option<CompletionReply>,
}

/// POST /api/chat/completions - Generate an assistant reply
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CompletionRequest>,
) -> Result<Json<CompletionResponse>, AppError> {
    let message = match &request.conversation_id {
        Some(conversation_id) => {
            // Inline messages are deliberately ignored here; the store's
            // post-persist ordered read is the single source of context, so
            // the just-persisted message cannot be double-counted.
            state
                .pipeline
                .dispatch(&identity.0, conversation_id, &request.model, request.stream)
                .await?
                .map(CompletionReply::Stored)
        }
        None => {
            let reply = state
                .pipeline
                .complete_raw(&request.model, &request.messages, request.stream)
                .await?;
            Some(CompletionReply::Raw(reply))
        }
    };

    Ok(Json(CompletionResponse {
        model: request.model,
        message,
    }))
}
