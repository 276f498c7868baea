//! Chat API endpoints
//!
//! Handles HTTP requests for conversations and messages. Posting a message
//! responds with the persisted user message immediately; the assistant reply
//! is generated by a detached continuation and arrives over the realtime
//! channel.

use crate::auth::Identity;
use crate::chat::{Conversation, Message};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Model used when a message request does not name one
pub const DEFAULT_MODEL: &str = "ollama/llama3";

/// Request to create a new conversation
#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    /// Optional title
    pub title: Option<String>,
}

/// Request to post a message into a conversation
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Message role; only "user" is accepted on this endpoint
    pub role: Option<String>,
    /// Message content
    pub content: String,
    /// Model identifier for the assistant reply (defaults to [`DEFAULT_MODEL`])
    pub model: Option<String>,
}

/// POST /api/chat/conversations - Create a conversation owned by the caller
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), AppError> {
    let title = match request.title {
        Some(title) if !title.trim().is_empty() => title,
        _ => "New Chat".to_string(),
    };

    let conversation = Conversation::new(Uuid::new_v4().to_string(), identity.0, title);
    state.db.create_conversation(&conversation).await?;

    Ok((StatusCode::CREATED, Json(conversation)))
}

/// GET /api/chat/conversations - List the caller's conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Conversation>>, AppError> {
    let conversations = state.db.get_conversations(&identity.0).await?;
    Ok(Json(conversations))
}

/// GET /api/chat/conversations/:id/messages - A conversation's messages in
/// creation order
pub async fn get_conversation_messages(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Message>>, AppError> {
    state.db.get_owned_conversation(&id, &identity.0).await?;
    let messages = state.db.get_messages(&id).await?;
    Ok(Json(messages))
}

/// POST /api/chat/conversations/:id/messages - Post a user message
///
/// Responds 201 with the persisted user message once it is durable and
/// broadcast. The assistant reply is dispatched after this response is sent;
/// its failure is logged, never reflected here.
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    if let Some(role) = &request.role {
        if role != "user" {
            return Err(AppError::InvalidInput(format!(
                "Only user messages can be posted, got role: {}",
                role
            )));
        }
    }

    let message = state
        .pipeline
        .post_user_message(&identity.0, &id, &request.content)
        .await?;

    let pipeline = state.pipeline.clone();
    let user_id = identity.0.clone();
    let conversation_id = id.clone();
    let model = request.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    tokio::spawn(async move {
        if let Err(e) = pipeline
            .dispatch(&user_id, &conversation_id, &model, false)
            .await
        {
            error!(
                conversation_id = %conversation_id,
                model = %model,
                error = %e,
                "Assistant dispatch failed"
            );
        }
    });

    Ok((StatusCode::CREATED, Json(message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenVerifier;
    use crate::chat::{ChatDb, ChatTurn};
    use crate::pipeline::ChatPipeline;
    use crate::providers::{ChatProvider, ProviderError, ProviderRouter};
    use crate::registry::ConnectionRegistry;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct StubProvider;

    #[async_trait]
    impl ChatProvider for StubProvider {
        async fn complete(
            &self,
            _model: &str,
            _messages: &[ChatTurn],
            _stream: bool,
        ) -> Result<ChatTurn, ProviderError> {
            Ok(ChatTurn {
                role: "assistant".to_string(),
                content: "stub reply".to_string(),
            })
        }
    }

    async fn test_state() -> (Arc<AppState>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(
            ChatDb::new(db_path.to_str().unwrap())
                .await
                .expect("Failed to create test database"),
        );

        let mut router = ProviderRouter::new();
        router.register("ollama", Arc::new(StubProvider));
        let router = Arc::new(router);

        let registry = Arc::new(ConnectionRegistry::new());
        let pipeline = Arc::new(ChatPipeline::new(db.clone(), router, registry.clone()));

        let state = Arc::new(AppState {
            db,
            registry,
            pipeline,
            verifier: Arc::new(TokenVerifier::new("test-secret")),
        });
        (state, temp_dir)
    }

    fn alice() -> Extension<Identity> {
        Extension(Identity("alice".to_string()))
    }

    #[tokio::test]
    async fn test_create_conversation() {
        let (state, _tmp) = test_state().await;
        let request = CreateConversationRequest {
            title: Some("Test Chat".to_string()),
        };
        let (status, Json(conversation)) =
            create_conversation(State(state), alice(), Json(request))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(conversation.title, "Test Chat");
        assert_eq!(conversation.user_id, "alice");
    }

    #[tokio::test]
    async fn test_create_conversation_default_title() {
        let (state, _tmp) = test_state().await;
        let request = CreateConversationRequest { title: None };
        let (_, Json(conversation)) = create_conversation(State(state), alice(), Json(request))
            .await
            .unwrap();
        assert_eq!(conversation.title, "New Chat");
    }

    #[tokio::test]
    async fn test_list_conversations_scoped_to_caller() {
        let (state, _tmp) = test_state().await;
        for _ in 0..2 {
            create_conversation(
                State(state.clone()),
                alice(),
                Json(CreateConversationRequest { title: None }),
            )
            .await
            .unwrap();
        }
        create_conversation(
            State(state.clone()),
            Extension(Identity("bob".to_string())),
            Json(CreateConversationRequest { title: None }),
        )
        .await
        .unwrap();

        let Json(conversations) = list_conversations(State(state), alice()).await.unwrap();
        assert_eq!(conversations.len(), 2);
    }

    #[tokio::test]
    async fn test_get_messages_requires_ownership() {
        let (state, _tmp) = test_state().await;
        let (_, Json(conversation)) = create_conversation(
            State(state.clone()),
            alice(),
            Json(CreateConversationRequest { title: None }),
        )
        .await
        .unwrap();

        let result = get_conversation_messages(
            State(state),
            Extension(Identity("bob".to_string())),
            Path(conversation.id),
        )
        .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_create_message_returns_persisted_user_message() {
        let (state, _tmp) = test_state().await;
        let (_, Json(conversation)) = create_conversation(
            State(state.clone()),
            alice(),
            Json(CreateConversationRequest { title: None }),
        )
        .await
        .unwrap();

        let request = SendMessageRequest {
            role: Some("user".to_string()),
            content: "hi".to_string(),
            model: Some("ollama/llama3".to_string()),
        };
        let (status, Json(message)) = create_message(
            State(state.clone()),
            alice(),
            Path(conversation.id.clone()),
            Json(request),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message.role, "user");
        assert_eq!(message.content, "hi");
        assert_eq!(message.conversation_id, conversation.id);

        // The detached continuation eventually persists the assistant reply
        let mut stored = Vec::new();
        for _ in 0..50 {
            stored = state.db.get_messages(&conversation.id).await.unwrap();
            if stored.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].role, "assistant");
        assert_eq!(stored[1].content, "stub reply");
    }

    #[tokio::test]
    async fn test_create_message_rejects_assistant_role() {
        let (state, _tmp) = test_state().await;
        let (_, Json(conversation)) = create_conversation(
            State(state.clone()),
            alice(),
            Json(CreateConversationRequest { title: None }),
        )
        .await
        .unwrap();

        let request = SendMessageRequest {
            role: Some("assistant".to_string()),
            content: "spoofed".to_string(),
            model: None,
        };
        let result = create_message(
            State(state),
            alice(),
            Path(conversation.id),
            Json(request),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_message_empty_content() {
        let (state, _tmp) = test_state().await;
        let (_, Json(conversation)) = create_conversation(
            State(state.clone()),
            alice(),
            Json(CreateConversationRequest { title: None }),
        )
        .await
        .unwrap();

        let request = SendMessageRequest {
            role: None,
            content: "   ".to_string(),
            model: None,
        };
        let result = create_message(
            State(state),
            alice(),
            Path(conversation.id),
            Json(request),
        )
        .await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_create_message_unknown_conversation() {
        let (state, _tmp) = test_state().await;
        let request = SendMessageRequest {
            role: None,
            content: "hi".to_string(),
            model: None,
        };
        let result = create_message(
            State(state),
            alice(),
            Path("nonexistent".to_string()),
            Json(request),
        )
        .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
