//! Chat message relay pipeline
//!
//! Orchestrates one inbound message end to end: validate and persist the
//! user message, broadcast it to the conversation's room, assemble ordered
//! context from the store, route to a provider adapter, persist and
//! broadcast the reply.
//!
//! The sequence is deliberately not transactional: the user message's
//! durability and visibility (persist + broadcast) are decoupled from reply
//! generation, so a slow or failing provider never blocks or loses the
//! user's own message.

use crate::chat::{ChatDb, ChatTurn, Message, MessageRole};
use crate::error::AppError;
use crate::providers::ProviderRouter;
use crate::registry::{chat_room, ConnectionRegistry, ServerEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// The message relay orchestrator
///
/// Store, router and registry are injected capabilities; tests assemble the
/// pipeline with stub adapters and throwaway databases.
pub struct ChatPipeline {
    db: Arc<ChatDb>,
    router: Arc<ProviderRouter>,
    registry: Arc<ConnectionRegistry>,
    // Per-conversation guards: an append and a context read on the same
    // conversation never interleave, so context is always a committed prefix
    // of what will be persisted.
    conversation_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatPipeline {
    /// Create a pipeline over the given store, router and registry
    pub fn new(
        db: Arc<ChatDb>,
        router: Arc<ProviderRouter>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            db,
            router,
            registry,
            conversation_guards: Mutex::new(HashMap::new()),
        }
    }

    async fn guard_for(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut guards = self.conversation_guards.lock().await;
        guards
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist and broadcast an inbound user message
    ///
    /// Validates the content and the caller's ownership of the conversation,
    /// appends the message to the store, then publishes it to the
    /// conversation's room. Persistence failure aborts before any broadcast;
    /// broadcast itself is best-effort and never fails the call.
    pub async fn post_user_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> Result<Message, AppError> {
        if content.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Message content cannot be empty".to_string(),
            ));
        }

        self.db
            .get_owned_conversation(conversation_id, user_id)
            .await?;

        let guard = self.guard_for(conversation_id).await;
        let _held = guard.lock().await;

        // The timestamp is assigned under the guard, so created_at order
        // always agrees with append order across concurrent posts.
        let message = Message::new(
            Uuid::new_v4().to_string(),
            conversation_id.to_string(),
            MessageRole::User,
            content.to_string(),
        );

        self.db.add_message(&message).await?;

        let delivered = self
            .registry
            .publish(
                &chat_room(conversation_id),
                ServerEvent::Message {
                    message: message.clone(),
                },
            )
            .await;

        info!(
            conversation_id = %conversation_id,
            message_id = %message.id,
            delivered = delivered,
            "Persisted and broadcast user message"
        );

        Ok(message)
    }

    /// Generate, persist and broadcast the assistant reply for a conversation
    ///
    /// Context is read from the store alone, in creation order, so the just
    /// persisted user message appears exactly once. Routing failures happen
    /// before any provider contact. Returns `Ok(None)` when the provider
    /// produced an empty reply; nothing is persisted or broadcast in that
    /// case.
    pub async fn dispatch(
        &self,
        user_id: &str,
        conversation_id: &str,
        model_id: &str,
        stream: bool,
    ) -> Result<Option<Message>, AppError> {
        self.db
            .get_owned_conversation(conversation_id, user_id)
            .await?;

        let (provider, model) = self.router.resolve(model_id)?;

        let guard = self.guard_for(conversation_id).await;
        let context = {
            let _held = guard.lock().await;
            self.db.get_messages(conversation_id).await?
        };

        if context.is_empty() {
            return Err(AppError::InvalidInput(
                "Conversation has no messages to dispatch".to_string(),
            ));
        }

        let turns: Vec<ChatTurn> = context.iter().map(ChatTurn::from).collect();

        // The provider call is the slow part; the conversation guard is not
        // held across it.
        let reply = provider.complete(model, &turns, stream).await?;

        if reply.content.trim().is_empty() {
            warn!(
                conversation_id = %conversation_id,
                model = %model_id,
                "Provider produced an empty reply; nothing to persist"
            );
            return Ok(None);
        }

        let _held = guard.lock().await;

        // Timestamped under the guard, like the user message
        let assistant_message = Message::new(
            Uuid::new_v4().to_string(),
            conversation_id.to_string(),
            MessageRole::Assistant,
            reply.content,
        );

        self.db.add_message(&assistant_message).await?;

        let delivered = self
            .registry
            .publish(
                &chat_room(conversation_id),
                ServerEvent::Message {
                    message: assistant_message.clone(),
                },
            )
            .await;

        info!(
            conversation_id = %conversation_id,
            message_id = %assistant_message.id,
            model = %model_id,
            delivered = delivered,
            "Persisted and broadcast assistant message"
        );

        Ok(Some(assistant_message))
    }

    /// One-shot completion over caller-supplied turns
    ///
    /// Routing and the adapter call only; nothing is persisted or broadcast.
    /// Used by the completions endpoint when no conversation is attached.
    pub async fn complete_raw(
        &self,
        model_id: &str,
        turns: &[ChatTurn],
        stream: bool,
    ) -> Result<ChatTurn, AppError> {
        if turns.is_empty() {
            return Err(AppError::InvalidInput(
                "Completion requires at least one message".to_string(),
            ));
        }

        let (provider, model) = self.router.resolve(model_id)?;
        Ok(provider.complete(model, turns, stream).await?)
    }
}
