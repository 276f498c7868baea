//! Shared application state
//!
//! Everything handlers need, wired once at startup and passed through axum's
//! `State` extractor. The registry and pipeline are explicit capabilities so
//! tests can assemble them with fakes.

use crate::auth::TokenVerifier;
use crate::chat::ChatDb;
use crate::pipeline::ChatPipeline;
use crate::registry::ConnectionRegistry;
use std::sync::Arc;

/// Dependencies shared across HTTP and WebSocket handlers
pub struct AppState {
    /// Conversation store
    pub db: Arc<ChatDb>,
    /// Realtime connection registry
    pub registry: Arc<ConnectionRegistry>,
    /// Message relay pipeline
    pub pipeline: Arc<ChatPipeline>,
    /// Bearer token verifier
    pub verifier: Arc<TokenVerifier>,
}
