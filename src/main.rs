//! Chat Relay Backend
//!
//! A REST API and WebSocket server relaying chat messages between users and
//! LLM providers: persist a user message, broadcast it to live viewers,
//! dispatch the conversation to the provider named by the model identifier,
//! persist and broadcast the reply.

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chat_relay_backend::{api, auth, chat::ChatDb, config::Config, pipeline::ChatPipeline,
    providers::ProviderRouter, registry::ConnectionRegistry, state::AppState, websocket};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Request ID middleware - adds unique ID to each request for tracing
async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    // Wire up the core: store, provider router, connection registry, pipeline
    let db = Arc::new(ChatDb::new(&config.database.path).await?);
    let client = reqwest::Client::new();
    let router = Arc::new(ProviderRouter::from_config(&config.providers, client));
    let registry = Arc::new(ConnectionRegistry::new());
    let pipeline = Arc::new(ChatPipeline::new(db.clone(), router, registry.clone()));
    let verifier = Arc::new(auth::TokenVerifier::new(&config.auth.jwt_secret));

    let app_state = Arc::new(AppState {
        db,
        registry,
        pipeline,
        verifier,
    });

    // Authenticated chat API
    let protected = Router::new()
        .route(
            "/api/chat/conversations",
            get(api::chat::list_conversations).post(api::chat::create_conversation),
        )
        .route(
            "/api/chat/conversations/:id/messages",
            get(api::chat::get_conversation_messages).post(api::chat::create_message),
        )
        .route(
            "/api/chat/completions",
            post(api::completions::chat_completions),
        )
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            auth::require_auth,
        ));

    // Build our application with routes
    let app = Router::new()
        .route("/api/health", get(health_check))
        // WebSocket authenticates via its own handshake event
        .route("/ws", get(websocket::websocket_handler))
        .merge(protected)
        // Middleware (order matters - request_id should be first)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive()) // Allow CORS for development
        .with_state(app_state);

    // Bind to address from config
    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    info!("🚀 Server running on http://{}", addr);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Setup graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle graceful shutdown signals (Ctrl+C, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
