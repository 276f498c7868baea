//! WebSocket handlers for realtime chat updates
//!
//! Each connection starts unauthenticated, is bound to an identity by an
//! `auth` handshake event, and can then join and leave per-conversation
//! rooms. Messages persisted in joined conversations arrive as `message`
//! events. Supports ping/pong for connection keepalive.

use crate::registry::{chat_room, ServerEvent};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Events accepted from realtime clients
#[derive(Deserialize, Debug)]
#[serde(tag = "event", rename_all = "camelCase")]
enum ClientEvent {
    /// Handshake: bind an identity to this connection
    Auth { token: String },
    /// Join a conversation's broadcast room
    JoinChat { conversation_id: String },
    /// Leave a conversation's broadcast room
    LeaveChat { conversation_id: String },
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

// Handle one WebSocket connection end to end
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();

    // All outbound events flow through this channel; the registry holds a
    // clone of the sender for room broadcasts.
    let (tx, rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection_id = state.registry.register(tx.clone()).await;

    info!(connection_id = %connection_id, "WebSocket client connected");

    let mut send_task = tokio::spawn(forward_events(sender, rx));
    let mut recv_task = tokio::spawn(handle_client_events(
        receiver,
        tx,
        state.clone(),
        connection_id.clone(),
    ));

    let drain_send = settle_tasks(&mut send_task, &mut recv_task).await;

    state.registry.disconnect(&connection_id).await;
    if drain_send {
        // The registry's sender is dropped now, so the send task drains any
        // queued events (an authError in particular) and exits.
        let _ = send_task.await;
    }

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

// Wait for either socket task to finish. When the send side finishes first
// (sink send or ping failed) the receive task is aborted and the send handle
// must not be polled again; when the receive side finishes first the send
// task is still live and must be drained.
async fn settle_tasks(
    send_task: &mut JoinHandle<()>,
    recv_task: &mut JoinHandle<()>,
) -> bool {
    tokio::select! {
        _ = &mut *send_task => {
            recv_task.abort();
            false
        }
        _ = &mut *recv_task => true,
    }
}

// Serialize outbound events onto the socket and keep the connection alive
// with periodic pings
async fn forward_events(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<ServerEvent>,
) {
    let mut ping = tokio::time::interval(Duration::from_secs(30));
    ping.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                let Some(event) = maybe_event else { break };
                match serde_json::to_string(&event) {
                    Ok(text) => {
                        if let Err(e) = sender.send(Message::Text(text)).await {
                            error!("Failed to send message: {}", e);
                            break;
                        }
                    }
                    Err(e) => error!("Failed to serialize event: {}", e),
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        }
    }
}

// Receive and act on client events
async fn handle_client_events(
    mut receiver: SplitStream<WebSocket>,
    tx: mpsc::UnboundedSender<ServerEvent>,
    state: Arc<AppState>,
    connection_id: String,
) {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let event = match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(connection_id = %connection_id, "Unrecognized client event: {}", e);
                        let _ = tx.send(ServerEvent::Error {
                            reason: "Unrecognized event".to_string(),
                        });
                        continue;
                    }
                };

                let close = handle_client_event(&state, &tx, &connection_id, event).await;
                if close {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "WebSocket client disconnected");
                break;
            }
            Ok(Message::Pong(_)) => {
                // Client responded to ping
            }
            Err(e) => {
                error!(connection_id = %connection_id, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }
}

// Returns true when the connection must be closed (failed handshake)
async fn handle_client_event(
    state: &Arc<AppState>,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    connection_id: &str,
    event: ClientEvent,
) -> bool {
    match event {
        ClientEvent::Auth { token } => match state.verifier.verify(&token) {
            Ok(identity) => {
                state
                    .registry
                    .authenticate(connection_id, identity.clone())
                    .await;
                info!(
                    connection_id = %connection_id,
                    identity = %identity,
                    "WebSocket connection authenticated"
                );
                let _ = tx.send(ServerEvent::Authenticated { identity });
                false
            }
            Err(e) => {
                warn!(connection_id = %connection_id, "WebSocket handshake failed: {}", e);
                let _ = tx.send(ServerEvent::AuthError {
                    reason: "Invalid token".to_string(),
                });
                // No retry on this connection; the client must reconnect
                true
            }
        },
        ClientEvent::JoinChat { conversation_id } => {
            let Some(identity) = state.registry.identity(connection_id).await else {
                let _ = tx.send(ServerEvent::Error {
                    reason: "Unauthorized".to_string(),
                });
                return false;
            };

            // Join is ownership-gated; a failed check leaves connection
            // state untouched
            let allowed = state
                .db
                .get_owned_conversation(&conversation_id, &identity)
                .await;
            if let Err(e) = allowed {
                let _ = tx.send(ServerEvent::Error {
                    reason: e.to_string(),
                });
                return false;
            }

            match state
                .registry
                .join(connection_id, &chat_room(&conversation_id))
                .await
            {
                Ok(()) => {
                    info!(
                        connection_id = %connection_id,
                        conversation_id = %conversation_id,
                        "Connection joined chat room"
                    );
                    let _ = tx.send(ServerEvent::JoinedChat { conversation_id });
                }
                Err(e) => {
                    let _ = tx.send(ServerEvent::Error {
                        reason: e.to_string(),
                    });
                }
            }
            false
        }
        ClientEvent::LeaveChat { conversation_id } => {
            state
                .registry
                .leave(connection_id, &chat_room(&conversation_id))
                .await;
            let _ = tx.send(ServerEvent::LeftChat { conversation_id });
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenVerifier;
    use crate::chat::{ChatDb, Conversation, Message as ChatMessage, MessageRole};
    use crate::pipeline::ChatPipeline;
    use crate::providers::ProviderRouter;
    use crate::registry::ConnectionRegistry;
    use tempfile::TempDir;

    const TEST_SECRET: &str = "test-secret";

    async fn test_state() -> (Arc<AppState>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(
            ChatDb::new(db_path.to_str().unwrap())
                .await
                .expect("Failed to create test database"),
        );

        let router = Arc::new(ProviderRouter::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let pipeline = Arc::new(ChatPipeline::new(db.clone(), router, registry.clone()));

        let state = Arc::new(AppState {
            db,
            registry,
            pipeline,
            verifier: Arc::new(TokenVerifier::new(TEST_SECRET)),
        });
        (state, temp_dir)
    }

    // Mirrors handle_socket: the registry holds one clone of the sender,
    // the event handler holds another
    async fn connect(
        state: &AppState,
    ) -> (
        String,
        mpsc::UnboundedSender<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = state.registry.register(tx.clone()).await;
        (id, tx, rx)
    }

    async fn seed_conversation(state: &AppState, id: &str, owner: &str) {
        let conversation = Conversation::new(id.to_string(), owner.to_string(), "Chat".to_string());
        state.db.create_conversation(&conversation).await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_when_send_side_exits_first() {
        // Sink failure path: the forward task finishes while the receive
        // task is still running. The completed send handle must not be
        // polled again.
        let mut send_task = tokio::spawn(async {});
        let mut recv_task = tokio::spawn(std::future::pending::<()>());

        let drain_send = settle_tasks(&mut send_task, &mut recv_task).await;

        assert!(!drain_send);
        assert!(recv_task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_teardown_when_receive_side_exits_first() {
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let mut send_task = tokio::spawn(async move {
            let _ = gate_rx.await;
        });
        let mut recv_task = tokio::spawn(async {});

        let drain_send = settle_tasks(&mut send_task, &mut recv_task).await;

        // The send task is still live and gets drained after the registry
        // releases its sender
        assert!(drain_send);
        gate_tx.send(()).unwrap();
        send_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_handshake_binds_identity() {
        let (state, _tmp) = test_state().await;
        let (conn, tx, mut rx) = connect(&state).await;

        let token = crate::auth::tests::make_token(TEST_SECRET, "alice", 3600);
        let close = handle_client_event(&state, &tx, &conn, ClientEvent::Auth { token }).await;

        assert!(!close);
        assert_eq!(
            state.registry.identity(&conn).await.as_deref(),
            Some("alice")
        );
        match rx.try_recv().unwrap() {
            ServerEvent::Authenticated { identity } => assert_eq!(identity, "alice"),
            other => panic!("Expected authenticated event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_handshake_closes_connection() {
        let (state, _tmp) = test_state().await;
        let (conn, tx, mut rx) = connect(&state).await;

        let close = handle_client_event(
            &state,
            &tx,
            &conn,
            ClientEvent::Auth {
                token: "not-a-jwt".to_string(),
            },
        )
        .await;

        assert!(close);
        assert!(state.registry.identity(&conn).await.is_none());
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::AuthError { .. }
        ));
    }

    #[tokio::test]
    async fn test_join_requires_handshake() {
        let (state, _tmp) = test_state().await;
        seed_conversation(&state, "42", "alice").await;
        let (conn, tx, mut rx) = connect(&state).await;

        let close = handle_client_event(
            &state,
            &tx,
            &conn,
            ClientEvent::JoinChat {
                conversation_id: "42".to_string(),
            },
        )
        .await;

        // Rejected but the connection stays open for a later auth event
        assert!(!close);
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        let delivered = state
            .registry
            .publish(
                &chat_room("42"),
                ServerEvent::Error {
                    reason: "probe".to_string(),
                },
            )
            .await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_join_is_ownership_gated() {
        let (state, _tmp) = test_state().await;
        seed_conversation(&state, "42", "alice").await;
        seed_conversation(&state, "43", "bob").await;
        let (conn, tx, mut rx) = connect(&state).await;

        let token = crate::auth::tests::make_token(TEST_SECRET, "alice", 3600);
        handle_client_event(&state, &tx, &conn, ClientEvent::Auth { token }).await;
        rx.try_recv().unwrap(); // authenticated

        // Alice cannot join Bob's conversation
        handle_client_event(
            &state,
            &tx,
            &conn,
            ClientEvent::JoinChat {
                conversation_id: "43".to_string(),
            },
        )
        .await;
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert_eq!(
            state
                .registry
                .publish(
                    &chat_room("43"),
                    ServerEvent::Error {
                        reason: "probe".to_string()
                    }
                )
                .await,
            0
        );

        // She can join her own
        handle_client_event(
            &state,
            &tx,
            &conn,
            ClientEvent::JoinChat {
                conversation_id: "42".to_string(),
            },
        )
        .await;
        match rx.try_recv().unwrap() {
            ServerEvent::JoinedChat { conversation_id } => assert_eq!(conversation_id, "42"),
            other => panic!("Expected joinedChat event, got {:?}", other),
        }
        assert_eq!(
            state
                .registry
                .publish(
                    &chat_room("42"),
                    ServerEvent::Error {
                        reason: "probe".to_string()
                    }
                )
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_leave_chat_is_acknowledged() {
        let (state, _tmp) = test_state().await;
        seed_conversation(&state, "42", "alice").await;
        let (conn, tx, mut rx) = connect(&state).await;

        let token = crate::auth::tests::make_token(TEST_SECRET, "alice", 3600);
        handle_client_event(&state, &tx, &conn, ClientEvent::Auth { token }).await;
        handle_client_event(
            &state,
            &tx,
            &conn,
            ClientEvent::JoinChat {
                conversation_id: "42".to_string(),
            },
        )
        .await;
        handle_client_event(
            &state,
            &tx,
            &conn,
            ClientEvent::LeaveChat {
                conversation_id: "42".to_string(),
            },
        )
        .await;

        rx.try_recv().unwrap(); // authenticated
        rx.try_recv().unwrap(); // joinedChat
        match rx.try_recv().unwrap() {
            ServerEvent::LeftChat { conversation_id } => assert_eq!(conversation_id, "42"),
            other => panic!("Expected leftChat event, got {:?}", other),
        }
        assert_eq!(
            state
                .registry
                .publish(
                    &chat_room("42"),
                    ServerEvent::Error {
                        reason: "probe".to_string()
                    }
                )
                .await,
            0
        );
    }

    #[test]
    fn test_client_event_names() {
        let auth: ClientEvent =
            serde_json::from_str(r#"{"event": "auth", "token": "abc"}"#).unwrap();
        assert!(matches!(auth, ClientEvent::Auth { token } if token == "abc"));

        let join: ClientEvent =
            serde_json::from_str(r#"{"event": "joinChat", "conversation_id": "42"}"#).unwrap();
        assert!(matches!(join, ClientEvent::JoinChat { conversation_id } if conversation_id == "42"));

        let leave: ClientEvent =
            serde_json::from_str(r#"{"event": "leaveChat", "conversation_id": "42"}"#).unwrap();
        assert!(matches!(leave, ClientEvent::LeaveChat { conversation_id } if conversation_id == "42"));

        assert!(serde_json::from_str::<ClientEvent>(r#"{"event": "selfDestruct"}"#).is_err());
    }

    #[test]
    fn test_server_event_names() {
        let authenticated = serde_json::to_value(ServerEvent::Authenticated {
            identity: "user-1".to_string(),
        })
        .unwrap();
        assert_eq!(authenticated["event"], "authenticated");
        assert_eq!(authenticated["identity"], "user-1");

        let auth_error = serde_json::to_value(ServerEvent::AuthError {
            reason: "Invalid token".to_string(),
        })
        .unwrap();
        assert_eq!(auth_error["event"], "authError");

        let joined = serde_json::to_value(ServerEvent::JoinedChat {
            conversation_id: "42".to_string(),
        })
        .unwrap();
        assert_eq!(joined["event"], "joinedChat");

        let left = serde_json::to_value(ServerEvent::LeftChat {
            conversation_id: "42".to_string(),
        })
        .unwrap();
        assert_eq!(left["event"], "leftChat");

        let message = serde_json::to_value(ServerEvent::Message {
            message: ChatMessage::new(
                "m1".to_string(),
                "42".to_string(),
                MessageRole::Assistant,
                "hello".to_string(),
            ),
        })
        .unwrap();
        assert_eq!(message["event"], "message");
        assert_eq!(message["message"]["role"], "assistant");
        assert_eq!(message["message"]["content"], "hello");
    }
}
