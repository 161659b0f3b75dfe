pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use crate::types::{DebateId, PublicUser, User};

pub const PROTOCOL_VERSION: &str = "1.0";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
    /// Debate to watch from the start
    pub debate: Option<DebateId>,
}

/// Per-connection state: who is connected and which debate they are watching
#[derive(Debug, Clone)]
pub struct Connection {
    pub user: User,
    pub debate_id: Option<DebateId>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let user = match params.token.as_deref() {
        Some(token) => state.get_user_by_token(token).await,
        None => None,
    };
    let Some(user) = user else {
        tracing::warn!("WebSocket connection rejected: missing or unknown token");
        return (StatusCode::UNAUTHORIZED, "invalid session token").into_response();
    };

    tracing::info!(
        "WebSocket connection request: user={}, debate={:?}",
        user.id,
        params.debate
    );

    let conn = Connection {
        user,
        debate_id: params.debate,
    };
    ws.on_upgrade(move |socket| handle_socket(socket, conn, state))
}

async fn send_json(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, mut conn: Connection, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the snapshot so no change slips between the two
    let mut events = state.events.subscribe();

    let debate = match &conn.debate_id {
        Some(id) => state.get_debate(id).await,
        None => None,
    };
    if conn.debate_id.is_some() && debate.is_none() {
        tracing::debug!("Requested debate {:?} does not exist", conn.debate_id);
        conn.debate_id = None;
    }

    let welcome = ServerMessage::Welcome {
        protocol: PROTOCOL_VERSION.to_string(),
        user: PublicUser::from(&conn.user),
        debate,
        server_now: chrono::Utc::now().to_rfc3339(),
    };
    if !send_json(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        return;
    }

    loop {
        tokio::select! {
            // Changes on the watched debate
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if conn.debate_id.as_deref() != Some(event.debate_id.as_str()) {
                            continue;
                        }
                        if !send_json(&mut sender, &event.message).await {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed events; resend the current document so the client catches up
                        tracing::warn!("WebSocket for {} lagged by {} events", conn.user.id, skipped);
                        if let Some(id) = &conn.debate_id {
                            if let Some(debate) = state.get_debate(id).await {
                                if !send_json(&mut sender, &ServerMessage::debate(debate)).await {
                                    break;
                                }
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            // Handle client messages
            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);

                        let response = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handlers::handle_message(client_msg, &mut conn, &state).await
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                Some(ServerMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", e),
                                ))
                            }
                        };
                        if let Some(response) = response {
                            if !send_json(&mut sender, &response).await {
                                tracing::error!("Failed to send response");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("WebSocket connection closed for user: {}", conn.user.id);
}
