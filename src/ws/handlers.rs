//! WebSocket message dispatch
//!
//! A successful action on a debate also switches the connection's live view to
//! that debate, so the resulting change events reach the sender through the
//! feed. Failed actions leave the view where it was.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, DebateError};
use crate::types::DebateId;
use std::sync::Arc;

use super::Connection;

fn error_message(e: DebateError) -> ServerMessage {
    ServerMessage::error(e.code(), e.to_string())
}

/// Follow `debate_id` if the action succeeded; its change event is already queued
fn watch_on_success<T>(
    conn: &mut Connection,
    debate_id: DebateId,
    result: Result<T, DebateError>,
) -> Option<ServerMessage> {
    match result {
        Ok(_) => {
            conn.debate_id = Some(debate_id);
            None
        }
        Err(e) => Some(error_message(e)),
    }
}

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &mut Connection,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    let user_id = conn.user.id.clone();

    match msg {
        ClientMessage::Ping => Some(ServerMessage::Pong),

        ClientMessage::Subscribe { debate_id } => match state.get_debate(&debate_id).await {
            Some(debate) => {
                tracing::debug!("User {} watching debate {}", user_id, debate_id);
                conn.debate_id = Some(debate_id);
                Some(ServerMessage::debate(debate))
            }
            None => Some(error_message(DebateError::NotFound("Debate".to_string()))),
        },

        ClientMessage::Join { debate_id } => {
            let result = state.join_debate(&debate_id, &user_id).await;
            watch_on_success(conn, debate_id, result)
        }

        ClientMessage::Ready { debate_id } => {
            let result = state.set_ready(&debate_id, &user_id).await;
            watch_on_success(conn, debate_id, result)
        }

        ClientMessage::SubmitArgument {
            debate_id,
            content,
            expected_version,
        } => {
            match state
                .submit_argument(&debate_id, &user_id, content, expected_version)
                .await
            {
                Ok(outcome) => {
                    tracing::info!(
                        "User {} argued round {} of {}",
                        user_id,
                        outcome.argument.round,
                        debate_id
                    );
                    crate::api::spawn_processing(state, outcome);
                    conn.debate_id = Some(debate_id);
                    None
                }
                Err(e) => Some(error_message(e)),
            }
        }

        ClientMessage::SaveDraft { debate_id, text } => {
            match state.save_draft(&debate_id, &user_id, text).await {
                Ok(()) => Some(ServerMessage::DraftSaved { debate_id }),
                Err(e) => Some(error_message(e)),
            }
        }

        ClientMessage::Forfeit { debate_id } => {
            let result = state.forfeit(&debate_id, &user_id).await;
            watch_on_success(conn, debate_id, result)
        }
    }
}
