use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Switch the connection's live view to another debate
    Subscribe {
        debate_id: DebateId,
    },
    Join {
        debate_id: DebateId,
    },
    Ready {
        debate_id: DebateId,
    },
    SubmitArgument {
        debate_id: DebateId,
        content: String,
        /// Debate version the client last saw; stale submissions are rejected
        #[serde(default)]
        expected_version: Option<u64>,
    },
    SaveDraft {
        debate_id: DebateId,
        text: String,
    },
    Forfeit {
        debate_id: DebateId,
    },
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        user: PublicUser,
        debate: Option<Debate>,
        server_now: String,
    },
    /// Full debate document after any change
    Debate {
        debate: Debate,
        server_now: String,
    },
    Argument {
        argument: Argument,
    },
    Analysis {
        analysis: AiAnalysis,
    },
    DraftSaved {
        debate_id: DebateId,
    },
    Pong,
    Error {
        code: String,
        msg: String,
    },
}

/// A change on a debate document, fanned out to every subscriber of that debate
#[derive(Debug, Clone)]
pub struct DebateEvent {
    pub debate_id: DebateId,
    pub message: ServerMessage,
}

impl ServerMessage {
    pub fn debate(debate: Debate) -> Self {
        ServerMessage::Debate {
            debate,
            server_now: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }
}
