mod argument;
mod debate;
pub mod export;
mod user;

pub use argument::{SubmitOutcome, TIMEOUT_PLACEHOLDER};
pub use debate::{DebateFilter, NewDebate};
pub use user::ProfileUpdate;

use crate::llm::{LlmConfig, LlmManager};
use crate::protocol::{DebateEvent, ServerMessage};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

/// Errors raised by debate lifecycle operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DebateError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Not allowed: {0}")]
    Forbidden(String),

    #[error("Debate is {actual:?}, expected {expected:?}")]
    WrongStatus {
        expected: DebateStatus,
        actual: DebateStatus,
    },

    #[error("It is not your turn")]
    NotYourTurn,

    #[error("Both participants must be ready before arguing")]
    NotReady,

    #[error("An argument for round {round} ({side}) already exists")]
    DuplicateArgument { round: u32, side: &'static str },

    #[error("Debate changed (version {current}, you sent {sent})")]
    VersionConflict { current: u64, sent: u64 },
}

impl DebateError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            DebateError::NotFound(_) => "NOT_FOUND",
            DebateError::Invalid(_) => "INVALID",
            DebateError::Forbidden(_) => "FORBIDDEN",
            DebateError::WrongStatus { .. } => "WRONG_STATUS",
            DebateError::NotYourTurn => "NOT_YOUR_TURN",
            DebateError::NotReady => "NOT_READY",
            DebateError::DuplicateArgument { .. } => "DUPLICATE_ARGUMENT",
            DebateError::VersionConflict { .. } => "VERSION_CONFLICT",
        }
    }
}

pub type DebateResult<T> = Result<T, DebateError>;

/// Shared application state: the document collections plus the change feed
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<RwLock<HashMap<UserId, User>>>,
    pub debates: Arc<RwLock<HashMap<DebateId, Debate>>>,
    pub arguments: Arc<RwLock<HashMap<ArgumentId, Argument>>>,
    pub analyses: Arc<RwLock<HashMap<AnalysisId, AiAnalysis>>>,
    /// In-progress text per (debate, user), auto-submitted when a turn times out
    pub drafts: Arc<RwLock<HashMap<(DebateId, UserId), String>>>,
    pub config: DebateConfig,
    /// LLM manager (None if no providers configured)
    pub llm: Option<Arc<LlmManager>>,
    pub llm_config: LlmConfig,
    /// Real-time change feed for all debates; subscribers filter by debate id
    pub events: broadcast::Sender<DebateEvent>,
}

impl AppState {
    pub fn new() -> Self {
        Self::new_with_llm(None, LlmConfig::default(), DebateConfig::default())
    }

    pub fn new_with_llm(
        llm: Option<LlmManager>,
        llm_config: LlmConfig,
        config: DebateConfig,
    ) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            debates: Arc::new(RwLock::new(HashMap::new())),
            arguments: Arc::new(RwLock::new(HashMap::new())),
            analyses: Arc::new(RwLock::new(HashMap::new())),
            drafts: Arc::new(RwLock::new(HashMap::new())),
            config,
            llm: llm.map(Arc::new),
            llm_config,
            events: tx,
        }
    }

    /// Publish a message to everyone watching `debate_id`
    pub fn publish(&self, debate_id: &str, message: ServerMessage) {
        // No subscribers is fine
        let _ = self.events.send(DebateEvent {
            debate_id: debate_id.to_string(),
            message,
        });
    }

    pub(crate) fn publish_debate(&self, debate: &Debate) {
        self.publish(&debate.id, ServerMessage::debate(debate.clone()));
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Current time as an RFC 3339 string
pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let state = AppState::new();
        let mut rx = state.events.subscribe();

        state.publish("d1", ServerMessage::Pong);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.debate_id, "d1");
        assert!(matches!(event.message, ServerMessage::Pong));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DebateError::NotYourTurn.code(), "NOT_YOUR_TURN");
        assert_eq!(
            DebateError::VersionConflict {
                current: 3,
                sent: 2
            }
            .code(),
            "VERSION_CONFLICT"
        );
    }
}
