// Public API for integration tests and potential library usage

pub mod api;
pub mod auth;
pub mod llm;
pub mod moderation;
pub mod protocol;
pub mod state;
pub mod transcribe;
pub mod types;
pub mod ws;

// Re-export broadcast for testing
pub mod broadcast;
