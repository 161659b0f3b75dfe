use crate::state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a background task that auto-submits drafts when a turn timer runs out
pub fn spawn_turn_timer(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(500)).await;

            for outcome in state.expire_turns().await {
                let state = state.clone();
                // Analysis can take as long as the LLM timeout; don't block the clock
                tokio::spawn(async move {
                    state.process_submission(outcome).await;
                });
            }
        }
    });
}

/// Spawn a background task that periodically writes the state snapshot to disk
pub fn spawn_snapshot_writer(state: Arc<AppState>, path: PathBuf, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately; nothing has changed yet
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Err(e) = state.save_snapshot(&path).await {
                tracing::error!("Failed to write snapshot to {}: {}", path.display(), e);
            }
        }
    });
}
