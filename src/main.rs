use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rebuttal::{api, auth, broadcast, llm, state::AppState, transcribe, types::DebateConfig};

/// How often the state snapshot is written when SNAPSHOT_PATH is set
const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rebuttal=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rebuttal...");

    let auth_config = Arc::new(auth::AuthConfig::from_env());
    let debate_config = DebateConfig::from_env();

    // Initialize LLM providers
    let llm_config = llm::LlmConfig::from_env();
    let llm_manager = match llm_config.build_manager() {
        Ok(manager) => {
            tracing::info!("LLM providers initialized successfully");
            Some(manager)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize LLM providers: {}. Moderation will use fallbacks.",
                e
            );
            None
        }
    };

    let transcriber = transcribe::TranscribeConfig::from_env().build();
    if transcriber.is_none() {
        tracing::warn!("No speech-to-text API key configured; /api/transcribe is disabled");
    }

    let state = Arc::new(AppState::new_with_llm(
        llm_manager,
        llm_config,
        debate_config,
    ));

    // Restore and periodically persist state if a snapshot path is configured
    if let Some(path) = std::env::var("SNAPSHOT_PATH")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
    {
        let persist = match state.load_snapshot(&path).await {
            Ok(true) => {
                tracing::info!("Restored state from {}", path.display());
                true
            }
            Ok(false) => {
                tracing::info!("No snapshot at {}, starting fresh", path.display());
                true
            }
            Err(e) => {
                tracing::error!("Failed to restore snapshot {}: {}", path.display(), e);
                // Never overwrite a snapshot that is still in place
                !path.exists()
            }
        };
        if persist {
            broadcast::spawn_snapshot_writer(state.clone(), path, SNAPSHOT_INTERVAL);
        } else {
            tracing::error!(
                "Snapshot writing disabled; {} was left untouched",
                path.display()
            );
        }
    }

    // Spawn background task for auto-submitting when turn timers run out
    broadcast::spawn_turn_timer(state.clone());

    let app = api::router(state, auth_config, transcriber)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
