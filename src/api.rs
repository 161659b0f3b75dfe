//! HTTP API endpoints.
//!
//! Everything a client can do over the WebSocket is also available here, plus
//! signup, profiles, the leaderboard and the admin state endpoints.

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::auth::{self, AuthConfig, AuthUser};
use crate::state::export::StateExport;
use crate::state::{
    AppState, DebateError, DebateFilter, NewDebate, ProfileUpdate, SubmitOutcome,
};
use crate::transcribe::{self, SharedTranscriber};
use crate::types::*;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Debate(#[from] DebateError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Debate(e) => match e {
                DebateError::NotFound(_) => StatusCode::NOT_FOUND,
                DebateError::Invalid(_) => StatusCode::BAD_REQUEST,
                DebateError::Forbidden(_) => StatusCode::FORBIDDEN,
                DebateError::WrongStatus { .. }
                | DebateError::NotYourTurn
                | DebateError::NotReady
                | DebateError::DuplicateArgument { .. }
                | DebateError::VersionConflict { .. } => StatusCode::CONFLICT,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unavailable(_) => "UNAVAILABLE",
            ApiError::Upstream(_) => "UPSTREAM",
            ApiError::Debate(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("API error: {}", self);
        }
        (
            status,
            Json(json!({ "error": self.to_string(), "code": self.code() })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the full application router
pub fn router(
    state: Arc<AppState>,
    auth_config: Arc<AuthConfig>,
    transcriber: SharedTranscriber,
) -> Router {
    // Admin routes (with HTTP Basic Auth)
    let admin_routes: Router<Arc<AppState>> = Router::new()
        .route("/api/state/export", get(export_state))
        .route("/api/state/import", post(import_state))
        .layer(middleware::from_fn_with_state(
            auth_config,
            auth::admin_auth_middleware,
        ));

    // Audio clips are far larger than axum's default 2 MB body limit
    let transcribe_routes: Router = Router::new()
        .route("/api/transcribe", post(transcribe::transcribe_handler))
        .layer(DefaultBodyLimit::max(transcribe::MAX_UPLOAD_BYTES))
        .with_state(transcriber);

    Router::new()
        .route("/health", get(health))
        .route("/api/users", post(signup))
        .route("/api/me", get(me).patch(update_me))
        .route("/api/users/{id}", get(get_user))
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/debates", post(create_debate).get(list_debates))
        .route("/api/debates/{id}", get(get_debate).delete(cancel_debate))
        .route("/api/debates/{id}/join", post(join_debate))
        .route("/api/debates/{id}/ready", post(ready))
        .route(
            "/api/debates/{id}/arguments",
            post(submit_argument).get(list_arguments),
        )
        .route("/api/debates/{id}/draft", post(save_draft))
        .route("/api/debates/{id}/forfeit", post(forfeit))
        .route("/api/debates/{id}/analyses", get(list_analyses))
        .route("/ws", get(crate::ws::ws_handler))
        .merge(admin_routes)
        .with_state(state)
        .merge(transcribe_routes)
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: User,
    pub token: String,
}

/// POST /api/users
pub async fn signup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), ApiError> {
    let user = state.create_user(req.email, req.display_name).await?;
    tracing::info!("User {} signed up", user.id);
    let token = user.token.clone();
    Ok((StatusCode::CREATED, Json(SignupResponse { user, token })))
}

/// GET /api/me
pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

/// PATCH /api/me
pub async fn update_me(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<User> {
    Ok(Json(state.update_profile(&user.id, update).await?))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
) -> ApiResult<PublicUser> {
    let user = state
        .get_user(&id)
        .await
        .ok_or_else(|| DebateError::NotFound("User".to_string()))?;
    Ok(Json(PublicUser::from(&user)))
}

/// GET /api/leaderboard
pub async fn leaderboard(State(state): State<Arc<AppState>>) -> Json<Vec<PublicUser>> {
    Json(state.leaderboard().await)
}

/// POST /api/debates
pub async fn create_debate(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(new): Json<NewDebate>,
) -> Result<(StatusCode, Json<Debate>), ApiError> {
    let debate = state.create_debate(&user.id, new).await?;
    Ok((StatusCode::CREATED, Json(debate)))
}

/// GET /api/debates?status=&user=
pub async fn list_debates(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<DebateFilter>,
) -> Json<Vec<Debate>> {
    Json(state.list_debates(&filter).await)
}

/// GET /api/debates/{id}
pub async fn get_debate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DebateId>,
) -> ApiResult<Debate> {
    state
        .get_debate(&id)
        .await
        .map(Json)
        .ok_or_else(|| DebateError::NotFound("Debate".to_string()).into())
}

/// DELETE /api/debates/{id}
pub async fn cancel_debate(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<DebateId>,
) -> Result<StatusCode, ApiError> {
    state.cancel_debate(&id, &user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/debates/{id}/join
pub async fn join_debate(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<DebateId>,
) -> ApiResult<Debate> {
    Ok(Json(state.join_debate(&id, &user.id).await?))
}

/// POST /api/debates/{id}/ready
pub async fn ready(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<DebateId>,
) -> ApiResult<Debate> {
    Ok(Json(state.set_ready(&id, &user.id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SubmitArgumentRequest {
    pub content: String,
    #[serde(default)]
    pub expected_version: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SubmitArgumentResponse {
    pub argument: Argument,
    pub debate: Debate,
}

/// POST /api/debates/{id}/arguments
///
/// Analysis and judgment run in the background and arrive as real-time events.
pub async fn submit_argument(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<DebateId>,
    Json(req): Json<SubmitArgumentRequest>,
) -> Result<(StatusCode, Json<SubmitArgumentResponse>), ApiError> {
    let outcome = state
        .submit_argument(&id, &user.id, req.content, req.expected_version)
        .await?;
    let response = SubmitArgumentResponse {
        argument: outcome.argument.clone(),
        debate: outcome.debate.clone(),
    };
    spawn_processing(&state, outcome);
    Ok((StatusCode::CREATED, Json(response)))
}

pub(crate) fn spawn_processing(state: &Arc<AppState>, outcome: SubmitOutcome) {
    let state = state.clone();
    tokio::spawn(async move {
        state.process_submission(outcome).await;
    });
}

/// GET /api/debates/{id}/arguments
pub async fn list_arguments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DebateId>,
) -> Json<Vec<Argument>> {
    Json(state.list_arguments(&id).await)
}

/// GET /api/debates/{id}/analyses
pub async fn list_analyses(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DebateId>,
) -> Json<Vec<AiAnalysis>> {
    Json(state.list_analyses(&id).await)
}

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    pub text: String,
}

/// POST /api/debates/{id}/draft
pub async fn save_draft(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<DebateId>,
    Json(req): Json<DraftRequest>,
) -> Result<StatusCode, ApiError> {
    state.save_draft(&id, &user.id, req.text).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/debates/{id}/forfeit
pub async fn forfeit(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<DebateId>,
) -> ApiResult<Debate> {
    Ok(Json(state.forfeit(&id, &user.id).await?))
}

/// GET /api/state/export
pub async fn export_state(State(state): State<Arc<AppState>>) -> Json<StateExport> {
    Json(state.export_state().await)
}

/// POST /api/state/import
pub async fn import_state(
    State(state): State<Arc<AppState>>,
    Json(export): Json<StateExport>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .import_state(export)
        .await
        .map_err(ApiError::BadRequest)?;
    Ok(Json(json!({ "success": true })))
}
