//! User profile and message history endpoints used by the web client.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{require_non_empty, ApiError, SuccessResponse};
use crate::server::AppState;
use crate::store::StoredMessage;

/// Create the user/history router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/save-user", post(save_user_handler))
        .route("/api/messages/:email", get(user_messages_handler))
        .route("/api/save-message", post(save_message_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SaveUserRequest {
    #[serde(default)]
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub picture: String,
}

/// POST /api/save-user
///
/// Creates the user on first sight; afterwards only `lastSeen` moves.
async fn save_user_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SaveUserRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_non_empty("email", &request.email)?;
    state
        .persistence
        .upsert_user(&request.name, &request.email, &request.picture)
        .await?;
    Ok(SuccessResponse::ok())
}

#[derive(Debug, Serialize)]
pub struct UserMessagesResponse {
    pub messages: Vec<StoredMessage>,
}

/// GET /api/messages/:email
async fn user_messages_handler(
    State(state): State<Arc<AppState>>,
    Path(email): Path<String>,
) -> Json<UserMessagesResponse> {
    Json(UserMessagesResponse {
        messages: state.persistence.messages_for(&email).await,
    })
}

#[derive(Debug, Deserialize)]
pub struct SaveMessageRequest {
    pub from: String,
    pub to: String,
    #[serde(alias = "body")]
    pub message: String,
}

/// POST /api/save-message
async fn save_message_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SaveMessageRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_non_empty("from", &request.from)?;
    require_non_empty("to", &request.to)?;
    state
        .persistence
        .append_message(&request.from, &request.to, &request.message)
        .await?;
    Ok(SuccessResponse::ok())
}
