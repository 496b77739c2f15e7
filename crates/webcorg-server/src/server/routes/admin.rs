//! Admin control surface.
//!
//! A single shared secret guards these endpoints. `verify-admin` checks a
//! password from the body; everything else expects it in the
//! `x-admin-password` header.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{require_non_empty, ApiError};
use crate::server::AppState;
use crate::store::{StoredMessage, UserRecord};

/// Header carrying the admin password.
pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

/// Create the admin router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/verify-admin", post(verify_admin_handler))
        .route("/api/admin/users", get(list_users_handler))
        .route("/api/admin/messages", get(list_messages_handler))
        .route("/api/admin/remove-user", post(remove_user_handler))
        .with_state(state)
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let password = headers
        .get(ADMIN_PASSWORD_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    if state.persistence.verify_admin(password).await {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyAdminRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyAdminResponse {
    pub success: bool,
}

/// POST /api/verify-admin
///
/// Always answers 200; `success` tells whether the password matched.
async fn verify_admin_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyAdminRequest>,
) -> Json<VerifyAdminResponse> {
    let success = state.persistence.verify_admin(&request.password).await;
    Json(VerifyAdminResponse { success })
}

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: BTreeMap<String, UserRecord>,
}

/// GET /api/admin/users
async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UsersResponse>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(UsersResponse {
        users: state.persistence.users().await,
    }))
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<StoredMessage>,
}

/// GET /api/admin/messages
async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<MessagesResponse>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(MessagesResponse {
        messages: state.persistence.messages().await,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RemoveUserRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveUserResponse {
    /// Whether a stored user was deleted
    pub success: bool,
    /// Live sessions that were closed
    pub disconnected: usize,
}

/// POST /api/admin/remove-user
///
/// Deletes the stored user, then closes every live session announced under
/// that email. Sessions are closed even when no stored record existed.
async fn remove_user_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<RemoveUserRequest>,
) -> Result<Json<RemoveUserResponse>, ApiError> {
    require_admin(&state, &headers).await?;
    require_non_empty("email", &request.email)?;

    let removed = state.persistence.remove_user(&request.email).await?;
    let disconnected = state.relay.disconnect_email(&request.email);
    info!(email = %request.email, removed, disconnected, "Admin removed user");

    Ok(Json(RemoveUserResponse {
        success: removed,
        disconnected,
    }))
}
