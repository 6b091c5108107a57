use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{Claims, SendMessageRequest};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn send_message(
    State(state): State<AppState>,
    Path(recipient_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state
        .coordinator
        .send_message(claims.sub, recipient_id, req.into_content())
        .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// Full history with another user, oldest first. 404 if the pair never talked.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(other_user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .coordinator
        .conversation_history(claims.sub, other_user_id)
        .await?;
    Ok(Json(messages))
}

pub async fn get_unseen_messages(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.coordinator.unseen_messages(claims.sub).await?;
    Ok(Json(messages))
}
