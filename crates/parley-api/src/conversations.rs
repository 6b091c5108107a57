use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parley_types::api::{Claims, SaveConversationResponse};

use crate::auth::AppState;
use crate::error::ApiError;

/// Start an empty conversation with another user.
pub async fn save_conversation(
    State(state): State<AppState>,
    Path(other_user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversation_id = state
        .coordinator
        .save_conversation_only(claims.sub, other_user_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SaveConversationResponse { conversation_id }),
    ))
}

pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = state.coordinator.conversations(claims.sub).await?;
    Ok(Json(conversations))
}
