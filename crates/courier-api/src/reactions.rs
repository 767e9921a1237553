use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use courier_types::api::{Claims, ToggleReactionRequest, ToggleReactionResponse};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reactions = state.messaging.reactions.clone();
    let outcome = blocking(move || reactions.toggle(req.message_id, claims.sub, &req.emoji)).await?;

    Ok(Json(ToggleReactionResponse {
        applied: outcome.applied,
    }))
}

pub async fn get_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let reactions = state.messaging.reactions.clone();
    let summary = blocking(move || reactions.summarize(message_id, claims.sub)).await?;
    Ok(Json(summary))
}
