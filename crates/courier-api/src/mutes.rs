use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};

use courier_types::api::{Claims, MuteRequest, UnmuteRequest};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub async fn mute(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mutes = state.messaging.mutes.clone();
    blocking(move || mutes.mute(req.conversation_id, claims.sub, req.duration_hours)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unmute(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UnmuteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mutes = state.messaging.mutes.clone();
    blocking(move || mutes.unmute(req.conversation_id, claims.sub)).await?;
    Ok(StatusCode::NO_CONTENT)
}
