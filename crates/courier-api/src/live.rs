use axum::{
    Extension,
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
};
use uuid::Uuid;

use courier_gateway::connection;
use courier_types::api::Claims;

use crate::error::{ApiError, blocking};
use crate::state::AppState;

/// GET /conversations/{id}/live: WebSocket of newly appended messages.
pub async fn live(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let participants = state.messaging.participants.clone();
    let user_id = claims.sub;
    blocking(move || participants.require_member(conversation_id, user_id)).await?;

    let subscription = state.messaging.feed.subscribe(conversation_id)?;
    Ok(ws.on_upgrade(move |socket| connection::handle_live(socket, subscription, user_id)))
}
