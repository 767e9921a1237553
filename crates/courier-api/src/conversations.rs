use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::api::{Claims, CreateConversationRequest, CreateConversationResponse, MarkReadRequest};

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let directory = state.messaging.directory.clone();
    let conversation = blocking(move || {
        directory.create_conversation(claims.sub, &req.participant_ids, req.title, req.is_group)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateConversationResponse { id: conversation.id }),
    ))
}

/// GET /conversations: the caller's inbox, most recent first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let directory = state.messaging.directory.clone();
    let inbox = blocking(move || directory.inbox(claims.sub, Utc::now())).await?;
    Ok(Json(inbox))
}

pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // The body is optional; an empty one means "read up to now".
    let req: MarkReadRequest = if body.is_empty() {
        MarkReadRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };
    let at = read_watermark(req.at, Utc::now());

    let receipts = state.messaging.receipts.clone();
    blocking(move || receipts.mark_read(conversation_id, claims.sub, at)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The client's read time, never later than `now`: the watermark only moves
/// forward, so a future value would hide every later message.
fn read_watermark(requested: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    requested.map_or(now, |at| at.min(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn read_watermark_is_clamped_to_now() {
        let now = Utc::now();
        assert_eq!(read_watermark(None, now), now);
        assert_eq!(read_watermark(Some(now - Duration::minutes(5)), now), now - Duration::minutes(5));
        assert_eq!(read_watermark(Some(now + Duration::days(365)), now), now);
    }
}
