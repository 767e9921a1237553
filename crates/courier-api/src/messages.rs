use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use courier_core::{MessageDraft, MessagingError};
use courier_types::api::{Claims, HistoryQuery, MessageResponse, SendMessageRequest, SendMessageResponse};
use courier_types::models::PageCursor;

use crate::error::{ApiError, blocking};
use crate::state::AppState;

pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let draft = MessageDraft {
        content: req.content,
        message_type: req.message_type,
        media_url: req.media_url,
        media_type: req.media_type,
    };

    let log = state.messaging.log.clone();
    let message = blocking(move || log.append(req.conversation_id, claims.sub, draft)).await?;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            id: message.id,
            created_at: message.created_at,
        }),
    ))
}

/// GET /conversations/{id}/messages: one page of history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let cursor = match (query.before, query.before_id) {
        (Some(before), before_id) => Some(PageCursor { before, before_id }),
        (None, Some(_)) => {
            return Err(MessagingError::validation("beforeId requires before").into());
        }
        (None, None) => None,
    };

    let messaging = state.messaging.clone();
    let viewer = claims.sub;
    let messages = blocking(move || {
        let page = messaging.log.page(conversation_id, viewer, cursor, query.limit)?;
        let ids: Vec<Uuid> = page.iter().map(|m| m.id).collect();
        let mut reactions = messaging.reactions.summarize_many(&ids, viewer)?;

        Ok(page
            .into_iter()
            .map(|m| {
                let summary = reactions.remove(&m.id).unwrap_or_default();
                MessageResponse::new(m, summary)
            })
            .collect::<Vec<_>>())
    })
    .await?;

    Ok(Json(messages))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let messaging = state.messaging.clone();
    let viewer = claims.sub;
    let response = blocking(move || {
        let message = messaging.log.soft_delete(message_id, viewer)?;
        let reactions = messaging.reactions.summarize(message_id, viewer)?;
        Ok(MessageResponse::new(message, reactions))
    })
    .await?;

    Ok(Json(response))
}
