use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, MessageType};

// -- JWT Claims --

/// Claims issued by the identity provider. Shared by the REST middleware and
/// the live-feed upgrade so both trust the same actor id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub username: String,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub participant_ids: Vec<Uuid>,
    #[serde(default)]
    pub title: Option<String>,
    pub is_group: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateConversationResponse {
    pub id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Primary,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationOverview {
    pub id: Uuid,
    pub display_name: String,
    pub is_group: bool,
    pub preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread: bool,
    pub muted: bool,
    pub category: Category,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarkReadRequest {
    /// Defaults to the server's current time.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub content: Option<String>,
    pub message_type: MessageType,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// `created_at` of the oldest message already held by the client.
    pub before: Option<DateTime<Utc>>,
    /// Id of that same message; disambiguates equal timestamps.
    pub before_id: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

/// A message as surfaced to clients. Tombstones carry neither content nor media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub reactions: Vec<ReactionSummary>,
}

impl MessageResponse {
    pub fn new(message: Message, reactions: Vec<ReactionSummary>) -> Self {
        let (content, media_url, media_type) = if message.is_deleted {
            (None, None, None)
        } else {
            (message.content, message.media_url, message.media_type)
        };

        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content,
            message_type: message.message_type,
            media_url,
            media_type,
            is_deleted: message.is_deleted,
            created_at: message.created_at,
            updated_at: message.updated_at,
            reactions,
        }
    }
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub message_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleReactionResponse {
    pub applied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummary {
    pub emoji: String,
    pub count: usize,
    pub viewer_reacted: bool,
}

// -- Mutes --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MuteRequest {
    pub conversation_id: Uuid,
    #[serde(default)]
    pub duration_hours: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UnmuteRequest {
    pub conversation_id: Uuid,
}

// -- Media --

#[derive(Debug, Serialize)]
pub struct MediaUploadResponse {
    pub media_url: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
