use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;

/// Frames sent over a conversation's live WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LiveEvent {
    /// Subscription is registered; anything appended from here on is delivered.
    Ready { conversation_id: Uuid, user_id: Uuid },

    /// A message was appended to the conversation.
    MessageCreate(MessageResponse),

    /// The server dropped `missed` events for this subscriber. The client
    /// must re-sync through the history endpoint.
    Resync { conversation_id: Uuid, missed: u64 },
}
