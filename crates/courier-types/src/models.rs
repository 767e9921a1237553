use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: Option<String>,
    pub is_group: bool,
    pub created_at: DateTime<Utc>,
    /// Denormalized from the newest message; `None` until the first send.
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    Gif,
    Voice,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Gif => "gif",
            Self::Voice => "voice",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "gif" => Ok(Self::Gif),
            "voice" => Ok(Self::Voice),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// `None` for system messages or senders that no longer exist.
    pub sender_id: Option<Uuid>,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Ordering key within a conversation.
    pub fn sort_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }

    /// Cursor that pages strictly before this message.
    pub fn cursor(&self) -> PageCursor {
        PageCursor {
            before: self.created_at,
            before_id: Some(self.id),
        }
    }
}

/// A message as handed to storage. `created_at` is a lower bound: storage may
/// move it forward to keep the conversation strictly ordered.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Exclusive upper bound for backward pagination.
///
/// With `before_id` set the bound is on the `(created_at, id)` pair, so rows
/// sharing the boundary timestamp are split deterministically between pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub before: DateTime<Utc>,
    pub before_id: Option<Uuid>,
}

impl PageCursor {
    pub fn at(before: DateTime<Utc>) -> Self {
        Self {
            before,
            before_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mute {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    /// `None` mutes indefinitely.
    pub muted_until: Option<DateTime<Utc>>,
}

impl Mute {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.muted_until.map_or(true, |until| until > now)
    }
}
