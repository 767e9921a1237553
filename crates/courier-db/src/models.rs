/// Database row types. These map directly to SQLite rows and are converted
/// into `courier-types` models at the edge of this crate.
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use courier_types::models::{Conversation, Message, Mute, Participant, Reaction};

/// Fixed-width UTC text (`2024-01-02T03:04:05.123456Z`), so that string
/// comparison in SQL orders the same way as the timestamps themselves.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by SQLite's datetime('now') have no timezone.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("Corrupt timestamp '{}': {}", raw, e))
}

pub(crate) fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse::<Uuid>().with_context(|| format!("Corrupt id '{}'", raw))
}

fn parse_opt_ts(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(parse_ts).transpose()
}

pub const CONVERSATION_COLUMNS: &str = "id, title, is_group, created_at, last_message_at";

pub struct ConversationRow {
    pub id: String,
    pub title: Option<String>,
    pub is_group: bool,
    pub created_at: String,
    pub last_message_at: Option<String>,
}

impl ConversationRow {
    pub fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            is_group: row.get(2)?,
            created_at: row.get(3)?,
            last_message_at: row.get(4)?,
        })
    }
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            title: row.title,
            is_group: row.is_group,
            created_at: parse_ts(&row.created_at)?,
            last_message_at: parse_opt_ts(row.last_message_at.as_deref())?,
        })
    }
}

pub const PARTICIPANT_COLUMNS: &str = "conversation_id, user_id, created_at, last_read_at";

pub struct ParticipantRow {
    pub conversation_id: String,
    pub user_id: String,
    pub created_at: String,
    pub last_read_at: Option<String>,
}

impl ParticipantRow {
    pub fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            conversation_id: row.get(0)?,
            user_id: row.get(1)?,
            created_at: row.get(2)?,
            last_read_at: row.get(3)?,
        })
    }
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = anyhow::Error;

    fn try_from(row: ParticipantRow) -> Result<Self> {
        Ok(Self {
            conversation_id: parse_id(&row.conversation_id)?,
            user_id: parse_id(&row.user_id)?,
            created_at: parse_ts(&row.created_at)?,
            last_read_at: parse_opt_ts(row.last_read_at.as_deref())?,
        })
    }
}

pub const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, content, message_type, \
     media_url, media_type, is_deleted, created_at, updated_at";

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: Option<String>,
    pub content: Option<String>,
    pub message_type: String,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
    pub is_deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl MessageRow {
    pub fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            sender_id: row.get(2)?,
            content: row.get(3)?,
            message_type: row.get(4)?,
            media_url: row.get(5)?,
            media_type: row.get(6)?,
            is_deleted: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            conversation_id: parse_id(&row.conversation_id)?,
            sender_id: row.sender_id.as_deref().map(parse_id).transpose()?,
            content: row.content,
            message_type: row.message_type.parse().map_err(|e: String| anyhow!(e))?,
            media_url: row.media_url,
            media_type: row.media_type,
            is_deleted: row.is_deleted,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

impl TryFrom<ReactionRow> for Reaction {
    type Error = anyhow::Error;

    fn try_from(row: ReactionRow) -> Result<Self> {
        Ok(Self {
            message_id: parse_id(&row.message_id)?,
            user_id: parse_id(&row.user_id)?,
            emoji: row.emoji,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

pub struct MuteRow {
    pub user_id: String,
    pub conversation_id: String,
    pub muted_until: Option<String>,
}

impl TryFrom<MuteRow> for Mute {
    type Error = anyhow::Error;

    fn try_from(row: MuteRow) -> Result<Self> {
        Ok(Self {
            user_id: parse_id(&row.user_id)?,
            conversation_id: parse_id(&row.conversation_id)?,
            muted_until: parse_opt_ts(row.muted_until.as_deref())?,
        })
    }
}
