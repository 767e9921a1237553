//! Storage interfaces, one per messaging component.
//!
//! Components receive these as `Arc<dyn ...>` so the SQLite backend in
//! `courier-db` can be swapped for a stub in tests.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Conversation, Message, Mute, NewMessage, PageCursor, Participant, Reaction};

pub trait ProfileStore: Send + Sync {
    /// Handles for the given users. Unknown ids are absent from the map.
    fn handles(&self, user_ids: &[Uuid]) -> Result<HashMap<Uuid, String>>;

    /// Users followed by `user_id`.
    fn following(&self, user_id: Uuid) -> Result<HashSet<Uuid>>;
}

pub trait ConversationStore: Send + Sync {
    /// Insert the conversation and all of its participant rows atomically.
    fn insert_conversation(&self, conversation: &Conversation, participants: &[Participant]) -> Result<()>;

    /// Insert a 1:1 conversation unless one already exists whose participant
    /// set is exactly the given pair, in which case that one is returned.
    /// The lookup and the insert happen in the same write.
    fn insert_direct_conversation(
        &self,
        conversation: &Conversation,
        participants: &[Participant],
    ) -> Result<Conversation>;

    fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Conversations `user_id` participates in, most recent activity first.
    fn conversations_for_user(&self, user_id: Uuid) -> Result<Vec<Conversation>>;
}

pub trait ParticipantStore: Send + Sync {
    fn participants(&self, conversation_id: Uuid) -> Result<Vec<Participant>>;

    fn get_participant(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Participant>>;

    /// Move `last_read_at` forward to `at`. Returns `false` when the stored
    /// watermark is already at or past `at`, or the row does not exist.
    fn advance_last_read(&self, conversation_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<bool>;
}

pub trait MessageStore: Send + Sync {
    /// Insert the message and bump `conversations.last_message_at` in one
    /// transaction. Returns the row as committed.
    fn append_message(&self, message: &NewMessage) -> Result<Message>;

    fn get_message(&self, id: Uuid) -> Result<Option<Message>>;

    /// Up to `limit` messages strictly before `cursor`, newest first.
    fn page_messages(&self, conversation_id: Uuid, cursor: Option<PageCursor>, limit: u32) -> Result<Vec<Message>>;

    /// Latest message of each conversation; conversations without messages are absent.
    fn latest_messages(&self, conversation_ids: &[Uuid]) -> Result<HashMap<Uuid, Message>>;

    /// Distinct non-null senders that have posted into the conversation.
    fn sender_ids(&self, conversation_id: Uuid) -> Result<HashSet<Uuid>>;

    /// Clear content and set the tombstone flag, only if `sender_id` matches.
    /// Returns the updated row, or `None` if nothing matched.
    fn soft_delete_message(&self, id: Uuid, sender_id: Uuid, at: DateTime<Utc>) -> Result<Option<Message>>;
}

pub trait ReactionStore: Send + Sync {
    /// Delete the `(message, user, emoji)` row if present, insert it otherwise,
    /// as one write. Returns `true` when the reaction is now applied.
    fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Reactions on the given messages, oldest first.
    fn reactions_for_messages(&self, message_ids: &[Uuid]) -> Result<Vec<Reaction>>;
}

pub trait MuteStore: Send + Sync {
    fn upsert_mute(&self, mute: &Mute) -> Result<()>;

    /// Returns whether a row was removed.
    fn delete_mute(&self, conversation_id: Uuid, user_id: Uuid) -> Result<bool>;

    fn get_mute(&self, conversation_id: Uuid, user_id: Uuid) -> Result<Option<Mute>>;

    fn mutes_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<Mute>>;
}
