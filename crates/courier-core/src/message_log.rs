use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use courier_types::models::{Message, MessageType, NewMessage, PageCursor};
use courier_types::store::{ConversationStore, MessageStore};

use crate::error::{MessagingError, MessagingResult};
use crate::feed::ChangeFeed;
use crate::notify::Notifier;
use crate::participants::ParticipantRegistry;

pub const MAX_PAGE_SIZE: u32 = 200;
pub const MAX_CONTENT_CHARS: usize = 4000;

/// Appends to one conversation hold one of these stripes from commit through
/// publish, so the feed sees messages in storage order.
const APPEND_STRIPES: usize = 64;

/// What a client submits for a new message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: Option<String>,
    pub message_type: MessageType,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            message_type: MessageType::Text,
            media_url: None,
            media_type: None,
        }
    }

    pub fn media(message_type: MessageType, media_url: impl Into<String>, media_type: Option<String>) -> Self {
        Self {
            content: None,
            message_type,
            media_url: Some(media_url.into()),
            media_type,
        }
    }

    /// Trim blank fields to `None` and check the content/media invariants.
    pub fn normalize(self) -> MessagingResult<Self> {
        let content = self
            .content
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let media_url = self
            .media_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        let media_type = self
            .media_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        if content.is_none() && media_url.is_none() {
            return Err(MessagingError::validation("message has neither content nor media"));
        }
        if content.as_ref().is_some_and(|c| c.chars().count() > MAX_CONTENT_CHARS) {
            return Err(MessagingError::validation(format!(
                "content longer than {} characters",
                MAX_CONTENT_CHARS
            )));
        }
        match self.message_type {
            MessageType::Text if content.is_none() => {
                return Err(MessagingError::validation("text message with media needs content"));
            }
            MessageType::Image | MessageType::Gif | MessageType::Voice if media_url.is_none() => {
                return Err(MessagingError::validation(format!(
                    "{} message needs a media URL",
                    self.message_type
                )));
            }
            _ => {}
        }

        Ok(Self {
            content,
            message_type: self.message_type,
            media_url,
            media_type,
        })
    }
}

/// Append-only message history per conversation.
#[derive(Clone)]
pub struct MessageLog {
    messages: Arc<dyn MessageStore>,
    conversations: Arc<dyn ConversationStore>,
    participants: ParticipantRegistry,
    feed: ChangeFeed,
    notifier: Arc<dyn Notifier>,
    append_locks: Arc<[Mutex<()>]>,
}

impl MessageLog {
    pub fn new(
        messages: Arc<dyn MessageStore>,
        conversations: Arc<dyn ConversationStore>,
        participants: ParticipantRegistry,
        feed: ChangeFeed,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            messages,
            conversations,
            participants,
            feed,
            notifier,
            append_locks: (0..APPEND_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Store a message from `sender_id` and push it to live subscribers.
    ///
    /// The row and `last_message_at` are written together or not at all.
    /// Publishing happens after the commit and cannot fail the call: a
    /// subscriber that misses the event picks it up with `page`. Concurrent
    /// appends to one conversation are published in the order they commit.
    pub fn append(&self, conversation_id: Uuid, sender_id: Uuid, draft: MessageDraft) -> MessagingResult<Message> {
        let draft = draft.normalize()?;
        self.require_conversation(conversation_id)?;
        self.participants.require_member(conversation_id, sender_id)?;

        self.commit(conversation_id, Some(sender_id), draft)
    }

    /// Append a message with no sender, e.g. "Alice renamed the group".
    pub fn append_system(&self, conversation_id: Uuid, content: impl Into<String>) -> MessagingResult<Message> {
        let draft = MessageDraft::text(content).normalize()?;
        self.require_conversation(conversation_id)?;

        self.commit(conversation_id, None, draft)
    }

    /// One page of history strictly before `cursor` (newest page when `None`),
    /// returned oldest first.
    pub fn page(
        &self,
        conversation_id: Uuid,
        viewer: Uuid,
        cursor: Option<PageCursor>,
        limit: u32,
    ) -> MessagingResult<Vec<Message>> {
        self.require_conversation(conversation_id)?;
        self.participants.require_member(conversation_id, viewer)?;

        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let mut page = self.messages.page_messages(conversation_id, cursor, limit)?;
        page.reverse();
        Ok(page)
    }

    pub fn get(&self, message_id: Uuid, viewer: Uuid) -> MessagingResult<Message> {
        let message = self.find(message_id)?;
        self.participants.require_member(message.conversation_id, viewer)?;
        Ok(message)
    }

    /// Tombstone a message. Only its sender may do this; the row keeps its
    /// position in the history.
    pub fn soft_delete(&self, message_id: Uuid, requester: Uuid) -> MessagingResult<Message> {
        let message = self.find(message_id)?;
        if message.sender_id != Some(requester) {
            return Err(MessagingError::authorization(format!(
                "user {} did not send message {}",
                requester, message_id
            )));
        }
        if message.is_deleted {
            return Ok(message);
        }

        let deleted = self
            .messages
            .soft_delete_message(message_id, requester, Utc::now())?
            .ok_or_else(|| MessagingError::not_found(format!("message {}", message_id)))?;

        info!("Message {} deleted by its sender", message_id);
        Ok(deleted)
    }

    fn commit(&self, conversation_id: Uuid, sender_id: Option<Uuid>, draft: MessageDraft) -> MessagingResult<Message> {
        let ordered = self.append_lock(conversation_id);
        let message = self.messages.append_message(&NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: draft.content,
            message_type: draft.message_type,
            media_url: draft.media_url,
            media_type: draft.media_type,
            created_at: Utc::now(),
        })?;

        match self.feed.publish(&message) {
            Ok(reached) => debug!(
                "Message {} published to {} subscribers of {}",
                message.id, reached, conversation_id
            ),
            Err(e) => warn!(
                "Message {} stored but not published ({}); clients will catch up via history",
                message.id, e
            ),
        }
        drop(ordered);

        self.fan_out(&message);
        Ok(message)
    }

    fn append_lock(&self, conversation_id: Uuid) -> MutexGuard<'_, ()> {
        let stripe = (conversation_id.as_u128() % self.append_locks.len() as u128) as usize;
        self.append_locks[stripe].lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_out(&self, message: &Message) {
        let recipients: Vec<Uuid> = match self.participants.member_states(message.conversation_id, message.created_at) {
            Ok(states) => states
                .into_iter()
                .filter(|s| !s.muted && Some(s.participant.user_id) != message.sender_id)
                .map(|s| s.participant.user_id)
                .collect(),
            Err(e) => {
                warn!("Skipping notifications for message {}: {}", message.id, e);
                return;
            }
        };

        if recipients.is_empty() {
            return;
        }
        if let Err(e) = self.notifier.message_delivered(message, &recipients) {
            warn!("Notification fan-out failed for message {}: {}", message.id, e);
        }
    }

    fn find(&self, message_id: Uuid) -> MessagingResult<Message> {
        self.messages
            .get_message(message_id)?
            .ok_or_else(|| MessagingError::not_found(format!("message {}", message_id)))
    }

    fn require_conversation(&self, conversation_id: Uuid) -> MessagingResult<()> {
        match self.conversations.get_conversation(conversation_id)? {
            Some(_) => Ok(()),
            None => Err(MessagingError::not_found(format!("conversation {}", conversation_id))),
        }
    }
}
