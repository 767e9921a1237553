//! Client-side view of one conversation.
//!
//! History pages, live events and the client's own sends all land here. The
//! timeline keeps messages unique by id and sorted by `(created_at, id)`, so
//! the order a message arrived in never matters.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::models::{Message, PageCursor};

use crate::feed::FeedEvent;
use crate::message_log::MessageDraft;

/// A send that the server has not answered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub correlation_id: Uuid,
    pub draft: MessageDraft,
    pub queued_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Timeline {
    conversation_id: Uuid,
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
    pending: Vec<PendingSend>,
    has_more: bool,
    resync: Option<Resync>,
}

/// Progress of a catch-up after a lag. Pages are fetched newest first until
/// one reaches `anchor`, the newest message held when the lag was reported.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Resync {
    anchor: Option<(DateTime<Utc>, Uuid)>,
    cursor: Option<PageCursor>,
}

impl Timeline {
    pub fn new(conversation_id: Uuid) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            ids: HashSet::new(),
            pending: Vec::new(),
            has_more: true,
            resync: None,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Confirmed messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Unanswered sends in submission order.
    pub fn pending(&self) -> &[PendingSend] {
        &self.pending
    }

    /// Queue a draft for display before the server confirms it.
    pub fn send_pending(&mut self, draft: MessageDraft) -> Uuid {
        let correlation_id = Uuid::new_v4();
        self.pending.push(PendingSend {
            correlation_id,
            draft,
            queued_at: Utc::now(),
        });
        correlation_id
    }

    /// Replace the pending send with the stored message. Returns `false` if
    /// the correlation id is unknown; the message is merged either way, since
    /// the live feed may have delivered it first.
    pub fn confirm(&mut self, correlation_id: Uuid, message: Message) -> bool {
        let known = self.take_pending(correlation_id).is_some();
        self.merge(message);
        known
    }

    /// Drop the pending send and hand its draft back for a manual retry.
    pub fn fail(&mut self, correlation_id: Uuid) -> Option<MessageDraft> {
        self.take_pending(correlation_id).map(|p| p.draft)
    }

    /// Merge a history page fetched with `limit`. A short page means the
    /// start of the conversation has been reached.
    pub fn apply_page(&mut self, page: Vec<Message>, limit: u32) {
        if page.len() < limit as usize {
            self.has_more = false;
        }
        for message in page {
            self.merge(message);
        }
    }

    /// Merge a page fetched with `resync_cursor()` and `limit` after a
    /// `Lagged` event. The resync stays open until a page reaches a message
    /// held before the lag, or the start of the conversation.
    pub fn apply_resync(&mut self, page: Vec<Message>, limit: u32) {
        let Some(resync) = self.resync.take() else {
            for message in page {
                self.merge(message);
            }
            return;
        };

        let short = page.len() < limit as usize;
        let oldest = page.first().map(|m| (m.sort_key(), m.cursor()));
        for message in page {
            self.merge(message);
        }

        if short {
            if resync.anchor.is_none() {
                self.has_more = false;
            }
            return;
        }
        match (resync.anchor, oldest) {
            (Some(anchor), Some((key, cursor))) if key > anchor => {
                self.resync = Some(Resync {
                    anchor: Some(anchor),
                    cursor: Some(cursor),
                });
            }
            _ => {}
        }
    }

    /// Returns `true` if the message was not already shown.
    pub fn apply_live(&mut self, message: Message) -> bool {
        self.merge(message)
    }

    pub fn apply_event(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Message(message) => {
                self.apply_live(message);
            }
            FeedEvent::Lagged(_) => {
                // A second lag during a resync restarts from the newest page.
                let anchor = match self.resync.take() {
                    Some(resync) => resync.anchor,
                    None => self.messages.last().map(Message::sort_key),
                };
                self.resync = Some(Resync { anchor, cursor: None });
            }
        }
    }

    /// Cursor for the next older page; `None` means fetch the latest page.
    pub fn next_cursor(&self) -> Option<PageCursor> {
        self.messages.first().map(Message::cursor)
    }

    pub fn has_more_history(&self) -> bool {
        self.has_more
    }

    pub fn needs_resync(&self) -> bool {
        self.resync.is_some()
    }

    /// Cursor for the next resync page; `None` means the latest page.
    pub fn resync_cursor(&self) -> Option<PageCursor> {
        self.resync.as_ref().and_then(|r| r.cursor)
    }

    fn take_pending(&mut self, correlation_id: Uuid) -> Option<PendingSend> {
        let idx = self
            .pending
            .iter()
            .position(|p| p.correlation_id == correlation_id)?;
        Some(self.pending.remove(idx))
    }

    fn merge(&mut self, message: Message) -> bool {
        if message.conversation_id != self.conversation_id {
            return false;
        }

        if self.ids.contains(&message.id) {
            // Same id, same position; keep whichever copy is newer (e.g. a tombstone).
            if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
                if message.updated_at > existing.updated_at {
                    *existing = message;
                }
            }
            return false;
        }

        let key = message.sort_key();
        let idx = self.messages.partition_point(|m| m.sort_key() < key);
        self.ids.insert(message.id);
        self.messages.insert(idx, message);
        true
    }
}
