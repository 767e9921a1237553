use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use courier_types::models::Message;
use courier_types::store::ParticipantStore;

use crate::directory::ConversationView;
use crate::error::{MessagingError, MessagingResult};

/// Per-participant "last seen" watermark.
#[derive(Clone)]
pub struct ReadReceiptTracker {
    participants: Arc<dyn ParticipantStore>,
}

impl ReadReceiptTracker {
    pub fn new(participants: Arc<dyn ParticipantStore>) -> Self {
        Self { participants }
    }

    /// Advance the watermark to `at`. Older timestamps than the stored one are ignored.
    pub fn mark_read(&self, conversation_id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> MessagingResult<()> {
        if self.participants.advance_last_read(conversation_id, user_id, at)? {
            return Ok(());
        }

        // Nothing moved: either the watermark is already newer, or there is no such member.
        if self.participants.get_participant(conversation_id, user_id)?.is_none() {
            return Err(MessagingError::authorization(format!(
                "user {} is not a participant of conversation {}",
                user_id, conversation_id
            )));
        }
        Ok(())
    }
}

/// Whether `viewer` has something new to read in the conversation.
pub fn is_unread(view: &ConversationView, viewer: Uuid, last_message: Option<&Message>) -> bool {
    let last_read_at = view.member(viewer).and_then(|m| m.last_read_at);
    is_unread_since(last_read_at, viewer, last_message)
}

pub fn is_unread_since(last_read_at: Option<DateTime<Utc>>, viewer: Uuid, last_message: Option<&Message>) -> bool {
    let Some(last) = last_message else {
        return false;
    };
    if last.sender_id == Some(viewer) {
        return false;
    }
    last_read_at.map_or(true, |read| read < last.created_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MessagingError;
    use crate::testing::Fixture;
    use chrono::Duration;

    #[test]
    fn unread_until_marked_then_unread_again_on_new_message() {
        let fx = Fixture::new();
        let conv = fx.direct(fx.alice, fx.bob);

        let first = fx.text(conv.id, fx.alice, "hi");
        let view = fx.messaging.directory.view(conv.id, fx.bob).unwrap();
        assert!(is_unread(&view, fx.bob, Some(&first)));
        assert!(!is_unread(&view, fx.alice, Some(&first)));

        let read_at = first.created_at;
        fx.messaging.receipts.mark_read(conv.id, fx.bob, read_at).unwrap();
        let view = fx.messaging.directory.view(conv.id, fx.bob).unwrap();
        assert!(!is_unread(&view, fx.bob, Some(&first)));

        let second = fx.text(conv.id, fx.alice, "still there?");
        assert!(second.created_at > read_at);
        assert!(is_unread(&view, fx.bob, Some(&second)));
    }

    #[test]
    fn watermark_never_moves_back() {
        let fx = Fixture::new();
        let conv = fx.direct(fx.alice, fx.bob);
        let now = Utc::now();

        fx.messaging.receipts.mark_read(conv.id, fx.bob, now).unwrap();
        fx.messaging
            .receipts
            .mark_read(conv.id, fx.bob, now - Duration::hours(1))
            .unwrap();

        let view = fx.messaging.directory.view(conv.id, fx.bob).unwrap();
        assert!(view.member(fx.bob).unwrap().last_read_at.unwrap() >= now - Duration::seconds(1));
    }

    #[test]
    fn no_messages_means_nothing_unread() {
        assert!(!is_unread_since(None, Uuid::new_v4(), None));
    }

    #[test]
    fn outsiders_cannot_mark_read() {
        let fx = Fixture::new();
        let conv = fx.direct(fx.alice, fx.bob);

        let err = fx
            .messaging
            .receipts
            .mark_read(conv.id, fx.carol, Utc::now())
            .unwrap_err();
        assert!(matches!(err, MessagingError::Authorization(_)));
    }
}
