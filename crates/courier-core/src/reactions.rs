use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use courier_types::api::ReactionSummary;
use courier_types::models::{Message, Reaction};
use courier_types::store::{MessageStore, ReactionStore};

use crate::error::{MessagingError, MessagingResult};
use crate::participants::ParticipantRegistry;

const MAX_EMOJI_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    /// `true` when the reaction now exists, `false` when it was removed.
    pub applied: bool,
}

/// Reactions keyed by `(message, user, emoji)`; toggling flips one row.
#[derive(Clone)]
pub struct ReactionIndex {
    reactions: Arc<dyn ReactionStore>,
    messages: Arc<dyn MessageStore>,
    participants: ParticipantRegistry,
}

impl ReactionIndex {
    pub fn new(
        reactions: Arc<dyn ReactionStore>,
        messages: Arc<dyn MessageStore>,
        participants: ParticipantRegistry,
    ) -> Self {
        Self {
            reactions,
            messages,
            participants,
        }
    }

    pub fn toggle(&self, message_id: Uuid, user_id: Uuid, emoji: &str) -> MessagingResult<ToggleOutcome> {
        let emoji = emoji.trim();
        if emoji.is_empty() || emoji.len() > MAX_EMOJI_BYTES {
            return Err(MessagingError::validation(format!(
                "emoji must be 1 to {} bytes",
                MAX_EMOJI_BYTES
            )));
        }

        let message = self.visible_message(message_id, user_id)?;
        if message.is_deleted {
            return Err(MessagingError::validation("cannot react to a deleted message"));
        }

        let applied = self
            .reactions
            .toggle_reaction(message_id, user_id, emoji, Utc::now())?;

        debug!(
            "Reaction {} by {} on {}: {}",
            emoji,
            user_id,
            message_id,
            if applied { "added" } else { "removed" }
        );
        Ok(ToggleOutcome { applied })
    }

    pub fn summarize(&self, message_id: Uuid, viewer: Uuid) -> MessagingResult<Vec<ReactionSummary>> {
        self.visible_message(message_id, viewer)?;
        let rows = self.reactions.reactions_for_messages(&[message_id])?;
        Ok(summarize_reactions(&rows, viewer))
    }

    /// Summaries for a batch of messages the caller has already authorised.
    /// Messages without reactions map to an empty list.
    pub fn summarize_many(
        &self,
        message_ids: &[Uuid],
        viewer: Uuid,
    ) -> MessagingResult<HashMap<Uuid, Vec<ReactionSummary>>> {
        let mut by_message: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for r in self.reactions.reactions_for_messages(message_ids)? {
            by_message.entry(r.message_id).or_default().push(r);
        }

        Ok(message_ids
            .iter()
            .map(|id| {
                let rows = by_message.remove(id).unwrap_or_default();
                (*id, summarize_reactions(&rows, viewer))
            })
            .collect())
    }

    fn visible_message(&self, message_id: Uuid, user_id: Uuid) -> MessagingResult<Message> {
        let message = self
            .messages
            .get_message(message_id)?
            .ok_or_else(|| MessagingError::not_found(format!("message {}", message_id)))?;
        self.participants.require_member(message.conversation_id, user_id)?;
        Ok(message)
    }
}

/// Group by emoji in first-seen order. `reactions` must be oldest first.
pub fn summarize_reactions(reactions: &[Reaction], viewer: Uuid) -> Vec<ReactionSummary> {
    let mut summaries: Vec<ReactionSummary> = Vec::new();
    for r in reactions {
        let idx = match summaries.iter().position(|s| s.emoji == r.emoji) {
            Some(idx) => idx,
            None => {
                summaries.push(ReactionSummary {
                    emoji: r.emoji.clone(),
                    count: 0,
                    viewer_reacted: false,
                });
                summaries.len() - 1
            }
        };
        let summary = &mut summaries[idx];
        summary.count += 1;
        summary.viewer_reacted |= r.user_id == viewer;
    }
    summaries
}
